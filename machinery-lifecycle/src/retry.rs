//! Unified retry knob (spec §9 Open Question): the original hard-codes
//! `WaitSSH` at 5 attempts / 5s sleep in places while other polls
//! (`Running`, generic `wait`) take `-retries`/`-sleep`. Both are modeled
//! here as the same [`RetryPolicy`], defaulted to 5×5s so existing
//! `WaitSSH` call sites need no configuration to keep their old behavior.

use std::thread::sleep;
use std::time::Duration;

/// Bounded polling: `attempts` tries, `sleep` between each (never after the
/// last). Exhausting the budget is a "give-up", never an error (spec §5
/// "Cancellation & timeouts").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub sleep: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            sleep: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, sleep: Duration) -> Self {
        Self { attempts, sleep }
    }

    /// Calls `f` up to `attempts` times, returning the first `Some`. Sleeps
    /// `self.sleep` between attempts, not after the last one. Returns
    /// `None` once the budget is exhausted ("give-up" per spec §5/§7.2).
    pub fn poll<T, F: FnMut() -> Option<T>>(&self, mut f: F) -> Option<T> {
        for attempt in 0..self.attempts.max(1) {
            if let Some(value) = f() {
                return Some(value);
            }
            if attempt + 1 < self.attempts {
                sleep(self.sleep);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn default_is_five_attempts_five_seconds() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.attempts, 5);
        assert_eq!(policy.sleep, Duration::from_secs(5));
    }

    #[test]
    fn poll_stops_on_first_success() {
        let policy = RetryPolicy::new(5, Duration::from_millis(0));
        let calls = Cell::new(0);
        let result = policy.poll(|| {
            calls.set(calls.get() + 1);
            if calls.get() == 2 {
                Some("ready")
            } else {
                None
            }
        });
        assert_eq!(result, Some("ready"));
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn poll_gives_up_after_budget_exhausted() {
        let policy = RetryPolicy::new(3, Duration::from_millis(0));
        let calls = Cell::new(0);
        let result: Option<()> = policy.poll(|| {
            calls.set(calls.get() + 1);
            None
        });
        assert_eq!(result, None);
        assert_eq!(calls.get(), 3);
    }
}
