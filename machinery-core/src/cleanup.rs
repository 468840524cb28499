//! LIFO cleanup registry (spec §5/§9): the `atexit`-style CTRL+C handling.
//!
//! Operations that create transient state (SCP staging directories, mounted
//! archives) register a cleanup closure here. On normal completion the
//! caller drains the registry in LIFO order; a signal handler can instead
//! set a `cancelled` flag and let the in-flight subprocess return before the
//! same drain runs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

type Cleanup = Box<dyn FnOnce() + Send>;

#[derive(Default)]
pub struct CleanupStack {
    callbacks: Mutex<Vec<Cleanup>>,
    cancelled: AtomicBool,
}

impl CleanupStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a cleanup to run, most-recently-registered first.
    pub fn register<F: FnOnce() + Send + 'static>(&self, f: F) {
        self.callbacks
            .lock()
            .expect("cleanup stack lock poisoned")
            .push(Box::new(f));
    }

    /// Runs every registered cleanup in LIFO order, then clears the stack.
    pub fn drain(&self) {
        let callbacks = {
            let mut guard = self.callbacks.lock().expect("cleanup stack lock poisoned");
            std::mem::take(&mut *guard)
        };
        for cb in callbacks.into_iter().rev() {
            cb();
        }
    }

    /// Marks the process as cancelled; long-running polls should check this
    /// between retries and give up early.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex as StdMutex};

    #[test]
    fn drains_in_lifo_order() {
        let stack = CleanupStack::new();
        let order = Arc::new(StdMutex::new(Vec::new()));

        for i in 0..3 {
            let order = Arc::clone(&order);
            stack.register(move || order.lock().unwrap().push(i));
        }
        stack.drain();
        assert_eq!(*order.lock().unwrap(), vec![2, 1, 0]);
    }

    #[test]
    fn drain_is_idempotent_when_empty() {
        let stack = CleanupStack::new();
        stack.drain();
        stack.drain();
    }

    #[test]
    fn cancel_flag_observable() {
        let stack = CleanupStack::new();
        assert!(!stack.is_cancelled());
        stack.cancel();
        assert!(stack.is_cancelled());
    }
}
