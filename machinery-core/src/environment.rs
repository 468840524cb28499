//! Process environment resolution and scoped overlays (spec §4.8).
//!
//! `resolve` expands `$VAR`, `${VAR}` and `${VAR:default}` references inside
//! a string against the current process environment, iterating until no
//! `${...}` form remains. `Environment::push`/`pop` let a caller shadow the
//! process environment for the duration of a scope and restore it
//! deterministically on every exit path (including early `?` returns, via
//! `Drop`).

use std::collections::HashMap;
use std::env;
use std::sync::Mutex;

use once_cell::sync::Lazy;
use regex::Regex;

static VAR_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::([^}]*))?\}|\$([A-Za-z_][A-Za-z0-9_]*)")
        .expect("static regex is valid")
});

/// Guards against pathological `${A:${A:x}}`-style inputs that would never
/// converge; matches the bounded-iteration philosophy used for include/extends.
const MAX_RESOLVE_PASSES: usize = 32;

/// Expands `$VAR`, `${VAR}` and `${VAR:default}` in `input` using the
/// current process environment (plus anything pushed onto the scope stack).
/// Runs to a fixpoint: an expansion that introduces a new `${...}` token is
/// expanded again, up to `MAX_RESOLVE_PASSES`.
pub fn resolve(input: &str) -> String {
    let mut current = input.to_string();
    for _ in 0..MAX_RESOLVE_PASSES {
        let next = resolve_once(&current);
        if next == current {
            return current;
        }
        current = next;
    }
    current
}

fn resolve_once(input: &str) -> String {
    VAR_PATTERN
        .replace_all(input, |caps: &regex::Captures| {
            if let Some(name) = caps.get(1) {
                let name = name.as_str();
                match env::var(name) {
                    Ok(v) => v,
                    Err(_) => caps
                        .get(2)
                        .map(|d| d.as_str().to_string())
                        .unwrap_or_default(),
                }
            } else if let Some(name) = caps.get(3) {
                env::var(name.as_str()).unwrap_or_default()
            } else {
                caps.get(0).map(|m| m.as_str().to_string()).unwrap_or_default()
            }
        })
        .into_owned()
}

/// A stack of environment overlays. Each `push` records both the variables
/// it sets and whatever those keys previously held, so `pop` can restore the
/// exact prior state even if an outer scope already overrode the process
/// default.
#[derive(Default)]
pub struct Environment {
    stack: Mutex<Vec<HashMap<String, Option<String>>>>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies `vars` to the process environment, remembering prior values.
    pub fn push(&self, vars: &HashMap<String, String>) {
        let mut frame = HashMap::with_capacity(vars.len());
        for (k, v) in vars {
            frame.insert(k.clone(), env::var(k).ok());
            env::set_var(k, v);
        }
        self.stack.lock().expect("environment lock poisoned").push(frame);
    }

    /// Restores the environment to what it was before the most recent
    /// `push`. A no-op if the stack is empty.
    pub fn pop(&self) {
        let frame = self.stack.lock().expect("environment lock poisoned").pop();
        let Some(frame) = frame else { return };
        for (k, prior) in frame {
            match prior {
                Some(v) => env::set_var(&k, v),
                None => env::remove_var(&k),
            }
        }
    }

    /// Depth of the current overlay stack, mostly useful in tests.
    pub fn depth(&self) -> usize {
        self.stack.lock().expect("environment lock poisoned").len()
    }
}

/// RAII guard returned by [`ScopedEnv::enter`]; pops the overlay on drop so
/// an early return or `?` still restores the outer scope.
pub struct ScopedEnv<'a> {
    env: &'a Environment,
}

impl Environment {
    pub fn enter(&self, vars: &HashMap<String, String>) -> ScopedEnv<'_> {
        self.push(vars);
        ScopedEnv { env: self }
    }
}

impl Drop for ScopedEnv<'_> {
    fn drop(&mut self) {
        self.env.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_plain_var() {
        env::set_var("MACHINERY_TEST_PLAIN", "hello");
        assert_eq!(resolve("$MACHINERY_TEST_PLAIN"), "hello");
        assert_eq!(resolve("${MACHINERY_TEST_PLAIN}"), "hello");
        env::remove_var("MACHINERY_TEST_PLAIN");
    }

    #[test]
    fn resolves_default_when_missing() {
        env::remove_var("MACHINERY_TEST_MISSING");
        assert_eq!(resolve("${MACHINERY_TEST_MISSING:fallback}"), "fallback");
    }

    #[test]
    fn idempotent_on_plain_strings() {
        let s = "no vars here";
        assert_eq!(resolve(s), resolve(&resolve(s)));
    }

    #[test]
    fn idempotent_on_undefined_without_default() {
        env::remove_var("MACHINERY_TEST_UNDEF");
        let once = resolve("${MACHINERY_TEST_UNDEF}");
        assert_eq!(once, resolve(&once));
    }

    #[test]
    fn push_pop_restores_outer_scope() {
        env::set_var("MACHINERY_TEST_SCOPE", "outer");
        let env_stack = Environment::new();
        let mut overlay = HashMap::new();
        overlay.insert("MACHINERY_TEST_SCOPE".to_string(), "inner".to_string());
        {
            let _guard = env_stack.enter(&overlay);
            assert_eq!(env::var("MACHINERY_TEST_SCOPE").unwrap(), "inner");
        }
        assert_eq!(env::var("MACHINERY_TEST_SCOPE").unwrap(), "outer");
        env::remove_var("MACHINERY_TEST_SCOPE");
    }

    #[test]
    fn push_pop_removes_newly_introduced_var() {
        env::remove_var("MACHINERY_TEST_NEW");
        let env_stack = Environment::new();
        let mut overlay = HashMap::new();
        overlay.insert("MACHINERY_TEST_NEW".to_string(), "value".to_string());
        env_stack.push(&overlay);
        assert_eq!(env::var("MACHINERY_TEST_NEW").unwrap(), "value");
        env_stack.pop();
        assert!(env::var("MACHINERY_TEST_NEW").is_err());
    }
}
