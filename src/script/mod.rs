//! Scripting environments that evaluate check rule code.
//!
//! Every environment implements [`ScriptEnvironment`]. Environments are
//! registered once in an immutable [`EnvironmentRegistry`] and looked up by
//! case-insensitive name or alias. The [`Dispatcher`] evaluates one check's
//! code in a fresh context, bounded by a [`Budget`], and maps what the code
//! left behind to a [`Status`](crate::model::Status).
//!
//! Two rule languages ship with the crate:
//!
//! - `ecma` (aliases `javascript`, `js`, `ecmascript`)
//! - `r` (aliases `rscript`, `renjin`)

mod dispatcher;
mod lang;
mod registry;

pub use dispatcher::{Dispatch, Dispatcher, DEFAULT_MAX_CALL_DEPTH, DEFAULT_TIMEOUT};
pub use lang::{EcmaEnvironment, REnvironment};
pub use registry::{default_registry, EnvironmentRegistry, RegistryBuilder};

use crate::model::{Bindings, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Failure raised while evaluating rule code.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    #[error("syntax error at line {line}, column {column}: {message}")]
    Syntax {
        line: usize,
        column: usize,
        message: String,
    },

    /// Unknown variable, type error, bad argument
    #[error("{0}")]
    Runtime(String),

    /// Raised explicitly by the rule (`stop()`, `throw`)
    #[error("{0}")]
    Raised(String),

    #[error("evaluation timed out after {0} ms")]
    Timeout(u64),

    #[error("call depth limit of {0} exceeded")]
    DepthExceeded(usize),
}

/// What a finished evaluation left behind.
///
/// Environments fill this in; the dispatcher applies the result protocol.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Evaluation {
    /// Value of the `status` variable, if the code assigned one
    pub status: Option<Value>,
    /// Return value of `call()` when the code defines it and assigned no
    /// status; otherwise the value of the last evaluated expression
    pub result: Value,
    pub output: Option<Value>,
    pub output_type: Option<Value>,
    pub output_identifiers: Option<Value>,
}

/// Execution limits for one evaluation.
///
/// Interpreters call [`Budget::tick`] at every loop iteration and function
/// call; it fails once the deadline passes or the dispatcher abandons the
/// evaluation.
#[derive(Debug, Clone)]
pub struct Budget {
    started: Instant,
    timeout: Duration,
    max_call_depth: usize,
    abandoned: Arc<AtomicBool>,
}

impl Budget {
    #[must_use]
    pub fn new(timeout: Duration, max_call_depth: usize) -> Self {
        Self {
            started: Instant::now(),
            timeout,
            max_call_depth,
            abandoned: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Fail if the evaluation has run out of time.
    pub fn tick(&self) -> Result<(), ScriptError> {
        if self.abandoned.load(Ordering::Relaxed) || self.started.elapsed() > self.timeout {
            return Err(ScriptError::Timeout(self.timeout_ms()));
        }
        Ok(())
    }

    /// Fail if a call at `depth` would exceed the depth limit.
    pub fn enter(&self, depth: usize) -> Result<(), ScriptError> {
        if depth > self.max_call_depth {
            return Err(ScriptError::DepthExceeded(self.max_call_depth));
        }
        self.tick()
    }

    #[must_use]
    pub fn timeout_ms(&self) -> u64 {
        u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX)
    }

    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Tell a still-running evaluation to stop at its next tick.
    pub(crate) fn abandon(&self) {
        self.abandoned.store(true, Ordering::Relaxed);
    }
}

/// A rule language the engine can dispatch check code to.
pub trait ScriptEnvironment: Send + Sync {
    /// Canonical name, as written in a check's `environment` field.
    fn name(&self) -> &'static str;

    /// Additional names accepted for this environment.
    fn aliases(&self) -> &'static [&'static str] {
        &[]
    }

    /// Evaluate `code` with `bindings` as pre-defined variables in a fresh
    /// context.
    fn evaluate(
        &self,
        code: &str,
        bindings: &Bindings,
        budget: &Budget,
    ) -> Result<Evaluation, ScriptError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_expires() {
        let budget = Budget::new(Duration::from_millis(0), 8);
        std::thread::sleep(Duration::from_millis(2));
        assert_eq!(budget.tick(), Err(ScriptError::Timeout(0)));
    }

    #[test]
    fn test_budget_depth_and_abandon() {
        let budget = Budget::new(Duration::from_secs(60), 2);
        assert!(budget.enter(2).is_ok());
        assert_eq!(budget.enter(3), Err(ScriptError::DepthExceeded(2)));
        let shared = budget.clone();
        shared.abandon();
        assert!(matches!(budget.tick(), Err(ScriptError::Timeout(_))));
    }
}
