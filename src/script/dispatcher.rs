//! Dispatching check code to a scripting environment.
//!
//! Each dispatch evaluates in a fresh interpreter on its own worker thread.
//! The interpreter polls its [`Budget`] and stops itself once the deadline
//! passes; the dispatcher additionally stops waiting after the deadline plus
//! a grace period, so an environment that never polls cannot stall a run.

use super::{default_registry, Budget, EnvironmentRegistry, Evaluation, ScriptEnvironment, ScriptError};
use crate::error::EvaluationErrorKind;
use crate::model::{Bindings, Output, Status, Value};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Default per-dispatch time limit.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default limit on nested user function calls.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 200;

/// Extra time granted to an evaluation thread before it is abandoned.
const GRACE_PERIOD: Duration = Duration::from_millis(250);

/// Tree-walking interpreters recurse deeply on nested rule code.
const WORKER_STACK_SIZE: usize = 16 * 1024 * 1024;

/// Status and outputs read from a finished evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    pub status: Status,
    pub outputs: Vec<Output>,
}

/// Evaluates check code against bindings in the environment it names.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<EnvironmentRegistry>,
    timeout: Duration,
    max_call_depth: usize,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(default_registry())
    }
}

impl Dispatcher {
    #[must_use]
    pub fn new(registry: Arc<EnvironmentRegistry>) -> Self {
        Self {
            registry,
            timeout: DEFAULT_TIMEOUT,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
        }
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }

    #[must_use]
    pub fn registry(&self) -> &EnvironmentRegistry {
        &self.registry
    }

    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Evaluate `code` in the environment named `environment`.
    ///
    /// Failures of the code itself come back as `Err` so the caller can turn
    /// them into an ERROR result; a status the code reports but that cannot
    /// be mapped is returned as an ERROR [`Dispatch`].
    pub fn dispatch(
        &self,
        environment: &str,
        bindings: &Bindings,
        code: &str,
    ) -> Result<Dispatch, EvaluationErrorKind> {
        let env = self
            .registry
            .get(environment)
            .cloned()
            .ok_or_else(|| EvaluationErrorKind::UnsupportedEnvironment(environment.to_string()))?;
        let budget = Budget::new(self.timeout, self.max_call_depth);
        let evaluation = self.evaluate(env, bindings.clone(), code.to_string(), &budget)?;
        Ok(interpret(evaluation))
    }

    fn evaluate(
        &self,
        env: Arc<dyn ScriptEnvironment>,
        bindings: Bindings,
        code: String,
        budget: &Budget,
    ) -> Result<Evaluation, EvaluationErrorKind> {
        let (tx, rx) = mpsc::channel();
        let worker_budget = budget.clone();
        let name = env.name();
        thread::Builder::new()
            .name(format!("mdqa-{name}"))
            .stack_size(WORKER_STACK_SIZE)
            .spawn(move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    env.evaluate(&code, &bindings, &worker_budget)
                }));
                // The receiver is gone once the dispatcher gave up waiting
                let _ = tx.send(outcome);
            })
            .map_err(|e| EvaluationErrorKind::Script(format!("could not start evaluation: {e}")))?;

        match rx.recv_timeout(self.timeout + GRACE_PERIOD) {
            Ok(Ok(result)) => result.map_err(into_kind),
            Ok(Err(payload)) => {
                let message = panic_message(payload.as_ref());
                tracing::warn!(environment = name, %message, "environment panicked");
                Err(EvaluationErrorKind::Panicked(message))
            }
            Err(RecvTimeoutError::Timeout) => {
                budget.abandon();
                tracing::warn!(environment = name, timeout_ms = budget.timeout_ms(), "abandoned evaluation");
                Err(EvaluationErrorKind::Timeout(budget.timeout_ms()))
            }
            Err(RecvTimeoutError::Disconnected) => Err(EvaluationErrorKind::Panicked(
                "evaluation thread exited without a result".to_string(),
            )),
        }
    }
}

fn into_kind(err: ScriptError) -> EvaluationErrorKind {
    match err {
        ScriptError::Timeout(ms) => EvaluationErrorKind::Timeout(ms),
        other => EvaluationErrorKind::Script(other.to_string()),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Map a reported value to a status: a status token or a boolean.
fn map_status(value: &Value) -> Option<Status> {
    match value {
        Value::Bool(true) => Some(Status::Success),
        Value::Bool(false) => Some(Status::Failure),
        Value::String(token) => Status::from_token(token),
        Value::List(items) if items.len() == 1 => map_status(&items[0]),
        _ => None,
    }
}

/// Apply the result protocol to a finished evaluation.
fn interpret(evaluation: Evaluation) -> Dispatch {
    let assigned = evaluation.status.is_some();
    let reported = evaluation.status.as_ref().unwrap_or(&evaluation.result);

    let Some(status) = map_status(reported) else {
        let what = if assigned { "status" } else { "result" };
        return Dispatch {
            status: Status::Error,
            outputs: vec![Output::text(format!("unmappable status: {what} was {reported}"))],
        };
    };

    let outputs = match &evaluation.output {
        Some(output) => collect_outputs(
            output,
            evaluation.output_type.as_ref(),
            evaluation.output_identifiers.as_ref(),
        ),
        None if !assigned && matches!(evaluation.result, Value::Bool(_) | Value::String(_)) => {
            vec![Output::text(evaluation.result.to_text())]
        }
        None => Vec::new(),
    };
    Dispatch { status, outputs }
}

/// Pair each output value with its type and identifier. A scalar type or
/// identifier applies to every output; a list is matched by position.
fn collect_outputs(output: &Value, types: Option<&Value>, identifiers: Option<&Value>) -> Vec<Output> {
    let values: Vec<&Value> = match output {
        Value::List(items) => items.iter().collect(),
        scalar => vec![scalar],
    };
    let nth = |source: Option<&Value>, i: usize| -> Option<String> {
        match source? {
            Value::List(items) => items.get(i).filter(|v| !v.is_null()).map(Value::to_text),
            Value::Null => None,
            scalar => Some(scalar.to_text()),
        }
    };
    values
        .into_iter()
        .enumerate()
        .map(|(i, value)| Output {
            value: value.to_text(),
            output_type: nth(types, i),
            identifier: nth(identifiers, i),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Panicking;

    impl ScriptEnvironment for Panicking {
        fn name(&self) -> &'static str {
            "panicking"
        }

        fn evaluate(&self, _: &str, _: &Bindings, _: &Budget) -> Result<Evaluation, ScriptError> {
            panic!("adapter bug")
        }
    }

    struct Sleeping;

    impl ScriptEnvironment for Sleeping {
        fn name(&self) -> &'static str {
            "sleeping"
        }

        fn evaluate(&self, _: &str, _: &Bindings, _: &Budget) -> Result<Evaluation, ScriptError> {
            thread::sleep(Duration::from_secs(2));
            Ok(Evaluation::default())
        }
    }

    fn bindings(pairs: &[(&str, Value)]) -> Bindings {
        pairs.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect()
    }

    #[test]
    fn test_status_variable() {
        let dispatcher = Dispatcher::default();
        let b = bindings(&[("entityCount", Value::Number(2.0))]);
        let out = dispatcher
            .dispatch("javascript", &b, "status = (entityCount > 0 ? 'SUCCESS' : 'FAILURE')")
            .expect("dispatch");
        assert_eq!(out.status, Status::Success);
        assert!(out.outputs.is_empty());
    }

    #[test]
    fn test_boolean_result_and_text_output() {
        let dispatcher = Dispatcher::default();
        let out = dispatcher.dispatch("r", &Bindings::new(), "1 > 2").expect("dispatch");
        assert_eq!(out.status, Status::Failure);
        assert_eq!(out.outputs, vec![Output::text("false")]);
    }

    #[test]
    fn test_unmappable_status_is_error() {
        let dispatcher = Dispatcher::default();
        let out = dispatcher.dispatch("ecma", &Bindings::new(), "status = 42").expect("dispatch");
        assert_eq!(out.status, Status::Error);
        assert!(out.outputs[0].value.contains("unmappable status"));

        let out = dispatcher.dispatch("ecma", &Bindings::new(), "var x = null; x").expect("dispatch");
        assert_eq!(out.status, Status::Error);
    }

    #[test]
    fn test_unknown_environment() {
        let err = Dispatcher::default()
            .dispatch("python", &Bindings::new(), "status = 'SUCCESS'")
            .unwrap_err();
        assert_eq!(err, EvaluationErrorKind::UnsupportedEnvironment("python".into()));
    }

    #[test]
    fn test_script_failure_carries_message() {
        let err = Dispatcher::default()
            .dispatch("ecma", &Bindings::new(), "throw new Error('no title')")
            .unwrap_err();
        assert!(matches!(err, EvaluationErrorKind::Script(ref m) if m.contains("no title")), "{err:?}");
    }

    #[test]
    fn test_outputs_with_types_and_identifiers() {
        let code = "output = ['a.png', 'b.png']\noutput_type = 'image/png'\noutput_identifiers = ['id1', 'id2']\nstatus = 'SUCCESS'";
        let out = Dispatcher::default().dispatch("ecma", &Bindings::new(), code).expect("dispatch");
        assert_eq!(out.outputs.len(), 2);
        assert_eq!(out.outputs[1].value, "b.png");
        assert_eq!(out.outputs[1].output_type.as_deref(), Some("image/png"));
        assert_eq!(out.outputs[1].identifier.as_deref(), Some("id2"));
    }

    #[test]
    fn test_panicking_environment_is_contained() {
        let registry = EnvironmentRegistry::builder().register(Panicking).build();
        let err = Dispatcher::new(Arc::new(registry))
            .dispatch("panicking", &Bindings::new(), "")
            .unwrap_err();
        assert_eq!(err, EvaluationErrorKind::Panicked("adapter bug".into()));
    }

    #[test]
    fn test_non_polling_environment_is_abandoned() {
        let registry = EnvironmentRegistry::builder().register(Sleeping).build();
        let err = Dispatcher::new(Arc::new(registry))
            .with_timeout(Duration::from_millis(50))
            .dispatch("sleeping", &Bindings::new(), "")
            .unwrap_err();
        assert_eq!(err, EvaluationErrorKind::Timeout(50));
    }

    #[test]
    fn test_infinite_loop_times_out() {
        let err = Dispatcher::default()
            .with_timeout(Duration::from_millis(100))
            .dispatch("ecma", &Bindings::new(), "while (true) {}")
            .unwrap_err();
        assert_eq!(err, EvaluationErrorKind::Timeout(100));
    }
}
