//! The `r` environment: an R-flavoured rule language with vector semantics.

mod builtins;
mod interp;
mod parser;
mod value;

use crate::model::Bindings;
use crate::script::{Budget, Evaluation, ScriptEnvironment, ScriptError};
use interp::Interpreter;
use std::rc::Rc;
use value::RValue;

/// Evaluates check code written in R.
///
/// Bindings arrive as vectors: a list of scalars becomes an atomic vector,
/// so `nchar(title)` and `duplicated(attributeNames)` work on extracted
/// values directly.
#[derive(Debug, Clone, Copy, Default)]
pub struct REnvironment;

impl ScriptEnvironment for REnvironment {
    fn name(&self) -> &'static str {
        "r"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["rscript", "renjin"]
    }

    fn evaluate(&self, code: &str, bindings: &Bindings, budget: &Budget) -> Result<Evaluation, ScriptError> {
        let program = parser::parse_program(code)?;
        let mut interpreter = Interpreter::new(budget);
        for (name, value) in bindings {
            interpreter.globals().define(name, RValue::from_model(value));
        }
        let outcome = interpreter.run(&program);
        let globals = Rc::clone(interpreter.globals());
        let evaluation = outcome.and_then(|last| {
            let read = |name: &str| {
                globals
                    .get(name)
                    .filter(|v| !matches!(v, RValue::Null | RValue::Builtin(_)))
                    .map(|v| v.to_model())
            };
            let status = read("status");
            let entry = globals.find("call", &RValue::is_function);
            let result = match (&status, entry) {
                (None, Some(RValue::Closure(call))) => interpreter.call_entry(&RValue::Closure(call))?,
                _ => last,
            };
            Ok(Evaluation {
                status,
                result: result.to_model(),
                output: read("output"),
                output_type: read("output_type"),
                output_identifiers: read("output_identifiers"),
            })
        });
        interpreter.release();
        evaluation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Value;
    use std::time::Duration;

    fn run(code: &str, bindings: &[(&str, Value)]) -> Result<Evaluation, ScriptError> {
        let bindings: Bindings = bindings
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect();
        REnvironment.evaluate(code, &bindings, &Budget::new(Duration::from_secs(5), 32))
    }

    fn result(code: &str) -> Value {
        run(code, &[]).expect("evaluate").result
    }

    fn strings(items: &[&str]) -> Value {
        Value::List(items.iter().map(|s| Value::String((*s).to_string())).collect())
    }

    #[test]
    fn test_title_length_rule() {
        let code = "status <- ifelse( nchar(title) > 10, 'SUCCESS', 'FAILURE')";
        let long = run(code, &[("title", Value::String("Long enough title".into()))]).expect("evaluate");
        assert_eq!(long.status, Some(Value::String("SUCCESS".into())));
        let short = run(code, &[("title", Value::String("Short".into()))]).expect("evaluate");
        assert_eq!(short.status, Some(Value::String("FAILURE".into())));
    }

    #[test]
    fn test_duplicated_attribute_names() {
        let code = "status <- ifelse(any(duplicated(attributeNames)), 'FAILURE', 'SUCCESS')";
        let dup = run(code, &[("attributeNames", strings(&["site", "date", "site"]))]).expect("evaluate");
        assert_eq!(dup.status, Some(Value::String("FAILURE".into())));
        let unique = run(code, &[("attributeNames", strings(&["site", "date"]))]).expect("evaluate");
        assert_eq!(unique.status, Some(Value::String("SUCCESS".into())));
    }

    #[test]
    fn test_call_entry_and_last_value() {
        assert_eq!(result("call <- function() { 'SUCCESS' }"), Value::String("SUCCESS".into()));
        assert_eq!(result("x <- 2\nx * 21"), Value::Number(42.0));
        assert_eq!(result("TRUE && FALSE"), Value::Bool(false));
    }

    #[test]
    fn test_outputs() {
        let eval = run(
            "output <- paste0('found ', length(x), ' items')\noutput_type <- 'text'\nstatus <- 'SUCCESS'",
            &[("x", Value::List(vec![Value::Number(1.0), Value::Number(2.0)]))],
        )
        .expect("evaluate");
        assert_eq!(eval.output, Some(Value::String("found 2 items".into())));
        assert_eq!(eval.output_type, Some(Value::String("text".into())));
        assert_eq!(eval.output_identifiers, None);
    }

    #[test]
    fn test_vector_functions() {
        assert_eq!(result("sum(c(1, 2, 3))"), Value::Number(6.0));
        assert_eq!(result("length(unique(c('a', 'b', 'a')))"), Value::Number(2.0));
        assert_eq!(result("gsub('(\\\\w+)@(\\\\w+)', '\\\\2 at \\\\1', 'user@example')"), Value::String("example at user".into()));
        assert_eq!(result("toupper(substr('metadata', 1, 4))"), Value::String("META".into()));
        assert_eq!(result("sapply(1:3, function(i) i * 2)[3]"), Value::Number(6.0));
        assert_eq!(result("x <- list(a = 1, b = 2)\nx[['b']]"), Value::Number(2.0));
        assert_eq!(result("round(2.5)"), Value::Number(2.0));
        assert_eq!(result("sprintf('%d of %d', 3, 4)"), Value::String("3 of 4".into()));
    }

    #[test]
    fn test_stop_raises() {
        let err = run("stop('missing ', 'title')", &[]).expect_err("stop");
        assert_eq!(err, ScriptError::Raised("missing title".into()));
    }

    #[test]
    fn test_try_catch_recovers() {
        assert_eq!(
            result("tryCatch(stop('boom'), error = function(e) conditionMessage(e))"),
            Value::String("boom".into())
        );
    }

    #[test]
    fn test_unknown_function_is_runtime_error() {
        let err = run("noSuchFunction(1)", &[]).expect_err("error");
        assert!(matches!(err, ScriptError::Runtime(m) if m.contains("noSuchFunction")));
    }

    #[test]
    fn test_syntax_error() {
        assert!(matches!(run("x <- (1 + ", &[]), Err(ScriptError::Syntax { .. })));
    }

    #[test]
    fn test_infinite_loop_times_out() {
        let budget = Budget::new(Duration::from_millis(50), 32);
        let err = REnvironment
            .evaluate("repeat { x <- 1 }", &Bindings::new(), &budget)
            .expect_err("timeout");
        assert_eq!(err, ScriptError::Timeout(50));
    }

    #[test]
    fn test_recursion_depth() {
        let err = run("f <- function(n) f(n + 1)\nf(1)", &[]).expect_err("depth");
        assert_eq!(err, ScriptError::DepthExceeded(32));
    }

    #[test]
    fn test_missing_values_bind_as_na() {
        let eval = run(
            "status <- if (any(is.na(x))) 'FAILURE' else 'SUCCESS'",
            &[("x", Value::List(vec![Value::Number(1.0), Value::Null]))],
        )
        .expect("evaluate");
        assert_eq!(eval.status, Some(Value::String("FAILURE".into())));
    }
}
