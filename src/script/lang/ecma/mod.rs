//! The `ecma` environment: an ECMAScript-flavoured rule language.

mod builtins;
mod interp;
mod parser;

use super::scope::Scope;
use crate::model::{format_number, Bindings, Value};
use crate::script::{Budget, Evaluation, ScriptEnvironment, ScriptError};
use indexmap::IndexMap;
use interp::Interpreter;
use parser::FuncDef;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

/// Runtime value of the `ecma` interpreter.
#[derive(Clone)]
enum JsValue {
    Undefined,
    Null,
    Bool(bool),
    Num(f64),
    Str(String),
    Array(Rc<RefCell<Vec<JsValue>>>),
    Object(Rc<RefCell<IndexMap<String, JsValue>>>),
    Function(Rc<Closure>),
    Native(&'static str),
    RegExp(Rc<JsRegExp>),
}

struct Closure {
    pub def: Rc<FuncDef>,
    pub scope: Rc<Scope<JsValue>>,
}

struct JsRegExp {
    pub source: String,
    pub flags: String,
    pub regex: regex::Regex,
}

impl JsRegExp {
    pub(super) fn new(source: &str, flags: &str) -> Result<Self, String> {
        let mut builder = regex::RegexBuilder::new(source);
        builder
            .case_insensitive(flags.contains('i'))
            .multi_line(flags.contains('m'))
            .dot_matches_new_line(flags.contains('s'));
        let regex = builder
            .build()
            .map_err(|e| format!("Invalid regular expression /{source}/: {e}"))?;
        Ok(Self {
            source: source.to_string(),
            flags: flags.to_string(),
            regex,
        })
    }
}

impl JsValue {
    pub(super) fn array(items: Vec<Self>) -> Self {
        Self::Array(Rc::new(RefCell::new(items)))
    }

    pub(super) fn object(fields: IndexMap<String, Self>) -> Self {
        Self::Object(Rc::new(RefCell::new(fields)))
    }

    pub(super) fn str(s: impl Into<String>) -> Self {
        Self::Str(s.into())
    }

    pub(super) fn truthy(&self) -> bool {
        match self {
            Self::Undefined | Self::Null => false,
            Self::Bool(b) => *b,
            Self::Num(n) => *n != 0.0 && !n.is_nan(),
            Self::Str(s) => !s.is_empty(),
            _ => true,
        }
    }

    pub(super) fn to_number(&self) -> f64 {
        match self {
            Self::Undefined => f64::NAN,
            Self::Null => 0.0,
            Self::Bool(b) => f64::from(u8::from(*b)),
            Self::Num(n) => *n,
            Self::Str(s) => parse_number(s),
            Self::Array(items) => {
                let items = items.borrow();
                match items.len() {
                    0 => 0.0,
                    1 => items[0].to_number(),
                    _ => f64::NAN,
                }
            }
            _ => f64::NAN,
        }
    }

    pub(super) fn type_of(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Bool(_) => "boolean",
            Self::Num(_) => "number",
            Self::Str(_) => "string",
            Self::Function(_) | Self::Native(_) => "function",
            Self::Null | Self::Array(_) | Self::Object(_) | Self::RegExp(_) => "object",
        }
    }

    pub(super) fn is_callable(&self) -> bool {
        matches!(self, Self::Function(_) | Self::Native(_))
    }

    pub(super) fn from_model(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) => Self::Num(*n),
            Value::String(s) => Self::Str(s.clone()),
            Value::List(items) => Self::array(items.iter().map(Self::from_model).collect()),
            Value::Map(map) => Self::object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Self::from_model(v)))
                    .collect(),
            ),
        }
    }

    pub(super) fn to_model(&self) -> Value {
        match self {
            Self::Undefined | Self::Null | Self::Function(_) | Self::Native(_) => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Num(n) => Value::Number(*n),
            Self::Str(s) => Value::String(s.clone()),
            Self::Array(items) => Value::List(items.borrow().iter().map(Self::to_model).collect()),
            Self::Object(fields) => Value::Map(
                fields
                    .borrow()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_model()))
                    .collect::<BTreeMap<_, _>>(),
            ),
            Self::RegExp(re) => Value::String(format!("/{}/{}", re.source, re.flags)),
        }
    }
}

/// String-to-number conversion with JavaScript's rules for blank text.
fn parse_number(s: &str) -> f64 {
    let t = s.trim();
    if t.is_empty() {
        return 0.0;
    }
    if let Some(hex) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        return u64::from_str_radix(hex, 16).map_or(f64::NAN, |n| n as f64);
    }
    match t {
        "Infinity" | "+Infinity" => f64::INFINITY,
        "-Infinity" => f64::NEG_INFINITY,
        _ if t.chars().any(|c| c.is_ascii_alphabetic() && c != 'e' && c != 'E') => f64::NAN,
        _ => t.parse().unwrap_or(f64::NAN),
    }
}

impl fmt::Display for JsValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => f.write_str("undefined"),
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Num(n) => f.write_str(&format_number(*n)),
            Self::Str(s) => f.write_str(s),
            Self::Array(items) => {
                let items = items.borrow();
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    if !matches!(item, Self::Undefined | Self::Null) {
                        write!(f, "{item}")?;
                    }
                }
                Ok(())
            }
            Self::Object(fields) => {
                let fields = fields.borrow();
                match (fields.get("name"), fields.get("message")) {
                    (Some(name), Some(message)) => write!(f, "{name}: {message}"),
                    _ => f.write_str("[object Object]"),
                }
            }
            Self::Function(closure) => match &closure.def.name {
                Some(name) => write!(f, "function {name}() {{ ... }}"),
                None => f.write_str("function () { ... }"),
            },
            Self::Native(name) => write!(f, "function {name}() {{ [native code] }}"),
            Self::RegExp(re) => write!(f, "/{}/{}", re.source, re.flags),
        }
    }
}

/// Rule code written in an ECMAScript subset.
#[derive(Debug, Clone, Copy, Default)]
pub struct EcmaEnvironment;

impl ScriptEnvironment for EcmaEnvironment {
    fn name(&self) -> &'static str {
        "ecma"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["javascript", "js", "ecmascript"]
    }

    fn evaluate(&self, code: &str, bindings: &Bindings, budget: &Budget) -> Result<Evaluation, ScriptError> {
        let program = parser::parse_program(code)?;
        let mut interpreter = Interpreter::new(budget);
        for (name, value) in bindings {
            interpreter.globals().define(name, JsValue::from_model(value));
        }
        let outcome = interpreter.run(&program);
        let globals = Rc::clone(interpreter.globals());
        let evaluation = outcome.and_then(|last| {
            let read = |name: &str| {
                globals
                    .get(name)
                    .filter(|v| !matches!(v, JsValue::Undefined))
                    .map(|v| v.to_model())
            };
            let status = read("status");
            let result = match (&status, globals.get("call")) {
                (None, Some(call)) if call.is_callable() => interpreter.call_entry(&call)?,
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
    use std::time::Duration;

    fn run(code: &str, bindings: &[(&str, Value)]) -> Result<Evaluation, ScriptError> {
        let bindings: Bindings = bindings
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect();
        EcmaEnvironment.evaluate(code, &bindings, &Budget::new(Duration::from_secs(5), 32))
    }

    fn result(code: &str) -> Value {
        run(code, &[]).expect("evaluate").result
    }

    #[test]
    fn test_status_assignment() {
        let eval = run(
            "status = (entityCount > 0 ? 'SUCCESS' : 'FAILURE')",
            &[("entityCount", Value::Number(2.0))],
        )
        .expect("evaluate");
        assert_eq!(eval.status, Some(Value::from("SUCCESS")));
    }

    #[test]
    fn test_last_expression_and_call() {
        assert_eq!(result("var x = 3; x * 2 === 6"), Value::Bool(true));
        assert_eq!(result("function call() { return 'skip' }"), Value::from("skip"));
        assert_eq!(result("if (1 < 2) { 'yes' } else { 'no' }"), Value::from("yes"));
    }

    #[test]
    fn test_string_and_array_methods() {
        assert_eq!(result("'  Soil Data '.trim().toLowerCase()"), Value::from("soil data"));
        assert_eq!(result("'a,b,c'.split(',').length"), Value::Number(3.0));
        assert_eq!(result("[1, 2, 3].map(x => x * 2).join('-')"), Value::from("2-4-6"));
        assert_eq!(result("[3, 1, 2].filter(function (x) { return x > 1 }).length"), Value::Number(2.0));
        assert_eq!(result("/^doi:/i.test('DOI:10.5063/F1')"), Value::Bool(true));
        assert_eq!(result("Array.isArray([1]) && !isArray('x')"), Value::Bool(true));
        assert_eq!(result("parseInt('42px') + parseFloat('0.5')"), Value::Number(42.5));
    }

    #[test]
    fn test_loops() {
        let code = "var total = 0; for (var i = 0; i < 5; i++) { if (i == 3) continue; total += i; } total";
        assert_eq!(result(code), Value::Number(7.0));
        let code = "var n = 0; for (const x of ['a', 'b']) { n++ } while (true) { n += 10; if (n > 20) break; } n";
        assert_eq!(result(code), Value::Number(22.0));
    }

    #[test]
    fn test_outputs() {
        let eval = run(
            "output = ['too short', 'missing abstract']; output_type = ['text/plain', 'text/plain']; status = 'FAILURE'",
            &[],
        )
        .expect("evaluate");
        assert_eq!(
            eval.output,
            Some(Value::List(vec![Value::from("too short"), Value::from("missing abstract")]))
        );
        assert!(eval.output_type.is_some());
    }

    #[test]
    fn test_runtime_errors() {
        let err = run("undefinedThing + 1", &[]).unwrap_err();
        assert_eq!(err, ScriptError::Runtime("ReferenceError: undefinedThing is not defined".into()));
        let err = run("throw 'bad metadata'", &[]).unwrap_err();
        assert_eq!(err, ScriptError::Raised("bad metadata".into()));
        let err = run("throw new Error('boom')", &[]).unwrap_err();
        assert_eq!(err, ScriptError::Raised("Error: boom".into()));
        let err = run("null.length", &[]).unwrap_err();
        assert!(matches!(err, ScriptError::Runtime(ref m) if m.starts_with("TypeError")), "{err}");
        assert_eq!(result("try { null.x } catch (e) { 'caught' }"), Value::from("caught"));
    }

    #[test]
    fn test_recursion_limit() {
        let err = run("function f(n) { return f(n + 1) } f(0)", &[]).unwrap_err();
        assert_eq!(err, ScriptError::DepthExceeded(32));
    }

    #[test]
    fn test_infinite_loop_times_out() {
        let bindings = Bindings::new();
        let err = EcmaEnvironment
            .evaluate("while (true) {}", &bindings, &Budget::new(Duration::from_millis(50), 64))
            .unwrap_err();
        assert_eq!(err, ScriptError::Timeout(50));
    }

    #[test]
    fn test_bindings_are_converted() {
        let eval = run(
            "names.length === 2 && names[1] === 'Smith' && meta.site === 'Toolik'",
            &[
                ("names", Value::List(vec![Value::from("Jones"), Value::from("Smith")])),
                (
                    "meta",
                    Value::Map([("site".to_string(), Value::from("Toolik"))].into_iter().collect()),
                ),
            ],
        )
        .expect("evaluate");
        assert_eq!(eval.result, Value::Bool(true));
    }
}
