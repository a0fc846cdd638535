//! Tree-walking evaluator for the `ecma` rule language.

use super::builtins;
use super::parser::{BinOp, Body, Expr, LogicOp, Stmt, UnaryOp};
use super::{Closure, JsRegExp, JsValue};
use crate::script::lang::scope::Scope;
use crate::script::{Budget, ScriptError};
use indexmap::IndexMap;
use std::cmp::Ordering;
use std::rc::Rc;

/// Longest array an index assignment may create.
const MAX_ARRAY_LENGTH: usize = 10_000_000;

/// Abrupt completion of an expression or statement.
pub(super) enum Interrupt {
    /// A catchable exception; `raised` is true for a `throw` in rule code
    Throw { value: JsValue, raised: bool },
    /// Stops the whole evaluation (time or depth exhausted)
    Fatal(ScriptError),
}

impl From<ScriptError> for Interrupt {
    fn from(err: ScriptError) -> Self {
        Self::Fatal(err)
    }
}

impl Interrupt {
    fn into_script_error(self) -> ScriptError {
        match self {
            Self::Throw { value, raised: true } => ScriptError::Raised(value.to_string()),
            Self::Throw { value, raised: false } => ScriptError::Runtime(value.to_string()),
            Self::Fatal(err) => err,
        }
    }
}

pub(super) type Completion<T> = Result<T, Interrupt>;

/// Build an error object such as `{name: "TypeError", message: ...}`.
pub(super) fn error_value(kind: &str, message: impl Into<String>) -> JsValue {
    let mut fields = IndexMap::new();
    fields.insert("name".to_string(), JsValue::str(kind));
    fields.insert("message".to_string(), JsValue::str(message));
    JsValue::object(fields)
}

/// An engine-raised exception of the given kind.
pub(super) fn throw(kind: &str, message: impl Into<String>) -> Interrupt {
    Interrupt::Throw {
        value: error_value(kind, message),
        raised: false,
    }
}

pub(super) fn type_error(message: impl Into<String>) -> Interrupt {
    throw("TypeError", message)
}

enum Flow {
    Normal,
    Return(JsValue),
    Break,
    Continue,
}

type ScopeRef = Rc<Scope<JsValue>>;

pub(super) struct Interpreter<'b> {
    budget: &'b Budget,
    globals: ScopeRef,
    depth: usize,
    last: JsValue,
}

impl<'b> Interpreter<'b> {
    pub(super) fn new(budget: &'b Budget) -> Self {
        let globals = Scope::root();
        builtins::install(&globals);
        Self {
            budget,
            globals,
            depth: 0,
            last: JsValue::Undefined,
        }
    }

    pub(super) fn globals(&self) -> &ScopeRef {
        &self.globals
    }

    /// Run a program; yields the value of the last top-level expression
    /// statement.
    pub(super) fn run(&mut self, program: &[Stmt]) -> Result<JsValue, ScriptError> {
        let globals = Rc::clone(&self.globals);
        match self.exec_block(program, &globals) {
            Ok(Flow::Return(value)) => Ok(value),
            Ok(_) => Ok(self.last.clone()),
            Err(interrupt) => Err(interrupt.into_script_error()),
        }
    }

    /// Call a global entry point such as `call()` with no arguments.
    pub(super) fn call_entry(&mut self, function: &JsValue) -> Result<JsValue, ScriptError> {
        self.call_value(function, Vec::new())
            .map_err(Interrupt::into_script_error)
    }

    pub(super) fn release(&self) {
        self.globals.clear();
    }

    pub(super) fn tick(&self) -> Completion<()> {
        Ok(self.budget.tick()?)
    }

    // ========================================================================
    // Statements
    // ========================================================================

    fn exec_block(&mut self, stmts: &[Stmt], scope: &ScopeRef) -> Completion<Flow> {
        for stmt in stmts {
            if let Stmt::Function(def) = stmt {
                if let Some(name) = &def.name {
                    let closure = Closure {
                        def: Rc::clone(def),
                        scope: Rc::clone(scope),
                    };
                    scope.define(name, JsValue::Function(Rc::new(closure)));
                }
            }
        }
        for stmt in stmts {
            match self.exec(stmt, scope)? {
                Flow::Normal => {}
                other => return Ok(other),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&mut self, stmt: &Stmt, scope: &ScopeRef) -> Completion<Flow> {
        match stmt {
            Stmt::Expr(expr) => {
                let value = self.eval(expr, scope)?;
                if self.depth == 0 {
                    self.last = value;
                }
                Ok(Flow::Normal)
            }
            Stmt::Var(decls) => {
                for (name, init) in decls {
                    let value = match init {
                        Some(expr) => self.eval(expr, scope)?,
                        None if scope.has_local(name) => continue,
                        None => JsValue::Undefined,
                    };
                    scope.define(name, value);
                }
                Ok(Flow::Normal)
            }
            Stmt::Function(_) | Stmt::Empty => Ok(Flow::Normal),
            Stmt::If(cond, then, otherwise) => {
                if self.eval(cond, scope)?.truthy() {
                    self.exec(then, scope)
                } else if let Some(otherwise) = otherwise {
                    self.exec(otherwise, scope)
                } else {
                    Ok(Flow::Normal)
                }
            }
            Stmt::While(cond, body) => {
                loop {
                    self.tick()?;
                    if !self.eval(cond, scope)?.truthy() {
                        break;
                    }
                    match self.exec(body, scope)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::DoWhile(body, cond) => {
                loop {
                    self.tick()?;
                    match self.exec(body, scope)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                    if !self.eval(cond, scope)?.truthy() {
                        break;
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::For {
                init,
                cond,
                step,
                body,
            } => {
                if let Some(init) = init {
                    self.exec(init, scope)?;
                }
                loop {
                    self.tick()?;
                    if let Some(cond) = cond {
                        if !self.eval(cond, scope)?.truthy() {
                            break;
                        }
                    }
                    match self.exec(body, scope)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                    if let Some(step) = step {
                        self.eval(step, scope)?;
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::ForOf {
                name,
                iterable,
                body,
            } => {
                let items = match self.eval(iterable, scope)? {
                    JsValue::Array(items) => items.borrow().clone(),
                    JsValue::Str(s) => s.chars().map(|c| JsValue::Str(c.to_string())).collect(),
                    other => return Err(type_error(format!("{} is not iterable", other.type_of()))),
                };
                self.iterate(name, items, body, scope)
            }
            Stmt::ForIn { name, object, body } => {
                let keys = match self.eval(object, scope)? {
                    JsValue::Object(fields) => fields.borrow().keys().map(JsValue::str).collect(),
                    JsValue::Array(items) => (0..items.borrow().len()).map(|i| JsValue::Str(i.to_string())).collect(),
                    JsValue::Str(s) => (0..s.chars().count()).map(|i| JsValue::Str(i.to_string())).collect(),
                    _ => Vec::new(),
                };
                self.iterate(name, keys, body, scope)
            }
            Stmt::Block(stmts) => self.exec_block(stmts, scope),
            Stmt::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr, scope)?,
                    None => JsValue::Undefined,
                };
                Ok(Flow::Return(value))
            }
            Stmt::Break => Ok(Flow::Break),
            Stmt::Continue => Ok(Flow::Continue),
            Stmt::Throw(expr) => {
                let value = self.eval(expr, scope)?;
                Err(Interrupt::Throw { value, raised: true })
            }
            Stmt::Try {
                body,
                param,
                handler,
                finalizer,
            } => {
                let outcome = match (self.exec_block(body, scope), handler) {
                    (Err(Interrupt::Throw { value, .. }), Some(handler)) => {
                        if let Some(param) = param {
                            scope.define(param, value);
                        }
                        self.exec_block(handler, scope)
                    }
                    (outcome, _) => outcome,
                };
                if let Some(finalizer) = finalizer {
                    match self.exec_block(finalizer, scope)? {
                        Flow::Normal => {}
                        other => return Ok(other),
                    }
                }
                outcome
            }
        }
    }

    fn iterate(&mut self, name: &str, items: Vec<JsValue>, body: &Stmt, scope: &ScopeRef) -> Completion<Flow> {
        for item in items {
            self.tick()?;
            scope.define(name, item);
            match self.exec(body, scope)? {
                Flow::Break => break,
                Flow::Return(value) => return Ok(Flow::Return(value)),
                Flow::Normal | Flow::Continue => {}
            }
        }
        Ok(Flow::Normal)
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    fn eval(&mut self, expr: &Expr, scope: &ScopeRef) -> Completion<JsValue> {
        match expr {
            Expr::Num(n) => Ok(JsValue::Num(*n)),
            Expr::Str(s) => Ok(JsValue::Str(s.clone())),
            Expr::Bool(b) => Ok(JsValue::Bool(*b)),
            Expr::Null => Ok(JsValue::Null),
            Expr::Undefined => Ok(JsValue::Undefined),
            Expr::Regex { pattern, flags } => JsRegExp::new(pattern, flags)
                .map(|re| JsValue::RegExp(Rc::new(re)))
                .map_err(|message| throw("SyntaxError", message)),
            Expr::Ident(name) => scope
                .get(name)
                .ok_or_else(|| throw("ReferenceError", format!("{name} is not defined"))),
            Expr::Array(items) => {
                let values = self.eval_all(items, scope)?;
                Ok(JsValue::array(values))
            }
            Expr::Object(props) => {
                let mut fields = IndexMap::with_capacity(props.len());
                for (key, value) in props {
                    let value = self.eval(value, scope)?;
                    fields.insert(key.clone(), value);
                }
                Ok(JsValue::object(fields))
            }
            Expr::Unary(UnaryOp::TypeOf, operand) => match operand.as_ref() {
                Expr::Ident(name) if scope.get(name).is_none() => Ok(JsValue::str("undefined")),
                operand => Ok(JsValue::str(self.eval(operand, scope)?.type_of())),
            },
            Expr::Unary(op, operand) => {
                let value = self.eval(operand, scope)?;
                Ok(match op {
                    UnaryOp::Not => JsValue::Bool(!value.truthy()),
                    UnaryOp::Neg => JsValue::Num(-value.to_number()),
                    UnaryOp::Plus | UnaryOp::TypeOf => JsValue::Num(value.to_number()),
                })
            }
            Expr::Binary(op, left, right) => {
                let left = self.eval(left, scope)?;
                let right = self.eval(right, scope)?;
                Ok(binary(*op, &left, &right))
            }
            Expr::Logic(op, left, right) => {
                let left = self.eval(left, scope)?;
                let short_circuit = match op {
                    LogicOp::And => !left.truthy(),
                    LogicOp::Or => left.truthy(),
                    LogicOp::Nullish => !matches!(left, JsValue::Undefined | JsValue::Null),
                };
                if short_circuit {
                    Ok(left)
                } else {
                    self.eval(right, scope)
                }
            }
            Expr::Assign { target, op, value } => {
                let value = match op {
                    None => self.eval(value, scope)?,
                    Some(op) => {
                        let current = self.eval(target, scope)?;
                        let operand = self.eval(value, scope)?;
                        binary(*op, &current, &operand)
                    }
                };
                self.assign(target, value.clone(), scope)?;
                Ok(value)
            }
            Expr::Update {
                target,
                delta,
                prefix,
            } => {
                let old = self.eval(target, scope)?.to_number();
                let new = old + delta;
                self.assign(target, JsValue::Num(new), scope)?;
                Ok(JsValue::Num(if *prefix { new } else { old }))
            }
            Expr::Cond(cond, then, otherwise) => {
                if self.eval(cond, scope)?.truthy() {
                    self.eval(then, scope)
                } else {
                    self.eval(otherwise, scope)
                }
            }
            Expr::Member {
                object,
                name,
                optional,
            } => {
                let object = self.eval(object, scope)?;
                if *optional && matches!(object, JsValue::Undefined | JsValue::Null) {
                    return Ok(JsValue::Undefined);
                }
                builtins::get_property(&object, name)
            }
            Expr::Index(object, index) => {
                let object = self.eval(object, scope)?;
                let index = self.eval(index, scope)?;
                get_index(&object, &index)
            }
            Expr::Call(callee, args) => self.eval_call(callee, args, scope),
            Expr::Function(def) => Ok(JsValue::Function(Rc::new(Closure {
                def: Rc::clone(def),
                scope: Rc::clone(scope),
            }))),
        }
    }

    fn eval_all(&mut self, exprs: &[Expr], scope: &ScopeRef) -> Completion<Vec<JsValue>> {
        exprs.iter().map(|e| self.eval(e, scope)).collect()
    }

    fn eval_call(&mut self, callee: &Expr, args: &[Expr], scope: &ScopeRef) -> Completion<JsValue> {
        if let Expr::Member {
            object,
            name,
            optional,
        } = callee
        {
            let receiver = self.eval(object, scope)?;
            if *optional && matches!(receiver, JsValue::Undefined | JsValue::Null) {
                return Ok(JsValue::Undefined);
            }
            let args = self.eval_all(args, scope)?;
            let method = match &receiver {
                JsValue::Object(fields) => fields.borrow().get(name).cloned(),
                _ => None,
            };
            return match method {
                Some(method) if method.is_callable() => self.call_value(&method, args),
                Some(_) => Err(type_error(format!("{name} is not a function"))),
                None => builtins::call_method(self, &receiver, name, args),
            };
        }

        let function = self.eval(callee, scope)?;
        if !function.is_callable() {
            let label = match callee {
                Expr::Ident(name) => name.clone(),
                _ => "expression".to_string(),
            };
            return Err(type_error(format!("{label} is not a function")));
        }
        let args = self.eval_all(args, scope)?;
        self.call_value(&function, args)
    }

    pub(super) fn call_value(&mut self, function: &JsValue, args: Vec<JsValue>) -> Completion<JsValue> {
        match function {
            JsValue::Function(closure) => self.invoke(closure, args),
            JsValue::Native(name) => builtins::call_native(name, &args),
            other => Err(type_error(format!("{} is not a function", other.type_of()))),
        }
    }

    fn invoke(&mut self, closure: &Rc<Closure>, args: Vec<JsValue>) -> Completion<JsValue> {
        self.depth += 1;
        let result = self.invoke_inner(closure, args);
        self.depth -= 1;
        result
    }

    fn invoke_inner(&mut self, closure: &Rc<Closure>, args: Vec<JsValue>) -> Completion<JsValue> {
        self.budget.enter(self.depth)?;
        let scope = Scope::child(&closure.scope);
        let def = &closure.def;
        if let Some(name) = &def.name {
            scope.define(name, JsValue::Function(Rc::clone(closure)));
        }
        for (i, param) in def.params.iter().enumerate() {
            scope.define(param, args.get(i).cloned().unwrap_or(JsValue::Undefined));
        }
        scope.define("arguments", JsValue::array(args));
        match &def.body {
            Body::Expr(expr) => self.eval(expr, &scope),
            Body::Block(stmts) => match self.exec_block(stmts, &scope)? {
                Flow::Return(value) => Ok(value),
                _ => Ok(JsValue::Undefined),
            },
        }
    }

    fn assign(&mut self, target: &Expr, value: JsValue, scope: &ScopeRef) -> Completion<()> {
        match target {
            Expr::Ident(name) => {
                if !scope.assign(name, value.clone()) {
                    self.globals.define(name, value);
                }
                Ok(())
            }
            Expr::Member { object, name, .. } => {
                let object = self.eval(object, scope)?;
                set_property(&object, name, value)
            }
            Expr::Index(object, index) => {
                let object = self.eval(object, scope)?;
                let index = self.eval(index, scope)?;
                set_index(&object, &index, value)
            }
            _ => Err(throw("SyntaxError", "Invalid assignment target")),
        }
    }
}

// ============================================================================
// Operators
// ============================================================================

fn is_composite(value: &JsValue) -> bool {
    matches!(
        value,
        JsValue::Array(_) | JsValue::Object(_) | JsValue::RegExp(_) | JsValue::Function(_) | JsValue::Native(_)
    )
}

fn binary(op: BinOp, left: &JsValue, right: &JsValue) -> JsValue {
    let numeric = |f: fn(f64, f64) -> f64| JsValue::Num(f(left.to_number(), right.to_number()));
    match op {
        BinOp::Add => {
            if matches!(left, JsValue::Str(_))
                || matches!(right, JsValue::Str(_))
                || is_composite(left)
                || is_composite(right)
            {
                JsValue::Str(format!("{left}{right}"))
            } else {
                numeric(|a, b| a + b)
            }
        }
        BinOp::Sub => numeric(|a, b| a - b),
        BinOp::Mul => numeric(|a, b| a * b),
        BinOp::Div => numeric(|a, b| a / b),
        BinOp::Rem => numeric(|a, b| a % b),
        BinOp::Pow => numeric(f64::powf),
        BinOp::Eq => JsValue::Bool(loose_eq(left, right)),
        BinOp::NotEq => JsValue::Bool(!loose_eq(left, right)),
        BinOp::StrictEq => JsValue::Bool(strict_eq(left, right)),
        BinOp::StrictNotEq => JsValue::Bool(!strict_eq(left, right)),
        BinOp::Lt => JsValue::Bool(compare(left, right) == Some(Ordering::Less)),
        BinOp::Le => JsValue::Bool(matches!(compare(left, right), Some(Ordering::Less | Ordering::Equal))),
        BinOp::Gt => JsValue::Bool(compare(left, right) == Some(Ordering::Greater)),
        BinOp::Ge => JsValue::Bool(matches!(
            compare(left, right),
            Some(Ordering::Greater | Ordering::Equal)
        )),
    }
}

fn compare(left: &JsValue, right: &JsValue) -> Option<Ordering> {
    match (left, right) {
        (JsValue::Str(a), JsValue::Str(b)) => Some(a.cmp(b)),
        _ => left.to_number().partial_cmp(&right.to_number()),
    }
}

pub(super) fn strict_eq(left: &JsValue, right: &JsValue) -> bool {
    match (left, right) {
        (JsValue::Undefined, JsValue::Undefined) | (JsValue::Null, JsValue::Null) => true,
        (JsValue::Bool(a), JsValue::Bool(b)) => a == b,
        (JsValue::Num(a), JsValue::Num(b)) => a == b,
        (JsValue::Str(a), JsValue::Str(b)) => a == b,
        (JsValue::Array(a), JsValue::Array(b)) => Rc::ptr_eq(a, b),
        (JsValue::Object(a), JsValue::Object(b)) => Rc::ptr_eq(a, b),
        (JsValue::Function(a), JsValue::Function(b)) => Rc::ptr_eq(a, b),
        (JsValue::RegExp(a), JsValue::RegExp(b)) => Rc::ptr_eq(a, b),
        (JsValue::Native(a), JsValue::Native(b)) => a == b,
        _ => false,
    }
}

pub(super) fn loose_eq(left: &JsValue, right: &JsValue) -> bool {
    use JsValue::{Bool, Null, Num, Str, Undefined};
    match (left, right) {
        (Undefined | Null, Undefined | Null) => true,
        (Undefined | Null, _) | (_, Undefined | Null) => false,
        (Num(_), Str(_)) | (Str(_), Num(_)) => left.to_number() == right.to_number(),
        (Bool(b), other) | (other, Bool(b)) => loose_eq(&Num(f64::from(u8::from(*b))), other),
        (composite, primitive @ (Str(_) | Num(_))) | (primitive @ (Str(_) | Num(_)), composite)
            if is_composite(composite) =>
        {
            loose_eq(&Str(composite.to_string()), primitive)
        }
        _ => strict_eq(left, right),
    }
}

// ============================================================================
// Indexing
// ============================================================================

/// Non-negative integral index, if `index` is one.
fn array_index(index: &JsValue) -> Option<usize> {
    let n = match index {
        JsValue::Num(n) => *n,
        JsValue::Str(s) => s.parse::<f64>().ok()?,
        _ => return None,
    };
    (n >= 0.0 && n.fract() == 0.0 && n < MAX_ARRAY_LENGTH as f64).then_some(n as usize)
}

fn get_index(object: &JsValue, index: &JsValue) -> Completion<JsValue> {
    match (object, array_index(index)) {
        (JsValue::Array(items), Some(i)) => Ok(items.borrow().get(i).cloned().unwrap_or(JsValue::Undefined)),
        (JsValue::Str(s), Some(i)) => Ok(s
            .chars()
            .nth(i)
            .map_or(JsValue::Undefined, |c| JsValue::Str(c.to_string()))),
        (JsValue::Object(fields), _) => Ok(fields
            .borrow()
            .get(&index.to_string())
            .cloned()
            .unwrap_or(JsValue::Undefined)),
        _ => builtins::get_property(object, &index.to_string()),
    }
}

fn set_property(object: &JsValue, name: &str, value: JsValue) -> Completion<()> {
    match object {
        JsValue::Object(fields) => {
            fields.borrow_mut().insert(name.to_string(), value);
            Ok(())
        }
        JsValue::Array(items) if name == "length" => {
            let length = array_index(&value).ok_or_else(|| throw("RangeError", "Invalid array length"))?;
            items.borrow_mut().resize(length, JsValue::Undefined);
            Ok(())
        }
        JsValue::Undefined | JsValue::Null => Err(type_error(format!(
            "Cannot set properties of {object} (setting '{name}')"
        ))),
        _ => Ok(()),
    }
}

fn set_index(object: &JsValue, index: &JsValue, value: JsValue) -> Completion<()> {
    match (object, array_index(index)) {
        (JsValue::Array(items), Some(i)) => {
            let mut items = items.borrow_mut();
            if i >= items.len() {
                items.resize(i + 1, JsValue::Undefined);
            }
            items[i] = value;
            Ok(())
        }
        (JsValue::Array(_), None) if matches!(index, JsValue::Num(_)) => {
            Err(throw("RangeError", "Invalid array index"))
        }
        _ => set_property(object, &index.to_string(), value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_rules() {
        assert!(loose_eq(&JsValue::Num(1.0), &JsValue::str("1")));
        assert!(loose_eq(&JsValue::Null, &JsValue::Undefined));
        assert!(loose_eq(&JsValue::Bool(true), &JsValue::Num(1.0)));
        assert!(!strict_eq(&JsValue::Num(1.0), &JsValue::str("1")));
        assert!(!strict_eq(&JsValue::Num(f64::NAN), &JsValue::Num(f64::NAN)));
        let array = JsValue::array(vec![JsValue::Num(1.0)]);
        assert!(strict_eq(&array, &array.clone()));
        assert!(!strict_eq(&array, &JsValue::array(vec![JsValue::Num(1.0)])));
    }

    #[test]
    fn test_addition_and_comparison() {
        assert!(matches!(
            binary(BinOp::Add, &JsValue::str("n="), &JsValue::Num(2.0)),
            JsValue::Str(ref s) if s == "n=2"
        ));
        assert!(matches!(
            binary(BinOp::Add, &JsValue::Bool(true), &JsValue::Num(2.0)),
            JsValue::Num(n) if n == 3.0
        ));
        assert!(matches!(
            binary(BinOp::Lt, &JsValue::str("10"), &JsValue::str("9")),
            JsValue::Bool(true)
        ));
        assert!(matches!(
            binary(BinOp::Lt, &JsValue::str("10"), &JsValue::Num(9.0)),
            JsValue::Bool(false)
        ));
    }

    #[test]
    fn test_index_assignment_grows_arrays() {
        let array = JsValue::array(Vec::new());
        assert!(set_index(&array, &JsValue::Num(2.0), JsValue::Bool(true)).is_ok());
        let JsValue::Array(items) = &array else {
            panic!("not an array");
        };
        assert_eq!(items.borrow().len(), 3);
        assert!(set_index(&array, &JsValue::Num(-1.0), JsValue::Null).is_err());
    }
}
