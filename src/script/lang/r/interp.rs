//! Evaluator for the `r` rule language.

use super::builtins;
use super::parser::{Arg, BinOp, Expr, UnaryOp};
use super::value::{combine, RClosure, RValue, Rank};
use crate::script::lang::scope::Scope;
use crate::script::{Budget, ScriptError};
use std::cmp::Ordering;
use std::rc::Rc;

/// Longest vector `:` or index assignment may create.
pub(super) const MAX_VECTOR_LENGTH: usize = 10_000_000;

/// Non-local exits.
pub(super) enum Ctl {
    Break,
    Next,
    Return(RValue),
    Error(ScriptError),
}

impl From<ScriptError> for Ctl {
    fn from(err: ScriptError) -> Self {
        Self::Error(err)
    }
}

pub(super) type Eval<T> = Result<T, Ctl>;

pub(super) fn runtime(message: impl Into<String>) -> Ctl {
    Ctl::Error(ScriptError::Runtime(message.into()))
}

pub(super) type Env = Rc<Scope<RValue>>;

/// Evaluated call arguments, optionally named.
pub(super) type Args = Vec<(Option<String>, RValue)>;

pub(super) struct Interpreter<'b> {
    budget: &'b Budget,
    globals: Env,
    depth: usize,
}

impl<'b> Interpreter<'b> {
    pub(super) fn new(budget: &'b Budget) -> Self {
        let globals = Scope::root();
        builtins::install(&globals);
        Self {
            budget,
            globals,
            depth: 0,
        }
    }

    pub(super) fn globals(&self) -> &Env {
        &self.globals
    }

    pub(super) fn release(&self) {
        self.globals.clear();
    }

    pub(super) fn tick(&self) -> Eval<()> {
        Ok(self.budget.tick()?)
    }

    /// Evaluate top-level expressions; yields the last value.
    pub(super) fn run(&mut self, program: &[Expr]) -> Result<RValue, ScriptError> {
        let globals = Rc::clone(&self.globals);
        let mut last = RValue::Null;
        for expr in program {
            match self.eval(expr, &globals) {
                Ok(value) => last = value,
                Err(Ctl::Return(value)) => return Ok(value),
                Err(ctl) => return Err(escape(ctl)),
            }
        }
        Ok(last)
    }

    /// Call a global entry point such as `call()` with no arguments.
    pub(super) fn call_entry(&mut self, function: &RValue) -> Result<RValue, ScriptError> {
        self.call_function(function, Vec::new()).map_err(escape)
    }

    pub(super) fn eval(&mut self, expr: &Expr, env: &Env) -> Eval<RValue> {
        match expr {
            Expr::Num(n) => Ok(RValue::num(*n)),
            Expr::Str(s) => Ok(RValue::chr(s.clone())),
            Expr::Bool(b) => Ok(RValue::lgl(*b)),
            Expr::Null => Ok(RValue::Null),
            Expr::Na => Ok(RValue::na()),
            Expr::Ident(name) => env
                .get(name)
                .ok_or_else(|| runtime(format!("object '{name}' not found"))),
            Expr::Call(callee, args) => self.eval_call(callee, args, env),
            Expr::Index(object, args) => {
                let object = self.eval(object, env)?;
                let index = match args.as_slice() {
                    [] => return Ok(object),
                    [arg] => self.eval(&arg.value, env)?,
                    _ => return Err(runtime("incorrect number of dimensions")),
                };
                index_vector(&object, &index)
            }
            Expr::Index2(object, index) => {
                let object = self.eval(object, env)?;
                let index = self.eval(index, env)?;
                index_element(&object, &index)
            }
            Expr::Dollar(object, name) => {
                let object = self.eval(object, env)?;
                dollar(&object, name)
            }
            Expr::Unary(op, operand) => {
                let value = self.eval(operand, env)?;
                match op {
                    UnaryOp::Not => {
                        if !value.is_atomic() && !matches!(value, RValue::Null) {
                            return Err(runtime("invalid argument type"));
                        }
                        Ok(RValue::Logical(value.logicals().iter().map(|b| b.map(|b| !b)).collect()))
                    }
                    UnaryOp::Neg => arithmetic(BinOp::Sub, &RValue::num(0.0), &value),
                    UnaryOp::Plus => arithmetic(BinOp::Add, &RValue::num(0.0), &value),
                }
            }
            Expr::Binary(BinOp::AndAnd, left, right) => {
                let left = scalar_logical(&self.eval(left, env)?, "&&")?;
                if left == Some(false) {
                    return Ok(RValue::lgl(false));
                }
                let right = scalar_logical(&self.eval(right, env)?, "&&")?;
                Ok(RValue::Logical(vec![match (left, right) {
                    (_, Some(false)) => Some(false),
                    (Some(true), Some(true)) => Some(true),
                    _ => None,
                }]))
            }
            Expr::Binary(BinOp::OrOr, left, right) => {
                let left = scalar_logical(&self.eval(left, env)?, "||")?;
                if left == Some(true) {
                    return Ok(RValue::lgl(true));
                }
                let right = scalar_logical(&self.eval(right, env)?, "||")?;
                Ok(RValue::Logical(vec![match (left, right) {
                    (_, Some(true)) => Some(true),
                    (Some(false), Some(false)) => Some(false),
                    _ => None,
                }]))
            }
            Expr::Binary(op, left, right) => {
                let left = self.eval(left, env)?;
                let right = self.eval(right, env)?;
                binary(*op, &left, &right)
            }
            Expr::Assign { target, value, outer } => {
                let value = self.eval(value, env)?;
                self.assign(target, value.clone(), env, *outer)?;
                Ok(value)
            }
            Expr::If(cond, then, otherwise) => {
                if condition(&self.eval(cond, env)?)? {
                    self.eval(then, env)
                } else if let Some(otherwise) = otherwise {
                    self.eval(otherwise, env)
                } else {
                    Ok(RValue::Null)
                }
            }
            Expr::For(var, seq, body) => {
                let seq = self.eval(seq, env)?;
                if seq.is_function() {
                    return Err(runtime("invalid for() loop sequence"));
                }
                for item in seq.elements() {
                    self.tick()?;
                    env.define(var, item);
                    match self.eval(body, env) {
                        Ok(_) | Err(Ctl::Next) => {}
                        Err(Ctl::Break) => break,
                        Err(other) => return Err(other),
                    }
                }
                Ok(RValue::Null)
            }
            Expr::While(cond, body) => {
                loop {
                    self.tick()?;
                    if !condition(&self.eval(cond, env)?)? {
                        break;
                    }
                    match self.eval(body, env) {
                        Ok(_) | Err(Ctl::Next) => {}
                        Err(Ctl::Break) => break,
                        Err(other) => return Err(other),
                    }
                }
                Ok(RValue::Null)
            }
            Expr::Repeat(body) => {
                loop {
                    self.tick()?;
                    match self.eval(body, env) {
                        Ok(_) | Err(Ctl::Next) => {}
                        Err(Ctl::Break) => break,
                        Err(other) => return Err(other),
                    }
                }
                Ok(RValue::Null)
            }
            Expr::Break => Err(Ctl::Break),
            Expr::Next => Err(Ctl::Next),
            Expr::Block(exprs) => {
                let mut last = RValue::Null;
                for expr in exprs {
                    last = self.eval(expr, env)?;
                }
                Ok(last)
            }
            Expr::Function(def) => Ok(RValue::Closure(Rc::new(RClosure {
                def: Rc::clone(def),
                env: Rc::clone(env),
            }))),
        }
    }

    fn eval_call(&mut self, callee: &Expr, args: &[Arg], env: &Env) -> Eval<RValue> {
        let function = match callee {
            Expr::Ident(name) | Expr::Str(name) => env
                .find(name, &RValue::is_function)
                .ok_or_else(|| runtime(format!("could not find function \"{name}\"")))?,
            other => self.eval(other, env)?,
        };
        match function {
            RValue::Builtin("tryCatch") => return self.try_catch(args, env),
            RValue::Builtin("try") => return self.try_silently(args, env),
            _ => {}
        }
        let args = self.eval_args(args, env)?;
        self.call_function(&function, args)
    }

    fn eval_args(&mut self, args: &[Arg], env: &Env) -> Eval<Args> {
        let mut evaluated = Vec::with_capacity(args.len());
        for arg in args {
            if arg.name.is_none() && matches!(&arg.value, Expr::Ident(n) if n == "...") {
                if let Some(RValue::List(items, names)) = env.get("...") {
                    for (i, item) in items.into_iter().enumerate() {
                        let name = names.as_ref().and_then(|n| n.get(i)).filter(|n| !n.is_empty()).cloned();
                        evaluated.push((name, item));
                    }
                }
                continue;
            }
            evaluated.push((arg.name.clone(), self.eval(&arg.value, env)?));
        }
        Ok(evaluated)
    }

    pub(super) fn call_function(&mut self, function: &RValue, args: Args) -> Eval<RValue> {
        match function {
            RValue::Builtin(name) => builtins::call(self, name, args),
            RValue::Closure(closure) => {
                self.depth += 1;
                let result = self.invoke(closure, args);
                self.depth -= 1;
                result
            }
            other => Err(runtime(format!(
                "attempt to apply non-function of type {}",
                other.type_name()
            ))),
        }
    }

    fn invoke(&mut self, closure: &RClosure, args: Args) -> Eval<RValue> {
        self.budget.enter(self.depth)?;
        let def = &closure.def;
        let env = Scope::child(&closure.env);
        let params: Vec<&str> = def.params.iter().map(|(name, _)| name.as_str()).collect();
        let mut bound: Vec<Option<RValue>> = vec![None; params.len()];
        let dots = params.iter().position(|p| *p == "...");
        let mut extra: Args = Vec::new();
        let mut positional = Vec::new();

        for (name, value) in args {
            match name {
                Some(name) => match params.iter().position(|p| *p == name && *p != "...") {
                    Some(i) if bound[i].is_none() => bound[i] = Some(value),
                    Some(_) => return Err(runtime(format!("formal argument \"{name}\" matched by multiple actual arguments"))),
                    None if dots.is_some() => extra.push((Some(name), value)),
                    None => return Err(runtime(format!("unused argument ({name} = {value})"))),
                },
                None => positional.push(value),
            }
        }
        let mut positional = positional.into_iter();
        for (i, slot) in bound.iter_mut().enumerate() {
            if Some(i) == dots {
                extra.extend(positional.by_ref().map(|v| (None, v)));
                break;
            }
            if slot.is_none() {
                *slot = positional.next();
            }
        }
        if let Some(value) = positional.next() {
            return Err(runtime(format!("unused argument ({value})")));
        }

        for (i, (param, default)) in def.params.iter().enumerate() {
            if Some(i) == dots {
                let named = extra.iter().any(|(n, _)| n.is_some());
                let names: Vec<String> = extra.iter().map(|(n, _)| n.clone().unwrap_or_default()).collect();
                let values: Vec<RValue> = extra.drain(..).map(|(_, v)| v).collect();
                env.define(param, RValue::List(values, named.then_some(names)));
                continue;
            }
            let value = match (bound[i].take(), default) {
                (Some(value), _) => value,
                (None, Some(default)) => self.eval(default, &env)?,
                // Missing without default: an error only if it is used
                (None, None) => continue,
            };
            env.define(param, value);
        }

        match self.eval(&def.body, &env) {
            Ok(value) | Err(Ctl::Return(value)) => Ok(value),
            Err(Ctl::Break | Ctl::Next) => Err(runtime("no loop for break/next, jumping to top level")),
            Err(err) => Err(err),
        }
    }

    /// `tryCatch(expr, error = handler, finally = expr)`
    fn try_catch(&mut self, args: &[Arg], env: &Env) -> Eval<RValue> {
        let expr = args.iter().find(|a| a.name.is_none() || a.name.as_deref() == Some("expr"));
        let handler = args.iter().find(|a| a.name.as_deref() == Some("error"));
        let finally = args.iter().find(|a| a.name.as_deref() == Some("finally"));

        let outcome = match expr {
            Some(expr) => self.eval(&expr.value, env),
            None => Ok(RValue::Null),
        };
        let outcome = match (outcome, handler) {
            (Err(Ctl::Error(err @ (ScriptError::Runtime(_) | ScriptError::Raised(_)))), Some(handler)) => {
                let handler = self.eval(&handler.value, env)?;
                self.call_function(&handler, vec![(None, condition_value(&err))])
            }
            (outcome, _) => outcome,
        };
        if let Some(finally) = finally {
            self.eval(&finally.value, env)?;
        }
        outcome
    }

    /// `try(expr, silent = TRUE)`: the error message instead of the error.
    fn try_silently(&mut self, args: &[Arg], env: &Env) -> Eval<RValue> {
        let Some(expr) = args.iter().find(|a| a.name.is_none()) else {
            return Ok(RValue::Null);
        };
        match self.eval(&expr.value, env) {
            Err(Ctl::Error(ScriptError::Runtime(message) | ScriptError::Raised(message))) => {
                Ok(RValue::chr(format!("Error : {message}\n")))
            }
            other => other,
        }
    }

    fn assign(&mut self, target: &Expr, value: RValue, env: &Env, outer: bool) -> Eval<()> {
        match target {
            Expr::Ident(name) | Expr::Str(name) => {
                if outer {
                    env.assign_outer(name, value);
                } else {
                    env.define(name, value);
                }
                Ok(())
            }
            Expr::Index(object, args) => {
                let current = self.current(object, env)?;
                let updated = match args.as_slice() {
                    [arg] => {
                        let index = self.eval(&arg.value, env)?;
                        assign_vector(&current, &index, value)?
                    }
                    _ => return Err(runtime("incorrect number of subscripts")),
                };
                self.assign(object, updated, env, outer)
            }
            Expr::Index2(object, index) => {
                let current = self.current(object, env)?;
                let index = self.eval(index, env)?;
                let updated = assign_element(&current, &index, value)?;
                self.assign(object, updated, env, outer)
            }
            Expr::Dollar(object, name) => {
                let current = self.current(object, env)?;
                let updated = assign_element(&current, &RValue::chr(name.clone()), value)?;
                self.assign(object, updated, env, outer)
            }
            Expr::Call(callee, args) if matches!(callee.as_ref(), Expr::Ident(n) if n == "names") => {
                let [arg] = args.as_slice() else {
                    return Err(runtime("invalid (do_set) left-hand side to assignment"));
                };
                let current = self.current(&arg.value, env)?;
                let names: Vec<String> = value.strings().into_iter().map(Option::unwrap_or_default).collect();
                let updated = match current {
                    RValue::List(items, _) => {
                        let mut names = names;
                        names.resize(items.len(), String::new());
                        RValue::List(items, Some(names))
                    }
                    other => other,
                };
                self.assign(&arg.value, updated, env, outer)
            }
            _ => Err(runtime("invalid assignment target")),
        }
    }

    /// Current value of an assignment target; unbound names start as NULL.
    fn current(&mut self, target: &Expr, env: &Env) -> Eval<RValue> {
        match target {
            Expr::Ident(name) => Ok(env.get(name).unwrap_or(RValue::Null)),
            other => self.eval(other, env),
        }
    }
}

/// Break, next or return escaping to the top level.
fn escape(ctl: Ctl) -> ScriptError {
    match ctl {
        Ctl::Error(err) => err,
        Ctl::Break | Ctl::Next => ScriptError::Runtime("no loop for break/next, jumping to top level".into()),
        Ctl::Return(_) => ScriptError::Runtime("no function to return from, jumping to top level".into()),
    }
}

/// The condition object handed to a `tryCatch` error handler.
fn condition_value(err: &ScriptError) -> RValue {
    let message = match err {
        ScriptError::Runtime(m) | ScriptError::Raised(m) => m.clone(),
        other => other.to_string(),
    };
    RValue::List(
        vec![RValue::chr(message), RValue::Null],
        Some(vec!["message".to_string(), "call".to_string()]),
    )
}

/// Truth value of an `if`/`while` condition.
fn condition(value: &RValue) -> Eval<bool> {
    if value.len() == 0 {
        return Err(runtime("argument is of length zero"));
    }
    if !value.is_atomic() {
        return Err(runtime("argument is not interpretable as logical"));
    }
    match value.logicals()[0] {
        Some(b) => Ok(b),
        None if matches!(value, RValue::Character(v) if v[0].is_some()) => {
            Err(runtime("argument is not interpretable as logical"))
        }
        None => Err(runtime("missing value where TRUE/FALSE needed")),
    }
}

fn scalar_logical(value: &RValue, op: &str) -> Eval<Option<bool>> {
    if value.len() == 0 || !value.is_atomic() {
        return Err(runtime(format!("invalid 'x' type in 'x {op} y'")));
    }
    Ok(value.logicals()[0])
}

// ============================================================================
// Operators
// ============================================================================

/// Element count after recycling two operands.
fn recycled_len(a: usize, b: usize) -> usize {
    if a == 0 || b == 0 {
        0
    } else {
        a.max(b)
    }
}

fn binary(op: BinOp, left: &RValue, right: &RValue) -> Eval<RValue> {
    match op {
        BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Pow | BinOp::Mod | BinOp::IntDiv => {
            arithmetic(op, left, right)
        }
        BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => compare(op, left, right),
        BinOp::And | BinOp::Or => {
            for v in [left, right] {
                if !v.is_atomic() && !matches!(v, RValue::Null) {
                    return Err(runtime(format!(
                        "operations are possible only for numeric, logical or complex types ({})",
                        v.type_name()
                    )));
                }
            }
            let (a, b) = (left.logicals(), right.logicals());
            let n = recycled_len(a.len(), b.len());
            Ok(RValue::Logical(
                (0..n)
                    .map(|i| {
                        let (x, y) = (a[i % a.len()], b[i % b.len()]);
                        if op == BinOp::And {
                            match (x, y) {
                                (Some(false), _) | (_, Some(false)) => Some(false),
                                (Some(true), Some(true)) => Some(true),
                                _ => None,
                            }
                        } else {
                            match (x, y) {
                                (Some(true), _) | (_, Some(true)) => Some(true),
                                (Some(false), Some(false)) => Some(false),
                                _ => None,
                            }
                        }
                    })
                    .collect(),
            ))
        }
        BinOp::In => Ok(RValue::Logical(
            membership(left, right).into_iter().map(|pos| Some(pos.is_some())).collect(),
        )),
        BinOp::Range => range(left, right),
        BinOp::AndAnd | BinOp::OrOr => Err(runtime("unexpected short-circuit operator")),
    }
}

/// Position of each element of `needles` in `haystack`, as `match()` does.
pub(super) fn membership(needles: &RValue, haystack: &RValue) -> Vec<Option<usize>> {
    let table = haystack.strings();
    needles
        .strings()
        .iter()
        .map(|needle| table.iter().position(|candidate| candidate == needle))
        .collect()
}

fn arithmetic(op: BinOp, left: &RValue, right: &RValue) -> Eval<RValue> {
    for v in [left, right] {
        if !matches!(v, RValue::Null | RValue::Logical(_) | RValue::Double(_)) {
            return Err(runtime("non-numeric argument to binary operator"));
        }
    }
    let (a, b) = (left.doubles(), right.doubles());
    let n = recycled_len(a.len(), b.len());
    let apply = |x: f64, y: f64| match op {
        BinOp::Add => x + y,
        BinOp::Sub => x - y,
        BinOp::Mul => x * y,
        BinOp::Div => x / y,
        BinOp::Pow => x.powf(y),
        BinOp::Mod => x - (x / y).floor() * y,
        _ => (x / y).floor(),
    };
    Ok(RValue::Double(
        (0..n)
            .map(|i| match (a[i % a.len()], b[i % b.len()]) {
                (Some(x), Some(y)) => Some(apply(x, y)),
                // NA^0 and 1^NA are defined
                (None, Some(y)) if op == BinOp::Pow && y == 0.0 => Some(1.0),
                (Some(x), None) if op == BinOp::Pow && x == 1.0 => Some(1.0),
                _ => None,
            })
            .collect(),
    ))
}

fn compare(op: BinOp, left: &RValue, right: &RValue) -> Eval<RValue> {
    for v in [left, right] {
        if !v.is_atomic() && !matches!(v, RValue::Null) {
            return Err(runtime("comparison is possible only for atomic types"));
        }
    }
    let textual = matches!(left, RValue::Character(_)) || matches!(right, RValue::Character(_));
    let orderings: Vec<Option<Ordering>> = if textual {
        let (a, b) = (left.strings(), right.strings());
        let n = recycled_len(a.len(), b.len());
        (0..n)
            .map(|i| match (&a[i % a.len()], &b[i % b.len()]) {
                (Some(x), Some(y)) => Some(x.cmp(y)),
                _ => None,
            })
            .collect()
    } else {
        let (a, b) = (left.doubles(), right.doubles());
        let n = recycled_len(a.len(), b.len());
        (0..n)
            .map(|i| match (a[i % a.len()], b[i % b.len()]) {
                (Some(x), Some(y)) => x.partial_cmp(&y),
                _ => None,
            })
            .collect()
    };
    Ok(RValue::Logical(
        orderings
            .into_iter()
            .map(|ord| {
                ord.map(|ord| match op {
                    BinOp::Eq => ord == Ordering::Equal,
                    BinOp::Ne => ord != Ordering::Equal,
                    BinOp::Lt => ord == Ordering::Less,
                    BinOp::Le => ord != Ordering::Greater,
                    BinOp::Gt => ord == Ordering::Greater,
                    _ => ord != Ordering::Less,
                })
            })
            .collect(),
    ))
}

fn range(from: &RValue, to: &RValue) -> Eval<RValue> {
    let start = from.doubles().first().copied().flatten();
    let end = to.doubles().first().copied().flatten();
    let (Some(start), Some(end)) = (start, end) else {
        return Err(runtime("NA/NaN argument"));
    };
    let count = (end - start).abs().floor() + 1.0;
    if !count.is_finite() || count > MAX_VECTOR_LENGTH as f64 {
        return Err(runtime("result would be too long a vector"));
    }
    let step = if end >= start { 1.0 } else { -1.0 };
    Ok(RValue::Double(
        (0..count as usize).map(|i| Some(start + step * i as f64)).collect(),
    ))
}

// ============================================================================
// Indexing
// ============================================================================

/// Zero-based positions selected by `index`; `None` selects `NA`.
fn positions(object: &RValue, index: &RValue) -> Eval<Vec<Option<usize>>> {
    let len = object.len();
    match index {
        RValue::Null => Ok(Vec::new()),
        RValue::Logical(mask) => {
            if mask.is_empty() {
                return Ok(Vec::new());
            }
            let n = len.max(mask.len());
            Ok((0..n)
                .filter_map(|i| match mask[i % mask.len()] {
                    Some(true) => Some(Some(i)),
                    Some(false) => None,
                    None => Some(None),
                })
                .collect())
        }
        RValue::Double(values) => {
            let negative = values.iter().flatten().any(|v| *v < 0.0);
            if negative {
                if values.iter().any(|v| v.map_or(true, |v| v > 0.0)) {
                    return Err(runtime("can't mix positive and negative subscripts"));
                }
                let excluded: Vec<usize> = values.iter().flatten().map(|v| (-v) as usize).collect();
                return Ok((0..len).filter(|i| !excluded.contains(&(i + 1))).map(Some).collect());
            }
            values
                .iter()
                .filter(|v| v.map_or(true, |v| v >= 1.0))
                .map(|v| match v {
                    None => Ok(None),
                    Some(v) if *v > MAX_VECTOR_LENGTH as f64 => Err(runtime("subscript too large")),
                    Some(v) => Ok(Some(*v as usize - 1)),
                })
                .collect()
        }
        RValue::Character(keys) => {
            let names = object.names().unwrap_or(&[]);
            Ok(keys
                .iter()
                .map(|key| key.as_ref().and_then(|key| names.iter().position(|n| n == key)))
                .collect())
        }
        other => Err(runtime(format!("invalid subscript type '{}'", other.type_name()))),
    }
}

/// `x[i]`
fn index_vector(object: &RValue, index: &RValue) -> Eval<RValue> {
    if object.is_function() {
        return Err(runtime("object of type 'closure' is not subsettable"));
    }
    let selected = positions(object, index)?;
    let pick = |pos: Option<usize>| match pos.filter(|p| *p < object.len()) {
        Some(p) => object.element(p),
        None if matches!(object, RValue::List(..)) => RValue::Null,
        None => RValue::na(),
    };
    Ok(match object {
        RValue::Null => RValue::Null,
        RValue::List(_, names) => {
            let items = selected.iter().map(|p| pick(*p)).collect();
            let names = names.as_ref().map(|names| {
                selected
                    .iter()
                    .map(|p| p.and_then(|p| names.get(p).cloned()).unwrap_or_default())
                    .collect()
            });
            RValue::List(items, names)
        }
        atomic => {
            let items: Vec<RValue> = selected.iter().map(|p| pick(*p)).collect();
            combine(&items).coerce(atomic.rank())
        }
    })
}

/// `x[[i]]`
pub(super) fn index_element(object: &RValue, index: &RValue) -> Eval<RValue> {
    if index.len() != 1 {
        return Err(runtime("subscript out of bounds"));
    }
    match (object, index) {
        (RValue::Null, _) => Ok(RValue::Null),
        (RValue::List(..), RValue::Character(_)) => {
            let pos = positions(object, index)?[0];
            Ok(pos.map_or(RValue::Null, |p| object.element(p)))
        }
        (_, RValue::Double(_) | RValue::Logical(_)) => {
            let pos = index.doubles()[0]
                .filter(|v| *v >= 1.0 && (*v as usize) <= object.len())
                .map(|v| v as usize - 1);
            pos.map(|p| object.element(p))
                .ok_or_else(|| runtime("subscript out of bounds"))
        }
        _ => Err(runtime("subscript out of bounds")),
    }
}

/// `x$name`
fn dollar(object: &RValue, name: &str) -> Eval<RValue> {
    match object {
        RValue::Null => Ok(RValue::Null),
        RValue::List(..) => index_element(object, &RValue::chr(name)),
        _ => Err(runtime("$ operator is invalid for atomic vectors")),
    }
}

/// `x[i] <- value`
fn assign_vector(object: &RValue, index: &RValue, value: RValue) -> Eval<RValue> {
    let selected = positions(object, index)?;
    if selected.is_empty() {
        return Ok(object.clone());
    }
    if value.len() == 0 {
        return Err(runtime("replacement has length zero"));
    }
    let is_list = matches!(object, RValue::List(..)) || matches!(value, RValue::List(..));
    let mut items = object.elements();
    let mut names = object.names().map(<[String]>::to_vec);
    let fill = || if is_list { RValue::Null } else { RValue::na() };
    let replacements = value.elements();
    for (k, pos) in selected.iter().enumerate() {
        let pos = match (pos, index) {
            (Some(p), _) => *p,
            // New names append
            (None, RValue::Character(keys)) => {
                let key = keys[k % keys.len()].clone().unwrap_or_default();
                let names = names.get_or_insert_with(|| vec![String::new(); items.len()]);
                names.push(key);
                items.push(fill());
                items.len() - 1
            }
            (None, _) => return Err(runtime("NAs are not allowed in subscripted assignments")),
        };
        if pos >= MAX_VECTOR_LENGTH {
            return Err(runtime("subscript too large"));
        }
        if pos >= items.len() {
            items.resize(pos + 1, fill());
            if let Some(names) = names.as_mut() {
                names.resize(pos + 1, String::new());
            }
        }
        items[pos] = replacements[k % replacements.len()].clone();
    }
    Ok(if is_list {
        RValue::List(items, names)
    } else {
        let rank = object.rank().max(value.rank()).max(Rank::Logical);
        combine(&items).coerce(rank)
    })
}

/// `x[[i]] <- value` and `x$name <- value`
fn assign_element(object: &RValue, index: &RValue, value: RValue) -> Eval<RValue> {
    if index.len() != 1 {
        return Err(runtime("more elements supplied than there are to replace"));
    }
    let object = match object {
        RValue::Null if matches!(index, RValue::Character(_)) || !value.is_atomic() || value.len() != 1 => {
            RValue::List(Vec::new(), None)
        }
        other => other.clone(),
    };
    match object {
        RValue::List(mut items, mut names) => {
            let pos = match index {
                RValue::Character(keys) => {
                    let key = keys[0].clone().unwrap_or_default();
                    match names.as_ref().and_then(|n| n.iter().position(|name| *name == key)) {
                        Some(p) => p,
                        None => {
                            if matches!(value, RValue::Null) {
                                return Ok(RValue::List(items, names));
                            }
                            names.get_or_insert_with(|| vec![String::new(); items.len()]).push(key);
                            items.push(RValue::Null);
                            items.len() - 1
                        }
                    }
                }
                other => match other.doubles()[0] {
                    Some(v) if v >= 1.0 && v <= MAX_VECTOR_LENGTH as f64 => v as usize - 1,
                    _ => return Err(runtime("invalid subscript")),
                },
            };
            if matches!(value, RValue::Null) {
                if pos < items.len() {
                    items.remove(pos);
                    if let Some(names) = names.as_mut() {
                        names.remove(pos);
                    }
                }
                return Ok(RValue::List(items, names));
            }
            if pos >= items.len() {
                items.resize(pos + 1, RValue::Null);
                if let Some(names) = names.as_mut() {
                    names.resize(pos + 1, String::new());
                }
            }
            items[pos] = value;
            Ok(RValue::List(items, names))
        }
        atomic => {
            if value.len() != 1 {
                return Err(runtime("more elements supplied than there are to replace"));
            }
            if matches!(index, RValue::Character(_)) {
                return Err(runtime("invalid subscript for atomic vector"));
            }
            assign_vector(&atomic, index, value)
        }
    }
}
