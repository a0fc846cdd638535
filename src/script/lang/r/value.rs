//! Vector values of the `r` rule language and the coercions between them.

use super::parser::FuncDef;
use crate::model::{format_number, Value};
use crate::script::lang::scope::Scope;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

/// Every value is a vector; scalars are vectors of length one and `None`
/// entries are `NA`.
#[derive(Clone)]
pub(super) enum RValue {
    Null,
    Logical(Vec<Option<bool>>),
    Double(Vec<Option<f64>>),
    Character(Vec<Option<String>>),
    List(Vec<RValue>, Option<Vec<String>>),
    Closure(Rc<RClosure>),
    Builtin(&'static str),
}

pub(super) struct RClosure {
    pub def: Rc<FuncDef>,
    pub env: Rc<Scope<RValue>>,
}

/// Coercion order used by `c()` and assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(super) enum Rank {
    Null,
    Logical,
    Double,
    Character,
    List,
}

impl RValue {
    pub(super) fn lgl(b: bool) -> Self {
        Self::Logical(vec![Some(b)])
    }

    pub(super) fn num(n: f64) -> Self {
        Self::Double(vec![Some(n)])
    }

    pub(super) fn chr(s: impl Into<String>) -> Self {
        Self::Character(vec![Some(s.into())])
    }

    pub(super) fn na() -> Self {
        Self::Logical(vec![None])
    }

    pub(super) fn list(items: Vec<Self>) -> Self {
        Self::List(items, None)
    }

    pub(super) fn len(&self) -> usize {
        match self {
            Self::Null => 0,
            Self::Logical(v) => v.len(),
            Self::Double(v) => v.len(),
            Self::Character(v) => v.len(),
            Self::List(items, _) => items.len(),
            Self::Closure(_) | Self::Builtin(_) => 1,
        }
    }

    pub(super) fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Logical(_) => "logical",
            Self::Double(_) => "double",
            Self::Character(_) => "character",
            Self::List(..) => "list",
            Self::Closure(_) => "closure",
            Self::Builtin(_) => "builtin",
        }
    }

    pub(super) fn is_function(&self) -> bool {
        matches!(self, Self::Closure(_) | Self::Builtin(_))
    }

    pub(super) fn is_atomic(&self) -> bool {
        matches!(self, Self::Logical(_) | Self::Double(_) | Self::Character(_))
    }

    pub(super) fn rank(&self) -> Rank {
        match self {
            Self::Null => Rank::Null,
            Self::Logical(_) => Rank::Logical,
            Self::Double(_) => Rank::Double,
            Self::Character(_) => Rank::Character,
            Self::List(..) | Self::Closure(_) | Self::Builtin(_) => Rank::List,
        }
    }

    pub(super) fn names(&self) -> Option<&[String]> {
        match self {
            Self::List(_, Some(names)) => Some(names),
            _ => None,
        }
    }

    pub(super) fn doubles(&self) -> Vec<Option<f64>> {
        match self {
            Self::Logical(v) => v.iter().map(|b| b.map(|b| f64::from(u8::from(b)))).collect(),
            Self::Double(v) => v.clone(),
            Self::Character(v) => v
                .iter()
                .map(|s| s.as_deref().and_then(parse_double))
                .collect(),
            Self::List(items, _) => items
                .iter()
                .map(|item| item.doubles().first().copied().flatten())
                .collect(),
            Self::Null | Self::Closure(_) | Self::Builtin(_) => Vec::new(),
        }
    }

    pub(super) fn strings(&self) -> Vec<Option<String>> {
        match self {
            Self::Logical(v) => v
                .iter()
                .map(|b| b.map(|b| if b { "TRUE" } else { "FALSE" }.to_string()))
                .collect(),
            Self::Double(v) => v.iter().map(|n| n.map(format_number)).collect(),
            Self::Character(v) => v.clone(),
            Self::List(items, _) => items
                .iter()
                .map(|item| match item.len() {
                    1 if item.is_atomic() => item.strings().swap_remove(0),
                    _ => Some(item.to_string()),
                })
                .collect(),
            Self::Null | Self::Closure(_) | Self::Builtin(_) => Vec::new(),
        }
    }

    pub(super) fn logicals(&self) -> Vec<Option<bool>> {
        match self {
            Self::Logical(v) => v.clone(),
            Self::Double(v) => v
                .iter()
                .map(|n| n.filter(|n| !n.is_nan()).map(|n| n != 0.0))
                .collect(),
            Self::Character(v) => v.iter().map(|s| s.as_deref().and_then(parse_logical)).collect(),
            Self::List(items, _) => items
                .iter()
                .map(|item| item.logicals().first().copied().flatten())
                .collect(),
            Self::Null | Self::Closure(_) | Self::Builtin(_) => Vec::new(),
        }
    }

    /// The `i`th element as a value of its own.
    pub(super) fn element(&self, i: usize) -> Self {
        match self {
            Self::Logical(v) => Self::Logical(vec![v.get(i).copied().flatten()]),
            Self::Double(v) => Self::Double(vec![v.get(i).copied().flatten()]),
            Self::Character(v) => Self::Character(vec![v.get(i).cloned().flatten()]),
            Self::List(items, _) => items.get(i).cloned().unwrap_or(Self::Null),
            Self::Null => Self::Null,
            Self::Closure(_) | Self::Builtin(_) => self.clone(),
        }
    }

    pub(super) fn elements(&self) -> Vec<Self> {
        match self {
            Self::List(items, _) => items.clone(),
            _ => (0..self.len()).map(|i| self.element(i)).collect(),
        }
    }

    /// Element `i` is `NA`.
    pub(super) fn is_na_at(&self, i: usize) -> bool {
        match self {
            Self::Logical(v) => v.get(i).is_some_and(Option::is_none),
            Self::Double(v) => v.get(i).is_some_and(|n| n.map_or(true, f64::is_nan)),
            Self::Character(v) => v.get(i).is_some_and(Option::is_none),
            Self::List(items, _) => items
                .get(i)
                .is_some_and(|item| item.len() == 1 && item.is_atomic() && item.is_na_at(0)),
            _ => false,
        }
    }

    pub(super) fn coerce(&self, rank: Rank) -> Self {
        match rank {
            _ if self.rank() == rank => self.clone(),
            Rank::Null => Self::Null,
            Rank::Logical => Self::Logical(self.logicals()),
            Rank::Double => Self::Double(self.doubles()),
            Rank::Character => Self::Character(self.strings()),
            Rank::List => Self::List(self.elements(), None),
        }
    }

    pub(super) fn from_model(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::lgl(*b),
            Value::Number(n) => Self::num(*n),
            Value::String(s) => Self::chr(s.clone()),
            Value::List(items) => {
                let items: Vec<Self> = items
                    .iter()
                    .map(|item| match item {
                        // NULL entries keep their position as NA
                        Value::Null => Self::na(),
                        other => Self::from_model(other),
                    })
                    .collect();
                if items.iter().all(|item| item.is_atomic() && item.len() == 1) {
                    combine(&items)
                } else {
                    Self::List(items, None)
                }
            }
            Value::Map(map) => Self::List(
                map.values().map(Self::from_model).collect(),
                Some(map.keys().cloned().collect()),
            ),
        }
    }

    pub(super) fn to_model(&self) -> Value {
        let scalars = |len: usize, at: &dyn Fn(usize) -> Value| match len {
            1 => at(0),
            _ => Value::List((0..len).map(at).collect()),
        };
        match self {
            Self::Null | Self::Closure(_) | Self::Builtin(_) => Value::Null,
            Self::Logical(v) => scalars(v.len(), &|i| v[i].map_or(Value::Null, Value::Bool)),
            Self::Double(v) => scalars(v.len(), &|i| v[i].map_or(Value::Null, Value::Number)),
            Self::Character(v) => scalars(v.len(), &|i| v[i].clone().map_or(Value::Null, Value::String)),
            Self::List(items, Some(names)) if names.iter().all(|n| !n.is_empty()) => Value::Map(
                names
                    .iter()
                    .cloned()
                    .zip(items.iter().map(Self::to_model))
                    .collect::<BTreeMap<_, _>>(),
            ),
            Self::List(items, _) => Value::List(items.iter().map(Self::to_model).collect()),
        }
    }
}

impl PartialEq for RValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Logical(a), Self::Logical(b)) => a == b,
            (Self::Double(a), Self::Double(b)) => {
                a.len() == b.len()
                    && a.iter().zip(b).all(|(x, y)| match (x, y) {
                        (Some(x), Some(y)) => x == y || (x.is_nan() && y.is_nan()),
                        (None, None) => true,
                        _ => false,
                    })
            }
            (Self::Character(a), Self::Character(b)) => a == b,
            (Self::List(a, an), Self::List(b, bn)) => a == b && an == bn,
            (Self::Closure(a), Self::Closure(b)) => Rc::ptr_eq(a, b),
            (Self::Builtin(a), Self::Builtin(b)) => a == b,
            _ => false,
        }
    }
}

/// `c()`: concatenate, coercing to the highest rank present.
pub(super) fn combine(values: &[RValue]) -> RValue {
    let rank = values.iter().map(RValue::rank).max().unwrap_or(Rank::Null);
    match rank {
        Rank::Null => RValue::Null,
        Rank::Logical => RValue::Logical(values.iter().flat_map(RValue::logicals).collect()),
        Rank::Double => RValue::Double(values.iter().flat_map(RValue::doubles).collect()),
        Rank::Character => RValue::Character(values.iter().flat_map(RValue::strings).collect()),
        Rank::List => {
            let mut items = Vec::new();
            let mut names = Vec::new();
            let mut named = false;
            for value in values {
                match value {
                    RValue::List(inner, inner_names) => {
                        items.extend(inner.iter().cloned());
                        match inner_names {
                            Some(n) => {
                                named = true;
                                names.extend(n.iter().cloned());
                            }
                            None => names.extend(std::iter::repeat(String::new()).take(inner.len())),
                        }
                    }
                    RValue::Null => {}
                    other => {
                        let elements = other.elements();
                        names.extend(std::iter::repeat(String::new()).take(elements.len()));
                        items.extend(elements);
                    }
                }
            }
            RValue::List(items, named.then_some(names))
        }
    }
}

pub(super) fn parse_double(s: &str) -> Option<f64> {
    let t = s.trim();
    match t {
        "Inf" | "inf" => Some(f64::INFINITY),
        "-Inf" | "-inf" => Some(f64::NEG_INFINITY),
        "NaN" => Some(f64::NAN),
        _ if t.chars().any(|c| c.is_ascii_alphabetic() && c != 'e' && c != 'E') => None,
        _ => t.parse().ok(),
    }
}

pub(super) fn parse_logical(s: &str) -> Option<bool> {
    match s {
        "TRUE" | "true" | "True" | "T" => Some(true),
        "FALSE" | "false" | "False" | "F" => Some(false),
        _ => None,
    }
}

fn write_items<T>(
    f: &mut fmt::Formatter<'_>,
    items: &[Option<T>],
    empty: &str,
    show: impl Fn(&T) -> String,
) -> fmt::Result {
    if items.is_empty() {
        return f.write_str(empty);
    }
    let parts: Vec<String> = items
        .iter()
        .map(|item| item.as_ref().map_or_else(|| "NA".to_string(), &show))
        .collect();
    f.write_str(&parts.join(" "))
}

impl fmt::Display for RValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Logical(v) => write_items(f, v, "logical(0)", |b| if *b { "TRUE" } else { "FALSE" }.to_string()),
            Self::Double(v) => write_items(f, v, "numeric(0)", |n| format_number(*n)),
            Self::Character(v) => write_items(f, v, "character(0)", |s| format!("\"{s}\"")),
            Self::List(items, names) => {
                let parts: Vec<String> = items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| match names.as_ref().and_then(|n| n.get(i)).filter(|n| !n.is_empty()) {
                        Some(name) => format!("{name} = {item}"),
                        None => item.to_string(),
                    })
                    .collect();
                write!(f, "list({})", parts.join(", "))
            }
            Self::Closure(_) => f.write_str("function(...)"),
            Self::Builtin(name) => write!(f, "function {name}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combine_coerces_upwards() {
        let mixed = combine(&[RValue::lgl(true), RValue::num(2.0)]);
        assert!(mixed == RValue::Double(vec![Some(1.0), Some(2.0)]));
        let text = combine(&[RValue::num(1.5), RValue::chr("a")]);
        assert!(text == RValue::Character(vec![Some("1.5".into()), Some("a".into())]));
        assert!(combine(&[]) == RValue::Null);
    }

    #[test]
    fn test_model_conversion() {
        let list = Value::List(vec![Value::from("a"), Value::from("b")]);
        let r = RValue::from_model(&list);
        assert!(r == RValue::Character(vec![Some("a".into()), Some("b".into())]));
        assert_eq!(r.to_model(), list);
        assert_eq!(RValue::num(3.0).to_model(), Value::Number(3.0));
        assert_eq!(RValue::Logical(vec![None]).to_model(), Value::Null);
    }

    #[test]
    fn test_logical_parsing() {
        assert_eq!(RValue::chr("T").logicals(), vec![Some(true)]);
        assert_eq!(RValue::chr("maybe").logicals(), vec![None]);
        assert_eq!(RValue::Double(vec![Some(0.0), Some(f64::NAN)]).logicals(), vec![Some(false), None]);
    }
}
