//! Values bound into rule code.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Named inputs for one check evaluation, in selector order.
pub type Bindings = IndexMap<String, Value>;

/// A value extracted from a document or produced by rule code.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Convert extracted text into the most specific scalar it represents.
    ///
    /// Numeric text becomes a number unless it carries a leading zero
    /// (identifiers such as `007` stay strings); affirmative and negative
    /// words become booleans.
    #[must_use]
    pub fn retype(text: &str) -> Self {
        let trimmed = text.trim();
        if looks_numeric(trimmed) {
            if let Ok(n) = trimmed.parse::<f64>() {
                return Self::Number(n);
            }
        }
        match trimmed.to_ascii_lowercase().as_str() {
            "true" | "yes" | "y" | "on" | "t" => Self::Bool(true),
            "false" | "no" | "n" | "off" | "f" => Self::Bool(false),
            _ => Self::String(text.to_string()),
        }
    }

    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Human-readable type name used in error messages.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::List(_) => "list",
            Self::Map(_) => "map",
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Text form used when a value becomes check output.
    #[must_use]
    pub fn to_text(&self) -> String {
        match self {
            Self::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// Numeric text without a leading zero (except "0" and "0.x").
fn looks_numeric(s: &str) -> bool {
    if s.is_empty() {
        return false;
    }
    let digits = s.strip_prefix(['-', '+']).unwrap_or(s);
    if digits.is_empty() || !digits.bytes().next().is_some_and(|b| b.is_ascii_digit() || b == b'.') {
        return false;
    }
    if digits.len() > 1 && digits.starts_with('0') && !digits.starts_with("0.") {
        return false;
    }
    digits
        .bytes()
        .all(|b| b.is_ascii_digit() || matches!(b, b'.' | b'e' | b'E' | b'-' | b'+'))
}

/// Format a number the way rule authors expect: integral values without a
/// trailing `.0`.
#[must_use]
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => f.write_str(&format_number(*n)),
            Self::String(s) => f.write_str(s),
            Self::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Self::Map(map) => {
                f.write_str("{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                f.write_str("}")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::List(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retype_numbers() {
        assert_eq!(Value::retype("42"), Value::Number(42.0));
        assert_eq!(Value::retype("-3.5"), Value::Number(-3.5));
        assert_eq!(Value::retype("0"), Value::Number(0.0));
        assert_eq!(Value::retype("0.25"), Value::Number(0.25));
        assert_eq!(Value::retype("1e3"), Value::Number(1000.0));
    }

    #[test]
    fn test_retype_keeps_leading_zero_identifiers() {
        assert_eq!(Value::retype("007"), Value::String("007".into()));
        assert_eq!(Value::retype("12-34"), Value::String("12-34".into()));
    }

    #[test]
    fn test_retype_booleans() {
        assert_eq!(Value::retype("Yes"), Value::Bool(true));
        assert_eq!(Value::retype("false"), Value::Bool(false));
        assert_eq!(Value::retype("maybe"), Value::String("maybe".into()));
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::Number(3.0).to_string(), "3");
        assert_eq!(Value::Number(2.5).to_string(), "2.5");
        let list = Value::List(vec![Value::from("a"), Value::Bool(true)]);
        assert_eq!(list.to_string(), "[a, true]");
        assert_eq!(Value::Null.to_text(), "null");
    }
}
