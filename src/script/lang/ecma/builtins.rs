//! Global functions and methods of built-in types for the `ecma` language.

use super::interp::{error_value, strict_eq, throw, type_error, Completion, Interpreter};
use super::{JsRegExp, JsValue};
use crate::model::Value;
use crate::script::lang::scope::Scope;
use indexmap::IndexMap;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;

const GLOBAL_FUNCTIONS: &[&str] = &[
    "parseInt",
    "parseFloat",
    "isNaN",
    "isFinite",
    "isArray",
    "Number",
    "String",
    "Boolean",
    "RegExp",
    "Error",
    "TypeError",
    "RangeError",
    "print",
];

const NAMESPACES: &[(&str, &[&str])] = &[
    (
        "Math",
        &[
            "max", "min", "abs", "floor", "ceil", "round", "trunc", "sqrt", "pow", "log", "exp",
        ],
    ),
    ("JSON", &["stringify", "parse"]),
    ("Object", &["keys", "values"]),
    ("Array", &["isArray"]),
    ("console", &["log", "info", "warn", "error"]),
];

/// Native names are `&'static str`; namespaced members are spelled out here.
const QUALIFIED: &[&str] = &[
    "Math.max",
    "Math.min",
    "Math.abs",
    "Math.floor",
    "Math.ceil",
    "Math.round",
    "Math.trunc",
    "Math.sqrt",
    "Math.pow",
    "Math.log",
    "Math.exp",
    "JSON.stringify",
    "JSON.parse",
    "Object.keys",
    "Object.values",
    "Array.isArray",
    "console.log",
    "console.info",
    "console.warn",
    "console.error",
];

pub(super) fn install(globals: &Scope<JsValue>) {
    for name in GLOBAL_FUNCTIONS {
        globals.define(name, JsValue::Native(*name));
    }
    for (namespace, members) in NAMESPACES {
        let mut fields = IndexMap::new();
        for member in *members {
            let qualified = format!("{namespace}.{member}");
            if let Some(native) = QUALIFIED.iter().find(|q| **q == qualified) {
                fields.insert((*member).to_string(), JsValue::Native(*native));
            }
        }
        if *namespace == "Math" {
            fields.insert("PI".to_string(), JsValue::Num(std::f64::consts::PI));
            fields.insert("E".to_string(), JsValue::Num(std::f64::consts::E));
        }
        globals.define(namespace, JsValue::object(fields));
    }
    globals.define("NaN", JsValue::Num(f64::NAN));
    globals.define("Infinity", JsValue::Num(f64::INFINITY));
}

fn arg(args: &[JsValue], i: usize) -> JsValue {
    args.get(i).cloned().unwrap_or(JsValue::Undefined)
}

/// Integer argument with JavaScript's truncation; `default` when absent.
fn int_arg(args: &[JsValue], i: usize, default: i64) -> i64 {
    match args.get(i) {
        None | Some(JsValue::Undefined) => default,
        Some(v) => {
            let n = v.to_number();
            if n.is_nan() {
                0
            } else {
                n.trunc() as i64
            }
        }
    }
}

/// Resolve a possibly negative relative index against `len`.
fn relative(index: i64, len: usize) -> usize {
    let len = len as i64;
    let resolved = if index < 0 { (len + index).max(0) } else { index.min(len) };
    resolved as usize
}

fn math(args: &[JsValue], f: fn(f64) -> f64) -> JsValue {
    JsValue::Num(f(arg(args, 0).to_number()))
}

pub(super) fn call_native(name: &str, args: &[JsValue]) -> Completion<JsValue> {
    Ok(match name {
        "parseInt" => {
            let radix = int_arg(args, 1, 10);
            JsValue::Num(parse_int(&arg(args, 0).to_string(), radix))
        }
        "parseFloat" => JsValue::Num(parse_float(&arg(args, 0).to_string())),
        "isNaN" => JsValue::Bool(arg(args, 0).to_number().is_nan()),
        "isFinite" => JsValue::Bool(arg(args, 0).to_number().is_finite()),
        "isArray" | "Array.isArray" => JsValue::Bool(matches!(arg(args, 0), JsValue::Array(_))),
        "Number" => JsValue::Num(args.first().map_or(0.0, JsValue::to_number)),
        "String" => JsValue::Str(args.first().map(ToString::to_string).unwrap_or_default()),
        "Boolean" => JsValue::Bool(arg(args, 0).truthy()),
        "RegExp" => {
            let flags = match arg(args, 1) {
                JsValue::Undefined => String::new(),
                flags => flags.to_string(),
            };
            let source = match arg(args, 0) {
                JsValue::RegExp(re) => re.source.clone(),
                other => other.to_string(),
            };
            let re = JsRegExp::new(&source, &flags).map_err(|m| throw("SyntaxError", m))?;
            JsValue::RegExp(Rc::new(re))
        }
        "Error" | "TypeError" | "RangeError" => {
            let message = match arg(args, 0) {
                JsValue::Undefined => String::new(),
                m => m.to_string(),
            };
            error_value(name, message)
        }
        "print" | "console.log" | "console.info" | "console.warn" | "console.error" => {
            let line: Vec<String> = args.iter().map(ToString::to_string).collect();
            tracing::debug!(environment = "ecma", "{}", line.join(" "));
            JsValue::Undefined
        }
        "Math.max" => JsValue::Num(args.iter().fold(f64::NEG_INFINITY, |acc, v| {
            let n = v.to_number();
            if n.is_nan() || acc.is_nan() {
                f64::NAN
            } else {
                acc.max(n)
            }
        })),
        "Math.min" => JsValue::Num(args.iter().fold(f64::INFINITY, |acc, v| {
            let n = v.to_number();
            if n.is_nan() || acc.is_nan() {
                f64::NAN
            } else {
                acc.min(n)
            }
        })),
        "Math.abs" => math(args, f64::abs),
        "Math.floor" => math(args, f64::floor),
        "Math.ceil" => math(args, f64::ceil),
        "Math.round" => math(args, |n| (n + 0.5).floor()),
        "Math.trunc" => math(args, f64::trunc),
        "Math.sqrt" => math(args, f64::sqrt),
        "Math.log" => math(args, f64::ln),
        "Math.exp" => math(args, f64::exp),
        "Math.pow" => JsValue::Num(arg(args, 0).to_number().powf(arg(args, 1).to_number())),
        "JSON.stringify" => match arg(args, 0) {
            JsValue::Undefined => JsValue::Undefined,
            value => {
                let text = serde_json::to_string(&value.to_model())
                    .map_err(|e| type_error(format!("cannot serialize value: {e}")))?;
                JsValue::Str(text)
            }
        },
        "JSON.parse" => {
            let value: Value = serde_json::from_str(&arg(args, 0).to_string())
                .map_err(|e| throw("SyntaxError", format!("JSON.parse: {e}")))?;
            JsValue::from_model(&value)
        }
        "Object.keys" => match arg(args, 0) {
            JsValue::Object(fields) => JsValue::array(fields.borrow().keys().map(JsValue::str).collect()),
            JsValue::Array(items) => {
                JsValue::array((0..items.borrow().len()).map(|i| JsValue::Str(i.to_string())).collect())
            }
            _ => JsValue::array(Vec::new()),
        },
        "Object.values" => match arg(args, 0) {
            JsValue::Object(fields) => JsValue::array(fields.borrow().values().cloned().collect()),
            JsValue::Array(items) => JsValue::array(items.borrow().clone()),
            _ => JsValue::array(Vec::new()),
        },
        other => return Err(type_error(format!("{other} is not a function"))),
    })
}

fn parse_int(text: &str, radix: i64) -> f64 {
    let mut s = text.trim_start();
    let negative = s.starts_with('-');
    if let Some(rest) = s.strip_prefix('-').or_else(|| s.strip_prefix('+')) {
        s = rest;
    }
    let mut radix = if radix == 0 { 10 } else { radix };
    if radix == 16 || radix == 10 {
        if let Some(rest) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            s = rest;
            radix = 16;
        }
    }
    let Ok(radix) = u32::try_from(radix) else {
        return f64::NAN;
    };
    if !(2..=36).contains(&radix) {
        return f64::NAN;
    }
    let digits: Vec<u32> = s.chars().map_while(|c| c.to_digit(radix)).collect();
    if digits.is_empty() {
        return f64::NAN;
    }
    let value = digits
        .iter()
        .fold(0.0, |acc, d| acc * f64::from(radix) + f64::from(*d));
    if negative {
        -value
    } else {
        value
    }
}

fn parse_float(text: &str) -> f64 {
    let s = text.trim_start();
    for prefix in ["Infinity", "+Infinity"] {
        if s.starts_with(prefix) {
            return f64::INFINITY;
        }
    }
    if s.starts_with("-Infinity") {
        return f64::NEG_INFINITY;
    }
    let candidate: String = s
        .chars()
        .take_while(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-'))
        .collect();
    let ends = candidate.char_indices().map(|(i, _)| i + 1).rev();
    for end in ends {
        if let Ok(n) = candidate[..end].parse::<f64>() {
            return n;
        }
    }
    f64::NAN
}

pub(super) fn get_property(object: &JsValue, name: &str) -> Completion<JsValue> {
    Ok(match object {
        JsValue::Str(s) if name == "length" => JsValue::Num(s.chars().count() as f64),
        JsValue::Array(items) if name == "length" => JsValue::Num(items.borrow().len() as f64),
        JsValue::Object(fields) => fields.borrow().get(name).cloned().unwrap_or(JsValue::Undefined),
        JsValue::RegExp(re) => match name {
            "source" => JsValue::str(re.source.as_str()),
            "flags" => JsValue::str(re.flags.as_str()),
            "global" => JsValue::Bool(re.flags.contains('g')),
            _ => JsValue::Undefined,
        },
        JsValue::Undefined | JsValue::Null => {
            return Err(type_error(format!(
                "Cannot read properties of {object} (reading '{name}')"
            )))
        }
        _ => JsValue::Undefined,
    })
}

pub(super) fn call_method(
    interp: &mut Interpreter<'_>,
    receiver: &JsValue,
    name: &str,
    args: Vec<JsValue>,
) -> Completion<JsValue> {
    match receiver {
        JsValue::Str(s) => string_method(s, name, &args),
        JsValue::Array(items) => array_method(interp, receiver, items, name, args),
        JsValue::RegExp(re) => regexp_method(re, name, &args),
        JsValue::Num(n) if name == "toFixed" => {
            let digits = usize::try_from(int_arg(&args, 0, 0).clamp(0, 100)).unwrap_or(0);
            Ok(JsValue::Str(format!("{n:.digits$}")))
        }
        JsValue::Undefined | JsValue::Null => Err(type_error(format!(
            "Cannot read properties of {receiver} (reading '{name}')"
        ))),
        _ if name == "toString" => Ok(JsValue::Str(receiver.to_string())),
        _ => Err(type_error(format!("{}.{name} is not a function", receiver.type_of()))),
    }
}

fn char_index_of(haystack: &str, needle: &str, from: usize) -> Option<usize> {
    let start = haystack.char_indices().nth(from).map_or(haystack.len(), |(b, _)| b);
    haystack[start..]
        .find(needle)
        .map(|b| from + haystack[start..start + b].chars().count())
}

fn substring(chars: &[char], start: usize, end: usize) -> JsValue {
    if start >= end {
        return JsValue::str("");
    }
    JsValue::Str(chars[start..end].iter().collect())
}

fn pattern_arg(value: &JsValue) -> Completion<Rc<JsRegExp>> {
    match value {
        JsValue::RegExp(re) => Ok(Rc::clone(re)),
        other => JsRegExp::new(&regex::escape(&other.to_string()), "")
            .map(Rc::new)
            .map_err(|m| throw("SyntaxError", m)),
    }
}

fn string_method(s: &str, name: &str, args: &[JsValue]) -> Completion<JsValue> {
    let text = |i: usize| arg(args, i).to_string();
    let chars: Vec<char> = s.chars().collect();
    let len = chars.len();
    Ok(match name {
        "trim" => JsValue::str(s.trim()),
        "trimStart" => JsValue::str(s.trim_start()),
        "trimEnd" => JsValue::str(s.trim_end()),
        "toLowerCase" => JsValue::Str(s.to_lowercase()),
        "toUpperCase" => JsValue::Str(s.to_uppercase()),
        "toString" => JsValue::str(s),
        "includes" => JsValue::Bool(s.contains(&text(0))),
        "startsWith" => JsValue::Bool(s.starts_with(&text(0))),
        "endsWith" => JsValue::Bool(s.ends_with(&text(0))),
        "indexOf" => {
            let from = relative(int_arg(args, 1, 0).max(0), len);
            JsValue::Num(char_index_of(s, &text(0), from).map_or(-1.0, |i| i as f64))
        }
        "lastIndexOf" => {
            let needle = text(0);
            JsValue::Num(
                s.rfind(&needle)
                    .map_or(-1.0, |b| s[..b].chars().count() as f64),
            )
        }
        "charAt" => {
            let i = int_arg(args, 0, 0);
            usize::try_from(i)
                .ok()
                .and_then(|i| chars.get(i))
                .map_or_else(|| JsValue::str(""), |c| JsValue::Str(c.to_string()))
        }
        "slice" => {
            let start = relative(int_arg(args, 0, 0), len);
            let end = relative(int_arg(args, 1, len as i64), len);
            substring(&chars, start, end)
        }
        "substring" => {
            let clamp = |n: i64| usize::try_from(n.max(0)).unwrap_or(0).min(len);
            let a = clamp(int_arg(args, 0, 0));
            let b = clamp(int_arg(args, 1, len as i64));
            substring(&chars, a.min(b), a.max(b))
        }
        "concat" => JsValue::Str(args.iter().fold(s.to_string(), |mut acc, a| {
            acc.push_str(&a.to_string());
            acc
        })),
        "repeat" => {
            let count = usize::try_from(int_arg(args, 0, 0))
                .map_err(|_| throw("RangeError", "Invalid count value"))?;
            if count.saturating_mul(s.len()) > 1 << 24 {
                return Err(throw("RangeError", "Invalid string length"));
            }
            JsValue::Str(s.repeat(count))
        }
        "split" => {
            let parts: Vec<JsValue> = match arg(args, 0) {
                JsValue::Undefined => vec![JsValue::str(s)],
                JsValue::RegExp(re) => re.regex.split(s).map(JsValue::str).collect(),
                sep => {
                    let sep = sep.to_string();
                    if sep.is_empty() {
                        chars.iter().map(|c| JsValue::Str(c.to_string())).collect()
                    } else {
                        s.split(sep.as_str()).map(JsValue::str).collect()
                    }
                }
            };
            JsValue::array(parts)
        }
        "replace" | "replaceAll" => {
            let re = pattern_arg(&arg(args, 0))?;
            let replacement = text(1);
            let all = name == "replaceAll" || re.flags.contains('g');
            let replaced = if all {
                re.regex.replace_all(s, replacement.as_str())
            } else {
                re.regex.replace(s, replacement.as_str())
            };
            JsValue::Str(replaced.into_owned())
        }
        "match" => {
            let re = pattern_arg(&arg(args, 0))?;
            if re.flags.contains('g') {
                let found: Vec<JsValue> = re.regex.find_iter(s).map(|m| JsValue::str(m.as_str())).collect();
                if found.is_empty() {
                    JsValue::Null
                } else {
                    JsValue::array(found)
                }
            } else {
                captures(&re, s)
            }
        }
        "search" => {
            let re = pattern_arg(&arg(args, 0))?;
            JsValue::Num(
                re.regex
                    .find(s)
                    .map_or(-1.0, |m| s[..m.start()].chars().count() as f64),
            )
        }
        _ => return Err(type_error(format!("string.{name} is not a function"))),
    })
}

/// First match and its groups, or null.
fn captures(re: &JsRegExp, s: &str) -> JsValue {
    match re.regex.captures(s) {
        None => JsValue::Null,
        Some(caps) => JsValue::array(
            caps.iter()
                .map(|m| m.map_or(JsValue::Undefined, |m| JsValue::str(m.as_str())))
                .collect(),
        ),
    }
}

fn regexp_method(re: &JsRegExp, name: &str, args: &[JsValue]) -> Completion<JsValue> {
    let subject = arg(args, 0).to_string();
    Ok(match name {
        "test" => JsValue::Bool(re.regex.is_match(&subject)),
        "exec" => captures(re, &subject),
        "toString" => JsValue::Str(format!("/{}/{}", re.source, re.flags)),
        _ => return Err(type_error(format!("RegExp.{name} is not a function"))),
    })
}

fn array_method(
    interp: &mut Interpreter<'_>,
    receiver: &JsValue,
    items: &Rc<RefCell<Vec<JsValue>>>,
    name: &str,
    args: Vec<JsValue>,
) -> Completion<JsValue> {
    let snapshot = || items.borrow().clone();

    Ok(match name {
        "push" => {
            let mut items = items.borrow_mut();
            items.extend(args);
            JsValue::Num(items.len() as f64)
        }
        "pop" => items.borrow_mut().pop().unwrap_or(JsValue::Undefined),
        "shift" => {
            let mut items = items.borrow_mut();
            if items.is_empty() {
                JsValue::Undefined
            } else {
                items.remove(0)
            }
        }
        "unshift" => {
            let mut items = items.borrow_mut();
            for (i, value) in args.into_iter().enumerate() {
                items.insert(i, value);
            }
            JsValue::Num(items.len() as f64)
        }
        "join" => {
            let sep = match arg(&args, 0) {
                JsValue::Undefined => ",".to_string(),
                sep => sep.to_string(),
            };
            let parts: Vec<String> = items
                .borrow()
                .iter()
                .map(|v| match v {
                    JsValue::Undefined | JsValue::Null => String::new(),
                    v => v.to_string(),
                })
                .collect();
            JsValue::Str(parts.join(&sep))
        }
        "toString" => JsValue::Str(receiver.to_string()),
        "indexOf" => {
            let needle = arg(&args, 0);
            JsValue::Num(
                items
                    .borrow()
                    .iter()
                    .position(|v| strict_eq(v, &needle))
                    .map_or(-1.0, |i| i as f64),
            )
        }
        "includes" => {
            let needle = arg(&args, 0);
            let nan = matches!(needle, JsValue::Num(n) if n.is_nan());
            JsValue::Bool(items.borrow().iter().any(|v| {
                strict_eq(v, &needle) || (nan && matches!(v, JsValue::Num(n) if n.is_nan()))
            }))
        }
        "slice" => {
            let items = items.borrow();
            let len = items.len();
            let start = relative(int_arg(&args, 0, 0), len);
            let end = relative(int_arg(&args, 1, len as i64), len);
            JsValue::array(if start < end { items[start..end].to_vec() } else { Vec::new() })
        }
        "concat" => {
            let mut out = snapshot();
            for value in args {
                match value {
                    JsValue::Array(more) => out.extend(more.borrow().iter().cloned()),
                    other => out.push(other),
                }
            }
            JsValue::array(out)
        }
        "reverse" => {
            items.borrow_mut().reverse();
            receiver.clone()
        }
        "sort" => {
            let mut sorted = snapshot();
            let comparator = arg(&args, 0);
            if comparator.is_callable() {
                let mut failure = None;
                sorted.sort_by(|a, b| {
                    if failure.is_some() {
                        return Ordering::Equal;
                    }
                    match interp.call_value(&comparator, vec![a.clone(), b.clone()]) {
                        Ok(result) => result.to_number().partial_cmp(&0.0).unwrap_or(Ordering::Equal),
                        Err(e) => {
                            failure = Some(e);
                            Ordering::Equal
                        }
                    }
                });
                if let Some(e) = failure {
                    return Err(e);
                }
            } else {
                sorted.sort_by_key(ToString::to_string);
            }
            *items.borrow_mut() = sorted;
            receiver.clone()
        }
        "map" | "filter" | "forEach" | "some" | "every" | "find" | "findIndex" => {
            let f = callable(arg(&args, 0))?;
            let mut mapped = Vec::new();
            for (i, item) in snapshot().into_iter().enumerate() {
                interp.tick()?;
                let result = interp.call_value(&f, vec![item.clone(), JsValue::Num(i as f64), receiver.clone()])?;
                match name {
                    "map" => mapped.push(result),
                    "filter" if result.truthy() => mapped.push(item),
                    "some" if result.truthy() => return Ok(JsValue::Bool(true)),
                    "every" if !result.truthy() => return Ok(JsValue::Bool(false)),
                    "find" if result.truthy() => return Ok(item),
                    "findIndex" if result.truthy() => return Ok(JsValue::Num(i as f64)),
                    _ => {}
                }
            }
            match name {
                "map" | "filter" => JsValue::array(mapped),
                "some" => JsValue::Bool(false),
                "every" => JsValue::Bool(true),
                "findIndex" => JsValue::Num(-1.0),
                _ => JsValue::Undefined,
            }
        }
        "reduce" => {
            let f = callable(arg(&args, 0))?;
            let mut values = snapshot().into_iter().enumerate();
            let mut acc = match args.get(1) {
                Some(initial) => initial.clone(),
                None => match values.next() {
                    Some((_, first)) => first,
                    None => return Err(type_error("Reduce of empty array with no initial value")),
                },
            };
            for (i, item) in values {
                interp.tick()?;
                acc = interp.call_value(&f, vec![acc, item, JsValue::Num(i as f64), receiver.clone()])?;
            }
            acc
        }
        _ => return Err(type_error(format!("array.{name} is not a function"))),
    })
}

fn callable(value: JsValue) -> Completion<JsValue> {
    if value.is_callable() {
        Ok(value)
    } else {
        Err(type_error(format!("{} is not a function", value.type_of())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_int_and_float() {
        assert_eq!(parse_int("42px", 10), 42.0);
        assert_eq!(parse_int("  -17", 10), -17.0);
        assert_eq!(parse_int("0x1f", 16), 31.0);
        assert_eq!(parse_int("ff", 16), 255.0);
        assert!(parse_int("px", 10).is_nan());
        assert_eq!(parse_float("3.5e2 units"), 350.0);
        assert_eq!(parse_float(".5"), 0.5);
        assert!(parse_float("abc").is_nan());
    }

    #[test]
    fn test_relative_indices() {
        assert_eq!(relative(-1, 5), 4);
        assert_eq!(relative(-10, 5), 0);
        assert_eq!(relative(7, 5), 5);
    }

    #[test]
    fn test_char_index_of_counts_characters() {
        assert_eq!(char_index_of("héllo", "l", 0), Some(2));
        assert_eq!(char_index_of("héllo", "l", 3), Some(3));
        assert_eq!(char_index_of("héllo", "z", 0), None);
    }
}
