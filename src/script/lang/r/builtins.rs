//! Base functions of the `r` rule language.

use super::interp::{
    index_element, membership, runtime, Args, Ctl, Eval, Interpreter, MAX_VECTOR_LENGTH,
};
use super::value::{combine, RValue, Rank};
use crate::model::format_number;
use crate::script::lang::scope::Scope;
use crate::script::ScriptError;
use regex::{Regex, RegexBuilder};
use std::collections::HashSet;

const BUILTINS: &[&str] = &[
    "c", "list", "length", "nchar", "sum", "mean", "min", "max", "range", "any", "all", "is.na",
    "is.null", "unique", "duplicated", "rev", "sort", "paste", "paste0", "grepl", "sub", "gsub",
    "toupper", "tolower", "trimws", "as.numeric", "as.double", "as.integer", "as.character",
    "as.logical", "ifelse", "which", "seq", "seq_len", "seq_along", "rep", "names", "unlist",
    "lapply", "sapply", "vapply", "Filter", "Reduce", "do.call", "substr", "substring", "strsplit",
    "startsWith", "endsWith", "isTRUE", "isFALSE", "nzchar", "round", "abs", "floor", "ceiling",
    "sqrt", "exp", "log", "trunc", "identical", "is.numeric", "is.character", "is.logical",
    "is.list", "is.function", "numeric", "character", "logical", "integer", "head", "tail",
    "setdiff", "union", "intersect", "match", "sprintf", "conditionMessage", "exists", "ls", "stop",
    "stopifnot", "warning", "message", "print", "cat", "invisible", "return", "suppressWarnings",
    "suppressMessages", "tryCatch", "try",
];

pub(super) fn install(globals: &Scope<RValue>) {
    for name in BUILTINS {
        globals.define(name, RValue::Builtin(name));
    }
    globals.define("T", RValue::lgl(true));
    globals.define("F", RValue::lgl(false));
    globals.define("pi", RValue::num(std::f64::consts::PI));
    globals.define("LETTERS", RValue::Character(('A'..='Z').map(|c| Some(c.to_string())).collect()));
    globals.define("letters", RValue::Character(('a'..='z').map(|c| Some(c.to_string())).collect()));
}

/// Bind evaluated arguments to formal names: exact names first, then the
/// remaining positional values in order.
fn bind<const N: usize>(name: &str, args: Args, formals: [&str; N]) -> Eval<[Option<RValue>; N]> {
    let mut bound: [Option<RValue>; N] = std::array::from_fn(|_| None);
    let mut positional = Vec::new();
    for (arg_name, value) in args {
        match arg_name.and_then(|n| formals.iter().position(|f| *f == n).map(|i| (n, i))) {
            Some((_, i)) if bound[i].is_none() => bound[i] = Some(value),
            Some((n, _)) => return Err(runtime(format!("formal argument \"{n}\" matched by multiple actual arguments"))),
            None => positional.push(value),
        }
    }
    let mut positional = positional.into_iter();
    for slot in bound.iter_mut().filter(|slot| slot.is_none()) {
        match positional.next() {
            Some(value) => *slot = Some(value),
            None => break,
        }
    }
    if let Some(extra) = positional.next() {
        return Err(runtime(format!("unused argument ({extra}) in {name}()")));
    }
    Ok(bound)
}

fn required(name: &str, formal: &str, value: Option<RValue>) -> Eval<RValue> {
    value.ok_or_else(|| runtime(format!("argument \"{formal}\" is missing, with no default in {name}()")))
}

/// Split off named options, leaving the `...` values.
fn options<const N: usize>(args: Args, names: [&str; N]) -> (Vec<RValue>, [Option<RValue>; N]) {
    let mut found: [Option<RValue>; N] = std::array::from_fn(|_| None);
    let mut rest = Vec::new();
    for (arg_name, value) in args {
        match arg_name.and_then(|n| names.iter().position(|f| *f == n)) {
            Some(i) => found[i] = Some(value),
            None => rest.push(value),
        }
    }
    (rest, found)
}

fn flag(value: Option<&RValue>) -> bool {
    value.is_some_and(|v| v.logicals().first().copied().flatten() == Some(true))
}

fn first_number(value: Option<&RValue>, default: f64) -> f64 {
    value
        .and_then(|v| v.doubles().first().copied().flatten())
        .unwrap_or(default)
}

fn first_string(value: Option<&RValue>) -> Option<String> {
    value.and_then(|v| v.strings().into_iter().next().flatten())
}

fn count(value: f64, what: &str) -> Eval<usize> {
    if value.is_nan() || value < 0.0 || value > MAX_VECTOR_LENGTH as f64 {
        return Err(runtime(format!("invalid '{what}' argument")));
    }
    Ok(value as usize)
}

fn numbers(values: &[RValue], function: &str) -> Eval<Vec<Option<f64>>> {
    let mut out = Vec::new();
    for value in values {
        match value {
            RValue::Null => {}
            RValue::Logical(_) | RValue::Double(_) => out.extend(value.doubles()),
            other => {
                return Err(runtime(format!(
                    "invalid 'type' ({}) of argument in {function}()",
                    other.type_name()
                )))
            }
        }
    }
    Ok(out)
}

fn map_doubles(value: &RValue, f: impl Fn(f64) -> f64) -> Eval<RValue> {
    if !matches!(value, RValue::Null | RValue::Logical(_) | RValue::Double(_)) {
        return Err(runtime("non-numeric argument to mathematical function"));
    }
    Ok(RValue::Double(value.doubles().into_iter().map(|n| n.map(&f)).collect()))
}

fn map_strings(value: &RValue, f: impl Fn(&str) -> String) -> RValue {
    RValue::Character(value.strings().iter().map(|s| s.as_deref().map(&f)).collect())
}

/// Round half to even, as R does.
fn round_half_even(x: f64, digits: i32) -> f64 {
    let scale = 10f64.powi(digits);
    let scaled = x * scale;
    let floor = scaled.floor();
    let diff = scaled - floor;
    let rounded = if (diff - 0.5).abs() < 1e-9 {
        if floor % 2.0 == 0.0 {
            floor
        } else {
            floor + 1.0
        }
    } else {
        scaled.round()
    };
    rounded / scale
}

fn compile(pattern: &str, ignore_case: bool, fixed: bool) -> Eval<Regex> {
    let source = if fixed { regex::escape(pattern) } else { pattern.to_string() };
    RegexBuilder::new(&source)
        .case_insensitive(ignore_case)
        .build()
        .map_err(|e| runtime(format!("invalid regular expression '{pattern}': {e}")))
}

/// Translate `\\1` back-references to the regex crate's `${1}`.
fn replacement(text: &str, fixed: bool) -> String {
    let escaped = text.replace('$', "$$");
    if fixed {
        return escaped;
    }
    let mut out = String::new();
    let mut chars = escaped.chars().peekable();
    while let Some(c) = chars.next() {
        match (c, chars.peek()) {
            ('\\', Some(d)) if d.is_ascii_digit() => {
                out.push_str(&format!("${{{d}}}"));
                chars.next();
            }
            ('\\', Some('\\')) => {
                out.push('\\');
                chars.next();
            }
            _ => out.push(c),
        }
    }
    out
}

/// Key for set operations and duplicate detection.
fn element_keys(value: &RValue) -> Vec<String> {
    match value {
        RValue::List(items, _) => items.iter().map(ToString::to_string).collect(),
        other => other
            .strings()
            .into_iter()
            .map(|s| s.map_or_else(|| "\u{0}NA".to_string(), |s| s))
            .collect(),
    }
}

fn unique(value: &RValue) -> RValue {
    let mut seen = HashSet::new();
    let keep: Vec<RValue> = element_keys(value)
        .into_iter()
        .zip(value.elements())
        .filter(|(key, _)| seen.insert(key.clone()))
        .map(|(_, element)| element)
        .collect();
    rebuild(value, keep)
}

/// Reassemble elements taken from `like` into the same kind of vector.
fn rebuild(like: &RValue, elements: Vec<RValue>) -> RValue {
    match like {
        RValue::List(..) => RValue::list(elements),
        RValue::Null => RValue::Null,
        other => combine(&elements).coerce(other.rank()),
    }
}

fn unlist(value: &RValue) -> RValue {
    match value {
        RValue::List(items, _) => combine(&items.iter().map(unlist).collect::<Vec<_>>()),
        other => other.clone(),
    }
}

fn paste(pieces: &[RValue], sep: &str, collapse: Option<&str>) -> RValue {
    let columns: Vec<Vec<String>> = pieces
        .iter()
        .filter(|p| p.len() > 0)
        .map(|p| p.strings().into_iter().map(|s| s.unwrap_or_else(|| "NA".to_string())).collect())
        .collect();
    let n = columns.iter().map(Vec::len).max().unwrap_or(0);
    let rows: Vec<String> = (0..n)
        .map(|i| {
            columns
                .iter()
                .map(|col| col[i % col.len()].as_str())
                .collect::<Vec<_>>()
                .join(sep)
        })
        .collect();
    match collapse {
        Some(collapse) => RValue::chr(rows.join(collapse)),
        None => RValue::Character(rows.into_iter().map(Some).collect()),
    }
}

fn sprintf(format: &str, args: &[RValue], row: usize) -> Eval<String> {
    let mut out = String::new();
    let mut chars = format.chars().peekable();
    let mut next_arg = 0;
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let mut spec = String::new();
        while let Some(&d) = chars.peek() {
            if d.is_ascii_digit() || d == '.' || d == '-' {
                spec.push(d);
                chars.next();
            } else {
                break;
            }
        }
        let conversion = chars
            .next()
            .ok_or_else(|| runtime("unrecognised format specification '%'"))?;
        if conversion == '%' {
            out.push('%');
            continue;
        }
        let arg = args
            .get(next_arg)
            .ok_or_else(|| runtime("too few arguments"))?;
        next_arg += 1;
        let left = spec.starts_with('-');
        let spec = spec.trim_start_matches('-');
        let (width, precision) = match spec.split_once('.') {
            Some((w, p)) => (w.parse::<usize>().unwrap_or(0), p.parse::<usize>().ok()),
            None => (spec.parse::<usize>().unwrap_or(0), None),
        };
        let i = if arg.len() == 0 { 0 } else { row % arg.len() };
        let text = match conversion {
            's' => arg.strings().get(i).cloned().flatten().unwrap_or_else(|| "NA".into()),
            'd' | 'i' => match arg.doubles().get(i).copied().flatten() {
                Some(n) if n.fract() == 0.0 => format!("{}", n as i64),
                Some(_) => return Err(runtime("invalid format '%d'; use format %f, %e, %g or %a for numeric objects")),
                None => "NA".into(),
            },
            'f' | 'e' | 'g' => match arg.doubles().get(i).copied().flatten() {
                Some(n) if conversion == 'e' => format!("{:.*e}", precision.unwrap_or(6), n),
                Some(n) if conversion == 'g' => format_number(n),
                Some(n) => format!("{:.*}", precision.unwrap_or(6), n),
                None => "NA".into(),
            },
            other => return Err(runtime(format!("unrecognised format specification '%{other}'"))),
        };
        let pad = width.saturating_sub(text.chars().count());
        if left {
            out.push_str(&text);
            out.push_str(&" ".repeat(pad));
        } else {
            out.push_str(&" ".repeat(pad));
            out.push_str(&text);
        }
    }
    Ok(out)
}

fn apply_each(interp: &mut Interpreter<'_>, name: &str, args: Args) -> Eval<Vec<RValue>> {
    let (mut rest, _) = options(args, []);
    if rest.len() < 2 {
        return Err(runtime(format!("argument \"FUN\" is missing, with no default in {name}()")));
    }
    let extra: Vec<RValue> = rest.split_off(2);
    let function = rest.pop().unwrap_or(RValue::Null);
    let collection = rest.pop().unwrap_or(RValue::Null);
    let mut results = Vec::with_capacity(collection.len());
    for element in collection.elements() {
        interp.tick()?;
        let mut call_args: Args = vec![(None, element)];
        call_args.extend(extra.iter().cloned().map(|v| (None, v)));
        results.push(interp.call_function(&function, call_args)?);
    }
    Ok(results)
}

fn simplify(results: Vec<RValue>) -> RValue {
    if results.iter().all(|r| r.is_atomic() && r.len() == 1) && !results.is_empty() {
        combine(&results)
    } else if results.is_empty() {
        RValue::list(Vec::new())
    } else {
        RValue::list(results)
    }
}

pub(super) fn call(interp: &mut Interpreter<'_>, name: &str, args: Args) -> Eval<RValue> {
    let value = match name {
        "c" => {
            let (values, _) = options(args, []);
            combine(&values)
        }
        "list" => {
            let named = args.iter().any(|(n, _)| n.is_some());
            let names = args.iter().map(|(n, _)| n.clone().unwrap_or_default()).collect();
            RValue::List(args.into_iter().map(|(_, v)| v).collect(), named.then_some(names))
        }
        "length" => {
            let [x] = bind(name, args, ["x"])?;
            RValue::num(x.map_or(0, |x| x.len()) as f64)
        }
        "nchar" => {
            let [x] = bind(name, args, ["x"])?;
            let x = required(name, "x", x)?;
            RValue::Double(
                x.strings()
                    .iter()
                    .map(|s| Some(s.as_ref().map_or(2.0, |s| s.chars().count() as f64)))
                    .collect(),
            )
        }
        "sum" | "mean" => {
            let (values, [na_rm]) = options(args, ["na.rm"]);
            let mut numbers = numbers(&values, name)?;
            if flag(na_rm.as_ref()) {
                numbers.retain(|n| n.is_some_and(|n| !n.is_nan()));
            }
            let present: Option<Vec<f64>> = numbers.iter().copied().collect();
            match present {
                None => RValue::Double(vec![None]),
                Some(values) if name == "sum" => RValue::num(values.iter().sum()),
                Some(values) if values.is_empty() => RValue::num(f64::NAN),
                Some(values) => RValue::num(values.iter().sum::<f64>() / values.len() as f64),
            }
        }
        "min" | "max" | "range" => {
            let (values, [na_rm]) = options(args, ["na.rm"]);
            let drop_na = flag(na_rm.as_ref());
            if values.iter().any(|v| matches!(v, RValue::Character(_))) {
                let mut strings: Vec<Option<String>> = values.iter().flat_map(RValue::strings).collect();
                if drop_na {
                    strings.retain(Option::is_some);
                }
                let present: Option<Vec<String>> = strings.into_iter().collect();
                let Some(mut present) = present else {
                    return Ok(RValue::Character(vec![None]));
                };
                if present.is_empty() {
                    return Err(runtime(format!("no non-missing arguments to {name}")));
                }
                present.sort();
                let (lo, hi) = (present[0].clone(), present[present.len() - 1].clone());
                match name {
                    "min" => RValue::chr(lo),
                    "max" => RValue::chr(hi),
                    _ => RValue::Character(vec![Some(lo), Some(hi)]),
                }
            } else {
                let mut numbers = numbers(&values, name)?;
                if drop_na {
                    numbers.retain(Option::is_some);
                }
                let present: Option<Vec<f64>> = numbers.into_iter().collect();
                let Some(present) = present else {
                    return Ok(RValue::Double(vec![None]));
                };
                let lo = present.iter().copied().fold(f64::INFINITY, f64::min);
                let hi = present.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                match name {
                    "min" => RValue::num(lo),
                    "max" => RValue::num(hi),
                    _ => RValue::Double(vec![Some(lo), Some(hi)]),
                }
            }
        }
        "any" | "all" => {
            let (values, [na_rm]) = options(args, ["na.rm"]);
            let mut logicals: Vec<Option<bool>> = values.iter().flat_map(RValue::logicals).collect();
            if flag(na_rm.as_ref()) {
                logicals.retain(Option::is_some);
            }
            let target = name == "any";
            if logicals.contains(&Some(target)) {
                RValue::lgl(target)
            } else if logicals.contains(&None) {
                RValue::na()
            } else {
                RValue::lgl(!target)
            }
        }
        "is.na" => {
            let [x] = bind(name, args, ["x"])?;
            let x = required(name, "x", x)?;
            RValue::Logical((0..x.len()).map(|i| Some(x.is_na_at(i))).collect())
        }
        "is.null" => RValue::lgl(matches!(args.first(), Some((_, RValue::Null)))),
        "unique" => {
            let [x] = bind(name, args, ["x"])?;
            unique(&required(name, "x", x)?)
        }
        "duplicated" => {
            let [x] = bind(name, args, ["x"])?;
            let mut seen = HashSet::new();
            RValue::Logical(
                element_keys(&required(name, "x", x)?)
                    .into_iter()
                    .map(|key| Some(!seen.insert(key)))
                    .collect(),
            )
        }
        "rev" => {
            let [x] = bind(name, args, ["x"])?;
            let x = required(name, "x", x)?;
            let mut elements = x.elements();
            elements.reverse();
            rebuild(&x, elements)
        }
        "sort" => {
            let [x, decreasing] = bind(name, args, ["x", "decreasing"])?;
            let x = required(name, "x", x)?;
            let mut elements: Vec<RValue> = (0..x.len()).filter(|i| !x.is_na_at(*i)).map(|i| x.element(i)).collect();
            match &x {
                RValue::Character(_) => elements.sort_by_key(|e| e.strings().swap_remove(0)),
                RValue::Logical(_) | RValue::Double(_) => elements.sort_by(|a, b| {
                    a.doubles()[0]
                        .partial_cmp(&b.doubles()[0])
                        .unwrap_or(std::cmp::Ordering::Equal)
                }),
                RValue::Null => return Ok(RValue::Null),
                _ => return Err(runtime("'x' must be atomic")),
            }
            if flag(decreasing.as_ref()) {
                elements.reverse();
            }
            rebuild(&x, elements)
        }
        "paste" | "paste0" => {
            let (pieces, [sep, collapse]) = options(args, ["sep", "collapse"]);
            let sep = if name == "paste0" {
                String::new()
            } else {
                first_string(sep.as_ref()).unwrap_or_else(|| " ".to_string())
            };
            let collapse = collapse.filter(|c| !matches!(c, RValue::Null));
            paste(&pieces, &sep, first_string(collapse.as_ref()).as_deref())
        }
        "grepl" => {
            let [pattern, x, ignore_case, fixed] = bind(name, args, ["pattern", "x", "ignore.case", "fixed"])?;
            let pattern = first_string(pattern.as_ref()).ok_or_else(|| runtime("invalid 'pattern' argument"))?;
            let re = compile(&pattern, flag(ignore_case.as_ref()), flag(fixed.as_ref()))?;
            let x = required(name, "x", x)?;
            RValue::Logical(
                x.strings()
                    .iter()
                    .map(|s| Some(s.as_deref().is_some_and(|s| re.is_match(s))))
                    .collect(),
            )
        }
        "sub" | "gsub" => {
            let [pattern, replace, x, ignore_case, fixed] =
                bind(name, args, ["pattern", "replacement", "x", "ignore.case", "fixed"])?;
            let fixed = flag(fixed.as_ref());
            let pattern = first_string(pattern.as_ref()).ok_or_else(|| runtime("invalid 'pattern' argument"))?;
            let re = compile(&pattern, flag(ignore_case.as_ref()), fixed)?;
            let with = replacement(&first_string(replace.as_ref()).unwrap_or_default(), fixed);
            let x = required(name, "x", x)?;
            map_strings(&x, |s| {
                if name == "gsub" {
                    re.replace_all(s, with.as_str()).into_owned()
                } else {
                    re.replace(s, with.as_str()).into_owned()
                }
            })
        }
        "toupper" | "tolower" => {
            let [x] = bind(name, args, ["x"])?;
            let x = required(name, "x", x)?;
            if name == "toupper" {
                map_strings(&x, str::to_uppercase)
            } else {
                map_strings(&x, str::to_lowercase)
            }
        }
        "trimws" => {
            let [x, which] = bind(name, args, ["x", "which"])?;
            let x = required(name, "x", x)?;
            match first_string(which.as_ref()).as_deref() {
                Some("left") => map_strings(&x, |s| s.trim_start().to_string()),
                Some("right") => map_strings(&x, |s| s.trim_end().to_string()),
                _ => map_strings(&x, |s| s.trim().to_string()),
            }
        }
        "as.numeric" | "as.double" => {
            let [x] = bind(name, args, ["x"])?;
            RValue::Double(x.map(|x| x.doubles()).unwrap_or_default())
        }
        "as.integer" => {
            let [x] = bind(name, args, ["x"])?;
            RValue::Double(
                x.map(|x| x.doubles())
                    .unwrap_or_default()
                    .into_iter()
                    .map(|n| n.filter(|n| n.is_finite()).map(f64::trunc))
                    .collect(),
            )
        }
        "as.character" => {
            let [x] = bind(name, args, ["x"])?;
            RValue::Character(x.map(|x| x.strings()).unwrap_or_default())
        }
        "as.logical" => {
            let [x] = bind(name, args, ["x"])?;
            RValue::Logical(x.map(|x| x.logicals()).unwrap_or_default())
        }
        "ifelse" => {
            let [test, yes, no] = bind(name, args, ["test", "yes", "no"])?;
            let test = required(name, "test", test)?;
            let yes = required(name, "yes", yes)?;
            let no = required(name, "no", no)?;
            let tests = test.logicals();
            let pick = |branch: &RValue, i: usize| -> Eval<RValue> {
                if branch.len() == 0 {
                    return Err(runtime("replacement has length zero"));
                }
                Ok(branch.element(i % branch.len()))
            };
            let mut out = Vec::with_capacity(tests.len());
            for (i, t) in tests.iter().enumerate() {
                out.push(match t {
                    Some(true) => pick(&yes, i)?,
                    Some(false) => pick(&no, i)?,
                    None => RValue::na(),
                });
            }
            if out.is_empty() {
                RValue::Logical(Vec::new())
            } else {
                combine(&out)
            }
        }
        "which" => {
            let [x] = bind(name, args, ["x"])?;
            RValue::Double(
                x.map(|x| x.logicals())
                    .unwrap_or_default()
                    .iter()
                    .enumerate()
                    .filter(|(_, b)| **b == Some(true))
                    .map(|(i, _)| Some(i as f64 + 1.0))
                    .collect(),
            )
        }
        "seq" => {
            let [from, to, by, length_out] = bind(name, args, ["from", "to", "by", "length.out"])?;
            if to.is_none() && by.is_none() && length_out.is_none() {
                let n = first_number(from.as_ref(), 1.0);
                let len = match &from {
                    Some(v) if v.len() > 1 => v.len(),
                    _ => count(n.floor(), "from")?,
                };
                return Ok(RValue::Double((1..=len).map(|i| Some(i as f64)).collect()));
            }
            let start = first_number(from.as_ref(), 1.0);
            if let Some(length_out) = length_out {
                let n = count(first_number(Some(&length_out), 0.0), "length.out")?;
                let step = match (&to, &by) {
                    (_, Some(by)) => first_number(Some(by), 1.0),
                    (Some(to), None) if n > 1 => (first_number(Some(to), start) - start) / (n - 1) as f64,
                    _ => 1.0,
                };
                return Ok(RValue::Double((0..n).map(|i| Some(start + step * i as f64)).collect()));
            }
            let end = first_number(to.as_ref(), start);
            let step = first_number(by.as_ref(), if end >= start { 1.0 } else { -1.0 });
            if step == 0.0 || (end - start) * step < 0.0 {
                return Err(runtime("wrong sign in 'by' argument"));
            }
            let n = count(((end - start) / step + 1e-10).floor() + 1.0, "by")?;
            RValue::Double((0..n).map(|i| Some(start + step * i as f64)).collect())
        }
        "seq_len" => {
            let [length_out] = bind(name, args, ["length.out"])?;
            let n = count(first_number(length_out.as_ref(), f64::NAN), "length.out")?;
            RValue::Double((1..=n).map(|i| Some(i as f64)).collect())
        }
        "seq_along" => {
            let [x] = bind(name, args, ["along.with"])?;
            RValue::Double((1..=x.map_or(0, |x| x.len())).map(|i| Some(i as f64)).collect())
        }
        "rep" => {
            let [x, times, each, length_out] = bind(name, args, ["x", "times", "each", "length.out"])?;
            let x = required(name, "x", x)?;
            let each = count(first_number(each.as_ref(), 1.0), "each")?;
            let mut elements: Vec<RValue> = x
                .elements()
                .into_iter()
                .flat_map(|e| std::iter::repeat(e).take(each))
                .collect();
            let times = count(first_number(times.as_ref(), 1.0), "times")?;
            if elements.len().saturating_mul(times) > MAX_VECTOR_LENGTH {
                return Err(runtime("invalid 'times' argument"));
            }
            elements = elements.iter().cloned().cycle().take(elements.len() * times).collect();
            if let Some(length_out) = length_out {
                let n = count(first_number(Some(&length_out), 0.0), "length.out")?;
                elements = if elements.is_empty() {
                    Vec::new()
                } else {
                    elements.iter().cloned().cycle().take(n).collect()
                };
            }
            rebuild(&x, elements)
        }
        "names" => {
            let [x] = bind(name, args, ["x"])?;
            match x.as_ref().and_then(RValue::names) {
                Some(names) => RValue::Character(names.iter().cloned().map(Some).collect()),
                None => RValue::Null,
            }
        }
        "unlist" => {
            let [x] = bind(name, args, ["x"])?;
            unlist(&required(name, "x", x)?)
        }
        "lapply" => RValue::list(apply_each(interp, name, args)?),
        "sapply" | "vapply" => {
            let args = args
                .into_iter()
                .filter(|(n, _)| !matches!(n.as_deref(), Some("FUN.VALUE" | "USE.NAMES" | "simplify")))
                .collect();
            simplify(apply_each(interp, name, args)?)
        }
        "Filter" => {
            let [f, x] = bind(name, args, ["f", "x"])?;
            let f = required(name, "f", f)?;
            let x = required(name, "x", x)?;
            let mut kept = Vec::new();
            for element in x.elements() {
                interp.tick()?;
                let keep = interp.call_function(&f, vec![(None, element.clone())])?;
                if keep.logicals().first().copied().flatten() == Some(true) {
                    kept.push(element);
                }
            }
            rebuild(&x, kept)
        }
        "Reduce" => {
            let [f, x, init] = bind(name, args, ["f", "x", "init"])?;
            let f = required(name, "f", f)?;
            let mut elements = required(name, "x", x)?.elements().into_iter();
            let mut acc = match init.or_else(|| elements.next()) {
                Some(acc) => acc,
                None => return Ok(RValue::Null),
            };
            for element in elements {
                interp.tick()?;
                acc = interp.call_function(&f, vec![(None, acc), (None, element)])?;
            }
            acc
        }
        "do.call" => {
            let [what, call_args] = bind(name, args, ["what", "args"])?;
            let what = match required(name, "what", what)? {
                RValue::Character(names) => {
                    let target = names.into_iter().next().flatten().unwrap_or_default();
                    interp
                        .globals()
                        .find(&target, &RValue::is_function)
                        .ok_or_else(|| runtime(format!("could not find function \"{target}\"")))?
                }
                other => other,
            };
            let call_args = call_args.unwrap_or(RValue::Null);
            let names = call_args.names().map(<[String]>::to_vec);
            let forwarded = call_args
                .elements()
                .into_iter()
                .enumerate()
                .map(|(i, v)| {
                    let n = names.as_ref().and_then(|n| n.get(i)).filter(|n| !n.is_empty()).cloned();
                    (n, v)
                })
                .collect();
            return interp.call_function(&what, forwarded);
        }
        "substr" | "substring" => {
            let formals = if name == "substr" { ["x", "start", "stop"] } else { ["text", "first", "last"] };
            let [x, start, stop] = bind(name, args, formals)?;
            let x = required(name, formals[0], x)?;
            let start = first_number(start.as_ref(), 1.0).max(1.0) as usize;
            let stop = first_number(stop.as_ref(), 1_000_000.0).max(0.0) as usize;
            map_strings(&x, |s| {
                s.chars()
                    .skip(start - 1)
                    .take(stop.saturating_sub(start - 1))
                    .collect()
            })
        }
        "strsplit" => {
            let [x, split, fixed] = bind(name, args, ["x", "split", "fixed"])?;
            let x = required(name, "x", x)?;
            let split = first_string(split.as_ref()).unwrap_or_default();
            let re = compile(&split, false, flag(fixed.as_ref()))?;
            RValue::list(
                x.strings()
                    .iter()
                    .map(|s| match s {
                        None => RValue::Character(vec![None]),
                        Some(s) if split.is_empty() => RValue::Character(s.chars().map(|c| Some(c.to_string())).collect()),
                        Some(s) => RValue::Character(re.split(s).map(|p| Some(p.to_string())).collect()),
                    })
                    .collect(),
            )
        }
        "startsWith" | "endsWith" => {
            let [x, affix] = bind(name, args, ["x", if name == "startsWith" { "prefix" } else { "suffix" }])?;
            let affix = first_string(affix.as_ref()).unwrap_or_default();
            let x = required(name, "x", x)?;
            if !matches!(x, RValue::Character(_)) {
                return Err(runtime("non-character object(s)"));
            }
            RValue::Logical(
                x.strings()
                    .iter()
                    .map(|s| {
                        s.as_ref().map(|s| {
                            if name == "startsWith" {
                                s.starts_with(&affix)
                            } else {
                                s.ends_with(&affix)
                            }
                        })
                    })
                    .collect(),
            )
        }
        "isTRUE" | "isFALSE" => {
            let [x] = bind(name, args, ["x"])?;
            let target = name == "isTRUE";
            RValue::lgl(matches!(x, Some(RValue::Logical(v)) if v.as_slice() == [Some(target)]))
        }
        "nzchar" => {
            let [x] = bind(name, args, ["x"])?;
            RValue::Logical(
                x.map(|x| x.strings())
                    .unwrap_or_default()
                    .iter()
                    .map(|s| Some(s.as_ref().map_or(true, |s| !s.is_empty())))
                    .collect(),
            )
        }
        "round" => {
            let [x, digits] = bind(name, args, ["x", "digits"])?;
            let digits = first_number(digits.as_ref(), 0.0) as i32;
            map_doubles(&required(name, "x", x)?, |n| round_half_even(n, digits))?
        }
        "abs" | "floor" | "ceiling" | "sqrt" | "exp" | "trunc" => {
            let [x] = bind(name, args, ["x"])?;
            let f: fn(f64) -> f64 = match name {
                "abs" => f64::abs,
                "floor" => f64::floor,
                "ceiling" => f64::ceil,
                "sqrt" => f64::sqrt,
                "exp" => f64::exp,
                _ => f64::trunc,
            };
            map_doubles(&required(name, "x", x)?, f)?
        }
        "log" => {
            let [x, base] = bind(name, args, ["x", "base"])?;
            let base = first_number(base.as_ref(), std::f64::consts::E);
            map_doubles(&required(name, "x", x)?, |n| n.ln() / base.ln())?
        }
        "identical" => {
            let [x, y] = bind(name, args, ["x", "y"])?;
            RValue::lgl(x == y)
        }
        "is.numeric" => RValue::lgl(matches!(args.first(), Some((_, RValue::Double(_))))),
        "is.character" => RValue::lgl(matches!(args.first(), Some((_, RValue::Character(_))))),
        "is.logical" => RValue::lgl(matches!(args.first(), Some((_, RValue::Logical(_))))),
        "is.list" => RValue::lgl(matches!(args.first(), Some((_, RValue::List(..))))),
        "is.function" => RValue::lgl(args.first().is_some_and(|(_, v)| v.is_function())),
        "numeric" | "integer" | "character" | "logical" => {
            let [length] = bind(name, args, ["length"])?;
            let n = count(first_number(length.as_ref(), 0.0), "length")?;
            match name {
                "character" => RValue::Character(vec![Some(String::new()); n]),
                "logical" => RValue::Logical(vec![Some(false); n]),
                _ => RValue::Double(vec![Some(0.0); n]),
            }
        }
        "head" | "tail" => {
            let [x, n] = bind(name, args, ["x", "n"])?;
            let x = required(name, "x", x)?;
            let len = x.len();
            let n = first_number(n.as_ref(), 6.0);
            let keep = if n < 0.0 {
                len.saturating_sub((-n) as usize)
            } else {
                (n as usize).min(len)
            };
            let elements = x.elements();
            let slice = if name == "head" {
                elements[..keep].to_vec()
            } else {
                elements[len - keep..].to_vec()
            };
            rebuild(&x, slice)
        }
        "setdiff" | "union" | "intersect" => {
            let [x, y] = bind(name, args, ["x", "y"])?;
            let x = x.unwrap_or(RValue::Null);
            let y = y.unwrap_or(RValue::Null);
            let both = combine(&[x.clone(), y.clone()]);
            let (x, y) = (x.coerce(both.rank().max(Rank::Logical)), y.coerce(both.rank().max(Rank::Logical)));
            let y_keys: HashSet<String> = element_keys(&y).into_iter().collect();
            let selected: Vec<RValue> = match name {
                "union" => return Ok(unique(&both)),
                "setdiff" => element_keys(&x)
                    .into_iter()
                    .zip(x.elements())
                    .filter(|(k, _)| !y_keys.contains(k))
                    .map(|(_, e)| e)
                    .collect(),
                _ => element_keys(&x)
                    .into_iter()
                    .zip(x.elements())
                    .filter(|(k, _)| y_keys.contains(k))
                    .map(|(_, e)| e)
                    .collect(),
            };
            unique(&rebuild(&x, selected))
        }
        "match" => {
            let [x, table] = bind(name, args, ["x", "table"])?;
            let x = required(name, "x", x)?;
            let table = table.unwrap_or(RValue::Null);
            RValue::Double(
                membership(&x, &table)
                    .into_iter()
                    .map(|pos| pos.map(|p| p as f64 + 1.0))
                    .collect(),
            )
        }
        "sprintf" => {
            let (mut values, [fmt]) = options(args, ["fmt"]);
            let fmt = match fmt {
                Some(fmt) => fmt,
                None if !values.is_empty() => values.remove(0),
                None => return Err(runtime("'fmt' argument missing")),
            };
            let format = first_string(Some(&fmt)).unwrap_or_default();
            let rows = values.iter().map(RValue::len).max().unwrap_or(1).max(1);
            if values.iter().any(|v| v.len() == 0) {
                return Ok(RValue::Character(Vec::new()));
            }
            let mut out = Vec::with_capacity(rows);
            for row in 0..rows {
                out.push(Some(sprintf(&format, &values, row)?));
            }
            RValue::Character(out)
        }
        "conditionMessage" => {
            let [c] = bind(name, args, ["c"])?;
            index_element(&required(name, "c", c)?, &RValue::chr("message"))?
        }
        "exists" => {
            let [x] = bind(name, args, ["x"])?;
            let target = first_string(x.as_ref()).unwrap_or_default();
            RValue::lgl(interp.globals().get(&target).is_some())
        }
        "ls" => {
            let globals = interp.globals();
            RValue::Character(
                globals
                    .local_names()
                    .into_iter()
                    .filter(|n| globals.get(n).is_some_and(|v| !matches!(v, RValue::Builtin(_))))
                    .map(Some)
                    .collect(),
            )
        }
        "stop" => {
            let (values, _) = options(args, ["call."]);
            let message = paste(&values, "", Some(""));
            return Err(Ctl::Error(ScriptError::Raised(first_string(Some(&message)).unwrap_or_default())));
        }
        "stopifnot" => {
            for (i, (arg_name, value)) in args.iter().enumerate() {
                let holds = value.len() > 0 && value.logicals().iter().all(|b| *b == Some(true));
                if !holds {
                    let label = arg_name.clone().unwrap_or_else(|| format!("argument {}", i + 1));
                    return Err(Ctl::Error(ScriptError::Raised(format!("{label} is not all TRUE"))));
                }
            }
            RValue::Null
        }
        "warning" | "message" | "cat" | "print" => {
            let (values, _) = options(args, ["sep", "call.", "appendLF"]);
            let text: Vec<String> = values.iter().map(ToString::to_string).collect();
            tracing::debug!(environment = "r", function = name, "{}", text.join(" "));
            if name == "print" {
                values.into_iter().next().unwrap_or(RValue::Null)
            } else {
                RValue::Null
            }
        }
        "invisible" | "suppressWarnings" | "suppressMessages" => {
            args.into_iter().next().map_or(RValue::Null, |(_, v)| v)
        }
        "return" => {
            let value = args.into_iter().next().map_or(RValue::Null, |(_, v)| v);
            return Err(Ctl::Return(value));
        }
        "tryCatch" | "try" => {
            // Reached only through do.call/lapply; arguments are already evaluated
            args.into_iter().next().map_or(RValue::Null, |(_, v)| v)
        }
        other => return Err(runtime(format!("could not find function \"{other}\""))),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_half_even() {
        assert_eq!(round_half_even(0.5, 0), 0.0);
        assert_eq!(round_half_even(2.5, 0), 2.0);
        assert_eq!(round_half_even(3.5, 0), 4.0);
        assert_eq!(round_half_even(3.14159, 2), 3.14);
    }

    #[test]
    fn test_replacement_backreferences() {
        assert_eq!(replacement("\\1-\\2", false), "${1}-${2}");
        assert_eq!(replacement("$5", false), "$$5");
    }

    #[test]
    fn test_paste_recycles() {
        let out = paste(
            &[RValue::chr("a"), RValue::Double(vec![Some(1.0), Some(2.0)])],
            "_",
            None,
        );
        assert!(out == RValue::Character(vec![Some("a_1".into()), Some("a_2".into())]));
        let collapsed = paste(&[RValue::Character(vec![Some("x".into()), Some("y".into())])], " ", Some("+"));
        assert!(collapsed == RValue::chr("x+y"));
    }

    #[test]
    fn test_sprintf_formats() {
        let out = sprintf("%s has %d rows (%.1f%%)", &[RValue::chr("t"), RValue::num(3.0), RValue::num(12.345)], 0);
        assert_eq!(out.ok().as_deref(), Some("t has 3 rows (12.3%)"));
    }
}
