//! JSON documents queried with jq-style paths.

use super::{Document, DocumentKind, Item, Query};
use crate::model::{Namespace, SelectorSyntax, Value};
use serde_json::Value as Json;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid path at {position}: {message}")]
pub struct JsonPathError {
    pub position: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Field(String),
    Index(i64),
    Iterate,
    Recurse,
}

/// A parsed path such as `.dataset.creators[].name` or `..title`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonPath {
    segments: Vec<Segment>,
}

impl JsonPath {
    pub fn parse(source: &str) -> Result<Self, JsonPathError> {
        let chars: Vec<char> = source.trim().chars().collect();
        let error = |position: usize, message: &str| JsonPathError {
            position,
            message: message.to_string(),
        };
        if chars.is_empty() {
            return Err(error(0, "empty path"));
        }
        if chars[0] != '.' && chars[0] != '[' {
            return Err(error(0, "path must start with '.'"));
        }

        let mut segments = Vec::new();
        let mut i = 0;
        while i < chars.len() {
            match chars[i] {
                '.' => match chars.get(i + 1) {
                    Some('.') => {
                        segments.push(Segment::Recurse);
                        // `..name` continues with a field access
                        let continues = chars
                            .get(i + 2)
                            .is_some_and(|&c| c.is_alphanumeric() || c == '_' || c == '"');
                        i += if continues { 1 } else { 2 };
                    }
                    Some('"') => {
                        let (name, end) = quoted(&chars, i + 1).ok_or_else(|| error(i, "unterminated field name"))?;
                        segments.push(Segment::Field(name));
                        i = end;
                    }
                    Some('[') => i += 1,
                    Some(&c) if c.is_alphanumeric() || c == '_' || c == '$' => {
                        let start = i + 1;
                        let mut end = start;
                        while chars
                            .get(end)
                            .is_some_and(|&c| c.is_alphanumeric() || matches!(c, '_' | '$' | '-'))
                        {
                            end += 1;
                        }
                        segments.push(Segment::Field(chars[start..end].iter().collect()));
                        i = end;
                    }
                    None if i == 0 => i += 1,
                    _ => return Err(error(i + 1, "expected field name after '.'")),
                },
                '[' => {
                    let close = chars[i..]
                        .iter()
                        .position(|&c| c == ']')
                        .map(|p| p + i)
                        .ok_or_else(|| error(i, "missing ']'"))?;
                    let inner: String = chars[i + 1..close].iter().collect();
                    let inner = inner.trim();
                    if inner.is_empty() {
                        segments.push(Segment::Iterate);
                    } else if let Some(name) = inner.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
                        segments.push(Segment::Field(name.to_string()));
                    } else {
                        let index = inner
                            .parse::<i64>()
                            .map_err(|_| error(i + 1, "expected an index"))?;
                        segments.push(Segment::Index(index));
                    }
                    i = close + 1;
                }
                _ => return Err(error(i, "unexpected character")),
            }
        }
        Ok(Self { segments })
    }

    /// Every value the path yields from `root`, in order.
    #[must_use]
    pub fn evaluate<'a>(&self, root: &'a Json) -> Vec<&'a Json> {
        let mut current = vec![root];
        for segment in &self.segments {
            let mut next = Vec::new();
            for value in current {
                match segment {
                    Segment::Field(name) => {
                        if let Some(v) = value.as_object().and_then(|o| o.get(name)) {
                            next.push(v);
                        }
                    }
                    Segment::Index(index) => {
                        if let Some(items) = value.as_array() {
                            let len = items.len() as i64;
                            let at = if *index < 0 { len + index } else { *index };
                            if (0..len).contains(&at) {
                                next.push(&items[at as usize]);
                            }
                        }
                    }
                    Segment::Iterate => match value {
                        Json::Array(items) => next.extend(items.iter()),
                        Json::Object(map) => next.extend(map.values()),
                        _ => {}
                    },
                    Segment::Recurse => recurse(value, &mut next),
                }
            }
            current = next;
        }
        current
    }
}

fn quoted(chars: &[char], start: usize) -> Option<(String, usize)> {
    let close = chars[start + 1..].iter().position(|&c| c == '"')? + start + 1;
    Some((chars[start + 1..close].iter().collect(), close + 1))
}

fn recurse<'a>(value: &'a Json, out: &mut Vec<&'a Json>) {
    let mut stack = vec![value];
    while let Some(v) = stack.pop() {
        out.push(v);
        match v {
            Json::Array(items) => stack.extend(items.iter().rev()),
            Json::Object(map) => {
                let children: Vec<&Json> = map.values().collect();
                stack.extend(children.into_iter().rev());
            }
            _ => {}
        }
    }
}

/// A parsed JSON metadata document.
#[derive(Debug, Clone)]
pub struct JsonDocument {
    text: String,
    root: Json,
}

impl JsonDocument {
    pub fn parse(text: &str) -> Result<Self, String> {
        let root = serde_json::from_str(text).map_err(|e| e.to_string())?;
        Ok(Self {
            text: text.to_string(),
            root,
        })
    }

    #[must_use]
    pub const fn root(&self) -> &Json {
        &self.root
    }
}

impl Document for JsonDocument {
    fn kind(&self) -> DocumentKind {
        DocumentKind::Json
    }

    fn text(&self) -> &str {
        &self.text
    }

    fn namespaces(&self) -> &[Namespace] {
        &[]
    }

    fn select(&self, query: &Query<'_>, context: Option<&Item>) -> Result<Vec<Item>, String> {
        if query.syntax != SelectorSyntax::JsonPath {
            return Err(format!("{} expressions cannot be applied to JSON", query.syntax.as_str()));
        }
        let path = JsonPath::parse(query.path).map_err(|e| e.to_string())?;
        let base = match context {
            None => &self.root,
            Some(Item::Json(value)) => value,
            Some(other) => return Err(format!("cannot use {other:?} as a JSON path context")),
        };
        Ok(path
            .evaluate(base)
            .into_iter()
            .map(|v| Item::Json(v.clone()))
            .collect())
    }

    fn test(&self, query: &Query<'_>) -> Result<bool, String> {
        let items = self.select(query, None)?;
        Ok(items
            .iter()
            .any(|item| !matches!(item, Item::Json(Json::Null | Json::Bool(false)))))
    }

    fn value_of(&self, item: &Item) -> Value {
        match item {
            Item::Json(Json::Null) | Item::Node(_) => Value::Null,
            Item::Json(Json::Bool(b)) => Value::Bool(*b),
            Item::Json(Json::Number(n)) => n.as_f64().map_or(Value::Null, Value::Number),
            Item::Json(Json::String(s)) => Value::retype(s),
            Item::Json(composite) => Value::String(composite.to_string()),
            Item::Atomic(v) => v.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Json {
        json!({
            "name": "Lake survey",
            "creators": [{"name": "Jones"}, {"name": "Smith"}],
            "spatial extent": {"north": 68.6},
            "keywords": []
        })
    }

    fn strings(path: &str) -> Vec<String> {
        let root = sample();
        JsonPath::parse(path)
            .expect("parse")
            .evaluate(&root)
            .into_iter()
            .map(ToString::to_string)
            .collect()
    }

    #[test]
    fn test_field_and_index_paths() {
        assert_eq!(strings(".name"), vec!["\"Lake survey\""]);
        assert_eq!(strings(".creators[1].name"), vec!["\"Smith\""]);
        assert_eq!(strings(".creators[-1].name"), vec!["\"Smith\""]);
        assert_eq!(strings(".\"spatial extent\".north"), vec!["68.6"]);
        assert_eq!(strings(".creators[5]"), Vec::<String>::new());
    }

    #[test]
    fn test_iterate_and_recurse() {
        assert_eq!(strings(".creators[].name"), vec!["\"Jones\"", "\"Smith\""]);
        assert_eq!(strings(".keywords[]"), Vec::<String>::new());
        let all_names: Vec<String> = strings("..")
            .into_iter()
            .filter(|s| s == "\"Jones\"" || s == "\"Smith\"")
            .collect();
        assert_eq!(all_names.len(), 2);
        assert_eq!(strings(".").len(), 1);
        assert_eq!(strings("..name"), vec!["\"Lake survey\"", "\"Jones\"", "\"Smith\""]);
    }

    #[test]
    fn test_parse_errors() {
        assert!(JsonPath::parse("").is_err());
        assert!(JsonPath::parse("name").is_err());
        assert!(JsonPath::parse(".a[").is_err());
        assert!(JsonPath::parse(".a[x]").is_err());
    }

    #[test]
    fn test_composite_values_bind_as_json_text() {
        let doc = JsonDocument::parse(&sample().to_string()).expect("parse");
        let value = doc.value_of(&Item::Json(json!({"a": 1})));
        assert_eq!(value, Value::String("{\"a\":1}".into()));
        assert_eq!(doc.value_of(&Item::Json(json!("42"))), Value::Number(42.0));
    }
}
