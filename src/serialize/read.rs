//! XML element structures shared by every suite schema version.
//!
//! Versions differ only in the root namespace and in optional elements
//! added over time (`expression`, `namespaces`, `dialect`), so a single set
//! of lenient structures reads them all.

use super::SerializeError;
use crate::model::{
    Check, CheckResult, Dialect, Expression, Level, Namespace, Output, Run, RunStatus, Selector,
    SelectorSyntax, Status, Suite, Sysmeta,
};
use chrono::{DateTime, Utc};
use quick_xml::events::Event;
use quick_xml::Reader;
use serde::Deserialize;

type Result<T> = std::result::Result<T, SerializeError>;

#[derive(Debug, Deserialize)]
struct SuiteXml {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
    description: Option<String>,
    namespaces: Option<NamespacesXml>,
    #[serde(default)]
    check: Vec<CheckXml>,
}

#[derive(Debug, Default, Deserialize)]
struct NamespacesXml {
    #[serde(default)]
    namespace: Vec<NamespaceXml>,
}

#[derive(Debug, Deserialize)]
struct NamespaceXml {
    #[serde(rename = "@prefix", default)]
    prefix: String,
    #[serde(rename = "$text", default)]
    uri: String,
}

#[derive(Debug, Deserialize)]
struct CheckXml {
    #[serde(default)]
    id: String,
    name: Option<String>,
    description: Option<String>,
    #[serde(rename = "type")]
    check_type: Option<String>,
    level: Option<String>,
    environment: Option<String>,
    code: Option<String>,
    expected: Option<String>,
    #[serde(default)]
    library: Vec<String>,
    #[serde(rename = "inheritState")]
    inherit_state: Option<bool>,
    #[serde(default)]
    selector: Vec<SelectorXml>,
    #[serde(default)]
    dialect: Vec<DialectXml>,
}

#[derive(Debug, Deserialize)]
struct SelectorXml {
    name: Option<String>,
    xpath: Option<String>,
    expression: Option<ExpressionXml>,
    #[serde(rename = "@namespaceAware")]
    namespace_aware: Option<bool>,
    namespaces: Option<NamespacesXml>,
    #[serde(rename = "subSelector")]
    sub_selector: Option<Box<SelectorXml>>,
}

#[derive(Debug, Deserialize)]
struct ExpressionXml {
    #[serde(rename = "@syntax")]
    syntax: Option<String>,
    #[serde(rename = "$text", default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct DialectXml {
    #[serde(default)]
    name: String,
    xpath: Option<String>,
    expression: Option<ExpressionXml>,
    jsonpath: Option<JsonPathXml>,
}

#[derive(Debug, Deserialize)]
struct JsonPathXml {
    #[serde(rename = "$text", default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct RunXml {
    id: String,
    timestamp: String,
    #[serde(rename = "objectIdentifier", default)]
    object_identifier: String,
    #[serde(rename = "suiteId", default)]
    suite_id: String,
    #[serde(rename = "runStatus")]
    run_status: Option<String>,
    #[serde(rename = "errorDescription")]
    error_description: Option<String>,
    sysmeta: Option<SysmetaXml>,
    #[serde(default)]
    result: Vec<ResultXml>,
}

#[derive(Debug, Deserialize)]
struct SysmetaXml {
    #[serde(rename = "originMemberNode", default)]
    origin_member_node: String,
    #[serde(rename = "rightsHolder", default)]
    rights_holder: String,
    groups: Option<GroupsXml>,
    #[serde(rename = "dateUploaded")]
    date_uploaded: Option<String>,
    #[serde(rename = "formatId", default)]
    format_id: String,
    #[serde(rename = "seriesId")]
    series_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct GroupsXml {
    #[serde(default)]
    group: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ResultXml {
    check: ResultCheckXml,
    timestamp: String,
    #[serde(default)]
    output: Vec<OutputXml>,
    status: String,
}

#[derive(Debug, Deserialize)]
struct ResultCheckXml {
    id: String,
    level: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OutputXml {
    #[serde(rename = "@type")]
    output_type: Option<String>,
    #[serde(rename = "@identifier")]
    identifier: Option<String>,
    #[serde(rename = "$text", default)]
    value: String,
}

fn invalid(field: &str, message: impl Into<String>) -> SerializeError {
    SerializeError::InvalidValue {
        field: field.to_string(),
        message: message.into(),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Reverse entity escaping a generic marshaller left in code text.
pub(super) fn unescape_entities(code: &str) -> String {
    if !code.contains('&') {
        return code.to_string();
    }
    code.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// For each `check` element in document order, whether its `code` was
/// written as escaped character data. CDATA content is always literal.
fn escaped_code_flags(xml: &str) -> Result<Vec<bool>> {
    let mut reader = Reader::from_str(xml);
    let mut flags = Vec::new();
    let mut in_code = false;
    let (mut text, mut cdata) = (false, false);
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"check" => (text, cdata) = (false, false),
                b"code" => in_code = true,
                _ => {}
            },
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"check" => flags.push(text && !cdata),
                b"code" => in_code = false,
                _ => {}
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"check" => flags.push(false),
            Ok(Event::Text(t)) if in_code => {
                let raw: &[u8] = &t;
                text |= raw.iter().any(|b| !b.is_ascii_whitespace());
            }
            Ok(Event::CData(_)) if in_code => cdata = true,
            Ok(Event::Eof) => return Ok(flags),
            Ok(_) => {}
            Err(e) => return Err(SerializeError::Xml(e.to_string())),
        }
    }
}

fn namespaces(xml: Option<NamespacesXml>) -> Vec<Namespace> {
    xml.unwrap_or_default()
        .namespace
        .into_iter()
        .map(|ns| Namespace::new(ns.prefix.trim(), ns.uri.trim()))
        .collect()
}

fn expression(xml: ExpressionXml) -> Result<Expression> {
    let syntax_text = xml.syntax.unwrap_or_default();
    let syntax = SelectorSyntax::parse(&syntax_text)
        .ok_or_else(|| invalid("syntax", format!("unknown expression syntax '{syntax_text}'")))?;
    Ok(Expression {
        syntax,
        value: xml.value.trim().to_string(),
    })
}

fn selector(xml: SelectorXml) -> Result<Selector> {
    let name = non_empty(xml.name).ok_or_else(|| invalid("selector.name", "selector has no name"))?;
    let sub_selector = match xml.sub_selector {
        Some(sub) => Some(Box::new(selector(*sub)?)),
        None => None,
    };
    Ok(Selector {
        name: name.trim().to_string(),
        xpath: non_empty(xml.xpath).map(|x| x.trim().to_string()),
        expression: xml.expression.map(expression).transpose()?,
        sub_selector,
        namespaces: namespaces(xml.namespaces),
        namespace_aware: xml.namespace_aware.unwrap_or(false),
    })
}

fn dialect(xml: DialectXml) -> Result<Dialect> {
    let expression = match (xml.expression, xml.jsonpath) {
        (Some(expr), _) => Some(expression(expr)?),
        (None, Some(path)) => Some(Expression {
            syntax: SelectorSyntax::JsonPath,
            value: path.value.trim().to_string(),
        }),
        (None, None) => None,
    };
    Ok(Dialect {
        name: xml.name.trim().to_string(),
        xpath: non_empty(xml.xpath).map(|x| x.trim().to_string()),
        expression,
    })
}

fn level(text: Option<String>, field: &str) -> Result<Option<Level>> {
    non_empty(text)
        .map(|t| t.parse::<Level>().map_err(|message| invalid(field, message)))
        .transpose()
}

fn check_from(xml: CheckXml, escaped_code: bool) -> Result<Check> {
    if !xml.library.is_empty() {
        tracing::warn!(check = %xml.id, "ignoring remote code libraries");
    }
    if xml.inherit_state == Some(true) {
        tracing::warn!(check = %xml.id, "ignoring inheritState; checks always run isolated");
    }
    let code = non_empty(xml.code).map(|code| {
        if escaped_code {
            unescape_entities(&code)
        } else {
            code
        }
    });
    Ok(Check {
        id: xml.id.trim().to_string(),
        name: non_empty(xml.name),
        description: non_empty(xml.description),
        check_type: non_empty(xml.check_type),
        level: level(xml.level, "level")?,
        environment: non_empty(xml.environment).map(|e| e.trim().to_string()),
        code,
        expected: non_empty(xml.expected),
        selectors: xml.selector.into_iter().map(selector).collect::<Result<_>>()?,
        dialects: xml.dialect.into_iter().map(dialect).collect::<Result<_>>()?,
    })
}

pub(super) fn suite(xml: &str) -> Result<Suite> {
    let parsed: SuiteXml = quick_xml::de::from_str(xml)?;
    let escaped = escaped_code_flags(xml)?;
    let checks = parsed
        .check
        .into_iter()
        .enumerate()
        .map(|(i, c)| {
            check_from(c, escaped.get(i).copied().unwrap_or(false)).map_err(|e| match e {
                SerializeError::InvalidValue { field, message } => SerializeError::InvalidValue {
                    field: format!("check[{}].{field}", i + 1),
                    message,
                },
                other => other,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Suite {
        id: parsed.id.trim().to_string(),
        name: parsed.name.trim().to_string(),
        description: non_empty(parsed.description),
        namespaces: namespaces(parsed.namespaces),
        checks,
    })
}

pub(super) fn check(xml: &str) -> Result<Check> {
    let parsed: CheckXml = quick_xml::de::from_str(xml)?;
    let escaped = escaped_code_flags(xml)?;
    check_from(parsed, escaped.first().copied().unwrap_or(false))
}

fn timestamp(text: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| invalid(field, e.to_string()))
}

fn sysmeta(xml: SysmetaXml) -> Result<Sysmeta> {
    Ok(Sysmeta {
        origin_member_node: xml.origin_member_node.trim().to_string(),
        rights_holder: xml.rights_holder.trim().to_string(),
        groups: xml
            .groups
            .unwrap_or_default()
            .group
            .into_iter()
            .map(|g| g.trim().to_string())
            .collect(),
        date_uploaded: non_empty(xml.date_uploaded)
            .map(|d| timestamp(&d, "sysmeta.dateUploaded"))
            .transpose()?,
        format_id: xml.format_id.trim().to_string(),
        series_id: non_empty(xml.series_id).map(|s| s.trim().to_string()),
    })
}

pub(super) fn run(xml: &str) -> Result<Run> {
    let parsed: RunXml = quick_xml::de::from_str(xml)?;
    let run_status = match non_empty(parsed.run_status) {
        Some(text) => RunStatus::parse(&text)
            .ok_or_else(|| invalid("runStatus", format!("unknown run status '{text}'")))?,
        None => RunStatus::default(),
    };
    let results = parsed
        .result
        .into_iter()
        .map(|r| {
            Ok(CheckResult {
                check_id: r.check.id.trim().to_string(),
                level: level(r.check.level, "result.check.level")?.unwrap_or_default(),
                status: Status::from_token(&r.status)
                    .ok_or_else(|| invalid("result.status", format!("unknown status '{}'", r.status)))?,
                timestamp: timestamp(&r.timestamp, "result.timestamp")?,
                outputs: r
                    .output
                    .into_iter()
                    .map(|o| Output {
                        value: o.value,
                        output_type: o.output_type,
                        identifier: o.identifier,
                    })
                    .collect(),
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Run {
        id: parsed.id.trim().to_string(),
        timestamp: timestamp(&parsed.timestamp, "timestamp")?,
        object_identifier: parsed.object_identifier.trim().to_string(),
        suite_id: parsed.suite_id.trim().to_string(),
        run_status,
        error_description: non_empty(parsed.error_description),
        sysmeta: parsed.sysmeta.map(sysmeta).transpose()?,
        results,
    })
}
