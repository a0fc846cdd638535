//! Reading and writing suites and runs as XML or JSON.
//!
//! XML suites are accepted in every published schema version. The version is
//! identified by the namespace bound to the root element:
//!
//! | Version | Root namespace |
//! |---------|----------------|
//! | legacy  | none |
//! | v1      | `https://nceas.ucsb.edu/mdqe/v1` |
//! | v1.1    | `https://nceas.ucsb.edu/mdqe/v1.1` |
//! | v1.2    | `https://nceas.ucsb.edu/mdqe/v1.2` |
//!
//! All versions parse into the same [`Suite`]. Suites and runs are always
//! written in the current version. Code, descriptions and outputs are written
//! as CDATA so readers receive the literal text.

mod read;
mod write;

use crate::error::{ErrorContext, MdqError, ProcessErrorKind, Result};
use crate::model::{Check, Run, Suite};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::path::Path;
use thiserror::Error;

/// Base URI shared by every versioned suite namespace.
pub const NAMESPACE_BASE: &str = "https://nceas.ucsb.edu/mdqe/";

/// Errors raised while reading or writing suite and run documents.
#[derive(Error, Debug)]
pub enum SerializeError {
    #[error("XML error: {0}")]
    Xml(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported suite namespace '{0}'")]
    UnsupportedVersion(String),

    #[error("expected a <{expected}> root element, found <{found}>")]
    UnexpectedRoot { expected: String, found: String },

    #[error("invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },

    #[error("document is neither XML nor JSON")]
    UnknownFormat,
}

impl From<quick_xml::DeError> for SerializeError {
    fn from(err: quick_xml::DeError) -> Self {
        Self::Xml(err.to_string())
    }
}

impl From<SerializeError> for MdqError {
    fn from(err: SerializeError) -> Self {
        match err {
            SerializeError::Xml(msg) => {
                Self::process("reading XML", ProcessErrorKind::InvalidXml(msg))
            }
            SerializeError::Json(e) => {
                Self::process("reading JSON", ProcessErrorKind::InvalidJson(e.to_string()))
            }
            SerializeError::UnsupportedVersion(namespace) => Self::process(
                "detecting suite version",
                ProcessErrorKind::UnsupportedVersion {
                    version: namespace,
                    supported: SuiteVersion::ALL
                        .iter()
                        .map(|v| v.as_str())
                        .collect::<Vec<_>>()
                        .join(", "),
                },
            ),
            SerializeError::UnexpectedRoot { .. } => {
                Self::process("reading XML", ProcessErrorKind::InvalidXml(err.to_string()))
            }
            SerializeError::InvalidValue { field, message } => Self::process(
                "reading suite",
                ProcessErrorKind::InvalidValue { field, message },
            ),
            SerializeError::UnknownFormat => {
                Self::process("reading suite", ProcessErrorKind::UnknownDocumentFormat)
            }
        }
    }
}

/// Suite schema versions, oldest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SuiteVersion {
    /// No namespace on the root element
    Legacy,
    V1,
    V1_1,
    V1_2,
}

impl SuiteVersion {
    pub const ALL: [Self; 4] = [Self::Legacy, Self::V1, Self::V1_1, Self::V1_2];

    /// Version used when writing.
    pub const CURRENT: Self = Self::V1_2;

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Legacy => "legacy",
            Self::V1 => "v1",
            Self::V1_1 => "v1.1",
            Self::V1_2 => "v1.2",
        }
    }

    /// Root namespace URI, `None` for legacy documents.
    #[must_use]
    pub fn namespace(&self) -> Option<String> {
        match self {
            Self::Legacy => None,
            other => Some(format!("{NAMESPACE_BASE}{}", other.as_str())),
        }
    }

    /// Map a root namespace URI to a version.
    pub fn from_namespace(namespace: Option<&str>) -> std::result::Result<Self, SerializeError> {
        let Some(namespace) = namespace.map(str::trim).filter(|ns| !ns.is_empty()) else {
            return Ok(Self::Legacy);
        };
        namespace
            .strip_prefix(NAMESPACE_BASE)
            .and_then(|suffix| {
                Self::ALL
                    .into_iter()
                    .find(|v| *v != Self::Legacy && v.as_str() == suffix.trim_end_matches('/'))
            })
            .ok_or_else(|| SerializeError::UnsupportedVersion(namespace.to_string()))
    }
}

impl std::fmt::Display for SuiteVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serialization format of a suite or run document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Xml,
    Json,
}

impl Format {
    /// Detect the format from the first significant character.
    #[must_use]
    pub fn detect(content: &str) -> Option<Self> {
        match content.trim_start_matches('\u{feff}').trim_start().chars().next() {
            Some('<') => Some(Self::Xml),
            Some('{') => Some(Self::Json),
            _ => None,
        }
    }
}

/// Root element local name and the namespace bound to its prefix.
fn root_element(xml: &str) -> std::result::Result<(String, Option<String>), SerializeError> {
    let mut reader = Reader::from_str(xml);
    loop {
        match reader.read_event() {
            Ok(Event::Start(e) | Event::Empty(e)) => {
                let qname = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                let (prefix, local) = match qname.split_once(':') {
                    Some((prefix, local)) => (Some(prefix.to_string()), local.to_string()),
                    None => (None, qname.clone()),
                };
                let wanted = prefix.map_or_else(|| "xmlns".to_string(), |p| format!("xmlns:{p}"));
                let mut namespace = None;
                for attr in e.attributes().flatten() {
                    if attr.key.as_ref() == wanted.as_bytes() {
                        let value = attr
                            .unescape_value()
                            .map_err(|err| SerializeError::Xml(err.to_string()))?;
                        namespace = Some(value.into_owned());
                    }
                }
                return Ok((local, namespace));
            }
            Ok(Event::Eof) => return Err(SerializeError::Xml("document has no root element".into())),
            Ok(_) => {}
            Err(e) => return Err(SerializeError::Xml(e.to_string())),
        }
    }
}

fn expect_root(xml: &str, expected: &str) -> std::result::Result<SuiteVersion, SerializeError> {
    let (local, namespace) = root_element(xml)?;
    if local != expected {
        return Err(SerializeError::UnexpectedRoot {
            expected: expected.to_string(),
            found: local,
        });
    }
    SuiteVersion::from_namespace(namespace.as_deref())
}

/// Schema version of an XML suite document.
pub fn detect_suite_version(xml: &str) -> Result<SuiteVersion> {
    Ok(expect_root(xml, "suite")?)
}

/// Parse an XML suite of any supported version.
pub fn suite_from_xml(xml: &str) -> Result<Suite> {
    let version = expect_root(xml, "suite")?;
    tracing::debug!(%version, "parsing XML suite");
    Ok(read::suite(xml)?)
}

/// Parse a single XML check definition, as held by a check store.
pub fn check_from_xml(xml: &str) -> Result<Check> {
    expect_root(xml, "check")?;
    Ok(read::check(xml)?)
}

/// Parse a JSON suite. Code is taken verbatim.
pub fn suite_from_json(json: &str) -> Result<Suite> {
    Ok(serde_json::from_str(json).map_err(SerializeError::from)?)
}

/// Parse a suite in either format.
pub fn suite_from_str(content: &str) -> Result<Suite> {
    match Format::detect(content) {
        Some(Format::Xml) => suite_from_xml(content),
        Some(Format::Json) => suite_from_json(content),
        None => Err(SerializeError::UnknownFormat.into()),
    }
}

/// Read a suite file in either format.
pub fn load_suite(path: &Path) -> Result<Suite> {
    let content = std::fs::read_to_string(path).map_err(|e| MdqError::io(path, e))?;
    suite_from_str(&content).with_context(|| format!("loading {}", path.display()))
}

/// Write a suite in the current schema version.
pub fn suite_to_xml(suite: &Suite) -> Result<String> {
    Ok(write::suite(suite)?)
}

pub fn suite_to_json(suite: &Suite) -> Result<String> {
    Ok(serde_json::to_string_pretty(suite).map_err(SerializeError::from)?)
}

pub fn run_to_xml(run: &Run) -> Result<String> {
    Ok(write::run(run)?)
}

pub fn run_from_xml(xml: &str) -> Result<Run> {
    expect_root(xml, "run")?;
    Ok(read::run(xml)?)
}

pub fn run_to_json(run: &Run) -> Result<String> {
    Ok(serde_json::to_string_pretty(run).map_err(SerializeError::from)?)
}

pub fn run_from_json(json: &str) -> Result<Run> {
    Ok(serde_json::from_str(json).map_err(SerializeError::from)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_from_namespace() {
        assert_eq!(SuiteVersion::from_namespace(None).unwrap(), SuiteVersion::Legacy);
        assert_eq!(
            SuiteVersion::from_namespace(Some("https://nceas.ucsb.edu/mdqe/v1.1")).unwrap(),
            SuiteVersion::V1_1
        );
        assert!(matches!(
            SuiteVersion::from_namespace(Some("https://nceas.ucsb.edu/mdqe/v9")),
            Err(SerializeError::UnsupportedVersion(_))
        ));
        assert_eq!(
            SuiteVersion::CURRENT.namespace().as_deref(),
            Some("https://nceas.ucsb.edu/mdqe/v1.2")
        );
    }

    #[test]
    fn test_detect_version_from_prefix_or_default_namespace() {
        let prefixed = r#"<?xml version="1.0"?><mdq:suite xmlns:mdq="https://nceas.ucsb.edu/mdqe/v1"><id>s</id></mdq:suite>"#;
        assert_eq!(detect_suite_version(prefixed).unwrap(), SuiteVersion::V1);

        let default = r#"<suite xmlns="https://nceas.ucsb.edu/mdqe/v1.2"><id>s</id></suite>"#;
        assert_eq!(detect_suite_version(default).unwrap(), SuiteVersion::V1_2);

        let legacy = "<suite><id>s</id></suite>";
        assert_eq!(detect_suite_version(legacy).unwrap(), SuiteVersion::Legacy);
    }

    #[test]
    fn test_unknown_namespace_is_unsupported_version() {
        let xml = r#"<mdq:suite xmlns:mdq="https://example.org/other"><id>s</id></mdq:suite>"#;
        let err = suite_from_xml(xml).unwrap_err();
        assert!(matches!(
            err,
            MdqError::Process {
                source: ProcessErrorKind::UnsupportedVersion { .. },
                ..
            }
        ));
    }

    #[test]
    fn test_wrong_root_rejected() {
        assert!(suite_from_xml("<run><id>r</id></run>").is_err());
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(Format::detect("  <suite/>"), Some(Format::Xml));
        assert_eq!(Format::detect("\u{feff}{\"id\":1}"), Some(Format::Json));
        assert_eq!(Format::detect("id: x"), None);
        assert!(suite_from_str("id: x").is_err());
    }
}
