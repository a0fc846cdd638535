//! Metadata documents and path-based lookup.
//!
//! A document is parsed once per run and then shared read-only between all
//! check pipelines. Content type is detected from the text itself:
//!
//! - XML documents are queried with [XPath](xpath) expressions
//! - JSON documents are queried with jq-style [paths](json::JsonPath)

pub mod json;
pub mod xml;
pub mod xpath;

pub use json::{JsonDocument, JsonPath, JsonPathError};
pub use xml::{NodeId, XmlDocument};
pub use xpath::{NamespaceContext, XPath, XPathError, XPathValue};

use crate::error::{MdqError, ProcessErrorKind, Result};
use crate::model::{Namespace, SelectorSyntax, Value};

/// Kind of a parsed document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentKind {
    Xml,
    Json,
}

impl DocumentKind {
    /// The selector syntax native to this kind of document.
    #[must_use]
    pub const fn native_syntax(&self) -> SelectorSyntax {
        match self {
            Self::Xml => SelectorSyntax::XPath,
            Self::Json => SelectorSyntax::JsonPath,
        }
    }
}

/// One match produced by a selector.
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    /// An XML node
    Node(NodeId),
    /// A JSON value
    Json(serde_json::Value),
    /// A computed scalar such as the result of `count(...)`
    Atomic(Value),
}

/// A path expression together with its evaluation settings.
#[derive(Debug, Clone, Copy)]
pub struct Query<'a> {
    pub syntax: SelectorSyntax,
    pub path: &'a str,
    /// Prefix bindings applied after the document's own declarations
    pub namespaces: &'a [Namespace],
    pub namespace_aware: bool,
}

impl<'a> Query<'a> {
    #[must_use]
    pub const fn new(syntax: SelectorSyntax, path: &'a str) -> Self {
        Self {
            syntax,
            path,
            namespaces: &[],
            namespace_aware: false,
        }
    }
}

/// A parsed metadata document.
pub trait Document: Send + Sync {
    fn kind(&self) -> DocumentKind;

    /// Raw document text.
    fn text(&self) -> &str;

    /// Namespace prefixes declared by the document itself.
    fn namespaces(&self) -> &[Namespace];

    /// Evaluate a query relative to `context` (the document root when
    /// `None`), returning the matches in document order.
    fn select(&self, query: &Query<'_>, context: Option<&Item>) -> std::result::Result<Vec<Item>, String>;

    /// Evaluate a query as a boolean applicability test.
    fn test(&self, query: &Query<'_>) -> std::result::Result<bool, String>;

    /// Convert a match into a binding value.
    fn value_of(&self, item: &Item) -> Value;
}

/// Parse document text, detecting XML or JSON from its first significant
/// character.
///
/// A `max_size` of zero disables the size limit.
pub fn parse_document(content: &str, max_size: usize) -> Result<Box<dyn Document>> {
    if max_size > 0 && content.len() > max_size {
        return Err(MdqError::process(
            "loading document",
            ProcessErrorKind::DocumentTooLarge {
                size: content.len(),
                limit: max_size,
            },
        ));
    }
    let trimmed = content.trim_start_matches('\u{feff}').trim_start();
    match trimmed.chars().next() {
        Some('<') => {
            let doc = XmlDocument::parse(trimmed).map_err(MdqError::unparsable_document)?;
            tracing::debug!(nodes = doc.len(), "parsed XML document");
            Ok(Box::new(doc))
        }
        Some('{' | '[') => {
            let doc = JsonDocument::parse(trimmed).map_err(MdqError::unparsable_document)?;
            tracing::debug!("parsed JSON document");
            Ok(Box::new(doc))
        }
        _ => Err(MdqError::process(
            "loading document",
            ProcessErrorKind::UnknownDocumentFormat,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_kind() {
        let xml = parse_document("  <?xml version=\"1.0\"?><a/>", 0).expect("xml");
        assert_eq!(xml.kind(), DocumentKind::Xml);
        let json = parse_document("\n{\"a\": 1}", 0).expect("json");
        assert_eq!(json.kind(), DocumentKind::Json);
    }

    #[test]
    fn test_rejects_unknown_and_oversized() {
        let err = parse_document("title: x", 0).err().expect("error");
        assert!(matches!(
            err,
            MdqError::Process {
                source: ProcessErrorKind::UnknownDocumentFormat,
                ..
            }
        ));
        let err = parse_document("<a>0123456789</a>", 8).err().expect("error");
        assert!(matches!(
            err,
            MdqError::Process {
                source: ProcessErrorKind::DocumentTooLarge { limit: 8, .. },
                ..
            }
        ));
    }

    #[test]
    fn test_unparsable_document_is_process_error() {
        let err = parse_document("<a><b></a>", 0).err().expect("error");
        assert!(err.is_process_error());
        let err = parse_document("{\"a\": ", 0).err().expect("error");
        assert!(err.is_process_error());
    }

    #[test]
    fn test_select_with_context() {
        let doc = parse_document("<r><p><n>1</n><n>2</n></p><p><n>3</n></p></r>", 0).expect("xml");
        let parents = doc
            .select(&Query::new(SelectorSyntax::XPath, "//p"), None)
            .expect("select");
        assert_eq!(parents.len(), 2);
        let inner = doc
            .select(&Query::new(SelectorSyntax::XPath, "n"), Some(&parents[0]))
            .expect("select");
        let values: Vec<Value> = inner.iter().map(|i| doc.value_of(i)).collect();
        assert_eq!(values, vec![Value::Number(1.0), Value::Number(2.0)]);
    }
}
