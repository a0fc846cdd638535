//! XML documents as an arena of nodes built from quick-xml events.
//!
//! Node ids are assigned in document order (an element precedes its
//! attributes, which precede its children), so sorting ids sorts nodes into
//! document order.

use super::xpath::{NamespaceContext, XPath, XPathValue};
use super::{Document, DocumentKind, Item, Query};
use crate::model::{Namespace, SelectorSyntax, Value};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashMap;

/// Index of a node in an [`XmlDocument`].
pub type NodeId = usize;

/// The root (document) node always has id 0.
pub const ROOT: NodeId = 0;

/// Deepest element nesting accepted by [`XmlDocument::parse`].
pub const MAX_DEPTH: usize = 2048;

/// A qualified XML name with its resolved namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QName {
    pub prefix: Option<String>,
    pub local: String,
    pub namespace: Option<String>,
}

impl QName {
    /// Name as written in the document.
    #[must_use]
    pub fn qualified(&self) -> String {
        match &self.prefix {
            Some(p) => format!("{p}:{}", self.local),
            None => self.local.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Document,
    Element(QName),
    Attribute { name: QName, value: String },
    Text(String),
    Comment(String),
}

#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub attributes: Vec<NodeId>,
}

/// A parsed, immutable XML document.
#[derive(Debug, Clone)]
pub struct XmlDocument {
    text: String,
    nodes: Vec<Node>,
    namespaces: Vec<Namespace>,
}

impl XmlDocument {
    /// Parse XML text into a node tree.
    pub fn parse(text: &str) -> Result<Self, String> {
        let mut builder = TreeBuilder::default();
        let mut reader = Reader::from_str(text);
        reader.config_mut().trim_text(false);

        let mut buf = Vec::new();
        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(ref e)) => builder.open(e, false)?,
                Ok(Event::Empty(ref e)) => builder.open(e, true)?,
                Ok(Event::End(_)) => builder.close()?,
                Ok(Event::Text(ref e)) => {
                    let text = e
                        .unescape()
                        .map_err(|err| format!("bad text at {}: {err}", reader.buffer_position()))?;
                    builder.text(&text);
                }
                Ok(Event::CData(ref e)) => {
                    builder.text(&String::from_utf8_lossy(e));
                }
                Ok(Event::Comment(ref e)) => {
                    builder.leaf(NodeKind::Comment(String::from_utf8_lossy(e).into_owned()));
                }
                Ok(Event::Eof) => break,
                Err(e) => {
                    return Err(format!(
                        "error at position {}: {e}",
                        reader.buffer_position()
                    ))
                }
                _ => {}
            }
            buf.clear();
        }
        builder.finish(text)
    }

    #[must_use]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    /// The single top-level element.
    #[must_use]
    pub fn root_element(&self) -> Option<NodeId> {
        self.nodes[ROOT]
            .children
            .iter()
            .copied()
            .find(|&id| matches!(self.nodes[id].kind, NodeKind::Element(_)))
    }

    #[must_use]
    pub fn name(&self, id: NodeId) -> Option<&QName> {
        match &self.nodes[id].kind {
            NodeKind::Element(name) | NodeKind::Attribute { name, .. } => Some(name),
            _ => None,
        }
    }

    /// XPath string-value of a node.
    #[must_use]
    pub fn string_value(&self, id: NodeId) -> String {
        match &self.nodes[id].kind {
            NodeKind::Attribute { value, .. } => value.clone(),
            NodeKind::Text(t) | NodeKind::Comment(t) => t.clone(),
            NodeKind::Document | NodeKind::Element(_) => {
                let mut out = String::new();
                self.collect_text(id, &mut out);
                out
            }
        }
    }

    fn collect_text(&self, id: NodeId, out: &mut String) {
        let mut pending: Vec<NodeId> = self.nodes[id].children.iter().rev().copied().collect();
        while let Some(node) = pending.pop() {
            match &self.nodes[node].kind {
                NodeKind::Text(t) => out.push_str(t),
                NodeKind::Element(_) => pending.extend(self.nodes[node].children.iter().rev()),
                _ => {}
            }
        }
    }

    /// Namespace prefixes declared anywhere in the document, in order of
    /// first declaration.
    #[must_use]
    pub fn declared_namespaces(&self) -> &[Namespace] {
        &self.namespaces
    }

    fn evaluate(&self, query: &Query<'_>, context: NodeId) -> Result<XPathValue, String> {
        let xpath = XPath::parse(query.path).map_err(|e| e.to_string())?;
        let mut ns = NamespaceContext::new(query.namespace_aware);
        for n in self.namespaces.iter().chain(query.namespaces.iter()) {
            ns.bind(&n.prefix, &n.uri);
        }
        xpath.evaluate(self, context, &ns).map_err(|e| e.to_string())
    }

    fn context_node(item: Option<&Item>) -> Result<NodeId, String> {
        match item {
            None => Ok(ROOT),
            Some(Item::Node(id)) => Ok(*id),
            Some(other) => Err(format!("cannot use {other:?} as an XPath context")),
        }
    }
}

impl Document for XmlDocument {
    fn kind(&self) -> DocumentKind {
        DocumentKind::Xml
    }

    fn text(&self) -> &str {
        &self.text
    }

    fn namespaces(&self) -> &[Namespace] {
        &self.namespaces
    }

    fn select(&self, query: &Query<'_>, context: Option<&Item>) -> Result<Vec<Item>, String> {
        if query.syntax != SelectorSyntax::XPath {
            return Err(format!("{} expressions cannot be applied to XML", query.syntax.as_str()));
        }
        let value = self.evaluate(query, Self::context_node(context)?)?;
        Ok(match value {
            XPathValue::NodeSet(nodes) => nodes.into_iter().map(Item::Node).collect(),
            XPathValue::Boolean(b) => vec![Item::Atomic(Value::Bool(b))],
            XPathValue::Number(n) => vec![Item::Atomic(Value::Number(n))],
            XPathValue::String(s) => vec![Item::Atomic(Value::retype(&s))],
        })
    }

    fn test(&self, query: &Query<'_>) -> Result<bool, String> {
        Ok(self.evaluate(query, ROOT)?.to_boolean())
    }

    fn value_of(&self, item: &Item) -> Value {
        match item {
            Item::Node(id) => Value::retype(&self.string_value(*id)),
            Item::Atomic(v) => v.clone(),
            Item::Json(_) => Value::Null,
        }
    }
}

/// Incrementally builds the node arena while tracking namespace scopes.
struct TreeBuilder {
    nodes: Vec<Node>,
    open: Vec<NodeId>,
    /// Prefix ("" for default) to its in-scope URIs, innermost last
    bindings: HashMap<String, Vec<String>>,
    /// Prefixes declared by each open element
    scopes: Vec<Vec<String>>,
    declared: Vec<Namespace>,
}

impl Default for TreeBuilder {
    fn default() -> Self {
        Self {
            nodes: vec![Node {
                kind: NodeKind::Document,
                parent: None,
                children: Vec::new(),
                attributes: Vec::new(),
            }],
            open: vec![ROOT],
            bindings: HashMap::new(),
            scopes: Vec::new(),
            declared: Vec::new(),
        }
    }
}

impl TreeBuilder {
    fn current(&self) -> NodeId {
        self.open.last().copied().unwrap_or(ROOT)
    }

    fn push(&mut self, kind: NodeKind, parent: NodeId) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(Node {
            kind,
            parent: Some(parent),
            children: Vec::new(),
            attributes: Vec::new(),
        });
        id
    }

    fn resolve(&self, prefix: Option<&str>) -> Option<String> {
        let key = prefix.unwrap_or("");
        if key == "xml" {
            return Some("http://www.w3.org/XML/1998/namespace".to_string());
        }
        self.bindings
            .get(key)
            .and_then(|uris| uris.last())
            .filter(|uri| !uri.is_empty())
            .cloned()
    }

    fn enter_scope(&mut self, declarations: Vec<(String, String)>) {
        let mut prefixes = Vec::with_capacity(declarations.len());
        for (prefix, uri) in declarations {
            self.bindings.entry(prefix.clone()).or_default().push(uri);
            prefixes.push(prefix);
        }
        self.scopes.push(prefixes);
    }

    fn leave_scope(&mut self) {
        for prefix in self.scopes.pop().unwrap_or_default() {
            if let Some(uris) = self.bindings.get_mut(&prefix) {
                uris.pop();
            }
        }
    }

    fn open(&mut self, e: &BytesStart<'_>, empty: bool) -> Result<(), String> {
        if self.open.len() > MAX_DEPTH {
            return Err(format!("elements nested deeper than {MAX_DEPTH} levels"));
        }
        let mut scope = Vec::new();
        let mut raw_attrs = Vec::new();
        for attr in e.attributes() {
            let attr = attr.map_err(|err| format!("bad attribute: {err}"))?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map_err(|err| format!("bad attribute value: {err}"))?
                .into_owned();
            if key == "xmlns" {
                scope.push((String::new(), value));
            } else if let Some(prefix) = key.strip_prefix("xmlns:") {
                if !self.declared.iter().any(|n| n.prefix == prefix) {
                    self.declared.push(Namespace::new(prefix, value.clone()));
                }
                scope.push((prefix.to_string(), value));
            } else {
                raw_attrs.push((key, value));
            }
        }
        self.enter_scope(scope);

        let (prefix, local) = split_qname(&String::from_utf8_lossy(e.name().as_ref()));
        let namespace = self.resolve(prefix.as_deref());
        let parent = self.current();
        let id = self.push(
            NodeKind::Element(QName {
                prefix,
                local,
                namespace,
            }),
            parent,
        );
        self.nodes[parent].children.push(id);

        for (key, value) in raw_attrs {
            let (prefix, local) = split_qname(&key);
            // Unprefixed attributes are in no namespace.
            let namespace = prefix.as_deref().and_then(|p| self.resolve(Some(p)));
            let attr = self.push(
                NodeKind::Attribute {
                    name: QName {
                        prefix,
                        local,
                        namespace,
                    },
                    value,
                },
                id,
            );
            self.nodes[id].attributes.push(attr);
        }

        if empty {
            self.leave_scope();
        } else {
            self.open.push(id);
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), String> {
        if self.open.len() <= 1 {
            return Err("unbalanced end tag".to_string());
        }
        self.open.pop();
        self.leave_scope();
        Ok(())
    }

    fn text(&mut self, text: &str) {
        let parent = self.current();
        if parent == ROOT {
            return;
        }
        if let Some(&last) = self.nodes[parent].children.last() {
            if let NodeKind::Text(existing) = &mut self.nodes[last].kind {
                existing.push_str(text);
                return;
            }
        }
        if text.trim().is_empty() {
            return;
        }
        let id = self.push(NodeKind::Text(text.to_string()), parent);
        self.nodes[parent].children.push(id);
    }

    fn leaf(&mut self, kind: NodeKind) {
        let parent = self.current();
        let id = self.push(kind, parent);
        self.nodes[parent].children.push(id);
    }

    fn finish(self, text: &str) -> Result<XmlDocument, String> {
        if self.open.len() > 1 {
            return Err("unexpected end of document: unclosed element".to_string());
        }
        let has_root = self.nodes[ROOT]
            .children
            .iter()
            .any(|&id| matches!(self.nodes[id].kind, NodeKind::Element(_)));
        if !has_root {
            return Err("document has no root element".to_string());
        }
        Ok(XmlDocument {
            text: text.to_string(),
            nodes: self.nodes,
            namespaces: self.declared,
        })
    }
}

fn split_qname(name: &str) -> (Option<String>, String) {
    match name.split_once(':') {
        Some((prefix, local)) => (Some(prefix.to_string()), local.to_string()),
        None => (None, name.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EML: &str = r#"<?xml version="1.0"?>
<eml:eml xmlns:eml="https://eml.ecoinformatics.org/eml-2.2.0" packageId="test.1">
  <dataset>
    <title>Soil <![CDATA[moisture]]> &amp; temperature</title>
    <!-- a comment -->
    <creator id="c1"><surName>Jones</surName></creator>
  </dataset>
</eml:eml>"#;

    #[test]
    fn test_parse_tree_shape() {
        let doc = XmlDocument::parse(EML).expect("parse");
        let root = doc.root_element().expect("root");
        let name = doc.name(root).expect("name");
        assert_eq!(name.local, "eml");
        assert_eq!(name.qualified(), "eml:eml");
        assert_eq!(
            name.namespace.as_deref(),
            Some("https://eml.ecoinformatics.org/eml-2.2.0")
        );
        assert_eq!(doc.node(root).attributes.len(), 1);
        assert_eq!(doc.declared_namespaces().len(), 1);
    }

    #[test]
    fn test_text_merges_cdata_and_entities() {
        let doc = XmlDocument::parse(EML).expect("parse");
        let title = (0..doc.len())
            .find(|&id| doc.name(id).is_some_and(|n| n.local == "title"))
            .expect("title");
        assert_eq!(doc.string_value(title), "Soil moisture & temperature");
    }

    #[test]
    fn test_document_order_ids() {
        let doc = XmlDocument::parse("<a x=\"1\"><b/><c/></a>").expect("parse");
        let a = doc.root_element().expect("root");
        let attr = doc.node(a).attributes[0];
        let b = doc.node(a).children[0];
        assert!(a < attr && attr < b);
    }

    fn nested(depth: usize) -> String {
        format!("{}x{}", "<a>".repeat(depth), "</a>".repeat(depth))
    }

    #[test]
    fn test_deep_nesting_within_limit() {
        let doc = XmlDocument::parse(&nested(MAX_DEPTH)).expect("parse");
        let root = doc.root_element().expect("root");
        assert_eq!(doc.string_value(root), "x");
    }

    #[test]
    fn test_rejects_nesting_past_limit() {
        let err = XmlDocument::parse(&nested(MAX_DEPTH + 1)).unwrap_err();
        assert!(err.contains("nested deeper"));
        assert!(XmlDocument::parse(&nested(100_000)).is_err());
    }

    #[test]
    fn test_namespace_scopes_unwind() {
        let doc = XmlDocument::parse(
            r#"<r xmlns:p="urn:outer"><p:a xmlns:p="urn:inner"/><p:b/></r>"#,
        )
        .expect("parse");
        let namespace = |local: &str| {
            (0..doc.len())
                .find(|&id| doc.name(id).is_some_and(|n| n.local == local))
                .and_then(|id| doc.name(id))
                .and_then(|n| n.namespace.clone())
        };
        assert_eq!(namespace("a").as_deref(), Some("urn:inner"));
        assert_eq!(namespace("b").as_deref(), Some("urn:outer"));
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(XmlDocument::parse("<a><b></a>").is_err());
        assert!(XmlDocument::parse("<a>").is_err());
        assert!(XmlDocument::parse("just text").is_err());
    }
}
