//! Suite, check and selector definitions.

use super::Level;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A named, ordered collection of checks to run against a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Suite {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Prefix mappings available to every selector in the suite
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub namespaces: Vec<Namespace>,
    #[serde(default)]
    pub checks: Vec<Check>,
}

impl Suite {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            namespaces: Vec::new(),
            checks: Vec::new(),
        }
    }

    /// Append a check, keeping declaration order.
    #[must_use]
    pub fn with_check(mut self, check: Check) -> Self {
        self.checks.push(check);
        self
    }

    /// Find a check by id.
    #[must_use]
    pub fn check(&self, id: &str) -> Option<&Check> {
        self.checks.iter().find(|c| c.id == id)
    }

    /// Structural problems that make the suite unrunnable.
    ///
    /// Reference checks (no code) are not reported here since they are
    /// resolved against a store before execution.
    #[must_use]
    pub fn structural_problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.checks.is_empty() {
            problems.push(format!("suite '{}' has no checks", self.id));
        }
        let mut seen = HashSet::new();
        for (index, check) in self.checks.iter().enumerate() {
            if check.id.trim().is_empty() {
                problems.push(format!("check #{} has an empty id", index + 1));
            } else if !seen.insert(check.id.as_str()) {
                problems.push(format!("duplicate check id '{}'", check.id));
            }
        }
        problems
    }
}

/// One quality rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Check {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Free-form category such as "metadata" or "congruency"
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub check_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<Level>,
    /// Name of the scripting environment the code is written for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    #[serde(default, rename = "selector", skip_serializing_if = "Vec::is_empty")]
    pub selectors: Vec<Selector>,
    #[serde(default, rename = "dialect", skip_serializing_if = "Vec::is_empty")]
    pub dialects: Vec<Dialect>,
}

impl Check {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            description: None,
            check_type: None,
            level: None,
            environment: None,
            code: None,
            expected: None,
            selectors: Vec::new(),
            dialects: Vec::new(),
        }
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Free-form category, e.g. `Findable`.
    #[must_use]
    pub fn check_type(mut self, check_type: impl Into<String>) -> Self {
        self.check_type = Some(check_type.into());
        self
    }

    #[must_use]
    pub const fn level(mut self, level: Level) -> Self {
        self.level = Some(level);
        self
    }

    #[must_use]
    pub fn environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    #[must_use]
    pub fn code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    #[must_use]
    pub fn selector(mut self, selector: Selector) -> Self {
        self.selectors.push(selector);
        self
    }

    #[must_use]
    pub fn dialect(mut self, dialect: Dialect) -> Self {
        self.dialects.push(dialect);
        self
    }

    /// The level used for scoring; checks without one count as INFO.
    #[must_use]
    pub fn effective_level(&self) -> Level {
        self.level.unwrap_or_default()
    }

    /// A check with an id but no code points at a check held in a store.
    #[must_use]
    pub fn is_reference(&self) -> bool {
        self.code.is_none() && !self.id.is_empty()
    }
}

/// Syntax of a selector expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SelectorSyntax {
    #[default]
    #[serde(rename = "xpath")]
    XPath,
    #[serde(rename = "json-path")]
    JsonPath,
}

impl SelectorSyntax {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::XPath => "xpath",
            Self::JsonPath => "json-path",
        }
    }

    /// Parse the `syntax` attribute; anything unrecognised yields `None`.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "xpath" => Some(Self::XPath),
            "json-path" | "jsonpath" | "jq" => Some(Self::JsonPath),
            _ => None,
        }
    }
}

/// A typed path expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expression {
    #[serde(default)]
    pub syntax: SelectorSyntax,
    pub value: String,
}

/// Extracts one named binding from a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selector {
    /// Variable name the value is bound to in the rule code
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xpath: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<Expression>,
    /// Evaluated relative to each node matched by this selector
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_selector: Option<Box<Selector>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub namespaces: Vec<Namespace>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub namespace_aware: bool,
}

impl Selector {
    /// Selector using an XPath expression.
    pub fn xpath(name: impl Into<String>, xpath: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            xpath: Some(xpath.into()),
            expression: None,
            sub_selector: None,
            namespaces: Vec::new(),
            namespace_aware: false,
        }
    }

    /// Selector using a jq-style JSON path.
    pub fn json_path(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            xpath: None,
            expression: Some(Expression {
                syntax: SelectorSyntax::JsonPath,
                value: path.into(),
            }),
            sub_selector: None,
            namespaces: Vec::new(),
            namespace_aware: false,
        }
    }

    #[must_use]
    pub fn with_sub_selector(mut self, sub: Selector) -> Self {
        self.sub_selector = Some(Box::new(sub));
        self
    }

    #[must_use]
    pub fn with_namespace(mut self, prefix: impl Into<String>, uri: impl Into<String>) -> Self {
        self.namespaces.push(Namespace::new(prefix, uri));
        self
    }

    /// The effective path: a typed expression wins over the bare xpath.
    #[must_use]
    pub fn path(&self) -> Option<(SelectorSyntax, &str)> {
        if let Some(expr) = &self.expression {
            return Some((expr.syntax, expr.value.as_str()));
        }
        self.xpath.as_deref().map(|x| (SelectorSyntax::XPath, x))
    }
}

/// Maps a namespace prefix used in expressions to its URI.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Namespace {
    pub prefix: String,
    pub uri: String,
}

impl Namespace {
    pub fn new(prefix: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            uri: uri.into(),
        }
    }
}

/// Applicability test: a check with dialects only runs on documents for
/// which at least one dialect expression is true.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dialect {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xpath: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<Expression>,
}

impl Dialect {
    pub fn xpath(name: impl Into<String>, xpath: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            xpath: Some(xpath.into()),
            expression: None,
        }
    }

    #[must_use]
    pub fn path(&self) -> Option<(SelectorSyntax, &str)> {
        if let Some(expr) = &self.expression {
            return Some((expr.syntax, expr.value.as_str()));
        }
        self.xpath.as_deref().map(|x| (SelectorSyntax::XPath, x))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_check_suite() -> Suite {
        Suite::new("suite.1", "Test suite")
            .with_check(Check::new("check.1").environment("r").code("TRUE"))
            .with_check(Check::new("check.2").environment("ecma").code("true"))
    }

    #[test]
    fn test_structural_problems_clean_suite() {
        assert!(two_check_suite().structural_problems().is_empty());
    }

    #[test]
    fn test_structural_problems_detects_duplicates_and_empty() {
        let empty = Suite::new("s", "empty");
        assert_eq!(empty.structural_problems().len(), 1);

        let dup = two_check_suite().with_check(Check::new("check.1").code("TRUE"));
        let problems = dup.structural_problems();
        assert_eq!(problems, vec!["duplicate check id 'check.1'".to_string()]);
    }

    #[test]
    fn test_selector_path_prefers_expression() {
        let mut selector = Selector::xpath("title", "//title");
        assert_eq!(selector.path(), Some((SelectorSyntax::XPath, "//title")));

        selector.expression = Some(Expression {
            syntax: SelectorSyntax::JsonPath,
            value: ".name".into(),
        });
        assert_eq!(selector.path(), Some((SelectorSyntax::JsonPath, ".name")));
    }

    #[test]
    fn test_reference_check() {
        assert!(Check::new("check.shared").is_reference());
        assert!(!Check::new("check.inline").code("TRUE").is_reference());
        assert_eq!(Check::new("c").effective_level(), Level::Info);
    }

    #[test]
    fn test_selector_syntax_parse() {
        assert_eq!(SelectorSyntax::parse("json-path"), Some(SelectorSyntax::JsonPath));
        assert_eq!(SelectorSyntax::parse(""), Some(SelectorSyntax::XPath));
        assert_eq!(SelectorSyntax::parse("sql"), None);
    }
}
