//! XPath 1.0 expressions over [`XmlDocument`] trees.
//!
//! Supports location paths with the common axes, predicates, unions, the
//! full operator set and the core string/number/boolean function library.
//! Variables and processing-instruction tests are not supported.

use super::xml::{NodeId, NodeKind, QName, XmlDocument, ROOT};
use crate::model::format_number;
use std::collections::HashMap;
use thiserror::Error;

/// Nesting limit for parenthesised expressions and predicates.
const MAX_NESTING: usize = 128;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum XPathError {
    #[error("syntax error at {position}: {message}")]
    Syntax { position: usize, message: String },

    #[error("namespace prefix '{0}' is not bound")]
    UnboundPrefix(String),

    #[error("unknown function '{0}()'")]
    UnknownFunction(String),

    #[error("{function}() expects {expected} argument(s)")]
    Arity {
        function: String,
        expected: &'static str,
    },

    #[error("type error: {0}")]
    Type(String),
}

/// Prefix bindings used to resolve prefixed name tests.
///
/// When not namespace-aware, names are compared as written in the document
/// (`eml:eml` matches the literal `eml:eml` qualified name).
#[derive(Debug, Clone, Default)]
pub struct NamespaceContext {
    aware: bool,
    bindings: HashMap<String, String>,
}

impl NamespaceContext {
    #[must_use]
    pub fn new(aware: bool) -> Self {
        Self {
            aware,
            bindings: HashMap::new(),
        }
    }

    /// Bind a prefix; later bindings replace earlier ones.
    pub fn bind(&mut self, prefix: &str, uri: &str) {
        self.bindings.insert(prefix.to_string(), uri.to_string());
    }

    #[must_use]
    pub fn resolve(&self, prefix: &str) -> Option<&str> {
        self.bindings.get(prefix).map(String::as_str)
    }

    #[must_use]
    pub const fn is_aware(&self) -> bool {
        self.aware
    }
}

/// Result of evaluating an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum XPathValue {
    /// Nodes in document order, without duplicates
    NodeSet(Vec<NodeId>),
    Boolean(bool),
    Number(f64),
    String(String),
}

impl XPathValue {
    #[must_use]
    pub fn to_boolean(&self) -> bool {
        match self {
            Self::NodeSet(nodes) => !nodes.is_empty(),
            Self::Boolean(b) => *b,
            Self::Number(n) => *n != 0.0 && !n.is_nan(),
            Self::String(s) => !s.is_empty(),
        }
    }

    #[must_use]
    pub fn to_number(&self, doc: &XmlDocument) -> f64 {
        match self {
            Self::Number(n) => *n,
            Self::Boolean(b) => f64::from(u8::from(*b)),
            other => str_to_number(&other.to_text(doc)),
        }
    }

    #[must_use]
    pub fn to_text(&self, doc: &XmlDocument) -> String {
        match self {
            Self::NodeSet(nodes) => nodes
                .first()
                .map(|&n| doc.string_value(n))
                .unwrap_or_default(),
            Self::Boolean(b) => b.to_string(),
            Self::Number(n) => format_number(*n),
            Self::String(s) => s.clone(),
        }
    }
}

fn str_to_number(s: &str) -> f64 {
    let t = s.trim();
    let body = t.strip_prefix('-').unwrap_or(t);
    let valid = !body.is_empty()
        && body != "."
        && body.chars().all(|c| c.is_ascii_digit() || c == '.')
        && body.chars().filter(|&c| c == '.').count() <= 1;
    if valid {
        t.parse().unwrap_or(f64::NAN)
    } else {
        f64::NAN
    }
}

// ============================================================================
// Syntax tree
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Child,
    Descendant,
    DescendantOrSelf,
    Parent,
    SelfAxis,
    Attribute,
    Ancestor,
    AncestorOrSelf,
    FollowingSibling,
    PrecedingSibling,
    Following,
    Preceding,
}

impl Axis {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "child" => Self::Child,
            "descendant" => Self::Descendant,
            "descendant-or-self" => Self::DescendantOrSelf,
            "parent" => Self::Parent,
            "self" => Self::SelfAxis,
            "attribute" => Self::Attribute,
            "ancestor" => Self::Ancestor,
            "ancestor-or-self" => Self::AncestorOrSelf,
            "following-sibling" => Self::FollowingSibling,
            "preceding-sibling" => Self::PrecedingSibling,
            "following" => Self::Following,
            "preceding" => Self::Preceding,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
enum NodeTest {
    Any,
    PrefixAny(String),
    Name { prefix: Option<String>, local: String },
    Text,
    Node,
    Comment,
}

#[derive(Debug, Clone, PartialEq)]
struct Step {
    axis: Axis,
    test: NodeTest,
    predicates: Vec<Expr>,
}

impl Step {
    fn descendant_or_self() -> Self {
        Self {
            axis: Axis::DescendantOrSelf,
            test: NodeTest::Node,
            predicates: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Neq,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Or(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Compare(CmpOp, Box<Expr>, Box<Expr>),
    Arith(ArithOp, Box<Expr>, Box<Expr>),
    Neg(Box<Expr>),
    Union(Box<Expr>, Box<Expr>),
    Literal(String),
    Number(f64),
    Function(String, Vec<Expr>),
    Path { absolute: bool, steps: Vec<Step> },
    Filter {
        primary: Box<Expr>,
        predicates: Vec<Expr>,
        steps: Vec<Step>,
    },
}

const FUNCTIONS: &[&str] = &[
    "count",
    "last",
    "position",
    "name",
    "local-name",
    "namespace-uri",
    "string",
    "concat",
    "contains",
    "starts-with",
    "ends-with",
    "substring",
    "substring-before",
    "substring-after",
    "string-length",
    "normalize-space",
    "translate",
    "upper-case",
    "lower-case",
    "boolean",
    "not",
    "true",
    "false",
    "number",
    "sum",
    "floor",
    "ceiling",
    "round",
];

// ============================================================================
// Lexer
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Slash,
    DoubleSlash,
    Dot,
    DotDot,
    At,
    Comma,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Pipe,
    Plus,
    Minus,
    Eq,
    Neq,
    Lt,
    Le,
    Gt,
    Ge,
    Multiply,
    Star,
    And,
    Or,
    Div,
    Mod,
    Literal(String),
    Number(f64),
    /// `local` is `*` for a `prefix:*` test
    Name {
        prefix: Option<String>,
        local: String,
    },
    Function(String),
    NodeType(String),
    Axis(String),
    Variable(String),
}

impl Token {
    const fn is_operator(&self) -> bool {
        matches!(
            self,
            Self::Slash
                | Self::DoubleSlash
                | Self::Pipe
                | Self::Plus
                | Self::Minus
                | Self::Eq
                | Self::Neq
                | Self::Lt
                | Self::Le
                | Self::Gt
                | Self::Ge
                | Self::Multiply
                | Self::And
                | Self::Or
                | Self::Div
                | Self::Mod
        )
    }
}

fn is_name_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.')
}

fn tokenize(input: &str) -> Result<Vec<(usize, Token)>, XPathError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens: Vec<(usize, Token)> = Vec::new();
    let mut i = 0;
    let syntax = |position: usize, message: String| XPathError::Syntax { position, message };

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        let start = i;
        let next = chars.get(i + 1).copied();
        // An operator is expected after anything that can end an operand.
        let operator_context = tokens.last().is_some_and(|(_, t)| {
            !t.is_operator()
                && !matches!(
                    t,
                    Token::At | Token::Axis(_) | Token::LParen | Token::LBracket | Token::Comma
                )
        });

        let token = match c {
            '/' if next == Some('/') => {
                i += 2;
                Token::DoubleSlash
            }
            '/' => {
                i += 1;
                Token::Slash
            }
            '.' if next == Some('.') => {
                i += 2;
                Token::DotDot
            }
            '.' if next.is_some_and(|n| n.is_ascii_digit()) => {
                let (n, end) = lex_number(&chars, i);
                i = end;
                Token::Number(n)
            }
            '.' => {
                i += 1;
                Token::Dot
            }
            '@' => {
                i += 1;
                Token::At
            }
            ',' => {
                i += 1;
                Token::Comma
            }
            '(' => {
                i += 1;
                Token::LParen
            }
            ')' => {
                i += 1;
                Token::RParen
            }
            '[' => {
                i += 1;
                Token::LBracket
            }
            ']' => {
                i += 1;
                Token::RBracket
            }
            '|' => {
                i += 1;
                Token::Pipe
            }
            '+' => {
                i += 1;
                Token::Plus
            }
            '-' => {
                i += 1;
                Token::Minus
            }
            '=' => {
                i += 1;
                Token::Eq
            }
            '!' if next == Some('=') => {
                i += 2;
                Token::Neq
            }
            '<' if next == Some('=') => {
                i += 2;
                Token::Le
            }
            '<' => {
                i += 1;
                Token::Lt
            }
            '>' if next == Some('=') => {
                i += 2;
                Token::Ge
            }
            '>' => {
                i += 1;
                Token::Gt
            }
            '*' => {
                i += 1;
                if operator_context {
                    Token::Multiply
                } else {
                    Token::Star
                }
            }
            '"' | '\'' => {
                let close = chars[i + 1..]
                    .iter()
                    .position(|&q| q == c)
                    .ok_or_else(|| syntax(start, "unterminated string literal".to_string()))?;
                let literal: String = chars[i + 1..i + 1 + close].iter().collect();
                i += close + 2;
                Token::Literal(literal)
            }
            '$' => {
                let (name, end) = lex_name(&chars, i + 1);
                if name.is_empty() {
                    return Err(syntax(start, "expected variable name after '$'".to_string()));
                }
                i = end;
                Token::Variable(name)
            }
            c if c.is_ascii_digit() => {
                let (n, end) = lex_number(&chars, i);
                i = end;
                Token::Number(n)
            }
            c if is_name_start(c) => {
                let (name, end) = lex_name(&chars, i);
                i = end;
                if operator_context {
                    let op = match name.as_str() {
                        "and" => Some(Token::And),
                        "or" => Some(Token::Or),
                        "div" => Some(Token::Div),
                        "mod" => Some(Token::Mod),
                        _ => None,
                    };
                    if let Some(op) = op {
                        tokens.push((start, op));
                        continue;
                    }
                }
                if chars.get(i) == Some(&':') && chars.get(i + 1) == Some(&':') {
                    i += 2;
                    tokens.push((start, Token::Axis(name)));
                    continue;
                }
                let (prefix, local) = if chars.get(i) == Some(&':') {
                    match chars.get(i + 1) {
                        Some('*') => {
                            i += 2;
                            (Some(name), "*".to_string())
                        }
                        Some(&n) if is_name_start(n) => {
                            let (local, end) = lex_name(&chars, i + 1);
                            i = end;
                            (Some(name), local)
                        }
                        _ => return Err(syntax(i, "expected local name after ':'".to_string())),
                    }
                } else {
                    (None, name)
                };
                let mut look = i;
                while chars.get(look).is_some_and(|c| c.is_whitespace()) {
                    look += 1;
                }
                if chars.get(look) == Some(&'(') && local != "*" {
                    match (&prefix, local.as_str()) {
                        (None, "text" | "node" | "comment" | "processing-instruction") => {
                            Token::NodeType(local)
                        }
                        (_, _) => Token::Function(local),
                    }
                } else {
                    Token::Name { prefix, local }
                }
            }
            other => {
                return Err(syntax(start, format!("unexpected character '{other}'")));
            }
        };
        tokens.push((start, token));
    }
    Ok(tokens)
}

fn lex_name(chars: &[char], start: usize) -> (String, usize) {
    let mut end = start;
    if chars.get(end).is_some_and(|&c| is_name_start(c)) {
        end += 1;
        while chars.get(end).is_some_and(|&c| is_name_char(c)) {
            end += 1;
        }
    }
    (chars[start..end].iter().collect(), end)
}

fn lex_number(chars: &[char], start: usize) -> (f64, usize) {
    let mut end = start;
    let mut seen_dot = false;
    while let Some(&c) = chars.get(end) {
        if c.is_ascii_digit() {
            end += 1;
        } else if c == '.' && !seen_dot && chars.get(end + 1) != Some(&'.') {
            seen_dot = true;
            end += 1;
        } else {
            break;
        }
    }
    let text: String = chars[start..end].iter().collect();
    (text.parse().unwrap_or(f64::NAN), end)
}

// ============================================================================
// Parser
// ============================================================================

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    depth: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(_, t)| t.clone());
        self.pos += 1;
        token
    }

    fn position(&self) -> usize {
        self.tokens.get(self.pos).map_or(self.end, |(p, _)| *p)
    }

    fn error(&self, message: impl Into<String>) -> XPathError {
        XPathError::Syntax {
            position: self.position(),
            message: message.into(),
        }
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token, what: &str) -> Result<(), XPathError> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.error(format!("expected {what}")))
        }
    }

    fn parse_expr(&mut self) -> Result<Expr, XPathError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(self.error("expression nested too deeply"));
        }
        let expr = self.parse_or();
        self.depth -= 1;
        expr
    }

    fn parse_or(&mut self) -> Result<Expr, XPathError> {
        let mut left = self.parse_and()?;
        while self.eat(&Token::Or) {
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, XPathError> {
        let mut left = self.parse_equality()?;
        while self.eat(&Token::And) {
            let right = self.parse_equality()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr, XPathError> {
        let mut left = self.parse_relational()?;
        loop {
            let op = match self.peek() {
                Some(Token::Eq) => CmpOp::Eq,
                Some(Token::Neq) => CmpOp::Neq,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.parse_relational()?;
            left = Expr::Compare(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_relational(&mut self) -> Result<Expr, XPathError> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Some(Token::Lt) => CmpOp::Lt,
                Some(Token::Le) => CmpOp::Le,
                Some(Token::Gt) => CmpOp::Gt,
                Some(Token::Ge) => CmpOp::Ge,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.parse_additive()?;
            left = Expr::Compare(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_additive(&mut self) -> Result<Expr, XPathError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => ArithOp::Add,
                Some(Token::Minus) => ArithOp::Sub,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.parse_multiplicative()?;
            left = Expr::Arith(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, XPathError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Multiply) => ArithOp::Mul,
                Some(Token::Div) => ArithOp::Div,
                Some(Token::Mod) => ArithOp::Mod,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.parse_unary()?;
            left = Expr::Arith(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, XPathError> {
        let mut negations = 0usize;
        while self.eat(&Token::Minus) {
            negations += 1;
        }
        let mut expr = self.parse_union()?;
        if negations % 2 == 1 {
            expr = Expr::Neg(Box::new(expr));
        }
        Ok(expr)
    }

    fn parse_union(&mut self) -> Result<Expr, XPathError> {
        let mut left = self.parse_path()?;
        while self.eat(&Token::Pipe) {
            let right = self.parse_path()?;
            left = Expr::Union(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_path(&mut self) -> Result<Expr, XPathError> {
        match self.peek() {
            Some(
                Token::Literal(_)
                | Token::Number(_)
                | Token::LParen
                | Token::Function(_)
                | Token::Variable(_),
            ) => {
                let primary = self.parse_primary()?;
                let predicates = self.parse_predicates()?;
                let steps = match self.peek() {
                    Some(Token::Slash | Token::DoubleSlash) => self.parse_continuation()?,
                    _ => Vec::new(),
                };
                if predicates.is_empty() && steps.is_empty() {
                    Ok(primary)
                } else {
                    Ok(Expr::Filter {
                        primary: Box::new(primary),
                        predicates,
                        steps,
                    })
                }
            }
            Some(Token::Slash) => {
                self.pos += 1;
                let steps = if self.can_start_step() {
                    self.parse_relative()?
                } else {
                    Vec::new()
                };
                Ok(Expr::Path {
                    absolute: true,
                    steps,
                })
            }
            Some(Token::DoubleSlash) => {
                self.pos += 1;
                let mut steps = vec![Step::descendant_or_self()];
                steps.extend(self.parse_relative()?);
                Ok(Expr::Path {
                    absolute: true,
                    steps,
                })
            }
            Some(_) if self.can_start_step() => Ok(Expr::Path {
                absolute: false,
                steps: self.parse_relative()?,
            }),
            Some(_) => Err(self.error("unexpected token")),
            None => Err(self.error("unexpected end of expression")),
        }
    }

    fn can_start_step(&self) -> bool {
        matches!(
            self.peek(),
            Some(
                Token::Dot
                    | Token::DotDot
                    | Token::At
                    | Token::Star
                    | Token::Name { .. }
                    | Token::NodeType(_)
                    | Token::Axis(_)
            )
        )
    }

    /// Steps following a filter expression, starting at `/` or `//`.
    fn parse_continuation(&mut self) -> Result<Vec<Step>, XPathError> {
        let mut steps = Vec::new();
        loop {
            match self.peek() {
                Some(Token::Slash) => self.pos += 1,
                Some(Token::DoubleSlash) => {
                    self.pos += 1;
                    steps.push(Step::descendant_or_self());
                }
                _ => return Ok(steps),
            }
            steps.push(self.parse_step()?);
        }
    }

    fn parse_relative(&mut self) -> Result<Vec<Step>, XPathError> {
        let mut steps = vec![self.parse_step()?];
        steps.extend(self.parse_continuation()?);
        Ok(steps)
    }

    fn parse_step(&mut self) -> Result<Step, XPathError> {
        let axis = match self.peek() {
            Some(Token::Dot) => {
                self.pos += 1;
                return Ok(Step {
                    axis: Axis::SelfAxis,
                    test: NodeTest::Node,
                    predicates: Vec::new(),
                });
            }
            Some(Token::DotDot) => {
                self.pos += 1;
                return Ok(Step {
                    axis: Axis::Parent,
                    test: NodeTest::Node,
                    predicates: Vec::new(),
                });
            }
            Some(Token::At) => {
                self.pos += 1;
                Axis::Attribute
            }
            Some(Token::Axis(name)) => {
                let axis = Axis::from_name(name)
                    .ok_or_else(|| self.error(format!("unknown axis '{name}'")))?;
                self.pos += 1;
                axis
            }
            _ => Axis::Child,
        };
        let test = self.parse_node_test()?;
        let predicates = self.parse_predicates()?;
        Ok(Step {
            axis,
            test,
            predicates,
        })
    }

    fn parse_node_test(&mut self) -> Result<NodeTest, XPathError> {
        match self.advance() {
            Some(Token::Star) => Ok(NodeTest::Any),
            Some(Token::Name { prefix, local }) => match prefix {
                Some(p) if local == "*" => Ok(NodeTest::PrefixAny(p)),
                prefix => Ok(NodeTest::Name { prefix, local }),
            },
            Some(Token::NodeType(kind)) => {
                self.expect(&Token::LParen, "'('")?;
                self.expect(&Token::RParen, "')'")?;
                match kind.as_str() {
                    "text" => Ok(NodeTest::Text),
                    "node" => Ok(NodeTest::Node),
                    "comment" => Ok(NodeTest::Comment),
                    other => Err(self.error(format!("unsupported node test '{other}()'"))),
                }
            }
            _ => {
                self.pos = self.pos.saturating_sub(1);
                Err(self.error("expected a node test"))
            }
        }
    }

    fn parse_predicates(&mut self) -> Result<Vec<Expr>, XPathError> {
        let mut predicates = Vec::new();
        while self.eat(&Token::LBracket) {
            predicates.push(self.parse_expr()?);
            self.expect(&Token::RBracket, "']'")?;
        }
        Ok(predicates)
    }

    fn parse_primary(&mut self) -> Result<Expr, XPathError> {
        match self.advance() {
            Some(Token::LParen) => {
                let expr = self.parse_expr()?;
                self.expect(&Token::RParen, "')'")?;
                Ok(expr)
            }
            Some(Token::Literal(s)) => Ok(Expr::Literal(s)),
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Variable(name)) => {
                Err(self.error(format!("variable references are not supported (${name})")))
            }
            Some(Token::Function(name)) => {
                if !FUNCTIONS.contains(&name.as_str()) {
                    return Err(XPathError::UnknownFunction(name));
                }
                self.expect(&Token::LParen, "'('")?;
                let mut args = Vec::new();
                if !self.eat(&Token::RParen) {
                    loop {
                        args.push(self.parse_expr()?);
                        if self.eat(&Token::Comma) {
                            continue;
                        }
                        self.expect(&Token::RParen, "')' or ','")?;
                        break;
                    }
                }
                Ok(Expr::Function(name, args))
            }
            _ => Err(self.error("expected an expression")),
        }
    }
}

// ============================================================================
// Evaluation
// ============================================================================

/// A compiled XPath expression.
#[derive(Debug, Clone)]
pub struct XPath {
    source: String,
    expr: Expr,
}

impl XPath {
    /// Parse an expression.
    pub fn parse(source: &str) -> Result<Self, XPathError> {
        let tokens = tokenize(source)?;
        if tokens.is_empty() {
            return Err(XPathError::Syntax {
                position: 0,
                message: "empty expression".to_string(),
            });
        }
        let mut parser = Parser {
            tokens,
            pos: 0,
            depth: 0,
            end: source.chars().count(),
        };
        let expr = parser.parse_expr()?;
        if parser.pos < parser.tokens.len() {
            return Err(parser.error("unexpected trailing input"));
        }
        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate against `context` within `doc`.
    pub fn evaluate(
        &self,
        doc: &XmlDocument,
        context: NodeId,
        namespaces: &NamespaceContext,
    ) -> Result<XPathValue, XPathError> {
        let evaluator = Evaluator { doc, namespaces };
        evaluator.eval(
            &self.expr,
            Ctx {
                node: context,
                position: 1,
                size: 1,
            },
        )
    }
}

#[derive(Debug, Clone, Copy)]
struct Ctx {
    node: NodeId,
    position: usize,
    size: usize,
}

struct Evaluator<'a> {
    doc: &'a XmlDocument,
    namespaces: &'a NamespaceContext,
}

impl Evaluator<'_> {
    fn eval(&self, expr: &Expr, ctx: Ctx) -> Result<XPathValue, XPathError> {
        match expr {
            Expr::Or(a, b) => Ok(XPathValue::Boolean(
                self.eval(a, ctx)?.to_boolean() || self.eval(b, ctx)?.to_boolean(),
            )),
            Expr::And(a, b) => Ok(XPathValue::Boolean(
                self.eval(a, ctx)?.to_boolean() && self.eval(b, ctx)?.to_boolean(),
            )),
            Expr::Compare(op, a, b) => {
                let left = self.eval(a, ctx)?;
                let right = self.eval(b, ctx)?;
                Ok(XPathValue::Boolean(self.compare(*op, &left, &right)))
            }
            Expr::Arith(op, a, b) => {
                let l = self.eval(a, ctx)?.to_number(self.doc);
                let r = self.eval(b, ctx)?.to_number(self.doc);
                Ok(XPathValue::Number(match op {
                    ArithOp::Add => l + r,
                    ArithOp::Sub => l - r,
                    ArithOp::Mul => l * r,
                    ArithOp::Div => l / r,
                    ArithOp::Mod => l % r,
                }))
            }
            Expr::Neg(a) => Ok(XPathValue::Number(-self.eval(a, ctx)?.to_number(self.doc))),
            Expr::Union(a, b) => {
                let mut left = self.node_set(a, ctx)?;
                left.extend(self.node_set(b, ctx)?);
                left.sort_unstable();
                left.dedup();
                Ok(XPathValue::NodeSet(left))
            }
            Expr::Literal(s) => Ok(XPathValue::String(s.clone())),
            Expr::Number(n) => Ok(XPathValue::Number(*n)),
            Expr::Function(name, args) => self.call(name, args, ctx),
            Expr::Path { absolute, steps } => {
                let start = if *absolute { ROOT } else { ctx.node };
                Ok(XPathValue::NodeSet(self.walk(vec![start], steps)?))
            }
            Expr::Filter {
                primary,
                predicates,
                steps,
            } => {
                let nodes = self.node_set(primary, ctx)?;
                let nodes = self.filter(nodes, predicates)?;
                Ok(XPathValue::NodeSet(self.walk(nodes, steps)?))
            }
        }
    }

    fn node_set(&self, expr: &Expr, ctx: Ctx) -> Result<Vec<NodeId>, XPathError> {
        match self.eval(expr, ctx)? {
            XPathValue::NodeSet(nodes) => Ok(nodes),
            other => Err(XPathError::Type(format!(
                "expected a node-set, found {}",
                value_kind(&other)
            ))),
        }
    }

    fn walk(&self, mut nodes: Vec<NodeId>, steps: &[Step]) -> Result<Vec<NodeId>, XPathError> {
        for step in steps {
            let mut next = Vec::new();
            for &node in &nodes {
                let mut candidates = Vec::new();
                for id in self.axis(step.axis, node) {
                    if self.matches(&step.test, step.axis, id)? {
                        candidates.push(id);
                    }
                }
                next.extend(self.filter(candidates, &step.predicates)?);
            }
            next.sort_unstable();
            next.dedup();
            nodes = next;
        }
        Ok(nodes)
    }

    fn filter(&self, mut nodes: Vec<NodeId>, predicates: &[Expr]) -> Result<Vec<NodeId>, XPathError> {
        for predicate in predicates {
            let size = nodes.len();
            let mut kept = Vec::with_capacity(size);
            for (index, &node) in nodes.iter().enumerate() {
                let ctx = Ctx {
                    node,
                    position: index + 1,
                    size,
                };
                let keep = match self.eval(predicate, ctx)? {
                    XPathValue::Number(n) => n == (index + 1) as f64,
                    other => other.to_boolean(),
                };
                if keep {
                    kept.push(node);
                }
            }
            nodes = kept;
        }
        Ok(nodes)
    }

    fn is_attribute(&self, id: NodeId) -> bool {
        matches!(self.doc.node(id).kind, NodeKind::Attribute { .. })
    }

    fn last_descendant(&self, id: NodeId) -> NodeId {
        let mut current = id;
        loop {
            let node = self.doc.node(current);
            if let Some(&last) = node.children.last() {
                current = last;
            } else if let Some(&last) = node.attributes.last() {
                return last;
            } else {
                return current;
            }
        }
    }

    fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut current = self.doc.node(id).parent;
        while let Some(p) = current {
            out.push(p);
            current = self.doc.node(p).parent;
        }
        out
    }

    /// Nodes along an axis in proximity order.
    fn axis(&self, axis: Axis, id: NodeId) -> Vec<NodeId> {
        let node = self.doc.node(id);
        match axis {
            Axis::Child => node.children.clone(),
            Axis::Attribute => node.attributes.clone(),
            Axis::SelfAxis => vec![id],
            Axis::Parent => node.parent.into_iter().collect(),
            Axis::Descendant | Axis::DescendantOrSelf => {
                let mut out = Vec::new();
                if axis == Axis::DescendantOrSelf {
                    out.push(id);
                }
                if !self.is_attribute(id) {
                    let last = self.last_descendant(id);
                    out.extend((id + 1..=last).filter(|&n| !self.is_attribute(n)));
                }
                out
            }
            Axis::Ancestor => self.ancestors(id),
            Axis::AncestorOrSelf => {
                let mut out = vec![id];
                out.extend(self.ancestors(id));
                out
            }
            Axis::FollowingSibling | Axis::PrecedingSibling => {
                if self.is_attribute(id) {
                    return Vec::new();
                }
                let Some(parent) = node.parent else {
                    return Vec::new();
                };
                let siblings = &self.doc.node(parent).children;
                let Some(index) = siblings.iter().position(|&s| s == id) else {
                    return Vec::new();
                };
                if axis == Axis::FollowingSibling {
                    siblings[index + 1..].to_vec()
                } else {
                    siblings[..index].iter().rev().copied().collect()
                }
            }
            Axis::Following => {
                let last = self.last_descendant(id);
                (last + 1..self.doc.len())
                    .filter(|&n| !self.is_attribute(n))
                    .collect()
            }
            Axis::Preceding => {
                let ancestors = self.ancestors(id);
                (1..id)
                    .rev()
                    .filter(|n| !self.is_attribute(*n) && !ancestors.contains(n))
                    .collect()
            }
        }
    }

    fn matches(&self, test: &NodeTest, axis: Axis, id: NodeId) -> Result<bool, XPathError> {
        let kind = &self.doc.node(id).kind;
        let attribute_axis = axis == Axis::Attribute;
        let name = match (kind, attribute_axis) {
            (NodeKind::Element(q), false) => Some(q),
            (NodeKind::Attribute { name, .. }, true) => Some(name),
            _ => None,
        };
        match test {
            NodeTest::Node => Ok(true),
            NodeTest::Text => Ok(matches!(kind, NodeKind::Text(_))),
            NodeTest::Comment => Ok(matches!(kind, NodeKind::Comment(_))),
            NodeTest::Any => Ok(name.is_some()),
            NodeTest::PrefixAny(prefix) => match name {
                None => Ok(false),
                Some(q) if self.namespaces.is_aware() => {
                    let uri = self.resolve(prefix)?;
                    Ok(q.namespace.as_deref() == Some(uri))
                }
                Some(q) => Ok(q.prefix.as_deref() == Some(prefix.as_str())),
            },
            NodeTest::Name { prefix, local } => match name {
                None => Ok(false),
                Some(q) => self.name_matches(q, prefix.as_deref(), local),
            },
        }
    }

    fn name_matches(&self, q: &QName, prefix: Option<&str>, local: &str) -> Result<bool, XPathError> {
        if q.local != local {
            return Ok(false);
        }
        if !self.namespaces.is_aware() {
            return Ok(q.prefix.as_deref() == prefix);
        }
        match prefix {
            Some(p) => {
                let uri = self.resolve(p)?;
                Ok(q.namespace.as_deref() == Some(uri))
            }
            None => Ok(q.namespace.is_none()),
        }
    }

    fn resolve(&self, prefix: &str) -> Result<&str, XPathError> {
        self.namespaces
            .resolve(prefix)
            .ok_or_else(|| XPathError::UnboundPrefix(prefix.to_string()))
    }

    fn compare(&self, op: CmpOp, left: &XPathValue, right: &XPathValue) -> bool {
        match (left, right) {
            (XPathValue::NodeSet(a), XPathValue::NodeSet(b)) => {
                let right_values: Vec<String> = b.iter().map(|&n| self.doc.string_value(n)).collect();
                a.iter().any(|&x| {
                    let lx = XPathValue::String(self.doc.string_value(x));
                    right_values
                        .iter()
                        .any(|ry| self.compare_atomic(op, &lx, &XPathValue::String(ry.clone())))
                })
            }
            (XPathValue::NodeSet(a), XPathValue::Boolean(_)) => {
                self.compare_atomic(op, &XPathValue::Boolean(!a.is_empty()), right)
            }
            (XPathValue::Boolean(_), XPathValue::NodeSet(b)) => {
                self.compare_atomic(op, left, &XPathValue::Boolean(!b.is_empty()))
            }
            (XPathValue::NodeSet(a), other) => a.iter().any(|&x| {
                self.compare_atomic(op, &XPathValue::String(self.doc.string_value(x)), other)
            }),
            (other, XPathValue::NodeSet(b)) => b.iter().any(|&y| {
                self.compare_atomic(op, other, &XPathValue::String(self.doc.string_value(y)))
            }),
            _ => self.compare_atomic(op, left, right),
        }
    }

    fn compare_atomic(&self, op: CmpOp, left: &XPathValue, right: &XPathValue) -> bool {
        match op {
            CmpOp::Eq | CmpOp::Neq => {
                let equal = match (left, right) {
                    (XPathValue::Boolean(_), _) | (_, XPathValue::Boolean(_)) => {
                        left.to_boolean() == right.to_boolean()
                    }
                    (XPathValue::Number(_), _) | (_, XPathValue::Number(_)) => {
                        left.to_number(self.doc) == right.to_number(self.doc)
                    }
                    _ => left.to_text(self.doc) == right.to_text(self.doc),
                };
                if op == CmpOp::Eq {
                    equal
                } else {
                    !equal
                }
            }
            _ => {
                let l = left.to_number(self.doc);
                let r = right.to_number(self.doc);
                match op {
                    CmpOp::Lt => l < r,
                    CmpOp::Le => l <= r,
                    CmpOp::Gt => l > r,
                    _ => l >= r,
                }
            }
        }
    }

    fn arity(name: &str, args: &[Expr], min: usize, max: usize, expected: &'static str) -> Result<(), XPathError> {
        if args.len() < min || args.len() > max {
            return Err(XPathError::Arity {
                function: name.to_string(),
                expected,
            });
        }
        Ok(())
    }

    fn text_arg(&self, args: &[Expr], index: usize, ctx: Ctx) -> Result<String, XPathError> {
        match args.get(index) {
            Some(expr) => Ok(self.eval(expr, ctx)?.to_text(self.doc)),
            None => Ok(self.doc.string_value(ctx.node)),
        }
    }

    fn number_arg(&self, args: &[Expr], index: usize, ctx: Ctx) -> Result<f64, XPathError> {
        match args.get(index) {
            Some(expr) => Ok(self.eval(expr, ctx)?.to_number(self.doc)),
            None => Ok(str_to_number(&self.doc.string_value(ctx.node))),
        }
    }

    /// Node whose name a name function reports: the argument's first node or
    /// the context node.
    fn name_target(&self, args: &[Expr], ctx: Ctx) -> Result<Option<NodeId>, XPathError> {
        match args.first() {
            Some(expr) => Ok(self.node_set(expr, ctx)?.first().copied()),
            None => Ok(Some(ctx.node)),
        }
    }

    fn call(&self, name: &str, args: &[Expr], ctx: Ctx) -> Result<XPathValue, XPathError> {
        use XPathValue::{Boolean, Number, String as Str};

        match name {
            "last" => {
                Self::arity(name, args, 0, 0, "no")?;
                Ok(Number(ctx.size as f64))
            }
            "position" => {
                Self::arity(name, args, 0, 0, "no")?;
                Ok(Number(ctx.position as f64))
            }
            "count" => {
                Self::arity(name, args, 1, 1, "one")?;
                Ok(Number(self.node_set(&args[0], ctx)?.len() as f64))
            }
            "name" | "local-name" | "namespace-uri" => {
                Self::arity(name, args, 0, 1, "zero or one")?;
                let qname = self
                    .name_target(args, ctx)?
                    .and_then(|n| self.doc.name(n));
                Ok(Str(match (name, qname) {
                    (_, None) => String::new(),
                    ("name", Some(q)) => q.qualified(),
                    ("local-name", Some(q)) => q.local.clone(),
                    (_, Some(q)) => q.namespace.clone().unwrap_or_default(),
                }))
            }
            "string" => {
                Self::arity(name, args, 0, 1, "zero or one")?;
                Ok(Str(self.text_arg(args, 0, ctx)?))
            }
            "concat" => {
                Self::arity(name, args, 2, usize::MAX, "two or more")?;
                let mut out = String::new();
                for index in 0..args.len() {
                    out.push_str(&self.text_arg(args, index, ctx)?);
                }
                Ok(Str(out))
            }
            "contains" | "starts-with" | "ends-with" | "substring-before" | "substring-after" => {
                Self::arity(name, args, 2, 2, "two")?;
                let s = self.text_arg(args, 0, ctx)?;
                let pat = self.text_arg(args, 1, ctx)?;
                Ok(match name {
                    "contains" => Boolean(s.contains(&pat)),
                    "starts-with" => Boolean(s.starts_with(&pat)),
                    "ends-with" => Boolean(s.ends_with(&pat)),
                    "substring-before" => Str(s
                        .find(&pat)
                        .map(|i| s[..i].to_string())
                        .unwrap_or_default()),
                    _ => Str(s
                        .find(&pat)
                        .map(|i| s[i + pat.len()..].to_string())
                        .unwrap_or_default()),
                })
            }
            "substring" => {
                Self::arity(name, args, 2, 3, "two or three")?;
                let s = self.text_arg(args, 0, ctx)?;
                let start = xpath_round(self.number_arg(args, 1, ctx)?);
                let end = if args.len() == 3 {
                    start + xpath_round(self.number_arg(args, 2, ctx)?)
                } else {
                    f64::INFINITY
                };
                Ok(Str(s
                    .chars()
                    .enumerate()
                    .filter(|(i, _)| {
                        let p = (*i + 1) as f64;
                        p >= start && p < end
                    })
                    .map(|(_, c)| c)
                    .collect()))
            }
            "string-length" => {
                Self::arity(name, args, 0, 1, "zero or one")?;
                Ok(Number(self.text_arg(args, 0, ctx)?.chars().count() as f64))
            }
            "normalize-space" => {
                Self::arity(name, args, 0, 1, "zero or one")?;
                let s = self.text_arg(args, 0, ctx)?;
                Ok(Str(s.split_whitespace().collect::<Vec<_>>().join(" ")))
            }
            "translate" => {
                Self::arity(name, args, 3, 3, "three")?;
                let s = self.text_arg(args, 0, ctx)?;
                let from: Vec<char> = self.text_arg(args, 1, ctx)?.chars().collect();
                let to: Vec<char> = self.text_arg(args, 2, ctx)?.chars().collect();
                Ok(Str(s
                    .chars()
                    .filter_map(|c| match from.iter().position(|&f| f == c) {
                        Some(i) => to.get(i).copied(),
                        None => Some(c),
                    })
                    .collect()))
            }
            "upper-case" | "lower-case" => {
                Self::arity(name, args, 1, 1, "one")?;
                let s = self.text_arg(args, 0, ctx)?;
                Ok(Str(if name == "upper-case" {
                    s.to_uppercase()
                } else {
                    s.to_lowercase()
                }))
            }
            "boolean" => {
                Self::arity(name, args, 1, 1, "one")?;
                Ok(Boolean(self.eval(&args[0], ctx)?.to_boolean()))
            }
            "not" => {
                Self::arity(name, args, 1, 1, "one")?;
                Ok(Boolean(!self.eval(&args[0], ctx)?.to_boolean()))
            }
            "true" | "false" => {
                Self::arity(name, args, 0, 0, "no")?;
                Ok(Boolean(name == "true"))
            }
            "number" => {
                Self::arity(name, args, 0, 1, "zero or one")?;
                Ok(Number(self.number_arg(args, 0, ctx)?))
            }
            "sum" => {
                Self::arity(name, args, 1, 1, "one")?;
                Ok(Number(
                    self.node_set(&args[0], ctx)?
                        .iter()
                        .map(|&n| str_to_number(&self.doc.string_value(n)))
                        .sum(),
                ))
            }
            "floor" | "ceiling" | "round" => {
                Self::arity(name, args, 1, 1, "one")?;
                let n = self.number_arg(args, 0, ctx)?;
                Ok(Number(match name {
                    "floor" => n.floor(),
                    "ceiling" => n.ceil(),
                    _ => xpath_round(n),
                }))
            }
            other => Err(XPathError::UnknownFunction(other.to_string())),
        }
    }
}

/// Round half towards positive infinity.
fn xpath_round(n: f64) -> f64 {
    if n.is_nan() || n.is_infinite() {
        n
    } else {
        (n + 0.5).floor()
    }
}

const fn value_kind(value: &XPathValue) -> &'static str {
    match value {
        XPathValue::NodeSet(_) => "node-set",
        XPathValue::Boolean(_) => "boolean",
        XPathValue::Number(_) => "number",
        XPathValue::String(_) => "string",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EML: &str = r#"<eml:eml xmlns:eml="https://eml.ecoinformatics.org/eml-2.2.0" packageId="knb.1.1">
  <dataset>
    <title>Soil moisture and temperature at Toolik Lake</title>
    <creator id="a"><individualName><surName>Jones</surName></individualName></creator>
    <creator id="b"><individualName><surName>Smith</surName></individualName></creator>
    <dataTable><attributeList>
      <attribute><attributeName>site</attributeName></attribute>
      <attribute><attributeName>depth</attributeName></attribute>
      <attribute><attributeName>site</attributeName></attribute>
    </attributeList></dataTable>
    <otherEntity><entityName>photos</entityName></otherEntity>
  </dataset>
</eml:eml>"#;

    fn doc() -> XmlDocument {
        XmlDocument::parse(EML).expect("parse")
    }

    fn eval(expr: &str) -> XPathValue {
        let doc = doc();
        XPath::parse(expr)
            .expect("parse xpath")
            .evaluate(&doc, ROOT, &NamespaceContext::default())
            .expect("evaluate")
    }

    fn texts(expr: &str) -> Vec<String> {
        let doc = doc();
        match XPath::parse(expr)
            .expect("parse xpath")
            .evaluate(&doc, ROOT, &NamespaceContext::default())
            .expect("evaluate")
        {
            XPathValue::NodeSet(nodes) => nodes.iter().map(|&n| doc.string_value(n)).collect(),
            other => panic!("expected node-set, got {other:?}"),
        }
    }

    #[test]
    fn test_descendant_paths() {
        assert_eq!(
            texts("//dataset/title"),
            vec!["Soil moisture and temperature at Toolik Lake"]
        );
        assert_eq!(texts("//surName"), vec!["Jones", "Smith"]);
        assert_eq!(texts("//attribute/attributeName").len(), 3);
    }

    #[test]
    fn test_counts_and_unions() {
        assert_eq!(eval("count(//dataset/dataTable | //dataset/otherEntity)"), XPathValue::Number(2.0));
        assert_eq!(eval("count(//creator) * 2 + 1"), XPathValue::Number(5.0));
        assert_eq!(eval("10 div 4"), XPathValue::Number(2.5));
        assert_eq!(eval("7 mod 3"), XPathValue::Number(1.0));
    }

    #[test]
    fn test_attributes_and_predicates() {
        assert_eq!(texts("//creator[@id='b']//surName"), vec!["Smith"]);
        assert_eq!(texts("//creator[2]/@id"), vec!["b"]);
        assert_eq!(texts("//creator[last()]/@id"), vec!["b"]);
        assert_eq!(texts("/eml:eml/@packageId"), vec!["knb.1.1"]);
        assert_eq!(texts("//attribute[attributeName='site']").len(), 2);
    }

    #[test]
    fn test_string_functions() {
        assert_eq!(eval("string-length(//title) > 10"), XPathValue::Boolean(true));
        assert_eq!(eval("substring('12345', 2, 3)"), XPathValue::String("234".into()));
        assert_eq!(
            eval("normalize-space('  a   b ')"),
            XPathValue::String("a b".into())
        );
        assert_eq!(eval("translate('abc', 'ab', 'B')"), XPathValue::String("Bc".into()));
        assert_eq!(
            eval("concat(local-name(/*), '-', name(/*))"),
            XPathValue::String("eml-eml:eml".into())
        );
        assert_eq!(
            eval("substring-after('doi:10.5063', ':')"),
            XPathValue::String("10.5063".into())
        );
    }

    #[test]
    fn test_axes() {
        assert_eq!(texts("//surName/ancestor::creator/@id"), vec!["a", "b"]);
        assert_eq!(texts("//creator[1]/following-sibling::creator/@id"), vec!["b"]);
        assert_eq!(texts("//otherEntity/preceding-sibling::*[1]/attributeList/attribute[2]"), vec!["depth"]);
        assert_eq!(texts("//surName/text()"), vec!["Jones", "Smith"]);
        assert_eq!(texts("(//surName)[2]"), vec!["Smith"]);
        assert_eq!(texts("//surName[.='Jones']/../../@id"), vec!["a"]);
    }

    #[test]
    fn test_namespace_aware_matching() {
        let doc = doc();
        let mut ns = NamespaceContext::new(true);
        ns.bind("e", "https://eml.ecoinformatics.org/eml-2.2.0");
        let value = XPath::parse("count(/e:eml/dataset)")
            .expect("parse")
            .evaluate(&doc, ROOT, &ns)
            .expect("evaluate");
        assert_eq!(value, XPathValue::Number(1.0));

        let err = XPath::parse("/x:eml")
            .expect("parse")
            .evaluate(&doc, ROOT, &ns)
            .unwrap_err();
        assert_eq!(err, XPathError::UnboundPrefix("x".into()));
    }

    #[test]
    fn test_comparisons_with_node_sets() {
        assert_eq!(eval("//surName = 'Smith'"), XPathValue::Boolean(true));
        assert_eq!(eval("//surName != 'Smith'"), XPathValue::Boolean(true));
        assert_eq!(eval("//missing = 'x'"), XPathValue::Boolean(false));
        assert_eq!(eval("not(//missing)"), XPathValue::Boolean(true));
    }

    #[test]
    fn test_syntax_errors() {
        assert!(matches!(XPath::parse("//["), Err(XPathError::Syntax { .. })));
        assert!(matches!(XPath::parse("'open"), Err(XPathError::Syntax { .. })));
        assert!(matches!(XPath::parse(""), Err(XPathError::Syntax { .. })));
        assert_eq!(
            XPath::parse("frobnicate(1)").unwrap_err(),
            XPathError::UnknownFunction("frobnicate".into())
        );
        let deep = format!("{}1{}", "(".repeat(500), ")".repeat(500));
        assert!(XPath::parse(&deep).is_err());
    }
}
