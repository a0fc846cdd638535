//! Lexer and recursive-descent parser for the `ecma` rule language.

use super::super::lexer::{Cursor, Span};
use crate::script::ScriptError;
use std::rc::Rc;

const MAX_NESTING: usize = 160;

#[derive(Debug, Clone, PartialEq)]
pub(super) enum Tok {
    Num(f64),
    Str(String),
    Ident(String),
    Regex { pattern: String, flags: String },
    Punct(&'static str),
    Eof,
}

#[derive(Debug, Clone)]
pub(super) struct Token {
    tok: Tok,
    span: Span,
    newline_before: bool,
}

const PUNCTUATORS: &[&str] = &[
    "===", "!==", "**", "...", "=>", "==", "!=", "<=", ">=", "&&", "||", "??", "++", "--", "+=",
    "-=", "*=", "/=", "%=", "?.", "{", "}", "(", ")", "[", "]", ";", ",", "<", ">", "+", "-", "*",
    "/", "%", "!", "?", ":", "=", ".", "&", "|",
];

/// Keywords after which a `/` starts a regular expression.
const REGEX_PREFIX_KEYWORDS: &[&str] = &[
    "return", "typeof", "case", "in", "of", "new", "delete", "void", "throw",
];

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

pub(super) fn tokenize(source: &str) -> Result<Vec<Token>, ScriptError> {
    let mut cursor = Cursor::new(source);
    let mut tokens: Vec<Token> = Vec::new();
    let mut newline_before = false;

    loop {
        // Whitespace and comments
        loop {
            match cursor.peek() {
                Some('\n') => {
                    newline_before = true;
                    cursor.bump();
                }
                Some(c) if c.is_whitespace() => {
                    cursor.bump();
                }
                Some('/') if cursor.peek_at(1) == Some('/') => {
                    cursor.skip_while(|c| c != '\n');
                }
                Some('/') if cursor.peek_at(1) == Some('*') => {
                    let span = cursor.span();
                    cursor.bump();
                    cursor.bump();
                    loop {
                        match cursor.bump() {
                            None => return Err(span.error("unterminated comment")),
                            Some('*') if cursor.peek() == Some('/') => {
                                cursor.bump();
                                break;
                            }
                            Some('\n') => newline_before = true,
                            Some(_) => {}
                        }
                    }
                }
                _ => break,
            }
        }

        let span = cursor.span();
        let Some(c) = cursor.peek() else {
            tokens.push(Token {
                tok: Tok::Eof,
                span,
                newline_before: true,
            });
            return Ok(tokens);
        };

        let tok = if c.is_ascii_digit() || (c == '.' && cursor.peek_at(1).is_some_and(|d| d.is_ascii_digit())) {
            Tok::Num(cursor.read_number()?)
        } else if c == '"' || c == '\'' || c == '`' {
            Tok::Str(cursor.read_string()?)
        } else if is_ident_start(c) {
            Tok::Ident(cursor.take_while(is_ident_char))
        } else if c == '/' && regex_allowed(tokens.last()) {
            read_regex(&mut cursor, span)?
        } else {
            let punct = PUNCTUATORS
                .iter()
                .find(|p| cursor.eat_str(p))
                .copied()
                .ok_or_else(|| span.error(format!("unexpected character '{c}'")))?;
            Tok::Punct(punct)
        };
        tokens.push(Token {
            tok,
            span,
            newline_before,
        });
        newline_before = false;
    }
}

fn regex_allowed(previous: Option<&Token>) -> bool {
    match previous.map(|t| &t.tok) {
        None => true,
        Some(Tok::Num(_) | Tok::Str(_) | Tok::Regex { .. }) => false,
        Some(Tok::Ident(name)) => REGEX_PREFIX_KEYWORDS.contains(&name.as_str()),
        Some(Tok::Punct(p)) => !matches!(*p, ")" | "]" | "}" | "++" | "--"),
        Some(Tok::Eof) => true,
    }
}

fn read_regex(cursor: &mut Cursor, span: Span) -> Result<Tok, ScriptError> {
    cursor.bump();
    let mut pattern = String::new();
    let mut in_class = false;
    loop {
        match cursor.bump() {
            None | Some('\n') => return Err(span.error("unterminated regular expression")),
            Some('\\') => {
                pattern.push('\\');
                if let Some(next) = cursor.bump() {
                    pattern.push(next);
                }
            }
            Some('[') => {
                in_class = true;
                pattern.push('[');
            }
            Some(']') => {
                in_class = false;
                pattern.push(']');
            }
            Some('/') if !in_class => break,
            Some(c) => pattern.push(c),
        }
    }
    let flags = cursor.take_while(|c| c.is_ascii_alphabetic());
    Ok(Tok::Regex { pattern, flags })
}

// ============================================================================
// Syntax tree
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    Eq,
    NotEq,
    StrictEq,
    StrictNotEq,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum LogicOp {
    And,
    Or,
    Nullish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum UnaryOp {
    Not,
    Neg,
    Plus,
    TypeOf,
}

#[derive(Debug, Clone, PartialEq)]
pub(super) enum Expr {
    Num(f64),
    Str(String),
    Bool(bool),
    Null,
    Undefined,
    Regex { pattern: String, flags: String },
    Ident(String),
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Logic(LogicOp, Box<Expr>, Box<Expr>),
    Assign {
        target: Box<Expr>,
        op: Option<BinOp>,
        value: Box<Expr>,
    },
    Update {
        target: Box<Expr>,
        delta: f64,
        prefix: bool,
    },
    Cond(Box<Expr>, Box<Expr>, Box<Expr>),
    Member {
        object: Box<Expr>,
        name: String,
        optional: bool,
    },
    Index(Box<Expr>, Box<Expr>),
    Call(Box<Expr>, Vec<Expr>),
    Function(Rc<FuncDef>),
}

#[derive(Debug, Clone, PartialEq)]
pub(super) enum Body {
    Block(Vec<Stmt>),
    /// Concise arrow body
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub(super) struct FuncDef {
    pub name: Option<String>,
    pub params: Vec<String>,
    pub body: Body,
}

#[derive(Debug, Clone, PartialEq)]
pub(super) enum Stmt {
    Expr(Expr),
    Var(Vec<(String, Option<Expr>)>),
    Function(Rc<FuncDef>),
    If(Expr, Box<Stmt>, Option<Box<Stmt>>),
    While(Expr, Box<Stmt>),
    DoWhile(Box<Stmt>, Expr),
    For {
        init: Option<Box<Stmt>>,
        cond: Option<Expr>,
        step: Option<Expr>,
        body: Box<Stmt>,
    },
    ForOf {
        name: String,
        iterable: Expr,
        body: Box<Stmt>,
    },
    ForIn {
        name: String,
        object: Expr,
        body: Box<Stmt>,
    },
    Block(Vec<Stmt>),
    Return(Option<Expr>),
    Break,
    Continue,
    Throw(Expr),
    Try {
        body: Vec<Stmt>,
        param: Option<String>,
        handler: Option<Vec<Stmt>>,
        finalizer: Option<Vec<Stmt>>,
    },
    Empty,
}

// ============================================================================
// Parser
// ============================================================================

pub(super) fn parse_program(source: &str) -> Result<Vec<Stmt>, ScriptError> {
    let mut parser = Parser {
        tokens: tokenize(source)?,
        pos: 0,
        depth: 0,
    };
    let mut program = Vec::new();
    while !parser.at_eof() {
        program.push(parser.statement()?);
    }
    Ok(program)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn current(&self) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[self.pos.min(last)]
    }

    fn peek(&self) -> &Tok {
        &self.current().tok
    }

    fn peek_at(&self, offset: usize) -> &Tok {
        let last = self.tokens.len() - 1;
        &self.tokens[(self.pos + offset).min(last)].tok
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek(), Tok::Eof)
    }

    fn advance(&mut self) -> Tok {
        let tok = self.peek().clone();
        if !self.at_eof() {
            self.pos += 1;
        }
        tok
    }

    fn error(&self, message: impl Into<String>) -> ScriptError {
        self.current().span.error(message)
    }

    fn is_punct(&self, p: &str) -> bool {
        matches!(self.peek(), Tok::Punct(q) if *q == p)
    }

    fn is_keyword(&self, k: &str) -> bool {
        matches!(self.peek(), Tok::Ident(name) if name == k)
    }

    fn eat_punct(&mut self, p: &str) -> bool {
        if self.is_punct(p) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, k: &str) -> bool {
        if self.is_keyword(k) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, p: &str) -> Result<(), ScriptError> {
        if self.eat_punct(p) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{p}' but found {}", describe(self.peek()))))
        }
    }

    fn ident(&mut self) -> Result<String, ScriptError> {
        match self.advance() {
            Tok::Ident(name) => Ok(name),
            other => {
                self.pos = self.pos.saturating_sub(1);
                Err(self.error(format!("expected identifier but found {}", describe(&other))))
            }
        }
    }

    fn nest(&mut self) -> Result<(), ScriptError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(self.error("code is nested too deeply"));
        }
        Ok(())
    }

    fn end_statement(&mut self) {
        self.eat_punct(";");
    }

    fn statement(&mut self) -> Result<Stmt, ScriptError> {
        self.nest()?;
        let stmt = self.statement_inner();
        self.depth -= 1;
        stmt
    }

    fn statement_inner(&mut self) -> Result<Stmt, ScriptError> {
        if self.eat_punct(";") {
            return Ok(Stmt::Empty);
        }
        if self.is_punct("{") {
            return Ok(Stmt::Block(self.block()?));
        }
        let keyword = match self.peek() {
            Tok::Ident(name) => name.clone(),
            _ => String::new(),
        };
        match keyword.as_str() {
            "var" | "let" | "const" => {
                self.pos += 1;
                let decl = self.declarations()?;
                self.end_statement();
                Ok(decl)
            }
            "function" if matches!(self.peek_at(1), Tok::Ident(_)) => {
                self.pos += 1;
                let def = self.function_rest()?;
                Ok(Stmt::Function(def))
            }
            "if" => {
                self.pos += 1;
                self.expect_punct("(")?;
                let cond = self.expression()?;
                self.expect_punct(")")?;
                let then = Box::new(self.statement()?);
                let otherwise = if self.eat_keyword("else") {
                    Some(Box::new(self.statement()?))
                } else {
                    None
                };
                Ok(Stmt::If(cond, then, otherwise))
            }
            "while" => {
                self.pos += 1;
                self.expect_punct("(")?;
                let cond = self.expression()?;
                self.expect_punct(")")?;
                Ok(Stmt::While(cond, Box::new(self.statement()?)))
            }
            "do" => {
                self.pos += 1;
                let body = Box::new(self.statement()?);
                if !self.eat_keyword("while") {
                    return Err(self.error("expected 'while' after do body"));
                }
                self.expect_punct("(")?;
                let cond = self.expression()?;
                self.expect_punct(")")?;
                self.end_statement();
                Ok(Stmt::DoWhile(body, cond))
            }
            "for" => {
                self.pos += 1;
                self.for_statement()
            }
            "return" => {
                self.pos += 1;
                let value = if self.is_punct(";") || self.is_punct("}") || self.current().newline_before {
                    None
                } else {
                    Some(self.expression()?)
                };
                self.end_statement();
                Ok(Stmt::Return(value))
            }
            "break" => {
                self.pos += 1;
                self.end_statement();
                Ok(Stmt::Break)
            }
            "continue" => {
                self.pos += 1;
                self.end_statement();
                Ok(Stmt::Continue)
            }
            "throw" => {
                self.pos += 1;
                let value = self.expression()?;
                self.end_statement();
                Ok(Stmt::Throw(value))
            }
            "try" => {
                self.pos += 1;
                self.try_statement()
            }
            _ => {
                let expr = self.expression()?;
                if !(self.eat_punct(";")
                    || self.is_punct("}")
                    || self.at_eof()
                    || self.current().newline_before)
                {
                    return Err(self.error(format!("unexpected {}", describe(self.peek()))));
                }
                Ok(Stmt::Expr(expr))
            }
        }
    }

    fn block(&mut self) -> Result<Vec<Stmt>, ScriptError> {
        self.expect_punct("{")?;
        let mut body = Vec::new();
        while !self.is_punct("}") {
            if self.at_eof() {
                return Err(self.error("expected '}' before end of input"));
            }
            body.push(self.statement()?);
        }
        self.pos += 1;
        Ok(body)
    }

    fn declarations(&mut self) -> Result<Stmt, ScriptError> {
        let mut decls = Vec::new();
        loop {
            let name = self.ident()?;
            let init = if self.eat_punct("=") {
                Some(self.assignment()?)
            } else {
                None
            };
            decls.push((name, init));
            if !self.eat_punct(",") {
                return Ok(Stmt::Var(decls));
            }
        }
    }

    fn for_statement(&mut self) -> Result<Stmt, ScriptError> {
        self.expect_punct("(")?;
        // for (x of xs) / for (x in obj), with optional declaration keyword
        let declared = matches!(self.peek(), Tok::Ident(k) if matches!(k.as_str(), "var" | "let" | "const"));
        let offset = usize::from(declared);
        if let (Tok::Ident(name), Tok::Ident(kind)) = (self.peek_at(offset), self.peek_at(offset + 1)) {
            if kind == "of" || kind == "in" {
                let name = name.clone();
                let of = kind == "of";
                self.pos += offset + 2;
                let target = self.expression()?;
                self.expect_punct(")")?;
                let body = Box::new(self.statement()?);
                return Ok(if of {
                    Stmt::ForOf {
                        name,
                        iterable: target,
                        body,
                    }
                } else {
                    Stmt::ForIn {
                        name,
                        object: target,
                        body,
                    }
                });
            }
        }

        let init = if self.eat_punct(";") {
            None
        } else {
            let init = if declared {
                self.pos += 1;
                self.declarations()?
            } else {
                Stmt::Expr(self.expression()?)
            };
            self.expect_punct(";")?;
            Some(Box::new(init))
        };
        let cond = if self.is_punct(";") {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect_punct(";")?;
        let step = if self.is_punct(")") {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect_punct(")")?;
        let body = Box::new(self.statement()?);
        Ok(Stmt::For {
            init,
            cond,
            step,
            body,
        })
    }

    fn try_statement(&mut self) -> Result<Stmt, ScriptError> {
        let body = self.block()?;
        let mut param = None;
        let mut handler = None;
        if self.eat_keyword("catch") {
            if self.eat_punct("(") {
                param = Some(self.ident()?);
                self.expect_punct(")")?;
            }
            handler = Some(self.block()?);
        }
        let finalizer = if self.eat_keyword("finally") {
            Some(self.block()?)
        } else {
            None
        };
        if handler.is_none() && finalizer.is_none() {
            return Err(self.error("try requires catch or finally"));
        }
        Ok(Stmt::Try {
            body,
            param,
            handler,
            finalizer,
        })
    }

    /// After the `function` keyword: optional name, parameters, body.
    fn function_rest(&mut self) -> Result<Rc<FuncDef>, ScriptError> {
        let name = match self.peek() {
            Tok::Ident(_) => Some(self.ident()?),
            _ => None,
        };
        let params = self.params()?;
        let body = Body::Block(self.block()?);
        Ok(Rc::new(FuncDef { name, params, body }))
    }

    fn params(&mut self) -> Result<Vec<String>, ScriptError> {
        self.expect_punct("(")?;
        let mut params = Vec::new();
        if !self.eat_punct(")") {
            loop {
                params.push(self.ident()?);
                if self.eat_punct(")") {
                    break;
                }
                self.expect_punct(",")?;
            }
        }
        Ok(params)
    }

    fn expression(&mut self) -> Result<Expr, ScriptError> {
        self.assignment()
    }

    fn arrow_ahead(&self) -> bool {
        match self.peek() {
            Tok::Ident(_) => matches!(self.peek_at(1), Tok::Punct("=>")),
            Tok::Punct("(") => {
                let mut depth = 0usize;
                let mut offset = 0;
                loop {
                    match self.peek_at(offset) {
                        Tok::Punct("(") => depth += 1,
                        Tok::Punct(")") => {
                            depth -= 1;
                            if depth == 0 {
                                return matches!(self.peek_at(offset + 1), Tok::Punct("=>"));
                            }
                        }
                        Tok::Eof => return false,
                        _ => {}
                    }
                    offset += 1;
                }
            }
            _ => false,
        }
    }

    fn arrow(&mut self) -> Result<Expr, ScriptError> {
        let params = if self.is_punct("(") {
            self.params()?
        } else {
            vec![self.ident()?]
        };
        self.expect_punct("=>")?;
        let body = if self.is_punct("{") {
            Body::Block(self.block()?)
        } else {
            Body::Expr(self.assignment()?)
        };
        Ok(Expr::Function(Rc::new(FuncDef {
            name: None,
            params,
            body,
        })))
    }

    fn assignment(&mut self) -> Result<Expr, ScriptError> {
        self.nest()?;
        let expr = self.assignment_inner();
        self.depth -= 1;
        expr
    }

    fn assignment_inner(&mut self) -> Result<Expr, ScriptError> {
        if self.arrow_ahead() {
            return self.arrow();
        }
        let target = self.conditional()?;
        let op = match self.peek() {
            Tok::Punct("=") => None,
            Tok::Punct("+=") => Some(BinOp::Add),
            Tok::Punct("-=") => Some(BinOp::Sub),
            Tok::Punct("*=") => Some(BinOp::Mul),
            Tok::Punct("/=") => Some(BinOp::Div),
            Tok::Punct("%=") => Some(BinOp::Rem),
            _ => return Ok(target),
        };
        if !matches!(target, Expr::Ident(_) | Expr::Member { .. } | Expr::Index(..)) {
            return Err(self.error("invalid assignment target"));
        }
        self.pos += 1;
        let value = self.assignment()?;
        Ok(Expr::Assign {
            target: Box::new(target),
            op,
            value: Box::new(value),
        })
    }

    fn conditional(&mut self) -> Result<Expr, ScriptError> {
        let cond = self.logical_or()?;
        if !self.eat_punct("?") {
            return Ok(cond);
        }
        let then = self.assignment()?;
        self.expect_punct(":")?;
        let otherwise = self.assignment()?;
        Ok(Expr::Cond(Box::new(cond), Box::new(then), Box::new(otherwise)))
    }

    fn logical_or(&mut self) -> Result<Expr, ScriptError> {
        let mut left = self.logical_and()?;
        loop {
            let op = if self.eat_punct("||") {
                LogicOp::Or
            } else if self.eat_punct("??") {
                LogicOp::Nullish
            } else {
                return Ok(left);
            };
            let right = self.logical_and()?;
            left = Expr::Logic(op, Box::new(left), Box::new(right));
        }
    }

    fn logical_and(&mut self) -> Result<Expr, ScriptError> {
        let mut left = self.equality()?;
        while self.eat_punct("&&") {
            let right = self.equality()?;
            left = Expr::Logic(LogicOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn binary_level(
        &mut self,
        ops: &[(&'static str, BinOp)],
        next: fn(&mut Self) -> Result<Expr, ScriptError>,
    ) -> Result<Expr, ScriptError> {
        let mut left = next(self)?;
        'outer: loop {
            for (punct, op) in ops {
                if self.eat_punct(punct) {
                    let right = next(self)?;
                    left = Expr::Binary(*op, Box::new(left), Box::new(right));
                    continue 'outer;
                }
            }
            return Ok(left);
        }
    }

    fn equality(&mut self) -> Result<Expr, ScriptError> {
        self.binary_level(
            &[
                ("===", BinOp::StrictEq),
                ("!==", BinOp::StrictNotEq),
                ("==", BinOp::Eq),
                ("!=", BinOp::NotEq),
            ],
            Self::relational,
        )
    }

    fn relational(&mut self) -> Result<Expr, ScriptError> {
        self.binary_level(
            &[
                ("<=", BinOp::Le),
                (">=", BinOp::Ge),
                ("<", BinOp::Lt),
                (">", BinOp::Gt),
            ],
            Self::additive,
        )
    }

    fn additive(&mut self) -> Result<Expr, ScriptError> {
        self.binary_level(&[("+", BinOp::Add), ("-", BinOp::Sub)], Self::multiplicative)
    }

    fn multiplicative(&mut self) -> Result<Expr, ScriptError> {
        self.binary_level(
            &[("*", BinOp::Mul), ("/", BinOp::Div), ("%", BinOp::Rem)],
            Self::exponent,
        )
    }

    fn exponent(&mut self) -> Result<Expr, ScriptError> {
        let base = self.unary()?;
        if self.eat_punct("**") {
            let power = self.exponent()?;
            return Ok(Expr::Binary(BinOp::Pow, Box::new(base), Box::new(power)));
        }
        Ok(base)
    }

    fn unary(&mut self) -> Result<Expr, ScriptError> {
        self.nest()?;
        let expr = self.unary_inner();
        self.depth -= 1;
        expr
    }

    fn unary_inner(&mut self) -> Result<Expr, ScriptError> {
        let op = match self.peek() {
            Tok::Punct("!") => Some(UnaryOp::Not),
            Tok::Punct("-") => Some(UnaryOp::Neg),
            Tok::Punct("+") => Some(UnaryOp::Plus),
            Tok::Ident(k) if k == "typeof" => Some(UnaryOp::TypeOf),
            _ => None,
        };
        if let Some(op) = op {
            self.pos += 1;
            let operand = self.unary()?;
            return Ok(Expr::Unary(op, Box::new(operand)));
        }
        for (punct, delta) in [("++", 1.0), ("--", -1.0)] {
            if self.eat_punct(punct) {
                let target = self.unary()?;
                return Ok(Expr::Update {
                    target: Box::new(target),
                    delta,
                    prefix: true,
                });
            }
        }
        let expr = self.postfix()?;
        for (punct, delta) in [("++", 1.0), ("--", -1.0)] {
            if self.is_punct(punct) && !self.current().newline_before {
                self.pos += 1;
                return Ok(Expr::Update {
                    target: Box::new(expr),
                    delta,
                    prefix: false,
                });
            }
        }
        Ok(expr)
    }

    fn postfix(&mut self) -> Result<Expr, ScriptError> {
        let mut expr = self.primary()?;
        loop {
            if self.eat_punct(".") || self.is_punct("?.") {
                let optional = self.eat_punct("?.");
                let name = self.ident()?;
                expr = Expr::Member {
                    object: Box::new(expr),
                    name,
                    optional,
                };
            } else if self.eat_punct("[") {
                let index = self.expression()?;
                self.expect_punct("]")?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else if self.is_punct("(") {
                expr = Expr::Call(Box::new(expr), self.arguments()?);
            } else {
                return Ok(expr);
            }
        }
    }

    fn arguments(&mut self) -> Result<Vec<Expr>, ScriptError> {
        self.expect_punct("(")?;
        let mut args = Vec::new();
        if !self.eat_punct(")") {
            loop {
                args.push(self.assignment()?);
                if self.eat_punct(")") {
                    break;
                }
                self.expect_punct(",")?;
            }
        }
        Ok(args)
    }

    fn primary(&mut self) -> Result<Expr, ScriptError> {
        match self.advance() {
            Tok::Num(n) => Ok(Expr::Num(n)),
            Tok::Str(s) => Ok(Expr::Str(s)),
            Tok::Regex { pattern, flags } => Ok(Expr::Regex { pattern, flags }),
            Tok::Ident(name) => match name.as_str() {
                "true" => Ok(Expr::Bool(true)),
                "false" => Ok(Expr::Bool(false)),
                "null" => Ok(Expr::Null),
                "undefined" => Ok(Expr::Undefined),
                "function" => Ok(Expr::Function(self.function_rest()?)),
                "new" => {
                    // `new X(...)` behaves like a call of X
                    let callee = self.primary()?;
                    let args = if self.is_punct("(") {
                        self.arguments()?
                    } else {
                        Vec::new()
                    };
                    Ok(Expr::Call(Box::new(callee), args))
                }
                _ => Ok(Expr::Ident(name)),
            },
            Tok::Punct("(") => {
                let expr = self.expression()?;
                self.expect_punct(")")?;
                Ok(expr)
            }
            Tok::Punct("[") => {
                let mut items = Vec::new();
                while !self.eat_punct("]") {
                    items.push(self.assignment()?);
                    if !self.is_punct("]") {
                        self.expect_punct(",")?;
                    }
                }
                Ok(Expr::Array(items))
            }
            Tok::Punct("{") => {
                let mut props = Vec::new();
                while !self.eat_punct("}") {
                    let key = match self.advance() {
                        Tok::Ident(k) | Tok::Str(k) => k,
                        Tok::Num(n) => crate::model::format_number(n),
                        other => {
                            return Err(self.error(format!("unexpected {} in object literal", describe(&other))))
                        }
                    };
                    let value = if self.eat_punct(":") {
                        self.assignment()?
                    } else {
                        Expr::Ident(key.clone())
                    };
                    props.push((key, value));
                    if !self.is_punct("}") {
                        self.expect_punct(",")?;
                    }
                }
                Ok(Expr::Object(props))
            }
            other => {
                self.pos = self.pos.saturating_sub(1);
                Err(self.error(format!("unexpected {}", describe(&other))))
            }
        }
    }
}

fn describe(tok: &Tok) -> String {
    match tok {
        Tok::Num(n) => format!("number {}", crate::model::format_number(*n)),
        Tok::Str(_) => "string".to_string(),
        Tok::Ident(name) => format!("'{name}'"),
        Tok::Regex { .. } => "regular expression".to_string(),
        Tok::Punct(p) => format!("'{p}'"),
        Tok::Eof => "end of input".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_typical_rule() {
        let program = parse_program(
            "var n = entityCount;\nif (n > 0) { status = 'SUCCESS'; } else { status = 'FAILURE' }",
        )
        .expect("parse");
        assert_eq!(program.len(), 2);
        assert!(matches!(program[1], Stmt::If(..)));
    }

    #[test]
    fn test_regex_vs_division() {
        let tokens = tokenize("a / b; /ab+c/i.test(x)").expect("tokens");
        assert!(tokens.iter().any(|t| t.tok == Tok::Punct("/")));
        assert!(tokens
            .iter()
            .any(|t| matches!(&t.tok, Tok::Regex { pattern, flags } if pattern == "ab+c" && flags == "i")));
    }

    #[test]
    fn test_arrow_functions_and_for_of() {
        let program = parse_program("const ok = xs.filter(x => x > 1); for (const x of xs) { total += x }")
            .expect("parse");
        assert!(matches!(program[1], Stmt::ForOf { .. }));
        let program = parse_program("var f = (a, b) => { return a + b }").expect("parse");
        assert!(matches!(&program[0], Stmt::Var(decls) if matches!(decls[0].1, Some(Expr::Function(_)))));
    }

    #[test]
    fn test_syntax_errors_have_positions() {
        let err = parse_program("var x = ;").unwrap_err();
        assert!(matches!(err, ScriptError::Syntax { line: 1, .. }), "{err}");
        let err = parse_program("if (x {\n}").unwrap_err();
        assert!(matches!(err, ScriptError::Syntax { .. }));
        let err = parse_program("x = 1 2").unwrap_err();
        assert!(matches!(err, ScriptError::Syntax { .. }));
        let deep = format!("{}1{}", "(".repeat(1000), ")".repeat(1000));
        assert!(parse_program(&deep).is_err());
    }
}
