//! Lexer and parser for the `r` rule language.
//!
//! Newlines end an expression only when it is complete and no bracket
//! or parenthesis is open, as in R itself.

use super::super::lexer::{Cursor, Span};
use crate::script::ScriptError;
use std::rc::Rc;

const MAX_NESTING: usize = 160;

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Num(f64),
    Str(String),
    Ident(String),
    /// `%in%`, `%%`, `%/%` and other `%op%` operators
    Special(String),
    Punct(&'static str),
    Newline,
    Eof,
}

#[derive(Debug, Clone)]
struct Token {
    tok: Tok,
    span: Span,
}

const PUNCTUATORS: &[&str] = &[
    "<<-", "->>", "<-", "->", "<=", ">=", "==", "!=", "&&", "||", "[[", "|>", "**", "(", ")", "{",
    "}", "[", "]", ",", ";", "+", "-", "*", "/", "^", "<", ">", "!", "&", "|", "=", ":", "$",
    "\\",
];

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '.' || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '.' || c == '_'
}

fn tokenize(source: &str) -> Result<Vec<Token>, ScriptError> {
    let mut cursor = Cursor::new(source);
    let mut tokens = Vec::new();
    loop {
        cursor.skip_while(|c| c != '\n' && c.is_whitespace());
        if cursor.peek() == Some('#') {
            cursor.skip_while(|c| c != '\n');
        }
        let span = cursor.span();
        let Some(c) = cursor.peek() else {
            tokens.push(Token { tok: Tok::Eof, span });
            return Ok(tokens);
        };
        let tok = if c == '\n' {
            cursor.bump();
            Tok::Newline
        } else if c.is_ascii_digit() || (c == '.' && cursor.peek_at(1).is_some_and(|d| d.is_ascii_digit())) {
            let n = cursor.read_number()?;
            // Integer suffix
            cursor.eat_str("L");
            Tok::Num(n)
        } else if c == '"' || c == '\'' {
            Tok::Str(cursor.read_string()?)
        } else if c == '`' {
            Tok::Ident(cursor.read_string()?)
        } else if is_ident_start(c) {
            Tok::Ident(cursor.take_while(is_ident_char))
        } else if c == '%' {
            cursor.bump();
            let op = cursor.take_while(|c| c != '%' && c != '\n');
            if cursor.bump() != Some('%') {
                return Err(span.error("unterminated %operator%"));
            }
            Tok::Special(op)
        } else {
            let punct = PUNCTUATORS
                .iter()
                .find(|p| cursor.eat_str(p))
                .copied()
                .ok_or_else(|| span.error(format!("unexpected input '{c}'")))?;
            Tok::Punct(punct)
        };
        tokens.push(Token { tok, span });
    }
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
    Pow,
    Mod,
    IntDiv,
    In,
    Range,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    AndAnd,
    OrOr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum UnaryOp {
    Neg,
    Plus,
    Not,
}

#[derive(Debug, Clone, PartialEq)]
pub(super) struct Arg {
    pub name: Option<String>,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub(super) struct FuncDef {
    pub params: Vec<(String, Option<Expr>)>,
    pub body: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub(super) enum Expr {
    Num(f64),
    Str(String),
    Bool(bool),
    Null,
    Na,
    Ident(String),
    Call(Box<Expr>, Vec<Arg>),
    Index(Box<Expr>, Vec<Arg>),
    Index2(Box<Expr>, Box<Expr>),
    Dollar(Box<Expr>, String),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Assign {
        target: Box<Expr>,
        value: Box<Expr>,
        outer: bool,
    },
    If(Box<Expr>, Box<Expr>, Option<Box<Expr>>),
    For(String, Box<Expr>, Box<Expr>),
    While(Box<Expr>, Box<Expr>),
    Repeat(Box<Expr>),
    Break,
    Next,
    Block(Vec<Expr>),
    Function(Rc<FuncDef>),
}

// ============================================================================
// Parser
// ============================================================================

pub(super) fn parse_program(source: &str) -> Result<Vec<Expr>, ScriptError> {
    let mut parser = Parser {
        tokens: tokenize(source)?,
        pos: 0,
        depth: 0,
        ignore_newlines: vec![false],
    };
    let mut program = Vec::new();
    loop {
        parser.skip_separators();
        if parser.at(&Tok::Eof) {
            return Ok(program);
        }
        program.push(parser.expression()?);
        parser.end_expression()?;
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    /// One entry per open bracket; true inside `(` and `[`
    ignore_newlines: Vec<bool>,
}

impl Parser {
    fn skipping(&self) -> bool {
        self.ignore_newlines.last().copied().unwrap_or(false)
    }

    fn skip_newlines(&mut self) {
        while matches!(self.tokens.get(self.pos).map(|t| &t.tok), Some(Tok::Newline)) {
            self.pos += 1;
        }
    }

    fn skip_separators(&mut self) {
        while matches!(
            self.tokens.get(self.pos).map(|t| &t.tok),
            Some(Tok::Newline | Tok::Punct(";"))
        ) {
            self.pos += 1;
        }
    }

    fn peek(&mut self) -> &Tok {
        if self.skipping() {
            self.skip_newlines();
        }
        let last = self.tokens.len() - 1;
        &self.tokens[self.pos.min(last)].tok
    }

    fn at(&mut self, tok: &Tok) -> bool {
        self.peek() == tok
    }

    fn is_punct(&mut self, p: &str) -> bool {
        matches!(self.peek(), Tok::Punct(q) if *q == p)
    }

    fn is_ident(&mut self, name: &str) -> bool {
        matches!(self.peek(), Tok::Ident(n) if n == name)
    }

    fn advance(&mut self) -> Tok {
        let tok = self.peek().clone();
        if tok != Tok::Eof {
            self.pos += 1;
        }
        tok
    }

    fn eat_punct(&mut self, p: &str) -> bool {
        if self.is_punct(p) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn error(&mut self, message: impl Into<String>) -> ScriptError {
        self.peek();
        let last = self.tokens.len() - 1;
        self.tokens[self.pos.min(last)].span.error(message)
    }

    fn expect_punct(&mut self, p: &str) -> Result<(), ScriptError> {
        if self.eat_punct(p) {
            Ok(())
        } else {
            let found = describe(&self.peek().clone());
            Err(self.error(format!("expected '{p}' but found {found}")))
        }
    }

    fn open(&mut self, ignore_newlines: bool) {
        self.ignore_newlines.push(ignore_newlines);
    }

    fn close(&mut self, p: &str) -> Result<(), ScriptError> {
        let result = self.expect_punct(p);
        self.ignore_newlines.pop();
        result
    }

    fn nest(&mut self) -> Result<(), ScriptError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(self.error("contextstack overflow"));
        }
        Ok(())
    }

    /// After an expression: a separator, a closing brace or end of input.
    fn end_expression(&mut self) -> Result<(), ScriptError> {
        match self.tokens.get(self.pos).map(|t| &t.tok) {
            Some(Tok::Newline | Tok::Punct(";")) => {
                self.pos += 1;
                Ok(())
            }
            Some(Tok::Punct("}") | Tok::Eof) | None => Ok(()),
            Some(other) => {
                let found = describe(&other.clone());
                Err(self.error(format!("unexpected {found}")))
            }
        }
    }

    fn expression(&mut self) -> Result<Expr, ScriptError> {
        self.nest()?;
        let expr = self.assign_equals();
        self.depth -= 1;
        expr
    }

    fn assign_equals(&mut self) -> Result<Expr, ScriptError> {
        let target = self.assign_arrow()?;
        if self.eat_punct("=") {
            self.skip_newlines();
            let value = self.expression()?;
            return Ok(assign(target, value, false));
        }
        Ok(target)
    }

    fn assign_arrow(&mut self) -> Result<Expr, ScriptError> {
        let left = self.or()?;
        for (p, outer) in [("<-", false), ("<<-", true)] {
            if self.eat_punct(p) {
                self.skip_newlines();
                self.nest()?;
                let value = self.assign_arrow();
                self.depth -= 1;
                return Ok(assign(left, value?, outer));
            }
        }
        let mut value = left;
        loop {
            let outer = if self.eat_punct("->") {
                false
            } else if self.eat_punct("->>") {
                true
            } else {
                return Ok(value);
            };
            self.skip_newlines();
            let target = self.or()?;
            value = assign(target, value, outer);
        }
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
                    self.skip_newlines();
                    let right = next(self)?;
                    left = Expr::Binary(*op, Box::new(left), Box::new(right));
                    continue 'outer;
                }
            }
            return Ok(left);
        }
    }

    fn or(&mut self) -> Result<Expr, ScriptError> {
        self.binary_level(&[("||", BinOp::OrOr), ("|", BinOp::Or)], Self::and)
    }

    fn and(&mut self) -> Result<Expr, ScriptError> {
        self.binary_level(&[("&&", BinOp::AndAnd), ("&", BinOp::And)], Self::not)
    }

    fn not(&mut self) -> Result<Expr, ScriptError> {
        if self.eat_punct("!") {
            self.nest()?;
            let operand = self.not();
            self.depth -= 1;
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(operand?)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, ScriptError> {
        self.binary_level(
            &[
                ("==", BinOp::Eq),
                ("!=", BinOp::Ne),
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
        self.binary_level(&[("*", BinOp::Mul), ("/", BinOp::Div)], Self::special)
    }

    fn special(&mut self) -> Result<Expr, ScriptError> {
        let mut left = self.range()?;
        loop {
            if self.eat_punct("|>") {
                self.skip_newlines();
                let right = self.range()?;
                left = match right {
                    Expr::Call(callee, mut args) => {
                        args.insert(0, Arg { name: None, value: left });
                        Expr::Call(callee, args)
                    }
                    _ => return Err(self.error("the pipe operator requires a function call as RHS")),
                };
                continue;
            }
            let Tok::Special(op) = self.peek().clone() else {
                return Ok(left);
            };
            self.pos += 1;
            self.skip_newlines();
            let right = self.range()?;
            let op = match op.as_str() {
                "" => BinOp::Mod,
                "/" => BinOp::IntDiv,
                "in" => BinOp::In,
                other => return Err(self.error(format!("could not find function \"%{other}%\""))),
            };
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn range(&mut self) -> Result<Expr, ScriptError> {
        self.binary_level(&[(":", BinOp::Range)], Self::unary)
    }

    fn unary(&mut self) -> Result<Expr, ScriptError> {
        let op = if self.eat_punct("-") {
            UnaryOp::Neg
        } else if self.eat_punct("+") {
            UnaryOp::Plus
        } else {
            return self.power();
        };
        self.nest()?;
        let operand = self.unary();
        self.depth -= 1;
        Ok(Expr::Unary(op, Box::new(operand?)))
    }

    fn power(&mut self) -> Result<Expr, ScriptError> {
        let base = self.postfix()?;
        if self.eat_punct("^") || self.eat_punct("**") {
            self.skip_newlines();
            self.nest()?;
            let exponent = self.unary();
            self.depth -= 1;
            return Ok(Expr::Binary(BinOp::Pow, Box::new(base), Box::new(exponent?)));
        }
        Ok(base)
    }

    fn postfix(&mut self) -> Result<Expr, ScriptError> {
        let mut expr = self.primary()?;
        loop {
            // Postfix operators must start on the same line
            if matches!(self.tokens.get(self.pos).map(|t| &t.tok), Some(Tok::Newline)) {
                return Ok(expr);
            }
            if self.eat_punct("(") {
                self.open(true);
                let args = self.arguments(")")?;
                self.close(")")?;
                expr = Expr::Call(Box::new(expr), args);
            } else if self.eat_punct("[[") {
                self.open(true);
                let index = self.expression()?;
                self.close("]")?;
                self.expect_punct("]")?;
                expr = Expr::Index2(Box::new(expr), Box::new(index));
            } else if self.eat_punct("[") {
                self.open(true);
                let args = self.arguments("]")?;
                self.close("]")?;
                expr = Expr::Index(Box::new(expr), args);
            } else if self.eat_punct("$") {
                let name = match self.advance() {
                    Tok::Ident(name) | Tok::Str(name) => name,
                    other => return Err(self.error(format!("unexpected {} after '$'", describe(&other)))),
                };
                expr = Expr::Dollar(Box::new(expr), name);
            } else {
                return Ok(expr);
            }
        }
    }

    fn arguments(&mut self, close: &str) -> Result<Vec<Arg>, ScriptError> {
        let mut args = Vec::new();
        if self.is_punct(close) {
            return Ok(args);
        }
        loop {
            let current = self.peek().clone();
            let named = matches!(
                self.tokens.get(self.pos + 1).map(|t| &t.tok),
                Some(Tok::Punct("="))
            );
            let name = match current {
                Tok::Ident(name) | Tok::Str(name) if named => {
                    self.pos += 2;
                    Some(name)
                }
                _ => None,
            };
            let value = self.expression()?;
            args.push(Arg { name, value });
            if !self.eat_punct(",") {
                return Ok(args);
            }
        }
    }

    fn block(&mut self) -> Result<Expr, ScriptError> {
        self.open(false);
        let mut body = Vec::new();
        loop {
            self.skip_separators();
            if self.is_punct("}") {
                break;
            }
            if self.at(&Tok::Eof) {
                self.ignore_newlines.pop();
                return Err(self.error("unexpected end of input; expected '}'"));
            }
            body.push(self.expression()?);
            self.end_expression()?;
        }
        self.close("}")?;
        Ok(Expr::Block(body))
    }

    fn condition(&mut self) -> Result<Expr, ScriptError> {
        self.expect_punct("(")?;
        self.open(true);
        let cond = self.expression()?;
        self.close(")")?;
        Ok(cond)
    }

    fn body(&mut self) -> Result<Expr, ScriptError> {
        self.skip_newlines();
        self.expression()
    }

    fn primary(&mut self) -> Result<Expr, ScriptError> {
        let tok = self.advance();
        match tok {
            Tok::Num(n) => Ok(Expr::Num(n)),
            Tok::Str(s) => Ok(Expr::Str(s)),
            Tok::Punct("(") => {
                self.open(true);
                let expr = self.expression()?;
                self.close(")")?;
                Ok(expr)
            }
            Tok::Punct("{") => self.block(),
            Tok::Punct("\\") => self.function(),
            Tok::Ident(name) => match name.as_str() {
                "TRUE" => Ok(Expr::Bool(true)),
                "FALSE" => Ok(Expr::Bool(false)),
                "NULL" => Ok(Expr::Null),
                "NA" | "NA_integer_" | "NA_real_" | "NA_character_" => Ok(Expr::Na),
                "Inf" => Ok(Expr::Num(f64::INFINITY)),
                "NaN" => Ok(Expr::Num(f64::NAN)),
                "function" => self.function(),
                "break" => Ok(Expr::Break),
                "next" => Ok(Expr::Next),
                "if" => {
                    let cond = self.condition()?;
                    let then = self.body()?;
                    // `else` may follow on a later line inside braces
                    let save = self.pos;
                    self.skip_newlines();
                    if self.is_ident("else") {
                        self.pos += 1;
                        let otherwise = self.body()?;
                        Ok(Expr::If(Box::new(cond), Box::new(then), Some(Box::new(otherwise))))
                    } else {
                        self.pos = save;
                        Ok(Expr::If(Box::new(cond), Box::new(then), None))
                    }
                }
                "for" => {
                    self.expect_punct("(")?;
                    self.open(true);
                    let var = match self.advance() {
                        Tok::Ident(var) => var,
                        other => return Err(self.error(format!("unexpected {}", describe(&other)))),
                    };
                    if !self.is_ident("in") {
                        return Err(self.error("expected 'in' in for loop"));
                    }
                    self.pos += 1;
                    let seq = self.expression()?;
                    self.close(")")?;
                    let body = self.body()?;
                    Ok(Expr::For(var, Box::new(seq), Box::new(body)))
                }
                "while" => {
                    let cond = self.condition()?;
                    let body = self.body()?;
                    Ok(Expr::While(Box::new(cond), Box::new(body)))
                }
                "repeat" => Ok(Expr::Repeat(Box::new(self.body()?))),
                "else" | "in" => Err(self.error(format!("unexpected '{name}'"))),
                _ => Ok(Expr::Ident(name)),
            },
            other => {
                self.pos = self.pos.saturating_sub(1);
                Err(self.error(format!("unexpected {}", describe(&other))))
            }
        }
    }

    fn function(&mut self) -> Result<Expr, ScriptError> {
        self.expect_punct("(")?;
        self.open(true);
        let mut params = Vec::new();
        while !self.is_punct(")") {
            let name = match self.advance() {
                Tok::Ident(name) => name,
                other => return Err(self.error(format!("unexpected {} in parameter list", describe(&other)))),
            };
            let default = if self.eat_punct("=") {
                Some(self.expression()?)
            } else {
                None
            };
            params.push((name, default));
            if !self.eat_punct(",") {
                break;
            }
        }
        self.close(")")?;
        let body = self.body()?;
        Ok(Expr::Function(Rc::new(FuncDef { params, body })))
    }
}

fn assign(target: Expr, value: Expr, outer: bool) -> Expr {
    Expr::Assign {
        target: Box::new(target),
        value: Box::new(value),
        outer,
    }
}

fn describe(tok: &Tok) -> String {
    match tok {
        Tok::Num(n) => format!("numeric constant {}", crate::model::format_number(*n)),
        Tok::Str(s) => format!("string constant \"{s}\""),
        Tok::Ident(name) => format!("symbol '{name}'"),
        Tok::Special(op) => format!("'%{op}%'"),
        Tok::Punct(p) => format!("'{p}'"),
        Tok::Newline => "end of line".to_string(),
        Tok::Eof => "end of input".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_typical_rule() {
        let program =
            parse_program("status <- ifelse( nchar(title) > 10, 'SUCCESS', 'FAILURE')").expect("parse");
        assert_eq!(program.len(), 1);
        assert!(matches!(&program[0], Expr::Assign { outer: false, .. }));
    }

    #[test]
    fn test_newlines_inside_parentheses_continue() {
        let program = parse_program("x <- c(1,\n 2,\n 3)\ny <- x +\n 1\n").expect("parse");
        assert_eq!(program.len(), 2);
    }

    #[test]
    fn test_else_on_next_line_in_braces() {
        let program = parse_program("{\n if (x) {\n 1\n }\n else {\n 2\n }\n}").expect("parse");
        let Expr::Block(body) = &program[0] else {
            panic!("expected block");
        };
        assert!(matches!(&body[0], Expr::If(_, _, Some(_))));
    }

    #[test]
    fn test_operator_precedence() {
        let program = parse_program("-2^2; -1:3; a %in% b == TRUE").expect("parse");
        assert!(matches!(&program[0], Expr::Unary(UnaryOp::Neg, inner) if matches!(**inner, Expr::Binary(BinOp::Pow, ..))));
        assert!(matches!(&program[1], Expr::Binary(BinOp::Range, left, _) if matches!(**left, Expr::Unary(..))));
        assert!(matches!(&program[2], Expr::Binary(BinOp::Eq, left, _) if matches!(**left, Expr::Binary(BinOp::In, ..))));
    }

    #[test]
    fn test_indexing_and_functions() {
        let program =
            parse_program("f <- function(x, sep = ',') x[[1]]\nl$name[2] <- 'a'\ng <- \\(v) v * 2").expect("parse");
        assert_eq!(program.len(), 3);
        assert!(matches!(&program[1], Expr::Assign { target, .. } if matches!(**target, Expr::Index(..))));
    }

    #[test]
    fn test_syntax_errors() {
        assert!(matches!(parse_program("x <- "), Err(ScriptError::Syntax { .. })));
        assert!(matches!(parse_program("f(1, 2"), Err(ScriptError::Syntax { .. })));
        assert!(matches!(parse_program("x y"), Err(ScriptError::Syntax { .. })));
        assert!(matches!(parse_program("'open"), Err(ScriptError::Syntax { .. })));
    }
}
