//! Character cursor and literal readers shared by the rule-language lexers.

use crate::script::ScriptError;

/// Line/column of a token, both 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct Span {
    pub line: usize,
    pub column: usize,
}

impl Span {
    pub(crate) fn error(self, message: impl Into<String>) -> ScriptError {
        ScriptError::Syntax {
            line: self.line,
            column: self.column,
            message: message.into(),
        }
    }
}

pub(crate) struct Cursor {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
}

impl Cursor {
    pub(crate) fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    pub(crate) fn span(&self) -> Span {
        Span {
            line: self.line,
            column: self.column,
        }
    }

    pub(crate) fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    pub(crate) fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    pub(crate) fn bump(&mut self) -> Option<char> {
        let c = self.chars.get(self.pos).copied()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    /// Consume `s` if the input continues with it.
    pub(crate) fn eat_str(&mut self, s: &str) -> bool {
        let matches = s
            .chars()
            .enumerate()
            .all(|(i, c)| self.peek_at(i) == Some(c));
        if matches {
            for _ in s.chars() {
                self.bump();
            }
        }
        matches
    }

    pub(crate) fn skip_while(&mut self, pred: impl Fn(char) -> bool) {
        while self.peek().is_some_and(&pred) {
            self.bump();
        }
    }

    pub(crate) fn take_while(&mut self, pred: impl Fn(char) -> bool) -> String {
        let mut out = String::new();
        while let Some(c) = self.peek().filter(|&c| pred(c)) {
            out.push(c);
            self.bump();
        }
        out
    }

    /// Read a decimal or hexadecimal number literal.
    pub(crate) fn read_number(&mut self) -> Result<f64, ScriptError> {
        let span = self.span();
        if self.peek() == Some('0') && matches!(self.peek_at(1), Some('x' | 'X')) {
            self.bump();
            self.bump();
            let digits = self.take_while(|c| c.is_ascii_hexdigit());
            return u64::from_str_radix(&digits, 16)
                .map(|n| n as f64)
                .map_err(|_| span.error("malformed hexadecimal literal"));
        }
        let mut text = self.take_while(|c| c.is_ascii_digit());
        if self.peek() == Some('.') && self.peek_at(1).map_or(true, |c| c.is_ascii_digit() || !c.is_alphabetic()) {
            self.bump();
            text.push('.');
            text.push_str(&self.take_while(|c| c.is_ascii_digit()));
        }
        if matches!(self.peek(), Some('e' | 'E'))
            && (self.peek_at(1).is_some_and(|c| c.is_ascii_digit())
                || (matches!(self.peek_at(1), Some('+' | '-'))
                    && self.peek_at(2).is_some_and(|c| c.is_ascii_digit())))
        {
            text.push('e');
            self.bump();
            if let Some(sign @ ('+' | '-')) = self.peek() {
                text.push(sign);
                self.bump();
            }
            text.push_str(&self.take_while(|c| c.is_ascii_digit()));
        }
        text.parse::<f64>()
            .map_err(|_| span.error(format!("malformed number '{text}'")))
    }

    /// Read a quoted string; the cursor sits on the opening quote.
    pub(crate) fn read_string(&mut self) -> Result<String, ScriptError> {
        let span = self.span();
        let quote = self.bump().ok_or_else(|| span.error("expected string"))?;
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(span.error("unterminated string literal")),
                Some(c) if c == quote => return Ok(out),
                Some('\\') => {
                    let escaped = self.bump().ok_or_else(|| span.error("unterminated string literal"))?;
                    match escaped {
                        'n' => out.push('\n'),
                        't' => out.push('\t'),
                        'r' => out.push('\r'),
                        '0' => out.push('\0'),
                        'u' => {
                            let hex: String = (0..4).filter_map(|_| self.bump()).collect();
                            let ch = u32::from_str_radix(&hex, 16)
                                .ok()
                                .and_then(char::from_u32)
                                .ok_or_else(|| span.error("malformed unicode escape"))?;
                            out.push(ch);
                        }
                        other => out.push(other),
                    }
                }
                Some(c) => out.push(c),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numbers() {
        assert_eq!(Cursor::new("42").read_number(), Ok(42.0));
        assert_eq!(Cursor::new("3.25").read_number(), Ok(3.25));
        assert_eq!(Cursor::new("1e3").read_number(), Ok(1000.0));
        assert_eq!(Cursor::new("0x1F").read_number(), Ok(31.0));
    }

    #[test]
    fn test_strings_and_spans() {
        let mut cursor = Cursor::new("'a\\'b\\n'");
        assert_eq!(cursor.read_string(), Ok("a'b\n".to_string()));
        let mut cursor = Cursor::new("\"open");
        assert!(matches!(
            cursor.read_string(),
            Err(ScriptError::Syntax { line: 1, column: 1, .. })
        ));
        let mut cursor = Cursor::new("a\nb");
        cursor.bump();
        cursor.bump();
        assert_eq!(cursor.span(), Span { line: 2, column: 1 });
    }
}
