//! Tokenizer for the directive expression language.

use crate::eval::EvalError;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Int(i64),
    Float(f64),
    Str(String),
    True,
    False,
    Ident(String),
    LParen,
    RParen,
    LBrace,
    RBrace,
    Comma,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    AndAnd,
    OrOr,
    EqEq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    In,
    Eof,
}

/// A token together with its char offset in the expression text
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub position: usize,
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
}

/// Split expression text into tokens, always terminated by `Eof`.
pub fn tokenize(source: &str) -> Result<Vec<Token>, EvalError> {
    let mut lexer = Lexer {
        chars: source.chars().collect(),
        pos: 0,
    };
    let mut tokens = Vec::new();
    loop {
        let token = lexer.next_token()?;
        let done = token.kind == TokenKind::Eof;
        tokens.push(token);
        if done {
            return Ok(tokens);
        }
    }
}

impl Lexer {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += 1;
        Some(ch)
    }

    fn error(&self, position: usize, message: impl Into<String>) -> EvalError {
        EvalError::SyntaxError {
            position,
            message: message.into(),
        }
    }

    fn next_token(&mut self) -> Result<Token, EvalError> {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.pos += 1;
        }
        let start = self.pos;
        let Some(ch) = self.bump() else {
            return Ok(Token {
                kind: TokenKind::Eof,
                position: start,
            });
        };

        let kind = match ch {
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            ',' => TokenKind::Comma,
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '%' => TokenKind::Percent,
            '!' => {
                if self.peek() == Some('=') {
                    self.pos += 1;
                    TokenKind::NotEq
                } else {
                    TokenKind::Bang
                }
            }
            '=' => {
                if self.peek() == Some('=') {
                    self.pos += 1;
                    TokenKind::EqEq
                } else {
                    return Err(self.error(start, "expected '==', found '='"));
                }
            }
            '<' => {
                if self.peek() == Some('=') {
                    self.pos += 1;
                    TokenKind::LtEq
                } else {
                    TokenKind::Lt
                }
            }
            '>' => {
                if self.peek() == Some('=') {
                    self.pos += 1;
                    TokenKind::GtEq
                } else {
                    TokenKind::Gt
                }
            }
            '&' => {
                if self.peek() == Some('&') {
                    self.pos += 1;
                    TokenKind::AndAnd
                } else {
                    return Err(self.error(start, "expected '&&'"));
                }
            }
            '|' => {
                if self.peek() == Some('|') {
                    self.pos += 1;
                    TokenKind::OrOr
                } else {
                    return Err(self.error(start, "expected '||'"));
                }
            }
            '"' => self.string(start)?,
            c if c.is_ascii_digit() => self.number(start)?,
            c if c.is_alphabetic() || c == '_' => self.ident(start),
            other => {
                return Err(self.error(start, format!("unexpected character '{}'", other)));
            }
        };

        Ok(Token {
            kind,
            position: start,
        })
    }

    fn string(&mut self, start: usize) -> Result<TokenKind, EvalError> {
        let mut value = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error(start, "unterminated string literal")),
                Some('"') => return Ok(TokenKind::Str(value)),
                Some('\\') => {
                    let escaped = match self.bump() {
                        Some('n') => '\n',
                        Some('r') => '\r',
                        Some('t') => '\t',
                        Some('0') => '\0',
                        Some('"') => '"',
                        Some('\\') => '\\',
                        Some(other) => {
                            return Err(self.error(
                                self.pos - 1,
                                format!("unknown escape sequence '\\{}'", other),
                            ))
                        }
                        None => return Err(self.error(start, "unterminated string literal")),
                    };
                    value.push(escaped);
                }
                Some(c) => value.push(c),
            }
        }
    }

    fn number(&mut self, start: usize) -> Result<TokenKind, EvalError> {
        if self.chars[start] == '0' && matches!(self.peek(), Some('x') | Some('X')) {
            self.pos += 1;
            let digits_start = self.pos;
            while matches!(self.peek(), Some(c) if c.is_ascii_hexdigit()) {
                self.pos += 1;
            }
            let digits: String = self.chars[digits_start..self.pos].iter().collect();
            return i64::from_str_radix(&digits, 16)
                .map(TokenKind::Int)
                .map_err(|_| self.error(start, "invalid hexadecimal literal"));
        }

        let mut is_float = false;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.peek() == Some('.') && matches!(self.peek_at(1), Some(c) if c.is_ascii_digit()) {
            is_float = true;
            self.pos += 1;
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            let sign = usize::from(matches!(self.peek_at(1), Some('+') | Some('-')));
            if matches!(self.peek_at(1 + sign), Some(c) if c.is_ascii_digit()) {
                is_float = true;
                self.pos += 1 + sign;
                while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                    self.pos += 1;
                }
            }
        }

        let text: String = self.chars[start..self.pos].iter().collect();
        if is_float {
            text.parse::<f64>()
                .map(TokenKind::Float)
                .map_err(|_| self.error(start, "invalid float literal"))
        } else {
            text.parse::<i64>()
                .map(TokenKind::Int)
                .map_err(|_| self.error(start, "integer literal out of range"))
        }
    }

    fn ident(&mut self, start: usize) -> TokenKind {
        while matches!(self.peek(), Some(c) if c.is_alphanumeric() || c == '_' || c == '.') {
            self.pos += 1;
        }
        // a trailing dot belongs to the next token, not the name
        while self.pos > start + 1 && self.chars[self.pos - 1] == '.' {
            self.pos -= 1;
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        match text.as_str() {
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "in" => TokenKind::In,
            _ => TokenKind::Ident(text),
        }
    }
}
