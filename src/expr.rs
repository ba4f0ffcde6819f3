//! Expression AST and recursive-descent parser.

use crate::eval::EvalError;
use crate::lexer::{tokenize, Token, TokenKind};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    In,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Or => "||",
            BinaryOp::And => "&&",
            BinaryOp::Eq => "==",
            BinaryOp::NotEq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::In => "in",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Variable(String),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Call {
        name: String,
        args: Vec<Expr>,
    },
    SetLiteral(Vec<Expr>),
}

/// Deepest operator or bracket nesting a single expression may have
pub const MAX_NESTING: usize = 256;

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

/// Parse a complete expression; trailing tokens are a syntax error.
pub fn parse_expression(source: &str) -> Result<Expr, EvalError> {
    let mut parser = Parser::new(source)?;
    let expr = parser.expression()?;
    parser.expect_end()?;
    Ok(expr)
}

/// Parse a comma-separated list of expressions (used by `action`).
pub fn parse_expression_list(source: &str) -> Result<Vec<Expr>, EvalError> {
    let mut parser = Parser::new(source)?;
    let mut exprs = Vec::new();
    if parser.peek() == &TokenKind::Eof {
        return Ok(exprs);
    }
    loop {
        exprs.push(parser.expression()?);
        if !parser.eat(&TokenKind::Comma) {
            break;
        }
    }
    parser.expect_end()?;
    Ok(exprs)
}

impl Parser {
    fn new(source: &str) -> Result<Self, EvalError> {
        Ok(Parser {
            tokens: tokenize(source)?,
            pos: 0,
            depth: 0,
        })
    }

    // ── Helpers ──────────────────────────────────────────────────────

    fn peek(&self) -> &TokenKind {
        &self.tokens[self.pos].kind
    }

    fn position(&self) -> usize {
        self.tokens[self.pos].position
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.pos].clone();
        if token.kind != TokenKind::Eof {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek() == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error(&self, message: impl Into<String>) -> EvalError {
        EvalError::SyntaxError {
            position: self.position(),
            message: message.into(),
        }
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> Result<(), EvalError> {
        if self.eat(kind) {
            Ok(())
        } else {
            Err(self.error(format!("expected {}", what)))
        }
    }

    fn descend(&mut self) -> Result<(), EvalError> {
        if self.depth >= MAX_NESTING {
            return Err(self.error(format!(
                "expression nested deeper than {} levels",
                MAX_NESTING
            )));
        }
        self.depth += 1;
        Ok(())
    }

    fn nested(
        &mut self,
        parse: fn(&mut Parser) -> Result<Expr, EvalError>,
    ) -> Result<Expr, EvalError> {
        self.descend()?;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn expect_end(&self) -> Result<(), EvalError> {
        if self.peek() == &TokenKind::Eof {
            Ok(())
        } else {
            Err(self.error("unexpected trailing input"))
        }
    }

    // ── Precedence levels ───────────────────────────────────────────

    fn expression(&mut self) -> Result<Expr, EvalError> {
        self.or()
    }

    fn binary_level(
        &mut self,
        next: fn(&mut Parser) -> Result<Expr, EvalError>,
        ops: &[(TokenKind, BinaryOp)],
    ) -> Result<Expr, EvalError> {
        let base = self.depth;
        let result = self.binary_chain(next, ops);
        self.depth = base;
        result
    }

    /// Each operator in a left-associative chain deepens the tree by one.
    fn binary_chain(
        &mut self,
        next: fn(&mut Parser) -> Result<Expr, EvalError>,
        ops: &[(TokenKind, BinaryOp)],
    ) -> Result<Expr, EvalError> {
        let mut left = next(self)?;
        'outer: loop {
            for (kind, op) in ops {
                if self.peek() == kind {
                    self.advance();
                    self.descend()?;
                    let right = next(self)?;
                    left = Expr::Binary {
                        op: *op,
                        left: Box::new(left),
                        right: Box::new(right),
                    };
                    continue 'outer;
                }
            }
            return Ok(left);
        }
    }

    fn or(&mut self) -> Result<Expr, EvalError> {
        self.binary_level(Parser::and, &[(TokenKind::OrOr, BinaryOp::Or)])
    }

    fn and(&mut self) -> Result<Expr, EvalError> {
        self.binary_level(Parser::equality, &[(TokenKind::AndAnd, BinaryOp::And)])
    }

    fn equality(&mut self) -> Result<Expr, EvalError> {
        self.binary_level(
            Parser::relation,
            &[
                (TokenKind::EqEq, BinaryOp::Eq),
                (TokenKind::NotEq, BinaryOp::NotEq),
            ],
        )
    }

    fn relation(&mut self) -> Result<Expr, EvalError> {
        self.binary_level(
            Parser::additive,
            &[
                (TokenKind::Lt, BinaryOp::Lt),
                (TokenKind::LtEq, BinaryOp::LtEq),
                (TokenKind::Gt, BinaryOp::Gt),
                (TokenKind::GtEq, BinaryOp::GtEq),
                (TokenKind::In, BinaryOp::In),
            ],
        )
    }

    fn additive(&mut self) -> Result<Expr, EvalError> {
        self.binary_level(
            Parser::multiplicative,
            &[
                (TokenKind::Plus, BinaryOp::Add),
                (TokenKind::Minus, BinaryOp::Sub),
            ],
        )
    }

    fn multiplicative(&mut self) -> Result<Expr, EvalError> {
        self.binary_level(
            Parser::unary,
            &[
                (TokenKind::Star, BinaryOp::Mul),
                (TokenKind::Slash, BinaryOp::Div),
                (TokenKind::Percent, BinaryOp::Rem),
            ],
        )
    }

    fn unary(&mut self) -> Result<Expr, EvalError> {
        let op = match self.peek() {
            TokenKind::Bang => UnaryOp::Not,
            TokenKind::Minus => UnaryOp::Neg,
            _ => return self.primary(),
        };
        self.advance();
        let operand = self.nested(Parser::unary)?;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn primary(&mut self) -> Result<Expr, EvalError> {
        let token = self.advance();
        match token.kind {
            TokenKind::Int(i) => Ok(Expr::Literal(Value::Int(i))),
            TokenKind::Float(f) => Ok(Expr::Literal(Value::Float(f))),
            TokenKind::Str(s) => Ok(Expr::Literal(Value::Str(s))),
            TokenKind::True => Ok(Expr::Literal(Value::Bool(true))),
            TokenKind::False => Ok(Expr::Literal(Value::Bool(false))),
            TokenKind::Ident(name) => {
                if self.eat(&TokenKind::LParen) {
                    let args = self.arguments(&TokenKind::RParen, "')'")?;
                    Ok(Expr::Call { name, args })
                } else {
                    Ok(Expr::Variable(name))
                }
            }
            TokenKind::LParen => {
                let inner = self.nested(Parser::expression)?;
                self.expect(&TokenKind::RParen, "')'")?;
                Ok(inner)
            }
            TokenKind::LBrace => {
                let items = self.arguments(&TokenKind::RBrace, "'}'")?;
                Ok(Expr::SetLiteral(items))
            }
            TokenKind::Eof => Err(EvalError::SyntaxError {
                position: token.position,
                message: "unexpected end of expression".to_string(),
            }),
            other => Err(EvalError::SyntaxError {
                position: token.position,
                message: format!("unexpected token {:?}", other),
            }),
        }
    }

    /// Comma-separated expressions up to and including `close`
    fn arguments(&mut self, close: &TokenKind, what: &str) -> Result<Vec<Expr>, EvalError> {
        let mut args = Vec::new();
        if self.eat(close) {
            return Ok(args);
        }
        loop {
            args.push(self.nested(Parser::expression)?);
            if self.eat(&TokenKind::Comma) {
                continue;
            }
            self.expect(close, what)?;
            return Ok(args);
        }
    }
}
