//! Recursive-descent parser for domain expressions
//!
//! Grammar, lowest precedence first:
//!
//! ```text
//! or        := and ("OR" and)*
//! and       := not ("AND" not)*
//! not       := "NOT" not | predicate
//! predicate := additive ( cmp additive
//!                       | ["NOT"] "IN" "(" literal ("," literal)* ")"
//!                       | ["NOT"] "BETWEEN" additive "AND" additive
//!                       | "IS" ["NOT"] "NULL" )?
//! additive  := term (("+" | "-") term)*
//! term      := unary (("*" | "/") unary)*
//! unary     := "-" unary | primary
//! primary   := literal | identifier | "(" or ")"
//! ```

use crate::error::{EstimationError, Result};
use crate::filter::lexer::{Token, TokenKind, tokenize};
use crate::filter::{ArithOp, CompareOp, Expr, Literal};

/// Parse a domain expression into an [`Expr`]
pub fn parse(input: &str) -> Result<Expr> {
    if input.trim().is_empty() {
        return Err(EstimationError::syntax(input, 0, "empty expression"));
    }
    let tokens = tokenize(input)?;
    let mut parser = Parser {
        input,
        tokens,
        pos: 0,
    };
    let expr = parser.or_expr()?;
    let trailing = parser.peek();
    if trailing.kind != TokenKind::Eof {
        return Err(parser.error_at(trailing.offset, "unexpected trailing input"));
    }
    Ok(expr)
}

struct Parser<'a> {
    input: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> &Token {
        // The token stream always ends with Eof
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek_kind() == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> Result<()> {
        if self.eat(kind) {
            Ok(())
        } else {
            let offset = self.peek().offset;
            Err(self.error_at(offset, format!("expected {what}")))
        }
    }

    fn error_at(&self, offset: usize, message: impl Into<String>) -> EstimationError {
        EstimationError::syntax(self.input, offset, message)
    }

    fn or_expr(&mut self) -> Result<Expr> {
        let mut left = self.and_expr()?;
        while self.eat(&TokenKind::Or) {
            let right = self.and_expr()?;
            left = left.or(right);
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr> {
        let mut left = self.not_expr()?;
        while self.eat(&TokenKind::And) {
            let right = self.not_expr()?;
            left = left.and(right);
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> Result<Expr> {
        if self.eat(&TokenKind::Not) {
            let inner = self.not_expr()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.predicate()
    }

    fn predicate(&mut self) -> Result<Expr> {
        let left = self.additive()?;

        match self.peek_kind().clone() {
            TokenKind::Compare(op) => {
                self.advance();
                if *self.peek_kind() == TokenKind::Null {
                    let offset = self.peek().offset;
                    return Err(self.error_at(offset, "compare with NULL using IS [NOT] NULL"));
                }
                let right = self.additive()?;
                Ok(Expr::Compare {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                })
            }
            TokenKind::In => {
                self.advance();
                self.in_list(left, false)
            }
            TokenKind::Between => {
                self.advance();
                self.between(left, false)
            }
            TokenKind::Not => {
                self.advance();
                match self.peek_kind() {
                    TokenKind::In => {
                        self.advance();
                        self.in_list(left, true)
                    }
                    TokenKind::Between => {
                        self.advance();
                        self.between(left, true)
                    }
                    _ => {
                        let offset = self.peek().offset;
                        Err(self.error_at(offset, "expected IN or BETWEEN after NOT"))
                    }
                }
            }
            TokenKind::Is => {
                self.advance();
                let negated = self.eat(&TokenKind::Not);
                self.expect(&TokenKind::Null, "NULL")?;
                Ok(Expr::IsNull {
                    expr: Box::new(left),
                    negated,
                })
            }
            _ => Ok(left),
        }
    }

    fn in_list(&mut self, expr: Expr, negated: bool) -> Result<Expr> {
        self.expect(&TokenKind::LParen, "'(' after IN")?;
        let mut list = Vec::new();
        loop {
            list.push(self.list_literal()?);
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RParen, "')' closing IN list")?;
        Ok(Expr::InList {
            expr: Box::new(expr),
            list,
            negated,
        })
    }

    fn list_literal(&mut self) -> Result<Literal> {
        let negative = self.eat(&TokenKind::Minus);
        let token = self.advance();
        match (token.kind, negative) {
            (TokenKind::Literal(Literal::Int(v)), true) => Ok(Literal::Int(-v)),
            (TokenKind::Literal(Literal::Float(v)), true) => Ok(Literal::Float(-v)),
            (TokenKind::Literal(lit), false) => Ok(lit),
            _ => Err(self.error_at(token.offset, "IN lists accept literal values only")),
        }
    }

    fn between(&mut self, expr: Expr, negated: bool) -> Result<Expr> {
        let low = self.additive()?;
        self.expect(&TokenKind::And, "AND in BETWEEN")?;
        let high = self.additive()?;
        let range = expr.clone().gt_eq(low).and(expr.lt_eq(high));
        Ok(if negated {
            Expr::Not(Box::new(range))
        } else {
            range
        })
    }

    fn additive(&mut self) -> Result<Expr> {
        let mut left = self.term()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Plus => ArithOp::Add,
                TokenKind::Minus => ArithOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.term()?;
            left = Expr::Arith {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn term(&mut self) -> Result<Expr> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Star => ArithOp::Mul,
                TokenKind::Slash => ArithOp::Div,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.unary()?;
            left = Expr::Arith {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn unary(&mut self) -> Result<Expr> {
        if self.eat(&TokenKind::Minus) {
            let inner = self.unary()?;
            return Ok(match inner {
                Expr::Literal(Literal::Int(v)) => Expr::Literal(Literal::Int(-v)),
                Expr::Literal(Literal::Float(v)) => Expr::Literal(Literal::Float(-v)),
                other => Expr::Negate(Box::new(other)),
            });
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr> {
        let token = self.advance();
        match token.kind {
            TokenKind::Literal(lit) => Ok(Expr::Literal(lit)),
            TokenKind::Ident(name) => Ok(Expr::Column(name)),
            TokenKind::LParen => {
                let inner = self.or_expr()?;
                self.expect(&TokenKind::RParen, "')'")?;
                Ok(inner)
            }
            TokenKind::Eof => Err(self.error_at(token.offset, "unexpected end of expression")),
            TokenKind::Null => Err(self.error_at(token.offset, "NULL is only valid in IS [NOT] NULL")),
            other => Err(self.error_at(token.offset, format!("unexpected token {other:?}"))),
        }
    }
}
