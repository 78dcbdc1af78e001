//! Tokenizer for domain expressions

use crate::error::{EstimationError, Result};
use crate::filter::{CompareOp, Literal};

/// Token kinds
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Ident(String),
    Literal(Literal),
    Compare(CompareOp),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
    Comma,
    And,
    Or,
    Not,
    In,
    Between,
    Is,
    Null,
    Eof,
}

/// A token and the byte offset it starts at
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub offset: usize,
}

/// Split an expression into tokens. Keywords are case-insensitive;
/// identifiers keep their case.
pub fn tokenize(input: &str) -> Result<Vec<Token>> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let c = bytes[pos];
        let start = pos;

        if c.is_ascii_whitespace() {
            pos += 1;
            continue;
        }

        let kind = match c {
            b'(' => {
                pos += 1;
                TokenKind::LParen
            }
            b')' => {
                pos += 1;
                TokenKind::RParen
            }
            b',' => {
                pos += 1;
                TokenKind::Comma
            }
            b'+' => {
                pos += 1;
                TokenKind::Plus
            }
            b'-' => {
                pos += 1;
                TokenKind::Minus
            }
            b'*' => {
                pos += 1;
                TokenKind::Star
            }
            b'/' => {
                pos += 1;
                TokenKind::Slash
            }
            b'=' | b'!' | b'<' | b'>' => {
                let (op, width) = comparison(input, bytes, pos)?;
                pos += width;
                TokenKind::Compare(op)
            }
            b'\'' | b'"' => {
                let (text, end) = quoted(input, pos)?;
                pos = end;
                TokenKind::Literal(Literal::Text(text))
            }
            b'0'..=b'9' | b'.' => {
                let (literal, end) = number(input, pos)?;
                pos = end;
                TokenKind::Literal(literal)
            }
            c if c.is_ascii_alphabetic() || c == b'_' => {
                while pos < bytes.len() && (bytes[pos].is_ascii_alphanumeric() || bytes[pos] == b'_')
                {
                    pos += 1;
                }
                keyword_or_ident(&input[start..pos])
            }
            _ => {
                let found = input[pos..].chars().next().unwrap_or('?');
                return Err(EstimationError::syntax(
                    input,
                    pos,
                    format!("unexpected character '{found}'"),
                ));
            }
        };

        tokens.push(Token {
            kind,
            offset: start,
        });
    }

    tokens.push(Token {
        kind: TokenKind::Eof,
        offset: input.len(),
    });
    Ok(tokens)
}

fn comparison(input: &str, bytes: &[u8], pos: usize) -> Result<(CompareOp, usize)> {
    let next = bytes.get(pos + 1).copied();
    let parsed = match (bytes[pos], next) {
        (b'=', Some(b'=')) => (CompareOp::Eq, 2),
        (b'=', _) => (CompareOp::Eq, 1),
        (b'!', Some(b'=')) => (CompareOp::NotEq, 2),
        (b'<', Some(b'>')) => (CompareOp::NotEq, 2),
        (b'<', Some(b'=')) => (CompareOp::LtEq, 2),
        (b'<', _) => (CompareOp::Lt, 1),
        (b'>', Some(b'=')) => (CompareOp::GtEq, 2),
        (b'>', _) => (CompareOp::Gt, 1),
        _ => {
            return Err(EstimationError::syntax(
                input,
                pos,
                "'!' must be followed by '='; use NOT for negation",
            ));
        }
    };
    Ok(parsed)
}

/// Quoted string; the quote character is escaped by doubling it
fn quoted(input: &str, start: usize) -> Result<(String, usize)> {
    let quote = input.as_bytes()[start];
    let mut text = String::new();
    let mut chars = input[start + 1..].char_indices().peekable();

    while let Some((i, ch)) = chars.next() {
        if ch as u32 == u32::from(quote) {
            if chars.peek().is_some_and(|&(_, next)| next as u32 == u32::from(quote)) {
                chars.next();
                text.push(ch);
                continue;
            }
            return Ok((text, start + 1 + i + 1));
        }
        text.push(ch);
    }

    Err(EstimationError::syntax(input, start, "unterminated string literal"))
}

fn number(input: &str, start: usize) -> Result<(Literal, usize)> {
    let bytes = input.as_bytes();
    let mut pos = start;
    let mut is_float = false;

    while pos < bytes.len() && bytes[pos].is_ascii_digit() {
        pos += 1;
    }
    if pos < bytes.len() && bytes[pos] == b'.' {
        is_float = true;
        pos += 1;
        while pos < bytes.len() && bytes[pos].is_ascii_digit() {
            pos += 1;
        }
    }
    if pos < bytes.len() && (bytes[pos] == b'e' || bytes[pos] == b'E') {
        let mut exp = pos + 1;
        if exp < bytes.len() && (bytes[exp] == b'+' || bytes[exp] == b'-') {
            exp += 1;
        }
        if exp < bytes.len() && bytes[exp].is_ascii_digit() {
            is_float = true;
            pos = exp;
            while pos < bytes.len() && bytes[pos].is_ascii_digit() {
                pos += 1;
            }
        }
    }

    let text = &input[start..pos];
    let invalid = || EstimationError::syntax(input, start, format!("invalid number '{text}'"));
    if text == "." {
        return Err(invalid());
    }
    let literal = if is_float {
        Literal::Float(text.parse().map_err(|_| invalid())?)
    } else {
        Literal::Int(text.parse().map_err(|_| invalid())?)
    };
    Ok((literal, pos))
}

fn keyword_or_ident(word: &str) -> TokenKind {
    match word.to_ascii_uppercase().as_str() {
        "AND" => TokenKind::And,
        "OR" => TokenKind::Or,
        "NOT" => TokenKind::Not,
        "IN" => TokenKind::In,
        "BETWEEN" => TokenKind::Between,
        "IS" => TokenKind::Is,
        "NULL" => TokenKind::Null,
        "TRUE" => TokenKind::Literal(Literal::Bool(true)),
        "FALSE" => TokenKind::Literal(Literal::Bool(false)),
        _ => TokenKind::Ident(word.to_string()),
    }
}
