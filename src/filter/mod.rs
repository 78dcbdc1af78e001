//! Domain filtering for inventory tables
//!
//! Domain expressions are parsed into a typed [`Expr`] tree, checked against
//! the schema of the table they apply to, and evaluated column-wise over Arrow
//! record batches. No expression text ever reaches a query engine.

pub mod domain;
pub mod expr;
pub mod lexer;
pub mod parser;

use std::collections::HashSet;
use std::fmt;

use arrow::array::{ArrayRef, BooleanArray};
use arrow::compute::filter as arrow_filter;
use arrow::record_batch::RecordBatch;

use crate::error::{EstimationError, Result};

pub use domain::{CompiledDomain, DomainFilters, LandType, LevelSchemas, TreeType};
pub use parser::parse;

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl CompareOp {
    const fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::NotEq => "!=",
            Self::Lt => "<",
            Self::LtEq => "<=",
            Self::Gt => ">",
            Self::GtEq => ">=",
        }
    }
}

/// Arithmetic operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl ArithOp {
    const fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
        }
    }
}

/// Literal value in a domain expression
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Text(String),
    Bool(bool),
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v:?}"),
            Self::Text(s) => write!(f, "'{}'", s.replace('\'', "''")),
            Self::Bool(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
        }
    }
}

impl From<i64> for Literal {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for Literal {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for Literal {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for Literal {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// Parsed domain expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Attribute reference
    Column(String),
    Literal(Literal),
    /// Unary minus
    Negate(Box<Expr>),
    Arith {
        op: ArithOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Compare {
        op: CompareOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// `expr [NOT] IN (literal, ...)`
    InList {
        expr: Box<Expr>,
        list: Vec<Literal>,
        negated: bool,
    },
    /// `expr IS [NOT] NULL`
    IsNull { expr: Box<Expr>, negated: bool },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
}

impl Expr {
    /// Reference a column
    #[must_use]
    pub fn column(name: &str) -> Self {
        Self::Column(name.to_string())
    }

    /// Literal value
    #[must_use]
    pub fn lit(value: impl Into<Literal>) -> Self {
        Self::Literal(value.into())
    }

    fn compare(self, op: CompareOp, other: Self) -> Self {
        Self::Compare {
            op,
            left: Box::new(self),
            right: Box::new(other),
        }
    }

    #[must_use]
    pub fn equals(self, other: Self) -> Self {
        self.compare(CompareOp::Eq, other)
    }

    #[must_use]
    pub fn gt_eq(self, other: Self) -> Self {
        self.compare(CompareOp::GtEq, other)
    }

    #[must_use]
    pub fn lt_eq(self, other: Self) -> Self {
        self.compare(CompareOp::LtEq, other)
    }

    #[must_use]
    pub fn is_in(self, list: Vec<Literal>) -> Self {
        Self::InList {
            expr: Box::new(self),
            list,
            negated: false,
        }
    }

    #[must_use]
    pub fn and(self, other: Self) -> Self {
        Self::And(Box::new(self), Box::new(other))
    }

    #[must_use]
    pub fn or(self, other: Self) -> Self {
        Self::Or(Box::new(self), Box::new(other))
    }

    /// Returns a set of all column names referenced by this expression
    #[must_use]
    pub fn required_columns(&self) -> HashSet<String> {
        let mut columns = HashSet::new();
        self.collect_required_columns(&mut columns);
        columns
    }

    fn collect_required_columns(&self, columns: &mut HashSet<String>) {
        match self {
            Self::Column(name) => {
                columns.insert(name.clone());
            }
            Self::Literal(_) => {}
            Self::Negate(inner)
            | Self::Not(inner)
            | Self::InList { expr: inner, .. }
            | Self::IsNull { expr: inner, .. } => inner.collect_required_columns(columns),
            Self::Arith { left, right, .. }
            | Self::Compare { left, right, .. }
            | Self::And(left, right)
            | Self::Or(left, right) => {
                left.collect_required_columns(columns);
                right.collect_required_columns(columns);
            }
        }
    }

    /// Column names in first-reference order
    #[must_use]
    pub fn column_names(&self) -> Vec<String> {
        let mut ordered = Vec::new();
        self.collect_ordered(&mut ordered);
        ordered
    }

    fn collect_ordered(&self, out: &mut Vec<String>) {
        match self {
            Self::Column(name) => {
                if !out.contains(name) {
                    out.push(name.clone());
                }
            }
            Self::Literal(_) => {}
            Self::Negate(inner)
            | Self::Not(inner)
            | Self::InList { expr: inner, .. }
            | Self::IsNull { expr: inner, .. } => inner.collect_ordered(out),
            Self::Arith { left, right, .. }
            | Self::Compare { left, right, .. }
            | Self::And(left, right)
            | Self::Or(left, right) => {
                left.collect_ordered(out);
                right.collect_ordered(out);
            }
        }
    }
}

/// Normalized, fully parenthesized rendering. Two expressions that parse to
/// the same tree render identically, which makes the text usable as a cache
/// fingerprint.
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Column(name) => write!(f, "{name}"),
            Self::Literal(lit) => write!(f, "{lit}"),
            Self::Negate(inner) => write!(f, "(-{inner})"),
            Self::Arith { op, left, right } => write!(f, "({left} {} {right})", op.symbol()),
            Self::Compare { op, left, right } => write!(f, "({left} {} {right})", op.symbol()),
            Self::InList {
                expr,
                list,
                negated,
            } => {
                let items = list
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ");
                let keyword = if *negated { "NOT IN" } else { "IN" };
                write!(f, "({expr} {keyword} ({items}))")
            }
            Self::IsNull { expr, negated } => {
                let keyword = if *negated { "IS NOT NULL" } else { "IS NULL" };
                write!(f, "({expr} {keyword})")
            }
            Self::And(left, right) => write!(f, "({left} AND {right})"),
            Self::Or(left, right) => write!(f, "({left} OR {right})"),
            Self::Not(inner) => write!(f, "(NOT {inner})"),
        }
    }
}

/// Trait for objects that can filter record batches
pub trait BatchFilter: fmt::Debug {
    /// Filter a record batch, keeping matching rows
    fn filter(&self, batch: &RecordBatch) -> Result<RecordBatch>;

    /// Returns the set of column names required by this filter
    fn required_columns(&self) -> HashSet<String>;
}

/// Filter a record batch based on a boolean mask. Null mask entries drop the row.
pub fn filter_record_batch(batch: &RecordBatch, mask: &BooleanArray) -> Result<RecordBatch> {
    if batch.num_rows() != mask.len() {
        return Err(EstimationError::Config(format!(
            "Mask length ({}) doesn't match batch row count ({})",
            mask.len(),
            batch.num_rows()
        )));
    }

    let filtered_columns: Vec<ArrayRef> = batch
        .columns()
        .iter()
        .map(|col| arrow_filter(col, mask))
        .collect::<arrow::error::Result<_>>()?;

    Ok(RecordBatch::try_new(batch.schema(), filtered_columns)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_normalized() {
        let a = parse("a==1 and not b in ('x','y')").unwrap();
        let b = parse("(a = 1) AND NOT (b IN ( 'x' , 'y' ))").unwrap();
        assert_eq!(a.to_string(), b.to_string());
        assert_eq!(a.to_string(), "((a == 1) AND (NOT (b IN ('x', 'y'))))");
    }

    #[test]
    fn builder_and_required_columns() {
        let expr = Expr::column("STATUSCD")
            .equals(Expr::lit(1))
            .and(Expr::column("DIA").gt_eq(Expr::lit(5.0)));
        let columns = expr.required_columns();
        assert!(columns.contains("STATUSCD"));
        assert!(columns.contains("DIA"));
        assert_eq!(expr.column_names(), vec!["STATUSCD", "DIA"]);
    }
}
