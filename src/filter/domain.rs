//! Domains compiled against the table of one hierarchy level
//!
//! A domain is checked against its own table's schema before any data is
//! read. A column that only exists at another level is reported as an
//! [`EstimationError::UnknownAttribute`] naming that level, so a tree-level
//! attribute passed as an area domain fails loudly instead of matching
//! nothing.

use std::collections::HashSet;

use arrow::array::BooleanArray;
use arrow::datatypes::{DataType, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use serde::{Deserialize, Serialize};

use crate::error::{EstimationError, Result};
use crate::filter::expr::{evaluate_predicate, mask_to_flags};
use crate::filter::{BatchFilter, Expr, Literal, filter_record_batch, parse};
use crate::schema::{Level, cond, tree};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Numeric,
    Text,
    Boolean,
}

impl Kind {
    fn of_type(data_type: &DataType) -> Option<Self> {
        match data_type {
            DataType::Boolean => Some(Self::Boolean),
            DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View => Some(Self::Text),
            DataType::Dictionary(_, value) => Self::of_type(value),
            t if t.is_numeric() => Some(Self::Numeric),
            _ => None,
        }
    }

    const fn of_literal(literal: &Literal) -> Self {
        match literal {
            Literal::Int(_) | Literal::Float(_) => Self::Numeric,
            Literal::Text(_) => Self::Text,
            Literal::Bool(_) => Self::Boolean,
        }
    }

    const fn name(self) -> &'static str {
        match self {
            Self::Numeric => "numeric",
            Self::Text => "text",
            Self::Boolean => "boolean",
        }
    }
}

/// Schemas of the three levels a domain may target
#[derive(Debug, Clone)]
pub struct LevelSchemas {
    pub plot: SchemaRef,
    pub condition: SchemaRef,
    /// Absent for estimators that never read the tree table
    pub item: Option<SchemaRef>,
}

impl LevelSchemas {
    fn get(&self, level: Level) -> Option<&Schema> {
        match level {
            Level::Plot => Some(self.plot.as_ref()),
            Level::Condition => Some(self.condition.as_ref()),
            Level::Item => self.item.as_deref(),
        }
    }

    /// First other level whose table has the column
    fn locate(&self, column: &str, except: Level) -> Option<Level> {
        [Level::Plot, Level::Condition, Level::Item]
            .into_iter()
            .filter(|level| *level != except)
            .find(|level| {
                self.get(*level)
                    .is_some_and(|schema| schema.field_with_name(column).is_ok())
            })
    }
}

struct TypeChecker<'a> {
    text: &'a str,
    level: Level,
    schema: &'a Schema,
    others: Option<&'a LevelSchemas>,
}

impl TypeChecker<'_> {
    fn kind(&self, expr: &Expr) -> Result<Kind> {
        match expr {
            Expr::Column(name) => {
                let field = self.schema.field_with_name(name).map_err(|_| {
                    let found_at = self.others.and_then(|s| s.locate(name, self.level));
                    EstimationError::unknown_attribute(name, self.level, found_at)
                })?;
                Kind::of_type(field.data_type()).ok_or_else(|| {
                    self.error(
                        expr,
                        format!("column {name} has unsupported type {}", field.data_type()),
                    )
                })
            }
            Expr::Literal(literal) => Ok(Kind::of_literal(literal)),
            Expr::Negate(inner) => {
                self.require(inner, Kind::Numeric, "unary minus")?;
                Ok(Kind::Numeric)
            }
            Expr::Arith { left, right, .. } => {
                self.require(left, Kind::Numeric, "arithmetic")?;
                self.require(right, Kind::Numeric, "arithmetic")?;
                Ok(Kind::Numeric)
            }
            Expr::Compare { left, right, .. } => {
                let l = self.kind(left)?;
                let r = self.kind(right)?;
                if l != r {
                    return Err(self.error(
                        expr,
                        format!("cannot compare {} with {}", l.name(), r.name()),
                    ));
                }
                Ok(Kind::Boolean)
            }
            Expr::InList { expr: inner, list, .. } => {
                let value = self.kind(inner)?;
                if let Some(bad) = list.iter().find(|lit| Kind::of_literal(lit) != value) {
                    return Err(self.error(
                        expr,
                        format!("IN list value {bad} is not {}", value.name()),
                    ));
                }
                Ok(Kind::Boolean)
            }
            Expr::IsNull { expr: inner, .. } => {
                self.kind(inner)?;
                Ok(Kind::Boolean)
            }
            Expr::And(left, right) | Expr::Or(left, right) => {
                self.require(left, Kind::Boolean, "AND/OR")?;
                self.require(right, Kind::Boolean, "AND/OR")?;
                Ok(Kind::Boolean)
            }
            Expr::Not(inner) => {
                self.require(inner, Kind::Boolean, "NOT")?;
                Ok(Kind::Boolean)
            }
        }
    }

    fn require(&self, expr: &Expr, expected: Kind, context: &str) -> Result<()> {
        let actual = self.kind(expr)?;
        if actual == expected {
            Ok(())
        } else {
            Err(self.error(
                expr,
                format!("{context} needs {} operands, found {}", expected.name(), actual.name()),
            ))
        }
    }

    /// Syntax error positioned at the first column the sub-expression names
    fn error(&self, expr: &Expr, message: String) -> EstimationError {
        let position = expr
            .column_names()
            .first()
            .and_then(|name| self.text.find(name.as_str()))
            .unwrap_or(0);
        EstimationError::syntax(self.text, position, message)
    }
}

/// A domain expression checked against the schema of one level
#[derive(Debug, Clone)]
pub struct CompiledDomain {
    level: Level,
    expr: Expr,
    columns: Vec<String>,
}

impl CompiledDomain {
    /// Parse and check an expression against the schema of `level`
    pub fn compile(expression: &str, level: Level, schema: &Schema) -> Result<Self> {
        Self::compile_with(expression, level, schema, None)
    }

    fn compile_with(
        expression: &str,
        level: Level,
        schema: &Schema,
        others: Option<&LevelSchemas>,
    ) -> Result<Self> {
        let expr = parse(expression)?;
        Self::check(expression, expr, level, schema, others)
    }

    /// Check an already-built expression
    pub fn from_expr(expr: Expr, level: Level, schema: &Schema) -> Result<Self> {
        let text = expr.to_string();
        Self::check(&text, expr, level, schema, None)
    }

    fn check(
        text: &str,
        expr: Expr,
        level: Level,
        schema: &Schema,
        others: Option<&LevelSchemas>,
    ) -> Result<Self> {
        let checker = TypeChecker {
            text,
            level,
            schema,
            others,
        };
        let kind = checker.kind(&expr)?;
        if kind != Kind::Boolean {
            return Err(EstimationError::syntax(
                text,
                0,
                format!("domain must be a boolean condition, found {}", kind.name()),
            ));
        }
        let columns = expr.column_names();
        Ok(Self {
            level,
            expr,
            columns,
        })
    }

    /// Columns read by the predicate, in first-reference order
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Normalized text, stable across formatting differences
    #[must_use]
    pub fn normalized(&self) -> String {
        self.expr.to_string()
    }

    /// Evaluate the predicate; unknown results are false
    pub fn evaluate(&self, batch: &RecordBatch) -> Result<Vec<bool>> {
        Ok(mask_to_flags(&evaluate_predicate(batch, &self.expr)?))
    }

    /// Combine with another domain of the same level
    #[must_use]
    pub fn and(self, other: Self) -> Self {
        debug_assert_eq!(self.level, other.level);
        let expr = self.expr.and(other.expr);
        let columns = expr.column_names();
        Self {
            level: self.level,
            expr,
            columns,
        }
    }
}

impl BatchFilter for CompiledDomain {
    fn filter(&self, batch: &RecordBatch) -> Result<RecordBatch> {
        let mask = BooleanArray::from(self.evaluate(batch)?);
        filter_record_batch(batch, &mask)
    }

    fn required_columns(&self) -> HashSet<String> {
        self.expr.required_columns()
    }
}

/// The plot, area and tree domains of one estimation call
#[derive(Debug, Clone, Default)]
pub struct DomainFilters {
    pub plot: Option<CompiledDomain>,
    pub area: Option<CompiledDomain>,
    pub tree: Option<CompiledDomain>,
}

impl DomainFilters {
    /// Compile each supplied expression against its own level
    pub fn compile(
        plot: Option<&str>,
        area: Option<&str>,
        tree: Option<&str>,
        schemas: &LevelSchemas,
    ) -> Result<Self> {
        let compile = |text: Option<&str>, level: Level| -> Result<Option<CompiledDomain>> {
            match text.map(str::trim).filter(|t| !t.is_empty()) {
                None => Ok(None),
                Some(text) => {
                    let schema = schemas.get(level).ok_or_else(|| {
                        EstimationError::Config(format!(
                            "a {level} domain is not valid for this estimator"
                        ))
                    })?;
                    CompiledDomain::compile_with(text, level, schema, Some(schemas)).map(Some)
                }
            }
        };

        Ok(Self {
            plot: compile(plot, Level::Plot)?,
            area: compile(area, Level::Condition)?,
            tree: compile(tree, Level::Item)?,
        })
    }
}

/// Land classification of the parcels an estimate covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LandType {
    /// Forest land
    #[default]
    Forest,
    /// Productive, unreserved forest land
    Timber,
    /// All sampled land
    All,
}

impl LandType {
    /// Predicate over COND selecting this land type
    #[must_use]
    pub fn predicate(self) -> Expr {
        let forest = Expr::column(cond::COND_STATUS_CD).equals(Expr::lit(1));
        match self {
            Self::Forest => forest,
            Self::Timber => forest
                .and(Expr::column(cond::SITECLCD).is_in((1..=6).map(Literal::Int).collect()))
                .and(Expr::column(cond::RESERVCD).equals(Expr::lit(0))),
            Self::All => land_base(),
        }
    }

    /// Land basis suffix of the growth/removal/mortality columns
    #[must_use]
    pub const fn grm_basis(self) -> &'static str {
        match self {
            Self::Timber => "TIMBER",
            Self::Forest | Self::All => "FOREST",
        }
    }
}

/// Predicate over COND selecting sampled land (forest and non-forest)
#[must_use]
pub fn land_base() -> Expr {
    Expr::column(cond::COND_STATUS_CD).is_in(vec![Literal::Int(1), Literal::Int(2)])
}

/// Status/class of the trees an estimate covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreeType {
    #[default]
    Live,
    Dead,
    /// Live, sound trees of at least 5 inches
    GrowingStock,
    All,
}

impl TreeType {
    /// Predicate over TREE selecting this tree type; `None` keeps every tree
    #[must_use]
    pub fn predicate(self) -> Option<Expr> {
        let status = |code: i64| Expr::column(tree::STATUSCD).equals(Expr::lit(code));
        match self {
            Self::Live => Some(status(1)),
            Self::Dead => Some(status(2)),
            Self::GrowingStock => Some(
                status(1)
                    .and(Expr::column(tree::TREECLCD).equals(Expr::lit(2)))
                    .and(Expr::column(tree::DIA).gt_eq(Expr::lit(5.0))),
            ),
            Self::All => None,
        }
    }

    /// Tree basis prefix of the growth/removal/mortality columns
    #[must_use]
    pub const fn grm_basis(self) -> &'static str {
        match self {
            Self::GrowingStock => "GS",
            Self::Live | Self::Dead | Self::All => "AL",
        }
    }
}
