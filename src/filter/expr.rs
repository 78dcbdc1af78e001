//! Columnar evaluation of domain expressions
//!
//! Values are normalized before reaching the Arrow kernels: numeric columns
//! and literals become `Float64`, text becomes `Utf8`. Comparisons and
//! arithmetic then run on `Datum`s so literals never get materialized to the
//! batch length.

use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, BooleanArray, Datum, Float64Array, Scalar, StringArray, make_array,
};
use arrow::compute::kernels::boolean::{and_kleene, not, or_kleene};
use arrow::compute::kernels::cmp;
use arrow::compute::kernels::numeric;
use arrow::compute::{cast, is_not_null, is_null};
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;

use crate::error::{EstimationError, Result};
use crate::filter::{ArithOp, CompareOp, Expr, Literal};

/// An evaluated value: a full column or a single broadcast value
enum Operand {
    Array(ArrayRef),
    Scalar(Scalar<ArrayRef>),
}

impl Operand {
    fn datum(&self) -> &dyn Datum {
        match self {
            Self::Array(array) => array,
            Self::Scalar(scalar) => scalar,
        }
    }

    fn from_result(array: ArrayRef, scalar: bool) -> Self {
        if scalar {
            Self::Scalar(Scalar::new(array))
        } else {
            Self::Array(array)
        }
    }

    const fn is_scalar(&self) -> bool {
        matches!(self, Self::Scalar(_))
    }
}

/// Evaluate a boolean expression to a mask of `num_rows` entries.
/// Null entries mean the predicate is unknown for that row.
pub fn evaluate_predicate(batch: &RecordBatch, expr: &Expr) -> Result<BooleanArray> {
    let rows = batch.num_rows();
    match expr {
        Expr::And(left, right) => {
            let l = evaluate_predicate(batch, left)?;
            let r = evaluate_predicate(batch, right)?;
            Ok(and_kleene(&l, &r)?)
        }
        Expr::Or(left, right) => {
            let l = evaluate_predicate(batch, left)?;
            let r = evaluate_predicate(batch, right)?;
            Ok(or_kleene(&l, &r)?)
        }
        Expr::Not(inner) => Ok(not(&evaluate_predicate(batch, inner)?)?),
        Expr::Compare { op, left, right } => {
            let l = evaluate_value(batch, left)?;
            let r = evaluate_value(batch, right)?;
            let result = compare(*op, &l, &r)?;
            Ok(broadcast(result, l.is_scalar() && r.is_scalar(), rows))
        }
        Expr::InList {
            expr,
            list,
            negated,
        } => {
            let value = evaluate_value(batch, expr)?;
            let mut matched = BooleanArray::from(vec![false; rows]);
            for literal in list {
                let candidate = Operand::Scalar(Scalar::new(literal_array(literal)));
                let hit = broadcast(
                    cmp::eq(value.datum(), candidate.datum())?,
                    value.is_scalar(),
                    rows,
                );
                matched = or_kleene(&matched, &hit)?;
            }
            if *negated {
                Ok(not(&matched)?)
            } else {
                Ok(matched)
            }
        }
        Expr::IsNull { expr, negated } => match evaluate_value(batch, expr)? {
            Operand::Array(array) => {
                if *negated {
                    Ok(is_not_null(&array)?)
                } else {
                    Ok(is_null(&array)?)
                }
            }
            Operand::Scalar(_) => Ok(BooleanArray::from(vec![*negated; rows])),
        },
        Expr::Column(_) | Expr::Literal(_) => {
            let value = evaluate_value(batch, expr)?;
            let scalar = value.is_scalar();
            let array = array_of(&value);
            let mask = array
                .as_any()
                .downcast_ref::<BooleanArray>()
                .cloned()
                .ok_or_else(|| EstimationError::ColumnType {
                    column: expr.to_string(),
                    data_type: array.data_type().to_string(),
                })?;
            Ok(broadcast(mask, scalar, rows))
        }
        Expr::Arith { .. } | Expr::Negate(_) => Err(EstimationError::ColumnType {
            column: expr.to_string(),
            data_type: DataType::Float64.to_string(),
        }),
    }
}

/// Evaluate a value expression
fn evaluate_value(batch: &RecordBatch, expr: &Expr) -> Result<Operand> {
    match expr {
        Expr::Column(name) => {
            let array = batch
                .column_by_name(name)
                .ok_or_else(|| EstimationError::MissingColumn {
                    table: "domain input".to_string(),
                    column: name.clone(),
                })?;
            Ok(Operand::Array(normalize(array)?))
        }
        Expr::Literal(literal) => Ok(Operand::Scalar(Scalar::new(literal_array(literal)))),
        Expr::Negate(inner) => {
            let value = evaluate_value(batch, inner)?;
            let scalar = value.is_scalar();
            let negated = numeric::neg(array_of(&value).as_ref())?;
            Ok(Operand::from_result(negated, scalar))
        }
        Expr::Arith { op, left, right } => {
            let l = evaluate_value(batch, left)?;
            let r = evaluate_value(batch, right)?;
            let result = match op {
                ArithOp::Add => numeric::add(l.datum(), r.datum())?,
                ArithOp::Sub => numeric::sub(l.datum(), r.datum())?,
                ArithOp::Mul => numeric::mul(l.datum(), r.datum())?,
                ArithOp::Div => numeric::div(l.datum(), r.datum())?,
            };
            Ok(Operand::from_result(result, l.is_scalar() && r.is_scalar()))
        }
        Expr::Compare { .. }
        | Expr::InList { .. }
        | Expr::IsNull { .. }
        | Expr::And(..)
        | Expr::Or(..)
        | Expr::Not(_) => {
            let mask = evaluate_predicate(batch, expr)?;
            Ok(Operand::Array(Arc::new(mask)))
        }
    }
}

fn compare(op: CompareOp, left: &Operand, right: &Operand) -> Result<BooleanArray> {
    let (l, r) = (left.datum(), right.datum());
    let result = match op {
        CompareOp::Eq => cmp::eq(l, r)?,
        CompareOp::NotEq => cmp::neq(l, r)?,
        CompareOp::Lt => cmp::lt(l, r)?,
        CompareOp::LtEq => cmp::lt_eq(l, r)?,
        CompareOp::Gt => cmp::gt(l, r)?,
        CompareOp::GtEq => cmp::gt_eq(l, r)?,
    };
    Ok(result)
}

/// Expand a single-value result to the batch length
fn broadcast(result: BooleanArray, scalar: bool, rows: usize) -> BooleanArray {
    if !scalar || result.len() == rows {
        return result;
    }
    let value = if result.is_null(0) {
        None
    } else {
        Some(result.value(0))
    };
    BooleanArray::from(vec![value; rows])
}

fn array_of(operand: &Operand) -> ArrayRef {
    match operand {
        Operand::Array(array) => Arc::clone(array),
        Operand::Scalar(scalar) => make_array(scalar.get().0.to_data()),
    }
}

/// Cast a column to the normalized type of its kind
fn normalize(array: &ArrayRef) -> Result<ArrayRef> {
    let target = match array.data_type() {
        DataType::Boolean | DataType::Utf8 | DataType::Float64 => return Ok(Arc::clone(array)),
        DataType::LargeUtf8 | DataType::Utf8View | DataType::Dictionary(_, _) => DataType::Utf8,
        t if t.is_numeric() => DataType::Float64,
        other => {
            return Err(EstimationError::ColumnType {
                column: "domain operand".to_string(),
                data_type: other.to_string(),
            });
        }
    };
    Ok(cast(array, &target)?)
}

fn literal_array(literal: &Literal) -> ArrayRef {
    match literal {
        #[allow(clippy::cast_precision_loss)]
        Literal::Int(v) => Arc::new(Float64Array::from(vec![*v as f64])),
        Literal::Float(v) => Arc::new(Float64Array::from(vec![*v])),
        Literal::Text(s) => Arc::new(StringArray::from(vec![s.as_str()])),
        Literal::Bool(b) => Arc::new(BooleanArray::from(vec![*b])),
    }
}

/// Collapse a predicate result to plain flags; unknown counts as no match
#[must_use]
pub fn mask_to_flags(mask: &BooleanArray) -> Vec<bool> {
    mask.iter().map(|v| v == Some(true)).collect()
}
