//! Error handling for the estimation engine.
//!
//! Structural problems (bad evaluation id, malformed domain, missing table)
//! terminate an estimation call. Statistical degeneracies are not errors by
//! default; they are reported as [`crate::output::Degradation`] values and
//! only become `InsufficientSample` / `UnrecognizedComponent` errors in strict
//! mode.

use std::io;

use arrow::error::ArrowError;
use parquet::errors::ParquetError;

use crate::schema::Level;

/// Errors raised by the estimation engine
#[derive(Debug, thiserror::Error)]
pub enum EstimationError {
    /// No evaluation matched the requested purpose and scope
    #[error("No {eval_type} evaluation found{scope}")]
    NoEvaluationFound { eval_type: String, scope: String },

    /// Several equally recent evaluations matched and could not be told apart
    #[error("Ambiguous {eval_type} evaluation selection, candidates: {candidates:?}")]
    AmbiguousEvaluation {
        eval_type: String,
        candidates: Vec<i64>,
    },

    /// Malformed or ill-typed domain expression
    #[error("Syntax error in domain '{expression}' at offset {position}: {message}")]
    DomainSyntax {
        expression: String,
        position: usize,
        message: String,
    },

    /// Domain or grouping expression references a column its table lacks
    #[error("Unknown attribute '{attribute}' at {level} level{hint}")]
    UnknownAttribute {
        attribute: String,
        level: Level,
        hint: String,
    },

    /// A stratum with fewer than two sampled units (strict mode only)
    #[error("Stratum {stratum} has {sampled_units} sampled unit(s); variance is undefined")]
    InsufficientSample {
        stratum: String,
        sampled_units: usize,
    },

    /// A growth/removal/mortality component label outside the known set (strict mode only)
    #[error("Unrecognized component label '{label}' on {count} record(s)")]
    UnrecognizedComponent { label: String, count: usize },

    /// A plot carries more than one stratum assignment within an evaluation
    #[error("Plot {plot} is assigned to more than one stratum in evaluation {evalid}")]
    ConflictingAssignment { plot: String, evalid: i64 },

    /// An assignment references a stratum missing from the stratum table
    #[error("Stratum {stratum} referenced by evaluation {evalid} was not found")]
    MissingStratum { stratum: String, evalid: i64 },

    /// The storage collaborator has no such table
    #[error("Table '{0}' not found")]
    TableNotFound(String),

    /// A required column is absent from a loaded table
    #[error("Column '{column}' missing from table '{table}'")]
    MissingColumn { table: String, column: String },

    /// A column exists but holds an unusable type
    #[error("Column '{column}' has unsupported type {data_type}")]
    ColumnType { column: String, data_type: String },

    /// Invalid configuration or option combination
    #[error("Configuration error: {0}")]
    Config(String),

    /// Arrow error
    #[error("Arrow error: {0}")]
    Arrow(#[from] ArrowError),

    /// Parquet error
    #[error("Parquet error: {0}")]
    Parquet(#[from] ParquetError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error converting result rows to Arrow
    #[error("Arrow conversion error: {0}")]
    Conversion(#[from] serde_arrow::Error),
}

impl EstimationError {
    /// Build an `UnknownAttribute` error, optionally naming the level that does hold it
    #[must_use]
    pub fn unknown_attribute(attribute: &str, level: Level, found_at: Option<Level>) -> Self {
        let hint = match found_at {
            Some(other) => format!(" (it exists at {other} level; use the {other} domain)"),
            None => String::new(),
        };
        Self::UnknownAttribute {
            attribute: attribute.to_string(),
            level,
            hint,
        }
    }

    /// Build a `DomainSyntax` error
    #[must_use]
    pub fn syntax(expression: &str, position: usize, message: impl Into<String>) -> Self {
        Self::DomainSyntax {
            expression: expression.to_string(),
            position,
            message: message.into(),
        }
    }

    /// True for errors caused by caller input rather than data or IO
    #[must_use]
    pub const fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::NoEvaluationFound { .. }
                | Self::AmbiguousEvaluation { .. }
                | Self::DomainSyntax { .. }
                | Self::UnknownAttribute { .. }
                | Self::Config(_)
        )
    }
}

/// Result type for estimation operations
pub type Result<T> = std::result::Result<T, EstimationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_attribute_mentions_other_level() {
        let err = EstimationError::unknown_attribute("FORTYPCD", Level::Item, Some(Level::Condition));
        let message = err.to_string();
        assert!(message.contains("FORTYPCD"));
        assert!(message.contains("tree level"));
        assert!(message.contains("condition level"));
        assert!(err.is_input_error());
    }

    #[test]
    fn io_errors_are_not_input_errors() {
        let err: EstimationError = io::Error::other("boom").into();
        assert!(!err.is_input_error());
    }
}
