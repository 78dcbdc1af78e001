//! Read-only access to the inventory tables
//!
//! The engine never talks to files directly. It asks a [`TableSource`] for a
//! table by name, naming the columns it needs and, where possible, the key
//! values (plot identifiers) it will keep. Sources push both down as far as
//! they can.

pub mod memory;
pub mod parquet;

use std::fmt;
use std::hash::{Hash, Hasher};

use arrow::array::BooleanArray;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use itertools::Itertools;
use rustc_hash::FxHashSet;

use crate::error::{EstimationError, Result};
use crate::filter::filter_record_batch;
use crate::schema::columns::key_strings;

pub use memory::MemoryStore;
pub use parquet::ParquetStore;

/// Keep only rows whose key column holds one of the given identifiers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyFilter {
    pub column: String,
    pub values: FxHashSet<String>,
}

impl KeyFilter {
    #[must_use]
    pub fn new(column: &str, values: impl IntoIterator<Item = String>) -> Self {
        Self {
            column: column.to_string(),
            values: values.into_iter().collect(),
        }
    }

    /// Row mask for a batch; null keys never match
    pub fn mask(&self, table: &str, batch: &RecordBatch) -> Result<BooleanArray> {
        let array = batch
            .column_by_name(&self.column)
            .ok_or_else(|| EstimationError::MissingColumn {
                table: table.to_string(),
                column: self.column.clone(),
            })?;
        let keys = key_strings(array, &self.column)?;
        Ok(keys
            .iter()
            .map(|key| Some(key.as_ref().is_some_and(|k| self.values.contains(k))))
            .collect())
    }
}

impl Hash for KeyFilter {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.column.hash(state);
        // Set iteration order is unspecified
        for value in self.values.iter().sorted() {
            value.hash(state);
        }
    }
}

/// A table read request
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScanRequest {
    pub table: String,
    /// Columns to return; `None` returns every column. Names the table lacks
    /// are ignored so callers can ask for optional columns.
    pub columns: Option<Vec<String>>,
    pub key_filter: Option<KeyFilter>,
}

impl ScanRequest {
    #[must_use]
    pub fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            columns: None,
            key_filter: None,
        }
    }

    #[must_use]
    pub fn with_columns(mut self, columns: impl IntoIterator<Item = String>) -> Self {
        let mut unique: Vec<String> = Vec::new();
        for column in columns {
            if !unique.contains(&column) {
                unique.push(column);
            }
        }
        self.columns = Some(unique);
        self
    }

    #[must_use]
    pub fn with_key_filter(mut self, filter: KeyFilter) -> Self {
        self.key_filter = Some(filter);
        self
    }
}

/// Read-only, schema-typed access to tables by name
pub trait TableSource: Send + Sync + fmt::Debug {
    /// Schema of a table, or `TableNotFound`
    fn schema(&self, table: &str) -> Result<SchemaRef>;

    /// Read a table with projection and key filtering applied
    fn scan(&self, request: &ScanRequest) -> Result<Vec<RecordBatch>>;

    fn has_table(&self, table: &str) -> bool {
        self.schema(table).is_ok()
    }
}

/// Apply a request's key filter and projection to one batch. The filter runs
/// first so the key column need not be projected.
pub fn apply_request(request: &ScanRequest, batch: &RecordBatch) -> Result<RecordBatch> {
    let filtered = match &request.key_filter {
        Some(filter) => {
            let mask = filter.mask(&request.table, batch)?;
            filter_record_batch(batch, &mask)?
        }
        None => batch.clone(),
    };

    match &request.columns {
        Some(columns) => {
            let schema = filtered.schema();
            let indices = columns
                .iter()
                .filter_map(|name| schema.index_of(name).ok())
                .collect_vec();
            Ok(filtered.project(&indices)?)
        }
        None => Ok(filtered),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Float64Array, StringArray};
    use arrow::datatypes::{DataType, Field, Schema};
    use std::sync::Arc;

    fn batch() -> RecordBatch {
        RecordBatch::try_new(
            Arc::new(Schema::new(vec![
                Field::new("PLT_CN", DataType::Utf8, true),
                Field::new("DIA", DataType::Float64, true),
            ])),
            vec![
                Arc::new(StringArray::from(vec![Some("1"), Some("2"), None])),
                Arc::new(Float64Array::from(vec![1.0, 2.0, 3.0])),
            ],
        )
        .unwrap()
    }

    #[test]
    fn key_filter_then_projection() {
        let request = ScanRequest::new("TREE")
            .with_columns(["DIA".to_string(), "MISSING".to_string()])
            .with_key_filter(KeyFilter::new("PLT_CN", ["2".to_string()]));
        let out = apply_request(&request, &batch()).unwrap();
        assert_eq!(out.num_rows(), 1);
        assert_eq!(out.num_columns(), 1);
        assert_eq!(out.schema().field(0).name(), "DIA");
    }

    #[test]
    fn key_filter_requires_column() {
        let filter = KeyFilter::new("CN", ["1".to_string()]);
        assert!(matches!(
            filter.mask("TREE", &batch()),
            Err(EstimationError::MissingColumn { .. })
        ));
    }
}
