//! In-memory table source

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use rustc_hash::FxHashMap;

use crate::error::{EstimationError, Result};
use crate::storage::{ScanRequest, TableSource, apply_request};

#[derive(Debug, Clone)]
struct Table {
    schema: SchemaRef,
    batches: Vec<RecordBatch>,
}

/// Tables held as Arrow record batches
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: FxHashMap<String, Table>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a table. Every batch must carry `schema`.
    pub fn insert(&mut self, name: &str, schema: SchemaRef, batches: Vec<RecordBatch>) -> Result<()> {
        if let Some(bad) = batches.iter().find(|b| b.schema() != schema) {
            return Err(EstimationError::Config(format!(
                "batch schema for table {name} does not match the declared schema: {:?}",
                bad.schema()
            )));
        }
        self.tables
            .insert(name.to_string(), Table { schema, batches });
        Ok(())
    }

    /// Add or replace a table made of one batch
    pub fn insert_batch(&mut self, name: &str, batch: RecordBatch) -> Result<()> {
        self.insert(name, batch.schema(), vec![batch])
    }

    /// Drop a table; returns whether it was present
    pub fn remove(&mut self, name: &str) -> bool {
        self.tables.remove(name).is_some()
    }

    #[must_use]
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.keys().cloned().collect();
        names.sort();
        names
    }

    /// Total rows of a table, zero when absent
    #[must_use]
    pub fn num_rows(&self, name: &str) -> usize {
        self.tables
            .get(name)
            .map_or(0, |t| t.batches.iter().map(RecordBatch::num_rows).sum())
    }
}

impl TableSource for MemoryStore {
    fn schema(&self, table: &str) -> Result<SchemaRef> {
        self.tables
            .get(table)
            .map(|t| t.schema.clone())
            .ok_or_else(|| EstimationError::TableNotFound(table.to_string()))
    }

    fn scan(&self, request: &ScanRequest) -> Result<Vec<RecordBatch>> {
        let table = self
            .tables
            .get(&request.table)
            .ok_or_else(|| EstimationError::TableNotFound(request.table.clone()))?;
        let mut out = Vec::with_capacity(table.batches.len());
        for batch in &table.batches {
            let selected = apply_request(request, batch)?;
            if selected.num_rows() > 0 {
                out.push(selected);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::KeyFilter;
    use arrow::array::Int64Array;
    use arrow::datatypes::{DataType, Field, Schema};
    use std::sync::Arc;

    #[test]
    fn scan_filters_by_key() {
        let schema = Arc::new(Schema::new(vec![Field::new("CN", DataType::Int64, false)]));
        let batch =
            RecordBatch::try_new(schema.clone(), vec![Arc::new(Int64Array::from(vec![1, 2, 3]))])
                .unwrap();
        let mut store = MemoryStore::new();
        store.insert("PLOT", schema, vec![batch]).unwrap();

        let request = ScanRequest::new("PLOT")
            .with_key_filter(KeyFilter::new("CN", ["1".to_string(), "3".to_string()]));
        let batches = store.scan(&request).unwrap();
        assert_eq!(batches.iter().map(RecordBatch::num_rows).sum::<usize>(), 2);
        assert!(matches!(
            store.schema("COND"),
            Err(EstimationError::TableNotFound(_))
        ));
    }
}
