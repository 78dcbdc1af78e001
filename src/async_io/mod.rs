//! Async Parquet loading
//!
//! Reads whole tables concurrently with the async Parquet reader and hands
//! them back as a [`MemoryStore`], so that repeated estimation calls against
//! the same inventory do not touch the disk again.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use futures::TryStreamExt;
use futures::stream::{self, StreamExt};
use parquet::arrow::async_reader::ParquetRecordBatchStreamBuilder;
use tokio::fs::File;

use crate::error::{EstimationError, Result};
use crate::storage::parquet::projection_for;
use crate::storage::{MemoryStore, ParquetStore};
use crate::utils::log_missing_table;

/// Read a Parquet file asynchronously into Arrow record batches
pub async fn read_parquet_async(
    path: &Path,
    columns: Option<&[String]>,
    batch_size: usize,
) -> Result<(SchemaRef, Vec<RecordBatch>)> {
    let file = File::open(path).await?;
    let mut builder = ParquetRecordBatchStreamBuilder::new(file)
        .await?
        .with_batch_size(batch_size);

    if let Some(mask) = projection_for(columns, builder.schema(), builder.parquet_schema()) {
        builder = builder.with_projection(mask);
    }

    let stream = builder.build()?;
    let schema = stream.schema().clone();
    let batches = stream.try_collect::<Vec<_>>().await?;
    Ok((schema, batches))
}

/// Read the named tables of a Parquet store into memory.
///
/// Files are read concurrently, up to one per CPU. Tables the store lacks
/// are skipped with a warning so optional tables (growth/removal/mortality)
/// do not need special handling.
pub async fn prefetch_tables(store: &ParquetStore, tables: &[&str]) -> Result<MemoryStore> {
    let start = Instant::now();
    log::info!("Prefetching {} inventory table(s) from {}", tables.len(), store.root().display());

    let mut jobs: Vec<(String, PathBuf)> = Vec::new();
    for table in tables {
        match store.table_files(table) {
            Ok(files) => jobs.extend(files.into_iter().map(|f| ((*table).to_string(), f))),
            Err(EstimationError::TableNotFound(_)) => {
                log_missing_table(table, store.root());
            }
            Err(e) => return Err(e),
        }
    }

    let batch_size = store.batch_size();
    let results = stream::iter(jobs)
        .map(|(table, path)| async move {
            let read = read_parquet_async(&path, None, batch_size).await;
            (table, read)
        })
        .buffer_unordered(num_cpus::get())
        .collect::<Vec<_>>()
        .await;

    let mut grouped: Vec<(String, SchemaRef, Vec<RecordBatch>)> = Vec::new();
    for (table, read) in results {
        let (schema, batches) = read?;
        match grouped.iter_mut().find(|(name, _, _)| *name == table) {
            Some((_, _, existing)) => existing.extend(batches),
            None => grouped.push((table, schema, batches)),
        }
    }

    let mut memory = MemoryStore::new();
    let mut loaded = 0;
    for (table, schema, batches) in grouped {
        // Part files of one table may differ in nullability metadata
        let batches = batches
            .into_iter()
            .map(|b| RecordBatch::try_new(Arc::clone(&schema), b.columns().to_vec()))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        loaded += batches.len();
        memory.insert(&table, schema, batches)?;
    }

    log::info!(
        "Prefetched {} table(s), {loaded} batch(es) in {:?}",
        memory.table_names().len(),
        start.elapsed()
    );
    Ok(memory)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{ScanRequest, TableSource};
    use arrow::array::Int64Array;
    use arrow::datatypes::{DataType, Field, Schema};
    use parquet::arrow::ArrowWriter;

    #[tokio::test]
    async fn prefetch_skips_missing_tables() {
        let dir = tempfile::tempdir().unwrap();
        let schema = Arc::new(Schema::new(vec![Field::new("CN", DataType::Int64, false)]));
        let batch =
            RecordBatch::try_new(schema.clone(), vec![Arc::new(Int64Array::from(vec![1, 2]))])
                .unwrap();
        let file = std::fs::File::create(dir.path().join("PLOT.parquet")).unwrap();
        let mut writer = ArrowWriter::try_new(file, schema, None).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();

        let store = ParquetStore::open(dir.path()).unwrap();
        let memory = prefetch_tables(&store, &["PLOT", "TREE_GRM_COMPONENT"])
            .await
            .unwrap();
        assert_eq!(memory.num_rows("PLOT"), 2);
        assert!(!memory.has_table("TREE_GRM_COMPONENT"));
        assert_eq!(memory.scan(&ScanRequest::new("PLOT")).unwrap().len(), 1);
    }
}
