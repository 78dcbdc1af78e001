//! Parquet directory table source
//!
//! A table named `TREE` is read from `<root>/TREE.parquet`, or from every
//! `.parquet` file in `<root>/TREE/`. Lower-case names are accepted as well.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Instant;

use arrow::datatypes::{Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use itertools::Itertools;
use parquet::arrow::ProjectionMask;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use rayon::prelude::*;

use crate::config::DEFAULT_BATCH_SIZE;
use crate::error::{EstimationError, Result};
use crate::storage::{ScanRequest, TableSource, apply_request};
use crate::utils::{find_parquet_files, log_scan_complete, log_scan_start, validate_inventory_dir};

/// Tables stored as Parquet files under one directory
#[derive(Debug, Clone)]
pub struct ParquetStore {
    root: PathBuf,
    batch_size: usize,
}

impl ParquetStore {
    pub fn open(root: &Path) -> Result<Self> {
        validate_inventory_dir(root)?;
        Ok(Self {
            root: root.to_path_buf(),
            batch_size: DEFAULT_BATCH_SIZE,
        })
    }

    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub const fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Files holding a table, or `TableNotFound`
    pub fn table_files(&self, table: &str) -> Result<Vec<PathBuf>> {
        for name in [table.to_string(), table.to_ascii_lowercase()] {
            let file = self.root.join(format!("{name}.parquet"));
            if file.is_file() {
                return Ok(vec![file]);
            }
            let dir = self.root.join(&name);
            if dir.is_dir() {
                let files = find_parquet_files(&dir)?;
                if !files.is_empty() {
                    return Ok(files);
                }
            }
        }
        Err(EstimationError::TableNotFound(table.to_string()))
    }
}

/// Projection mask selecting the requested top-level columns a file has
pub fn projection_for(
    columns: Option<&[String]>,
    file_schema: &Schema,
    parquet_schema: &parquet::schema::types::SchemaDescriptor,
) -> Option<ProjectionMask> {
    let columns = columns?;
    let indices = columns
        .iter()
        .filter_map(|name| file_schema.index_of(name).ok())
        .collect_vec();
    Some(ProjectionMask::roots(parquet_schema, indices))
}

fn read_file(path: &Path, request: &ScanRequest, batch_size: usize) -> Result<Vec<RecordBatch>> {
    let file = File::open(path)?;
    let mut builder = ParquetRecordBatchReaderBuilder::try_new(file)?.with_batch_size(batch_size);

    // Key columns must be read even when not projected
    let mut needed = request.columns.clone();
    if let (Some(columns), Some(filter)) = (needed.as_mut(), &request.key_filter) {
        if !columns.contains(&filter.column) {
            columns.push(filter.column.clone());
        }
    }
    if let Some(mask) = projection_for(needed.as_deref(), builder.schema(), builder.parquet_schema())
    {
        builder = builder.with_projection(mask);
    }

    let mut out = Vec::new();
    for batch in builder.build()? {
        let selected = apply_request(request, &batch?)?;
        if selected.num_rows() > 0 {
            out.push(selected);
        }
    }
    Ok(out)
}

impl TableSource for ParquetStore {
    fn schema(&self, table: &str) -> Result<SchemaRef> {
        let files = self.table_files(table)?;
        let first = files
            .first()
            .ok_or_else(|| EstimationError::TableNotFound(table.to_string()))?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(File::open(first)?)?;
        Ok(builder.schema().clone())
    }

    fn scan(&self, request: &ScanRequest) -> Result<Vec<RecordBatch>> {
        let start = Instant::now();
        let files = self.table_files(&request.table)?;
        log_scan_start(&request.table, files.len(), &self.root);

        let per_file: Vec<Result<Vec<RecordBatch>>> = files
            .par_iter()
            .map(|path| read_file(path, request, self.batch_size))
            .collect();

        let mut batches = Vec::new();
        for result in per_file {
            batches.extend(result?);
        }

        log_scan_complete(&request.table, &batches, start.elapsed());
        Ok(batches)
    }
}
