//! Locating inventory Parquet files and logging table scans

use std::path::{Path, PathBuf};
use std::time::Duration;

use arrow::record_batch::RecordBatch;

use itertools::Itertools;
use rayon::prelude::*;

use crate::error::{EstimationError, Result};

/// Check that an inventory directory exists
pub fn validate_inventory_dir(dir: &Path) -> Result<()> {
    if !dir.is_dir() {
        return Err(EstimationError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Inventory directory does not exist: {}", dir.display()),
        )));
    }
    Ok(())
}

/// Log the start of a table scan
pub fn log_scan_start(table: &str, files: usize, root: &Path) {
    log::debug!("Scanning {table} ({files} file(s)) under {}", root.display());
}

/// Log the rows a table scan kept after projection and key filtering
pub fn log_scan_complete(table: &str, batches: &[RecordBatch], elapsed: Duration) {
    let rows: usize = batches.iter().map(RecordBatch::num_rows).sum();
    log::debug!(
        "Scanned {table}: {rows} row(s) in {} batch(es) in {elapsed:?}",
        batches.len()
    );
}

/// Log an inventory table that could not be found
pub fn log_missing_table(table: &str, root: &Path) {
    log::warn!("Inventory table {table} not found under {}", root.display());
}

/// Find all Parquet files in a directory, sorted by file name so that row
/// order is reproducible between runs
pub fn find_parquet_files(dir: &Path) -> Result<Vec<PathBuf>> {
    validate_inventory_dir(dir)?;

    let parquet_files = std::fs::read_dir(dir)?
        .par_bridge()
        .filter_map(|entry_result| match entry_result {
            Ok(entry) => {
                let path = entry.path();
                if path.is_file() && path.extension().is_some_and(|ext| ext == "parquet") {
                    Some(Ok(path))
                } else {
                    None
                }
            }
            Err(e) => Some(Err(EstimationError::Io(e))),
        })
        .collect::<Result<Vec<_>>>()?
        .into_iter()
        .sorted()
        .collect_vec();

    if parquet_files.is_empty() {
        log::warn!("No Parquet files found in {}", dir.display());
    } else {
        log::debug!("Found {} parquet files in {}", parquet_files.len(), dir.display());
    }

    Ok(parquet_files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_only_parquet_files_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.parquet", "a.parquet", "notes.txt"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        let files = find_parquet_files(dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.parquet", "b.parquet"]);
    }

    #[test]
    fn missing_directory_is_io_error() {
        let err = find_parquet_files(Path::new("/definitely/not/here")).unwrap_err();
        assert!(matches!(err, EstimationError::Io(_)));
        assert!(err.to_string().contains("Inventory directory"));
    }
}
