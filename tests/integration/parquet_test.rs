use approx::assert_relative_eq;
use fia_estimator::schema::tables;
use fia_estimator::synthetic::write_parquet;
use fia_estimator::{
    EstimationError, EstimationOptions, Estimator, ParquetStore, RandomInventory, TableCache,
    TableSource, TemporalMeasure, VolumeType, prefetch_tables,
};

use crate::utils::config;

fn inventory_dir() -> (tempfile::TempDir, fia_estimator::MemoryStore) {
    let dir = tempfile::tempdir().unwrap();
    let memory = RandomInventory::default().build().unwrap();
    write_parquet(&memory, dir.path()).unwrap();
    (dir, memory)
}

#[test]
fn parquet_and_memory_sources_agree() {
    let (dir, memory) = inventory_dir();
    let parquet = ParquetStore::open(dir.path()).unwrap().with_batch_size(64);
    let config = config();
    let options = EstimationOptions::new().group_by(["SPCD"]);

    let from_disk = Estimator::new(&parquet, &config)
        .volume(&options, VolumeType::Net, &mut TableCache::new())
        .unwrap();
    let from_memory = Estimator::new(&memory, &config)
        .volume(&options, VolumeType::Net, &mut TableCache::new())
        .unwrap();

    assert_eq!(from_disk.rows.len(), from_memory.rows.len());
    for (a, b) in from_disk.rows.iter().zip(&from_memory.rows) {
        assert_eq!(a.groups, b.groups);
        assert_relative_eq!(a.estimate, b.estimate, epsilon = 1e-9);
        assert_relative_eq!(a.se, b.se, epsilon = 1e-9);
    }
}

#[test]
fn missing_table_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let store = ParquetStore::open(dir.path()).unwrap();
    assert!(!store.has_table(tables::PLOT));
    let err = store.schema(tables::PLOT).unwrap_err();
    assert!(matches!(err, EstimationError::TableNotFound(ref t) if t == tables::PLOT));
}

#[tokio::test]
async fn prefetched_store_serves_temporal_estimates() {
    let (dir, memory) = inventory_dir();
    let parquet = ParquetStore::open(dir.path()).unwrap();
    let prefetched = prefetch_tables(&parquet, &tables::ALL).await.unwrap();
    assert_eq!(prefetched.num_rows(tables::TREE), memory.num_rows(tables::TREE));

    let config = config();
    let options = EstimationOptions::new();
    let a = Estimator::new(&prefetched, &config)
        .removals(&options, TemporalMeasure::Volume, &mut TableCache::new())
        .unwrap();
    let b = Estimator::new(&memory, &config)
        .removals(&options, TemporalMeasure::Volume, &mut TableCache::new())
        .unwrap();
    assert_relative_eq!(
        a.single().unwrap().estimate,
        b.single().unwrap().estimate,
        epsilon = 1e-9
    );
}
