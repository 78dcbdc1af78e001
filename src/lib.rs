//! Design-based population estimation for forest inventory samples.
//!
//! Inventory tables are read through a [`storage::TableSource`] (Parquet
//! files or in-memory Arrow batches). An [`Estimator`] resolves the
//! evaluation and its stratified sample design, assembles plots, conditions
//! and trees under the caller's domains, and combines per-plot values into
//! post-stratified ratio-of-means estimates with their sampling variance.

pub mod algorithm;
pub mod assembly;
pub mod async_io;
pub mod cache;
pub mod config;
pub mod error;
pub mod estimators;
pub mod evaluation;
pub mod filter;
pub mod output;
pub mod schema;
pub mod storage;
pub mod synthetic;
pub mod utils;

// Core types
pub use config::{EstimatorConfig, FinitePopulationCorrection, SingleUnitPolicy};
pub use error::{EstimationError, Result};
pub use estimators::{
    BiomassComponent, DensityMeasure, EstimationOptions, Estimator, Quantity, TemporalMeasure,
    VolumeType,
};
pub use output::{Degradation, Diagnostics, EstimateRow, EstimationResult};

// Evaluations and domains
pub use evaluation::{EvalType, Evaluation, EvaluationRequest, EvaluationSelector, SampleDesign};
pub use filter::{LandType, TreeType};

// Storage
pub use cache::TableCache;
pub use storage::{MemoryStore, ParquetStore, ScanRequest, TableSource};

pub use async_io::prefetch_tables;
pub use synthetic::{InventoryBuilder, RandomInventory};

// Arrow types
pub use arrow::record_batch::RecordBatch;
