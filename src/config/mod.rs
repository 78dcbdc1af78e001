//! Configuration for the estimation engine.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EstimationError, Result};

/// Default batch size for Parquet reading
pub const DEFAULT_BATCH_SIZE: usize = 16384;

/// Environment variable overriding [`EstimatorConfig::batch_size`]
pub const BATCH_SIZE_ENV: &str = "FIA_BATCH_SIZE";

/// Finite population correction applied to each stratum variance term
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinitePopulationCorrection {
    /// No correction (f_h = 1)
    #[default]
    None,
    /// f_h = 1 - 1/n_h
    SmallSample,
    /// f_h = 1 - n_h/N_h, applied only when the sampling fraction reaches the
    /// configured threshold; N_h is the stratum's phase-one point count
    SamplingFraction,
}

impl fmt::Display for FinitePopulationCorrection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::SmallSample => write!(f, "small_sample"),
            Self::SamplingFraction => write!(f, "sampling_fraction"),
        }
    }
}

/// What to do with a stratum holding fewer than two sampled plots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SingleUnitPolicy {
    /// The variance is undefined; standard errors become NaN
    #[default]
    Undefined,
    /// Drop the stratum's variance term, keeping its point contribution
    Ignore,
}

/// Configuration for the estimators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// Trees below this diameter (inches) were measured on the microplot
    pub micro_breakpoint_dia: f64,
    /// Finite population correction of the ratio (per-acre) variance
    pub ratio_fpc: FinitePopulationCorrection,
    /// Finite population correction of the total variance
    pub total_fpc: FinitePopulationCorrection,
    /// Minimum n_h/N_h for the sampling-fraction correction to apply
    pub fpc_threshold: f64,
    /// Handling of strata with a single sampled plot
    pub single_unit_policy: SingleUnitPolicy,
    /// Turn statistical degradations into errors
    pub strict: bool,
    /// Rows per record batch when reading Parquet
    pub batch_size: usize,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            micro_breakpoint_dia: 5.0,
            ratio_fpc: FinitePopulationCorrection::SmallSample,
            total_fpc: FinitePopulationCorrection::None,
            fpc_threshold: 0.05,
            single_unit_policy: SingleUnitPolicy::Undefined,
            strict: false,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl EstimatorConfig {
    /// Load a configuration from a JSON file; absent fields keep their defaults
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(batch_size) = batch_size_from_env() {
            self.batch_size = batch_size;
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.micro_breakpoint_dia.is_finite() && self.micro_breakpoint_dia > 0.0) {
            return Err(EstimationError::Config(format!(
                "micro_breakpoint_dia must be positive, got {}",
                self.micro_breakpoint_dia
            )));
        }
        if !(0.0..=1.0).contains(&self.fpc_threshold) {
            return Err(EstimationError::Config(format!(
                "fpc_threshold must lie in [0, 1], got {}",
                self.fpc_threshold
            )));
        }
        if self.batch_size == 0 {
            return Err(EstimationError::Config("batch_size must be positive".to_string()));
        }
        Ok(())
    }
}

impl fmt::Display for EstimatorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Estimator Configuration:")?;
        writeln!(f, "  Micro Breakpoint DIA: {}", self.micro_breakpoint_dia)?;
        writeln!(f, "  Ratio FPC: {}", self.ratio_fpc)?;
        writeln!(f, "  Total FPC: {}", self.total_fpc)?;
        if [self.ratio_fpc, self.total_fpc].contains(&FinitePopulationCorrection::SamplingFraction) {
            writeln!(f, "  FPC Threshold: {}", self.fpc_threshold)?;
        }
        writeln!(f, "  Single Unit Policy: {:?}", self.single_unit_policy)?;
        writeln!(f, "  Strict: {}", self.strict)?;
        writeln!(f, "  Batch Size: {}", self.batch_size)
    }
}

/// Batch size from the environment, if set and valid
#[must_use]
pub fn batch_size_from_env() -> Option<usize> {
    std::env::var(BATCH_SIZE_ENV)
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .filter(|size| *size > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_json_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"total_fpc": "sampling_fraction", "strict": true}}"#).unwrap();
        let config = EstimatorConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.total_fpc, FinitePopulationCorrection::SamplingFraction);
        assert_eq!(config.ratio_fpc, FinitePopulationCorrection::SmallSample);
        assert!(config.strict);
        assert!((config.micro_breakpoint_dia - 5.0).abs() < f64::EPSILON);
        assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);
    }

    #[test]
    fn invalid_threshold_rejected() {
        let config = EstimatorConfig {
            fpc_threshold: 1.5,
            ..EstimatorConfig::default()
        };
        assert!(matches!(config.validate(), Err(EstimationError::Config(_))));
    }

    #[test]
    fn display_lists_settings() {
        let text = EstimatorConfig::default().to_string();
        assert!(text.contains("Micro Breakpoint DIA: 5"));
        assert!(text.contains("Ratio FPC: small_sample"));
        assert!(text.contains("Total FPC: none"));
        assert!(!text.contains("FPC Threshold"));
    }
}
