//! Growth, removal and mortality component classification
//!
//! Remeasured trees carry a component label describing what happened to them
//! between the two measurements. Each estimator reads a different rate column
//! and a different measurement point depending on that label.

use std::fmt;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::assembly::ComponentRecord;
use crate::error::{EstimationError, Result};

/// Component of change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComponentCategory {
    Survivor,
    Ingrowth,
    CutHarvest,
    CutDiversion,
    Mortality1,
    Mortality2,
    Reclassified,
}

impl ComponentCategory {
    #[must_use]
    pub const fn is_cut(self) -> bool {
        matches!(self, Self::CutHarvest | Self::CutDiversion)
    }

    #[must_use]
    pub const fn is_mortality(self) -> bool {
        matches!(self, Self::Mortality1 | Self::Mortality2)
    }
}

impl fmt::Display for ComponentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Survivor => "survivor",
            Self::Ingrowth => "ingrowth",
            Self::CutHarvest => "cut",
            Self::CutDiversion => "diversion",
            Self::Mortality1 => "mortality1",
            Self::Mortality2 => "mortality2",
            Self::Reclassified => "reversion",
        };
        f.write_str(name)
    }
}

/// Map a component label to its category
#[must_use]
pub fn classify(label: &str) -> Option<ComponentCategory> {
    match label.trim().to_ascii_uppercase().as_str() {
        "SURVIVOR" => Some(ComponentCategory::Survivor),
        "INGROWTH" => Some(ComponentCategory::Ingrowth),
        "CUT1" | "CUT2" => Some(ComponentCategory::CutHarvest),
        "DIVERSION1" | "DIVERSION2" => Some(ComponentCategory::CutDiversion),
        "MORTALITY1" => Some(ComponentCategory::Mortality1),
        "MORTALITY2" => Some(ComponentCategory::Mortality2),
        "REVERSION1" | "REVERSION2" => Some(ComponentCategory::Reclassified),
        _ => None,
    }
}

/// Temporal quantity being estimated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentMeasure {
    /// Net annual growth
    Growth,
    /// Annual mortality
    Mortality,
    /// Annual removals
    Removals,
}

/// Outcome of valuing one component record
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Contribution {
    /// Value per acre before the adjustment multiplier (measurement × rate)
    Value(f64),
    /// The category does not take part in this measure
    NotApplicable,
    /// Growth record on a plot without a remeasurement period
    MissingRemper,
    /// A measurement the category is valued at is null or was not read
    MissingMeasurement,
}

/// Value of a component record for a measure
#[must_use]
pub fn contribution(
    measure: ComponentMeasure,
    category: ComponentCategory,
    record: &ComponentRecord,
    remper: Option<f64>,
) -> Contribution {
    // Cut and mortality trees are valued at the midpoint, falling back to
    // the previous measurement; never at the end.
    let removed_value = record.midpoint.or(record.begin);

    match measure {
        ComponentMeasure::Mortality => {
            if !category.is_mortality() {
                return Contribution::NotApplicable;
            }
            match removed_value {
                Some(value) => Contribution::Value(value * record.tpa_mort.unwrap_or(0.0)),
                None => Contribution::MissingMeasurement,
            }
        }
        ComponentMeasure::Removals => {
            if !category.is_cut() {
                return Contribution::NotApplicable;
            }
            match removed_value {
                Some(value) => Contribution::Value(value * record.tpa_remv.unwrap_or(0.0)),
                None => Contribution::MissingMeasurement,
            }
        }
        ComponentMeasure::Growth => {
            let Some(period) = remper.filter(|p| *p > 0.0) else {
                return Contribution::MissingRemper;
            };
            let change = match category {
                ComponentCategory::Survivor => record.end.zip(record.begin).map(|(e, b)| e - b),
                ComponentCategory::Ingrowth | ComponentCategory::Reclassified => record.end,
                _ => record.midpoint.zip(record.begin).map(|(m, b)| m - b),
            };
            match change {
                Some(change) => Contribution::Value(change / period * record.tpa_grow.unwrap_or(0.0)),
                None => Contribution::MissingMeasurement,
            }
        }
    }
}

/// Records skipped while classifying, reported in the diagnostics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComponentTally {
    /// Unrecognized label -> record count
    pub unrecognized: FxHashMap<String, usize>,
    pub missing_remper: usize,
    pub missing_measurement: usize,
}

impl ComponentTally {
    pub fn record_unrecognized(&mut self, label: &str) {
        *self.unrecognized.entry(label.to_string()).or_default() += 1;
    }

    /// Unrecognized labels sorted by name
    #[must_use]
    pub fn unrecognized_sorted(&self) -> Vec<(String, usize)> {
        let mut labels: Vec<_> = self
            .unrecognized
            .iter()
            .map(|(label, count)| (label.clone(), *count))
            .collect();
        labels.sort();
        labels
    }

    /// In strict mode, the first unrecognized label becomes an error
    pub fn check_strict(&self, strict: bool) -> Result<()> {
        if !strict {
            return Ok(());
        }
        match self.unrecognized_sorted().into_iter().next() {
            Some((label, count)) => Err(EstimationError::UnrecognizedComponent { label, count }),
            None => Ok(()),
        }
    }
}
