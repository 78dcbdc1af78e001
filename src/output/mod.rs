//! Estimation results
//!
//! One [`EstimateRow`] per output group plus the diagnostics collected along
//! the way. Results render as a text table, JSON or an Arrow record batch.

use std::fmt;
use std::sync::Arc;

use arrow::array::{ArrayRef, BooleanArray, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, FieldRef, Schema};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_arrow::schema::{SchemaLike, TracingOptions};

use crate::algorithm::aggregation::PopulationEstimate;
use crate::algorithm::grouping::GroupValue;
use crate::error::Result;
use crate::estimators::Quantity;
use crate::evaluation::Evaluation;

/// A statistical degeneracy that did not stop the estimate
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Degradation {
    /// Stratum with fewer than two plots; its variance is undefined
    InsufficientSample { stratum: String, sampled_units: usize },
    /// Component label outside the known set; the records were skipped
    UnrecognizedComponent { label: String, count: usize },
    /// Trees on plots without a macroplot breakpoint used the subplot factor
    MissingBreakpoint { items: usize },
    /// Component records with an unknown subplot type were skipped
    UnknownSubplotType { records: usize },
    /// Growth records on plots without a remeasurement period were skipped
    MissingRemeasurementPeriod { records: usize },
    /// Component records whose required measurement was null or unavailable were skipped
    MissingMeasurement { records: usize },
    /// Strata without an expansion factor were given zero weight
    MissingExpansion { strata: Vec<String> },
    /// Items whose condition was not found
    OrphanItems { count: usize },
    /// Assigned plots absent from the plot table
    MissingPlots { count: usize },
}

impl fmt::Display for Degradation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsufficientSample {
                stratum,
                sampled_units,
            } => write!(
                f,
                "stratum {stratum} has {sampled_units} plot(s); standard errors are undefined"
            ),
            Self::UnrecognizedComponent { label, count } => {
                write!(f, "{count} component record(s) labelled '{label}' skipped")
            }
            Self::MissingBreakpoint { items } => write!(
                f,
                "{items} tree(s) without a macroplot breakpoint used the subplot factor"
            ),
            Self::UnknownSubplotType { records } => {
                write!(f, "{records} component record(s) with unknown subplot type skipped")
            }
            Self::MissingRemeasurementPeriod { records } => {
                write!(f, "{records} growth record(s) without REMPER skipped")
            }
            Self::MissingMeasurement { records } => {
                write!(f, "{records} component record(s) without the needed measurement skipped")
            }
            Self::MissingExpansion { strata } => {
                write!(f, "strata without EXPNS weighted as zero: {}", strata.join(", "))
            }
            Self::OrphanItems { count } => write!(f, "{count} tree(s) without a condition"),
            Self::MissingPlots { count } => write!(f, "{count} assigned plot(s) not found"),
        }
    }
}

/// Warnings and degradations of one estimation call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Diagnostics {
    pub warnings: Vec<String>,
    pub degradations: Vec<Degradation>,
}

impl Diagnostics {
    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        if !self.warnings.contains(&message) {
            self.warnings.push(message);
        }
    }

    pub fn extend_warnings(&mut self, messages: impl IntoIterator<Item = String>) {
        for message in messages {
            self.warn(message);
        }
    }

    /// Record a degradation; zero counts are dropped
    pub fn degrade(&mut self, degradation: Degradation) {
        let empty = matches!(
            degradation,
            Degradation::MissingBreakpoint { items: 0 }
                | Degradation::UnknownSubplotType { records: 0 }
                | Degradation::MissingRemeasurementPeriod { records: 0 }
                | Degradation::MissingMeasurement { records: 0 }
                | Degradation::OrphanItems { count: 0 }
                | Degradation::MissingPlots { count: 0 }
        );
        if !empty {
            log::warn!("{degradation}");
            self.degradations.push(degradation);
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty() && self.degradations.is_empty()
    }
}

/// Standard error as a percentage of the estimate; NaN for zero or
/// non-finite estimates
#[must_use]
pub fn se_percent(estimate: f64, se: f64) -> f64 {
    if estimate == 0.0 || !estimate.is_finite() {
        f64::NAN
    } else {
        se / estimate.abs() * 100.0
    }
}

fn serialize_groups<S: Serializer>(
    groups: &[(String, GroupValue)],
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(groups.len()))?;
    for (name, value) in groups {
        map.serialize_entry(name, value)?;
    }
    map.end()
}

/// One output group
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EstimateRow {
    /// Grouping values in caller order
    #[serde(serialize_with = "serialize_groups")]
    pub groups: Vec<(String, GroupValue)>,
    /// Per-acre estimate (percent for area)
    pub estimate: f64,
    pub variance: f64,
    pub se: f64,
    pub se_percent: f64,
    /// Population total, when requested
    pub total: Option<f64>,
    pub total_variance: Option<f64>,
    pub total_se: Option<f64>,
    pub total_se_percent: Option<f64>,
    /// Expanded area (acres) the per-acre estimate is relative to
    pub area: f64,
    pub n_plots: usize,
    pub n_parcels: usize,
    pub n_items: usize,
}

impl EstimateRow {
    /// Build a row from a population estimate. `scale` converts the ratio to
    /// reporting units (100 for percentages).
    #[must_use]
    pub fn new(
        groups: Vec<(String, GroupValue)>,
        estimate: &PopulationEstimate,
        scale: f64,
        totals: bool,
    ) -> Self {
        let per_acre = estimate.ratio * scale;
        let variance = estimate.ratio_variance * scale * scale;
        let se = variance.sqrt();
        let total_se = estimate.total_variance.sqrt();
        Self {
            groups,
            estimate: per_acre,
            variance,
            se,
            se_percent: se_percent(per_acre, se),
            total: totals.then_some(estimate.numerator_total),
            total_variance: totals.then_some(estimate.total_variance),
            total_se: totals.then_some(total_se),
            total_se_percent: totals.then(|| se_percent(estimate.numerator_total, total_se)),
            area: estimate.denominator_total,
            n_plots: estimate.plots,
            n_parcels: estimate.parcels,
            n_items: estimate.items,
        }
    }
}

/// Statistic columns of a row, converted with serde_arrow
#[derive(Debug, Serialize, Deserialize)]
struct StatisticColumns {
    estimate: f64,
    variance: f64,
    se: f64,
    se_percent: f64,
    total: Option<f64>,
    total_variance: Option<f64>,
    total_se: Option<f64>,
    total_se_percent: Option<f64>,
    area: f64,
    n_plots: u64,
    n_parcels: u64,
    n_items: u64,
}

impl From<&EstimateRow> for StatisticColumns {
    fn from(row: &EstimateRow) -> Self {
        Self {
            estimate: row.estimate,
            variance: row.variance,
            se: row.se,
            se_percent: row.se_percent,
            total: row.total,
            total_variance: row.total_variance,
            total_se: row.total_se,
            total_se_percent: row.total_se_percent,
            area: row.area,
            n_plots: row.n_plots as u64,
            n_parcels: row.n_parcels as u64,
            n_items: row.n_items as u64,
        }
    }
}

/// Result of one estimation call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EstimationResult {
    pub quantity: Quantity,
    pub evaluation: Evaluation,
    pub group_columns: Vec<String>,
    pub rows: Vec<EstimateRow>,
    pub diagnostics: Diagnostics,
    pub computed_at: DateTime<Utc>,
}

impl EstimationResult {
    #[must_use]
    pub fn new(
        quantity: Quantity,
        evaluation: Evaluation,
        group_columns: Vec<String>,
        rows: Vec<EstimateRow>,
        diagnostics: Diagnostics,
    ) -> Self {
        Self {
            quantity,
            evaluation,
            group_columns,
            rows,
            diagnostics,
            computed_at: Utc::now(),
        }
    }

    /// The row of an ungrouped estimate
    #[must_use]
    pub fn single(&self) -> Option<&EstimateRow> {
        match self.rows.as_slice() {
            [row] => Some(row),
            _ => None,
        }
    }

    /// Row whose grouping values equal `values`, in caller order
    #[must_use]
    pub fn row_for(&self, values: &[GroupValue]) -> Option<&EstimateRow> {
        self.rows.iter().find(|row| {
            row.groups.len() == values.len()
                && row.groups.iter().zip(values).all(|((_, v), want)| v == want)
        })
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Rows as a record batch: one column per grouping column followed by
    /// the statistic columns
    pub fn to_record_batch(&self) -> Result<RecordBatch> {
        let mut fields: Vec<FieldRef> = Vec::new();
        let mut columns: Vec<ArrayRef> = Vec::new();

        for (index, name) in self.group_columns.iter().enumerate() {
            let values: Vec<Option<&GroupValue>> = self
                .rows
                .iter()
                .map(|row| row.groups.get(index).map(|(_, v)| v))
                .collect();
            let (data_type, array) = group_array(&values);
            fields.push(Arc::new(Field::new(name, data_type, true)));
            columns.push(array);
        }

        let statistics: Vec<StatisticColumns> = self.rows.iter().map(StatisticColumns::from).collect();
        let statistic_fields = Vec::<FieldRef>::from_type::<StatisticColumns>(
            TracingOptions::default().allow_null_fields(true),
        )?;
        let statistic_batch = serde_arrow::to_record_batch(&statistic_fields, &statistics)?;
        fields.extend(statistic_batch.schema().fields().iter().cloned());
        columns.extend(statistic_batch.columns().iter().cloned());

        Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?)
    }
}

/// Arrow array for one grouping column: integer and boolean columns keep
/// their type, anything mixed becomes text
fn group_array(values: &[Option<&GroupValue>]) -> (DataType, ArrayRef) {
    let non_null = || {
        values
            .iter()
            .flatten()
            .filter(|v| !matches!(v, GroupValue::Null))
    };
    if non_null().all(|v| matches!(v, GroupValue::Int(_))) {
        let array: Int64Array = values
            .iter()
            .map(|v| match v {
                Some(GroupValue::Int(i)) => Some(*i),
                _ => None,
            })
            .collect();
        return (DataType::Int64, Arc::new(array));
    }
    if non_null().all(|v| matches!(v, GroupValue::Bool(_))) {
        let array: BooleanArray = values
            .iter()
            .map(|v| match v {
                Some(GroupValue::Bool(b)) => Some(*b),
                _ => None,
            })
            .collect();
        return (DataType::Boolean, Arc::new(array));
    }
    let array: StringArray = values
        .iter()
        .map(|v| match v {
            None | Some(GroupValue::Null) => None,
            Some(other) => Some(other.to_string()),
        })
        .collect();
    (DataType::Utf8, Arc::new(array))
}

impl fmt::Display for EstimationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} ({})", self.quantity, self.quantity.units())?;
        writeln!(f, "Evaluation: {}", self.evaluation)?;
        writeln!(f)?;

        for name in &self.group_columns {
            write!(f, "{name:<12} ")?;
        }
        let has_totals = self.rows.iter().any(|r| r.total.is_some());
        write!(f, "{:>14} {:>12} {:>8}", "ESTIMATE", "SE", "SE%")?;
        if has_totals {
            write!(f, " {:>16} {:>8}", "TOTAL", "SE%")?;
        }
        writeln!(f, " {:>8}", "N_PLOTS")?;

        for row in &self.rows {
            for (_, value) in &row.groups {
                write!(f, "{:<12} ", value.to_string())?;
            }
            write!(f, "{:>14.4} {:>12.4} {:>8.2}", row.estimate, row.se, row.se_percent)?;
            if has_totals {
                write!(
                    f,
                    " {:>16.1} {:>8.2}",
                    row.total.unwrap_or(f64::NAN),
                    row.total_se_percent.unwrap_or(f64::NAN)
                )?;
            }
            writeln!(f, " {:>8}", row.n_plots)?;
        }

        if !self.diagnostics.is_empty() {
            writeln!(f)?;
            for warning in &self.diagnostics.warnings {
                writeln!(f, "warning: {warning}")?;
            }
            for degradation in &self.diagnostics.degradations {
                writeln!(f, "degraded: {degradation}")?;
            }
        }
        Ok(())
    }
}
