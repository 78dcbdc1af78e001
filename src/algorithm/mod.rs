//! Estimation algorithms
//!
//! This module holds the numeric core shared by every estimator: grouping
//! plans, adjustment factor resolution, growth/removal/mortality component
//! classification, the two-stage aggregation and the stratified variance.

pub mod adjustment;
pub mod aggregation;
pub mod components;
pub mod grouping;
pub mod variance;

// Re-export commonly used items
pub use adjustment::{AdjustmentFactors, AdjustmentResolver, SizeFrame};
pub use aggregation::{
    DenominatorScope, GroupAccumulator, ItemContribution, NumeratorSource, ParcelAggregate,
    PopulationEstimate, StratumLayout, accumulate_groups, aggregate_parcels, combine_groups,
    combine_strata,
};
pub use components::{ComponentCategory, ComponentMeasure, ComponentTally, Contribution, classify};
pub use grouping::{GroupKey, GroupValue, GroupingPlan};
pub use variance::{
    StratumStatistics, finite_population_correction, ratio_variance, stratum_moments,
    total_variance,
};
