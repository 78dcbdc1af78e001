//! Caller-facing estimators
//!
//! Every estimator follows the same pipeline: resolve the evaluation, compile
//! the domains and grouping against the table schemas, assemble the joined
//! records, turn items into adjusted per-acre contributions and run the
//! two-stage aggregation. The per-quantity modules only supply the
//! contributions and the reporting scale.

pub mod area;
pub mod biomass;
pub mod temporal;
pub mod tpa;
pub mod volume;

use std::fmt;

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::algorithm::adjustment::AdjustmentResolver;
use crate::algorithm::aggregation::{
    DenominatorScope, ItemContribution, NumeratorSource, StratumLayout, accumulate_groups,
    aggregate_parcels, combine_groups,
};
use crate::algorithm::grouping::GroupingPlan;
use crate::assembly::{AssembledData, AssemblyRequest, HierarchicalAssembler, ItemRequest};
use crate::cache::TableCache;
use crate::config::EstimatorConfig;
use crate::error::Result;
use crate::evaluation::{EvalType, Evaluation, EvaluationRequest, EvaluationSelector, ResolvedEvaluation};
use crate::filter::{DomainFilters, LandType, LevelSchemas, TreeType};
use crate::output::{Degradation, Diagnostics, EstimateRow, EstimationResult};
use crate::schema::{tables, tree};
use crate::storage::TableSource;

pub use temporal::TemporalMeasure;

/// Pounds per short ton
pub const POUNDS_PER_TON: f64 = 2000.0;

/// Square feet of basal area per square inch of diameter: pi / (4 * 144)
pub const BASAL_AREA_FACTOR: f64 = 0.005_454_154;

/// Volume column selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeType {
    /// Net cubic-foot volume
    #[default]
    Net,
    /// Gross cubic-foot volume
    Gross,
    /// Sound cubic-foot volume
    Sound,
    /// Net board-foot sawlog volume
    Sawlog,
}

impl VolumeType {
    #[must_use]
    pub const fn column(self) -> &'static str {
        match self {
            Self::Net => tree::VOLCFNET,
            Self::Gross => tree::VOLCFGRS,
            Self::Sound => tree::VOLCFSND,
            Self::Sawlog => tree::VOLCSNET,
        }
    }
}

/// Biomass component selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BiomassComponent {
    #[default]
    Aboveground,
    Belowground,
    Bole,
    /// Aboveground plus belowground
    Total,
}

impl BiomassComponent {
    /// Dry-weight columns (pounds) summed for this component
    #[must_use]
    pub const fn columns(self) -> &'static [&'static str] {
        match self {
            Self::Aboveground => &[tree::DRYBIO_AG],
            Self::Belowground => &[tree::DRYBIO_BG],
            Self::Bole => &[tree::DRYBIO_BOLE],
            Self::Total => &[tree::DRYBIO_AG, tree::DRYBIO_BG],
        }
    }
}

/// Density measure selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DensityMeasure {
    #[default]
    TreesPerAcre,
    BasalArea,
}

/// What an estimate measures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "quantity", content = "selector", rename_all = "snake_case")]
pub enum Quantity {
    Area,
    Volume(VolumeType),
    Biomass(BiomassComponent),
    Density(DensityMeasure),
    Growth(TemporalMeasure),
    Mortality(TemporalMeasure),
    Removals(TemporalMeasure),
}

impl Quantity {
    /// Evaluation type whose expansion factors suit this quantity
    #[must_use]
    pub const fn eval_type(self) -> EvalType {
        match self {
            Self::Area => EvalType::Current,
            Self::Volume(_) | Self::Biomass(_) | Self::Density(_) => EvalType::Volume,
            Self::Growth(_) => EvalType::Growth,
            Self::Mortality(_) => EvalType::Mortality,
            Self::Removals(_) => EvalType::Removals,
        }
    }

    #[must_use]
    pub const fn units(self) -> &'static str {
        match self {
            Self::Area => "percent of land area",
            Self::Volume(VolumeType::Sawlog) => "board feet per acre",
            Self::Volume(_) => "cubic feet per acre",
            Self::Biomass(_) => "tons per acre",
            Self::Density(DensityMeasure::TreesPerAcre) => "trees per acre",
            Self::Density(DensityMeasure::BasalArea) => "square feet per acre",
            Self::Growth(m) | Self::Mortality(m) | Self::Removals(m) => m.annual_units(),
        }
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Area => write!(f, "Area"),
            Self::Volume(t) => write!(f, "Volume ({t:?})"),
            Self::Biomass(c) => write!(f, "Biomass ({c:?})"),
            Self::Density(DensityMeasure::TreesPerAcre) => write!(f, "Trees per acre"),
            Self::Density(DensityMeasure::BasalArea) => write!(f, "Basal area"),
            Self::Growth(m) => write!(f, "Net growth ({m:?})"),
            Self::Mortality(m) => write!(f, "Mortality ({m:?})"),
            Self::Removals(m) => write!(f, "Removals ({m:?})"),
        }
    }
}

/// Options shared by every estimator
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EstimationOptions {
    /// Explicit evaluation; otherwise the most recent of the right type
    pub evalid: Option<i64>,
    /// State scope for automatic selection
    pub states: Vec<i64>,
    /// Grouping columns, resolved to the coarsest level holding each
    pub grouping: Vec<String>,
    pub plot_domain: Option<String>,
    pub area_domain: Option<String>,
    pub tree_domain: Option<String>,
    pub land_type: LandType,
    pub tree_type: TreeType,
    /// Report population totals alongside per-acre values
    pub totals: bool,
    /// Restrict the design to these plots
    pub plot_ids: Option<FxHashSet<String>>,
}

impl EstimationOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_evalid(mut self, evalid: i64) -> Self {
        self.evalid = Some(evalid);
        self
    }

    #[must_use]
    pub fn with_states(mut self, states: impl IntoIterator<Item = i64>) -> Self {
        self.states = states.into_iter().collect();
        self
    }

    #[must_use]
    pub fn group_by<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.grouping = columns.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn plot_domain(mut self, expression: impl Into<String>) -> Self {
        self.plot_domain = Some(expression.into());
        self
    }

    #[must_use]
    pub fn area_domain(mut self, expression: impl Into<String>) -> Self {
        self.area_domain = Some(expression.into());
        self
    }

    #[must_use]
    pub fn tree_domain(mut self, expression: impl Into<String>) -> Self {
        self.tree_domain = Some(expression.into());
        self
    }

    #[must_use]
    pub const fn land_type(mut self, land_type: LandType) -> Self {
        self.land_type = land_type;
        self
    }

    #[must_use]
    pub const fn tree_type(mut self, tree_type: TreeType) -> Self {
        self.tree_type = tree_type;
        self
    }

    #[must_use]
    pub const fn with_totals(mut self, totals: bool) -> Self {
        self.totals = totals;
        self
    }

    #[must_use]
    pub fn with_plot_ids(mut self, plot_ids: impl IntoIterator<Item = String>) -> Self {
        self.plot_ids = Some(plot_ids.into_iter().collect());
        self
    }
}

/// Evaluation, domains and grouping of one call, checked against the schemas
struct Prepared {
    resolved: ResolvedEvaluation,
    domains: DomainFilters,
    grouping: GroupingPlan,
}

/// How the assembled records become an estimate
struct Reduction {
    source: NumeratorSource,
    scope: DenominatorScope,
    /// Multiplier from the ratio to reporting units
    scale: f64,
}

/// Design-based estimator over a table source
#[derive(Debug, Clone, Copy)]
pub struct Estimator<'a> {
    source: &'a dyn TableSource,
    config: &'a EstimatorConfig,
}

impl<'a> Estimator<'a> {
    #[must_use]
    pub const fn new(source: &'a dyn TableSource, config: &'a EstimatorConfig) -> Self {
        Self { source, config }
    }

    #[must_use]
    pub const fn config(&self) -> &EstimatorConfig {
        self.config
    }

    /// Evaluations in the source catalog
    pub fn evaluations(&self) -> Result<Vec<Evaluation>> {
        EvaluationSelector::new(self.source).catalog()
    }

    fn prepare(&self, options: &EstimationOptions, quantity: Quantity, reads_trees: bool) -> Result<Prepared> {
        log::info!("Estimating {quantity}");
        let request = EvaluationRequest {
            eval_type: quantity.eval_type(),
            evalid: options.evalid,
            states: options.states.clone(),
            plot_ids: options.plot_ids.clone(),
        };
        let resolved = EvaluationSelector::new(self.source).resolve(&request)?;

        let schemas = LevelSchemas {
            plot: self.source.schema(tables::PLOT)?,
            condition: self.source.schema(tables::COND)?,
            item: if reads_trees {
                Some(self.source.schema(tables::TREE)?)
            } else {
                None
            },
        };
        let domains = DomainFilters::compile(
            options.plot_domain.as_deref(),
            options.area_domain.as_deref(),
            options.tree_domain.as_deref(),
            &schemas,
        )?;
        let grouping = GroupingPlan::resolve(
            &options.grouping,
            &schemas.plot,
            &schemas.condition,
            schemas.item.as_deref(),
        )?;

        Ok(Prepared {
            resolved,
            domains,
            grouping,
        })
    }

    fn assemble(
        &self,
        prepared: &Prepared,
        options: &EstimationOptions,
        tree_type: Option<TreeType>,
        items: ItemRequest,
        cache: &mut TableCache,
    ) -> Result<AssembledData> {
        let evalid = prepared.resolved.evaluation.evalid;
        let mut assembler =
            HierarchicalAssembler::new(self.source, cache, evalid, &prepared.resolved.design);
        assembler.assemble(&AssemblyRequest {
            grouping: &prepared.grouping,
            domains: &prepared.domains,
            land_type: options.land_type,
            tree_type,
            items,
        })
    }

    /// Run the two-stage aggregation and format the result
    #[allow(clippy::too_many_arguments)]
    fn reduce(
        &self,
        quantity: Quantity,
        prepared: Prepared,
        options: &EstimationOptions,
        data: &AssembledData,
        resolver: &AdjustmentResolver,
        contributions: &[ItemContribution],
        reduction: &Reduction,
        mut diagnostics: Diagnostics,
    ) -> Result<EstimationResult> {
        let design = &prepared.resolved.design;
        let aggregates = aggregate_parcels(data, resolver, reduction.source, contributions);
        let groups = accumulate_groups(
            &aggregates,
            reduction.scope,
            !prepared.grouping.has_item_keys(),
        );
        let layout = StratumLayout::new(design, &data.plots);
        let estimates = combine_groups(&layout, &groups, self.config)?;

        let rows = groups
            .iter()
            .zip(&estimates)
            .map(|(group, estimate)| {
                EstimateRow::new(
                    prepared.grouping.merge(&group.parcel_key, &group.item_key),
                    estimate,
                    reduction.scale,
                    options.totals,
                )
            })
            .collect();

        diagnostics.extend_warnings(prepared.resolved.warnings.iter().cloned());
        diagnostics.extend_warnings(data.warnings.iter().cloned());
        diagnostics.extend_warnings(resolver.warnings.iter().cloned());
        for (stratum, sampled_units) in layout.insufficient_strata() {
            diagnostics.degrade(Degradation::InsufficientSample {
                stratum,
                sampled_units,
            });
        }
        diagnostics.degrade(Degradation::MissingBreakpoint {
            items: resolver.missing_breakpoint,
        });
        diagnostics.degrade(Degradation::UnknownSubplotType {
            records: resolver.unknown_frames,
        });
        let unweighted = design.strata_without_expansion();
        if !unweighted.is_empty() {
            diagnostics.degrade(Degradation::MissingExpansion { strata: unweighted });
        }
        diagnostics.degrade(Degradation::OrphanItems {
            count: data.orphan_items,
        });
        diagnostics.degrade(Degradation::MissingPlots {
            count: data.missing_plots,
        });

        log::info!(
            "{quantity}: {} group(s) from {} plots in evaluation {}",
            groups.len(),
            data.plots.len(),
            prepared.resolved.evaluation.evalid
        );
        Ok(EstimationResult::new(
            quantity,
            prepared.resolved.evaluation,
            prepared.grouping.names(),
            rows,
            diagnostics,
        ))
    }

    /// Shared path of the tree-based estimators: `value` maps a tree's
    /// requested measures and diameter to its per-tree value
    fn estimate_trees(
        &self,
        quantity: Quantity,
        options: &EstimationOptions,
        measures: Vec<String>,
        value: impl Fn(&[Option<f64>], Option<f64>) -> f64,
        cache: &mut TableCache,
    ) -> Result<EstimationResult> {
        let prepared = self.prepare(options, quantity, true)?;
        let data = self.assemble(
            &prepared,
            options,
            Some(options.tree_type),
            ItemRequest::Trees { measures },
            cache,
        )?;

        let mut resolver =
            AdjustmentResolver::new(&prepared.resolved.design, self.config.micro_breakpoint_dia);
        let contributions: Vec<ItemContribution> = data
            .trees
            .iter()
            .map(|tree| {
                let plot = &data.plots[data.parcels[tree.parcel].plot];
                let multiplier = resolver.tree_multiplier(
                    &plot.stratum_cn,
                    tree.dia,
                    plot.macro_breakpoint_dia,
                );
                ItemContribution {
                    parcel: tree.parcel,
                    key: tree.key.clone(),
                    value: value(&tree.measures, tree.dia) * tree.tpa_unadj.unwrap_or(0.0) * multiplier,
                }
            })
            .collect();

        self.reduce(
            quantity,
            prepared,
            options,
            &data,
            &resolver,
            &contributions,
            &Reduction {
                source: NumeratorSource::Items,
                scope: DenominatorScope::ParcelGroup,
                scale: 1.0,
            },
            Diagnostics::default(),
        )
    }
}
