//! Growth, mortality and removals
//!
//! These estimators read the component records of remeasured trees instead
//! of current tree rows. The tree type is carried by the component columns
//! (all live vs growing stock) and is not applied as a TREE predicate, since
//! a tree that died or was cut is no longer live at the second measurement.

use serde::{Deserialize, Serialize};

use crate::algorithm::adjustment::AdjustmentResolver;
use crate::algorithm::aggregation::{DenominatorScope, ItemContribution, NumeratorSource};
use crate::algorithm::components::{ComponentMeasure, ComponentTally, Contribution, classify, contribution};
use crate::assembly::{ItemRequest, remper_of};
use crate::cache::TableCache;
use crate::error::Result;
use crate::estimators::{EstimationOptions, Estimator, POUNDS_PER_TON, Quantity, Reduction};
use crate::output::{Degradation, Diagnostics, EstimationResult};
use crate::schema::grm_component::GrmColumns;
use crate::schema::grm_measure;

/// What a temporal estimate counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemporalMeasure {
    /// Net cubic-foot volume
    #[default]
    Volume,
    /// Aboveground biomass, in tons
    Biomass,
    /// Number of trees
    Trees,
}

impl TemporalMeasure {
    /// Measurement column read at each point; `None` counts trees
    #[must_use]
    pub const fn column(self) -> Option<&'static str> {
        match self {
            Self::Volume => Some(grm_measure::VOLCFNET),
            Self::Biomass => Some(grm_measure::DRYBIO_AG),
            Self::Trees => None,
        }
    }

    const fn scale(self) -> f64 {
        match self {
            Self::Biomass => 1.0 / POUNDS_PER_TON,
            Self::Volume | Self::Trees => 1.0,
        }
    }

    #[must_use]
    pub const fn annual_units(self) -> &'static str {
        match self {
            Self::Volume => "cubic feet per acre per year",
            Self::Biomass => "tons per acre per year",
            Self::Trees => "trees per acre per year",
        }
    }
}

impl Estimator<'_> {
    /// Net annual growth
    pub fn growth(
        &self,
        options: &EstimationOptions,
        measure: TemporalMeasure,
        cache: &mut TableCache,
    ) -> Result<EstimationResult> {
        self.estimate_components(Quantity::Growth(measure), ComponentMeasure::Growth, measure, options, cache)
    }

    /// Annual mortality
    pub fn mortality(
        &self,
        options: &EstimationOptions,
        measure: TemporalMeasure,
        cache: &mut TableCache,
    ) -> Result<EstimationResult> {
        self.estimate_components(
            Quantity::Mortality(measure),
            ComponentMeasure::Mortality,
            measure,
            options,
            cache,
        )
    }

    /// Annual removals
    pub fn removals(
        &self,
        options: &EstimationOptions,
        measure: TemporalMeasure,
        cache: &mut TableCache,
    ) -> Result<EstimationResult> {
        self.estimate_components(
            Quantity::Removals(measure),
            ComponentMeasure::Removals,
            measure,
            options,
            cache,
        )
    }

    fn estimate_components(
        &self,
        quantity: Quantity,
        component_measure: ComponentMeasure,
        measure: TemporalMeasure,
        options: &EstimationOptions,
        cache: &mut TableCache,
    ) -> Result<EstimationResult> {
        let prepared = self.prepare(options, quantity, true)?;
        let columns = GrmColumns::new(options.tree_type.grm_basis(), options.land_type.grm_basis());
        let data = self.assemble(
            &prepared,
            options,
            None,
            ItemRequest::Components {
                columns,
                measure: measure.column().map(ToString::to_string),
            },
            cache,
        )?;

        let mut resolver =
            AdjustmentResolver::new(&prepared.resolved.design, self.config.micro_breakpoint_dia);
        let mut tally = ComponentTally::default();
        let mut contributions = Vec::with_capacity(data.components.len());

        for record in &data.components {
            let Some(label) = record.label.as_deref() else {
                continue;
            };
            let Some(category) = classify(label) else {
                tally.record_unrecognized(label);
                continue;
            };
            let plot = &data.plots[data.parcels[record.parcel].plot];
            let Some(multiplier) = resolver.component_multiplier(&plot.stratum_cn, record.subplot_type)
            else {
                continue;
            };
            match contribution(component_measure, category, record, remper_of(&data, record.parcel)) {
                Contribution::Value(value) => contributions.push(ItemContribution {
                    parcel: record.parcel,
                    key: record.key.clone(),
                    value: value * multiplier * measure.scale(),
                }),
                Contribution::NotApplicable => {}
                Contribution::MissingRemper => tally.missing_remper += 1,
                Contribution::MissingMeasurement => tally.missing_measurement += 1,
            }
        }
        tally.check_strict(self.config.strict)?;

        let mut diagnostics = Diagnostics::default();
        for (label, count) in tally.unrecognized_sorted() {
            diagnostics.degrade(Degradation::UnrecognizedComponent { label, count });
        }
        diagnostics.degrade(Degradation::MissingRemeasurementPeriod {
            records: tally.missing_remper,
        });
        diagnostics.degrade(Degradation::MissingMeasurement {
            records: tally.missing_measurement,
        });

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
            diagnostics,
        )
    }
}
