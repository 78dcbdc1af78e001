//! Tree density: trees per acre and basal area per acre

use crate::cache::TableCache;
use crate::error::Result;
use crate::estimators::{BASAL_AREA_FACTOR, DensityMeasure, EstimationOptions, Estimator, Quantity};
use crate::output::EstimationResult;

impl Estimator<'_> {
    pub fn tpa(
        &self,
        options: &EstimationOptions,
        measure: DensityMeasure,
        cache: &mut TableCache,
    ) -> Result<EstimationResult> {
        self.estimate_trees(
            Quantity::Density(measure),
            options,
            Vec::new(),
            |_, dia| match measure {
                DensityMeasure::TreesPerAcre => 1.0,
                DensityMeasure::BasalArea => dia.map_or(0.0, |d| BASAL_AREA_FACTOR * d * d),
            },
            cache,
        )
    }
}
