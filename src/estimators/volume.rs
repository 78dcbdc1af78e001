//! Volume per acre

use crate::cache::TableCache;
use crate::error::Result;
use crate::estimators::{EstimationOptions, Estimator, Quantity, VolumeType};
use crate::output::EstimationResult;

impl Estimator<'_> {
    /// Tree volume per acre of the selected type; trees without a recorded
    /// volume contribute zero
    pub fn volume(
        &self,
        options: &EstimationOptions,
        volume_type: VolumeType,
        cache: &mut TableCache,
    ) -> Result<EstimationResult> {
        self.estimate_trees(
            Quantity::Volume(volume_type),
            options,
            vec![volume_type.column().to_string()],
            |measures, _| measures.first().copied().flatten().unwrap_or(0.0),
            cache,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EstimatorConfig;
    use crate::synthetic::InventoryBuilder;
    use approx::assert_relative_eq;

    #[test]
    fn macroplot_trees_use_macro_factor() {
        let mut builder = InventoryBuilder::new();
        builder
            .evaluation(101, "E1", 1, 2015, 2019, &["EXPVOL"])
            .stratum_with_factors("S1", 101, 1000.0, 10.0, 1.0, 0.5)
            .plot("P1", "S1", 101)
            .plot("P2", "S1", 101)
            .plot_breakpoint("P1", 20.0)
            .plot_breakpoint("P2", 20.0)
            .condition("P1", 1, 1.0, 1)
            .condition("P2", 1, 1.0, 1)
            .tree("T1", "P1", 1, 30.0, 1.0, 100.0)
            .tree("T2", "P2", 1, 10.0, 1.0, 100.0)
            .tree("T3", "P2", 1, 3.0, 1.0, 1.0);
        let store = builder.build().unwrap();

        let config = EstimatorConfig::default();
        let result = Estimator::new(&store, &config)
            .volume(&EstimationOptions::new(), VolumeType::Net, &mut TableCache::new())
            .unwrap();
        // (100 * 0.5 + 100 * 1.0 + 1 * 10.0) / 2 plots of unit area
        assert_relative_eq!(result.single().unwrap().estimate, 80.0);
        assert!(result.diagnostics.degradations.is_empty());
    }
}
