//! Biomass per acre, reported in short tons

use crate::cache::TableCache;
use crate::error::Result;
use crate::estimators::{BiomassComponent, EstimationOptions, Estimator, POUNDS_PER_TON, Quantity};
use crate::output::EstimationResult;

impl Estimator<'_> {
    pub fn biomass(
        &self,
        options: &EstimationOptions,
        component: BiomassComponent,
        cache: &mut TableCache,
    ) -> Result<EstimationResult> {
        let columns = component.columns().iter().map(ToString::to_string).collect();
        self.estimate_trees(
            Quantity::Biomass(component),
            options,
            columns,
            |measures, _| measures.iter().flatten().sum::<f64>() / POUNDS_PER_TON,
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
    fn total_is_above_plus_below_ground_in_tons() {
        let mut builder = InventoryBuilder::new();
        builder
            .evaluation(101, "E1", 1, 2015, 2019, &["EXPVOL"])
            .stratum("S1", 101, 1000.0)
            .plot("P1", "S1", 101)
            .plot("P2", "S1", 101)
            .condition("P1", 1, 1.0, 1)
            .condition("P2", 1, 1.0, 1)
            .tree_biomass("T1", "P1", 1, 10.0, 2.0, 1000.0, 200.0)
            .tree_biomass("T2", "P2", 1, 10.0, 2.0, 3000.0, 600.0);
        let store = builder.build().unwrap();

        let config = EstimatorConfig::default();
        let estimator = Estimator::new(&store, &config);
        let mut cache = TableCache::new();
        let options = EstimationOptions::new();
        let above = estimator
            .biomass(&options, BiomassComponent::Aboveground, &mut cache)
            .unwrap();
        let total = estimator
            .biomass(&options, BiomassComponent::Total, &mut cache)
            .unwrap();
        // (1000 + 3000) lb * 2 TPA / 2000 / 2 plots
        assert_relative_eq!(above.single().unwrap().estimate, 2.0);
        assert_relative_eq!(total.single().unwrap().estimate, 2.4);
    }
}
