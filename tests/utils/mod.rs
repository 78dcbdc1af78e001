//! Shared inventories for the integration tests

use fia_estimator::{EstimatorConfig, InventoryBuilder, MemoryStore};

pub const EVALID: i64 = 19_01;
pub const GRM_EVALID: i64 = 19_03;

/// Two strata of three fully forested plots, EXPNS 1000. Plot P11 holds five
/// identical trees of 10 cubic feet at one tree per acre; every other plot
/// has none.
pub fn two_strata() -> InventoryBuilder {
    let mut builder = InventoryBuilder::new();
    builder
        .evaluation(EVALID, "E1", 1, 2015, 2019, &["EXPALL", "EXPCURR", "EXPVOL"])
        .stratum("S1", EVALID, 1000.0)
        .stratum("S2", EVALID, 1000.0);
    for (stratum, plots) in [("S1", ["P11", "P12", "P13"]), ("S2", ["P21", "P22", "P23"])] {
        for plot in plots {
            builder.plot(plot, stratum, EVALID).condition(plot, 1, 1.0, 1);
        }
    }
    for i in 1..=5 {
        builder.tree(&format!("T{i}"), "P11", 1, 10.0, 1.0, 10.0);
    }
    builder
}

pub fn two_strata_store() -> MemoryStore {
    two_strata().build().expect("inventory builds")
}

/// One stratum of two plots remeasured over five years.
///
/// | tree | plot | component  | begin | midpoint | end |
/// |------|------|------------|-------|----------|-----|
/// | T1   | P1   | SURVIVOR   | 20    | 25       | 30  |
/// | T2   | P2   | CUT1       | 30    | 35       | 40  |
/// | T3   | P2   | MORTALITY1 | 16    | 18       | 20  |
///
/// Every component rate is 6 trees per acre on the subplot.
pub fn remeasured() -> InventoryBuilder {
    let mut builder = InventoryBuilder::new();
    builder
        .evaluation(GRM_EVALID, "E3", 1, 2015, 2019, &["EXPGROW", "EXPMORT", "EXPREMV"])
        .stratum("S1", GRM_EVALID, 1000.0)
        .plot("P1", "S1", GRM_EVALID)
        .plot("P2", "S1", GRM_EVALID)
        .condition("P1", 1, 1.0, 1)
        .condition("P2", 1, 1.0, 1)
        .tree("T1", "P1", 1, 10.0, 6.0, 30.0)
        .tree("T2", "P2", 1, 12.0, 6.0, 40.0)
        .tree("T3", "P2", 1, 8.0, 6.0, 20.0)
        .tree_status("T3", 2)
        .component("T1", "P1", "SURVIVOR", 6.0, 0.0, 0.0, 1)
        .component("T2", "P2", "CUT1", 6.0, 0.0, 6.0, 1)
        .component("T3", "P2", "MORTALITY1", 6.0, 6.0, 0.0, 1)
        .component_measurements("T1", Some(20.0), Some(25.0))
        .component_measurements("T2", Some(30.0), Some(35.0))
        .component_measurements("T3", Some(16.0), Some(18.0));
    builder
}

pub fn config() -> EstimatorConfig {
    EstimatorConfig::default()
}
