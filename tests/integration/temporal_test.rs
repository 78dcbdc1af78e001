use approx::assert_relative_eq;
use fia_estimator::schema::tables;
use fia_estimator::{
    Degradation, EstimationError, EstimationOptions, Estimator, EstimatorConfig, TableCache,
    TemporalMeasure,
};

use crate::utils::{config, remeasured};

#[test]
fn mortality_and_removals_use_midpoint_values() {
    let store = remeasured().build().unwrap();
    let config = config();
    let estimator = Estimator::new(&store, &config);
    let mut cache = TableCache::new();
    let options = EstimationOptions::new();

    let mortality = estimator
        .mortality(&options, TemporalMeasure::Volume, &mut cache)
        .unwrap();
    let removals = estimator
        .removals(&options, TemporalMeasure::Volume, &mut cache)
        .unwrap();
    // 18 ft3 x 6 TPA and 35 ft3 x 6 TPA on one of two plots
    assert_relative_eq!(mortality.single().unwrap().estimate, 54.0, epsilon = 1e-9);
    assert_relative_eq!(removals.single().unwrap().estimate, 105.0, epsilon = 1e-9);
}

#[test]
fn growth_is_annualized_by_remeasurement_period() {
    let store = remeasured().build().unwrap();
    let config = config();
    let result = Estimator::new(&store, &config)
        .growth(&EstimationOptions::new(), TemporalMeasure::Volume, &mut TableCache::new())
        .unwrap();
    // P1: (30 - 20) / 5 * 6 = 12; P2: (35 - 30) / 5 * 6 + (18 - 16) / 5 * 6 = 8.4
    assert_relative_eq!(result.single().unwrap().estimate, 10.2, epsilon = 1e-9);
}

#[test]
fn tree_counts_need_no_measurements() {
    let store = remeasured().build().unwrap();
    let config = config();
    let result = Estimator::new(&store, &config)
        .mortality(&EstimationOptions::new(), TemporalMeasure::Trees, &mut TableCache::new())
        .unwrap();
    assert_relative_eq!(result.single().unwrap().estimate, 3.0, epsilon = 1e-9);
}

#[test]
fn unrecognized_components_are_skipped_and_counted() {
    let mut builder = remeasured();
    builder
        .tree("T4", "P1", 1, 9.0, 6.0, 10.0)
        .component("T4", "P1", "BOGUS", 6.0, 6.0, 6.0, 1);
    let store = builder.build().unwrap();

    let config = config();
    let result = Estimator::new(&store, &config)
        .mortality(&EstimationOptions::new(), TemporalMeasure::Trees, &mut TableCache::new())
        .unwrap();
    assert_relative_eq!(result.single().unwrap().estimate, 3.0, epsilon = 1e-9);
    assert!(result.diagnostics.degradations.contains(&Degradation::UnrecognizedComponent {
        label: "BOGUS".to_string(),
        count: 1,
    }));

    let strict = EstimatorConfig {
        strict: true,
        ..EstimatorConfig::default()
    };
    let err = Estimator::new(&store, &strict)
        .mortality(&EstimationOptions::new(), TemporalMeasure::Trees, &mut TableCache::new())
        .unwrap_err();
    assert!(matches!(err, EstimationError::UnrecognizedComponent { ref label, .. } if label == "BOGUS"));
}

#[test]
fn missing_remeasurement_period_is_reported() {
    let mut builder = remeasured();
    builder.plot_remper("P1", None);
    let store = builder.build().unwrap();
    let config = config();
    let result = Estimator::new(&store, &config)
        .growth(&EstimationOptions::new(), TemporalMeasure::Volume, &mut TableCache::new())
        .unwrap();
    // Only P2 contributes
    assert_relative_eq!(result.single().unwrap().estimate, 4.2, epsilon = 1e-9);
    assert!(result
        .diagnostics
        .degradations
        .contains(&Degradation::MissingRemeasurementPeriod { records: 1 }));
}

#[test]
fn component_frames_select_the_adjustment() {
    let mut builder = remeasured();
    builder
        .stratum_without_factors("S1")
        .tree("T5", "P1", 1, 3.0, 74.965, 1.0)
        .tree("T6", "P1", 1, 4.0, 74.965, 1.0)
        .tree("T7", "P1", 1, 4.0, 74.965, 1.0)
        .component("T5", "P1", "MORTALITY2", 74.965, 74.965, 0.0, 2)
        .component("T6", "P1", "MORTALITY2", 74.965, 74.965, 0.0, 0)
        .component("T7", "P1", "MORTALITY2", 74.965, 74.965, 0.0, 9);
    let store = builder.build().unwrap();
    let config = config();
    let result = Estimator::new(&store, &config)
        .mortality(&EstimationOptions::new(), TemporalMeasure::Trees, &mut TableCache::new())
        .unwrap();
    // Null factors fall back to 1.0; frame 0 is not sampled and frame 9 is
    // unknown, so only T5 joins T3
    assert_relative_eq!(result.single().unwrap().estimate, (74.965 + 6.0) / 2.0, epsilon = 1e-9);
    assert!(!result.diagnostics.warnings.is_empty());
    assert!(result
        .diagnostics
        .degradations
        .contains(&Degradation::UnknownSubplotType { records: 1 }));
}

#[test]
fn null_midpoint_excludes_growth_record() {
    let mut builder = remeasured();
    builder.component_measurements("T3", Some(16.0), None);
    let store = builder.build().unwrap();
    let config = config();
    let result = Estimator::new(&store, &config)
        .growth(&EstimationOptions::new(), TemporalMeasure::Volume, &mut TableCache::new())
        .unwrap();
    // T3 is dropped rather than valued at 0 - 16: P1 = 12, P2 = 6
    assert_relative_eq!(result.single().unwrap().estimate, 9.0, epsilon = 1e-9);
    assert!(result
        .diagnostics
        .degradations
        .contains(&Degradation::MissingMeasurement { records: 1 }));

    // Mortality falls back to the begin value
    let mortality = Estimator::new(&store, &config)
        .mortality(&EstimationOptions::new(), TemporalMeasure::Volume, &mut TableCache::new())
        .unwrap();
    assert_relative_eq!(mortality.single().unwrap().estimate, 48.0, epsilon = 1e-9);
    assert!(!mortality
        .diagnostics
        .degradations
        .iter()
        .any(|d| matches!(d, Degradation::MissingMeasurement { .. })));
}

#[test]
fn absent_midpoint_table_is_reported() {
    let mut store = remeasured().build().unwrap();
    assert!(store.remove(tables::TREE_GRM_MIDPT));
    let config = config();
    let estimator = Estimator::new(&store, &config);

    let growth = estimator
        .growth(&EstimationOptions::new(), TemporalMeasure::Volume, &mut TableCache::new())
        .unwrap();
    // Only the survivor can be valued without midpoints
    assert_relative_eq!(growth.single().unwrap().estimate, 6.0, epsilon = 1e-9);
    assert!(growth
        .diagnostics
        .degradations
        .contains(&Degradation::MissingMeasurement { records: 2 }));
    assert!(growth
        .diagnostics
        .warnings
        .iter()
        .any(|w| w.contains(tables::TREE_GRM_MIDPT)));

    let removals = estimator
        .removals(&EstimationOptions::new(), TemporalMeasure::Volume, &mut TableCache::new())
        .unwrap();
    assert_relative_eq!(removals.single().unwrap().estimate, 90.0, epsilon = 1e-9);
}
