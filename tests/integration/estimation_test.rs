use approx::assert_relative_eq;
use fia_estimator::algorithm::GroupValue;
use fia_estimator::{
    Degradation, DensityMeasure, EstimationError, EstimationOptions, Estimator, EstimatorConfig,
    FinitePopulationCorrection, LandType, RandomInventory, SingleUnitPolicy, TableCache,
    VolumeType,
};

use crate::utils::{EVALID, config, two_strata, two_strata_store};

#[test]
fn items_are_counted_once_per_parcel() {
    let store = two_strata_store();
    let config = config();
    let result = Estimator::new(&store, &config)
        .volume(
            &EstimationOptions::new().with_totals(true),
            VolumeType::Net,
            &mut TableCache::new(),
        )
        .unwrap();
    let row = result.single().unwrap();

    // 5 trees x 10 ft3 on one of three plots in a stratum of weight 3000,
    // over 6000 expanded acres
    assert_relative_eq!(row.estimate, 50.0 * 1000.0 / 6000.0, epsilon = 1e-9);
    assert_relative_eq!(row.area, 6000.0);
    assert_relative_eq!(row.total.unwrap(), row.estimate * row.area, epsilon = 1e-6);
    assert_eq!(row.n_plots, 1);
    assert_eq!(row.n_items, 5);
}

#[test]
fn standard_errors_follow_stratified_ratio_variance() {
    let store = two_strata_store();
    let config = config();
    let result = Estimator::new(&store, &config)
        .volume(
            &EstimationOptions::new().with_totals(true),
            VolumeType::Net,
            &mut TableCache::new(),
        )
        .unwrap();
    let row = result.single().unwrap();

    // Stratum 1 plot values (50, 0, 0): s_y^2 = 2500/3, no denominator
    // variance; the ratio carries 1 - 1/n_h = 2/3, the total no correction
    let small_sample = 2.0 / 3.0;
    let expected = 3000.0_f64.powi(2) * small_sample * (2500.0 / 3.0) / 3.0 / 6000.0_f64.powi(2);
    assert_relative_eq!(row.variance, expected, epsilon = 1e-9);
    assert_relative_eq!(row.se, 50.0 / 6.0 * small_sample.sqrt(), epsilon = 1e-9);
    assert_relative_eq!(row.se_percent, 100.0 * small_sample.sqrt(), epsilon = 1e-9);
    assert_relative_eq!(row.total_se.unwrap(), 50_000.0, epsilon = 1e-6);
}

#[test]
fn correction_modes_scale_standard_errors() {
    let mut builder = two_strata();
    builder.stratum_population("S1", 6.0).stratum_population("S2", 6.0);
    let store = builder.build().unwrap();
    let options = EstimationOptions::new().with_totals(true);
    let volume = |config: &EstimatorConfig| {
        Estimator::new(&store, config)
            .volume(&options, VolumeType::Net, &mut TableCache::new())
            .unwrap()
            .single()
            .cloned()
            .unwrap()
    };

    let uncorrected = volume(&EstimatorConfig {
        ratio_fpc: FinitePopulationCorrection::None,
        ..EstimatorConfig::default()
    });
    assert_relative_eq!(uncorrected.se, 50.0 / 6.0, epsilon = 1e-9);
    assert_relative_eq!(uncorrected.total_se.unwrap(), 50_000.0, epsilon = 1e-6);

    // Three of six phase-one points sampled in each stratum: f_h = 1/2
    let sampled = volume(&EstimatorConfig {
        ratio_fpc: FinitePopulationCorrection::SamplingFraction,
        total_fpc: FinitePopulationCorrection::SamplingFraction,
        ..EstimatorConfig::default()
    });
    assert_relative_eq!(sampled.estimate, uncorrected.estimate);
    assert_relative_eq!(sampled.se, 50.0 / 6.0 * 0.5_f64.sqrt(), epsilon = 1e-9);
    assert_relative_eq!(sampled.total_se.unwrap(), 50_000.0 * 0.5_f64.sqrt(), epsilon = 1e-6);

    // A sampling fraction under the threshold leaves the variance alone
    let below = volume(&EstimatorConfig {
        total_fpc: FinitePopulationCorrection::SamplingFraction,
        fpc_threshold: 0.9,
        ..EstimatorConfig::default()
    });
    assert_relative_eq!(below.total_se.unwrap(), 50_000.0, epsilon = 1e-6);

    let small_sample = volume(&EstimatorConfig {
        total_fpc: FinitePopulationCorrection::SmallSample,
        ..EstimatorConfig::default()
    });
    assert_relative_eq!(
        small_sample.total_se.unwrap(),
        50_000.0 * (2.0_f64 / 3.0).sqrt(),
        epsilon = 1e-6
    );
}

#[test]
fn groups_recompute_their_own_variance() {
    let mut builder = two_strata();
    builder
        .tree_species("T1", 131)
        .tree_species("T2", 131)
        .tree_species("T3", 131)
        .tree_species("T4", 316)
        .tree_species("T5", 316)
        .tree("T6", "P21", 1, 10.0, 1.0, 10.0)
        .tree_species("T6", 316);
    let store = builder.build().unwrap();
    let config = config();
    let result = Estimator::new(&store, &config)
        .volume(
            &EstimationOptions::new().group_by(["SPCD"]),
            VolumeType::Net,
            &mut TableCache::new(),
        )
        .unwrap();

    let pine = result.row_for(&[GroupValue::Int(131)]).unwrap();
    let maple = result.row_for(&[GroupValue::Int(316)]).unwrap();
    // Same per-acre value, spread differently across plots; every stratum
    // has three plots so the correction is a common 2/3
    let correction = (2.0_f64 / 3.0).sqrt();
    assert_relative_eq!(pine.estimate, 5.0, epsilon = 1e-9);
    assert_relative_eq!(maple.estimate, 5.0, epsilon = 1e-9);
    assert_relative_eq!(pine.se, 5.0 * correction, epsilon = 1e-9);
    assert_relative_eq!(maple.se, (125.0_f64 / 9.0).sqrt() * correction, epsilon = 1e-9);
    assert_relative_eq!(pine.area, maple.area);
}

#[test]
fn single_plot_stratum_leaves_standard_error_undefined() {
    let mut builder = two_strata();
    builder
        .stratum("S3", EVALID, 1000.0)
        .plot("P31", "S3", EVALID)
        .condition("P31", 1, 1.0, 1);
    let store = builder.build().unwrap();

    let config = config();
    let result = Estimator::new(&store, &config)
        .volume(&EstimationOptions::new(), VolumeType::Net, &mut TableCache::new())
        .unwrap();
    let row = result.single().unwrap();
    assert!(row.estimate.is_finite());
    assert!(row.se.is_nan());
    assert!(row.se_percent.is_nan());
    assert!(result.diagnostics.degradations.iter().any(|d| matches!(
        d,
        Degradation::InsufficientSample { stratum, sampled_units: 1 } if stratum == "S3"
    )));

    let ignoring = EstimatorConfig {
        single_unit_policy: SingleUnitPolicy::Ignore,
        ..EstimatorConfig::default()
    };
    let result = Estimator::new(&store, &ignoring)
        .volume(&EstimationOptions::new(), VolumeType::Net, &mut TableCache::new())
        .unwrap();
    assert!(result.single().unwrap().se.is_finite());

    let strict = EstimatorConfig {
        strict: true,
        ..EstimatorConfig::default()
    };
    let err = Estimator::new(&store, &strict)
        .volume(&EstimationOptions::new(), VolumeType::Net, &mut TableCache::new())
        .unwrap_err();
    assert!(matches!(err, EstimationError::InsufficientSample { .. }));
}

#[test]
fn stratum_without_expansion_is_reported() {
    let mut builder = two_strata();
    builder.stratum_without_expansion("S2");
    let store = builder.build().unwrap();
    let config = config();
    let result = Estimator::new(&store, &config)
        .volume(&EstimationOptions::new(), VolumeType::Net, &mut TableCache::new())
        .unwrap();
    let row = result.single().unwrap();
    // S2 carries no weight: 50 ft3 x 1000 acres over 3000 acres
    assert_relative_eq!(row.estimate, 50.0 / 3.0, epsilon = 1e-9);
    assert_relative_eq!(row.area, 3000.0);
    assert!(result.diagnostics.degradations.contains(&Degradation::MissingExpansion {
        strata: vec!["S2".to_string()],
    }));
}

#[test]
fn area_domain_narrows_numerator_only() {
    let mut builder = two_strata();
    builder
        .condition_forest_type("P11", 1, 161)
        .condition_forest_type("P21", 1, 161)
        .condition_forest_type("P22", 1, 503);
    let store = builder.build().unwrap();
    let config = config();
    let estimator = Estimator::new(&store, &config);
    let mut cache = TableCache::new();

    let area = estimator
        .area(&EstimationOptions::new().area_domain("FORTYPCD == 161"), &mut cache)
        .unwrap();
    assert_relative_eq!(area.single().unwrap().estimate, 100.0 * 2.0 / 6.0, epsilon = 1e-9);
    assert_relative_eq!(area.single().unwrap().area, 6000.0);

    let grouped = estimator
        .area(&EstimationOptions::new().group_by(["FORTYPCD"]), &mut cache)
        .unwrap();
    let shares: f64 = grouped.rows.iter().map(|r| r.estimate).sum();
    assert_relative_eq!(shares, 100.0, epsilon = 1e-9);
    assert!(grouped.row_for(&[GroupValue::Null]).is_some());
}

#[test]
fn timber_land_excludes_reserved_conditions() {
    let mut builder = two_strata();
    builder.condition_reserved("P12", 1).condition_reserved("P13", 1);
    let store = builder.build().unwrap();
    let config = config();
    let mut cache = TableCache::new();
    let estimator = Estimator::new(&store, &config);

    let forest = estimator.area(&EstimationOptions::new(), &mut cache).unwrap();
    let timber = estimator
        .area(&EstimationOptions::new().land_type(LandType::Timber), &mut cache)
        .unwrap();
    assert_relative_eq!(forest.single().unwrap().estimate, 100.0);
    assert_relative_eq!(timber.single().unwrap().estimate, 100.0 * 4.0 / 6.0, epsilon = 1e-9);
}

#[test]
fn plot_subset_restricts_the_design() {
    let store = two_strata_store();
    let config = config();
    let result = Estimator::new(&store, &config)
        .tpa(
            &EstimationOptions::new().with_plot_ids(["P11".to_string(), "P12".to_string()]),
            DensityMeasure::TreesPerAcre,
            &mut TableCache::new(),
        )
        .unwrap();
    let row = result.single().unwrap();
    assert_relative_eq!(row.estimate, 2.5);
    assert_relative_eq!(row.area, 2000.0);
}

#[test]
fn cache_is_reused_across_estimates() {
    let store = RandomInventory::default().build().unwrap();
    let config = config();
    let estimator = Estimator::new(&store, &config);
    let mut cache = TableCache::new();

    let first = estimator
        .volume(&EstimationOptions::new(), VolumeType::Net, &mut cache)
        .unwrap();
    let loads = cache.stats().misses;
    let second = estimator
        .volume(&EstimationOptions::new(), VolumeType::Net, &mut cache)
        .unwrap();
    assert_eq!(cache.stats().misses, loads);
    assert!(cache.stats().hits > 0);
    assert_eq!(
        first.single().unwrap().estimate,
        second.single().unwrap().estimate
    );
}

#[test]
fn random_inventory_estimates_are_well_formed() {
    let store = RandomInventory {
        states: vec![6, 41],
        ..RandomInventory::default()
    }
    .build()
    .unwrap();
    let config = config();
    let estimator = Estimator::new(&store, &config);
    let mut cache = TableCache::new();

    let err = estimator
        .area(&EstimationOptions::new(), &mut cache)
        .unwrap_err();
    assert!(matches!(err, EstimationError::AmbiguousEvaluation { .. }));

    let options = EstimationOptions::new().with_states([41]).group_by(["SPCD"]);
    let result = estimator.tpa(&options, DensityMeasure::TreesPerAcre, &mut cache).unwrap();
    assert_eq!(result.evaluation.statecd, Some(41));
    assert!(!result.rows.is_empty());
    for row in &result.rows {
        assert!(row.estimate >= 0.0);
        assert!(row.se >= 0.0);
    }
    let batch = result.to_record_batch().unwrap();
    assert_eq!(batch.num_rows(), result.rows.len());
    assert!(batch.schema().field_with_name("SPCD").is_ok());
}
