use approx::assert_relative_eq;
use fia_estimator::schema::Level;
use fia_estimator::{EstimationError, EstimationOptions, Estimator, TableCache, VolumeType};

use crate::utils::{config, two_strata, two_strata_store};

#[test]
fn tree_attribute_in_area_domain_is_rejected() {
    let store = two_strata_store();
    let config = config();
    let err = Estimator::new(&store, &config)
        .volume(
            &EstimationOptions::new().area_domain("DIA >= 5"),
            VolumeType::Net,
            &mut TableCache::new(),
        )
        .unwrap_err();
    match err {
        EstimationError::UnknownAttribute {
            attribute,
            level,
            hint,
        } => {
            assert_eq!(attribute, "DIA");
            assert_eq!(level, Level::Condition);
            assert!(hint.contains("tree"), "{hint}");
        }
        other => panic!("expected UnknownAttribute, got {other}"),
    }
}

#[test]
fn malformed_domain_fails_before_reading_items() {
    let store = two_strata_store();
    let config = config();
    let err = Estimator::new(&store, &config)
        .volume(
            &EstimationOptions::new().tree_domain("DIA >= "),
            VolumeType::Net,
            &mut TableCache::new(),
        )
        .unwrap_err();
    assert!(matches!(err, EstimationError::DomainSyntax { .. }));
    assert!(err.is_input_error());
}

#[test]
fn unknown_grouping_column_is_an_input_error() {
    let store = two_strata_store();
    let config = config();
    let err = Estimator::new(&store, &config)
        .area(&EstimationOptions::new().group_by(["NOT_A_COLUMN"]), &mut TableCache::new())
        .unwrap_err();
    assert!(err.is_input_error(), "{err}");
}

#[test]
fn tree_domain_filters_items_not_area() {
    let mut builder = two_strata();
    builder.tree("T6", "P11", 1, 3.0, 1.0, 1.0);
    let store = builder.build().unwrap();
    let config = config();
    let estimator = Estimator::new(&store, &config);
    let mut cache = TableCache::new();

    let all = estimator
        .volume(&EstimationOptions::new(), VolumeType::Net, &mut cache)
        .unwrap();
    let large = estimator
        .volume(&EstimationOptions::new().tree_domain("DIA >= 5"), VolumeType::Net, &mut cache)
        .unwrap();
    assert_relative_eq!(all.single().unwrap().estimate, 51.0 / 6.0, epsilon = 1e-9);
    assert_relative_eq!(large.single().unwrap().estimate, 50.0 / 6.0, epsilon = 1e-9);
    assert_relative_eq!(all.single().unwrap().area, large.single().unwrap().area);
}

#[test]
fn plot_domain_restricts_the_population() {
    let mut builder = two_strata();
    builder.plot_breakpoint("P11", 20.0);
    let store = builder.build().unwrap();
    let config = config();
    let result = Estimator::new(&store, &config)
        .volume(
            &EstimationOptions::new().plot_domain("MACRO_BREAKPOINT_DIA < 24"),
            VolumeType::Net,
            &mut TableCache::new(),
        )
        .unwrap();
    let row = result.single().unwrap();
    // Only P11 remains in the domain; the other plots still count as
    // sampled zeros in their strata
    assert_relative_eq!(row.estimate, 50.0, epsilon = 1e-9);
    assert_relative_eq!(row.area, 1000.0, epsilon = 1e-9);
}
