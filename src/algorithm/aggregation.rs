//! Two-stage aggregation
//!
//! Stage 1 sums adjusted item values within each parcel (plot × condition)
//! and carries the parcel's area term alongside. Stage 2 collapses parcels to
//! their plot, expands by stratum and forms the ratio-of-means estimate with
//! its variance. Every estimator runs through the same two functions and
//! differs only in what it feeds them.

use std::collections::BTreeMap;

use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

use crate::algorithm::adjustment::AdjustmentResolver;
use crate::algorithm::grouping::GroupKey;
use crate::algorithm::variance::{StratumStatistics, ratio_variance, stratum_moments, total_variance};
use crate::assembly::{AssembledData, PlotRecord};
use crate::config::{EstimatorConfig, SingleUnitPolicy};
use crate::error::{EstimationError, Result};
use crate::evaluation::{SampleDesign, Stratum};

/// What the per-acre denominator covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenominatorScope {
    /// All sampled land, whatever the group (area percentages)
    Global,
    /// In-domain area of the parcels sharing the group's parcel key
    ParcelGroup,
}

/// Where the numerator comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumeratorSource {
    /// Item contributions
    Items,
    /// The in-domain parcel's own adjusted area
    ParcelArea,
}

/// Adjusted per-acre value of one item, attributed to its parcel
#[derive(Debug, Clone, PartialEq)]
pub struct ItemContribution {
    pub parcel: usize,
    pub key: GroupKey,
    pub value: f64,
}

/// Stage 1 result for one parcel
#[derive(Debug, Clone, PartialEq)]
pub struct ParcelAggregate {
    pub parcel: usize,
    pub plot: usize,
    pub parcel_key: GroupKey,
    /// CONDPROP_UNADJ, unmodified
    pub area_proportion: f64,
    pub area_multiplier: f64,
    pub in_domain: bool,
    pub in_land_base: bool,
    /// Item key -> (value sum, item count); empty for zero-item parcels
    pub values: Vec<(GroupKey, f64, usize)>,
}

impl ParcelAggregate {
    /// Area term of the parcel, counted once whatever its item count
    #[must_use]
    pub fn adjusted_area(&self) -> f64 {
        self.area_proportion * self.area_multiplier
    }

    #[must_use]
    pub fn numerator(&self) -> f64 {
        self.values.iter().map(|(_, v, _)| v).sum()
    }
}

/// Stage 1: aggregate item contributions per parcel.
///
/// Every parcel is returned, including those without items and those
/// outside the domain; contributions only count on in-domain parcels.
#[must_use]
pub fn aggregate_parcels(
    data: &AssembledData,
    resolver: &AdjustmentResolver,
    source: NumeratorSource,
    contributions: &[ItemContribution],
) -> Vec<ParcelAggregate> {
    let mut values: Vec<BTreeMap<GroupKey, (f64, usize)>> = vec![BTreeMap::new(); data.parcels.len()];
    if source == NumeratorSource::Items {
        for item in contributions {
            if let Some(slot) = values.get_mut(item.parcel) {
                let entry = slot.entry(item.key.clone()).or_insert((0.0, 0));
                entry.0 += item.value;
                entry.1 += 1;
            }
        }
    }

    data.parcels
        .iter()
        .zip(values)
        .enumerate()
        .map(|(index, (parcel, sums))| {
            let plot = &data.plots[parcel.plot];
            let area_multiplier =
                resolver.area_multiplier(&plot.stratum_cn, parcel.prop_basis.as_deref());
            let mut aggregate = ParcelAggregate {
                parcel: index,
                plot: parcel.plot,
                parcel_key: parcel.key.clone(),
                area_proportion: parcel.area_proportion,
                area_multiplier,
                in_domain: parcel.in_domain,
                in_land_base: parcel.in_land_base,
                values: Vec::new(),
            };
            if parcel.in_domain {
                aggregate.values = match source {
                    NumeratorSource::Items => sums
                        .into_iter()
                        .map(|(key, (sum, count))| (key, sum, count))
                        .collect(),
                    NumeratorSource::ParcelArea => {
                        vec![(GroupKey::new(), aggregate.adjusted_area(), 0)]
                    }
                };
            }
            aggregate
        })
        .collect()
}

/// Per-plot numerator and denominator of one output group
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupAccumulator {
    pub parcel_key: GroupKey,
    pub item_key: GroupKey,
    /// Plot index -> numerator
    pub y: FxHashMap<usize, f64>,
    /// Plot index -> denominator
    pub x: FxHashMap<usize, f64>,
    pub parcels: usize,
    pub items: usize,
}

impl GroupAccumulator {
    /// Plots with a non-zero numerator
    #[must_use]
    pub fn nonzero_plots(&self) -> usize {
        self.y.values().filter(|v| **v != 0.0).count()
    }
}

/// Stage 2 grouping: collect per-plot numerators and denominators by group.
///
/// `parcel_groups` adds a group for every in-domain parcel key even when it
/// holds no items; it is used when no item-level grouping is requested. An
/// ungrouped call always yields exactly one group.
#[must_use]
pub fn accumulate_groups(
    aggregates: &[ParcelAggregate],
    scope: DenominatorScope,
    parcel_groups: bool,
) -> Vec<GroupAccumulator> {
    let mut groups: BTreeMap<(GroupKey, GroupKey), GroupAccumulator> = BTreeMap::new();
    let mut parcels_seen: FxHashMap<(GroupKey, GroupKey), FxHashSet<usize>> = FxHashMap::default();
    let mut global_x: FxHashMap<usize, f64> = FxHashMap::default();
    let mut group_x: FxHashMap<GroupKey, FxHashMap<usize, f64>> = FxHashMap::default();

    for aggregate in aggregates {
        if aggregate.in_land_base {
            *global_x.entry(aggregate.plot).or_default() += aggregate.adjusted_area();
        }
        if !aggregate.in_domain {
            continue;
        }
        *group_x
            .entry(aggregate.parcel_key.clone())
            .or_default()
            .entry(aggregate.plot)
            .or_default() += aggregate.adjusted_area();

        if parcel_groups {
            let key = (aggregate.parcel_key.clone(), GroupKey::new());
            let group = groups.entry(key.clone()).or_insert_with(|| GroupAccumulator {
                parcel_key: key.0.clone(),
                ..GroupAccumulator::default()
            });
            group.y.entry(aggregate.plot).or_default();
            parcels_seen.entry(key).or_default().insert(aggregate.parcel);
        }

        for (item_key, value, count) in &aggregate.values {
            let key = (aggregate.parcel_key.clone(), item_key.clone());
            let group = groups.entry(key.clone()).or_insert_with(|| GroupAccumulator {
                parcel_key: key.0.clone(),
                item_key: key.1.clone(),
                ..GroupAccumulator::default()
            });
            *group.y.entry(aggregate.plot).or_default() += value;
            group.items += count;
            parcels_seen.entry(key).or_default().insert(aggregate.parcel);
        }
    }

    if groups.is_empty() && parcel_groups {
        groups.insert(
            (GroupKey::new(), GroupKey::new()),
            GroupAccumulator::default(),
        );
    }

    groups
        .into_iter()
        .map(|(key, mut group)| {
            group.parcels = parcels_seen.get(&key).map_or(0, FxHashSet::len);
            group.x = match scope {
                DenominatorScope::Global => global_x.clone(),
                DenominatorScope::ParcelGroup => {
                    group_x.get(&group.parcel_key).cloned().unwrap_or_default()
                }
            };
            group
        })
        .collect()
}

/// Plots of the assembled data arranged by stratum
#[derive(Debug, Clone)]
pub struct StratumLayout<'a> {
    design: &'a SampleDesign,
    strata: Vec<(&'a Stratum, Vec<usize>)>,
}

impl<'a> StratumLayout<'a> {
    #[must_use]
    pub fn new(design: &'a SampleDesign, plots: &[PlotRecord]) -> Self {
        let mut by_stratum: FxHashMap<&str, Vec<usize>> = FxHashMap::default();
        for (index, plot) in plots.iter().enumerate() {
            by_stratum.entry(plot.stratum_cn.as_str()).or_default().push(index);
        }
        let strata = design
            .strata()
            .into_iter()
            .map(|stratum| {
                let members = by_stratum.remove(stratum.cn.as_str()).unwrap_or_default();
                (stratum, members)
            })
            .collect();
        Self { design, strata }
    }

    /// Strata with fewer than two assigned plots
    #[must_use]
    pub fn insufficient_strata(&self) -> Vec<(String, usize)> {
        self.strata
            .iter()
            .map(|(s, _)| (s.cn.clone(), self.design.plot_count(&s.cn)))
            .filter(|(_, n)| *n < 2)
            .collect()
    }
}

/// Stage 2 result for one group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopulationEstimate {
    /// Expanded numerator total (Y)
    pub numerator_total: f64,
    /// Expanded denominator total (X)
    pub denominator_total: f64,
    /// Y / X; NaN when X is zero
    pub ratio: f64,
    pub ratio_variance: f64,
    pub total_variance: f64,
    pub strata: Vec<StratumStatistics>,
    /// Plots with a non-zero numerator
    pub plots: usize,
    pub parcels: usize,
    pub items: usize,
}

/// Expand one group's plot values by stratum and compute its variances
pub fn combine_strata(
    layout: &StratumLayout<'_>,
    group: &GroupAccumulator,
    config: &EstimatorConfig,
) -> Result<PopulationEstimate> {
    let strata: Vec<StratumStatistics> = layout
        .strata
        .iter()
        .map(|(stratum, members)| {
            let ys: Vec<f64> = members.iter().map(|p| group.y.get(p).copied().unwrap_or(0.0)).collect();
            let xs: Vec<f64> = members.iter().map(|p| group.x.get(p).copied().unwrap_or(0.0)).collect();
            StratumStatistics {
                stratum_cn: stratum.cn.clone(),
                expns: stratum.expns,
                population: stratum.p1pointcnt,
                moments: stratum_moments(&ys, &xs, layout.design.plot_count(&stratum.cn)),
            }
        })
        .collect();

    let numerator_total: f64 = strata.iter().map(StratumStatistics::y_total).sum();
    let denominator_total: f64 = strata.iter().map(StratumStatistics::x_total).sum();
    let ratio = if denominator_total == 0.0 {
        f64::NAN
    } else {
        numerator_total / denominator_total
    };

    let single_unit = |s: &&StratumStatistics| s.moments.n < 2;
    if config.strict {
        if let Some(s) = strata.iter().find(single_unit) {
            return Err(EstimationError::InsufficientSample {
                stratum: s.stratum_cn.clone(),
                sampled_units: s.moments.n,
            });
        }
    }
    let variance_strata: Vec<StratumStatistics> = match config.single_unit_policy {
        SingleUnitPolicy::Undefined => strata.clone(),
        SingleUnitPolicy::Ignore => strata.iter().filter(|s| !single_unit(s)).cloned().collect(),
    };

    Ok(PopulationEstimate {
        numerator_total,
        denominator_total,
        ratio,
        ratio_variance: ratio_variance(&variance_strata, ratio, denominator_total, config),
        total_variance: total_variance(&variance_strata, config),
        strata,
        plots: group.nonzero_plots(),
        parcels: group.parcels,
        items: group.items,
    })
}

/// Combine every group in parallel
pub fn combine_groups(
    layout: &StratumLayout<'_>,
    groups: &[GroupAccumulator],
    config: &EstimatorConfig,
) -> Result<Vec<PopulationEstimate>> {
    groups
        .par_iter()
        .map(|group| combine_strata(layout, group, config))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::grouping::GroupValue;
    use crate::assembly::ParcelRecord;
    use approx::assert_relative_eq;
    use smallvec::smallvec;

    fn design(plots_per_stratum: &[usize]) -> SampleDesign {
        let mut assignments = FxHashMap::default();
        let mut strata = FxHashMap::default();
        for (h, n) in plots_per_stratum.iter().enumerate() {
            let cn = format!("S{h}");
            for i in 0..*n {
                assignments.insert(format!("P{h}_{i}"), cn.clone());
            }
            strata.insert(
                cn.clone(),
                Stratum {
                    cn,
                    evalid: 1,
                    estn_unit_cn: None,
                    expns: 1000.0,
                    adj_factor_micr: Some(1.0),
                    adj_factor_subp: Some(1.0),
                    adj_factor_macr: Some(1.0),
                    p1pointcnt: None,
                    p2pointcnt: None,
                    expns_missing: false,
                },
            );
        }
        SampleDesign::new(1, assignments, strata).unwrap()
    }

    fn data(design: &SampleDesign, keys: &[i64]) -> AssembledData {
        let mut data = AssembledData::default();
        for (i, cn) in design.plot_ids().into_iter().enumerate() {
            data.plots.push(PlotRecord {
                stratum_cn: design.stratum_cn_of(&cn).unwrap().to_string(),
                cn,
                macro_breakpoint_dia: Some(24.0),
                remper: Some(5.0),
                key: GroupKey::new(),
            });
            data.parcels.push(ParcelRecord {
                plot: i,
                condid: 1,
                area_proportion: 1.0,
                prop_basis: None,
                in_domain: true,
                in_land_base: true,
                key: smallvec![GroupValue::Int(keys[i % keys.len()])],
            });
        }
        data
    }

    fn items(parcel: usize, count: usize, value: f64) -> Vec<ItemContribution> {
        (0..count)
            .map(|_| ItemContribution {
                parcel,
                key: GroupKey::new(),
                value,
            })
            .collect()
    }

    #[test]
    fn zero_item_parcels_keep_their_area() {
        let design = design(&[3]);
        let data = data(&design, &[1]);
        let resolver = AdjustmentResolver::new(&design, 5.0);
        let aggregates = aggregate_parcels(&data, &resolver, NumeratorSource::Items, &items(0, 2, 3.0));
        assert_eq!(aggregates.len(), 3);
        assert_relative_eq!(aggregates[0].numerator(), 6.0);
        assert_eq!(aggregates[1].numerator(), 0.0);
        assert_relative_eq!(aggregates[1].adjusted_area(), 1.0);
    }

    #[test]
    fn area_is_counted_once_per_parcel() {
        // k items on one parcel: per-item area weighting would inflate the
        // denominator by exactly k
        let k = 7;
        let design = design(&[2]);
        let data = data(&design, &[1]);
        let resolver = AdjustmentResolver::new(&design, 5.0);
        let mut contributions = items(0, k, 1.0);
        contributions.extend(items(1, k, 1.0));
        let aggregates = aggregate_parcels(&data, &resolver, NumeratorSource::Items, &contributions);
        let groups = accumulate_groups(&aggregates, DenominatorScope::ParcelGroup, true);
        let layout = StratumLayout::new(&design, &data.plots);
        let estimate = combine_strata(&layout, &groups[0], &EstimatorConfig::default()).unwrap();

        assert_relative_eq!(estimate.denominator_total, 2000.0);
        assert_relative_eq!(estimate.ratio, k as f64);
        let per_item_ratio = estimate.numerator_total / (2.0 * k as f64 * 1000.0);
        assert_relative_eq!(estimate.ratio / per_item_ratio, k as f64);
        assert_eq!(estimate.items, 2 * k);
        assert_eq!(estimate.parcels, 2);
    }

    #[test]
    fn parcel_groups_partition_the_denominator() {
        let design = design(&[4]);
        let data = data(&design, &[10, 20]);
        let resolver = AdjustmentResolver::new(&design, 5.0);
        let mut contributions = items(0, 1, 5.0);
        contributions.extend(items(1, 1, 2.0));
        contributions.extend(items(2, 1, 1.0));
        let aggregates = aggregate_parcels(&data, &resolver, NumeratorSource::Items, &contributions);
        let groups = accumulate_groups(&aggregates, DenominatorScope::ParcelGroup, true);
        assert_eq!(groups.len(), 2);

        let layout = StratumLayout::new(&design, &data.plots);
        let estimates = combine_groups(&layout, &groups, &EstimatorConfig::default()).unwrap();
        assert_relative_eq!(estimates[0].denominator_total, 2000.0);
        assert_relative_eq!(estimates[1].denominator_total, 2000.0);
        assert_relative_eq!(estimates[0].ratio, 3.0);
        assert_relative_eq!(estimates[1].ratio, 1.0);
        assert!(estimates[0].ratio_variance != estimates[1].ratio_variance);
    }

    #[test]
    fn single_plot_stratum_policies() {
        let design = design(&[1, 3]);
        let data = data(&design, &[1]);
        let resolver = AdjustmentResolver::new(&design, 5.0);
        let aggregates = aggregate_parcels(&data, &resolver, NumeratorSource::ParcelArea, &[]);
        let groups = accumulate_groups(&aggregates, DenominatorScope::Global, true);
        let layout = StratumLayout::new(&design, &data.plots);
        assert_eq!(layout.insufficient_strata(), vec![("S0".to_string(), 1)]);

        let mut config = EstimatorConfig::default();
        let undefined = combine_strata(&layout, &groups[0], &config).unwrap();
        assert!(undefined.total_variance.is_nan());
        assert_relative_eq!(undefined.numerator_total, 4000.0);

        config.single_unit_policy = SingleUnitPolicy::Ignore;
        let ignored = combine_strata(&layout, &groups[0], &config).unwrap();
        assert!(ignored.total_variance.is_finite());

        config.strict = true;
        assert!(matches!(
            combine_strata(&layout, &groups[0], &config),
            Err(EstimationError::InsufficientSample { sampled_units: 1, .. })
        ));
    }

    #[test]
    fn empty_ungrouped_estimate_is_zero_not_missing() {
        let design = design(&[2]);
        let mut data = data(&design, &[1]);
        for parcel in &mut data.parcels {
            parcel.in_domain = false;
        }
        let resolver = AdjustmentResolver::new(&design, 5.0);
        let aggregates = aggregate_parcels(&data, &resolver, NumeratorSource::ParcelArea, &[]);
        let groups = accumulate_groups(&aggregates, DenominatorScope::Global, true);
        assert_eq!(groups.len(), 1);
        let layout = StratumLayout::new(&design, &data.plots);
        let estimate = combine_strata(&layout, &groups[0], &EstimatorConfig::default()).unwrap();
        assert_eq!(estimate.numerator_total, 0.0);
        assert_relative_eq!(estimate.ratio, 0.0);
    }
}
