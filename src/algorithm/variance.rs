//! Stratified variance of totals and ratio-of-means estimates
//!
//! Plots are the sampling units. Within a stratum with `n` assigned plots,
//! every plot carries a numerator value `y` and a denominator value `x`
//! (zero when the plot had nothing in the domain). With `W = EXPNS * n`:
//!
//! ```text
//! Var(Y) = sum_h W_h^2 f_h s_y^2 / n_h
//! Var(R) = sum_h W_h^2 f_h (s_y^2 + R^2 s_x^2 - 2 R s_xy) / n_h / X^2
//! ```
//!
//! where `f_h` is the finite population correction. The ratio and the total
//! each take their own correction mode; by default the ratio uses
//! `1 - 1/n_h` and the total none.

use serde::{Deserialize, Serialize};

use crate::config::{EstimatorConfig, FinitePopulationCorrection};

/// Sample moments of one stratum
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Moments {
    /// Assigned plots (n_h)
    pub n: usize,
    pub y_sum: f64,
    pub x_sum: f64,
    pub y_mean: f64,
    pub x_mean: f64,
    pub s_yy: f64,
    pub s_xx: f64,
    pub s_xy: f64,
}

/// Moments over `n` units of which `ys`/`xs` are the observed ones; the
/// remaining `n - ys.len()` units are zeros.
///
/// Variances use the `n - 1` denominator and are NaN when `n < 2`.
#[must_use]
pub fn stratum_moments(ys: &[f64], xs: &[f64], n: usize) -> Moments {
    debug_assert_eq!(ys.len(), xs.len());
    let observed = ys.len().min(n);
    let unobserved = (n - observed) as f64;

    let y_sum: f64 = ys.iter().sum();
    let x_sum: f64 = xs.iter().sum();
    let (y_mean, x_mean) = if n == 0 {
        (0.0, 0.0)
    } else {
        (y_sum / n as f64, x_sum / n as f64)
    };

    let (s_yy, s_xx, s_xy) = if n < 2 {
        (f64::NAN, f64::NAN, f64::NAN)
    } else {
        let mut yy = unobserved * y_mean * y_mean;
        let mut xx = unobserved * x_mean * x_mean;
        let mut xy = unobserved * y_mean * x_mean;
        for (y, x) in ys.iter().zip(xs) {
            let dy = y - y_mean;
            let dx = x - x_mean;
            yy += dy * dy;
            xx += dx * dx;
            xy += dy * dx;
        }
        let df = (n - 1) as f64;
        (yy / df, xx / df, xy / df)
    };

    Moments {
        n,
        y_sum,
        x_sum,
        y_mean,
        x_mean,
        s_yy,
        s_xx,
        s_xy,
    }
}

/// One stratum's contribution to a population estimate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StratumStatistics {
    pub stratum_cn: String,
    pub expns: f64,
    /// Phase-one point count, when recorded
    pub population: Option<f64>,
    pub moments: Moments,
}

impl StratumStatistics {
    /// Stratum weight W_h = EXPNS * n_h
    #[must_use]
    pub fn weight(&self) -> f64 {
        self.expns * self.moments.n as f64
    }

    /// Expanded numerator total of the stratum
    #[must_use]
    pub fn y_total(&self) -> f64 {
        self.expns * self.moments.y_sum
    }

    /// Expanded denominator total of the stratum
    #[must_use]
    pub fn x_total(&self) -> f64 {
        self.expns * self.moments.x_sum
    }

    #[must_use]
    pub fn correction(&self, mode: FinitePopulationCorrection, config: &EstimatorConfig) -> f64 {
        finite_population_correction(
            mode,
            self.moments.n,
            self.population,
            config.fpc_threshold,
        )
    }
}

/// Finite population correction factor f_h
#[must_use]
pub fn finite_population_correction(
    mode: FinitePopulationCorrection,
    n: usize,
    population: Option<f64>,
    threshold: f64,
) -> f64 {
    let n = n as f64;
    match mode {
        FinitePopulationCorrection::None => 1.0,
        FinitePopulationCorrection::SmallSample => {
            if n > 0.0 {
                1.0 - 1.0 / n
            } else {
                1.0
            }
        }
        FinitePopulationCorrection::SamplingFraction => match population {
            Some(big_n) if big_n > 0.0 && n / big_n >= threshold => (1.0 - n / big_n).max(0.0),
            _ => 1.0,
        },
    }
}

/// Variance of an expanded total
#[must_use]
pub fn total_variance(strata: &[StratumStatistics], config: &EstimatorConfig) -> f64 {
    strata
        .iter()
        .map(|s| {
            let n = s.moments.n as f64;
            s.weight().powi(2) * s.correction(config.total_fpc, config) * s.moments.s_yy / n
        })
        .sum()
}

/// Variance of a ratio-of-means estimate `ratio = Y / X`
///
/// NaN when `x_total` is zero.
#[must_use]
pub fn ratio_variance(
    strata: &[StratumStatistics],
    ratio: f64,
    x_total: f64,
    config: &EstimatorConfig,
) -> f64 {
    if x_total == 0.0 || !ratio.is_finite() {
        return f64::NAN;
    }
    let sum: f64 = strata
        .iter()
        .map(|s| {
            let m = &s.moments;
            let residual = m.s_yy + ratio * ratio * m.s_xx - 2.0 * ratio * m.s_xy;
            // Rounding can push a zero residual slightly negative
            let residual = if residual.is_nan() { residual } else { residual.max(0.0) };
            s.weight().powi(2) * s.correction(config.ratio_fpc, config) * residual / m.n as f64
        })
        .sum();
    sum / (x_total * x_total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn stratum(ys: &[f64], xs: &[f64], n: usize, expns: f64) -> StratumStatistics {
        StratumStatistics {
            stratum_cn: "S".into(),
            expns,
            population: None,
            moments: stratum_moments(ys, xs, n),
        }
    }

    #[test]
    fn unobserved_units_are_zeros() {
        let padded = stratum_moments(&[4.0], &[1.0], 4);
        let explicit = stratum_moments(&[4.0, 0.0, 0.0, 0.0], &[1.0, 0.0, 0.0, 0.0], 4);
        assert_relative_eq!(padded.s_yy, explicit.s_yy, epsilon = 1e-12);
        assert_relative_eq!(padded.s_xy, explicit.s_xy, epsilon = 1e-12);
        assert_relative_eq!(padded.y_mean, 1.0);
    }

    #[test]
    fn single_unit_variance_is_nan() {
        let config = EstimatorConfig::default();
        let s = stratum(&[5.0], &[1.0], 1, 1000.0);
        assert!(total_variance(&[s], &config).is_nan());
    }

    #[test]
    fn total_variance_matches_hand_computation() {
        let config = EstimatorConfig::default();
        // s_y^2 = 1, W = 3000
        let s = stratum(&[1.0, 2.0, 3.0], &[1.0, 1.0, 1.0], 3, 1000.0);
        assert_relative_eq!(total_variance(&[s], &config), 3000.0_f64.powi(2) / 3.0);
    }

    #[test]
    fn constant_ratio_has_zero_variance() {
        let config = EstimatorConfig::default();
        let s = stratum(&[2.0, 4.0, 6.0], &[1.0, 2.0, 3.0], 3, 100.0);
        let var = ratio_variance(&[s.clone()], 2.0, s.x_total(), &config);
        assert_relative_eq!(var, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn correction_modes() {
        assert_eq!(
            finite_population_correction(FinitePopulationCorrection::None, 4, Some(8.0), 0.05),
            1.0
        );
        assert_relative_eq!(
            finite_population_correction(FinitePopulationCorrection::SmallSample, 4, None, 0.05),
            0.75
        );
        assert_relative_eq!(
            finite_population_correction(FinitePopulationCorrection::SamplingFraction, 4, Some(8.0), 0.05),
            0.5
        );
        // Below threshold the correction is not applied
        assert_eq!(
            finite_population_correction(FinitePopulationCorrection::SamplingFraction, 1, Some(1000.0), 0.05),
            1.0
        );
    }

    #[test]
    fn ratio_and_total_take_separate_corrections() {
        let config = EstimatorConfig::default();
        let s = stratum(&[1.0, 2.0, 3.0], &[1.0, 0.0, 1.0], 3, 1000.0);
        let ratio = s.y_total() / s.x_total();
        let uncorrected = EstimatorConfig {
            ratio_fpc: FinitePopulationCorrection::None,
            ..EstimatorConfig::default()
        };
        assert_relative_eq!(
            ratio_variance(&[s.clone()], ratio, s.x_total(), &config),
            ratio_variance(&[s.clone()], ratio, s.x_total(), &uncorrected) * 2.0 / 3.0,
            epsilon = 1e-12
        );
        assert_relative_eq!(total_variance(&[s.clone()], &config), total_variance(&[s], &uncorrected));
    }

    proptest! {
        #[test]
        fn variances_are_non_negative(
            pairs in prop::collection::vec((0.0f64..1000.0, 0.0f64..1.0), 2..30),
            padding in 0usize..5,
            expns in 1.0f64..10_000.0,
        ) {
            let config = EstimatorConfig::default();
            let ys: Vec<f64> = pairs.iter().map(|p| p.0).collect();
            let xs: Vec<f64> = pairs.iter().map(|p| p.1).collect();
            let s = stratum(&ys, &xs, ys.len() + padding, expns);
            let total = total_variance(&[s.clone()], &config);
            prop_assert!(total >= 0.0);
            if s.x_total() > 0.0 {
                let ratio = s.y_total() / s.x_total();
                prop_assert!(ratio_variance(&[s.clone()], ratio, s.x_total(), &config) >= 0.0);
            }
        }
    }
}
