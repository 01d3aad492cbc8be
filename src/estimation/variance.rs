//! STAGE 5: STRATIFIED VARIANCE
//!
//! Linearized (residual) variance of the ratio of means, one stratum at a time:
//!
//! ```text
//! d_i      = y_i − R · x_i                      (ratio)
//! d_i      = y_i                                (total)
//! s²_h     = Σ (d_i − d̄_h)² / (n_h − 1)         over all n_h plots of the stratum
//! V_h      = N_h² / n_h · s²_h,  N_h = EXPNS_h · n_h
//! Var(R)   = Σ_h V_h / X̂²
//! Var(Ŷ)   = Σ_h V_h
//! ```
//!
//! **Zero plots**: only plots with a contribution are stored, but every sampled plot of
//! a stratum is part of its sample. The `n_h − k` absent plots enter the sum of squares
//! as `d = 0`.
//!
//! **Insufficient samples**: a contributing stratum with `n_h < 2` has no within-stratum
//! variance. It is left out and reported; if no contributing stratum is left the
//! variance is undefined (`None`).

use rustc_hash::FxHashMap;

use crate::estimation::contributions::{PlotUnit, PlotValues};
use crate::estimation::ratio_of_means::RatioEstimate;
use crate::estimation::stratification::StratumInfo;

/// Variance of one group's ratio and total
#[derive(Debug, Clone, PartialEq)]
pub struct VarianceEstimate {
    pub ratio_variance: Option<f64>,
    pub total_variance: Option<f64>,
    /// Contributing strata (indices) that were skipped for n_h < 2
    pub insufficient_strata: Vec<usize>,
}

impl VarianceEstimate {
    pub fn ratio_se(&self) -> Option<f64> {
        self.ratio_variance.map(f64::sqrt)
    }

    pub fn total_se(&self) -> Option<f64> {
        self.total_variance.map(f64::sqrt)
    }
}

/// Stratified variance of a group from its plot values
pub fn estimate_variance(
    numerator: &PlotValues,
    denominator: Option<&PlotValues>,
    plots: &[PlotUnit],
    strata: &[StratumInfo],
    estimate: &RatioEstimate,
    finite_population_correction: bool,
) -> VarianceEstimate {
    // STEP 1: (y_i, x_i) per contributing plot, bucketed by stratum
    let mut paired: FxHashMap<usize, (f64, f64)> = FxHashMap::default();
    for (&plot, &y) in numerator {
        paired.entry(plot).or_default().0 += y;
    }
    if let Some(denominator) = denominator {
        for (&plot, &x) in denominator {
            paired.entry(plot).or_default().1 += x;
        }
    }

    let mut by_stratum: Vec<Vec<(f64, f64)>> = vec![Vec::new(); strata.len()];
    for (plot, values) in paired {
        by_stratum[plots[plot].stratum].push(values);
    }

    // STEP 2: Sum stratum terms for the ratio residuals and the totals
    let ratio = estimate.ratio;
    let mut ratio_sum = 0.0;
    let mut total_sum = 0.0;
    let mut computed = 0usize;
    let mut contributing = 0usize;
    let mut insufficient_strata = Vec::new();

    for (idx, rows) in by_stratum.iter().enumerate() {
        if rows.is_empty() {
            continue;
        }
        contributing += 1;

        let stratum = &strata[idx];
        if stratum.sampled_plots < 2 {
            insufficient_strata.push(idx);
            continue;
        }

        let residuals: Vec<f64> = rows.iter().map(|(y, x)| y - ratio * x).collect();
        let totals: Vec<f64> = rows.iter().map(|(y, _)| *y).collect();

        ratio_sum += stratum_term(&residuals, stratum, finite_population_correction);
        total_sum += stratum_term(&totals, stratum, finite_population_correction);
        computed += 1;
    }

    let defined = contributing == 0 || computed > 0;
    let total_variance = defined.then_some(total_sum);
    let ratio_variance = if defined && !estimate.degenerate {
        Some(ratio_sum / estimate.denominator_total.powi(2))
    } else {
        None
    };

    VarianceEstimate {
        ratio_variance,
        total_variance,
        insufficient_strata,
    }
}

/// `N_h² / n_h · s²_h` for one stratum, absent plots counted as zeros
fn stratum_term(values: &[f64], stratum: &StratumInfo, finite_population_correction: bool) -> f64 {
    let n = stratum.sampled_plots as f64;
    let absent = (n - values.len() as f64).max(0.0);

    let mean = values.iter().sum::<f64>() / n;
    let sum_sq_diff: f64 =
        values.iter().map(|d| (d - mean).powi(2)).sum::<f64>() + absent * mean * mean;
    let s2 = sum_sq_diff / (n - 1.0);

    let mut term = stratum.represented_area().powi(2) / n * s2;
    if finite_population_correction {
        if let Some(population) = stratum.population_units.filter(|p| *p > 0.0) {
            term *= (1.0 - n / population).max(0.0);
        }
    }
    term
}
