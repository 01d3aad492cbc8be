//! STAGE 4: RATIO OF MEANS
//!
//! Expands plot values to stratum sums and combines strata:
//!
//! ```text
//! Ŷ_h = EXPNS_h · Σ_i y_i        X̂_h = EXPNS_h · Σ_i x_i
//! Ŷ   = Σ_h Ŷ_h                  X̂   = Σ_h X̂_h
//! R   = Ŷ / X̂                    (0 with a DegenerateRatio flag when X̂ = 0)
//! ```
//!
//! The ratio is always a ratio of the summed totals, never an average of stratum ratios.

use crate::estimation::contributions::{PlotUnit, PlotValues};
use crate::estimation::stratification::StratumInfo;

/// Expanded sums of one stratum
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StratumSums {
    pub stratum: usize,
    pub numerator: f64,
    pub denominator: f64,
}

/// Ratio estimate of one group
#[derive(Debug, Clone, PartialEq)]
pub struct RatioEstimate {
    /// Ŷ
    pub numerator_total: f64,
    /// X̂
    pub denominator_total: f64,
    pub ratio: f64,
    /// X̂ was exactly zero
    pub degenerate: bool,
    /// Strata with at least one plot contribution, by stratum index
    pub strata: Vec<StratumSums>,
}

/// Sum expanded plot values by stratum and form the ratio of totals
pub fn estimate_ratio(
    numerator: &PlotValues,
    denominator: Option<&PlotValues>,
    plots: &[PlotUnit],
    strata: &[StratumInfo],
) -> RatioEstimate {
    let mut sums: Vec<Option<StratumSums>> = vec![None; strata.len()];

    let mut accumulate = |values: &PlotValues, is_numerator: bool| {
        for (&plot, &value) in values {
            let stratum = plots[plot].stratum;
            let expanded = value * strata[stratum].expns;
            let entry = sums[stratum].get_or_insert(StratumSums {
                stratum,
                numerator: 0.0,
                denominator: 0.0,
            });
            if is_numerator {
                entry.numerator += expanded;
            } else {
                entry.denominator += expanded;
            }
        }
    };

    accumulate(numerator, true);
    if let Some(denominator) = denominator {
        accumulate(denominator, false);
    }

    let strata: Vec<StratumSums> = sums.into_iter().flatten().collect();
    let numerator_total: f64 = strata.iter().map(|s| s.numerator).sum();
    let denominator_total: f64 = strata.iter().map(|s| s.denominator).sum();

    let degenerate = denominator_total == 0.0;
    let ratio = if degenerate { 0.0 } else { numerator_total / denominator_total };

    RatioEstimate {
        numerator_total,
        denominator_total,
        ratio,
        degenerate,
        strata,
    }
}
