//! STAGE 6: RESULT ASSEMBLY
//!
//! Merges ratio, variance and sample sizes into one `GroupEstimate` per grouping key,
//! and renders the whole result as a Polars table with kind-prefixed columns:
//!
//! | column            | meaning                                   |
//! |-------------------|-------------------------------------------|
//! | `<group columns>` | grouping values (strings, null allowed)   |
//! | `TPA`             | per-acre ratio (area proportion for AREA) |
//! | `TPA_SE`, `TPA_CV`, `TPA_VAR` | sampling error of the ratio   |
//! | `TPA_TOTAL`, `TPA_TOTAL_SE`   | population total (`totals` only) |
//! | `AREA_TOTAL`      | expanded denominator area (acres)         |
//! | `N_PLOTS`         | plots with a non-zero contribution        |
//! | `N_SAMPLED`       | sampled plots in the contributing strata  |
//! | `RELIABLE`        | variance defined and no flags             |
//! | `FLAGS`           | per-group diagnostics, `;`-separated      |

use polars::prelude::*;
use serde::Serialize;

use crate::diagnostics::Diagnostic;
use crate::estimation::contributions::{GroupKey, PlotValues};
use crate::estimation::ratio_of_means::RatioEstimate;
use crate::estimation::request::EstimateKind;
use crate::estimation::stratification::StratumInfo;
use crate::estimation::variance::VarianceEstimate;

/// Estimate for one grouping key
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupEstimate {
    /// Grouping values in request order (empty when ungrouped)
    pub group: GroupKey,
    /// Per-acre ratio R (area proportion for area estimates)
    pub estimate: f64,
    pub variance: Option<f64>,
    pub se: Option<f64>,
    /// SE / |R|, undefined when R = 0
    pub cv: Option<f64>,
    /// Population total Ŷ
    pub total: f64,
    pub total_se: Option<f64>,
    /// Expanded denominator X̂ (acres)
    pub area_total: f64,
    pub n_plots: usize,
    pub n_sampled: usize,
    pub reliable: bool,
    pub flags: Vec<Diagnostic>,
}

/// Human-readable label of a grouping key (`SPCD=131, OWNGRPCD=40`)
pub fn group_label(columns: &[String], key: &GroupKey) -> String {
    if key.is_empty() {
        return "all".to_string();
    }
    columns
        .iter()
        .zip(key.iter())
        .map(|(name, value)| format!("{}={}", name, value.as_deref().unwrap_or("null")))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Combine the stage 4 and stage 5 outputs of one group
pub fn assemble_group(
    columns: &[String],
    group: GroupKey,
    numerator: &PlotValues,
    ratio: &RatioEstimate,
    variance: &VarianceEstimate,
    strata: &[StratumInfo],
) -> GroupEstimate {
    let label = group_label(columns, &group);
    let mut flags = Vec::new();

    if ratio.degenerate {
        flags.push(Diagnostic::DegenerateRatio { group: label.clone() });
    }
    if !variance.insufficient_strata.is_empty() {
        flags.push(Diagnostic::InsufficientSample {
            group: label,
            strata: variance
                .insufficient_strata
                .iter()
                .map(|&idx| strata[idx].cn.clone())
                .collect(),
        });
    }

    let se = variance.ratio_se();
    let cv = match se {
        Some(se) if ratio.ratio != 0.0 => Some(se / ratio.ratio.abs()),
        _ => None,
    };

    GroupEstimate {
        group,
        estimate: ratio.ratio,
        variance: variance.ratio_variance,
        se,
        cv,
        total: ratio.numerator_total,
        total_se: variance.total_se(),
        area_total: ratio.denominator_total,
        n_plots: numerator.values().filter(|v| **v != 0.0).count(),
        n_sampled: ratio.strata.iter().map(|s| strata[s.stratum].sampled_plots).sum(),
        reliable: variance.ratio_variance.is_some() && flags.is_empty(),
        flags,
    }
}

/// Output of one estimator call
#[derive(Debug, Clone, Serialize)]
pub struct EstimationResult {
    pub kind: EstimateKind,
    /// EVALIDs the estimate was computed from
    pub evalids: Vec<i64>,
    pub group_columns: Vec<String>,
    pub totals: bool,
    /// One row per grouping key, sorted by key
    pub estimates: Vec<GroupEstimate>,
    /// Request-level and per-group diagnostics
    pub diagnostics: Vec<Diagnostic>,
}

impl EstimationResult {
    /// The single row of an ungrouped estimate
    pub fn overall(&self) -> Option<&GroupEstimate> {
        self.estimates.iter().find(|e| e.group.is_empty())
    }

    /// Row whose grouping values equal `values`
    pub fn group(&self, values: &[&str]) -> Option<&GroupEstimate> {
        self.estimates.iter().find(|e| {
            e.group.len() == values.len()
                && e.group.iter().zip(values).all(|(g, v)| g.as_deref() == Some(*v))
        })
    }

    pub fn is_reliable(&self) -> bool {
        self.estimates.iter().all(|e| e.reliable)
    }

    /// Render as a Polars DataFrame
    pub fn to_dataframe(&self) -> PolarsResult<DataFrame> {
        let prefix = self.kind.column_prefix();
        let mut columns: Vec<Column> = Vec::new();

        for (pos, name) in self.group_columns.iter().enumerate() {
            let values: Vec<Option<String>> =
                self.estimates.iter().map(|e| e.group[pos].clone()).collect();
            columns.push(Column::new(name.as_str().into(), values));
        }

        let f = |get: fn(&GroupEstimate) -> f64| -> Vec<f64> { self.estimates.iter().map(get).collect() };
        let opt = |get: fn(&GroupEstimate) -> Option<f64>| -> Vec<Option<f64>> {
            self.estimates.iter().map(get).collect()
        };

        columns.push(Column::new(prefix.into(), f(|e| e.estimate)));
        columns.push(Column::new(format!("{prefix}_SE").into(), opt(|e| e.se)));
        columns.push(Column::new(format!("{prefix}_CV").into(), opt(|e| e.cv)));
        columns.push(Column::new(format!("{prefix}_VAR").into(), opt(|e| e.variance)));
        if self.totals {
            columns.push(Column::new(format!("{prefix}_TOTAL").into(), f(|e| e.total)));
            columns.push(Column::new(format!("{prefix}_TOTAL_SE").into(), opt(|e| e.total_se)));
        }
        // Area estimates already carry AREA_TOTAL when totals are on
        if !(self.totals && self.kind == EstimateKind::Area) {
            columns.push(Column::new("AREA_TOTAL".into(), f(|e| e.area_total)));
        }

        let n_plots: Vec<u64> = self.estimates.iter().map(|e| e.n_plots as u64).collect();
        let n_sampled: Vec<u64> = self.estimates.iter().map(|e| e.n_sampled as u64).collect();
        let reliable: Vec<bool> = self.estimates.iter().map(|e| e.reliable).collect();
        let flags: Vec<String> = self
            .estimates
            .iter()
            .map(|e| e.flags.iter().map(|d| d.to_string()).collect::<Vec<_>>().join("; "))
            .collect();

        columns.push(Column::new("N_PLOTS".into(), n_plots));
        columns.push(Column::new("N_SAMPLED".into(), n_sampled));
        columns.push(Column::new("RELIABLE".into(), reliable));
        columns.push(Column::new("FLAGS".into(), flags));

        DataFrame::new(columns)
    }
}
