//! STAGE 2: STRATIFICATION JOIN
//!
//! Attaches each plot to its stratum (expansion factor, adjustment factors) for the
//! resolved evaluation(s).
//!
//! Source data is known to contain duplicate stratum-assignment rows for a single
//! plot; joining them as-is doubles area and tree totals. De-duplication by
//! (plot, stratum) and by stratum CN therefore always runs, before any join.
//!
//! **Columns needed**:
//!   - POP_PLOT_STRATUM_ASSGN: PLT_CN, STRATUM_CN, EVALID
//!   - POP_STRATUM: CN, EXPNS, ADJ_FACTOR_MICR, ADJ_FACTOR_SUBP, ADJ_FACTOR_MACR
//!     (optional ESTN_UNIT_CN, EVALID, P1POINTCNT)

use polars::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::config::EstimatorConfig;
use crate::diagnostics::Diagnostic;
use crate::error::{EstimationError, Result};
use crate::estimation::adjustment::AdjustmentFactors;
use crate::utils::{
    apply_filter, evalid_filter, f64_values, i64_values, key_values, optional_f64_values,
    optional_key_values, require_columns,
};

pub const REQUIRED_ASSIGNMENT_COLS: &[&str] = &["PLT_CN", "STRATUM_CN", "EVALID"];

pub const REQUIRED_STRATUM_COLS: &[&str] = &[
    "CN",
    "EXPNS",
    "ADJ_FACTOR_MICR",
    "ADJ_FACTOR_SUBP",
    "ADJ_FACTOR_MACR",
];

/// Plot IDs quoted in an `UnmatchedPlotsDropped` diagnostic
const UNMATCHED_EXAMPLES: usize = 5;

/// Stratum metadata after de-duplication
#[derive(Debug, Clone, PartialEq)]
pub struct StratumInfo {
    pub cn: String,
    pub estn_unit_cn: Option<String>,
    /// Acres represented by one sampled plot
    pub expns: f64,
    pub adjustment: AdjustmentFactors,
    /// Distinct plots assigned to the stratum (n_h)
    pub sampled_plots: usize,
    /// Population size for the finite-population correction, when tracked
    pub population_units: Option<f64>,
}

impl StratumInfo {
    /// Acres represented by the whole stratum (EXPNS × n_h)
    pub fn represented_area(&self) -> f64 {
        self.expns * self.sampled_plots as f64
    }
}

/// Plot → stratum lookup for one set of evaluations
#[derive(Debug, Clone)]
pub struct Stratification {
    pub evalids: Vec<i64>,
    pub strata: Vec<StratumInfo>,
    plot_strata: FxHashMap<String, usize>,
    pub duplicate_assignments: usize,
    pub duplicate_strata: usize,
}

/// Plots of the current request that were joined to a stratum
#[derive(Debug, Clone)]
pub struct JoinedPlots {
    /// Plot CN → stratum index
    pub matched: FxHashMap<String, usize>,
    /// Plot CNs (sorted) with no stratum
    pub unmatched: Vec<String>,
}

impl Stratification {
    /// De-duplicate and join assignment rows to stratum rows for `evalids`
    ///
    /// # Errors
    /// - `MissingColumn` when an input table lacks a required column
    /// - `ConflictingStratumAssignment` when one plot maps to two strata
    pub fn build(assignments: &DataFrame, strata: &DataFrame, evalids: &[i64]) -> Result<Self> {
        require_columns(assignments, REQUIRED_ASSIGNMENT_COLS, "POP_PLOT_STRATUM_ASSGN")?;
        require_columns(strata, REQUIRED_STRATUM_COLS, "POP_STRATUM")?;

        // STEP 1: Restrict both tables to the evaluation(s)
        let eval_filter = evalid_filter(evalids);
        let assignments = apply_filter(assignments, eval_filter.as_ref())?;
        let strata = if strata.column("EVALID").is_ok() {
            apply_filter(strata, eval_filter.as_ref())?
        } else {
            strata.clone()
        };

        // STEP 2: De-duplicate stratum rows by CN (first row wins)
        let (strata, duplicate_strata) = read_strata(&strata)?;
        let stratum_index: FxHashMap<&str, usize> = strata
            .iter()
            .enumerate()
            .map(|(idx, s)| (s.cn.as_str(), idx))
            .collect();

        // STEP 3: De-duplicate assignments by (plot, stratum) and join
        let plots = key_values(&assignments, "PLT_CN", "POP_PLOT_STRATUM_ASSGN")?;
        let stratum_cns = key_values(&assignments, "STRATUM_CN", "POP_PLOT_STRATUM_ASSGN")?;
        let assignment_evalids = i64_values(&assignments, "EVALID", "POP_PLOT_STRATUM_ASSGN")?;

        let mut seen: FxHashSet<(String, String)> = FxHashSet::default();
        let mut assigned_stratum: FxHashMap<String, String> = FxHashMap::default();
        let mut duplicate_assignments = 0usize;

        for ((plot, stratum), evalid) in plots.into_iter().zip(stratum_cns).zip(assignment_evalids) {
            let (Some(plot), Some(stratum)) = (plot, stratum) else { continue };

            if !seen.insert((plot.clone(), stratum.clone())) {
                duplicate_assignments += 1;
                continue;
            }

            if let Some(first) = assigned_stratum.get(&plot) {
                return Err(EstimationError::ConflictingStratumAssignment {
                    plot,
                    evalid: evalid.unwrap_or_default(),
                    first: first.clone(),
                    second: stratum,
                });
            }
            assigned_stratum.insert(plot, stratum);
        }

        let mut plot_strata: FxHashMap<String, usize> = FxHashMap::default();
        let mut counts = vec![0usize; strata.len()];
        for (plot, stratum) in assigned_stratum {
            // Assignments to strata without metadata leave the plot unmatched
            if let Some(&idx) = stratum_index.get(stratum.as_str()) {
                counts[idx] += 1;
                plot_strata.insert(plot, idx);
            }
        }

        let strata = strata
            .into_iter()
            .zip(counts)
            .map(|(stratum, sampled_plots)| StratumInfo { sampled_plots, ..stratum })
            .collect::<Vec<_>>();

        if duplicate_assignments > 0 || duplicate_strata > 0 {
            tracing::warn!(
                "Removed {} duplicate assignment rows and {} duplicate stratum rows",
                duplicate_assignments, duplicate_strata
            );
        }
        tracing::debug!(
            "Stratification for {:?}: {} strata, {} plots",
            evalids, strata.len(), plot_strata.len()
        );

        let mut evalids = evalids.to_vec();
        evalids.sort_unstable();

        Ok(Self {
            evalids,
            strata,
            plot_strata,
            duplicate_assignments,
            duplicate_strata,
        })
    }

    /// Stratum index of a plot
    pub fn stratum_of(&self, plot_cn: &str) -> Option<usize> {
        self.plot_strata.get(plot_cn).copied()
    }

    /// Number of plots with a stratum
    pub fn plot_count(&self) -> usize {
        self.plot_strata.len()
    }

    /// De-duplication diagnostics (empty when the source was clean)
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();
        if self.duplicate_assignments > 0 {
            diagnostics.push(Diagnostic::DuplicateAssignmentsRemoved {
                rows: self.duplicate_assignments,
            });
        }
        if self.duplicate_strata > 0 {
            diagnostics.push(Diagnostic::DuplicateStrataRemoved {
                rows: self.duplicate_strata,
            });
        }
        diagnostics
    }

    /// Inner-join the request's plots to their strata
    ///
    /// Unmatched plots are dropped and reported; past the configured share the
    /// join fails with `StructuralJoin`.
    pub fn attach_plots<'a, I>(
        &self,
        plot_cns: I,
        config: &EstimatorConfig,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<JoinedPlots>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut candidates: Vec<&str> = plot_cns.into_iter().collect();
        candidates.sort_unstable();
        candidates.dedup();

        let mut matched = FxHashMap::default();
        let mut unmatched = Vec::new();
        for plot in &candidates {
            match self.stratum_of(plot) {
                Some(idx) => {
                    matched.insert(plot.to_string(), idx);
                }
                None => unmatched.push(plot.to_string()),
            }
        }

        if !unmatched.is_empty() {
            let limit = config.unmatched_plot_limit(candidates.len());
            if unmatched.len() > limit {
                return Err(EstimationError::StructuralJoin {
                    unmatched: unmatched.len(),
                    total: candidates.len(),
                    limit,
                });
            }

            tracing::warn!(
                "Dropping {} of {} plots with no stratum assignment",
                unmatched.len(), candidates.len()
            );
            diagnostics.push(Diagnostic::UnmatchedPlotsDropped {
                plots: unmatched.len(),
                examples: unmatched.iter().take(UNMATCHED_EXAMPLES).cloned().collect(),
            });
        }

        Ok(JoinedPlots { matched, unmatched })
    }
}

/// Read POP_STRATUM rows, keeping the first row per CN
///
/// Null adjustment factors read as 1.0 (no adjustment); rows without a CN or
/// EXPNS cannot expand anything and are skipped.
fn read_strata(df: &DataFrame) -> Result<(Vec<StratumInfo>, usize)> {
    let table = "POP_STRATUM";
    let cns = key_values(df, "CN", table)?;
    let expns = f64_values(df, "EXPNS", table)?;
    let micr = f64_values(df, "ADJ_FACTOR_MICR", table)?;
    let subp = f64_values(df, "ADJ_FACTOR_SUBP", table)?;
    let macr = f64_values(df, "ADJ_FACTOR_MACR", table)?;
    let units = optional_key_values(df, "ESTN_UNIT_CN", table)?;
    let population = optional_f64_values(df, "P1POINTCNT", table)?;

    let mut seen = FxHashSet::default();
    let mut strata = Vec::new();
    let mut duplicates = 0usize;

    for idx in 0..df.height() {
        let (Some(cn), Some(expns)) = (cns[idx].clone(), expns[idx]) else { continue };
        if !seen.insert(cn.clone()) {
            duplicates += 1;
            continue;
        }
        strata.push(StratumInfo {
            cn,
            estn_unit_cn: units.as_ref().and_then(|u| u[idx].clone()),
            expns,
            adjustment: AdjustmentFactors {
                micr: micr[idx].unwrap_or(1.0),
                subp: subp[idx].unwrap_or(1.0),
                macr: macr[idx].unwrap_or(1.0),
            },
            sampled_plots: 0,
            population_units: population.as_ref().and_then(|p| p[idx]),
        });
    }

    Ok((strata, duplicates))
}
