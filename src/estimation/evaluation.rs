//! STAGE 1: EVALUATION RESOLUTION
//!
//! Picks the EVALID(s) an estimate is computed from. An explicit selection is used
//! verbatim; otherwise the most recent evaluation of the requested type is chosen
//! per state and the automatic choice is reported as a diagnostic, because
//! summing the wrong (or several overlapping) evaluations silently inflates totals.
//!
//! **Registry columns**: EVALID, STATECD, EVAL_TYP, END_INVYR (END_INVYR optional)

use polars::prelude::*;
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::diagnostics::Diagnostic;
use crate::error::{EstimationError, Result};
use crate::utils::{i64_values, key_values, require_columns};

/// Evaluation type codes of the inventory's evaluation registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EvalType {
    /// EXPALL: all sampled land
    All,
    /// EXPCURR: current area
    CurrentArea,
    /// EXPVOL: current volume, biomass and tree counts
    Volume,
    /// EXPGROW: growth
    Growth,
    /// EXPMORT: mortality
    Mortality,
    /// EXPREMV: removals
    Removals,
}

impl EvalType {
    pub fn code(&self) -> &'static str {
        match self {
            EvalType::All => "EXPALL",
            EvalType::CurrentArea => "EXPCURR",
            EvalType::Volume => "EXPVOL",
            EvalType::Growth => "EXPGROW",
            EvalType::Mortality => "EXPMORT",
            EvalType::Removals => "EXPREMV",
        }
    }
}

impl fmt::Display for EvalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for EvalType {
    type Err = EstimationError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "EXPALL" => Ok(EvalType::All),
            "EXPCURR" => Ok(EvalType::CurrentArea),
            "EXPVOL" => Ok(EvalType::Volume),
            "EXPGROW" => Ok(EvalType::Growth),
            "EXPMORT" => Ok(EvalType::Mortality),
            "EXPREMV" => Ok(EvalType::Removals),
            _ => Err(EstimationError::Parse {
                what: "evaluation type",
                value: s.to_string(),
            }),
        }
    }
}

/// How the caller chooses the evaluation
#[derive(Debug, Clone, PartialEq)]
pub enum EvaluationSelector {
    /// Use these EVALIDs verbatim
    Explicit(Vec<i64>),
    /// Most recent evaluation of the estimate's type per state (empty = every state)
    MostRecent { states: Vec<i64> },
}

/// One row of the evaluation registry
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationRecord {
    pub evalid: i64,
    pub statecd: i64,
    pub eval_type: Option<EvalType>,
    pub end_invyr: Option<i64>,
}

/// Result of stage 1
#[derive(Debug, Clone)]
pub struct ResolvedEvaluations {
    /// Sorted, distinct EVALIDs
    pub evalids: Vec<i64>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Read the registry into typed records (unknown EVAL_TYP codes are kept as `None`)
pub fn read_registry(registry: &DataFrame) -> Result<Vec<EvaluationRecord>> {
    require_columns(registry, &["EVALID", "STATECD", "EVAL_TYP"], "POP_EVAL")?;

    let evalids = i64_values(registry, "EVALID", "POP_EVAL")?;
    let states = i64_values(registry, "STATECD", "POP_EVAL")?;
    let types = key_values(registry, "EVAL_TYP", "POP_EVAL")?;
    let end_years = if registry.column("END_INVYR").is_ok() {
        i64_values(registry, "END_INVYR", "POP_EVAL")?
    } else {
        vec![None; registry.height()]
    };

    let records = evalids
        .into_iter()
        .zip(states)
        .zip(types)
        .zip(end_years)
        .filter_map(|(((evalid, state), eval_type), end_invyr)| {
            Some(EvaluationRecord {
                evalid: evalid?,
                statecd: state?,
                eval_type: eval_type.and_then(|t| t.parse().ok()),
                end_invyr,
            })
        })
        .collect();

    Ok(records)
}

/// Resolve the selector against the registry
///
/// # Errors
/// - `MissingEvaluation` when a requested state has no evaluation of `eval_type`
/// - `OverlappingEvaluations` when explicit EVALIDs share a state and type
/// - `InvalidRequest` for an empty explicit list
pub fn resolve_evaluations(
    registry: &[EvaluationRecord],
    selector: &EvaluationSelector,
    eval_type: EvalType,
) -> Result<ResolvedEvaluations> {
    match selector {
        EvaluationSelector::Explicit(evalids) => resolve_explicit(registry, evalids),
        EvaluationSelector::MostRecent { states } => resolve_most_recent(registry, states, eval_type),
    }
}

fn resolve_explicit(registry: &[EvaluationRecord], evalids: &[i64]) -> Result<ResolvedEvaluations> {
    if evalids.is_empty() {
        return Err(EstimationError::InvalidRequest(
            "explicit evaluation selection is empty".to_string(),
        ));
    }

    let mut evalids = evalids.to_vec();
    evalids.sort_unstable();
    evalids.dedup();

    // Two chosen evaluations of the same type in one state cover the same plots
    let mut seen: FxHashMap<(i64, EvalType), i64> = FxHashMap::default();
    for &evalid in &evalids {
        for record in registry.iter().filter(|r| r.evalid == evalid) {
            let Some(eval_type) = record.eval_type else { continue };
            if let Some(&first) = seen.get(&(record.statecd, eval_type)) {
                if first != evalid {
                    return Err(EstimationError::OverlappingEvaluations {
                        state: record.statecd,
                        eval_type: eval_type.to_string(),
                        first,
                        second: evalid,
                    });
                }
            }
            seen.insert((record.statecd, eval_type), evalid);
        }
    }

    Ok(ResolvedEvaluations {
        evalids,
        diagnostics: Vec::new(),
    })
}

fn resolve_most_recent(
    registry: &[EvaluationRecord],
    states: &[i64],
    eval_type: EvalType,
) -> Result<ResolvedEvaluations> {
    let mut states = if states.is_empty() {
        registry.iter().map(|r| r.statecd).collect::<Vec<_>>()
    } else {
        states.to_vec()
    };
    states.sort_unstable();
    states.dedup();

    if states.is_empty() {
        return Err(EstimationError::InvalidRequest(
            "evaluation registry is empty and no state was requested".to_string(),
        ));
    }

    let mut evalids = Vec::with_capacity(states.len());
    let mut diagnostics = Vec::with_capacity(states.len());

    for state in states {
        let latest = registry
            .iter()
            .filter(|r| r.statecd == state && r.eval_type == Some(eval_type))
            .max_by_key(|r| (r.end_invyr.unwrap_or(i64::MIN), r.evalid))
            .ok_or(EstimationError::MissingEvaluation { state, eval_type })?;

        tracing::warn!(
            "No EVALID given: using {} evaluation {} for state {}",
            eval_type, latest.evalid, state
        );

        evalids.push(latest.evalid);
        diagnostics.push(Diagnostic::AutoSelectedEvaluation {
            state,
            evalid: latest.evalid,
            eval_type,
            end_invyr: latest.end_invyr,
        });
    }

    evalids.sort_unstable();
    evalids.dedup();

    Ok(ResolvedEvaluations { evalids, diagnostics })
}
