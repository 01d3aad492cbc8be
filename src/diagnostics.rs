//! Structured, non-fatal diagnostics
//!
//! Every warning raised while producing an estimate is recorded as a [`Diagnostic`]
//! and returned with the result, so callers (and tests) can assert on them without
//! capturing log output.

use serde::Serialize;
use std::fmt;

use crate::estimation::evaluation::EvalType;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    /// No EVALID was supplied; the most recent evaluation was chosen.
    AutoSelectedEvaluation {
        state: i64,
        evalid: i64,
        eval_type: EvalType,
        end_invyr: Option<i64>,
    },

    /// Duplicate (plot, stratum) assignment rows were removed before joining.
    DuplicateAssignmentsRemoved { rows: usize },

    /// Duplicate stratum metadata rows were removed before joining.
    DuplicateStrataRemoved { rows: usize },

    /// Plots without a stratum were dropped from the estimate.
    UnmatchedPlotsDropped { plots: usize, examples: Vec<String> },

    /// A contributing stratum had fewer than two sampled plots.
    InsufficientSample { group: String, strata: Vec<String> },

    /// The denominator was exactly zero; the ratio was forced to zero.
    DegenerateRatio { group: String },
}

impl Diagnostic {
    /// True for diagnostics that mark a single group's figures as unreliable
    pub fn affects_group(&self) -> bool {
        matches!(
            self,
            Diagnostic::InsufficientSample { .. } | Diagnostic::DegenerateRatio { .. }
        )
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::AutoSelectedEvaluation { state, evalid, eval_type, end_invyr } => {
                write!(f, "auto-selected {} evaluation {} for state {}", eval_type, evalid, state)?;
                if let Some(year) = end_invyr {
                    write!(f, " (END_INVYR {})", year)?;
                }
                Ok(())
            }
            Diagnostic::DuplicateAssignmentsRemoved { rows } => {
                write!(f, "removed {} duplicate stratum assignment rows", rows)
            }
            Diagnostic::DuplicateStrataRemoved { rows } => {
                write!(f, "removed {} duplicate stratum rows", rows)
            }
            Diagnostic::UnmatchedPlotsDropped { plots, .. } => {
                write!(f, "dropped {} plots with no stratum assignment", plots)
            }
            Diagnostic::InsufficientSample { group, strata } => {
                write!(f, "group {}: fewer than 2 plots in strata {}", group, strata.join(","))
            }
            Diagnostic::DegenerateRatio { group } => {
                write!(f, "group {}: zero denominator, ratio set to 0", group)
            }
        }
    }
}
