//! Fatal error taxonomy for the estimation engine
//!
//! Structural and data-integrity problems stop the computation and surface here.
//! Statistical edge cases (small samples, zero areas) are NOT errors: they travel
//! with the result as [`crate::diagnostics::Diagnostic`] records.

use polars::prelude::PolarsError;
use thiserror::Error;

use crate::estimation::evaluation::EvalType;

#[derive(Error, Debug)]
pub enum EstimationError {
    #[error("No {eval_type} evaluation found for state {state}")]
    MissingEvaluation { state: i64, eval_type: EvalType },

    #[error("Evaluations {first} and {second} are both {eval_type} evaluations for state {state} and must not be combined")]
    OverlappingEvaluations {
        state: i64,
        eval_type: String,
        first: i64,
        second: i64,
    },

    #[error("{unmatched} of {total} plots have no stratum assignment (limit {limit})")]
    StructuralJoin {
        unmatched: usize,
        total: usize,
        limit: usize,
    },

    #[error("Plot {plot} is assigned to strata {first} and {second} in evaluation {evalid}")]
    ConflictingStratumAssignment {
        plot: String,
        evalid: i64,
        first: String,
        second: String,
    },

    #[error("{table} is missing required column '{column}'")]
    MissingColumn { table: &'static str, column: String },

    #[error("Grouping column '{0}' not found in TREE or COND")]
    UnknownGroupingColumn(String),

    #[error("Area estimates can only be grouped by COND columns; '{0}' is a TREE column")]
    TreeColumnInAreaGrouping(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Cannot parse '{value}' as {what}")]
    Parse { what: &'static str, value: String },

    #[error(transparent)]
    Polars(#[from] PolarsError),
}

pub type Result<T> = std::result::Result<T, EstimationError>;
