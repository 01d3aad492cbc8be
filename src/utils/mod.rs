//! Utility modules for the estimator
//!
//! Contains shared functionality used across the estimation stages:
//! - LazyFrame helpers: Predicate composition and plot scoping
//! - Columns: Typed extraction of nullable values

pub mod lazy_helpers;
pub mod columns;

// Re-export commonly used helpers
pub use lazy_helpers::{require_columns, apply_filter, all_of, evalid_filter, filter_to_plots};
pub use columns::{f64_values, optional_f64_values, i64_values, key_values, optional_key_values};
