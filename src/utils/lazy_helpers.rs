//! LazyFrame filtering helpers with column validation
//!
//! Provides safe, explicit patterns for narrowing inventory tables before the
//! engine extracts typed rows from them.

use polars::prelude::*;
use rustc_hash::FxHashSet;

use crate::error::{EstimationError, Result};

/// Check that every required column is present
///
/// # Errors
/// Returns `MissingColumn` naming the first absent column.
pub fn require_columns(df: &DataFrame, columns: &[&str], table: &'static str) -> Result<()> {
    for &name in columns {
        if df.column(name).is_err() {
            return Err(EstimationError::MissingColumn {
                table,
                column: name.to_string(),
            });
        }
    }
    Ok(())
}

/// Apply an optional row predicate through the lazy engine
///
/// `None` returns the frame unchanged (cheap clone of the column Arcs).
pub fn apply_filter(df: &DataFrame, predicate: Option<&Expr>) -> Result<DataFrame> {
    match predicate {
        Some(expr) => Ok(df.clone().lazy().filter(expr.clone()).collect()?),
        None => Ok(df.clone()),
    }
}

/// Combine several predicates with AND, skipping the absent ones
pub fn all_of<I>(predicates: I) -> Option<Expr>
where
    I: IntoIterator<Item = Option<Expr>>,
{
    predicates
        .into_iter()
        .flatten()
        .reduce(|acc, expr| acc.and(expr))
}

/// Predicate selecting rows whose EVALID is in `evalids`
pub fn evalid_filter(evalids: &[i64]) -> Option<Expr> {
    evalids
        .iter()
        .map(|&evalid| col("EVALID").eq(lit(evalid)))
        .reduce(|acc, expr| acc.or(expr))
}

/// Filter DataFrame to a set of plots
///
/// # Arguments
/// * `df` - DataFrame to filter (must have the plot ID column)
/// * `plot_ids` - Plot CNs to keep
/// * `id_col_name` - Name of the ID column (`PLT_CN` or `CN`)
/// * `table` - Table name for error messages
pub fn filter_to_plots(
    df: &DataFrame,
    plot_ids: &FxHashSet<String>,
    id_col_name: &str,
    table: &'static str,
) -> Result<DataFrame> {
    require_columns(df, &[id_col_name], table)?;

    let ids = df.column(id_col_name)?.cast(&DataType::String)?;
    let mask: BooleanChunked = ids
        .str()?
        .into_iter()
        .map(|opt| opt.map_or(false, |s| plot_ids.contains(s)))
        .collect();

    Ok(df.filter(&mask)?)
}
