//! Typed column extraction
//!
//! The estimator reads Polars columns once into plain vectors. Casting here lets
//! callers supply CNs as integers or strings and measurements as ints or floats.

use polars::prelude::*;

use crate::error::{EstimationError, Result};

fn column<'a>(df: &'a DataFrame, name: &str, table: &'static str) -> Result<&'a Column> {
    df.column(name).map_err(|_| EstimationError::MissingColumn {
        table,
        column: name.to_string(),
    })
}

/// Column as nullable f64 values (NaN is read as null)
pub fn f64_values(df: &DataFrame, name: &str, table: &'static str) -> Result<Vec<Option<f64>>> {
    let cast = column(df, name, table)?.cast(&DataType::Float64)?;
    Ok(cast
        .f64()?
        .into_iter()
        .map(|v| v.filter(|x| !x.is_nan()))
        .collect())
}

/// Like [`f64_values`], but `None` when the column is absent
pub fn optional_f64_values(
    df: &DataFrame,
    name: &str,
    table: &'static str,
) -> Result<Option<Vec<Option<f64>>>> {
    if df.column(name).is_err() {
        return Ok(None);
    }
    f64_values(df, name, table).map(Some)
}

/// Column as nullable i64 values
pub fn i64_values(df: &DataFrame, name: &str, table: &'static str) -> Result<Vec<Option<i64>>> {
    let cast = column(df, name, table)?.cast(&DataType::Int64)?;
    Ok(cast.i64()?.into_iter().collect())
}

/// Column rendered as strings (keys, codes, grouping values)
pub fn key_values(df: &DataFrame, name: &str, table: &'static str) -> Result<Vec<Option<String>>> {
    let cast = column(df, name, table)?.cast(&DataType::String)?;
    Ok(cast
        .str()?
        .into_iter()
        .map(|v| v.map(|s| s.to_string()))
        .collect())
}

/// Like [`key_values`], but `None` when the column is absent
pub fn optional_key_values(
    df: &DataFrame,
    name: &str,
    table: &'static str,
) -> Result<Option<Vec<Option<String>>>> {
    if df.column(name).is_err() {
        return Ok(None);
    }
    key_values(df, name, table).map(Some)
}
