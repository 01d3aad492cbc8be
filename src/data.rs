//! Data Loading and Management
//!
//! Loads the inventory tables the estimator reads, using Polars. Each table is read
//! from `<dir>/<TABLE>.parquet` when present, otherwise `<dir>/<TABLE>.csv`.
//!
//! The evaluation registry is POP_EVAL joined to POP_EVAL_TYP on `CN = EVAL_CN`,
//! giving one row per (EVALID, EVAL_TYP). A POP_EVAL that already carries `EVAL_TYP`
//! is used as-is.

use anyhow::{Context, Result};
use polars::prelude::*;
use rustc_hash::FxHashSet;
use std::path::Path;

use crate::utils::{apply_filter, evalid_filter, filter_to_plots, key_values, require_columns};

/// Input tables of one estimation
#[derive(Debug, Clone, Default)]
pub struct InventoryTables {
    /// One row per measured tree
    pub tree: DataFrame,

    /// One row per plot condition (land class polygon)
    pub cond: DataFrame,

    /// One row per plot visit (MACRO_BREAKPOINT_DIA)
    pub plot: DataFrame,

    /// Stratum metadata (EXPNS, adjustment factors)
    pub pop_stratum: DataFrame,

    /// Plot → stratum assignments per evaluation
    pub pop_plot_stratum_assgn: DataFrame,

    /// Evaluation registry (EVALID, STATECD, EVAL_TYP, END_INVYR)
    pub pop_eval: DataFrame,
}

impl InventoryTables {
    /// Load all tables from a directory
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        tracing::info!("Loading inventory tables from {}", dir.display());

        let tree = load_table(dir, "TREE")?;
        let cond = load_table(dir, "COND")?;
        let plot = load_table(dir, "PLOT")?;
        let pop_stratum = load_table(dir, "POP_STRATUM")?;
        let pop_plot_stratum_assgn = load_table(dir, "POP_PLOT_STRATUM_ASSGN")?;
        let pop_eval = load_table(dir, "POP_EVAL")?;

        let pop_eval = if pop_eval.column("EVAL_TYP").is_ok() {
            pop_eval
        } else {
            let eval_types = load_table(dir, "POP_EVAL_TYP")
                .context("POP_EVAL has no EVAL_TYP column and POP_EVAL_TYP could not be read")?;
            join_eval_types(&pop_eval, &eval_types)?
        };

        tracing::info!(
            "  TREE: {}  COND: {}  PLOT: {}  POP_STRATUM: {}  ASSGN: {}  EVAL: {}",
            tree.height(),
            cond.height(),
            plot.height(),
            pop_stratum.height(),
            pop_plot_stratum_assgn.height(),
            pop_eval.height()
        );

        Ok(Self {
            tree,
            cond,
            plot,
            pop_stratum,
            pop_plot_stratum_assgn,
            pop_eval,
        })
    }

    /// Restrict COND, TREE and PLOT to the plots assigned to `evalids`
    ///
    /// Population tables are left whole; the estimator filters them by EVALID itself.
    pub fn scope_to_evaluations(&self, evalids: &[i64]) -> crate::error::Result<Self> {
        require_columns(&self.pop_plot_stratum_assgn, &["PLT_CN", "EVALID"], "POP_PLOT_STRATUM_ASSGN")?;

        let assignments = apply_filter(&self.pop_plot_stratum_assgn, evalid_filter(evalids).as_ref())?;
        let plots: FxHashSet<String> = key_values(&assignments, "PLT_CN", "POP_PLOT_STRATUM_ASSGN")?
            .into_iter()
            .flatten()
            .collect();

        // Tables that were never loaded (no columns) stay empty
        let scope = |df: &DataFrame, id_col: &str, table: &'static str| {
            if df.width() == 0 {
                Ok(df.clone())
            } else {
                filter_to_plots(df, &plots, id_col, table)
            }
        };

        let scoped = Self {
            tree: scope(&self.tree, "PLT_CN", "TREE")?,
            cond: scope(&self.cond, "PLT_CN", "COND")?,
            plot: scope(&self.plot, "CN", "PLOT")?,
            pop_stratum: self.pop_stratum.clone(),
            pop_plot_stratum_assgn: self.pop_plot_stratum_assgn.clone(),
            pop_eval: self.pop_eval.clone(),
        };

        tracing::debug!(
            "Scoped to {:?}: {} plots, {} conditions, {} trees",
            evalids,
            plots.len(),
            scoped.cond.height(),
            scoped.tree.height()
        );
        Ok(scoped)
    }
}

/// Read `<dir>/<name>.parquet`, falling back to `<dir>/<name>.csv`
fn load_table(dir: &Path, name: &str) -> Result<DataFrame> {
    let parquet = dir.join(format!("{name}.parquet"));
    if parquet.exists() {
        let path = parquet.to_string_lossy().to_string();
        return LazyFrame::scan_parquet(&path, Default::default())
            .with_context(|| format!("Failed to scan parquet: {}", path))?
            .collect()
            .with_context(|| format!("Failed to load {} parquet", name));
    }

    let csv = dir.join(format!("{name}.csv"));
    CsvReadOptions::default()
        .with_has_header(true)
        .try_into_reader_with_file_path(Some(csv.clone()))
        .with_context(|| format!("Failed to create CSV reader: {}", csv.display()))?
        .finish()
        .with_context(|| format!("Failed to load {} CSV", name))
}

/// POP_EVAL ⋈ POP_EVAL_TYP on CN = EVAL_CN (keys compared as strings)
fn join_eval_types(pop_eval: &DataFrame, eval_types: &DataFrame) -> Result<DataFrame> {
    require_columns(pop_eval, &["CN", "EVALID", "STATECD"], "POP_EVAL")?;
    require_columns(eval_types, &["EVAL_CN", "EVAL_TYP"], "POP_EVAL_TYP")?;

    let types = eval_types
        .clone()
        .lazy()
        .select([col("EVAL_CN").cast(DataType::String), col("EVAL_TYP")]);

    pop_eval
        .clone()
        .lazy()
        .with_column(col("CN").cast(DataType::String))
        .join(types, [col("CN")], [col("EVAL_CN")], JoinArgs::new(JoinType::Inner))
        .collect()
        .context("Failed to join POP_EVAL with POP_EVAL_TYP")
}
