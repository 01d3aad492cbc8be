//! Estimator configuration
//!
//! Loaded from a JSON file (missing keys fall back to defaults) or built in code.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// Share of candidate plots that may lack a stratum before the join is fatal.
    pub max_unmatched_plot_share: f64,

    /// Multiply condition area by ADJ_FACTOR_SUBP / ADJ_FACTOR_MACR (by PROP_BASIS).
    pub adjust_condition_area: bool,

    /// Apply (1 - n_h / P_h) when POP_STRATUM carries a population size.
    pub finite_population_correction: bool,

    /// Compute groups on the rayon thread pool.
    pub parallel: bool,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            max_unmatched_plot_share: 0.05,
            adjust_condition_area: false,
            finite_population_correction: false,
            parallel: true,
        }
    }
}

impl EstimatorConfig {
    /// Load configuration from JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read estimator config: {:?}", path))?;

        let config: EstimatorConfig = serde_json::from_str(&contents)
            .with_context(|| "Failed to parse estimator config JSON")?;

        if !(0.0..=1.0).contains(&config.max_unmatched_plot_share) {
            anyhow::bail!(
                "max_unmatched_plot_share must be within [0, 1], got {}",
                config.max_unmatched_plot_share
            );
        }

        Ok(config)
    }

    /// Number of unmatched plots tolerated out of `total` candidates
    pub fn unmatched_plot_limit(&self, total: usize) -> usize {
        (self.max_unmatched_plot_share * total as f64).floor() as usize
    }
}
