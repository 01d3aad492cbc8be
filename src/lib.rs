//! Stratified Forest Inventory Estimator
//!
//! Design-based population estimates (trees per acre, basal area, volume, biomass and
//! forest area) from a stratified inventory sample, with stratified sampling errors.
//!
//! Module layout:
//! - `estimation/`: the six estimation stages
//! - `estimator`: coordinator running the stages for one request
//! - `stratification_cache`: reuse of the stratum join across requests
//! - `data`: table loading with Polars
//! - `utils/`: lazy filter helpers and typed column extraction
//!
//! ```no_run
//! use fia_estimator::{EstimateKind, EstimationRequest, InventoryTables, PopulationEstimator};
//!
//! let tables = InventoryTables::load("data/GA")?;
//! let request = EstimationRequest::new(EstimateKind::Tpa)
//!     .evalids(&[132101])
//!     .group_by(["SPCD"]);
//! let result = PopulationEstimator::default().estimate(&tables, &request)?;
//! println!("{}", result.to_dataframe()?);
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod config;
pub mod data;
pub mod diagnostics;
pub mod error;
pub mod estimation;
pub mod estimator;
pub mod stratification_cache;
pub mod utils;

// Re-export commonly used types
pub use config::EstimatorConfig;
pub use data::InventoryTables;
pub use diagnostics::Diagnostic;
pub use error::{EstimationError, Result};
pub use estimation::*;
pub use estimator::{estimate, PopulationEstimator};
pub use stratification_cache::StratificationCache;
