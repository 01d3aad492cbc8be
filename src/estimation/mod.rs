//! Estimation stages
//!
//! Each stage is a plain function (or small type) over the previous stage's output:
//! - `evaluation`: EVALID resolution
//! - `stratification`: plot → stratum join with de-duplication
//! - `adjustment`: plot-design adjustment factors
//! - `contributions`: tree → plot aggregation by grouping key
//! - `ratio_of_means`: stratum sums and the ratio of totals
//! - `variance`: stratified residual variance
//! - `results`: per-group estimates and the output table
//! - `request`: what the caller asks for

pub mod adjustment;
pub mod contributions;
pub mod evaluation;
pub mod ratio_of_means;
pub mod request;
pub mod results;
pub mod stratification;
pub mod variance;

pub use adjustment::{adjusted_tpa, basal_area_sqft, classify_tree, AdjustmentFactors, PlotSize};
pub use contributions::{GroupKey, SIZE_CLASS};
pub use evaluation::{EvalType, EvaluationSelector};
pub use request::{parse_domain, EstimateKind, EstimationRequest, LandType, TreeType};
pub use results::{EstimationResult, GroupEstimate};
pub use stratification::{Stratification, StratumInfo};
