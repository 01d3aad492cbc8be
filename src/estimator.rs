//! Population Estimator - Main coordinator for stratified estimates
//!
//! Runs the six estimation stages for one request:
//!
//! 1. Evaluation resolution (explicit EVALIDs or most recent per state)
//! 2. Stratification join (cached per EVALID set)
//! 3. Plot-design adjustment, applied per tree while building plot contributions
//! 4. Ratio of means per group
//! 5. Stratified variance per group
//! 6. Result assembly
//!
//! Stages 4-6 are independent per group and run on the Rayon pool when
//! `EstimatorConfig::parallel` is set. Both paths give identical results.

use rayon::prelude::*;

use crate::config::EstimatorConfig;
use crate::data::InventoryTables;
use crate::error::Result;
use crate::estimation::contributions::{build_contributions, GroupKey, PlotContributions, PlotValues};
use crate::estimation::evaluation::{read_registry, resolve_evaluations, ResolvedEvaluations};
use crate::estimation::ratio_of_means::estimate_ratio;
use crate::estimation::request::EstimationRequest;
use crate::estimation::results::{assemble_group, EstimationResult, GroupEstimate};
use crate::estimation::stratification::{Stratification, StratumInfo};
use crate::estimation::variance::estimate_variance;
use crate::stratification_cache::StratificationCache;

/// Stratified ratio-of-means estimator with a stratification cache
#[derive(Debug, Default)]
pub struct PopulationEstimator {
    config: EstimatorConfig,
    cache: StratificationCache,
}

impl PopulationEstimator {
    pub fn new(config: EstimatorConfig) -> Self {
        Self {
            config,
            cache: StratificationCache::new(),
        }
    }

    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    pub fn cache(&self) -> &StratificationCache {
        &self.cache
    }

    /// Forget the cached stratification (call after replacing population tables)
    pub fn invalidate_cache(&mut self) {
        self.cache.invalidate();
    }

    /// EVALIDs a request will be computed from
    pub fn resolve(
        &self,
        tables: &InventoryTables,
        request: &EstimationRequest,
    ) -> Result<ResolvedEvaluations> {
        let registry = if tables.pop_eval.width() == 0 {
            Vec::new()
        } else {
            read_registry(&tables.pop_eval)?
        };
        resolve_evaluations(&registry, &request.evaluation, request.kind.eval_type())
    }

    /// Compute one estimate
    ///
    /// `tables` may hold a whole inventory: COND, TREE and PLOT rows are narrowed to the
    /// plots assigned to the resolved evaluations before any plot joins a stratum.
    ///
    /// # Errors
    /// Any fatal `EstimationError`; non-fatal conditions are returned as diagnostics.
    pub fn estimate(
        &mut self,
        tables: &InventoryTables,
        request: &EstimationRequest,
    ) -> Result<EstimationResult> {
        // STEP 1: Resolve evaluations
        let resolved = self.resolve(tables, request)?;
        tracing::info!("Estimating {} from EVALID(s) {:?}", request.kind, resolved.evalids);

        let mut diagnostics = resolved.diagnostics;

        // STEP 2: Stratification (cached)
        let stratification = self.cache.get_or_build(&resolved.evalids, || {
            Stratification::build(
                &tables.pop_plot_stratum_assgn,
                &tables.pop_stratum,
                &resolved.evalids,
            )
        })?;
        diagnostics.extend(stratification.diagnostics());

        // STEP 3: Adjusted plot contributions over the evaluation's assigned plots
        let scoped = tables.scope_to_evaluations(&resolved.evalids)?;
        let contributions =
            build_contributions(&scoped, request, &stratification, &self.config, &mut diagnostics)?;

        // STEPS 4-6: Ratio, variance and assembly per group
        let groups = contributions.groups();
        let strata = &stratification.strata;
        let fpc = self.config.finite_population_correction;

        let estimates: Vec<GroupEstimate> = if self.config.parallel {
            groups
                .into_par_iter()
                .map(|key| estimate_group(key, &contributions, strata, fpc))
                .collect()
        } else {
            groups
                .into_iter()
                .map(|key| estimate_group(key, &contributions, strata, fpc))
                .collect()
        };

        for estimate in &estimates {
            diagnostics.extend(estimate.flags.iter().cloned());
        }

        let unreliable = estimates.iter().filter(|e| !e.reliable).count();
        tracing::info!("{} groups estimated ({} unreliable)", estimates.len(), unreliable);
        for diagnostic in diagnostics.iter().filter(|d| d.affects_group()) {
            tracing::debug!("{}", diagnostic);
        }

        Ok(EstimationResult {
            kind: request.kind,
            evalids: resolved.evalids,
            group_columns: request.group_by.clone(),
            totals: request.totals,
            estimates,
            diagnostics,
        })
    }
}

fn estimate_group(
    key: GroupKey,
    contributions: &PlotContributions,
    strata: &[StratumInfo],
    finite_population_correction: bool,
) -> GroupEstimate {
    let empty = PlotValues::default();
    let numerator = contributions.numerators.get(&key).unwrap_or(&empty);
    let denominator = contributions.denominator_for(&key);

    let ratio = estimate_ratio(numerator, denominator, &contributions.plots, strata);
    let variance = estimate_variance(
        numerator,
        denominator,
        &contributions.plots,
        strata,
        &ratio,
        finite_population_correction,
    );

    assemble_group(&contributions.plan.columns, key, numerator, &ratio, &variance, strata)
}

/// Convenience for one-off estimates: a fresh estimator with default configuration
pub fn estimate(tables: &InventoryTables, request: &EstimationRequest) -> Result<EstimationResult> {
    PopulationEstimator::default().estimate(tables, request)
}
