//! Stratification Cache - reuse of the stratum join across estimator calls
//!
//! Building the plot → stratum lookup is the most expensive table pass of an estimate,
//! and consecutive estimates usually share their evaluations. The cache holds the
//! lookup for one evaluation set, keyed by its sorted EVALIDs. Asking for a different
//! set replaces the entry.

use std::sync::Arc;

use crate::error::Result;
use crate::estimation::stratification::Stratification;

/// Single-entry cache of the stratification for one EVALID set
#[derive(Debug, Default)]
pub struct StratificationCache {
    entry: Option<(Vec<i64>, Arc<Stratification>)>,
    hits: u64,
    misses: u64,
}

impl StratificationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached stratification for `evalids`, if it is the current entry
    pub fn get(&self, evalids: &[i64]) -> Option<Arc<Stratification>> {
        let key = cache_key(evalids);
        self.entry
            .as_ref()
            .filter(|(cached, _)| *cached == key)
            .map(|(_, stratification)| Arc::clone(stratification))
    }

    /// Return the cached stratification or build (and cache) a new one
    ///
    /// A build error leaves the previous entry in place.
    pub fn get_or_build<F>(&mut self, evalids: &[i64], build: F) -> Result<Arc<Stratification>>
    where
        F: FnOnce() -> Result<Stratification>,
    {
        if let Some(stratification) = self.get(evalids) {
            self.hits += 1;
            tracing::debug!("Stratification cache hit for {:?}", evalids);
            return Ok(stratification);
        }

        self.misses += 1;
        let key = cache_key(evalids);
        if let Some((previous, _)) = &self.entry {
            tracing::info!("Evaluations changed from {:?} to {:?}; rebuilding stratification", previous, key);
        }

        let stratification = Arc::new(build()?);
        self.entry = Some((key, Arc::clone(&stratification)));
        Ok(stratification)
    }

    /// Drop the cached entry (e.g. after the population tables changed)
    pub fn invalidate(&mut self) {
        if self.entry.take().is_some() {
            tracing::debug!("Stratification cache invalidated");
        }
    }

    /// EVALIDs of the cached entry
    pub fn cached_evalids(&self) -> Option<&[i64]> {
        self.entry.as_ref().map(|(key, _)| key.as_slice())
    }

    pub fn is_empty(&self) -> bool {
        self.entry.is_none()
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }
}

fn cache_key(evalids: &[i64]) -> Vec<i64> {
    let mut key = evalids.to_vec();
    key.sort_unstable();
    key.dedup();
    key
}
