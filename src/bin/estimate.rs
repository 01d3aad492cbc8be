// Estimate Binary Entry Point
//
// Purpose: Run one population estimate over inventory tables in a directory
// Usage: DATA_DIR=data/GA ESTIMATE=tpa GROUP_BY=SPCD cargo run --release --bin estimate

use anyhow::Context;
use fia_estimator::{
    parse_domain, EstimateKind, EstimationRequest, EstimatorConfig, InventoryTables, LandType,
    PopulationEstimator, TreeType,
};
use std::path::Path;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_list(name: &str) -> Vec<String> {
    std::env::var(name)
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

fn env_ids(name: &str) -> anyhow::Result<Vec<i64>> {
    env_list(name)
        .iter()
        .map(|s| s.parse::<i64>().with_context(|| format!("{}: '{}' is not an integer", name, s)))
        .collect()
}

fn main() -> anyhow::Result<()> {
    // Initialize tracing (structured logging)
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| {
                    // Default log level: info for our crate, warn for others
                    "fia_estimator=info,warn".into()
                }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Configuration from environment variables
    let data_dir = env_or("DATA_DIR", "data");
    let kind: EstimateKind = env_or("ESTIMATE", "tpa").parse()?;
    let land_type: LandType = env_or("LAND_TYPE", "forest").parse()?;
    let tree_type: TreeType = env_or("TREE_TYPE", "live").parse()?;
    let totals = matches!(env_or("TOTALS", "false").to_lowercase().as_str(), "1" | "true" | "yes");
    let evalids = env_ids("EVALID")?;
    let states = env_ids("STATES")?;
    let group_by = env_list("GROUP_BY");

    let config = match std::env::var("CONFIG") {
        Ok(path) => EstimatorConfig::load(Path::new(&path))?,
        Err(_) => EstimatorConfig::default(),
    };

    tracing::info!("Configuration:");
    tracing::info!("  DATA_DIR: {}", data_dir);
    tracing::info!("  ESTIMATE: {}", kind);
    tracing::info!("  GROUP_BY: {:?}", group_by);
    tracing::info!("  {:?}", config);

    let mut request = EstimationRequest::new(kind)
        .land_type(land_type)
        .tree_type(tree_type)
        .group_by(group_by)
        .totals(totals);
    request = if evalids.is_empty() {
        request.most_recent(&states)
    } else {
        request.evalids(&evalids)
    };
    if let Ok(domain) = std::env::var("TREE_DOMAIN") {
        request = request.tree_domain(parse_domain(&domain)?);
    }
    if let Ok(domain) = std::env::var("AREA_DOMAIN") {
        request = request.area_domain(parse_domain(&domain)?);
    }

    let tables = InventoryTables::load(&data_dir)?;
    let mut estimator = PopulationEstimator::new(config);
    let result = estimator.estimate(&tables, &request)?;

    if !result.is_reliable() {
        tracing::warn!("Some groups have no usable sampling error; see FLAGS");
    }

    println!("{}", result.to_dataframe()?);
    if !result.diagnostics.is_empty() {
        println!("{}", serde_json::to_string_pretty(&result.diagnostics)?);
    }

    Ok(())
}
