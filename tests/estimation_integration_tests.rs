//! End-to-end estimates over a small synthetic inventory
//!
//! Default layout: plots p1, p2 in stratum A (EXPNS 100) and p3, p4 in stratum B
//! (EXPNS 200), one fully forested condition per plot, 600 acres in total. Every plot
//! holds the same two trees (SPCD 131 at 10", SPCD 802 at 14", 6 TPA each), so every
//! plot carries 12 TPA and all within-stratum variances are zero.

use approx::assert_relative_eq;
use fia_estimator::{
    parse_domain, Diagnostic, EstimateKind, EstimationError, EstimationRequest, EstimatorConfig,
    InventoryTables, LandType, PopulationEstimator, TreeType, SIZE_CLASS,
};
use polars::prelude::*;
use std::f64::consts::PI;

const EVALID: i64 = 132101;

fn default_plots() -> Vec<(&'static str, &'static str)> {
    vec![("p1", "A"), ("p2", "A"), ("p3", "B"), ("p4", "B")]
}

/// Inventory with the given (plot, stratum) assignments
fn inventory(assignments: &[(&str, &str)]) -> InventoryTables {
    let plots: Vec<&str> = assignments.iter().map(|(p, _)| *p).collect();
    let strata: Vec<&str> = assignments.iter().map(|(_, s)| *s).collect();
    let n = plots.len();

    let tree_plots: Vec<&str> = plots.iter().flat_map(|p| [*p, *p]).collect();
    let spcd: Vec<i64> = (0..n).flat_map(|_| [131i64, 802]).collect();
    let dia: Vec<f64> = (0..n).flat_map(|_| [10.0, 14.0]).collect();
    let volume: Vec<f64> = (0..n).flat_map(|_| [10.0, 20.0]).collect();
    let biomass: Vec<f64> = (0..n).flat_map(|_| [200.0, 400.0]).collect();

    InventoryTables {
        tree: df![
            "PLT_CN" => tree_plots,
            "CONDID" => vec![1i64; 2 * n],
            "SPCD" => spcd,
            "DIA" => dia,
            "TPA_UNADJ" => vec![6.0; 2 * n],
            "STATUSCD" => vec![1i64; 2 * n],
            "TREECLCD" => vec![2i64; 2 * n],
            "VOLCFNET" => volume,
            "DRYBIO_AG" => biomass,
        ]
        .unwrap(),
        cond: df![
            "PLT_CN" => plots.clone(),
            "CONDID" => vec![1i64; n],
            "CONDPROP_UNADJ" => vec![1.0; n],
            "COND_STATUS_CD" => vec![1i64; n],
            "SITECLCD" => vec![3i64; n],
            "RESERVCD" => vec![0i64; n],
            "OWNGRPCD" => (0..n).map(|i| if i < 2 { 10i64 } else { 40 }).collect::<Vec<_>>(),
            "PROP_BASIS" => vec!["SUBP"; n],
        ]
        .unwrap(),
        plot: df![
            "CN" => plots.clone(),
            "MACRO_BREAKPOINT_DIA" => vec![None::<f64>; n],
        ]
        .unwrap(),
        pop_stratum: df![
            "CN" => &["A", "B"],
            "EVALID" => &[EVALID, EVALID],
            "ESTN_UNIT_CN" => &["U1", "U1"],
            "EXPNS" => &[100.0, 200.0],
            "ADJ_FACTOR_MICR" => &[4.0, 4.0],
            "ADJ_FACTOR_SUBP" => &[1.0, 1.0],
            "ADJ_FACTOR_MACR" => &[1.0, 1.0],
        ]
        .unwrap(),
        pop_plot_stratum_assgn: df![
            "PLT_CN" => plots,
            "STRATUM_CN" => strata,
            "EVALID" => vec![EVALID; n],
        ]
        .unwrap(),
        pop_eval: df![
            "EVALID" => &[EVALID, EVALID, 131901],
            "STATECD" => &[13i64, 13, 13],
            "EVAL_TYP" => &["EXPVOL", "EXPCURR", "EXPVOL"],
            "END_INVYR" => &[2021i64, 2021, 2019],
        ]
        .unwrap(),
    }
}

fn run(tables: &InventoryTables, request: &EstimationRequest) -> fia_estimator::EstimationResult {
    PopulationEstimator::default().estimate(tables, request).unwrap()
}

fn tpa() -> EstimationRequest {
    EstimationRequest::new(EstimateKind::Tpa).evalids(&[EVALID])
}

// ============================================================================
// Core scenario
// ============================================================================

#[test]
fn test_two_strata_scenario() {
    let tables = inventory(&default_plots());
    let result = run(&tables, &tpa().totals(true));

    let overall = result.overall().unwrap();
    assert_relative_eq!(overall.area_total, 600.0);
    assert_relative_eq!(overall.estimate, 12.0);
    assert_relative_eq!(overall.total, 7200.0);
    assert_relative_eq!(overall.variance.unwrap(), 0.0, epsilon = 1e-12);
    assert_relative_eq!(overall.total_se.unwrap(), 0.0, epsilon = 1e-6);
    assert_eq!(overall.n_plots, 4);
    assert_eq!(overall.n_sampled, 4);
    assert!(overall.reliable);
    assert!(result.diagnostics.is_empty());
    assert_eq!(result.evalids, vec![EVALID]);
}

#[test]
fn test_volume_and_biomass() {
    let tables = inventory(&default_plots());

    let volume = run(&tables, &EstimationRequest::new(EstimateKind::Volume).evalids(&[EVALID]));
    assert_relative_eq!(volume.overall().unwrap().estimate, 6.0 * 10.0 + 6.0 * 20.0);

    let biomass = run(&tables, &EstimationRequest::new(EstimateKind::Biomass).evalids(&[EVALID]));
    // 6 · 200 lb + 6 · 400 lb = 3600 lb = 1.8 short tons
    assert_relative_eq!(biomass.overall().unwrap().estimate, 1.8, epsilon = 1e-12);
}

#[test]
fn test_basal_area_identity() {
    let mut tables = inventory(&default_plots());
    tables.tree = df![
        "PLT_CN" => &["p1", "p2", "p3", "p4"],
        "CONDID" => &[1i64, 1, 1, 1],
        "SPCD" => &[131i64, 131, 131, 131],
        "DIA" => &[12.0, 12.0, 12.0, 12.0],
        "TPA_UNADJ" => &[1.0, 1.0, 1.0, 1.0],
        "STATUSCD" => &[1i64, 1, 1, 1],
    ]
    .unwrap();

    let result = run(&tables, &EstimationRequest::new(EstimateKind::Baa).evalids(&[EVALID]));
    assert_relative_eq!(result.overall().unwrap().estimate, 0.785398, epsilon = 1e-6);
}

#[test]
fn test_microplot_trees_use_micr_factor() {
    let mut tables = inventory(&default_plots());
    tables.tree = tables
        .tree
        .clone()
        .lazy()
        .with_column(
            when(col("SPCD").eq(lit(131)))
                .then(lit(3.0))
                .otherwise(col("DIA"))
                .alias("DIA"),
        )
        .collect()
        .unwrap();

    // 6 TPA × 4.0 on the microplot + 6 TPA on the subplot
    let result = run(&tables, &tpa());
    assert_relative_eq!(result.overall().unwrap().estimate, 30.0);
}

/// Three plots in stratum A (EXPNS 100), two in B (EXPNS 150), two 8" trees of
/// 6 TPA on every plot. SPCD 802 grows only on p1 and p4.
fn uneven_species_inventory() -> InventoryTables {
    let mut tables = inventory(&[("p1", "A"), ("p2", "A"), ("p3", "A"), ("p4", "B"), ("p5", "B")]);
    tables.tree = df![
        "PLT_CN" => &["p1", "p1", "p2", "p2", "p3", "p3", "p4", "p4", "p5", "p5"],
        "CONDID" => vec![1i64; 10],
        "SPCD" => &[131i64, 802, 131, 131, 131, 131, 131, 802, 131, 131],
        "DIA" => vec![8.0; 10],
        "TPA_UNADJ" => vec![6.0; 10],
        "STATUSCD" => vec![1i64; 10],
    ]
    .unwrap();
    tables.pop_stratum = df![
        "CN" => &["A", "B"],
        "EVALID" => &[EVALID, EVALID],
        "EXPNS" => &[100.0, 150.0],
        "ADJ_FACTOR_MICR" => &[4.0, 4.0],
        "ADJ_FACTOR_SUBP" => &[1.0, 1.0],
        "ADJ_FACTOR_MACR" => &[1.0, 1.0],
    ]
    .unwrap();
    tables
}

#[test]
fn test_hand_calculated_two_strata() {
    let tables = uneven_species_inventory();
    let result = run(&tables, &tpa().totals(true));

    // 3 × 100 + 2 × 150 acres, 12 TPA on every plot
    let overall = result.overall().unwrap();
    assert_relative_eq!(overall.area_total, 600.0);
    assert_relative_eq!(overall.estimate, 12.0);
    assert_relative_eq!(overall.total, 7200.0);
    assert_relative_eq!(overall.variance.unwrap(), 0.0, epsilon = 1e-12);
    assert_eq!(overall.n_sampled, 5);
}

#[test]
fn test_species_on_some_plots_has_stratified_variance() {
    let tables = uneven_species_inventory();
    let result = run(&tables, &tpa().group_by(["SPCD"]).totals(true));

    // Ŷ = 100·6 + 150·6 = 1500, R = 1500 / 600 = 2.5
    // A: d = (3.5, −2.5, −2.5), s² = 12 → 100² · 3 · 12 = 360 000
    // B: d = (3.5, −2.5),       s² = 18 → 150² · 2 · 18 = 810 000
    let sparse = result.group(&["802"]).unwrap();
    assert_relative_eq!(sparse.estimate, 2.5, epsilon = 1e-12);
    assert_relative_eq!(sparse.total, 1500.0, epsilon = 1e-9);
    assert_relative_eq!(sparse.area_total, 600.0);
    assert_relative_eq!(sparse.variance.unwrap(), 1_170_000.0 / 360_000.0, epsilon = 1e-9);
    assert_relative_eq!(sparse.total_se.unwrap(), 1_170_000f64.sqrt(), epsilon = 1e-6);
    assert_relative_eq!(sparse.cv.unwrap(), 3.25f64.sqrt() / 2.5, epsilon = 1e-9);
    assert_eq!(sparse.n_plots, 2);
    assert!(sparse.reliable);

    // Complementary species: same residual spread around R = 9.5
    let common = result.group(&["131"]).unwrap();
    assert_relative_eq!(common.estimate, 9.5, epsilon = 1e-12);
    assert_relative_eq!(common.variance.unwrap(), 3.25, epsilon = 1e-9);
    assert!(result.is_reliable());
}

#[test]
fn test_macroplot_breakpoint_from_plot_table() {
    let mut tables = inventory(&default_plots());
    tables.pop_stratum = df![
        "CN" => &["A", "B"],
        "EVALID" => &[EVALID, EVALID],
        "EXPNS" => &[100.0, 200.0],
        "ADJ_FACTOR_MICR" => &[4.0, 4.0],
        "ADJ_FACTOR_SUBP" => &[1.0, 1.0],
        "ADJ_FACTOR_MACR" => &[2.0, 2.0],
    ]
    .unwrap();

    let with_breakpoint = |tables: &InventoryTables, breakpoint: f64| {
        let mut tables = tables.clone();
        tables.plot = df![
            "CN" => &["p1", "p2", "p3", "p4"],
            "MACRO_BREAKPOINT_DIA" => &[breakpoint; 4],
        ]
        .unwrap();
        run(&tables, &tpa()).overall().unwrap().estimate
    };

    // 10" tree on the subplot (6), 14" tree on the macroplot (6 × 2)
    assert_relative_eq!(with_breakpoint(&tables, 12.0), 18.0);
    // A tree at the breakpoint is a macroplot tree
    assert_relative_eq!(with_breakpoint(&tables, 14.0), 18.0);
    // Above both trees nothing is on the macroplot
    assert_relative_eq!(with_breakpoint(&tables, 14.5), 12.0);
    // No breakpoint: no macroplot
    assert_relative_eq!(run(&tables, &tpa()).overall().unwrap().estimate, 12.0);
}

// ============================================================================
// Grouping and domains
// ============================================================================

#[test]
fn test_species_groups_add_up() {
    let tables = inventory(&default_plots());
    let whole = run(&tables, &tpa().totals(true));
    let by_species = run(&tables, &tpa().group_by(["SPCD"]).totals(true));

    assert_eq!(by_species.estimates.len(), 2);
    let summed: f64 = by_species.estimates.iter().map(|e| e.total).sum();
    assert_relative_eq!(summed, whole.overall().unwrap().total);

    let pine = by_species.group(&["131"]).unwrap();
    assert_relative_eq!(pine.estimate, 6.0);
    assert_relative_eq!(pine.area_total, 600.0);
}

#[test]
fn test_condition_grouping_divides_by_group_area() {
    let tables = inventory(&default_plots());
    let result = run(&tables, &tpa().group_by(["OWNGRPCD"]));

    let private = result.group(&["40"]).unwrap();
    assert_relative_eq!(private.area_total, 400.0);
    assert_relative_eq!(private.total, 4800.0);
    assert_relative_eq!(private.estimate, 12.0);
}

#[test]
fn test_size_class_grouping() {
    let tables = inventory(&default_plots());
    let result = run(&tables, &tpa().group_by([SIZE_CLASS]));

    assert_eq!(result.estimates.len(), 2);
    assert_relative_eq!(result.group(&["9.0-10.9"]).unwrap().estimate, 6.0);
    assert_relative_eq!(result.group(&["13.0-14.9"]).unwrap().estimate, 6.0);
}

#[test]
fn test_tree_domain_is_monotone() {
    let tables = inventory(&default_plots());
    let whole = run(&tables, &tpa());
    let large = run(&tables, &tpa().tree_domain(parse_domain("DIA >= 12").unwrap()));

    let (whole, large) = (whole.overall().unwrap(), large.overall().unwrap());
    assert!(large.total <= whole.total);
    assert_relative_eq!(large.estimate, 6.0);
}

#[test]
fn test_timberland_excludes_reserved_conditions() {
    let mut tables = inventory(&default_plots());
    tables.cond = tables
        .cond
        .clone()
        .lazy()
        .with_column(
            when(col("PLT_CN").eq(lit("p4")))
                .then(lit(1i64))
                .otherwise(col("RESERVCD"))
                .alias("RESERVCD"),
        )
        .collect()
        .unwrap();

    let result = run(&tables, &tpa().land_type(LandType::Timber).totals(true));
    let overall = result.overall().unwrap();
    assert_relative_eq!(overall.area_total, 400.0);
    assert_relative_eq!(overall.total, 4800.0);
    assert_relative_eq!(overall.estimate, 12.0);
}

#[test]
fn test_area_proportions_by_owner() {
    let tables = inventory(&default_plots());
    let request = EstimationRequest::new(EstimateKind::Area)
        .evalids(&[EVALID])
        .group_by(["OWNGRPCD"])
        .totals(true);
    let result = run(&tables, &request);

    let public = result.group(&["10"]).unwrap();
    assert_relative_eq!(public.total, 200.0);
    assert_relative_eq!(public.area_total, 600.0);
    assert_relative_eq!(public.estimate, 1.0 / 3.0, epsilon = 1e-12);
    assert_relative_eq!(result.group(&["40"]).unwrap().estimate, 2.0 / 3.0, epsilon = 1e-12);

    let df = result.to_dataframe().unwrap();
    assert!(df.column("AREA").is_ok());
    assert!(df.column("AREA_TOTAL").is_ok());
}

#[test]
fn test_area_grouping_rejects_tree_column() {
    let tables = inventory(&default_plots());
    let request = EstimationRequest::new(EstimateKind::Area)
        .evalids(&[EVALID])
        .group_by(["SPCD"]);

    let err = PopulationEstimator::default().estimate(&tables, &request).unwrap_err();
    assert!(matches!(err, EstimationError::TreeColumnInAreaGrouping(_)));
}

// ============================================================================
// Zero results
// ============================================================================

#[test]
fn test_valid_zero_has_no_flag() {
    let tables = inventory(&default_plots());
    let result = run(&tables, &tpa().tree_type(TreeType::Dead));

    let overall = result.overall().unwrap();
    assert_eq!(overall.estimate, 0.0);
    assert!(overall.flags.is_empty());
}

#[test]
fn test_empty_domain_is_degenerate() {
    let tables = inventory(&default_plots());
    let result = run(&tables, &tpa().area_domain(parse_domain("OWNGRPCD = 99").unwrap()));

    let overall = result.overall().unwrap();
    assert_eq!(overall.estimate, 0.0);
    assert!(!overall.reliable);
    assert!(result
        .diagnostics
        .iter()
        .any(|d| matches!(d, Diagnostic::DegenerateRatio { .. })));
}

// ============================================================================
// Data anomalies and sample guards
// ============================================================================

#[test]
fn test_duplicate_rows_do_not_double_totals() {
    let clean = inventory(&default_plots());
    let mut dirty = clean.clone();
    dirty.pop_plot_stratum_assgn = dirty
        .pop_plot_stratum_assgn
        .vstack(&dirty.pop_plot_stratum_assgn.head(Some(2)))
        .unwrap();
    dirty.pop_stratum = dirty.pop_stratum.vstack(&dirty.pop_stratum.head(Some(1))).unwrap();

    let expected = run(&clean, &tpa().totals(true));
    let result = run(&dirty, &tpa().totals(true));

    assert_relative_eq!(result.overall().unwrap().total, expected.overall().unwrap().total);
    assert_relative_eq!(result.overall().unwrap().area_total, 600.0);
    assert!(result
        .diagnostics
        .contains(&Diagnostic::DuplicateAssignmentsRemoved { rows: 2 }));
    assert!(result
        .diagnostics
        .contains(&Diagnostic::DuplicateStrataRemoved { rows: 1 }));
}

#[test]
fn test_single_plot_strata_have_undefined_variance() {
    let tables = inventory(&[("p1", "A"), ("p3", "B")]);
    let result = run(&tables, &tpa());

    let overall = result.overall().unwrap();
    assert_relative_eq!(overall.estimate, 12.0);
    assert_eq!(overall.variance, None);
    assert_eq!(overall.se, None);
    assert!(!overall.reliable);
    assert!(result
        .diagnostics
        .iter()
        .any(|d| matches!(d, Diagnostic::InsufficientSample { strata, .. } if strata.len() == 2)));
}

#[test]
fn test_unmatched_plots_dropped_or_fatal() {
    // p4 is assigned to a stratum with no POP_STRATUM row
    let mut tables = inventory(&default_plots());
    tables.pop_plot_stratum_assgn = tables
        .pop_plot_stratum_assgn
        .clone()
        .lazy()
        .with_column(
            when(col("PLT_CN").eq(lit("p4")))
                .then(lit("C"))
                .otherwise(col("STRATUM_CN"))
                .alias("STRATUM_CN"),
        )
        .collect()
        .unwrap();

    let err = PopulationEstimator::default().estimate(&tables, &tpa()).unwrap_err();
    assert!(matches!(err, EstimationError::StructuralJoin { unmatched: 1, total: 4, .. }));

    let lenient = EstimatorConfig { max_unmatched_plot_share: 0.25, ..Default::default() };
    let result = PopulationEstimator::new(lenient).estimate(&tables, &tpa()).unwrap();
    assert!(result
        .diagnostics
        .iter()
        .any(|d| matches!(d, Diagnostic::UnmatchedPlotsDropped { plots: 1, .. })));
    assert_relative_eq!(result.overall().unwrap().area_total, 400.0);
}

#[test]
fn test_missing_tree_column() {
    let mut tables = inventory(&default_plots());
    tables.tree = tables.tree.drop("TPA_UNADJ").unwrap();

    let err = PopulationEstimator::default().estimate(&tables, &tpa()).unwrap_err();
    assert!(matches!(err, EstimationError::MissingColumn { table: "TREE", .. }));
}

// ============================================================================
// Evaluations and caching
// ============================================================================

#[test]
fn test_auto_selected_evaluation_is_reported() {
    let tables = inventory(&default_plots());
    let request = EstimationRequest::new(EstimateKind::Tpa).most_recent(&[13]);
    let result = run(&tables, &request);

    assert_eq!(result.evalids, vec![EVALID]);
    assert!(result
        .diagnostics
        .iter()
        .any(|d| matches!(d, Diagnostic::AutoSelectedEvaluation { state: 13, evalid: EVALID, .. })));
    assert_relative_eq!(result.overall().unwrap().estimate, 12.0);
}

#[test]
fn test_whole_inventory_ignores_other_evaluations() {
    // p5 belongs only to the older 131901 evaluation
    let mut tables = inventory(&[("p1", "A"), ("p2", "A"), ("p3", "B"), ("p4", "B"), ("p5", "A")]);
    tables.pop_plot_stratum_assgn = tables
        .pop_plot_stratum_assgn
        .clone()
        .lazy()
        .with_column(
            when(col("PLT_CN").eq(lit("p5")))
                .then(lit(131901i64))
                .otherwise(col("EVALID"))
                .alias("EVALID"),
        )
        .collect()
        .unwrap();

    let result = run(&tables, &EstimationRequest::new(EstimateKind::Tpa).most_recent(&[13]).totals(true));

    assert_eq!(result.evalids, vec![EVALID]);
    let overall = result.overall().unwrap();
    assert_relative_eq!(overall.estimate, 12.0);
    assert_relative_eq!(overall.area_total, 600.0);
    assert_eq!(overall.n_sampled, 4);
    assert!(!result
        .diagnostics
        .iter()
        .any(|d| matches!(d, Diagnostic::UnmatchedPlotsDropped { .. })));
}

#[test]
fn test_overlapping_evaluations_rejected() {
    let tables = inventory(&default_plots());
    let err = PopulationEstimator::default()
        .estimate(&tables, &EstimationRequest::new(EstimateKind::Tpa).evalids(&[EVALID, 131901]))
        .unwrap_err();
    assert!(matches!(err, EstimationError::OverlappingEvaluations { state: 13, .. }));
}

#[test]
fn test_stratification_cache_reuse_and_invalidation() {
    let tables = inventory(&default_plots());
    let mut estimator = PopulationEstimator::default();

    estimator.estimate(&tables, &tpa()).unwrap();
    estimator
        .estimate(&tables, &EstimationRequest::new(EstimateKind::Baa).evalids(&[EVALID]))
        .unwrap();
    assert_eq!((estimator.cache().hits(), estimator.cache().misses()), (1, 1));

    estimator.invalidate_cache();
    estimator.estimate(&tables, &tpa()).unwrap();
    assert_eq!(estimator.cache().misses(), 2);
}

#[test]
fn test_parallel_matches_sequential() {
    let tables = inventory(&default_plots());
    let request = tpa().group_by(["SPCD", "OWNGRPCD"]);

    let sequential = EstimatorConfig { parallel: false, ..Default::default() };
    let a = PopulationEstimator::new(sequential).estimate(&tables, &request).unwrap();
    let b = PopulationEstimator::default().estimate(&tables, &request).unwrap();

    assert_eq!(a.estimates, b.estimates);
}

#[test]
fn test_scoping_keeps_estimate() {
    let tables = inventory(&default_plots());
    let scoped = tables.scope_to_evaluations(&[EVALID]).unwrap();
    let result = run(&scoped, &tpa());
    assert_relative_eq!(result.overall().unwrap().estimate, 12.0);

    let basal = run(&tables, &EstimationRequest::new(EstimateKind::Baa).evalids(&[EVALID]));
    let per_plot = 6.0 * PI * (10.0f64 / 24.0).powi(2) + 6.0 * PI * (14.0f64 / 24.0).powi(2);
    assert_relative_eq!(basal.overall().unwrap().estimate, per_plot, epsilon = 1e-9);
}
