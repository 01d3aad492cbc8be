//! Plot-level contributions (tree → plot aggregation)
//!
//! Collapses TREE and COND rows into one numerator value `y_i` and one denominator
//! value `x_i` per plot and grouping key. Every later stage works on these plot
//! values only, so the aggregation order tree → plot → stratum → total holds.
//!
//! **Columns needed**:
//!   - TREE: PLT_CN, CONDID, DIA, TPA_UNADJ (+ tree-type, attribute and grouping columns)
//!   - COND: PLT_CN, CONDID, CONDPROP_UNADJ (+ land-type and grouping columns, PROP_BASIS)
//!   - PLOT: CN (MACRO_BREAKPOINT_DIA optional)
//!
//! A tree counts only when its plot joined a stratum and its condition passed the
//! land-type and area-domain filters.

use polars::prelude::*;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::config::EstimatorConfig;
use crate::data::InventoryTables;
use crate::diagnostics::Diagnostic;
use crate::error::{EstimationError, Result};
use crate::estimation::adjustment::{adjusted_tpa, basal_area_sqft};
use crate::estimation::request::{EstimateKind, EstimationRequest};
use crate::estimation::stratification::Stratification;
use crate::utils::{
    all_of, apply_filter, f64_values, i64_values, key_values, optional_f64_values,
    optional_key_values, require_columns,
};

/// Virtual TREE column of 2-inch diameter classes
pub const SIZE_CLASS: &str = "SIZE_CLASS";

pub const REQUIRED_TREE_COLS: &[&str] = &["PLT_CN", "CONDID", "DIA", "TPA_UNADJ"];
pub const REQUIRED_COND_COLS: &[&str] = &["PLT_CN", "CONDID", "CONDPROP_UNADJ"];

/// Pounds per short ton
const LBS_PER_TON: f64 = 2000.0;

/// Values of the grouping columns, in request order (`None` = null)
pub type GroupKey = SmallVec<[Option<String>; 4]>;

/// Plot index → contribution
pub type PlotValues = FxHashMap<usize, f64>;

/// Table a grouping column is read from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupSource {
    Tree,
    Condition,
    SizeClass,
}

/// Resolved grouping columns
#[derive(Debug, Clone)]
pub struct GroupingPlan {
    pub columns: Vec<String>,
    pub sources: Vec<GroupSource>,
    /// Area estimates divide every group by the whole land base
    pub whole_denominator: bool,
}

impl GroupingPlan {
    /// Resolve grouping columns against TREE (first) and COND
    ///
    /// # Errors
    /// - `UnknownGroupingColumn` when neither table has the column
    /// - `TreeColumnInAreaGrouping` when an area estimate groups by a tree column
    pub fn resolve(
        group_by: &[String],
        kind: EstimateKind,
        tree: &DataFrame,
        cond: &DataFrame,
    ) -> Result<Self> {
        let mut sources = Vec::with_capacity(group_by.len());

        for (idx, name) in group_by.iter().enumerate() {
            if group_by[..idx].contains(name) {
                return Err(EstimationError::InvalidRequest(format!(
                    "grouping column {name} listed twice"
                )));
            }

            let in_tree = name == SIZE_CLASS || tree.column(name).is_ok();
            let in_cond = cond.column(name).is_ok();

            let source = if kind.is_tree_based() && name == SIZE_CLASS {
                GroupSource::SizeClass
            } else if kind.is_tree_based() && in_tree {
                GroupSource::Tree
            } else if in_cond {
                GroupSource::Condition
            } else if in_tree {
                return Err(EstimationError::TreeColumnInAreaGrouping(name.clone()));
            } else {
                return Err(EstimationError::UnknownGroupingColumn(name.clone()));
            };
            sources.push(source);
        }

        Ok(Self {
            columns: group_by.to_vec(),
            sources,
            whole_denominator: !kind.is_tree_based(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    fn condition_positions(&self) -> impl Iterator<Item = usize> + '_ {
        self.sources
            .iter()
            .enumerate()
            .filter(|(_, s)| **s == GroupSource::Condition)
            .map(|(pos, _)| pos)
    }

    /// Key of the condition area a group is divided by
    pub fn denominator_key(&self, key: &GroupKey) -> GroupKey {
        if self.whole_denominator {
            return GroupKey::new();
        }
        self.condition_positions().map(|pos| key[pos].clone()).collect()
    }
}

/// 2-inch diameter class label (`5.0-6.9`); stems under 1 inch fall in `0.0-0.9`
pub fn size_class_label(dia: f64) -> String {
    if dia < 1.0 {
        return "0.0-0.9".to_string();
    }
    let lower = ((dia - 1.0) / 2.0).floor() * 2.0 + 1.0;
    format!("{:.1}-{:.1}", lower, lower + 1.9)
}

/// A sampled plot joined to its stratum
#[derive(Debug, Clone, PartialEq)]
pub struct PlotUnit {
    pub cn: String,
    pub stratum: usize,
}

/// Per-plot numerator and denominator values by grouping key
#[derive(Debug, Clone)]
pub struct PlotContributions {
    pub plots: Vec<PlotUnit>,
    pub plan: GroupingPlan,
    pub numerators: FxHashMap<GroupKey, PlotValues>,
    pub denominators: FxHashMap<GroupKey, PlotValues>,
}

impl PlotContributions {
    /// Grouping keys in output order
    pub fn groups(&self) -> Vec<GroupKey> {
        let mut keys: Vec<GroupKey> = self.numerators.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Plot values of the denominator a group is divided by
    pub fn denominator_for(&self, key: &GroupKey) -> Option<&PlotValues> {
        self.denominators.get(&self.plan.denominator_key(key))
    }
}

/// Condition that passed the land-type and area-domain filters
struct DomainCondition {
    plot: usize,
    /// Values of the condition-level grouping columns
    key: GroupKey,
    /// CONDPROP_UNADJ (null reads as 0)
    proportion: f64,
    prop_basis: Option<String>,
}

/// Build plot contributions for one request
///
/// # Errors
/// - `MissingColumn` for absent required columns
/// - `StructuralJoin` when too many plots have no stratum
/// - grouping errors from [`GroupingPlan::resolve`]
pub fn build_contributions(
    tables: &InventoryTables,
    request: &EstimationRequest,
    stratification: &Stratification,
    config: &EstimatorConfig,
    diagnostics: &mut Vec<Diagnostic>,
) -> Result<PlotContributions> {
    let kind = request.kind;

    require_columns(&tables.cond, REQUIRED_COND_COLS, "COND")?;
    require_columns(&tables.cond, request.land_type.required_columns(), "COND")?;
    if kind.is_tree_based() {
        require_columns(&tables.tree, REQUIRED_TREE_COLS, "TREE")?;
        require_columns(&tables.tree, request.tree_type.required_columns(), "TREE")?;
        if let Some(attribute) = kind.tree_attribute() {
            require_columns(&tables.tree, &[attribute], "TREE")?;
        }
    }

    let plan = GroupingPlan::resolve(&request.group_by, kind, &tables.tree, &tables.cond)?;

    // STEP 1: Join the sampled plots (every plot with a condition row) to strata
    let cond_plots = key_values(&tables.cond, "PLT_CN", "COND")?;
    let joined = stratification.attach_plots(
        cond_plots.iter().flatten().map(String::as_str),
        config,
        diagnostics,
    )?;

    let mut plots: Vec<PlotUnit> = joined
        .matched
        .into_iter()
        .map(|(cn, stratum)| PlotUnit { cn, stratum })
        .collect();
    plots.sort_by(|a, b| a.cn.cmp(&b.cn));
    let plot_index: FxHashMap<&str, usize> = plots
        .iter()
        .enumerate()
        .map(|(idx, p)| (p.cn.as_str(), idx))
        .collect();

    // STEP 2: Land base (land type) and domain (land type + area domain) conditions
    let land = apply_filter(&tables.cond, request.land_type.predicate().as_ref())?;
    let domain = apply_filter(&land, request.area_domain.as_ref())?;

    let mut denominators: FxHashMap<GroupKey, PlotValues> = FxHashMap::default();
    let mut numerators: FxHashMap<GroupKey, PlotValues> = FxHashMap::default();

    let domain_conditions = read_conditions(&domain, &plan, &plot_index)?;

    if kind.is_tree_based() {
        for condition in domain_conditions.values() {
            let area = condition_area(condition, &plots, stratification, config);
            add(&mut denominators, condition.key.clone(), condition.plot, area);
        }
    } else {
        let land_conditions = read_conditions(&land, &plan, &plot_index)?;
        for condition in land_conditions.values() {
            let area = condition_area(condition, &plots, stratification, config);
            add(&mut denominators, GroupKey::new(), condition.plot, area);
        }
        for condition in domain_conditions.values() {
            let area = condition_area(condition, &plots, stratification, config);
            add(&mut numerators, condition.key.clone(), condition.plot, area);
        }
    }

    // STEP 3: Adjusted tree values, summed per plot and group
    if kind.is_tree_based() {
        let trees = apply_filter(
            &tables.tree,
            all_of([request.tree_type.predicate(), request.tree_domain.clone()]).as_ref(),
        )?;
        let breakpoints = read_breakpoints(&tables.plot)?;
        accumulate_trees(
            &trees,
            kind,
            &plan,
            &domain_conditions,
            &plots,
            &breakpoints,
            stratification,
            &mut numerators,
        )?;
    }

    // Ungrouped estimates always report one row
    if plan.is_empty() {
        numerators.entry(GroupKey::new()).or_default();
    }

    tracing::debug!(
        "{} plots joined, {} groups, {} denominator keys",
        plots.len(), numerators.len(), denominators.len()
    );

    Ok(PlotContributions {
        plots,
        plan,
        numerators,
        denominators,
    })
}

fn add(target: &mut FxHashMap<GroupKey, PlotValues>, key: GroupKey, plot: usize, value: f64) {
    *target.entry(key).or_default().entry(plot).or_insert(0.0) += value;
}

/// Plot-level area of a condition, adjusted by its PROP_BASIS factor when configured
fn condition_area(
    condition: &DomainCondition,
    plots: &[PlotUnit],
    stratification: &Stratification,
    config: &EstimatorConfig,
) -> f64 {
    if !config.adjust_condition_area {
        return condition.proportion;
    }
    let stratum = &stratification.strata[plots[condition.plot].stratum];
    condition.proportion * stratum.adjustment.for_condition(condition.prop_basis.as_deref())
}

/// COND rows on joined plots, keyed by (PLT_CN, CONDID)
fn read_conditions(
    cond: &DataFrame,
    plan: &GroupingPlan,
    plot_index: &FxHashMap<&str, usize>,
) -> Result<FxHashMap<(String, i64), DomainCondition>> {
    let plots = key_values(cond, "PLT_CN", "COND")?;
    let condids = i64_values(cond, "CONDID", "COND")?;
    let props = f64_values(cond, "CONDPROP_UNADJ", "COND")?;
    let bases = optional_key_values(cond, "PROP_BASIS", "COND")?;

    let group_columns = plan
        .condition_positions()
        .map(|pos| key_values(cond, &plan.columns[pos], "COND"))
        .collect::<Result<Vec<_>>>()?;

    let mut conditions = FxHashMap::default();
    for row in 0..cond.height() {
        let (Some(plot_cn), Some(condid)) = (&plots[row], condids[row]) else { continue };
        let Some(&plot) = plot_index.get(plot_cn.as_str()) else { continue };

        conditions.insert(
            (plot_cn.clone(), condid),
            DomainCondition {
                plot,
                key: group_columns.iter().map(|values| values[row].clone()).collect(),
                proportion: props[row].unwrap_or(0.0),
                prop_basis: bases.as_ref().and_then(|b| b[row].clone()),
            },
        );
    }
    Ok(conditions)
}

/// PLOT CN → macroplot breakpoint diameter
fn read_breakpoints(plot: &DataFrame) -> Result<FxHashMap<String, f64>> {
    if plot.height() == 0 || plot.column("CN").is_err() {
        return Ok(FxHashMap::default());
    }
    let cns = key_values(plot, "CN", "PLOT")?;
    let Some(breakpoints) = optional_f64_values(plot, "MACRO_BREAKPOINT_DIA", "PLOT")? else {
        return Ok(FxHashMap::default());
    };

    Ok(cns
        .into_iter()
        .zip(breakpoints)
        .filter_map(|(cn, bp)| Some((cn?, bp?)))
        .collect())
}

#[allow(clippy::too_many_arguments)]
fn accumulate_trees(
    trees: &DataFrame,
    kind: EstimateKind,
    plan: &GroupingPlan,
    conditions: &FxHashMap<(String, i64), DomainCondition>,
    plots: &[PlotUnit],
    breakpoints: &FxHashMap<String, f64>,
    stratification: &Stratification,
    numerators: &mut FxHashMap<GroupKey, PlotValues>,
) -> Result<()> {
    let plot_cns = key_values(trees, "PLT_CN", "TREE")?;
    let condids = i64_values(trees, "CONDID", "TREE")?;
    let dias = f64_values(trees, "DIA", "TREE")?;
    let tpas = f64_values(trees, "TPA_UNADJ", "TREE")?;
    let attributes = match kind.tree_attribute() {
        Some(name) => Some(f64_values(trees, name, "TREE")?),
        None => None,
    };

    let tree_columns = plan
        .sources
        .iter()
        .zip(&plan.columns)
        .map(|(source, name)| match source {
            GroupSource::Tree => key_values(trees, name, "TREE").map(Some),
            _ => Ok(None),
        })
        .collect::<Result<Vec<_>>>()?;

    let mut counted = 0usize;
    for row in 0..trees.height() {
        let (Some(plot_cn), Some(condid)) = (&plot_cns[row], condids[row]) else { continue };
        let Some(condition) = conditions.get(&(plot_cn.clone(), condid)) else { continue };

        let plot = condition.plot;
        let stratum = &stratification.strata[plots[plot].stratum];
        let dia = dias[row];
        let tpa = adjusted_tpa(tpas[row], dia, breakpoints.get(plot_cn).copied(), &stratum.adjustment);

        let value = match kind {
            EstimateKind::Tpa => tpa,
            EstimateKind::Baa => dia.map_or(0.0, basal_area_sqft) * tpa,
            EstimateKind::Volume => attribute(&attributes, row) * tpa,
            EstimateKind::Biomass => attribute(&attributes, row) / LBS_PER_TON * tpa,
            EstimateKind::Area => continue,
        };

        let mut cond_values = condition.key.iter();
        let key: GroupKey = plan
            .sources
            .iter()
            .enumerate()
            .map(|(pos, source)| match source {
                GroupSource::Tree => tree_columns[pos].as_ref().and_then(|v| v[row].clone()),
                GroupSource::SizeClass => dia.map(size_class_label),
                GroupSource::Condition => cond_values.next().cloned().flatten(),
            })
            .collect();

        add(numerators, key, plot, value);
        counted += 1;
    }

    tracing::debug!("{} of {} trees contributed", counted, trees.height());
    Ok(())
}

fn attribute(values: &Option<Vec<Option<f64>>>, row: usize) -> f64 {
    values.as_ref().and_then(|v| v[row]).unwrap_or(0.0)
}
