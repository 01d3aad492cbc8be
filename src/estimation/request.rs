//! Estimation request: what to estimate, over which land and trees, grouped how

use polars::prelude::*;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::error::{EstimationError, Result};
use crate::estimation::evaluation::{EvalType, EvaluationSelector};

/// Population attribute being estimated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EstimateKind {
    /// Forest area (proportion of land area, total acres)
    Area,
    /// Trees per acre
    Tpa,
    /// Basal area per acre (ft²)
    Baa,
    /// Net cubic-foot volume per acre (VOLCFNET)
    Volume,
    /// Above-ground dry biomass per acre (short tons, DRYBIO_AG)
    Biomass,
}

impl EstimateKind {
    /// Evaluation type an automatic EVALID selection looks for
    pub fn eval_type(&self) -> EvalType {
        match self {
            EstimateKind::Area => EvalType::CurrentArea,
            _ => EvalType::Volume,
        }
    }

    /// Prefix of the output columns (`TPA`, `TPA_SE`, ...)
    pub fn column_prefix(&self) -> &'static str {
        match self {
            EstimateKind::Area => "AREA",
            EstimateKind::Tpa => "TPA",
            EstimateKind::Baa => "BAA",
            EstimateKind::Volume => "VOLCFNET",
            EstimateKind::Biomass => "BIO_AG",
        }
    }

    /// Per-tree attribute column multiplied by adjusted TPA, if any
    pub fn tree_attribute(&self) -> Option<&'static str> {
        match self {
            EstimateKind::Volume => Some("VOLCFNET"),
            EstimateKind::Biomass => Some("DRYBIO_AG"),
            _ => None,
        }
    }

    pub fn is_tree_based(&self) -> bool {
        !matches!(self, EstimateKind::Area)
    }
}

impl fmt::Display for EstimateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column_prefix())
    }
}

impl FromStr for EstimateKind {
    type Err = EstimationError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "area" => Ok(EstimateKind::Area),
            "tpa" => Ok(EstimateKind::Tpa),
            "baa" => Ok(EstimateKind::Baa),
            "volume" | "vol" => Ok(EstimateKind::Volume),
            "biomass" | "bio" => Ok(EstimateKind::Biomass),
            _ => Err(EstimationError::Parse { what: "estimate kind", value: s.to_string() }),
        }
    }
}

/// Land classification of conditions included in the estimate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LandType {
    /// COND_STATUS_CD = 1
    #[default]
    Forest,
    /// Forest, productive (SITECLCD 1-6) and unreserved (RESERVCD = 0)
    Timber,
    /// Every sampled condition
    All,
}

impl LandType {
    pub fn required_columns(&self) -> &'static [&'static str] {
        match self {
            LandType::Forest => &["COND_STATUS_CD"],
            LandType::Timber => &["COND_STATUS_CD", "SITECLCD", "RESERVCD"],
            LandType::All => &[],
        }
    }

    pub fn predicate(&self) -> Option<Expr> {
        let forest = col("COND_STATUS_CD").eq(lit(1));
        match self {
            LandType::Forest => Some(forest),
            LandType::Timber => Some(
                forest
                    .and(col("SITECLCD").gt_eq(lit(1)))
                    .and(col("SITECLCD").lt_eq(lit(6)))
                    .and(col("RESERVCD").eq(lit(0))),
            ),
            LandType::All => None,
        }
    }
}

impl FromStr for LandType {
    type Err = EstimationError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "forest" => Ok(LandType::Forest),
            "timber" => Ok(LandType::Timber),
            "all" => Ok(LandType::All),
            _ => Err(EstimationError::Parse { what: "land type", value: s.to_string() }),
        }
    }
}

/// Tree status classes included in a tree estimate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TreeType {
    /// STATUSCD = 1
    #[default]
    Live,
    /// STATUSCD = 2
    Dead,
    /// Live, TREECLCD = 2, DIA >= 5
    GrowingStock,
    All,
}

impl TreeType {
    pub fn required_columns(&self) -> &'static [&'static str] {
        match self {
            TreeType::Live | TreeType::Dead => &["STATUSCD"],
            TreeType::GrowingStock => &["STATUSCD", "TREECLCD", "DIA"],
            TreeType::All => &[],
        }
    }

    pub fn predicate(&self) -> Option<Expr> {
        match self {
            TreeType::Live => Some(col("STATUSCD").eq(lit(1))),
            TreeType::Dead => Some(col("STATUSCD").eq(lit(2))),
            TreeType::GrowingStock => Some(
                col("STATUSCD")
                    .eq(lit(1))
                    .and(col("TREECLCD").eq(lit(2)))
                    .and(col("DIA").gt_eq(lit(5.0))),
            ),
            TreeType::All => None,
        }
    }
}

impl FromStr for TreeType {
    type Err = EstimationError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "live" => Ok(TreeType::Live),
            "dead" => Ok(TreeType::Dead),
            "gs" | "growing_stock" => Ok(TreeType::GrowingStock),
            "all" => Ok(TreeType::All),
            _ => Err(EstimationError::Parse { what: "tree type", value: s.to_string() }),
        }
    }
}

/// Parse a SQL-style row predicate such as `DIA >= 10 AND SPCD = 131`
pub fn parse_domain(sql: &str) -> Result<Expr> {
    polars::sql::sql_expr(sql).map_err(|_| EstimationError::Parse {
        what: "domain expression",
        value: sql.to_string(),
    })
}

/// One call to the estimator
#[derive(Debug, Clone)]
pub struct EstimationRequest {
    pub kind: EstimateKind,
    pub evaluation: EvaluationSelector,
    pub land_type: LandType,
    pub tree_type: TreeType,
    /// Row predicate on TREE
    pub tree_domain: Option<Expr>,
    /// Row predicate on COND
    pub area_domain: Option<Expr>,
    /// TREE or COND columns (or `SIZE_CLASS`)
    pub group_by: Vec<String>,
    /// Include population totals in the output table
    pub totals: bool,
}

impl EstimationRequest {
    /// Forest-land, live-tree request with automatic EVALID selection over all states
    pub fn new(kind: EstimateKind) -> Self {
        Self {
            kind,
            evaluation: EvaluationSelector::MostRecent { states: Vec::new() },
            land_type: LandType::default(),
            tree_type: TreeType::default(),
            tree_domain: None,
            area_domain: None,
            group_by: Vec::new(),
            totals: false,
        }
    }

    pub fn evalids(mut self, evalids: &[i64]) -> Self {
        self.evaluation = EvaluationSelector::Explicit(evalids.to_vec());
        self
    }

    pub fn most_recent(mut self, states: &[i64]) -> Self {
        self.evaluation = EvaluationSelector::MostRecent { states: states.to_vec() };
        self
    }

    pub fn land_type(mut self, land_type: LandType) -> Self {
        self.land_type = land_type;
        self
    }

    pub fn tree_type(mut self, tree_type: TreeType) -> Self {
        self.tree_type = tree_type;
        self
    }

    pub fn tree_domain(mut self, predicate: Expr) -> Self {
        self.tree_domain = Some(predicate);
        self
    }

    pub fn area_domain(mut self, predicate: Expr) -> Self {
        self.area_domain = Some(predicate);
        self
    }

    pub fn group_by<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.group_by = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn totals(mut self, totals: bool) -> Self {
        self.totals = totals;
        self
    }
}
