//! STAGE 3: PLOT-DESIGN ADJUSTMENT
//!
//! Trees are measured on nested plots: saplings on the microplot, mid-size stems
//! on the subplot, and (in macroplot designs) large stems on the macroplot. Each
//! tree's per-acre value is multiplied by the stratum's factor for the plot size
//! that measured it. Adjustment is per tree and happens before any aggregation.
//!
//! Classification order:
//!   1. DIA null                 → subplot
//!   2. breakpoint null          → +∞ (macroplot never applies)
//!   3. DIA < 5.0                → microplot
//!   4. 5.0 ≤ DIA < breakpoint   → subplot
//!   5. DIA ≥ breakpoint         → macroplot

use std::f64::consts::PI;

/// Upper diameter bound (inches, exclusive) of microplot trees
pub const MICROPLOT_BREAKPOINT_DIA: f64 = 5.0;

/// Nested plot that measured a tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlotSize {
    Microplot,
    Subplot,
    Macroplot,
}

/// Stratum adjustment factors for each plot size
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdjustmentFactors {
    pub micr: f64,
    pub subp: f64,
    pub macr: f64,
}

impl Default for AdjustmentFactors {
    fn default() -> Self {
        Self { micr: 1.0, subp: 1.0, macr: 1.0 }
    }
}

impl AdjustmentFactors {
    pub fn for_plot_size(&self, size: PlotSize) -> f64 {
        match size {
            PlotSize::Microplot => self.micr,
            PlotSize::Subplot => self.subp,
            PlotSize::Macroplot => self.macr,
        }
    }

    /// Area factor for a condition: macroplot basis uses ADJ_FACTOR_MACR
    pub fn for_condition(&self, prop_basis: Option<&str>) -> f64 {
        match prop_basis {
            Some(basis) if basis.trim().eq_ignore_ascii_case("MACR") => self.macr,
            _ => self.subp,
        }
    }
}

/// Classify a tree by the plot that measured it
pub fn classify_tree(dia: Option<f64>, macro_breakpoint_dia: Option<f64>) -> PlotSize {
    let Some(dia) = dia else {
        return PlotSize::Subplot;
    };
    let breakpoint = macro_breakpoint_dia.unwrap_or(f64::INFINITY);

    if dia < MICROPLOT_BREAKPOINT_DIA {
        PlotSize::Microplot
    } else if dia < breakpoint {
        PlotSize::Subplot
    } else {
        PlotSize::Macroplot
    }
}

/// Basal area (ft²) of one stem: π (DIA/24)², DIA in inches
pub fn basal_area_sqft(dia: f64) -> f64 {
    let radius_ft = dia / 24.0;
    PI * radius_ft * radius_ft
}

/// Trees-per-acre of one tree after plot-design adjustment
pub fn adjusted_tpa(
    tpa_unadj: Option<f64>,
    dia: Option<f64>,
    macro_breakpoint_dia: Option<f64>,
    factors: &AdjustmentFactors,
) -> f64 {
    let size = classify_tree(dia, macro_breakpoint_dia);
    tpa_unadj.unwrap_or(0.0) * factors.for_plot_size(size)
}
