//! Adjustment factor resolution
//!
//! Trees are tallied on nested plots of different sizes. The stratum carries
//! one non-response adjustment factor per plot size; the tree's diameter (or,
//! for growth/removal/mortality records, the recorded frame code) decides
//! which one applies.

use rustc_hash::FxHashMap;

use crate::evaluation::{SampleDesign, Stratum};

/// Plot size on which an item was tallied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SizeFrame {
    Micro,
    Subplot,
    Macro,
}

impl SizeFrame {
    /// Frame for a tree diameter.
    ///
    /// Returns the frame and whether the macroplot breakpoint was missing, in
    /// which case a tree at or above the subplot size falls back to the
    /// subplot frame.
    #[must_use]
    pub fn for_diameter(dia: Option<f64>, micro_breakpoint: f64, macro_breakpoint: Option<f64>) -> (Self, bool) {
        let Some(dia) = dia else {
            return (Self::Subplot, false);
        };
        if dia < micro_breakpoint {
            return (Self::Micro, false);
        }
        match macro_breakpoint {
            Some(breakpoint) if dia >= breakpoint => (Self::Macro, false),
            Some(_) => (Self::Subplot, false),
            None => (Self::Subplot, true),
        }
    }
}

/// What a recorded SUBPTYP_GRM code means
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameCode {
    /// Record does not contribute
    NotUsed,
    Frame(SizeFrame),
    /// Unrecognized or missing code
    Unknown,
}

impl FrameCode {
    #[must_use]
    pub const fn from_code(code: Option<i64>) -> Self {
        match code {
            Some(0) => Self::NotUsed,
            Some(1) => Self::Frame(SizeFrame::Subplot),
            Some(2) => Self::Frame(SizeFrame::Micro),
            Some(3) => Self::Frame(SizeFrame::Macro),
            _ => Self::Unknown,
        }
    }
}

/// Adjustment factors of one stratum, with null factors already resolved
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdjustmentFactors {
    pub micr: f64,
    pub subp: f64,
    pub macr: f64,
}

impl AdjustmentFactors {
    /// Resolve a stratum's factors. Null micro/macro factors fall back to the
    /// subplot factor, a null subplot factor to 1.0. Returns whether any
    /// fallback was taken.
    #[must_use]
    pub fn from_stratum(stratum: &Stratum) -> (Self, bool) {
        let subp = stratum.adj_factor_subp.unwrap_or(1.0);
        let factors = Self {
            micr: stratum.adj_factor_micr.unwrap_or(subp),
            subp,
            macr: stratum.adj_factor_macr.unwrap_or(subp),
        };
        let fell_back = stratum.adj_factor_subp.is_none()
            || stratum.adj_factor_micr.is_none()
            || stratum.adj_factor_macr.is_none();
        (factors, fell_back)
    }

    #[must_use]
    pub const fn for_frame(&self, frame: SizeFrame) -> f64 {
        match frame {
            SizeFrame::Micro => self.micr,
            SizeFrame::Subplot => self.subp,
            SizeFrame::Macro => self.macr,
        }
    }

    /// Area multiplier of a condition: the macroplot factor when its
    /// proportion was measured on the macroplot
    #[must_use]
    pub fn for_prop_basis(&self, prop_basis: Option<&str>) -> f64 {
        match prop_basis.map(str::trim) {
            Some(basis) if basis.eq_ignore_ascii_case("MACR") => self.macr,
            _ => self.subp,
        }
    }
}

/// Resolves multipliers for the strata of one design and counts fallbacks
#[derive(Debug, Clone)]
pub struct AdjustmentResolver {
    micro_breakpoint: f64,
    factors: FxHashMap<String, AdjustmentFactors>,
    /// Items whose plot had no macroplot breakpoint
    pub missing_breakpoint: usize,
    /// Component records with an unrecognized frame code
    pub unknown_frames: usize,
    pub warnings: Vec<String>,
}

impl AdjustmentResolver {
    #[must_use]
    pub fn new(design: &SampleDesign, micro_breakpoint: f64) -> Self {
        let mut factors = FxHashMap::default();
        let mut warnings = Vec::new();
        for stratum in design.strata() {
            let (resolved, fell_back) = AdjustmentFactors::from_stratum(stratum);
            if fell_back {
                let message = format!(
                    "Stratum {} has null adjustment factors; using subplot factor {}",
                    stratum.cn, resolved.subp
                );
                log::warn!("{message}");
                warnings.push(message);
            }
            factors.insert(stratum.cn.clone(), resolved);
        }
        Self {
            micro_breakpoint,
            factors,
            missing_breakpoint: 0,
            unknown_frames: 0,
            warnings,
        }
    }

    fn factors(&self, stratum_cn: &str) -> AdjustmentFactors {
        self.factors
            .get(stratum_cn)
            .copied()
            .unwrap_or(AdjustmentFactors {
                micr: 1.0,
                subp: 1.0,
                macr: 1.0,
            })
    }

    /// Multiplier for a tree by diameter
    pub fn tree_multiplier(&mut self, stratum_cn: &str, dia: Option<f64>, macro_breakpoint: Option<f64>) -> f64 {
        let (frame, missing) = SizeFrame::for_diameter(dia, self.micro_breakpoint, macro_breakpoint);
        if missing {
            self.missing_breakpoint += 1;
        }
        self.factors(stratum_cn).for_frame(frame)
    }

    /// Multiplier for a component record by its recorded frame code. `None`
    /// means the record contributes nothing.
    pub fn component_multiplier(&mut self, stratum_cn: &str, code: Option<i64>) -> Option<f64> {
        match FrameCode::from_code(code) {
            FrameCode::NotUsed => None,
            FrameCode::Frame(frame) => Some(self.factors(stratum_cn).for_frame(frame)),
            FrameCode::Unknown => {
                self.unknown_frames += 1;
                None
            }
        }
    }

    /// Area multiplier for a condition
    #[must_use]
    pub fn area_multiplier(&self, stratum_cn: &str, prop_basis: Option<&str>) -> f64 {
        self.factors(stratum_cn).for_prop_basis(prop_basis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stratum(micr: Option<f64>, subp: Option<f64>, macr: Option<f64>) -> Stratum {
        Stratum {
            cn: "S".into(),
            evalid: 1,
            estn_unit_cn: None,
            expns: 1000.0,
            adj_factor_micr: micr,
            adj_factor_subp: subp,
            adj_factor_macr: macr,
            p1pointcnt: None,
            p2pointcnt: None,
            expns_missing: false,
        }
    }

    #[test]
    fn diameter_selects_frame() {
        assert_eq!(SizeFrame::for_diameter(Some(2.0), 5.0, Some(24.0)).0, SizeFrame::Micro);
        assert_eq!(SizeFrame::for_diameter(Some(5.0), 5.0, Some(24.0)).0, SizeFrame::Subplot);
        assert_eq!(SizeFrame::for_diameter(Some(24.0), 5.0, Some(24.0)).0, SizeFrame::Macro);
        assert_eq!(
            SizeFrame::for_diameter(Some(30.0), 5.0, None),
            (SizeFrame::Subplot, true)
        );
        // Microplot trees never need the macro breakpoint
        assert_eq!(SizeFrame::for_diameter(Some(1.0), 5.0, None), (SizeFrame::Micro, false));
    }

    #[test]
    fn null_factors_fall_back_to_subplot() {
        let (factors, fell_back) = AdjustmentFactors::from_stratum(&stratum(None, Some(1.1), None));
        assert!(fell_back);
        assert_eq!(factors.micr, 1.1);
        assert_eq!(factors.macr, 1.1);

        let (factors, _) = AdjustmentFactors::from_stratum(&stratum(None, None, None));
        assert_eq!(factors.subp, 1.0);
    }

    #[test]
    fn prop_basis_picks_area_multiplier() {
        let (factors, fell_back) =
            AdjustmentFactors::from_stratum(&stratum(Some(4.0), Some(1.2), Some(1.5)));
        assert!(!fell_back);
        assert_eq!(factors.for_prop_basis(Some("MACR")), 1.5);
        assert_eq!(factors.for_prop_basis(Some("SUBP")), 1.2);
        assert_eq!(factors.for_prop_basis(None), 1.2);
    }

    #[test]
    fn frame_codes() {
        assert_eq!(FrameCode::from_code(Some(0)), FrameCode::NotUsed);
        assert_eq!(FrameCode::from_code(Some(2)), FrameCode::Frame(SizeFrame::Micro));
        assert_eq!(FrameCode::from_code(Some(9)), FrameCode::Unknown);
        assert_eq!(FrameCode::from_code(None), FrameCode::Unknown);
    }
}
