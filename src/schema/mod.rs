//! Table and column contracts for the inventory tables.
//!
//! Column names are exposed as constants so that every access site is checked
//! at compile time; [`validate_columns`] checks loaded tables against the
//! required set at runtime.

pub mod columns;

use std::fmt;

use arrow::datatypes::Schema;
use serde::{Deserialize, Serialize};

use crate::error::{EstimationError, Result};

pub use columns::{
    f64_values, group_values, i64_values, key_values, optional_f64_values, optional_i64_values,
    text_values,
};

/// Hierarchy level a table, domain or grouping column belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Level {
    /// Sampling unit (plot)
    Plot,
    /// Parcel (condition)
    Condition,
    /// Measured item (tree)
    Item,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plot => write!(f, "plot"),
            Self::Condition => write!(f, "condition"),
            Self::Item => write!(f, "tree"),
        }
    }
}

/// Table names served by the storage collaborator
pub mod tables {
    pub const PLOT: &str = "PLOT";
    pub const COND: &str = "COND";
    pub const TREE: &str = "TREE";
    pub const POP_EVAL: &str = "POP_EVAL";
    pub const POP_EVAL_TYP: &str = "POP_EVAL_TYP";
    pub const POP_PLOT_STRATUM_ASSGN: &str = "POP_PLOT_STRATUM_ASSGN";
    pub const POP_STRATUM: &str = "POP_STRATUM";
    pub const TREE_GRM_COMPONENT: &str = "TREE_GRM_COMPONENT";
    pub const TREE_GRM_BEGIN: &str = "TREE_GRM_BEGIN";
    pub const TREE_GRM_MIDPT: &str = "TREE_GRM_MIDPT";

    /// Every table the engine may read
    pub const ALL: [&str; 10] = [
        PLOT,
        COND,
        TREE,
        POP_EVAL,
        POP_EVAL_TYP,
        POP_PLOT_STRATUM_ASSGN,
        POP_STRATUM,
        TREE_GRM_COMPONENT,
        TREE_GRM_BEGIN,
        TREE_GRM_MIDPT,
    ];
}

/// PLOT columns
pub mod plot {
    pub const CN: &str = "CN";
    pub const STATECD: &str = "STATECD";
    pub const INVYR: &str = "INVYR";
    pub const LAT: &str = "LAT";
    pub const LON: &str = "LON";
    pub const DESIGNCD: &str = "DESIGNCD";
    pub const MACRO_BREAKPOINT_DIA: &str = "MACRO_BREAKPOINT_DIA";
    pub const REMPER: &str = "REMPER";

    pub const REQUIRED: [&str; 1] = [CN];
}

/// COND columns
pub mod cond {
    pub const PLT_CN: &str = "PLT_CN";
    pub const CONDID: &str = "CONDID";
    pub const COND_STATUS_CD: &str = "COND_STATUS_CD";
    pub const CONDPROP_UNADJ: &str = "CONDPROP_UNADJ";
    pub const PROP_BASIS: &str = "PROP_BASIS";
    pub const FORTYPCD: &str = "FORTYPCD";
    pub const SITECLCD: &str = "SITECLCD";
    pub const RESERVCD: &str = "RESERVCD";
    pub const OWNGRPCD: &str = "OWNGRPCD";

    pub const REQUIRED: [&str; 4] = [PLT_CN, CONDID, COND_STATUS_CD, CONDPROP_UNADJ];
}

/// TREE columns
pub mod tree {
    pub const CN: &str = "CN";
    pub const PLT_CN: &str = "PLT_CN";
    pub const CONDID: &str = "CONDID";
    pub const STATUSCD: &str = "STATUSCD";
    pub const SPCD: &str = "SPCD";
    pub const DIA: &str = "DIA";
    pub const TPA_UNADJ: &str = "TPA_UNADJ";
    pub const TREECLCD: &str = "TREECLCD";
    pub const VOLCFNET: &str = "VOLCFNET";
    pub const VOLCFGRS: &str = "VOLCFGRS";
    pub const VOLCFSND: &str = "VOLCFSND";
    pub const VOLCSNET: &str = "VOLCSNET";
    pub const DRYBIO_AG: &str = "DRYBIO_AG";
    pub const DRYBIO_BG: &str = "DRYBIO_BG";
    pub const DRYBIO_BOLE: &str = "DRYBIO_BOLE";

    pub const REQUIRED: [&str; 5] = [CN, PLT_CN, CONDID, DIA, TPA_UNADJ];
}

/// POP_EVAL columns
pub mod eval {
    pub const CN: &str = "CN";
    pub const EVALID: &str = "EVALID";
    pub const STATECD: &str = "STATECD";
    pub const EVAL_DESCR: &str = "EVAL_DESCR";
    pub const START_INVYR: &str = "START_INVYR";
    pub const END_INVYR: &str = "END_INVYR";

    pub const REQUIRED: [&str; 2] = [CN, EVALID];
}

/// POP_EVAL_TYP columns
pub mod eval_typ {
    pub const EVAL_CN: &str = "EVAL_CN";
    pub const EVAL_TYP: &str = "EVAL_TYP";

    pub const REQUIRED: [&str; 2] = [EVAL_CN, EVAL_TYP];
}

/// POP_PLOT_STRATUM_ASSGN columns
pub mod assignment {
    pub const PLT_CN: &str = "PLT_CN";
    pub const STRATUM_CN: &str = "STRATUM_CN";
    pub const EVALID: &str = "EVALID";

    pub const REQUIRED: [&str; 3] = [PLT_CN, STRATUM_CN, EVALID];
}

/// POP_STRATUM columns
pub mod stratum {
    pub const CN: &str = "CN";
    pub const EVALID: &str = "EVALID";
    pub const ESTN_UNIT_CN: &str = "ESTN_UNIT_CN";
    pub const EXPNS: &str = "EXPNS";
    pub const ADJ_FACTOR_MICR: &str = "ADJ_FACTOR_MICR";
    pub const ADJ_FACTOR_SUBP: &str = "ADJ_FACTOR_SUBP";
    pub const ADJ_FACTOR_MACR: &str = "ADJ_FACTOR_MACR";
    pub const P1POINTCNT: &str = "P1POINTCNT";
    pub const P2POINTCNT: &str = "P2POINTCNT";

    pub const REQUIRED: [&str; 3] = [CN, EVALID, EXPNS];
}

/// TREE_GRM_COMPONENT columns. The land/tree basis specific columns are
/// built by [`grm_component::GrmColumns`].
pub mod grm_component {
    pub const TRE_CN: &str = "TRE_CN";
    pub const PLT_CN: &str = "PLT_CN";

    pub const REQUIRED: [&str; 2] = [TRE_CN, PLT_CN];

    /// Basis-specific component, rate and frame column names
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct GrmColumns {
        pub component: String,
        pub tpa_grow: String,
        pub tpa_mort: String,
        pub tpa_remv: String,
        pub subplot_type: String,
    }

    impl GrmColumns {
        /// Columns for a tree basis (`GS`, `AL`) and land basis (`FOREST`, `TIMBER`)
        #[must_use]
        pub fn new(tree_basis: &str, land_basis: &str) -> Self {
            let suffix = format!("{tree_basis}_{land_basis}");
            Self {
                component: format!("SUBP_COMPONENT_{suffix}"),
                tpa_grow: format!("SUBP_TPAGROW_UNADJ_{suffix}"),
                tpa_mort: format!("SUBP_TPAMORT_UNADJ_{suffix}"),
                tpa_remv: format!("SUBP_TPAREMV_UNADJ_{suffix}"),
                subplot_type: format!("SUBP_SUBPTYP_GRM_{suffix}"),
            }
        }

        #[must_use]
        pub fn all(&self) -> [&str; 5] {
            [
                &self.component,
                &self.tpa_grow,
                &self.tpa_mort,
                &self.tpa_remv,
                &self.subplot_type,
            ]
        }
    }
}

/// TREE_GRM_BEGIN / TREE_GRM_MIDPT columns
pub mod grm_measure {
    pub const TRE_CN: &str = "TRE_CN";
    pub const VOLCFNET: &str = "VOLCFNET";
    pub const DRYBIO_AG: &str = "DRYBIO_AG";
}

/// Check that every required column is present in a table schema
pub fn validate_columns(table: &str, schema: &Schema, required: &[&str]) -> Result<()> {
    for column in required {
        if schema.field_with_name(column).is_err() {
            return Err(EstimationError::MissingColumn {
                table: table.to_string(),
                column: (*column).to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::datatypes::{DataType, Field};

    #[test]
    fn validate_reports_first_missing_column() {
        let schema = Schema::new(vec![Field::new(cond::PLT_CN, DataType::Utf8, false)]);
        let err = validate_columns(tables::COND, &schema, &cond::REQUIRED).unwrap_err();
        assert!(matches!(
            err,
            EstimationError::MissingColumn { ref column, .. } if column == cond::CONDID
        ));
    }

    #[test]
    fn grm_columns_follow_basis_suffix() {
        let columns = grm_component::GrmColumns::new("GS", "TIMBER");
        assert_eq!(columns.component, "SUBP_COMPONENT_GS_TIMBER");
        assert_eq!(columns.subplot_type, "SUBP_SUBPTYP_GRM_GS_TIMBER");
    }
}
