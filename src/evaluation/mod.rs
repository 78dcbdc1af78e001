//! Evaluation selection and sample design resolution
//!
//! An evaluation is the set of plot-to-stratum assignments valid for one
//! estimation purpose and reference period. Every estimation call runs
//! against exactly one; plots outside its assignment set never reach the
//! estimators.

use std::fmt;

use arrow::record_batch::RecordBatch;
use itertools::Itertools;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

use crate::error::{EstimationError, Result};
use crate::schema::{
    assignment, eval, eval_typ, f64_values, i64_values, key_values, optional_f64_values,
    optional_i64_values, stratum, tables, text_values, validate_columns,
};
use crate::storage::{KeyFilter, ScanRequest, TableSource};

/// Evaluation purpose types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EvalType {
    #[serde(rename = "EXPALL")]
    All,
    #[serde(rename = "EXPCURR")]
    Current,
    #[serde(rename = "EXPVOL")]
    Volume,
    #[serde(rename = "EXPGROW")]
    Growth,
    #[serde(rename = "EXPMORT")]
    Mortality,
    #[serde(rename = "EXPREMV")]
    Removals,
}

impl EvalType {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::All => "EXPALL",
            Self::Current => "EXPCURR",
            Self::Volume => "EXPVOL",
            Self::Growth => "EXPGROW",
            Self::Mortality => "EXPMORT",
            Self::Removals => "EXPREMV",
        }
    }

    #[must_use]
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_ascii_uppercase().as_str() {
            "EXPALL" => Some(Self::All),
            "EXPCURR" => Some(Self::Current),
            "EXPVOL" => Some(Self::Volume),
            "EXPGROW" => Some(Self::Growth),
            "EXPMORT" => Some(Self::Mortality),
            "EXPREMV" => Some(Self::Removals),
            _ => None,
        }
    }

    /// EVALID type codes (last two digits) in order of preference when
    /// equally recent evaluations compete
    const fn preferred_codes(self) -> &'static [i64] {
        match self {
            Self::All | Self::Current => &[0, 1],
            Self::Volume => &[1, 0],
            Self::Growth | Self::Mortality | Self::Removals => &[3],
        }
    }

    /// Types implied by an EVALID type code, used when the catalog carries
    /// no type table
    fn implied_by_code(code: i64) -> Vec<Self> {
        match code {
            0 => vec![Self::All, Self::Current],
            1 => vec![Self::Volume],
            3 => vec![Self::Growth, Self::Mortality, Self::Removals],
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for EvalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// One evaluation from the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evaluation {
    pub cn: String,
    pub evalid: i64,
    pub statecd: Option<i64>,
    pub description: Option<String>,
    pub start_invyr: Option<i64>,
    pub end_invyr: Option<i64>,
    pub types: Vec<EvalType>,
}

impl Evaluation {
    /// Last two digits of the EVALID
    #[must_use]
    pub const fn type_code(&self) -> i64 {
        self.evalid % 100
    }

    /// Reference year: END_INVYR, or the year encoded in the EVALID
    #[must_use]
    pub const fn reference_year(&self) -> i64 {
        match self.end_invyr {
            Some(year) => year,
            None => 2000 + (self.evalid / 100) % 100,
        }
    }

    #[must_use]
    pub fn has_type(&self, eval_type: EvalType) -> bool {
        self.types.contains(&eval_type)
    }
}

impl fmt::Display for Evaluation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.evalid)?;
        if let Some(state) = self.statecd {
            write!(f, " state {state}")?;
        }
        if let (Some(start), Some(end)) = (self.start_invyr, self.end_invyr) {
            write!(f, " ({start}-{end})")?;
        }
        write!(f, " [{}]", self.types.iter().join(", "))?;
        if let Some(descr) = &self.description {
            write!(f, " {descr}")?;
        }
        Ok(())
    }
}

/// What to select
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationRequest {
    pub eval_type: EvalType,
    /// Explicit evaluation; overrides type-based selection
    pub evalid: Option<i64>,
    /// State scope; empty means any state
    pub states: Vec<i64>,
    /// Optional plot pre-filter (e.g. plots inside a polygon)
    pub plot_ids: Option<FxHashSet<String>>,
}

impl EvaluationRequest {
    #[must_use]
    pub fn new(eval_type: EvalType) -> Self {
        Self {
            eval_type,
            evalid: None,
            states: Vec::new(),
            plot_ids: None,
        }
    }

    fn scope(&self) -> String {
        match (self.evalid, self.states.is_empty()) {
            (Some(id), _) => format!(" with EVALID {id}"),
            (None, false) => format!(" for state(s) {}", self.states.iter().join(", ")),
            (None, true) => String::new(),
        }
    }
}

/// A stratum of the sample design
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stratum {
    pub cn: String,
    pub evalid: i64,
    pub estn_unit_cn: Option<String>,
    /// Acres represented per sampled plot
    pub expns: f64,
    pub adj_factor_micr: Option<f64>,
    pub adj_factor_subp: Option<f64>,
    pub adj_factor_macr: Option<f64>,
    /// Phase-one point count (stratum population size)
    pub p1pointcnt: Option<f64>,
    pub p2pointcnt: Option<f64>,
    /// EXPNS was null; the stratum carries zero weight
    #[serde(default)]
    pub expns_missing: bool,
}

/// Plot-to-stratum assignments of one evaluation
#[derive(Debug, Clone, Default)]
pub struct SampleDesign {
    assignments: FxHashMap<String, String>,
    strata: FxHashMap<String, Stratum>,
    plot_counts: FxHashMap<String, usize>,
}

impl SampleDesign {
    /// Build a design, checking that every assignment names a known stratum
    pub fn new(
        evalid: i64,
        assignments: FxHashMap<String, String>,
        strata: FxHashMap<String, Stratum>,
    ) -> Result<Self> {
        let mut plot_counts: FxHashMap<String, usize> = FxHashMap::default();
        for stratum_cn in assignments.values() {
            if !strata.contains_key(stratum_cn) {
                return Err(EstimationError::MissingStratum {
                    stratum: stratum_cn.clone(),
                    evalid,
                });
            }
            *plot_counts.entry(stratum_cn.clone()).or_default() += 1;
        }
        let strata = strata
            .into_iter()
            .filter(|(cn, _)| plot_counts.contains_key(cn))
            .collect();
        Ok(Self {
            assignments,
            strata,
            plot_counts,
        })
    }

    #[must_use]
    pub fn stratum_cn_of(&self, plot_cn: &str) -> Option<&str> {
        self.assignments.get(plot_cn).map(String::as_str)
    }

    /// Assigned plot identifiers, sorted
    #[must_use]
    pub fn plot_ids(&self) -> Vec<String> {
        self.assignments.keys().cloned().sorted().collect()
    }

    /// Assigned plots per stratum (n_h)
    #[must_use]
    pub fn plot_count(&self, stratum_cn: &str) -> usize {
        self.plot_counts.get(stratum_cn).copied().unwrap_or(0)
    }

    /// Strata with at least one assigned plot, sorted by identifier
    #[must_use]
    pub fn strata(&self) -> Vec<&Stratum> {
        self.strata
            .values()
            .sorted_by(|a, b| a.cn.cmp(&b.cn))
            .collect()
    }

    #[must_use]
    pub fn num_plots(&self) -> usize {
        self.assignments.len()
    }

    /// Strata whose EXPNS was null, sorted by identifier
    #[must_use]
    pub fn strata_without_expansion(&self) -> Vec<String> {
        self.strata()
            .into_iter()
            .filter(|s| s.expns_missing)
            .map(|s| s.cn.clone())
            .collect()
    }
}

/// A selected evaluation with its sample design
#[derive(Debug, Clone)]
pub struct ResolvedEvaluation {
    pub evaluation: Evaluation,
    pub design: SampleDesign,
    pub warnings: Vec<String>,
}

/// Selects evaluations from the catalog tables of a source
#[derive(Debug, Clone, Copy)]
pub struct EvaluationSelector<'a> {
    source: &'a dyn TableSource,
}

impl<'a> EvaluationSelector<'a> {
    #[must_use]
    pub const fn new(source: &'a dyn TableSource) -> Self {
        Self { source }
    }

    /// All evaluations, sorted by EVALID
    pub fn catalog(&self) -> Result<Vec<Evaluation>> {
        let schema = self.source.schema(tables::POP_EVAL)?;
        validate_columns(tables::POP_EVAL, &schema, &eval::REQUIRED)?;
        let batches = self.source.scan(&ScanRequest::new(tables::POP_EVAL).with_columns(
            [
                eval::CN,
                eval::EVALID,
                eval::STATECD,
                eval::EVAL_DESCR,
                eval::START_INVYR,
                eval::END_INVYR,
            ]
            .map(String::from),
        ))?;

        let types = self.evaluation_types()?;
        let mut evaluations = Vec::new();
        for batch in &batches {
            evaluations.extend(read_evaluations(batch, types.as_ref())?);
        }
        evaluations.sort_by_key(|e| e.evalid);
        Ok(evaluations)
    }

    /// EVAL_CN -> types, or `None` when the type table is absent
    fn evaluation_types(&self) -> Result<Option<FxHashMap<String, Vec<EvalType>>>> {
        if !self.source.has_table(tables::POP_EVAL_TYP) {
            log::debug!("No {} table; deriving evaluation types from EVALID", tables::POP_EVAL_TYP);
            return Ok(None);
        }
        let batches = self.source.scan(
            &ScanRequest::new(tables::POP_EVAL_TYP).with_columns(eval_typ::REQUIRED.map(String::from)),
        )?;
        let mut types: FxHashMap<String, Vec<EvalType>> = FxHashMap::default();
        for batch in &batches {
            let cns = key_values(batch, tables::POP_EVAL_TYP, eval_typ::EVAL_CN)?;
            let codes = text_values(batch, tables::POP_EVAL_TYP, eval_typ::EVAL_TYP)?;
            for (cn, code) in cns.into_iter().zip(codes) {
                let (Some(cn), Some(code)) = (cn, code) else {
                    continue;
                };
                match EvalType::from_code(&code) {
                    Some(t) => {
                        let entry = types.entry(cn).or_default();
                        if !entry.contains(&t) {
                            entry.push(t);
                        }
                    }
                    None => log::debug!("Ignoring unknown evaluation type {code}"),
                }
            }
        }
        Ok(Some(types))
    }

    /// The evaluation with this EVALID
    pub fn describe(&self, evalid: i64) -> Result<Evaluation> {
        self.catalog()?
            .into_iter()
            .find(|e| e.evalid == evalid)
            .ok_or_else(|| EstimationError::NoEvaluationFound {
                eval_type: "any".to_string(),
                scope: format!(" with EVALID {evalid}"),
            })
    }

    /// Select one evaluation; returns it with any selection warnings
    pub fn select(&self, request: &EvaluationRequest) -> Result<(Evaluation, Vec<String>)> {
        let catalog = self.catalog()?;
        let mut warnings = Vec::new();

        if let Some(evalid) = request.evalid {
            let evaluation = catalog
                .into_iter()
                .find(|e| e.evalid == evalid)
                .ok_or_else(|| EstimationError::NoEvaluationFound {
                    eval_type: request.eval_type.to_string(),
                    scope: request.scope(),
                })?;
            if !evaluation.has_type(request.eval_type) {
                let message = format!(
                    "Evaluation {evalid} is not typed {}; its expansion factors may not suit this estimate",
                    request.eval_type
                );
                log::warn!("{message}");
                warnings.push(message);
            }
            return Ok((evaluation, warnings));
        }

        let candidates = catalog
            .into_iter()
            .filter(|e| e.has_type(request.eval_type))
            .filter(|e| {
                request.states.is_empty()
                    || e.statecd.is_some_and(|s| request.states.contains(&s))
            })
            .collect_vec();

        let Some(latest) = candidates.iter().map(Evaluation::reference_year).max() else {
            return Err(EstimationError::NoEvaluationFound {
                eval_type: request.eval_type.to_string(),
                scope: request.scope(),
            });
        };
        let tied = candidates
            .into_iter()
            .filter(|e| e.reference_year() == latest)
            .collect_vec();

        let chosen = disambiguate(tied, request.eval_type)?;
        log::info!("Selected evaluation {chosen}");
        Ok((chosen, warnings))
    }

    /// Select an evaluation and load its plot and stratum assignments
    pub fn resolve(&self, request: &EvaluationRequest) -> Result<ResolvedEvaluation> {
        let (evaluation, warnings) = self.select(request)?;
        let evalid = evaluation.evalid;

        let assignments = self.load_assignments(evalid, request.plot_ids.as_ref())?;
        let strata = self.load_strata(evalid)?;
        let design = SampleDesign::new(evalid, assignments, strata)?;

        log::info!(
            "Evaluation {evalid}: {} plots in {} strata",
            design.num_plots(),
            design.strata().len()
        );
        Ok(ResolvedEvaluation {
            evaluation,
            design,
            warnings,
        })
    }

    fn load_assignments(
        &self,
        evalid: i64,
        plot_ids: Option<&FxHashSet<String>>,
    ) -> Result<FxHashMap<String, String>> {
        let schema = self.source.schema(tables::POP_PLOT_STRATUM_ASSGN)?;
        validate_columns(tables::POP_PLOT_STRATUM_ASSGN, &schema, &assignment::REQUIRED)?;
        let request = ScanRequest::new(tables::POP_PLOT_STRATUM_ASSGN)
            .with_columns(assignment::REQUIRED.map(String::from))
            .with_key_filter(KeyFilter::new(assignment::EVALID, [evalid.to_string()]));

        let mut assignments: FxHashMap<String, String> = FxHashMap::default();
        for batch in self.source.scan(&request)? {
            let table = tables::POP_PLOT_STRATUM_ASSGN;
            let plots = key_values(&batch, table, assignment::PLT_CN)?;
            let strata = key_values(&batch, table, assignment::STRATUM_CN)?;
            for (plot, stratum_cn) in plots.into_iter().zip(strata) {
                let (Some(plot), Some(stratum_cn)) = (plot, stratum_cn) else {
                    continue;
                };
                if plot_ids.is_some_and(|ids| !ids.contains(&plot)) {
                    continue;
                }
                match assignments.get(&plot) {
                    Some(existing) if *existing != stratum_cn => {
                        return Err(EstimationError::ConflictingAssignment { plot, evalid });
                    }
                    Some(_) => {}
                    None => {
                        assignments.insert(plot, stratum_cn);
                    }
                }
            }
        }
        Ok(assignments)
    }

    fn load_strata(&self, evalid: i64) -> Result<FxHashMap<String, Stratum>> {
        let schema = self.source.schema(tables::POP_STRATUM)?;
        validate_columns(tables::POP_STRATUM, &schema, &stratum::REQUIRED)?;
        let request = ScanRequest::new(tables::POP_STRATUM)
            .with_columns(
                [
                    stratum::CN,
                    stratum::EVALID,
                    stratum::ESTN_UNIT_CN,
                    stratum::EXPNS,
                    stratum::ADJ_FACTOR_MICR,
                    stratum::ADJ_FACTOR_SUBP,
                    stratum::ADJ_FACTOR_MACR,
                    stratum::P1POINTCNT,
                    stratum::P2POINTCNT,
                ]
                .map(String::from),
            )
            .with_key_filter(KeyFilter::new(stratum::EVALID, [evalid.to_string()]));

        let mut strata = FxHashMap::default();
        for batch in self.source.scan(&request)? {
            for s in read_strata(&batch, evalid)? {
                strata.insert(s.cn.clone(), s);
            }
        }
        Ok(strata)
    }
}

fn disambiguate(mut tied: Vec<Evaluation>, eval_type: EvalType) -> Result<Evaluation> {
    if tied.len() > 1 {
        for code in eval_type.preferred_codes() {
            let preferred = tied
                .iter()
                .filter(|e| e.type_code() == *code)
                .cloned()
                .collect_vec();
            if !preferred.is_empty() {
                tied = preferred;
                break;
            }
        }
    }
    if tied.len() == 1 {
        return Ok(tied.remove(0));
    }
    Err(EstimationError::AmbiguousEvaluation {
        eval_type: eval_type.to_string(),
        candidates: tied.iter().map(|e| e.evalid).sorted().collect(),
    })
}

fn read_evaluations(
    batch: &RecordBatch,
    types: Option<&FxHashMap<String, Vec<EvalType>>>,
) -> Result<Vec<Evaluation>> {
    let table = tables::POP_EVAL;
    let cns = key_values(batch, table, eval::CN)?;
    let evalids = i64_values(batch, table, eval::EVALID)?;
    let states = optional_i64_values(batch, eval::STATECD)?;
    let starts = optional_i64_values(batch, eval::START_INVYR)?;
    let ends = optional_i64_values(batch, eval::END_INVYR)?;
    let descriptions = match batch.column_by_name(eval::EVAL_DESCR) {
        Some(_) => Some(text_values(batch, table, eval::EVAL_DESCR)?),
        None => None,
    };

    let at = |values: &Option<Vec<Option<i64>>>, i: usize| values.as_ref().and_then(|v| v[i]);
    let mut out = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        let (Some(cn), Some(evalid)) = (cns[i].clone(), evalids[i]) else {
            continue;
        };
        let mut eval_types = match types {
            Some(map) => map.get(&cn).cloned().unwrap_or_default(),
            None => EvalType::implied_by_code(evalid % 100),
        };
        eval_types.sort();
        out.push(Evaluation {
            cn,
            evalid,
            statecd: at(&states, i),
            description: descriptions.as_ref().and_then(|d| d[i].clone()),
            start_invyr: at(&starts, i),
            end_invyr: at(&ends, i),
            types: eval_types,
        });
    }
    Ok(out)
}

fn read_strata(batch: &RecordBatch, evalid: i64) -> Result<Vec<Stratum>> {
    let table = tables::POP_STRATUM;
    let cns = key_values(batch, table, stratum::CN)?;
    let units = match batch.column_by_name(stratum::ESTN_UNIT_CN) {
        Some(_) => Some(key_values(batch, table, stratum::ESTN_UNIT_CN)?),
        None => None,
    };
    let expns = f64_values(batch, table, stratum::EXPNS)?;
    let micr = optional_f64_values(batch, stratum::ADJ_FACTOR_MICR)?;
    let subp = optional_f64_values(batch, stratum::ADJ_FACTOR_SUBP)?;
    let macr = optional_f64_values(batch, stratum::ADJ_FACTOR_MACR)?;
    let p1 = optional_f64_values(batch, stratum::P1POINTCNT)?;
    let p2 = optional_f64_values(batch, stratum::P2POINTCNT)?;

    let at = |values: &Option<Vec<Option<f64>>>, i: usize| values.as_ref().and_then(|v| v[i]);
    let mut out = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        let Some(cn) = cns[i].clone() else {
            continue;
        };
        let weight = expns[i].unwrap_or_else(|| {
            log::warn!("Stratum {cn} has no EXPNS; it carries no weight");
            0.0
        });
        out.push(Stratum {
            estn_unit_cn: units.as_ref().and_then(|u| u[i].clone()),
            cn,
            evalid,
            expns: weight,
            expns_missing: expns[i].is_none(),
            adj_factor_micr: at(&micr, i),
            adj_factor_subp: at(&subp, i),
            adj_factor_macr: at(&macr, i),
            p1pointcnt: at(&p1, i),
            p2pointcnt: at(&p2, i),
        });
    }
    Ok(out)
}
