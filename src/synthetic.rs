//! Synthetic inventories
//!
//! [`InventoryBuilder`] assembles the full set of inventory tables from
//! explicit rows, for tests and examples. [`RandomInventory`] fills a
//! builder with a seeded random sample that has the shape of a real
//! multi-state inventory.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use rand::prelude::*;
use rand::rngs::StdRng;

use crate::error::Result;
use crate::schema::{
    assignment, cond, eval, eval_typ, grm_component, grm_measure, plot, stratum, tables, tree,
};
use crate::storage::{MemoryStore, ScanRequest, TableSource};

#[derive(Debug, Clone)]
struct EvaluationRow {
    cn: String,
    evalid: i64,
    statecd: i64,
    start: i64,
    end: i64,
    types: Vec<String>,
}

#[derive(Debug, Clone)]
struct StratumRow {
    cn: String,
    evalid: i64,
    expns: Option<f64>,
    micr: Option<f64>,
    subp: Option<f64>,
    macr: Option<f64>,
    p1pointcnt: Option<f64>,
}

#[derive(Debug, Clone)]
struct PlotRow {
    cn: String,
    statecd: Option<i64>,
    invyr: Option<i64>,
    macro_breakpoint_dia: Option<f64>,
    remper: Option<f64>,
}

#[derive(Debug, Clone)]
struct CondRow {
    plt_cn: String,
    condid: i64,
    status: i64,
    proportion: f64,
    prop_basis: String,
    fortypcd: Option<i64>,
    siteclcd: Option<i64>,
    reservcd: Option<i64>,
    owngrpcd: Option<i64>,
}

#[derive(Debug, Clone, Default)]
struct TreeRow {
    cn: String,
    plt_cn: String,
    condid: i64,
    statuscd: i64,
    spcd: Option<i64>,
    dia: Option<f64>,
    tpa_unadj: Option<f64>,
    treeclcd: Option<i64>,
    volcfnet: Option<f64>,
    volcfgrs: Option<f64>,
    drybio_ag: Option<f64>,
    drybio_bg: Option<f64>,
    drybio_bole: Option<f64>,
}

#[derive(Debug, Clone)]
struct ComponentRow {
    tre_cn: String,
    plt_cn: String,
    label: String,
    tpa_grow: f64,
    tpa_mort: f64,
    tpa_remv: f64,
    subptyp: i64,
}

#[derive(Debug, Clone)]
struct MeasurementRow {
    tre_cn: String,
    begin: Option<f64>,
    midpoint: Option<f64>,
}

/// Builds inventory tables row by row
///
/// Strata default to adjustment factors of 1.0, plots to a 24-inch macroplot
/// breakpoint and a 5-year remeasurement period, conditions to a subplot
/// area basis on unreserved, productive land.
#[derive(Debug, Clone, Default)]
pub struct InventoryBuilder {
    evaluations: Vec<EvaluationRow>,
    strata: Vec<StratumRow>,
    plots: Vec<PlotRow>,
    assignments: Vec<(String, String, i64)>,
    conditions: Vec<CondRow>,
    trees: Vec<TreeRow>,
    components: Vec<ComponentRow>,
    measurements: Vec<MeasurementRow>,
}

fn utf8<'a>(values: impl IntoIterator<Item = Option<&'a str>>) -> ArrayRef {
    Arc::new(values.into_iter().collect::<StringArray>())
}

fn int64(values: impl IntoIterator<Item = Option<i64>>) -> ArrayRef {
    Arc::new(values.into_iter().collect::<Int64Array>())
}

fn float64(values: impl IntoIterator<Item = Option<f64>>) -> ArrayRef {
    Arc::new(values.into_iter().collect::<Float64Array>())
}

fn table(columns: Vec<(&str, ArrayRef)>) -> Result<(SchemaRef, RecordBatch)> {
    let schema: SchemaRef = Arc::new(Schema::new(
        columns
            .iter()
            .map(|(name, array)| Field::new(*name, array.data_type().clone(), true))
            .collect::<Vec<_>>(),
    ));
    let batch = RecordBatch::try_new(
        Arc::clone(&schema),
        columns.into_iter().map(|(_, array)| array).collect(),
    )?;
    Ok((schema, batch))
}

impl InventoryBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an evaluation with its type codes (`EXPALL`, `EXPVOL`, ...)
    pub fn evaluation(
        &mut self,
        evalid: i64,
        cn: &str,
        statecd: i64,
        start_invyr: i64,
        end_invyr: i64,
        types: &[&str],
    ) -> &mut Self {
        self.evaluations.push(EvaluationRow {
            cn: cn.to_string(),
            evalid,
            statecd,
            start: start_invyr,
            end: end_invyr,
            types: types.iter().map(ToString::to_string).collect(),
        });
        self
    }

    /// Add a stratum with unit adjustment factors
    pub fn stratum(&mut self, cn: &str, evalid: i64, expns: f64) -> &mut Self {
        self.stratum_with_factors(cn, evalid, expns, 1.0, 1.0, 1.0)
    }

    pub fn stratum_with_factors(
        &mut self,
        cn: &str,
        evalid: i64,
        expns: f64,
        micr: f64,
        subp: f64,
        macr: f64,
    ) -> &mut Self {
        self.strata.push(StratumRow {
            cn: cn.to_string(),
            evalid,
            expns: Some(expns),
            micr: Some(micr),
            subp: Some(subp),
            macr: Some(macr),
            p1pointcnt: None,
        });
        self
    }

    /// Set a stratum's phase-one point count
    pub fn stratum_population(&mut self, cn: &str, p1pointcnt: f64) -> &mut Self {
        for s in self.strata.iter_mut().filter(|s| s.cn == cn) {
            s.p1pointcnt = Some(p1pointcnt);
        }
        self
    }

    /// Clear a stratum's expansion factor
    pub fn stratum_without_expansion(&mut self, cn: &str) -> &mut Self {
        for s in self.strata.iter_mut().filter(|s| s.cn == cn) {
            s.expns = None;
        }
        self
    }

    /// Clear a stratum's adjustment factors
    pub fn stratum_without_factors(&mut self, cn: &str) -> &mut Self {
        for s in self.strata.iter_mut().filter(|s| s.cn == cn) {
            s.micr = None;
            s.subp = None;
            s.macr = None;
        }
        self
    }

    /// Add a plot (once) and assign it to a stratum of an evaluation
    pub fn plot(&mut self, plot_cn: &str, stratum_cn: &str, evalid: i64) -> &mut Self {
        if !self.plots.iter().any(|p| p.cn == plot_cn) {
            let evaluation = self.evaluations.iter().find(|e| e.evalid == evalid);
            self.plots.push(PlotRow {
                cn: plot_cn.to_string(),
                statecd: evaluation.map(|e| e.statecd),
                invyr: evaluation.map(|e| e.end),
                macro_breakpoint_dia: Some(24.0),
                remper: Some(5.0),
            });
        }
        self.assignments
            .push((plot_cn.to_string(), stratum_cn.to_string(), evalid));
        self
    }

    /// Assign a plot without adding it to the plot table
    pub fn assignment(&mut self, plot_cn: &str, stratum_cn: &str, evalid: i64) -> &mut Self {
        self.assignments
            .push((plot_cn.to_string(), stratum_cn.to_string(), evalid));
        self
    }

    pub fn plot_breakpoint(&mut self, plot_cn: &str, dia: f64) -> &mut Self {
        self.update_plot(plot_cn, |p| p.macro_breakpoint_dia = Some(dia))
    }

    pub fn plot_without_breakpoint(&mut self, plot_cn: &str) -> &mut Self {
        self.update_plot(plot_cn, |p| p.macro_breakpoint_dia = None)
    }

    pub fn plot_remper(&mut self, plot_cn: &str, remper: Option<f64>) -> &mut Self {
        self.update_plot(plot_cn, |p| p.remper = remper)
    }

    fn update_plot(&mut self, plot_cn: &str, update: impl Fn(&mut PlotRow)) -> &mut Self {
        for p in self.plots.iter_mut().filter(|p| p.cn == plot_cn) {
            update(p);
        }
        self
    }

    /// Add a condition; status 1 is forest, 2 non-forest
    pub fn condition(&mut self, plot_cn: &str, condid: i64, proportion: f64, status: i64) -> &mut Self {
        self.conditions.push(CondRow {
            plt_cn: plot_cn.to_string(),
            condid,
            status,
            proportion,
            prop_basis: "SUBP".to_string(),
            fortypcd: None,
            siteclcd: Some(3),
            reservcd: Some(0),
            owngrpcd: Some(40),
        });
        self
    }

    pub fn condition_forest_type(&mut self, plot_cn: &str, condid: i64, fortypcd: i64) -> &mut Self {
        self.update_condition(plot_cn, condid, |c| c.fortypcd = Some(fortypcd))
    }

    pub fn condition_prop_basis(&mut self, plot_cn: &str, condid: i64, basis: &str) -> &mut Self {
        let basis = basis.to_string();
        self.update_condition(plot_cn, condid, move |c| c.prop_basis.clone_from(&basis))
    }

    pub fn condition_reserved(&mut self, plot_cn: &str, condid: i64) -> &mut Self {
        self.update_condition(plot_cn, condid, |c| c.reservcd = Some(1))
    }

    fn update_condition(&mut self, plot_cn: &str, condid: i64, update: impl Fn(&mut CondRow)) -> &mut Self {
        for c in self
            .conditions
            .iter_mut()
            .filter(|c| c.plt_cn == plot_cn && c.condid == condid)
        {
            update(c);
        }
        self
    }

    /// Add a live growing-stock tree with a net volume
    pub fn tree(&mut self, cn: &str, plot_cn: &str, condid: i64, dia: f64, tpa: f64, volcfnet: f64) -> &mut Self {
        self.trees.push(TreeRow {
            cn: cn.to_string(),
            plt_cn: plot_cn.to_string(),
            condid,
            statuscd: 1,
            dia: Some(dia),
            tpa_unadj: Some(tpa),
            treeclcd: Some(2),
            volcfnet: Some(volcfnet),
            volcfgrs: Some(volcfnet),
            ..TreeRow::default()
        });
        self
    }

    /// Add a live tree with above- and belowground dry biomass (pounds)
    #[allow(clippy::too_many_arguments)]
    pub fn tree_biomass(
        &mut self,
        cn: &str,
        plot_cn: &str,
        condid: i64,
        dia: f64,
        tpa: f64,
        aboveground: f64,
        belowground: f64,
    ) -> &mut Self {
        self.trees.push(TreeRow {
            cn: cn.to_string(),
            plt_cn: plot_cn.to_string(),
            condid,
            statuscd: 1,
            dia: Some(dia),
            tpa_unadj: Some(tpa),
            treeclcd: Some(2),
            drybio_ag: Some(aboveground),
            drybio_bg: Some(belowground),
            ..TreeRow::default()
        });
        self
    }

    pub fn tree_species(&mut self, cn: &str, spcd: i64) -> &mut Self {
        self.update_tree(cn, |t| t.spcd = Some(spcd))
    }

    pub fn tree_status(&mut self, cn: &str, statuscd: i64) -> &mut Self {
        self.update_tree(cn, |t| t.statuscd = statuscd)
    }

    fn update_tree(&mut self, cn: &str, update: impl Fn(&mut TreeRow)) -> &mut Self {
        for t in self.trees.iter_mut().filter(|t| t.cn == cn) {
            update(t);
        }
        self
    }

    /// Add a component record for a tree. The same values are written for
    /// every land and tree basis.
    #[allow(clippy::too_many_arguments)]
    pub fn component(
        &mut self,
        tree_cn: &str,
        plot_cn: &str,
        label: &str,
        tpa_grow: f64,
        tpa_mort: f64,
        tpa_remv: f64,
        subptyp: i64,
    ) -> &mut Self {
        self.components.push(ComponentRow {
            tre_cn: tree_cn.to_string(),
            plt_cn: plot_cn.to_string(),
            label: label.to_string(),
            tpa_grow,
            tpa_mort,
            tpa_remv,
            subptyp,
        });
        self
    }

    /// Begin and midpoint measurements of a tree (volume and biomass alike),
    /// replacing any set earlier
    pub fn component_measurements(&mut self, tree_cn: &str, begin: Option<f64>, midpoint: Option<f64>) -> &mut Self {
        self.measurements.retain(|m| m.tre_cn != tree_cn);
        self.measurements.push(MeasurementRow {
            tre_cn: tree_cn.to_string(),
            begin,
            midpoint,
        });
        self
    }

    /// Build every table into a memory store
    pub fn build(&self) -> Result<MemoryStore> {
        let mut store = MemoryStore::new();
        let mut insert = |name: &str, (schema, batch): (SchemaRef, RecordBatch)| {
            store.insert(name, schema, vec![batch])
        };

        insert(tables::POP_EVAL, self.eval_table()?)?;
        insert(tables::POP_EVAL_TYP, self.eval_type_table()?)?;
        insert(tables::POP_STRATUM, self.stratum_table()?)?;
        insert(tables::POP_PLOT_STRATUM_ASSGN, self.assignment_table()?)?;
        insert(tables::PLOT, self.plot_table()?)?;
        insert(tables::COND, self.cond_table()?)?;
        insert(tables::TREE, self.tree_table()?)?;
        if !self.components.is_empty() {
            insert(tables::TREE_GRM_COMPONENT, self.component_table()?)?;
        }
        if !self.measurements.is_empty() {
            insert(tables::TREE_GRM_BEGIN, self.measurement_table(|m| m.begin)?)?;
            insert(tables::TREE_GRM_MIDPT, self.measurement_table(|m| m.midpoint)?)?;
        }
        Ok(store)
    }

    fn eval_table(&self) -> Result<(SchemaRef, RecordBatch)> {
        let e = &self.evaluations;
        let descriptions: Vec<String> = e
            .iter()
            .map(|e| format!("Evaluation {} ({}-{})", e.evalid, e.start, e.end))
            .collect();
        table(vec![
            (eval::CN, utf8(e.iter().map(|e| Some(e.cn.as_str())))),
            (eval::EVALID, int64(e.iter().map(|e| Some(e.evalid)))),
            (eval::STATECD, int64(e.iter().map(|e| Some(e.statecd)))),
            (eval::EVAL_DESCR, utf8(descriptions.iter().map(|d| Some(d.as_str())))),
            (eval::START_INVYR, int64(e.iter().map(|e| Some(e.start)))),
            (eval::END_INVYR, int64(e.iter().map(|e| Some(e.end)))),
        ])
    }

    fn eval_type_table(&self) -> Result<(SchemaRef, RecordBatch)> {
        let pairs: Vec<(&str, &str)> = self
            .evaluations
            .iter()
            .flat_map(|e| e.types.iter().map(move |t| (e.cn.as_str(), t.as_str())))
            .collect();
        table(vec![
            (eval_typ::EVAL_CN, utf8(pairs.iter().map(|p| Some(p.0)))),
            (eval_typ::EVAL_TYP, utf8(pairs.iter().map(|p| Some(p.1)))),
        ])
    }

    fn stratum_table(&self) -> Result<(SchemaRef, RecordBatch)> {
        let s = &self.strata;
        let units: Vec<String> = s.iter().map(|s| format!("U{}", s.evalid)).collect();
        table(vec![
            (stratum::CN, utf8(s.iter().map(|s| Some(s.cn.as_str())))),
            (stratum::EVALID, int64(s.iter().map(|s| Some(s.evalid)))),
            (stratum::ESTN_UNIT_CN, utf8(units.iter().map(|u| Some(u.as_str())))),
            (stratum::EXPNS, float64(s.iter().map(|s| s.expns))),
            (stratum::ADJ_FACTOR_MICR, float64(s.iter().map(|s| s.micr))),
            (stratum::ADJ_FACTOR_SUBP, float64(s.iter().map(|s| s.subp))),
            (stratum::ADJ_FACTOR_MACR, float64(s.iter().map(|s| s.macr))),
            (stratum::P1POINTCNT, float64(s.iter().map(|s| s.p1pointcnt))),
            (stratum::P2POINTCNT, float64(s.iter().map(|s| {
                let n = self.assignments.iter().filter(|a| a.1 == s.cn).count();
                Some(n as f64)
            }))),
        ])
    }

    fn assignment_table(&self) -> Result<(SchemaRef, RecordBatch)> {
        let a = &self.assignments;
        table(vec![
            (assignment::PLT_CN, utf8(a.iter().map(|a| Some(a.0.as_str())))),
            (assignment::STRATUM_CN, utf8(a.iter().map(|a| Some(a.1.as_str())))),
            (assignment::EVALID, int64(a.iter().map(|a| Some(a.2)))),
        ])
    }

    fn plot_table(&self) -> Result<(SchemaRef, RecordBatch)> {
        let p = &self.plots;
        table(vec![
            (plot::CN, utf8(p.iter().map(|p| Some(p.cn.as_str())))),
            (plot::STATECD, int64(p.iter().map(|p| p.statecd))),
            (plot::INVYR, int64(p.iter().map(|p| p.invyr))),
            (plot::DESIGNCD, int64(p.iter().map(|_| Some(1)))),
            (plot::MACRO_BREAKPOINT_DIA, float64(p.iter().map(|p| p.macro_breakpoint_dia))),
            (plot::REMPER, float64(p.iter().map(|p| p.remper))),
        ])
    }

    fn cond_table(&self) -> Result<(SchemaRef, RecordBatch)> {
        let c = &self.conditions;
        table(vec![
            (cond::PLT_CN, utf8(c.iter().map(|c| Some(c.plt_cn.as_str())))),
            (cond::CONDID, int64(c.iter().map(|c| Some(c.condid)))),
            (cond::COND_STATUS_CD, int64(c.iter().map(|c| Some(c.status)))),
            (cond::CONDPROP_UNADJ, float64(c.iter().map(|c| Some(c.proportion)))),
            (cond::PROP_BASIS, utf8(c.iter().map(|c| Some(c.prop_basis.as_str())))),
            (cond::FORTYPCD, int64(c.iter().map(|c| c.fortypcd))),
            (cond::SITECLCD, int64(c.iter().map(|c| c.siteclcd))),
            (cond::RESERVCD, int64(c.iter().map(|c| c.reservcd))),
            (cond::OWNGRPCD, int64(c.iter().map(|c| c.owngrpcd))),
        ])
    }

    fn tree_table(&self) -> Result<(SchemaRef, RecordBatch)> {
        let t = &self.trees;
        table(vec![
            (tree::CN, utf8(t.iter().map(|t| Some(t.cn.as_str())))),
            (tree::PLT_CN, utf8(t.iter().map(|t| Some(t.plt_cn.as_str())))),
            (tree::CONDID, int64(t.iter().map(|t| Some(t.condid)))),
            (tree::STATUSCD, int64(t.iter().map(|t| Some(t.statuscd)))),
            (tree::SPCD, int64(t.iter().map(|t| t.spcd))),
            (tree::DIA, float64(t.iter().map(|t| t.dia))),
            (tree::TPA_UNADJ, float64(t.iter().map(|t| t.tpa_unadj))),
            (tree::TREECLCD, int64(t.iter().map(|t| t.treeclcd))),
            (tree::VOLCFNET, float64(t.iter().map(|t| t.volcfnet))),
            (tree::VOLCFGRS, float64(t.iter().map(|t| t.volcfgrs))),
            (tree::VOLCFSND, float64(t.iter().map(|t| t.volcfgrs))),
            (tree::VOLCSNET, float64(t.iter().map(|_| None))),
            (tree::DRYBIO_AG, float64(t.iter().map(|t| t.drybio_ag))),
            (tree::DRYBIO_BG, float64(t.iter().map(|t| t.drybio_bg))),
            (tree::DRYBIO_BOLE, float64(t.iter().map(|t| t.drybio_bole))),
        ])
    }

    fn component_table(&self) -> Result<(SchemaRef, RecordBatch)> {
        let c = &self.components;
        let mut columns = vec![
            (grm_component::TRE_CN.to_string(), utf8(c.iter().map(|c| Some(c.tre_cn.as_str())))),
            (grm_component::PLT_CN.to_string(), utf8(c.iter().map(|c| Some(c.plt_cn.as_str())))),
        ];
        for tree_basis in ["AL", "GS"] {
            for land_basis in ["FOREST", "TIMBER"] {
                let names = grm_component::GrmColumns::new(tree_basis, land_basis);
                columns.push((names.component, utf8(c.iter().map(|c| Some(c.label.as_str())))));
                columns.push((names.tpa_grow, float64(c.iter().map(|c| Some(c.tpa_grow)))));
                columns.push((names.tpa_mort, float64(c.iter().map(|c| Some(c.tpa_mort)))));
                columns.push((names.tpa_remv, float64(c.iter().map(|c| Some(c.tpa_remv)))));
                columns.push((names.subplot_type, int64(c.iter().map(|c| Some(c.subptyp)))));
            }
        }
        table(columns.iter().map(|(name, array)| (name.as_str(), Arc::clone(array))).collect())
    }

    fn measurement_table(&self, point: impl Fn(&MeasurementRow) -> Option<f64>) -> Result<(SchemaRef, RecordBatch)> {
        let m = &self.measurements;
        table(vec![
            (grm_measure::TRE_CN, utf8(m.iter().map(|m| Some(m.tre_cn.as_str())))),
            (grm_measure::VOLCFNET, float64(m.iter().map(&point))),
            (grm_measure::DRYBIO_AG, float64(m.iter().map(&point))),
        ])
    }
}

/// Shape of a seeded random inventory
#[derive(Debug, Clone, PartialEq)]
pub struct RandomInventory {
    pub seed: u64,
    pub states: Vec<i64>,
    pub strata_per_state: usize,
    pub plots_per_stratum: usize,
    /// Conditions per plot are drawn from 1..=max_conditions
    pub max_conditions: usize,
    /// Trees per forest condition are drawn from 0..=max_trees
    pub max_trees: usize,
    /// Add remeasurement components and a growth/removals/mortality evaluation
    pub remeasured: bool,
}

impl Default for RandomInventory {
    fn default() -> Self {
        Self {
            seed: 42,
            states: vec![1],
            strata_per_state: 3,
            plots_per_stratum: 8,
            max_conditions: 2,
            max_trees: 12,
            remeasured: true,
        }
    }
}

const SPECIES: [i64; 4] = [131, 316, 611, 833];
const FOREST_TYPES: [i64; 3] = [161, 503, 801];
const END_YEAR: i64 = 2019;

impl RandomInventory {
    /// Fill a builder. Each state gets a current-area (`..00`), volume
    /// (`..01`) and, when remeasured, a change (`..03`) evaluation sharing one
    /// set of plots.
    #[must_use]
    pub fn builder(&self) -> InventoryBuilder {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut builder = InventoryBuilder::new();

        for &state in &self.states {
            let base = state * 10_000 + (END_YEAR % 100) * 100;
            let mut evaluations = vec![
                (base, vec!["EXPALL", "EXPCURR"]),
                (base + 1, vec!["EXPVOL"]),
            ];
            if self.remeasured {
                evaluations.push((base + 3, vec!["EXPGROW", "EXPMORT", "EXPREMV"]));
            }
            for (evalid, types) in &evaluations {
                builder.evaluation(*evalid, &format!("E{evalid}"), state, END_YEAR - 4, END_YEAR, types);
            }

            for h in 0..self.strata_per_state {
                let expns = rng.random_range(2_000.0..8_000.0);
                let factors = (
                    rng.random_range(1.0..1.1),
                    rng.random_range(1.0..1.1),
                    rng.random_range(1.0..1.1),
                );
                for (evalid, _) in &evaluations {
                    let cn = format!("S{evalid}_{h}");
                    builder.stratum_with_factors(&cn, *evalid, expns, factors.0, factors.1, factors.2);
                }
                for i in 0..self.plots_per_stratum {
                    let plot_cn = format!("{state}{h:02}{i:04}");
                    for (evalid, _) in &evaluations {
                        builder.plot(&plot_cn, &format!("S{evalid}_{h}"), *evalid);
                    }
                    self.fill_plot(&mut rng, &mut builder, &plot_cn);
                }
            }
        }
        builder
    }

    fn fill_plot(&self, rng: &mut StdRng, builder: &mut InventoryBuilder, plot_cn: &str) {
        let conditions = rng.random_range(1..=self.max_conditions.max(1));
        let mut remaining: f64 = 1.0;
        for condid in 1..=conditions as i64 {
            let proportion = if condid as usize == conditions {
                remaining
            } else {
                let p = (remaining * rng.random_range(0.2..0.8) * 4.0).round() / 4.0;
                remaining -= p;
                p
            };
            let forest = rng.random_bool(0.7);
            builder.condition(plot_cn, condid, proportion, if forest { 1 } else { 2 });
            if !forest {
                continue;
            }
            let fortypcd = FOREST_TYPES[rng.random_range(0..FOREST_TYPES.len())];
            builder.condition_forest_type(plot_cn, condid, fortypcd);

            for t in 0..rng.random_range(0..=self.max_trees) {
                let tree_cn = format!("{plot_cn}{condid}{t:03}");
                let dia: f64 = rng.random_range(1.0..30.0);
                let tpa = if dia < 5.0 { 74.965 } else { 6.018 };
                let volume = if dia < 5.0 { 0.0 } else { 0.15 * dia * dia };
                builder.tree(&tree_cn, plot_cn, condid, dia, tpa, volume);
                builder.update_tree(&tree_cn, |row| {
                    row.drybio_ag = Some(8.0 * dia * dia);
                    row.drybio_bg = Some(1.6 * dia * dia);
                    row.drybio_bole = Some(5.0 * dia * dia);
                });
                builder.tree_species(&tree_cn, SPECIES[rng.random_range(0..SPECIES.len())]);

                if self.remeasured {
                    let draw: f64 = rng.random();
                    let label = match draw {
                        d if d < 0.70 => "SURVIVOR",
                        d if d < 0.80 => "INGROWTH",
                        d if d < 0.90 => "MORTALITY1",
                        _ => "CUT1",
                    };
                    if label == "MORTALITY1" {
                        builder.tree_status(&tree_cn, 2);
                    }
                    let tpa_mort = if label == "MORTALITY1" { tpa } else { 0.0 };
                    let tpa_remv = if label == "CUT1" { tpa } else { 0.0 };
                    let subptyp = if dia < 5.0 { 2 } else { 1 };
                    builder.component(&tree_cn, plot_cn, label, tpa, tpa_mort, tpa_remv, subptyp);
                    let begin = (label != "INGROWTH").then_some(volume * 0.8);
                    builder.component_measurements(&tree_cn, begin, Some(volume * 0.9));
                }
            }
        }
    }

    pub fn build(&self) -> Result<MemoryStore> {
        self.builder().build()
    }
}

/// Write every table of a store to `<dir>/<TABLE>.parquet`
pub fn write_parquet(store: &MemoryStore, dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    for name in store.table_names() {
        let schema = store.schema(&name)?;
        let batches = store.scan(&ScanRequest::new(&name))?;
        let file = File::create(dir.join(format!("{name}.parquet")))?;
        let mut writer = ArrowWriter::try_new(file, schema, None)?;
        for batch in &batches {
            writer.write(batch)?;
        }
        writer.close()?;
        log::debug!("Wrote {} rows of {name}", store.num_rows(&name));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_writes_every_core_table() {
        let mut builder = InventoryBuilder::new();
        builder
            .evaluation(101, "E1", 1, 2015, 2019, &["EXPVOL"])
            .stratum("S1", 101, 1000.0)
            .plot("P1", "S1", 101)
            .condition("P1", 1, 1.0, 1)
            .tree("T1", "P1", 1, 10.0, 6.0, 20.0);
        let store = builder.build().unwrap();
        for table in [tables::POP_EVAL, tables::POP_STRATUM, tables::PLOT, tables::COND, tables::TREE] {
            assert_eq!(store.num_rows(table), 1, "{table}");
        }
        assert!(!store.has_table(tables::TREE_GRM_COMPONENT));
    }

    #[test]
    fn random_inventory_is_reproducible() {
        let shape = RandomInventory::default();
        let a = shape.build().unwrap();
        let b = shape.build().unwrap();
        assert_eq!(a.num_rows(tables::TREE), b.num_rows(tables::TREE));
        assert_eq!(
            a.num_rows(tables::PLOT),
            shape.strata_per_state * shape.plots_per_stratum
        );
        // one assignment per plot and evaluation
        assert_eq!(a.num_rows(tables::POP_PLOT_STRATUM_ASSGN), 3 * a.num_rows(tables::PLOT));
    }

    #[test]
    fn condition_proportions_sum_to_one() {
        let store = RandomInventory {
            max_conditions: 3,
            ..RandomInventory::default()
        }
        .build()
        .unwrap();
        let batches = store.scan(&ScanRequest::new(tables::COND)).unwrap();
        let mut totals = std::collections::HashMap::new();
        for batch in &batches {
            let plots = crate::schema::key_values(batch, tables::COND, cond::PLT_CN).unwrap();
            let props = crate::schema::f64_values(batch, tables::COND, cond::CONDPROP_UNADJ).unwrap();
            for (p, v) in plots.into_iter().zip(props) {
                *totals.entry(p.unwrap()).or_insert(0.0) += v.unwrap();
            }
        }
        assert!(totals.values().all(|t| (t - 1.0_f64).abs() < 1e-9));
    }

    #[test]
    fn parquet_export_round_trips_through_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = RandomInventory::default().build().unwrap();
        write_parquet(&store, dir.path()).unwrap();
        let parquet = crate::storage::ParquetStore::open(dir.path()).unwrap();
        let rows: usize = parquet
            .scan(&ScanRequest::new(tables::TREE))
            .unwrap()
            .iter()
            .map(RecordBatch::num_rows)
            .sum();
        assert_eq!(rows, store.num_rows(tables::TREE));
    }
}
