//! Hierarchical data assembly
//!
//! Loads the plot, condition and tree tables of one evaluation and joins
//! them plot -> condition -> tree. The plot and tree domains drop rows before
//! the join. The area domain only flags conditions: every condition of an
//! in-domain plot is kept, since a condition without matching trees still
//! contributes its area to the per-acre denominator.

use arrow::record_batch::RecordBatch;
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use crate::algorithm::grouping::{GroupKey, GroupValue, GroupingPlan};
use crate::cache::TableCache;
use crate::error::{EstimationError, Result};
use crate::evaluation::SampleDesign;
use crate::filter::domain::land_base;
use crate::filter::{CompiledDomain, DomainFilters, LandType, TreeType};
use crate::schema::grm_component::GrmColumns;
use crate::schema::{
    Level, cond, f64_values, grm_component, grm_measure, group_values, i64_values, key_values,
    optional_f64_values, optional_i64_values, plot, tables, text_values, tree, validate_columns,
};
use crate::storage::{KeyFilter, ScanRequest, TableSource};

/// A sampled plot of the evaluation that passed the plot domain
#[derive(Debug, Clone, PartialEq)]
pub struct PlotRecord {
    pub cn: String,
    pub stratum_cn: String,
    pub macro_breakpoint_dia: Option<f64>,
    /// Years between measurements, for annualizing growth
    pub remper: Option<f64>,
    /// Plot-level grouping values
    pub key: GroupKey,
}

/// A condition (parcel) of an in-domain plot
#[derive(Debug, Clone, PartialEq)]
pub struct ParcelRecord {
    /// Index into [`AssembledData::plots`]
    pub plot: usize,
    pub condid: i64,
    /// CONDPROP_UNADJ as recorded
    pub area_proportion: f64,
    pub prop_basis: Option<String>,
    /// Passes the land type and area domain
    pub in_domain: bool,
    /// Sampled land (forest or non-forest)
    pub in_land_base: bool,
    /// Plot grouping values followed by condition grouping values
    pub key: GroupKey,
}

/// A tree joined to its condition
#[derive(Debug, Clone, PartialEq)]
pub struct TreeRecord {
    /// Index into [`AssembledData::parcels`]
    pub parcel: usize,
    pub cn: String,
    pub dia: Option<f64>,
    pub tpa_unadj: Option<f64>,
    /// Requested measurement columns, in request order
    pub measures: SmallVec<[Option<f64>; 4]>,
    pub key: GroupKey,
}

/// A growth/removal/mortality component record joined to its tree and condition
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentRecord {
    pub parcel: usize,
    pub tree_cn: String,
    pub label: Option<String>,
    pub tpa_grow: Option<f64>,
    pub tpa_mort: Option<f64>,
    pub tpa_remv: Option<f64>,
    pub subplot_type: Option<i64>,
    pub begin: Option<f64>,
    pub midpoint: Option<f64>,
    pub end: Option<f64>,
    pub key: GroupKey,
}

/// What to load below the condition level
#[derive(Debug, Clone, PartialEq)]
pub enum ItemRequest {
    /// Conditions only (area estimation)
    None,
    /// Trees with the given measurement columns
    Trees { measures: Vec<String> },
    /// Component records for a land/tree basis. `measure` is the measurement
    /// column read at begin, midpoint and end; `None` counts trees.
    Components {
        columns: GrmColumns,
        measure: Option<String>,
    },
}

/// Everything the assembler needs for one estimation call
#[derive(Debug, Clone)]
pub struct AssemblyRequest<'a> {
    pub grouping: &'a GroupingPlan,
    pub domains: &'a DomainFilters,
    pub land_type: LandType,
    /// Tree type applied as a TREE predicate; `None` when the tree basis is
    /// carried by the component columns instead
    pub tree_type: Option<TreeType>,
    pub items: ItemRequest,
}

/// Joined records of one evaluation
#[derive(Debug, Clone, Default)]
pub struct AssembledData {
    pub plots: Vec<PlotRecord>,
    pub parcels: Vec<ParcelRecord>,
    pub trees: Vec<TreeRecord>,
    pub components: Vec<ComponentRecord>,
    /// Items whose condition was not found on an in-domain plot
    pub orphan_items: usize,
    /// Assigned plots missing from the PLOT table
    pub missing_plots: usize,
    pub warnings: Vec<String>,
}

/// Loads and joins the tables of one evaluation
pub struct HierarchicalAssembler<'a> {
    source: &'a dyn TableSource,
    cache: &'a mut TableCache,
    evalid: i64,
    design: &'a SampleDesign,
}

impl<'a> HierarchicalAssembler<'a> {
    pub fn new(
        source: &'a dyn TableSource,
        cache: &'a mut TableCache,
        evalid: i64,
        design: &'a SampleDesign,
    ) -> Self {
        Self {
            source,
            cache,
            evalid,
            design,
        }
    }

    fn load(
        &mut self,
        table: &str,
        columns: Vec<String>,
        key: KeyFilter,
        domain: Option<&CompiledDomain>,
    ) -> Result<Vec<RecordBatch>> {
        let request = ScanRequest::new(table)
            .with_columns(columns)
            .with_key_filter(key);
        self.cache
            .get_or_load(self.source, self.evalid, &request, domain)
    }

    pub fn assemble(&mut self, request: &AssemblyRequest<'_>) -> Result<AssembledData> {
        let mut data = AssembledData::default();

        self.load_plots(request, &mut data)?;
        let plot_index: FxHashMap<String, usize> = data
            .plots
            .iter()
            .enumerate()
            .map(|(i, p)| (p.cn.clone(), i))
            .collect();
        self.load_parcels(request, &plot_index, &mut data)?;

        let mut parcel_index: FxHashMap<(usize, i64), usize> = FxHashMap::default();
        for (i, parcel) in data.parcels.iter().enumerate() {
            parcel_index.insert((parcel.plot, parcel.condid), i);
        }
        let joins = Joins {
            plots: &plot_index,
            parcels: &parcel_index,
        };

        match &request.items {
            ItemRequest::None => {}
            ItemRequest::Trees { measures } => {
                self.load_trees(request, measures, &joins, &mut data)?;
            }
            ItemRequest::Components { columns, measure } => {
                self.load_components(request, columns, measure.as_deref(), &joins, &mut data)?;
            }
        }

        if data.orphan_items > 0 {
            let message = format!(
                "{} item records reference a condition missing from COND",
                data.orphan_items
            );
            log::warn!("{message}");
            data.warnings.push(message);
        }

        log::info!(
            "Assembled {} plots, {} conditions, {} trees, {} component records",
            data.plots.len(),
            data.parcels.len(),
            data.trees.len(),
            data.components.len()
        );
        Ok(data)
    }

    fn load_plots(&mut self, request: &AssemblyRequest<'_>, data: &mut AssembledData) -> Result<()> {
        let schema = self.source.schema(tables::PLOT)?;
        validate_columns(tables::PLOT, &schema, &plot::REQUIRED)?;

        let group_columns = request.grouping.columns_at(Level::Plot);
        let mut columns = vec![
            plot::CN.to_string(),
            plot::MACRO_BREAKPOINT_DIA.to_string(),
            plot::REMPER.to_string(),
        ];
        columns.extend(group_columns.iter().cloned());
        if let Some(domain) = &request.domains.plot {
            columns.extend(domain.columns().iter().cloned());
        }

        let key = KeyFilter::new(plot::CN, self.design.plot_ids());
        let batches = self.load(tables::PLOT, columns, key, request.domains.plot.as_ref())?;

        let mut seen = FxHashSet::default();
        for batch in &batches {
            let cns = key_values(batch, tables::PLOT, plot::CN)?;
            let breakpoints = optional_f64_values(batch, plot::MACRO_BREAKPOINT_DIA)?;
            let remper = optional_f64_values(batch, plot::REMPER)?;
            let keys = group_keys(batch, tables::PLOT, &group_columns)?;

            for (i, cn) in cns.into_iter().enumerate() {
                let Some(cn) = cn else { continue };
                let Some(stratum_cn) = self.design.stratum_cn_of(&cn) else {
                    continue;
                };
                if !seen.insert(cn.clone()) {
                    continue;
                }
                data.plots.push(PlotRecord {
                    stratum_cn: stratum_cn.to_string(),
                    cn,
                    macro_breakpoint_dia: breakpoints.as_ref().and_then(|v| v[i]),
                    remper: remper.as_ref().and_then(|v| v[i]),
                    key: keys[i].clone(),
                });
            }
        }

        if request.domains.plot.is_none() {
            data.missing_plots = self.design.num_plots().saturating_sub(data.plots.len());
            if data.missing_plots > 0 {
                let message = format!(
                    "{} assigned plots are missing from PLOT and count as empty",
                    data.missing_plots
                );
                log::warn!("{message}");
                data.warnings.push(message);
            }
        }
        Ok(())
    }

    fn load_parcels(
        &mut self,
        request: &AssemblyRequest<'_>,
        plot_index: &FxHashMap<String, usize>,
        data: &mut AssembledData,
    ) -> Result<()> {
        let schema = self.source.schema(tables::COND)?;
        validate_columns(tables::COND, &schema, &cond::REQUIRED)?;

        let mut domain = CompiledDomain::from_expr(request.land_type.predicate(), Level::Condition, &schema)?;
        if let Some(user) = &request.domains.area {
            domain = domain.and(user.clone());
        }
        let base = CompiledDomain::from_expr(land_base(), Level::Condition, &schema)?;

        let group_columns = request.grouping.columns_at(Level::Condition);
        let mut columns: Vec<String> = cond::REQUIRED.iter().map(ToString::to_string).collect();
        columns.push(cond::PROP_BASIS.to_string());
        columns.extend(group_columns.iter().cloned());
        columns.extend(domain.columns().iter().cloned());

        let key = KeyFilter::new(cond::PLT_CN, plot_index.keys().cloned());
        let batches = self.load(tables::COND, columns, key, None)?;

        for batch in &batches {
            let plots = key_values(batch, tables::COND, cond::PLT_CN)?;
            let condids = i64_values(batch, tables::COND, cond::CONDID)?;
            let proportions = f64_values(batch, tables::COND, cond::CONDPROP_UNADJ)?;
            let basis = match batch.column_by_name(cond::PROP_BASIS) {
                Some(_) => Some(text_values(batch, tables::COND, cond::PROP_BASIS)?),
                None => None,
            };
            let in_domain = domain.evaluate(batch)?;
            let in_base = base.evaluate(batch)?;
            let keys = group_keys(batch, tables::COND, &group_columns)?;

            for i in 0..batch.num_rows() {
                let (Some(plot_cn), Some(condid)) = (&plots[i], condids[i]) else {
                    continue;
                };
                let Some(&plot) = plot_index.get(plot_cn) else {
                    continue;
                };
                let mut key = data.plots[plot].key.clone();
                key.extend(keys[i].iter().cloned());
                data.parcels.push(ParcelRecord {
                    plot,
                    condid,
                    area_proportion: proportions[i].unwrap_or(0.0),
                    prop_basis: basis.as_ref().and_then(|b| b[i].clone()),
                    in_domain: in_domain[i],
                    in_land_base: in_base[i],
                    key,
                });
            }
        }
        Ok(())
    }

    /// Tree-level domain combined with the tree type predicate
    fn tree_domain(&self, request: &AssemblyRequest<'_>) -> Result<Option<CompiledDomain>> {
        let schema = self.source.schema(tables::TREE)?;
        validate_columns(tables::TREE, &schema, &tree::REQUIRED)?;
        let type_domain = match request.tree_type.and_then(TreeType::predicate) {
            Some(expr) => Some(CompiledDomain::from_expr(expr, Level::Item, &schema)?),
            None => None,
        };
        Ok(match (type_domain, request.domains.tree.clone()) {
            (Some(t), Some(user)) => Some(t.and(user)),
            (Some(t), None) => Some(t),
            (None, user) => user,
        })
    }

    fn tree_columns(
        request: &AssemblyRequest<'_>,
        domain: Option<&CompiledDomain>,
        extra: &[String],
    ) -> Vec<String> {
        let mut columns: Vec<String> = [tree::CN, tree::PLT_CN, tree::CONDID, tree::DIA, tree::TPA_UNADJ]
            .iter()
            .map(ToString::to_string)
            .collect();
        columns.extend(extra.iter().cloned());
        columns.extend(request.grouping.columns_at(Level::Item));
        if let Some(domain) = domain {
            columns.extend(domain.columns().iter().cloned());
        }
        columns
    }

    fn load_trees(
        &mut self,
        request: &AssemblyRequest<'_>,
        measures: &[String],
        joins: &Joins<'_>,
        data: &mut AssembledData,
    ) -> Result<()> {
        let domain = self.tree_domain(request)?;
        let columns = Self::tree_columns(request, domain.as_ref(), measures);
        let key = KeyFilter::new(tree::PLT_CN, joins.plots.keys().cloned());
        let batches = self.load(tables::TREE, columns, key, domain.as_ref())?;
        let group_columns = request.grouping.columns_at(Level::Item);

        for batch in &batches {
            let rows = TreeRows::read(batch, &group_columns)?;
            let measure_values = measures
                .iter()
                .map(|m| optional_f64_values(batch, m))
                .collect::<Result<Vec<_>>>()?;

            for i in 0..batch.num_rows() {
                let Some(parcel) = joins.parcel_of(&rows, i, &mut data.orphan_items) else {
                    continue;
                };
                data.trees.push(TreeRecord {
                    parcel,
                    cn: rows.cns[i].clone().unwrap_or_default(),
                    dia: rows.dia[i],
                    tpa_unadj: rows.tpa[i],
                    measures: measure_values
                        .iter()
                        .map(|values| values.as_ref().and_then(|v| v[i]))
                        .collect(),
                    key: rows.keys[i].clone(),
                });
            }
        }
        Ok(())
    }

    fn load_components(
        &mut self,
        request: &AssemblyRequest<'_>,
        grm: &GrmColumns,
        measure: Option<&str>,
        joins: &Joins<'_>,
        data: &mut AssembledData,
    ) -> Result<()> {
        let schema = self.source.schema(tables::TREE_GRM_COMPONENT)?;
        validate_columns(tables::TREE_GRM_COMPONENT, &schema, &grm_component::REQUIRED)?;
        validate_columns(tables::TREE_GRM_COMPONENT, &schema, &grm.all())?;

        let plot_key = || KeyFilter::new(grm_component::PLT_CN, joins.plots.keys().cloned());
        let mut columns: Vec<String> = grm_component::REQUIRED.iter().map(ToString::to_string).collect();
        columns.extend(grm.all().iter().map(ToString::to_string));
        let component_batches = self.load(tables::TREE_GRM_COMPONENT, columns, plot_key(), None)?;

        let mut components: FxHashMap<String, ComponentRow> = FxHashMap::default();
        for batch in &component_batches {
            let table = tables::TREE_GRM_COMPONENT;
            let cns = key_values(batch, table, grm_component::TRE_CN)?;
            let labels = text_values(batch, table, &grm.component)?;
            let grow = f64_values(batch, table, &grm.tpa_grow)?;
            let mort = f64_values(batch, table, &grm.tpa_mort)?;
            let remv = f64_values(batch, table, &grm.tpa_remv)?;
            let frames = i64_values(batch, table, &grm.subplot_type)?;
            for i in 0..batch.num_rows() {
                let Some(cn) = cns[i].clone() else { continue };
                components.insert(
                    cn,
                    ComponentRow {
                        label: labels[i].clone(),
                        tpa_grow: grow[i],
                        tpa_mort: mort[i],
                        tpa_remv: remv[i],
                        subplot_type: frames[i],
                    },
                );
            }
        }

        // Current tree rows carry the condition, grouping values and end measurement
        let domain = self.tree_domain(request)?;
        let extra: Vec<String> = measure.map(ToString::to_string).into_iter().collect();
        let columns = Self::tree_columns(request, domain.as_ref(), &extra);
        let key = KeyFilter::new(tree::PLT_CN, joins.plots.keys().cloned());
        let tree_batches = self.load(tables::TREE, columns, key, domain.as_ref())?;

        let begin = self.load_measurements(tables::TREE_GRM_BEGIN, measure, &components, data)?;
        let midpoint = self.load_measurements(tables::TREE_GRM_MIDPT, measure, &components, data)?;

        let group_columns = request.grouping.columns_at(Level::Item);
        for batch in &tree_batches {
            let rows = TreeRows::read(batch, &group_columns)?;
            let end_values = match measure {
                Some(m) => Some(f64_values(batch, tables::TREE, m)?),
                None => None,
            };
            for i in 0..batch.num_rows() {
                let Some(tree_cn) = rows.cns[i].clone() else { continue };
                let Some(component) = components.get(&tree_cn) else {
                    continue;
                };
                let Some(parcel) = joins.parcel_of(&rows, i, &mut data.orphan_items) else {
                    continue;
                };
                let point = |values: &FxHashMap<String, Option<f64>>| match measure {
                    Some(_) => values.get(&tree_cn).copied().flatten(),
                    None => Some(1.0),
                };
                data.components.push(ComponentRecord {
                    parcel,
                    label: component.label.clone(),
                    tpa_grow: component.tpa_grow,
                    tpa_mort: component.tpa_mort,
                    tpa_remv: component.tpa_remv,
                    subplot_type: component.subplot_type,
                    begin: point(&begin),
                    midpoint: point(&midpoint),
                    end: match &end_values {
                        Some(values) => values[i],
                        None => Some(1.0),
                    },
                    key: rows.keys[i].clone(),
                    tree_cn,
                });
            }
        }

        let unmatched = components.len().saturating_sub(data.components.len());
        if unmatched > 0 {
            log::debug!("{unmatched} component records had no in-domain tree");
        }
        Ok(())
    }

    /// Begin or midpoint measurements by tree, empty when the table or
    /// measure is absent
    fn load_measurements(
        &mut self,
        table: &str,
        measure: Option<&str>,
        components: &FxHashMap<String, ComponentRow>,
        data: &mut AssembledData,
    ) -> Result<FxHashMap<String, Option<f64>>> {
        let Some(measure) = measure else {
            return Ok(FxHashMap::default());
        };
        if !self.source.has_table(table) {
            let message = format!("{table} not found; {measure} at that point is unavailable");
            log::warn!("{message}");
            data.warnings.push(message);
            return Ok(FxHashMap::default());
        }

        let columns = vec![grm_measure::TRE_CN.to_string(), measure.to_string()];
        let key = KeyFilter::new(grm_measure::TRE_CN, components.keys().cloned());
        let batches = self.load(table, columns, key, None)?;

        let mut values = FxHashMap::default();
        for batch in &batches {
            let cns = key_values(batch, table, grm_measure::TRE_CN)?;
            let measured = optional_f64_values(batch, measure)?.ok_or_else(|| {
                EstimationError::MissingColumn {
                    table: table.to_string(),
                    column: measure.to_string(),
                }
            })?;
            for (cn, value) in cns.into_iter().zip(measured) {
                if let Some(cn) = cn {
                    values.insert(cn, value);
                }
            }
        }
        Ok(values)
    }
}

struct ComponentRow {
    label: Option<String>,
    tpa_grow: Option<f64>,
    tpa_mort: Option<f64>,
    tpa_remv: Option<f64>,
    subplot_type: Option<i64>,
}

/// Columns shared by every tree read
struct TreeRows {
    cns: Vec<Option<String>>,
    plots: Vec<Option<String>>,
    condids: Vec<Option<i64>>,
    dia: Vec<Option<f64>>,
    tpa: Vec<Option<f64>>,
    keys: Vec<GroupKey>,
}

impl TreeRows {
    fn read(batch: &RecordBatch, group_columns: &[String]) -> Result<Self> {
        Ok(Self {
            cns: key_values(batch, tables::TREE, tree::CN)?,
            plots: key_values(batch, tables::TREE, tree::PLT_CN)?,
            condids: i64_values(batch, tables::TREE, tree::CONDID)?,
            dia: f64_values(batch, tables::TREE, tree::DIA)?,
            tpa: optional_f64_values(batch, tree::TPA_UNADJ)?
                .unwrap_or_else(|| vec![None; batch.num_rows()]),
            keys: group_keys(batch, tables::TREE, group_columns)?,
        })
    }
}

struct Joins<'a> {
    plots: &'a FxHashMap<String, usize>,
    parcels: &'a FxHashMap<(usize, i64), usize>,
}

impl Joins<'_> {
    /// Parcel of tree row `i`. Trees of plots outside the domain are skipped
    /// silently; trees of in-domain plots without a condition are orphans.
    fn parcel_of(&self, rows: &TreeRows, i: usize, orphans: &mut usize) -> Option<usize> {
        let plot = self.plots.get(rows.plots[i].as_ref()?)?;
        let parcel = rows
            .condids[i]
            .and_then(|condid| self.parcels.get(&(*plot, condid)).copied());
        if parcel.is_none() {
            *orphans += 1;
        }
        parcel
    }
}

/// Grouping values for each row of a batch
fn group_keys(batch: &RecordBatch, table: &str, columns: &[String]) -> Result<Vec<GroupKey>> {
    let mut keys = vec![GroupKey::new(); batch.num_rows()];
    for column in columns {
        let values: Vec<GroupValue> = group_values(batch, table, column)?;
        for (key, value) in keys.iter_mut().zip(values) {
            key.push(value);
        }
    }
    Ok(keys)
}

/// Optional REMPER lookup helper used by the temporal estimators
#[must_use]
pub fn remper_of(data: &AssembledData, parcel: usize) -> Option<f64> {
    data.parcels
        .get(parcel)
        .and_then(|p| data.plots.get(p.plot))
        .and_then(|p| p.remper)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::{EvalType, EvaluationRequest, EvaluationSelector};
    use crate::filter::LevelSchemas;
    use crate::synthetic::InventoryBuilder;

    fn inventory() -> crate::storage::MemoryStore {
        let mut builder = InventoryBuilder::new();
        builder
            .evaluation(101, "E1", 1, 2015, 2019, &["EXPCURR", "EXPVOL"])
            .stratum("S1", 101, 1000.0)
            .plot("P1", "S1", 101)
            .plot("P2", "S1", 101)
            .condition("P1", 1, 0.6, 1)
            .condition("P1", 2, 0.4, 1)
            .condition("P2", 1, 1.0, 2)
            .tree("T1", "P1", 1, 10.0, 6.0, 20.0)
            .tree("T2", "P1", 1, 12.0, 6.0, 30.0)
            .tree("T3", "P1", 3, 8.0, 6.0, 10.0);
        builder.build().unwrap()
    }

    fn assemble(store: &crate::storage::MemoryStore, area: Option<&str>) -> AssembledData {
        let selector = EvaluationSelector::new(store);
        let mut request = EvaluationRequest::new(EvalType::Volume);
        request.evalid = Some(101);
        let resolved = selector.resolve(&request).unwrap();
        let schemas = LevelSchemas {
            plot: store.schema(tables::PLOT).unwrap(),
            condition: store.schema(tables::COND).unwrap(),
            item: Some(store.schema(tables::TREE).unwrap()),
        };
        let domains = DomainFilters::compile(None, area, None, &schemas).unwrap();
        let grouping = GroupingPlan::none();
        let mut cache = TableCache::new();
        let mut assembler = HierarchicalAssembler::new(store, &mut cache, 101, &resolved.design);
        assembler
            .assemble(&AssemblyRequest {
                grouping: &grouping,
                domains: &domains,
                land_type: LandType::Forest,
                tree_type: Some(TreeType::Live),
                items: ItemRequest::Trees {
                    measures: vec![tree::VOLCFNET.to_string()],
                },
            })
            .unwrap()
    }

    #[test]
    fn zero_tree_conditions_are_kept() {
        let store = inventory();
        let data = assemble(&store, None);
        assert_eq!(data.parcels.len(), 3);
        assert_eq!(data.trees.len(), 2);
        assert_eq!(data.orphan_items, 1);
        let p2 = data
            .parcels
            .iter()
            .find(|p| data.plots[p.plot].cn == "P2")
            .unwrap();
        assert!(!p2.in_domain);
        assert!(p2.in_land_base);
        assert!((p2.area_proportion - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn area_domain_flags_instead_of_dropping() {
        let store = inventory();
        let data = assemble(&store, Some("CONDID == 2"));
        assert_eq!(data.parcels.len(), 3);
        assert_eq!(data.parcels.iter().filter(|p| p.in_domain).count(), 1);
        // Trees are still joined to out-of-domain conditions
        assert_eq!(data.trees.len(), 2);
    }
}
