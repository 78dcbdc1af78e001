//! Grouping keys and their resolution to hierarchy levels.

use std::fmt;

use arrow::datatypes::Schema;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::error::{EstimationError, Result};
use crate::schema::Level;

/// A single grouping value
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GroupValue {
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
}

impl fmt::Display for GroupValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

/// Values of the grouping columns held at one level, in plan order
pub type GroupKey = SmallVec<[GroupValue; 4]>;

/// A grouping column resolved to the level that holds it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupColumn {
    pub name: String,
    pub level: Level,
    /// Position of this column within its level's key
    pub slot: usize,
}

/// Resolved grouping columns
///
/// Plot and condition columns form the *parcel key*, tree columns the *item
/// key*. The split matters for the denominator: parcel-level groups partition
/// the area, item-level groups share it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupingPlan {
    columns: Vec<GroupColumn>,
}

impl GroupingPlan {
    /// Resolve grouping column names against the level schemas.
    ///
    /// Each column binds to the coarsest level that has it. `items` is `None`
    /// for estimators that never read the tree table, so tree columns are
    /// rejected there.
    pub fn resolve(
        names: &[String],
        plots: &Schema,
        conditions: &Schema,
        items: Option<&Schema>,
    ) -> Result<Self> {
        let mut columns = Vec::with_capacity(names.len());
        let mut slots = [0usize; 3];

        for name in names {
            if columns.iter().any(|c: &GroupColumn| &c.name == name) {
                continue;
            }
            let level = if plots.field_with_name(name).is_ok() {
                Level::Plot
            } else if conditions.field_with_name(name).is_ok() {
                Level::Condition
            } else if items.is_some_and(|s| s.field_with_name(name).is_ok()) {
                Level::Item
            } else {
                let level = if items.is_some() { Level::Item } else { Level::Condition };
                return Err(EstimationError::unknown_attribute(name, level, None));
            };

            let index = level_index(level);
            columns.push(GroupColumn {
                name: name.clone(),
                level,
                slot: slots[index],
            });
            slots[index] += 1;
        }

        Ok(Self { columns })
    }

    /// Ungrouped plan
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Column names bound to a level, in slot order
    #[must_use]
    pub fn columns_at(&self, level: Level) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| c.level == level)
            .map(|c| c.name.clone())
            .collect()
    }

    #[must_use]
    pub fn has_item_keys(&self) -> bool {
        self.columns.iter().any(|c| c.level == Level::Item)
    }

    /// Column names in caller order
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Reassemble a caller-ordered group from a parcel key (plot values then
    /// condition values) and an item key
    #[must_use]
    pub fn merge(&self, parcel_key: &GroupKey, item_key: &GroupKey) -> Vec<(String, GroupValue)> {
        let plot_width = self.columns.iter().filter(|c| c.level == Level::Plot).count();
        self.columns
            .iter()
            .map(|c| {
                let value = match c.level {
                    Level::Plot => parcel_key.get(c.slot),
                    Level::Condition => parcel_key.get(plot_width + c.slot),
                    Level::Item => item_key.get(c.slot),
                };
                (c.name.clone(), value.cloned().unwrap_or(GroupValue::Null))
            })
            .collect()
    }
}

const fn level_index(level: Level) -> usize {
    match level {
        Level::Plot => 0,
        Level::Condition => 1,
        Level::Item => 2,
    }
}
