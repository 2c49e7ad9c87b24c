//! Placeholder naming and the per-category binding maps.

use crate::error::{OrmError, OrmResult};
use crate::executor::Parameters;
use crate::value::Value;
use std::str::FromStr;

/// Generates strictly increasing placeholder names for one statement tree.
///
/// Two independent counters: `@param<N>` for condition values, `@value<N>` for
/// write values, both starting at 1. Each root builder owns its own registry,
/// so numbering starts at 1 per statement and concurrent builders cannot
/// interleave. Child builders (nested groups, subqueries, joins) are seeded
/// from the parent's counters, and the parent adopts the child's advanced
/// counters at merge time, keeping names unique across the whole tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamRegistry {
    params: u32,
    values: u32,
}

impl ParamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next condition placeholder, `@param1`, `@param2`, ...
    pub(crate) fn next_param(&mut self) -> String {
        self.params += 1;
        format!("@param{}", self.params)
    }

    /// Next write-value placeholder, `@value1`, `@value2`, ...
    pub(crate) fn next_value(&mut self) -> String {
        self.values += 1;
        format!("@value{}", self.values)
    }

    /// Zero both counters.
    pub fn reset(&mut self) {
        self.params = 0;
        self.values = 0;
    }

    /// Fold a child registry's progress back into this one.
    pub(crate) fn adopt(&mut self, child: &ParamRegistry) {
        self.params = self.params.max(child.params);
        self.values = self.values.max(child.values);
    }
}

/// The binding categories, in flatten order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingCategory {
    Select,
    From,
    Join,
    Where,
    GroupBy,
    Having,
    Order,
}

impl BindingCategory {
    pub const ALL: [BindingCategory; 7] = [
        BindingCategory::Select,
        BindingCategory::From,
        BindingCategory::Join,
        BindingCategory::Where,
        BindingCategory::GroupBy,
        BindingCategory::Having,
        BindingCategory::Order,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BindingCategory::Select => "select",
            BindingCategory::From => "from",
            BindingCategory::Join => "join",
            BindingCategory::Where => "where",
            BindingCategory::GroupBy => "groupBy",
            BindingCategory::Having => "having",
            BindingCategory::Order => "order",
        }
    }

    fn index(self) -> usize {
        match self {
            BindingCategory::Select => 0,
            BindingCategory::From => 1,
            BindingCategory::Join => 2,
            BindingCategory::Where => 3,
            BindingCategory::GroupBy => 4,
            BindingCategory::Having => 5,
            BindingCategory::Order => 6,
        }
    }
}

impl FromStr for BindingCategory {
    type Err = OrmError;

    fn from_str(s: &str) -> OrmResult<Self> {
        BindingCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| OrmError::InvalidBindingCategory {
                category: s.to_string(),
            })
    }
}

impl std::fmt::Display for BindingCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-category ordered binding maps.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawBindings {
    maps: [Parameters; 7],
}

impl RawBindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one named value into a category, stripping any leading `@`.
    ///
    /// An existing key keeps its position; the value is replaced.
    pub fn add(&mut self, category: BindingCategory, key: &str, value: Value) {
        let key = key.strip_prefix('@').unwrap_or(key);
        self.maps[category.index()].insert(key.to_string(), value);
    }

    pub fn category(&self, category: BindingCategory) -> &Parameters {
        &self.maps[category.index()]
    }

    pub(crate) fn clear(&mut self, category: BindingCategory) {
        self.maps[category.index()].clear();
    }

    /// Flatten all categories into one map, in category order; on key
    /// collision the later value wins while the key keeps its first position.
    pub fn flatten(&self) -> Parameters {
        let mut flat = Parameters::new();
        for map in &self.maps {
            for (key, value) in map {
                flat.insert(key.clone(), value.clone());
            }
        }
        flat
    }
}
