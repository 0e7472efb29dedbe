//! Result rows and their nested foreign-key extras.

use std::sync::{Arc, OnceLock};

use crudkit_query::{Entity, FieldRef, Value};
use indexmap::IndexMap;
use serde_json::{Map, Value as JsonValue};

/// Key under which nested relations appear in a materialized row.
pub const EXTRA_KEY: &str = "$extra";

/// Result of one foreign-key relation for one parent row.
#[derive(Debug, Clone, PartialEq)]
pub enum Extra {
    One(Box<QueryResultRow>),
    Many(Vec<QueryResultRow>),
    /// No child matched.
    None,
}

impl Extra {
    fn to_json(&self) -> JsonValue {
        match self {
            Self::One(row) => JsonValue::Object(row.to_dict().clone()),
            Self::Many(rows) => {
                JsonValue::Array(rows.iter().map(|r| JsonValue::Object(r.to_dict().clone())).collect())
            }
            Self::None => JsonValue::Null,
        }
    }
}

/// One row of a read.
///
/// `raw_data` lines up with `columns`, the effective selection of the plan
/// that produced the row. `id` is the primary key of the entity the query was
/// issued against, which for foreign-key child rows is the parent's id.
#[derive(Debug, Clone)]
pub struct QueryResultRow {
    id: Value,
    raw_data: Vec<Value>,
    columns: Arc<[FieldRef]>,
    base: Entity,
    extra: IndexMap<String, Extra>,
    dict: OnceLock<Map<String, JsonValue>>,
}

impl PartialEq for QueryResultRow {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.raw_data == other.raw_data
            && self.columns == other.columns
            && self.base == other.base
            && self.extra == other.extra
    }
}

impl QueryResultRow {
    #[must_use]
    pub fn new(id: Value, raw_data: Vec<Value>, columns: Arc<[FieldRef]>, base: Entity) -> Self {
        Self {
            id,
            raw_data,
            columns,
            base,
            extra: IndexMap::new(),
            dict: OnceLock::new(),
        }
    }

    #[must_use]
    pub fn id(&self) -> &Value {
        &self.id
    }

    #[must_use]
    pub fn raw_data(&self) -> &[Value] {
        &self.raw_data
    }

    #[must_use]
    pub fn columns(&self) -> &[FieldRef] {
        &self.columns
    }

    /// Entity whose columns are kept by [`Self::to_dict`].
    #[must_use]
    pub fn base(&self) -> &Entity {
        &self.base
    }

    pub fn set_base(&mut self, base: Entity) {
        self.base = base;
        self.dict = OnceLock::new();
    }

    #[must_use]
    pub fn extra(&self) -> &IndexMap<String, Extra> {
        &self.extra
    }

    pub fn set_extra(&mut self, name: impl Into<String>, extra: Extra) {
        self.extra.insert(name.into(), extra);
        self.dict = OnceLock::new();
    }

    /// Value of a selected column, looked up by field.
    #[must_use]
    pub fn get(&self, field: &FieldRef) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == field)
            .and_then(|i| self.raw_data.get(i))
    }

    /// Value of a selected base-entity column, looked up by name.
    #[must_use]
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c.entity() == &self.base && c.name() == name)
            .and_then(|i| self.raw_data.get(i))
    }

    /// Flat record of the base entity's selected columns, plus `$extra`
    /// when relations were attached. Computed once.
    pub fn to_dict(&self) -> &Map<String, JsonValue> {
        self.dict.get_or_init(|| {
            let mut data = Map::new();
            for (col, value) in self.columns.iter().zip(&self.raw_data) {
                if col.entity() == &self.base {
                    data.insert(col.name().to_owned(), value.to_json());
                }
            }
            if !self.extra.is_empty() {
                let extra = self
                    .extra
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect();
                data.insert(EXTRA_KEY.to_owned(), JsonValue::Object(extra));
            }
            data
        })
    }
}

/// Rows of a read, with the total count when it was requested.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResultRowList {
    pub rows: Vec<QueryResultRow>,
    pub rows_count: Option<u64>,
}

impl QueryResultRowList {
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, QueryResultRow> {
        self.rows.iter()
    }

    #[must_use]
    pub fn ids(&self) -> Vec<Value> {
        self.rows.iter().map(|r| r.id.clone()).collect()
    }

    #[must_use]
    pub fn to_dicts(&self) -> Vec<JsonValue> {
        self.rows
            .iter()
            .map(|r| JsonValue::Object(r.to_dict().clone()))
            .collect()
    }
}

impl IntoIterator for QueryResultRowList {
    type Item = QueryResultRow;
    type IntoIter = std::vec::IntoIter<QueryResultRow>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

impl<'a> IntoIterator for &'a QueryResultRowList {
    type Item = &'a QueryResultRow;
    type IntoIter = std::slice::Iter<'a, QueryResultRow>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}
