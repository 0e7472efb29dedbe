//! Field → value maps consumed by insert and update.
//!
//! ```
//! use crudkit_query::{Entity, FieldKind, ScalarKind, UpdateFlag, ValuesToUpdate};
//! use serde_json::json;
//!
//! let topic = Entity::builder("topic")
//!     .field("id", FieldKind::I64)
//!     .field("views", FieldKind::I64)
//!     .field("tags", FieldKind::Array(ScalarKind::String))
//!     .build()
//!     .unwrap();
//!
//! let data = json!({"views.incr": 1, "tags.array_extend_distinct": ["rust"]});
//! let values = ValuesToUpdate::from_json(&topic, data.as_object().unwrap()).unwrap();
//! assert_eq!(values.get("views").unwrap().flag, Some(UpdateFlag::Incr));
//! ```

use indexmap::IndexMap;
use serde_json::{Map, Value as JsonValue};

use crate::error::QueryError;
use crate::model::{Entity, FieldRef};
use crate::ops::UpdateFlag;
use crate::value::Value;

fn check_owner(entity: &Entity, field: &FieldRef) -> Result<(), QueryError> {
    if field.entity() == entity {
        Ok(())
    } else {
        Err(QueryError::column(entity.name(), field.name()))
    }
}

fn coerce_write(field: &FieldRef, raw: &JsonValue) -> Result<Value, QueryError> {
    Value::coerce(field.kind(), raw).map_err(|e| {
        QueryError::InvalidQueryValue(format!("field `{}`: {e}", field.name()))
    })
}

/// Values of one row to insert.
///
/// `null` values in JSON input are left out so the column default applies.
#[derive(Debug, Clone, PartialEq)]
pub struct ValuesToCreate {
    entity: Entity,
    values: IndexMap<FieldRef, Value>,
}

impl ValuesToCreate {
    #[must_use]
    pub fn new(entity: Entity) -> Self {
        Self {
            entity,
            values: IndexMap::new(),
        }
    }

    /// Bind a JSON object against the entity; unknown keys are ignored.
    ///
    /// # Errors
    /// Returns [`QueryError::InvalidQueryValue`] when a value does not fit
    /// its field type.
    pub fn from_json(entity: &Entity, data: &Map<String, JsonValue>) -> Result<Self, QueryError> {
        Self::from_json_filtered(entity, data, |_| true)
    }

    /// Like [`ValuesToCreate::from_json`], but keys whose field fails `keep`
    /// are dropped before their value is coerced.
    ///
    /// # Errors
    /// Returns [`QueryError::InvalidQueryValue`] when a kept value does not
    /// fit its field type.
    pub fn from_json_filtered(
        entity: &Entity,
        data: &Map<String, JsonValue>,
        mut keep: impl FnMut(&FieldRef) -> bool,
    ) -> Result<Self, QueryError> {
        let mut out = Self::new(entity.clone());
        for (key, raw) in data {
            let Some(field) = entity.field(key) else {
                tracing::debug!(entity = entity.name(), field = %key, "unknown field ignored");
                continue;
            };
            if raw.is_null() || !keep(&field) {
                continue;
            }
            let value = coerce_write(&field, raw)?;
            out.values.insert(field, value);
        }
        Ok(out)
    }

    /// # Errors
    /// Returns [`QueryError::InvalidQueryConditionColumn`] when `field`
    /// belongs to another entity.
    pub fn set(&mut self, field: &FieldRef, value: impl Into<Value>) -> Result<(), QueryError> {
        check_owner(&self.entity, field)?;
        self.values.insert(field.clone(), value.into());
        Ok(())
    }

    #[must_use]
    pub fn entity(&self) -> &Entity {
        &self.entity
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entity.field(name).and_then(|f| self.values.get(&f))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FieldRef, &Value)> {
        self.values.iter()
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&FieldRef) -> bool) {
        self.values.retain(|f, _| keep(f));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// One assignment of an update, optionally computed from the current
/// column value.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateValue {
    pub value: Value,
    pub flag: Option<UpdateFlag>,
}

/// Assignments of an update.
///
/// Keys of JSON input may be `"field"` or `"field.<flag>"`; each field
/// appears at most once, flagged or not. Explicit `null` sets the column to
/// NULL.
#[derive(Debug, Clone, PartialEq)]
pub struct ValuesToUpdate {
    entity: Entity,
    values: IndexMap<FieldRef, UpdateValue>,
}

impl ValuesToUpdate {
    #[must_use]
    pub fn new(entity: Entity) -> Self {
        Self {
            entity,
            values: IndexMap::new(),
        }
    }

    /// Bind a JSON object against the entity; unknown fields are ignored.
    ///
    /// # Errors
    /// - [`QueryError::InvalidQueryConditionValue`] for an unknown flag token
    /// - [`QueryError::InvalidQueryValue`] for a repeated field, a flag that
    ///   does not apply to the field type, or a value that does not fit
    pub fn from_json(entity: &Entity, data: &Map<String, JsonValue>) -> Result<Self, QueryError> {
        Self::from_json_filtered(entity, data, |_| true)
    }

    /// Like [`ValuesToUpdate::from_json`], but keys whose field fails `keep`
    /// are dropped before their flag or value is checked.
    ///
    /// # Errors
    /// See [`ValuesToUpdate::from_json`], for kept keys only.
    pub fn from_json_filtered(
        entity: &Entity,
        data: &Map<String, JsonValue>,
        mut keep: impl FnMut(&FieldRef) -> bool,
    ) -> Result<Self, QueryError> {
        let mut out = Self::new(entity.clone());
        for (key, raw) in data {
            let (name, token) = match key.rsplit_once('.') {
                Some((name, token)) => (name, Some(token)),
                None => (key.as_str(), None),
            };
            let Some(field) = entity.field(name) else {
                tracing::debug!(entity = entity.name(), field = %name, "unknown field ignored");
                continue;
            };
            if !keep(&field) {
                continue;
            }
            let flag = token
                .map(|token| {
                    UpdateFlag::from_token(token)
                        .ok_or_else(|| QueryError::value(format!("unknown update flag: {key}")))
                })
                .transpose()?;
            let value = coerce_write(&field, raw)?;
            out.insert(field, value, flag)?;
        }
        Ok(out)
    }

    /// Plain assignment.
    ///
    /// # Errors
    /// See [`ValuesToUpdate::from_json`]; also rejects fields of other entities.
    pub fn set(&mut self, field: &FieldRef, value: impl Into<Value>) -> Result<(), QueryError> {
        check_owner(&self.entity, field)?;
        self.insert(field.clone(), value.into(), None)
    }

    /// Assignment computed from the current column value.
    ///
    /// # Errors
    /// See [`ValuesToUpdate::from_json`]; also rejects fields of other entities.
    pub fn set_flagged(
        &mut self,
        field: &FieldRef,
        flag: UpdateFlag,
        value: impl Into<Value>,
    ) -> Result<(), QueryError> {
        check_owner(&self.entity, field)?;
        self.insert(field.clone(), value.into(), Some(flag))
    }

    fn insert(
        &mut self,
        field: FieldRef,
        value: Value,
        flag: Option<UpdateFlag>,
    ) -> Result<(), QueryError> {
        if self.values.contains_key(&field) {
            return Err(QueryError::InvalidQueryValue(format!(
                "field `{}` is assigned more than once",
                field.name()
            )));
        }
        if let Some(flag) = flag {
            let kind = field.kind();
            let fits = if flag.is_array() {
                kind.is_array() && matches!(value, Value::Array(_))
            } else {
                kind.is_numeric() && !value.is_null()
            };
            if !fits {
                return Err(QueryError::InvalidQueryValue(format!(
                    "`{}` does not apply to field `{}`",
                    flag.token(),
                    field.name()
                )));
            }
        }
        self.values.insert(field, UpdateValue { value, flag });
        Ok(())
    }

    #[must_use]
    pub fn entity(&self) -> &Entity {
        &self.entity
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&UpdateValue> {
        self.entity.field(name).and_then(|f| self.values.get(&f))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FieldRef, &UpdateValue)> {
        self.values.iter()
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&FieldRef) -> bool) {
        self.values.retain(|f, _| keep(f));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
