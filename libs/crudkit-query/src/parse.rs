//! JSON query grammar.
//!
//! A flat, string-keyed map (typically an HTTP query string or a stored
//! filter) is turned into a [`QueryPlan`]:
//!
//! ```text
//! $select:   "f1, f2, f3"
//! $select-:  "f4"
//! $order-by: "f1, f2.desc"
//! <field>.<op>[.<n>]: <value>
//! $or / $and / $not [+ digits]: { ...nested grammar... }
//! $fks | $foreign-keys: { "<relation>[[]]": { ...nested grammar... } }
//! ```
//!
//! Unknown `$`-prefixed keys are ignored. Inside `$fks` sub-plans a string
//! value shaped like `"$entity:field"` is a reference to another entity's
//! field rather than a literal.

use std::borrow::Cow;

use indexmap::IndexMap;
use serde_json::{Map, Value as JsonValue};

use crate::condition::{Condition, ConditionExpr, Operand, QueryConditions};
use crate::error::QueryError;
use crate::model::{Entity, EntityRegistry, FieldKind, FieldRef};
use crate::ops::QueryOp;
use crate::plan::{QueryOrder, QueryPlan, SortOrder};
use crate::value::Value;

/// Options of the grammar parser.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParseOptions {
    /// Top-level condition values are JSON text (as in a query string) and
    /// are decoded before coercion.
    pub from_http_query: bool,
}

impl QueryPlan {
    /// Parse a grammar map whose values are already JSON.
    ///
    /// # Errors
    /// Returns a [`QueryError`] on unknown fields, operators, order tokens or
    /// values that do not fit the field type.
    pub fn from_json(
        entity: &Entity,
        data: &Map<String, JsonValue>,
        registry: &EntityRegistry,
    ) -> Result<Self, QueryError> {
        Self::from_json_with(entity, data, registry, ParseOptions::default())
    }

    /// Parse a grammar map with explicit options.
    ///
    /// # Errors
    /// See [`QueryPlan::from_json`].
    pub fn from_json_with(
        entity: &Entity,
        data: &Map<String, JsonValue>,
        registry: &EntityRegistry,
        options: ParseOptions,
    ) -> Result<Self, QueryError> {
        Parser { registry }.plan(entity, data, false, options.from_http_query)
    }

    /// Parse an `application/x-www-form-urlencoded` query string.
    ///
    /// Every value is treated as JSON text, except `$select`, `$select-` and
    /// `$order-by` which are plain comma-separated lists.
    ///
    /// # Errors
    /// See [`QueryPlan::from_json`]; malformed encoding is reported as
    /// [`QueryError::InvalidQueryConditionValue`].
    pub fn from_query_string(
        entity: &Entity,
        query: &str,
        registry: &EntityRegistry,
    ) -> Result<Self, QueryError> {
        let pairs: Vec<(String, String)> = serde_urlencoded::from_str(query)
            .map_err(|e| QueryError::value(format!("malformed query string: {e}")))?;
        let data: Map<String, JsonValue> = pairs
            .into_iter()
            .map(|(k, v)| (k, JsonValue::String(v)))
            .collect();
        Self::from_json_with(
            entity,
            &data,
            registry,
            ParseOptions {
                from_http_query: true,
            },
        )
    }
}

struct Parser<'a> {
    registry: &'a EntityRegistry,
}

impl Parser<'_> {
    fn plan(
        &self,
        entity: &Entity,
        data: &Map<String, JsonValue>,
        allow_refs: bool,
        http: bool,
    ) -> Result<QueryPlan, QueryError> {
        let mut plan = QueryPlan::new(entity.clone());

        if let Some(v) = data.get("$select") {
            plan.set_select(field_list(entity, v)?);
        }
        if let Some(v) = data.get("$select-") {
            plan.set_select_exclude(field_list(entity, v)?);
        }
        if let Some(v) = data.get("$order-by") {
            plan.set_order_by(order_list(entity, v)?);
        }

        let conditions = self.conditions(entity, data, allow_refs, http)?;
        plan.set_conditions(Some(QueryConditions::new(conditions)));

        if let Some(v) = data.get("$fks").or_else(|| data.get("$foreign-keys")) {
            plan.set_foreign_keys(self.foreign_keys(v, http)?);
        }

        Ok(plan)
    }

    fn foreign_keys(
        &self,
        raw: &JsonValue,
        http: bool,
    ) -> Result<IndexMap<String, QueryPlan>, QueryError> {
        let relations = as_object(raw, http)?;
        let mut out = IndexMap::with_capacity(relations.len());

        for (raw_name, sub) in &*relations {
            let name = raw_name.strip_suffix("[]").unwrap_or(raw_name);
            let Some(child) = self.registry.get(name) else {
                tracing::debug!(relation = %raw_name, "unresolvable foreign key relation dropped");
                continue;
            };
            let sub = as_object(sub, false)?;
            let plan = self.plan(child, &sub, true, false)?;
            out.insert(raw_name.clone(), plan);
        }

        Ok(out)
    }

    fn conditions(
        &self,
        entity: &Entity,
        data: &Map<String, JsonValue>,
        allow_refs: bool,
        http: bool,
    ) -> Result<Vec<Condition>, QueryError> {
        let mut out = Vec::new();

        for (key, value) in data {
            if key.starts_with('$') {
                let nested = |v: &JsonValue| -> Result<Vec<Condition>, QueryError> {
                    let sub = as_object(v, http)?;
                    self.conditions(entity, &sub, allow_refs, false)
                };

                if is_logic_key(key, "$or") {
                    out.push(Condition::or(nested(value)?));
                } else if is_logic_key(key, "$and") {
                    out.push(Condition::and(nested(value)?));
                } else if is_logic_key(key, "$not") {
                    out.push(Condition::negate(Condition::and(nested(value)?)));
                }
                continue;
            }

            let Some((field, op_token)) = split_condition_key(key)? else {
                continue;
            };

            let value = if http {
                Cow::Owned(decode_json_text(value)?)
            } else {
                Cow::Borrowed(value)
            };

            let op = QueryOp::from_token(op_token)
                .ok_or_else(|| QueryError::UnknownQueryOperator(op_token.to_owned()))?;
            let column = entity.try_field(field)?;
            let operand = self.operand(&column, op, &value, allow_refs)?;

            out.push(Condition::Expr(ConditionExpr::new(column, op, operand)));
        }

        Ok(out)
    }

    fn operand(
        &self,
        column: &FieldRef,
        op: QueryOp,
        raw: &JsonValue,
        allow_refs: bool,
    ) -> Result<Operand, QueryError> {
        if allow_refs
            && let Some(reference) = raw.as_str().and_then(|s| s.strip_prefix('$'))
            && let Some((entity_name, field_name)) = reference.split_once(':')
        {
            return self.field_reference(entity_name, field_name).map(Operand::Field);
        }

        let kind = column.kind();
        if op.takes_list() {
            return Value::coerce_list(kind, raw).map(Operand::List);
        }
        if op.is_array_relation() {
            return Value::coerce_list(kind.element(), raw)
                .map(|items| Operand::Value(Value::Array(items)));
        }
        if op.is_prefix() {
            return Value::coerce(FieldKind::String, raw).map(Operand::Value);
        }
        Value::coerce(kind, raw).map(Operand::Value)
    }

    fn field_reference(&self, entity_name: &str, field_name: &str) -> Result<FieldRef, QueryError> {
        self.registry
            .get(entity_name)
            .and_then(|e| e.field(field_name))
            .ok_or_else(|| {
                QueryError::value(format!("column not found: ${entity_name}:{field_name}"))
            })
    }
}

/// `$or`, `$or0`, `$or12` match `$or`; `$order-by`, `$Or` do not.
fn is_logic_key(key: &str, prefix: &str) -> bool {
    key.strip_prefix(prefix)
        .is_some_and(|rest| rest.chars().all(|c| c.is_ascii_digit()))
}

/// Split `field.op` / `field.op.<n>` into `(field, op)`.
///
/// Keys without a dot are not conditions and yield `None`.
fn split_condition_key(key: &str) -> Result<Option<(&str, &str)>, QueryError> {
    let Some((field, rest)) = key.split_once('.') else {
        return Ok(None);
    };
    let op = match rest.rsplit_once('.') {
        Some((op, suffix)) => {
            if suffix.is_empty() || !suffix.chars().all(|c| c.is_ascii_digit()) {
                return Err(QueryError::InvalidQueryConditionOperator(key.to_owned()));
            }
            op
        }
        None => rest,
    };
    Ok(Some((field, op)))
}

fn decode_json_text(raw: &JsonValue) -> Result<JsonValue, QueryError> {
    let JsonValue::String(text) = raw else {
        return Err(QueryError::value(
            "right value must be JSON text when parsing an HTTP query",
        ));
    };
    serde_json::from_str(text).map_err(|e| {
        QueryError::value(format!("right value must be decodable JSON text: {e}"))
    })
}

fn as_object(raw: &JsonValue, http: bool) -> Result<Cow<'_, Map<String, JsonValue>>, QueryError> {
    match raw {
        JsonValue::Object(map) => Ok(Cow::Borrowed(map)),
        JsonValue::String(_) if http => match decode_json_text(raw)? {
            JsonValue::Object(map) => Ok(Cow::Owned(map)),
            other => Err(QueryError::value(format!("expected an object, got {other}"))),
        },
        other => Err(QueryError::value(format!("expected an object, got {other}"))),
    }
}

fn names(raw: &JsonValue) -> Result<Vec<&str>, QueryError> {
    let text = raw
        .as_str()
        .ok_or_else(|| QueryError::value(format!("expected a comma separated list, got {raw}")))?;
    Ok(text.split(',').map(str::trim).filter(|s| !s.is_empty()).collect())
}

fn field_list(entity: &Entity, raw: &JsonValue) -> Result<Vec<FieldRef>, QueryError> {
    names(raw)?
        .into_iter()
        .map(|name| entity.try_field(name))
        .collect()
}

fn order_list(entity: &Entity, raw: &JsonValue) -> Result<Vec<QueryOrder>, QueryError> {
    let bad = |token: &str| QueryError::InvalidOrderSyntax(token.to_owned());
    names(raw)
        .map_err(|_| bad(&raw.to_string()))?
        .into_iter()
        .map(|token| {
            let (field, order) = match token.rsplit_once('.') {
                Some((field, dir)) => (field, SortOrder::from_token(dir).ok_or_else(|| bad(token))?),
                None => (token, SortOrder::Default),
            };
            let column = entity.field(field).ok_or_else(|| bad(token))?;
            Ok(QueryOrder::new(column, order))
        })
        .collect()
}
