//! Positional parameters for statements rendered by sea-query.
//!
//! [`PlaceholderGenerator`] is the [`SqlWriter`] every statement renders
//! into: sea-query hands it each bound value in text order and the generator
//! writes the token of the configured [`PlaceholderStyle`].
//!
//! [`bind_value`] turns a literal into the value a driver binds:
//!
//! | Kind | Postgres | Sqlite / MySQL |
//! |---|---|---|
//! | `Array(_)` | native array, one placeholder | JSON text |
//! | `Json` | `jsonb` value | JSON text |
//! | `NULL` | typed by the column kind | typed by the column kind |
//! | everything else | native scalar | native scalar |

use std::fmt;

use crudkit_query::{FieldKind, ScalarKind, Value};
use sea_orm::sea_query::{ArrayType, QueryBuilder, SqlWriter};
use serde_json::Value as JsonValue;

use crate::dialect::Dialect;

/// Driver-level value bound to a placeholder.
pub use sea_orm::sea_query::Value as SqlValue;

/// Placeholder template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlaceholderStyle {
    /// `?`
    Question,
    /// `%s`
    Format,
    /// `$1`, `$2`, ...
    Numbered,
}

impl PlaceholderStyle {
    #[must_use]
    pub fn token(self, position: usize) -> String {
        match self {
            Self::Question => "?".to_owned(),
            Self::Format => "%s".to_owned(),
            Self::Numbered => format!("${position}"),
        }
    }
}

/// Collects SQL text and the values bound to it.
#[derive(Debug, Clone)]
pub struct PlaceholderGenerator {
    style: PlaceholderStyle,
    sql: String,
    values: Vec<SqlValue>,
}

impl PlaceholderGenerator {
    #[must_use]
    pub fn new(style: PlaceholderStyle) -> Self {
        Self {
            style,
            sql: String::new(),
            values: Vec::new(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[must_use]
    pub fn into_parts(self) -> (String, Vec<SqlValue>) {
        (self.sql, self.values)
    }
}

impl fmt::Write for PlaceholderGenerator {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.sql.push_str(s);
        Ok(())
    }
}

impl fmt::Display for PlaceholderGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}

impl SqlWriter for PlaceholderGenerator {
    fn push_param(&mut self, value: SqlValue, _query_builder: &dyn QueryBuilder) {
        self.values.push(value);
        let token = self.style.token(self.values.len());
        self.sql.push_str(&token);
    }

    fn as_writer(&mut self) -> &mut dyn fmt::Write {
        self
    }
}

/// Driver value for `value`, written to or compared with a column of
/// `kind` when there is one.
#[must_use]
pub fn bind_value(value: &Value, kind: Option<FieldKind>, dialect: Dialect) -> SqlValue {
    let native = dialect.native_arrays();
    match (value, kind) {
        (Value::Null, kind) => typed_null(kind, native),
        (Value::Json(doc), _) if native => doc.clone().into(),
        (Value::Json(doc), _) => doc.to_string().into(),
        (other, Some(FieldKind::Json)) if native => other.to_json().into(),
        (other, Some(FieldKind::Json)) => other.to_json().to_string().into(),
        (Value::Bool(b), _) => (*b).into(),
        (Value::I64(n), _) => (*n).into(),
        (Value::F64(n), _) => (*n).into(),
        (Value::String(s), _) => s.clone().into(),
        (Value::Bytes(b), _) => b.clone().into(),
        (Value::Array(items), kind) if native => native_array(items, kind),
        (v @ Value::Array(_), _) => v.to_json().to_string().into(),
    }
}

fn typed_null(kind: Option<FieldKind>, native: bool) -> SqlValue {
    match kind {
        Some(FieldKind::I64) => None::<i64>.into(),
        Some(FieldKind::F64) => None::<f64>.into(),
        Some(FieldKind::Bool) => None::<bool>.into(),
        Some(FieldKind::Bytes) => None::<Vec<u8>>.into(),
        Some(FieldKind::Json) if native => None::<JsonValue>.into(),
        Some(FieldKind::Array(s)) if native => SqlValue::Array(array_type(s), None),
        _ => None::<String>.into(),
    }
}

fn array_type(kind: ScalarKind) -> ArrayType {
    match kind {
        ScalarKind::I64 => ArrayType::BigInt,
        ScalarKind::F64 => ArrayType::Double,
        ScalarKind::String => ArrayType::String,
        ScalarKind::Bool => ArrayType::Bool,
    }
}

fn native_array(items: &[Value], kind: Option<FieldKind>) -> SqlValue {
    let scalar = match kind {
        Some(FieldKind::Array(s)) => s,
        _ => match items.first() {
            Some(Value::I64(_)) => ScalarKind::I64,
            Some(Value::F64(_)) => ScalarKind::F64,
            Some(Value::Bool(_)) => ScalarKind::Bool,
            _ => ScalarKind::String,
        },
    };
    match scalar {
        ScalarKind::I64 => items
            .iter()
            .filter_map(Value::as_i64)
            .collect::<Vec<i64>>()
            .into(),
        ScalarKind::F64 => items
            .iter()
            .filter_map(|v| match v {
                Value::F64(n) => Some(*n),
                #[allow(clippy::cast_precision_loss)]
                Value::I64(n) => Some(*n as f64),
                _ => None,
            })
            .collect::<Vec<f64>>()
            .into(),
        ScalarKind::Bool => items
            .iter()
            .filter_map(|v| match v {
                Value::Bool(b) => Some(*b),
                _ => None,
            })
            .collect::<Vec<bool>>()
            .into(),
        ScalarKind::String => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_owned))
            .collect::<Vec<String>>()
            .into(),
    }
}
