//! Literal values carried by conditions, write values and result cells.
//!
//! JSON input is coerced against the declared [`FieldKind`] of its column;
//! `key` gives a stable string form used to bucket rows by id.

use serde_json::Value as JsonValue;

use crate::error::QueryError;
use crate::model::FieldKind;

/// A literal operand or cell value.
///
/// Literals arriving as JSON are coerced against the declared [`FieldKind`]
/// with [`Value::coerce`]; DSL callers build them through the `From` impls.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    I64(i64),
    F64(f64),
    String(String),
    Bytes(Vec<u8>),
    Json(JsonValue),
    Array(Vec<Value>),
}

impl Value {
    #[must_use]
    pub fn bytes(data: impl Into<Vec<u8>>) -> Self {
        Self::Bytes(data.into())
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::I64(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Plain JSON rendering; bytes become lowercase hex.
    #[must_use]
    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Null => JsonValue::Null,
            Self::Bool(b) => JsonValue::Bool(*b),
            Self::I64(n) => JsonValue::from(*n),
            Self::F64(n) => JsonValue::from(*n),
            Self::String(s) => JsonValue::String(s.clone()),
            Self::Bytes(b) => JsonValue::String(hex::encode(b)),
            Self::Json(j) => j.clone(),
            Self::Array(items) => JsonValue::Array(items.iter().map(Self::to_json).collect()),
        }
    }

    /// Stable textual key, used to bucket rows by id.
    #[must_use]
    pub fn key(&self) -> String {
        self.to_json().to_string()
    }

    /// Coerce a JSON value against a field kind.
    ///
    /// `null` is accepted for every kind.
    ///
    /// # Errors
    /// Returns [`QueryError::InvalidQueryConditionValue`] when the value does not fit.
    pub fn coerce(kind: FieldKind, raw: &JsonValue) -> Result<Self, QueryError> {
        if raw.is_null() {
            return Ok(Self::Null);
        }
        let mismatch = || QueryError::value(format!("expected {kind:?}, got {raw}"));

        match kind {
            FieldKind::I64 => match raw {
                JsonValue::Number(n) => n
                    .as_i64()
                    .or_else(|| n.as_f64().and_then(float_to_i64))
                    .map(Self::I64)
                    .ok_or_else(mismatch),
                JsonValue::String(s) => s.trim().parse().map(Self::I64).map_err(|_| mismatch()),
                JsonValue::Bool(b) => Ok(Self::I64(i64::from(*b))),
                _ => Err(mismatch()),
            },
            FieldKind::F64 => match raw {
                JsonValue::Number(n) => n.as_f64().map(Self::F64).ok_or_else(mismatch),
                JsonValue::String(s) => s.trim().parse().map(Self::F64).map_err(|_| mismatch()),
                _ => Err(mismatch()),
            },
            FieldKind::String => match raw {
                JsonValue::String(s) => Ok(Self::String(s.clone())),
                JsonValue::Number(n) => Ok(Self::String(n.to_string())),
                _ => Err(mismatch()),
            },
            FieldKind::Bool => match raw {
                JsonValue::Bool(b) => Ok(Self::Bool(*b)),
                JsonValue::Number(n) => match n.as_i64() {
                    Some(0) => Ok(Self::Bool(false)),
                    Some(1) => Ok(Self::Bool(true)),
                    _ => Err(mismatch()),
                },
                JsonValue::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                    "true" | "1" | "yes" | "on" => Ok(Self::Bool(true)),
                    "false" | "0" | "no" | "off" => Ok(Self::Bool(false)),
                    _ => Err(mismatch()),
                },
                _ => Err(mismatch()),
            },
            FieldKind::Bytes => match raw {
                JsonValue::String(s) => hex::decode(s.trim())
                    .map(Self::Bytes)
                    .map_err(|e| QueryError::value(format!("invalid hex string: {e}"))),
                _ => Err(mismatch()),
            },
            FieldKind::Json => Ok(Self::Json(raw.clone())),
            FieldKind::Array(elem) => match raw {
                JsonValue::Array(items) => items
                    .iter()
                    .map(|v| Self::coerce(elem.into(), v))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Self::Array),
                _ => Err(mismatch()),
            },
        }
    }

    /// Coerce a JSON array element-wise; used by `IN` / `NOT IN`.
    ///
    /// # Errors
    /// Returns [`QueryError::InvalidQueryConditionValue`] if `raw` is not an
    /// array or any element does not fit `kind`.
    pub fn coerce_list(kind: FieldKind, raw: &JsonValue) -> Result<Vec<Self>, QueryError> {
        let JsonValue::Array(items) = raw else {
            return Err(QueryError::value(format!(
                "the right value of a relation operator must be a list, got {raw}"
            )));
        };
        items.iter().map(|v| Self::coerce(kind, v)).collect()
    }
}

#[allow(clippy::cast_possible_truncation)]
fn float_to_i64(f: f64) -> Option<i64> {
    (f.fract() == 0.0 && f.is_finite() && f.abs() < 9.0e15).then(|| f as i64)
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::I64(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::I64(i64::from(n))
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Self::I64(i64::from(n))
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::F64(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Self::Array(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::model::ScalarKind;
    use serde_json::json;

    #[test]
    fn integer_coercion_accepts_numeric_text() {
        assert_eq!(Value::coerce(FieldKind::I64, &json!("111")).unwrap(), Value::I64(111));
        assert_eq!(Value::coerce(FieldKind::I64, &json!(222)).unwrap(), Value::I64(222));
        assert_eq!(Value::coerce(FieldKind::I64, &json!(3.0)).unwrap(), Value::I64(3));
        assert!(Value::coerce(FieldKind::I64, &json!("$user.id")).is_err());
        assert!(Value::coerce(FieldKind::I64, &json!(3.5)).is_err());
    }

    #[test]
    fn string_coercion_stringifies_numbers_only() {
        assert_eq!(
            Value::coerce(FieldKind::String, &json!(12)).unwrap(),
            Value::String("12".into())
        );
        assert!(Value::coerce(FieldKind::String, &json!(true)).is_err());
        assert!(Value::coerce(FieldKind::String, &json!({"a": 1})).is_err());
    }

    #[test]
    fn bytes_are_hex_decoded() {
        assert_eq!(
            Value::coerce(FieldKind::Bytes, &json!("aabb")).unwrap(),
            Value::Bytes(vec![0xaa, 0xbb])
        );
        assert!(Value::coerce(FieldKind::Bytes, &json!("zz")).is_err());
    }

    #[test]
    fn arrays_coerce_each_element() {
        let v = Value::coerce(FieldKind::Array(ScalarKind::I64), &json!(["1", 2])).unwrap();
        assert_eq!(v, Value::Array(vec![Value::I64(1), Value::I64(2)]));
        assert!(Value::coerce(FieldKind::Array(ScalarKind::I64), &json!("1")).is_err());
    }

    #[test]
    fn list_coercion_requires_array() {
        assert!(Value::coerce_list(FieldKind::I64, &json!(1)).is_err());
        assert_eq!(
            Value::coerce_list(FieldKind::I64, &json!([1, "2"])).unwrap(),
            vec![Value::I64(1), Value::I64(2)]
        );
    }

    #[test]
    fn null_is_accepted_everywhere() {
        assert_eq!(Value::coerce(FieldKind::Bool, &json!(null)).unwrap(), Value::Null);
    }

    #[test]
    fn json_rendering_hexes_bytes() {
        assert_eq!(Value::bytes(vec![1u8, 2]).to_json(), json!("0102"));
        assert_eq!(Value::from(vec![1, 2]).key(), "[1,2]");
    }
}
