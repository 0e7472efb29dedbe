//! Error types raised while building or parsing query plans and write values.

use thiserror::Error;

/// Errors produced before any SQL is built.
///
/// All of these are raised synchronously by the grammar parser, the value
/// binders or the DSL, so a caller can always report them back unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    /// The operator token of a `field.op` key is not recognized.
    #[error("unknown query operator: {0}")]
    UnknownQueryOperator(String),

    /// The field name does not exist on the entity.
    #[error("invalid condition column: {entity}.{field}")]
    InvalidQueryConditionColumn { entity: String, field: String },

    /// The right-hand value could not be decoded or coerced.
    #[error("invalid condition value: {0}")]
    InvalidQueryConditionValue(String),

    /// A `field.op.<suffix>` key whose suffix is not a bare number.
    #[error("invalid condition operator: {0}")]
    InvalidQueryConditionOperator(String),

    /// An `$order-by` token that names an unknown field or direction.
    #[error("invalid order syntax: {0}")]
    InvalidOrderSyntax(String),

    /// Write values that cannot be applied.
    #[error("invalid query value: {0}")]
    InvalidQueryValue(String),
}

impl QueryError {
    pub(crate) fn column(entity: &str, field: &str) -> Self {
        Self::InvalidQueryConditionColumn {
            entity: entity.to_owned(),
            field: field.to_owned(),
        }
    }

    pub(crate) fn value(message: impl Into<String>) -> Self {
        Self::InvalidQueryConditionValue(message.into())
    }
}

/// Errors raised while declaring entities and registering them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("entity `{entity}` declares field `{field}` twice")]
    DuplicateField { entity: String, field: String },

    #[error("entity `{entity}` has no primary key field `{field}`")]
    MissingPrimaryKey { entity: String, field: String },

    #[error("entity `{0}` is already registered")]
    DuplicateEntity(String),
}
