use crudkit_query::QueryError;
use crudkit_security::PermError;
use thiserror::Error;

/// Errors returned by [`crate::Crud`] operations.
///
/// Query and permission errors are raised before any SQL runs. `Db` wraps a
/// driver failure after the operation's transaction was rolled back.
#[derive(Debug, Error)]
pub enum CrudError {
    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("permission denied: {action} on `{entity}`")]
    Permission {
        action: &'static str,
        entity: String,
    },

    /// Nothing left to write after permission filtering.
    #[error("invalid query value: {0}")]
    InvalidQueryValue(String),

    #[error("database error: {message}")]
    Db { message: String },

    #[error("unknown database: {0}")]
    UnknownDatabase(String),

    #[error("unknown entity: {0}")]
    UnknownEntity(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Roles(#[from] PermError),
}

impl CrudError {
    pub(crate) fn db(message: impl Into<String>) -> Self {
        Self::Db {
            message: message.into(),
        }
    }
}

impl From<sea_orm::DbErr> for CrudError {
    fn from(e: sea_orm::DbErr) -> Self {
        Self::db(e.to_string())
    }
}

impl From<figment::Error> for CrudError {
    fn from(e: figment::Error) -> Self {
        Self::Config(e.to_string())
    }
}
