//! Execution seam between the compiler and a SQL driver.

use async_trait::async_trait;
use crudkit_query::Value;

use crate::compiler::CompiledStatement;
use crate::dialect::Dialect;
use crate::error::CrudError;
use crate::placeholder::PlaceholderStyle;

/// Result of a statement that returns no rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecOutcome {
    pub rows_affected: u64,
    /// Driver-reported id of the last inserted row, where the dialect has one.
    pub last_insert_id: Option<i64>,
}

/// A configured database.
#[async_trait]
pub trait SqlBackend: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// Placeholder template the driver expects.
    fn placeholder_style(&self) -> PlaceholderStyle {
        self.dialect().placeholder_style()
    }

    /// Open a session wrapping one transaction.
    ///
    /// # Errors
    /// Returns [`CrudError::Db`] when no connection or transaction is available.
    async fn begin(&self) -> Result<Box<dyn SqlSession>, CrudError>;
}

/// One transaction. Dropping a session without committing rolls it back.
#[async_trait]
pub trait SqlSession: Send {
    /// Run a row-returning statement; cells are decoded by `stmt.columns`.
    ///
    /// # Errors
    /// Returns [`CrudError::Db`] on driver or decoding failures.
    async fn fetch_all(&mut self, stmt: &CompiledStatement) -> Result<Vec<Vec<Value>>, CrudError>;

    /// # Errors
    /// Returns [`CrudError::Db`] on driver failures.
    async fn execute(&mut self, stmt: &CompiledStatement) -> Result<ExecOutcome, CrudError>;

    /// # Errors
    /// Returns [`CrudError::Db`] when the commit fails.
    async fn commit(self: Box<Self>) -> Result<(), CrudError>;

    /// # Errors
    /// Returns [`CrudError::Db`] when the rollback fails.
    async fn rollback(self: Box<Self>) -> Result<(), CrudError>;
}
