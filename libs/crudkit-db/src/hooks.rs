//! Per-entity callbacks around [`crate::Crud`] operations.
//!
//! All callbacks run inside the operation's transaction. Returning an error
//! aborts the operation and rolls the transaction back.

use async_trait::async_trait;
use crudkit_query::{QueryPlan, Value, ValuesToCreate, ValuesToUpdate};
use crudkit_security::PermInfo;

use crate::error::CrudError;
use crate::row::QueryResultRowList;

#[async_trait]
pub trait EntityHooks: Send + Sync {
    /// Before any select issued for the entity, including the id lookups of
    /// update and delete. The plan is not yet filtered by permissions, so
    /// conditions added here are subject to the same pruning.
    ///
    /// # Errors
    /// Any error aborts the operation.
    async fn on_query(&self, _plan: &mut QueryPlan, _perm: &PermInfo) -> Result<(), CrudError> {
        Ok(())
    }

    /// # Errors
    /// Any error aborts the operation.
    async fn after_read(
        &self,
        _rows: &mut QueryResultRowList,
        _perm: &PermInfo,
    ) -> Result<(), CrudError> {
        Ok(())
    }

    /// Before each row is inserted, after permission filtering.
    ///
    /// # Errors
    /// Any error aborts the operation.
    async fn on_insert(&self, _values: &mut ValuesToCreate, _perm: &PermInfo) -> Result<(), CrudError> {
        Ok(())
    }

    /// # Errors
    /// Any error aborts the operation.
    async fn after_insert(&self, _ids: &[Value], _perm: &PermInfo) -> Result<(), CrudError> {
        Ok(())
    }

    /// # Errors
    /// Any error aborts the operation.
    async fn before_update(
        &self,
        _values: &mut ValuesToUpdate,
        _ids: &[Value],
        _perm: &PermInfo,
    ) -> Result<(), CrudError> {
        Ok(())
    }

    /// # Errors
    /// Any error aborts the operation.
    async fn after_update(&self, _ids: &[Value], _perm: &PermInfo) -> Result<(), CrudError> {
        Ok(())
    }

    /// # Errors
    /// Any error aborts the operation.
    async fn before_delete(&self, _ids: &[Value], _perm: &PermInfo) -> Result<(), CrudError> {
        Ok(())
    }

    /// # Errors
    /// Any error aborts the operation.
    async fn after_delete(&self, _ids: &[Value], _perm: &PermInfo) -> Result<(), CrudError> {
        Ok(())
    }
}
