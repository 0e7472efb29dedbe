//! The CRUD service: permission filtering, compilation and execution.
//!
//! Every public operation opens one session on the backend and runs all of
//! its statements there, so the id lookup of an update or delete and the
//! mutation itself share a transaction. On error the session is rolled back
//! and the error is returned unchanged.

use std::collections::HashMap;
use std::sync::Arc;

use crudkit_query::{
    Entity, EntityRegistry, FieldRef, QueryPlan, Value, ValuesToCreate, ValuesToUpdate,
};
use crudkit_security::{
    PermInfo, RoleSet, can_delete, create_values_from_json, filter_create_values,
    filter_update_values, solve_query, update_values_from_json,
};
use indexmap::IndexMap;
use serde_json::{Map, Value as JsonValue};

use crate::backend::{SqlBackend, SqlSession};
use crate::compiler::{CompiledStatement, SqlCompiler};
use crate::config::CrudConfig;
use crate::error::CrudError;
use crate::fk;
use crate::hooks::EntityHooks;
use crate::row::{QueryResultRow, QueryResultRowList};
use crate::sea_orm_backend::SeaOrmBackend;

/// Result of a write: the affected ids, or the re-read rows when
/// `returning` was requested.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutput {
    Ids(Vec<Value>),
    Rows(QueryResultRowList),
}

impl WriteOutput {
    #[must_use]
    pub fn ids(&self) -> Vec<Value> {
        match self {
            Self::Ids(ids) => ids.clone(),
            Self::Rows(rows) => rows.iter().map(|r| r.id().clone()).collect(),
        }
    }

    #[must_use]
    pub fn into_rows(self) -> Option<QueryResultRowList> {
        match self {
            Self::Rows(rows) => Some(rows),
            Self::Ids(_) => None,
        }
    }
}

pub struct Crud {
    backend: Arc<dyn SqlBackend>,
    compiler: SqlCompiler,
    registry: Arc<EntityRegistry>,
    hooks: HashMap<String, Arc<dyn EntityHooks>>,
    default_limit: Option<u64>,
}

impl Crud {
    #[must_use]
    pub fn new(backend: Arc<dyn SqlBackend>, registry: Arc<EntityRegistry>) -> Self {
        let compiler =
            SqlCompiler::new(backend.dialect()).with_placeholder_style(backend.placeholder_style());
        Self {
            backend,
            compiler,
            registry,
            hooks: HashMap::new(),
            default_limit: Some(crudkit_query::DEFAULT_LIMIT),
        }
    }

    /// Connect through sea-orm and bind the configured roles.
    ///
    /// # Errors
    /// Returns [`CrudError::Roles`] for invalid role definitions and
    /// [`CrudError::Db`] / [`CrudError::UnknownDatabase`] for connection
    /// failures.
    pub async fn connect(
        config: &CrudConfig,
        registry: Arc<EntityRegistry>,
    ) -> Result<(Self, RoleSet), CrudError> {
        let roles = config.roles.build(&registry)?;
        let backend = SeaOrmBackend::connect(&config.database).await?;
        tracing::info!(roles = roles.len(), "crud service ready");
        let crud = Self::new(Arc::new(backend), registry).with_default_limit(config.default_limit);
        Ok((crud, roles))
    }

    #[must_use]
    pub fn with_hooks(mut self, entity: &Entity, hooks: Arc<dyn EntityHooks>) -> Self {
        self.hooks.insert(entity.name().to_owned(), hooks);
        self
    }

    /// Limit given to plans built by [`Self::parse_query`].
    #[must_use]
    pub fn with_default_limit(mut self, limit: Option<u64>) -> Self {
        self.default_limit = limit;
        self
    }

    #[must_use]
    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    #[must_use]
    pub fn compiler(&self) -> &SqlCompiler {
        &self.compiler
    }

    /// # Errors
    /// Returns [`CrudError::UnknownEntity`] when `name` is not registered.
    pub fn entity(&self, name: &str) -> Result<&Entity, CrudError> {
        self.registry
            .get(name)
            .ok_or_else(|| CrudError::UnknownEntity(name.to_owned()))
    }

    /// Parse a grammar object for the entity registered as `entity`.
    ///
    /// # Errors
    /// Returns [`CrudError::UnknownEntity`] or the parser's [`CrudError::Query`].
    pub fn parse_query(
        &self,
        entity: &str,
        data: &Map<String, JsonValue>,
    ) -> Result<QueryPlan, CrudError> {
        let mut plan = QueryPlan::from_json(self.entity(entity)?, data, &self.registry)?;
        plan.set_limit(self.default_limit);
        Ok(plan)
    }

    /// Parse an URL query string for the entity registered as `entity`.
    ///
    /// # Errors
    /// See [`Self::parse_query`].
    pub fn parse_query_string(&self, entity: &str, query: &str) -> Result<QueryPlan, CrudError> {
        let mut plan = QueryPlan::from_query_string(self.entity(entity)?, query, &self.registry)?;
        plan.set_limit(self.default_limit);
        Ok(plan)
    }

    /// # Errors
    /// See [`Self::get_list_with_perm`].
    pub async fn get_list(
        &self,
        plan: &QueryPlan,
        with_count: bool,
    ) -> Result<QueryResultRowList, CrudError> {
        self.get_list_with_perm(plan, with_count, &PermInfo::skip()).await
    }

    /// Read rows after filtering `plan` through the role in `perm`.
    ///
    /// # Errors
    /// Returns [`CrudError::Query`] when the plan cannot be compiled,
    /// [`CrudError::Db`] on driver failures, or a hook's error.
    #[tracing::instrument(skip_all, fields(entity = plan.entity().name()))]
    pub async fn get_list_with_perm(
        &self,
        plan: &QueryPlan,
        with_count: bool,
        perm: &PermInfo,
    ) -> Result<QueryResultRowList, CrudError> {
        let mut session = self.backend.begin().await?;
        let res = self.read(session.as_mut(), plan, with_count, perm).await;
        finish(session, res).await
    }

    /// Read rows and resolve `plan.foreign_keys()` into each row's extras.
    ///
    /// # Errors
    /// See [`Self::get_list_with_perm`].
    #[tracing::instrument(skip_all, fields(entity = plan.entity().name()))]
    pub async fn get_list_with_foreign_keys(
        &self,
        plan: &QueryPlan,
        perm: &PermInfo,
    ) -> Result<QueryResultRowList, CrudError> {
        let mut session = self.backend.begin().await?;
        let res = async {
            let mut rows = self.read(session.as_mut(), plan, false, perm).await?;
            fk::resolve(
                self,
                session.as_mut(),
                &mut rows.rows,
                plan.entity(),
                plan.foreign_keys(),
                perm,
                0,
            )
            .await?;
            Ok(rows)
        }
        .await;
        finish(session, res).await
    }

    /// # Errors
    /// See [`Self::insert_many_with_perm`].
    pub async fn insert_many(
        &self,
        entity: &Entity,
        values: Vec<ValuesToCreate>,
    ) -> Result<Vec<Value>, CrudError> {
        let out = self
            .insert_many_with_perm(entity, values, &PermInfo::skip(), false)
            .await?;
        Ok(out.ids())
    }

    /// Insert rows one statement at a time; ids come back in input order.
    ///
    /// Values the role cannot create are dropped first, and a row left
    /// with nothing to write is skipped.
    ///
    /// # Errors
    /// Returns [`CrudError::InvalidQueryValue`] for values of another entity,
    /// [`CrudError::Db`] on driver failures, or a hook's error.
    #[tracing::instrument(skip_all, fields(entity = entity.name(), rows = values.len()))]
    pub async fn insert_many_with_perm(
        &self,
        entity: &Entity,
        values: Vec<ValuesToCreate>,
        perm: &PermInfo,
        returning: bool,
    ) -> Result<WriteOutput, CrudError> {
        let mut session = self.backend.begin().await?;
        let res = async {
            let ids = self.insert_rows(session.as_mut(), entity, values, perm).await?;
            self.output(session.as_mut(), entity, ids, None, perm, returning)
                .await
        }
        .await;
        finish(session, res).await
    }

    /// Insert rows given as JSON objects. Keys the role cannot create are
    /// dropped before the row is bound, so their values are never validated.
    ///
    /// # Errors
    /// Returns [`CrudError::Query`] when a kept value does not fit its field;
    /// otherwise as [`Self::insert_many_with_perm`].
    pub async fn insert_json_with_perm(
        &self,
        entity: &Entity,
        rows: &[Map<String, JsonValue>],
        perm: &PermInfo,
        returning: bool,
    ) -> Result<WriteOutput, CrudError> {
        let values = rows
            .iter()
            .map(|row| create_values_from_json(entity, row, perm))
            .collect::<Result<Vec<_>, _>>()?;
        self.insert_many_with_perm(entity, values, perm, returning)
            .await
    }

    /// # Errors
    /// See [`Self::update_with_perm`].
    pub async fn update(
        &self,
        plan: &QueryPlan,
        values: ValuesToUpdate,
    ) -> Result<Vec<Value>, CrudError> {
        let out = self
            .update_with_perm(plan, values, &PermInfo::skip(), false)
            .await?;
        Ok(out.ids())
    }

    /// Update the rows matched by `plan`.
    ///
    /// Ids are resolved with the plan first; when none match no UPDATE is
    /// issued and the result is empty. Otherwise every resolved id is
    /// returned, including rows the UPDATE left unchanged.
    ///
    /// # Errors
    /// Returns [`CrudError::InvalidQueryValue`] when no value is left after
    /// permission filtering, [`CrudError::Db`] on driver failures, or a
    /// hook's error.
    #[tracing::instrument(skip_all, fields(entity = plan.entity().name()))]
    pub async fn update_with_perm(
        &self,
        plan: &QueryPlan,
        mut values: ValuesToUpdate,
        perm: &PermInfo,
        returning: bool,
    ) -> Result<WriteOutput, CrudError> {
        if values.entity() != plan.entity() {
            return Err(foreign_values(values.entity(), plan.entity()));
        }
        filter_update_values(&mut values, perm);
        if values.is_empty() {
            return Err(CrudError::InvalidQueryValue("empty values".to_owned()));
        }

        let mut session = self.backend.begin().await?;
        let res = async {
            let ids = self.update_rows(session.as_mut(), plan, values, perm).await?;
            self.output(session.as_mut(), plan.entity(), ids, Some(plan), perm, returning)
                .await
        }
        .await;
        finish(session, res).await
    }

    /// Update with assignments given as a JSON object (`field` or
    /// `field.<flag>` keys). Keys the role cannot update are dropped before
    /// the assignments are bound.
    ///
    /// # Errors
    /// Returns [`CrudError::Query`] when a kept key or value is invalid;
    /// otherwise as [`Self::update_with_perm`].
    pub async fn update_json_with_perm(
        &self,
        plan: &QueryPlan,
        data: &Map<String, JsonValue>,
        perm: &PermInfo,
        returning: bool,
    ) -> Result<WriteOutput, CrudError> {
        let values = update_values_from_json(plan.entity(), data, perm)?;
        self.update_with_perm(plan, values, perm, returning).await
    }

    /// # Errors
    /// See [`Self::delete_with_perm`].
    pub async fn delete(&self, plan: &QueryPlan) -> Result<Vec<Value>, CrudError> {
        self.delete_with_perm(plan, &PermInfo::skip()).await
    }

    /// Delete the rows matched by `plan` and return their ids.
    ///
    /// # Errors
    /// Returns [`CrudError::Permission`] before anything runs when the role
    /// may not delete the entity, [`CrudError::Db`] on driver failures, or a
    /// hook's error.
    #[tracing::instrument(skip_all, fields(entity = plan.entity().name()))]
    pub async fn delete_with_perm(
        &self,
        plan: &QueryPlan,
        perm: &PermInfo,
    ) -> Result<Vec<Value>, CrudError> {
        if !can_delete(plan.entity(), perm) {
            return Err(CrudError::Permission {
                action: "delete",
                entity: plan.entity().name().to_owned(),
            });
        }

        let mut session = self.backend.begin().await?;
        let res = self.delete_rows(session.as_mut(), plan, perm).await;
        finish(session, res).await
    }

    /// Re-read rows by id, selecting what `plan` selects (every field when
    /// `plan` is `None`).
    ///
    /// # Errors
    /// See [`Self::get_list_with_perm`].
    #[tracing::instrument(skip_all, fields(entity = entity.name(), ids = ids.len()))]
    pub async fn solve_returning(
        &self,
        entity: &Entity,
        ids: &[Value],
        plan: Option<&QueryPlan>,
        perm: &PermInfo,
    ) -> Result<QueryResultRowList, CrudError> {
        let mut session = self.backend.begin().await?;
        let res = self
            .returning(session.as_mut(), entity, ids, plan, perm)
            .await;
        finish(session, res).await
    }

    pub(crate) async fn read(
        &self,
        session: &mut dyn SqlSession,
        plan: &QueryPlan,
        with_count: bool,
        perm: &PermInfo,
    ) -> Result<QueryResultRowList, CrudError> {
        let hooks = self.hooks_for(plan.entity());
        let mut plan = plan.clone();
        if let Some(h) = hooks {
            h.on_query(&mut plan, perm).await?;
        }

        let solved = solve_query(&plan, perm);
        let stmts = self.compiler.compile_select(&solved, with_count)?;
        log_statement("select", &stmts.rows);

        let columns: Arc<[FieldRef]> = solved.select_for_crud().into();
        let base = solved.entity();
        let rows = session
            .fetch_all(&stmts.rows)
            .await?
            .into_iter()
            .map(|cells| {
                let mut cells = cells.into_iter();
                let id = cells.next().unwrap_or(Value::Null);
                QueryResultRow::new(id, cells.collect(), Arc::clone(&columns), base.clone())
            })
            .collect();

        let rows_count = match &stmts.count {
            Some(count) => {
                log_statement("count", count);
                let cells = session.fetch_all(count).await?;
                let n = cells
                    .first()
                    .and_then(|r| r.first())
                    .and_then(Value::as_i64)
                    .and_then(|n| u64::try_from(n).ok())
                    .unwrap_or(0);
                Some(n)
            }
            None => None,
        };

        let mut list = QueryResultRowList { rows, rows_count };
        if let Some(h) = hooks {
            h.after_read(&mut list, perm).await?;
        }
        Ok(list)
    }

    async fn insert_rows(
        &self,
        session: &mut dyn SqlSession,
        entity: &Entity,
        values: Vec<ValuesToCreate>,
        perm: &PermInfo,
    ) -> Result<Vec<Value>, CrudError> {
        let hooks = self.hooks_for(entity);
        let mut ids = Vec::with_capacity(values.len());
        for mut row in values {
            if row.entity() != entity {
                return Err(foreign_values(row.entity(), entity));
            }
            if perm.is_check() {
                filter_create_values(&mut row, perm);
                if row.is_empty() {
                    tracing::debug!("row skipped: nothing creatable");
                    continue;
                }
            }
            if let Some(h) = hooks {
                h.on_insert(&mut row, perm).await?;
            }

            let stmt = self.compiler.compile_insert(&row)?;
            log_statement("insert", &stmt);
            let id = if stmt.columns.is_empty() {
                let outcome = session.execute(&stmt).await?;
                outcome.last_insert_id.map_or(Value::Null, Value::I64)
            } else {
                session
                    .fetch_all(&stmt)
                    .await?
                    .into_iter()
                    .next()
                    .and_then(|r| r.into_iter().next())
                    .unwrap_or(Value::Null)
            };
            ids.push(id);
        }

        if let Some(h) = hooks {
            h.after_insert(&ids, perm).await?;
        }
        Ok(ids)
    }

    async fn update_rows(
        &self,
        session: &mut dyn SqlSession,
        plan: &QueryPlan,
        mut values: ValuesToUpdate,
        perm: &PermInfo,
    ) -> Result<Vec<Value>, CrudError> {
        let ids = self.resolve_ids(session, plan, perm).await?;
        if ids.is_empty() {
            tracing::debug!("no rows matched");
            return Ok(ids);
        }

        let hooks = self.hooks_for(plan.entity());
        if let Some(h) = hooks {
            h.before_update(&mut values, &ids, perm).await?;
        }
        let stmt = self.compiler.compile_update(&values, &ids)?;
        log_statement("update", &stmt);
        let outcome = session.execute(&stmt).await?;
        tracing::debug!(matched = ids.len(), changed = outcome.rows_affected, "rows updated");
        if let Some(h) = hooks {
            h.after_update(&ids, perm).await?;
        }
        Ok(ids)
    }

    async fn delete_rows(
        &self,
        session: &mut dyn SqlSession,
        plan: &QueryPlan,
        perm: &PermInfo,
    ) -> Result<Vec<Value>, CrudError> {
        let ids = self.resolve_ids(session, plan, perm).await?;
        if ids.is_empty() {
            tracing::debug!("no rows matched");
            return Ok(ids);
        }

        let hooks = self.hooks_for(plan.entity());
        if let Some(h) = hooks {
            h.before_delete(&ids, perm).await?;
        }
        let stmt = self.compiler.compile_delete(plan.entity(), &ids);
        log_statement("delete", &stmt);
        session.execute(&stmt).await?;
        if let Some(h) = hooks {
            h.after_delete(&ids, perm).await?;
        }
        Ok(ids)
    }

    /// Ids matched by `plan`, through the permission-aware read path.
    async fn resolve_ids(
        &self,
        session: &mut dyn SqlSession,
        plan: &QueryPlan,
        perm: &PermInfo,
    ) -> Result<Vec<Value>, CrudError> {
        let mut lookup = plan.clone();
        lookup.set_select(Vec::new());
        lookup.set_foreign_keys(IndexMap::new());
        Ok(self.read(session, &lookup, false, perm).await?.ids())
    }

    async fn returning(
        &self,
        session: &mut dyn SqlSession,
        entity: &Entity,
        ids: &[Value],
        plan: Option<&QueryPlan>,
        perm: &PermInfo,
    ) -> Result<QueryResultRowList, CrudError> {
        let select = plan.map_or_else(
            || entity.fields().collect(),
            |p| p.select_for_crud().to_vec(),
        );
        let lookup = QueryPlan::new(entity.clone())
            .with_select(select)
            .with_scope(entity.id().in_(ids.iter().cloned()))
            .with_limit(None);
        self.read(session, &lookup, false, perm).await
    }

    async fn output(
        &self,
        session: &mut dyn SqlSession,
        entity: &Entity,
        ids: Vec<Value>,
        plan: Option<&QueryPlan>,
        perm: &PermInfo,
        returning: bool,
    ) -> Result<WriteOutput, CrudError> {
        if returning {
            let rows = self.returning(session, entity, &ids, plan, perm).await?;
            Ok(WriteOutput::Rows(rows))
        } else {
            Ok(WriteOutput::Ids(ids))
        }
    }

    fn hooks_for(&self, entity: &Entity) -> Option<&Arc<dyn EntityHooks>> {
        self.hooks.get(entity.name())
    }
}

async fn finish<T>(session: Box<dyn SqlSession>, res: Result<T, CrudError>) -> Result<T, CrudError> {
    match res {
        Ok(v) => {
            session.commit().await?;
            Ok(v)
        }
        Err(e) => {
            if let Err(rollback) = session.rollback().await {
                tracing::warn!(error = %rollback, "rollback failed");
            }
            tracing::warn!(error = %e, "operation rolled back");
            Err(e)
        }
    }
}

fn log_statement(kind: &'static str, stmt: &CompiledStatement) {
    tracing::debug!(kind, sql = %stmt.sql, params = stmt.values.len(), "statement compiled");
}

fn foreign_values(values: &Entity, target: &Entity) -> CrudError {
    CrudError::InvalidQueryValue(format!(
        "values for `{}` cannot be written to `{}`",
        values.name(),
        target.name()
    ))
}
