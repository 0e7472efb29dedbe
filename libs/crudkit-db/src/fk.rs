//! Nested foreign-key fetches.
//!
//! For each relation the child rows are read through the parent table:
//!
//! ```text
//! SELECT parent.id, child.id, child.<selected...>
//! FROM parent INNER JOIN child ON <relation condition>
//! WHERE parent.id IN (<ids of the current level>)
//! ```
//!
//! so every child row carries the id of the parent it belongs to. A relation
//! named `name[]` collects every match; any other name keeps one match per
//! parent, capped in SQL by a correlated `LIMIT 1` subquery. Relations run
//! one after another in declaration order, depth first.

use std::future::Future;
use std::pin::Pin;

use crudkit_query::{Entity, JoinSpec, QueryPlan, Value};
use crudkit_security::PermInfo;
use indexmap::IndexMap;

use crate::backend::SqlSession;
use crate::crud::Crud;
use crate::error::CrudError;
use crate::row::{Extra, QueryResultRow};

/// Suffix marking a relation that yields a list.
pub const MANY_SUFFIX: &str = "[]";

type ResolveFuture<'a> = Pin<Box<dyn Future<Output = Result<(), CrudError>> + Send + 'a>>;

/// Attach every relation of `relations` to `rows`.
///
/// At depth 0 `rows` came from a plan on `parent` and are keyed by their
/// `id`; deeper down they are child rows keyed by their own primary key.
pub(crate) fn resolve<'a>(
    crud: &'a Crud,
    session: &'a mut dyn SqlSession,
    rows: &'a mut [QueryResultRow],
    parent: &'a Entity,
    relations: &'a IndexMap<String, QueryPlan>,
    perm: &'a PermInfo,
    depth: usize,
) -> ResolveFuture<'a> {
    Box::pin(async move {
        if relations.is_empty() {
            return Ok(());
        }

        let parent_ids: Vec<Value> = rows.iter().filter_map(|r| level_key(r, depth)).collect();
        if parent_ids.is_empty() {
            if !rows.is_empty() {
                tracing::debug!(entity = parent.name(), depth, "parent ids not selected, relations skipped");
            }
            for row in &mut *rows {
                for name in relations.keys() {
                    row.set_extra(name.clone(), Extra::None);
                }
            }
            return Ok(());
        }

        for (name, child_plan) in relations {
            let many = name.ends_with(MANY_SUFFIX);
            let child = child_plan.entity();
            let query = child_query(parent, &parent_ids, child_plan, many);

            let mut children = crud.read(&mut *session, &query, false, perm).await?.rows;
            for c in &mut children {
                c.set_base(child.clone());
            }
            tracing::debug!(relation = %name, depth, rows = children.len(), "relation fetched");

            resolve(
                crud,
                &mut *session,
                &mut children,
                child,
                child_plan.foreign_keys(),
                perm,
                depth + 1,
            )
            .await?;

            let buckets = bucket(children, many);
            for row in &mut *rows {
                let extra = level_key(row, depth)
                    .and_then(|k| buckets.get(&k.key()).cloned())
                    .unwrap_or(Extra::None);
                row.set_extra(name.clone(), extra);
            }
        }
        Ok(())
    })
}

fn child_query(parent: &Entity, parent_ids: &[Value], child_plan: &QueryPlan, many: bool) -> QueryPlan {
    let child = child_plan.entity();
    let mut select = vec![child.id()];
    select.extend(child_plan.select_for_crud().iter().cloned());

    let join = JoinSpec::inner(
        child.clone(),
        child_plan.conditions().cloned().unwrap_or_default(),
        (!many).then_some(1),
    );
    QueryPlan::new(parent.clone())
        .with_select(select)
        .with_scope(parent.id().in_(parent_ids.iter().cloned()))
        .with_joins(vec![join])
        .with_order_by(child_plan.order_by().to_vec())
        .with_limit(None)
}

/// Group child rows by the parent id they were fetched for.
fn bucket(children: Vec<QueryResultRow>, many: bool) -> IndexMap<String, Extra> {
    let mut buckets = IndexMap::new();
    for c in children {
        let key = c.id().key();
        if many {
            let entry = buckets
                .entry(key)
                .or_insert_with(|| Extra::Many(Vec::new()));
            if let Extra::Many(list) = entry {
                list.push(c);
            }
        } else {
            buckets.insert(key, Extra::One(Box::new(c)));
        }
    }
    buckets
}

/// Id a row is matched by at `depth`.
fn level_key(row: &QueryResultRow, depth: usize) -> Option<Value> {
    if depth == 0 {
        return Some(row.id().clone());
    }
    row.get(&row.base().id()).filter(|v| !v.is_null()).cloned()
}
