//! Applying a role to plans and write values.
//!
//! Condition pruning is fail-open: a leaf whose column (or field operand) is
//! not queryable is dropped and the rest of the query still runs. Dropped
//! leaves and fields are reported at `debug` level by name only.

use std::collections::HashSet;

use crudkit_query::{
    Condition, ConditionLogicExpr, Entity, FieldRef, Operand, QueryConditions, QueryError,
    QueryPlan, ValuesToCreate, ValuesToUpdate,
};
use serde_json::{Map, Value as JsonValue};

use crate::ability::Ability;
use crate::perm_info::PermInfo;
use crate::role::Role;

/// Rewrite `plan` so it only filters on queryable fields and only selects
/// readable ones. Returns the plan unchanged when checks are skipped.
///
/// Negated sub-trees are kept as they are. Foreign-key sub-plans are left
/// for the resolver, which solves each of them when it runs.
#[must_use]
pub fn solve_query(plan: &QueryPlan, perm: &PermInfo) -> QueryPlan {
    let Some(role) = perm.role() else {
        return plan.clone();
    };

    let allow_query = avail(role, plan.entities(), Ability::Query);
    let allow_read = avail(role, plan.entities(), Ability::Read);
    let entity = plan.entity().name();

    let mut solved = plan.clone();

    if let Some(conditions) = plan.conditions() {
        solved.set_conditions(Some(prune_conditions(conditions, &allow_query, entity)));
    }

    let joins = plan
        .joins()
        .iter()
        .map(|j| {
            let mut j = j.clone();
            j.conditions = prune_conditions(&j.conditions, &allow_query, entity);
            j
        })
        .collect();
    solved.set_joins(joins);

    let (kept, dropped): (Vec<FieldRef>, Vec<FieldRef>) = plan
        .select()
        .iter()
        .cloned()
        .partition(|f| allow_read.contains(f));
    if !dropped.is_empty() {
        tracing::debug!(
            entity,
            fields = ?dropped.iter().map(FieldRef::name).collect::<Vec<_>>(),
            "unreadable fields removed from selection"
        );
    }
    solved.set_select(kept);

    solved
}

fn avail<'a>(
    role: &Role,
    entities: impl Iterator<Item = &'a Entity>,
    ability: Ability,
) -> HashSet<FieldRef> {
    let mut out = HashSet::new();
    for e in entities {
        out.extend(role.get_perm_avail(e, ability));
    }
    out
}

fn prune_conditions(
    conditions: &QueryConditions,
    allow: &HashSet<FieldRef>,
    entity: &str,
) -> QueryConditions {
    QueryConditions::new(
        conditions
            .items
            .iter()
            .filter_map(|c| prune(c, allow, entity))
            .collect(),
    )
}

fn prune(cond: &Condition, allow: &HashSet<FieldRef>, entity: &str) -> Option<Condition> {
    match cond {
        Condition::Expr(e) => {
            let column_ok = allow.contains(&e.column);
            let operand_ok = match &e.value {
                Operand::Field(f) => allow.contains(f),
                Operand::Value(_) | Operand::List(_) => true,
            };
            if column_ok && operand_ok {
                Some(cond.clone())
            } else {
                tracing::debug!(entity, column = e.column.name(), op = %e.op, "condition removed by permission");
                None
            }
        }
        Condition::Logic(group) => {
            let items: Vec<_> = group
                .items
                .iter()
                .filter_map(|c| prune(c, allow, entity))
                .collect();
            (!items.is_empty()).then(|| {
                Condition::Logic(ConditionLogicExpr {
                    kind: group.kind,
                    items,
                })
            })
        }
        Condition::Not(_) => Some(cond.clone()),
    }
}

/// Drop values of fields the role cannot create.
pub fn filter_create_values(values: &mut ValuesToCreate, perm: &PermInfo) {
    if let Some(role) = perm.role() {
        values.retain(|f| role.allows(f, Ability::Create));
    }
}

/// Drop assignments to fields the role cannot update.
pub fn filter_update_values(values: &mut ValuesToUpdate, perm: &PermInfo) {
    if let Some(role) = perm.role() {
        values.retain(|f| role.allows(f, Ability::Update));
    }
}

/// Bind a JSON row keeping only fields the role can create. Dropped keys
/// are never coerced, so their values cannot fail the insert.
///
/// # Errors
/// Returns [`QueryError::InvalidQueryValue`] when a kept value does not fit
/// its field type.
pub fn create_values_from_json(
    entity: &Entity,
    data: &Map<String, JsonValue>,
    perm: &PermInfo,
) -> Result<ValuesToCreate, QueryError> {
    let role = perm.role();
    ValuesToCreate::from_json_filtered(entity, data, |f| {
        role.is_none_or(|role| role.allows(f, Ability::Create))
    })
}

/// Bind JSON assignments keeping only fields the role can update; `field.flag`
/// keys are matched by their field.
///
/// # Errors
/// See [`ValuesToUpdate::from_json`], for kept keys only.
pub fn update_values_from_json(
    entity: &Entity,
    data: &Map<String, JsonValue>,
    perm: &PermInfo,
) -> Result<ValuesToUpdate, QueryError> {
    let role = perm.role();
    ValuesToUpdate::from_json_filtered(entity, data, |f| {
        role.is_none_or(|role| role.allows(f, Ability::Update))
    })
}

/// Whether rows of `entity` may be deleted; always true when checks are skipped.
#[must_use]
pub fn can_delete(entity: &Entity, perm: &PermInfo) -> bool {
    perm.role().is_none_or(|role| role.can_delete(entity))
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::role::{RoleDefine, TablePerm};
    use crudkit_query::FieldKind;

    fn user() -> Entity {
        Entity::builder("user")
            .field("id", FieldKind::I64)
            .field("name", FieldKind::String)
            .build()
            .unwrap()
    }

    #[test]
    fn empty_groups_collapse() {
        let u = user();
        let name = u.field("name").unwrap();
        let allow: HashSet<_> = [u.id()].into_iter().collect();
        let c = u.id().eq(1) | name.eq("x");
        assert_eq!(prune(&c, &allow, "user"), Some(Condition::or(vec![u.id().eq(1)])));
        assert_eq!(prune(&(name.eq("a") & name.eq("b")), &allow, "user"), None);
    }

    #[test]
    fn negation_is_not_inspected() {
        let u = user();
        let name = u.field("name").unwrap();
        let c = !name.eq("x");
        assert_eq!(prune(&c, &HashSet::new(), "user"), Some(c.clone()));
    }

    #[test]
    fn skip_mode_changes_nothing() {
        let u = user();
        let plan = QueryPlan::new(u.clone()).with_conditions(u.id().eq(1));
        assert_eq!(solve_query(&plan, &PermInfo::skip()), plan);
        assert!(can_delete(&u, &PermInfo::skip()));
    }

    #[test]
    fn write_filters_follow_abilities() {
        let u = user();
        let name = u.field("name").unwrap();
        let role = RoleDefine::new("editor")
            .entity(
                &u,
                TablePerm::new()
                    .field(&u.id(), [Ability::Create])
                    .field(&name, [Ability::Update]),
            )
            .bind();
        let perm = PermInfo::with_role(Arc::new(role));

        let mut create = ValuesToCreate::new(u.clone());
        create.set(&u.id(), 1).unwrap();
        create.set(&name, "n").unwrap();
        filter_create_values(&mut create, &perm);
        assert!(create.get("id").is_some());
        assert!(create.get("name").is_none());

        let mut update = ValuesToUpdate::new(u.clone());
        update.set(&u.id(), 2).unwrap();
        update.set(&name, "m").unwrap();
        filter_update_values(&mut update, &perm);
        assert_eq!(update.len(), 1);
        assert!(update.get("name").is_some());
        assert!(!can_delete(&u, &perm));
    }

    #[test]
    fn json_rows_are_filtered_before_coercion() {
        let u = user();
        let name = u.field("name").unwrap();
        let role = RoleDefine::new("writer")
            .entity(
                &u,
                TablePerm::new()
                    .field(&name, [Ability::Create, Ability::Update])
                    .field(&u.id(), []),
            )
            .bind();
        let perm = PermInfo::with_role(Arc::new(role));

        let row = serde_json::json!({"id": "not a number", "name": "n"});
        let create = create_values_from_json(&u, row.as_object().unwrap(), &perm).unwrap();
        assert_eq!(create.len(), 1);
        assert!(create.get("id").is_none());

        let data = serde_json::json!({"id.incr": "x", "name": "m"});
        let update = update_values_from_json(&u, data.as_object().unwrap(), &perm).unwrap();
        assert_eq!(update.len(), 1);

        let err = create_values_from_json(&u, row.as_object().unwrap(), &PermInfo::skip());
        assert!(matches!(err, Err(QueryError::InvalidQueryValue(_))));
    }

    #[test]
    fn scope_survives_pruning() {
        let u = user();
        let name = u.field("name").unwrap();
        let role = RoleDefine::new("reader")
            .entity(&u, TablePerm::new().field(&name, [Ability::Read]).field(&u.id(), []))
            .bind();
        let plan = QueryPlan::new(u.clone())
            .with_conditions(u.id().eq(1))
            .with_scope(u.id().in_([1, 2]));
        let solved = solve_query(&plan, &PermInfo::with_role(Arc::new(role)));
        assert!(solved.conditions().is_none_or(QueryConditions::is_empty));
        assert_eq!(solved.scope(), Some(&QueryConditions::from(u.id().in_([1, 2]))));
    }
}
