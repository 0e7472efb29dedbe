#![cfg(feature = "sqlite")]
#![allow(clippy::unwrap_used, clippy::expect_used)]

//! End-to-end CRUD against an in-memory SQLite database.

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use common::sqlite::crud;
use common::{f, ids};
use crudkit_db::{CrudError, EntityHooks, WriteOutput};
use crudkit_query::{QueryError, QueryPlan, Value, ValuesToCreate, ValuesToUpdate};
use crudkit_security::{Ability, PermInfo, RoleDefine, TablePerm};
use serde_json::{Map, Value as JsonValue, json};
use tracing_test::traced_test;

fn obj(v: JsonValue) -> Map<String, JsonValue> {
    match v {
        JsonValue::Object(m) => m,
        other => panic!("expected object, got {other}"),
    }
}

#[tokio::test]
async fn query_conditions_follow_the_role() {
    let (crud, fx) = crud().await;
    let plan = crud.parse_query_string("user", "id.eq=5").unwrap();

    let can_query_id = RoleDefine::new("visitor")
        .entity(&fx.user, TablePerm::new().field(&fx.user.id(), [Ability::Query]))
        .bind();
    let rows = crud
        .get_list_with_perm(&plan, false, &PermInfo::with_role(Arc::new(can_query_id)))
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows.rows[0].id(), &Value::I64(5));
    // nothing is readable, so only the id comes back
    assert!(rows.rows[0].to_dict().is_empty());

    let cannot_query = RoleDefine::new("visitor")
        .entity(&fx.user, TablePerm::new().default_perm([Ability::Read]))
        .bind();
    let rows = crud
        .get_list_with_perm(&plan, false, &PermInfo::with_role(Arc::new(cannot_query)))
        .await
        .unwrap();
    assert_eq!(rows.len(), 5);
    assert_eq!(rows.rows[0].to_dict()["username"], json!("alice"));
}

#[tokio::test]
async fn update_by_condition_returns_changed_ids() {
    let (crud, _) = crud().await;
    let plan = crud
        .parse_query("topic", &obj(json!({"id.in": [1, 2, 3, 4]})))
        .unwrap();
    let values = ValuesToUpdate::from_json(
        plan.entity(),
        &obj(json!({"user_id": "444", "content": "welcome"})),
    )
    .unwrap();

    let changed = crud.update(&plan, values).await.unwrap();
    assert_eq!(changed, ids(&[1, 2, 3, 4]));

    let rows = crud.get_list(&plan, false).await.unwrap();
    for row in &rows {
        assert_eq!(row.to_dict()["user_id"], json!(444));
        assert_eq!(row.to_dict()["content"], json!("welcome"));
    }
    let untouched = crud.parse_query_string("topic", "id.eq=5").unwrap();
    let rows = crud.get_list(&untouched, false).await.unwrap();
    assert_eq!(rows.rows[0].to_dict()["user_id"], json!(5));
}

#[tokio::test]
async fn incr_is_computed_by_the_database() {
    let (crud, fx) = crud().await;
    let plan = QueryPlan::new(fx.topic.clone()).with_conditions(fx.topic.id().in_([1, 2]));
    let values = ValuesToUpdate::from_json(&fx.topic, &obj(json!({"time.incr": 5}))).unwrap();

    crud.update(&plan, values).await.unwrap();

    let rows = crud.get_list(&plan, false).await.unwrap();
    let times: Vec<_> = rows.iter().map(|r| r.to_dict()["time"].clone()).collect();
    assert_eq!(times, [json!(105), json!(205)]);
}

#[tokio::test]
async fn delete_requires_permission() {
    let (crud, fx) = crud().await;
    let plan = QueryPlan::new(fx.topic.clone()).with_conditions(fx.topic.id().eq(1));

    let no_delete = RoleDefine::new("writer")
        .entity(&fx.topic, TablePerm::new().default_perm(Ability::ALL))
        .bind();
    let err = crud
        .delete_with_perm(&plan, &PermInfo::with_role(Arc::new(no_delete)))
        .await
        .unwrap_err();
    assert!(matches!(err, CrudError::Permission { action: "delete", .. }));
    assert_eq!(crud.get_list(&plan, false).await.unwrap().len(), 1);

    let admin = RoleDefine::new("admin")
        .entity(
            &fx.topic,
            TablePerm::new().default_perm(Ability::ALL).allow_delete(true),
        )
        .bind();
    let deleted = crud
        .delete_with_perm(&plan, &PermInfo::with_role(Arc::new(admin)))
        .await
        .unwrap();
    assert_eq!(deleted, ids(&[1]));
    assert!(crud.get_list(&plan, false).await.unwrap().is_empty());
}

#[tokio::test]
async fn insert_drops_uncreatable_values_and_returns_rows() {
    let (crud, fx) = crud().await;
    let role = RoleDefine::new("signup")
        .entity(
            &fx.user,
            TablePerm::new()
                .default_perm([Ability::Query, Ability::Read])
                .field(&f(&fx.user, "username"), Ability::ALL)
                .field(&f(&fx.user, "nickname"), Ability::ALL),
        )
        .bind();
    let rows = vec![
        ValuesToCreate::from_json(
            &fx.user,
            &obj(json!({"username": "frank", "nickname": "Frank", "password": "secret"})),
        )
        .unwrap(),
        // nothing creatable is left, so the row is skipped
        ValuesToCreate::from_json(&fx.user, &obj(json!({"password": "x"}))).unwrap(),
    ];

    let out = crud
        .insert_many_with_perm(&fx.user, rows, &PermInfo::with_role(Arc::new(role)), true)
        .await
        .unwrap();
    let WriteOutput::Rows(rows) = out else {
        panic!("returning rows requested");
    };
    assert_eq!(rows.len(), 1);
    assert_eq!(rows.rows[0].id(), &Value::I64(6));
    let dict = rows.rows[0].to_dict();
    assert_eq!(dict["username"], json!("frank"));
    assert_eq!(dict["password"], JsonValue::Null);
}

#[tokio::test]
async fn insert_many_returns_ids_in_order() {
    let (crud, fx) = crud().await;
    let rows = ["x", "y"]
        .into_iter()
        .map(|t| ValuesToCreate::from_json(&fx.topic, &obj(json!({"title": t, "time": 1}))).unwrap())
        .collect();
    assert_eq!(crud.insert_many(&fx.topic, rows).await.unwrap(), ids(&[6, 7]));
}

#[tokio::test]
async fn count_ignores_limit() -> anyhow::Result<()> {
    let (crud, _) = crud().await;
    let mut plan = crud.parse_query_string("user", "$order-by=id.desc")?;
    plan.set_limit(Some(2));

    let rows = crud.get_list(&plan, true).await?;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows.rows_count, Some(5));
    assert_eq!(rows.ids(), ids(&[5, 4]));
    Ok(())
}

#[tokio::test]
async fn json_and_array_columns_round_trip_on_sqlite() {
    let (crud, fx) = crud().await;
    let row = ValuesToCreate::from_json(
        &fx.table_one,
        &obj(json!({"arr": ["a", "b"], "meta": {"k": [1, 2]}})),
    )
    .unwrap();
    let new_ids = crud.insert_many(&fx.table_one, vec![row]).await.unwrap();

    let rows = crud
        .solve_returning(&fx.table_one, &new_ids, None, &PermInfo::skip())
        .await
        .unwrap();
    assert_eq!(
        rows.rows[0].to_dict(),
        &obj(json!({"id": 1, "arr": ["a", "b"], "meta": {"k": [1, 2]}}))
    );
}

struct RejectUpdates;

#[async_trait]
impl EntityHooks for RejectUpdates {
    async fn before_update(
        &self,
        _values: &mut ValuesToUpdate,
        ids: &[Value],
        _perm: &PermInfo,
    ) -> Result<(), CrudError> {
        Err(CrudError::InvalidQueryValue(format!("{} rows locked", ids.len())))
    }
}

#[tokio::test]
#[traced_test]
async fn hook_error_rolls_back() {
    let (crud, fx) = crud().await;
    let crud = crud.with_hooks(&fx.topic, Arc::new(RejectUpdates));
    let plan = QueryPlan::new(fx.topic.clone()).with_conditions(fx.topic.id().eq(1));
    let mut values = ValuesToUpdate::new(fx.topic.clone());
    values.set(&f(&fx.topic, "title"), "changed").unwrap();

    let err = crud.update(&plan, values).await.unwrap_err();
    assert!(matches!(err, CrudError::InvalidQueryValue(ref m) if m == "1 rows locked"));
    assert!(logs_contain("operation rolled back"));

    let rows = crud.get_list(&plan, false).await.unwrap();
    assert_eq!(rows.rows[0].to_dict()["title"], json!("t1"));
}

#[tokio::test]
async fn json_writes_ignore_invalid_values_of_forbidden_fields() {
    let (crud, fx) = crud().await;
    let role = RoleDefine::new("author")
        .entity(
            &fx.topic,
            TablePerm::new()
                .default_perm([Ability::Query, Ability::Read])
                .field(&f(&fx.topic, "title"), Ability::ALL),
        )
        .bind();
    let perm = PermInfo::with_role(Arc::new(role));

    let out = crud
        .insert_json_with_perm(
            &fx.topic,
            &[obj(json!({"title": "t6", "time": "yesterday"}))],
            &perm,
            false,
        )
        .await
        .unwrap();
    assert_eq!(out.ids(), ids(&[6]));

    let plan = QueryPlan::new(fx.topic.clone()).with_conditions(fx.topic.id().eq(6));
    let out = crud
        .update_json_with_perm(&plan, &obj(json!({"title": "t7", "time.incr": "soon"})), &perm, true)
        .await
        .unwrap();
    let WriteOutput::Rows(rows) = out else {
        panic!("returning rows requested");
    };
    assert_eq!(rows.rows[0].to_dict()["title"], json!("t7"));
    assert_eq!(rows.rows[0].to_dict()["time"], JsonValue::Null);

    let err = crud
        .insert_json_with_perm(
            &fx.topic,
            &[obj(json!({"title": "t8", "time": "yesterday"}))],
            &PermInfo::skip(),
            false,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CrudError::Query(QueryError::InvalidQueryValue(_))));
}

#[tokio::test]
async fn update_to_current_value_still_returns_the_id() {
    let (crud, fx) = crud().await;
    let plan = QueryPlan::new(fx.topic.clone()).with_conditions(fx.topic.id().eq(2));
    let mut values = ValuesToUpdate::new(fx.topic.clone());
    values.set(&f(&fx.topic, "title"), "t2").unwrap();

    assert_eq!(crud.update(&plan, values).await.unwrap(), ids(&[2]));
}
