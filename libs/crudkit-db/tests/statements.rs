#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Statement sequences issued by `Crud`, checked against a recording backend.

mod common;

use std::sync::Arc;

use common::{Fixture, Recorded, RecordingBackend, f, ids};
use crudkit_db::{Crud, CrudError, Dialect, EXTRA_KEY, SqlValue};
use crudkit_query::{QueryPlan, Value, ValuesToUpdate};
use crudkit_security::{Ability, PermInfo, RoleDefine, TablePerm};
use serde_json::json;

fn setup(dialect: Dialect) -> (Crud, RecordingBackend, Fixture) {
    let fx = Fixture::new();
    let backend = RecordingBackend::new(dialect);
    let crud = Crud::new(Arc::new(backend.clone()), Arc::clone(&fx.registry));
    (crud, backend, fx)
}

#[tokio::test]
async fn update_resolves_ids_then_mutates_in_one_session() {
    let (crud, backend, fx) = setup(Dialect::Sqlite);
    backend.push_rows(vec![vec![Value::I64(1)], vec![Value::I64(2)]]);

    let plan = QueryPlan::new(fx.topic.clone()).with_conditions(f(&fx.topic, "time").lt(300));
    let mut values = ValuesToUpdate::new(fx.topic.clone());
    values.set(&f(&fx.topic, "content"), "welcome").unwrap();

    let out = crud.update(&plan, values).await.unwrap();
    assert_eq!(out, ids(&[1, 2]));

    let log = backend.log();
    assert_eq!(
        log[0].sql(),
        Some(r#"SELECT "id" FROM "topic" WHERE "time" < ? LIMIT ?"#)
    );
    assert_eq!(
        log[1],
        Recorded::Execute {
            sql: r#"UPDATE "topic" SET "content" = ? WHERE "id" IN (?, ?)"#.to_owned(),
            params: vec![SqlValue::from("welcome"), SqlValue::from(1i64), SqlValue::from(2i64)],
        }
    );
    assert_eq!(log[2], Recorded::Commit);
    assert_eq!(log.len(), 3);
}

#[tokio::test]
async fn update_without_matches_issues_no_mutation() {
    let (crud, backend, fx) = setup(Dialect::Sqlite);
    let plan = QueryPlan::new(fx.topic.clone()).with_conditions(fx.topic.id().eq(99));
    let mut values = ValuesToUpdate::new(fx.topic.clone());
    values.set(&f(&fx.topic, "title"), "x").unwrap();

    assert!(crud.update(&plan, values).await.unwrap().is_empty());
    let statements = backend.statements();
    assert_eq!(statements.len(), 1);
    assert!(statements[0].starts_with("SELECT"));
}

#[tokio::test]
async fn update_returns_resolved_ids_when_no_row_changed() {
    let (crud, backend, fx) = setup(Dialect::Sqlite);
    backend.push_rows(vec![vec![Value::I64(3)]]);
    backend.set_rows_affected(0);
    let mut values = ValuesToUpdate::new(fx.topic.clone());
    values.set(&f(&fx.topic, "title"), "x").unwrap();

    let out = crud.update(&QueryPlan::new(fx.topic.clone()), values).await.unwrap();
    assert_eq!(out, ids(&[3]));
}

#[tokio::test]
async fn update_with_everything_filtered_fails_before_sql() {
    let (crud, backend, fx) = setup(Dialect::Sqlite);
    let role = RoleDefine::new("reader")
        .entity(&fx.topic, TablePerm::new().default_perm([Ability::Query, Ability::Read]))
        .bind();
    let mut values = ValuesToUpdate::new(fx.topic.clone());
    values.set(&f(&fx.topic, "title"), "x").unwrap();

    let err = crud
        .update_with_perm(
            &QueryPlan::new(fx.topic.clone()),
            values,
            &PermInfo::with_role(Arc::new(role)),
            false,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CrudError::InvalidQueryValue(ref m) if m == "empty values"));
    assert!(backend.log().is_empty());
}

#[tokio::test]
async fn delete_without_permission_fails_before_sql() {
    let (crud, backend, fx) = setup(Dialect::Sqlite);
    let role = RoleDefine::new("reader")
        .entity(&fx.topic, TablePerm::new().default_perm([Ability::Query, Ability::Read]))
        .bind();

    let err = crud
        .delete_with_perm(
            &QueryPlan::new(fx.topic.clone()),
            &PermInfo::with_role(Arc::new(role)),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CrudError::Permission { action: "delete", ref entity } if entity == "topic"
    ));
    assert!(backend.log().is_empty());
}

#[tokio::test]
async fn delete_uses_numbered_placeholders_on_postgres() {
    let (crud, backend, fx) = setup(Dialect::Postgres);
    backend.push_rows(vec![vec![Value::I64(4)], vec![Value::I64(5)]]);

    let plan = QueryPlan::new(fx.user.clone()).with_conditions(f(&fx.user, "username").prefix_with("e"));
    let out = crud.delete(&plan).await.unwrap();
    assert_eq!(out, ids(&[4, 5]));
    assert_eq!(
        backend.statements(),
        [
            r#"SELECT "id" FROM "users" WHERE "username" LIKE $1 LIMIT $2"#,
            r#"DELETE FROM "users" WHERE "id" IN ($1, $2)"#,
        ]
    );
}

#[tokio::test]
async fn count_runs_as_second_statement() {
    let (crud, backend, fx) = setup(Dialect::Sqlite);
    backend.push_rows(vec![vec![Value::I64(1), Value::from("alice")]]);
    backend.push_rows(vec![vec![Value::I64(7)]]);

    let plan = QueryPlan::new(fx.user.clone())
        .with_select(vec![f(&fx.user, "username")])
        .with_limit(Some(1));
    let rows = crud.get_list(&plan, true).await.unwrap();
    assert_eq!(rows.rows_count, Some(7));
    assert_eq!(rows.rows[0].to_dict()["username"], json!("alice"));
    assert_eq!(backend.statements()[1], r#"SELECT COUNT(1) FROM "users""#);
}

#[tokio::test]
async fn foreign_key_child_query_reads_through_parent() {
    let (crud, backend, fx) = setup(Dialect::Sqlite);
    // parents: id, title, user_id
    backend.push_rows(vec![
        vec![Value::I64(1), Value::from("t1"), Value::I64(1)],
        vec![Value::I64(2), Value::from("t2"), Value::I64(9)],
    ]);
    // children: topic.id, users.id, users.username
    backend.push_rows(vec![vec![Value::I64(1), Value::I64(1), Value::from("alice")]]);

    let data = json!({
        "$select": "title, user_id",
        "$fks": {"user": {"$select": "username", "id.eq": "$topic:user_id"}}
    });
    let plan = crud.parse_query("topic", data.as_object().unwrap()).unwrap();
    let rows = crud
        .get_list_with_foreign_keys(&plan, &PermInfo::skip())
        .await
        .unwrap();

    assert_eq!(
        backend.statements()[1],
        concat!(
            r#"SELECT "topic"."id", "users"."id", "users"."username" FROM "topic" "#,
            r#"INNER JOIN "users" ON "users"."id" = (SELECT "users"."id" FROM "users" WHERE "users"."id" = "topic"."user_id" LIMIT ?) "#,
            r#"WHERE "topic"."id" IN (?, ?)"#
        )
    );
    assert_eq!(
        rows.rows[0].to_dict()[EXTRA_KEY],
        json!({"user": {"id": 1, "username": "alice"}})
    );
    assert_eq!(rows.rows[1].to_dict()[EXTRA_KEY], json!({"user": null}));
}

#[tokio::test]
async fn pruned_columns_never_reach_the_statement() {
    let (crud, backend, fx) = setup(Dialect::Sqlite);
    let password = f(&fx.user, "password");
    let role = RoleDefine::new("visitor")
        .entity(
            &fx.user,
            TablePerm::new()
                .default_perm([Ability::Query, Ability::Read])
                .field(&password, []),
        )
        .bind();

    let plan = QueryPlan::new(fx.user.clone())
        .with_conditions(password.eq("secret") & f(&fx.user, "username").eq("alice"));
    crud.get_list_with_perm(&plan, true, &PermInfo::with_role(Arc::new(role)))
        .await
        .unwrap();

    let statements = backend.statements();
    assert_eq!(statements.len(), 2);
    for sql in &statements {
        assert!(!sql.contains("password"), "{sql}");
    }
    assert!(statements[0].contains(r#"WHERE "username" = ?"#));
    let log = backend.log();
    assert!(!log[0].params().contains(&SqlValue::from("secret")));
}

#[tokio::test]
async fn foreign_key_batch_stays_scoped_without_id_query_ability() {
    let (crud, backend, fx) = setup(Dialect::Sqlite);
    backend.push_rows(vec![
        vec![Value::I64(1), Value::I64(1)],
        vec![Value::I64(2), Value::I64(1)],
    ]);
    backend.push_rows(vec![]);
    let role = RoleDefine::new("browser")
        .entity(
            &fx.topic,
            TablePerm::new()
                .default_perm([Ability::Read])
                .field(&f(&fx.topic, "user_id"), [Ability::Query, Ability::Read]),
        )
        .entity(&fx.user, TablePerm::new().default_perm([Ability::Query, Ability::Read]))
        .bind();

    let data = json!({"$select": "user_id", "$fks": {"user": {"id.eq": "$topic:user_id"}}});
    let plan = crud.parse_query("topic", data.as_object().unwrap()).unwrap();
    crud.get_list_with_foreign_keys(&plan, &PermInfo::with_role(Arc::new(role)))
        .await
        .unwrap();

    let child = &backend.statements()[1];
    assert!(child.ends_with(r#"WHERE "topic"."id" IN (?, ?)"#), "{child}");
}

#[tokio::test]
async fn unknown_entity_is_reported() {
    let (crud, _, _) = setup(Dialect::Sqlite);
    let err = crud.parse_query_string("post", "id.eq=1").unwrap_err();
    assert!(matches!(err, CrudError::UnknownEntity(ref n) if n == "post"));
}
