#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use crudkit_db::{
    CompiledStatement, CrudError, Dialect, ExecOutcome, SqlBackend, SqlSession, SqlValue,
};
use crudkit_query::{Entity, EntityRegistry, FieldKind, FieldRef, ScalarKind, Value};

pub struct Fixture {
    pub registry: Arc<EntityRegistry>,
    pub user: Entity,
    pub topic: Entity,
    pub table_one: Entity,
}

impl Fixture {
    pub fn new() -> Self {
        let user = Entity::builder("user")
            .table("users")
            .field("id", FieldKind::I64)
            .field("nickname", FieldKind::String)
            .field("username", FieldKind::String)
            .field("password", FieldKind::String)
            .build()
            .unwrap();
        let topic = Entity::builder("topic")
            .field("id", FieldKind::I64)
            .field("title", FieldKind::String)
            .field("user_id", FieldKind::I64)
            .field("content", FieldKind::String)
            .field("time", FieldKind::I64)
            .build()
            .unwrap();
        let table_one = Entity::builder("table_one")
            .field("id", FieldKind::I64)
            .field("arr", FieldKind::Array(ScalarKind::String))
            .field("meta", FieldKind::Json)
            .build()
            .unwrap();

        let mut registry = EntityRegistry::new();
        registry.register(user.clone()).unwrap();
        registry.register(topic.clone()).unwrap();
        registry.register(table_one.clone()).unwrap();
        Self {
            registry: Arc::new(registry),
            user,
            topic,
            table_one,
        }
    }
}

pub fn f(entity: &Entity, name: &str) -> FieldRef {
    entity.field(name).unwrap()
}

pub fn ids(values: &[i64]) -> Vec<Value> {
    values.iter().copied().map(Value::I64).collect()
}

#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    Fetch { sql: String, params: Vec<SqlValue> },
    Execute { sql: String, params: Vec<SqlValue> },
    Commit,
    Rollback,
}

impl Recorded {
    pub fn sql(&self) -> Option<&str> {
        match self {
            Self::Fetch { sql, .. } | Self::Execute { sql, .. } => Some(sql),
            Self::Commit | Self::Rollback => None,
        }
    }

    pub fn params(&self) -> &[SqlValue] {
        match self {
            Self::Fetch { params, .. } | Self::Execute { params, .. } => params,
            Self::Commit | Self::Rollback => &[],
        }
    }
}

#[derive(Default)]
struct Shared {
    log: Vec<Recorded>,
    responses: VecDeque<Vec<Vec<Value>>>,
    rows_affected: u64,
}

/// In-memory backend that records statements and replays queued result sets.
#[derive(Clone)]
pub struct RecordingBackend {
    dialect: Dialect,
    shared: Arc<Mutex<Shared>>,
}

impl RecordingBackend {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            shared: Arc::new(Mutex::new(Shared {
                rows_affected: 1,
                ..Shared::default()
            })),
        }
    }

    /// Queue the rows returned by the next `fetch_all`.
    pub fn push_rows(&self, rows: Vec<Vec<Value>>) {
        self.shared.lock().unwrap().responses.push_back(rows);
    }

    pub fn set_rows_affected(&self, n: u64) {
        self.shared.lock().unwrap().rows_affected = n;
    }

    pub fn log(&self) -> Vec<Recorded> {
        self.shared.lock().unwrap().log.clone()
    }

    pub fn statements(&self) -> Vec<String> {
        self.log()
            .iter()
            .filter_map(|r| r.sql().map(str::to_owned))
            .collect()
    }
}

#[async_trait]
impl SqlBackend for RecordingBackend {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn begin(&self) -> Result<Box<dyn SqlSession>, CrudError> {
        Ok(Box::new(RecordingSession {
            shared: Arc::clone(&self.shared),
        }))
    }
}

struct RecordingSession {
    shared: Arc<Mutex<Shared>>,
}

fn values(stmt: &CompiledStatement) -> Vec<SqlValue> {
    stmt.values.clone()
}

#[async_trait]
impl SqlSession for RecordingSession {
    async fn fetch_all(&mut self, stmt: &CompiledStatement) -> Result<Vec<Vec<Value>>, CrudError> {
        let mut shared = self.shared.lock().unwrap();
        shared.log.push(Recorded::Fetch {
            sql: stmt.sql.clone(),
            params: values(stmt),
        });
        Ok(shared.responses.pop_front().unwrap_or_default())
    }

    async fn execute(&mut self, stmt: &CompiledStatement) -> Result<ExecOutcome, CrudError> {
        let mut shared = self.shared.lock().unwrap();
        shared.log.push(Recorded::Execute {
            sql: stmt.sql.clone(),
            params: values(stmt),
        });
        Ok(ExecOutcome {
            rows_affected: shared.rows_affected,
            last_insert_id: None,
        })
    }

    async fn commit(self: Box<Self>) -> Result<(), CrudError> {
        self.shared.lock().unwrap().log.push(Recorded::Commit);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), CrudError> {
        self.shared.lock().unwrap().log.push(Recorded::Rollback);
        Ok(())
    }
}

#[cfg(feature = "sqlite")]
pub mod sqlite {
    use std::sync::Arc;

    use crudkit_db::{Crud, DbConfig, SeaOrmBackend};
    use sea_orm::ConnectionTrait;

    use super::Fixture;

    const SCHEMA: &str = r"
        CREATE TABLE users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            nickname TEXT,
            username TEXT,
            password TEXT
        );
        CREATE TABLE topic (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT,
            user_id INTEGER,
            content TEXT,
            time INTEGER
        );
        CREATE TABLE table_one (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            arr TEXT,
            meta TEXT
        );
        INSERT INTO users (nickname, username, password) VALUES
            ('Alice', 'alice', 'a'),
            ('Bob', 'bob', 'b'),
            ('Cathy', 'cathy', 'c'),
            ('Dan', 'dan', 'd'),
            ('Eve', 'eve', 'e');
        INSERT INTO topic (title, user_id, content, time) VALUES
            ('t1', 1, 'c1', 100),
            ('t2', 1, 'c2', 200),
            ('t3', 2, 'c3', 300),
            ('t4', 3, 'c4', 400),
            ('t5', 5, 'c5', 500)
    ";

    /// A fresh private in-memory database with five users and five topics.
    /// User 4 has no topic; user 1 has two.
    pub async fn crud() -> (Crud, Fixture) {
        let backend = SeaOrmBackend::connect(&DbConfig::default()).await.unwrap();
        for stmt in SCHEMA.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            backend.connection().execute_unprepared(stmt).await.unwrap();
        }
        let fixture = Fixture::new();
        let crud = Crud::new(Arc::new(backend), Arc::clone(&fixture.registry));
        (crud, fixture)
    }
}
