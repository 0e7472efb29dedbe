//! [`SqlBackend`] over a sea-orm connection pool, running compiled
//! statements with the values the compiler bound.
//!
//! Result cells decode by declared kind:
//!
//! | Kind | Postgres | Sqlite / MySQL |
//! |---|---|---|
//! | `Array(_)` | native array | JSON text |
//! | `Json` | `jsonb` value | JSON text |
//! | everything else | native scalar | native scalar |

use std::time::Duration;

use async_trait::async_trait;
use crudkit_query::{FieldKind, ScalarKind, Value};
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DatabaseTransaction, DbBackend,
    QueryResult, Statement, TransactionTrait,
};
use serde_json::Value as JsonValue;

use crate::backend::{ExecOutcome, SqlBackend, SqlSession};
use crate::compiler::CompiledStatement;
use crate::config::DbConfig;
use crate::dialect::Dialect;
use crate::error::CrudError;
use crate::placeholder::PlaceholderStyle;

pub struct SeaOrmBackend {
    conn: DatabaseConnection,
    dialect: Dialect,
}

impl SeaOrmBackend {
    /// Open a pool for `config.dsn`.
    ///
    /// In-memory SQLite databases are private to one connection, so the pool
    /// is pinned to a single connection for them.
    ///
    /// # Errors
    /// Returns [`CrudError::UnknownDatabase`] for unsupported schemes and
    /// [`CrudError::Db`] when the connection fails.
    pub async fn connect(config: &DbConfig) -> Result<Self, CrudError> {
        let dialect = Dialect::from_dsn(&config.dsn)?;
        let mut opts = ConnectOptions::new(config.dsn.clone());
        opts.max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .sqlx_logging(config.sqlx_logging);
        if dialect == Dialect::Sqlite && config.dsn.contains(":memory:") {
            opts.max_connections(1).min_connections(1);
        }

        let conn = Database::connect(opts).await?;
        tracing::info!(engine = dialect.name(), "database connected");
        Ok(Self { conn, dialect })
    }

    #[must_use]
    pub fn from_connection(conn: DatabaseConnection) -> Self {
        let dialect = match conn.get_database_backend() {
            DbBackend::Postgres => Dialect::Postgres,
            DbBackend::MySql => Dialect::MySql,
            DbBackend::Sqlite => Dialect::Sqlite,
        };
        Self { conn, dialect }
    }

    #[must_use]
    pub fn connection(&self) -> &DatabaseConnection {
        &self.conn
    }
}

#[async_trait]
impl SqlBackend for SeaOrmBackend {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn placeholder_style(&self) -> PlaceholderStyle {
        // sqlx takes `?` for MySQL.
        match self.dialect {
            Dialect::MySql => PlaceholderStyle::Question,
            other => other.placeholder_style(),
        }
    }

    async fn begin(&self) -> Result<Box<dyn SqlSession>, CrudError> {
        let txn = self.conn.begin().await?;
        Ok(Box::new(SeaOrmSession {
            txn,
            backend: self.conn.get_database_backend(),
            dialect: self.dialect,
        }))
    }
}

struct SeaOrmSession {
    txn: DatabaseTransaction,
    backend: DbBackend,
    dialect: Dialect,
}

impl SeaOrmSession {
    fn statement(&self, stmt: &CompiledStatement) -> Statement {
        Statement::from_sql_and_values(
            self.backend,
            stmt.sql.as_str(),
            stmt.values.iter().cloned(),
        )
    }
}

#[async_trait]
impl SqlSession for SeaOrmSession {
    async fn fetch_all(&mut self, stmt: &CompiledStatement) -> Result<Vec<Vec<Value>>, CrudError> {
        let rows = self.txn.query_all(self.statement(stmt)).await?;
        rows.iter()
            .map(|row| {
                stmt.columns
                    .iter()
                    .enumerate()
                    .map(|(i, kind)| decode(row, i, *kind, self.dialect))
                    .collect()
            })
            .collect()
    }

    async fn execute(&mut self, stmt: &CompiledStatement) -> Result<ExecOutcome, CrudError> {
        let res = self.txn.execute(self.statement(stmt)).await?;
        // Postgres reports ids through RETURNING only.
        let last_insert_id = match self.dialect {
            Dialect::Postgres => None,
            Dialect::Sqlite | Dialect::MySql => i64::try_from(res.last_insert_id()).ok(),
        };
        Ok(ExecOutcome {
            rows_affected: res.rows_affected(),
            last_insert_id,
        })
    }

    async fn commit(self: Box<Self>) -> Result<(), CrudError> {
        self.txn.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), CrudError> {
        self.txn.rollback().await?;
        Ok(())
    }
}

fn decode(row: &QueryResult, idx: usize, kind: FieldKind, dialect: Dialect) -> Result<Value, CrudError> {
    let native = dialect.native_arrays();
    let value = match kind {
        FieldKind::I64 => row.try_get_by_index::<Option<i64>>(idx)?.map(Value::I64),
        FieldKind::F64 => row.try_get_by_index::<Option<f64>>(idx)?.map(Value::F64),
        FieldKind::String => row.try_get_by_index::<Option<String>>(idx)?.map(Value::String),
        FieldKind::Bool => row.try_get_by_index::<Option<bool>>(idx)?.map(Value::Bool),
        FieldKind::Bytes => row.try_get_by_index::<Option<Vec<u8>>>(idx)?.map(Value::Bytes),
        FieldKind::Json if native => row.try_get_by_index::<Option<JsonValue>>(idx)?.map(Value::Json),
        FieldKind::Json => row
            .try_get_by_index::<Option<String>>(idx)?
            .map(|text| serde_json::from_str(&text).map_or(Value::String(text), Value::Json)),
        FieldKind::Array(scalar) if native => decode_native_array(row, idx, scalar)?,
        FieldKind::Array(_) => match row.try_get_by_index::<Option<String>>(idx)? {
            Some(text) => {
                let doc: JsonValue = serde_json::from_str(&text)
                    .map_err(|e| CrudError::db(format!("column {idx}: {e}")))?;
                Some(Value::coerce(kind, &doc).map_err(|e| CrudError::db(e.to_string()))?)
            }
            None => None,
        },
    };
    Ok(value.unwrap_or(Value::Null))
}

fn decode_native_array(
    row: &QueryResult,
    idx: usize,
    scalar: ScalarKind,
) -> Result<Option<Value>, CrudError> {
    fn wrap<T>(items: Option<Vec<T>>, f: impl Fn(T) -> Value) -> Option<Value> {
        items.map(|v| Value::Array(v.into_iter().map(f).collect()))
    }
    Ok(match scalar {
        ScalarKind::I64 => wrap(row.try_get_by_index::<Option<Vec<i64>>>(idx)?, Value::I64),
        ScalarKind::F64 => wrap(row.try_get_by_index::<Option<Vec<f64>>>(idx)?, Value::F64),
        ScalarKind::String => wrap(row.try_get_by_index::<Option<Vec<String>>>(idx)?, Value::String),
        ScalarKind::Bool => wrap(row.try_get_by_index::<Option<Vec<bool>>>(idx)?, Value::Bool),
    })
}
