#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! SQL compilation and execution for CrudKit plans.
//!
//! A [`Crud`] filters each plan through the caller's role, compiles it with
//! [`SqlCompiler`] for the backend's dialect and runs it on a [`SqlBackend`]
//! session. [`SeaOrmBackend`] is the stock backend.
//!
//! ```ignore
//! let (crud, roles) = Crud::connect(&CrudConfig::load("crudkit.yaml")?, registry).await?;
//! let perm = PermInfo::with_role(roles.get("visitor").unwrap_or_default());
//! let plan = crud.parse_query("topic", &request)?;
//! let rows = crud.get_list_with_foreign_keys(&plan, &perm).await?;
//! ```
pub mod backend;
pub mod compiler;
pub mod config;
pub mod crud;
pub mod dialect;
pub mod error;
mod fk;
pub mod hooks;
pub mod placeholder;
pub mod row;
pub mod sea_orm_backend;

pub use backend::{ExecOutcome, SqlBackend, SqlSession};
pub use compiler::{CompiledStatement, SelectStatements, SqlCompiler};
pub use config::{CrudConfig, DbConfig};
pub use crud::{Crud, WriteOutput};
pub use dialect::Dialect;
pub use error::CrudError;
pub use fk::MANY_SUFFIX;
pub use hooks::EntityHooks;
pub use placeholder::{PlaceholderGenerator, PlaceholderStyle, SqlValue, bind_value};
pub use row::{EXTRA_KEY, Extra, QueryResultRow, QueryResultRowList};
pub use sea_orm_backend::SeaOrmBackend;
