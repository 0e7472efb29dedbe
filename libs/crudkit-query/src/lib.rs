#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! Backend-agnostic query model.
//!
//! | Module | Contents |
//! |---|---|
//! | [`model`] | entities, field references, the entity registry |
//! | [`value`] | literal values and coercion against field kinds |
//! | [`condition`] | condition tree and the builder DSL on [`FieldRef`] |
//! | [`plan`] | [`QueryPlan`], joins, ordering |
//! | [`parse`] | JSON / query-string grammar |
//! | [`write_values`] | insert and update value maps |
pub mod condition;
pub mod error;
pub mod model;
pub mod ops;
pub mod parse;
pub mod plan;
pub mod value;
pub mod write_values;

pub use condition::{Condition, ConditionExpr, ConditionLogicExpr, NegatedExpr, Operand, QueryConditions};
pub use error::{ModelError, QueryError};
pub use model::{Entity, EntityBuilder, EntityRegistry, FieldKind, FieldRef, ScalarKind};
pub use ops::{CompareOp, LogicOp, QueryOp, RelationOp, UpdateFlag};
pub use parse::ParseOptions;
pub use plan::{DEFAULT_LIMIT, JoinKind, JoinSpec, QueryOrder, QueryPlan, SortOrder};
pub use value::Value;
pub use write_values::{UpdateValue, ValuesToCreate, ValuesToUpdate};
