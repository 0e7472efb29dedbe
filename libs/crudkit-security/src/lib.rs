#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! Role-based, per-field permissions for CrudKit plans and write values.
pub mod ability;
pub mod config;
pub mod error;
pub mod perm_info;
pub mod role;
pub mod solve;

pub use ability::Ability;
pub use config::{RoleConfig, RoleSet, RolesConfig, TablePermConfig};
pub use error::PermError;
pub use perm_info::{PermInfo, PermMode};
pub use role::{AbilityTable, Role, RoleDefine, TablePerm, bind_table};
pub use solve::{
    can_delete, create_values_from_json, filter_create_values, filter_update_values, solve_query,
    update_values_from_json,
};
