//! Role definitions loaded from configuration.
//!
//! ```yaml
//! visitor:
//!   entities:
//!     topic:
//!       default: [query, read]
//! editor:
//!   based_on: visitor
//!   entities:
//!     topic:
//!       fields:
//!         title: [update]
//!       allow_delete: true
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use crudkit_query::{Entity, EntityRegistry};
use indexmap::IndexMap;
use serde::Deserialize;

use crate::ability::Ability;
use crate::error::PermError;
use crate::role::{Role, RoleDefine, TablePerm};

/// Named roles. Order in the file does not matter; parents are bound first.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct RolesConfig {
    pub roles: IndexMap<String, RoleConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoleConfig {
    #[serde(default)]
    pub based_on: Option<String>,
    #[serde(default)]
    pub entities: IndexMap<String, TablePermConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TablePermConfig {
    #[serde(default)]
    pub fields: IndexMap<String, Vec<Ability>>,
    #[serde(default)]
    pub default: Option<Vec<Ability>>,
    #[serde(default)]
    pub append: Option<Vec<Ability>>,
    #[serde(default)]
    pub allow_delete: bool,
}

impl TablePermConfig {
    fn to_table_perm(&self, role: &str, entity: &Entity) -> Result<TablePerm, PermError> {
        let mut perm = TablePerm::new().allow_delete(self.allow_delete);
        for (name, abilities) in &self.fields {
            let field = entity.field(name).ok_or_else(|| PermError::UnknownField {
                role: role.to_owned(),
                entity: entity.name().to_owned(),
                field: name.clone(),
            })?;
            perm = perm.field(&field, abilities.iter().copied());
        }
        if let Some(default) = &self.default {
            perm = perm.default_perm(default.iter().copied());
        }
        if let Some(append) = &self.append {
            perm = perm.append_perm(append.iter().copied());
        }
        Ok(perm)
    }
}

/// Bound roles by name.
#[derive(Debug, Clone, Default)]
pub struct RoleSet {
    roles: IndexMap<String, Arc<Role>>,
}

impl RoleSet {
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<Role>> {
        self.roles.get(name).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<Role>)> {
        self.roles.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.roles.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }
}

impl RolesConfig {
    /// Bind every configured role against the registered entities.
    ///
    /// # Errors
    /// Returns [`PermError`] for unknown entities or fields and for unknown
    /// or cyclic `based_on` links.
    pub fn build(&self, registry: &EntityRegistry) -> Result<RoleSet, PermError> {
        let mut bound = HashMap::new();
        for name in self.roles.keys() {
            self.bind_one(name, registry, &mut bound, &mut Vec::new())?;
        }
        let roles = self
            .roles
            .keys()
            .filter_map(|name| bound.get(name).map(|r| (name.clone(), Arc::clone(r))))
            .collect();
        Ok(RoleSet { roles })
    }

    fn bind_one(
        &self,
        name: &str,
        registry: &EntityRegistry,
        bound: &mut HashMap<String, Arc<Role>>,
        path: &mut Vec<String>,
    ) -> Result<Arc<Role>, PermError> {
        if let Some(role) = bound.get(name) {
            return Ok(Arc::clone(role));
        }
        if path.iter().any(|p| p == name) {
            return Err(PermError::CyclicParent(name.to_owned()));
        }
        let Some(cfg) = self.roles.get(name) else {
            let role = path.last().cloned().unwrap_or_default();
            return Err(PermError::UnknownParent {
                role,
                parent: name.to_owned(),
            });
        };

        path.push(name.to_owned());
        let parent = match &cfg.based_on {
            Some(parent) => Some(self.bind_one(parent, registry, bound, path)?),
            None => None,
        };
        path.pop();

        let mut define = RoleDefine::new(name);
        if let Some(parent) = parent {
            define = define.based_on(parent);
        }
        for (entity_name, table) in &cfg.entities {
            let entity = registry
                .get(entity_name)
                .ok_or_else(|| PermError::UnknownEntity {
                    role: name.to_owned(),
                    entity: entity_name.clone(),
                })?;
            define = define.entity(entity, table.to_table_perm(name, entity)?);
        }

        let role = Arc::new(define.bind());
        bound.insert(name.to_owned(), Arc::clone(&role));
        Ok(role)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crudkit_query::FieldKind;
    use serde_json::json;

    fn registry() -> EntityRegistry {
        let mut r = EntityRegistry::new();
        r.register(
            Entity::builder("topic")
                .field("id", FieldKind::I64)
                .field("title", FieldKind::String)
                .build()
                .unwrap(),
        )
        .unwrap();
        r
    }

    fn config(v: serde_json::Value) -> RolesConfig {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn children_are_bound_after_parents() {
        let reg = registry();
        let cfg = config(json!({
            "editor": {"based_on": "visitor", "entities": {"topic": {"fields": {"title": ["update"]}, "allow_delete": true}}},
            "visitor": {"entities": {"topic": {"default": ["query", "read"]}}}
        }));
        let roles = cfg.build(&reg).unwrap();
        let topic = reg.get("topic").unwrap();
        let editor = roles.get("editor").unwrap();

        assert_eq!(editor.get_perm_avail(topic, Ability::Read).len(), 2);
        assert_eq!(editor.get_perm_avail(topic, Ability::Update).len(), 1);
        assert!(editor.can_delete(topic));
        assert!(!roles.get("visitor").unwrap().can_delete(topic));
        assert_eq!(roles.iter().map(|(n, _)| n).collect::<Vec<_>>(), ["editor", "visitor"]);
    }

    #[test]
    fn rejects_unknown_references() {
        let reg = registry();
        let err = config(json!({"a": {"based_on": "ghost"}})).build(&reg).unwrap_err();
        assert_eq!(
            err,
            PermError::UnknownParent {
                role: "a".into(),
                parent: "ghost".into()
            }
        );

        let err = config(json!({"a": {"entities": {"post": {}}}})).build(&reg).unwrap_err();
        assert!(matches!(err, PermError::UnknownEntity { .. }));

        let err = config(json!({"a": {"entities": {"topic": {"fields": {"body": ["read"]}}}}}))
            .build(&reg)
            .unwrap_err();
        assert!(matches!(err, PermError::UnknownField { .. }));
    }

    #[test]
    fn rejects_cycles() {
        let reg = registry();
        let err = config(json!({"a": {"based_on": "b"}, "b": {"based_on": "a"}}))
            .build(&reg)
            .unwrap_err();
        assert!(matches!(err, PermError::CyclicParent(_)));
    }

    #[test]
    fn rejects_unknown_ability_token() {
        let res: Result<RolesConfig, _> =
            serde_json::from_value(json!({"a": {"entities": {"topic": {"default": ["delete"]}}}}));
        assert!(res.is_err());
    }
}
