//! Roles and their bound ability tables.
//!
//! A [`RoleDefine`] is a declaration: per-entity [`TablePerm`]s plus an
//! optional parent. [`RoleDefine::bind`] layers the declaration over the
//! parent's table and produces an immutable [`Role`].
//!
//! Layering of one [`TablePerm`] over the fields of its entity:
//!
//! | Step | Effect |
//! |---|---|
//! | default | every field starts with the default set |
//! | explicit | listed fields replace their set |
//! | append | the append set is added to every field |
//!
//! The result is then unioned into the inherited table; inheritance never
//! removes an ability. `allow_delete` of a declared entity replaces the
//! inherited flag.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crudkit_query::{Entity, FieldRef};
use indexmap::IndexMap;

use crate::ability::Ability;

/// Per-entity permission declaration.
#[derive(Debug, Clone, Default)]
pub struct TablePerm {
    fields: IndexMap<FieldRef, HashSet<Ability>>,
    default_perm: Option<HashSet<Ability>>,
    append_perm: Option<HashSet<Ability>>,
    allow_delete: bool,
}

impl TablePerm {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn field(mut self, field: &FieldRef, abilities: impl IntoIterator<Item = Ability>) -> Self {
        self.fields.insert(field.clone(), abilities.into_iter().collect());
        self
    }

    /// Abilities of every field not listed explicitly.
    #[must_use]
    pub fn default_perm(mut self, abilities: impl IntoIterator<Item = Ability>) -> Self {
        self.default_perm = Some(abilities.into_iter().collect());
        self
    }

    /// Abilities added to every field, listed or not.
    #[must_use]
    pub fn append_perm(mut self, abilities: impl IntoIterator<Item = Ability>) -> Self {
        self.append_perm = Some(abilities.into_iter().collect());
        self
    }

    #[must_use]
    pub fn allow_delete(mut self, allow: bool) -> Self {
        self.allow_delete = allow;
        self
    }

    /// Effective per-field abilities of this declaration alone.
    fn resolve(&self, entity: &Entity) -> Vec<(FieldRef, HashSet<Ability>)> {
        let own = self.fields.iter().filter(|(f, _)| {
            let ok = f.entity() == entity;
            if !ok {
                tracing::warn!(entity = entity.name(), field = ?f, "field of another entity ignored");
            }
            ok
        });

        if self.default_perm.is_none() && self.append_perm.is_none() {
            return own.map(|(f, a)| (f.clone(), a.clone())).collect();
        }

        let mut layered: IndexMap<FieldRef, HashSet<Ability>> = IndexMap::new();
        if let Some(default) = &self.default_perm {
            for f in entity.fields() {
                layered.insert(f, default.clone());
            }
        }
        for (f, abilities) in own {
            layered.insert(f.clone(), abilities.clone());
        }
        if let Some(append) = &self.append_perm {
            for f in entity.fields() {
                layered.entry(f).or_default().extend(append.iter().copied());
            }
        }
        layered.into_iter().collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct EntityAbilities {
    by_ability: HashMap<Ability, HashSet<FieldRef>>,
    allow_delete: bool,
}

/// Resolved abilities of a role, keyed by entity name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AbilityTable {
    entities: HashMap<String, EntityAbilities>,
}

impl AbilityTable {
    #[must_use]
    pub fn get_perm_avail(&self, entity: &Entity, ability: Ability) -> HashSet<FieldRef> {
        self.entities
            .get(entity.name())
            .and_then(|e| e.by_ability.get(&ability))
            .cloned()
            .unwrap_or_default()
    }

    #[must_use]
    pub fn allows(&self, field: &FieldRef, ability: Ability) -> bool {
        self.entities
            .get(field.entity().name())
            .and_then(|e| e.by_ability.get(&ability))
            .is_some_and(|fields| fields.contains(field))
    }

    #[must_use]
    pub fn can_delete(&self, entity: &Entity) -> bool {
        self.entities
            .get(entity.name())
            .is_some_and(|e| e.allow_delete)
    }
}

/// Layer `overlay` over a copy of `base`.
#[must_use]
pub fn bind_table(base: &AbilityTable, overlay: &[(Entity, TablePerm)]) -> AbilityTable {
    let mut table = base.clone();
    for (entity, perm) in overlay {
        let entry = table.entities.entry(entity.name().to_owned()).or_default();
        entry.allow_delete = perm.allow_delete;
        for (field, abilities) in perm.resolve(entity) {
            for ability in abilities {
                entry.by_ability.entry(ability).or_default().insert(field.clone());
            }
        }
    }
    table
}

/// Role declaration.
#[derive(Debug, Clone)]
pub struct RoleDefine {
    name: String,
    desc: Vec<(Entity, TablePerm)>,
    based_on: Option<Arc<Role>>,
}

impl RoleDefine {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            desc: Vec::new(),
            based_on: None,
        }
    }

    #[must_use]
    pub fn entity(mut self, entity: &Entity, perm: TablePerm) -> Self {
        self.desc.push((entity.clone(), perm));
        self
    }

    #[must_use]
    pub fn based_on(mut self, parent: Arc<Role>) -> Self {
        self.based_on = Some(parent);
        self
    }

    #[must_use]
    pub fn bind(&self) -> Role {
        let base = self
            .based_on
            .as_ref()
            .map(|p| p.table.clone())
            .unwrap_or_default();
        let table = bind_table(&base, &self.desc);
        tracing::debug!(role = %self.name, entities = table.entities.len(), "role bound");
        Role {
            name: self.name.clone(),
            table,
        }
    }
}

/// Bound, immutable role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Role {
    name: String,
    table: AbilityTable,
}

impl Role {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn table(&self) -> &AbilityTable {
        &self.table
    }

    /// Fields of `entity` granted `ability`; empty for unknown entities.
    #[must_use]
    pub fn get_perm_avail(&self, entity: &Entity, ability: Ability) -> HashSet<FieldRef> {
        self.table.get_perm_avail(entity, ability)
    }

    #[must_use]
    pub fn allows(&self, field: &FieldRef, ability: Ability) -> bool {
        self.table.allows(field, ability)
    }

    /// `false` for unknown entities.
    #[must_use]
    pub fn can_delete(&self, entity: &Entity) -> bool {
        self.table.can_delete(entity)
    }
}
