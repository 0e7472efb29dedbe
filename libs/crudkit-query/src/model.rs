//! Static description of record types.
//!
//! An [`Entity`] is declared once at startup through [`EntityBuilder`] and then
//! shared cheaply (it is an `Arc` handle). Field references ([`FieldRef`]) point
//! into the entity by position, so they are cheap to clone, hash and compare.
//!
//! ```
//! use crudkit_query::{Entity, FieldKind};
//!
//! let user = Entity::builder("user")
//!     .table("users")
//!     .field("id", FieldKind::I64)
//!     .field("nickname", FieldKind::String)
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(user.table_name(), "users");
//! assert_eq!(user.id().name(), "id");
//! ```

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use indexmap::IndexMap;

use crate::error::{ModelError, QueryError};

/// Element type of an array-typed field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    I64,
    F64,
    String,
    Bool,
}

/// Declared type of a field; drives value coercion and parameter binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    I64,
    F64,
    String,
    Bool,
    /// Raw bytes; accepted as hex text in the query grammar.
    Bytes,
    /// Arbitrary JSON document, serialized before binding.
    Json,
    /// Server-side array of scalars.
    Array(ScalarKind),
}

impl FieldKind {
    #[must_use]
    pub fn is_array(self) -> bool {
        matches!(self, Self::Array(_))
    }

    #[must_use]
    pub fn is_json(self) -> bool {
        matches!(self, Self::Json)
    }

    #[must_use]
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::I64 | Self::F64)
    }

    /// Element kind for arrays, the kind itself otherwise.
    #[must_use]
    pub fn element(self) -> Self {
        match self {
            Self::Array(s) => s.into(),
            other => other,
        }
    }
}

impl From<ScalarKind> for FieldKind {
    fn from(s: ScalarKind) -> Self {
        match s {
            ScalarKind::I64 => Self::I64,
            ScalarKind::F64 => Self::F64,
            ScalarKind::String => Self::String,
            ScalarKind::Bool => Self::Bool,
        }
    }
}

#[derive(Debug, Clone)]
struct FieldDef {
    name: String,
    kind: FieldKind,
}

#[derive(Debug)]
struct EntityInner {
    name: String,
    table_name: String,
    primary_key: usize,
    fields: Vec<FieldDef>,
    index: HashMap<String, usize>,
}

/// Shared handle to an entity declaration.
///
/// Two handles are equal when they name the same entity.
#[derive(Clone)]
pub struct Entity(Arc<EntityInner>);

impl Entity {
    #[must_use]
    pub fn builder(name: impl Into<String>) -> EntityBuilder {
        EntityBuilder::new(name)
    }

    /// Registry name, also used by `$fks` relation names and `$name:field` references.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.0.name
    }

    #[must_use]
    pub fn table_name(&self) -> &str {
        &self.0.table_name
    }

    /// Primary key field.
    #[must_use]
    pub fn id(&self) -> FieldRef {
        FieldRef {
            entity: self.clone(),
            index: self.0.primary_key,
        }
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<FieldRef> {
        self.0.index.get(name).map(|&index| FieldRef {
            entity: self.clone(),
            index,
        })
    }

    /// Like [`Entity::field`] but reports a missing field as a query error.
    ///
    /// # Errors
    /// Returns [`QueryError::InvalidQueryConditionColumn`] when the field is unknown.
    pub fn try_field(&self, name: &str) -> Result<FieldRef, QueryError> {
        self.field(name)
            .ok_or_else(|| QueryError::column(self.name(), name))
    }

    /// All declared fields in declaration order.
    pub fn fields(&self) -> impl Iterator<Item = FieldRef> + '_ {
        (0..self.0.fields.len()).map(|index| FieldRef {
            entity: self.clone(),
            index,
        })
    }

    #[must_use]
    pub fn field_count(&self) -> usize {
        self.0.fields.len()
    }

    pub fn array_field_names(&self) -> impl Iterator<Item = &str> {
        self.0
            .fields
            .iter()
            .filter(|f| f.kind.is_array())
            .map(|f| f.name.as_str())
    }

    pub fn json_field_names(&self) -> impl Iterator<Item = &str> {
        self.0
            .fields
            .iter()
            .filter(|f| f.kind.is_json())
            .map(|f| f.name.as_str())
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0.name == other.0.name
    }
}

impl Eq for Entity {}

impl Hash for Entity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.name.hash(state);
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<Entity {}>", self.0.name)
    }
}

/// Builder for [`Entity`]; the only way to declare one.
#[derive(Debug)]
pub struct EntityBuilder {
    name: String,
    table_name: Option<String>,
    primary_key: String,
    fields: Vec<FieldDef>,
}

impl EntityBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table_name: None,
            primary_key: "id".to_owned(),
            fields: Vec::new(),
        }
    }

    /// Table name; defaults to the entity name.
    #[must_use]
    pub fn table(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = Some(table_name.into());
        self
    }

    /// Primary key field name; defaults to `id`.
    #[must_use]
    pub fn primary_key(mut self, field: impl Into<String>) -> Self {
        self.primary_key = field.into();
        self
    }

    #[must_use]
    pub fn field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(FieldDef {
            name: name.into(),
            kind,
        });
        self
    }

    /// Finish the declaration.
    ///
    /// # Errors
    /// Returns [`ModelError`] on duplicate field names or a missing primary key.
    pub fn build(self) -> Result<Entity, ModelError> {
        let mut index = HashMap::with_capacity(self.fields.len());
        for (i, f) in self.fields.iter().enumerate() {
            if index.insert(f.name.clone(), i).is_some() {
                return Err(ModelError::DuplicateField {
                    entity: self.name,
                    field: f.name.clone(),
                });
            }
        }

        let Some(&primary_key) = index.get(&self.primary_key) else {
            return Err(ModelError::MissingPrimaryKey {
                entity: self.name,
                field: self.primary_key,
            });
        };

        Ok(Entity(Arc::new(EntityInner {
            table_name: self.table_name.unwrap_or_else(|| self.name.clone()),
            name: self.name,
            primary_key,
            fields: self.fields,
            index,
        })))
    }
}

/// A bound `(entity, field)` pair.
///
/// Used both as a selection target and as a comparison operand; the builder
/// methods in [`crate::condition`] turn it into condition nodes.
#[derive(Clone)]
pub struct FieldRef {
    entity: Entity,
    index: usize,
}

impl FieldRef {
    #[must_use]
    pub fn entity(&self) -> &Entity {
        &self.entity
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.entity.0.fields[self.index].name
    }

    #[must_use]
    pub fn kind(&self) -> FieldKind {
        self.entity.0.fields[self.index].kind
    }

    #[must_use]
    pub fn is_primary_key(&self) -> bool {
        self.index == self.entity.0.primary_key
    }
}

impl PartialEq for FieldRef {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.entity == other.entity
    }
}

impl Eq for FieldRef {}

impl Hash for FieldRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.entity.hash(state);
        self.index.hash(state);
    }
}

impl fmt::Debug for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.entity.table_name(), self.name())
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Name → entity lookup used to resolve `$fks` relation names and
/// `"$entity:field"` references.
///
/// Built once at startup and read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct EntityRegistry {
    entities: IndexMap<String, Entity>,
}

impl EntityRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity under its name.
    ///
    /// # Errors
    /// Returns [`ModelError::DuplicateEntity`] if the name is taken.
    pub fn register(&mut self, entity: Entity) -> Result<(), ModelError> {
        if self.entities.contains_key(entity.name()) {
            return Err(ModelError::DuplicateEntity(entity.name().to_owned()));
        }
        self.entities.insert(entity.name().to_owned(), entity);
        Ok(())
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Entity> {
        self.entities.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }
}
