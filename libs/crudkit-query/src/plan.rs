use std::sync::OnceLock;

use indexmap::IndexMap;

use crate::condition::{Condition, QueryConditions};
use crate::model::{Entity, FieldRef};

/// Default page size of a freshly built plan.
pub const DEFAULT_LIMIT: u64 = 20;

/// Direction of one `$order-by` item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SortOrder {
    /// Leave the direction to the database.
    #[default]
    Default,
    Asc,
    Desc,
}

impl SortOrder {
    #[must_use]
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "default" => Some(Self::Default),
            "asc" => Some(Self::Asc),
            "desc" => Some(Self::Desc),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryOrder {
    pub column: FieldRef,
    pub order: SortOrder,
}

impl QueryOrder {
    #[must_use]
    pub fn new(column: FieldRef, order: SortOrder) -> Self {
        Self { column, order }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum JoinKind {
    #[default]
    Inner,
    Left,
}

/// Join of another entity into a plan.
///
/// `limit: None` joins every matching row. `limit: Some(k)` restricts the
/// join to the first `k` correlated rows per parent row, which is how a
/// singular foreign key is projected.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinSpec {
    pub entity: Entity,
    pub conditions: QueryConditions,
    pub kind: JoinKind,
    pub limit: Option<u64>,
}

impl JoinSpec {
    #[must_use]
    pub fn inner(entity: Entity, conditions: QueryConditions, limit: Option<u64>) -> Self {
        Self {
            entity,
            conditions,
            kind: JoinKind::Inner,
            limit,
        }
    }
}

/// Structured, pre-compilation description of a read (or of the id
/// resolution step of a write).
///
/// The effective selection (`select` minus `select_exclude`) is computed on
/// first use and cached; every setter touching the selection resets it.
///
/// `scope` holds conditions the service itself confines the plan to, such as
/// the id list of a foreign-key batch. They are ANDed with `conditions` but
/// are not the caller's filter, so permission solving never prunes them.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    entity: Entity,
    select: Vec<FieldRef>,
    select_exclude: Vec<FieldRef>,
    conditions: Option<QueryConditions>,
    scope: Option<QueryConditions>,
    order_by: Vec<QueryOrder>,
    offset: u64,
    limit: Option<u64>,
    joins: Vec<JoinSpec>,
    foreign_keys: IndexMap<String, QueryPlan>,
    effective_select: OnceLock<Vec<FieldRef>>,
}

impl QueryPlan {
    /// Plan selecting every declared field, no conditions, default limit.
    #[must_use]
    pub fn new(entity: Entity) -> Self {
        let select = entity.fields().collect();
        Self {
            entity,
            select,
            select_exclude: Vec::new(),
            conditions: None,
            scope: None,
            order_by: Vec::new(),
            offset: 0,
            limit: Some(DEFAULT_LIMIT),
            joins: Vec::new(),
            foreign_keys: IndexMap::new(),
            effective_select: OnceLock::new(),
        }
    }

    #[must_use]
    pub fn entity(&self) -> &Entity {
        &self.entity
    }

    #[must_use]
    pub fn select(&self) -> &[FieldRef] {
        &self.select
    }

    #[must_use]
    pub fn select_exclude(&self) -> &[FieldRef] {
        &self.select_exclude
    }

    /// Effective selection used by the compiler and by row materialization.
    #[must_use]
    pub fn select_for_crud(&self) -> &[FieldRef] {
        self.effective_select.get_or_init(|| {
            self.select
                .iter()
                .filter(|f| !self.select_exclude.contains(f))
                .cloned()
                .collect()
        })
    }

    #[must_use]
    pub fn conditions(&self) -> Option<&QueryConditions> {
        self.conditions.as_ref()
    }

    #[must_use]
    pub fn scope(&self) -> Option<&QueryConditions> {
        self.scope.as_ref()
    }

    #[must_use]
    pub fn order_by(&self) -> &[QueryOrder] {
        &self.order_by
    }

    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// `None` means unlimited.
    #[must_use]
    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    #[must_use]
    pub fn joins(&self) -> &[JoinSpec] {
        &self.joins
    }

    #[must_use]
    pub fn foreign_keys(&self) -> &IndexMap<String, QueryPlan> {
        &self.foreign_keys
    }

    pub fn set_select(&mut self, select: Vec<FieldRef>) {
        self.select = select;
        self.effective_select = OnceLock::new();
    }

    pub fn set_select_exclude(&mut self, exclude: Vec<FieldRef>) {
        self.select_exclude = exclude;
        self.effective_select = OnceLock::new();
    }

    pub fn set_conditions(&mut self, conditions: Option<QueryConditions>) {
        self.conditions = conditions;
    }

    pub fn set_scope(&mut self, scope: Option<QueryConditions>) {
        self.scope = scope;
    }

    pub fn set_order_by(&mut self, order_by: Vec<QueryOrder>) {
        self.order_by = order_by;
    }

    pub fn set_offset(&mut self, offset: u64) {
        self.offset = offset;
    }

    pub fn set_limit(&mut self, limit: Option<u64>) {
        self.limit = limit;
    }

    pub fn set_joins(&mut self, joins: Vec<JoinSpec>) {
        self.joins = joins;
    }

    pub fn set_foreign_keys(&mut self, foreign_keys: IndexMap<String, QueryPlan>) {
        self.foreign_keys = foreign_keys;
    }

    /// Append a condition to the top-level AND list.
    pub fn add_condition(&mut self, c: impl Into<Condition>) {
        self.conditions.get_or_insert_with(QueryConditions::default).push(c);
    }

    #[must_use]
    pub fn with_select(mut self, select: Vec<FieldRef>) -> Self {
        self.set_select(select);
        self
    }

    #[must_use]
    pub fn with_select_exclude(mut self, exclude: Vec<FieldRef>) -> Self {
        self.set_select_exclude(exclude);
        self
    }

    #[must_use]
    pub fn with_conditions(mut self, conditions: impl Into<QueryConditions>) -> Self {
        self.conditions = Some(conditions.into());
        self
    }

    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<QueryConditions>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    #[must_use]
    pub fn with_order_by(mut self, order_by: Vec<QueryOrder>) -> Self {
        self.order_by = order_by;
        self
    }

    #[must_use]
    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    #[must_use]
    pub fn with_limit(mut self, limit: Option<u64>) -> Self {
        self.limit = limit;
        self
    }

    #[must_use]
    pub fn with_joins(mut self, joins: Vec<JoinSpec>) -> Self {
        self.joins = joins;
        self
    }

    #[must_use]
    pub fn with_foreign_key(mut self, name: impl Into<String>, plan: QueryPlan) -> Self {
        self.foreign_keys.insert(name.into(), plan);
        self
    }

    /// Entities whose fields may appear in this plan: the base entity and
    /// every joined entity.
    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        std::iter::once(&self.entity).chain(self.joins.iter().map(|j| &j.entity))
    }
}

impl PartialEq for QueryPlan {
    fn eq(&self, other: &Self) -> bool {
        self.entity == other.entity
            && self.select_for_crud() == other.select_for_crud()
            && self.conditions == other.conditions
            && self.scope == other.scope
            && self.order_by == other.order_by
            && self.offset == other.offset
            && self.limit == other.limit
            && self.joins == other.joins
            && self.foreign_keys == other.foreign_keys
    }
}
