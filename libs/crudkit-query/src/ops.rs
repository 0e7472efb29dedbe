//! Operator vocabularies of the query grammar and the write-value map.

use std::fmt;

/// Ordering comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Ge,
    Gt,
}

/// Membership, identity, pattern and array relations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationOp {
    Is,
    IsNot,
    In,
    NotIn,
    /// String columns only.
    Prefix,
    IPrefix,
    /// Array columns only.
    ContainsAll,
    ContainsAny,
}

/// Operator of a [`crate::ConditionExpr`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryOp {
    Compare(CompareOp),
    Relation(RelationOp),
}

impl QueryOp {
    /// Resolve a grammar token, including the long aliases.
    #[must_use]
    pub fn from_token(token: &str) -> Option<Self> {
        let op = match token {
            "eq" => Self::Compare(CompareOp::Eq),
            "ne" => Self::Compare(CompareOp::Ne),
            "lt" => Self::Compare(CompareOp::Lt),
            "le" => Self::Compare(CompareOp::Le),
            "ge" => Self::Compare(CompareOp::Ge),
            "gt" => Self::Compare(CompareOp::Gt),
            "is" => Self::Relation(RelationOp::Is),
            "isnot" | "is not" => Self::Relation(RelationOp::IsNot),
            "in" => Self::Relation(RelationOp::In),
            "notin" | "not in" => Self::Relation(RelationOp::NotIn),
            "prefix" => Self::Relation(RelationOp::Prefix),
            "iprefix" => Self::Relation(RelationOp::IPrefix),
            "contains_all" | "contains" => Self::Relation(RelationOp::ContainsAll),
            "contains_any" => Self::Relation(RelationOp::ContainsAny),
            _ => return None,
        };
        Some(op)
    }

    #[must_use]
    pub fn token(self) -> &'static str {
        match self {
            Self::Compare(CompareOp::Eq) => "eq",
            Self::Compare(CompareOp::Ne) => "ne",
            Self::Compare(CompareOp::Lt) => "lt",
            Self::Compare(CompareOp::Le) => "le",
            Self::Compare(CompareOp::Ge) => "ge",
            Self::Compare(CompareOp::Gt) => "gt",
            Self::Relation(RelationOp::Is) => "is",
            Self::Relation(RelationOp::IsNot) => "isnot",
            Self::Relation(RelationOp::In) => "in",
            Self::Relation(RelationOp::NotIn) => "notin",
            Self::Relation(RelationOp::Prefix) => "prefix",
            Self::Relation(RelationOp::IPrefix) => "iprefix",
            Self::Relation(RelationOp::ContainsAll) => "contains_all",
            Self::Relation(RelationOp::ContainsAny) => "contains_any",
        }
    }

    /// `IN` / `NOT IN`: the value is a list of column-typed literals.
    #[must_use]
    pub fn takes_list(self) -> bool {
        matches!(self, Self::Relation(RelationOp::In | RelationOp::NotIn))
    }

    /// Array relations: the value is one array literal bound as a whole.
    #[must_use]
    pub fn is_array_relation(self) -> bool {
        matches!(
            self,
            Self::Relation(RelationOp::ContainsAll | RelationOp::ContainsAny)
        )
    }

    #[must_use]
    pub fn is_prefix(self) -> bool {
        matches!(self, Self::Relation(RelationOp::Prefix | RelationOp::IPrefix))
    }
}

impl From<CompareOp> for QueryOp {
    fn from(op: CompareOp) -> Self {
        Self::Compare(op)
    }
}

impl From<RelationOp> for QueryOp {
    fn from(op: RelationOp) -> Self {
        Self::Relation(op)
    }
}

impl fmt::Display for QueryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// Boolean connective of a [`crate::ConditionLogicExpr`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicOp {
    And,
    Or,
}

/// Server-side mutation applied by a `"field.<flag>"` update key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateFlag {
    Incr,
    Decr,
    ArrayExtend,
    ArrayPrune,
    ArrayExtendDistinct,
    ArrayPruneDistinct,
}

impl UpdateFlag {
    #[must_use]
    pub fn from_token(token: &str) -> Option<Self> {
        let flag = match token {
            "incr" => Self::Incr,
            "decr" => Self::Decr,
            "array_extend" => Self::ArrayExtend,
            "array_prune" => Self::ArrayPrune,
            "array_extend_distinct" => Self::ArrayExtendDistinct,
            "array_prune_distinct" => Self::ArrayPruneDistinct,
            _ => return None,
        };
        Some(flag)
    }

    #[must_use]
    pub fn token(self) -> &'static str {
        match self {
            Self::Incr => "incr",
            Self::Decr => "decr",
            Self::ArrayExtend => "array_extend",
            Self::ArrayPrune => "array_prune",
            Self::ArrayExtendDistinct => "array_extend_distinct",
            Self::ArrayPruneDistinct => "array_prune_distinct",
        }
    }

    #[must_use]
    pub fn is_array(self) -> bool {
        !matches!(self, Self::Incr | Self::Decr)
    }
}
