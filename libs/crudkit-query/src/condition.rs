//! Condition AST and the builder DSL on [`FieldRef`].
//!
//! ```
//! use crudkit_query::{Condition, Entity, FieldKind};
//!
//! let topic = Entity::builder("topic")
//!     .field("id", FieldKind::I64)
//!     .field("title", FieldKind::String)
//!     .build()
//!     .unwrap();
//! let id = topic.id();
//! let title = topic.field("title").unwrap();
//!
//! // `a & b & c` grows a single AND group instead of nesting.
//! let cond = id.gt(1) & id.lt(10) & !title.prefix_with("draft");
//! let Condition::Logic(group) = &cond else { unreachable!() };
//! assert_eq!(group.items.len(), 3);
//! ```

use std::ops::{BitAnd, BitOr, Not};

use crate::model::FieldRef;
use crate::ops::{CompareOp, LogicOp, QueryOp, RelationOp};
use crate::value::Value;

/// Right-hand side of a [`ConditionExpr`].
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// Field-to-field comparison (correlated / join conditions).
    Field(FieldRef),
    Value(Value),
    /// Expanded into one placeholder per element (`IN`, `NOT IN`).
    List(Vec<Value>),
}

/// `column OP value` leaf.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionExpr {
    pub column: FieldRef,
    pub op: QueryOp,
    pub value: Operand,
}

impl ConditionExpr {
    #[must_use]
    pub fn new(column: FieldRef, op: impl Into<QueryOp>, value: Operand) -> Self {
        Self {
            column,
            op: op.into(),
            value,
        }
    }
}

/// AND / OR group.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionLogicExpr {
    pub kind: LogicOp,
    pub items: Vec<Condition>,
}

/// Logical NOT of any node.
#[derive(Debug, Clone, PartialEq)]
pub struct NegatedExpr {
    pub expr: Box<Condition>,
}

/// A node of the condition tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Expr(ConditionExpr),
    Logic(ConditionLogicExpr),
    Not(NegatedExpr),
}

impl Condition {
    #[must_use]
    pub fn and(items: Vec<Condition>) -> Self {
        Self::Logic(ConditionLogicExpr {
            kind: LogicOp::And,
            items,
        })
    }

    #[must_use]
    pub fn or(items: Vec<Condition>) -> Self {
        Self::Logic(ConditionLogicExpr {
            kind: LogicOp::Or,
            items,
        })
    }

    #[must_use]
    pub fn negate(inner: Condition) -> Self {
        Self::Not(NegatedExpr {
            expr: Box::new(inner),
        })
    }

    /// Visit every leaf, including leaves under negations.
    pub fn visit_exprs(&self, f: &mut impl FnMut(&ConditionExpr)) {
        match self {
            Self::Expr(e) => f(e),
            Self::Logic(group) => group.items.iter().for_each(|c| c.visit_exprs(f)),
            Self::Not(n) => n.expr.visit_exprs(f),
        }
    }

    fn combine(self, kind: LogicOp, rhs: Condition) -> Self {
        match self {
            Self::Logic(mut group) if group.kind == kind => {
                match rhs {
                    Self::Logic(other) if other.kind == kind => group.items.extend(other.items),
                    other => group.items.push(other),
                }
                Self::Logic(group)
            }
            lhs => Self::Logic(ConditionLogicExpr {
                kind,
                items: vec![lhs, rhs],
            }),
        }
    }
}

impl BitAnd for Condition {
    type Output = Condition;

    fn bitand(self, rhs: Condition) -> Condition {
        self.combine(LogicOp::And, rhs)
    }
}

impl BitOr for Condition {
    type Output = Condition;

    fn bitor(self, rhs: Condition) -> Condition {
        self.combine(LogicOp::Or, rhs)
    }
}

impl Not for Condition {
    type Output = Condition;

    fn not(self) -> Condition {
        Condition::negate(self)
    }
}

impl From<ConditionExpr> for Condition {
    fn from(e: ConditionExpr) -> Self {
        Self::Expr(e)
    }
}

/// Top-level condition list of a plan; items are AND-ed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryConditions {
    pub items: Vec<Condition>,
}

impl QueryConditions {
    #[must_use]
    pub fn new(items: Vec<Condition>) -> Self {
        Self { items }
    }

    pub fn push(&mut self, c: impl Into<Condition>) {
        self.items.push(c.into());
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn visit_exprs(&self, f: &mut impl FnMut(&ConditionExpr)) {
        self.items.iter().for_each(|c| c.visit_exprs(f));
    }
}

impl From<Condition> for QueryConditions {
    fn from(c: Condition) -> Self {
        Self { items: vec![c] }
    }
}

impl From<Vec<Condition>> for QueryConditions {
    fn from(items: Vec<Condition>) -> Self {
        Self { items }
    }
}

// DSL
impl FieldRef {
    fn leaf(&self, op: impl Into<QueryOp>, value: Operand) -> Condition {
        Condition::Expr(ConditionExpr::new(self.clone(), op, value))
    }

    fn literal(&self, op: impl Into<QueryOp>, value: impl Into<Value>) -> Condition {
        self.leaf(op, Operand::Value(value.into()))
    }

    #[must_use]
    pub fn eq(&self, value: impl Into<Value>) -> Condition {
        self.literal(CompareOp::Eq, value)
    }

    #[must_use]
    pub fn ne(&self, value: impl Into<Value>) -> Condition {
        self.literal(CompareOp::Ne, value)
    }

    #[must_use]
    pub fn lt(&self, value: impl Into<Value>) -> Condition {
        self.literal(CompareOp::Lt, value)
    }

    #[must_use]
    pub fn le(&self, value: impl Into<Value>) -> Condition {
        self.literal(CompareOp::Le, value)
    }

    #[must_use]
    pub fn ge(&self, value: impl Into<Value>) -> Condition {
        self.literal(CompareOp::Ge, value)
    }

    #[must_use]
    pub fn gt(&self, value: impl Into<Value>) -> Condition {
        self.literal(CompareOp::Gt, value)
    }

    /// Field-to-field comparison, e.g. `topic.user_id = user.id`.
    #[must_use]
    pub fn compare_field(&self, op: CompareOp, other: &FieldRef) -> Condition {
        self.leaf(op, Operand::Field(other.clone()))
    }

    #[must_use]
    pub fn eq_field(&self, other: &FieldRef) -> Condition {
        self.compare_field(CompareOp::Eq, other)
    }

    #[must_use]
    pub fn is_(&self, value: impl Into<Value>) -> Condition {
        self.literal(RelationOp::Is, value)
    }

    #[must_use]
    pub fn is_not(&self, value: impl Into<Value>) -> Condition {
        self.literal(RelationOp::IsNot, value)
    }

    #[must_use]
    pub fn in_<V: Into<Value>>(&self, values: impl IntoIterator<Item = V>) -> Condition {
        self.leaf(
            RelationOp::In,
            Operand::List(values.into_iter().map(Into::into).collect()),
        )
    }

    #[must_use]
    pub fn not_in<V: Into<Value>>(&self, values: impl IntoIterator<Item = V>) -> Condition {
        self.leaf(
            RelationOp::NotIn,
            Operand::List(values.into_iter().map(Into::into).collect()),
        )
    }

    #[must_use]
    pub fn prefix_with(&self, prefix: impl Into<String>) -> Condition {
        self.literal(RelationOp::Prefix, prefix.into())
    }

    #[must_use]
    pub fn iprefix_with(&self, prefix: impl Into<String>) -> Condition {
        self.literal(RelationOp::IPrefix, prefix.into())
    }

    #[must_use]
    pub fn contains_all(&self, values: impl Into<Value>) -> Condition {
        self.literal(RelationOp::ContainsAll, values)
    }

    #[must_use]
    pub fn contains_any(&self, values: impl Into<Value>) -> Condition {
        self.literal(RelationOp::ContainsAny, values)
    }
}
