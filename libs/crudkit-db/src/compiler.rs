//! Plan and write-value lowering to sea-query statements.
//!
//! Statement shapes:
//!
//! ```text
//! SELECT <id>, <selected...> FROM <t> [JOIN ...] [WHERE ...] [ORDER BY ...] [LIMIT n] [OFFSET m]
//! SELECT COUNT(1) FROM <t> [JOIN ...] [WHERE ...]
//! INSERT INTO <t> (<cols>) VALUES (<params>) [RETURNING <id>]
//! UPDATE <t> SET <col> = <expr>, ... WHERE <id> IN (<ids>)
//! DELETE FROM <t> WHERE <id> IN (<ids>)
//! ```
//!
//! Columns are qualified only when the plan has joins. A join whose table
//! already appears in the statement is aliased `<table>_<n>`, `n` being its
//! position among the joins. With such a self-join, selected and ordered
//! columns of that entity read from the latest join, `WHERE` reads from the
//! base table, and a join condition reads its own columns from the joined
//! table and its field operands from the outer ones.
//!
//! Array operators and array update flags are PostgreSQL only.

use crudkit_query::{
    CompareOp, Condition, ConditionExpr, Entity, FieldKind, FieldRef, JoinKind, JoinSpec, LogicOp,
    Operand, QueryConditions, QueryError, QueryOp, QueryPlan, RelationOp, SortOrder, UpdateFlag, Value,
    ValuesToCreate, ValuesToUpdate,
};
use sea_orm::sea_query::extension::postgres::PgBinOper;
use sea_orm::sea_query::{
    Alias, BinOper, ColumnRef, Condition as SqlCondition, ConditionalStatement, Expr, Func,
    IntoColumnRef, JoinType, Order, OrderedStatement, Query, QueryStatementBuilder, SelectStatement,
    SimpleExpr,
};

use crate::dialect::Dialect;
use crate::placeholder::{PlaceholderGenerator, PlaceholderStyle, SqlValue, bind_value};

/// SQL text with its bound values.
///
/// `columns` lists the declared kinds of the result columns, in order, so a
/// backend can decode rows; it is empty for statements returning nothing.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledStatement {
    pub sql: String,
    pub values: Vec<SqlValue>,
    pub columns: Vec<FieldKind>,
}

/// Row query and, when requested, the matching `COUNT(1)` query.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectStatements {
    pub rows: CompiledStatement,
    pub count: Option<CompiledStatement>,
}

#[derive(Debug, Clone, Copy)]
pub struct SqlCompiler {
    dialect: Dialect,
    style: PlaceholderStyle,
}

impl SqlCompiler {
    #[must_use]
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            style: dialect.placeholder_style(),
        }
    }

    /// Override the dialect's placeholder template (drivers sometimes differ).
    #[must_use]
    pub fn with_placeholder_style(mut self, style: PlaceholderStyle) -> Self {
        self.style = style;
        self
    }

    #[must_use]
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    #[must_use]
    pub fn placeholder_style(&self) -> PlaceholderStyle {
        self.style
    }

    /// The plan's `conditions` and `scope` are ANDed into one `WHERE`.
    ///
    /// # Errors
    /// Returns [`QueryError::InvalidQueryConditionValue`] when an operand does
    /// not fit its operator (e.g. a non-array value for `contains_any`), or
    /// for an array operator outside PostgreSQL.
    pub fn compile_select(
        &self,
        plan: &QueryPlan,
        with_count: bool,
    ) -> Result<SelectStatements, QueryError> {
        let tables = Tables::of(plan);
        let lower = Lower {
            dialect: self.dialect,
            tables: &tables,
        };

        let mut base = Query::select();
        base.from(Alias::new(plan.entity().table_name()));
        for (index, join) in plan.joins().iter().enumerate() {
            lower.join(&mut base, index, join)?;
        }
        let mut filter = SqlCondition::all();
        let mut filtered = false;
        for conditions in [plan.conditions(), plan.scope()].into_iter().flatten() {
            if let Some(c) = lower.conditions(conditions, Side::Outer)? {
                filter = filter.add(c);
                filtered = true;
            }
        }
        if filtered {
            base.cond_where(filter);
        }

        let id = plan.entity().id();
        let selected = plan.select_for_crud();
        let mut rows = base.clone();
        rows.column(tables.col(&id, Side::Outer));
        for f in selected {
            rows.column(tables.col(f, Side::Selected));
        }
        for o in plan.order_by() {
            let order = match o.order {
                SortOrder::Default | SortOrder::Asc => Order::Asc,
                SortOrder::Desc => Order::Desc,
            };
            rows.order_by(tables.col(&o.column, Side::Selected), order);
        }
        match (plan.limit(), plan.offset()) {
            (Some(n), m) => {
                rows.limit(n);
                if m > 0 {
                    rows.offset(m);
                }
            }
            (None, 0) => {}
            (None, m) => {
                // OFFSET needs a LIMIT outside PostgreSQL.
                if self.dialect != Dialect::Postgres {
                    rows.limit(i64::MAX.unsigned_abs());
                }
                rows.offset(m);
            }
        }

        let columns = std::iter::once(id.kind())
            .chain(selected.iter().map(FieldRef::kind))
            .collect();
        let count = with_count.then(|| {
            let mut count = base;
            count.expr(Expr::cust("COUNT(1)"));
            self.render(&count, vec![FieldKind::I64])
        });

        Ok(SelectStatements {
            rows: self.render(&rows, columns),
            count,
        })
    }

    /// # Errors
    /// Returns [`QueryError::InvalidQueryValue`] when the row cannot be
    /// assembled into an insert.
    pub fn compile_insert(&self, values: &ValuesToCreate) -> Result<CompiledStatement, QueryError> {
        let entity = values.entity();
        let mut insert = Query::insert();
        insert.into_table(Alias::new(entity.table_name()));

        if values.is_empty() {
            insert.or_default_values();
        } else {
            insert.columns(values.iter().map(|(f, _)| Alias::new(f.name())));
            insert
                .values(values.iter().map(|(f, v)| self.param(v, Some(f.kind()))))
                .map_err(|e| QueryError::InvalidQueryValue(format!("{e:?}")))?;
        }

        let mut columns = Vec::new();
        if self.dialect.supports_returning() {
            let id = entity.id();
            insert.returning_col(Alias::new(id.name()));
            columns.push(id.kind());
        }
        Ok(self.render(&insert, columns))
    }

    /// Mutation of the rows `ids`. Flagged values are computed from the
    /// current column value on the server.
    ///
    /// # Errors
    /// Returns [`QueryError::InvalidQueryValue`] for an array flag outside
    /// PostgreSQL.
    pub fn compile_update(
        &self,
        values: &ValuesToUpdate,
        ids: &[Value],
    ) -> Result<CompiledStatement, QueryError> {
        let entity = values.entity();
        let mut update = Query::update();
        update.table(Alias::new(entity.table_name()));

        for (f, v) in values.iter() {
            let col = || SimpleExpr::Column(Alias::new(f.name()).into_column_ref());
            let p = self.param(&v.value, Some(f.kind()));
            let expr = match v.flag {
                None => p,
                Some(UpdateFlag::Incr) => binary(col(), BinOper::Add, p),
                Some(UpdateFlag::Decr) => binary(col(), BinOper::Sub, p),
                Some(flag) if !self.dialect.native_arrays() => {
                    return Err(QueryError::InvalidQueryValue(format!(
                        "`{}` on `{}` needs PostgreSQL arrays",
                        flag.token(),
                        f.name()
                    )));
                }
                Some(UpdateFlag::ArrayExtend) => {
                    binary(col(), BinOper::PgOperator(PgBinOper::Concatenate), p)
                }
                Some(UpdateFlag::ArrayExtendDistinct) => {
                    Expr::cust_with_exprs("ARRAY(SELECT DISTINCT unnest($1 || $2))", [col(), p])
                }
                Some(UpdateFlag::ArrayPrune) => Expr::cust_with_exprs(
                    "array(SELECT x FROM unnest($1) AS t(x) WHERE x <> ALL($2))",
                    [col(), p],
                ),
                Some(UpdateFlag::ArrayPruneDistinct) => Expr::cust_with_exprs(
                    "array(SELECT unnest($1) EXCEPT SELECT unnest($2))",
                    [col(), p],
                ),
            };
            update.value(Alias::new(f.name()), expr);
        }

        update.and_where(self.id_filter(entity, ids));
        Ok(self.render(&update, Vec::new()))
    }

    #[must_use]
    pub fn compile_delete(&self, entity: &Entity, ids: &[Value]) -> CompiledStatement {
        let mut delete = Query::delete();
        delete
            .from_table(Alias::new(entity.table_name()))
            .and_where(self.id_filter(entity, ids));
        self.render(&delete, Vec::new())
    }

    fn id_filter(&self, entity: &Entity, ids: &[Value]) -> SimpleExpr {
        if ids.is_empty() {
            return Expr::cust("1=0");
        }
        let id = entity.id();
        Expr::col(Alias::new(id.name())).is_in(ids.iter().map(|v| self.param(v, Some(id.kind()))))
    }

    fn param(&self, value: &Value, kind: Option<FieldKind>) -> SimpleExpr {
        SimpleExpr::Value(bind_value(value, kind, self.dialect))
    }

    fn render(&self, stmt: &impl QueryStatementBuilder, columns: Vec<FieldKind>) -> CompiledStatement {
        let mut writer = PlaceholderGenerator::new(self.style);
        stmt.build_collect_any_into(self.dialect.query_builder(), &mut writer);
        let (sql, values) = writer.into_parts();
        CompiledStatement { sql, values, columns }
    }
}

fn binary(lhs: SimpleExpr, op: BinOper, rhs: SimpleExpr) -> SimpleExpr {
    SimpleExpr::Binary(Box::new(lhs), op, Box::new(rhs))
}

fn compare_oper(op: CompareOp) -> BinOper {
    match op {
        CompareOp::Eq => BinOper::Equal,
        CompareOp::Ne => BinOper::NotEqual,
        CompareOp::Lt => BinOper::SmallerThan,
        CompareOp::Le => BinOper::SmallerThanOrEqual,
        CompareOp::Ge => BinOper::GreaterThanOrEqual,
        CompareOp::Gt => BinOper::GreaterThan,
    }
}

/// Where a column reference is resolved.
#[derive(Debug, Clone, Copy)]
enum Side {
    /// `WHERE` and field operands: the base table, else the first join.
    Outer,
    /// Condition of the join at this index: that join's own columns.
    Join(usize),
    /// Select list and ordering: the latest join, else the base table.
    Selected,
}

#[derive(Debug)]
struct Joined {
    entity: String,
    table: String,
    alias: Option<String>,
}

impl Joined {
    fn qualifier(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.table)
    }
}

/// Table names visible in one `SELECT`.
#[derive(Debug)]
struct Tables {
    qualify: bool,
    entity: String,
    table: String,
    joins: Vec<Joined>,
}

impl Tables {
    fn of(plan: &QueryPlan) -> Self {
        let table = plan.entity().table_name().to_owned();
        let mut seen = vec![table.clone()];
        let joins = plan
            .joins()
            .iter()
            .enumerate()
            .map(|(index, join)| {
                let joined = join.entity.table_name().to_owned();
                let alias = seen
                    .contains(&joined)
                    .then(|| format!("{joined}_{}", index + 1));
                seen.push(joined.clone());
                Joined {
                    entity: join.entity.name().to_owned(),
                    table: joined,
                    alias,
                }
            })
            .collect();
        Self {
            qualify: !plan.joins().is_empty(),
            entity: plan.entity().name().to_owned(),
            table,
            joins,
        }
    }

    fn qualifier(&self, entity: &Entity, side: Side) -> String {
        let name = entity.name();
        let join = match side {
            Side::Join(index) => self.joins.get(index).filter(|j| j.entity == name),
            Side::Selected => self.joins.iter().rev().find(|j| j.entity == name),
            Side::Outer => None,
        };
        match join {
            Some(j) => j.qualifier().to_owned(),
            None if self.entity == name => self.table.clone(),
            None => self
                .joins
                .iter()
                .find(|j| j.entity == name)
                .map_or_else(|| entity.table_name().to_owned(), |j| j.qualifier().to_owned()),
        }
    }

    fn col(&self, field: &FieldRef, side: Side) -> ColumnRef {
        let name = Alias::new(field.name());
        if self.qualify {
            (Alias::new(self.qualifier(field.entity(), side)), name).into_column_ref()
        } else {
            name.into_column_ref()
        }
    }
}

struct Lower<'a> {
    dialect: Dialect,
    tables: &'a Tables,
}

impl Lower<'_> {
    fn param(&self, value: &Value, kind: Option<FieldKind>) -> SimpleExpr {
        SimpleExpr::Value(bind_value(value, kind, self.dialect))
    }

    fn column(&self, field: &FieldRef, side: Side) -> SimpleExpr {
        SimpleExpr::Column(self.tables.col(field, side))
    }

    /// An empty condition list joins nothing; a limited join picks its rows
    /// through a correlated subquery.
    fn join(&self, select: &mut SelectStatement, index: usize, join: &JoinSpec) -> Result<(), QueryError> {
        let joined = &self.tables.joins[index];
        let on = match (self.conditions(&join.conditions, Side::Join(index))?, join.limit) {
            (None, _) => SqlCondition::all().add(Expr::cust("1=0")),
            (Some(on), None) => on,
            (Some(on), Some(k)) => {
                let id = self.tables.col(&join.entity.id(), Side::Join(index));
                let mut pick = Query::select();
                pick.column(id.clone());
                match &joined.alias {
                    Some(alias) => pick.from_as(Alias::new(&joined.table), Alias::new(alias)),
                    None => pick.from(Alias::new(&joined.table)),
                };
                pick.cond_where(on).limit(k);
                let sub = SimpleExpr::SubQuery(None, Box::new(pick.into_sub_query_statement()));
                SqlCondition::all().add(Expr::col(id).eq(sub))
            }
        };

        let kind = match join.kind {
            JoinKind::Inner => JoinType::InnerJoin,
            JoinKind::Left => JoinType::LeftJoin,
        };
        match &joined.alias {
            Some(alias) => select.join_as(kind, Alias::new(&joined.table), Alias::new(alias), on),
            None => select.join(kind, Alias::new(&joined.table), on),
        };
        Ok(())
    }

    /// Top-level items are AND-ed; `None` when nothing constrains.
    fn conditions(&self, conditions: &QueryConditions, side: Side) -> Result<Option<SqlCondition>, QueryError> {
        self.group(SqlCondition::all(), &conditions.items, side)
    }

    fn group(
        &self,
        mut out: SqlCondition,
        items: &[Condition],
        side: Side,
    ) -> Result<Option<SqlCondition>, QueryError> {
        let mut lowered = false;
        for c in items {
            if let Some(c) = self.condition(c, side)? {
                out = out.add(c);
                lowered = true;
            }
        }
        Ok(lowered.then_some(out))
    }

    fn condition(&self, cond: &Condition, side: Side) -> Result<Option<SqlCondition>, QueryError> {
        match cond {
            Condition::Expr(e) => Ok(Some(SqlCondition::all().add(self.expr(e, side)?))),
            Condition::Logic(group) => {
                let out = match group.kind {
                    LogicOp::And => SqlCondition::all(),
                    LogicOp::Or => SqlCondition::any(),
                };
                self.group(out, &group.items, side)
            }
            Condition::Not(n) => Ok(self.condition(&n.expr, side)?.map(SqlCondition::not)),
        }
    }

    fn expr(&self, e: &ConditionExpr, side: Side) -> Result<SimpleExpr, QueryError> {
        let lhs = self.column(&e.column, side);
        let kind = e.column.kind();
        let invalid = || {
            QueryError::InvalidQueryConditionValue(format!(
                "invalid right value for `{}` on `{}`",
                e.op,
                e.column.name()
            ))
        };

        if let Operand::Field(other) = &e.value {
            let op = match e.op {
                QueryOp::Compare(c) => compare_oper(c),
                QueryOp::Relation(RelationOp::Is) => BinOper::Equal,
                QueryOp::Relation(RelationOp::IsNot) => BinOper::NotEqual,
                QueryOp::Relation(_) => return Err(invalid()),
            };
            return Ok(binary(lhs, op, self.column(other, Side::Outer)));
        }

        match (e.op, &e.value) {
            (
                QueryOp::Compare(CompareOp::Eq) | QueryOp::Relation(RelationOp::Is),
                Operand::Value(Value::Null),
            ) => Ok(Expr::expr(lhs).is_null()),
            (
                QueryOp::Compare(CompareOp::Ne) | QueryOp::Relation(RelationOp::IsNot),
                Operand::Value(Value::Null),
            ) => Ok(Expr::expr(lhs).is_not_null()),
            (QueryOp::Compare(c), Operand::Value(v)) => {
                Ok(binary(lhs, compare_oper(c), self.param(v, Some(kind))))
            }
            (QueryOp::Relation(RelationOp::Is), Operand::Value(v)) => {
                Ok(binary(lhs, BinOper::Equal, self.param(v, Some(kind))))
            }
            (QueryOp::Relation(RelationOp::IsNot), Operand::Value(v)) => {
                Ok(binary(lhs, BinOper::NotEqual, self.param(v, Some(kind))))
            }
            (QueryOp::Relation(op @ (RelationOp::In | RelationOp::NotIn)), operand) => {
                let items = match operand {
                    Operand::List(items) | Operand::Value(Value::Array(items)) => items.as_slice(),
                    Operand::Value(v) => std::slice::from_ref(v),
                    Operand::Field(_) => return Err(invalid()),
                };
                let negated = op == RelationOp::NotIn;
                if items.is_empty() {
                    return Ok(Expr::cust(if negated { "1=1" } else { "1=0" }));
                }
                let params = items.iter().map(|v| self.param(v, Some(kind)));
                Ok(if negated {
                    Expr::expr(lhs).is_not_in(params)
                } else {
                    Expr::expr(lhs).is_in(params)
                })
            }
            (
                QueryOp::Relation(op @ (RelationOp::Prefix | RelationOp::IPrefix)),
                Operand::Value(Value::String(s)),
            ) => {
                let pattern = format!("{}%", s.replace('%', ""));
                Ok(if op == RelationOp::Prefix {
                    binary(lhs, BinOper::Like, self.param(&Value::String(pattern), None))
                } else if self.dialect.supports_ilike() {
                    let p = self.param(&Value::String(pattern), None);
                    binary(lhs, BinOper::PgOperator(PgBinOper::ILike), p)
                } else {
                    let p = self.param(&Value::String(pattern.to_lowercase()), None);
                    binary(Func::lower(lhs).into(), BinOper::Like, p)
                })
            }
            (
                QueryOp::Relation(op @ (RelationOp::ContainsAll | RelationOp::ContainsAny)),
                Operand::Value(Value::Array(items)) | Operand::List(items),
            ) => {
                if !self.dialect.native_arrays() {
                    return Err(QueryError::InvalidQueryConditionValue(format!(
                        "`{}` on `{}` needs PostgreSQL arrays",
                        e.op,
                        e.column.name()
                    )));
                }
                let p = self.param(&Value::Array(items.clone()), kind.is_array().then_some(kind));
                Ok(if op == RelationOp::ContainsAll {
                    binary(lhs, BinOper::PgOperator(PgBinOper::Contains), p)
                } else {
                    Expr::cust_with_exprs("$1 && $2", [lhs, p])
                })
            }
            _ => Err(invalid()),
        }
    }
}
