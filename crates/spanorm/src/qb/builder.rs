//! The query builder: fluent construction of one SELECT/UPDATE/DELETE.

use crate::error::{OrmError, OrmResult};
use crate::executor::{CommitTimestamp, Executor, Parameters, TransactionHandle};
use crate::model::Model;
use crate::qb::expr::{Column, Expression, Operand, Subquery, TableRef};
use crate::qb::grammar::Grammar;
use crate::qb::join::{JoinClause, JoinType};
use crate::qb::param::{BindingCategory, ParamRegistry, RawBindings};
use crate::row::Row;
use crate::value::Value;

/// Operator allow-list shared by `where_` and `having` validation.
const OPERATORS: [&str; 15] = [
    "=", "<", ">", "<=", ">=", "<>", "!=", "<=>", "like", "not like", "&", "|", "^", "<<", ">>",
];

pub(crate) fn valid_operator(operator: &str) -> bool {
    let lowered = operator.to_ascii_lowercase();
    OPERATORS.contains(&lowered.as_str())
}

/// Boolean connector tying a condition to the one before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Connector {
    And,
    Or,
}

impl Connector {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Connector::And => "and",
            Connector::Or => "or",
        }
    }
}

/// The right-hand side of a basic condition as the grammar renders it.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum BasicRhs {
    /// Named placeholder, with its value sitting in the binding map.
    Parameter(String),
    /// Raw SQL, rendered verbatim with no binding.
    Raw(Expression),
}

/// Where an IN/NOT IN condition takes its values from.
#[derive(Debug, Clone)]
pub(crate) enum InSource {
    /// A bound array parameter; `empty` collapses to a constant predicate.
    List { parameter: String, empty: bool },
    /// A compiled subquery, placed inside `UNNEST(...)` verbatim.
    Sub(Expression),
}

/// One node of the condition tree.
#[derive(Debug, Clone)]
pub(crate) enum Predicate {
    Basic {
        column: Column,
        operator: String,
        value: BasicRhs,
    },
    Column {
        first: Column,
        operator: String,
        second: Column,
    },
    In {
        column: Column,
        values: InSource,
        negated: bool,
    },
    Null {
        column: Column,
        negated: bool,
    },
    Between {
        column: Column,
        parameters: (String, String),
        negated: bool,
    },
    Nested {
        query: Box<QueryBuilder>,
    },
    Exists {
        query: Box<QueryBuilder>,
        negated: bool,
    },
}

#[derive(Debug, Clone)]
pub(crate) struct Condition {
    pub(crate) connector: Connector,
    pub(crate) predicate: Predicate,
}

/// Sort direction, restricted to `asc`/`desc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
    Asc,
    Desc,
}

impl Direction {
    fn parse(direction: &str) -> OrmResult<Self> {
        match direction.to_ascii_lowercase().as_str() {
            "asc" => Ok(Direction::Asc),
            "desc" => Ok(Direction::Desc),
            _ => Err(OrmError::InvalidOrderDirection {
                direction: direction.to_string(),
            }),
        }
    }

    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Direction::Asc => "asc",
            Direction::Desc => "desc",
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct OrderBy {
    pub(crate) column: Column,
    pub(crate) direction: Direction,
}

/// Aggregate functions the terminal helpers compile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    Count,
    Max,
    Min,
    Sum,
    Avg,
}

impl AggregateFunction {
    pub fn as_str(self) -> &'static str {
        match self {
            AggregateFunction::Count => "count",
            AggregateFunction::Max => "max",
            AggregateFunction::Min => "min",
            AggregateFunction::Sum => "sum",
            AggregateFunction::Avg => "avg",
        }
    }
}

/// A pending aggregate request; suppresses the ordinary column list.
#[derive(Debug, Clone)]
pub(crate) struct Aggregate {
    pub(crate) function: AggregateFunction,
    pub(crate) columns: Vec<Column>,
}

#[derive(Debug, Clone, Default)]
pub(crate) enum Distinct {
    #[default]
    Off,
    All,
    Columns(Vec<String>),
}

/// Which condition list a basic condition lands in.
enum ConditionTarget {
    Where,
    Having,
}

/// Mutable description of one query, compiled by [`Grammar`].
///
/// Mutators consume and return the builder; terminal operations compile it
/// and hand SQL plus the flattened bindings to an [`Executor`]. Nested
/// groups, subqueries, and joins are builders themselves, so the structure
/// recurses; their placeholder counters continue the parent's sequence.
///
/// ```ignore
/// let sql = table("Users")
///     .where_("age", ">", 25)?
///     .order_by_desc("created_at")
///     .limit(10)
///     .to_sql();
/// // select * from Users where age > @param1 order by created_at desc limit 10
/// ```
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    grammar: Grammar,
    pub(crate) from: Option<TableRef>,
    pub(crate) columns: Option<Vec<Column>>,
    pub(crate) joins: Vec<JoinClause>,
    pub(crate) wheres: Vec<Condition>,
    pub(crate) groups: Vec<String>,
    pub(crate) havings: Vec<Condition>,
    pub(crate) orders: Vec<OrderBy>,
    pub(crate) limit: Option<i64>,
    pub(crate) offset: Option<i64>,
    pub(crate) aggregate: Option<Aggregate>,
    pub(crate) distinct: Distinct,
    bindings: RawBindings,
    registry: ParamRegistry,
    primary_key: Option<String>,
}

impl Default for QueryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryBuilder {
    pub fn new() -> Self {
        Self::with_grammar(Grammar::new())
    }

    pub fn with_grammar(grammar: Grammar) -> Self {
        Self {
            grammar,
            from: None,
            columns: None,
            joins: Vec::new(),
            wheres: Vec::new(),
            groups: Vec::new(),
            havings: Vec::new(),
            orders: Vec::new(),
            limit: None,
            offset: None,
            aggregate: None,
            distinct: Distinct::Off,
            bindings: RawBindings::new(),
            registry: ParamRegistry::new(),
            primary_key: None,
        }
    }

    /// Fresh builder sharing this one's grammar, with counters continued.
    ///
    /// The scaffold for every subquery, nested group, and forked join.
    pub fn new_query(&self) -> QueryBuilder {
        let mut query = QueryBuilder::with_grammar(self.grammar.clone());
        query.registry = self.registry.clone();
        query
    }

    pub fn grammar(&self) -> &Grammar {
        &self.grammar
    }

    pub(crate) fn registry(&self) -> &ParamRegistry {
        &self.registry
    }

    // ==================== Source ====================

    pub fn from(mut self, table: &str) -> Self {
        self.from = Some(TableRef::Name(table.to_string()));
        self
    }

    pub fn from_as(self, table: &str, alias: &str) -> Self {
        self.from(&format!("{table} as {alias}"))
    }

    pub fn from_raw(mut self, expression: Expression) -> Self {
        self.from = Some(TableRef::Raw(expression));
        self
    }

    /// Set the primary key used by `find` and `delete_by_key`.
    pub fn key(mut self, primary_key: &str) -> Self {
        self.primary_key = Some(primary_key.to_string());
        self
    }

    // ==================== SELECT columns ====================

    /// Set the column list, clearing any existing select bindings.
    pub fn select(mut self, columns: &[&str]) -> Self {
        self.columns = Some(
            columns
                .iter()
                .map(|c| Column::Name((*c).to_string()))
                .collect(),
        );
        self.bindings.clear(BindingCategory::Select);
        self
    }

    /// Append columns without touching existing ones.
    pub fn add_select(mut self, columns: &[&str]) -> Self {
        let list = self.columns.get_or_insert_with(Vec::new);
        list.extend(columns.iter().map(|c| Column::Name((*c).to_string())));
        self
    }

    /// Append a raw select expression plus its named bindings.
    pub fn select_raw(mut self, expression: impl Into<String>, bindings: Parameters) -> Self {
        let list = self.columns.get_or_insert_with(Vec::new);
        list.push(Column::Raw(Expression::new(expression)));
        for (key, value) in bindings {
            self.bindings.add(BindingCategory::Select, &key, value);
        }
        self
    }

    /// Append `(subquery) as alias` to the column list.
    pub fn select_sub(mut self, query: impl Into<Subquery>, alias: &str) -> OrmResult<Self> {
        let (sql, bindings) = self.create_sub(query.into())?;
        Ok(self.select_raw(format!("({sql}) as {alias}"), bindings))
    }

    pub fn select_sub_with(
        mut self,
        build: impl FnOnce(QueryBuilder) -> OrmResult<QueryBuilder>,
        alias: &str,
    ) -> OrmResult<Self> {
        let child = build(self.for_sub_query())?;
        let (sql, bindings) = self.create_sub(Subquery::Builder(child))?;
        Ok(self.select_raw(format!("({sql}) as {alias}"), bindings))
    }

    /// Like [`select_sub`](Self::select_sub), but a builder with no columns
    /// chosen yet first selects `table.*`.
    pub fn add_select_sub(mut self, query: impl Into<Subquery>, alias: &str) -> OrmResult<Self> {
        self = self.default_to_table_star();
        self.select_sub(query, alias)
    }

    pub fn add_select_sub_with(
        mut self,
        build: impl FnOnce(QueryBuilder) -> OrmResult<QueryBuilder>,
        alias: &str,
    ) -> OrmResult<Self> {
        self = self.default_to_table_star();
        self.select_sub_with(build, alias)
    }

    fn default_to_table_star(mut self) -> Self {
        if self.columns.is_none() {
            let star = match &self.from {
                Some(source) => format!("{}.*", source.raw_name()),
                None => "*".to_string(),
            };
            self = self.select(&[star.as_str()]);
        }
        self
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = Distinct::All;
        self
    }

    pub fn distinct_columns(mut self, columns: &[&str]) -> Self {
        self.distinct = Distinct::Columns(columns.iter().map(|c| (*c).to_string()).collect());
        self
    }

    // ==================== WHERE: basic ====================

    /// Add `column operator @paramN`, validating the operator and value.
    pub fn where_(
        self,
        column: impl Into<Column>,
        operator: &str,
        value: impl Into<Operand>,
    ) -> OrmResult<Self> {
        let value = value.into();
        check_operator_and_value(operator, &value)?;
        Ok(self.push_basic(
            ConditionTarget::Where,
            column.into(),
            operator,
            value,
            Connector::And,
        ))
    }

    pub fn or_where(
        self,
        column: impl Into<Column>,
        operator: &str,
        value: impl Into<Operand>,
    ) -> OrmResult<Self> {
        let value = value.into();
        check_operator_and_value(operator, &value)?;
        Ok(self.push_basic(
            ConditionTarget::Where,
            column.into(),
            operator,
            value,
            Connector::Or,
        ))
    }

    /// The two-argument form: `column = value`. Accepts a null value.
    pub fn where_eq(self, column: impl Into<Column>, value: impl Into<Operand>) -> Self {
        self.push_basic(
            ConditionTarget::Where,
            column.into(),
            "=",
            value.into(),
            Connector::And,
        )
    }

    pub fn or_where_eq(self, column: impl Into<Column>, value: impl Into<Operand>) -> Self {
        self.push_basic(
            ConditionTarget::Where,
            column.into(),
            "=",
            value.into(),
            Connector::Or,
        )
    }

    fn push_basic(
        mut self,
        target: ConditionTarget,
        column: Column,
        operator: &str,
        value: Operand,
        connector: Connector,
    ) -> Self {
        let category = match target {
            ConditionTarget::Where => BindingCategory::Where,
            ConditionTarget::Having => BindingCategory::Having,
        };
        let rhs = match value {
            Operand::Value(value) => {
                let parameter = self.registry.next_param();
                self.bindings.add(category, &parameter, value);
                BasicRhs::Parameter(parameter)
            }
            Operand::Raw(expr) => BasicRhs::Raw(expr),
        };
        let condition = Condition {
            connector,
            predicate: Predicate::Basic {
                column,
                operator: operator.to_string(),
                value: rhs,
            },
        };
        match target {
            ConditionTarget::Where => self.wheres.push(condition),
            ConditionTarget::Having => self.havings.push(condition),
        }
        self
    }

    // ==================== WHERE: column comparison ====================

    /// Compare two columns; an invalid operator falls back to `=`.
    pub fn where_column(
        self,
        first: impl Into<Column>,
        operator: &str,
        second: impl Into<Column>,
    ) -> Self {
        self.push_column(first.into(), operator, second.into(), Connector::And)
    }

    pub fn or_where_column(
        self,
        first: impl Into<Column>,
        operator: &str,
        second: impl Into<Column>,
    ) -> Self {
        self.push_column(first.into(), operator, second.into(), Connector::Or)
    }

    fn push_column(
        mut self,
        first: Column,
        operator: &str,
        second: Column,
        connector: Connector,
    ) -> Self {
        let operator = if valid_operator(operator) {
            operator.to_string()
        } else {
            "=".to_string()
        };
        self.wheres.push(Condition {
            connector,
            predicate: Predicate::Column {
                first,
                operator,
                second,
            },
        });
        self
    }

    // ==================== WHERE: nested groups ====================

    /// Add a parenthesized group built by a child query scoped to this source.
    ///
    /// The group is merged only if the child produced at least one condition.
    pub fn where_nested(
        self,
        build: impl FnOnce(QueryBuilder) -> OrmResult<QueryBuilder>,
    ) -> OrmResult<Self> {
        let child = build(self.for_nested_where())?;
        Ok(self.add_nested_where(child, Connector::And))
    }

    pub fn or_where_nested(
        self,
        build: impl FnOnce(QueryBuilder) -> OrmResult<QueryBuilder>,
    ) -> OrmResult<Self> {
        let child = build(self.for_nested_where())?;
        Ok(self.add_nested_where(child, Connector::Or))
    }

    pub(crate) fn for_nested_where(&self) -> QueryBuilder {
        let mut query = self.new_query();
        query.from = self.from.clone();
        query
    }

    pub(crate) fn add_nested_where(mut self, child: QueryBuilder, connector: Connector) -> Self {
        if child.wheres.is_empty() {
            return self;
        }
        self.registry.adopt(&child.registry);
        for (key, value) in child.raw_bindings().category(BindingCategory::Where) {
            self.bindings.add(BindingCategory::Where, key, value.clone());
        }
        self.wheres.push(Condition {
            connector,
            predicate: Predicate::Nested {
                query: Box::new(child),
            },
        });
        self
    }

    // ==================== WHERE: in / not in ====================

    /// Bind the whole value set as one array parameter, rendered via `UNNEST`.
    pub fn where_in<V: Into<Value>>(
        self,
        column: impl Into<Column>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        self.push_in_list(column.into(), values, Connector::And, false)
    }

    pub fn where_not_in<V: Into<Value>>(
        self,
        column: impl Into<Column>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        self.push_in_list(column.into(), values, Connector::And, true)
    }

    pub fn or_where_in<V: Into<Value>>(
        self,
        column: impl Into<Column>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        self.push_in_list(column.into(), values, Connector::Or, false)
    }

    pub fn or_where_not_in<V: Into<Value>>(
        self,
        column: impl Into<Column>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        self.push_in_list(column.into(), values, Connector::Or, true)
    }

    fn push_in_list(
        mut self,
        column: Column,
        values: Vec<Value>,
        connector: Connector,
        negated: bool,
    ) -> Self {
        let parameter = self.registry.next_param();
        let empty = values.is_empty();
        self.bindings
            .add(BindingCategory::Where, &parameter, Value::Array(values));
        self.wheres.push(Condition {
            connector,
            predicate: Predicate::In {
                column,
                values: InSource::List { parameter, empty },
                negated,
            },
        });
        self
    }

    /// Filter against a subquery instead of a value set; the subquery's
    /// bindings are merged in place of a value binding.
    pub fn where_in_sub(
        self,
        column: impl Into<Column>,
        query: impl Into<Subquery>,
    ) -> OrmResult<Self> {
        self.push_in_sub(column.into(), query.into(), Connector::And, false)
    }

    pub fn where_not_in_sub(
        self,
        column: impl Into<Column>,
        query: impl Into<Subquery>,
    ) -> OrmResult<Self> {
        self.push_in_sub(column.into(), query.into(), Connector::And, true)
    }

    pub fn or_where_in_sub(
        self,
        column: impl Into<Column>,
        query: impl Into<Subquery>,
    ) -> OrmResult<Self> {
        self.push_in_sub(column.into(), query.into(), Connector::Or, false)
    }

    pub fn or_where_not_in_sub(
        self,
        column: impl Into<Column>,
        query: impl Into<Subquery>,
    ) -> OrmResult<Self> {
        self.push_in_sub(column.into(), query.into(), Connector::Or, true)
    }

    pub fn where_in_with(
        self,
        column: impl Into<Column>,
        build: impl FnOnce(QueryBuilder) -> OrmResult<QueryBuilder>,
    ) -> OrmResult<Self> {
        let child = build(self.for_sub_query())?;
        self.push_in_sub(column.into(), Subquery::Builder(child), Connector::And, false)
    }

    pub fn where_not_in_with(
        self,
        column: impl Into<Column>,
        build: impl FnOnce(QueryBuilder) -> OrmResult<QueryBuilder>,
    ) -> OrmResult<Self> {
        let child = build(self.for_sub_query())?;
        self.push_in_sub(column.into(), Subquery::Builder(child), Connector::And, true)
    }

    pub fn or_where_in_with(
        self,
        column: impl Into<Column>,
        build: impl FnOnce(QueryBuilder) -> OrmResult<QueryBuilder>,
    ) -> OrmResult<Self> {
        let child = build(self.for_sub_query())?;
        self.push_in_sub(column.into(), Subquery::Builder(child), Connector::Or, false)
    }

    pub fn or_where_not_in_with(
        self,
        column: impl Into<Column>,
        build: impl FnOnce(QueryBuilder) -> OrmResult<QueryBuilder>,
    ) -> OrmResult<Self> {
        let child = build(self.for_sub_query())?;
        self.push_in_sub(column.into(), Subquery::Builder(child), Connector::Or, true)
    }

    fn push_in_sub(
        mut self,
        column: Column,
        query: Subquery,
        connector: Connector,
        negated: bool,
    ) -> OrmResult<Self> {
        let (sql, bindings) = self.create_sub(query)?;
        for (key, value) in bindings {
            self.bindings.add(BindingCategory::Where, &key, value);
        }
        self.wheres.push(Condition {
            connector,
            predicate: Predicate::In {
                column,
                values: InSource::Sub(Expression::new(sql)),
                negated,
            },
        });
        Ok(self)
    }

    // ==================== WHERE: null checks ====================

    pub fn where_null(self, column: impl Into<Column>) -> Self {
        self.push_null(column.into(), Connector::And, false)
    }

    pub fn where_not_null(self, column: impl Into<Column>) -> Self {
        self.push_null(column.into(), Connector::And, true)
    }

    pub fn or_where_null(self, column: impl Into<Column>) -> Self {
        self.push_null(column.into(), Connector::Or, false)
    }

    pub fn or_where_not_null(self, column: impl Into<Column>) -> Self {
        self.push_null(column.into(), Connector::Or, true)
    }

    /// Fan out to one `is null` condition per column.
    pub fn where_null_all(mut self, columns: &[&str]) -> Self {
        for column in columns {
            self = self.where_null(*column);
        }
        self
    }

    pub fn where_not_null_all(mut self, columns: &[&str]) -> Self {
        for column in columns {
            self = self.where_not_null(*column);
        }
        self
    }

    fn push_null(mut self, column: Column, connector: Connector, negated: bool) -> Self {
        self.wheres.push(Condition {
            connector,
            predicate: Predicate::Null { column, negated },
        });
        self
    }

    // ==================== WHERE: between ====================

    /// Add `column between @paramN and @paramM`, two ordered placeholders.
    pub fn where_between(
        self,
        column: impl Into<Column>,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Self {
        self.push_between(column.into(), low.into(), high.into(), false)
    }

    pub fn where_not_between(
        self,
        column: impl Into<Column>,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Self {
        self.push_between(column.into(), low.into(), high.into(), true)
    }

    fn push_between(mut self, column: Column, low: Value, high: Value, negated: bool) -> Self {
        let low_param = self.registry.next_param();
        let high_param = self.registry.next_param();
        self.bindings.add(BindingCategory::Where, &low_param, low);
        self.bindings.add(BindingCategory::Where, &high_param, high);
        self.wheres.push(Condition {
            connector: Connector::And,
            predicate: Predicate::Between {
                column,
                parameters: (low_param, high_param),
                negated,
            },
        });
        self
    }

    // ==================== WHERE: exists ====================

    pub fn where_exists(
        self,
        build: impl FnOnce(QueryBuilder) -> OrmResult<QueryBuilder>,
    ) -> OrmResult<Self> {
        self.push_exists(build, Connector::And, false)
    }

    pub fn where_not_exists(
        self,
        build: impl FnOnce(QueryBuilder) -> OrmResult<QueryBuilder>,
    ) -> OrmResult<Self> {
        self.push_exists(build, Connector::And, true)
    }

    pub fn or_where_exists(
        self,
        build: impl FnOnce(QueryBuilder) -> OrmResult<QueryBuilder>,
    ) -> OrmResult<Self> {
        self.push_exists(build, Connector::Or, false)
    }

    pub fn or_where_not_exists(
        self,
        build: impl FnOnce(QueryBuilder) -> OrmResult<QueryBuilder>,
    ) -> OrmResult<Self> {
        self.push_exists(build, Connector::Or, true)
    }

    fn push_exists(
        mut self,
        build: impl FnOnce(QueryBuilder) -> OrmResult<QueryBuilder>,
        connector: Connector,
        negated: bool,
    ) -> OrmResult<Self> {
        let child = build(self.for_sub_query())?;
        self.registry.adopt(&child.registry);
        for (key, value) in child.bindings() {
            self.bindings.add(BindingCategory::Where, &key, value);
        }
        self.wheres.push(Condition {
            connector,
            predicate: Predicate::Exists {
                query: Box::new(child),
                negated,
            },
        });
        Ok(self)
    }

    // ==================== JOIN ====================

    pub fn join(
        self,
        table: &str,
        first: impl Into<Column>,
        operator: &str,
        second: impl Into<Column>,
    ) -> Self {
        let join = JoinClause::new(&self, JoinType::Inner, table).on(first, operator, second);
        self.finish_join(join)
    }

    pub fn left_join(
        self,
        table: &str,
        first: impl Into<Column>,
        operator: &str,
        second: impl Into<Column>,
    ) -> Self {
        let join = JoinClause::new(&self, JoinType::Left, table).on(first, operator, second);
        self.finish_join(join)
    }

    pub fn right_join(
        self,
        table: &str,
        first: impl Into<Column>,
        operator: &str,
        second: impl Into<Column>,
    ) -> Self {
        let join = JoinClause::new(&self, JoinType::Right, table).on(first, operator, second);
        self.finish_join(join)
    }

    pub fn cross_join(self, table: &str) -> Self {
        let join = JoinClause::new(&self, JoinType::Cross, table);
        self.finish_join(join)
    }

    /// Build a join whose ON predicate is configured by a closure.
    pub fn join_with(
        self,
        table: &str,
        build: impl FnOnce(JoinClause) -> OrmResult<JoinClause>,
    ) -> OrmResult<Self> {
        let join = build(JoinClause::new(&self, JoinType::Inner, table))?;
        Ok(self.finish_join(join))
    }

    pub fn left_join_with(
        self,
        table: &str,
        build: impl FnOnce(JoinClause) -> OrmResult<JoinClause>,
    ) -> OrmResult<Self> {
        let join = build(JoinClause::new(&self, JoinType::Left, table))?;
        Ok(self.finish_join(join))
    }

    pub fn right_join_with(
        self,
        table: &str,
        build: impl FnOnce(JoinClause) -> OrmResult<JoinClause>,
    ) -> OrmResult<Self> {
        let join = build(JoinClause::new(&self, JoinType::Right, table))?;
        Ok(self.finish_join(join))
    }

    pub fn cross_join_with(
        self,
        table: &str,
        build: impl FnOnce(JoinClause) -> OrmResult<JoinClause>,
    ) -> OrmResult<Self> {
        let join = build(JoinClause::new(&self, JoinType::Cross, table))?;
        Ok(self.finish_join(join))
    }

    /// Join filtered by a bound value rather than a column comparison.
    pub fn join_where(
        self,
        table: &str,
        first: impl Into<Column>,
        operator: &str,
        value: impl Into<Operand>,
    ) -> OrmResult<Self> {
        let join = JoinClause::new(&self, JoinType::Inner, table).where_(first, operator, value)?;
        Ok(self.finish_join(join))
    }

    fn finish_join(mut self, join: JoinClause) -> Self {
        self.registry.adopt(join.query.registry());
        for (key, value) in join.query.bindings() {
            self.bindings.add(BindingCategory::Join, &key, value);
        }
        self.joins.push(join);
        self
    }

    // ==================== Grouping, having, ordering ====================

    pub fn group_by(mut self, groups: &[&str]) -> Self {
        self.groups.extend(groups.iter().map(|g| (*g).to_string()));
        self
    }

    pub fn having(
        self,
        column: impl Into<Column>,
        operator: &str,
        value: impl Into<Operand>,
    ) -> OrmResult<Self> {
        let value = value.into();
        check_operator_and_value(operator, &value)?;
        Ok(self.push_basic(
            ConditionTarget::Having,
            column.into(),
            operator,
            value,
            Connector::And,
        ))
    }

    pub fn or_having(
        self,
        column: impl Into<Column>,
        operator: &str,
        value: impl Into<Operand>,
    ) -> OrmResult<Self> {
        let value = value.into();
        check_operator_and_value(operator, &value)?;
        Ok(self.push_basic(
            ConditionTarget::Having,
            column.into(),
            operator,
            value,
            Connector::Or,
        ))
    }

    pub fn order_by(mut self, column: impl Into<Column>, direction: &str) -> OrmResult<Self> {
        let direction = Direction::parse(direction)?;
        self.orders.push(OrderBy {
            column: column.into(),
            direction,
        });
        Ok(self)
    }

    pub fn order_by_desc(mut self, column: impl Into<Column>) -> Self {
        self.orders.push(OrderBy {
            column: column.into(),
            direction: Direction::Desc,
        });
        self
    }

    /// Order by a subquery, compiled to a raw `(sql)` order expression.
    pub fn order_by_sub(
        mut self,
        build: impl FnOnce(QueryBuilder) -> OrmResult<QueryBuilder>,
        direction: &str,
    ) -> OrmResult<Self> {
        let direction = Direction::parse(direction)?;
        let child = build(self.for_sub_query())?;
        let (sql, bindings) = self.create_sub(Subquery::Builder(child))?;
        for (key, value) in bindings {
            self.bindings.add(BindingCategory::Order, &key, value);
        }
        self.orders.push(OrderBy {
            column: Column::Raw(Expression::new(format!("({sql})"))),
            direction,
        });
        Ok(self)
    }

    // ==================== Pagination ====================

    /// Set the maximum result count; negative input leaves the builder unchanged.
    pub fn limit(mut self, value: i64) -> Self {
        if value >= 0 {
            self.limit = Some(value);
        }
        self
    }

    /// Alias of [`limit`](Self::limit).
    pub fn take(self, value: i64) -> Self {
        self.limit(value)
    }

    /// Set the result offset; negative input clamps to 0.
    pub fn offset(mut self, value: i64) -> Self {
        self.offset = Some(value.max(0));
        self
    }

    // ==================== Bindings & compilation ====================

    /// Merge named values into a binding category; leading `@` is stripped.
    pub fn add_binding<K, V>(
        mut self,
        values: impl IntoIterator<Item = (K, V)>,
        category: &str,
    ) -> OrmResult<Self>
    where
        K: AsRef<str>,
        V: Into<Value>,
    {
        let category: BindingCategory = category.parse()?;
        for (key, value) in values {
            self.bindings.add(category, key.as_ref(), value.into());
        }
        Ok(self)
    }

    /// Flattened bindings across all categories, in category order.
    pub fn bindings(&self) -> Parameters {
        self.bindings.flatten()
    }

    pub fn raw_bindings(&self) -> &RawBindings {
        &self.bindings
    }

    /// Compile to dialect SQL. Pure; calling twice yields the same string.
    pub fn to_sql(&self) -> String {
        self.grammar.compile(self)
    }

    // ==================== Subquery plumbing ====================

    pub(crate) fn for_sub_query(&self) -> QueryBuilder {
        self.new_query()
    }

    /// Compile a subquery argument to SQL plus its flattened bindings.
    fn create_sub(&mut self, query: Subquery) -> OrmResult<(String, Parameters)> {
        match query {
            Subquery::Builder(query) => {
                self.registry.adopt(&query.registry);
                Ok((query.to_sql(), query.bindings()))
            }
            Subquery::Raw(sql) => {
                if sql.trim().is_empty() {
                    return Err(OrmError::invalid_subquery("empty SQL string"));
                }
                Ok((sql, Parameters::new()))
            }
        }
    }

    // ==================== Terminal operations: reads ====================

    /// Compile, execute, and return all rows.
    pub async fn get(self, conn: &impl Executor) -> OrmResult<Vec<Row>> {
        let sql = self.to_sql();
        let parameters = self.bindings();
        #[cfg(feature = "tracing")]
        tracing::debug!(sql = %sql, parameters = parameters.len(), "executing query");
        conn.execute(&sql, &parameters).await
    }

    /// Like [`get`](Self::get), selecting `columns` first when the builder
    /// has no column list of its own.
    pub async fn get_columns(
        self,
        conn: &impl Executor,
        columns: &[&str],
    ) -> OrmResult<Vec<Row>> {
        let query = if self.columns.is_none() {
            self.select(columns)
        } else {
            self
        };
        query.get(conn).await
    }

    /// `limit 1` plus [`get`](Self::get), returning the first row if any.
    pub async fn first(self, conn: &impl Executor) -> OrmResult<Option<Row>> {
        let rows = self.take(1).get(conn).await?;
        Ok(rows.into_iter().next())
    }

    /// First row's value of one column.
    pub async fn value(mut self, conn: &impl Executor, column: &str) -> OrmResult<Option<Value>> {
        if self.columns.is_none() {
            self = self.select(&[column]);
        }
        Ok(self
            .first(conn)
            .await?
            .and_then(|row| row.first_value().cloned()))
    }

    /// Shorthand for an equality filter on the bound primary key.
    pub async fn find(self, conn: &impl Executor, id: impl Into<Value>) -> OrmResult<Option<Row>> {
        let key = self.primary_key.clone().unwrap_or_else(|| "id".to_string());
        self.where_eq(key, id.into()).first(conn).await
    }

    /// Fetch all rows hydrated into a record type.
    pub async fn fetch_all<M: Model>(self, conn: &impl Executor) -> OrmResult<Vec<M>> {
        let rows = self.get(conn).await?;
        rows.iter().map(M::from_row).collect()
    }

    /// Fetch at most one row hydrated into a record type.
    pub async fn fetch_opt<M: Model>(self, conn: &impl Executor) -> OrmResult<Option<M>> {
        let row = self.first(conn).await?;
        row.as_ref().map(M::from_row).transpose()
    }

    // ==================== Terminal operations: aggregates ====================

    /// Run an aggregate on a copy of this builder and return the single
    /// `aggregate` value of the first row, if any.
    ///
    /// The copy drops the column list and select bindings; without a GROUP BY
    /// it also drops stale ordering.
    pub async fn aggregate(
        &self,
        conn: &impl Executor,
        function: AggregateFunction,
        columns: &[&str],
    ) -> OrmResult<Option<Value>> {
        let mut query = self.clone();
        query.columns = None;
        query.bindings.clear(BindingCategory::Select);
        if query.groups.is_empty() {
            query.orders.clear();
            query.bindings.clear(BindingCategory::Order);
        }
        query.aggregate = Some(Aggregate {
            function,
            columns: columns
                .iter()
                .map(|c| Column::Name((*c).to_string()))
                .collect(),
        });
        let rows = query.get(conn).await?;
        Ok(rows
            .into_iter()
            .next()
            .and_then(|row| row.get("aggregate").cloned()))
    }

    pub async fn count(&self, conn: &impl Executor) -> OrmResult<i64> {
        let result = self
            .aggregate(conn, AggregateFunction::Count, &["*"])
            .await?;
        Ok(result.and_then(|v| v.as_int()).unwrap_or(0))
    }

    pub async fn max(&self, conn: &impl Executor, column: &str) -> OrmResult<Option<Value>> {
        let result = self.aggregate(conn, AggregateFunction::Max, &[column]).await?;
        Ok(result.filter(|v| !v.is_null()))
    }

    pub async fn min(&self, conn: &impl Executor, column: &str) -> OrmResult<Option<Value>> {
        let result = self.aggregate(conn, AggregateFunction::Min, &[column]).await?;
        Ok(result.filter(|v| !v.is_null()))
    }

    pub async fn avg(&self, conn: &impl Executor, column: &str) -> OrmResult<Option<Value>> {
        let result = self.aggregate(conn, AggregateFunction::Avg, &[column]).await?;
        Ok(result.filter(|v| !v.is_null()))
    }

    /// Sum of a column, defaulting to integer 0 when no rows match.
    pub async fn sum(&self, conn: &impl Executor, column: &str) -> OrmResult<Value> {
        let result = self.aggregate(conn, AggregateFunction::Sum, &[column]).await?;
        Ok(match result {
            None | Some(Value::Null) => Value::Int(0),
            Some(value) => value,
        })
    }

    // ==================== Terminal operations: writes ====================

    /// Compile and run an UPDATE inside a transaction.
    ///
    /// One `@value<N>` placeholder is allocated per column, in the given
    /// order; commits on success, attempts rollback on failure.
    pub async fn update(
        mut self,
        conn: &impl Executor,
        values: &[(&str, Value)],
    ) -> OrmResult<CommitTimestamp> {
        let mut assignments = Vec::with_capacity(values.len());
        for (column, value) in values {
            let parameter = self.registry.next_value();
            self.bindings
                .add(BindingCategory::Where, &parameter, value.clone());
            assignments.push(((*column).to_string(), parameter));
        }
        let sql = self.grammar.compile_update(&self, &assignments);
        let parameters = self.bindings();
        run_write(conn, &sql, &parameters).await
    }

    /// Compile and run a DELETE inside a transaction.
    pub async fn delete(self, conn: &impl Executor) -> OrmResult<CommitTimestamp> {
        let sql = self.grammar.compile_delete(&self);
        let parameters = self.bindings();
        run_write(conn, &sql, &parameters).await
    }

    /// DELETE filtered by `table.primary_key = id`.
    pub async fn delete_by_key(
        self,
        conn: &impl Executor,
        id: impl Into<Value>,
    ) -> OrmResult<CommitTimestamp> {
        let key = self.primary_key.clone().unwrap_or_else(|| "id".to_string());
        let column = match &self.from {
            Some(source) => format!("{}.{}", source.raw_name(), key),
            None => key,
        };
        self.where_eq(column, id.into()).delete(conn).await
    }
}

fn check_operator_and_value(operator: &str, value: &Operand) -> OrmResult<()> {
    if !valid_operator(operator) {
        return Err(OrmError::invalid_operator(operator));
    }
    if matches!(value, Operand::Value(Value::Null)) {
        return Err(OrmError::invalid_operator(format!(
            "{operator} paired with a null value"
        )));
    }
    Ok(())
}

async fn run_write(
    conn: &impl Executor,
    sql: &str,
    parameters: &Parameters,
) -> OrmResult<CommitTimestamp> {
    #[cfg(feature = "tracing")]
    tracing::debug!(sql = %sql, parameters = parameters.len(), "executing write transaction");
    let mut tx = conn.begin().await?;
    match tx.execute_update(sql, parameters).await {
        Ok(_) => tx.commit().await,
        Err(err) => {
            let _ = tx.rollback().await;
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qb::table;

    #[test]
    fn test_parameter_numbering_starts_at_one() {
        let qb = table("t").where_eq("a", 1).where_eq("b", 2);
        let bindings = qb.bindings();
        let keys: Vec<&str> = bindings.keys().map(|k| k.as_str()).collect();
        assert_eq!(keys, vec!["param1", "param2"]);
        assert_eq!(bindings.get("param1"), Some(&Value::Int(1)));
        assert_eq!(bindings.get("param2"), Some(&Value::Int(2)));
    }

    #[test]
    fn test_invalid_operator_is_rejected() {
        let err = table("t").where_("a", "%", 1).unwrap_err();
        assert!(matches!(err, OrmError::InvalidOperatorOrValue { .. }));
    }

    #[test]
    fn test_null_value_with_operator_is_rejected() {
        let err = table("t").where_("a", ">", Value::Null).unwrap_err();
        assert!(matches!(err, OrmError::InvalidOperatorOrValue { .. }));
    }

    #[test]
    fn test_where_eq_accepts_null() {
        let qb = table("t").where_eq("a", Value::Null);
        assert_eq!(qb.bindings().get("param1"), Some(&Value::Null));
    }

    #[test]
    fn test_invalid_order_direction_is_rejected() {
        let err = table("t").order_by("a", "sideways").unwrap_err();
        assert!(matches!(
            err,
            OrmError::InvalidOrderDirection { direction } if direction == "sideways"
        ));
    }

    #[test]
    fn test_invalid_binding_category_is_rejected() {
        let err = table("t")
            .add_binding([("k", 1i64)], "sideways")
            .unwrap_err();
        assert!(matches!(err, OrmError::InvalidBindingCategory { .. }));
    }

    #[test]
    fn test_empty_raw_subquery_is_rejected() {
        let err = table("t").where_in_sub("id", "  ").unwrap_err();
        assert!(matches!(err, OrmError::InvalidSubqueryArgument { .. }));
    }

    #[test]
    fn test_where_column_falls_back_to_equals() {
        let qb = table("t").where_column("a", "%", "b");
        assert_eq!(qb.to_sql(), "select * from t where a = b");
    }

    #[test]
    fn test_negative_limit_is_ignored_and_offset_clamped() {
        let qb = table("t").limit(-5).offset(-3);
        assert_eq!(qb.to_sql(), "select * from t offset 0");
    }

    #[test]
    fn test_to_sql_is_idempotent_and_leaves_columns_unset() {
        let qb = table("t").where_eq("a", 1);
        let first = qb.to_sql();
        let second = qb.to_sql();
        assert_eq!(first, second);
        assert!(qb.columns.is_none());
    }

    #[test]
    fn test_empty_nested_group_is_dropped() {
        let qb = table("t").where_nested(Ok).unwrap();
        assert_eq!(qb.to_sql(), "select * from t");
    }

    #[test]
    fn test_nested_numbering_continues_parent_sequence() {
        let qb = table("t")
            .where_eq("a", 1)
            .where_nested(|q| Ok(q.where_eq("b", 2).where_eq("c", 3)))
            .unwrap()
            .where_eq("d", 4);
        let bindings = qb.bindings();
        let keys: Vec<&str> = bindings.keys().map(|k| k.as_str()).collect();
        assert_eq!(keys, vec!["param1", "param2", "param3", "param4"]);
    }

    #[test]
    fn test_in_subquery_numbering_continues_in_parent() {
        let qb = table("t")
            .where_in_with("id", |q| q.from("other").where_("age", ">", 18))
            .unwrap()
            .where_eq("active", true);
        assert_eq!(
            qb.to_sql(),
            "select * from t where id in UNNEST(select * from other where age > @param1) \
             and active = @param2"
        );
        let bindings = qb.bindings();
        let keys: Vec<&str> = bindings.keys().map(|k| k.as_str()).collect();
        assert_eq!(keys, vec!["param1", "param2"]);
    }

    #[test]
    fn test_or_connected_subquery_membership() {
        let qb = table("t")
            .where_eq("active", true)
            .or_where_in_with("id", |q| q.from("other").where_("age", ">", 18))
            .unwrap();
        assert_eq!(
            qb.to_sql(),
            "select * from t where active = @param1 \
             or id in UNNEST(select * from other where age > @param2)"
        );

        let qb = table("t")
            .where_eq("active", true)
            .or_where_not_in_sub("id", "select id from banned")
            .unwrap();
        assert_eq!(
            qb.to_sql(),
            "select * from t where active = @param1 \
             or id not in UNNEST(select id from banned)"
        );
    }

    #[test]
    fn test_add_binding_strips_sigil() {
        let qb = table("t").add_binding([("@custom", 9i64)], "select").unwrap();
        assert_eq!(qb.bindings().get("custom"), Some(&Value::Int(9)));
    }

    #[test]
    fn test_select_resets_select_bindings() {
        let qb = table("t")
            .select_raw("(1) as one", Parameters::from_iter([("sub".to_string(), Value::Int(1))]))
            .select(&["a"]);
        assert!(qb.bindings().is_empty());
        assert_eq!(qb.to_sql(), "select a from t");
    }

    #[test]
    fn test_add_select_sub_defaults_to_table_star() {
        let qb = table("Users")
            .add_select_sub_with(
                |q| Ok(q.from("Orders").select(&["count(*)"])),
                "order_count",
            )
            .unwrap();
        assert_eq!(
            qb.to_sql(),
            "select Users.*, (select count(*) from Orders) as order_count from Users"
        );
    }
}
