//! Join clauses: a builder scoped to one joined table.

use crate::error::OrmResult;
use crate::executor::Parameters;
use crate::qb::builder::QueryBuilder;
use crate::qb::expr::{Column, Operand, TableRef};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Cross,
}

impl JoinType {
    pub fn as_str(self) -> &'static str {
        match self {
            JoinType::Inner => "inner",
            JoinType::Left => "left",
            JoinType::Right => "right",
            JoinType::Cross => "cross",
        }
    }
}

/// One JOIN: a type, a target table, and an inner query holding the ON
/// conditions.
///
/// The inner query is seeded from the parent builder, so placeholders
/// allocated inside the join continue the parent's numbering; the parent
/// adopts the advanced counters and the join's bindings when the clause is
/// attached.
#[derive(Debug, Clone)]
pub struct JoinClause {
    pub(crate) query: QueryBuilder,
    pub(crate) join_type: JoinType,
    pub(crate) table: TableRef,
}

impl JoinClause {
    pub(crate) fn new(parent: &QueryBuilder, join_type: JoinType, table: &str) -> Self {
        Self {
            query: parent.new_query(),
            join_type,
            table: TableRef::Name(table.to_string()),
        }
    }

    /// Add an `and`-joined column comparison to the ON list.
    pub fn on(mut self, first: impl Into<Column>, operator: &str, second: impl Into<Column>) -> Self {
        self.query = self.query.where_column(first, operator, second);
        self
    }

    /// Add an `or`-joined column comparison to the ON list.
    pub fn or_on(
        mut self,
        first: impl Into<Column>,
        operator: &str,
        second: impl Into<Column>,
    ) -> Self {
        self.query = self.query.or_where_column(first, operator, second);
        self
    }

    // The where family lands in the same ON list, so joins can mix column
    // comparisons with bound values.

    pub fn where_(
        mut self,
        column: impl Into<Column>,
        operator: &str,
        value: impl Into<Operand>,
    ) -> OrmResult<Self> {
        self.query = self.query.where_(column, operator, value)?;
        Ok(self)
    }

    pub fn or_where(
        mut self,
        column: impl Into<Column>,
        operator: &str,
        value: impl Into<Operand>,
    ) -> OrmResult<Self> {
        self.query = self.query.or_where(column, operator, value)?;
        Ok(self)
    }

    pub fn where_eq(mut self, column: impl Into<Column>, value: impl Into<Operand>) -> Self {
        self.query = self.query.where_eq(column, value);
        self
    }

    pub fn or_where_eq(mut self, column: impl Into<Column>, value: impl Into<Operand>) -> Self {
        self.query = self.query.or_where_eq(column, value);
        self
    }

    pub fn where_in<V: Into<Value>>(
        mut self,
        column: impl Into<Column>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.query = self.query.where_in(column, values);
        self
    }

    pub fn where_not_in<V: Into<Value>>(
        mut self,
        column: impl Into<Column>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.query = self.query.where_not_in(column, values);
        self
    }

    pub fn where_null(mut self, column: impl Into<Column>) -> Self {
        self.query = self.query.where_null(column);
        self
    }

    pub fn where_not_null(mut self, column: impl Into<Column>) -> Self {
        self.query = self.query.where_not_null(column);
        self
    }

    pub fn where_between(
        mut self,
        column: impl Into<Column>,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Self {
        self.query = self.query.where_between(column, low, high);
        self
    }

    pub fn where_nested(
        mut self,
        build: impl FnOnce(QueryBuilder) -> OrmResult<QueryBuilder>,
    ) -> OrmResult<Self> {
        self.query = self.query.where_nested(build)?;
        Ok(self)
    }

    pub fn or_where_nested(
        mut self,
        build: impl FnOnce(QueryBuilder) -> OrmResult<QueryBuilder>,
    ) -> OrmResult<Self> {
        self.query = self.query.or_where_nested(build)?;
        Ok(self)
    }

    /// Nest a further join inside this one; the pair renders parenthesized.
    pub fn join(
        mut self,
        table: &str,
        first: impl Into<Column>,
        operator: &str,
        second: impl Into<Column>,
    ) -> Self {
        self.query = self.query.join(table, first, operator, second);
        self
    }

    /// Fresh sibling clause against the same table, counters continued.
    pub fn new_query(&self) -> JoinClause {
        JoinClause {
            query: self.query.new_query(),
            join_type: self.join_type,
            table: self.table.clone(),
        }
    }

    /// Fresh plain builder for subqueries used inside the ON conditions.
    pub fn for_sub_query(&self) -> QueryBuilder {
        self.query.for_sub_query()
    }

    pub fn bindings(&self) -> Parameters {
        self.query.bindings()
    }
}
