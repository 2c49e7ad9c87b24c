//! Query construction and SQL compilation.
//!
//! [`QueryBuilder`] accumulates clauses through a consuming fluent API and
//! compiles to SQL with named `@param<N>` / `@value<N>` placeholders; the
//! bound values travel beside the SQL as an ordered name → value map. Array
//! membership renders as `in UNNEST(...)`, and write statements support the
//! joined UPDATE/DELETE forms.
//!
//! ```ignore
//! use spanorm::qb::table;
//!
//! let query = table("Users")
//!     .where_("age", ">", 25)?
//!     .where_in("status", ["active", "trial"])
//!     .order_by_desc("created_at")
//!     .limit(10);
//!
//! assert_eq!(
//!     query.to_sql(),
//!     "select * from Users where age > @param1 and status in UNNEST(@param2) \
//!      order by created_at desc limit 10",
//! );
//! let rows = query.get(&conn).await?;
//! ```

pub mod builder;
pub mod expr;
pub mod grammar;
pub mod join;
pub mod param;


pub use builder::{AggregateFunction, QueryBuilder};
pub use expr::{Column, Expression, Operand, Subquery, TableRef};
pub use grammar::Grammar;
pub use join::{JoinClause, JoinType};
pub use param::{BindingCategory, ParamRegistry, RawBindings};

/// Fresh builder scoped to a table.
pub fn table(name: &str) -> QueryBuilder {
    QueryBuilder::new().from(name)
}

/// Fresh builder scoped to an aliased table.
pub fn table_as(name: &str, alias: &str) -> QueryBuilder {
    QueryBuilder::new().from_as(name, alias)
}

/// Raw SQL fragment, rendered verbatim wherever a column or value goes.
pub fn raw(sql: impl Into<String>) -> Expression {
    Expression::new(sql)
}
