//! Record mapping seam: typed hydration of result rows.

use crate::error::OrmResult;
use crate::qb::QueryBuilder;
use crate::row::Row;

/// A record type bound to a table.
///
/// Declares the table name, the primary key, and the row → record mapping.
/// Field-to-column mapping is explicit (`from_row`), never reflective.
///
/// ```ignore
/// struct User {
///     id: i64,
///     name: String,
/// }
///
/// impl Model for User {
///     fn table_name() -> &'static str {
///         "Users"
///     }
///
///     fn from_row(row: &Row) -> OrmResult<Self> {
///         Ok(User {
///             id: row.try_get("id")?,
///             name: row.try_get("name")?,
///         })
///     }
/// }
///
/// let users = User::query().where_eq("active", true).fetch_all::<User>(&conn).await?;
/// ```
pub trait Model: Sized {
    /// Table this record maps to.
    fn table_name() -> &'static str;

    /// Primary key column, `id` unless overridden.
    fn primary_key() -> &'static str {
        "id"
    }

    /// Hydrate one record from a result row.
    fn from_row(row: &Row) -> OrmResult<Self>;

    /// Fresh query builder scoped to this record's table and key.
    fn query() -> QueryBuilder {
        QueryBuilder::new()
            .from(Self::table_name())
            .key(Self::primary_key())
    }
}
