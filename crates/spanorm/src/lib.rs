//! Fluent query building and SQL compilation for Cloud Spanner.
//!
//! The crate splits into three layers:
//!
//! - **Building** ([`qb`]): [`QueryBuilder`] accumulates select/where/join/
//!   order clauses through a consuming fluent API, allocating named
//!   `@param<N>` placeholders as values are bound.
//! - **Compilation** ([`qb::grammar`]): [`Grammar`] renders the builder into
//!   dialect SQL, with `in UNNEST(...)` array membership and the joined
//!   UPDATE/DELETE statement forms.
//! - **Execution** ([`executor`]): the [`Executor`] trait is the async seam a
//!   driver implements; reads run as single statements, writes inside a
//!   begin/commit cycle the builder drives.
//!
//! ```ignore
//! use spanorm::prelude::*;
//!
//! let rows = table("Users")
//!     .where_("age", ">", 25)?
//!     .where_in("status", ["active", "trial"])
//!     .order_by_desc("created_at")
//!     .limit(10)
//!     .get(&conn)
//!     .await?;
//! ```

pub mod error;
pub mod executor;
pub mod model;
pub mod qb;
pub mod row;
pub mod value;

pub use error::{OrmError, OrmResult};
pub use executor::{CommitTimestamp, Executor, Parameters, TransactionHandle};
pub use model::Model;
pub use qb::{raw, table, table_as, Expression, Grammar, JoinClause, QueryBuilder};
pub use row::{FromValue, Row};
pub use value::Value;

/// One-line import for application code.
pub mod prelude {
    pub use crate::error::{OrmError, OrmResult};
    pub use crate::executor::{CommitTimestamp, Executor, Parameters, TransactionHandle};
    pub use crate::model::Model;
    pub use crate::qb::{raw, table, table_as, Expression, QueryBuilder};
    pub use crate::row::{FromValue, Row};
    pub use crate::value::Value;
}
