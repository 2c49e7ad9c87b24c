//! Executor seam: the opaque I/O boundary the builder hands compiled SQL to.
//!
//! Construction and compilation are synchronous and side-effect-free; the only
//! suspending points are [`Executor::execute`] for reads and the
//! begin/execute_update/commit cycle for writes. Failure handling lives on the
//! executor side; errors cross this boundary uninterpreted.

use crate::error::OrmResult;
use crate::row::Row;
use crate::value::Value;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use std::future::Future;

/// Ordered placeholder-name → value map passed to the executor.
///
/// Keys carry no `@` sigil; insertion order is the parameter order.
pub type Parameters = IndexMap<String, Value>;

/// Opaque commit result of a write transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitTimestamp(pub DateTime<Utc>);

impl CommitTimestamp {
    pub fn now() -> Self {
        Self(Utc::now())
    }
}

/// Runs compiled SQL against the database.
///
/// A transaction obtained from [`Executor::begin`] is also usable where a
/// plain statement would run; the builder drives the commit-on-success /
/// rollback-on-error cycle itself.
pub trait Executor: Sync {
    type Transaction: TransactionHandle + Send;

    /// Execute a read statement and return all rows.
    fn execute(
        &self,
        sql: &str,
        parameters: &Parameters,
    ) -> impl Future<Output = OrmResult<Vec<Row>>> + Send;

    /// Open a read-write transaction.
    fn begin(&self) -> impl Future<Output = OrmResult<Self::Transaction>> + Send;
}

/// One open read-write transaction.
pub trait TransactionHandle {
    /// Execute a DML statement, returning the affected row count.
    fn execute_update(
        &mut self,
        sql: &str,
        parameters: &Parameters,
    ) -> impl Future<Output = OrmResult<u64>> + Send;

    /// Commit and return the commit timestamp.
    fn commit(self) -> impl Future<Output = OrmResult<CommitTimestamp>> + Send;

    /// Abandon the transaction.
    fn rollback(self) -> impl Future<Output = OrmResult<()>> + Send;
}

impl<E: Executor> Executor for &E {
    type Transaction = E::Transaction;

    fn execute(
        &self,
        sql: &str,
        parameters: &Parameters,
    ) -> impl Future<Output = OrmResult<Vec<Row>>> + Send {
        (**self).execute(sql, parameters)
    }

    fn begin(&self) -> impl Future<Output = OrmResult<Self::Transaction>> + Send {
        (**self).begin()
    }
}
