//! Target writer abstraction.
//!
//! Units hand the engine parameterized INSERT statements; the writer decides
//! how they reach the target. [`TargetWriter::begin`] opens an explicit
//! transaction so a whole unit (or a group of units) commits or rolls back
//! as one; writes outside a transaction autocommit per statement.

use crate::core::SqlValue;
use crate::error::Result;
use async_trait::async_trait;

mod memory;
mod postgres;

pub use memory::MemoryTarget;
pub use postgres::PgTarget;

/// Writer for the migration target.
#[async_trait]
pub trait TargetWriter: Send + Sync {
    /// Run a single autocommitted statement (DELETE, TRUNCATE, setup DDL).
    async fn execute(&self, sql: &str) -> Result<u64>;

    /// Insert one row outside any transaction. `row` is the 1-based source
    /// ordinal, carried into constraint errors so the poison row is named.
    async fn insert(
        &self,
        table: &str,
        sql: &str,
        values: &[SqlValue],
        row: Option<i64>,
    ) -> Result<u64>;

    /// Open an explicit transaction on a dedicated connection.
    async fn begin(&self) -> Result<Box<dyn TargetTransaction>>;

    /// Row count of a target table, for post-run verification.
    async fn table_count(&self, table: &str) -> Result<i64>;
}

/// An open target transaction. Dropping the handle without a commit rolls
/// the work back; an implementation must never hand its connection back
/// for reuse with the transaction still open.
#[async_trait]
pub trait TargetTransaction: Send {
    async fn execute(&mut self, sql: &str) -> Result<u64>;

    async fn insert(
        &mut self,
        table: &str,
        sql: &str,
        values: &[SqlValue],
        row: Option<i64>,
    ) -> Result<u64>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}
