//! Source database operations: reading the legacy schema.

mod memory;
mod mssql;

pub use memory::MemorySource;
pub use mssql::MssqlSource;

use crate::core::Batch;
use crate::error::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Read access to the legacy source database.
///
/// The source is read-only throughout a migration; nothing here mutates.
/// [`stream`] returns a channel receiver that yields batches, so large
/// tables are never materialized wholly in memory and the engine suspends
/// at every batch boundary.
///
/// [`stream`]: SourceReader::stream
#[async_trait]
pub trait SourceReader: Send + Sync {
    /// Whether a table exists in the source schema.
    async fn table_exists(&self, table: &str) -> Result<bool>;

    /// Exact row count of a source table, used as the progress total.
    async fn row_count(&self, table: &str) -> Result<i64>;

    /// Run an arbitrary scalar count query (pre-flight validation checks).
    async fn scalar_count(&self, sql: &str) -> Result<i64>;

    /// Start streaming rows for a unit's SELECT.
    ///
    /// A background task populates the channel; backpressure applies when
    /// the receiver falls behind. `table` identifies the logical entity for
    /// error context.
    fn stream(&self, table: &str, sql: &str, batch_size: usize) -> mpsc::Receiver<Result<Batch>>;
}
