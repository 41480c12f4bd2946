//! Attachment binary copy, the long-running job this subsystem exists for.
//!
//! Legacy attachments store their binary payload in the source row; the
//! redesigned schema keeps it in a separate binary table. The copy lists
//! every attachment with its size, then fetches and writes the payloads in
//! batches, skipping empty and oversized binaries rather than failing.

use crate::error::{MigrateError, Result};
use crate::jobs::{JobContext, JobTask};
use crate::source::MssqlSource;
use crate::target::PgTarget;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tiberius::Query;
use tracing::debug;

/// One attachment's identity and payload size, from the listing pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachmentRef {
    pub id: i64,
    pub size: i64,
}

/// One attachment payload ready to write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentPayload {
    pub id: i64,
    pub data: Vec<u8>,
}

/// Source side of the copy: count, list in id order, fetch by id.
#[async_trait]
pub trait AttachmentSource: Send + Sync {
    async fn count(&self) -> Result<i64>;
    async fn list(&self) -> Result<Vec<AttachmentRef>>;
    async fn fetch(&self, id: i64) -> Result<Option<Vec<u8>>>;
}

/// Target side of the copy: write one batch of payloads.
#[async_trait]
pub trait AttachmentWriter: Send + Sync {
    async fn write_batch(&self, batch: &[AttachmentPayload]) -> Result<u64>;
}

/// The background job: stream attachment binaries source to target.
pub struct AttachmentCopyTask {
    table_name: String,
    source: Arc<dyn AttachmentSource>,
    writer: Arc<dyn AttachmentWriter>,
    batch_size: usize,
    max_bytes: i64,
}

impl AttachmentCopyTask {
    pub fn new(
        table_name: impl Into<String>,
        source: Arc<dyn AttachmentSource>,
        writer: Arc<dyn AttachmentWriter>,
        batch_size: usize,
        max_bytes: i64,
    ) -> Self {
        Self {
            table_name: table_name.into(),
            source,
            writer,
            batch_size: batch_size.max(1),
            max_bytes,
        }
    }
}

#[async_trait]
impl JobTask for AttachmentCopyTask {
    fn table_name(&self) -> &str {
        &self.table_name
    }

    async fn run(&self, ctx: JobContext) -> Result<()> {
        let total = self.source.count().await?;
        ctx.set_total(total);
        ctx.set_operation("Listing attachments");

        let refs = self.source.list().await?;
        let mut processed: i64 = 0;
        let mut skipped: i64 = 0;

        for chunk in refs.chunks(self.batch_size) {
            if ctx.cancelled() {
                return Err(MigrateError::Cancelled);
            }

            let mut payloads = Vec::with_capacity(chunk.len());
            for item in chunk {
                processed += 1;
                if item.size <= 0 {
                    skipped += 1;
                    debug!("attachment {}: empty binary data, skipped", item.id);
                    continue;
                }
                if item.size > self.max_bytes {
                    skipped += 1;
                    debug!(
                        "attachment {}: binary too large ({} bytes), skipped",
                        item.id, item.size
                    );
                    continue;
                }
                match self.source.fetch(item.id).await? {
                    Some(data) if !data.is_empty() => {
                        payloads.push(AttachmentPayload { id: item.id, data })
                    }
                    _ => {
                        skipped += 1;
                        debug!("attachment {}: no payload on fetch, skipped", item.id);
                    }
                }
            }

            if !payloads.is_empty() {
                self.writer.write_batch(&payloads).await?;
            }

            ctx.advance(processed, skipped);
            ctx.set_operation(&format!(
                "Copied {}/{} attachments ({} skipped)",
                processed, total, skipped
            ));
        }

        Ok(())
    }
}

/// Attachment source over the SQL Server reader.
pub struct MssqlAttachmentSource {
    source: Arc<MssqlSource>,
    table: String,
    id_column: String,
    data_column: String,
}

impl MssqlAttachmentSource {
    pub fn new(
        source: Arc<MssqlSource>,
        table: impl Into<String>,
        id_column: impl Into<String>,
        data_column: impl Into<String>,
    ) -> Self {
        Self {
            source,
            table: table.into(),
            id_column: id_column.into(),
            data_column: data_column.into(),
        }
    }
}

#[async_trait]
impl AttachmentSource for MssqlAttachmentSource {
    async fn count(&self) -> Result<i64> {
        let mut client = self.source.get_client().await?;
        let sql = format!("SELECT CAST(COUNT(*) AS BIGINT) FROM [{}]", self.table);
        let row = client
            .simple_query(&sql)
            .await
            .map_err(MigrateError::Source)?
            .into_row()
            .await
            .map_err(MigrateError::Source)?;
        Ok(row
            .and_then(|r| r.try_get::<i64, _>(0).ok().flatten())
            .unwrap_or(0))
    }

    async fn list(&self) -> Result<Vec<AttachmentRef>> {
        let mut client = self.source.get_client().await?;
        let sql = format!(
            "SELECT [{id}], CAST(ISNULL(DATALENGTH([{data}]), 0) AS BIGINT) \
             FROM [{table}] ORDER BY [{id}]",
            id = self.id_column,
            data = self.data_column,
            table = self.table,
        );
        let rows = client
            .simple_query(&sql)
            .await
            .map_err(MigrateError::Source)?
            .into_first_result()
            .await
            .map_err(MigrateError::Source)?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let id = row.try_get::<i64, _>(0).ok().flatten().or_else(|| {
                    row.try_get::<i32, _>(0).ok().flatten().map(|v| v as i64)
                })?;
                let size = row.try_get::<i64, _>(1).ok().flatten().unwrap_or(0);
                Some(AttachmentRef { id, size })
            })
            .collect())
    }

    async fn fetch(&self, id: i64) -> Result<Option<Vec<u8>>> {
        let mut client = self.source.get_client().await?;
        let sql = format!(
            "SELECT [{}] FROM [{}] WHERE [{}] = @P1",
            self.data_column, self.table, self.id_column
        );
        let mut query = Query::new(sql);
        query.bind(id);

        let row = query
            .query(&mut client)
            .await
            .map_err(MigrateError::Source)?
            .into_row()
            .await
            .map_err(MigrateError::Source)?;
        Ok(row.and_then(|r| {
            r.try_get::<&[u8], _>(0)
                .ok()
                .flatten()
                .map(|bytes| bytes.to_vec())
        }))
    }
}

/// Attachment writer that merges payloads into the target binary table by
/// unnesting an id array and a payload array in one statement.
pub struct PgAttachmentWriter {
    target: Arc<PgTarget>,
    table: String,
    merge_sql: String,
}

impl PgAttachmentWriter {
    pub fn new(
        target: Arc<PgTarget>,
        table: impl Into<String>,
        id_column: &str,
        data_column: &str,
    ) -> Self {
        let table = table.into();
        let merge_sql = format!(
            "INSERT INTO {table} ({id}, {data}) \
             SELECT * FROM unnest($1::bigint[], $2::bytea[]) \
             ON CONFLICT ({id}) DO UPDATE SET {data} = EXCLUDED.{data}",
            table = table,
            id = id_column,
            data = data_column,
        );
        Self {
            target,
            table,
            merge_sql,
        }
    }
}

#[async_trait]
impl AttachmentWriter for PgAttachmentWriter {
    async fn write_batch(&self, batch: &[AttachmentPayload]) -> Result<u64> {
        let ids: Vec<i64> = batch.iter().map(|p| p.id).collect();
        let blobs: Vec<&[u8]> = batch.iter().map(|p| p.data.as_slice()).collect();

        let client = self.target.client().await?;
        client
            .execute(&self.merge_sql, &[&ids, &blobs])
            .await
            .map_err(|e| MigrateError::classify_pg(&self.table, None, e))
    }
}

/// In-memory attachment source; sizes may lie about the payload to
/// exercise the oversize rule without allocating it.
#[derive(Default)]
pub struct MemoryAttachmentSource {
    items: Vec<(AttachmentRef, Vec<u8>)>,
}

impl MemoryAttachmentSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_payload(mut self, id: i64, data: Vec<u8>) -> Self {
        let size = data.len() as i64;
        self.items.push((AttachmentRef { id, size }, data));
        self
    }

    /// Register an attachment whose listed size differs from its payload.
    pub fn with_sized(mut self, id: i64, size: i64) -> Self {
        self.items.push((AttachmentRef { id, size }, Vec::new()));
        self
    }
}

#[async_trait]
impl AttachmentSource for MemoryAttachmentSource {
    async fn count(&self) -> Result<i64> {
        Ok(self.items.len() as i64)
    }

    async fn list(&self) -> Result<Vec<AttachmentRef>> {
        Ok(self.items.iter().map(|(r, _)| *r).collect())
    }

    async fn fetch(&self, id: i64) -> Result<Option<Vec<u8>>> {
        Ok(self
            .items
            .iter()
            .find(|(r, _)| r.id == id)
            .map(|(_, data)| data.clone()))
    }
}

/// In-memory attachment writer recording every batch.
#[derive(Clone, Default)]
pub struct MemoryAttachmentWriter {
    batches: Arc<Mutex<Vec<Vec<AttachmentPayload>>>>,
}

impl MemoryAttachmentWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batches(&self) -> Vec<Vec<AttachmentPayload>> {
        self.batches.lock().unwrap().clone()
    }

    pub fn written_ids(&self) -> Vec<i64> {
        self.batches
            .lock()
            .unwrap()
            .iter()
            .flatten()
            .map(|p| p.id)
            .collect()
    }
}

#[async_trait]
impl AttachmentWriter for MemoryAttachmentWriter {
    async fn write_batch(&self, batch: &[AttachmentPayload]) -> Result<u64> {
        self.batches.lock().unwrap().push(batch.to_vec());
        Ok(batch.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sized_source_lists_declared_size() {
        let size = 300 * 1024 * 1024;
        let source = MemoryAttachmentSource::new().with_sized(1, size);
        let refs = source.list().await.unwrap();
        assert_eq!(refs, vec![AttachmentRef { id: 1, size }]);
        // The oversize payload itself never materializes.
        assert_eq!(source.fetch(1).await.unwrap(), Some(Vec::new()));
    }
}
