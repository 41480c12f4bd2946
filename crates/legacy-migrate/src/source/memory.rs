//! In-memory source reader used by tests and dry runs.

use crate::core::Batch;
use crate::error::{MigrateError, Result};
use crate::source::SourceReader;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::mpsc;

/// Source backed by in-memory tables, keyed by lowercased table name.
#[derive(Default)]
pub struct MemorySource {
    tables: HashMap<String, Batch>,
    scalar_results: HashMap<String, i64>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a table. Streaming ignores the SQL text and replays the
    /// registered rows in order.
    pub fn with_table(mut self, name: &str, batch: Batch) -> Self {
        self.tables.insert(name.to_lowercase(), batch);
        self
    }

    /// Register a canned result for an exact scalar query string.
    pub fn with_scalar(mut self, sql: &str, value: i64) -> Self {
        self.scalar_results.insert(sql.to_string(), value);
        self
    }

    fn table(&self, name: &str) -> Result<&Batch> {
        self.tables
            .get(&name.to_lowercase())
            .ok_or_else(|| MigrateError::TableNotFound(name.to_string()))
    }
}

#[async_trait]
impl SourceReader for MemorySource {
    async fn table_exists(&self, table: &str) -> Result<bool> {
        Ok(self.tables.contains_key(&table.to_lowercase()))
    }

    async fn row_count(&self, table: &str) -> Result<i64> {
        Ok(self.table(table)?.len() as i64)
    }

    async fn scalar_count(&self, sql: &str) -> Result<i64> {
        self.scalar_results
            .get(sql)
            .copied()
            .ok_or_else(|| MigrateError::Validation(format!("no canned result for: {}", sql)))
    }

    fn stream(&self, table: &str, _sql: &str, batch_size: usize) -> mpsc::Receiver<Result<Batch>> {
        let (tx, rx) = mpsc::channel::<Result<Batch>>(4);
        let source = self.table(table).cloned();

        tokio::spawn(async move {
            let batch = match source {
                Ok(b) => b,
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                    return;
                }
            };

            for chunk in batch.rows.chunks(batch_size.max(1)) {
                let piece = Batch {
                    columns: batch.columns.clone(),
                    rows: chunk.to_vec(),
                };
                if tx.send(Ok(piece)).await.is_err() {
                    return;
                }
            }
        });

        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SqlValue;

    fn three_rows() -> Batch {
        Batch {
            columns: vec!["Id".into()],
            rows: (1..=3).map(|i| vec![SqlValue::I64(i)]).collect(),
        }
    }

    #[tokio::test]
    async fn streams_in_batches() {
        let source = MemorySource::new().with_table("Items", three_rows());
        let mut rx = source.stream("items", "SELECT Id FROM Items", 2);

        let first = rx.recv().await.unwrap().unwrap();
        assert_eq!(first.len(), 2);
        let second = rx.recv().await.unwrap().unwrap();
        assert_eq!(second.len(), 1);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn missing_table_errors() {
        let source = MemorySource::new();
        assert!(!source.table_exists("Nope").await.unwrap());
        assert!(source.row_count("Nope").await.is_err());

        let mut rx = source.stream("Nope", "SELECT 1", 10);
        assert!(rx.recv().await.unwrap().is_err());
    }
}
