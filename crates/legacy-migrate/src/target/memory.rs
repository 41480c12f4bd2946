//! In-memory target writer used by tests and dry runs.

use crate::core::SqlValue;
use crate::error::{MigrateError, Result};
use crate::target::{TargetTransaction, TargetWriter};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Predicate deciding whether a row violates a simulated constraint.
/// Returns the violation detail when it does.
type ConstraintCheck = dyn Fn(&str, &[SqlValue]) -> Option<String> + Send + Sync;

#[derive(Default)]
struct Store {
    tables: HashMap<String, Vec<Vec<SqlValue>>>,
    executed: Vec<String>,
}

/// Target backed by in-memory tables, keyed by lowercased table name.
///
/// An optional constraint predicate lets tests simulate a poison row that
/// the real target would reject.
#[derive(Clone)]
pub struct MemoryTarget {
    store: Arc<Mutex<Store>>,
    check: Option<Arc<ConstraintCheck>>,
}

impl Default for MemoryTarget {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTarget {
    pub fn new() -> Self {
        Self {
            store: Arc::new(Mutex::new(Store::default())),
            check: None,
        }
    }

    /// Install a constraint predicate applied to every insert.
    pub fn with_constraint<F>(mut self, check: F) -> Self
    where
        F: Fn(&str, &[SqlValue]) -> Option<String> + Send + Sync + 'static,
    {
        self.check = Some(Arc::new(check));
        self
    }

    /// Committed rows of a table, in insert order.
    pub fn rows(&self, table: &str) -> Vec<Vec<SqlValue>> {
        self.store
            .lock()
            .unwrap()
            .tables
            .get(&table.to_lowercase())
            .cloned()
            .unwrap_or_default()
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.rows(table).len()
    }

    /// Statements run through `execute`, committed order.
    pub fn executed(&self) -> Vec<String> {
        self.store.lock().unwrap().executed.clone()
    }

    fn violation(&self, table: &str, values: &[SqlValue]) -> Option<String> {
        self.check.as_ref().and_then(|check| check(table, values))
    }
}

#[async_trait]
impl TargetWriter for MemoryTarget {
    async fn execute(&self, sql: &str) -> Result<u64> {
        self.store.lock().unwrap().executed.push(sql.to_string());
        Ok(0)
    }

    async fn insert(
        &self,
        table: &str,
        _sql: &str,
        values: &[SqlValue],
        row: Option<i64>,
    ) -> Result<u64> {
        if let Some(detail) = self.violation(table, values) {
            return Err(MigrateError::constraint(table, row, detail));
        }
        self.store
            .lock()
            .unwrap()
            .tables
            .entry(table.to_lowercase())
            .or_default()
            .push(values.to_vec());
        Ok(1)
    }

    async fn begin(&self) -> Result<Box<dyn TargetTransaction>> {
        Ok(Box::new(MemoryTransaction {
            target: self.clone(),
            pending_rows: Vec::new(),
            pending_statements: Vec::new(),
        }))
    }

    async fn table_count(&self, table: &str) -> Result<i64> {
        Ok(self.row_count(table) as i64)
    }
}

/// Buffers writes and applies them on commit; rollback drops the buffer.
/// Constraint checks still run at insert time, matching when a real
/// target raises them.
struct MemoryTransaction {
    target: MemoryTarget,
    pending_rows: Vec<(String, Vec<SqlValue>)>,
    pending_statements: Vec<String>,
}

#[async_trait]
impl TargetTransaction for MemoryTransaction {
    async fn execute(&mut self, sql: &str) -> Result<u64> {
        self.pending_statements.push(sql.to_string());
        Ok(0)
    }

    async fn insert(
        &mut self,
        table: &str,
        _sql: &str,
        values: &[SqlValue],
        row: Option<i64>,
    ) -> Result<u64> {
        if let Some(detail) = self.target.violation(table, values) {
            return Err(MigrateError::constraint(table, row, detail));
        }
        self.pending_rows
            .push((table.to_lowercase(), values.to_vec()));
        Ok(1)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut store = self.target.store.lock().unwrap();
        store.executed.extend(self.pending_statements);
        for (table, values) in self.pending_rows {
            store.tables.entry(table).or_default().push(values);
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: i64) -> Vec<SqlValue> {
        vec![SqlValue::I64(id)]
    }

    #[tokio::test]
    async fn autocommit_insert_is_visible_immediately() {
        let target = MemoryTarget::new();
        target
            .insert("Items", "INSERT ...", &row(1), Some(1))
            .await
            .unwrap();
        assert_eq!(target.row_count("items"), 1);
    }

    #[tokio::test]
    async fn rollback_discards_buffered_rows() {
        let target = MemoryTarget::new();
        let mut tx = target.begin().await.unwrap();
        tx.insert("Items", "INSERT ...", &row(1), Some(1))
            .await
            .unwrap();
        tx.rollback().await.unwrap();
        assert_eq!(target.row_count("items"), 0);
    }

    #[tokio::test]
    async fn dropping_an_open_transaction_rolls_back() {
        let target = MemoryTarget::new();
        {
            let mut tx = target.begin().await.unwrap();
            tx.insert("Items", "INSERT ...", &row(1), Some(1))
                .await
                .unwrap();
            tx.execute("DELETE FROM items").await.unwrap();
        }
        assert_eq!(target.row_count("items"), 0);
        assert!(target.executed().is_empty());
    }

    #[tokio::test]
    async fn commit_applies_buffered_rows_in_order() {
        let target = MemoryTarget::new();
        let mut tx = target.begin().await.unwrap();
        tx.execute("DELETE FROM items").await.unwrap();
        tx.insert("Items", "INSERT ...", &row(1), Some(1))
            .await
            .unwrap();
        tx.insert("Items", "INSERT ...", &row(2), Some(2))
            .await
            .unwrap();
        tx.commit().await.unwrap();
        assert_eq!(target.rows("items"), vec![row(1), row(2)]);
        assert_eq!(target.executed(), vec!["DELETE FROM items".to_string()]);
    }

    #[tokio::test]
    async fn constraint_predicate_names_the_row() {
        let target = MemoryTarget::new().with_constraint(|_, values| {
            matches!(values.first(), Some(SqlValue::I64(7))).then(|| "duplicate key".to_string())
        });
        let err = target
            .insert("Items", "INSERT ...", &row(7), Some(7))
            .await
            .unwrap_err();
        match err {
            MigrateError::Constraint { row, .. } => assert_eq!(row, Some(7)),
            other => panic!("unexpected error: {}", other),
        }
    }
}
