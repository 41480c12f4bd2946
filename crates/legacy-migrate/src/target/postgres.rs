//! PostgreSQL target writer over a deadpool-postgres pool.

use crate::config::TargetConfig;
use crate::core::SqlValue;
use crate::error::{MigrateError, Result};
use crate::target::{TargetTransaction, TargetWriter};
use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use tokio_postgres::types::ToSql;
use tokio_postgres::NoTls;
use tracing::{info, warn};

/// PostgreSQL target with connection pooling.
pub struct PgTarget {
    pool: Pool,
}

impl PgTarget {
    /// Connect and validate with a probe query.
    pub async fn connect(config: &TargetConfig) -> Result<Self> {
        Self::with_max_connections(config, 8).await
    }

    /// Connect with an explicit pool size.
    pub async fn with_max_connections(config: &TargetConfig, max_size: usize) -> Result<Self> {
        let pg_config: tokio_postgres::Config = config
            .connection_string()
            .parse()
            .map_err(|e: tokio_postgres::Error| {
                MigrateError::Config(format!("invalid target connection string: {}", e))
            })?;

        let manager = Manager::from_config(
            pg_config,
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );
        let pool = Pool::builder(manager)
            .max_size(max_size)
            .build()
            .map_err(|e| MigrateError::target_conn(e.to_string(), "creating target pool"))?;

        {
            let client = pool
                .get()
                .await
                .map_err(|e| MigrateError::target_conn(e.to_string(), "probing target pool"))?;
            client
                .simple_query("SELECT 1")
                .await
                .map_err(|e| MigrateError::target_conn(e.to_string(), "probing target pool"))?;
        }

        info!(
            "Connected to target {} (pool_size={})",
            config.masked(),
            max_size
        );
        Ok(Self { pool })
    }

    pub(crate) async fn client(&self) -> Result<Object> {
        self.pool
            .get()
            .await
            .map_err(|e| MigrateError::target_conn(e.to_string(), "acquiring target connection"))
    }
}

fn params(values: &[SqlValue]) -> Vec<&(dyn ToSql + Sync)> {
    values.iter().map(|v| v as &(dyn ToSql + Sync)).collect()
}

#[async_trait]
impl TargetWriter for PgTarget {
    async fn execute(&self, sql: &str) -> Result<u64> {
        let client = self.client().await?;
        client.execute(sql, &[]).await.map_err(MigrateError::Target)
    }

    async fn insert(
        &self,
        table: &str,
        sql: &str,
        values: &[SqlValue],
        row: Option<i64>,
    ) -> Result<u64> {
        let client = self.client().await?;
        client
            .execute(sql, &params(values))
            .await
            .map_err(|e| MigrateError::classify_pg(table, row, e))
    }

    async fn begin(&self) -> Result<Box<dyn TargetTransaction>> {
        let client = self.client().await?;
        client
            .batch_execute("BEGIN")
            .await
            .map_err(MigrateError::Target)?;
        Ok(Box::new(PgTransaction {
            client: Some(client),
            open: true,
        }))
    }

    async fn table_count(&self, table: &str) -> Result<i64> {
        let client = self.client().await?;
        let row = client
            .query_one(&format!("SELECT COUNT(*) FROM {}", table), &[])
            .await
            .map_err(MigrateError::Target)?;
        Ok(row.get(0))
    }
}

/// Transaction pinned to one pooled connection. BEGIN/COMMIT/ROLLBACK are
/// issued as plain statements so the handle owns the client outright and
/// stays `'static`. The client is `None` only once the handle has closed
/// the transaction.
struct PgTransaction {
    client: Option<Object>,
    open: bool,
}

impl PgTransaction {
    fn client(&self) -> Result<&Object> {
        self.client
            .as_ref()
            .ok_or_else(|| MigrateError::target_conn("transaction already closed", "target write"))
    }
}

#[async_trait]
impl TargetTransaction for PgTransaction {
    async fn execute(&mut self, sql: &str) -> Result<u64> {
        self.client()?
            .execute(sql, &[])
            .await
            .map_err(MigrateError::Target)
    }

    async fn insert(
        &mut self,
        table: &str,
        sql: &str,
        values: &[SqlValue],
        row: Option<i64>,
    ) -> Result<u64> {
        self.client()?
            .execute(sql, &params(values))
            .await
            .map_err(|e| MigrateError::classify_pg(table, row, e))
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        self.open = false;
        let client = self.client()?;
        client
            .batch_execute("COMMIT")
            .await
            .map_err(MigrateError::Target)
    }

    async fn rollback(mut self: Box<Self>) -> Result<()> {
        self.open = false;
        let client = self.client()?;
        client
            .batch_execute("ROLLBACK")
            .await
            .map_err(MigrateError::Target)
    }
}

impl Drop for PgTransaction {
    fn drop(&mut self) {
        if !self.open {
            return;
        }
        // The connection must never reach the pool mid-transaction; the
        // next checkout would silently run inside the stale transaction.
        if let Some(client) = self.client.take() {
            warn!("target transaction dropped without commit; rolling back");
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        if let Err(e) = client.batch_execute("ROLLBACK").await {
                            warn!("rollback of dropped transaction failed: {}", e);
                        }
                    });
                }
                Err(_) => {
                    // No runtime to roll back on; discard the connection
                    // instead of recycling it.
                    drop(Object::take(client));
                }
            }
        }
    }
}
