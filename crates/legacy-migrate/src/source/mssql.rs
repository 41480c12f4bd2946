//! SQL Server source reader over a bb8/tiberius connection pool.

use crate::config::SourceConfig;
use crate::core::{Batch, SqlNullType, SqlValue};
use crate::error::{MigrateError, Result};
use crate::source::SourceReader;
use async_trait::async_trait;
use bb8::{Pool, PooledConnection};
use futures::TryStreamExt;
use tiberius::{AuthMethod, Client, ColumnType, Config, EncryptionLevel, Query, QueryItem, Row};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info};

/// Connection manager for bb8 pool with tiberius.
#[derive(Clone)]
pub(crate) struct TiberiusConnectionManager {
    config: SourceConfig,
}

impl TiberiusConnectionManager {
    fn new(config: SourceConfig) -> Self {
        Self { config }
    }

    fn build_config(&self) -> Config {
        let mut config = Config::new();
        config.host(&self.config.host);
        config.port(self.config.port);
        config.database(&self.config.database);
        config.authentication(AuthMethod::sql_server(&self.config.user, &self.config.password));

        match self.config.encrypt.to_lowercase().as_str() {
            "false" | "no" | "0" | "disable" => {
                config.encryption(EncryptionLevel::NotSupported);
            }
            _ => {
                if self.config.trust_server_cert {
                    config.trust_cert();
                }
                config.encryption(EncryptionLevel::Required);
            }
        }

        config
    }
}

#[async_trait]
impl bb8::ManageConnection for TiberiusConnectionManager {
    type Connection = Client<Compat<TcpStream>>;
    type Error = tiberius::error::Error;

    async fn connect(&self) -> std::result::Result<Self::Connection, Self::Error> {
        let config = self.build_config();
        let tcp = TcpStream::connect(config.get_addr())
            .await
            .map_err(|e| tiberius::error::Error::Io {
                kind: e.kind(),
                message: e.to_string(),
            })?;

        tcp.set_nodelay(true).ok();

        Client::connect(config, tcp.compat_write()).await
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> std::result::Result<(), Self::Error> {
        conn.simple_query("SELECT 1").await?.into_row().await?;
        Ok(())
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

/// SQL Server source with connection pooling.
pub struct MssqlSource {
    pool: Pool<TiberiusConnectionManager>,
}

impl MssqlSource {
    /// Connect and validate with a probe query.
    pub async fn connect(config: SourceConfig) -> Result<Self> {
        Self::with_max_connections(config, 8).await
    }

    /// Connect with an explicit pool size.
    pub async fn with_max_connections(config: SourceConfig, max_size: u32) -> Result<Self> {
        let masked = config.masked();
        let manager = TiberiusConnectionManager::new(config);
        let pool = Pool::builder()
            .max_size(max_size)
            .min_idle(Some(1))
            .build(manager)
            .await
            .map_err(|e| MigrateError::source_conn(e.to_string(), "creating source pool"))?;

        {
            let mut conn = pool
                .get()
                .await
                .map_err(|e| MigrateError::source_conn(e.to_string(), "probing source pool"))?;
            conn.simple_query("SELECT 1")
                .await
                .map_err(MigrateError::Source)?
                .into_row()
                .await
                .map_err(MigrateError::Source)?;
        }

        info!("Connected to source {} (pool_size={})", masked, max_size);
        Ok(Self { pool })
    }

    pub(crate) async fn get_client(
        &self,
    ) -> Result<PooledConnection<'_, TiberiusConnectionManager>> {
        self.pool
            .get()
            .await
            .map_err(|e| MigrateError::source_conn(e.to_string(), "acquiring source connection"))
    }

    async fn scalar_i64(&self, sql: &str) -> Result<i64> {
        let mut client = self.get_client().await?;
        let stream = client.simple_query(sql).await.map_err(MigrateError::Source)?;
        let row = stream.into_row().await.map_err(MigrateError::Source)?;
        Ok(row.and_then(|r| read_i64(&r, 0)).unwrap_or(0))
    }
}

/// Read an integer scalar regardless of the width the server chose.
fn read_i64(row: &Row, idx: usize) -> Option<i64> {
    row.try_get::<i64, _>(idx)
        .ok()
        .flatten()
        .or_else(|| row.try_get::<i32, _>(idx).ok().flatten().map(|v| v as i64))
        .or_else(|| row.try_get::<i16, _>(idx).ok().flatten().map(|v| v as i64))
}

#[async_trait]
impl SourceReader for MssqlSource {
    async fn table_exists(&self, table: &str) -> Result<bool> {
        let mut client = self.get_client().await?;
        let mut query = Query::new(
            "SELECT COUNT(*) FROM INFORMATION_SCHEMA.TABLES WHERE TABLE_NAME = @P1",
        );
        query.bind(table);

        let stream = query.query(&mut client).await.map_err(MigrateError::Source)?;
        let row = stream.into_row().await.map_err(MigrateError::Source)?;
        Ok(row.and_then(|r| read_i64(&r, 0)).unwrap_or(0) > 0)
    }

    async fn row_count(&self, table: &str) -> Result<i64> {
        self.scalar_i64(&format!(
            "SELECT CAST(COUNT(*) AS BIGINT) FROM [{}]",
            table
        ))
        .await
    }

    async fn scalar_count(&self, sql: &str) -> Result<i64> {
        self.scalar_i64(sql).await
    }

    fn stream(&self, table: &str, sql: &str, batch_size: usize) -> mpsc::Receiver<Result<Batch>> {
        let (tx, rx) = mpsc::channel::<Result<Batch>>(4);
        let pool = self.pool.clone();
        let sql = sql.to_string();
        let table = table.to_string();

        tokio::spawn(async move {
            let mut client = match pool.get().await {
                Ok(c) => c,
                Err(e) => {
                    let _ = tx
                        .send(Err(MigrateError::source_conn(
                            e.to_string(),
                            format!("streaming {}", table),
                        )))
                        .await;
                    return;
                }
            };

            let mut stream = match client.simple_query(&sql).await {
                Ok(s) => s,
                Err(e) => {
                    let _ = tx.send(Err(MigrateError::Source(e))).await;
                    return;
                }
            };

            let mut columns: Vec<String> = Vec::new();
            let mut col_types: Vec<ColumnType> = Vec::new();
            let mut batch = Batch::default();
            let mut total = 0i64;

            loop {
                match stream.try_next().await {
                    Ok(Some(QueryItem::Metadata(meta))) => {
                        columns = meta.columns().iter().map(|c| c.name().to_string()).collect();
                        col_types = meta.columns().iter().map(|c| c.column_type()).collect();
                        batch = Batch::new(columns.clone());
                    }
                    Ok(Some(QueryItem::Row(row))) => {
                        if columns.is_empty() {
                            columns = row.columns().iter().map(|c| c.name().to_string()).collect();
                            col_types =
                                row.columns().iter().map(|c| c.column_type()).collect();
                            batch = Batch::new(columns.clone());
                        }
                        let values = (0..columns.len())
                            .map(|idx| convert_cell(&row, idx, col_types[idx]))
                            .collect();
                        batch.rows.push(values);
                        total += 1;

                        if batch.rows.len() >= batch_size {
                            let full = std::mem::replace(&mut batch, Batch::new(columns.clone()));
                            if tx.send(Ok(full)).await.is_err() {
                                return; // receiver gone, stop reading
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        let _ = tx.send(Err(MigrateError::Source(e))).await;
                        return;
                    }
                }
            }

            if !batch.rows.is_empty() {
                let _ = tx.send(Ok(batch)).await;
            }
            debug!("{}: streamed {} rows", table, total);
        });

        rx
    }
}

/// Convert one cell based on the wire column type the server reported.
fn convert_cell(row: &Row, idx: usize, ty: ColumnType) -> SqlValue {
    match ty {
        ColumnType::Bit | ColumnType::Bitn => row
            .try_get::<bool, _>(idx)
            .ok()
            .flatten()
            .map(SqlValue::Bool)
            .unwrap_or(SqlValue::Null(SqlNullType::Bool)),
        ColumnType::Int1 => row
            .try_get::<u8, _>(idx)
            .ok()
            .flatten()
            .map(|v| SqlValue::I16(v as i16))
            .unwrap_or(SqlValue::Null(SqlNullType::I16)),
        ColumnType::Int2 => row
            .try_get::<i16, _>(idx)
            .ok()
            .flatten()
            .map(SqlValue::I16)
            .unwrap_or(SqlValue::Null(SqlNullType::I16)),
        ColumnType::Int4 => row
            .try_get::<i32, _>(idx)
            .ok()
            .flatten()
            .map(SqlValue::I32)
            .unwrap_or(SqlValue::Null(SqlNullType::I32)),
        ColumnType::Int8 => row
            .try_get::<i64, _>(idx)
            .ok()
            .flatten()
            .map(SqlValue::I64)
            .unwrap_or(SqlValue::Null(SqlNullType::I64)),
        // Intn's width depends on the stored value; widest first.
        ColumnType::Intn => read_i64(row, idx)
            .map(SqlValue::I64)
            .unwrap_or(SqlValue::Null(SqlNullType::I64)),
        ColumnType::Float4 => row
            .try_get::<f32, _>(idx)
            .ok()
            .flatten()
            .map(SqlValue::F32)
            .unwrap_or(SqlValue::Null(SqlNullType::F32)),
        ColumnType::Float8 => row
            .try_get::<f64, _>(idx)
            .ok()
            .flatten()
            .map(SqlValue::F64)
            .unwrap_or(SqlValue::Null(SqlNullType::F64)),
        ColumnType::Floatn | ColumnType::Money | ColumnType::Money4 => row
            .try_get::<f64, _>(idx)
            .ok()
            .flatten()
            .map(SqlValue::F64)
            .or_else(|| {
                row.try_get::<f32, _>(idx)
                    .ok()
                    .flatten()
                    .map(SqlValue::F32)
            })
            .unwrap_or(SqlValue::Null(SqlNullType::F64)),
        ColumnType::Guid => row
            .try_get::<uuid::Uuid, _>(idx)
            .ok()
            .flatten()
            .map(SqlValue::Uuid)
            .unwrap_or(SqlValue::Null(SqlNullType::Uuid)),
        ColumnType::Decimaln | ColumnType::Numericn => {
            row.try_get::<rust_decimal::Decimal, _>(idx)
                .ok()
                .flatten()
                .map(SqlValue::Decimal)
                .unwrap_or(SqlValue::Null(SqlNullType::Decimal))
        }
        ColumnType::Datetime
        | ColumnType::Datetime4
        | ColumnType::Datetimen
        | ColumnType::Datetime2 => row
            .try_get::<chrono::NaiveDateTime, _>(idx)
            .ok()
            .flatten()
            .map(SqlValue::DateTime)
            .unwrap_or(SqlValue::Null(SqlNullType::DateTime)),
        ColumnType::DatetimeOffsetn => row
            .try_get::<chrono::DateTime<chrono::Utc>, _>(idx)
            .ok()
            .flatten()
            .map(|dt| SqlValue::DateTime(dt.naive_utc()))
            .unwrap_or(SqlValue::Null(SqlNullType::DateTime)),
        ColumnType::Daten => row
            .try_get::<chrono::NaiveDate, _>(idx)
            .ok()
            .flatten()
            .map(SqlValue::Date)
            .unwrap_or(SqlValue::Null(SqlNullType::Date)),
        ColumnType::Timen => row
            .try_get::<chrono::NaiveTime, _>(idx)
            .ok()
            .flatten()
            .map(SqlValue::Time)
            .unwrap_or(SqlValue::Null(SqlNullType::Time)),
        ColumnType::BigBinary | ColumnType::BigVarBin | ColumnType::Image => row
            .try_get::<&[u8], _>(idx)
            .ok()
            .flatten()
            .map(|v| SqlValue::Bytes(v.to_vec()))
            .unwrap_or(SqlValue::Null(SqlNullType::Bytes)),
        // Everything stringish: varchar, nvarchar, char, text, xml, etc.
        _ => row
            .try_get::<&str, _>(idx)
            .ok()
            .flatten()
            .map(|s| SqlValue::String(s.to_string()))
            .unwrap_or(SqlValue::Null(SqlNullType::String)),
    }
}
