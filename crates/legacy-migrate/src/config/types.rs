//! Configuration type definitions.

use serde::{Deserialize, Serialize};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Legacy source database (SQL Server).
    pub source: SourceConfig,

    /// Redesigned target database (PostgreSQL).
    pub target: TargetConfig,

    /// Engine behavior.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Asynchronous job subsystem.
    #[serde(default)]
    pub jobs: JobsConfig,
}

/// Source database (SQL Server) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 1433).
    #[serde(default = "default_mssql_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    pub password: String,

    /// Encrypt connection (default: "true").
    #[serde(default = "default_true_string")]
    pub encrypt: String,

    /// Trust server certificate (default: false).
    #[serde(default)]
    pub trust_server_cert: bool,
}

/// Target database (PostgreSQL) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 5432).
    #[serde(default = "default_pg_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    pub password: String,

    /// Maximum pooled connections (default: 8).
    #[serde(default = "default_pool_size")]
    pub max_connections: usize,
}

/// Engine behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Rows per read batch (default: 1000).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Minimum seconds between throttled progress emissions (default: 1).
    #[serde(default = "default_progress_interval")]
    pub progress_interval_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            progress_interval_secs: default_progress_interval(),
        }
    }
}

/// Job subsystem configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Fixed worker pool size (default: 2).
    #[serde(default = "default_job_workers")]
    pub workers: usize,

    /// Admission queue depth; enqueue waits when full (default: 32).
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,

    /// Maximum job run time in seconds; unlimited when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_runtime_secs: Option<u64>,

    /// Binary attachments written per batch (default: 20).
    #[serde(default = "default_binary_batch")]
    pub binary_batch_size: usize,

    /// Largest binary copied; bigger attachments are skipped (default: 250 MB).
    #[serde(default = "default_max_binary_bytes")]
    pub max_binary_bytes: i64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            workers: default_job_workers(),
            queue_depth: default_queue_depth(),
            max_runtime_secs: None,
            binary_batch_size: default_binary_batch(),
            max_binary_bytes: default_max_binary_bytes(),
        }
    }
}

fn default_mssql_port() -> u16 {
    1433
}

fn default_pg_port() -> u16 {
    5432
}

fn default_pool_size() -> usize {
    8
}

fn default_true_string() -> String {
    "true".to_string()
}

fn default_batch_size() -> usize {
    1000
}

fn default_progress_interval() -> u64 {
    1
}

fn default_job_workers() -> usize {
    2
}

fn default_queue_depth() -> usize {
    32
}

fn default_binary_batch() -> usize {
    20
}

fn default_max_binary_bytes() -> i64 {
    250 * 1024 * 1024
}
