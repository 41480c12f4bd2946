//! Error types for the migration library.
//!
//! The taxonomy separates the three things an operator remediates
//! differently: connectivity failures (retry the run), data errors such as
//! constraint and foreign-key violations (fix the data or run the dependency
//! migration first), and everything else (investigate). Per-row validation
//! failures are *not* errors; they are recorded as skip reasons and the run
//! continues.

use thiserror::Error;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Source database driver error
    #[error("Source database error: {0}")]
    Source(#[from] tiberius::error::Error),

    /// Target database driver error (not classified as constraint/connectivity)
    #[error("Target database error: {0}")]
    Target(#[from] tokio_postgres::Error),

    /// Source unreachable or connection pool exhausted
    #[error("Source connection failed: {message}\n  Context: {context}")]
    SourceConnection { message: String, context: String },

    /// Target unreachable or connection pool exhausted
    #[error("Target connection failed: {message}\n  Context: {context}")]
    TargetConnection { message: String, context: String },

    /// Constraint or foreign-key violation while writing to the target.
    /// `row` is the 1-based source row ordinal when known, which is how a
    /// non-transactional run identifies the poison row.
    #[error("Constraint violation on {table}{}: {detail}", row.map(|r| format!(" (row {})", r)).unwrap_or_default())]
    Constraint {
        table: String,
        row: Option<i64>,
        detail: String,
    },

    /// Source table does not exist
    #[error("Source table not found: {0}")]
    TableNotFound(String),

    /// No migration unit registered for the given table name
    #[error("No migration registered for table: {0}")]
    UnknownUnit(String),

    /// Pre-flight validation failed
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Job subsystem error (queue closed, duplicate id, etc.)
    #[error("Job error: {0}")]
    Job(String),

    /// Job exceeded its configured maximum run time
    #[error("Job exceeded maximum run time of {0}s")]
    Timeout(u64),

    /// Run was cancelled
    #[error("Migration cancelled")]
    Cancelled,

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MigrateError {
    /// Create a SourceConnection error with context about where it occurred
    pub fn source_conn(message: impl Into<String>, context: impl Into<String>) -> Self {
        MigrateError::SourceConnection {
            message: message.into(),
            context: context.into(),
        }
    }

    /// Create a TargetConnection error with context about where it occurred
    pub fn target_conn(message: impl Into<String>, context: impl Into<String>) -> Self {
        MigrateError::TargetConnection {
            message: message.into(),
            context: context.into(),
        }
    }

    /// Create a Constraint error
    pub fn constraint(
        table: impl Into<String>,
        row: Option<i64>,
        detail: impl Into<String>,
    ) -> Self {
        MigrateError::Constraint {
            table: table.into(),
            row,
            detail: detail.into(),
        }
    }

    /// Classify a tokio-postgres error by SQLSTATE class.
    ///
    /// Class 23 (integrity constraint violation) becomes [`Constraint`];
    /// class 08 (connection exception) and closed connections become
    /// [`TargetConnection`]; everything else stays a raw [`Target`] error.
    ///
    /// [`Constraint`]: MigrateError::Constraint
    /// [`TargetConnection`]: MigrateError::TargetConnection
    /// [`Target`]: MigrateError::Target
    pub fn classify_pg(table: &str, row: Option<i64>, err: tokio_postgres::Error) -> Self {
        if err.is_closed() {
            return MigrateError::target_conn(err.to_string(), format!("writing {}", table));
        }
        if let Some(code) = err.code() {
            let code = code.code();
            if code.starts_with("23") {
                return MigrateError::Constraint {
                    table: table.to_string(),
                    row,
                    detail: err
                        .as_db_error()
                        .map(|db| db.message().to_string())
                        .unwrap_or_else(|| err.to_string()),
                };
            }
            if code.starts_with("08") {
                return MigrateError::target_conn(err.to_string(), format!("writing {}", table));
            }
        }
        MigrateError::Target(err)
    }

    /// True for data errors: the rows are wrong, retrying will not help.
    pub fn is_data_error(&self) -> bool {
        matches!(
            self,
            MigrateError::Constraint { .. } | MigrateError::Validation(_)
        )
    }

    /// True for transient infrastructure errors worth an operator retry.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            MigrateError::SourceConnection { .. } | MigrateError::TargetConnection { .. }
        )
    }

    /// Process exit code for CLI use: 2 config, 3 connectivity, 4 data,
    /// 5 cancelled/timeout, 1 everything else.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_) | MigrateError::Yaml(_) => 2,
            _ if self.is_connectivity() => 3,
            _ if self.is_data_error() => 4,
            MigrateError::Cancelled | MigrateError::Timeout(_) => 5,
            _ => 1,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
