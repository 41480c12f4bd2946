//! # legacy-migrate
//!
//! Batch ETL engine for moving a legacy SQL Server schema into a
//! redesigned PostgreSQL schema, one entity at a time.
//!
//! The library is built from three parts:
//!
//! - **Migration engine** — the shared extract-transform-load pipeline
//!   every per-entity [`unit::MigrationUnit`] runs on: batched streaming
//!   reads, transactional or autocommit writes, skip-reason accounting,
//!   and progress callbacks.
//! - **Job subsystem** — a bounded worker pool for long-running work
//!   (attachment binary copy) with pollable status, cooperative
//!   cancellation, and an optional maximum run time.
//! - **Drivers** — pluggable source readers and target writers, with
//!   in-memory implementations for tests and dry runs.
//!
//! ## Example
//!
//! ```rust,no_run
//! use legacy_migrate::{Config, MigrationEngine, UnitRegistry};
//! use legacy_migrate::source::MssqlSource;
//! use legacy_migrate::target::PgTarget;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> legacy_migrate::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let source = Arc::new(MssqlSource::connect(config.source.clone()).await?);
//!     let target = Arc::new(PgTarget::connect(&config.target).await?);
//!     let engine = MigrationEngine::new(source, target, config.engine.clone());
//!
//!     let registry = UnitRegistry::with_defaults();
//!     let unit = registry.get("company_master").unwrap();
//!     let report = engine.migrate(unit.as_ref(), Default::default()).await?;
//!     println!("{}", report.summary());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod jobs;
pub mod mapping;
pub mod progress;
pub mod source;
pub mod target;
pub mod unit;
pub mod units;

// Re-exports for convenient access
pub use config::{Config, EngineConfig, JobsConfig, SourceConfig, TargetConfig};
pub use core::{Batch, SourceRow, SqlValue};
pub use engine::{
    MigrateOptions, MigrationEngine, MigrationReport, MultiReport, SourceDiagnostics,
};
pub use error::{MigrateError, Result};
pub use jobs::{Job, JobPool, JobRegistry, JobState, JobStatusView, JobTask};
pub use mapping::FieldMapping;
pub use progress::{BroadcastProgress, ConsoleProgress, ProgressEvent, ProgressSink};
pub use unit::{MigrationUnit, Transform, UnitKind, UnitRegistry};
