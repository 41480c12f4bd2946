//! The shared extract-transform-load pipeline every migration unit runs on.
//!
//! One engine instance serves every unit: it owns the source reader, the
//! target writer, and the batching/transaction/skip-accounting logic.
//! Units supply only their statements and row transform.
//!
//! Failure semantics: a row that fails the unit's validation is a skip, not
//! an error, and the run continues. A write error aborts the run; with a
//! transaction the whole unit rolls back, without one the rows written so
//! far stay committed and the error names the poison row's 1-based ordinal.

mod report;

pub use report::{MigrationReport, MultiReport, SourceDiagnostics, UnitOutcome};

use crate::config::EngineConfig;
use crate::core::SqlValue;
use crate::error::{MigrateError, Result};
use crate::mapping::{parse_insert_table, FieldMapping};
use crate::progress::{NullProgress, ProgressSink};
use crate::source::SourceReader;
use crate::target::{TargetTransaction, TargetWriter};
use crate::unit::{MigrationUnit, Transform};
use indexmap::IndexMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{info, warn};

/// Options for one migration run.
pub struct MigrateOptions {
    /// Wrap the whole unit in a single target transaction.
    pub use_transaction: bool,
    /// Sink for progress callbacks; never fails back into the run.
    pub progress: Arc<dyn ProgressSink>,
    /// Cooperative cancellation flag, checked at batch boundaries.
    pub cancel: Option<watch::Receiver<bool>>,
}

impl Default for MigrateOptions {
    fn default() -> Self {
        Self {
            use_transaction: true,
            progress: Arc::new(NullProgress),
            cancel: None,
        }
    }
}

impl MigrateOptions {
    pub fn with_progress(progress: Arc<dyn ProgressSink>) -> Self {
        Self {
            progress,
            ..Self::default()
        }
    }
}

/// Where a unit's writes go: a shared open transaction or the writer's
/// autocommit path.
enum WriteVia<'a> {
    Tx(&'a mut Box<dyn TargetTransaction>),
    Auto(&'a dyn TargetWriter),
}

impl WriteVia<'_> {
    async fn insert(
        &mut self,
        table: &str,
        sql: &str,
        values: &[SqlValue],
        row: Option<i64>,
    ) -> Result<u64> {
        match self {
            WriteVia::Tx(tx) => tx.insert(table, sql, values, row).await,
            WriteVia::Auto(writer) => writer.insert(table, sql, values, row).await,
        }
    }
}

/// The migration engine.
pub struct MigrationEngine {
    source: Arc<dyn SourceReader>,
    target: Arc<dyn TargetWriter>,
    config: EngineConfig,
}

impl MigrationEngine {
    pub fn new(
        source: Arc<dyn SourceReader>,
        target: Arc<dyn TargetWriter>,
        config: EngineConfig,
    ) -> Self {
        Self {
            source,
            target,
            config,
        }
    }

    /// A unit's field mappings. Pure; no database I/O.
    pub fn mappings(&self, unit: &dyn MigrationUnit) -> Vec<FieldMapping> {
        unit.mappings()
    }

    /// Run one unit end to end.
    pub async fn migrate(
        &self,
        unit: &dyn MigrationUnit,
        options: MigrateOptions,
    ) -> Result<MigrationReport> {
        let started = Instant::now();
        let progress = options.progress.clone();
        let mut report = MigrationReport::new();

        let outcome = if options.use_transaction {
            let mut tx = self.target.begin().await?;
            let result = self
                .run_unit(unit, &mut WriteVia::Tx(&mut tx), &options, started, &mut report)
                .await;
            match result {
                Ok(()) => tx.commit().await,
                Err(err) => {
                    if let Err(rb) = tx.rollback().await {
                        warn!("{}: rollback failed: {}", unit.name(), rb);
                    }
                    Err(err)
                }
            }
        } else {
            self.run_unit(
                unit,
                &mut WriteVia::Auto(self.target.as_ref()),
                &options,
                started,
                &mut report,
            )
            .await
        };

        match outcome {
            Ok(()) => {
                progress.report_completed(
                    report.total_processed(),
                    report.inserted,
                    started.elapsed(),
                );
                info!(
                    "{}: migration complete. {}",
                    unit.name(),
                    report.summary().replace('\n', "; ")
                );
                Ok(report)
            }
            Err(err) => {
                progress.report_error(&err.to_string(), report.total_processed());
                Err(err)
            }
        }
    }

    /// Convenience for simple units: run transactionally, return the
    /// inserted count.
    pub async fn migrate_count(&self, unit: &dyn MigrationUnit) -> Result<i64> {
        self.migrate(unit, MigrateOptions::default())
            .await
            .map(|report| report.inserted)
    }

    /// Forced non-transactional run: every row autocommits, so a failure
    /// leaves the prior rows in place and the error names the poison row.
    pub async fn migrate_without_transaction(
        &self,
        unit: &dyn MigrationUnit,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<MigrationReport> {
        self.migrate(
            unit,
            MigrateOptions {
                use_transaction: false,
                progress,
                cancel: None,
            },
        )
        .await
    }

    /// Read-only pre-flight diagnostics: row count plus the unit's labelled
    /// validation checks. Never touches the target.
    pub async fn validate_source(&self, unit: &dyn MigrationUnit) -> Result<SourceDiagnostics> {
        let table = unit.source_table();
        if !self.source.table_exists(table).await? {
            return Err(MigrateError::TableNotFound(table.to_string()));
        }

        let row_count = self.source.row_count(table).await?;
        let mut checks = IndexMap::new();
        for check in unit.validation_checks() {
            let count = self.source.scalar_count(&check.sql).await?;
            checks.insert(check.label, count);
        }

        Ok(SourceDiagnostics {
            table: table.to_string(),
            row_count,
            checks,
        })
    }

    /// Run several units sequentially, in caller (dependency) order.
    ///
    /// With a common transaction every unit writes into one target
    /// transaction: any failure rolls the whole run back and the call
    /// fails with zero partial effect. Without one each unit runs in its
    /// own transaction: a failure leaves earlier units committed, later
    /// units still run, and the per-unit outcome map tells them apart.
    pub async fn migrate_many(
        &self,
        units: &[Arc<dyn MigrationUnit>],
        use_common_transaction: bool,
    ) -> Result<MultiReport> {
        let mut multi = MultiReport::default();

        if use_common_transaction {
            let mut tx = self.target.begin().await?;
            for (idx, unit) in units.iter().enumerate() {
                let options = MigrateOptions::default();
                let started = Instant::now();
                let mut report = MigrationReport::new();
                match self
                    .run_unit(
                        unit.as_ref(),
                        &mut WriteVia::Tx(&mut tx),
                        &options,
                        started,
                        &mut report,
                    )
                    .await
                {
                    Ok(()) => {
                        multi
                            .units
                            .insert(unit.name().to_string(), UnitOutcome::Succeeded(report));
                    }
                    Err(err) => {
                        if let Err(rb) = tx.rollback().await {
                            warn!("common transaction rollback failed: {}", rb);
                        }
                        warn!(
                            "{}: failed in common transaction, rolling back {} prior unit(s)",
                            unit.name(),
                            idx
                        );
                        return Err(err);
                    }
                }
            }
            tx.commit().await?;
        } else {
            for unit in units {
                match self.migrate(unit.as_ref(), MigrateOptions::default()).await {
                    Ok(report) => {
                        multi
                            .units
                            .insert(unit.name().to_string(), UnitOutcome::Succeeded(report));
                    }
                    Err(err) => {
                        multi.units.insert(
                            unit.name().to_string(),
                            UnitOutcome::Failed {
                                error: err.to_string(),
                            },
                        );
                    }
                }
            }
        }

        Ok(multi)
    }

    /// The shared pipeline: stream, transform, write, account. Mutates the
    /// caller's report so a failed run still shows what it got through.
    async fn run_unit(
        &self,
        unit: &dyn MigrationUnit,
        via: &mut WriteVia<'_>,
        options: &MigrateOptions,
        started: Instant,
        report: &mut MigrationReport,
    ) -> Result<()> {
        let source_table = unit.source_table();
        let insert_sql = unit.insert_query();
        let target_table =
            parse_insert_table(insert_sql).unwrap_or_else(|| unit.name().to_string());
        let operation = format!("Migrating {}", unit.name());

        let total = self.source.row_count(source_table).await?;
        info!("{}: starting migration, {} source row(s)", unit.name(), total);

        report.log(format!("Starting migration for {}", unit.name()));

        let mut rx = self
            .source
            .stream(source_table, unit.select_query(), self.config.batch_size);
        let mut ordinal: i64 = 0;

        while let Some(batch) = rx.recv().await {
            let batch = batch?;

            if cancelled(&options.cancel) {
                report.log("Run cancelled");
                return Err(MigrateError::Cancelled);
            }

            for row in batch.iter() {
                ordinal += 1;
                match unit.transform(&row) {
                    Transform::Row(values) => {
                        via.insert(&target_table, insert_sql, &values, Some(ordinal))
                            .await?;
                        report.add_inserted();
                    }
                    Transform::Skip(reason) => {
                        report.log(format!("Skipped row {}: {}", ordinal, reason));
                        report.add_skip(&reason);
                    }
                }
            }

            options
                .progress
                .report_progress(ordinal, total, &operation, started.elapsed());
        }

        // Always deliver the final position, even when the last batch was
        // swallowed by the sink's throttle.
        options
            .progress
            .report_progress(ordinal, total, &operation, started.elapsed());
        report.log(format!(
            "Finished: {} inserted, {} skipped",
            report.inserted, report.skipped
        ));
        Ok(())
    }
}

fn cancelled(cancel: &Option<watch::Receiver<bool>>) -> bool {
    cancel.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
}
