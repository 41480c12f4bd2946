//! legacy-migrate CLI - run entity migrations against a config file.

use clap::{Parser, Subcommand};
use legacy_migrate::jobs::{AttachmentCopyTask, MssqlAttachmentSource, PgAttachmentWriter};
use legacy_migrate::source::MssqlSource;
use legacy_migrate::target::PgTarget;
use legacy_migrate::{
    Config, ConsoleProgress, JobPool, JobRegistry, MigrateError, MigrateOptions, MigrationEngine,
    UnitRegistry,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "legacy-migrate")]
#[command(about = "Migrate legacy SQL Server entities into the redesigned PostgreSQL schema")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the registered migration units
    Units,

    /// Show the field mappings of one unit
    Mappings {
        /// Unit name (target table)
        table: String,
    },

    /// Run the read-only source data checks of one unit
    Validate {
        /// Unit name (target table)
        table: String,
    },

    /// Migrate one unit
    Migrate {
        /// Unit name (target table)
        table: String,

        /// Autocommit per row instead of one transaction; a failure then
        /// leaves prior rows committed and names the poison row
        #[arg(long)]
        no_transaction: bool,
    },

    /// Migrate several units sequentially, in the given order
    MigrateAll {
        /// Comma-separated unit names; all registered units when omitted
        #[arg(long)]
        tables: Option<String>,

        /// Run every unit inside one shared target transaction
        #[arg(long)]
        common_transaction: bool,
    },

    /// Copy attachment binaries as a background job and poll it to completion
    CopyAttachments {
        /// Source attachment table
        #[arg(long, default_value = "TBL_PRATTACHMENT")]
        source_table: String,

        /// Source id column
        #[arg(long, default_value = "AttachmentId")]
        id_column: String,

        /// Source binary column
        #[arg(long, default_value = "UploadDocument")]
        data_column: String,

        /// Target binary table
        #[arg(long, default_value = "pr_attachment_binary")]
        target_table: String,

        /// Target id column
        #[arg(long, default_value = "attachment_id")]
        target_id_column: String,

        /// Target binary column
        #[arg(long, default_value = "binary_data")]
        target_data_column: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), MigrateError> {
    let cli = Cli::parse();
    let units = UnitRegistry::with_defaults();

    // Units and mappings need no configuration or databases.
    match &cli.command {
        Commands::Units => {
            for name in units.names() {
                println!("{}", name);
            }
            return Ok(());
        }
        Commands::Mappings { table } => {
            let unit = units
                .get(table)
                .ok_or_else(|| MigrateError::UnknownUnit(table.clone()))?;
            let mappings = unit.mappings();
            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&mappings)?);
            } else {
                for m in mappings {
                    println!("{:30} -> {:30} {}", m.source_field, m.target_field, m.transform_note);
                }
            }
            return Ok(());
        }
        _ => {}
    }

    setup_logging(&cli.verbosity, &cli.log_format)
        .map_err(MigrateError::Config)?;

    let config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    let source = Arc::new(MssqlSource::connect(config.source.clone()).await?);
    let target = Arc::new(PgTarget::with_max_connections(&config.target, config.target.max_connections).await?);
    let engine = MigrationEngine::new(source.clone(), target.clone(), config.engine.clone());

    match cli.command {
        Commands::Units | Commands::Mappings { .. } => unreachable!(), // Handled above
        Commands::Validate { table } => {
            let unit = units
                .get(&table)
                .ok_or_else(|| MigrateError::UnknownUnit(table.clone()))?;
            let diagnostics = engine.validate_source(unit.as_ref()).await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&diagnostics)?);
            } else {
                println!("{}: {} row(s)", diagnostics.table, diagnostics.row_count);
                for (label, count) in &diagnostics.checks {
                    println!("  {}: {}", label, count);
                }
                if diagnostics.is_clean() {
                    println!("  Source data is clean");
                }
            }
        }

        Commands::Migrate {
            table,
            no_transaction,
        } => {
            let unit = units
                .get(&table)
                .ok_or_else(|| MigrateError::UnknownUnit(table.clone()))?;

            let progress = Arc::new(ConsoleProgress::new(Duration::from_secs(
                config.engine.progress_interval_secs,
            )));
            let report = engine
                .migrate(
                    unit.as_ref(),
                    MigrateOptions {
                        use_transaction: !no_transaction,
                        progress,
                        cancel: Some(ctrl_c_cancel()),
                    },
                )
                .await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("\nMigration completed!");
                println!("{}", report.summary());
            }
        }

        Commands::MigrateAll {
            tables,
            common_transaction,
        } => {
            let names: Vec<String> = match tables {
                Some(list) => list.split(',').map(|s| s.trim().to_string()).collect(),
                None => units.names(),
            };
            let mut selected = Vec::with_capacity(names.len());
            for name in &names {
                selected.push(
                    units
                        .get(name)
                        .ok_or_else(|| MigrateError::UnknownUnit(name.clone()))?,
                );
            }

            let multi = engine.migrate_many(&selected, common_transaction).await?;
            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&multi)?);
            } else {
                println!("\n{} unit(s), {} row(s) inserted", multi.units.len(), multi.total_inserted());
                for (name, outcome) in &multi.units {
                    match outcome {
                        legacy_migrate::engine::UnitOutcome::Succeeded(report) => {
                            println!("  {}: ok ({} inserted, {} skipped)", name, report.inserted, report.skipped)
                        }
                        legacy_migrate::engine::UnitOutcome::Failed { error } => {
                            println!("  {}: FAILED ({})", name, error)
                        }
                    }
                }
            }
        }

        Commands::CopyAttachments {
            source_table,
            id_column,
            data_column,
            target_table,
            target_id_column,
            target_data_column,
        } => {
            let attachment_source = Arc::new(MssqlAttachmentSource::new(
                source.clone(),
                &source_table,
                &id_column,
                &data_column,
            ));
            let attachment_writer = Arc::new(PgAttachmentWriter::new(
                target.clone(),
                &target_table,
                &target_id_column,
                &target_data_column,
            ));
            let task = Arc::new(AttachmentCopyTask::new(
                source_table,
                attachment_source,
                attachment_writer,
                config.jobs.binary_batch_size,
                config.jobs.max_binary_bytes,
            ));

            let registry = JobRegistry::new();
            let pool = JobPool::new(registry.clone(), &config.jobs);
            let job_id = pool.enqueue(task, "cli").await?;
            info!("Enqueued attachment copy job {}", job_id);

            let cancel = ctrl_c_cancel();
            let mut cancel_requested = false;
            let status = loop {
                let job = registry
                    .get(&job_id)
                    .ok_or_else(|| MigrateError::Job("job disappeared".to_string()))?;
                if job.state.is_terminal() {
                    break job.status_view();
                }
                if *cancel.borrow() && !cancel_requested {
                    // Keep polling; the job ends Failed at its next checkpoint.
                    pool.cancel(&job_id);
                    cancel_requested = true;
                }
                info!(
                    "{}: {}% ({}/{} files, {} skipped) - {}",
                    job.job_id,
                    job.progress_percentage(),
                    job.processed_files,
                    job.total_files,
                    job.skipped_files,
                    job.current_operation
                );
                tokio::time::sleep(Duration::from_secs(1)).await;
            };

            pool.shutdown().await;
            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                println!("\nJob {}: {:?}", status.job_id, status.state);
                println!(
                    "  {} of {} file(s) processed, {} skipped, in {}",
                    status.processed_files, status.total_files, status.skipped_files, status.elapsed
                );
                if let Some(error) = &status.error_message {
                    println!("  Error: {}", error);
                }
            }
        }
    }

    Ok(())
}

/// Watch flag flipped to true on the first Ctrl-C.
fn ctrl_c_cancel() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, cancelling at the next checkpoint");
            let _ = tx.send(true);
        }
    });
    rx
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    Ok(())
}
