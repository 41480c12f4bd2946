//! Progress reporting contract consumed by the engine.
//!
//! The engine only depends on [`ProgressSink`]; transports implement it.
//! Sink operations are infallible by contract — a sink must never propagate
//! a failure back into the engine.

use serde::Serialize;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{error, info};

/// Capability the engine uses to report progress, completion, and failure.
///
/// For one run the engine makes any number of `report_progress` calls
/// followed by exactly one terminal call: `report_completed` or
/// `report_error`, never both.
pub trait ProgressSink: Send + Sync {
    /// Advisory progress update. Sinks may throttle, but must always deliver
    /// the update where `processed == total`.
    fn report_progress(&self, processed: i64, total: i64, operation: &str, elapsed: Duration);

    /// Terminal success.
    fn report_completed(&self, total_processed: i64, total_inserted: i64, total_time: Duration);

    /// Terminal failure.
    fn report_error(&self, message: &str, processed_so_far: i64);
}

/// Format a duration as `hh:mm:ss` for human display.
pub fn format_hms(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// Console sink: throttled tracing line printer.
pub struct ConsoleProgress {
    interval: Duration,
    // Guards the throttle clock; a final progress emit may race the
    // completion/error path for the same run.
    last_emit: Mutex<Option<Instant>>,
}

impl ConsoleProgress {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_emit: Mutex::new(None),
        }
    }

    /// Decide whether this update may be dropped. The `processed == total`
    /// update is never dropped.
    fn should_emit(&self, processed: i64, total: i64) -> bool {
        if processed >= total {
            return true;
        }
        let mut last = self.last_emit.lock().unwrap();
        let now = Instant::now();
        match *last {
            Some(prev) if now.duration_since(prev) < self.interval => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }

    fn eta(processed: i64, total: i64, elapsed: Duration) -> Duration {
        if processed == 0 || elapsed.is_zero() {
            return Duration::ZERO;
        }
        let per_record = elapsed.as_secs_f64() / processed as f64;
        Duration::from_secs_f64(per_record * (total - processed).max(0) as f64)
    }
}

impl Default for ConsoleProgress {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl ProgressSink for ConsoleProgress {
    fn report_progress(&self, processed: i64, total: i64, operation: &str, elapsed: Duration) {
        if !self.should_emit(processed, total) {
            return;
        }
        let pct = if total > 0 {
            processed as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        let rate = if elapsed.as_secs_f64() > 0.0 {
            processed as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        info!(
            "{}/{} ({:.1}%) at {:.0} rows/s, elapsed {}, eta {} - {}",
            processed,
            total,
            pct,
            rate,
            format_hms(elapsed),
            format_hms(Self::eta(processed, total, elapsed)),
            operation
        );
    }

    fn report_completed(&self, total_processed: i64, total_inserted: i64, total_time: Duration) {
        info!(
            "Completed: {} processed, {} inserted, {} skipped in {}",
            total_processed,
            total_inserted,
            total_processed - total_inserted,
            format_hms(total_time)
        );
    }

    fn report_error(&self, message: &str, processed_so_far: i64) {
        error!("Failed after {} records: {}", processed_so_far, message);
    }
}

/// Serializable event payload carried by [`BroadcastProgress`]; this is what
/// a push transport forwards to subscribers grouped by migration id.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProgressEvent {
    Progress {
        migration_id: String,
        processed: i64,
        total: i64,
        operation: String,
        elapsed: String,
    },
    Completed {
        migration_id: String,
        total_processed: i64,
        total_inserted: i64,
        total_time: String,
    },
    Error {
        migration_id: String,
        message: String,
        processed_so_far: i64,
    },
}

/// Push-channel sink: broadcasts events keyed by migration id.
///
/// Send failures (no live subscribers) are silently dropped; late
/// subscribers fetch last-known state via the job snapshot read instead.
pub struct BroadcastProgress {
    migration_id: String,
    tx: broadcast::Sender<ProgressEvent>,
}

impl BroadcastProgress {
    pub fn new(migration_id: impl Into<String>, tx: broadcast::Sender<ProgressEvent>) -> Self {
        Self {
            migration_id: migration_id.into(),
            tx,
        }
    }
}

impl ProgressSink for BroadcastProgress {
    fn report_progress(&self, processed: i64, total: i64, operation: &str, elapsed: Duration) {
        let _ = self.tx.send(ProgressEvent::Progress {
            migration_id: self.migration_id.clone(),
            processed,
            total,
            operation: operation.to_string(),
            elapsed: format_hms(elapsed),
        });
    }

    fn report_completed(&self, total_processed: i64, total_inserted: i64, total_time: Duration) {
        let _ = self.tx.send(ProgressEvent::Completed {
            migration_id: self.migration_id.clone(),
            total_processed,
            total_inserted,
            total_time: format_hms(total_time),
        });
    }

    fn report_error(&self, message: &str, processed_so_far: i64) {
        let _ = self.tx.send(ProgressEvent::Error {
            migration_id: self.migration_id.clone(),
            message: message.to_string(),
            processed_so_far,
        });
    }
}

/// Sink that discards everything; for callers that do not want reporting.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn report_progress(&self, _: i64, _: i64, _: &str, _: Duration) {}
    fn report_completed(&self, _: i64, _: i64, _: Duration) {}
    fn report_error(&self, _: &str, _: i64) {}
}
