//! Asynchronous job subsystem for long-running migrations.
//!
//! Work is enqueued, runs off the caller's path on a fixed-size worker
//! pool, and exposes pollable status to any number of concurrent callers.
//! The registry owns every job record; callers only ever see clones, so a
//! status poll is always a consistent snapshot.

mod attachments;
mod registry;
mod worker;

pub use attachments::{
    AttachmentCopyTask, AttachmentPayload, AttachmentRef, AttachmentSource, AttachmentWriter,
    MemoryAttachmentSource, MemoryAttachmentWriter, MssqlAttachmentSource, PgAttachmentWriter,
};
pub use registry::JobRegistry;
pub use worker::{JobContext, JobPool, JobTask};

use crate::progress::format_hms;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Job lifecycle: `Queued -> Running -> {Completed, Failed}`. The two
/// terminal states are immutable once set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobState {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

/// One background job record.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    /// Unique per registry.
    pub job_id: String,
    /// Caller correlation id; several jobs may share one.
    pub migration_id: String,
    pub table_name: String,
    pub state: JobState,
    pub total_files: i64,
    pub processed_files: i64,
    pub skipped_files: i64,
    pub current_operation: String,
    pub enqueued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl Job {
    pub(crate) fn new(migration_id: &str, table_name: &str) -> Self {
        Self {
            job_id: uuid::Uuid::new_v4().to_string(),
            migration_id: migration_id.to_string(),
            table_name: table_name.to_string(),
            state: JobState::Queued,
            total_files: 0,
            processed_files: 0,
            skipped_files: 0,
            current_operation: "Queued".to_string(),
            enqueued_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error_message: None,
        }
    }

    /// Percentage complete. 0 while the total is unknown; a completed job
    /// always reads 100 even if the total drifted during the run.
    pub fn progress_percentage(&self) -> i64 {
        if self.state == JobState::Completed {
            return 100;
        }
        if self.total_files <= 0 {
            return 0;
        }
        self.processed_files * 100 / self.total_files
    }

    /// Wall time from start to completion, or to now while running.
    pub fn elapsed(&self) -> std::time::Duration {
        let Some(started) = self.started_at else {
            return std::time::Duration::ZERO;
        };
        let end = self.completed_at.unwrap_or_else(Utc::now);
        (end - started).to_std().unwrap_or_default()
    }

    /// Snapshot for status polls.
    pub fn status_view(&self) -> JobStatusView {
        JobStatusView {
            job_id: self.job_id.clone(),
            migration_id: self.migration_id.clone(),
            table_name: self.table_name.clone(),
            state: self.state,
            total_files: self.total_files,
            processed_files: self.processed_files,
            skipped_files: self.skipped_files,
            current_operation: self.current_operation.clone(),
            progress_percentage: self.progress_percentage(),
            elapsed: format_hms(self.elapsed()),
            enqueued_at: self.enqueued_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            error_message: self.error_message.clone(),
        }
    }
}

/// The serialized status callers poll for.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusView {
    pub job_id: String,
    pub migration_id: String,
    pub table_name: String,
    pub state: JobState,
    pub total_files: i64,
    pub processed_files: i64,
    pub skipped_files: i64,
    pub current_operation: String,
    pub progress_percentage: i64,
    /// `hh:mm:ss`; `00:00:00` until the job starts.
    pub elapsed: String,
    pub enqueued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}
