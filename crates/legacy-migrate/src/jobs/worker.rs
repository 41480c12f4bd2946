//! Fixed-size worker pool over a bounded admission queue.
//!
//! `enqueue` stores a `Queued` job and returns its id before anything runs;
//! N workers consume the queue. A worker survives anything the task does:
//! task errors, panics, timeouts, and cancellation all end in a `Failed`
//! record, and the worker moves on to the next job.

use crate::config::JobsConfig;
use crate::error::{MigrateError, Result};
use crate::jobs::{Job, JobRegistry, JobState};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// A unit of background work.
#[async_trait]
pub trait JobTask: Send + Sync + 'static {
    /// Table (or resource) the job works on, recorded on the job.
    fn table_name(&self) -> &str;

    /// Run to completion, updating status through the context. Expected to
    /// check [`JobContext::cancelled`] at batch boundaries.
    async fn run(&self, ctx: JobContext) -> Result<()>;
}

/// Handle a running task updates its job through. Every update is one
/// guarded registry write plus a push notification; updates after the job
/// reached a terminal state are silently dropped.
#[derive(Clone)]
pub struct JobContext {
    job_id: String,
    registry: JobRegistry,
    cancel: watch::Receiver<bool>,
    events: broadcast::Sender<Job>,
}

impl JobContext {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn set_total(&self, total: i64) {
        self.apply(|job| job.total_files = total);
    }

    pub fn advance(&self, processed: i64, skipped: i64) {
        self.apply(|job| {
            job.processed_files = processed;
            job.skipped_files = skipped;
        });
    }

    pub fn set_operation(&self, operation: &str) {
        let operation = operation.to_string();
        self.apply(move |job| job.current_operation = operation);
    }

    /// True once the job has been cancelled; tasks stop at their next
    /// checkpoint and return [`MigrateError::Cancelled`].
    pub fn cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    fn apply<F: FnOnce(&mut Job)>(&self, f: F) {
        if let Some(snapshot) = self.registry.update(&self.job_id, f) {
            let _ = self.events.send(snapshot);
        }
    }
}

struct QueuedRun {
    job_id: String,
    task: Arc<dyn JobTask>,
    cancel: watch::Receiver<bool>,
}

/// The worker pool.
pub struct JobPool {
    registry: JobRegistry,
    queue: async_channel::Sender<QueuedRun>,
    cancels: Arc<Mutex<HashMap<String, watch::Sender<bool>>>>,
    events: broadcast::Sender<Job>,
    workers: Vec<JoinHandle<()>>,
}

impl JobPool {
    pub fn new(registry: JobRegistry, config: &JobsConfig) -> Self {
        let (tx, rx) = async_channel::bounded::<QueuedRun>(config.queue_depth.max(1));
        let (events, _) = broadcast::channel(64);
        let cancels: Arc<Mutex<HashMap<String, watch::Sender<bool>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let max_runtime = config.max_runtime_secs;

        let workers = (0..config.workers.max(1))
            .map(|worker_id| {
                let rx = rx.clone();
                let registry = registry.clone();
                let events = events.clone();
                tokio::spawn(async move {
                    while let Ok(run) = rx.recv().await {
                        run_one(&registry, &events, run, max_runtime).await;
                    }
                    info!("job worker {} stopped", worker_id);
                })
            })
            .collect();

        Self {
            registry,
            queue: tx,
            cancels,
            events,
            workers,
        }
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Subscribe to job snapshots pushed on every status change.
    pub fn subscribe(&self) -> broadcast::Receiver<Job> {
        self.events.subscribe()
    }

    /// Create the job record, queue the run, and return the job id. Waits
    /// for queue admission when the pool is saturated, never for the run
    /// itself.
    pub async fn enqueue(&self, task: Arc<dyn JobTask>, migration_id: &str) -> Result<String> {
        self.sweep_finished();

        let job = self.registry.create(migration_id, task.table_name());
        let job_id = job.job_id.clone();
        let _ = self.events.send(job);

        let (cancel_tx, cancel_rx) = watch::channel(false);
        self.cancels
            .lock()
            .unwrap()
            .insert(job_id.clone(), cancel_tx);

        let run = QueuedRun {
            job_id: job_id.clone(),
            task,
            cancel: cancel_rx,
        };
        if self.queue.send(run).await.is_err() {
            self.mark_failed(&job_id, "job queue is closed");
            return Err(MigrateError::Job("job queue is closed".to_string()));
        }

        Ok(job_id)
    }

    /// Request cooperative cancellation. Returns false for unknown or
    /// already-finished jobs.
    pub fn cancel(&self, job_id: &str) -> bool {
        let cancels = self.cancels.lock().unwrap();
        match cancels.get(job_id) {
            Some(tx) => tx.send(true).is_ok(),
            None => false,
        }
    }

    /// Close the queue and wait for in-flight jobs to finish.
    pub async fn shutdown(self) {
        self.queue.close();
        for worker in self.workers {
            let _ = worker.await;
        }
    }

    fn mark_failed(&self, job_id: &str, message: &str) {
        if let Some(snapshot) = self.registry.update(job_id, |job| {
            job.state = JobState::Failed;
            job.completed_at = Some(Utc::now());
            job.error_message = Some(message.to_string());
        }) {
            let _ = self.events.send(snapshot);
        }
    }

    /// Drop cancel senders of jobs that already reached a terminal state.
    fn sweep_finished(&self) {
        let registry = &self.registry;
        self.cancels.lock().unwrap().retain(|job_id, _| {
            registry
                .get(job_id)
                .map(|job| !job.state.is_terminal())
                .unwrap_or(false)
        });
    }
}

/// Run one queued job to a terminal state. Never panics the worker.
async fn run_one(
    registry: &JobRegistry,
    events: &broadcast::Sender<Job>,
    run: QueuedRun,
    max_runtime_secs: Option<u64>,
) {
    let job_id = run.job_id;

    if let Some(snapshot) = registry.update(&job_id, |job| {
        job.state = JobState::Running;
        job.started_at = Some(Utc::now());
        job.current_operation = "Starting".to_string();
    }) {
        let _ = events.send(snapshot);
    } else {
        // Already terminal (cancelled before a worker picked it up).
        return;
    }

    let ctx = JobContext {
        job_id: job_id.clone(),
        registry: registry.clone(),
        cancel: run.cancel.clone(),
        events: events.clone(),
    };
    let task = run.task;
    // Spawned so a panicking task surfaces as a JoinError here instead of
    // taking the worker down.
    let mut handle = tokio::spawn(async move { task.run(ctx).await });

    let outcome = match max_runtime_secs {
        Some(secs) => match tokio::time::timeout(Duration::from_secs(secs), &mut handle).await {
            Ok(joined) => joined,
            Err(_) => {
                // The task must be stopped, not just abandoned, before the
                // job is recorded Failed; an abandoned task would keep
                // writing to the target.
                handle.abort();
                let _ = handle.await;
                Ok(Err(MigrateError::Timeout(secs)))
            }
        },
        None => handle.await,
    };

    let result = match outcome {
        Ok(result) => result,
        Err(join_err) if join_err.is_panic() => {
            Err(MigrateError::Job("job task panicked".to_string()))
        }
        Err(join_err) => Err(MigrateError::Job(join_err.to_string())),
    };

    let snapshot = match result {
        Ok(()) => registry.update(&job_id, |job| {
            job.state = JobState::Completed;
            job.completed_at = Some(Utc::now());
            job.current_operation = "Completed".to_string();
        }),
        Err(err) => {
            let message = err.to_string();
            if matches!(err, MigrateError::Timeout(_)) {
                warn!("job {} exceeded its maximum run time", job_id);
            } else {
                error!("job {} failed: {}", job_id, message);
            }
            registry.update(&job_id, |job| {
                job.state = JobState::Failed;
                job.completed_at = Some(Utc::now());
                job.error_message = Some(message);
            })
        }
    };
    if let Some(snapshot) = snapshot {
        let _ = events.send(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JobsConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn pool_config(workers: usize) -> JobsConfig {
        JobsConfig {
            workers,
            queue_depth: 8,
            max_runtime_secs: None,
            ..JobsConfig::default()
        }
    }

    struct CountingTask {
        ran: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl JobTask for CountingTask {
        fn table_name(&self) -> &str {
            "prattachment"
        }
        async fn run(&self, ctx: JobContext) -> Result<()> {
            ctx.set_total(2);
            ctx.advance(2, 0);
            self.ran.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct PanickingTask;

    #[async_trait]
    impl JobTask for PanickingTask {
        fn table_name(&self) -> &str {
            "prattachment"
        }
        async fn run(&self, _ctx: JobContext) -> Result<()> {
            panic!("boom");
        }
    }

    async fn wait_terminal(registry: &JobRegistry, job_id: &str) -> Job {
        for _ in 0..200 {
            if let Some(job) = registry.get(job_id) {
                if job.state.is_terminal() {
                    return job;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {} never reached a terminal state", job_id);
    }

    #[tokio::test]
    async fn runs_to_completed() {
        let registry = JobRegistry::new();
        let pool = JobPool::new(registry.clone(), &pool_config(1));
        let ran = Arc::new(AtomicUsize::new(0));

        let job_id = pool
            .enqueue(Arc::new(CountingTask { ran: ran.clone() }), "mig-1")
            .await
            .unwrap();

        let job = wait_terminal(&registry, &job_id).await;
        assert_eq!(job.state, JobState::Completed);
        assert_eq!(job.processed_files, 2);
        assert!(job.started_at.is_some());
        assert!(job.completed_at.is_some());
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn panic_marks_failed_and_worker_survives() {
        let registry = JobRegistry::new();
        let pool = JobPool::new(registry.clone(), &pool_config(1));

        let first = pool.enqueue(Arc::new(PanickingTask), "mig-1").await.unwrap();
        let failed = wait_terminal(&registry, &first).await;
        assert_eq!(failed.state, JobState::Failed);
        assert!(failed.error_message.unwrap().contains("panicked"));

        // Same single worker still serves the next job.
        let ran = Arc::new(AtomicUsize::new(0));
        let second = pool
            .enqueue(Arc::new(CountingTask { ran }), "mig-1")
            .await
            .unwrap();
        let ok = wait_terminal(&registry, &second).await;
        assert_eq!(ok.state, JobState::Completed);
    }

    #[tokio::test]
    async fn timed_out_job_fails_with_timeout_message() {
        struct SlowTask;

        #[async_trait]
        impl JobTask for SlowTask {
            fn table_name(&self) -> &str {
                "prattachment"
            }
            async fn run(&self, _ctx: JobContext) -> Result<()> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            }
        }

        let registry = JobRegistry::new();
        let config = JobsConfig {
            max_runtime_secs: Some(1),
            ..pool_config(1)
        };
        let pool = JobPool::new(registry.clone(), &config);

        let job_id = pool.enqueue(Arc::new(SlowTask), "mig-1").await.unwrap();
        let job = wait_terminal(&registry, &job_id).await;
        assert_eq!(job.state, JobState::Failed);
        assert!(job.error_message.unwrap().contains("maximum run time"));
    }

    #[tokio::test]
    async fn timed_out_task_stops_writing() {
        struct WritingTask {
            writes: Arc<AtomicUsize>,
        }

        #[async_trait]
        impl JobTask for WritingTask {
            fn table_name(&self) -> &str {
                "prattachment"
            }
            async fn run(&self, _ctx: JobContext) -> Result<()> {
                loop {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    self.writes.fetch_add(1, Ordering::SeqCst);
                }
            }
        }

        let registry = JobRegistry::new();
        let config = JobsConfig {
            max_runtime_secs: Some(1),
            ..pool_config(1)
        };
        let pool = JobPool::new(registry.clone(), &config);
        let writes = Arc::new(AtomicUsize::new(0));

        let job_id = pool
            .enqueue(
                Arc::new(WritingTask {
                    writes: writes.clone(),
                }),
                "mig-1",
            )
            .await
            .unwrap();
        let job = wait_terminal(&registry, &job_id).await;
        assert_eq!(job.state, JobState::Failed);

        // Once the job is Failed, the task is gone; no further writes land.
        let at_failure = writes.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(writes.load(Ordering::SeqCst), at_failure);
    }
}
