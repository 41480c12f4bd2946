//! In-memory job registry.
//!
//! Cloneable handle over shared state; inject one instance wherever job
//! status is created or read. Records live for the life of the process
//! (no persistence across restarts).

use crate::jobs::Job;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

#[derive(Clone, Default)]
pub struct JobRegistry {
    jobs: Arc<RwLock<HashMap<String, Job>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a `Queued` job and return its snapshot.
    pub fn create(&self, migration_id: &str, table_name: &str) -> Job {
        let job = Job::new(migration_id, table_name);
        self.jobs
            .write()
            .unwrap()
            .insert(job.job_id.clone(), job.clone());
        job
    }

    /// Consistent snapshot of one job; never torn mid-update.
    pub fn get(&self, job_id: &str) -> Option<Job> {
        self.jobs.read().unwrap().get(job_id).cloned()
    }

    /// Snapshot of every job, in no particular order.
    pub fn all(&self) -> Vec<Job> {
        self.jobs.read().unwrap().values().cloned().collect()
    }

    /// Apply one field-update batch under the write lock and return the
    /// updated snapshot. Refused (`None`) for unknown ids and for jobs
    /// already in a terminal state.
    pub fn update<F>(&self, job_id: &str, apply: F) -> Option<Job>
    where
        F: FnOnce(&mut Job),
    {
        let mut jobs = self.jobs.write().unwrap();
        let job = jobs.get_mut(job_id)?;
        if job.state.is_terminal() {
            return None;
        }
        apply(job);
        Some(job.clone())
    }

    pub fn len(&self) -> usize {
        self.jobs.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.read().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::JobState;
    use chrono::Utc;

    #[test]
    fn create_then_get_round_trips() {
        let registry = JobRegistry::new();
        let job = registry.create("mig-1", "prattachment");
        let found = registry.get(&job.job_id).unwrap();
        assert_eq!(found.state, JobState::Queued);
        assert_eq!(found.table_name, "prattachment");
        assert!(registry.get("no-such-id").is_none());
    }

    #[test]
    fn update_applies_under_lock() {
        let registry = JobRegistry::new();
        let job = registry.create("mig-1", "prattachment");
        let updated = registry
            .update(&job.job_id, |j| {
                j.state = JobState::Running;
                j.started_at = Some(Utc::now());
                j.total_files = 100;
            })
            .unwrap();
        assert_eq!(updated.state, JobState::Running);
        assert_eq!(registry.get(&job.job_id).unwrap().total_files, 100);
    }

    #[test]
    fn terminal_states_are_immutable() {
        let registry = JobRegistry::new();
        let job = registry.create("mig-1", "prattachment");
        registry.update(&job.job_id, |j| {
            j.state = JobState::Completed;
            j.completed_at = Some(Utc::now());
        });

        assert!(registry.update(&job.job_id, |j| j.processed_files = 9).is_none());
        assert_eq!(registry.get(&job.job_id).unwrap().processed_files, 0);
    }

    #[test]
    fn clones_share_state() {
        let registry = JobRegistry::new();
        let handle = registry.clone();
        let job = registry.create("mig-1", "prattachment");
        assert!(handle.get(&job.job_id).is_some());
        assert_eq!(handle.len(), 1);
    }
}
