use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::debug;

use super::error::{JobError, Result};
use super::model::{Job, JobId, JobStatus};

/// In-memory owner of every Job record.
///
/// Handed to the orchestrator by `Arc`; callers only ever receive clones, and
/// mutations go through [`JobTable::update`] so the transition rules on [`Job`]
/// always apply.
#[derive(Debug, Default)]
pub struct JobTable {
    jobs: RwLock<HashMap<JobId, Job>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobCounts {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

impl JobCounts {
    pub fn total(&self) -> usize {
        self.pending + self.processing + self.completed + self.failed
    }
}

impl JobTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, job: Job) -> JobId {
        let id = job.id;
        self.jobs.write().await.insert(id, job);
        debug!(job_id = %id, "Job inserted");
        id
    }

    pub async fn get(&self, id: &JobId) -> Option<Job> {
        self.jobs.read().await.get(id).cloned()
    }

    /// Runs `apply` against the stored job under the write lock
    pub async fn update<T>(&self, id: &JobId, apply: impl FnOnce(&mut Job) -> Result<T>) -> Result<T> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(id).ok_or(JobError::NotFound(*id))?;
        apply(job)
    }

    pub async fn remove(&self, id: &JobId) -> Option<Job> {
        let removed = self.jobs.write().await.remove(id);
        if removed.is_some() {
            debug!(job_id = %id, "Job removed");
        }
        removed
    }

    /// Snapshots of terminal jobs not updated within `expiry`
    pub async fn expired(&self, now: DateTime<Utc>, expiry: Duration) -> Vec<Job> {
        self.jobs
            .read()
            .await
            .values()
            .filter(|job| job.is_expired(now, expiry))
            .cloned()
            .collect()
    }

    pub async fn counts(&self) -> JobCounts {
        let jobs = self.jobs.read().await;
        let mut counts = JobCounts::default();
        for job in jobs.values() {
            match job.status() {
                JobStatus::Pending => counts.pending += 1,
                JobStatus::Processing => counts.processing += 1,
                JobStatus::Completed => counts.completed += 1,
                JobStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}
