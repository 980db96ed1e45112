//! Tracing setup and in-process counters

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,vidvault=debug";

/// Installs the global fmt subscriber, honoring `RUST_LOG` when set.
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Counters for recording service activity
#[derive(Debug, Default)]
pub struct Metrics {
    metadata_queries: AtomicU64,
    jobs_created: AtomicU64,
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    jobs_swept: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn metadata_query(&self) {
        self.metadata_queries.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(counter = "metadata_queries", "Metric incremented");
    }

    pub fn job_created(&self) {
        self.jobs_created.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(counter = "jobs_created", "Metric incremented");
    }

    pub fn job_completed(&self) {
        self.jobs_completed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(counter = "jobs_completed", "Metric incremented");
    }

    pub fn job_failed(&self) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(counter = "jobs_failed", "Metric incremented");
    }

    pub fn jobs_swept(&self, count: usize) {
        self.jobs_swept.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            metadata_queries: self.metadata_queries.load(Ordering::Relaxed),
            jobs_created: self.jobs_created.load(Ordering::Relaxed),
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            jobs_swept: self.jobs_swept.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub metadata_queries: u64,
    pub jobs_created: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub jobs_swept: u64,
}
