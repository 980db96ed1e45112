//! Expiry sweep for finished jobs

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::table::JobTable;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    pub jobs_removed: usize,
    pub dirs_removed: usize,
    pub dir_errors: usize,
}

/// Removes terminal jobs idle for longer than `expiry`.
///
/// Backing storage goes first, then the record. A storage error is logged and
/// the record is dropped anyway.
pub async fn sweep_expired(table: &JobTable, now: DateTime<Utc>, expiry: Duration) -> SweepStats {
    let mut stats = SweepStats::default();

    for job in table.expired(now, expiry).await {
        if let Some(dir) = job.work_dir.as_deref() {
            match remove_work_dir(dir).await {
                Ok(true) => stats.dirs_removed += 1,
                Ok(false) => {}
                Err(e) => {
                    stats.dir_errors += 1;
                    warn!(job_id = %job.id, dir = %dir.display(), error = %e, "Failed to remove expired job files");
                }
            }
        }

        if table.remove(&job.id).await.is_some() {
            stats.jobs_removed += 1;
            debug!(job_id = %job.id, status = %job.status(), "Expired job swept");
        }
    }

    if stats.jobs_removed > 0 {
        info!(?stats, "Expiry sweep finished");
    }
    stats
}

/// Removes a job's directory; `Ok(false)` when it was already gone
pub async fn remove_work_dir(dir: &Path) -> std::io::Result<bool> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
