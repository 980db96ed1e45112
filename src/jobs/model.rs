use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{JobError, Result};
use crate::extractor::{DownloadRequest, MediaKind};

pub type JobId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Forward-only: pending → processing → completed | failed
    fn allows(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a finished job's media ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutput {
    /// Written into the job's work directory; retrievable once
    File(PathBuf),
    /// Already delivered to the requesting client
    Streamed { filename: String },
}

impl JobOutput {
    pub fn filename(&self) -> Option<String> {
        match self {
            JobOutput::File(path) => path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned()),
            JobOutput::Streamed { filename } => Some(filename.clone()),
        }
    }
}

/// One tracked download attempt.
///
/// Inputs are fixed at creation; status, progress and the terminal fields only
/// change through the transition methods below, which enforce forward-only
/// moves and refresh `updated_at`.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub source_url: String,
    pub media_kind: MediaKind,
    pub quality: String,
    pub format: String,
    /// Exclusively owned scratch directory (directory mode only)
    pub work_dir: Option<PathBuf>,
    status: JobStatus,
    progress: u8,
    output: Option<JobOutput>,
    failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Job {
    /// New pending job; with `work_root` set it gets its own directory under it
    pub fn new(request: &DownloadRequest, work_root: Option<&Path>) -> Self {
        let now = Utc::now();
        let id = Uuid::now_v7();
        Self {
            id,
            source_url: request.url.clone(),
            media_kind: request.media_kind,
            quality: request.quality.clone(),
            format: request.format.clone(),
            work_dir: work_root.map(|root| root.join(id.to_string())),
            status: JobStatus::Pending,
            progress: 0,
            output: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn output(&self) -> Option<&JobOutput> {
        self.output.as_ref()
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn transition(&mut self, next: JobStatus) -> Result<()> {
        if !self.status.allows(next) {
            return Err(JobError::InvalidTransition {
                id: self.id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.touch();
        Ok(())
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn start(&mut self) -> Result<()> {
        self.transition(JobStatus::Processing)
    }

    /// Applies a progress report; ignored unless processing and strictly higher.
    /// Returns whether the job changed.
    pub fn record_progress(&mut self, percent: u8) -> bool {
        let percent = percent.min(100);
        if self.status != JobStatus::Processing || percent <= self.progress {
            return false;
        }
        self.progress = percent;
        self.touch();
        true
    }

    pub fn complete(&mut self, output: JobOutput) -> Result<()> {
        self.transition(JobStatus::Completed)?;
        self.progress = 100;
        self.output = Some(output);
        Ok(())
    }

    pub fn fail(&mut self, reason: impl Into<String>) -> Result<()> {
        self.transition(JobStatus::Failed)?;
        self.failure_reason = Some(reason.into());
        Ok(())
    }

    /// Terminal and untouched for longer than `expiry`
    pub fn is_expired(&self, now: DateTime<Utc>, expiry: Duration) -> bool {
        if !self.status.is_terminal() {
            return false;
        }
        let age = now.signed_duration_since(self.updated_at);
        age.to_std().is_ok_and(|age| age >= expiry)
    }

    #[cfg(test)]
    pub(crate) fn backdate(&mut self, by: Duration) {
        if let Ok(by) = chrono::Duration::from_std(by) {
            self.updated_at -= by;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> Job {
        let request =
            DownloadRequest::new("https://youtu.be/x", MediaKind::Video, "720p", Some("mp4"))
                .unwrap();
        Job::new(&request, None)
    }

    #[test]
    fn test_lifecycle_to_completed() {
        let mut job = job();
        assert_eq!(job.status(), JobStatus::Pending);

        job.start().unwrap();
        assert!(job.record_progress(40));
        job.complete(JobOutput::File(PathBuf::from("/tmp/a/clip.mp4")))
            .unwrap();

        assert_eq!(job.status(), JobStatus::Completed);
        assert_eq!(job.progress(), 100);
        assert_eq!(job.output().and_then(JobOutput::filename).as_deref(), Some("clip.mp4"));
        assert_eq!(job.failure_reason(), None);
    }

    #[test]
    fn test_progress_never_decreases() {
        let mut job = job();
        assert!(!job.record_progress(10), "pending jobs take no progress");

        job.start().unwrap();
        assert!(job.record_progress(50));
        assert!(!job.record_progress(30));
        assert!(!job.record_progress(50));
        assert_eq!(job.progress(), 50);
    }

    #[test]
    fn test_terminal_states_are_sticky() {
        let mut failed = job();
        failed.start().unwrap();
        failed.fail("boom").unwrap();

        assert!(matches!(
            failed.complete(JobOutput::Streamed { filename: "x.mp4".into() }),
            Err(JobError::InvalidTransition { .. })
        ));
        assert!(failed.start().is_err());
        assert!(!failed.record_progress(90));
        assert_eq!(failed.status(), JobStatus::Failed);
        assert_eq!(failed.failure_reason(), Some("boom"));

        let mut completed = job();
        completed.start().unwrap();
        completed
            .complete(JobOutput::Streamed { filename: "x.mp4".into() })
            .unwrap();
        assert!(completed.fail("late").is_err());
        assert_eq!(completed.status(), JobStatus::Completed);
        assert_eq!(completed.failure_reason(), None);
    }

    #[test]
    fn test_only_terminal_jobs_expire() {
        let expiry = Duration::from_secs(3600);
        let mut job = job();
        job.start().unwrap();
        job.backdate(Duration::from_secs(7200));
        assert!(!job.is_expired(Utc::now(), expiry));

        job.complete(JobOutput::Streamed { filename: "x.mp4".into() })
            .unwrap();
        assert!(!job.is_expired(Utc::now(), expiry));

        job.backdate(Duration::from_secs(7200));
        assert!(job.is_expired(Utc::now(), expiry));
    }
}
