use thiserror::Error;

use super::model::{JobId, JobStatus};

#[derive(Debug, Error)]
pub enum JobError {
    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Job {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Download not completed yet (status: {0})")]
    NotReady(JobStatus),

    #[error("File not found for job {0}")]
    ArtifactMissing(JobId),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, JobError>;
