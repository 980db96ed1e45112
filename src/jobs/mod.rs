//! Job records and the in-memory table that owns them.
//!
//! A [`Job`] moves forward only: `pending → processing → completed | failed`.
//! Progress is non-decreasing while processing and pinned at 100 on completion.
//! Finished jobs are reclaimed by [`sweep_expired`] once idle past the
//! configured expiry window.

pub mod error;
pub mod model;
pub mod sweep;
pub mod table;

pub use error::{JobError, Result};
pub use model::{Job, JobId, JobOutput, JobStatus};
pub use sweep::{SweepStats, remove_work_dir, sweep_expired};
pub use table::{JobCounts, JobTable};
