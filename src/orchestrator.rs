//! Job Orchestrator: creates jobs, runs downloads in the background and applies
//! their reports to the [`JobTable`].
//!
//! Download tasks never touch the table. They hold a [`JobUpdater`] that posts
//! [`JobUpdate`]s onto a channel, and a single [`JobUpdateLoop`] applies them in
//! arrival order. A job's progress reports therefore always land before its
//! terminal update.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tokio::task::JoinHandle;
use tokio_util::io::ReaderStream;
use tracing::{debug, error, info, trace, warn};

use crate::config::Config;
use crate::extractor::{DownloadInvoker, DownloadRequest, ExtractorError, ProgressSink};
use crate::jobs::{
    Job, JobCounts, JobError, JobId, JobOutput, JobStatus, JobTable, SweepStats,
    remove_work_dir, sweep_expired,
};
use crate::observability::Metrics;

/// Chunks buffered between the tool's stdout and a streaming client
const STREAM_BUFFER_CHUNKS: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateEvent {
    Progress(u8),
    Completed(JobOutput),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobUpdate {
    pub job_id: JobId,
    pub event: UpdateEvent,
}

/// Write handle given to a running download; the only way it affects its job
#[derive(Debug, Clone)]
pub struct JobUpdater {
    job_id: JobId,
    tx: mpsc::UnboundedSender<JobUpdate>,
}

impl JobUpdater {
    fn send(&self, event: UpdateEvent) {
        let update = JobUpdate {
            job_id: self.job_id,
            event,
        };
        if self.tx.send(update).is_err() {
            warn!(job_id = %self.job_id, "Update loop stopped, job update dropped");
        }
    }

    pub fn complete(&self, output: JobOutput) {
        self.send(UpdateEvent::Completed(output));
    }

    pub fn fail(&self, reason: impl Into<String>) {
        self.send(UpdateEvent::Failed(reason.into()));
    }
}

impl ProgressSink for JobUpdater {
    fn report(&self, percent: u8) {
        self.send(UpdateEvent::Progress(percent));
    }
}

/// Applies one update to the table. Rejected transitions are logged, never raised.
pub async fn apply_update(table: &JobTable, metrics: &Metrics, update: JobUpdate) {
    let JobUpdate { job_id, event } = update;

    let result = match event {
        UpdateEvent::Progress(percent) => table
            .update(&job_id, |job| Ok(job.record_progress(percent)))
            .await
            .map(|changed| {
                if changed {
                    trace!(job_id = %job_id, percent, "Job progress");
                }
            }),
        UpdateEvent::Completed(output) => table
            .update(&job_id, |job| job.complete(output))
            .await
            .map(|()| {
                metrics.job_completed();
                info!(job_id = %job_id, "Job completed");
            }),
        UpdateEvent::Failed(reason) => {
            let logged = reason.clone();
            table
                .update(&job_id, |job| job.fail(reason))
                .await
                .map(|()| {
                    metrics.job_failed();
                    warn!(job_id = %job_id, reason = %logged, "Job failed");
                })
        }
    };

    if let Err(e) = result {
        warn!(job_id = %job_id, error = %e, "Job update rejected");
    }
}

/// Sole consumer of job updates; runs until every [`JobUpdater`] and the
/// orchestrator itself are gone.
pub struct JobUpdateLoop {
    table: Arc<JobTable>,
    metrics: Arc<Metrics>,
    rx: mpsc::UnboundedReceiver<JobUpdate>,
}

impl JobUpdateLoop {
    pub async fn run(mut self) {
        debug!("Job update loop started");
        while let Some(update) = self.rx.recv().await {
            apply_update(&self.table, &self.metrics, update).await;
        }
        debug!("Job update loop stopped");
    }
}

/// A finished file ready to be sent once; dropping it (or the stream made from
/// it) deletes the job's directory and record.
pub struct Artifact {
    pub file: tokio::fs::File,
    pub filename: String,
    pub size: u64,
    guard: CleanupGuard,
}

impl Artifact {
    /// Body stream that keeps the cleanup guard alive until the transfer ends,
    /// whether it finished or the client went away.
    pub fn into_stream(self) -> impl Stream<Item = std::io::Result<Bytes>> + Send + 'static {
        let Artifact { file, guard, .. } = self;
        ReaderStream::new(file).map(move |chunk| {
            let _ = &guard;
            chunk
        })
    }
}

/// Name and size of a retrievable file
#[derive(Debug, Clone)]
pub struct ArtifactInfo {
    pub filename: String,
    pub size: u64,
}

struct CleanupGuard {
    table: Arc<JobTable>,
    job_id: JobId,
    work_dir: Option<PathBuf>,
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        let table = Arc::clone(&self.table);
        let job_id = self.job_id;
        let work_dir = self.work_dir.take();

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    cleanup_job(&table, job_id, work_dir.as_deref()).await;
                });
            }
            Err(_) => {
                warn!(job_id = %job_id, "No runtime for cleanup, leaving job to the expiry sweep")
            }
        }
    }
}

async fn cleanup_job(table: &JobTable, job_id: JobId, work_dir: Option<&Path>) {
    if let Some(dir) = work_dir {
        if let Err(e) = remove_work_dir(dir).await {
            error!(job_id = %job_id, dir = %dir.display(), error = %e, "Failed to remove job files");
        }
    }
    table.remove(&job_id).await;
    debug!(job_id = %job_id, "Job cleaned up after retrieval");
}

#[derive(Clone)]
pub struct JobOrchestrator {
    table: Arc<JobTable>,
    downloader: Arc<DownloadInvoker>,
    updates: mpsc::UnboundedSender<JobUpdate>,
    limiter: Option<Arc<Semaphore>>,
    temp_dir: PathBuf,
    expiry: Duration,
    metrics: Arc<Metrics>,
}

impl JobOrchestrator {
    /// Creates the orchestrator and the update loop that must be spawned next to it.
    ///
    /// `max_concurrent` bounds simultaneously running downloads; 0 means unbounded.
    pub fn new(
        downloader: DownloadInvoker,
        temp_dir: PathBuf,
        expiry: Duration,
        max_concurrent: usize,
        metrics: Arc<Metrics>,
    ) -> (Self, JobUpdateLoop) {
        let table = Arc::new(JobTable::new());
        let (tx, rx) = mpsc::unbounded_channel();

        let limiter = (max_concurrent > 0).then(|| Arc::new(Semaphore::new(max_concurrent)));
        info!(
            temp_dir = %temp_dir.display(),
            expiry_secs = expiry.as_secs(),
            max_concurrent,
            "Creating job orchestrator"
        );

        let orchestrator = Self {
            table: Arc::clone(&table),
            downloader: Arc::new(downloader),
            updates: tx,
            limiter,
            temp_dir,
            expiry,
            metrics: Arc::clone(&metrics),
        };
        let update_loop = JobUpdateLoop { table, metrics, rx };

        (orchestrator, update_loop)
    }

    /// Builds from configuration and spawns the update loop on the current runtime
    pub fn start(config: &Config, metrics: Arc<Metrics>) -> Result<Self, ExtractorError> {
        let (orchestrator, update_loop) = Self::new(
            DownloadInvoker::from_config(&config.extractor)?,
            config.storage.temp_dir.clone(),
            config.retention.file_expiry(),
            config.extractor.max_concurrent_downloads,
            metrics,
        );
        tokio::spawn(update_loop.run());
        Ok(orchestrator)
    }

    fn updater(&self, job_id: JobId) -> JobUpdater {
        JobUpdater {
            job_id,
            tx: self.updates.clone(),
        }
    }

    /// Registers a job and moves it to processing before any download work starts
    async fn register(&self, job: Job) -> Result<JobId, JobError> {
        let job_id = self.table.insert(job).await;
        self.table.update(&job_id, |job| job.start()).await?;
        self.metrics.job_created();
        Ok(job_id)
    }

    /// Starts a directory-mode download and returns its id right away
    pub async fn create_job(&self, request: DownloadRequest) -> Result<JobId, JobError> {
        let job = Job::new(&request, Some(&self.temp_dir));
        let work_dir = job.work_dir.clone().unwrap_or_else(|| self.temp_dir.join(job.id.to_string()));
        let job_id = self.register(job).await?;
        info!(job_id = %job_id, url = %request.url, kind = request.media_kind.as_str(), quality = %request.quality, format = %request.format, "Download job created");

        let updater = self.updater(job_id);
        let downloader = Arc::clone(&self.downloader);
        let limiter = self.limiter.clone();

        self.supervise(
            job_id,
            tokio::spawn(async move {
                let _permit = acquire_slot(limiter).await;
                match downloader
                    .download_to_dir(&request, &work_dir, Some(&updater))
                    .await
                {
                    Ok(path) => updater.complete(JobOutput::File(path)),
                    Err(e) => {
                        if let Err(io) = remove_work_dir(&work_dir).await {
                            warn!(job_id = %updater.job_id, error = %io, "Failed to remove work directory of failed job");
                        }
                        updater.fail(e.to_string());
                    }
                }
            }),
        );

        Ok(job_id)
    }

    /// Starts a stream-mode download. The tool's stdout arrives on the returned
    /// receiver; an `Err` item means the transfer was aborted.
    pub async fn create_stream_job(
        &self,
        request: DownloadRequest,
    ) -> Result<(JobId, mpsc::Receiver<std::io::Result<Bytes>>), JobError> {
        let job_id = self.register(Job::new(&request, None)).await?;
        info!(job_id = %job_id, url = %request.url, format = %request.format, "Streaming job created");

        let (tx, rx) = mpsc::channel(STREAM_BUFFER_CHUNKS);
        let updater = self.updater(job_id);
        let downloader = Arc::clone(&self.downloader);
        let limiter = self.limiter.clone();

        self.supervise(
            job_id,
            tokio::spawn(async move {
                let _permit = acquire_slot(limiter).await;
                match downloader
                    .download_to_stream(&request, tx, Some(&updater))
                    .await
                {
                    Ok(filename) => updater.complete(JobOutput::Streamed { filename }),
                    Err(e) => updater.fail(e.to_string()),
                }
            }),
        );

        Ok((job_id, rx))
    }

    /// Marks the job failed if its download task dies without reporting
    fn supervise(&self, job_id: JobId, task: JoinHandle<()>) {
        let updater = self.updater(job_id);
        tokio::spawn(async move {
            if let Err(e) = task.await {
                error!(job_id = %job_id, error = %e, "Download task aborted");
                updater.fail(format!("download task aborted: {e}"));
            }
        });
    }

    pub async fn get_job(&self, job_id: &JobId) -> Option<Job> {
        self.table.get(job_id).await
    }

    /// Opens a completed job's file for a one-time transfer.
    ///
    /// The returned [`Artifact`] owns the cleanup: once it (or its stream) is
    /// dropped the job's directory and record are removed.
    pub async fn retrieve(&self, job_id: &JobId) -> Result<Artifact, JobError> {
        let (job, path, filename) = self.locate(job_id).await?;

        let file = tokio::fs::File::open(&path).await?;
        let size = file.metadata().await?.len();

        info!(job_id = %job_id, filename = %filename, size, "Serving job output");
        Ok(Artifact {
            file,
            filename,
            size,
            guard: CleanupGuard {
                table: Arc::clone(&self.table),
                job_id: *job_id,
                work_dir: job.work_dir.clone(),
            },
        })
    }

    /// Same checks as [`Self::retrieve`], but the job is left in place
    pub async fn inspect(&self, job_id: &JobId) -> Result<ArtifactInfo, JobError> {
        let (_, path, filename) = self.locate(job_id).await?;
        let size = tokio::fs::metadata(&path).await?.len();
        Ok(ArtifactInfo { filename, size })
    }

    async fn locate(&self, job_id: &JobId) -> Result<(Job, PathBuf, String), JobError> {
        let job = self
            .table
            .get(job_id)
            .await
            .ok_or(JobError::NotFound(*job_id))?;

        if job.status() != JobStatus::Completed {
            return Err(JobError::NotReady(job.status()));
        }

        let Some(JobOutput::File(path)) = job.output() else {
            return Err(JobError::ArtifactMissing(*job_id));
        };
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            warn!(job_id = %job_id, path = %path.display(), "Output file vanished");
            return Err(JobError::ArtifactMissing(*job_id));
        }

        let path = path.clone();
        let filename = job
            .output()
            .and_then(JobOutput::filename)
            .unwrap_or_else(|| format!("download.{}", job.format));
        Ok((job, path, filename))
    }

    pub async fn sweep_once(&self) -> SweepStats {
        let stats = sweep_expired(&self.table, chrono::Utc::now(), self.expiry).await;
        self.metrics.jobs_swept(stats.jobs_removed);
        stats
    }

    /// Runs [`Self::sweep_once`] every `interval` until the handle is aborted
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let orchestrator = self.clone();
        info!(interval_secs = interval.as_secs(), "Starting expiry sweeper");

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                orchestrator.sweep_once().await;
            }
        })
    }

    pub async fn counts(&self) -> JobCounts {
        self.table.counts().await
    }

    pub fn table(&self) -> &Arc<JobTable> {
        &self.table
    }
}

/// Waits for a download slot when a concurrency bound is configured.
/// The semaphore is never closed, so a bound always yields a permit.
async fn acquire_slot(limiter: Option<Arc<Semaphore>>) -> Option<OwnedSemaphorePermit> {
    limiter?.acquire_owned().await.ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::{MediaKind, OutputPatterns, ToolCommand};

    fn request() -> DownloadRequest {
        DownloadRequest::new("https://youtu.be/x", MediaKind::Video, "720p", Some("mp4")).unwrap()
    }

    fn orchestrator(program: &str, temp_dir: &Path) -> (JobOrchestrator, JobUpdateLoop) {
        let invoker = DownloadInvoker::new(
            ToolCommand::new(program, Vec::new()),
            OutputPatterns::default(),
            Duration::from_secs(5),
            Duration::from_secs(10),
        );
        JobOrchestrator::new(
            invoker,
            temp_dir.to_path_buf(),
            Duration::from_secs(3600),
            0,
            Arc::new(Metrics::new()),
        )
    }

    async fn wait_for_terminal(orchestrator: &JobOrchestrator, id: &JobId) -> Job {
        for _ in 0..200 {
            let job = orchestrator.get_job(id).await.unwrap();
            if job.status().is_terminal() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("job {id} never finished");
    }

    #[tokio::test]
    async fn test_updates_apply_in_order() {
        let table = JobTable::new();
        let metrics = Metrics::new();
        let mut job = Job::new(&request(), None);
        job.start().unwrap();
        let id = table.insert(job).await;

        for event in [
            UpdateEvent::Progress(10),
            UpdateEvent::Progress(5),
            UpdateEvent::Progress(70),
            UpdateEvent::Failed("boom".into()),
            UpdateEvent::Completed(JobOutput::Streamed { filename: "x.mp4".into() }),
            UpdateEvent::Progress(90),
        ] {
            apply_update(&table, &metrics, JobUpdate { job_id: id, event }).await;
        }

        let job = table.get(&id).await.unwrap();
        assert_eq!(job.status(), JobStatus::Failed);
        assert_eq!(job.progress(), 70);
        assert_eq!(job.failure_reason(), Some("boom"));
        assert_eq!(metrics.snapshot().jobs_failed, 1);
        assert_eq!(metrics.snapshot().jobs_completed, 0);
    }

    #[tokio::test]
    async fn test_spawn_failure_marks_job_failed() {
        let temp = tempfile::tempdir().unwrap();
        let (orchestrator, update_loop) = orchestrator("/definitely/not/a/tool", temp.path());
        tokio::spawn(update_loop.run());

        let id = orchestrator.create_job(request()).await.unwrap();
        let job = wait_for_terminal(&orchestrator, &id).await;

        assert_eq!(job.status(), JobStatus::Failed);
        assert!(job.failure_reason().unwrap().contains("failed to launch"));
        assert!(!job.work_dir.unwrap().exists());
    }

    #[tokio::test]
    async fn test_job_is_processing_when_id_is_returned() {
        let temp = tempfile::tempdir().unwrap();
        let (orchestrator, _update_loop) = orchestrator("/definitely/not/a/tool", temp.path());

        let id = orchestrator.create_job(request()).await.unwrap();

        // no loop is running, so nothing but creation has been applied
        let job = orchestrator.get_job(&id).await.unwrap();
        assert_eq!(job.status(), JobStatus::Processing);
        assert_eq!(job.progress(), 0);
    }

    #[tokio::test]
    async fn test_retrieve_rejects_unfinished_and_unknown_jobs() {
        let temp = tempfile::tempdir().unwrap();
        let (orchestrator, _update_loop) = orchestrator("/definitely/not/a/tool", temp.path());

        let id = orchestrator.create_job(request()).await.unwrap();
        assert!(matches!(
            orchestrator.retrieve(&id).await,
            Err(JobError::NotReady(JobStatus::Processing))
        ));
        assert!(matches!(
            orchestrator.retrieve(&JobId::now_v7()).await,
            Err(JobError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_retrieval_cleans_up_after_transfer() {
        let temp = tempfile::tempdir().unwrap();
        let (orchestrator, _update_loop) = orchestrator("/definitely/not/a/tool", temp.path());

        let mut job = Job::new(&request(), Some(temp.path()));
        let dir = job.work_dir.clone().unwrap();
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let file = dir.join("clip.mp4");
        tokio::fs::write(&file, b"media-bytes").await.unwrap();
        job.start().unwrap();
        job.complete(JobOutput::File(file)).unwrap();
        let id = orchestrator.table().insert(job).await;

        let artifact = orchestrator.retrieve(&id).await.unwrap();
        assert_eq!(artifact.filename, "clip.mp4");
        assert_eq!(artifact.size, 11);

        let mut stream = Box::pin(artifact.into_stream());
        let mut body = Vec::new();
        while let Some(chunk) = stream.next().await {
            body.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(body, b"media-bytes");
        assert!(orchestrator.get_job(&id).await.is_some(), "cleanup waits for the stream");

        drop(stream);
        for _ in 0..100 {
            if orchestrator.get_job(&id).await.is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(orchestrator.get_job(&id).await.is_none());
        assert!(!dir.exists());
    }
}
