use std::sync::Arc;

use super::error::ApiError;
use super::rate_limit::RateLimiter;
use super::thumbnail::ThumbnailClient;
use crate::config::Config;
use crate::extractor::MetadataInvoker;
use crate::observability::Metrics;
use crate::orchestrator::JobOrchestrator;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub extractor: Arc<MetadataInvoker>,
    pub orchestrator: JobOrchestrator,
    pub thumbnails: Arc<ThumbnailClient>,
    pub rate_limiter: RateLimiter,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    /// Wires every component from configuration. Spawns the job update loop,
    /// so it must run inside a Tokio runtime.
    pub fn new(config: Config) -> Result<Self, ApiError> {
        let metrics = Arc::new(Metrics::new());
        let orchestrator = JobOrchestrator::start(&config, Arc::clone(&metrics))?;
        let thumbnails = ThumbnailClient::new(&config.thumbnail)?;

        Ok(Self {
            extractor: Arc::new(MetadataInvoker::from_config(&config.extractor)),
            rate_limiter: RateLimiter::from_config(&config.rate_limit),
            thumbnails: Arc::new(thumbnails),
            orchestrator,
            metrics,
            config: Arc::new(config),
        })
    }
}
