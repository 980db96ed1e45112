//! Per-client sliding-window request limiter

use std::collections::{HashMap, VecDeque};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};
use tracing::debug;

use super::error::ApiError;
use super::state::AppState;
use crate::config::RateLimitConfig;

/// Buckets are pruned once the map grows past this many clients
const PRUNE_THRESHOLD: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientKey {
    Ip(IpAddr),
    /// Peer address unknown (e.g. in-process requests); all such calls share one bucket
    Shared,
}

/// Sliding window: at most `max_requests` per client within `window`
#[derive(Clone)]
pub struct RateLimiter {
    buckets: Arc<Mutex<HashMap<ClientKey, VecDeque<Instant>>>>,
    window: Duration,
    max_requests: usize,
}

impl RateLimiter {
    pub fn new(window: Duration, max_requests: usize) -> Self {
        Self {
            buckets: Arc::new(Mutex::new(HashMap::new())),
            window,
            max_requests,
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.window(), config.max_requests)
    }

    /// Records the request and returns whether it is allowed
    pub async fn check(&self, client: ClientKey) -> bool {
        self.check_at(client, Instant::now()).await
    }

    async fn check_at(&self, client: ClientKey, now: Instant) -> bool {
        let mut buckets = self.buckets.lock().await;

        if buckets.len() > PRUNE_THRESHOLD {
            let window = self.window;
            buckets.retain(|_, hits| hits.back().is_some_and(|last| now.duration_since(*last) < window));
        }

        let hits = buckets.entry(client).or_default();
        while hits
            .front()
            .is_some_and(|first| now.duration_since(*first) >= self.window)
        {
            hits.pop_front();
        }

        if hits.len() >= self.max_requests {
            return false;
        }
        hits.push_back(now);
        true
    }

    pub async fn tracked_clients(&self) -> usize {
        self.buckets.lock().await.len()
    }
}

/// Middleware rejecting requests over the limit with 429
pub async fn enforce(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let client = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map_or(ClientKey::Shared, |ConnectInfo(addr)| ClientKey::Ip(addr.ip()));

    if !state.rate_limiter.check(client).await {
        debug!(?client, "Rate limit exceeded");
        return ApiError::RateLimited.into_response();
    }

    next.run(request).await
}
