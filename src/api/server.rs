use std::net::SocketAddr;

use axum::{
    Router,
    http::{HeaderName, HeaderValue, Method, header},
    middleware,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::decompression::RequestDecompressionLayer;
use tracing::{info, warn};

use super::{
    rate_limit,
    services::{
        download_file, download_file_head, download_progress, health, platforms, start_download,
        stream_download, thumbnail, validate_url, video_info,
    },
    state::AppState,
};
use crate::config::Config;

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Builds the application router. Everything under `/api` except the health
/// check counts against the per-client rate limit.
pub fn router(state: AppState) -> Router {
    let limited = Router::new()
        .route("/video/info", post(video_info))
        .route("/download", post(start_download))
        .route("/download/progress/{job_id}", get(download_progress))
        .route(
            "/download/file/{job_id}",
            get(download_file).head(download_file_head),
        )
        .route("/download/stream", get(stream_download))
        .route("/validate-url", post(validate_url))
        .route("/platforms", get(platforms))
        .route("/thumbnail", get(thumbnail))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::enforce,
        ));

    let api = Router::new()
        .route("/health", get(health))
        .merge(limited);

    let cors = cors_layer(&state.config.server.cors_origins);

    Router::new()
        .route("/health", get(health))
        .nest("/api", api)
        .with_state(state)
        .layer(cors)
        // gzip request bodies are decoded before handlers see them
        .layer(RequestDecompressionLayer::new())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods([Method::GET, Method::HEAD, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
        .expose_headers([
            header::CONTENT_DISPOSITION,
            HeaderName::from_static("x-job-id"),
        ])
}

/// Serves the API until Ctrl+C or SIGTERM.
///
/// The expiry sweeper runs for the lifetime of the server.
pub async fn run(config: Config, address: Option<SocketAddr>) -> Result<(), AnyError> {
    let address = address.unwrap_or(config.server.bind_addr);
    let sweep_interval = config.retention.sweep_interval();

    tokio::fs::create_dir_all(&config.storage.temp_dir)
        .await
        .map_err(|e| {
            format!(
                "Failed to create temp dir {}: {e}",
                config.storage.temp_dir.display()
            )
        })?;

    let state = AppState::new(config).map_err(|e| format!("Failed to initialize: {e}"))?;
    let sweeper = state.orchestrator.spawn_sweeper(sweep_interval);

    let app = router(state);

    let listener = TcpListener::bind(address).await?;
    info!(%address, "VidVault API listening");

    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await;

    sweeper.abort();
    served?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
