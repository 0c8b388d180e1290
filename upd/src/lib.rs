//! # upd: multipart upload receiver
//!
//! `upd` is a small HTTP service that accepts a file upload and stores it in a directory on local
//! disk. A client sends a `multipart/form-data` request to `POST /up` with the file in the `file`
//! field; the service writes the bytes to `<storage root>/<filename>` and answers `ok`.
//!
//! ```bash
//! curl -F file=@app.yaml http://localhost:8080/up
//! ```
//!
//! ## Behaviour
//!
//! - Only the last path segment of the declared filename is used, so uploads cannot escape the
//!   storage root.
//! - Uploads are buffered in memory up to `limits.max_multipart_memory` and spilled to a
//!   temporary file in the storage root beyond that. The finished upload is renamed into place,
//!   replacing any existing file atomically.
//! - Failures are reported with distinct status codes: 400 for a malformed request, 413 for a
//!   body above `limits.max_body_size`, 429 when the upload limiter is saturated and 500 when the
//!   file cannot be written.
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use upd::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = upd::config::Args::parse();
//!     let config = Config::load(&args)?;
//!
//!     upd::telemetry::init_telemetry(config.enable_otel_export)?;
//!
//!     let app = Application::new(config).await?;
//!     app.serve(async {
//!         tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
//!     })
//!     .await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! See the [`config`] module for configuration options.

pub mod api;
pub mod config;
pub mod errors;
pub mod limits;
mod openapi;
pub mod storage;
pub mod telemetry;

#[cfg(test)]
pub mod test_utils;

use axum::extract::DefaultBodyLimit;
use axum::{Json, Router, routing::get, routing::post};
use axum_prometheus::PrometheusMetricLayer;
use bon::Builder;
pub use config::Config;
use limits::UploadLimiter;
use std::sync::Arc;
use storage::Storage;
use tokio::net::TcpListener;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, debug, info, instrument};
use utoipa::OpenApi;

use crate::openapi::ApiDoc;

/// Application state shared across all request handlers.
///
/// # Example
///
/// ```ignore
/// let state = AppState::builder()
///     .storage(Storage::from_config(&config))
///     .config(config)
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub storage: Storage,
    /// None when concurrent uploads are unlimited
    pub limiter: Option<Arc<UploadLimiter>>,
}

fn body_limit(config: &Config) -> DefaultBodyLimit {
    match config.limits.max_body_size {
        0 => DefaultBodyLimit::disable(),
        limit => DefaultBodyLimit::max(usize::try_from(limit).unwrap_or(usize::MAX)),
    }
}

/// Build the application router.
///
/// Routes:
/// - `POST /up` - store an upload, with the configured body limit
/// - `GET /healthz` - liveness check
/// - `GET /openapi.json` - OpenAPI document
/// - `GET /internal/metrics` - Prometheus metrics, only when `enable_metrics` is set
#[instrument(skip_all)]
pub fn build_router(state: &AppState) -> anyhow::Result<Router> {
    let mut router = Router::new()
        .route(
            "/up",
            post(api::handlers::upload::upload_file).layer(body_limit(&state.config)),
        )
        .route("/healthz", get(|| async { "OK" }))
        .route("/openapi.json", get(|| async { Json(ApiDoc::openapi()) }))
        .with_state(state.clone());

    if state.config.enable_metrics {
        let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();
        router = router
            .route("/internal/metrics", get(move || async move { metric_handle.render() }))
            .layer(prometheus_layer);
    }

    let router = router.layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    Ok(router)
}

/// The upload service.
///
/// 1. **Create**: [`Application::new`] prepares the storage root and builds the router
/// 2. **Serve**: [`Application::serve`] binds to a TCP port and starts handling requests
/// 3. **Shutdown**: when the shutdown future resolves, in-flight requests finish and telemetry is
///    flushed
pub struct Application {
    router: Router,
    config: Config,
}

impl Application {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting upload service with configuration: {:#?}", config);

        storage::prepare_root(&config.storage).await?;

        let state = AppState::builder()
            .storage(Storage::from_config(&config))
            .maybe_limiter(UploadLimiter::new(&config.limits.uploads).map(Arc::new))
            .config(config.clone())
            .build();

        let router = build_router(&state)?;

        Ok(Self { router, config })
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> axum_test::TestServer {
        axum_test::TestServer::new(self.router.into_make_service()).expect("Failed to create test server")
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        let local_addr = listener.local_addr()?;
        info!(
            root = %self.config.storage.root.display(),
            "Upload service listening on http://{}", local_addr
        );

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}
