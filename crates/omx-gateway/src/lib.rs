//! HTTP adapter over the omx job orchestrator.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use omx_jobs::JobOrchestrator;
use tokio::net::TcpListener;
use tracing::info;

mod api_error;
mod endpoints;
mod handlers;
pub mod request_options;
mod upload_form;

pub use api_error::GatewayApiError;
pub use handlers::AnalysisResultView;

use endpoints::{
    ANALYZE_ENDPOINT, ENGINE_CHECK_ENDPOINT, HEALTH_ENDPOINT, PREPROCESS_ENDPOINT, RESULTS_ENDPOINT, ROOT_ENDPOINT,
    SESSION_DOWNLOAD_ENDPOINT, SESSION_ENDPOINT, STATUS_ENDPOINT,
};
use handlers::{
    handle_analyze, handle_engine_check, handle_health, handle_preprocess, handle_results, handle_root,
    handle_session_download, handle_session_info, handle_status,
};

const DEFAULT_MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    pub bind: String,
    pub max_upload_bytes: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8000".to_string(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

pub(crate) struct GatewayState {
    pub(crate) orchestrator: JobOrchestrator,
}

/// Builds the router over `orchestrator`; uploads above `max_upload_bytes` are refused.
pub fn build_gateway_router(orchestrator: JobOrchestrator, max_upload_bytes: usize) -> Router {
    let state = Arc::new(GatewayState { orchestrator });
    Router::new()
        .route(ROOT_ENDPOINT, get(handle_root))
        .route(HEALTH_ENDPOINT, get(handle_health))
        .route(ENGINE_CHECK_ENDPOINT, get(handle_engine_check))
        .route(PREPROCESS_ENDPOINT, post(handle_preprocess))
        .route(ANALYZE_ENDPOINT, post(handle_analyze))
        .route(STATUS_ENDPOINT, get(handle_status))
        .route(RESULTS_ENDPOINT, get(handle_results))
        .route(SESSION_ENDPOINT, get(handle_session_info))
        .route(SESSION_DOWNLOAD_ENDPOINT, get(handle_session_download))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state)
}

/// Serves the gateway until ctrl-c.
pub async fn run_gateway(config: GatewayConfig, orchestrator: JobOrchestrator) -> Result<()> {
    let bind_addr: SocketAddr = config
        .bind
        .parse()
        .with_context(|| format!("invalid bind address '{}': expected host:port", config.bind))?;
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind gateway on {bind_addr}"))?;
    let local_addr = listener
        .local_addr()
        .context("failed to resolve gateway listen address")?;

    info!(
        addr = %local_addr,
        sessions_root = %orchestrator.config().sessions_root.display(),
        max_upload_bytes = config.max_upload_bytes,
        "gateway listening"
    );

    let app = build_gateway_router(orchestrator, config.max_upload_bytes);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("gateway server exited unexpectedly")?;
    info!("gateway stopped");
    Ok(())
}
