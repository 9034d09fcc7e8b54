//! HTTP server setup

use std::future::Future;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::app::options::ServerOptions;
use crate::errors::EngineError;
use crate::server::handlers::{
    cancel_deployment_handler, create_deployment_handler, deployment_status_handler,
    github_webhook_handler, gitlab_webhook_handler, health_handler, health_monitor_check_handler,
    health_monitor_stats_handler, queue_stats_handler, rollback_deployment_handler,
    version_handler,
};
use crate::server::state::ServerState;

/// Every route of the engine API
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        // Health and version
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        // Webhooks
        .route("/webhooks/github", post(github_webhook_handler))
        .route("/webhooks/gitlab", post(gitlab_webhook_handler))
        // Deployments
        .route("/deployments", post(create_deployment_handler))
        .route("/deployments/{id}", get(deployment_status_handler))
        .route("/deployments/{id}/cancel", post(cancel_deployment_handler))
        .route("/deployments/{id}/rollback", post(rollback_deployment_handler))
        // Health monitor and queue
        .route("/health-monitor/stats", get(health_monitor_stats_handler))
        .route("/health-monitor/check", post(health_monitor_check_handler))
        .route("/queue/stats", get(queue_stats_handler))
        // State and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Start the HTTP server
pub async fn serve(
    options: &ServerOptions,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), EngineError>>, EngineError> {
    let app = router(state);

    let addr = format!("{}:{}", options.host, options.port);
    info!("Starting HTTP server on {}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| EngineError::ServerError(e.to_string()))?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| EngineError::ServerError(e.to_string()))
    });

    Ok(handle)
}
