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
use crate::errors::StackError;
use crate::server::handlers::{
    create_deployment_handler, deployment_handler, deployment_health_handler, events_handler,
    health_handler, list_deployments_handler, logs_handler, scale_handler, stop_handler,
    version_handler,
};
use crate::server::state::ServerState;

/// Build the API router
pub fn build_router(state: Arc<ServerState>) -> Router {
    Router::new()
        // Health and version
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        // Deployments
        .route(
            "/deployments",
            get(list_deployments_handler).post(create_deployment_handler),
        )
        .route("/deployments/{id}", get(deployment_handler))
        .route("/deployments/{id}/stop", post(stop_handler))
        .route("/deployments/{id}/scale", post(scale_handler))
        .route("/deployments/{id}/health", get(deployment_health_handler))
        .route("/deployments/{id}/events", get(events_handler))
        .route("/deployments/{id}/logs/{service}", get(logs_handler))
        // State and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Start the HTTP server
pub async fn serve(
    options: &ServerOptions,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), StackError>>, StackError> {
    let app = build_router(state);

    let addr = format!("{}:{}", options.host, options.port);
    info!("Starting HTTP server on {}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| StackError::ServerError(e.to_string()))?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| StackError::ServerError(e.to_string()))
    });

    Ok(handle)
}
