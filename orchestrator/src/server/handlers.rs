//! HTTP request handlers

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures::{future, stream, Stream, StreamExt};
use openapi_server::models::{
    DeployRequest, DeployResponse, ErrorResponse, HealthResponse, LogsResponse, ScaleRequest,
    StopResponse, TeardownWarningResponse, VersionResponse,
};
use serde::Deserialize;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::{error, info, warn};

use crate::deploy::fsm::DeploymentStatus;
use crate::errors::StackError;
use crate::events::ProgressEvent;
use crate::models::deployment::{DeploymentIntent, InfrastructureConfig};
use crate::models::resource::ServiceKind;
use crate::server::state::ServerState;
use crate::utils::version_info;

impl IntoResponse for StackError {
    fn into_response(self) -> Response {
        let (status, error) = match &self {
            StackError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            StackError::InvalidTransition(_) => (StatusCode::CONFLICT, "invalid_transition"),
            StackError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            StackError::ValidationError(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("Request failed: {}", self);
        }

        let body = ErrorResponse {
            error: error.to_string(),
            message: self.to_string(),
            details: None,
        };
        (status, Json(body)).into_response()
    }
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "stackpilot".to_string(),
        version: version.version,
    })
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    let version = version_info();
    Json(VersionResponse {
        version: version.version,
        git_hash: version.git_hash,
        build_time: version.build_time,
    })
}

fn parse_intent(request: &DeployRequest) -> Result<DeploymentIntent, StackError> {
    Ok(DeploymentIntent {
        name: request.name.clone(),
        model_size: request.model_size.parse()?,
        region: request.region.trim().to_string(),
        compliance: request.compliance.parse()?,
        industry: request.industry.parse()?,
        use_case: request.use_case.clone(),
    })
}

/// Record a deployment and start its pipeline in the background
pub async fn create_deployment_handler(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<DeployRequest>,
) -> Result<impl IntoResponse, StackError> {
    let intent = parse_intent(&request)?;
    let deployment = state
        .orchestrator
        .submit(&request.organization_id, intent)
        .await?;
    let id = deployment.id.clone();

    let guard = state
        .active_runs
        .try_claim(&id)
        .ok_or_else(|| StackError::Conflict(format!("deployment {} is already running", id)))?;

    let orchestrator = state.orchestrator.clone();
    let mut shutdown_rx = state.shutdown_tx.subscribe();
    tokio::spawn(async move {
        let cancel = async move {
            let _ = shutdown_rx.recv().await;
        };
        match orchestrator.run_pipeline_until(guard.id(), cancel).await {
            Ok(_) => info!("[{}] pipeline finished", guard.id()),
            Err(e) => warn!("[{}] pipeline failed: {}", guard.id(), e),
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(DeployResponse {
            deployment_id: id,
            status: deployment.status.to_string(),
        }),
    ))
}

/// List deployments
pub async fn list_deployments_handler(
    State(state): State<Arc<ServerState>>,
) -> Result<impl IntoResponse, StackError> {
    Ok(Json(state.orchestrator.list().await?))
}

/// Deployment record and step log
pub async fn deployment_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, StackError> {
    Ok(Json(state.orchestrator.get_status(&id).await?))
}

/// Stop a deployment
pub async fn stop_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, StackError> {
    let _guard = state.active_runs.try_claim(&id).ok_or_else(|| {
        StackError::Conflict(format!("an operation on deployment {} is in progress", id))
    })?;

    let report = state.orchestrator.stop_deployment(&id).await?;
    Ok(Json(StopResponse {
        deployment_id: report.deployment.id,
        status: report.deployment.status.to_string(),
        warnings: report
            .warnings
            .into_iter()
            .map(|w| TeardownWarningResponse {
                resource: w.resource,
                message: w.message,
            })
            .collect(),
    }))
}

/// Resize the compute of a running deployment
pub async fn scale_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
    Json(request): Json<ScaleRequest>,
) -> Result<impl IntoResponse, StackError> {
    let _guard = state.active_runs.try_claim(&id).ok_or_else(|| {
        StackError::Conflict(format!("an operation on deployment {} is in progress", id))
    })?;

    let config = InfrastructureConfig {
        gpu_type: request.gpu_type,
        gpu_count: request.gpu_count,
        memory_gb: request.memory_gb,
        storage_gb: request.storage_gb,
    };
    Ok(Json(state.orchestrator.scale_deployment(&id, config).await?))
}

/// Probe the services of a deployment
pub async fn deployment_health_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, StackError> {
    Ok(Json(state.orchestrator.get_deployment_health(&id).await?))
}

fn event_name(event: &ProgressEvent) -> &'static str {
    match event {
        ProgressEvent::StatusChanged { .. } => "status_changed",
        ProgressEvent::Step(_) => "step",
        ProgressEvent::Completed { .. } => "completed",
        ProgressEvent::Failed { .. } => "failed",
    }
}

fn to_sse(event: &ProgressEvent) -> Result<Event, Infallible> {
    let sse = Event::default().event(event_name(event));
    Ok(match serde_json::to_string(event) {
        Ok(data) => sse.data(data),
        Err(e) => sse.comment(format!("unserializable event: {}", e)),
    })
}

/// Progress events of one deployment as server-sent events.
///
/// Starts with the current status. The stream ends after the run completes
/// or fails, or right away when nothing is in flight.
pub async fn events_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, StackError> {
    // Subscribe first so nothing between the snapshot and the stream is lost
    let receiver = state.events.subscribe();
    let deployment = state.orchestrator.store().get(&id).await?;

    let snapshot = ProgressEvent::StatusChanged {
        deployment_id: id.clone(),
        status: deployment.status,
    };
    let follow =
        !deployment.status.is_terminal() && deployment.status != DeploymentStatus::Running;

    let live = BroadcastStream::new(receiver)
        .filter_map(move |message| {
            let event = match message {
                Ok(event) if event.deployment_id() == id => Some(event),
                Ok(_) => None,
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!("[{}] event subscriber lagged, {} events skipped", id, skipped);
                    None
                }
            };
            future::ready(event)
        })
        .scan(false, |done, event| {
            if *done {
                return future::ready(None);
            }
            *done = event.is_final();
            future::ready(Some(event))
        });
    let live = if follow {
        live.left_stream()
    } else {
        stream::empty::<ProgressEvent>().right_stream()
    };

    let events = stream::once(future::ready(snapshot))
        .chain(live)
        .map(|event| to_sse(&event));

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    #[serde(default = "default_tail")]
    pub tail: usize,
}

fn default_tail() -> usize {
    100
}

/// Last log lines of one service
pub async fn logs_handler(
    State(state): State<Arc<ServerState>>,
    Path((id, service)): Path<(String, String)>,
    Query(query): Query<LogsQuery>,
) -> Result<impl IntoResponse, StackError> {
    let kind: ServiceKind = service.parse()?;
    let lines = state.orchestrator.logs(&id, kind, query.tail).await?;
    Ok(Json(LogsResponse {
        deployment_id: id,
        service: kind.to_string(),
        lines,
    }))
}
