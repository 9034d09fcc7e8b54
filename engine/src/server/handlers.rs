//! HTTP request handlers

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use dockhand_api::models::{
    CancelRequest, CancelResponse, CreateDeploymentRequest, CreateDeploymentResponse,
    DeploymentLogEntry, DeploymentStatusResponse, ErrorResponse, HealthMonitorStatsResponse,
    HealthResponse, QueueStatsResponse, RollbackRequest, RollbackResponse, RouteInfo,
    SkippedMatch, TriggeredDeployment, VersionResponse, WebhookResponse,
};
use tracing::{error, warn};

use crate::errors::EngineError;
use crate::models::deployment::Environment;
use crate::server::state::ServerState;
use crate::service::deployments::{DeployContext, DeploymentView, EventOutcome, HealthMonitorStats};
use crate::utils::version_info;
use crate::webhooks::handler::{
    WebhookOutcome, GITHUB_EVENT_HEADER, GITHUB_SIGNATURE_HEADER, GITLAB_EVENT_HEADER,
    GITLAB_TOKEN_HEADER,
};

/// Engine error rendered as an HTTP response
pub struct ApiError(pub EngineError);

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        ApiError(err)
    }
}

/// Status code and error code of an engine error
pub fn error_status(err: &EngineError) -> (StatusCode, &'static str) {
    match err {
        EngineError::AuthError(_) => (StatusCode::UNAUTHORIZED, "unauthorized"),
        EngineError::AdmissionError(_) => (StatusCode::BAD_REQUEST, "admission_rejected"),
        EngineError::JsonError(_) => (StatusCode::BAD_REQUEST, "invalid_body"),
        EngineError::ValidationError(_) => (StatusCode::UNPROCESSABLE_ENTITY, "validation_failed"),
        EngineError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        EngineError::QuotaExceeded(_) => (StatusCode::CONFLICT, "quota_exceeded"),
        EngineError::InvalidTransition(_) => (StatusCode::CONFLICT, "invalid_transition"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = error_status(&self.0);
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        } else {
            warn!("Request rejected ({}): {}", status, self.0);
        }
        let body = ErrorResponse {
            error: code.to_string(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "dockhand".to_string(),
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

fn webhook_response(outcome: WebhookOutcome) -> WebhookResponse {
    let EventOutcome {
        triggered,
        skipped,
        failed,
        torn_down,
    } = match outcome {
        WebhookOutcome::Handled(outcome) => outcome,
        WebhookOutcome::Ignored(_) => EventOutcome::default(),
    };

    WebhookResponse {
        triggered: triggered
            .into_iter()
            .map(|t| TriggeredDeployment {
                deployment_id: t.deployment_id,
                job_id: t.job_id,
                service_id: t.service_id,
                rule_id: t.rule_id,
            })
            .collect(),
        skipped: skipped
            .into_iter()
            .map(|s| SkippedMatch {
                service_id: s.service_id,
                rule_id: s.rule_id,
                reason: s.reason,
            })
            .collect(),
        failed: failed
            .into_iter()
            .map(|f| dockhand_api::models::FailedMatch {
                service_id: f.service_id,
                rule_id: f.rule_id,
                error: f.error,
            })
            .collect(),
        torn_down,
    }
}

/// GitHub webhook handler; the raw body is needed for the signature
pub async fn github_webhook_handler(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, ApiError> {
    let outcome = state
        .webhooks
        .handle_github(
            header(&headers, GITHUB_EVENT_HEADER),
            header(&headers, GITHUB_SIGNATURE_HEADER),
            &body,
        )
        .await?;
    Ok(Json(webhook_response(outcome)))
}

/// GitLab webhook handler
pub async fn gitlab_webhook_handler(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, ApiError> {
    let outcome = state
        .webhooks
        .handle_gitlab(
            header(&headers, GITLAB_EVENT_HEADER),
            header(&headers, GITLAB_TOKEN_HEADER),
            &body,
        )
        .await?;
    Ok(Json(webhook_response(outcome)))
}

/// Manual deployment handler
pub async fn create_deployment_handler(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<CreateDeploymentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let environment: Environment = request
        .environment
        .parse()
        .map_err(EngineError::ValidationError)?;

    let admission = state
        .service
        .deploy_service(DeployContext {
            service_id: request.service_id,
            environment: Some(environment),
            branch: request.branch,
            commit_sha: request.commit_sha,
            pr_number: request.pr_number,
            tag: request.tag,
            image: request.image,
            upload_path: request.upload_path,
        })
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(CreateDeploymentResponse {
            deployment_id: admission.deployment_id,
            job_id: admission.job_id,
            status: admission.status.to_string(),
        }),
    ))
}

fn status_response(view: DeploymentView) -> DeploymentStatusResponse {
    let DeploymentView {
        deployment: d,
        route,
        logs,
    } = view;

    DeploymentStatusResponse {
        id: d.id,
        service_id: d.service_id,
        status: d.status.to_string(),
        environment: d.environment.to_string(),
        error_message: d.error_message,
        domain_url: d.domain_url,
        container_name: d.container_name,
        container_image: d.container_image,
        created_at: d.created_at,
        updated_at: d.updated_at,
        build_started_at: d.build_started_at,
        build_completed_at: d.build_completed_at,
        deploy_started_at: d.deploy_started_at,
        deploy_completed_at: d.deploy_completed_at,
        route: route.map(|r| RouteInfo {
            subdomain: r.subdomain,
            full_domain: r.full_domain,
            target_port: r.target_port,
            ssl_enabled: r.ssl_enabled,
            is_active: r.is_active,
        }),
        logs: logs
            .into_iter()
            .map(|l| DeploymentLogEntry {
                timestamp: l.timestamp,
                level: l.level.as_str().to_string(),
                phase: l.phase,
                step: l.step.map(|s| s.to_string()),
                message: l.message,
            })
            .collect(),
    }
}

/// Deployment status handler
pub async fn deployment_status_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<Json<DeploymentStatusResponse>, ApiError> {
    let view = state.service.get_deployment_status(&id).await?;
    Ok(Json(status_response(view)))
}

/// Cancel handler; the body is optional
pub async fn cancel_deployment_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<CancelResponse>, ApiError> {
    let request: CancelRequest = if body.is_empty() {
        CancelRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(EngineError::from)?
    };

    let cancelled = state
        .service
        .cancel_deployment(&id, request.reason.as_deref())
        .await?;
    let view = state.service.get_deployment_status(&id).await?;

    Ok(Json(CancelResponse {
        deployment_id: id,
        cancelled,
        status: view.deployment.status.to_string(),
    }))
}

/// Rollback handler, addressed to the failing deployment
pub async fn rollback_deployment_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
    Json(request): Json<RollbackRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let job_id = state
        .service
        .rollback_deployment(&id, &request.target_deployment_id)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(RollbackResponse {
            job_id,
            from_deployment_id: id,
            to_deployment_id: request.target_deployment_id,
        }),
    ))
}

fn health_stats_response(stats: HealthMonitorStats) -> HealthMonitorStatsResponse {
    let HealthMonitorStats { is_active, stats } = stats;
    HealthMonitorStatsResponse {
        is_active,
        total_deployments: stats.total_deployments,
        healthy_deployments: stats.healthy_deployments,
        degraded_deployments: stats.degraded_deployments,
        unhealthy_deployments: stats.unhealthy_deployments,
        restarted_containers: stats.restarted_containers,
        anomalies: stats.anomalies,
        errors: stats.errors,
        last_check_at: stats.last_check_at,
    }
}

/// Health monitor statistics handler
pub async fn health_monitor_stats_handler(
    State(state): State<Arc<ServerState>>,
) -> Json<HealthMonitorStatsResponse> {
    Json(health_stats_response(state.service.get_health_monitor_stats()))
}

/// Run a health pass now
pub async fn health_monitor_check_handler(
    State(state): State<Arc<ServerState>>,
) -> Json<HealthMonitorStatsResponse> {
    Json(health_stats_response(
        state.service.trigger_manual_health_check().await,
    ))
}

/// Queue statistics handler
pub async fn queue_stats_handler(State(state): State<Arc<ServerState>>) -> Json<QueueStatsResponse> {
    let stats = state.service.queue_stats().await;
    Json(QueueStatsResponse {
        waiting: stats.waiting,
        delayed: stats.delayed,
        active: stats.active,
        completed: stats.completed,
        failed: stats.failed,
    })
}
