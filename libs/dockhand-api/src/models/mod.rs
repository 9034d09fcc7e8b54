//! Deployment API models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Version response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Error body returned by every failing endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// Manual deployment request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDeploymentRequest {
    pub service_id: String,
    /// `production`, `staging`, `preview` or `development`
    pub environment: String,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub commit_sha: Option<String>,
    #[serde(default)]
    pub pr_number: Option<u64>,
    #[serde(default)]
    pub tag: Option<String>,
    /// Prebuilt image, only for `custom` services
    #[serde(default)]
    pub image: Option<String>,
    /// Path of an uploaded archive, only for `upload` services
    #[serde(default)]
    pub upload_path: Option<String>,
}

/// Manual deployment response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDeploymentResponse {
    pub deployment_id: String,
    pub job_id: String,
    pub status: String,
}

/// One deployment log line
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentLogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub phase: String,
    #[serde(default)]
    pub step: Option<String>,
    pub message: String,
}

/// Active route of a deployment
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteInfo {
    pub subdomain: String,
    pub full_domain: String,
    pub target_port: u16,
    pub ssl_enabled: bool,
    pub is_active: bool,
}

/// Deployment status snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentStatusResponse {
    pub id: String,
    pub service_id: String,
    pub status: String,
    pub environment: String,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub domain_url: Option<String>,
    #[serde(default)]
    pub container_name: Option<String>,
    #[serde(default)]
    pub container_image: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub build_started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub build_completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deploy_started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deploy_completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub route: Option<RouteInfo>,
    #[serde(default)]
    pub logs: Vec<DeploymentLogEntry>,
}

/// Cancel request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CancelRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

/// Cancel response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelResponse {
    pub deployment_id: String,
    /// False when the deployment was already terminal
    pub cancelled: bool,
    pub status: String,
}

/// Rollback request, issued against the failing deployment
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackRequest {
    pub target_deployment_id: String,
}

/// Rollback response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackResponse {
    pub job_id: String,
    pub from_deployment_id: String,
    pub to_deployment_id: String,
}

/// Health monitor statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthMonitorStatsResponse {
    pub is_active: bool,
    pub total_deployments: u64,
    pub healthy_deployments: u64,
    pub degraded_deployments: u64,
    pub unhealthy_deployments: u64,
    pub restarted_containers: u64,
    /// Successful deployments found without any running container
    pub anomalies: u64,
    pub errors: u64,
    #[serde(default)]
    pub last_check_at: Option<DateTime<Utc>>,
}

/// Queue statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatsResponse {
    pub waiting: usize,
    pub delayed: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Webhook processing summary
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookResponse {
    pub triggered: Vec<TriggeredDeployment>,
    pub skipped: Vec<SkippedMatch>,
    pub failed: Vec<FailedMatch>,
    pub torn_down: Vec<String>,
}

/// A deployment started by an event
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggeredDeployment {
    pub deployment_id: String,
    pub job_id: String,
    pub service_id: String,
    pub rule_id: String,
}

/// A rule match the change detector skipped
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedMatch {
    pub service_id: String,
    pub rule_id: String,
    pub reason: String,
}

/// A rule match whose admission failed
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedMatch {
    pub service_id: String,
    pub rule_id: String,
    pub error: String,
}
