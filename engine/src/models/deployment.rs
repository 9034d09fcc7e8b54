//! Deployment models

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Deployment status
///
/// The serialized values are consumed by external dashboards and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    /// Record created, not yet enqueued
    Pending,

    /// Accepted by the deployment queue
    Queued,

    /// Source fetch or image build in progress
    Building,

    /// Container start and route registration in progress
    Deploying,

    /// Running, routed and healthy at least once
    Success,

    /// A step raised an unrecoverable error
    Failed,

    /// Superseded or cancelled by an operator
    Cancelled,
}

impl DeploymentStatus {
    pub const ALL: [DeploymentStatus; 7] = [
        DeploymentStatus::Pending,
        DeploymentStatus::Queued,
        DeploymentStatus::Building,
        DeploymentStatus::Deploying,
        DeploymentStatus::Success,
        DeploymentStatus::Failed,
        DeploymentStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Pending => "pending",
            DeploymentStatus::Queued => "queued",
            DeploymentStatus::Building => "building",
            DeploymentStatus::Deploying => "deploying",
            DeploymentStatus::Success => "success",
            DeploymentStatus::Failed => "failed",
            DeploymentStatus::Cancelled => "cancelled",
        }
    }

    /// Terminal statuses are outside the coordinate's active set
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeploymentStatus::Success | DeploymentStatus::Failed | DeploymentStatus::Cancelled
        )
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeploymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DeploymentStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("Invalid deployment status: {}", s))
    }
}

/// Target environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Production,
    Staging,
    Preview,
    Development,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Production => "production",
            Environment::Staging => "staging",
            Environment::Preview => "preview",
            Environment::Development => "development",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "production" | "prod" => Ok(Environment::Production),
            "staging" => Ok(Environment::Staging),
            "preview" => Ok(Environment::Preview),
            "development" | "dev" => Ok(Environment::Development),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

/// Where the deployed code comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Github,
    Gitlab,
    Git,
    Upload,
    Custom,
}

impl SourceType {
    /// Sources fetched with a git clone
    pub fn is_git(&self) -> bool {
        matches!(self, SourceType::Github | SourceType::Gitlab | SourceType::Git)
    }
}

/// Source payload, opaque to the queue and consumed by the processor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_sha: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_number: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,

    /// Uploaded archive (tar.gz) on local disk
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_path: Option<String>,

    /// Prebuilt image for `custom` sources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl SourceConfig {
    /// Ref to check out: commit, then tag, then branch
    pub fn checkout_ref(&self) -> Option<&str> {
        self.commit_sha
            .as_deref()
            .or(self.tag.as_deref())
            .or(self.branch.as_deref())
    }
}

/// Branch-or-PR identity of a coordinate
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum RefIdentity {
    PullRequest(u64),
    Branch(String),
    Tag(String),
    Default,
}

impl RefIdentity {
    pub fn from_source(source: &SourceConfig) -> Self {
        if let Some(pr) = source.pr_number {
            RefIdentity::PullRequest(pr)
        } else if let Some(branch) = &source.branch {
            RefIdentity::Branch(branch.clone())
        } else if let Some(tag) = &source.tag {
            RefIdentity::Tag(tag.clone())
        } else {
            RefIdentity::Default
        }
    }
}

/// (service, environment, branch-or-PR): the unit of deployment exclusivity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Coordinate {
    pub service_id: String,
    pub environment: Environment,
    pub identity: RefIdentity,
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let identity = match &self.identity {
            RefIdentity::PullRequest(n) => format!("pr#{}", n),
            RefIdentity::Branch(b) => b.clone(),
            RefIdentity::Tag(t) => format!("tag:{}", t),
            RefIdentity::Default => "default".to_string(),
        };
        write!(f, "{}/{}/{}", self.service_id, self.environment, identity)
    }
}

/// What started a deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Push,
    PullRequest,
    Tag,
    Release,
    Manual,
    Rollback,
}

/// Health verdict recorded by the health monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Degraded,
    PersistentlyDegraded,
    Missing,
}

/// Free-form deployment metadata with a few well-known keys
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<TriggerKind>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_number: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancellation_reason: Option<String>,

    /// Newer successful deployment that replaced this one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub superseded_by: Option<String>,

    /// Set on a rollback target: the deployment it replaced
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_from: Option<String>,

    /// Set on a rolled-back deployment: the deployment that replaced it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rolled_back_to: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<HealthState>,

    #[serde(default, flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// One attempt to run a service's code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    pub id: String,
    pub service_id: String,
    pub project_id: String,
    pub status: DeploymentStatus,
    pub environment: Environment,
    pub source_type: SourceType,
    pub source_config: SourceConfig,

    pub build_started_at: Option<DateTime<Utc>>,
    pub build_completed_at: Option<DateTime<Utc>>,
    pub deploy_started_at: Option<DateTime<Utc>>,
    pub deploy_completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    pub container_id: Option<String>,
    pub container_name: Option<String>,
    pub container_image: Option<String>,
    pub domain_url: Option<String>,
    pub health_check_url: Option<String>,

    pub error_message: Option<String>,
    pub metadata: DeploymentMetadata,
}

impl Deployment {
    /// Create a pending deployment
    pub fn new(input: NewDeployment) -> Self {
        let now = Utc::now();
        let mut metadata = input.metadata;
        if metadata.branch.is_none() {
            metadata.branch = input.source_config.branch.clone();
        }
        if metadata.pr_number.is_none() {
            metadata.pr_number = input.source_config.pr_number;
        }

        Self {
            id: crate::utils::generate_uuid(),
            service_id: input.service_id,
            project_id: input.project_id,
            status: DeploymentStatus::Pending,
            environment: input.environment,
            source_type: input.source_type,
            source_config: input.source_config,
            build_started_at: None,
            build_completed_at: None,
            deploy_started_at: None,
            deploy_completed_at: None,
            created_at: now,
            updated_at: now,
            container_id: None,
            container_name: None,
            container_image: None,
            domain_url: None,
            health_check_url: None,
            error_message: None,
            metadata,
        }
    }

    pub fn coordinate(&self) -> Coordinate {
        Coordinate {
            service_id: self.service_id.clone(),
            environment: self.environment,
            identity: RefIdentity::from_source(&self.source_config),
        }
    }

    /// Counted against the project quota: in flight, or live and not superseded
    pub fn holds_resources(&self) -> bool {
        match self.status {
            DeploymentStatus::Success => !self.is_superseded(),
            status => !status.is_terminal(),
        }
    }

    /// Superseded deployments keep `success` but no longer own the route
    pub fn is_superseded(&self) -> bool {
        self.metadata.superseded_by.is_some()
    }
}

/// Input for `create_deployment`
#[derive(Debug, Clone)]
pub struct NewDeployment {
    pub service_id: String,
    pub project_id: String,
    pub environment: Environment,
    pub source_type: SourceType,
    pub source_config: SourceConfig,
    pub metadata: DeploymentMetadata,
}

/// Processor steps, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployStep {
    Admission,
    SourcePreparation,
    ImageBuild,
    ContainerDeployment,
    RouteRegistration,
    HealthVerification,
    Rollback,
}

impl DeployStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeployStep::Admission => "admission",
            DeployStep::SourcePreparation => "source_preparation",
            DeployStep::ImageBuild => "image_build",
            DeployStep::ContainerDeployment => "container_deployment",
            DeployStep::RouteRegistration => "route_registration",
            DeployStep::HealthVerification => "health_verification",
            DeployStep::Rollback => "rollback",
        }
    }
}

impl fmt::Display for DeployStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deployment log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Append-only log entry attached to a deployment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentLog {
    pub id: String,
    pub deployment_id: String,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    /// `build`, `deploy`, `rollback`, `health`, `admission`
    pub phase: String,
    pub step: Option<DeployStep>,
    pub service: Option<String>,
    pub stage: Option<String>,
    pub message: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl DeploymentLog {
    pub fn new(deployment_id: &str, level: LogLevel, phase: &str, message: impl Into<String>) -> Self {
        Self {
            id: crate::utils::generate_uuid(),
            deployment_id: deployment_id.to_string(),
            timestamp: Utc::now(),
            level,
            phase: phase.to_string(),
            step: None,
            service: None,
            stage: None,
            message: message.into(),
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_step(mut self, step: DeployStep) -> Self {
        self.step = Some(step);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_literals_are_stable() {
        let literals: Vec<String> = DeploymentStatus::ALL
            .iter()
            .map(|s| serde_json::to_value(s).unwrap().as_str().unwrap().to_string())
            .collect();
        assert_eq!(
            literals,
            vec!["pending", "queued", "building", "deploying", "success", "failed", "cancelled"]
        );
        assert_eq!("deploying".parse::<DeploymentStatus>(), Ok(DeploymentStatus::Deploying));
        assert!("running".parse::<DeploymentStatus>().is_err());
    }

    #[test]
    fn test_coordinate_prefers_pull_request() {
        let source = SourceConfig {
            branch: Some("feature/x".to_string()),
            pr_number: Some(42),
            ..Default::default()
        };
        assert_eq!(RefIdentity::from_source(&source), RefIdentity::PullRequest(42));

        let source = SourceConfig {
            branch: Some("main".to_string()),
            ..Default::default()
        };
        assert_eq!(RefIdentity::from_source(&source), RefIdentity::Branch("main".to_string()));
    }

    #[test]
    fn test_metadata_keeps_unknown_keys() {
        let raw = serde_json::json!({
            "trigger": "push",
            "branch": "main",
            "deliveryId": "abc"
        });
        let metadata: DeploymentMetadata = serde_json::from_value(raw).unwrap();
        assert_eq!(metadata.trigger, Some(TriggerKind::Push));
        assert_eq!(metadata.extra.get("deliveryId"), Some(&serde_json::json!("abc")));
    }
}
