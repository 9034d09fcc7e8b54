//! Queue job payloads

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::EngineError;
use crate::models::deployment::SourceConfig;

/// Build and deploy one deployment record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployJob {
    pub deployment_id: String,
    pub project_id: String,
    pub service_id: String,
    pub source_config: SourceConfig,
}

/// Put a previous successful deployment back in place of a failing one
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackJob {
    pub failing_deployment_id: String,
    pub target_deployment_id: String,
}

/// Job kinds, tagged by `kind` on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Job {
    Deploy(DeployJob),
    Rollback(RollbackJob),
    HealthCheck,
}

impl Job {
    pub fn kind(&self) -> &'static str {
        match self {
            Job::Deploy(_) => "deploy",
            Job::Rollback(_) => "rollback",
            Job::HealthCheck => "health_check",
        }
    }

    /// Attempts the queue grants this kind of job
    pub fn max_attempts(&self, default: u32) -> u32 {
        match self {
            Job::Deploy(_) => default.max(1),
            Job::Rollback(_) | Job::HealthCheck => 1,
        }
    }
}

/// Queue-side wrapper; the payload stays encoded until a worker takes the job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEnvelope {
    pub id: String,
    pub kind: String,
    pub payload: serde_json::Value,
    pub attempts: u32,
    pub max_attempts: u32,
    pub enqueued_at: DateTime<Utc>,
    pub run_at: DateTime<Utc>,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl JobEnvelope {
    pub fn encode(job: &Job, max_attempts: u32) -> Result<Self, EngineError> {
        let now = Utc::now();
        Ok(Self {
            id: crate::utils::generate_uuid(),
            kind: job.kind().to_string(),
            payload: serde_json::to_value(job)?,
            attempts: 0,
            max_attempts: job.max_attempts(max_attempts),
            enqueued_at: now,
            run_at: now,
            last_error: None,
        })
    }

    pub fn decode(&self) -> Result<Job, EngineError> {
        serde_json::from_value(self.payload.clone()).map_err(|e| {
            EngineError::QueueError(format!("Job {} ({}) has an invalid payload: {}", self.id, self.kind, e))
        })
    }
}
