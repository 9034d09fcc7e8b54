//! Error types for the deployment engine

use thiserror::Error;

use crate::models::deployment::DeployStep;

/// Main error type for the deployment engine
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Authentication error: {0}")]
    AuthError(String),

    #[error("Admission error: {0}")]
    AdmissionError(String),

    #[error("Resource quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("{step} failed: {message}")]
    StepFailed { step: DeployStep, message: String },

    #[error("Container runtime error: {0}")]
    RuntimeError(String),

    #[error("Build error: {0}")]
    BuildError(String),

    #[error("Source error: {0}")]
    SourceError(String),

    #[error("Routing error: {0}")]
    RoutingError(String),

    #[error("Queue error: {0}")]
    QueueError(String),

    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Wrap an error as the failure of a processor step
    pub fn step(step: DeployStep, err: impl std::fmt::Display) -> Self {
        EngineError::StepFailed {
            step,
            message: err.to_string(),
        }
    }

    /// Whether a queue retry could plausibly succeed
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            EngineError::AuthError(_)
                | EngineError::AdmissionError(_)
                | EngineError::QuotaExceeded(_)
                | EngineError::ValidationError(_)
                | EngineError::NotFound(_)
                | EngineError::InvalidTransition(_)
                | EngineError::ConfigError(_)
        )
    }

    /// Step tag of a step failure, if any
    pub fn failed_step(&self) -> Option<DeployStep> {
        match self {
            EngineError::StepFailed { step, .. } => Some(*step),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        EngineError::Internal(err.to_string())
    }
}
