//! Container runtime and image builder interfaces

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::EngineError;

/// Label carrying the owning deployment id
pub const DEPLOYMENT_LABEL: &str = "dockhand.deployment";

/// Label carrying the owning service id
pub const SERVICE_LABEL: &str = "dockhand.service";

/// Everything needed to start one container
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    /// Canonical name; an existing container with it is replaced
    pub name: String,
    pub image: String,
    pub deployment_id: String,
    pub service_id: String,
    pub port: u16,
    pub env: BTreeMap<String, String>,
    pub cpu_millicores: Option<u64>,
    pub memory_mb: Option<u64>,
    pub network: Option<String>,
}

impl ContainerSpec {
    pub fn labels(&self) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        labels.insert(DEPLOYMENT_LABEL.to_string(), self.deployment_id.clone());
        labels.insert(SERVICE_LABEL.to_string(), self.service_id.clone());
        labels
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    Created,
    Running,
    Restarting,
    Paused,
    Exited,
    Dead,
    Unknown,
}

impl ContainerState {
    pub fn parse(state: &str) -> Self {
        match state.to_lowercase().as_str() {
            "created" => ContainerState::Created,
            "running" => ContainerState::Running,
            "restarting" => ContainerState::Restarting,
            "paused" => ContainerState::Paused,
            "exited" => ContainerState::Exited,
            "dead" => ContainerState::Dead,
            _ => ContainerState::Unknown,
        }
    }
}

/// Runtime view of a container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub image: String,
    pub state: ContainerState,
}

impl ContainerInfo {
    pub fn is_running(&self) -> bool {
        self.state == ContainerState::Running
    }
}

/// Container lifecycle operations
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Start a container from `spec`, replacing any container with the same name.
    /// Returns the container id.
    async fn create_and_start(&self, spec: &ContainerSpec) -> Result<String, EngineError>;

    /// Start an existing, stopped container by id or name
    async fn start(&self, id_or_name: &str) -> Result<(), EngineError>;

    async fn stop(&self, id: &str) -> Result<(), EngineError>;

    async fn remove(&self, id: &str) -> Result<(), EngineError>;

    async fn restart(&self, id: &str) -> Result<(), EngineError>;

    /// Running and, when the image declares a healthcheck, reporting healthy
    async fn check_health(&self, id: &str) -> Result<bool, EngineError>;

    /// Containers labelled with `deployment_id`, in any state
    async fn list_by_deployment(&self, deployment_id: &str) -> Result<Vec<ContainerInfo>, EngineError>;

    async fn get_info(&self, id_or_name: &str) -> Result<Option<ContainerInfo>, EngineError>;
}

/// Turns a prepared source tree into an image
#[async_trait]
pub trait ImageBuilder: Send + Sync {
    /// Build `source_path` as `image_tag`, returning the final image reference
    async fn build(&self, source_path: &Path, image_tag: &str) -> Result<String, EngineError>;
}
