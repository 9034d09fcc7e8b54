//! Catalog models read by the engine
//!
//! Projects and services are owned by the data-access layer; the engine only
//! reads them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::deployment::{Environment, SourceType};

/// A project groups services under one name and quota
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
}

/// Resources a service declares per replica
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequirements {
    pub cpu_millicores: u64,
    pub memory_mb: u64,
    pub replicas: u32,
}

/// A deployable unit of a project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub id: String,
    pub project_id: String,
    pub name: String,

    /// Provider repository id (GitHub/GitLab numeric id as string)
    #[serde(default)]
    pub repository_id: Option<String>,

    #[serde(default)]
    pub repository_url: Option<String>,

    pub source_type: SourceType,

    /// Organization login used to look up provider credentials
    #[serde(default)]
    pub organization: Option<String>,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Container port the service listens on
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub health_check_path: Option<String>,

    #[serde(default)]
    pub resources: Option<ResourceRequirements>,

    /// Resolved environment variables passed to the container
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

fn default_true() -> bool {
    true
}

fn default_port() -> u16 {
    3000
}

/// Ceilings for one project, optionally per environment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceQuota {
    pub project_id: String,

    /// `None` applies to every environment
    #[serde(default)]
    pub environment: Option<Environment>,

    #[serde(default)]
    pub max_cpu_millicores: Option<u64>,

    #[serde(default)]
    pub max_memory_mb: Option<u64>,

    #[serde(default)]
    pub max_replicas: Option<u32>,
}

/// Current consumption against a quota
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceUsage {
    pub cpu_millicores: u64,
    pub memory_mb: u64,
    pub replicas: u32,
}

impl ResourceUsage {
    pub fn add(&self, req: &ResourceRequirements) -> ResourceUsage {
        let replicas = req.replicas.max(1);
        ResourceUsage {
            cpu_millicores: self.cpu_millicores + req.cpu_millicores * replicas as u64,
            memory_mb: self.memory_mb + req.memory_mb * replicas as u64,
            replicas: self.replicas + replicas,
        }
    }
}
