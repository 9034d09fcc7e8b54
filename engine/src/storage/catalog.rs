//! Catalog file management

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::errors::EngineError;
use crate::filesys::file::File;
use crate::models::rule::DeploymentRule;
use crate::models::service::{Project, ResourceQuota, Service};
use crate::store::memory::MemoryStore;

/// Projects, services, rules and quotas the engine reads
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub projects: Vec<Project>,

    #[serde(default)]
    pub services: Vec<Service>,

    #[serde(default)]
    pub rules: Vec<DeploymentRule>,

    #[serde(default)]
    pub quotas: Vec<ResourceQuota>,
}

impl Catalog {
    /// Reject references to unknown projects or services
    pub fn validate(&self) -> Result<(), EngineError> {
        for service in &self.services {
            if !self.projects.iter().any(|p| p.id == service.project_id) {
                return Err(EngineError::ConfigError(format!(
                    "Service {} references unknown project {}",
                    service.id, service.project_id
                )));
            }
        }
        for rule in &self.rules {
            if !self.services.iter().any(|s| s.id == rule.service_id) {
                return Err(EngineError::ConfigError(format!(
                    "Rule {} references unknown service {}",
                    rule.id, rule.service_id
                )));
            }
        }
        Ok(())
    }

    /// Copy every entity into the store
    pub async fn seed(self, store: &MemoryStore) {
        for project in self.projects {
            store.put_project(project).await;
        }
        for service in self.services {
            store.put_service(service).await;
        }
        for rule in self.rules {
            store.put_rule(rule).await;
        }
        for quota in self.quotas {
            store.put_quota(quota).await;
        }
    }
}

/// Load the catalog; a missing file is an empty catalog
pub async fn load_catalog(catalog_file: &File) -> Result<Catalog, EngineError> {
    if !catalog_file.exists().await {
        warn!(
            "No catalog at {}, starting without services",
            catalog_file.path().display()
        );
        return Ok(Catalog::default());
    }

    let catalog: Catalog = catalog_file.read_json().await.map_err(|e| {
        EngineError::ConfigError(format!(
            "Failed to read catalog {}: {}",
            catalog_file.path().display(),
            e
        ))
    })?;
    catalog.validate()?;

    info!(
        "Loaded catalog: {} project(s), {} service(s), {} rule(s)",
        catalog.projects.len(),
        catalog.services.len(),
        catalog.rules.len()
    );
    Ok(catalog)
}

/// Save the catalog
pub async fn save_catalog(catalog_file: &File, catalog: &Catalog) -> Result<(), EngineError> {
    catalog_file.write_json(catalog).await
}
