//! Persistence interfaces
//!
//! The data-access layer owns projects, services, rules, routes and deployment
//! rows. The engine talks to it only through these traits; `memory` provides an
//! in-process implementation used by the default runtime and the tests.

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::EngineError;
use crate::models::deployment::{Coordinate, Deployment, DeploymentLog, DeploymentStatus, Environment};
use crate::models::route::RouteConfig;
use crate::models::rule::DeploymentRule;
use crate::models::service::{Project, ResourceQuota, ResourceUsage, Service};

/// Deployment rows and their logs
#[async_trait]
pub trait DeploymentStore: Send + Sync {
    async fn insert_deployment(&self, deployment: Deployment) -> Result<(), EngineError>;

    async fn get_deployment(&self, id: &str) -> Result<Option<Deployment>, EngineError>;

    /// Replace the row only if its stored status still equals `expected`
    async fn compare_and_swap(
        &self,
        deployment: &Deployment,
        expected: DeploymentStatus,
    ) -> Result<bool, EngineError>;

    async fn list_by_status(&self, status: DeploymentStatus) -> Result<Vec<Deployment>, EngineError>;

    async fn list_by_service(&self, service_id: &str) -> Result<Vec<Deployment>, EngineError>;

    /// Every deployment of a coordinate, oldest first
    async fn list_for_coordinate(
        &self,
        coordinate: &Coordinate,
    ) -> Result<Vec<Deployment>, EngineError>;

    /// A successful deployment of `sha` on (service, branch)
    async fn find_successful_sha(
        &self,
        service_id: &str,
        branch: &str,
        sha: &str,
    ) -> Result<Option<Deployment>, EngineError>;

    async fn append_log(&self, log: DeploymentLog) -> Result<(), EngineError>;

    /// Logs ordered by timestamp
    async fn list_logs(&self, deployment_id: &str) -> Result<Vec<DeploymentLog>, EngineError>;
}

/// Read side of projects, services, rules and quotas
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn get_service(&self, id: &str) -> Result<Option<Service>, EngineError>;

    async fn get_project(&self, id: &str) -> Result<Option<Project>, EngineError>;

    async fn list_services_for_repository(
        &self,
        repository_id: &str,
    ) -> Result<Vec<Service>, EngineError>;

    async fn list_rules(&self, service_id: &str) -> Result<Vec<DeploymentRule>, EngineError>;

    /// The only mutation the engine performs on a rule
    async fn increment_rule_trigger(&self, rule_id: &str) -> Result<u64, EngineError>;

    async fn get_quota(
        &self,
        project_id: &str,
        environment: Environment,
    ) -> Result<Option<ResourceQuota>, EngineError>;

    async fn get_usage(
        &self,
        project_id: &str,
        environment: Environment,
    ) -> Result<ResourceUsage, EngineError>;
}

/// Route records
#[async_trait]
pub trait RouteStore: Send + Sync {
    /// Insert or overwrite the route of `route.deployment_id`
    async fn upsert_route(&self, route: RouteConfig) -> Result<RouteConfig, EngineError>;

    async fn get_active_route(&self, deployment_id: &str) -> Result<Option<RouteConfig>, EngineError>;

    async fn find_active_by_subdomain(&self, subdomain: &str)
        -> Result<Vec<RouteConfig>, EngineError>;

    /// Returns false when there was no active route
    async fn deactivate_route(&self, deployment_id: &str) -> Result<bool, EngineError>;

    async fn list_routes(&self, deployment_id: &str) -> Result<Vec<RouteConfig>, EngineError>;
}

/// Handles to every store the engine uses
#[derive(Clone)]
pub struct Stores {
    pub deployments: Arc<dyn DeploymentStore>,
    pub catalog: Arc<dyn CatalogStore>,
    pub routes: Arc<dyn RouteStore>,
}

impl Stores {
    /// All three stores backed by one in-memory store
    pub fn memory(store: Arc<memory::MemoryStore>) -> Self {
        Self {
            deployments: store.clone(),
            catalog: store.clone(),
            routes: store,
        }
    }
}
