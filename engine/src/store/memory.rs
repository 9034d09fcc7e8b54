//! In-memory store

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::errors::EngineError;
use crate::models::deployment::{
    Coordinate, Deployment, DeploymentLog, DeploymentStatus, Environment,
};
use crate::models::route::RouteConfig;
use crate::models::rule::DeploymentRule;
use crate::models::service::{Project, ResourceQuota, ResourceUsage, Service};
use crate::store::{CatalogStore, DeploymentStore, RouteStore};

/// Deployment state that outlives a restart; the catalog has its own file
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub deployments: Vec<Deployment>,

    #[serde(default)]
    pub logs: HashMap<String, Vec<DeploymentLog>>,

    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

/// Process-local implementation of every store trait
#[derive(Default)]
pub struct MemoryStore {
    deployments: RwLock<HashMap<String, Deployment>>,
    logs: RwLock<HashMap<String, Vec<DeploymentLog>>>,
    projects: RwLock<HashMap<String, Project>>,
    services: RwLock<HashMap<String, Service>>,
    rules: RwLock<HashMap<String, DeploymentRule>>,
    quotas: RwLock<Vec<ResourceQuota>>,
    routes: RwLock<HashMap<String, RouteConfig>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put_project(&self, project: Project) {
        self.projects.write().await.insert(project.id.clone(), project);
    }

    pub async fn put_service(&self, service: Service) {
        self.services.write().await.insert(service.id.clone(), service);
    }

    pub async fn put_rule(&self, rule: DeploymentRule) {
        self.rules.write().await.insert(rule.id.clone(), rule);
    }

    pub async fn put_quota(&self, quota: ResourceQuota) {
        let mut quotas = self.quotas.write().await;
        quotas.retain(|q| !(q.project_id == quota.project_id && q.environment == quota.environment));
        quotas.push(quota);
    }

    pub async fn get_rule(&self, rule_id: &str) -> Option<DeploymentRule> {
        self.rules.read().await.get(rule_id).cloned()
    }

    pub async fn snapshot(&self) -> Snapshot {
        Snapshot {
            deployments: self.all_deployments().await,
            logs: self.logs.read().await.clone(),
            routes: self.routes.read().await.values().cloned().collect(),
        }
    }

    /// Replace deployments, logs and routes with a snapshot
    pub async fn restore(&self, snapshot: Snapshot) {
        *self.deployments.write().await = snapshot
            .deployments
            .into_iter()
            .map(|d| (d.id.clone(), d))
            .collect();
        *self.logs.write().await = snapshot.logs;
        *self.routes.write().await = snapshot
            .routes
            .into_iter()
            .map(|r| (r.deployment_id.clone(), r))
            .collect();
    }

    /// Every deployment, oldest first
    pub async fn all_deployments(&self) -> Vec<Deployment> {
        let mut all: Vec<Deployment> = self.deployments.read().await.values().cloned().collect();
        all.sort_by_key(|d| d.created_at);
        all
    }

    async fn filtered<F>(&self, predicate: F) -> Vec<Deployment>
    where
        F: Fn(&Deployment) -> bool,
    {
        let mut matching: Vec<Deployment> = self
            .deployments
            .read()
            .await
            .values()
            .filter(|d| predicate(d))
            .cloned()
            .collect();
        matching.sort_by_key(|d| d.created_at);
        matching
    }
}

#[async_trait]
impl DeploymentStore for MemoryStore {
    async fn insert_deployment(&self, deployment: Deployment) -> Result<(), EngineError> {
        let mut deployments = self.deployments.write().await;
        if deployments.contains_key(&deployment.id) {
            return Err(EngineError::StoreError(format!(
                "Deployment {} already exists",
                deployment.id
            )));
        }
        deployments.insert(deployment.id.clone(), deployment);
        Ok(())
    }

    async fn get_deployment(&self, id: &str) -> Result<Option<Deployment>, EngineError> {
        Ok(self.deployments.read().await.get(id).cloned())
    }

    async fn compare_and_swap(
        &self,
        deployment: &Deployment,
        expected: DeploymentStatus,
    ) -> Result<bool, EngineError> {
        let mut deployments = self.deployments.write().await;
        match deployments.get_mut(&deployment.id) {
            Some(stored) if stored.status == expected => {
                *stored = deployment.clone();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(EngineError::NotFound(format!("Deployment {}", deployment.id))),
        }
    }

    async fn list_by_status(&self, status: DeploymentStatus) -> Result<Vec<Deployment>, EngineError> {
        Ok(self.filtered(|d| d.status == status).await)
    }

    async fn list_by_service(&self, service_id: &str) -> Result<Vec<Deployment>, EngineError> {
        Ok(self.filtered(|d| d.service_id == service_id).await)
    }

    async fn list_for_coordinate(
        &self,
        coordinate: &Coordinate,
    ) -> Result<Vec<Deployment>, EngineError> {
        Ok(self.filtered(|d| &d.coordinate() == coordinate).await)
    }

    async fn find_successful_sha(
        &self,
        service_id: &str,
        branch: &str,
        sha: &str,
    ) -> Result<Option<Deployment>, EngineError> {
        let found = self
            .filtered(|d| {
                d.service_id == service_id
                    && d.status == DeploymentStatus::Success
                    && d.source_config.branch.as_deref() == Some(branch)
                    && d.source_config.commit_sha.as_deref() == Some(sha)
            })
            .await;
        Ok(found.into_iter().last())
    }

    async fn append_log(&self, log: DeploymentLog) -> Result<(), EngineError> {
        self.logs
            .write()
            .await
            .entry(log.deployment_id.clone())
            .or_default()
            .push(log);
        Ok(())
    }

    async fn list_logs(&self, deployment_id: &str) -> Result<Vec<DeploymentLog>, EngineError> {
        let mut logs = self
            .logs
            .read()
            .await
            .get(deployment_id)
            .cloned()
            .unwrap_or_default();
        logs.sort_by_key(|l| l.timestamp);
        Ok(logs)
    }
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn get_service(&self, id: &str) -> Result<Option<Service>, EngineError> {
        Ok(self.services.read().await.get(id).cloned())
    }

    async fn get_project(&self, id: &str) -> Result<Option<Project>, EngineError> {
        Ok(self.projects.read().await.get(id).cloned())
    }

    async fn list_services_for_repository(
        &self,
        repository_id: &str,
    ) -> Result<Vec<Service>, EngineError> {
        let mut services: Vec<Service> = self
            .services
            .read()
            .await
            .values()
            .filter(|s| s.repository_id.as_deref() == Some(repository_id))
            .cloned()
            .collect();
        services.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(services)
    }

    async fn list_rules(&self, service_id: &str) -> Result<Vec<DeploymentRule>, EngineError> {
        let mut rules: Vec<DeploymentRule> = self
            .rules
            .read()
            .await
            .values()
            .filter(|r| r.service_id == service_id)
            .cloned()
            .collect();
        rules.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(rules)
    }

    async fn increment_rule_trigger(&self, rule_id: &str) -> Result<u64, EngineError> {
        let mut rules = self.rules.write().await;
        let rule = rules
            .get_mut(rule_id)
            .ok_or_else(|| EngineError::NotFound(format!("Rule {}", rule_id)))?;
        rule.trigger_count += 1;
        Ok(rule.trigger_count)
    }

    async fn get_quota(
        &self,
        project_id: &str,
        environment: Environment,
    ) -> Result<Option<ResourceQuota>, EngineError> {
        let quotas = self.quotas.read().await;
        let specific = quotas
            .iter()
            .find(|q| q.project_id == project_id && q.environment == Some(environment));
        let general = quotas
            .iter()
            .find(|q| q.project_id == project_id && q.environment.is_none());
        Ok(specific.or(general).cloned())
    }

    async fn get_usage(
        &self,
        project_id: &str,
        environment: Environment,
    ) -> Result<ResourceUsage, EngineError> {
        let holding = self
            .filtered(|d| {
                d.project_id == project_id && d.environment == environment && d.holds_resources()
            })
            .await;

        let services = self.services.read().await;
        let usage = holding
            .iter()
            .filter_map(|d| services.get(&d.service_id).and_then(|s| s.resources))
            .fold(ResourceUsage::default(), |usage, req| usage.add(&req));
        Ok(usage)
    }
}

#[async_trait]
impl RouteStore for MemoryStore {
    async fn upsert_route(&self, route: RouteConfig) -> Result<RouteConfig, EngineError> {
        let mut routes = self.routes.write().await;
        let stored = match routes.get(&route.deployment_id) {
            Some(existing) => RouteConfig {
                id: existing.id.clone(),
                created_at: existing.created_at,
                updated_at: Utc::now(),
                ..route
            },
            None => route,
        };
        routes.insert(stored.deployment_id.clone(), stored.clone());
        Ok(stored)
    }

    async fn get_active_route(&self, deployment_id: &str) -> Result<Option<RouteConfig>, EngineError> {
        Ok(self
            .routes
            .read()
            .await
            .get(deployment_id)
            .filter(|r| r.is_active)
            .cloned())
    }

    async fn find_active_by_subdomain(
        &self,
        subdomain: &str,
    ) -> Result<Vec<RouteConfig>, EngineError> {
        Ok(self
            .routes
            .read()
            .await
            .values()
            .filter(|r| r.is_active && r.subdomain == subdomain)
            .cloned()
            .collect())
    }

    async fn deactivate_route(&self, deployment_id: &str) -> Result<bool, EngineError> {
        let mut routes = self.routes.write().await;
        match routes.get_mut(deployment_id) {
            Some(route) if route.is_active => {
                route.is_active = false;
                route.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_routes(&self, deployment_id: &str) -> Result<Vec<RouteConfig>, EngineError> {
        Ok(self
            .routes
            .read()
            .await
            .get(deployment_id)
            .cloned()
            .into_iter()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::deployment::{NewDeployment, SourceConfig, SourceType};

    fn new_deployment(branch: &str) -> Deployment {
        Deployment::new(NewDeployment {
            service_id: "svc-1".to_string(),
            project_id: "proj-1".to_string(),
            environment: Environment::Preview,
            source_type: SourceType::Github,
            source_config: SourceConfig {
                branch: Some(branch.to_string()),
                commit_sha: Some("abc123".to_string()),
                ..Default::default()
            },
            metadata: Default::default(),
        })
    }

    #[tokio::test]
    async fn test_compare_and_swap_rejects_stale_status() {
        let store = MemoryStore::new();
        let mut deployment = new_deployment("main");
        store.insert_deployment(deployment.clone()).await.unwrap();

        deployment.status = DeploymentStatus::Queued;
        assert!(store
            .compare_and_swap(&deployment, DeploymentStatus::Pending)
            .await
            .unwrap());

        deployment.status = DeploymentStatus::Building;
        assert!(!store
            .compare_and_swap(&deployment, DeploymentStatus::Pending)
            .await
            .unwrap());

        let stored = store.get_deployment(&deployment.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DeploymentStatus::Queued);
    }

    #[tokio::test]
    async fn test_list_for_coordinate_separates_branches() {
        let store = MemoryStore::new();
        let a = new_deployment("feature/a");
        let b = new_deployment("feature/b");
        store.insert_deployment(a.clone()).await.unwrap();
        store.insert_deployment(b).await.unwrap();

        let found = store.list_for_coordinate(&a.coordinate()).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, a.id);
    }

    #[tokio::test]
    async fn test_route_upsert_keeps_identity() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let route = RouteConfig {
            id: "r-1".to_string(),
            deployment_id: "d-1".to_string(),
            service_id: "svc-1".to_string(),
            subdomain: "api-shop".to_string(),
            full_domain: "api-shop.example.com".to_string(),
            container_id: "c-1".to_string(),
            target_port: 3000,
            ssl_enabled: true,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        store.upsert_route(route.clone()).await.unwrap();
        let again = store
            .upsert_route(RouteConfig {
                id: "r-2".to_string(),
                container_id: "c-2".to_string(),
                ..route
            })
            .await
            .unwrap();

        assert_eq!(again.id, "r-1");
        assert_eq!(again.container_id, "c-2");
        assert_eq!(store.list_routes("d-1").await.unwrap().len(), 1);
        assert!(store.deactivate_route("d-1").await.unwrap());
        assert!(!store.deactivate_route("d-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_snapshot_restores_into_fresh_store() {
        let store = MemoryStore::new();
        let deployment = new_deployment("main");
        store.insert_deployment(deployment.clone()).await.unwrap();
        store
            .append_log(DeploymentLog::new(
                &deployment.id,
                crate::models::deployment::LogLevel::Info,
                "admission",
                "queued",
            ))
            .await
            .unwrap();

        let json = serde_json::to_string(&store.snapshot().await).unwrap();
        let restored = MemoryStore::new();
        restored.restore(serde_json::from_str(&json).unwrap()).await;

        let found = restored.get_deployment(&deployment.id).await.unwrap().unwrap();
        assert_eq!(found.status, DeploymentStatus::Pending);
        assert_eq!(restored.list_logs(&deployment.id).await.unwrap().len(), 1);
    }
}
