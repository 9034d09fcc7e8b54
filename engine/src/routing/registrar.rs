//! Route registrar: subdomain allocation plus publish/retract

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use crate::errors::EngineError;
use crate::models::deployment::Deployment;
use crate::models::route::RouteConfig;
use crate::routing::store::{DomainSettings, RoutingConfigStore};
use crate::routing::subdomain::{derive_subdomain, with_collision_suffix, SubdomainParts};
use crate::store::{CatalogStore, RouteStore};
use crate::utils::generate_uuid;

pub struct RouteRegistrar {
    routes: Arc<dyn RouteStore>,
    catalog: Arc<dyn CatalogStore>,
    config: Arc<dyn RoutingConfigStore>,
    domain: DomainSettings,
    instance_id: String,
}

impl RouteRegistrar {
    pub fn new(
        routes: Arc<dyn RouteStore>,
        catalog: Arc<dyn CatalogStore>,
        config: Arc<dyn RoutingConfigStore>,
        domain: DomainSettings,
        instance_id: String,
    ) -> Self {
        Self {
            routes,
            catalog,
            config,
            domain,
            instance_id,
        }
    }

    /// Subdomain the deployment would get, before collision handling
    pub async fn base_subdomain(&self, deployment: &Deployment) -> Result<String, EngineError> {
        let service = self
            .catalog
            .get_service(&deployment.service_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("Service {}", deployment.service_id)))?;
        let project = self
            .catalog
            .get_project(&deployment.project_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("Project {}", deployment.project_id)))?;

        Ok(derive_subdomain(&SubdomainParts {
            project: &project.name,
            service: &service.name,
            environment: deployment.environment,
            branch: deployment.source_config.branch.as_deref(),
            pr_number: deployment.source_config.pr_number,
        }))
    }

    /// Subdomain for a new route, avoiding routes owned by other services
    async fn allocate_subdomain(&self, deployment: &Deployment) -> Result<String, EngineError> {
        let subdomain = self.base_subdomain(deployment).await?;
        let taken_by_other = self
            .routes
            .find_active_by_subdomain(&subdomain)
            .await?
            .iter()
            .any(|r| r.service_id != deployment.service_id);

        if taken_by_other {
            let suffixed = with_collision_suffix(&subdomain, &deployment.service_id);
            debug!("Subdomain {} is taken, using {}", subdomain, suffixed);
            return Ok(suffixed);
        }
        Ok(subdomain)
    }

    /// Publish the route of a deployment and return its URL
    ///
    /// Re-registering keeps the subdomain the deployment already owns, so the
    /// call is idempotent and rollbacks get their old hostname back.
    pub async fn register(
        &self,
        deployment: &Deployment,
        container_id: &str,
        port: u16,
    ) -> Result<RouteConfig, EngineError> {
        let existing = self
            .routes
            .list_routes(&deployment.id)
            .await?
            .into_iter()
            .next();

        let subdomain = match &existing {
            Some(route) => route.subdomain.clone(),
            None => self.allocate_subdomain(deployment).await?,
        };

        let registered = self
            .config
            .register_deployment(&self.instance_id, &deployment.id, &subdomain, container_id, port)
            .await
            .map_err(|e| EngineError::RoutingError(e.to_string()))?;

        let now = Utc::now();
        let route = self
            .routes
            .upsert_route(RouteConfig {
                id: generate_uuid(),
                deployment_id: deployment.id.clone(),
                service_id: deployment.service_id.clone(),
                subdomain: subdomain.clone(),
                full_domain: self.domain.host(&subdomain),
                container_id: container_id.to_string(),
                target_port: port,
                ssl_enabled: self.domain.ssl_enabled,
                is_active: true,
                created_at: now,
                updated_at: now,
            })
            .await?;

        info!(
            "Route for deployment {} registered at {}",
            deployment.id, registered.url
        );
        Ok(route)
    }

    /// Public URL of a route
    pub fn url(&self, route: &RouteConfig) -> String {
        self.domain.url(&route.subdomain)
    }

    /// Retract the proxy entry, then deactivate the record
    ///
    /// Must run before the deployment's container is removed.
    pub async fn unregister(&self, deployment_id: &str) -> Result<bool, EngineError> {
        self.config
            .unregister_deployment(deployment_id)
            .await
            .map_err(|e| EngineError::RoutingError(e.to_string()))?;
        let was_active = self.routes.deactivate_route(deployment_id).await?;
        if was_active {
            info!("Route for deployment {} unregistered", deployment_id);
        }
        Ok(was_active)
    }
}
