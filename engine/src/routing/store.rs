//! Routing config stores consumed by the reverse proxy

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::EngineError;
use crate::filesys::dir::Dir;
use crate::http::client::HttpClient;

/// Routing entry as published to the proxy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteEntry {
    pub instance_id: String,
    pub deployment_id: String,
    pub subdomain: String,
    pub host: String,
    pub container_id: String,
    pub port: u16,
    pub upstream: String,
}

/// What the proxy reports back
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisteredRoute {
    pub url: String,
}

/// Publish and retract routes atomically
#[async_trait]
pub trait RoutingConfigStore: Send + Sync {
    async fn register_deployment(
        &self,
        instance_id: &str,
        deployment_id: &str,
        subdomain: &str,
        container_id: &str,
        port: u16,
    ) -> Result<RegisteredRoute, EngineError>;

    /// Idempotent: retracting an unknown deployment succeeds
    async fn unregister_deployment(&self, deployment_id: &str) -> Result<(), EngineError>;
}

/// Host and URL scheme shared by the reference stores
#[derive(Debug, Clone)]
pub struct DomainSettings {
    pub base_domain: String,
    pub ssl_enabled: bool,
}

impl DomainSettings {
    pub fn host(&self, subdomain: &str) -> String {
        format!("{}.{}", subdomain, self.base_domain)
    }

    pub fn url(&self, subdomain: &str) -> String {
        let scheme = if self.ssl_enabled { "https" } else { "http" };
        format!("{}://{}", scheme, self.host(subdomain))
    }

    fn entry(
        &self,
        instance_id: &str,
        deployment_id: &str,
        subdomain: &str,
        container_id: &str,
        port: u16,
    ) -> RouteEntry {
        RouteEntry {
            instance_id: instance_id.to_string(),
            deployment_id: deployment_id.to_string(),
            subdomain: subdomain.to_string(),
            host: self.host(subdomain),
            container_id: container_id.to_string(),
            port,
            upstream: format!("http://{}:{}", container_id, port),
        }
    }
}

/// One JSON file per deployment in a directory watched by the proxy
pub struct FileRoutingStore {
    dir: Dir,
    domain: DomainSettings,
}

impl FileRoutingStore {
    pub fn new(dir: Dir, domain: DomainSettings) -> Self {
        Self { dir, domain }
    }

    fn file_name(deployment_id: &str) -> String {
        format!("{}.json", deployment_id)
    }

    /// Entries currently published
    pub async fn entries(&self) -> Result<Vec<RouteEntry>, EngineError> {
        if !self.dir.exists().await {
            return Ok(Vec::new());
        }
        let mut entries = Vec::new();
        for path in self.dir.list_files().await? {
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                entries.push(crate::filesys::file::File::new(path).read_json().await?);
            }
        }
        Ok(entries)
    }
}

#[async_trait]
impl RoutingConfigStore for FileRoutingStore {
    async fn register_deployment(
        &self,
        instance_id: &str,
        deployment_id: &str,
        subdomain: &str,
        container_id: &str,
        port: u16,
    ) -> Result<RegisteredRoute, EngineError> {
        let entry = self
            .domain
            .entry(instance_id, deployment_id, subdomain, container_id, port);
        self.dir
            .file(&Self::file_name(deployment_id))
            .write_json(&entry)
            .await?;

        info!("Published route {} -> {}", entry.host, entry.upstream);
        Ok(RegisteredRoute {
            url: self.domain.url(subdomain),
        })
    }

    async fn unregister_deployment(&self, deployment_id: &str) -> Result<(), EngineError> {
        let removed = self
            .dir
            .file(&Self::file_name(deployment_id))
            .delete()
            .await?;
        debug!("Retracted route of {} (present: {})", deployment_id, removed);
        Ok(())
    }
}

/// Proxy admin API
pub struct HttpRoutingStore {
    client: HttpClient,
    domain: DomainSettings,
}

impl HttpRoutingStore {
    pub fn new(client: HttpClient, domain: DomainSettings) -> Self {
        Self { client, domain }
    }
}

#[async_trait]
impl RoutingConfigStore for HttpRoutingStore {
    async fn register_deployment(
        &self,
        instance_id: &str,
        deployment_id: &str,
        subdomain: &str,
        container_id: &str,
        port: u16,
    ) -> Result<RegisteredRoute, EngineError> {
        let entry = self
            .domain
            .entry(instance_id, deployment_id, subdomain, container_id, port);
        let registered: RegisteredRoute = self.client.post("/routes", &entry).await?;
        info!("Registered route {} at {}", entry.host, self.client.base_url());
        Ok(registered)
    }

    async fn unregister_deployment(&self, deployment_id: &str) -> Result<(), EngineError> {
        self.client
            .delete(&format!("/routes/{}", deployment_id))
            .await
    }
}
