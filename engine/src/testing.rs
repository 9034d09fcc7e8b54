//! In-process fakes for the container runtime, builder, sources and proxy

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::cache::deployment::DeploymentCache;
use crate::deploy::git::{PreparedSource, SourceFetcher};
use crate::deploy::processor::{DeploymentProcessor, ProcessorDeps, ProcessorOptions};
use crate::deploy::records::DeploymentRecords;
use crate::health::monitor::{HealthMonitor, HealthMonitorOptions};
use crate::queue::durable::{DeploymentQueue, QueueOptions};
use crate::service::deployments::{DeploymentService, ServiceDeps};
use crate::triggers::changes::ChangeDetector;
use crate::triggers::matcher::RuleMatcher;
use crate::utils::CooldownOptions;
use crate::deploy::runtime::{ContainerInfo, ContainerRuntime, ContainerSpec, ContainerState, ImageBuilder};
use crate::errors::EngineError;
use crate::models::deployment::{
    Deployment, DeploymentMetadata, Environment, NewDeployment, SourceConfig, SourceType,
};
use crate::models::event::Provider;
use crate::models::service::{Project, Service};
use crate::retry::PollPolicy;
use crate::routing::registrar::RouteRegistrar;
use crate::routing::store::{DomainSettings, RegisteredRoute, RoutingConfigStore};
use crate::store::memory::MemoryStore;
use crate::store::{DeploymentStore, Stores};
use crate::triggers::matcher::CredentialResolver;

/// Ordered record of side effects shared by the fakes
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn push(&self, entry: String) {
        self.0.lock().unwrap().push(entry);
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries().iter().position(|e| e == entry)
    }
}

struct FakeContainer {
    info: ContainerInfo,
    deployment_id: String,
    healthy: bool,
}

#[derive(Default)]
pub struct FakeRuntime {
    containers: Mutex<HashMap<String, FakeContainer>>,
    next_id: AtomicU64,
    journal: Journal,
    pub fail_create: AtomicBool,
    pub start_unhealthy: AtomicBool,
    pub heal_on_restart: AtomicBool,
    pub restarts: AtomicU32,
    pub created: Mutex<Vec<ContainerSpec>>,
    pub fail_list_for: Mutex<HashSet<String>>,
}

impl FakeRuntime {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            ..Default::default()
        }
    }

    fn find_key(containers: &HashMap<String, FakeContainer>, id_or_name: &str) -> Option<String> {
        containers
            .iter()
            .find(|(id, c)| id.as_str() == id_or_name || c.info.name == id_or_name)
            .map(|(id, _)| id.clone())
    }

    pub fn container(&self, id_or_name: &str) -> Option<ContainerInfo> {
        let containers = self.containers.lock().unwrap();
        Self::find_key(&containers, id_or_name).and_then(|k| containers.get(&k).map(|c| c.info.clone()))
    }

    pub fn set_healthy(&self, id: &str, healthy: bool) {
        if let Some(container) = self.containers.lock().unwrap().get_mut(id) {
            container.healthy = healthy;
        }
    }

    /// Drop a container as if it was removed outside the engine
    pub fn forget(&self, id: &str) {
        self.containers.lock().unwrap().remove(id);
    }

    pub fn running(&self) -> Vec<ContainerInfo> {
        self.containers
            .lock()
            .unwrap()
            .values()
            .filter(|c| c.info.is_running())
            .map(|c| c.info.clone())
            .collect()
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn create_and_start(&self, spec: &ContainerSpec) -> Result<String, EngineError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(EngineError::RuntimeError("port already allocated".to_string()));
        }
        let id = format!("ctr-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let mut containers = self.containers.lock().unwrap();
        containers.retain(|_, c| c.info.name != spec.name);
        containers.insert(
            id.clone(),
            FakeContainer {
                info: ContainerInfo {
                    id: id.clone(),
                    name: spec.name.clone(),
                    image: spec.image.clone(),
                    state: ContainerState::Running,
                },
                deployment_id: spec.deployment_id.clone(),
                healthy: !self.start_unhealthy.load(Ordering::SeqCst),
            },
        );
        self.created.lock().unwrap().push(spec.clone());
        self.journal.push(format!("start:{}", spec.deployment_id));
        Ok(id)
    }

    async fn start(&self, id_or_name: &str) -> Result<(), EngineError> {
        let mut containers = self.containers.lock().unwrap();
        let key = Self::find_key(&containers, id_or_name)
            .ok_or_else(|| EngineError::RuntimeError(format!("No such container: {}", id_or_name)))?;
        if let Some(container) = containers.get_mut(&key) {
            container.info.state = ContainerState::Running;
            self.journal.push(format!("start:{}", container.deployment_id));
        }
        Ok(())
    }

    async fn stop(&self, id: &str) -> Result<(), EngineError> {
        let mut containers = self.containers.lock().unwrap();
        let key = Self::find_key(&containers, id)
            .ok_or_else(|| EngineError::RuntimeError(format!("No such container: {}", id)))?;
        if let Some(container) = containers.get_mut(&key) {
            container.info.state = ContainerState::Exited;
            self.journal.push(format!("stop:{}", container.deployment_id));
        }
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<(), EngineError> {
        let mut containers = self.containers.lock().unwrap();
        if let Some(container) = Self::find_key(&containers, id).and_then(|k| containers.remove(&k)) {
            self.journal.push(format!("remove:{}", container.deployment_id));
        }
        Ok(())
    }

    async fn restart(&self, id: &str) -> Result<(), EngineError> {
        self.restarts.fetch_add(1, Ordering::SeqCst);
        let mut containers = self.containers.lock().unwrap();
        let container = containers
            .get_mut(id)
            .ok_or_else(|| EngineError::RuntimeError(format!("No such container: {}", id)))?;
        container.info.state = ContainerState::Running;
        if self.heal_on_restart.load(Ordering::SeqCst) {
            container.healthy = true;
        }
        Ok(())
    }

    async fn check_health(&self, id: &str) -> Result<bool, EngineError> {
        let containers = self.containers.lock().unwrap();
        Ok(containers
            .get(id)
            .map(|c| c.info.is_running() && c.healthy)
            .unwrap_or(false))
    }

    async fn list_by_deployment(&self, deployment_id: &str) -> Result<Vec<ContainerInfo>, EngineError> {
        if self.fail_list_for.lock().unwrap().contains(deployment_id) {
            return Err(EngineError::RuntimeError("docker daemon not responding".to_string()));
        }
        Ok(self
            .containers
            .lock()
            .unwrap()
            .values()
            .filter(|c| c.deployment_id == deployment_id)
            .map(|c| c.info.clone())
            .collect())
    }

    async fn get_info(&self, id_or_name: &str) -> Result<Option<ContainerInfo>, EngineError> {
        Ok(self.container(id_or_name))
    }
}

#[derive(Default)]
pub struct FakeBuilder {
    pub fail: AtomicBool,
    pub builds: Mutex<Vec<String>>,
}

#[async_trait]
impl ImageBuilder for FakeBuilder {
    async fn build(&self, _source_path: &Path, image_tag: &str) -> Result<String, EngineError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(EngineError::BuildError("Dockerfile step 3 exited with 1".to_string()));
        }
        self.builds.lock().unwrap().push(image_tag.to_string());
        Ok(image_tag.to_string())
    }
}

#[derive(Default)]
pub struct FakeSources {
    pub fail: AtomicBool,
    pub prepared: AtomicU32,
    pub cleaned: AtomicU32,
}

#[async_trait]
impl SourceFetcher for FakeSources {
    async fn prepare(&self, deployment: &Deployment) -> Result<PreparedSource, EngineError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(EngineError::SourceError("repository not found".to_string()));
        }
        self.prepared.fetch_add(1, Ordering::SeqCst);
        Ok(PreparedSource {
            path: std::env::temp_dir().join(&deployment.id),
            commit_sha: deployment.source_config.commit_sha.clone(),
        })
    }

    async fn cleanup(&self, _source: &PreparedSource) -> Result<(), EngineError> {
        self.cleaned.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeRoutingStore {
    routes: Mutex<BTreeMap<String, String>>,
    journal: Journal,
    pub fail: AtomicBool,
}

impl FakeRoutingStore {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            ..Default::default()
        }
    }

    /// Subdomain published for a deployment
    pub fn published(&self, deployment_id: &str) -> Option<String> {
        self.routes.lock().unwrap().get(deployment_id).cloned()
    }
}

#[async_trait]
impl RoutingConfigStore for FakeRoutingStore {
    async fn register_deployment(
        &self,
        _instance_id: &str,
        deployment_id: &str,
        subdomain: &str,
        _container_id: &str,
        _port: u16,
    ) -> Result<RegisteredRoute, EngineError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(EngineError::RoutingError("proxy unavailable".to_string()));
        }
        self.routes
            .lock()
            .unwrap()
            .insert(deployment_id.to_string(), subdomain.to_string());
        self.journal.push(format!("route:{}", deployment_id));
        Ok(RegisteredRoute {
            url: format!("https://{}.dockhand.test", subdomain),
        })
    }

    async fn unregister_deployment(&self, deployment_id: &str) -> Result<(), EngineError> {
        self.routes.lock().unwrap().remove(deployment_id);
        self.journal.push(format!("unroute:{}", deployment_id));
        Ok(())
    }
}

/// Credentials exist for every organization except the denied ones
#[derive(Default)]
pub struct FakeCredentials {
    pub denied: Mutex<HashSet<String>>,
}

#[async_trait]
impl CredentialResolver for FakeCredentials {
    async fn has_credentials(&self, _provider: Provider, organization: Option<&str>) -> bool {
        match organization {
            Some(org) => !self.denied.lock().unwrap().contains(org),
            None => false,
        }
    }
}

pub const PROJECT_ID: &str = "proj-1";
pub const SERVICE_ID: &str = "svc-1";
pub const REPOSITORY_ID: &str = "42";

pub fn project() -> Project {
    Project {
        id: PROJECT_ID.to_string(),
        name: "shop".to_string(),
    }
}

pub fn service(id: &str, name: &str) -> Service {
    Service {
        id: id.to_string(),
        project_id: PROJECT_ID.to_string(),
        name: name.to_string(),
        repository_id: Some(REPOSITORY_ID.to_string()),
        repository_url: Some("https://github.com/acme/shop.git".to_string()),
        source_type: SourceType::Github,
        organization: Some("acme".to_string()),
        enabled: true,
        port: 3000,
        health_check_path: Some("/health".to_string()),
        resources: None,
        env: BTreeMap::new(),
    }
}

/// Fakes wired into a processor over one memory store
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub stores: Stores,
    pub journal: Journal,
    pub runtime: Arc<FakeRuntime>,
    pub builder: Arc<FakeBuilder>,
    pub sources: Arc<FakeSources>,
    pub routing: Arc<FakeRoutingStore>,
    pub credentials: Arc<FakeCredentials>,
    pub cache: Arc<DeploymentCache>,
    pub registrar: Arc<RouteRegistrar>,
    pub records: DeploymentRecords,
    pub processor: Arc<DeploymentProcessor>,
    pub queue: Arc<DeploymentQueue>,
    pub health: Arc<HealthMonitor>,
    pub service: Arc<DeploymentService>,
}

impl Harness {
    pub async fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        store.put_project(project()).await;
        store.put_service(service(SERVICE_ID, "api")).await;
        let stores = Stores::memory(store.clone());

        let journal = Journal::default();
        let runtime = Arc::new(FakeRuntime::new(journal.clone()));
        let builder = Arc::new(FakeBuilder::default());
        let sources = Arc::new(FakeSources::default());
        let routing = Arc::new(FakeRoutingStore::new(journal.clone()));
        let cache = Arc::new(DeploymentCache::new(64));
        let registrar = Arc::new(RouteRegistrar::new(
            stores.routes.clone(),
            stores.catalog.clone(),
            routing.clone(),
            DomainSettings {
                base_domain: "dockhand.test".to_string(),
                ssl_enabled: true,
            },
            "instance-1".to_string(),
        ));
        let records = DeploymentRecords::new(stores.deployments.clone());
        let processor = Arc::new(DeploymentProcessor::new(
            ProcessorDeps {
                records: records.clone(),
                catalog: stores.catalog.clone(),
                runtime: runtime.clone(),
                builder: builder.clone(),
                sources: sources.clone(),
                registrar: registrar.clone(),
                cache: cache.clone(),
            },
            ProcessorOptions {
                health: PollPolicy::new(3, Duration::ZERO),
                ..Default::default()
            },
        ));

        let queue = Arc::new(DeploymentQueue::new(QueueOptions {
            backoff: CooldownOptions {
                base_delay: Duration::ZERO,
                ..Default::default()
            },
            ..Default::default()
        }));
        let health = Arc::new(HealthMonitor::new(
            records.clone(),
            runtime.clone(),
            HealthMonitorOptions {
                restart_verification: PollPolicy::new(2, Duration::ZERO),
                ..Default::default()
            },
        ));
        let credentials = Arc::new(FakeCredentials::default());
        let service = Arc::new(DeploymentService::new(ServiceDeps {
            stores: stores.clone(),
            records: records.clone(),
            queue: queue.clone(),
            processor: processor.clone(),
            matcher: Arc::new(RuleMatcher::new(stores.catalog.clone(), credentials.clone())),
            detector: Arc::new(ChangeDetector::new(cache.clone(), stores.deployments.clone())),
            health: health.clone(),
        }));

        Self {
            store,
            stores,
            journal,
            runtime,
            builder,
            sources,
            routing,
            credentials,
            cache,
            registrar,
            records,
            processor,
            queue,
            health,
            service,
        }
    }

    /// Insert a pending production deployment of `branch` at `sha`
    pub async fn pending(&self, branch: &str, sha: &str) -> Deployment {
        self.insert(SourceConfig {
            repository_url: Some("https://github.com/acme/shop.git".to_string()),
            branch: Some(branch.to_string()),
            commit_sha: Some(sha.to_string()),
            ..Default::default()
        })
        .await
    }

    pub async fn insert(&self, source_config: SourceConfig) -> Deployment {
        let deployment = Deployment::new(NewDeployment {
            service_id: SERVICE_ID.to_string(),
            project_id: PROJECT_ID.to_string(),
            environment: Environment::Production,
            source_type: SourceType::Github,
            source_config,
            metadata: DeploymentMetadata::default(),
        });
        self.stores
            .deployments
            .insert_deployment(deployment.clone())
            .await
            .unwrap();
        deployment
    }

    pub async fn get(&self, id: &str) -> Deployment {
        self.records.get(id).await.unwrap()
    }
}
