//! Application state management

use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use tracing::{info, warn};

use crate::app::options::{AppOptions, RoutingOptions};
use crate::cache::deployment::DeploymentCache;
use crate::deploy::docker::DockerCli;
use crate::deploy::git::WorkspaceSources;
use crate::deploy::processor::{DeploymentProcessor, ProcessorDeps};
use crate::deploy::records::DeploymentRecords;
use crate::errors::EngineError;
use crate::filesys::file::File;
use crate::health::monitor::HealthMonitor;
use crate::http::client::HttpClient;
use crate::queue::durable::{DeploymentQueue, QueueOptions};
use crate::routing::registrar::RouteRegistrar;
use crate::routing::store::{FileRoutingStore, HttpRoutingStore, RoutingConfigStore};
use crate::service::deployments::{DeploymentService, ServiceDeps};
use crate::storage::catalog::load_catalog;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::{InstallationSettings, RoutingBackend};
use crate::store::memory::{MemoryStore, Snapshot};
use crate::store::Stores;
use crate::triggers::changes::ChangeDetector;
use crate::triggers::matcher::RuleMatcher;
use crate::webhooks::handler::WebhookHandler;
use crate::webhooks::registry::{AppRegistry, Installation};

/// Main application state
pub struct AppState {
    /// Backing store of every store trait
    pub store: Arc<MemoryStore>,

    /// Where the store snapshot is written at shutdown
    pub state_file: File,

    pub queue: Arc<DeploymentQueue>,

    pub health: Arc<HealthMonitor>,

    pub processor: Arc<DeploymentProcessor>,

    pub service: Arc<DeploymentService>,

    pub webhooks: Arc<WebhookHandler>,
}

impl AppState {
    /// Initialize application state
    pub async fn init(
        options: &AppOptions,
        installations: Vec<InstallationSettings>,
    ) -> Result<Self, EngineError> {
        info!("Initializing application state...");

        let layout = &options.storage.layout;
        layout.setup().await?;

        // Catalog and deployment state
        let store = Arc::new(MemoryStore::new());
        load_catalog(&layout.catalog_file()).await?.seed(&store).await;
        let state_file = layout.state_file();
        restore_snapshot(&store, &state_file).await?;
        let stores = Stores::memory(store.clone());

        // Webhook installations double as clone credentials
        let registry = Arc::new(init_registry(installations));

        // Container runtime and builder share the docker CLI
        let docker = Arc::new(DockerCli::new(options.docker_binary.clone()));
        let sources =
            Arc::new(WorkspaceSources::new(layout.workspace_dir()).with_tokens(registry.clone()));

        let routing_store = init_routing_store(&options.routing, layout)?;
        let registrar = Arc::new(RouteRegistrar::new(
            stores.routes.clone(),
            stores.catalog.clone(),
            routing_store,
            options.routing.domain.clone(),
            options.routing.instance_id.clone(),
        ));

        let cache = Arc::new(DeploymentCache::new(options.storage.cache_capacity));
        let records = DeploymentRecords::new(stores.deployments.clone());

        let processor = Arc::new(DeploymentProcessor::new(
            ProcessorDeps {
                records: records.clone(),
                catalog: stores.catalog.clone(),
                runtime: docker.clone(),
                builder: docker.clone(),
                sources,
                registrar,
                cache: cache.clone(),
            },
            options.processor.clone(),
        ));

        let queue = Arc::new(DeploymentQueue::open(queue_options(options, layout)).await?);

        let health = Arc::new(HealthMonitor::new(
            records.clone(),
            docker,
            options.health_monitor.clone(),
        ));

        let matcher = Arc::new(RuleMatcher::new(stores.catalog.clone(), registry.clone()));
        let detector = Arc::new(ChangeDetector::new(cache, stores.deployments.clone()));

        let service = Arc::new(DeploymentService::new(ServiceDeps {
            stores,
            records,
            queue: queue.clone(),
            processor: processor.clone(),
            matcher,
            detector,
            health: health.clone(),
        }));

        let webhooks = Arc::new(WebhookHandler::new(registry, service.clone()));

        Ok(Self {
            store,
            state_file,
            queue,
            health,
            processor,
            service,
            webhooks,
        })
    }

    /// Shutdown application state
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        info!("Shutting down application state...");

        let stats = self.queue.stats().await;
        if stats.waiting + stats.delayed + stats.active > 0 {
            info!(
                "{} job(s) left in the queue, resuming them on next start",
                stats.waiting + stats.delayed + stats.active
            );
        }

        self.state_file.write_json(&self.store.snapshot().await).await?;
        Ok(())
    }
}

async fn restore_snapshot(store: &MemoryStore, state_file: &File) -> Result<(), EngineError> {
    if !state_file.exists().await {
        return Ok(());
    }
    let snapshot: Snapshot = state_file.read_json().await?;
    info!(
        "Restored {} deployment(s) from {}",
        snapshot.deployments.len(),
        state_file.path().display()
    );
    store.restore(snapshot).await;
    Ok(())
}

fn init_registry(installations: Vec<InstallationSettings>) -> AppRegistry {
    let registry = AppRegistry::new();
    for installation in installations {
        if installation.webhook_secret.expose_secret().is_empty() {
            warn!(
                "Skipping {:?} installation {} without a webhook secret",
                installation.provider, installation.organization
            );
            continue;
        }
        registry.register(Installation {
            provider: installation.provider,
            organization: installation.organization,
            webhook_secret: installation.webhook_secret,
            access_token: installation.access_token,
        });
    }
    if registry.is_empty() {
        warn!("No webhook installations configured, webhooks will be rejected");
    }
    registry
}

fn init_routing_store(
    options: &RoutingOptions,
    layout: &StorageLayout,
) -> Result<Arc<dyn RoutingConfigStore>, EngineError> {
    match options.backend {
        RoutingBackend::File => Ok(Arc::new(FileRoutingStore::new(
            layout.routes_dir(),
            options.domain.clone(),
        ))),
        RoutingBackend::Http => {
            let admin_url = options.admin_url.as_deref().ok_or_else(|| {
                EngineError::ConfigError("routing.admin_url is required for the http backend".to_string())
            })?;
            let token = options
                .admin_token
                .as_ref()
                .map(|t| SecretString::from(t.expose_secret().to_string()));
            let client = HttpClient::new(admin_url, token)?;
            Ok(Arc::new(HttpRoutingStore::new(client, options.domain.clone())))
        }
    }
}

fn queue_options(options: &AppOptions, layout: &StorageLayout) -> QueueOptions {
    let mut queue = options.queue.clone();
    if options.persist_queue {
        queue.journal = Some(layout.queue_journal());
    }
    queue
}
