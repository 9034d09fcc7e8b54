//! Application configuration options

use std::time::Duration;

use secrecy::SecretString;

use crate::deploy::processor::ProcessorOptions;
use crate::health::monitor::HealthMonitorOptions;
use crate::queue::durable::QueueOptions;
use crate::retry::PollPolicy;
use crate::routing::store::DomainSettings;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::{RoutingBackend, Settings};
use crate::utils::CooldownOptions;
use crate::workers::{deployer, health};

/// Main application options
#[derive(Debug)]
pub struct AppOptions {
    pub lifecycle: LifecycleOptions,

    pub storage: StorageOptions,

    /// Enable the HTTP server
    pub enable_server: bool,

    /// Enable the deployer workers
    pub enable_deployer: bool,

    /// Enable the periodic health monitor
    pub enable_health_monitor: bool,

    pub server: ServerOptions,

    pub deployer: deployer::Options,

    pub health_worker: health::Options,

    pub health_monitor: HealthMonitorOptions,

    pub processor: ProcessorOptions,

    /// Journal comes from the storage layout when `persist_queue` is set
    pub queue: QueueOptions,

    pub persist_queue: bool,

    pub routing: RoutingOptions,

    /// Docker CLI used for builds and containers
    pub docker_binary: String,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            storage: StorageOptions::default(),
            enable_server: true,
            enable_deployer: true,
            enable_health_monitor: true,
            server: ServerOptions::default(),
            deployer: deployer::Options::default(),
            health_worker: health::Options::default(),
            health_monitor: HealthMonitorOptions::default(),
            processor: ProcessorOptions::default(),
            queue: QueueOptions::default(),
            persist_queue: true,
            routing: RoutingOptions::default(),
            docker_binary: "docker".to_string(),
        }
    }
}

impl AppOptions {
    /// Options for a settings file; secrets move out of `settings`
    pub fn from_settings(settings: &mut Settings, layout: StorageLayout) -> Self {
        let health_interval = Duration::from_secs(settings.health.interval_secs);
        Self {
            lifecycle: LifecycleOptions {
                max_shutdown_delay: Duration::from_secs(settings.shutdown_grace_secs),
            },
            storage: StorageOptions {
                layout,
                ..Default::default()
            },
            enable_server: settings.enable_server,
            enable_deployer: settings.enable_deployer,
            enable_health_monitor: settings.enable_health_monitor,
            server: ServerOptions {
                host: settings.server.host.clone(),
                port: settings.server.port,
            },
            deployer: deployer::Options {
                concurrency: settings.deployer.concurrency.max(1),
                ..Default::default()
            },
            health_worker: health::Options {
                interval: health_interval,
                initial_delay: Duration::from_secs(settings.health.initial_delay_secs),
            },
            health_monitor: HealthMonitorOptions {
                interval: health_interval,
                max_restarts: settings.health.max_restarts,
                ..Default::default()
            },
            processor: ProcessorOptions {
                health: PollPolicy::new(
                    settings.build.health_polls,
                    Duration::from_secs(settings.build.health_poll_interval_secs),
                ),
                image_prefix: settings.build.image_prefix.clone(),
                network: settings.build.network.clone(),
            },
            queue: QueueOptions {
                max_attempts: settings.queue.max_attempts.max(1),
                backoff: CooldownOptions {
                    base_delay: Duration::from_secs(settings.queue.backoff_secs),
                    ..Default::default()
                },
                keep_completed: settings.queue.keep_completed,
                keep_failed: settings.queue.keep_failed,
                journal: None,
            },
            persist_queue: settings.queue.persist,
            routing: RoutingOptions {
                domain: DomainSettings {
                    base_domain: settings.routing.base_domain.clone(),
                    ssl_enabled: settings.routing.ssl_enabled,
                },
                instance_id: settings.routing.instance_id.clone(),
                backend: settings.routing.backend,
                admin_url: settings.routing.admin_url.clone(),
                admin_token: settings.routing.admin_token.take(),
            },
            docker_binary: settings.build.docker_binary.clone(),
        }
    }
}

/// Lifecycle options for the engine
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(10),
        }
    }
}

/// Storage configuration options
#[derive(Debug, Clone)]
pub struct StorageOptions {
    /// Storage layout paths
    pub layout: StorageLayout,

    /// Entries of the deployed-commit cache
    pub cache_capacity: usize,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            layout: StorageLayout::default(),
            cache_capacity: 1024,
        }
    }
}

/// Routing backend selection
#[derive(Debug)]
pub struct RoutingOptions {
    pub domain: DomainSettings,
    pub instance_id: String,
    pub backend: RoutingBackend,
    pub admin_url: Option<String>,
    pub admin_token: Option<SecretString>,
}

impl Default for RoutingOptions {
    fn default() -> Self {
        Self {
            domain: DomainSettings {
                base_domain: "localhost".to_string(),
                ssl_enabled: false,
            },
            instance_id: "dockhand".to_string(),
            backend: RoutingBackend::File,
            admin_url: None,
            admin_token: None,
        }
    }
}

/// HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}
