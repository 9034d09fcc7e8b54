//! Settings file management

use std::path::PathBuf;

use secrecy::SecretString;
use serde::{Deserialize, Deserializer, Serialize};

use crate::logs::LogLevel;
use crate::models::event::Provider;

/// Engine settings
///
/// Every field has a default so a partial (or empty) `settings.json` is valid.
/// Secrets are never serialized back out.
#[derive(Debug, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON log lines
    #[serde(default)]
    pub log_json: bool,

    /// Also write daily-rolling log files under the storage directory
    #[serde(default)]
    pub log_to_file: bool,

    /// Overrides the platform storage directory
    #[serde(default)]
    pub storage_dir: Option<PathBuf>,

    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerSettings,

    /// Enable the HTTP server
    #[serde(default = "default_true")]
    pub enable_server: bool,

    /// Enable the deployer workers
    #[serde(default = "default_true")]
    pub enable_deployer: bool,

    /// Enable the periodic health monitor
    #[serde(default = "default_true")]
    pub enable_health_monitor: bool,

    #[serde(default)]
    pub deployer: DeployerSettings,

    #[serde(default)]
    pub health: HealthSettings,

    #[serde(default)]
    pub queue: QueueSettings,

    #[serde(default)]
    pub routing: RoutingSettings,

    #[serde(default)]
    pub build: BuildSettings,

    /// Webhook installations per provider organization
    #[serde(default, skip_serializing)]
    pub installations: Vec<InstallationSettings>,

    /// Seconds workers get to stop before the process exits
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_shutdown_grace() -> u64 {
    10
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<SecretString, D::Error>
where
    D: Deserializer<'de>,
{
    String::deserialize(deserializer).map(SecretString::from)
}

fn deserialize_optional_secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?
        .filter(|s| !s.is_empty())
        .map(SecretString::from))
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            log_to_file: false,
            storage_dir: None,
            server: ServerSettings::default(),
            enable_server: true,
            enable_deployer: true,
            enable_health_monitor: true,
            deployer: DeployerSettings::default(),
            health: HealthSettings::default(),
            queue: QueueSettings::default(),
            routing: RoutingSettings::default(),
            build: BuildSettings::default(),
            installations: Vec::new(),
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_server_host")]
    pub host: String,

    #[serde(default = "default_server_port")]
    pub port: u16,
}

fn default_server_host() -> String {
    "0.0.0.0".to_string()
}

fn default_server_port() -> u16 {
    8080
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
        }
    }
}

/// Deployer worker pool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployerSettings {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_concurrency() -> usize {
    2
}

impl Default for DeployerSettings {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
        }
    }
}

/// Health monitor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSettings {
    #[serde(default = "default_health_interval")]
    pub interval_secs: u64,

    /// Delay before the first pass after startup
    #[serde(default = "default_health_initial_delay")]
    pub initial_delay_secs: u64,

    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
}

fn default_health_interval() -> u64 {
    60
}

fn default_health_initial_delay() -> u64 {
    5
}

fn default_max_restarts() -> u32 {
    3
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_health_interval(),
            initial_delay_secs: default_health_initial_delay(),
            max_restarts: default_max_restarts(),
        }
    }
}

/// Deployment queue settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// First retry delay; doubles per attempt
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: u64,

    #[serde(default = "default_keep_completed")]
    pub keep_completed: usize,

    #[serde(default = "default_keep_failed")]
    pub keep_failed: usize,

    /// Journal waiting jobs under the storage directory
    #[serde(default = "default_true")]
    pub persist: bool,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_secs() -> u64 {
    2
}

fn default_keep_completed() -> usize {
    100
}

fn default_keep_failed() -> usize {
    500
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_secs: default_backoff_secs(),
            keep_completed: default_keep_completed(),
            keep_failed: default_keep_failed(),
            persist: true,
        }
    }
}

/// Where route entries are published
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingBackend {
    /// One JSON file per deployment, watched by the proxy
    #[default]
    File,

    /// Proxy admin API
    Http,
}

/// Routing settings
#[derive(Debug, Serialize, Deserialize)]
pub struct RoutingSettings {
    #[serde(default = "default_base_domain")]
    pub base_domain: String,

    #[serde(default)]
    pub ssl_enabled: bool,

    /// Identifies this engine in published route entries
    #[serde(default = "default_instance_id")]
    pub instance_id: String,

    #[serde(default)]
    pub backend: RoutingBackend,

    /// Admin API base URL, required by the `http` backend
    #[serde(default)]
    pub admin_url: Option<String>,

    #[serde(
        default,
        skip_serializing,
        deserialize_with = "deserialize_optional_secret"
    )]
    pub admin_token: Option<SecretString>,
}

fn default_base_domain() -> String {
    "localhost".to_string()
}

fn default_instance_id() -> String {
    "dockhand".to_string()
}

impl Default for RoutingSettings {
    fn default() -> Self {
        Self {
            base_domain: default_base_domain(),
            ssl_enabled: false,
            instance_id: default_instance_id(),
            backend: RoutingBackend::File,
            admin_url: None,
            admin_token: None,
        }
    }
}

/// Image build and container settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildSettings {
    /// Prepended to every built image name
    #[serde(default = "default_image_prefix")]
    pub image_prefix: String,

    /// Docker network containers join
    #[serde(default)]
    pub network: Option<String>,

    #[serde(default = "default_docker_binary")]
    pub docker_binary: String,

    /// Health probes after a container starts
    #[serde(default = "default_health_polls")]
    pub health_polls: u32,

    #[serde(default = "default_health_poll_interval")]
    pub health_poll_interval_secs: u64,
}

fn default_image_prefix() -> String {
    "dockhand/".to_string()
}

fn default_docker_binary() -> String {
    "docker".to_string()
}

fn default_health_polls() -> u32 {
    30
}

fn default_health_poll_interval() -> u64 {
    2
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            image_prefix: default_image_prefix(),
            network: None,
            docker_binary: default_docker_binary(),
            health_polls: default_health_polls(),
            health_poll_interval_secs: default_health_poll_interval(),
        }
    }
}

/// Credentials of one provider organization
#[derive(Debug, Deserialize)]
pub struct InstallationSettings {
    pub provider: Provider,

    /// Organization login or GitLab group; `*` matches any
    pub organization: String,

    #[serde(deserialize_with = "deserialize_secret")]
    pub webhook_secret: SecretString,

    #[serde(default, deserialize_with = "deserialize_optional_secret")]
    pub access_token: Option<SecretString>,
}
