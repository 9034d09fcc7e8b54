//! Health reconciliation of live deployments
//!
//! Each pass looks at the containers of every `success` deployment that has not
//! been superseded:
//! - all running containers healthy: healthy, restart budget reset
//! - running but unhealthy: restarted while the budget lasts (degraded), then
//!   marked persistently degraded in metadata (unhealthy)
//! - nothing running: anomaly, logged and counted as an error once, status left alone

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tracing::{debug, error, info, warn};

use crate::deploy::records::DeploymentRecords;
use crate::deploy::runtime::ContainerRuntime;
use crate::errors::EngineError;
use crate::models::deployment::{Deployment, DeploymentLog, DeploymentStatus, HealthState, LogLevel};
use crate::retry::{poll_until, PollPolicy};
use crate::store::DeploymentStore;

/// Health monitor options
#[derive(Debug, Clone)]
pub struct HealthMonitorOptions {
    /// Time between passes
    pub interval: Duration,

    /// Restarts a deployment gets before it is marked persistently degraded
    pub max_restarts: u32,

    /// Polling after a restart
    pub restart_verification: PollPolicy,
}

impl Default for HealthMonitorOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            max_restarts: 3,
            restart_verification: PollPolicy::restart_verification(),
        }
    }
}

/// Monitor statistics
///
/// `total/healthy/degraded/unhealthy` describe the last pass; `restarted_containers`,
/// `anomalies` and `errors` accumulate over the monitor's lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthStats {
    pub total_deployments: u64,
    pub healthy_deployments: u64,
    pub degraded_deployments: u64,
    pub unhealthy_deployments: u64,
    pub restarted_containers: u64,
    pub anomalies: u64,
    pub errors: u64,
    pub last_check_at: Option<DateTime<Utc>>,
}

/// Verdict for one deployment in one pass
#[derive(Debug, Clone, PartialEq, Eq)]
enum Verdict {
    Healthy,
    Degraded { restarted: u64 },
    PersistentlyDegraded { newly_marked: bool },
    Missing { newly_marked: bool },
    CheckFailed,
}

pub struct HealthMonitor {
    records: DeploymentRecords,
    runtime: Arc<dyn ContainerRuntime>,
    options: HealthMonitorOptions,
    stats: RwLock<HealthStats>,
    restart_counts: Mutex<HashMap<String, u32>>,
    active: AtomicBool,
    pass: tokio::sync::Mutex<()>,
}

impl HealthMonitor {
    pub fn new(
        records: DeploymentRecords,
        runtime: Arc<dyn ContainerRuntime>,
        options: HealthMonitorOptions,
    ) -> Self {
        Self {
            records,
            runtime,
            options,
            stats: RwLock::new(HealthStats::default()),
            restart_counts: Mutex::new(HashMap::new()),
            active: AtomicBool::new(false),
            pass: tokio::sync::Mutex::new(()),
        }
    }

    pub fn options(&self) -> &HealthMonitorOptions {
        &self.options
    }

    /// Whether the periodic timer is running
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }

    pub fn get_stats(&self) -> HealthStats {
        self.stats.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Run a pass now and return the resulting stats
    pub async fn trigger_manual_check(&self) -> HealthStats {
        info!("Manual health check requested");
        self.run_pass().await
    }

    /// One reconciliation pass; passes never overlap
    pub async fn run_pass(&self) -> HealthStats {
        let _guard = self.pass.lock().await;

        let deployments = match self
            .records
            .store()
            .list_by_status(DeploymentStatus::Success)
            .await
        {
            Ok(deployments) => deployments,
            Err(e) => {
                error!("Health check could not list deployments: {}", e);
                let mut stats = self.stats.write().unwrap_or_else(|e| e.into_inner());
                stats.errors += 1;
                stats.last_check_at = Some(Utc::now());
                return stats.clone();
            }
        };
        let live: Vec<Deployment> = deployments
            .into_iter()
            .filter(|d| !d.is_superseded())
            .collect();

        debug!("Health check over {} deployment(s)", live.len());
        let verdicts = join_all(live.iter().map(|d| self.check_isolated(d))).await;

        let mut stats = self.stats.write().unwrap_or_else(|e| e.into_inner());
        stats.total_deployments = live.len() as u64;
        stats.healthy_deployments = 0;
        stats.degraded_deployments = 0;
        stats.unhealthy_deployments = 0;

        for verdict in verdicts {
            match verdict {
                Verdict::Healthy => stats.healthy_deployments += 1,
                Verdict::Degraded { restarted } => {
                    stats.degraded_deployments += 1;
                    stats.restarted_containers += restarted;
                }
                Verdict::PersistentlyDegraded { newly_marked } => {
                    stats.unhealthy_deployments += 1;
                    if newly_marked {
                        stats.errors += 1;
                    }
                }
                Verdict::Missing { newly_marked } => {
                    stats.unhealthy_deployments += 1;
                    stats.anomalies += 1;
                    if newly_marked {
                        stats.errors += 1;
                    }
                }
                Verdict::CheckFailed => stats.errors += 1,
            }
        }
        stats.last_check_at = Some(Utc::now());
        self.prune_restarts(&live);

        info!(
            "Health check: {} total, {} healthy, {} degraded, {} unhealthy",
            stats.total_deployments,
            stats.healthy_deployments,
            stats.degraded_deployments,
            stats.unhealthy_deployments
        );
        stats.clone()
    }

    async fn check_isolated(&self, deployment: &Deployment) -> Verdict {
        match self.check_deployment(deployment).await {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!("Health check of deployment {} failed: {}", deployment.id, e);
                Verdict::CheckFailed
            }
        }
    }

    fn restarts_used(&self, deployment_id: &str) -> u32 {
        self.restart_counts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(deployment_id)
            .copied()
            .unwrap_or(0)
    }

    fn record_restart(&self, deployment_id: &str) {
        *self
            .restart_counts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(deployment_id.to_string())
            .or_insert(0) += 1;
    }

    fn reset_restarts(&self, deployment_id: &str) {
        self.restart_counts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(deployment_id);
    }

    /// Forget restart budgets of deployments that left the live set
    fn prune_restarts(&self, live: &[Deployment]) {
        self.restart_counts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|id, _| live.iter().any(|d| &d.id == id));
    }

    #[cfg(test)]
    fn tracked_restarts(&self) -> usize {
        self.restart_counts.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    async fn mark(&self, deployment: &Deployment, state: HealthState) -> Result<bool, EngineError> {
        if deployment.metadata.health == Some(state) {
            return Ok(false);
        }
        self.records
            .update(&deployment.id, |d| d.metadata.health = Some(state))
            .await?;
        Ok(true)
    }

    async fn check_deployment(&self, deployment: &Deployment) -> Result<Verdict, EngineError> {
        let id = deployment.id.as_str();
        let containers = self.runtime.list_by_deployment(id).await?;
        let running: Vec<_> = containers.into_iter().filter(|c| c.is_running()).collect();

        if running.is_empty() {
            warn!("Deployment {} is live but has no running containers", id);
            let newly_marked = self.mark(deployment, HealthState::Missing).await?;
            if newly_marked {
                self.records
                    .log(DeploymentLog::new(
                        id,
                        LogLevel::Warn,
                        "health",
                        "No running containers found for a live deployment",
                    ))
                    .await;
            }
            return Ok(Verdict::Missing { newly_marked });
        }

        let mut unhealthy = Vec::new();
        for container in &running {
            if !self.runtime.check_health(&container.id).await? {
                unhealthy.push(container.id.clone());
            }
        }

        if unhealthy.is_empty() {
            self.reset_restarts(id);
            if deployment.metadata.health.is_some() {
                self.mark(deployment, HealthState::Healthy).await?;
            }
            return Ok(Verdict::Healthy);
        }

        if self.restarts_used(id) >= self.options.max_restarts {
            let newly_marked = self.mark(deployment, HealthState::PersistentlyDegraded).await?;
            if newly_marked {
                error!(
                    "Deployment {} still unhealthy after {} restart(s), marked persistently degraded",
                    id, self.options.max_restarts
                );
                self.records
                    .log(DeploymentLog::new(
                        id,
                        LogLevel::Error,
                        "health",
                        format!(
                            "Unhealthy after {} restarts; giving up on automatic remediation",
                            self.options.max_restarts
                        ),
                    ))
                    .await;
            }
            return Ok(Verdict::PersistentlyDegraded { newly_marked });
        }

        self.record_restart(id);
        self.mark(deployment, HealthState::Degraded).await?;

        let mut restarted = 0;
        let mut recovered = true;
        for container_id in &unhealthy {
            self.records
                .log(DeploymentLog::new(
                    id,
                    LogLevel::Warn,
                    "health",
                    format!("Restarting unhealthy container {}", container_id),
                ))
                .await;
            if let Err(e) = self.runtime.restart(container_id).await {
                warn!("Failed to restart container {}: {}", container_id, e);
                recovered = false;
                continue;
            }
            restarted += 1;

            let runtime = self.runtime.clone();
            let outcome = poll_until(&self.options.restart_verification, |_| {
                let runtime = runtime.clone();
                let container_id = container_id.clone();
                async move { runtime.check_health(&container_id).await }
            })
            .await;
            recovered &= outcome.is_ready();
        }

        info!(
            "Deployment {}: restarted {} container(s), recovered: {}",
            id, restarted, recovered
        );
        Ok(Verdict::Degraded { restarted })
    }
}
