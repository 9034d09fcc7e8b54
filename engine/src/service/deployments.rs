//! Deployment service: admission, enqueueing and operator actions

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::deploy::fsm::DeploymentEvent;
use crate::deploy::processor::DeploymentProcessor;
use crate::deploy::quota;
use crate::deploy::records::DeploymentRecords;
use crate::errors::EngineError;
use crate::health::monitor::{HealthMonitor, HealthStats};
use crate::models::deployment::{
    DeployStep, Deployment, DeploymentLog, DeploymentMetadata, DeploymentStatus, Environment,
    LogLevel, NewDeployment, SourceConfig, SourceType, TriggerKind,
};
use crate::models::event::{PullRequestAction, RepositoryEvent};
use crate::models::route::RouteConfig;
use crate::models::service::Service;
use crate::queue::durable::{DeploymentQueue, QueueStats};
use crate::queue::jobs::{DeployJob, Job, RollbackJob};
use crate::store::{CatalogStore, DeploymentStore, RouteStore, Stores};
use crate::triggers::changes::{ChangeDetector, ChangeRequest};
use crate::triggers::matcher::{RuleMatch, RuleMatcher};

/// Request to create one deployment
#[derive(Debug, Clone)]
pub struct CreateDeploymentInput {
    pub service_id: String,
    pub environment: Environment,
    pub source_config: SourceConfig,
    pub metadata: DeploymentMetadata,
}

/// Manual deploy of a service
#[derive(Debug, Clone, Default)]
pub struct DeployContext {
    pub service_id: String,
    pub environment: Option<Environment>,
    pub branch: Option<String>,
    pub commit_sha: Option<String>,
    pub pr_number: Option<u64>,
    pub tag: Option<String>,
    pub image: Option<String>,
    pub upload_path: Option<String>,
}

/// A deployment accepted by admission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub deployment_id: String,
    pub job_id: String,
    pub status: DeploymentStatus,
}

/// Deployment with its route and logs
#[derive(Debug, Clone)]
pub struct DeploymentView {
    pub deployment: Deployment,
    pub route: Option<RouteConfig>,
    pub logs: Vec<DeploymentLog>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Triggered {
    pub deployment_id: String,
    pub job_id: String,
    pub service_id: String,
    pub rule_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skipped {
    pub service_id: String,
    pub rule_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedMatch {
    pub service_id: String,
    pub rule_id: String,
    pub error: String,
}

/// What an event caused, per match
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventOutcome {
    pub triggered: Vec<Triggered>,
    pub skipped: Vec<Skipped>,
    pub failed: Vec<FailedMatch>,
    pub torn_down: Vec<String>,
}

/// Health monitor stats plus whether its timer runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthMonitorStats {
    pub is_active: bool,
    pub stats: HealthStats,
}

/// Collaborators of the service
#[derive(Clone)]
pub struct ServiceDeps {
    pub stores: Stores,
    pub records: DeploymentRecords,
    pub queue: Arc<DeploymentQueue>,
    pub processor: Arc<DeploymentProcessor>,
    pub matcher: Arc<RuleMatcher>,
    pub detector: Arc<ChangeDetector>,
    pub health: Arc<HealthMonitor>,
}

pub struct DeploymentService {
    deps: ServiceDeps,
}

/// Check that a source carries what its type needs to be fetched
pub fn validate_source(source_type: SourceType, source: &SourceConfig) -> Result<(), EngineError> {
    match source_type {
        t if t.is_git() => {
            if source.repository_url.as_deref().map_or(true, str::is_empty) {
                return Err(EngineError::ValidationError(
                    "Git sources need a repository URL".to_string(),
                ));
            }
            if source.checkout_ref().is_none() && source.pr_number.is_none() {
                return Err(EngineError::ValidationError(
                    "Git sources need a branch, tag or commit".to_string(),
                ));
            }
        }
        SourceType::Upload => {
            if source.upload_path.as_deref().map_or(true, str::is_empty) {
                return Err(EngineError::ValidationError(
                    "Upload sources need an uploaded archive".to_string(),
                ));
            }
        }
        SourceType::Custom => {
            if source.image.as_deref().map_or(true, str::is_empty)
                && source.repository_url.is_none()
            {
                return Err(EngineError::ValidationError(
                    "Custom sources need an image or a repository".to_string(),
                ));
            }
        }
        _ => {}
    }
    Ok(())
}

impl DeploymentService {
    pub fn new(deps: ServiceDeps) -> Self {
        Self { deps }
    }

    fn catalog(&self) -> &Arc<dyn CatalogStore> {
        &self.deps.stores.catalog
    }

    fn deployments(&self) -> &Arc<dyn DeploymentStore> {
        &self.deps.stores.deployments
    }

    async fn service(&self, service_id: &str) -> Result<Service, EngineError> {
        self.catalog()
            .get_service(service_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("Service {}", service_id)))
    }

    /// Admit, persist and enqueue a deployment
    ///
    /// Every non-terminal deployment of the same coordinate is cancelled first.
    pub async fn create_deployment(&self, input: CreateDeploymentInput) -> Result<Admission, EngineError> {
        let service = self.service(&input.service_id).await?;
        if !service.enabled {
            return Err(EngineError::AdmissionError(format!(
                "Service {} is disabled",
                service.id
            )));
        }

        let mut source_config = input.source_config;
        if source_config.repository_url.is_none() && service.source_type.is_git() {
            source_config.repository_url = service.repository_url.clone();
        }
        validate_source(service.source_type, &source_config)?;

        let deployment = Deployment::new(NewDeployment {
            service_id: service.id.clone(),
            project_id: service.project_id.clone(),
            environment: input.environment,
            source_type: service.source_type,
            source_config,
            metadata: input.metadata,
        });
        quota::check(
            self.catalog().as_ref(),
            self.deployments().as_ref(),
            &service,
            &deployment,
        )
        .await?;

        let reason = format!("superseded by {}", deployment.id);
        for previous in self
            .deployments()
            .list_for_coordinate(&deployment.coordinate())
            .await?
            .into_iter()
            .filter(|d| !d.status.is_terminal())
        {
            info!("Cancelling deployment {} ({})", previous.id, reason);
            self.deps.processor.cancel_active(&previous, &reason).await;
        }

        let id = deployment.id.clone();
        let job = Job::Deploy(DeployJob {
            deployment_id: id.clone(),
            project_id: deployment.project_id.clone(),
            service_id: deployment.service_id.clone(),
            source_config: deployment.source_config.clone(),
        });
        self.deployments().insert_deployment(deployment).await?;
        self.deps.records.transition(&id, DeploymentEvent::Enqueue).await?;

        let job_id = match self.deps.queue.enqueue(job).await {
            Ok(job_id) => job_id,
            Err(e) => {
                let message = format!("enqueue failed: {}", e);
                if let Err(err) = self
                    .deps
                    .records
                    .transition(&id, DeploymentEvent::Fail(message))
                    .await
                {
                    warn!("Failed to mark deployment {} failed: {}", id, err);
                }
                return Err(e);
            }
        };

        self.deps
            .records
            .step_log(
                &id,
                LogLevel::Info,
                "admission",
                DeployStep::Admission,
                format!("Queued as job {}", job_id),
            )
            .await;

        Ok(Admission {
            deployment_id: id,
            job_id,
            status: DeploymentStatus::Queued,
        })
    }

    /// Manual deploy; returns the admission with its job id
    pub async fn deploy_service(&self, context: DeployContext) -> Result<Admission, EngineError> {
        let environment = context.environment.unwrap_or(if context.pr_number.is_some() {
            Environment::Preview
        } else {
            Environment::Production
        });

        self.create_deployment(CreateDeploymentInput {
            service_id: context.service_id,
            environment,
            source_config: SourceConfig {
                repository_url: None,
                branch: context.branch,
                commit_sha: context.commit_sha,
                pr_number: context.pr_number,
                tag: context.tag,
                upload_path: context.upload_path,
                image: context.image,
            },
            metadata: DeploymentMetadata {
                trigger: Some(TriggerKind::Manual),
                ..Default::default()
            },
        })
        .await
    }

    pub async fn get_deployment_status(&self, id: &str) -> Result<DeploymentView, EngineError> {
        let deployment = self.deps.records.get(id).await?;
        let route = self.deps.stores.routes.get_active_route(id).await?;
        let logs = self.deployments().list_logs(id).await?;
        Ok(DeploymentView {
            deployment,
            route,
            logs,
        })
    }

    /// Cancel a deployment; false when it was already terminal
    pub async fn cancel_deployment(&self, id: &str, reason: Option<&str>) -> Result<bool, EngineError> {
        let deployment = self.deps.records.get(id).await?;
        if deployment.status.is_terminal() {
            debug!("Deployment {} is already {}, nothing to cancel", id, deployment.status);
            return Ok(false);
        }
        let reason = reason.unwrap_or("cancelled by operator");
        Ok(self.deps.processor.cancel_active(&deployment, reason).await)
    }

    /// Validate now, execute on the queue; returns the job id
    pub async fn rollback_deployment(&self, from_id: &str, to_id: &str) -> Result<String, EngineError> {
        self.deps.processor.validate_rollback(from_id, to_id).await?;
        let job_id = self
            .deps
            .queue
            .enqueue(Job::Rollback(RollbackJob {
                failing_deployment_id: from_id.to_string(),
                target_deployment_id: to_id.to_string(),
            }))
            .await?;
        info!("Rollback {} -> {} queued as job {}", from_id, to_id, job_id);
        Ok(job_id)
    }

    /// Match an event against every rule and admit what needs building
    pub async fn handle_event(&self, event: &RepositoryEvent) -> Result<EventOutcome, EngineError> {
        let mut outcome = EventOutcome::default();

        if event.pr_action == Some(PullRequestAction::Closed) {
            outcome.torn_down = self.teardown_preview(event).await?;
            return Ok(outcome);
        }

        for rule_match in self.deps.matcher.find_matches(event).await? {
            let service_id = rule_match.service.id.clone();
            let rule_id = rule_match.rule.id.clone();

            match self.handle_match(event, rule_match).await {
                Ok(admission) => outcome.triggered.push(Triggered {
                    deployment_id: admission.deployment_id,
                    job_id: admission.job_id,
                    service_id,
                    rule_id,
                }),
                Err(MatchError::Skipped(reason)) => outcome.skipped.push(Skipped {
                    service_id,
                    rule_id,
                    reason,
                }),
                Err(MatchError::Failed(e)) => {
                    warn!("Rule {} of service {} failed: {}", rule_id, service_id, e);
                    outcome.failed.push(FailedMatch {
                        service_id,
                        rule_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            "Event {} on {}: {} triggered, {} skipped, {} failed",
            event.git_ref,
            event.repository_id,
            outcome.triggered.len(),
            outcome.skipped.len(),
            outcome.failed.len()
        );
        Ok(outcome)
    }

    async fn handle_match(
        &self,
        event: &RepositoryEvent,
        rule_match: RuleMatch,
    ) -> Result<Admission, MatchError> {
        let RuleMatch {
            service,
            rule,
            config,
        } = rule_match;

        let decision = self
            .deps
            .detector
            .should_skip(&ChangeRequest {
                service_id: &service.id,
                repository_id: &event.repository_id,
                branch: event.branch.as_deref(),
                head_sha: &event.head_sha,
                changed_paths: event.changed_paths.as_deref(),
                watched_paths: &rule.path_filters,
                strategy: rule.cache_strategy,
            })
            .await
            .map_err(MatchError::Failed)?;
        if decision.should_skip {
            let reason = decision
                .reason
                .map(|r| r.to_string())
                .unwrap_or_else(|| "skipped".to_string());
            debug!("Service {} skipped: {}", service.id, reason);
            return Err(MatchError::Skipped(reason));
        }

        let admission = self
            .create_deployment(CreateDeploymentInput {
                service_id: service.id.clone(),
                environment: config.environment,
                source_config: config.source_config,
                metadata: config.metadata,
            })
            .await
            .map_err(MatchError::Failed)?;

        if let Err(e) = self.catalog().increment_rule_trigger(&rule.id).await {
            warn!("Failed to count trigger of rule {}: {}", rule.id, e);
        }
        Ok(admission)
    }

    /// Retire the preview deployments of a closed pull request
    pub async fn teardown_preview(&self, event: &RepositoryEvent) -> Result<Vec<String>, EngineError> {
        let Some(pr_number) = event.pr_number else {
            return Ok(Vec::new());
        };
        let reason = format!("pull request #{} closed", pr_number);
        let mut torn_down = Vec::new();

        for service in self.deps.matcher.eligible_services(event).await? {
            let previews = self
                .deployments()
                .list_by_service(&service.id)
                .await?
                .into_iter()
                .filter(|d| {
                    d.environment == Environment::Preview
                        && d.source_config.pr_number == Some(pr_number)
                });

            for deployment in previews {
                match deployment.status {
                    DeploymentStatus::Success => {
                        self.deps.processor.discard(&deployment).await;
                        match self
                            .deps
                            .records
                            .transition(&deployment.id, DeploymentEvent::Retire(reason.clone()))
                            .await
                        {
                            Ok(_) => torn_down.push(deployment.id.clone()),
                            Err(e) => warn!("Failed to retire preview {}: {}", deployment.id, e),
                        }
                    }
                    status if !status.is_terminal() => {
                        if self.deps.processor.cancel_active(&deployment, &reason).await {
                            torn_down.push(deployment.id.clone());
                        }
                    }
                    _ => {}
                }
            }
        }

        info!("Tore down {} preview deployment(s): {}", torn_down.len(), reason);
        Ok(torn_down)
    }

    pub fn get_health_monitor_stats(&self) -> HealthMonitorStats {
        HealthMonitorStats {
            is_active: self.deps.health.is_active(),
            stats: self.deps.health.get_stats(),
        }
    }

    pub async fn trigger_manual_health_check(&self) -> HealthMonitorStats {
        let stats = self.deps.health.trigger_manual_check().await;
        HealthMonitorStats {
            is_active: self.deps.health.is_active(),
            stats,
        }
    }

    pub async fn queue_stats(&self) -> QueueStats {
        self.deps.queue.stats().await
    }
}

enum MatchError {
    Skipped(String),
    Failed(EngineError),
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::models::event::{EventKind, Provider};
    use crate::models::rule::{CacheStrategy, DeploymentRule, RuleEvent};
    use crate::models::service::Service;
    use crate::testing::{self, Harness, REPOSITORY_ID, SERVICE_ID};
    use crate::workers::deployer::{self, JobOutcome};

    fn rule(id: &str, service_id: &str, event: RuleEvent, environment: Environment) -> DeploymentRule {
        DeploymentRule {
            id: id.to_string(),
            service_id: service_id.to_string(),
            event,
            branch_pattern: Some(if event == RuleEvent::Push { "main" } else { "*" }.to_string()),
            tag_pattern: None,
            path_filters: Vec::new(),
            environment,
            cache_strategy: CacheStrategy::Loose,
            trigger_count: 0,
            enabled: true,
        }
    }

    fn push(branch: &str, sha: &str) -> RepositoryEvent {
        RepositoryEvent {
            provider: Provider::Github,
            kind: EventKind::Push,
            repository_id: REPOSITORY_ID.to_string(),
            repository_url: "https://github.com/acme/shop.git".to_string(),
            organization: Some("acme".to_string()),
            git_ref: format!("refs/heads/{}", branch),
            branch: Some(branch.to_string()),
            pr_number: None,
            pr_action: None,
            tag: None,
            head_sha: sha.to_string(),
            base_sha: None,
            changed_paths: None,
            deleted: false,
        }
    }

    fn pull_request(number: u64, action: &str, sha: &str) -> RepositoryEvent {
        RepositoryEvent {
            kind: EventKind::PullRequest,
            git_ref: format!("refs/pull/{}/head", number),
            branch: Some("feature".to_string()),
            pr_number: Some(number),
            pr_action: Some(PullRequestAction::parse(action)),
            ..push("feature", sha)
        }
    }

    /// Run every ready job to completion
    async fn drain(h: &Harness) -> Vec<JobOutcome> {
        let deps = deployer::Deps {
            queue: h.queue.clone(),
            processor: h.processor.clone(),
            health: h.health.clone(),
        };
        let mut outcomes = Vec::new();
        while let Some(leased) = h.queue.next_ready().await {
            outcomes.push(deployer::handle_job(&deps, leased).await);
        }
        outcomes
    }

    async fn production_rule(h: &Harness) {
        h.store
            .put_rule(rule("rule-main", SERVICE_ID, RuleEvent::Push, Environment::Production))
            .await;
    }

    async fn preview_rule(h: &Harness) {
        h.store
            .put_rule(rule("rule-pr", SERVICE_ID, RuleEvent::PullRequest, Environment::Preview))
            .await;
    }

    #[tokio::test]
    async fn test_push_to_main_deploys_end_to_end() {
        let h = Harness::new().await;
        production_rule(&h).await;

        let outcome = h.service.handle_event(&push("main", "abc123")).await.unwrap();
        assert_eq!(outcome.triggered.len(), 1);
        assert!(outcome.skipped.is_empty());
        let id = outcome.triggered[0].deployment_id.clone();
        assert_eq!(h.get(&id).await.status, DeploymentStatus::Queued);

        assert_eq!(drain(&h).await, vec![JobOutcome::Completed]);

        let view = h.service.get_deployment_status(&id).await.unwrap();
        assert_eq!(view.deployment.status, DeploymentStatus::Success);
        assert_eq!(
            view.deployment.domain_url.as_deref(),
            Some("https://api-shop.dockhand.test")
        );
        assert_eq!(view.route.unwrap().subdomain, "api-shop");
        assert!(view.logs.iter().any(|l| l.step == Some(DeployStep::HealthVerification)));
        assert!(h.cache.is_deployed(SERVICE_ID, "main", "abc123"));
        assert_eq!(h.store.get_rule("rule-main").await.unwrap().trigger_count, 1);
        assert_eq!(view.deployment.metadata.rule_id.as_deref(), Some("rule-main"));
    }

    #[tokio::test]
    async fn test_same_sha_is_skipped_without_a_row() {
        let h = Harness::new().await;
        production_rule(&h).await;
        h.service.handle_event(&push("main", "abc123")).await.unwrap();
        drain(&h).await;

        let outcome = h.service.handle_event(&push("main", "abc123")).await.unwrap();
        assert!(outcome.triggered.is_empty());
        assert_eq!(outcome.skipped.len(), 1);
        assert!(outcome.skipped[0].reason.starts_with("commit already deployed"));
        assert_eq!(h.store.all_deployments().await.len(), 1);
        assert_eq!(h.store.get_rule("rule-main").await.unwrap().trigger_count, 1);
    }

    #[tokio::test]
    async fn test_rapid_pushes_cancel_the_older_preview() {
        let h = Harness::new().await;
        preview_rule(&h).await;

        let first = h
            .service
            .handle_event(&pull_request(7, "opened", "aaa"))
            .await
            .unwrap()
            .triggered[0]
            .deployment_id
            .clone();
        let second = h
            .service
            .handle_event(&pull_request(7, "synchronize", "bbb"))
            .await
            .unwrap()
            .triggered[0]
            .deployment_id
            .clone();

        assert_eq!(h.get(&first).await.status, DeploymentStatus::Cancelled);
        assert_eq!(h.get(&second).await.status, DeploymentStatus::Queued);

        drain(&h).await;
        assert_eq!(h.get(&first).await.status, DeploymentStatus::Cancelled);
        let second = h.get(&second).await;
        assert_eq!(second.status, DeploymentStatus::Success);
        assert_eq!(second.environment, Environment::Preview);
        assert_eq!(h.runtime.running().len(), 1);
    }

    #[tokio::test]
    async fn test_build_failure_records_the_step() {
        let h = Harness::new().await;
        production_rule(&h).await;
        h.builder.fail.store(true, Ordering::SeqCst);

        let id = h.service.handle_event(&push("main", "abc")).await.unwrap().triggered[0]
            .deployment_id
            .clone();
        let outcomes = drain(&h).await;
        assert!(matches!(outcomes.last(), Some(JobOutcome::Failed(_))));

        let view = h.service.get_deployment_status(&id).await.unwrap();
        assert_eq!(view.deployment.status, DeploymentStatus::Failed);
        assert!(view
            .deployment
            .error_message
            .unwrap()
            .starts_with("image_build failed"));
        assert!(view
            .logs
            .iter()
            .any(|l| l.level == LogLevel::Error && l.step == Some(DeployStep::ImageBuild)));
        assert!(view.route.is_none());
        assert!(h.runtime.running().is_empty());
    }

    #[tokio::test]
    async fn test_rollback_from_a_failed_deployment() {
        let h = Harness::new().await;
        production_rule(&h).await;

        let good = h.service.handle_event(&push("main", "aaa")).await.unwrap().triggered[0]
            .deployment_id
            .clone();
        drain(&h).await;

        h.runtime.start_unhealthy.store(true, Ordering::SeqCst);
        let bad = h.service.handle_event(&push("main", "bbb")).await.unwrap().triggered[0]
            .deployment_id
            .clone();
        drain(&h).await;
        assert_eq!(h.get(&bad).await.status, DeploymentStatus::Failed);
        h.runtime.start_unhealthy.store(false, Ordering::SeqCst);

        h.service.rollback_deployment(&bad, &good).await.unwrap();
        assert_eq!(drain(&h).await, vec![JobOutcome::Completed]);

        let good = h.get(&good).await;
        assert_eq!(good.status, DeploymentStatus::Success);
        assert_eq!(good.metadata.rollback_from.as_deref(), Some(bad.as_str()));
        let bad = h.get(&bad).await;
        assert_eq!(bad.metadata.rolled_back_to.as_deref(), Some(good.id.as_str()));
        let route = h.stores.routes.get_active_route(&good.id).await.unwrap().unwrap();
        assert_eq!(route.subdomain, "api-shop");
    }

    #[tokio::test]
    async fn test_rollback_to_unfinished_target_is_rejected() {
        let h = Harness::new().await;
        let a = h.pending("main", "aaa").await;
        let b = h.pending("main", "bbb").await;

        let err = h.service.rollback_deployment(&b.id, &a.id).await.unwrap_err();
        assert!(matches!(err, EngineError::ValidationError(_)));
        assert!(h.service.rollback_deployment(&a.id, &a.id).await.is_err());
        assert_eq!(h.queue.stats().await.waiting, 0);
    }

    #[tokio::test]
    async fn test_missing_containers_show_up_as_anomaly() {
        let h = Harness::new().await;
        production_rule(&h).await;
        let id = h.service.handle_event(&push("main", "abc")).await.unwrap().triggered[0]
            .deployment_id
            .clone();
        drain(&h).await;

        let container = h.get(&id).await.container_id.unwrap();
        h.runtime.forget(&container);

        let stats = h.service.trigger_manual_health_check().await;
        assert!(!stats.is_active);
        assert_eq!(stats.stats.total_deployments, 1);
        assert_eq!(stats.stats.anomalies, 1);
        assert_eq!(stats.stats.errors, 1);
        assert_eq!(h.get(&id).await.status, DeploymentStatus::Success);
        assert_eq!(h.service.get_health_monitor_stats().stats, stats.stats);
    }

    #[tokio::test]
    async fn test_one_active_deployment_per_coordinate() {
        let h = Harness::new().await;
        let mut ids = Vec::new();
        for sha in ["a1", "a2", "a3"] {
            let admission = h
                .service
                .deploy_service(DeployContext {
                    service_id: SERVICE_ID.to_string(),
                    branch: Some("main".to_string()),
                    commit_sha: Some(sha.to_string()),
                    ..Default::default()
                })
                .await
                .unwrap();
            ids.push(admission.deployment_id);
        }

        let active: Vec<_> = h
            .store
            .all_deployments()
            .await
            .into_iter()
            .filter(|d| !d.status.is_terminal())
            .collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, ids[2]);
        assert_eq!(active[0].metadata.trigger, Some(TriggerKind::Manual));
    }

    #[tokio::test]
    async fn test_quota_counts_deployments_in_flight() {
        let h = Harness::new().await;
        let mut service = testing::service(SERVICE_ID, "api");
        service.resources = Some(crate::models::service::ResourceRequirements {
            cpu_millicores: 250,
            memory_mb: 256,
            replicas: 1,
        });
        h.store.put_service(service).await;
        h.store
            .put_quota(crate::models::service::ResourceQuota {
                project_id: testing::PROJECT_ID.to_string(),
                environment: None,
                max_cpu_millicores: None,
                max_memory_mb: None,
                max_replicas: Some(1),
            })
            .await;
        let deploy = |branch: &str, sha: &str| DeployContext {
            service_id: SERVICE_ID.to_string(),
            branch: Some(branch.to_string()),
            commit_sha: Some(sha.to_string()),
            ..Default::default()
        };

        let first = h.service.deploy_service(deploy("a", "a1")).await.unwrap();
        assert_eq!(first.status, DeploymentStatus::Queued);

        let err = h.service.deploy_service(deploy("b", "b1")).await.unwrap_err();
        assert!(matches!(err, EngineError::QuotaExceeded(_)));
        assert_eq!(h.store.all_deployments().await.len(), 1);

        // Replacing the coordinate's own deployment fits
        let again = h.service.deploy_service(deploy("a", "a2")).await.unwrap();
        assert_eq!(again.status, DeploymentStatus::Queued);
        assert_eq!(drain(&h).await, vec![JobOutcome::Completed, JobOutcome::Completed]);
        assert_eq!(h.get(&again.deployment_id).await.status, DeploymentStatus::Success);
    }

    #[tokio::test]
    async fn test_cancel_is_a_noop_on_terminal_deployments() {
        let h = Harness::new().await;
        let admission = h
            .service
            .deploy_service(DeployContext {
                service_id: SERVICE_ID.to_string(),
                branch: Some("main".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        assert!(h
            .service
            .cancel_deployment(&admission.deployment_id, Some("operator"))
            .await
            .unwrap());
        let cancelled = h.get(&admission.deployment_id).await;
        assert_eq!(cancelled.status, DeploymentStatus::Cancelled);
        assert_eq!(cancelled.metadata.cancellation_reason.as_deref(), Some("operator"));

        assert!(!h
            .service
            .cancel_deployment(&admission.deployment_id, None)
            .await
            .unwrap());
        assert!(matches!(
            h.service.cancel_deployment("missing", None).await,
            Err(EngineError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_closed_pull_request_tears_down_preview() {
        let h = Harness::new().await;
        preview_rule(&h).await;
        let id = h
            .service
            .handle_event(&pull_request(9, "opened", "ccc"))
            .await
            .unwrap()
            .triggered[0]
            .deployment_id
            .clone();
        drain(&h).await;
        let live = h.get(&id).await;
        assert_eq!(live.status, DeploymentStatus::Success);
        let container = live.container_id.unwrap();

        let outcome = h
            .service
            .handle_event(&pull_request(9, "closed", "ccc"))
            .await
            .unwrap();
        assert_eq!(outcome.torn_down, vec![id.clone()]);
        assert!(outcome.triggered.is_empty());

        let retired = h.get(&id).await;
        assert_eq!(retired.status, DeploymentStatus::Cancelled);
        assert!(h.stores.routes.get_active_route(&id).await.unwrap().is_none());
        assert!(h.runtime.running().is_empty());
        assert!(h.runtime.container(&container).is_none());
        let unroute = h.journal.position(&format!("unroute:{}", id)).unwrap();
        let remove = h.journal.position(&format!("remove:{}", id)).unwrap();
        assert!(unroute < remove);
    }

    #[tokio::test]
    async fn test_failing_match_does_not_block_others() {
        let h = Harness::new().await;
        production_rule(&h).await;

        let mut uploads = Service {
            source_type: SourceType::Upload,
            ..testing::service("svc-upload", "uploads")
        };
        uploads.repository_url = None;
        h.store.put_service(uploads).await;
        h.store
            .put_rule(rule("rule-upload", "svc-upload", RuleEvent::Push, Environment::Production))
            .await;

        let outcome = h.service.handle_event(&push("main", "abc")).await.unwrap();
        assert_eq!(outcome.triggered.len(), 1);
        assert_eq!(outcome.triggered[0].service_id, SERVICE_ID);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].rule_id, "rule-upload");
        assert_eq!(h.store.get_rule("rule-upload").await.unwrap().trigger_count, 0);
    }

    #[tokio::test]
    async fn test_disabled_service_is_refused() {
        let h = Harness::new().await;
        let mut service = testing::service(SERVICE_ID, "api");
        service.enabled = false;
        h.store.put_service(service).await;

        let err = h
            .service
            .deploy_service(DeployContext {
                service_id: SERVICE_ID.to_string(),
                branch: Some("main".to_string()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::AdmissionError(_)));
        assert!(h.store.all_deployments().await.is_empty());
    }

    #[test]
    fn test_validate_source() {
        let git = SourceConfig {
            repository_url: Some("https://github.com/acme/shop.git".to_string()),
            branch: Some("main".to_string()),
            ..Default::default()
        };
        assert!(validate_source(SourceType::Github, &git).is_ok());
        assert!(validate_source(
            SourceType::Github,
            &SourceConfig {
                branch: None,
                ..git.clone()
            }
        )
        .is_err());
        assert!(validate_source(SourceType::Upload, &SourceConfig::default()).is_err());
        assert!(validate_source(
            SourceType::Custom,
            &SourceConfig {
                image: Some("nginx:1.27".to_string()),
                ..Default::default()
            }
        )
        .is_ok());
    }
}
