//! Deployment processor: source -> image -> container -> route -> health
//!
//! Every step starts with a deployment log tagged with the step name. A failing
//! step marks the deployment `failed` with an error message prefixed by the
//! step, retracts whatever was already published and reports a structured
//! result instead of an error. Between steps the processor re-reads the record
//! and stops quietly if someone cancelled it meanwhile.

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info, warn};

use crate::cache::deployment::DeploymentCache;
use crate::deploy::fsm::DeploymentEvent;
use crate::deploy::git::{PreparedSource, SourceFetcher};
use crate::deploy::quota;
use crate::deploy::records::DeploymentRecords;
use crate::deploy::runtime::{ContainerRuntime, ContainerSpec, ImageBuilder};
use crate::errors::EngineError;
use crate::models::deployment::{
    DeployStep, Deployment, DeploymentLog, DeploymentStatus, LogLevel, SourceType,
};
use crate::models::service::Service;
use crate::queue::jobs::{DeployJob, RollbackJob};
use crate::retry::{poll_until, PollOutcome, PollPolicy};
use crate::routing::registrar::RouteRegistrar;
use crate::store::{CatalogStore, DeploymentStore};
use crate::utils::slugify;

/// Processor options
#[derive(Debug, Clone)]
pub struct ProcessorOptions {
    /// Health verification after the container starts
    pub health: PollPolicy,

    /// Prepended to every built image name
    pub image_prefix: String,

    /// Docker network containers join, if any
    pub network: Option<String>,
}

impl Default for ProcessorOptions {
    fn default() -> Self {
        Self {
            health: PollPolicy::health_verification(),
            image_prefix: "dockhand/".to_string(),
            network: None,
        }
    }
}

/// Collaborators of the processor
#[derive(Clone)]
pub struct ProcessorDeps {
    pub records: DeploymentRecords,
    pub catalog: Arc<dyn CatalogStore>,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub builder: Arc<dyn ImageBuilder>,
    pub sources: Arc<dyn SourceFetcher>,
    pub registrar: Arc<RouteRegistrar>,
    pub cache: Arc<DeploymentCache>,
}

/// Outcome of one processor run
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessResult {
    pub deployment_id: String,
    pub success: bool,
    pub container_id: Option<String>,
    pub image_tag: Option<String>,
    pub domain_url: Option<String>,
    pub error: Option<String>,
    pub failed_step: Option<DeployStep>,

    /// Whether the queue may run the job again
    pub retryable: bool,

    /// Stopped because the deployment was cancelled or superseded
    pub aborted: bool,
}

impl ProcessResult {
    fn succeeded(deployment: &Deployment) -> Self {
        Self {
            deployment_id: deployment.id.clone(),
            success: true,
            container_id: deployment.container_id.clone(),
            image_tag: deployment.container_image.clone(),
            domain_url: deployment.domain_url.clone(),
            error: None,
            failed_step: None,
            retryable: false,
            aborted: false,
        }
    }

    fn failed(deployment_id: &str, step: Option<DeployStep>, error: String, retryable: bool) -> Self {
        Self {
            deployment_id: deployment_id.to_string(),
            success: false,
            container_id: None,
            image_tag: None,
            domain_url: None,
            error: Some(error),
            failed_step: step,
            retryable,
            aborted: false,
        }
    }

    fn aborted(deployment_id: &str, reason: String) -> Self {
        Self {
            aborted: true,
            ..Self::failed(deployment_id, None, reason, false)
        }
    }
}

/// Why a run stopped early
enum Interrupt {
    Cancelled(String),
    Failed { step: DeployStep, error: EngineError },
}

fn at(step: DeployStep) -> impl Fn(EngineError) -> Interrupt {
    move |error| Interrupt::Failed { step, error }
}

/// Side effects a run has produced so far
#[derive(Default)]
struct Progress {
    source: Option<PreparedSource>,
    container_id: Option<String>,
    routed: bool,
}

pub struct DeploymentProcessor {
    deps: ProcessorDeps,
    options: ProcessorOptions,
}

impl DeploymentProcessor {
    pub fn new(deps: ProcessorDeps, options: ProcessorOptions) -> Self {
        Self { deps, options }
    }

    pub fn records(&self) -> &DeploymentRecords {
        &self.deps.records
    }

    /// Canonical container name of a deployment
    pub fn container_name(service: &Service, deployment: &Deployment) -> String {
        format!("{}-{}", slugify(&service.name), deployment.id)
    }

    fn image_tag(&self, service: &Service, deployment: &Deployment) -> String {
        format!(
            "{}{}:{}",
            self.options.image_prefix,
            slugify(&service.name),
            deployment.id
        )
    }

    async fn service(&self, service_id: &str) -> Result<Service, EngineError> {
        self.deps
            .catalog
            .get_service(service_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("Service {}", service_id)))
    }

    async fn log(&self, id: &str, level: LogLevel, phase: &str, step: DeployStep, msg: impl Into<String>) {
        self.deps.records.step_log(id, level, phase, step, msg).await;
    }

    /// Run a deploy job; never returns an error, failures are in the result
    pub async fn run(&self, job: &DeployJob, attempt: u32) -> ProcessResult {
        let id = job.deployment_id.as_str();
        info!("Processing deployment {} (attempt {})", id, attempt);

        let mut progress = Progress::default();
        let outcome = self.execute(id, attempt, &mut progress).await;

        if let Some(source) = progress.source.take() {
            if let Err(e) = self.deps.sources.cleanup(&source).await {
                debug!("Failed to clean source of {}: {}", id, e);
            }
        }

        match outcome {
            Ok(deployment) => {
                info!("Deployment {} succeeded at {:?}", id, deployment.domain_url);
                ProcessResult::succeeded(&deployment)
            }
            Err(Interrupt::Cancelled(reason)) => {
                info!("Deployment {} stopped: {}", id, reason);
                self.undo(id, &progress).await;
                ProcessResult::aborted(id, reason)
            }
            Err(Interrupt::Failed { step, error }) => self.fail(id, step, error, &progress).await,
        }
    }

    /// Mark the deployment failed and retract what was published
    async fn fail(&self, id: &str, step: DeployStep, error: EngineError, progress: &Progress) -> ProcessResult {
        let retryable = error.is_retryable();
        let message = EngineError::step(step, &error).to_string();
        let phase = if step == DeployStep::Admission { "admission" } else { "deploy" };

        self.deps
            .records
            .log(
                DeploymentLog::new(id, LogLevel::Error, phase, message.clone())
                    .with_step(step)
                    .with_metadata(json!({ "retryable": retryable })),
            )
            .await;

        self.undo(id, progress).await;

        match self
            .deps
            .records
            .transition(id, DeploymentEvent::Fail(message.clone()))
            .await
        {
            Ok(_) => ProcessResult::failed(id, Some(step), message, retryable),
            Err(EngineError::InvalidTransition(_)) => {
                // Cancelled while the step ran; nothing left to report
                ProcessResult::aborted(id, message)
            }
            Err(e) => ProcessResult::failed(id, Some(step), format!("{} ({})", message, e), retryable),
        }
    }

    /// Route first, container second
    async fn undo(&self, id: &str, progress: &Progress) {
        if progress.routed {
            if let Err(e) = self.deps.registrar.unregister(id).await {
                warn!("Failed to retract route of {}: {}", id, e);
            }
        }
        if let Some(container_id) = &progress.container_id {
            if let Err(e) = self.deps.runtime.stop(container_id).await {
                warn!("Failed to stop container {} of {}: {}", container_id, id, e);
            }
            if let Err(e) = self.deps.runtime.remove(container_id).await {
                warn!("Failed to remove container {} of {}: {}", container_id, id, e);
            }
        }
    }

    async fn ensure_active(&self, id: &str) -> Result<Deployment, Interrupt> {
        let deployment = self
            .deps
            .records
            .get(id)
            .await
            .map_err(|e| Interrupt::Cancelled(e.to_string()))?;
        if deployment.status == DeploymentStatus::Cancelled {
            let reason = deployment
                .metadata
                .cancellation_reason
                .clone()
                .unwrap_or_else(|| "cancelled".to_string());
            return Err(Interrupt::Cancelled(reason));
        }
        Ok(deployment)
    }

    /// Apply a transition; losing the record to a cancellation aborts quietly
    async fn advance(&self, id: &str, event: DeploymentEvent) -> Result<Deployment, Interrupt> {
        match self.deps.records.transition(id, event).await {
            Ok(deployment) => Ok(deployment),
            Err(EngineError::InvalidTransition(e)) => {
                self.ensure_active(id).await?;
                Err(Interrupt::Cancelled(e))
            }
            Err(e) => Err(Interrupt::Failed {
                step: DeployStep::Admission,
                error: e,
            }),
        }
    }

    /// Bring the record to `queued` for this attempt
    async fn readmit(&self, id: &str, attempt: u32) -> Result<Deployment, Interrupt> {
        let deployment = self.ensure_active(id).await?;

        match deployment.status {
            DeploymentStatus::Queued => Ok(deployment),
            DeploymentStatus::Pending => self.advance(id, DeploymentEvent::Enqueue).await,
            DeploymentStatus::Failed if attempt > 1 => {
                if let Some(newer) = self.newer_on_coordinate(&deployment).await {
                    return Err(Interrupt::Cancelled(format!(
                        "retry skipped, superseded by {}",
                        newer
                    )));
                }
                self.advance(id, DeploymentEvent::Retry).await
            }
            DeploymentStatus::Building | DeploymentStatus::Deploying => {
                // Interrupted mid-flight by a restart
                self.advance(id, DeploymentEvent::Fail("interrupted".to_string()))
                    .await?;
                self.advance(id, DeploymentEvent::Retry).await
            }
            status => Err(Interrupt::Cancelled(format!("deployment is already {}", status))),
        }
    }

    /// A newer deployment of the same coordinate, if one exists
    async fn newer_on_coordinate(&self, deployment: &Deployment) -> Option<String> {
        let siblings = self
            .deps
            .records
            .store()
            .list_for_coordinate(&deployment.coordinate())
            .await
            .ok()?;
        siblings
            .into_iter()
            .find(|d| {
                d.id != deployment.id
                    && (d.created_at > deployment.created_at || !d.status.is_terminal())
            })
            .map(|d| d.id)
    }

    /// Cancel older active deployments of the coordinate; give up if a newer one exists
    async fn claim_coordinate(&self, deployment: &Deployment) -> Result<(), Interrupt> {
        let siblings = self
            .deps
            .records
            .store()
            .list_for_coordinate(&deployment.coordinate())
            .await
            .map_err(at(DeployStep::Admission))?;

        for other in siblings
            .into_iter()
            .filter(|d| d.id != deployment.id && !d.status.is_terminal())
        {
            if other.created_at > deployment.created_at {
                let reason = format!("superseded by newer deployment {}", other.id);
                if let Err(e) = self
                    .deps
                    .records
                    .transition(&deployment.id, DeploymentEvent::Cancel(reason.clone()))
                    .await
                {
                    warn!("Failed to cancel deployment {}: {}", deployment.id, e);
                }
                return Err(Interrupt::Cancelled(reason));
            }
            self.cancel_active(&other, &format!("superseded by {}", deployment.id))
                .await;
        }
        Ok(())
    }

    /// Cancel a non-terminal deployment and remove its container (best effort)
    ///
    /// Returns false when the deployment had already reached a terminal status.
    pub async fn cancel_active(&self, deployment: &Deployment, reason: &str) -> bool {
        match self
            .deps
            .records
            .transition(&deployment.id, DeploymentEvent::Cancel(reason.to_string()))
            .await
        {
            Ok(cancelled) => {
                self.deps
                    .records
                    .log(DeploymentLog::new(
                        &deployment.id,
                        LogLevel::Warn,
                        "admission",
                        format!("Cancelled: {}", reason),
                    ))
                    .await;
                self.discard(&cancelled).await;
                true
            }
            Err(e) => {
                debug!("Deployment {} not cancelled: {}", deployment.id, e);
                false
            }
        }
    }

    /// Retract the route, then stop the container
    pub async fn release(&self, deployment: &Deployment) {
        if let Err(e) = self.deps.registrar.unregister(&deployment.id).await {
            warn!("Failed to retract route of {}: {}", deployment.id, e);
        }
        let container = deployment
            .container_id
            .as_deref()
            .or(deployment.container_name.as_deref());
        if let Some(container) = container {
            if let Err(e) = self.deps.runtime.stop(container).await {
                debug!("Failed to stop container {}: {}", container, e);
            }
        }
    }

    /// Release a deployment that will never be restored, then remove its container
    pub async fn discard(&self, deployment: &Deployment) {
        self.release(deployment).await;
        let container = deployment
            .container_id
            .as_deref()
            .or(deployment.container_name.as_deref());
        if let Some(container) = container {
            if let Err(e) = self.deps.runtime.remove(container).await {
                debug!("Failed to remove container {}: {}", container, e);
            }
        }
    }

    async fn execute(&self, id: &str, attempt: u32, progress: &mut Progress) -> Result<Deployment, Interrupt> {
        let deployment = self.readmit(id, attempt).await?;

        // Admission
        self.log(id, LogLevel::Info, "admission", DeployStep::Admission, "Admission checks").await;
        let service = self
            .service(&deployment.service_id)
            .await
            .map_err(at(DeployStep::Admission))?;
        quota::check(
            self.deps.catalog.as_ref(),
            self.deps.records.store().as_ref(),
            &service,
            &deployment,
        )
        .await
        .map_err(at(DeployStep::Admission))?;
        self.claim_coordinate(&deployment).await?;

        let deployment = self.advance(id, DeploymentEvent::StartBuild).await?;
        let prebuilt = match (deployment.source_type, &deployment.source_config.image) {
            (SourceType::Custom, Some(image)) => Some(image.clone()),
            _ => None,
        };

        // Source preparation
        let step = DeployStep::SourcePreparation;
        if prebuilt.is_some() {
            self.log(id, LogLevel::Info, "build", step, "Prebuilt image, no source to fetch").await;
        } else {
            self.log(id, LogLevel::Info, "build", step, "Preparing source").await;
            let source = self
                .deps
                .sources
                .prepare(&deployment)
                .await
                .map_err(at(step))?;
            if let Some(sha) = &source.commit_sha {
                self.log(id, LogLevel::Debug, "build", step, format!("Checked out {}", sha)).await;
            }
            progress.source = Some(source);
        }
        self.ensure_active(id).await?;

        // Image build
        let step = DeployStep::ImageBuild;
        let image = match prebuilt {
            Some(image) => {
                self.log(id, LogLevel::Info, "build", step, format!("Using prebuilt image {}, build skipped", image))
                    .await;
                image
            }
            None => {
                let tag = self.image_tag(&service, &deployment);
                self.log(id, LogLevel::Info, "build", step, format!("Building image {}", tag)).await;
                let source = progress.source.as_ref().ok_or_else(|| Interrupt::Failed {
                    step,
                    error: EngineError::BuildError("no prepared source".to_string()),
                })?;
                self.deps
                    .builder
                    .build(&source.path, &tag)
                    .await
                    .map_err(at(step))?
            }
        };
        self.deps
            .records
            .update(id, |d| {
                d.container_image = Some(image.clone());
                d.build_completed_at = Some(chrono::Utc::now());
            })
            .await
            .map_err(at(step))?;
        self.ensure_active(id).await?;

        // Container deployment
        let step = DeployStep::ContainerDeployment;
        let deployment = self.advance(id, DeploymentEvent::StartDeploy).await?;
        let spec = self.container_spec(&service, &deployment, &image);
        self.log(id, LogLevel::Info, "deploy", step, format!("Starting container {}", spec.name)).await;
        let container_id = self
            .deps
            .runtime
            .create_and_start(&spec)
            .await
            .map_err(at(step))?;
        progress.container_id = Some(container_id.clone());
        self.deps
            .records
            .update(id, |d| {
                d.container_id = Some(container_id.clone());
                d.container_name = Some(spec.name.clone());
            })
            .await
            .map_err(at(step))?;
        self.ensure_active(id).await?;

        // Route registration
        let step = DeployStep::RouteRegistration;
        self.log(id, LogLevel::Info, "deploy", step, "Registering route").await;
        let route = self
            .deps
            .registrar
            .register(&deployment, &container_id, service.port)
            .await
            .map_err(at(step))?;
        progress.routed = true;
        let url = self.deps.registrar.url(&route);
        let health_url = service
            .health_check_path
            .as_ref()
            .map(|path| format!("{}{}", url, path));
        self.ensure_active(id).await?;

        // Health verification
        let step = DeployStep::HealthVerification;
        self.log(id, LogLevel::Info, "deploy", step, "Verifying container health").await;
        let runtime = self.deps.runtime.clone();
        let outcome = poll_until(&self.options.health, |_| {
            let runtime = runtime.clone();
            let container_id = container_id.clone();
            async move { runtime.check_health(&container_id).await }
        })
        .await;
        if let PollOutcome::Exhausted { attempts, last_error } = outcome {
            let detail = last_error.map(|e| format!(": {}", e)).unwrap_or_default();
            return Err(Interrupt::Failed {
                step,
                error: EngineError::RuntimeError(format!(
                    "container not healthy after {} checks{}",
                    attempts, detail
                )),
            });
        }

        let deployment = self
            .deps
            .records
            .transition_with(id, DeploymentEvent::Succeed, |d| {
                d.domain_url = Some(url.clone());
                d.health_check_url = health_url.clone();
            })
            .await
            .map_err(|e| match e {
                EngineError::InvalidTransition(e) => Interrupt::Cancelled(e),
                other => Interrupt::Failed { step, error: other },
            })?;

        self.log(id, LogLevel::Info, "deploy", step, format!("Deployment live at {}", url)).await;
        self.after_success(&deployment).await;
        Ok(deployment)
    }

    fn container_spec(&self, service: &Service, deployment: &Deployment, image: &str) -> ContainerSpec {
        let mut env = service.env.clone();
        env.insert("DOCKHAND_DEPLOYMENT_ID".to_string(), deployment.id.clone());
        env.insert(
            "DOCKHAND_ENVIRONMENT".to_string(),
            deployment.environment.to_string(),
        );
        if let Some(sha) = &deployment.source_config.commit_sha {
            env.insert("DOCKHAND_COMMIT_SHA".to_string(), sha.clone());
        }

        ContainerSpec {
            name: Self::container_name(service, deployment),
            image: image.to_string(),
            deployment_id: deployment.id.clone(),
            service_id: service.id.clone(),
            port: service.port,
            env,
            cpu_millicores: service.resources.map(|r| r.cpu_millicores).filter(|v| *v > 0),
            memory_mb: service.resources.map(|r| r.memory_mb).filter(|v| *v > 0),
            network: self.options.network.clone(),
        }
    }

    /// Record the SHA and retire older live deployments of the coordinate
    async fn after_success(&self, deployment: &Deployment) {
        if let (Some(branch), Some(sha)) = (
            &deployment.source_config.branch,
            &deployment.source_config.commit_sha,
        ) {
            self.deps
                .cache
                .record_success(&deployment.service_id, branch, sha, &deployment.id);
        }
        self.supersede_older(deployment).await;
    }

    async fn supersede_older(&self, current: &Deployment) {
        let siblings = match self
            .deps
            .records
            .store()
            .list_for_coordinate(&current.coordinate())
            .await
        {
            Ok(siblings) => siblings,
            Err(e) => {
                warn!("Failed to list deployments of {}: {}", current.coordinate(), e);
                return;
            }
        };

        for older in siblings.into_iter().filter(|d| {
            d.id != current.id && d.status == DeploymentStatus::Success && !d.is_superseded()
        }) {
            let marked = self
                .deps
                .records
                .update(&older.id, |d| {
                    d.metadata.superseded_by = Some(current.id.clone());
                })
                .await;
            if let Err(e) = marked {
                warn!("Failed to mark {} superseded: {}", older.id, e);
                continue;
            }
            self.deps
                .records
                .log(DeploymentLog::new(
                    &older.id,
                    LogLevel::Info,
                    "deploy",
                    format!("Superseded by {}", current.id),
                ))
                .await;
            self.release(&older).await;
        }
    }

    /// Check a rollback request without touching anything
    pub async fn validate_rollback(
        &self,
        failing_id: &str,
        target_id: &str,
    ) -> Result<(Deployment, Deployment), EngineError> {
        if failing_id == target_id {
            return Err(EngineError::ValidationError(
                "Cannot roll back a deployment onto itself".to_string(),
            ));
        }
        let failing = self.deps.records.get(failing_id).await?;
        let target = self.deps.records.get(target_id).await?;

        if target.service_id != failing.service_id {
            return Err(EngineError::ValidationError(format!(
                "Deployment {} belongs to service {}, not {}",
                target.id, target.service_id, failing.service_id
            )));
        }
        if target.status != DeploymentStatus::Success {
            return Err(EngineError::ValidationError(format!(
                "Rollback target {} is {}, not success",
                target.id, target.status
            )));
        }
        if target.container_id.is_none() && target.container_image.is_none() {
            return Err(EngineError::ValidationError(format!(
                "Rollback target {} has neither a container nor an image",
                target.id
            )));
        }
        Ok((failing, target))
    }

    /// Run a rollback job
    pub async fn rollback(&self, job: &RollbackJob) -> ProcessResult {
        let failing_id = job.failing_deployment_id.as_str();
        let target_id = job.target_deployment_id.as_str();
        let step = DeployStep::Rollback;

        let (failing, target) = match self.validate_rollback(failing_id, target_id).await {
            Ok(pair) => pair,
            Err(e) => {
                warn!("Rollback {} -> {} rejected: {}", failing_id, target_id, e);
                return ProcessResult::failed(target_id, Some(step), e.to_string(), false);
            }
        };

        self.log(failing_id, LogLevel::Info, "rollback", step, format!("Rolling back to {}", target_id))
            .await;
        self.log(target_id, LogLevel::Info, "rollback", step, format!("Restoring in place of {}", failing_id))
            .await;

        match self.restore(&failing, &target).await {
            Ok(restored) => {
                info!("Rolled back {} to {}", failing_id, target_id);
                ProcessResult::succeeded(&restored)
            }
            Err(e) => {
                let message = EngineError::step(step, &e).to_string();
                self.deps
                    .records
                    .log(DeploymentLog::new(target_id, LogLevel::Error, "rollback", message.clone()).with_step(step))
                    .await;
                ProcessResult::failed(target_id, Some(step), message, false)
            }
        }
    }

    async fn restore(&self, failing: &Deployment, target: &Deployment) -> Result<Deployment, EngineError> {
        let service = self.service(&target.service_id).await?;

        self.release(failing).await;

        let existing = match &target.container_id {
            Some(container_id) => self.deps.runtime.get_info(container_id).await?,
            None => None,
        };
        let container_id = match existing {
            Some(info) => {
                if !info.is_running() {
                    self.deps.runtime.start(&info.id).await?;
                }
                info.id
            }
            None => {
                let image = target.container_image.clone().ok_or_else(|| {
                    EngineError::RuntimeError(format!("No image recorded for {}", target.id))
                })?;
                let spec = self.container_spec(&service, target, &image);
                self.deps.runtime.create_and_start(&spec).await?
            }
        };

        let route = self
            .deps
            .registrar
            .register(target, &container_id, service.port)
            .await?;
        let url = self.deps.registrar.url(&route);

        let runtime = self.deps.runtime.clone();
        let outcome = poll_until(&self.options.health, |_| {
            let runtime = runtime.clone();
            let container_id = container_id.clone();
            async move { runtime.check_health(&container_id).await }
        })
        .await;
        if !outcome.is_ready() {
            return Err(EngineError::RuntimeError(format!(
                "restored container {} is not healthy",
                container_id
            )));
        }

        let reason = format!("rolled back to {}", target.id);
        let retired = self
            .deps
            .records
            .transition_with(&failing.id, DeploymentEvent::Retire(reason), |d| {
                d.metadata.rolled_back_to = Some(target.id.clone());
            })
            .await;
        if let Err(e) = retired {
            // Already cancelled: keep the lineage anyway
            debug!("Failing deployment {} not retired: {}", failing.id, e);
            self.deps
                .records
                .update(&failing.id, |d| {
                    d.metadata.rolled_back_to = Some(target.id.clone());
                })
                .await?;
        }

        let restored = self
            .deps
            .records
            .transition_with(&target.id, DeploymentEvent::Reinstate, |d| {
                d.metadata.rollback_from = Some(failing.id.clone());
                d.container_id = Some(container_id.clone());
                d.domain_url = Some(url.clone());
            })
            .await?;

        if let (Some(branch), Some(sha)) = (
            &restored.source_config.branch,
            &restored.source_config.commit_sha,
        ) {
            self.deps
                .cache
                .record_success(&restored.service_id, branch, sha, &restored.id);
        }
        if let Some(branch) = &failing.source_config.branch {
            self.deps
                .cache
                .invalidate(&failing.service_id, branch, &failing.id);
        }
        self.supersede_older(&restored).await;

        Ok(restored)
    }
}
