//! Queue consumer: runs deploy, rollback and health-check jobs

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::deploy::processor::DeploymentProcessor;
use crate::health::monitor::HealthMonitor;
use crate::queue::durable::{DeploymentQueue, FailOutcome, LeasedJob};
use crate::queue::jobs::Job;

/// Deployer worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Workers consuming the queue concurrently
    pub concurrency: usize,

    /// Longest idle wait before the queue is polled again
    pub idle_wait: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            concurrency: 2,
            idle_wait: Duration::from_secs(5),
        }
    }
}

/// Shared handles of the worker pool
#[derive(Clone)]
pub struct Deps {
    pub queue: Arc<DeploymentQueue>,
    pub processor: Arc<DeploymentProcessor>,
    pub health: Arc<HealthMonitor>,
}

/// How a leased job ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Retrying { attempt: u32 },
    Failed(String),
}

/// Run one leased job and settle it with the queue
pub async fn handle_job(deps: &Deps, leased: LeasedJob) -> JobOutcome {
    debug!(
        "Job {} ({}) attempt {}/{}",
        leased.id,
        leased.job.kind(),
        leased.attempt,
        leased.max_attempts
    );

    let failure = match &leased.job {
        Job::Deploy(job) => {
            let result = deps.processor.run(job, leased.attempt).await;
            if result.success || result.aborted {
                None
            } else {
                let error = result.error.unwrap_or_else(|| "deployment failed".to_string());
                Some((error, result.retryable))
            }
        }
        Job::Rollback(job) => {
            let result = deps.processor.rollback(job).await;
            if result.success {
                None
            } else {
                Some((result.error.unwrap_or_else(|| "rollback failed".to_string()), false))
            }
        }
        Job::HealthCheck => {
            deps.health.run_pass().await;
            None
        }
    };

    match failure {
        None => {
            deps.queue.complete(&leased.id).await;
            JobOutcome::Completed
        }
        Some((error, retryable)) => match deps.queue.fail(&leased.id, &error, retryable).await {
            FailOutcome::Retrying { attempt, .. } => JobOutcome::Retrying { attempt },
            FailOutcome::Failed => {
                warn!("Job {} failed for good: {}", leased.id, error);
                JobOutcome::Failed(error)
            }
        },
    }
}

/// Run one deployer worker until shutdown
pub async fn run(
    options: &Options,
    worker_id: usize,
    deps: Deps,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) {
    info!("Deployer worker {} starting...", worker_id);

    loop {
        let leased = tokio::select! {
            biased;
            _ = &mut shutdown_signal => {
                info!("Deployer worker {} shutting down...", worker_id);
                return;
            }
            leased = deps.queue.next_ready() => leased,
        };

        match leased {
            Some(leased) => {
                let id = leased.id.clone();
                match handle_job(&deps, leased).await {
                    JobOutcome::Completed => debug!("Worker {} completed job {}", worker_id, id),
                    JobOutcome::Retrying { attempt } => {
                        debug!("Worker {} released job {} for attempt {}", worker_id, id, attempt)
                    }
                    JobOutcome::Failed(e) => error!("Worker {} job {} failed: {}", worker_id, id, e),
                }
            }
            None => {
                tokio::select! {
                    _ = &mut shutdown_signal => {
                        info!("Deployer worker {} shutting down...", worker_id);
                        return;
                    }
                    _ = deps.queue.wait_for_work(options.idle_wait) => {}
                }
            }
        }
    }
}
