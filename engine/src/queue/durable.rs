//! Durable, retrying deployment queue

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, error, info, warn};

use crate::errors::EngineError;
use crate::filesys::file::File;
use crate::queue::jobs::{Job, JobEnvelope};
use crate::utils::{calc_exp_backoff, CooldownOptions};

/// Queue options
#[derive(Debug, Clone)]
pub struct QueueOptions {
    /// Attempts a deploy job gets, the first included
    pub max_attempts: u32,

    /// Backoff between attempts; doubles from the base delay
    pub backoff: CooldownOptions,

    /// Completed jobs kept for inspection
    pub keep_completed: usize,

    /// Failed jobs kept for inspection
    pub keep_failed: usize,

    /// Where pending jobs are journaled; `None` keeps them in memory only
    pub journal: Option<File>,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: CooldownOptions::default(),
            keep_completed: 100,
            keep_failed: 500,
            journal: None,
        }
    }
}

/// A job handed to a worker
#[derive(Debug, Clone)]
pub struct LeasedJob {
    pub id: String,
    pub attempt: u32,
    pub max_attempts: u32,
    pub job: Job,
}

/// What happened to a failed job
#[derive(Debug, Clone, PartialEq)]
pub enum FailOutcome {
    Retrying { attempt: u32, delay: Duration },
    Failed,
}

/// Terminal record of a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishedJob {
    pub id: String,
    pub kind: String,
    pub attempts: u32,
    pub finished_at: DateTime<Utc>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub waiting: usize,
    pub active: usize,
    pub delayed: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Journal file contents
#[derive(Debug, Default, Serialize, Deserialize)]
struct Journal {
    pending: Vec<JobEnvelope>,
}

#[derive(Default)]
struct State {
    waiting: VecDeque<JobEnvelope>,
    delayed: Vec<JobEnvelope>,
    active: HashMap<String, JobEnvelope>,
    completed: VecDeque<FinishedJob>,
    failed: VecDeque<FinishedJob>,
}

impl State {
    fn promote_due(&mut self, now: DateTime<Utc>) {
        let (due, later): (Vec<_>, Vec<_>) = self.delayed.drain(..).partition(|j| j.run_at <= now);
        self.delayed = later;
        let mut due = due;
        due.sort_by_key(|j| j.run_at);
        self.waiting.extend(due);
    }

    fn pending(&self) -> Vec<JobEnvelope> {
        let mut pending: Vec<JobEnvelope> = self
            .active
            .values()
            .chain(self.waiting.iter())
            .chain(self.delayed.iter())
            .cloned()
            .collect();
        pending.sort_by_key(|j| j.enqueued_at);
        pending
    }
}

fn push_bounded(list: &mut VecDeque<FinishedJob>, job: FinishedJob, keep: usize) {
    list.push_back(job);
    while list.len() > keep {
        list.pop_front();
    }
}

pub struct DeploymentQueue {
    state: Mutex<State>,
    journal_lock: Mutex<()>,
    notify: Notify,
    options: QueueOptions,
}

impl DeploymentQueue {
    pub fn new(options: QueueOptions) -> Self {
        Self {
            state: Mutex::new(State::default()),
            journal_lock: Mutex::new(()),
            notify: Notify::new(),
            options,
        }
    }

    /// Create a queue and restore journaled jobs
    ///
    /// Jobs that were active when the process stopped run again from the start.
    pub async fn open(options: QueueOptions) -> Result<Self, EngineError> {
        let queue = Self::new(options);

        if let Some(journal) = &queue.options.journal {
            if journal.exists().await {
                let restored: Journal = journal.read_json().await?;
                let count = restored.pending.len();
                let mut state = queue.state.lock().await;
                for envelope in restored.pending {
                    if envelope.run_at > Utc::now() {
                        state.delayed.push(envelope);
                    } else {
                        state.waiting.push_back(envelope);
                    }
                }
                info!("Restored {} queued job(s) from {}", count, journal.path().display());
            }
        }

        Ok(queue)
    }

    async fn persist(&self) {
        let Some(journal) = &self.options.journal else {
            return;
        };
        let _guard = self.journal_lock.lock().await;
        let snapshot = Journal {
            pending: self.state.lock().await.pending(),
        };
        if let Err(e) = journal.write_json(&snapshot).await {
            error!("Failed to write queue journal: {}", e);
        }
    }

    /// Add a job; returns its id
    pub async fn enqueue(&self, job: Job) -> Result<String, EngineError> {
        let envelope = JobEnvelope::encode(&job, self.options.max_attempts)?;
        let id = envelope.id.clone();

        self.state.lock().await.waiting.push_back(envelope);
        self.persist().await;
        self.notify.notify_one();

        debug!("Enqueued {} job {}", job.kind(), id);
        Ok(id)
    }

    /// Take the next runnable job, if any
    pub async fn next_ready(&self) -> Option<LeasedJob> {
        let leased = {
            let mut state = self.state.lock().await;
            state.promote_due(Utc::now());

            loop {
                let mut envelope = state.waiting.pop_front()?;
                match envelope.decode() {
                    Ok(job) => {
                        envelope.attempts += 1;
                        let leased = LeasedJob {
                            id: envelope.id.clone(),
                            attempt: envelope.attempts,
                            max_attempts: envelope.max_attempts,
                            job,
                        };
                        state.active.insert(envelope.id.clone(), envelope);
                        break leased;
                    }
                    Err(e) => {
                        error!("Dropping job: {}", e);
                        let finished = FinishedJob {
                            id: envelope.id,
                            kind: envelope.kind,
                            attempts: envelope.attempts,
                            finished_at: Utc::now(),
                            error: Some(e.to_string()),
                        };
                        push_bounded(&mut state.failed, finished, self.options.keep_failed);
                    }
                }
            }
        };

        self.persist().await;
        Some(leased)
    }

    /// Wait until a job may be ready or `max_wait` passes
    pub async fn wait_for_work(&self, max_wait: Duration) {
        let until_delayed = {
            let state = self.state.lock().await;
            if !state.waiting.is_empty() {
                return;
            }
            state
                .delayed
                .iter()
                .map(|j| j.run_at)
                .min()
                .map(|at| (at - Utc::now()).to_std().unwrap_or(Duration::ZERO))
        };

        let wait = until_delayed.map_or(max_wait, |d| d.min(max_wait));
        tokio::select! {
            _ = self.notify.notified() => {}
            _ = tokio::time::sleep(wait) => {}
        }
    }

    /// Mark an active job done
    pub async fn complete(&self, job_id: &str) {
        {
            let mut state = self.state.lock().await;
            if let Some(envelope) = state.active.remove(job_id) {
                let finished = FinishedJob {
                    id: envelope.id,
                    kind: envelope.kind,
                    attempts: envelope.attempts,
                    finished_at: Utc::now(),
                    error: None,
                };
                push_bounded(&mut state.completed, finished, self.options.keep_completed);
            }
        }
        self.persist().await;
    }

    /// Mark an active job failed, scheduling a retry when allowed
    pub async fn fail(&self, job_id: &str, error: &str, retryable: bool) -> FailOutcome {
        let outcome = {
            let mut state = self.state.lock().await;
            let Some(mut envelope) = state.active.remove(job_id) else {
                warn!("Failed job {} is not active", job_id);
                return FailOutcome::Failed;
            };
            envelope.last_error = Some(error.to_string());

            if retryable && envelope.attempts < envelope.max_attempts {
                let delay = calc_exp_backoff(&self.options.backoff, envelope.attempts - 1);
                envelope.run_at = Utc::now()
                    + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
                let attempt = envelope.attempts + 1;
                state.delayed.push(envelope);
                FailOutcome::Retrying { attempt, delay }
            } else {
                let finished = FinishedJob {
                    id: envelope.id,
                    kind: envelope.kind,
                    attempts: envelope.attempts,
                    finished_at: Utc::now(),
                    error: Some(error.to_string()),
                };
                push_bounded(&mut state.failed, finished, self.options.keep_failed);
                FailOutcome::Failed
            }
        };

        self.persist().await;
        if let FailOutcome::Retrying { attempt, delay } = &outcome {
            info!("Job {} retrying as attempt {} in {:?}", job_id, attempt, delay);
            self.notify.notify_one();
        }
        outcome
    }

    pub async fn stats(&self) -> QueueStats {
        let state = self.state.lock().await;
        QueueStats {
            waiting: state.waiting.len(),
            active: state.active.len(),
            delayed: state.delayed.len(),
            completed: state.completed.len(),
            failed: state.failed.len(),
        }
    }

    /// Most recent failures, newest last
    pub async fn failed_jobs(&self) -> Vec<FinishedJob> {
        self.state.lock().await.failed.iter().cloned().collect()
    }
}
