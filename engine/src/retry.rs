//! Bounded polling shared by health verification and restart verification

use std::future::Future;
use std::time::Duration;

use tracing::trace;

use crate::errors::EngineError;

/// How many times to probe and how long to wait between probes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl PollPolicy {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            interval,
        }
    }

    /// Processor health verification: 30 probes, 2s apart
    pub fn health_verification() -> Self {
        Self::new(30, Duration::from_secs(2))
    }

    /// Health monitor check after a restart
    pub fn restart_verification() -> Self {
        Self::new(10, Duration::from_secs(2))
    }
}

/// Result of a bounded poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Ready { attempts: u32 },
    Exhausted { attempts: u32, last_error: Option<String> },
}

impl PollOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, PollOutcome::Ready { .. })
    }
}

/// Probe until it reports `true` or the policy runs out
///
/// Probe errors count as a failed attempt; the last one is kept for reporting.
pub async fn poll_until<F, Fut>(policy: &PollPolicy, mut probe: F) -> PollOutcome
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<bool, EngineError>>,
{
    let mut last_error = None;

    for attempt in 1..=policy.max_attempts {
        match probe(attempt).await {
            Ok(true) => return PollOutcome::Ready { attempts: attempt },
            Ok(false) => {
                trace!("Probe {}/{} not ready", attempt, policy.max_attempts);
            }
            Err(e) => {
                trace!("Probe {}/{} errored: {}", attempt, policy.max_attempts, e);
                last_error = Some(e.to_string());
            }
        }

        if attempt < policy.max_attempts && !policy.interval.is_zero() {
            tokio::time::sleep(policy.interval).await;
        }
    }

    PollOutcome::Exhausted {
        attempts: policy.max_attempts,
        last_error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_poll_ready_after_some_attempts() {
        let policy = PollPolicy::new(5, Duration::ZERO);
        let outcome = poll_until(&policy, |attempt| async move { Ok(attempt == 3) }).await;
        assert_eq!(outcome, PollOutcome::Ready { attempts: 3 });
    }

    #[tokio::test]
    async fn test_poll_exhausts_and_keeps_last_error() {
        let policy = PollPolicy::new(3, Duration::ZERO);
        let outcome = poll_until(&policy, |attempt| async move {
            if attempt == 2 {
                Err(EngineError::RuntimeError("daemon unavailable".to_string()))
            } else {
                Ok(false)
            }
        })
        .await;

        match outcome {
            PollOutcome::Exhausted { attempts, last_error } => {
                assert_eq!(attempts, 3);
                assert!(last_error.unwrap().contains("daemon unavailable"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_zero_attempts_still_probes_once() {
        let policy = PollPolicy::new(0, Duration::ZERO);
        assert_eq!(policy.max_attempts, 1);
        let outcome = poll_until(&policy, |_| async { Ok(true) }).await;
        assert!(outcome.is_ready());
    }
}
