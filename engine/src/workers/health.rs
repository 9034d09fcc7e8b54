//! Periodic health reconciliation

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::health::monitor::HealthMonitor;

/// Health worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Time between passes
    pub interval: Duration,

    /// Delay before the first pass
    pub initial_delay: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            initial_delay: Duration::from_secs(5),
        }
    }
}

/// Run the health monitor timer
pub async fn run<S, F>(
    options: &Options,
    monitor: Arc<HealthMonitor>,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Health worker starting...");
    monitor.set_active(true);

    tokio::select! {
        _ = &mut shutdown_signal => {
            info!("Health worker shutting down...");
            monitor.set_active(false);
            return;
        }
        _ = sleep_fn(options.initial_delay) => {}
    }

    loop {
        let stats = monitor.run_pass().await;
        debug!(
            "Health pass done: {} restarted, {} errors so far",
            stats.restarted_containers, stats.errors
        );

        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Health worker shutting down...");
                monitor.set_active(false);
                return;
            }
            _ = sleep_fn(options.interval) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Harness;

    #[tokio::test]
    async fn test_timer_runs_passes_until_shutdown() {
        let h = Harness::new().await;
        let monitor = h.health.clone();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let worker = tokio::spawn({
            let monitor = monitor.clone();
            async move {
                let options = Options {
                    interval: Duration::from_millis(5),
                    initial_delay: Duration::ZERO,
                };
                run(&options, monitor, tokio::time::sleep, Box::pin(async move {
                    let _ = rx.await;
                }))
                .await;
            }
        });

        for _ in 0..200 {
            if monitor.get_stats().last_check_at.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(monitor.is_active());
        assert!(monitor.get_stats().last_check_at.is_some());

        tx.send(()).unwrap();
        worker.await.unwrap();
        assert!(!monitor.is_active());
    }
}
