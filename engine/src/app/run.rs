//! Main application run loop

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::app::options::{AppOptions, LifecycleOptions};
use crate::app::state::AppState;
use crate::errors::EngineError;
use crate::server::serve::serve;
use crate::server::state::ServerState;
use crate::storage::settings::InstallationSettings;
use crate::workers::{deployer, health};

/// Run the engine until the shutdown signal fires
pub async fn run(
    version: String,
    options: AppOptions,
    installations: Vec<InstallationSettings>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), EngineError> {
    info!("Initializing dockhand {}...", version);

    // Create shutdown channel
    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager = ShutdownManager::new(shutdown_tx.clone(), options.lifecycle.clone());

    if let Err(e) = init(&options, installations, shutdown_tx.clone(), &mut shutdown_manager).await {
        error!("Failed to start engine: {}", e);
        shutdown_manager.shutdown().await?;
        return Err(e);
    }

    info!("dockhand {} is running", version);
    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");

    drop(shutdown_tx);
    shutdown_manager.shutdown().await
}

// =============================== INITIALIZATION ================================== //

async fn init(
    options: &AppOptions,
    installations: Vec<InstallationSettings>,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<Arc<AppState>, EngineError> {
    let app_state = init_app_state(options, installations, shutdown_manager).await?;

    if options.enable_deployer {
        init_deployer_workers(
            options.deployer.clone(),
            app_state.clone(),
            shutdown_manager,
            &shutdown_tx,
        )?;
    }

    if options.enable_health_monitor {
        init_health_worker(
            options.health_worker.clone(),
            app_state.clone(),
            shutdown_manager,
            shutdown_tx.subscribe(),
        )?;
    }

    if options.enable_server {
        init_server(options, app_state.clone(), shutdown_manager, shutdown_tx.subscribe()).await?;
    }

    Ok(app_state)
}

async fn init_app_state(
    options: &AppOptions,
    installations: Vec<InstallationSettings>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<Arc<AppState>, EngineError> {
    let app_state = Arc::new(AppState::init(options, installations).await?);
    shutdown_manager.with_app_state(app_state.clone())?;
    Ok(app_state)
}

fn init_deployer_workers(
    options: deployer::Options,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    shutdown_tx: &broadcast::Sender<()>,
) -> Result<(), EngineError> {
    info!("Initializing {} deployer worker(s)...", options.concurrency);

    let deps = deployer::Deps {
        queue: app_state.queue.clone(),
        processor: app_state.processor.clone(),
        health: app_state.health.clone(),
    };

    for worker_id in 0..options.concurrency.max(1) {
        let options = options.clone();
        let deps = deps.clone();
        let mut shutdown_rx = shutdown_tx.subscribe();
        let handle = tokio::spawn(async move {
            deployer::run(
                &options,
                worker_id,
                deps,
                Box::pin(async move {
                    let _ = shutdown_rx.recv().await;
                }),
            )
            .await;
        });
        shutdown_manager.with_deployer_worker_handle(handle);
    }

    Ok(())
}

fn init_health_worker(
    options: health::Options,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), EngineError> {
    info!("Initializing health monitor worker...");

    let monitor = app_state.health.clone();
    let handle = tokio::spawn(async move {
        health::run(
            &options,
            monitor,
            tokio::time::sleep,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_health_worker_handle(handle)?;
    Ok(())
}

async fn init_server(
    options: &AppOptions,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), EngineError> {
    info!("Initializing HTTP server...");

    let state = Arc::new(ServerState::new(
        app_state.service.clone(),
        app_state.webhooks.clone(),
    ));

    let handle = serve(&options.server, state, async move {
        let _ = shutdown_rx.recv().await;
    })
    .await?;

    shutdown_manager.with_server_handle(handle)?;
    Ok(())
}

// ================================= SHUTDOWN ==================================== //

pub struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    lifecycle_options: LifecycleOptions,
    app_state: Option<Arc<AppState>>,
    deployer_worker_handles: Vec<JoinHandle<()>>,
    health_worker_handle: Option<JoinHandle<()>>,
    server_handle: Option<JoinHandle<Result<(), EngineError>>>,
}

impl ShutdownManager {
    pub fn new(shutdown_tx: broadcast::Sender<()>, lifecycle_options: LifecycleOptions) -> Self {
        Self {
            shutdown_tx,
            lifecycle_options,
            app_state: None,
            deployer_worker_handles: Vec::new(),
            health_worker_handle: None,
            server_handle: None,
        }
    }

    pub fn with_app_state(&mut self, state: Arc<AppState>) -> Result<(), EngineError> {
        if self.app_state.is_some() {
            return Err(EngineError::ShutdownError("app_state already set".to_string()));
        }
        self.app_state = Some(state);
        Ok(())
    }

    pub fn with_deployer_worker_handle(&mut self, handle: JoinHandle<()>) {
        self.deployer_worker_handles.push(handle);
    }

    pub fn with_health_worker_handle(&mut self, handle: JoinHandle<()>) -> Result<(), EngineError> {
        if self.health_worker_handle.is_some() {
            return Err(EngineError::ShutdownError("health_handle already set".to_string()));
        }
        self.health_worker_handle = Some(handle);
        Ok(())
    }

    pub fn with_server_handle(
        &mut self,
        handle: JoinHandle<Result<(), EngineError>>,
    ) -> Result<(), EngineError> {
        if self.server_handle.is_some() {
            return Err(EngineError::ShutdownError("server_handle already set".to_string()));
        }
        self.server_handle = Some(handle);
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), EngineError> {
        let _ = self.shutdown_tx.send(());

        match tokio::time::timeout(
            self.lifecycle_options.max_shutdown_delay,
            self.shutdown_impl(),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                error!(
                    "Shutdown timed out after {:?}, forcing shutdown...",
                    self.lifecycle_options.max_shutdown_delay
                );
                std::process::exit(1);
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), EngineError> {
        info!("Shutting down dockhand...");

        // 1. Deployer workers finish their current job
        for handle in self.deployer_worker_handles.drain(..) {
            handle.await.map_err(|e| EngineError::ShutdownError(e.to_string()))?;
        }

        // 2. Health monitor
        if let Some(handle) = self.health_worker_handle.take() {
            handle.await.map_err(|e| EngineError::ShutdownError(e.to_string()))?;
        }

        // 3. HTTP server
        if let Some(handle) = self.server_handle.take() {
            handle.await.map_err(|e| EngineError::ShutdownError(e.to_string()))??;
        }

        // 4. App state
        if let Some(app_state) = self.app_state.take() {
            app_state.shutdown().await?;
        }

        info!("Shutdown complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::storage::layout::StorageLayout;

    #[tokio::test]
    async fn test_run_until_signal_then_shutdown_in_order() {
        let tmp = tempfile::tempdir().unwrap();
        let mut options = AppOptions::default();
        options.storage.layout = StorageLayout::new(tmp.path());
        options.enable_server = false;
        options.deployer.idle_wait = Duration::from_millis(10);

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(run("test".to_string(), options, Vec::new(), async move {
            let _ = rx.await;
        }));

        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(()).unwrap();

        handle.await.unwrap().unwrap();
        assert!(StorageLayout::new(tmp.path()).state_file().exists().await);
    }

    #[tokio::test]
    async fn test_handles_cannot_be_set_twice() {
        let (tx, _rx) = broadcast::channel(1);
        let mut manager = ShutdownManager::new(tx, LifecycleOptions::default());
        manager.with_health_worker_handle(tokio::spawn(async {})).unwrap();
        assert!(manager
            .with_health_worker_handle(tokio::spawn(async {}))
            .is_err());
        manager.shutdown().await.unwrap();
    }
}
