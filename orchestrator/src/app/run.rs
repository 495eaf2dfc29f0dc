//! Main application run loop

use std::future::Future;
use std::sync::Arc;

use rumqttc::EventLoop;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::app::options::{AppOptions, LifecycleOptions, MqttOptions};
use crate::app::state::AppState;
use crate::errors::StackError;
use crate::events::mqtt;
use crate::server::serve::serve;
use crate::server::state::ServerState;
use crate::workers::health_monitor;

/// Run the orchestrator service
pub async fn run(
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), StackError> {
    info!("Initializing stackpilot...");

    // Create shutdown channel
    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager =
        ShutdownManager::new(shutdown_tx.clone(), options.lifecycle.clone());

    if let Err(e) = init(&options, shutdown_tx.clone(), &mut shutdown_manager).await {
        error!("Failed to start stackpilot: {}", e);
        shutdown_manager.shutdown().await?;
        return Err(e);
    }

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");

    drop(shutdown_tx);
    shutdown_manager.shutdown().await
}

// =============================== INITIALIZATION ================================== //

async fn init(
    options: &AppOptions,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<(), StackError> {
    options.storage.layout.setup().await?;

    let (app_state, eventloop) = AppState::init(options).await?;
    let app_state = Arc::new(app_state);
    shutdown_manager.with_app_state(app_state.clone())?;

    if let (Some(eventloop), Some(mqtt_options)) = (eventloop, &options.mqtt) {
        init_mqtt_event_loop(
            eventloop,
            mqtt_options,
            shutdown_manager,
            shutdown_tx.subscribe(),
        )?;
    }

    if options.enable_health_monitor {
        init_health_monitor(
            options.health_monitor.clone(),
            app_state.clone(),
            shutdown_manager,
            shutdown_tx.subscribe(),
        )?;
    }

    init_server(options, app_state, shutdown_tx.clone(), shutdown_manager).await?;
    Ok(())
}

fn init_mqtt_event_loop(
    eventloop: EventLoop,
    options: &MqttOptions,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), StackError> {
    info!("Initializing MQTT event loop...");

    let reconnect_delay = options.reconnect_delay;
    let handle = tokio::spawn(async move {
        mqtt::run_event_loop(
            eventloop,
            reconnect_delay,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_mqtt_handle(handle)
}

fn init_health_monitor(
    options: health_monitor::Options,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), StackError> {
    info!("Initializing health monitor...");

    let orchestrator = app_state.orchestrator.clone();
    let handle = tokio::spawn(async move {
        health_monitor::run(
            &options,
            orchestrator.as_ref(),
            tokio::time::sleep,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_health_monitor_handle(handle)
}

async fn init_server(
    options: &AppOptions,
    app_state: Arc<AppState>,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<(), StackError> {
    info!("Initializing HTTP server...");

    let mut shutdown_rx = shutdown_tx.subscribe();
    let server_state = ServerState::new(
        app_state.orchestrator.clone(),
        app_state.events.clone(),
        app_state.active_runs.clone(),
        shutdown_tx,
    );

    let handle = serve(&options.server, Arc::new(server_state), async move {
        let _ = shutdown_rx.recv().await;
    })
    .await?;

    shutdown_manager.with_server_handle(handle)
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    lifecycle_options: LifecycleOptions,
    app_state: Option<Arc<AppState>>,
    server_handle: Option<JoinHandle<Result<(), StackError>>>,
    health_monitor_handle: Option<JoinHandle<()>>,
    mqtt_handle: Option<JoinHandle<()>>,
}

impl ShutdownManager {
    pub fn new(shutdown_tx: broadcast::Sender<()>, lifecycle_options: LifecycleOptions) -> Self {
        Self {
            shutdown_tx,
            lifecycle_options,
            app_state: None,
            server_handle: None,
            health_monitor_handle: None,
            mqtt_handle: None,
        }
    }

    pub fn with_app_state(&mut self, state: Arc<AppState>) -> Result<(), StackError> {
        if self.app_state.is_some() {
            return Err(StackError::ShutdownError("app_state already set".to_string()));
        }
        self.app_state = Some(state);
        Ok(())
    }

    pub fn with_server_handle(
        &mut self,
        handle: JoinHandle<Result<(), StackError>>,
    ) -> Result<(), StackError> {
        if self.server_handle.is_some() {
            return Err(StackError::ShutdownError("server_handle already set".to_string()));
        }
        self.server_handle = Some(handle);
        Ok(())
    }

    pub fn with_health_monitor_handle(&mut self, handle: JoinHandle<()>) -> Result<(), StackError> {
        if self.health_monitor_handle.is_some() {
            return Err(StackError::ShutdownError(
                "health_monitor_handle already set".to_string(),
            ));
        }
        self.health_monitor_handle = Some(handle);
        Ok(())
    }

    pub fn with_mqtt_handle(&mut self, handle: JoinHandle<()>) -> Result<(), StackError> {
        if self.mqtt_handle.is_some() {
            return Err(StackError::ShutdownError("mqtt_handle already set".to_string()));
        }
        self.mqtt_handle = Some(handle);
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), StackError> {
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

    async fn shutdown_impl(&mut self) -> Result<(), StackError> {
        info!("Shutting down stackpilot...");

        // 1. Server, no new runs after this
        if let Some(handle) = self.server_handle.take() {
            handle
                .await
                .map_err(|e| StackError::ShutdownError(e.to_string()))??;
        }

        // 2. In-flight runs observe the shutdown signal and mark themselves failed
        if let Some(app_state) = &self.app_state {
            let pending = app_state.active_runs.len();
            if pending > 0 {
                info!("Waiting for {} in-flight runs to wind down...", pending);
            }
            app_state.active_runs.wait_idle().await;
        }

        // 3. Health monitor
        if let Some(handle) = self.health_monitor_handle.take() {
            handle
                .await
                .map_err(|e| StackError::ShutdownError(e.to_string()))?;
        }

        // 4. App state
        if let Some(app_state) = self.app_state.take() {
            app_state.shutdown().await?;
        }

        // 5. MQTT event loop
        if let Some(handle) = self.mqtt_handle.take() {
            if let Err(e) = handle.await {
                warn!("MQTT event loop ended abnormally: {}", e);
            }
        }

        info!("Shutdown complete");
        Ok(())
    }
}
