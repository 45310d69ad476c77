//! Service lifecycle management.
//!
//! Provides the main service runner with signal handling and graceful
//! shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::ControlConfig;
use crate::error::ControlResult;
use crate::provisioner::create_provisioner;
use crate::store::{MemoryStore, Store};
use crate::supervisor::{
    InstallationGroupSupervisor, RingSupervisor, Supervisor, SupervisorScheduler,
};
use crate::webhook::WebhookEmitter;

/// The rollout control service.
///
/// Wires the store, provisioner and webhook emitter into the two
/// supervisors, runs them on the scheduler, and handles signals and
/// graceful shutdown.
pub struct ControlService {
    config: ControlConfig,
    cancel: CancellationToken,
}

impl ControlService {
    /// Create a new control service with the given configuration.
    #[must_use]
    pub fn new(config: ControlConfig) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Run the control service until a shutdown signal arrives.
    pub async fn run(&self) -> ControlResult<()> {
        let instance_id = ulid::Ulid::new().to_string().to_lowercase();
        info!(instance_id = %instance_id, "control service starting");

        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let provisioner = create_provisioner(&self.config.provisioner);
        info!(
            provisioner_type = ?self.config.provisioner.provisioner_type,
            "provisioner configured"
        );

        let webhooks = WebhookEmitter::new(Duration::from_secs(self.config.webhook.timeout_secs))?;
        let work_permits = Arc::new(Semaphore::new(self.config.supervisor.max_concurrent));

        let ring_supervisor = Arc::new(RingSupervisor::new(
            Arc::clone(&store),
            Arc::clone(&provisioner),
            webhooks.clone(),
            instance_id.clone(),
            Arc::clone(&work_permits),
        ));
        let installation_group_supervisor = Arc::new(InstallationGroupSupervisor::new(
            Arc::clone(&store),
            provisioner,
            webhooks,
            instance_id,
            work_permits,
        ));

        let scheduler = SupervisorScheduler::new(
            vec![
                ring_supervisor as Arc<dyn Supervisor>,
                installation_group_supervisor as Arc<dyn Supervisor>,
            ],
            Duration::from_secs(self.config.supervisor.tick_interval_secs),
            self.cancel.clone(),
        );

        info!(
            tick_interval_secs = self.config.supervisor.tick_interval_secs,
            max_concurrent = self.config.supervisor.max_concurrent,
            "rollout supervisors running"
        );

        let scheduler_handle = tokio::spawn(scheduler.run());

        shutdown_signal(self.cancel.clone()).await;
        self.cancel.cancel();

        if let Err(error) = scheduler_handle.await {
            error!(error = %error, "scheduler task failed");
        }

        info!("control service shutdown complete");
        Ok(())
    }

    /// Request graceful shutdown.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            info!("received SIGTERM, initiating shutdown");
        }
        () = cancel.cancelled() => {
            info!("shutdown requested");
        }
    }
}
