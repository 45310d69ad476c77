//! Saturn control service binary.
//!
//! Runs the rollout control plane supervisors.

use tracing::info;
use tracing_subscriber::EnvFilter;

use saturn_control::{ControlConfig, ControlService};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("saturn_control=info".parse()?),
        )
        .init();

    info!("saturn control service starting");

    let config = ControlConfig::load().unwrap_or_else(|e| {
        info!(error = %e, "failed to load config, using defaults");
        ControlConfig::default()
    });

    let service = ControlService::new(config);
    service.run().await?;

    Ok(())
}
