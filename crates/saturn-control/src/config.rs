//! Configuration for saturn-control.

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;

use crate::error::{ControlError, ControlResult};

/// Top-level configuration for the control service.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ControlConfig {
    /// Supervisor scheduling configuration.
    #[serde(default)]
    pub supervisor: SupervisorConfig,

    /// Webhook delivery configuration.
    #[serde(default)]
    pub webhook: WebhookConfig,

    /// Provisioner configuration.
    #[serde(default)]
    pub provisioner: ProvisionerConfig,
}

impl ControlConfig {
    /// Load configuration from the default sources.
    ///
    /// Configuration is loaded in the following order (later sources override earlier):
    /// 1. Default values
    /// 2. `saturn.toml` in the current directory (if present)
    /// 3. Environment variables with `SATURN_CONTROL_` prefix
    pub fn load() -> ControlResult<Self> {
        Figment::new()
            .merge(Toml::file("saturn.toml"))
            .merge(Env::prefixed("SATURN_CONTROL_").split("__"))
            .extract()
            .map_err(|e| ControlError::Config(e.to_string()))
    }

    /// Load configuration from a specific TOML file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> ControlResult<Self> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("SATURN_CONTROL_").split("__"))
            .extract()
            .map_err(|e| ControlError::Config(e.to_string()))
    }
}

/// Supervisor scheduling configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SupervisorConfig {
    /// Seconds between supervisor ticks.
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,

    /// Maximum simultaneous supervise invocations across all supervisors.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

const fn default_tick_interval_secs() -> u64 {
    60
}

fn default_max_concurrent() -> usize {
    std::thread::available_parallelism().map_or(2, |n| n.get() * 2)
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval_secs(),
            max_concurrent: default_max_concurrent(),
        }
    }
}

/// Webhook delivery configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    /// Per-delivery request timeout in seconds.
    #[serde(default = "default_webhook_timeout_secs")]
    pub timeout_secs: u64,
}

const fn default_webhook_timeout_secs() -> u64 {
    5
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_webhook_timeout_secs(),
        }
    }
}

/// Provisioner configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ProvisionerConfig {
    /// Type of provisioner to use.
    #[serde(default)]
    pub provisioner_type: ProvisionerType,
}

/// Type of provisioner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionerType {
    /// Mock provisioner, records calls and performs no side effects.
    #[default]
    Mock,
}
