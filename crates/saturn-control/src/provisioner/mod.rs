//! Provisioner capability.
//!
//! The provisioner performs the actual deployment side effects: releasing
//! an installation group, marking it soaked, and the ring-level lifecycle
//! operations. The back-end is external to the control plane; this module
//! defines the capability trait and a mock used by tests and development
//! runs.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use saturn_model::{InstallationGroup, Ring};

use crate::config::{ProvisionerConfig, ProvisionerType};
use crate::error::{ControlError, ControlResult};

/// External side-effect capability for rollouts.
///
/// All operations must be idempotent: the supervisor may repeat a call
/// after a crash between the side effect and the state write, and a
/// repeated call with the same arguments must converge on the same
/// terminal state.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Create the backing resources for a ring.
    async fn create_ring(&self, ring: &Ring) -> ControlResult<()>;

    /// Release the given image and version to an installation group.
    async fn release_installation_group(
        &self,
        installation_group: &InstallationGroup,
        image: &str,
        version: &str,
    ) -> ControlResult<()>;

    /// Mark an installation group's soak period as passed.
    async fn soak_installation_group(
        &self,
        installation_group: &InstallationGroup,
    ) -> ControlResult<()>;

    /// Roll a ring back to its previously active release.
    async fn rollback_ring(&self, ring: &Ring) -> ControlResult<()>;

    /// Tear down the backing resources for a ring.
    async fn delete_ring(&self, ring: &Ring) -> ControlResult<()>;
}

/// Create a provisioner from configuration.
#[must_use]
pub fn create_provisioner(config: &ProvisionerConfig) -> Arc<dyn Provisioner> {
    match config.provisioner_type {
        ProvisionerType::Mock => Arc::new(MockProvisioner::default()),
    }
}

/// Mock provisioner.
///
/// Records every invocation as `"operation:entity-id"` and can be told to
/// fail specific operations.
#[derive(Debug, Default)]
pub struct MockProvisioner {
    calls: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
}

impl MockProvisioner {
    /// Operation name for [`Provisioner::create_ring`].
    pub const CREATE_RING: &'static str = "create-ring";
    /// Operation name for [`Provisioner::release_installation_group`].
    pub const RELEASE_INSTALLATION_GROUP: &'static str = "release-installation-group";
    /// Operation name for [`Provisioner::soak_installation_group`].
    pub const SOAK_INSTALLATION_GROUP: &'static str = "soak-installation-group";
    /// Operation name for [`Provisioner::rollback_ring`].
    pub const ROLLBACK_RING: &'static str = "rollback-ring";
    /// Operation name for [`Provisioner::delete_ring`].
    pub const DELETE_RING: &'static str = "delete-ring";

    /// Create a new mock provisioner where every operation succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the named operation fail until [`Self::succeed_on`] is called.
    pub fn fail_on(&self, operation: &str) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(operation.to_owned());
        }
    }

    /// Make the named operation succeed again.
    pub fn succeed_on(&self, operation: &str) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.remove(operation);
        }
    }

    /// Every recorded invocation, oldest first.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    fn invoke(&self, operation: &str, entity_id: &str) -> ControlResult<()> {
        let mut calls = self
            .calls
            .lock()
            .map_err(|_| ControlError::internal("lock poisoned"))?;
        calls.push(format!("{operation}:{entity_id}"));
        drop(calls);

        let failing = self
            .failing
            .lock()
            .map_err(|_| ControlError::internal("lock poisoned"))?;
        if failing.contains(operation) {
            return Err(ControlError::provisioning(format!(
                "{operation} failed for {entity_id}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Provisioner for MockProvisioner {
    async fn create_ring(&self, ring: &Ring) -> ControlResult<()> {
        self.invoke(Self::CREATE_RING, &ring.id)
    }

    async fn release_installation_group(
        &self,
        installation_group: &InstallationGroup,
        _image: &str,
        _version: &str,
    ) -> ControlResult<()> {
        self.invoke(Self::RELEASE_INSTALLATION_GROUP, &installation_group.id)
    }

    async fn soak_installation_group(
        &self,
        installation_group: &InstallationGroup,
    ) -> ControlResult<()> {
        self.invoke(Self::SOAK_INSTALLATION_GROUP, &installation_group.id)
    }

    async fn rollback_ring(&self, ring: &Ring) -> ControlResult<()> {
        self.invoke(Self::ROLLBACK_RING, &ring.id)
    }

    async fn delete_ring(&self, ring: &Ring) -> ControlResult<()> {
        self.invoke(Self::DELETE_RING, &ring.id)
    }
}
