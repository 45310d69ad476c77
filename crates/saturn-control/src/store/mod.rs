//! Storage backends for rollout state.
//!
//! The supervisors see persistence only through the [`Store`] trait; the
//! in-memory implementation backs tests and single-node development runs.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;

use saturn_model::{InstallationGroup, Ring, RingRelease, Webhook, WebhookFilter};

use crate::error::ControlResult;

/// Backend for storing rings, installation groups, releases and webhooks.
///
/// Writes are last-writer-wins; the advisory locking discipline keeps two
/// workers from writing the same row concurrently. Updates never touch the
/// lock columns — those move only through the `lock_*`/`unlock_*`
/// operations. Every operation may fail with a transient error; callers
/// must not assume partial success for bulk writes.
#[async_trait]
pub trait Store: Send + Sync {
    /// Get all rings in a pending-work state. No ordering guarantee.
    async fn get_rings_pending_work(&self) -> ControlResult<Vec<Ring>>;

    /// Get a ring by ID.
    async fn get_ring(&self, id: &str) -> ControlResult<Ring>;

    /// Update an existing ring.
    async fn update_ring(&self, ring: &Ring) -> ControlResult<()>;

    /// Update a batch of rings.
    async fn update_rings(&self, rings: &[Ring]) -> ControlResult<()>;

    /// Attempt to acquire the advisory lock on a ring.
    ///
    /// Returns `true` iff the row moved from unlocked to locked by this
    /// caller. Returns `false`, without error, when another holder owns
    /// the lock.
    async fn lock_ring(&self, id: &str, holder: &str) -> ControlResult<bool>;

    /// Release the advisory lock on a ring.
    ///
    /// Clears the lock only if `holder` still owns it, unless `force` is
    /// set. Returns whether the lock was released.
    async fn unlock_ring(&self, id: &str, holder: &str, force: bool) -> ControlResult<bool>;

    /// Get all installation groups in a pending-work state. No ordering
    /// guarantee.
    async fn get_installation_groups_pending_work(&self)
        -> ControlResult<Vec<InstallationGroup>>;

    /// Get an installation group by ID.
    async fn get_installation_group(&self, id: &str) -> ControlResult<InstallationGroup>;

    /// Get the installation groups belonging to a ring, in membership
    /// order.
    async fn get_installation_groups_for_ring(
        &self,
        ring_id: &str,
    ) -> ControlResult<Vec<InstallationGroup>>;

    /// Get the ring an installation group belongs to.
    async fn get_ring_for_installation_group(
        &self,
        installation_group_id: &str,
    ) -> ControlResult<Ring>;

    /// Get all installation groups currently held under lock.
    async fn get_installation_groups_locked(&self) -> ControlResult<Vec<InstallationGroup>>;

    /// Get all installation groups whose release is actively underway
    /// (requested, in progress, or soaking).
    async fn get_installation_groups_release_in_progress(
        &self,
    ) -> ControlResult<Vec<InstallationGroup>>;

    /// Update an existing installation group.
    async fn update_installation_group(
        &self,
        installation_group: &InstallationGroup,
    ) -> ControlResult<()>;

    /// Update a batch of installation groups.
    async fn update_installation_groups(
        &self,
        installation_groups: &[InstallationGroup],
    ) -> ControlResult<()>;

    /// Attempt to acquire the advisory lock on an installation group.
    async fn lock_installation_group(&self, id: &str, holder: &str) -> ControlResult<bool>;

    /// Release the advisory lock on an installation group.
    async fn unlock_installation_group(
        &self,
        id: &str,
        holder: &str,
        force: bool,
    ) -> ControlResult<bool>;

    /// Get a ring release by ID.
    async fn get_ring_release(&self, id: &str) -> ControlResult<RingRelease>;

    /// Get webhooks matching the filter.
    async fn get_webhooks(&self, filter: &WebhookFilter) -> ControlResult<Vec<Webhook>>;
}
