//! Ring supervisor.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use saturn_model::{
    now_nanos, EntityType, InstallationGroupState, Ring, RingState, WebhookPayload,
};

use crate::error::ControlResult;
use crate::lock::Lock;
use crate::provisioner::Provisioner;
use crate::store::Store;
use crate::supervisor::Supervisor;
use crate::webhook::WebhookEmitter;

const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// Finds rings pending work and effects the required changes.
///
/// Releasing a ring fans out to its installation groups: entering
/// `release-in-progress` marks every member group `release-pending` in one
/// bulk write, after which the installation group supervisor walks them
/// one at a time. The ring then watches its children, soaks once they are
/// all stable, and activates the desired release.
pub struct RingSupervisor {
    store: Arc<dyn Store>,
    provisioner: Arc<dyn Provisioner>,
    webhooks: WebhookEmitter,
    instance_id: String,
    work_permits: Arc<Semaphore>,
}

impl RingSupervisor {
    /// Create a new ring supervisor.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        provisioner: Arc<dyn Provisioner>,
        webhooks: WebhookEmitter,
        instance_id: impl Into<String>,
        work_permits: Arc<Semaphore>,
    ) -> Self {
        Self {
            store,
            provisioner,
            webhooks,
            instance_id: instance_id.into(),
            work_permits,
        }
    }

    /// Schedule the required work on the given ring.
    pub async fn supervise(&self, ring: &Ring) {
        let lock = Lock::ring(&ring.id, &self.instance_id, Arc::clone(&self.store));
        if !lock.try_lock().await {
            return;
        }

        self.supervise_locked(ring).await;
        lock.unlock(false).await;
    }

    async fn supervise_locked(&self, snapshot: &Ring) {
        let original_state = snapshot.state;
        let ring = match self.store.get_ring(&snapshot.id).await {
            Ok(ring) => ring,
            Err(error) => {
                error!(ring_id = %snapshot.id, error = %error, "failed to get refreshed ring");
                return;
            }
        };
        if ring.state != original_state {
            warn!(
                ring_id = %ring.id,
                old_state = %original_state,
                new_state = %ring.state,
                "another worker has advanced this ring, skipping"
            );
            return;
        }

        debug!(ring_id = %ring.id, state = %ring.state, "supervising ring");

        let new_state = self.transition(&ring).await;

        let mut ring = match self.store.get_ring(&snapshot.id).await {
            Ok(ring) => ring,
            Err(error) => {
                warn!(
                    ring_id = %snapshot.id,
                    error = %error,
                    "failed to get ring, cannot persist state {new_state}"
                );
                return;
            }
        };

        if ring.state == new_state {
            return;
        }

        let old_state = ring.state;
        ring.state = new_state;
        match (old_state, new_state) {
            // The ring soak clock starts when the last group stabilises.
            (RingState::ReleaseInProgress, RingState::SoakingRequested) => {
                ring.release_at = now_nanos();
            }
            (RingState::ReleaseComplete, RingState::Stable) => {
                ring.active_release_id = ring.desired_release_id.clone();
            }
            (_, RingState::Deleted) => {
                ring.delete_at = now_nanos();
            }
            _ => {}
        }

        if let Err(error) = self.store.update_ring(&ring).await {
            warn!(
                ring_id = %ring.id,
                error = %error,
                "failed to set ring state to {new_state}"
            );
            return;
        }

        let payload =
            WebhookPayload::new(EntityType::Ring, &ring.id, new_state.as_str(), old_state.as_str());
        self.webhooks.send_to_all(self.store.as_ref(), &payload).await;

        debug!(
            ring_id = %ring.id,
            old_state = %old_state,
            new_state = %new_state,
            "transitioned ring"
        );
    }

    /// Compute the next state for the given ring.
    async fn transition(&self, ring: &Ring) -> RingState {
        match ring.state {
            RingState::CreationRequested => self.create(ring).await,
            RingState::ReleaseRequested => self.begin_release(ring).await,
            RingState::ReleaseInProgress => self.check_release_progress(ring).await,
            RingState::SoakingRequested => self.soak(ring),
            RingState::ReleaseComplete => RingState::Stable,
            RingState::ReleaseRollbackRequested => self.rollback(ring).await,
            RingState::DeletionRequested => self.delete(ring).await,
            state => {
                warn!(ring_id = %ring.id, state = %state, "ring pending work in unexpected state");
                state
            }
        }
    }

    async fn create(&self, ring: &Ring) -> RingState {
        if let Err(error) = self.provisioner.create_ring(ring).await {
            error!(ring_id = %ring.id, error = %error, "failed to create ring");
            return RingState::CreationFailed;
        }
        info!(ring_id = %ring.id, name = %ring.name, "finished creating ring");
        RingState::Stable
    }

    /// Queue every member installation group and move the ring into
    /// release-in-progress.
    async fn begin_release(&self, ring: &Ring) -> RingState {
        let mut installation_groups =
            match self.store.get_installation_groups_for_ring(&ring.id).await {
                Ok(groups) => groups,
                Err(error) => {
                    error!(
                        ring_id = %ring.id,
                        error = %error,
                        "failed to get the installation groups of the ring"
                    );
                    return RingState::ReleaseFailed;
                }
            };

        if installation_groups.is_empty() {
            warn!(ring_id = %ring.id, "ring has no installation groups, cannot release");
            return RingState::ReleaseFailed;
        }

        for installation_group in &mut installation_groups {
            installation_group.state = InstallationGroupState::ReleasePending;
        }
        if let Err(error) = self
            .store
            .update_installation_groups(&installation_groups)
            .await
        {
            error!(
                ring_id = %ring.id,
                error = %error,
                "failed to queue installation groups for release"
            );
            return RingState::ReleaseFailed;
        }

        info!(
            ring_id = %ring.id,
            installation_groups = installation_groups.len(),
            "started ring release"
        );
        RingState::ReleaseInProgress
    }

    /// Watch the member installation groups until they all stabilise or
    /// one of them fails.
    async fn check_release_progress(&self, ring: &Ring) -> RingState {
        let installation_groups =
            match self.store.get_installation_groups_for_ring(&ring.id).await {
                Ok(groups) => groups,
                Err(error) => {
                    error!(
                        ring_id = %ring.id,
                        error = %error,
                        "failed to get the installation groups of the ring"
                    );
                    return RingState::ReleaseFailed;
                }
            };

        if installation_groups.iter().any(|group| {
            matches!(
                group.state,
                InstallationGroupState::ReleaseFailed | InstallationGroupState::SoakingFailed
            )
        }) {
            info!(ring_id = %ring.id, "an installation group release failed, failing the ring");
            return RingState::ReleaseFailed;
        }

        if installation_groups
            .iter()
            .all(|group| group.state == InstallationGroupState::Stable)
        {
            info!(ring_id = %ring.id, "all installation groups stable, ring entering soak");
            return RingState::SoakingRequested;
        }

        RingState::ReleaseInProgress
    }

    fn soak(&self, ring: &Ring) -> RingState {
        let elapsed = (now_nanos() - ring.release_at) / NANOS_PER_SECOND;
        if elapsed < ring.soak_time {
            info!(
                ring_id = %ring.id,
                remaining = ring.soak_time - elapsed,
                "ring still soaking"
            );
            return RingState::SoakingRequested;
        }

        info!(ring_id = %ring.id, "finished soaking ring");
        RingState::ReleaseComplete
    }

    async fn rollback(&self, ring: &Ring) -> RingState {
        if let Err(error) = self.provisioner.rollback_ring(ring).await {
            error!(ring_id = %ring.id, error = %error, "failed to roll back ring");
            return RingState::ReleaseRollbackFailed;
        }
        info!(ring_id = %ring.id, "finished rolling back ring");
        RingState::ReleaseRollbackComplete
    }

    async fn delete(&self, ring: &Ring) -> RingState {
        if let Err(error) = self.provisioner.delete_ring(ring).await {
            error!(ring_id = %ring.id, error = %error, "failed to delete ring");
            return RingState::DeletionFailed;
        }
        info!(ring_id = %ring.id, "finished deleting ring");
        RingState::Deleted
    }
}

#[async_trait]
impl Supervisor for RingSupervisor {
    fn name(&self) -> &'static str {
        "ring"
    }

    async fn do_work(&self) -> ControlResult<()> {
        let mut rings = match self.store.get_rings_pending_work().await {
            Ok(rings) => rings,
            Err(error) => {
                warn!(error = %error, "failed to query for rings pending work");
                return Ok(());
            }
        };
        // Earlier stages release first; discovery order is arbitrary.
        rings.sort_by_key(|ring| (ring.priority, ring.create_at));

        for ring in &rings {
            let Ok(_permit) = self.work_permits.acquire().await else {
                return Ok(());
            };
            self.supervise(ring).await;
        }

        Ok(())
    }

    fn shutdown(&self) {
        debug!("shutting down ring supervisor");
    }
}

impl std::fmt::Debug for RingSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingSupervisor")
            .field("instance_id", &self.instance_id)
            .finish_non_exhaustive()
    }
}
