//! Installation group supervisor.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use saturn_model::{
    now_nanos, EntityType, InstallationGroup, InstallationGroupState, RingState, WebhookPayload,
};

use crate::error::ControlResult;
use crate::lock::Lock;
use crate::provisioner::Provisioner;
use crate::store::Store;
use crate::supervisor::Supervisor;
use crate::webhook::WebhookEmitter;

const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// Finds installation groups pending work and effects the required
/// changes.
///
/// Releases are strictly sequential: at most one installation group
/// across the whole system may be mid-release at any moment. The
/// supervisor enforces this without a global lock by checking, after
/// taking its own group's lock, that no other group is locked and no
/// other group has a release underway. Two groups locked simultaneously
/// both back off and are retried on the next tick; fairness between them
/// is left to discovery order.
pub struct InstallationGroupSupervisor {
    store: Arc<dyn Store>,
    provisioner: Arc<dyn Provisioner>,
    webhooks: WebhookEmitter,
    instance_id: String,
    work_permits: Arc<Semaphore>,
}

impl InstallationGroupSupervisor {
    /// Create a new installation group supervisor.
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

    /// Schedule the required work on the given installation group.
    ///
    /// The `installation_group` argument is the discovery-time snapshot;
    /// the group is re-read after its lock is acquired and the work is
    /// abandoned if another worker advanced it in between.
    pub async fn supervise(&self, installation_group: &InstallationGroup) {
        let lock = Lock::installation_group(
            &installation_group.id,
            &self.instance_id,
            Arc::clone(&self.store),
        );
        if !lock.try_lock().await {
            return;
        }

        self.supervise_locked(installation_group).await;
        lock.unlock(false).await;
    }

    async fn supervise_locked(&self, snapshot: &InstallationGroup) {
        let original_state = snapshot.state;
        let installation_group = match self.store.get_installation_group(&snapshot.id).await {
            Ok(group) => group,
            Err(error) => {
                error!(
                    installation_group_id = %snapshot.id,
                    error = %error,
                    "failed to get refreshed installation group"
                );
                return;
            }
        };
        if installation_group.state != original_state {
            warn!(
                installation_group_id = %installation_group.id,
                old_state = %original_state,
                new_state = %installation_group.state,
                "another worker has advanced this installation group, skipping"
            );
            return;
        }

        debug!(
            installation_group_id = %installation_group.id,
            state = %installation_group.state,
            "supervising installation group"
        );

        let new_state = self.transition(&installation_group).await;

        let mut installation_group = match self.store.get_installation_group(&snapshot.id).await {
            Ok(group) => group,
            Err(error) => {
                warn!(
                    installation_group_id = %snapshot.id,
                    error = %error,
                    "failed to get installation group, cannot persist state {new_state}"
                );
                return;
            }
        };

        if installation_group.state == new_state {
            return;
        }

        let old_state = installation_group.state;
        installation_group.state = new_state;
        if old_state == InstallationGroupState::ReleaseRequested
            && matches!(
                new_state,
                InstallationGroupState::SoakingRequested | InstallationGroupState::Stable
            )
        {
            installation_group.release_at = now_nanos();
        }

        if let Err(error) = self.store.update_installation_group(&installation_group).await {
            warn!(
                installation_group_id = %installation_group.id,
                error = %error,
                "failed to set installation group state to {new_state}"
            );
            return;
        }

        // A failed group release aborts every in-flight ring on the next
        // tick.
        if matches!(
            new_state,
            InstallationGroupState::ReleaseFailed | InstallationGroupState::SoakingFailed
        ) {
            info!(
                installation_group_id = %installation_group.id,
                "installation group release has failed, moving pending rings to failed state"
            );
            if !self.fail_pending_rings().await {
                return;
            }
        }

        let payload = WebhookPayload::new(
            EntityType::InstallationGroup,
            &installation_group.id,
            new_state.as_str(),
            old_state.as_str(),
        );
        self.webhooks.send_to_all(self.store.as_ref(), &payload).await;

        debug!(
            installation_group_id = %installation_group.id,
            old_state = %old_state,
            new_state = %new_state,
            "transitioned installation group"
        );
    }

    /// Bulk-move every ring currently pending work to release-failed.
    async fn fail_pending_rings(&self) -> bool {
        let mut rings = match self.store.get_rings_pending_work().await {
            Ok(rings) => rings,
            Err(error) => {
                error!(error = %error, "failed to get rings pending work");
                return false;
            }
        };
        for ring in &mut rings {
            ring.state = RingState::ReleaseFailed;
        }

        if let Err(error) = self.store.update_rings(&rings).await {
            error!(error = %error, "failed to move rings to failed state");
            return false;
        }
        true
    }

    /// Compute the next state for the given installation group.
    async fn transition(&self, installation_group: &InstallationGroup) -> InstallationGroupState {
        match installation_group.state {
            InstallationGroupState::ReleasePending => {
                self.check_release_pending(installation_group).await
            }
            InstallationGroupState::ReleaseRequested => self.release(installation_group).await,
            InstallationGroupState::SoakingRequested => self.soak(installation_group).await,
            state => {
                warn!(
                    installation_group_id = %installation_group.id,
                    state = %state,
                    "installation group pending work in unexpected state"
                );
                state
            }
        }
    }

    /// Decide whether a pending group may start its release.
    ///
    /// The group's own lock is already held, so the locked set returned
    /// by the store contains at least this group; any second entry means
    /// another worker is mid-flight and we back off.
    async fn check_release_pending(
        &self,
        installation_group: &InstallationGroup,
    ) -> InstallationGroupState {
        let ring = match self
            .store
            .get_ring_for_installation_group(&installation_group.id)
            .await
        {
            Ok(ring) => ring,
            Err(error) => {
                error!(
                    installation_group_id = %installation_group.id,
                    error = %error,
                    "failed to query for the ring of the installation group"
                );
                return InstallationGroupState::ReleaseFailed;
            }
        };

        if ring.state == RingState::ReleaseFailed {
            return InstallationGroupState::ReleaseFailed;
        }

        if !matches!(
            ring.state,
            RingState::ReleaseRequested | RingState::ReleaseInProgress
        ) {
            return InstallationGroupState::ReleasePending;
        }

        let locked = match self.store.get_installation_groups_locked().await {
            Ok(groups) => groups,
            Err(error) => {
                error!(error = %error, "failed to query for locked installation groups");
                return InstallationGroupState::ReleaseFailed;
            }
        };

        let release_in_progress = match self
            .store
            .get_installation_groups_release_in_progress()
            .await
        {
            Ok(groups) => groups,
            Err(error) => {
                error!(error = %error, "failed to query for installation groups under release");
                return InstallationGroupState::ReleaseFailed;
            }
        };

        if locked.len() > 1 || !release_in_progress.is_empty() {
            debug!(
                installation_group_id = %installation_group.id,
                "another installation group is being released, re-queueing"
            );
            return InstallationGroupState::ReleasePending;
        }

        InstallationGroupState::ReleaseRequested
    }

    /// Invoke the provisioner to release the group.
    async fn release(&self, installation_group: &InstallationGroup) -> InstallationGroupState {
        let ring = match self
            .store
            .get_ring_for_installation_group(&installation_group.id)
            .await
        {
            Ok(ring) => ring,
            Err(error) => {
                error!(
                    installation_group_id = %installation_group.id,
                    error = %error,
                    "failed to get the ring of the installation group"
                );
                return InstallationGroupState::ReleaseFailed;
            }
        };

        let release = match self.store.get_ring_release(&ring.desired_release_id).await {
            Ok(release) => release,
            Err(error) => {
                error!(
                    ring_id = %ring.id,
                    error = %error,
                    "failed to get the desired ring release"
                );
                return InstallationGroupState::ReleaseFailed;
            }
        };

        if let Err(error) = self
            .provisioner
            .release_installation_group(installation_group, &release.image, &release.version)
            .await
        {
            error!(
                installation_group_id = %installation_group.id,
                error = %error,
                "failed to release installation group"
            );
            return InstallationGroupState::ReleaseFailed;
        }

        info!(
            installation_group_id = %installation_group.id,
            image = %release.image,
            version = %release.version,
            "finished releasing installation group"
        );

        if release.force {
            info!(
                installation_group_id = %installation_group.id,
                "forced release, skipping installation group soaking time"
            );
            return InstallationGroupState::Stable;
        }
        InstallationGroupState::SoakingRequested
    }

    /// Complete the soak period once it has run its course.
    async fn soak(&self, installation_group: &InstallationGroup) -> InstallationGroupState {
        let elapsed = (now_nanos() - installation_group.release_at) / NANOS_PER_SECOND;
        if elapsed < installation_group.soak_time {
            info!(
                installation_group_id = %installation_group.id,
                remaining = installation_group.soak_time - elapsed,
                "installation group still soaking"
            );
            return InstallationGroupState::SoakingRequested;
        }

        if let Err(error) = self
            .provisioner
            .soak_installation_group(installation_group)
            .await
        {
            error!(
                installation_group_id = %installation_group.id,
                error = %error,
                "failed to soak installation group"
            );
            return InstallationGroupState::SoakingFailed;
        }

        info!(
            installation_group_id = %installation_group.id,
            "finished soaking installation group"
        );
        InstallationGroupState::Stable
    }
}

#[async_trait]
impl Supervisor for InstallationGroupSupervisor {
    fn name(&self) -> &'static str {
        "installation-group"
    }

    async fn do_work(&self) -> ControlResult<()> {
        let installation_groups = match self.store.get_installation_groups_pending_work().await {
            Ok(groups) => groups,
            Err(error) => {
                warn!(error = %error, "failed to query for installation groups pending work");
                return Ok(());
            }
        };

        for installation_group in &installation_groups {
            let Ok(_permit) = self.work_permits.acquire().await else {
                return Ok(());
            };
            self.supervise(installation_group).await;
        }

        Ok(())
    }

    fn shutdown(&self) {
        debug!("shutting down installation group supervisor");
    }
}

impl std::fmt::Debug for InstallationGroupSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstallationGroupSupervisor")
            .field("instance_id", &self.instance_id)
            .finish_non_exhaustive()
    }
}
