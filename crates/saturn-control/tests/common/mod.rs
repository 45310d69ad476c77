//! Test fixtures for rollout integration tests.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use saturn_control::provisioner::Provisioner;
use saturn_control::store::Store;
use saturn_control::{
    InstallationGroupSupervisor, MemoryStore, MockProvisioner, RingSupervisor, Supervisor,
    WebhookEmitter,
};
use saturn_model::{InstallationGroup, InstallationGroupState, Ring, RingRelease, RingState};

pub const INSTANCE_ID: &str = "test-instance";

const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// A store, a mock provisioner, and both supervisors wired together.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub provisioner: Arc<MockProvisioner>,
    pub ring_supervisor: RingSupervisor,
    pub group_supervisor: InstallationGroupSupervisor,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let provisioner = Arc::new(MockProvisioner::new());
        let webhooks = WebhookEmitter::new(Duration::from_millis(100)).expect("emitter");
        let work_permits = Arc::new(Semaphore::new(4));

        let ring_supervisor = RingSupervisor::new(
            Arc::clone(&store) as Arc<dyn Store>,
            Arc::clone(&provisioner) as Arc<dyn Provisioner>,
            webhooks.clone(),
            INSTANCE_ID,
            Arc::clone(&work_permits),
        );
        let group_supervisor = InstallationGroupSupervisor::new(
            Arc::clone(&store) as Arc<dyn Store>,
            Arc::clone(&provisioner) as Arc<dyn Provisioner>,
            webhooks,
            INSTANCE_ID,
            work_permits,
        );

        Self {
            store,
            provisioner,
            ring_supervisor,
            group_supervisor,
        }
    }

    /// Seed a release and a ring pointing at it.
    pub fn seed_ring(&self, state: RingState, soak_time: i64, force: bool) -> Ring {
        let release = RingRelease::new("registry.example.com/app", "2.0.0", force, BTreeMap::new());
        self.store.insert_ring_release(&release).expect("seed release");

        let mut ring = Ring::new("test-ring", 0, soak_time);
        ring.state = state;
        ring.desired_release_id = release.id.clone();
        self.store.insert_ring(&ring).expect("seed ring");
        ring
    }

    /// Seed an installation group as a member of the given ring.
    ///
    /// `order` fixes the discovery order between groups seeded in the
    /// same test.
    pub fn seed_group(&self, ring_id: &str, name: &str, soak_time: i64, order: i64) -> InstallationGroup {
        let mut group = InstallationGroup::new(name, soak_time);
        group.create_at = order;
        self.store
            .insert_installation_group(ring_id, &group)
            .expect("seed group");
        group
    }

    pub async fn ring_state(&self, id: &str) -> RingState {
        self.store.get_ring(id).await.expect("get ring").state
    }

    pub async fn group_state(&self, id: &str) -> InstallationGroupState {
        self.store
            .get_installation_group(id)
            .await
            .expect("get group")
            .state
    }

    /// Move a group's release completion time into the past, expiring its
    /// soak period.
    pub async fn expire_group_soak(&self, id: &str) {
        let mut group = self
            .store
            .get_installation_group(id)
            .await
            .expect("get group");
        group.release_at -= 3600 * NANOS_PER_SECOND;
        self.store
            .update_installation_group(&group)
            .await
            .expect("update group");
    }

    /// Move a ring's release completion time into the past, expiring its
    /// soak period.
    pub async fn expire_ring_soak(&self, id: &str) {
        let mut ring = self.store.get_ring(id).await.expect("get ring");
        ring.release_at -= 3600 * NANOS_PER_SECOND;
        self.store.update_ring(&ring).await.expect("update ring");
    }

    /// Assert the sequential-rollout invariant: at most one group
    /// mid-release across the whole system.
    pub async fn assert_at_most_one_release_underway(&self) {
        let underway = self
            .store
            .get_installation_groups_release_in_progress()
            .await
            .expect("query underway");
        assert!(
            underway.len() <= 1,
            "more than one installation group mid-release: {:?}",
            underway.iter().map(|g| g.id.clone()).collect::<Vec<_>>()
        );
    }

    /// Run one tick of each supervisor, ring first, checking the
    /// sequential-rollout invariant afterwards.
    pub async fn tick(&self) {
        self.ring_supervisor.do_work().await.expect("ring tick");
        self.group_supervisor.do_work().await.expect("group tick");
        self.assert_at_most_one_release_underway().await;
    }
}
