//! End-to-end rollout scenarios driven tick by tick.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use common::{Harness, INSTANCE_ID};
use saturn_control::store::Store;
use saturn_control::{MockProvisioner, Supervisor, SupervisorScheduler};
use saturn_model::{InstallationGroupState, RingState};

/// Two installation groups release strictly one after the other, and the
/// ring stabilises only once both have soaked.
#[tokio::test]
async fn sequential_rollout_of_two_groups() {
    let harness = Harness::new();
    let ring = harness.seed_ring(RingState::ReleaseRequested, 0, false);
    let group_a = harness.seed_group(&ring.id, "group-a", 60, 1);
    let group_b = harness.seed_group(&ring.id, "group-b", 60, 2);

    // The ring fans the release out to its groups, then the first group
    // claims the release slot while the second re-queues.
    harness.tick().await;
    assert_eq!(harness.ring_state(&ring.id).await, RingState::ReleaseInProgress);
    assert_eq!(
        harness.group_state(&group_a.id).await,
        InstallationGroupState::ReleaseRequested
    );
    assert_eq!(
        harness.group_state(&group_b.id).await,
        InstallationGroupState::ReleasePending
    );

    // The first group releases and starts soaking; the second stays queued.
    harness.tick().await;
    assert_eq!(
        harness.group_state(&group_a.id).await,
        InstallationGroupState::SoakingRequested
    );
    assert_eq!(
        harness.group_state(&group_b.id).await,
        InstallationGroupState::ReleasePending
    );

    // Soak has not expired: nothing moves.
    harness.tick().await;
    assert_eq!(
        harness.group_state(&group_a.id).await,
        InstallationGroupState::SoakingRequested
    );

    // Once the first group's soak expires it stabilises and the second
    // group is cleared to go.
    harness.expire_group_soak(&group_a.id).await;
    harness.tick().await;
    assert_eq!(harness.group_state(&group_a.id).await, InstallationGroupState::Stable);
    assert_eq!(
        harness.group_state(&group_b.id).await,
        InstallationGroupState::ReleaseRequested
    );

    harness.tick().await;
    assert_eq!(
        harness.group_state(&group_b.id).await,
        InstallationGroupState::SoakingRequested
    );

    harness.expire_group_soak(&group_b.id).await;
    harness.tick().await;
    assert_eq!(harness.group_state(&group_b.id).await, InstallationGroupState::Stable);

    // All groups stable: the ring soaks (zero soak time here), completes,
    // and activates the desired release.
    harness.tick().await;
    assert_eq!(harness.ring_state(&ring.id).await, RingState::SoakingRequested);
    harness.tick().await;
    assert_eq!(harness.ring_state(&ring.id).await, RingState::ReleaseComplete);
    harness.tick().await;

    let stored = harness.store.get_ring(&ring.id).await.unwrap();
    assert_eq!(stored.state, RingState::Stable);
    assert_eq!(stored.active_release_id, stored.desired_release_id);

    // The provisioner saw one release and one soak per group, in order.
    assert_eq!(
        harness.provisioner.calls(),
        vec![
            format!("release-installation-group:{}", group_a.id),
            format!("soak-installation-group:{}", group_a.id),
            format!("release-installation-group:{}", group_b.id),
            format!("soak-installation-group:{}", group_b.id),
        ]
    );
}

/// A forced release skips the soak period entirely.
#[tokio::test]
async fn forced_release_skips_soaking() {
    let harness = Harness::new();
    let ring = harness.seed_ring(RingState::ReleaseRequested, 0, true);
    let group = harness.seed_group(&ring.id, "group-a", 3600, 1);

    harness.tick().await;
    assert_eq!(
        harness.group_state(&group.id).await,
        InstallationGroupState::ReleaseRequested
    );

    harness.tick().await;
    let stored = harness.store.get_installation_group(&group.id).await.unwrap();
    assert_eq!(stored.state, InstallationGroupState::Stable);
    assert!(stored.release_at > 0);

    // No soak call was made.
    assert_eq!(
        harness.provisioner.calls(),
        vec![format!("release-installation-group:{}", group.id)]
    );
}

/// A failed group release fails the group, cascades to every ring
/// currently pending work, and drags the remaining queued groups down
/// with it.
#[tokio::test]
async fn failed_release_cascades_to_pending_rings() {
    let harness = Harness::new();
    let ring = harness.seed_ring(RingState::ReleaseRequested, 0, false);
    let group_a = harness.seed_group(&ring.id, "group-a", 60, 1);
    let group_b = harness.seed_group(&ring.id, "group-b", 60, 2);

    let other_ring = harness.seed_ring(RingState::ReleaseRequested, 0, false);
    let other_group = harness.seed_group(&other_ring.id, "group-c", 60, 3);

    harness.tick().await;
    assert_eq!(
        harness.group_state(&group_a.id).await,
        InstallationGroupState::ReleaseRequested
    );

    harness
        .provisioner
        .fail_on(MockProvisioner::RELEASE_INSTALLATION_GROUP);
    harness.tick().await;

    assert_eq!(
        harness.group_state(&group_a.id).await,
        InstallationGroupState::ReleaseFailed
    );
    // Every pending-work ring was bulk-failed, not just the parent.
    assert_eq!(harness.ring_state(&ring.id).await, RingState::ReleaseFailed);
    assert_eq!(harness.ring_state(&other_ring.id).await, RingState::ReleaseFailed);

    // Queued groups observe their failed rings on the next tick.
    harness.tick().await;
    assert_eq!(
        harness.group_state(&group_b.id).await,
        InstallationGroupState::ReleaseFailed
    );
    assert_eq!(
        harness.group_state(&other_group.id).await,
        InstallationGroupState::ReleaseFailed
    );
}

/// The ring soak timer holds the ring until the period expires.
#[tokio::test]
async fn ring_soak_timer() {
    let harness = Harness::new();
    let ring = harness.seed_ring(RingState::ReleaseInProgress, 60, false);
    harness.seed_group(&ring.id, "group-a", 0, 1);

    // The lone group is already stable, so the ring starts soaking.
    let mut group = harness.store.get_installation_groups_for_ring(&ring.id).await.unwrap();
    group[0].state = InstallationGroupState::Stable;
    harness.store.update_installation_groups(&group).await.unwrap();

    harness.ring_supervisor.do_work().await.unwrap();
    assert_eq!(harness.ring_state(&ring.id).await, RingState::SoakingRequested);

    // 60 seconds have not passed: the state is unchanged.
    harness.ring_supervisor.do_work().await.unwrap();
    assert_eq!(harness.ring_state(&ring.id).await, RingState::SoakingRequested);

    harness.expire_ring_soak(&ring.id).await;
    harness.ring_supervisor.do_work().await.unwrap();
    assert_eq!(harness.ring_state(&ring.id).await, RingState::ReleaseComplete);

    harness.ring_supervisor.do_work().await.unwrap();
    assert_eq!(harness.ring_state(&ring.id).await, RingState::Stable);
}

/// When a competing instance holds a group's lock, this instance skips it
/// and leaves its state untouched.
#[tokio::test]
async fn competing_worker_holding_the_lock_wins() {
    let harness = Harness::new();
    let ring = harness.seed_ring(RingState::ReleaseInProgress, 0, false);
    let group = harness.seed_group(&ring.id, "group-a", 60, 1);
    let mut queued = harness.store.get_installation_group(&group.id).await.unwrap();
    queued.state = InstallationGroupState::ReleasePending;
    harness.store.update_installation_group(&queued).await.unwrap();

    assert!(harness
        .store
        .lock_installation_group(&group.id, "other-instance")
        .await
        .unwrap());

    harness.group_supervisor.do_work().await.unwrap();

    let stored = harness.store.get_installation_group(&group.id).await.unwrap();
    assert_eq!(stored.state, InstallationGroupState::ReleasePending);
    assert_eq!(stored.lock_acquired_by.as_deref(), Some("other-instance"));

    // Once the competing worker releases the lock, the group advances.
    assert!(harness
        .store
        .unlock_installation_group(&group.id, "other-instance", false)
        .await
        .unwrap());
    harness.group_supervisor.do_work().await.unwrap();
    assert_eq!(
        harness.group_state(&group.id).await,
        InstallationGroupState::ReleaseRequested
    );
}

/// The scheduler drives both supervisors to a stable rollout and leaves
/// no locks held after shutdown.
#[tokio::test]
async fn scheduler_runs_rollout_to_stable() {
    let harness = Harness::new();
    let ring = harness.seed_ring(RingState::ReleaseRequested, 0, false);
    let group_a = harness.seed_group(&ring.id, "group-a", 0, 1);
    let group_b = harness.seed_group(&ring.id, "group-b", 0, 2);

    let Harness {
        store,
        ring_supervisor,
        group_supervisor,
        ..
    } = harness;

    let cancel = CancellationToken::new();
    let scheduler = SupervisorScheduler::new(
        vec![
            Arc::new(ring_supervisor) as Arc<dyn Supervisor>,
            Arc::new(group_supervisor) as Arc<dyn Supervisor>,
        ],
        Duration::from_millis(10),
        cancel.clone(),
    );
    let handle = tokio::spawn(scheduler.run());

    // Zero soak everywhere: a handful of ticks walks the whole rollout.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if store.get_ring(&ring.id).await.unwrap().state == RingState::Stable {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "rollout did not stabilise in time"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    cancel.cancel();
    handle.await.unwrap();

    for id in [&group_a.id, &group_b.id] {
        let group = store.get_installation_group(id).await.unwrap();
        assert_eq!(group.state, InstallationGroupState::Stable);
    }

    // Post-shutdown, nothing is left lock-held by this instance.
    let stored_ring = store.get_ring(&ring.id).await.unwrap();
    assert_ne!(stored_ring.lock_acquired_by.as_deref(), Some(INSTANCE_ID));
    for group in store
        .get_installation_groups_for_ring(&ring.id)
        .await
        .unwrap()
    {
        assert_ne!(group.lock_acquired_by.as_deref(), Some(INSTANCE_ID));
    }
}

/// Group failures surface on the parent ring even when the ring is mid
/// child-watch, keeping the parent non-stable while any child is
/// non-stable.
#[tokio::test]
async fn failed_soak_fails_the_ring() {
    let harness = Harness::new();
    let ring = harness.seed_ring(RingState::ReleaseRequested, 0, false);
    let group = harness.seed_group(&ring.id, "group-a", 60, 1);

    harness.tick().await;
    harness.tick().await;
    assert_eq!(
        harness.group_state(&group.id).await,
        InstallationGroupState::SoakingRequested
    );

    harness
        .provisioner
        .fail_on(MockProvisioner::SOAK_INSTALLATION_GROUP);
    harness.expire_group_soak(&group.id).await;
    harness.group_supervisor.do_work().await.unwrap();

    assert_eq!(
        harness.group_state(&group.id).await,
        InstallationGroupState::SoakingFailed
    );
    assert_eq!(harness.ring_state(&ring.id).await, RingState::ReleaseFailed);
}
