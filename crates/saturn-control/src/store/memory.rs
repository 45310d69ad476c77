//! In-memory store for tests and single-node development.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use saturn_model::{
    now_nanos, InstallationGroup, Ring, RingRelease, Webhook, WebhookFilter,
};

use crate::error::{ControlError, ControlResult};

use super::Store;

/// In-memory store.
///
/// Data is lost when the process exits; production deployments are
/// expected to provide a durable [`Store`] implementation instead.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rings: RwLock<HashMap<String, Ring>>,
    installation_groups: RwLock<HashMap<String, InstallationGroup>>,
    releases: RwLock<HashMap<String, RingRelease>>,
    webhooks: RwLock<HashMap<String, Webhook>>,
    /// Ring ID to ordered member installation group IDs.
    memberships: RwLock<HashMap<String, Vec<String>>>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a ring row.
    pub fn insert_ring(&self, ring: &Ring) -> ControlResult<()> {
        let mut rings = self
            .rings
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;
        rings.insert(ring.id.clone(), ring.clone());
        Ok(())
    }

    /// Insert an installation group row and register it as a member of
    /// the given ring.
    pub fn insert_installation_group(
        &self,
        ring_id: &str,
        installation_group: &InstallationGroup,
    ) -> ControlResult<()> {
        {
            let mut groups = self
                .installation_groups
                .write()
                .map_err(|_| ControlError::internal("lock poisoned"))?;
            groups.insert(installation_group.id.clone(), installation_group.clone());
        }

        let mut memberships = self
            .memberships
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;
        memberships
            .entry(ring_id.to_owned())
            .or_default()
            .push(installation_group.id.clone());
        Ok(())
    }

    /// Insert a ring release row.
    pub fn insert_ring_release(&self, release: &RingRelease) -> ControlResult<()> {
        let mut releases = self
            .releases
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;
        releases.insert(release.id.clone(), release.clone());
        Ok(())
    }

    /// Insert a webhook row.
    pub fn insert_webhook(&self, webhook: &Webhook) -> ControlResult<()> {
        let mut webhooks = self
            .webhooks
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;
        webhooks.insert(webhook.id.clone(), webhook.clone());
        Ok(())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_rings_pending_work(&self) -> ControlResult<Vec<Ring>> {
        let rings = self
            .rings
            .read()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        let mut pending: Vec<_> = rings
            .values()
            .filter(|ring| ring.state.is_pending_work())
            .cloned()
            .collect();
        // Deterministic order for a HashMap-backed table; callers may not
        // rely on it.
        pending.sort_by(|a, b| (a.create_at, &a.id).cmp(&(b.create_at, &b.id)));
        Ok(pending)
    }

    async fn get_ring(&self, id: &str) -> ControlResult<Ring> {
        let rings = self
            .rings
            .read()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        rings
            .get(id)
            .cloned()
            .ok_or_else(|| ControlError::RingNotFound(id.to_owned()))
    }

    async fn update_ring(&self, ring: &Ring) -> ControlResult<()> {
        let mut rings = self
            .rings
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        let existing = rings
            .get_mut(&ring.id)
            .ok_or_else(|| ControlError::RingNotFound(ring.id.clone()))?;

        let mut updated = ring.clone();
        updated.lock_acquired_by = existing.lock_acquired_by.clone();
        updated.lock_acquired_at = existing.lock_acquired_at;
        *existing = updated;
        Ok(())
    }

    async fn update_rings(&self, to_update: &[Ring]) -> ControlResult<()> {
        let mut rings = self
            .rings
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        for ring in to_update {
            if !rings.contains_key(&ring.id) {
                return Err(ControlError::RingNotFound(ring.id.clone()));
            }
        }
        for ring in to_update {
            if let Some(existing) = rings.get_mut(&ring.id) {
                let mut updated = ring.clone();
                updated.lock_acquired_by = existing.lock_acquired_by.clone();
                updated.lock_acquired_at = existing.lock_acquired_at;
                *existing = updated;
            }
        }
        Ok(())
    }

    async fn lock_ring(&self, id: &str, holder: &str) -> ControlResult<bool> {
        let mut rings = self
            .rings
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        let ring = rings
            .get_mut(id)
            .ok_or_else(|| ControlError::RingNotFound(id.to_owned()))?;

        if ring.lock_acquired_by.is_some() {
            return Ok(false);
        }
        ring.lock_acquired_by = Some(holder.to_owned());
        ring.lock_acquired_at = now_nanos();
        Ok(true)
    }

    async fn unlock_ring(&self, id: &str, holder: &str, force: bool) -> ControlResult<bool> {
        let mut rings = self
            .rings
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        let ring = rings
            .get_mut(id)
            .ok_or_else(|| ControlError::RingNotFound(id.to_owned()))?;

        let owned = ring.lock_acquired_by.as_deref() == Some(holder);
        if !owned && !force {
            return Ok(false);
        }
        let released = ring.lock_acquired_by.is_some();
        ring.lock_acquired_by = None;
        ring.lock_acquired_at = 0;
        Ok(released)
    }

    async fn get_installation_groups_pending_work(
        &self,
    ) -> ControlResult<Vec<InstallationGroup>> {
        let groups = self
            .installation_groups
            .read()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        let mut pending: Vec<_> = groups
            .values()
            .filter(|group| group.state.is_pending_work())
            .cloned()
            .collect();
        pending.sort_by(|a, b| (a.create_at, &a.id).cmp(&(b.create_at, &b.id)));
        Ok(pending)
    }

    async fn get_installation_group(&self, id: &str) -> ControlResult<InstallationGroup> {
        let groups = self
            .installation_groups
            .read()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        groups
            .get(id)
            .cloned()
            .ok_or_else(|| ControlError::InstallationGroupNotFound(id.to_owned()))
    }

    async fn get_installation_groups_for_ring(
        &self,
        ring_id: &str,
    ) -> ControlResult<Vec<InstallationGroup>> {
        let member_ids = {
            let memberships = self
                .memberships
                .read()
                .map_err(|_| ControlError::internal("lock poisoned"))?;
            memberships.get(ring_id).cloned().unwrap_or_default()
        };

        let groups = self
            .installation_groups
            .read()
            .map_err(|_| ControlError::internal("lock poisoned"))?;
        member_ids
            .iter()
            .map(|id| {
                groups
                    .get(id)
                    .cloned()
                    .ok_or_else(|| ControlError::InstallationGroupNotFound(id.clone()))
            })
            .collect()
    }

    async fn get_ring_for_installation_group(
        &self,
        installation_group_id: &str,
    ) -> ControlResult<Ring> {
        let ring_id = {
            let memberships = self
                .memberships
                .read()
                .map_err(|_| ControlError::internal("lock poisoned"))?;
            memberships
                .iter()
                .find(|(_, members)| members.iter().any(|id| id == installation_group_id))
                .map(|(ring_id, _)| ring_id.clone())
                .ok_or_else(|| {
                    ControlError::InstallationGroupNotFound(installation_group_id.to_owned())
                })?
        };

        self.get_ring(&ring_id).await
    }

    async fn get_installation_groups_locked(&self) -> ControlResult<Vec<InstallationGroup>> {
        let groups = self
            .installation_groups
            .read()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        Ok(groups
            .values()
            .filter(|group| group.lock_acquired_by.is_some())
            .cloned()
            .collect())
    }

    async fn get_installation_groups_release_in_progress(
        &self,
    ) -> ControlResult<Vec<InstallationGroup>> {
        let groups = self
            .installation_groups
            .read()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        Ok(groups
            .values()
            .filter(|group| group.state.is_release_underway())
            .cloned()
            .collect())
    }

    async fn update_installation_group(
        &self,
        installation_group: &InstallationGroup,
    ) -> ControlResult<()> {
        let mut groups = self
            .installation_groups
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        let existing = groups.get_mut(&installation_group.id).ok_or_else(|| {
            ControlError::InstallationGroupNotFound(installation_group.id.clone())
        })?;

        let mut updated = installation_group.clone();
        updated.lock_acquired_by = existing.lock_acquired_by.clone();
        updated.lock_acquired_at = existing.lock_acquired_at;
        *existing = updated;
        Ok(())
    }

    async fn update_installation_groups(
        &self,
        installation_groups: &[InstallationGroup],
    ) -> ControlResult<()> {
        let mut groups = self
            .installation_groups
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        for group in installation_groups {
            if !groups.contains_key(&group.id) {
                return Err(ControlError::InstallationGroupNotFound(group.id.clone()));
            }
        }
        for group in installation_groups {
            if let Some(existing) = groups.get_mut(&group.id) {
                let mut updated = group.clone();
                updated.lock_acquired_by = existing.lock_acquired_by.clone();
                updated.lock_acquired_at = existing.lock_acquired_at;
                *existing = updated;
            }
        }
        Ok(())
    }

    async fn lock_installation_group(&self, id: &str, holder: &str) -> ControlResult<bool> {
        let mut groups = self
            .installation_groups
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        let group = groups
            .get_mut(id)
            .ok_or_else(|| ControlError::InstallationGroupNotFound(id.to_owned()))?;

        if group.lock_acquired_by.is_some() {
            return Ok(false);
        }
        group.lock_acquired_by = Some(holder.to_owned());
        group.lock_acquired_at = now_nanos();
        Ok(true)
    }

    async fn unlock_installation_group(
        &self,
        id: &str,
        holder: &str,
        force: bool,
    ) -> ControlResult<bool> {
        let mut groups = self
            .installation_groups
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        let group = groups
            .get_mut(id)
            .ok_or_else(|| ControlError::InstallationGroupNotFound(id.to_owned()))?;

        let owned = group.lock_acquired_by.as_deref() == Some(holder);
        if !owned && !force {
            return Ok(false);
        }
        let released = group.lock_acquired_by.is_some();
        group.lock_acquired_by = None;
        group.lock_acquired_at = 0;
        Ok(released)
    }

    async fn get_ring_release(&self, id: &str) -> ControlResult<RingRelease> {
        let releases = self
            .releases
            .read()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        releases
            .get(id)
            .cloned()
            .ok_or_else(|| ControlError::ReleaseNotFound(id.to_owned()))
    }

    async fn get_webhooks(&self, filter: &WebhookFilter) -> ControlResult<Vec<Webhook>> {
        let webhooks = self
            .webhooks
            .read()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        Ok(webhooks
            .values()
            .filter(|webhook| {
                filter
                    .owner_id
                    .as_ref()
                    .map_or(true, |owner| &webhook.owner_id == owner)
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use saturn_model::{InstallationGroupState, RingState};

    fn seeded_ring(store: &MemoryStore, state: RingState) -> Ring {
        let mut ring = Ring::new("test-ring", 0, 60);
        ring.state = state;
        store.insert_ring(&ring).expect("insert failed");
        ring
    }

    fn seeded_group(
        store: &MemoryStore,
        ring_id: &str,
        state: InstallationGroupState,
    ) -> InstallationGroup {
        let mut group = InstallationGroup::new("test-group", 60);
        group.state = state;
        store
            .insert_installation_group(ring_id, &group)
            .expect("insert failed");
        group
    }

    #[tokio::test]
    async fn ring_not_found() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.get_ring("missing").await,
            Err(ControlError::RingNotFound(_))
        ));
    }

    #[tokio::test]
    async fn pending_work_filters_states() {
        let store = MemoryStore::new();
        seeded_ring(&store, RingState::Stable);
        let pending_ring = seeded_ring(&store, RingState::ReleaseRequested);
        seeded_ring(&store, RingState::Deleted);

        let pending = store.get_rings_pending_work().await.expect("query failed");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, pending_ring.id);
    }

    #[tokio::test]
    async fn lock_is_exclusive() {
        let store = MemoryStore::new();
        let ring = seeded_ring(&store, RingState::Stable);
        seeded_group(&store, &ring.id, InstallationGroupState::Stable);

        let group = &store.get_installation_groups_for_ring(&ring.id).await.unwrap()[0];

        assert!(store
            .lock_installation_group(&group.id, "instance-a")
            .await
            .unwrap());
        assert!(!store
            .lock_installation_group(&group.id, "instance-b")
            .await
            .unwrap());

        let locked = store.get_installation_groups_locked().await.unwrap();
        assert_eq!(locked.len(), 1);
        assert_eq!(locked[0].lock_acquired_by.as_deref(), Some("instance-a"));
    }

    #[tokio::test]
    async fn unlock_requires_ownership_unless_forced() {
        let store = MemoryStore::new();
        let ring = seeded_ring(&store, RingState::Stable);

        assert!(store.lock_ring(&ring.id, "instance-a").await.unwrap());
        assert!(!store.unlock_ring(&ring.id, "instance-b", false).await.unwrap());
        assert!(store.unlock_ring(&ring.id, "instance-b", true).await.unwrap());

        // Unlocked ring can be taken again.
        assert!(store.lock_ring(&ring.id, "instance-b").await.unwrap());
    }

    #[tokio::test]
    async fn updates_preserve_lock_columns() {
        let store = MemoryStore::new();
        let mut ring = seeded_ring(&store, RingState::ReleaseInProgress);
        assert!(store.lock_ring(&ring.id, "instance-a").await.unwrap());

        // A bulk update from another worker must not clobber the lock.
        ring.state = RingState::ReleaseFailed;
        store.update_rings(&[ring.clone()]).await.unwrap();

        let stored = store.get_ring(&ring.id).await.unwrap();
        assert_eq!(stored.state, RingState::ReleaseFailed);
        assert_eq!(stored.lock_acquired_by.as_deref(), Some("instance-a"));
    }

    #[tokio::test]
    async fn membership_lookups() {
        let store = MemoryStore::new();
        let ring = seeded_ring(&store, RingState::Stable);
        let first = seeded_group(&store, &ring.id, InstallationGroupState::Stable);
        let second = seeded_group(&store, &ring.id, InstallationGroupState::Stable);

        let members = store
            .get_installation_groups_for_ring(&ring.id)
            .await
            .unwrap();
        assert_eq!(members.len(), 2);
        assert_eq!(members[0].id, first.id);
        assert_eq!(members[1].id, second.id);

        let parent = store
            .get_ring_for_installation_group(&second.id)
            .await
            .unwrap();
        assert_eq!(parent.id, ring.id);
    }

    #[tokio::test]
    async fn release_in_progress_covers_underway_states() {
        let store = MemoryStore::new();
        let ring = seeded_ring(&store, RingState::ReleaseInProgress);
        seeded_group(&store, &ring.id, InstallationGroupState::ReleasePending);
        seeded_group(&store, &ring.id, InstallationGroupState::SoakingRequested);

        let underway = store
            .get_installation_groups_release_in_progress()
            .await
            .unwrap();
        assert_eq!(underway.len(), 1);
        assert_eq!(underway[0].state, InstallationGroupState::SoakingRequested);
    }

    #[tokio::test]
    async fn webhook_filter_by_owner() {
        let store = MemoryStore::new();
        store
            .insert_webhook(&Webhook::new("http://one.example.com", "owner-a"))
            .unwrap();
        store
            .insert_webhook(&Webhook::new("http://two.example.com", "owner-b"))
            .unwrap();

        let all = store.get_webhooks(&WebhookFilter::all()).await.unwrap();
        assert_eq!(all.len(), 2);

        let filtered = store
            .get_webhooks(&WebhookFilter {
                owner_id: Some("owner-a".to_owned()),
            })
            .await
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].owner_id, "owner-a");
    }

    #[tokio::test]
    async fn bulk_update_validates_before_writing() {
        let store = MemoryStore::new();
        let mut known = seeded_ring(&store, RingState::ReleaseRequested);
        known.state = RingState::ReleaseFailed;
        let unknown = Ring::new("ghost", 0, 60);

        let result = store.update_rings(&[known.clone(), unknown]).await;
        assert!(matches!(result, Err(ControlError::RingNotFound(_))));

        // Nothing was written.
        let stored = store.get_ring(&known.id).await.unwrap();
        assert_eq!(stored.state, RingState::ReleaseRequested);
    }
}
