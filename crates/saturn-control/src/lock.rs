//! Advisory entity locks.
//!
//! A lock is a row-level marker (holder instance ID plus acquisition
//! timestamp) written through the store with a conditional update. There
//! are no heartbeats: the worst case of a stale lock is delayed work,
//! never corruption, because every supervisor re-reads entity state after
//! acquiring the lock and aborts if it has drifted.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::store::Store;

/// Which entity table the lock row lives in.
#[derive(Debug, Clone, Copy)]
enum LockKind {
    Ring,
    InstallationGroup,
}

/// An advisory exclusive lock on a single entity, scoped to one holder.
pub struct Lock {
    kind: LockKind,
    id: String,
    holder: String,
    store: Arc<dyn Store>,
}

impl Lock {
    /// Lock handle for a ring.
    #[must_use]
    pub fn ring(id: impl Into<String>, holder: impl Into<String>, store: Arc<dyn Store>) -> Self {
        Self {
            kind: LockKind::Ring,
            id: id.into(),
            holder: holder.into(),
            store,
        }
    }

    /// Lock handle for an installation group.
    #[must_use]
    pub fn installation_group(
        id: impl Into<String>,
        holder: impl Into<String>,
        store: Arc<dyn Store>,
    ) -> Self {
        Self {
            kind: LockKind::InstallationGroup,
            id: id.into(),
            holder: holder.into(),
            store,
        }
    }

    /// Attempt to acquire the lock.
    ///
    /// Returns `false` when another holder owns it or the store failed;
    /// store errors are logged, not propagated.
    pub async fn try_lock(&self) -> bool {
        let result = match self.kind {
            LockKind::Ring => self.store.lock_ring(&self.id, &self.holder).await,
            LockKind::InstallationGroup => {
                self.store
                    .lock_installation_group(&self.id, &self.holder)
                    .await
            }
        };

        match result {
            Ok(true) => {
                debug!(entity_id = %self.id, "acquired lock");
                true
            }
            Ok(false) => false,
            Err(error) => {
                warn!(entity_id = %self.id, error = %error, "failed to acquire lock");
                false
            }
        }
    }

    /// Release the lock.
    ///
    /// A failed unlock is logged but never propagated; a stale lock will
    /// be reclaimed by a forced takeover.
    pub async fn unlock(&self, force: bool) {
        let result = match self.kind {
            LockKind::Ring => self.store.unlock_ring(&self.id, &self.holder, force).await,
            LockKind::InstallationGroup => {
                self.store
                    .unlock_installation_group(&self.id, &self.holder, force)
                    .await
            }
        };

        match result {
            Ok(true) => debug!(entity_id = %self.id, "released lock"),
            Ok(false) => warn!(entity_id = %self.id, "failed to release lock, not the owner"),
            Err(error) => {
                warn!(entity_id = %self.id, error = %error, "failed to release lock");
            }
        }
    }
}
