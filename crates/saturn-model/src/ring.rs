//! Rings and the ring state machine.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::time::now_nanos;

/// States a ring can be in.
///
/// The serialised form is the kebab-case string (`"release-requested"`,
/// `"soaking-failed"`, ...), persisted verbatim by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RingState {
    /// Undergoing no changes.
    Stable,
    /// In the process of being created.
    CreationRequested,
    /// Creation failed.
    CreationFailed,
    /// A release has been requested.
    ReleaseRequested,
    /// Installation groups are being released one by one.
    ReleaseInProgress,
    /// The release failed.
    ReleaseFailed,
    /// The release finished and is awaiting activation.
    ReleaseComplete,
    /// Undergoing the post-release soak period.
    SoakingRequested,
    /// The soak period failed.
    SoakingFailed,
    /// The release is being rolled back.
    ReleaseRollbackRequested,
    /// The release rollback completed.
    ReleaseRollbackComplete,
    /// The release rollback failed.
    ReleaseRollbackFailed,
    /// In the process of being deleted.
    DeletionRequested,
    /// Deletion failed.
    DeletionFailed,
    /// Deleted. Never resurrected.
    Deleted,
}

impl RingState {
    /// Every state a ring can be in.
    pub const ALL: &'static [Self] = &[
        Self::Stable,
        Self::CreationRequested,
        Self::CreationFailed,
        Self::ReleaseRequested,
        Self::ReleaseInProgress,
        Self::ReleaseFailed,
        Self::ReleaseComplete,
        Self::SoakingRequested,
        Self::SoakingFailed,
        Self::ReleaseRollbackRequested,
        Self::ReleaseRollbackComplete,
        Self::ReleaseRollbackFailed,
        Self::DeletionRequested,
        Self::DeletionFailed,
        Self::Deleted,
    ];

    /// States the supervisor will attempt to advance on its next tick.
    pub const PENDING_WORK: &'static [Self] = &[
        Self::CreationRequested,
        Self::ReleaseRequested,
        Self::ReleaseInProgress,
        Self::ReleaseComplete,
        Self::SoakingRequested,
        Self::ReleaseRollbackRequested,
        Self::DeletionRequested,
    ];

    /// States a ring can be put in via the external API.
    pub const API_REQUESTABLE: &'static [Self] = &[
        Self::CreationRequested,
        Self::ReleaseRequested,
        Self::SoakingRequested,
        Self::ReleaseRollbackRequested,
        Self::DeletionRequested,
    ];

    /// Get the state name as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Stable => "stable",
            Self::CreationRequested => "creation-requested",
            Self::CreationFailed => "creation-failed",
            Self::ReleaseRequested => "release-requested",
            Self::ReleaseInProgress => "release-in-progress",
            Self::ReleaseFailed => "release-failed",
            Self::ReleaseComplete => "release-complete",
            Self::SoakingRequested => "soaking-requested",
            Self::SoakingFailed => "soaking-failed",
            Self::ReleaseRollbackRequested => "release-rollback-requested",
            Self::ReleaseRollbackComplete => "release-rollback-complete",
            Self::ReleaseRollbackFailed => "release-rollback-failed",
            Self::DeletionRequested => "deletion-requested",
            Self::DeletionFailed => "deletion-failed",
            Self::Deleted => "deleted",
        }
    }

    /// Whether the supervisor has work to do on a ring in this state.
    #[must_use]
    pub fn is_pending_work(&self) -> bool {
        Self::PENDING_WORK.contains(self)
    }

    /// Whether the external API may request this state.
    #[must_use]
    pub fn is_api_requestable(&self) -> bool {
        Self::API_REQUESTABLE.contains(self)
    }
}

impl fmt::Display for RingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RingState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|state| state.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown ring state: {s}"))
    }
}

/// An ordered deployment stage containing a group of installation groups
/// released together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ring {
    /// Unique ring identifier.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Release order. Lower priority rings release earlier.
    pub priority: i32,
    /// Post-release observation period in seconds.
    pub soak_time: i64,
    /// Current state.
    pub state: RingState,
    /// The release the ring should converge on.
    pub desired_release_id: String,
    /// The release currently live on the ring.
    pub active_release_id: String,
    /// When the last release completed, nanoseconds since the epoch.
    pub release_at: i64,
    /// Creation time, nanoseconds since the epoch.
    pub create_at: i64,
    /// Deletion time, nanoseconds since the epoch. Zero until deleted.
    pub delete_at: i64,
    /// Instance currently holding the ring lock, if any.
    pub lock_acquired_by: Option<String>,
    /// When the lock was acquired, nanoseconds since the epoch.
    pub lock_acquired_at: i64,
}

impl Ring {
    /// Create a new ring in the creation-requested state.
    #[must_use]
    pub fn new(name: impl Into<String>, priority: i32, soak_time: i64) -> Self {
        Self {
            id: ulid::Ulid::new().to_string().to_lowercase(),
            name: name.into(),
            priority,
            soak_time,
            state: RingState::CreationRequested,
            desired_release_id: String::new(),
            active_release_id: String::new(),
            release_at: 0,
            create_at: now_nanos(),
            delete_at: 0,
            lock_acquired_by: None,
            lock_acquired_at: 0,
        }
    }

    /// Whether the ring can be transitioned into `new_state` by the
    /// external API, given its current state.
    ///
    /// Supervisor-driven transitions do not pass through here; this guards
    /// the request states only.
    #[must_use]
    pub fn valid_transition_state(&self, new_state: RingState) -> bool {
        match new_state {
            RingState::CreationRequested => valid_transition_to_creation_requested(self.state),
            RingState::ReleaseRequested => valid_transition_to_release_requested(self.state),
            RingState::DeletionRequested => valid_transition_to_deletion_requested(self.state),
            RingState::SoakingRequested => valid_transition_to_soaking_requested(self.state),
            RingState::ReleaseRollbackRequested => valid_transition_to_rollback_requested(self.state),
            _ => false,
        }
    }
}

fn valid_transition_to_creation_requested(current: RingState) -> bool {
    matches!(
        current,
        RingState::CreationRequested | RingState::CreationFailed
    )
}

fn valid_transition_to_release_requested(current: RingState) -> bool {
    matches!(
        current,
        RingState::Stable | RingState::ReleaseRequested | RingState::ReleaseFailed
    )
}

fn valid_transition_to_deletion_requested(current: RingState) -> bool {
    matches!(
        current,
        RingState::Stable
            | RingState::CreationRequested
            | RingState::CreationFailed
            | RingState::ReleaseFailed
            | RingState::DeletionRequested
            | RingState::DeletionFailed
    )
}

fn valid_transition_to_soaking_requested(current: RingState) -> bool {
    matches!(
        current,
        RingState::ReleaseComplete | RingState::SoakingRequested | RingState::SoakingFailed
    )
}

fn valid_transition_to_rollback_requested(current: RingState) -> bool {
    matches!(
        current,
        RingState::SoakingFailed | RingState::ReleaseFailed | RingState::ReleaseRollbackFailed
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring_in(state: RingState) -> Ring {
        let mut ring = Ring::new("ring-0", 0, 60);
        ring.state = state;
        ring
    }

    #[test]
    fn state_strings_round_trip() {
        for state in RingState::ALL {
            let parsed: RingState = state.as_str().parse().expect("parse failed");
            assert_eq!(parsed, *state);
        }
        assert!("release-reversed".parse::<RingState>().is_err());
    }

    #[test]
    fn serde_uses_literal_strings() {
        let json = serde_json::to_string(&RingState::ReleaseRollbackRequested).unwrap();
        assert_eq!(json, r#""release-rollback-requested""#);
        let state: RingState = serde_json::from_str(r#""soaking-failed""#).unwrap();
        assert_eq!(state, RingState::SoakingFailed);
    }

    #[test]
    fn pending_work_states() {
        assert!(RingState::ReleaseInProgress.is_pending_work());
        assert!(RingState::ReleaseComplete.is_pending_work());
        assert!(!RingState::Stable.is_pending_work());
        assert!(!RingState::Deleted.is_pending_work());
        assert!(!RingState::ReleaseFailed.is_pending_work());
    }

    #[test]
    fn api_requestable_states() {
        assert!(RingState::ReleaseRequested.is_api_requestable());
        assert!(!RingState::ReleaseInProgress.is_api_requestable());
        assert!(!RingState::Deleted.is_api_requestable());
    }

    #[test]
    fn release_requested_edges() {
        for state in RingState::ALL {
            let valid = ring_in(*state).valid_transition_state(RingState::ReleaseRequested);
            let expected = matches!(
                state,
                RingState::Stable | RingState::ReleaseRequested | RingState::ReleaseFailed
            );
            assert_eq!(valid, expected, "release-requested from {state}");
        }
    }

    #[test]
    fn deletion_requested_edges() {
        assert!(ring_in(RingState::Stable).valid_transition_state(RingState::DeletionRequested));
        assert!(
            ring_in(RingState::DeletionFailed).valid_transition_state(RingState::DeletionRequested)
        );
        assert!(
            !ring_in(RingState::ReleaseInProgress)
                .valid_transition_state(RingState::DeletionRequested)
        );
        assert!(!ring_in(RingState::Deleted).valid_transition_state(RingState::DeletionRequested));
    }

    #[test]
    fn rollback_requested_edges() {
        assert!(
            ring_in(RingState::SoakingFailed)
                .valid_transition_state(RingState::ReleaseRollbackRequested)
        );
        assert!(
            ring_in(RingState::ReleaseFailed)
                .valid_transition_state(RingState::ReleaseRollbackRequested)
        );
        assert!(
            !ring_in(RingState::Stable).valid_transition_state(RingState::ReleaseRollbackRequested)
        );
    }

    #[test]
    fn deleted_ring_rejects_release_request() {
        assert!(!ring_in(RingState::Deleted).valid_transition_state(RingState::ReleaseRequested));
    }

    #[test]
    fn non_requestable_targets_always_rejected() {
        for state in RingState::ALL {
            assert!(!ring_in(*state).valid_transition_state(RingState::Stable));
            assert!(!ring_in(*state).valid_transition_state(RingState::ReleaseInProgress));
            assert!(!ring_in(*state).valid_transition_state(RingState::Deleted));
        }
    }

    #[test]
    fn transition_validity_is_pure() {
        let ring = ring_in(RingState::Stable);
        let first = ring.valid_transition_state(RingState::ReleaseRequested);
        for _ in 0..10 {
            assert_eq!(ring.valid_transition_state(RingState::ReleaseRequested), first);
        }
    }
}
