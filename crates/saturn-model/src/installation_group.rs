//! Installation groups and their state machine.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::time::now_nanos;

/// States an installation group can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstallationGroupState {
    /// Undergoing no changes.
    Stable,
    /// Queued for release, waiting for its turn.
    ReleasePending,
    /// Cleared to release; the provisioner will be invoked next tick.
    ReleaseRequested,
    /// A release is actively running.
    ReleaseInProgress,
    /// The release failed.
    ReleaseFailed,
    /// Undergoing the post-release soak period.
    SoakingRequested,
    /// The soak period failed.
    SoakingFailed,
}

impl InstallationGroupState {
    /// Every state an installation group can be in.
    pub const ALL: &'static [Self] = &[
        Self::Stable,
        Self::ReleasePending,
        Self::ReleaseRequested,
        Self::ReleaseInProgress,
        Self::ReleaseFailed,
        Self::SoakingRequested,
        Self::SoakingFailed,
    ];

    /// States the supervisor will attempt to advance on its next tick.
    pub const PENDING_WORK: &'static [Self] = &[
        Self::ReleasePending,
        Self::ReleaseRequested,
        Self::ReleaseInProgress,
        Self::SoakingRequested,
    ];

    /// States in which a release is actively underway for the group.
    ///
    /// Exactly one installation group across the whole system may be in
    /// one of these states at a time; the supervisor's mutual-exclusion
    /// check queries the store for this set before promoting another
    /// group out of `release-pending`.
    pub const RELEASE_UNDERWAY: &'static [Self] = &[
        Self::ReleaseRequested,
        Self::ReleaseInProgress,
        Self::SoakingRequested,
    ];

    /// Get the state name as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Stable => "stable",
            Self::ReleasePending => "release-pending",
            Self::ReleaseRequested => "release-requested",
            Self::ReleaseInProgress => "release-in-progress",
            Self::ReleaseFailed => "release-failed",
            Self::SoakingRequested => "soaking-requested",
            Self::SoakingFailed => "soaking-failed",
        }
    }

    /// Whether the supervisor has work to do on a group in this state.
    #[must_use]
    pub fn is_pending_work(&self) -> bool {
        Self::PENDING_WORK.contains(self)
    }

    /// Whether a release is actively underway for a group in this state.
    #[must_use]
    pub fn is_release_underway(&self) -> bool {
        Self::RELEASE_UNDERWAY.contains(self)
    }
}

impl fmt::Display for InstallationGroupState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for InstallationGroupState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|state| state.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown installation group state: {s}"))
    }
}

/// The smallest unit the provisioner releases atomically.
///
/// Each installation group belongs to exactly one ring; the membership is
/// resolved through the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallationGroup {
    /// Unique installation group identifier.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Post-release observation period in seconds.
    pub soak_time: i64,
    /// Current state.
    pub state: InstallationGroupState,
    /// When the last release completed, nanoseconds since the epoch.
    pub release_at: i64,
    /// Creation time, nanoseconds since the epoch.
    pub create_at: i64,
    /// Instance currently holding the group lock, if any.
    pub lock_acquired_by: Option<String>,
    /// When the lock was acquired, nanoseconds since the epoch.
    pub lock_acquired_at: i64,
}

impl InstallationGroup {
    /// Create a new installation group in the stable state.
    #[must_use]
    pub fn new(name: impl Into<String>, soak_time: i64) -> Self {
        Self {
            id: ulid::Ulid::new().to_string().to_lowercase(),
            name: name.into(),
            soak_time,
            state: InstallationGroupState::Stable,
            release_at: 0,
            create_at: now_nanos(),
            lock_acquired_by: None,
            lock_acquired_at: 0,
        }
    }
}
