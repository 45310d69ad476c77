//! Ring releases.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::time::now_nanos;

/// An (image, version) tuple describing what to deploy to a ring.
///
/// Releases are immutable once created; rings point at them through
/// `desired_release_id` and `active_release_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RingRelease {
    /// Unique release identifier.
    pub id: String,
    /// Container image to deploy.
    pub image: String,
    /// Image version to deploy.
    pub version: String,
    /// Skip the soak period after releasing each installation group.
    pub force: bool,
    /// Environment variables applied alongside the release. Opaque to the
    /// control plane.
    pub env_variables: BTreeMap<String, String>,
    /// Creation time, nanoseconds since the epoch.
    pub create_at: i64,
}

impl RingRelease {
    /// Create a new release.
    #[must_use]
    pub fn new(
        image: impl Into<String>,
        version: impl Into<String>,
        force: bool,
        env_variables: BTreeMap<String, String>,
    ) -> Self {
        Self {
            id: ulid::Ulid::new().to_string().to_lowercase(),
            image: image.into(),
            version: version.into(),
            force,
            env_variables,
            create_at: now_nanos(),
        }
    }
}
