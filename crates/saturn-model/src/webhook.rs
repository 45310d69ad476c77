//! Webhook subscriptions and state-change payloads.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::time::now_nanos;

/// A subscriber to state-change events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Webhook {
    /// Unique webhook identifier.
    pub id: String,
    /// URL the payload is POSTed to.
    pub url: String,
    /// Owner of the subscription.
    pub owner_id: String,
    /// Creation time, nanoseconds since the epoch.
    pub create_at: i64,
}

impl Webhook {
    /// Create a new webhook subscription.
    #[must_use]
    pub fn new(url: impl Into<String>, owner_id: impl Into<String>) -> Self {
        Self {
            id: ulid::Ulid::new().to_string().to_lowercase(),
            url: url.into(),
            owner_id: owner_id.into(),
            create_at: now_nanos(),
        }
    }
}

/// Filter criteria for listing webhooks.
#[derive(Debug, Clone, Default)]
pub struct WebhookFilter {
    /// Restrict to a single owner. `None` matches all webhooks.
    pub owner_id: Option<String>,
}

impl WebhookFilter {
    /// A filter matching every webhook.
    #[must_use]
    pub const fn all() -> Self {
        Self { owner_id: None }
    }
}

/// The kind of entity a state-change payload describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityType {
    /// A ring changed state.
    #[serde(rename = "ring")]
    Ring,
    /// An installation group changed state.
    #[serde(rename = "installation-group")]
    InstallationGroup,
}

impl EntityType {
    /// Get the type name as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ring => "ring",
            Self::InstallationGroup => "installation-group",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The JSON body POSTed to every webhook after a state change.
///
/// Field names are serialised in PascalCase; this is the wire contract
/// consumers depend on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WebhookPayload {
    /// Entity kind.
    #[serde(rename = "Type")]
    pub entity_type: EntityType,
    /// Entity identifier.
    #[serde(rename = "ID")]
    pub id: String,
    /// State after the transition.
    pub new_state: String,
    /// State before the transition.
    pub old_state: String,
    /// When the transition was observed, nanoseconds since the epoch.
    pub timestamp: i64,
}

impl WebhookPayload {
    /// Build a payload for a state change observed now.
    #[must_use]
    pub fn new(
        entity_type: EntityType,
        id: impl Into<String>,
        new_state: impl Into<String>,
        old_state: impl Into<String>,
    ) -> Self {
        Self {
            entity_type,
            id: id.into(),
            new_state: new_state.into(),
            old_state: old_state.into(),
            timestamp: now_nanos(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_wire_format() {
        let payload = WebhookPayload {
            entity_type: EntityType::InstallationGroup,
            id: "ig-1".to_owned(),
            new_state: "soaking-requested".to_owned(),
            old_state: "release-requested".to_owned(),
            timestamp: 42,
        };

        let json: serde_json::Value = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["Type"], "installation-group");
        assert_eq!(json["ID"], "ig-1");
        assert_eq!(json["NewState"], "soaking-requested");
        assert_eq!(json["OldState"], "release-requested");
        assert_eq!(json["Timestamp"], 42);
    }

    #[test]
    fn entity_type_strings() {
        assert_eq!(EntityType::Ring.as_str(), "ring");
        assert_eq!(EntityType::InstallationGroup.as_str(), "installation-group");
    }
}
