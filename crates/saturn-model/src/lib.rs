//! Entity model for the saturn rollout control plane.
//!
//! A **ring** is an ordered deployment stage made up of one or more
//! **installation groups**. Releasing a ring means releasing each of its
//! installation groups in turn, soaking, and finally declaring the ring
//! stable. This crate holds the value objects shared between the control
//! plane and its collaborators: rings, installation groups, ring releases,
//! webhooks, and the state machines that govern them.
//!
//! States are persisted as literal strings (`"release-requested"`,
//! `"soaking-failed"`, ...); the enums here map onto those strings exactly
//! via serde renames, [`std::fmt::Display`] and [`std::str::FromStr`].
//!
//! Entities are plain value objects. Relationships (which installation
//! groups belong to which ring) are resolved through the store, never held
//! in memory, so there is no cyclic ownership between rings and groups.

#![forbid(unsafe_code)]

mod installation_group;
mod release;
mod ring;
mod time;
mod webhook;

pub use installation_group::{InstallationGroup, InstallationGroupState};
pub use release::RingRelease;
pub use ring::{Ring, RingState};
pub use time::now_nanos;
pub use webhook::{EntityType, Webhook, WebhookFilter, WebhookPayload};
