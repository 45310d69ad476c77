//! Saturn rollout control plane.
//!
//! This crate drives staged, ring-based rollouts of an artifact (an image
//! plus a version) across a fleet of logical deployment units.
//!
//! # Architecture
//!
//! The control plane is a pair of state-machine supervisors sharing a
//! store and a provisioner:
//!
//! - **[`RingSupervisor`]** advances rings: creation, fanning a release
//!   out to the ring's installation groups, watching their progress,
//!   soaking, activating the release, rollback, and deletion.
//! - **[`InstallationGroupSupervisor`]** advances installation groups one
//!   at a time: at most one group across the whole system is mid-release
//!   at any moment, enforced by advisory locks plus store-level state
//!   queries rather than a global lock.
//!
//! Both run on a periodic tick from the [`SupervisorScheduler`]. Each tick
//! a supervisor discovers entities pending work and, per entity: acquires
//! its lock, re-reads it to detect racing workers, computes the next state,
//! applies any provisioner side effect, persists, and fans the state change
//! out to registered webhooks.
//!
//! ```text
//!            release-requested
//!                   │ mark groups release-pending
//!                   ▼
//!           release-in-progress ──▶ release-failed
//!                   │ all groups stable
//!                   ▼
//!            soaking-requested ──▶ release-complete ──▶ stable
//! ```
//!
//! All shared state lives in the store behind [`store::Store`]; entities
//! are value objects loaded on demand, so there is no in-memory coupling
//! between rings and their groups.

#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod lock;
pub mod provisioner;
pub mod service;
pub mod store;
pub mod supervisor;
pub mod webhook;

// Re-export commonly used types at the crate root
pub use config::ControlConfig;
pub use error::{ControlError, ControlResult};
pub use provisioner::{MockProvisioner, Provisioner};
pub use service::ControlService;
pub use store::{MemoryStore, Store};
pub use supervisor::{
    InstallationGroupSupervisor, RingSupervisor, Supervisor, SupervisorScheduler,
};
pub use webhook::WebhookEmitter;
