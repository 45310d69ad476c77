//! State-machine supervisors.
//!
//! A supervisor is a control loop driving one entity type's state machine.
//! Each tick it discovers entities pending work and attempts to advance
//! them, one lock-guarded transition at a time. Multiple control plane
//! instances may run the same supervisors concurrently; the lock plus
//! re-read discipline keeps them from stepping on each other.

mod installation_group;
mod ring;
mod scheduler;

pub use installation_group::InstallationGroupSupervisor;
pub use ring::RingSupervisor;
pub use scheduler::SupervisorScheduler;

use async_trait::async_trait;

use crate::error::ControlResult;

/// A periodic driver for one entity type's state machine.
#[async_trait]
pub trait Supervisor: Send + Sync {
    /// Supervisor name, used in logs.
    fn name(&self) -> &'static str;

    /// Look for pending work and attempt the required transitions.
    ///
    /// Transient discovery failures are logged and absorbed; the next
    /// tick retries.
    async fn do_work(&self) -> ControlResult<()>;

    /// Perform graceful shutdown tasks.
    fn shutdown(&self);
}
