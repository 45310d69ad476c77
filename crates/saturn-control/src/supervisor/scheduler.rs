//! Periodic supervisor scheduling.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::supervisor::Supervisor;

/// Runs every registered supervisor on a periodic tick.
///
/// Ticks are serialised per supervisor and parallel across supervisors.
/// The shared semaphore handed to the supervisors at construction bounds
/// how many supervise invocations run simultaneously across all of them;
/// excess work stays in its pending state and is observed on the next
/// tick.
///
/// Cancellation stops new ticks; in-flight work runs to completion. No
/// partial-transition rollback is attempted: if the process dies
/// mid-provision, the entity remains in its pre-transition state and is
/// retried on the next tick.
pub struct SupervisorScheduler {
    supervisors: Vec<Arc<dyn Supervisor>>,
    tick_interval: Duration,
    cancel: CancellationToken,
}

impl SupervisorScheduler {
    /// Create a new scheduler for the given supervisors.
    #[must_use]
    pub fn new(
        supervisors: Vec<Arc<dyn Supervisor>>,
        tick_interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            supervisors,
            tick_interval,
            cancel,
        }
    }

    /// Run until cancelled.
    ///
    /// The first tick for each supervisor fires immediately.
    pub async fn run(self) {
        let mut handles = Vec::with_capacity(self.supervisors.len());
        for supervisor in self.supervisors {
            let cancel = self.cancel.clone();
            let tick_interval = self.tick_interval;
            handles.push(tokio::spawn(tick_loop(supervisor, tick_interval, cancel)));
        }

        for handle in handles {
            if let Err(error) = handle.await {
                error!(error = %error, "supervisor tick task panicked");
            }
        }
        debug!("supervisor scheduler stopped");
    }
}

impl std::fmt::Debug for SupervisorScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupervisorScheduler")
            .field("supervisors", &self.supervisors.len())
            .field("tick_interval", &self.tick_interval)
            .finish_non_exhaustive()
    }
}

async fn tick_loop(
    supervisor: Arc<dyn Supervisor>,
    tick_interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                supervisor.shutdown();
                return;
            }
            _ = ticker.tick() => {
                debug!(supervisor = supervisor.name(), "supervisor tick");
                if let Err(error) = supervisor.do_work().await {
                    warn!(
                        supervisor = supervisor.name(),
                        error = %error,
                        "supervisor tick failed"
                    );
                }
            }
        }
    }
}
