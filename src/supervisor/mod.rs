//! Background health supervision.
//!
//! [`HealthSupervisor`] runs one task that, on every tick, refreshes the
//! orchestrator's statistics and then runs [`Orchestrator::health_sweep`].
//! The task is the only automatic writer of restarts, and it holds no lock
//! between ticks.

mod restart;

pub use restart::{
    DEFAULT_BACKOFF_FACTOR, DEFAULT_MAX_RESTARTS, DEFAULT_STALL_GRACE, RestartDecision,
    RestartPolicy,
};

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::orchestrator::Orchestrator;

/// Default interval between health sweeps.
pub const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Handle to the periodic health task.
///
/// Dropping the handle cancels the task; [`HealthSupervisor::shutdown`]
/// also waits for an in-flight sweep to finish.
#[derive(Debug)]
pub struct HealthSupervisor {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl HealthSupervisor {
    /// Spawns the health task. Returns `None` when `interval` is zero.
    #[must_use]
    pub fn spawn(orchestrator: Orchestrator, interval: Duration) -> Option<Self> {
        if interval.is_zero() {
            debug!("health supervision disabled");
            return None;
        }

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(orchestrator, interval, cancel.clone()));
        info!(interval_secs = interval.as_secs_f64(), "health supervisor started");
        Some(Self {
            cancel,
            task: Some(task),
        })
    }

    /// Returns true until the task has been cancelled.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Cancels the task and waits for it to exit.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            debug!(error = %e, "health task ended abnormally");
        }
        info!("health supervisor stopped");
    }
}

impl Drop for HealthSupervisor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run(orchestrator: Orchestrator, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                debug!("health loop cancelled");
                break;
            }
            _ = ticker.tick() => {
                orchestrator.refresh().await;
                let report = orchestrator.health_sweep().await;
                debug!(
                    stalled = report.stalled.len(),
                    restarted = report.restarted.len(),
                    "health tick"
                );
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::backend::MemoryBackend;
    use crate::orchestrator::OrchestratorConfig;

    fn orchestrator() -> Orchestrator {
        Orchestrator::new(Arc::new(MemoryBackend::new()), OrchestratorConfig::default())
    }

    #[tokio::test]
    async fn test_zero_interval_spawns_nothing() {
        assert!(HealthSupervisor::spawn(orchestrator(), Duration::ZERO).is_none());
    }

    #[tokio::test]
    async fn test_shutdown_stops_task() {
        let supervisor = HealthSupervisor::spawn(orchestrator(), Duration::from_millis(10)).unwrap();
        assert!(supervisor.is_running());
        tokio::time::timeout(Duration::from_secs(1), supervisor.shutdown())
            .await
            .unwrap();
    }
}
