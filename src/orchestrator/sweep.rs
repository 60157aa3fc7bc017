//! Health sweep: finds stalled sessions and restarts them within the
//! configured restart budget.
//!
//! Candidates are collected under the table lock, then each one is restarted
//! through the public [`Orchestrator::stop`] / [`Orchestrator::start`] calls
//! with the lock released.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, instrument, warn};

use super::{Orchestrator, OrchestratorError, SessionEntry};
use crate::session::{InfoHash, SessionStatus};
use crate::supervisor::{RestartDecision, RestartPolicy};

/// Outcome of one health sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    /// Sessions found idle past their grace period.
    pub stalled: Vec<InfoHash>,
    /// Sessions stopped and started again.
    pub restarted: Vec<InfoHash>,
    /// Sessions marked errored because the restart budget is spent.
    pub gave_up: Vec<InfoHash>,
    /// Sessions whose restart failed.
    pub failed: Vec<InfoHash>,
}

impl SweepReport {
    /// Returns true if the sweep found nothing to do.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stalled.is_empty()
    }
}

/// A stalled session picked under the lock.
#[derive(Debug)]
struct Candidate {
    id: InfoHash,
    name: String,
    restarts: u32,
    idle: chrono::Duration,
}

/// Returns how long `entry` has been idle if it qualifies for a restart.
///
/// Idle time runs from the later of the last observed progress and the last
/// start, so a fresh restart gets a full grace period.
fn stall_candidate(
    entry: &SessionEntry,
    policy: &RestartPolicy,
    now: DateTime<Utc>,
) -> Option<chrono::Duration> {
    let record = &entry.record;
    if !record.started
        || record.status == SessionStatus::Errored
        || record.download_rate_bps > 0.0
        || record.is_complete()
    {
        return None;
    }

    let since = match (record.last_progress_at, entry.started_at) {
        (Some(progress), Some(started)) => progress.max(started),
        (Some(at), None) | (None, Some(at)) => at,
        (None, None) => record.updated_at?,
    };
    let idle = now - since;
    let grace = chrono::Duration::from_std(policy.grace(record.restart_count)).ok()?;
    (idle > grace).then_some(idle)
}

impl Orchestrator {
    /// Restarts sessions that are running but idle past their grace period.
    ///
    /// With automatic retry disabled, stalled sessions are only reported.
    #[instrument(skip(self))]
    pub async fn health_sweep(&self) -> SweepReport {
        let now = self.now();
        let (candidates, policy, auto_retry) = {
            let table = self.inner.table.lock().await;
            let candidates: Vec<Candidate> = table
                .entries
                .values()
                .filter_map(|entry| {
                    stall_candidate(entry, &table.restart_policy, now).map(|idle| Candidate {
                        id: entry.record.id,
                        name: entry.record.name.clone(),
                        restarts: entry.record.restart_count,
                        idle,
                    })
                })
                .collect();
            (candidates, table.restart_policy.clone(), table.auto_retry)
        };

        let mut report = SweepReport::default();
        for candidate in candidates {
            report.stalled.push(candidate.id);
            if !auto_retry {
                warn!(
                    id = %candidate.id,
                    name = %candidate.name,
                    idle_secs = candidate.idle.num_seconds(),
                    "session stalled; automatic restart disabled"
                );
                continue;
            }

            match policy.decide(candidate.restarts) {
                RestartDecision::GiveUp { reason } => {
                    warn!(id = %candidate.id, name = %candidate.name, %reason, "giving up on stalled session");
                    self.mark_errored(&candidate.id, &reason).await;
                    report.gave_up.push(candidate.id);
                }
                RestartDecision::Restart { attempt, pause } => {
                    warn!(
                        id = %candidate.id,
                        name = %candidate.name,
                        idle_secs = candidate.idle.num_seconds(),
                        attempt,
                        "session appears stalled, restarting"
                    );
                    match self.restart(&candidate.id, pause).await {
                        Ok(()) => {
                            self.note_restart(&candidate, attempt, policy.max_restarts())
                                .await;
                            report.restarted.push(candidate.id);
                        }
                        Err(e) => {
                            warn!(id = %candidate.id, error = %e, "automatic restart failed");
                            self.record_error(&candidate.id, format!("automatic restart failed: {e}"))
                                .await;
                            report.failed.push(candidate.id);
                        }
                    }
                }
            }
        }

        if !report.is_empty() {
            info!(
                stalled = report.stalled.len(),
                restarted = report.restarted.len(),
                gave_up = report.gave_up.len(),
                failed = report.failed.len(),
                "health sweep finished"
            );
        }
        report
    }

    async fn restart(&self, id: &InfoHash, pause: Duration) -> Result<(), OrchestratorError> {
        self.stop(id).await?;
        if !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }
        self.start(id).await
    }

    async fn note_restart(&self, candidate: &Candidate, attempt: u32, max_restarts: u32) {
        let now = self.now();
        let mut table = self.inner.table.lock().await;
        if let Some(entry) = table.entries.get_mut(&candidate.id) {
            entry.record.restart_count = attempt;
            entry.record.add_error(
                now,
                format!(
                    "Restarted after {}s without progress (attempt {attempt}/{max_restarts})",
                    candidate.idle.num_seconds()
                ),
            );
        }
    }

    async fn mark_errored(&self, id: &InfoHash, reason: &str) {
        let now = self.now();
        let mut table = self.inner.table.lock().await;
        if let Some(entry) = table.entries.get_mut(id) {
            entry.record.status = SessionStatus::Errored;
            entry.record.add_error(now, format!("Giving up: {reason}"));
        }
    }
}
