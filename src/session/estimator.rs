//! Rate estimation and health classification.
//!
//! Each refresh feeds the newest backend statistics into
//! [`RateEstimator::recompute`], which derives completion percentage,
//! instantaneous throughput and a [`SessionStatus`] from the difference
//! between the previous snapshot and the new one.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use super::{FileRecord, SessionRecord, SessionStatus};
use crate::backend::{FileStats, TransferStats};

/// Default window without progress before a session counts as stalled.
pub const DEFAULT_STALL_AFTER: Duration = Duration::seconds(60);

/// Default ratio below which a throughput drop counts as slow.
pub const DEFAULT_SLOW_RATIO: f64 = 0.7;

/// Progress between refreshes that is worth an info-level log line (1 MiB).
const PROGRESS_LOG_THRESHOLD: u64 = 1024 * 1024;

/// Metadata progress shown before any peer is connected.
const METADATA_PERCENT_NO_PEERS: f64 = 1.0;

/// Metadata progress shown once peers are connected.
const METADATA_PERCENT_WITH_PEERS: f64 = 50.0;

/// Metadata progress once metadata is loaded.
const METADATA_PERCENT_LOADED: f64 = 100.0;

/// Completion percentage truncated to two decimals, clamped to 0-100.
///
/// Returns 0 when `total` is 0.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn percent(done: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let ratio = done as f64 / total as f64;
    ((10_000.0 * ratio).trunc() / 100.0).clamp(0.0, 100.0)
}

/// Bytes per second between two byte counts over `elapsed`.
///
/// Returns `None` when the interval is empty or negative.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn rate_between(previous: u64, current: u64, elapsed: Duration) -> Option<f64> {
    let millis = elapsed.num_milliseconds();
    if millis <= 0 {
        return None;
    }
    let delta = i128::from(current) - i128::from(previous);
    Some(delta as f64 * 1000.0 / millis as f64)
}

/// Derives percent, rate and status from successive snapshots.
#[derive(Debug, Clone)]
pub struct RateEstimator {
    stall_after: Duration,
    slow_ratio: f64,
}

impl Default for RateEstimator {
    fn default() -> Self {
        Self {
            stall_after: DEFAULT_STALL_AFTER,
            slow_ratio: DEFAULT_SLOW_RATIO,
        }
    }
}

impl RateEstimator {
    /// Creates an estimator with custom thresholds.
    #[must_use]
    pub fn new(stall_after: Duration, slow_ratio: f64) -> Self {
        Self {
            stall_after,
            slow_ratio,
        }
    }

    /// Window without progress before a session counts as stalled.
    #[must_use]
    pub fn stall_after(&self) -> Duration {
        self.stall_after
    }

    /// Folds new backend statistics into `record`.
    pub fn recompute(&self, record: &mut SessionRecord, stats: &TransferStats, now: DateTime<Utc>) {
        if !stats.name.is_empty() {
            record.name.clone_from(&stats.name);
        }
        record.peers_connected = stats.active_peers;
        record.peers_total = stats.total_peers;

        if !record.metadata_loaded {
            if stats.metadata_ready {
                record.metadata_loaded = true;
                record.metadata_percent = METADATA_PERCENT_LOADED;
                info!(id = %record.id, name = %record.name, "metadata loaded");
            } else if stats.active_peers > 0 {
                record.metadata_percent = METADATA_PERCENT_WITH_PEERS;
            } else {
                record.metadata_percent = METADATA_PERCENT_NO_PEERS;
            }
        }

        if stats.metadata_ready {
            self.recompute_loaded(record, stats, now);
        }
    }

    fn recompute_loaded(&self, record: &mut SessionRecord, stats: &TransferStats, now: DateTime<Utc>) {
        let previous_bytes = record.downloaded_bytes;
        let previous_rate = record.download_rate_bps;
        let elapsed = record.updated_at.map(|at| now - at);
        let bytes = stats.bytes_completed;

        record.total_size = stats.total_size;
        merge_files(record, &stats.files, elapsed);
        record.percent_complete = percent(bytes, record.total_size);

        if let Some(elapsed) = elapsed {
            if let Some(rate) = rate_between(previous_bytes, bytes, elapsed)
                && rate >= 0.0
            {
                record.download_rate_bps = rate;
            }

            if bytes > previous_bytes {
                record.last_progress_at = Some(now);
                record.restart_count = 0;
                if record.download_rate_bps > previous_rate {
                    record.status = SessionStatus::Healthy;
                } else if record.download_rate_bps < previous_rate * self.slow_ratio {
                    record.status = SessionStatus::Slow;
                }
            } else {
                let last_progress = record.last_progress_at.unwrap_or(now - elapsed);
                let idle = now - last_progress;
                // Errored stays until progress resumes
                if idle > self.stall_after
                    && record.percent_complete < 100.0
                    && record.status != SessionStatus::Errored
                {
                    record.status = SessionStatus::Stalled;
                    warn!(
                        id = %record.id,
                        name = %record.name,
                        idle_secs = idle.num_seconds(),
                        "session appears stalled"
                    );
                    record.add_error(
                        now,
                        format!("Download stalled - no progress for {}s", idle.num_seconds()),
                    );
                }
            }
        } else {
            record.last_progress_at = Some(now);
            record.status = SessionStatus::Healthy;
        }

        if record.total_size > 0
            && record.percent_complete < 100.0
            && bytes.saturating_sub(previous_bytes) > PROGRESS_LOG_THRESHOLD
        {
            info!(
                id = %record.id,
                name = %record.name,
                downloaded = bytes,
                total = record.total_size,
                percent = record.percent_complete,
                rate_bps = record.download_rate_bps,
                "session progress"
            );
        }

        debug!(
            id = %record.id,
            downloaded = bytes,
            percent = record.percent_complete,
            rate_bps = record.download_rate_bps,
            status = %record.status,
            "session recomputed"
        );

        record.downloaded_bytes = bytes;
        record.updated_at = Some(now);
    }
}

/// Merges per-file statistics into the record's file list.
///
/// The list is allocated on the first non-empty report and afterwards only
/// updated in place, so it never shrinks or reorders.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
fn merge_files(record: &mut SessionRecord, files: &[FileStats], elapsed: Option<Duration>) {
    if record.files.is_empty() && !files.is_empty() {
        record.files = files
            .iter()
            .map(|stat| {
                let mut file = FileRecord::new(stat.path.clone());
                file.started = record.started;
                file
            })
            .collect();
    }

    for (file, stat) in record.files.iter_mut().zip(files) {
        let previous_bytes = file.downloaded_bytes();
        file.size = stat.length;
        file.chunk_count = stat.chunks;
        file.completed_chunks = stat.completed_chunks;
        file.percent_complete = percent(stat.completed_chunks, stat.chunks);

        match elapsed {
            None => file.bytes_per_second = 0,
            Some(elapsed) => {
                if let Some(rate) = rate_between(previous_bytes, file.downloaded_bytes(), elapsed)
                    && rate >= 0.0
                {
                    file.bytes_per_second = rate as u64;
                }
            }
        }
    }
}
