//! Serializable views of orchestrator state for presentation layers.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::session::{ErrorEntry, FileRecord, InfoHash, SessionRecord, SessionStatus};

/// One file as shown to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileReport {
    /// Path relative to the session root.
    pub path: String,
    /// File length in bytes.
    pub size: u64,
    /// Bytes downloaded (`size * percent / 100`).
    pub downloaded: u64,
    /// Completion percentage.
    pub percent: f64,
    /// Download priority.
    pub priority: i32,
    /// Current throughput.
    pub bytes_per_sec: u64,
    /// Whether the file is enabled for download.
    pub started: bool,
}

impl From<&FileRecord> for FileReport {
    fn from(file: &FileRecord) -> Self {
        Self {
            path: file.path.clone(),
            size: file.size,
            downloaded: file.downloaded_bytes(),
            percent: file.percent_complete,
            priority: file.priority,
            bytes_per_sec: file.bytes_per_second,
            started: file.started,
        }
    }
}

/// One session as shown to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionReport {
    /// Content identifier.
    #[serde(rename = "infoHash")]
    pub id: InfoHash,
    /// Display name.
    pub name: String,
    /// Health classification.
    pub status: SessionStatus,
    /// Whether the session is running.
    pub started: bool,
    /// Total size in bytes.
    pub size: u64,
    /// Bytes downloaded.
    pub downloaded: u64,
    /// Throughput in bytes per second.
    pub download_rate: f64,
    /// Completion percentage.
    pub percent: f64,
    /// Files in backend order.
    pub files: Vec<FileReport>,
    /// Recent errors, oldest first.
    pub errors: Vec<ErrorEntry>,
    /// Newest error is less than five minutes old.
    pub has_recent_error: bool,
    /// Connected peers.
    pub peers_connected: u32,
    /// Known peers.
    pub peers_total: u32,
    /// Coarse metadata progress.
    pub metadata_percent: f64,
    /// Automatic restarts since the last progress.
    pub restart_count: u32,
    /// When the session was added.
    pub time_added: DateTime<Utc>,
    /// When statistics were last taken.
    pub time_updated: Option<DateTime<Utc>>,
    /// When progress was last observed.
    pub last_progress: Option<DateTime<Utc>>,
}

impl SessionReport {
    /// Builds the view of `record` as of `now`.
    #[must_use]
    pub fn new(record: &SessionRecord, now: DateTime<Utc>) -> Self {
        Self {
            id: record.id,
            name: record.name.clone(),
            status: record.status,
            started: record.started,
            size: record.total_size,
            downloaded: record.downloaded_bytes,
            download_rate: record.download_rate_bps,
            percent: record.percent_complete,
            files: record.files.iter().map(FileReport::from).collect(),
            errors: record.errors.iter().cloned().collect(),
            has_recent_error: record.has_recent_error(now),
            peers_connected: record.peers_connected,
            peers_total: record.peers_total,
            metadata_percent: record.metadata_percent,
            restart_count: record.restart_count,
            time_added: record.added_at,
            time_updated: record.updated_at,
            last_progress: record.last_progress_at,
        }
    }
}

/// Engine-wide health summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineHealth {
    /// Sessions in the table.
    pub sessions: usize,
    /// Sessions currently running.
    pub active_sessions: usize,
    /// Reserved memory estimate in bytes.
    pub memory_usage: u64,
    /// Memory ceiling in bytes (0 = unlimited).
    pub memory_ceiling: u64,
    /// Seconds since the orchestrator was created.
    pub uptime_secs: u64,
}
