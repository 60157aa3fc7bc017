//! Session and file records plus the bounded per-session error log.

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::InfoHash;

/// Maximum number of entries kept in a session's error log.
pub const ERROR_LOG_CAPACITY: usize = 10;

/// How long an error counts as "recent" for health reporting.
const RECENT_ERROR_WINDOW_SECS: i64 = 5 * 60;

/// Default priority assigned to newly discovered files.
pub const DEFAULT_FILE_PRIORITY: i32 = 1;

/// Health classification of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// No classification has been made yet.
    #[default]
    Unknown,
    /// Progressing, with throughput holding or rising.
    Healthy,
    /// Progressing, but throughput dropped sharply.
    Slow,
    /// No progress for longer than the stall window.
    Stalled,
    /// Automatic recovery gave up on this session.
    Errored,
}

impl SessionStatus {
    /// Returns the stable string label.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Healthy => "healthy",
            Self::Slow => "slow",
            Self::Stalled => "stalled",
            Self::Errored => "errored",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One timestamped entry in a session's error log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    /// When the error was recorded.
    pub time: DateTime<Utc>,
    /// Human-readable description.
    pub message: String,
}

/// Ring of the most recent errors for a session, oldest evicted first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorLog {
    entries: VecDeque<ErrorEntry>,
}

impl ErrorLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry, evicting the oldest one when full.
    pub fn push(&mut self, time: DateTime<Utc>, message: impl Into<String>) {
        if self.entries.len() >= ERROR_LOG_CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back(ErrorEntry {
            time,
            message: message.into(),
        });
    }

    /// Number of entries currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no error has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates entries oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &ErrorEntry> {
        self.entries.iter()
    }

    /// Returns the newest entry.
    #[must_use]
    pub fn latest(&self) -> Option<&ErrorEntry> {
        self.entries.back()
    }

    /// Returns true iff the newest entry is younger than five minutes.
    #[must_use]
    pub fn has_recent_error(&self, now: DateTime<Utc>) -> bool {
        self.latest()
            .is_some_and(|entry| now - entry.time < Duration::seconds(RECENT_ERROR_WINDOW_SECS))
    }
}

/// State of one file within a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    /// Path relative to the session root; unique within the session.
    pub path: String,
    /// File length in bytes.
    pub size: u64,
    /// Number of chunks spanning this file.
    pub chunk_count: u64,
    /// Number of those chunks that are complete.
    pub completed_chunks: u64,
    /// Completed chunks as a percentage (two decimals).
    pub percent_complete: f64,
    /// Whether the file has been enabled for download.
    pub started: bool,
    /// Download priority, higher is more important.
    pub priority: i32,
    /// Number of retry attempts for this file.
    pub retry_count: u32,
    /// Current per-file throughput.
    pub bytes_per_second: u64,
    /// Last error seen for this file.
    pub last_error: Option<String>,
}

impl FileRecord {
    /// Creates a record for a newly discovered file.
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            size: 0,
            chunk_count: 0,
            completed_chunks: 0,
            percent_complete: 0.0,
            started: false,
            priority: DEFAULT_FILE_PRIORITY,
            retry_count: 0,
            bytes_per_second: 0,
            last_error: None,
        }
    }

    /// Bytes of this file considered downloaded, derived from chunk completion.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss
    )]
    pub fn downloaded_bytes(&self) -> u64 {
        (self.size as f64 * self.percent_complete / 100.0) as u64
    }
}

/// Snapshot of one session, rebuilt from backend statistics on each refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    /// Content identifier; unique key in the session table.
    pub id: InfoHash,
    /// Display name, empty until the backend reports one.
    pub name: String,
    /// Total size in bytes, zero until metadata resolves.
    pub total_size: u64,
    /// Bytes completed as of the last refresh.
    pub downloaded_bytes: u64,
    /// Completion percentage (0-100, truncated to two decimals).
    pub percent_complete: f64,
    /// Instantaneous throughput in bytes per second.
    pub download_rate_bps: f64,
    /// Whether admission succeeded and the backend was told to run.
    pub started: bool,
    /// Health classification.
    pub status: SessionStatus,
    /// When the session was first observed.
    pub added_at: DateTime<Utc>,
    /// When the downloaded byte count last increased.
    pub last_progress_at: Option<DateTime<Utc>>,
    /// When byte statistics were last taken.
    pub updated_at: Option<DateTime<Utc>>,
    /// Whether the backend has resolved the metadata.
    pub metadata_loaded: bool,
    /// Coarse metadata progress: 1 without peers, 50 with peers, 100 when loaded.
    pub metadata_percent: f64,
    /// Currently connected peers.
    pub peers_connected: u32,
    /// Known peers.
    pub peers_total: u32,
    /// Automatic restarts since progress was last observed.
    pub restart_count: u32,
    /// Bounded error log.
    pub errors: ErrorLog,
    /// Files in backend order, allocated once metadata resolves.
    pub files: Vec<FileRecord>,
}

impl SessionRecord {
    /// Creates an empty record for a newly observed session.
    #[must_use]
    pub fn new(id: InfoHash, added_at: DateTime<Utc>) -> Self {
        Self {
            id,
            name: String::new(),
            total_size: 0,
            downloaded_bytes: 0,
            percent_complete: 0.0,
            download_rate_bps: 0.0,
            started: false,
            status: SessionStatus::Unknown,
            added_at,
            last_progress_at: None,
            updated_at: None,
            metadata_loaded: false,
            metadata_percent: 0.0,
            peers_connected: 0,
            peers_total: 0,
            restart_count: 0,
            errors: ErrorLog::new(),
            files: Vec::new(),
        }
    }

    /// Appends an entry to the error log.
    pub fn add_error(&mut self, time: DateTime<Utc>, message: impl Into<String>) {
        self.errors.push(time, message);
    }

    /// Returns true iff the newest error is younger than five minutes.
    #[must_use]
    pub fn has_recent_error(&self, now: DateTime<Utc>) -> bool {
        self.errors.has_recent_error(now)
    }

    /// Finds a file by its relative path.
    #[must_use]
    pub fn file(&self, path: &str) -> Option<&FileRecord> {
        self.files.iter().find(|file| file.path == path)
    }

    /// Returns true once every byte is accounted for.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.percent_complete >= 100.0
    }

    /// Marks every known file as started or not.
    pub(crate) fn set_files_started(&mut self, started: bool) {
        for file in &mut self.files {
            file.started = started;
        }
    }
}
