//! Orchestrator configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::supervisor::{
    DEFAULT_BACKOFF_FACTOR, DEFAULT_HEALTH_CHECK_INTERVAL, DEFAULT_MAX_RESTARTS,
    DEFAULT_STALL_GRACE, RestartPolicy,
};

/// Default memory ceiling (2 GiB).
pub const DEFAULT_MAX_MEMORY_BYTES: u64 = 2 * 1024 * 1024 * 1024;

/// Default concurrency ceiling.
pub const DEFAULT_MAX_CONCURRENT_SESSIONS: usize = 5;

/// Default bound on a single backend call.
pub const DEFAULT_BACKEND_TIMEOUT: Duration = Duration::from_secs(30);

/// Default pause between stop and start during an automatic restart.
const DEFAULT_RESTART_PAUSE_MS: u64 = 1000;

/// Jitter added to a non-zero restart pause.
const RESTART_PAUSE_JITTER: Duration = Duration::from_millis(250);

/// Admission limits, restart behavior and timing knobs.
///
/// Every field has a default, so a partial TOML table is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OrchestratorConfig {
    /// Memory ceiling in bytes (0 = unlimited).
    pub max_memory_bytes: u64,
    /// Maximum sessions running at once (0 = unlimited).
    pub max_concurrent_sessions: usize,
    /// Start sessions automatically once their metadata is available.
    pub auto_start: bool,
    /// Restart stalled sessions automatically.
    pub enable_auto_retry: bool,
    /// Automatic restarts without progress before a session is given up on.
    pub max_restarts: u32,
    /// Growth factor of the stall grace period per restart.
    pub retry_backoff_factor: f32,
    /// Idle seconds before the first automatic restart.
    pub stall_grace_secs: u64,
    /// Pause between stop and start of an automatic restart, in milliseconds.
    pub restart_pause_ms: u64,
    /// Seconds between health sweeps (0 = disabled).
    pub health_check_interval_secs: u64,
    /// Seconds before a backend call is abandoned.
    pub backend_timeout_secs: u64,
    /// Directory for cached metainfo descriptors; caching is off when unset.
    pub cache_dir: Option<PathBuf>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_memory_bytes: DEFAULT_MAX_MEMORY_BYTES,
            max_concurrent_sessions: DEFAULT_MAX_CONCURRENT_SESSIONS,
            auto_start: true,
            enable_auto_retry: true,
            max_restarts: DEFAULT_MAX_RESTARTS,
            retry_backoff_factor: DEFAULT_BACKOFF_FACTOR,
            stall_grace_secs: DEFAULT_STALL_GRACE.as_secs(),
            restart_pause_ms: DEFAULT_RESTART_PAUSE_MS,
            health_check_interval_secs: DEFAULT_HEALTH_CHECK_INTERVAL.as_secs(),
            backend_timeout_secs: DEFAULT_BACKEND_TIMEOUT.as_secs(),
            cache_dir: None,
        }
    }
}

impl OrchestratorConfig {
    /// Restart policy described by this configuration.
    #[must_use]
    pub fn restart_policy(&self) -> RestartPolicy {
        let pause = Duration::from_millis(self.restart_pause_ms);
        let jitter = if pause.is_zero() {
            Duration::ZERO
        } else {
            RESTART_PAUSE_JITTER
        };
        RestartPolicy::new(
            Duration::from_secs(self.stall_grace_secs),
            self.retry_backoff_factor,
            self.max_restarts,
        )
        .with_pause(pause, jitter)
    }

    /// Interval between health sweeps; zero disables the supervisor.
    #[must_use]
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    /// Bound on a single backend call.
    #[must_use]
    pub fn backend_timeout(&self) -> Duration {
        Duration::from_secs(self.backend_timeout_secs)
    }
}
