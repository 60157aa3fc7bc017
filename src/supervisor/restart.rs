//! Bounded restart policy for stalled sessions.
//!
//! A session that has made no progress for longer than its current grace
//! period is restarted (stop, short pause, start). Each restart without
//! intervening progress lengthens the grace period geometrically, and after
//! `max_restarts` attempts the session is given up on.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use seedbox_core::supervisor::{RestartDecision, RestartPolicy};
//!
//! let policy = RestartPolicy::default();
//! assert_eq!(policy.grace(0), Duration::from_secs(120));
//! assert_eq!(policy.grace(1), Duration::from_secs(180));
//!
//! match policy.decide(3) {
//!     RestartDecision::Restart { .. } => unreachable!(),
//!     RestartDecision::GiveUp { reason } => println!("{reason}"),
//! }
//! ```

use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument};

/// Default number of automatic restarts before giving up.
pub const DEFAULT_MAX_RESTARTS: u32 = 3;

/// Default idle time before the first restart (2 minutes).
pub const DEFAULT_STALL_GRACE: Duration = Duration::from_secs(120);

/// Default growth factor of the grace period per restart.
pub const DEFAULT_BACKOFF_FACTOR: f32 = 1.5;

/// Default cap on the grace period (30 minutes).
const DEFAULT_MAX_GRACE: Duration = Duration::from_secs(30 * 60);

/// Default pause between stopping and restarting a session.
const DEFAULT_PAUSE: Duration = Duration::from_secs(1);

/// Default upper bound of the random jitter added to the pause.
const DEFAULT_MAX_JITTER: Duration = Duration::from_millis(250);

/// Decision for one stalled session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestartDecision {
    /// Restart the session.
    Restart {
        /// Which restart this is (1-indexed).
        attempt: u32,
        /// Pause between stop and start.
        pause: Duration,
    },

    /// Stop trying.
    GiveUp {
        /// Human-readable reason.
        reason: String,
    },
}

/// Grace periods and limits for automatic restarts.
///
/// # Default Values
///
/// - `stall_grace`: 120 seconds
/// - `backoff_factor`: 1.5
/// - `max_grace`: 30 minutes
/// - `max_restarts`: 3
/// - pause: 1 second plus up to 250 ms jitter
///
/// # Grace Calculation
///
/// ```text
/// grace(n) = min(stall_grace * backoff_factor^n, max_grace)
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RestartPolicy {
    stall_grace: Duration,
    backoff_factor: f32,
    max_grace: Duration,
    max_restarts: u32,
    pause: Duration,
    max_jitter: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            stall_grace: DEFAULT_STALL_GRACE,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            max_grace: DEFAULT_MAX_GRACE,
            max_restarts: DEFAULT_MAX_RESTARTS,
            pause: DEFAULT_PAUSE,
            max_jitter: DEFAULT_MAX_JITTER,
        }
    }
}

impl RestartPolicy {
    /// Creates a policy with custom grace settings and the default pause.
    ///
    /// A factor below 1.0 is raised to 1.0 so grace never shrinks.
    #[must_use]
    pub fn new(stall_grace: Duration, backoff_factor: f32, max_restarts: u32) -> Self {
        Self {
            stall_grace,
            backoff_factor: backoff_factor.max(1.0),
            max_restarts,
            ..Self::default()
        }
    }

    /// Overrides the pause between stop and start.
    #[must_use]
    pub fn with_pause(mut self, pause: Duration, max_jitter: Duration) -> Self {
        self.pause = pause;
        self.max_jitter = max_jitter;
        self
    }

    /// Overrides the grace cap.
    #[must_use]
    pub fn with_max_grace(mut self, max_grace: Duration) -> Self {
        self.max_grace = max_grace;
        self
    }

    /// Maximum automatic restarts without progress.
    #[must_use]
    pub fn max_restarts(&self) -> u32 {
        self.max_restarts
    }

    /// Idle time tolerated before restart number `restarts + 1`.
    #[must_use]
    pub fn grace(&self, restarts: u32) -> Duration {
        let exponent = i32::try_from(restarts).unwrap_or(i32::MAX);
        let scaled = self.stall_grace.as_secs_f64() * f64::from(self.backoff_factor).powi(exponent);
        let capped = scaled.min(self.max_grace.as_secs_f64());
        Duration::try_from_secs_f64(capped).unwrap_or(self.max_grace)
    }

    /// Decides what to do with a stalled session that has already been
    /// restarted `restarts` times.
    #[instrument(skip(self), fields(max_restarts = self.max_restarts))]
    pub fn decide(&self, restarts: u32) -> RestartDecision {
        if restarts >= self.max_restarts {
            debug!(restarts, "restart budget exhausted");
            return RestartDecision::GiveUp {
                reason: format!(
                    "no progress after {} automatic restarts",
                    self.max_restarts
                ),
            };
        }

        let pause = self.pause();
        debug!(
            attempt = restarts + 1,
            pause_ms = pause.as_millis(),
            "will restart"
        );
        RestartDecision::Restart {
            attempt: restarts + 1,
            pause,
        }
    }

    fn pause(&self) -> Duration {
        if self.max_jitter.is_zero() {
            return self.pause;
        }
        let max_ms = u64::try_from(self.max_jitter.as_millis()).unwrap_or(u64::MAX);
        let jitter_ms = rand::thread_rng().gen_range(0..=max_ms);
        self.pause + Duration::from_millis(jitter_ms)
    }
}
