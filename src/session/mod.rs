//! Session state: identifiers, records, and rate estimation.
//!
//! # Architecture
//!
//! - [`InfoHash`] - 20-byte content identifier, hex encoded for display
//! - [`SessionRecord`] / [`FileRecord`] - Snapshot rebuilt on each refresh
//! - [`ErrorLog`] - Bounded ring of recent errors
//! - [`RateEstimator`] - Percent, throughput and health classification

mod estimator;
mod id;
mod record;

pub use estimator::{
    DEFAULT_SLOW_RATIO, DEFAULT_STALL_AFTER, RateEstimator, percent, rate_between,
};
pub use id::{INFO_HASH_LEN, InfoHash, InfoHashError};
pub use record::{
    DEFAULT_FILE_PRIORITY, ERROR_LOG_CAPACITY, ErrorEntry, ErrorLog, FileRecord, SessionRecord,
    SessionStatus,
};
