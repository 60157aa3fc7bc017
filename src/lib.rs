//! Seedbox Core Library
//!
//! This library provides the session orchestrator for the seedbox tool,
//! which decides which torrent sessions may run on a resource-constrained
//! host, tracks their live progress, and recovers stalled transfers.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`budget`] - Advisory memory budget shared by all sessions
//! - [`clock`] - Wall-clock source, swappable in tests
//! - [`session`] - Session/file records, error log and rate estimation
//! - [`descriptor`] - Magnet/metainfo descriptors, descriptor cache, remote fetch
//! - [`backend`] - Transfer backend seam and an in-memory simulated backend
//! - [`orchestrator`] - Session table, admission control and lifecycle API
//! - [`supervisor`] - Periodic health sweep with bounded automatic restarts
//!
//! The transfer protocol itself lives behind [`backend::TransferBackend`].

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod budget;
pub mod clock;
pub mod descriptor;
pub mod orchestrator;
pub mod session;
pub mod supervisor;

// Re-export commonly used types
pub use backend::{
    BackendError, FileStats, MemoryBackend, MemoryTransfer, TransferBackend, TransferHandle,
    TransferStats,
};
pub use budget::ResourceBudget;
pub use clock::{Clock, ManualClock, SystemClock};
pub use descriptor::{
    CacheError, Descriptor, DescriptorCache, DescriptorError, FetchError,
    RemoteDescriptorFetcher,
};
pub use orchestrator::{
    AdmissionDenial, DEFAULT_MAX_CONCURRENT_SESSIONS, DEFAULT_MAX_MEMORY_BYTES, EngineHealth,
    ErrorKind, FileReport, MemoryEstimate, Orchestrator, OrchestratorConfig, OrchestratorError,
    PercentOfSize, SessionReport, SessionState, SweepReport,
};
pub use session::{
    ErrorEntry, ErrorLog, FileRecord, InfoHash, InfoHashError, RateEstimator, SessionRecord,
    SessionStatus,
};
pub use supervisor::{
    DEFAULT_HEALTH_CHECK_INTERVAL, DEFAULT_MAX_RESTARTS, HealthSupervisor, RestartDecision,
    RestartPolicy,
};
