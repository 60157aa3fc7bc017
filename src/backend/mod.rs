//! Transfer backend seam.
//!
//! The transfer protocol (peer discovery, piece selection, wire I/O) is
//! provided by an external engine. The orchestrator only talks to it through
//! the [`TransferBackend`] and [`TransferHandle`] traits defined here.
//!
//! # Architecture
//!
//! - [`TransferBackend`] - Adds descriptors and enumerates live transfers
//! - [`TransferHandle`] - One live transfer: stats, start, discard, metadata signal
//! - [`TransferStats`] / [`FileStats`] - Raw statistics pulled on each refresh
//! - [`MemoryBackend`] - Scripted in-memory backend for tests and simulation

mod memory;

pub use memory::{DEFAULT_PIECE_LENGTH, MemoryBackend, MemoryTransfer};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::descriptor::Descriptor;
use crate::session::InfoHash;

/// Errors reported by a transfer backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The backend could not interpret the descriptor.
    #[error("backend rejected descriptor: {reason}")]
    InvalidDescriptor {
        /// Why the descriptor was rejected.
        reason: String,
    },

    /// A backend call did not complete in time.
    #[error("backend {operation} timed out after {}s", .after.as_secs())]
    Timeout {
        /// The operation that timed out.
        operation: &'static str,
        /// The timeout that elapsed.
        after: Duration,
    },

    /// Any other backend failure.
    #[error("backend failure: {message}")]
    Failed {
        /// Backend-provided description.
        message: String,
    },
}

impl BackendError {
    /// Creates a generic failure.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }
}

/// Raw per-file statistics.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileStats {
    /// Path relative to the session root.
    pub path: String,
    /// File length in bytes.
    pub length: u64,
    /// Chunks spanning the file.
    pub chunks: u64,
    /// Chunks that are complete.
    pub completed_chunks: u64,
}

/// Raw session statistics as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TransferStats {
    /// Display name (may be known from the descriptor before metadata).
    pub name: String,
    /// Bytes completed and verified.
    pub bytes_completed: u64,
    /// Total size; zero until metadata resolves.
    pub total_size: u64,
    /// Peers with an active connection.
    pub active_peers: u32,
    /// Peers known to the backend.
    pub total_peers: u32,
    /// Files in declared order; empty until metadata resolves.
    pub files: Vec<FileStats>,
    /// Whether the metadata (size and file list) is available.
    pub metadata_ready: bool,
}

/// A live transfer owned by the backend.
#[async_trait]
pub trait TransferHandle: Send + Sync + fmt::Debug {
    /// Content identifier of the transfer.
    fn info_hash(&self) -> InfoHash;

    /// Descriptor that re-adds this transfer after it was discarded.
    fn descriptor(&self) -> Descriptor;

    /// Current raw statistics.
    fn stats(&self) -> TransferStats;

    /// Begins transferring every file.
    async fn start(&self) -> Result<(), BackendError>;

    /// Begins transferring a single file.
    async fn start_file(&self, path: &str) -> Result<(), BackendError>;

    /// Drops all in-flight state; the transfer must be re-added to resume.
    async fn discard(&self);

    /// Resolves once metadata is available.
    async fn metadata_ready(&self);
}

/// The transfer engine.
#[async_trait]
pub trait TransferBackend: Send + Sync + fmt::Debug {
    /// Adds a transfer, returning the existing handle if it is already live.
    async fn add(&self, descriptor: &Descriptor) -> Result<Arc<dyn TransferHandle>, BackendError>;

    /// Enumerates live transfers.
    async fn sessions(&self) -> Vec<Arc<dyn TransferHandle>>;

    /// Looks up a live transfer by id.
    async fn lookup(&self, id: &InfoHash) -> Option<Arc<dyn TransferHandle>>;
}
