//! Error types for orchestrator operations.

use std::fmt;

use thiserror::Error;

use crate::backend::BackendError;
use crate::descriptor::DescriptorError;
use crate::session::InfoHash;

/// Requested state that conflicts with the session's current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Session or file is already running.
    AlreadyStarted,
    /// Session is already stopped.
    AlreadyStopped,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyStarted => write!(f, "already started"),
            Self::AlreadyStopped => write!(f, "already stopped"),
        }
    }
}

/// Why admission control refused to start a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionDenial {
    /// The concurrency ceiling is reached.
    ConcurrencyLimit {
        /// Sessions currently running.
        active: usize,
        /// Configured ceiling.
        limit: usize,
    },
    /// Reserving the estimate would reach the memory ceiling.
    MemoryLimit {
        /// Bytes already reserved.
        used: u64,
        /// Estimate for the session being started.
        estimate: u64,
        /// Configured ceiling.
        ceiling: u64,
    },
}

impl fmt::Display for AdmissionDenial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConcurrencyLimit { active, limit } => {
                write!(f, "maximum concurrent sessions reached ({active}/{limit})")
            }
            Self::MemoryLimit {
                used,
                estimate,
                ceiling,
            } => write!(
                f,
                "memory limit reached ({used} bytes used + {estimate} estimated >= {ceiling})"
            ),
        }
    }
}

/// Coarse classification of [`OrchestratorError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unknown session or file.
    NotFound,
    /// Operation conflicts with current state.
    InvalidState,
    /// Admission control refused the start.
    AdmissionDenied,
    /// Operation is not available.
    Unsupported,
    /// Transfer backend failed or timed out.
    Backend,
    /// Descriptor could not be validated.
    InvalidDescriptor,
}

/// Errors returned by [`Orchestrator`](super::Orchestrator) operations.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// No session with this id.
    #[error("session not found: {id}\n  Suggestion: The session may have been deleted; refresh to list current sessions")]
    NotFound {
        /// Requested id.
        id: InfoHash,
    },

    /// The session has no file with this path.
    #[error("file '{path}' not found in session {id}\n  Suggestion: File lists are only known once metadata has loaded")]
    FileNotFound {
        /// Session id.
        id: InfoHash,
        /// Requested path.
        path: String,
    },

    /// The session is already in the requested state.
    #[error("session {id} is {state}")]
    InvalidState {
        /// Session id.
        id: InfoHash,
        /// Conflicting state.
        state: SessionState,
    },

    /// Admission control refused the start.
    #[error("cannot start session {id}: {reason}\n  Suggestion: Stop another session or raise the configured limit")]
    AdmissionDenied {
        /// Session id.
        id: InfoHash,
        /// Limiting factor.
        reason: AdmissionDenial,
    },

    /// The operation is not supported.
    #[error("{operation} is not supported")]
    Unsupported {
        /// Operation name.
        operation: &'static str,
    },

    /// The transfer backend failed.
    #[error("backend error{}: {source}", .id.as_ref().map(|id| format!(" for session {id}")).unwrap_or_default())]
    Backend {
        /// Session id, when the failure concerns a known session.
        id: Option<InfoHash>,
        /// Underlying backend error.
        #[source]
        source: BackendError,
    },

    /// The descriptor is invalid.
    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(#[from] DescriptorError),
}

impl OrchestratorError {
    /// Returns the coarse error kind.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } | Self::FileNotFound { .. } => ErrorKind::NotFound,
            Self::InvalidState { .. } => ErrorKind::InvalidState,
            Self::AdmissionDenied { .. } => ErrorKind::AdmissionDenied,
            Self::Unsupported { .. } => ErrorKind::Unsupported,
            Self::Backend {
                source: BackendError::InvalidDescriptor { .. },
                ..
            }
            | Self::InvalidDescriptor(_) => ErrorKind::InvalidDescriptor,
            Self::Backend { .. } => ErrorKind::Backend,
        }
    }

    pub(crate) fn backend(id: impl Into<Option<InfoHash>>, source: BackendError) -> Self {
        Self::Backend {
            id: id.into(),
            source,
        }
    }
}
