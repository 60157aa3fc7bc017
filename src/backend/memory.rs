//! Scripted in-memory transfer backend.
//!
//! [`MemoryBackend`] keeps every transfer in process memory and moves only
//! when told to: metadata resolves on [`MemoryTransfer::resolve_metadata`],
//! bytes arrive through [`MemoryTransfer::advance`] or
//! [`MemoryTransfer::set_bytes_completed`]. Failures can be injected for the
//! next `add` or `start` call, and `start` can be made to hang so callers'
//! timeouts can be exercised.
//!
//! Files are laid out back to back in declared order and pieces complete
//! sequentially, so per-file chunk counts follow directly from the byte total.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, instrument};

use super::{BackendError, FileStats, TransferBackend, TransferHandle, TransferStats};
use crate::descriptor::Descriptor;
use crate::session::InfoHash;

/// Piece length used when metadata does not name one (256 KiB).
pub const DEFAULT_PIECE_LENGTH: u64 = 256 * 1024;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct BackendState {
    transfers: HashMap<InfoHash, Arc<MemoryTransfer>>,
    fail_next_add: Option<BackendError>,
    add_calls: usize,
}

/// In-memory [`TransferBackend`].
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<BackendState>>,
}

impl MemoryBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the concrete transfer for `id`, discarded or not.
    #[must_use]
    pub fn transfer(&self, id: &InfoHash) -> Option<Arc<MemoryTransfer>> {
        lock(&self.state).transfers.get(id).cloned()
    }

    /// Makes the next `add` call fail with `error`.
    pub fn fail_next_add(&self, error: BackendError) {
        lock(&self.state).fail_next_add = Some(error);
    }

    /// Number of `add` calls received, including failed ones.
    #[must_use]
    pub fn add_calls(&self) -> usize {
        lock(&self.state).add_calls
    }

    /// Registers a transfer directly, as if another client had added it.
    pub fn inject(&self, descriptor: &Descriptor) -> Arc<MemoryTransfer> {
        let mut state = lock(&self.state);
        Self::upsert(&mut state, descriptor)
    }

    fn upsert(state: &mut BackendState, descriptor: &Descriptor) -> Arc<MemoryTransfer> {
        let id = descriptor.info_hash();

        if let Some(existing) = state.transfers.get(&id) {
            existing.revive();
            return Arc::clone(existing);
        }

        let transfer = Arc::new(MemoryTransfer::new(id, descriptor.clone()));
        state.transfers.insert(id, Arc::clone(&transfer));
        transfer
    }
}

#[async_trait]
impl TransferBackend for MemoryBackend {
    #[instrument(skip(self), fields(descriptor = ?descriptor))]
    async fn add(&self, descriptor: &Descriptor) -> Result<Arc<dyn TransferHandle>, BackendError> {
        let mut state = lock(&self.state);
        state.add_calls += 1;
        if let Some(error) = state.fail_next_add.take() {
            debug!(error = %error, "injected add failure");
            return Err(error);
        }
        let transfer: Arc<dyn TransferHandle> = Self::upsert(&mut state, descriptor);
        Ok(transfer)
    }

    async fn sessions(&self) -> Vec<Arc<dyn TransferHandle>> {
        lock(&self.state)
            .transfers
            .values()
            .filter(|t| !t.is_discarded())
            .map(|t| Arc::clone(t) as Arc<dyn TransferHandle>)
            .collect()
    }

    async fn lookup(&self, id: &InfoHash) -> Option<Arc<dyn TransferHandle>> {
        lock(&self.state)
            .transfers
            .get(id)
            .filter(|t| !t.is_discarded())
            .map(|t| Arc::clone(t) as Arc<dyn TransferHandle>)
    }
}

#[derive(Debug, Default)]
struct TransferState {
    name: String,
    files: Vec<(String, u64)>,
    piece_length: u64,
    bytes_completed: u64,
    active_peers: u32,
    total_peers: u32,
    running: bool,
    discarded: bool,
    start_calls: u32,
    discard_calls: u32,
    started_files: Vec<String>,
    fail_next_start: Option<BackendError>,
    hang_on_start: bool,
}

impl TransferState {
    fn total_size(&self) -> u64 {
        self.files.iter().map(|(_, len)| len).sum()
    }

    fn file_stats(&self) -> Vec<FileStats> {
        let piece = self.piece_length.max(1);
        let total = self.total_size();
        let complete_pieces = if total > 0 && self.bytes_completed >= total {
            u64::MAX
        } else {
            self.bytes_completed / piece
        };

        let mut offset = 0u64;
        self.files
            .iter()
            .map(|(path, length)| {
                let (chunks, completed_chunks) = if *length == 0 {
                    (0, 0)
                } else {
                    let first = offset / piece;
                    let last = (offset + length - 1) / piece;
                    let done = complete_pieces.min(last + 1).saturating_sub(first);
                    (last - first + 1, done)
                };
                offset += length;
                FileStats {
                    path: path.clone(),
                    length: *length,
                    chunks,
                    completed_chunks,
                }
            })
            .collect()
    }
}

/// One simulated transfer.
#[derive(Debug)]
pub struct MemoryTransfer {
    id: InfoHash,
    descriptor: Descriptor,
    state: Mutex<TransferState>,
    metadata: watch::Sender<bool>,
}

impl MemoryTransfer {
    fn new(id: InfoHash, descriptor: Descriptor) -> Self {
        let (metadata, _) = watch::channel(false);
        let state = TransferState {
            name: descriptor.display_name().unwrap_or_default().to_string(),
            piece_length: DEFAULT_PIECE_LENGTH,
            ..TransferState::default()
        };
        Self {
            id,
            descriptor,
            state: Mutex::new(state),
            metadata,
        }
    }

    fn revive(&self) {
        let mut state = lock(&self.state);
        if state.discarded {
            debug!(id = %self.id, "reviving discarded transfer");
            state.discarded = false;
            state.running = false;
        }
    }

    /// Content id.
    #[must_use]
    pub fn id(&self) -> InfoHash {
        self.id
    }

    /// Publishes metadata and wakes every metadata waiter.
    pub fn resolve_metadata(
        &self,
        name: impl Into<String>,
        files: Vec<(String, u64)>,
        piece_length: u64,
    ) {
        {
            let mut state = lock(&self.state);
            state.name = name.into();
            state.files = files;
            state.piece_length = piece_length.max(1);
        }
        self.metadata.send_replace(true);
    }

    /// Sets the completed byte count, clamped to the total size.
    pub fn set_bytes_completed(&self, bytes: u64) {
        let mut state = lock(&self.state);
        let total = state.total_size();
        state.bytes_completed = bytes.min(total);
    }

    /// Adds `bytes` to the completed count if the transfer is running.
    ///
    /// Returns the new completed count.
    pub fn advance(&self, bytes: u64) -> u64 {
        let mut state = lock(&self.state);
        if state.running && !state.discarded {
            let total = state.total_size();
            state.bytes_completed = state.bytes_completed.saturating_add(bytes).min(total);
        }
        state.bytes_completed
    }

    /// Sets the connected and known peer counts.
    pub fn set_peers(&self, active: u32, total: u32) {
        let mut state = lock(&self.state);
        state.active_peers = active;
        state.total_peers = total;
    }

    /// Makes the next `start` call fail with `error`.
    pub fn fail_next_start(&self, error: BackendError) {
        lock(&self.state).fail_next_start = Some(error);
    }

    /// Makes every `start` call wait forever while set.
    pub fn set_hang_on_start(&self, hang: bool) {
        lock(&self.state).hang_on_start = hang;
    }

    /// Whether the transfer has been started and not discarded since.
    #[must_use]
    pub fn is_running(&self) -> bool {
        lock(&self.state).running
    }

    /// Whether the transfer was discarded and not re-added since.
    #[must_use]
    pub fn is_discarded(&self) -> bool {
        lock(&self.state).discarded
    }

    /// Number of successful `start` calls.
    #[must_use]
    pub fn start_calls(&self) -> u32 {
        lock(&self.state).start_calls
    }

    /// Number of `discard` calls.
    #[must_use]
    pub fn discard_calls(&self) -> u32 {
        lock(&self.state).discard_calls
    }

    /// Paths passed to `start_file`, in call order.
    #[must_use]
    pub fn started_files(&self) -> Vec<String> {
        lock(&self.state).started_files.clone()
    }
}

#[async_trait]
impl TransferHandle for MemoryTransfer {
    fn info_hash(&self) -> InfoHash {
        self.id
    }

    fn descriptor(&self) -> Descriptor {
        self.descriptor.clone()
    }

    fn stats(&self) -> TransferStats {
        let metadata_ready = *self.metadata.borrow();
        let state = lock(&self.state);
        TransferStats {
            name: state.name.clone(),
            bytes_completed: state.bytes_completed,
            total_size: if metadata_ready { state.total_size() } else { 0 },
            active_peers: state.active_peers,
            total_peers: state.total_peers,
            files: if metadata_ready {
                state.file_stats()
            } else {
                Vec::new()
            },
            metadata_ready,
        }
    }

    async fn start(&self) -> Result<(), BackendError> {
        let hang = {
            let mut state = lock(&self.state);
            if state.discarded {
                return Err(BackendError::failed(format!(
                    "transfer {} was discarded",
                    self.id
                )));
            }
            if let Some(error) = state.fail_next_start.take() {
                return Err(error);
            }
            state.hang_on_start
        };
        if hang {
            std::future::pending::<()>().await;
        }

        let mut state = lock(&self.state);
        state.running = true;
        state.start_calls += 1;
        Ok(())
    }

    async fn start_file(&self, path: &str) -> Result<(), BackendError> {
        let mut state = lock(&self.state);
        if !state.files.iter().any(|(p, _)| p == path) {
            return Err(BackendError::failed(format!("no file '{path}' in transfer")));
        }
        state.started_files.push(path.to_string());
        Ok(())
    }

    async fn discard(&self) {
        let mut state = lock(&self.state);
        state.running = false;
        state.discarded = true;
        state.discard_calls += 1;
    }

    async fn metadata_ready(&self) {
        let mut rx = self.metadata.subscribe();
        // The sender lives as long as `self`
        let _ = rx.wait_for(|ready| *ready).await;
    }
}
