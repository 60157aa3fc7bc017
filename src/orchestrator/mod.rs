//! Session orchestrator: session table, admission control and lifecycle API.
//!
//! The [`Orchestrator`] owns one table of sessions keyed by [`InfoHash`],
//! the running-session count and the shared [`ResourceBudget`]. All of it
//! sits behind a single async mutex; records leave the table only as clones
//! taken under that lock, so readers never observe a half-updated record.
//!
//! # Lifecycle
//!
//! - [`Orchestrator::add`] registers a descriptor with the backend and spawns
//!   a metadata waiter that starts the session once metadata arrives (when
//!   auto-start is enabled).
//! - [`Orchestrator::start`] runs admission control (concurrency ceiling,
//!   then memory budget) before telling the backend to transfer.
//! - [`Orchestrator::stop`] discards the backend transfer and releases
//!   exactly what the matching start reserved.
//! - [`Orchestrator::delete`] removes the session regardless of state.
//! - [`Orchestrator::refresh`] pulls raw statistics and recomputes every
//!   live session's derived fields.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use seedbox_core::{MemoryBackend, Orchestrator, OrchestratorConfig};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = MemoryBackend::new();
//! let orchestrator = Orchestrator::new(Arc::new(backend.clone()), OrchestratorConfig::default());
//!
//! let id = orchestrator
//!     .add_magnet("magnet:?xt=urn:btih:c12fe1c06bba254a9dc9f519b335aa7c1367a88a&dn=Sintel")
//!     .await?;
//! let sessions = orchestrator.refresh().await;
//! assert_eq!(sessions[&id].name, "Sintel");
//! # Ok(())
//! # }
//! ```

mod admission;
mod config;
mod error;
mod report;
mod sweep;

pub use admission::{MemoryEstimate, PercentOfSize};
pub use config::{
    DEFAULT_BACKEND_TIMEOUT, DEFAULT_MAX_CONCURRENT_SESSIONS, DEFAULT_MAX_MEMORY_BYTES,
    OrchestratorConfig,
};
pub use error::{AdmissionDenial, ErrorKind, OrchestratorError, SessionState};
pub use report::{EngineHealth, FileReport, SessionReport};
pub use sweep::SweepReport;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::backend::{BackendError, TransferBackend, TransferHandle};
use crate::budget::ResourceBudget;
use crate::clock::{Clock, SystemClock};
use crate::descriptor::{Descriptor, DescriptorCache};
use crate::session::{InfoHash, RateEstimator, SessionRecord};
use crate::supervisor::RestartPolicy;

/// Runs a backend call under `timeout`; a zero timeout waits indefinitely.
async fn bounded<T, F>(timeout: Duration, operation: &'static str, call: F) -> Result<T, BackendError>
where
    F: Future<Output = Result<T, BackendError>>,
{
    if timeout.is_zero() {
        return call.await;
    }
    tokio::time::timeout(timeout, call)
        .await
        .unwrap_or(Err(BackendError::Timeout {
            operation,
            after: timeout,
        }))
}

/// One row of the session table.
#[derive(Debug)]
struct SessionEntry {
    record: SessionRecord,
    /// Live backend transfer; `None` after stop until the next start.
    handle: Option<Arc<dyn TransferHandle>>,
    /// Re-adds the transfer after it was discarded.
    descriptor: Descriptor,
    /// Estimate reserved by the last successful start, released by stop.
    reserved: u64,
    /// When the session was last started.
    started_at: Option<DateTime<Utc>>,
    /// Cancels the pending metadata waiter, if any.
    waiter: Option<CancellationToken>,
}

impl SessionEntry {
    fn new(
        id: InfoHash,
        descriptor: Descriptor,
        handle: Arc<dyn TransferHandle>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut record = SessionRecord::new(id, now);
        if let Some(name) = descriptor.display_name() {
            record.name = name.to_string();
        }
        Self {
            record,
            handle: Some(handle),
            descriptor,
            reserved: 0,
            started_at: None,
            waiter: None,
        }
    }
}

/// Mutable state guarded by the table lock.
#[derive(Debug)]
struct SessionTable {
    entries: HashMap<InfoHash, SessionEntry>,
    active: usize,
    max_concurrent: usize,
    auto_start: bool,
    auto_retry: bool,
    restart_policy: RestartPolicy,
}

impl SessionTable {
    fn new(config: &OrchestratorConfig) -> Self {
        Self {
            entries: HashMap::new(),
            active: 0,
            max_concurrent: config.max_concurrent_sessions,
            auto_start: config.auto_start,
            auto_retry: config.enable_auto_retry,
            restart_policy: config.restart_policy(),
        }
    }

    fn snapshot(&self) -> HashMap<InfoHash, SessionRecord> {
        self.entries
            .iter()
            .map(|(id, entry)| (*id, entry.record.clone()))
            .collect()
    }
}

#[derive(Debug)]
struct Inner {
    backend: Arc<dyn TransferBackend>,
    clock: Arc<dyn Clock>,
    memory_estimate: Arc<dyn MemoryEstimate>,
    estimator: RateEstimator,
    budget: ResourceBudget,
    cache: Option<DescriptorCache>,
    backend_timeout: Duration,
    created_at: DateTime<Utc>,
    table: Mutex<SessionTable>,
}

/// Coordinates sessions on top of a [`TransferBackend`].
///
/// Cloning is cheap; clones share the same table.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    /// Creates an orchestrator using the system clock and the default
    /// 2%-of-size memory estimate.
    #[must_use]
    pub fn new(backend: Arc<dyn TransferBackend>, config: OrchestratorConfig) -> Self {
        Self::with_parts(
            backend,
            config,
            Arc::new(SystemClock),
            Arc::new(PercentOfSize::default()),
        )
    }

    /// Creates an orchestrator with an explicit clock and memory estimate.
    #[must_use]
    pub fn with_parts(
        backend: Arc<dyn TransferBackend>,
        config: OrchestratorConfig,
        clock: Arc<dyn Clock>,
        memory_estimate: Arc<dyn MemoryEstimate>,
    ) -> Self {
        let created_at = clock.now();
        Self {
            inner: Arc::new(Inner {
                backend,
                clock,
                memory_estimate,
                estimator: RateEstimator::default(),
                budget: ResourceBudget::new(config.max_memory_bytes),
                cache: config.cache_dir.clone().map(DescriptorCache::new),
                backend_timeout: config.backend_timeout(),
                created_at,
                table: Mutex::new(SessionTable::new(&config)),
            }),
        }
    }

    fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    async fn call_backend<T, F>(&self, operation: &'static str, call: F) -> Result<T, BackendError>
    where
        F: Future<Output = Result<T, BackendError>>,
    {
        bounded(self.inner.backend_timeout, operation, call).await
    }

    async fn discard(&self, handle: &Arc<dyn TransferHandle>) {
        let timeout = self.inner.backend_timeout;
        let discard = async {
            handle.discard().await;
            Ok::<_, BackendError>(())
        };
        if let Err(e) = bounded(timeout, "discard", discard).await {
            warn!(id = %handle.info_hash(), error = %e, "backend discard did not complete");
        }
    }

    /// Replaces admission limits and restart behavior for later decisions.
    ///
    /// Running sessions keep their reservations. The cache directory and
    /// backend timeout are fixed at construction.
    #[instrument(skip(self, config))]
    pub async fn reconfigure(&self, config: &OrchestratorConfig) {
        let mut table = self.inner.table.lock().await;
        table.max_concurrent = config.max_concurrent_sessions;
        table.auto_start = config.auto_start;
        table.auto_retry = config.enable_auto_retry;
        table.restart_policy = config.restart_policy();
        self.inner.budget.set_ceiling(config.max_memory_bytes);
        info!(
            max_concurrent = config.max_concurrent_sessions,
            max_memory = config.max_memory_bytes,
            auto_start = config.auto_start,
            auto_retry = config.enable_auto_retry,
            "orchestrator reconfigured"
        );
    }

    /// Adds a session from a validated descriptor.
    ///
    /// Adding a session that is already known returns its id without
    /// spawning a second metadata waiter.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Backend`] if the backend fails or does
    /// not answer in time. A backend rejection of the descriptor itself is
    /// reported with [`ErrorKind::InvalidDescriptor`].
    #[instrument(skip(self, descriptor), fields(descriptor = ?descriptor))]
    pub async fn add(&self, descriptor: Descriptor) -> Result<InfoHash, OrchestratorError> {
        let now = self.now();
        // The backend call runs under the table lock so a concurrent delete
        // cannot discard the handle this add revives.
        let (id, handle, waiter) = {
            let mut table = self.inner.table.lock().await;
            let handle = self
                .call_backend("add", self.inner.backend.add(&descriptor))
                .await
                .map_err(|e| OrchestratorError::backend(descriptor.info_hash(), e))?;
            let id = handle.info_hash();
            let waiter = if let Some(entry) = table.entries.get_mut(&id) {
                if entry.handle.is_none() {
                    entry.handle = Some(Arc::clone(&handle));
                }
                debug!(id = %id, "session already known");
                None
            } else {
                let mut entry = SessionEntry::new(id, descriptor.clone(), Arc::clone(&handle), now);
                self.inner
                    .estimator
                    .recompute(&mut entry.record, &handle.stats(), now);
                let token = CancellationToken::new();
                entry.waiter = Some(token.clone());
                table.entries.insert(id, entry);
                info!(id = %id, sessions = table.entries.len(), "session added");
                Some(token)
            };
            (id, handle, waiter)
        };

        if let (Some(cache), Some(bytes)) = (&self.inner.cache, descriptor.metainfo_bytes())
            && let Err(e) = cache.store(&id, bytes).await
        {
            warn!(id = %id, error = %e, "failed to cache descriptor");
        }

        if let Some(token) = waiter {
            let orchestrator = self.clone();
            tokio::spawn(async move {
                orchestrator.await_metadata(id, handle, token).await;
            });
        }

        Ok(id)
    }

    /// Parses and adds a magnet URI.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::InvalidDescriptor`] for malformed URIs,
    /// otherwise as [`Orchestrator::add`].
    pub async fn add_magnet(&self, uri: &str) -> Result<InfoHash, OrchestratorError> {
        self.add(Descriptor::magnet(uri)?).await
    }

    /// Validates and adds a metainfo payload.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::InvalidDescriptor`] for malformed
    /// payloads, otherwise as [`Orchestrator::add`].
    pub async fn add_metainfo(&self, bytes: Vec<u8>) -> Result<InfoHash, OrchestratorError> {
        self.add(Descriptor::metainfo(bytes)?).await
    }

    async fn await_metadata(
        self,
        id: InfoHash,
        handle: Arc<dyn TransferHandle>,
        cancel: CancellationToken,
    ) {
        tokio::select! {
            () = cancel.cancelled() => {
                debug!(id = %id, "metadata waiter cancelled");
                return;
            }
            () = handle.metadata_ready() => {}
        }

        let auto_start = {
            let mut table = self.inner.table.lock().await;
            let auto_start = table.auto_start;
            match table.entries.get_mut(&id) {
                Some(entry) => entry.waiter = None,
                None => return,
            }
            auto_start
        };
        debug!(id = %id, auto_start, "metadata ready");
        if !auto_start {
            return;
        }

        match self.start(&id).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::InvalidState => {
                debug!(id = %id, "session already started before metadata arrived");
            }
            Err(e) => {
                warn!(id = %id, error = %e, "automatic start failed");
                self.record_error(&id, format!("automatic start failed: {e}"))
                    .await;
            }
        }
    }

    /// Starts a session after admission control.
    ///
    /// # Errors
    ///
    /// - [`OrchestratorError::NotFound`] for unknown ids
    /// - [`OrchestratorError::InvalidState`] if the session is running
    /// - [`OrchestratorError::AdmissionDenied`] when a limit is reached
    /// - [`OrchestratorError::Backend`] if the backend fails; nothing is
    ///   reserved in that case
    #[instrument(skip(self), fields(id = %id))]
    pub async fn start(&self, id: &InfoHash) -> Result<(), OrchestratorError> {
        let now = self.now();
        let mut guard = self.inner.table.lock().await;
        let table = &mut *guard;
        let entry = table
            .entries
            .get_mut(id)
            .ok_or(OrchestratorError::NotFound { id: *id })?;
        if entry.record.started {
            return Err(OrchestratorError::InvalidState {
                id: *id,
                state: SessionState::AlreadyStarted,
            });
        }

        let total_size = entry.handle.as_ref().map_or(entry.record.total_size, |h| {
            h.stats().total_size.max(entry.record.total_size)
        });
        let estimate = self.inner.memory_estimate.estimate(total_size);
        admission::admit(
            table.active,
            table.max_concurrent,
            &self.inner.budget,
            estimate,
        )
        .map_err(|reason| {
            debug!(reason = %reason, "admission denied");
            OrchestratorError::AdmissionDenied { id: *id, reason }
        })?;

        let handle = match &entry.handle {
            Some(handle) => Arc::clone(handle),
            None => {
                let handle = self
                    .call_backend("add", self.inner.backend.add(&entry.descriptor))
                    .await
                    .map_err(|e| OrchestratorError::backend(*id, e))?;
                entry.handle = Some(Arc::clone(&handle));
                handle
            }
        };
        self.call_backend("start", handle.start())
            .await
            .map_err(|e| OrchestratorError::backend(*id, e))?;

        entry.record.started = true;
        entry.record.set_files_started(true);
        entry.reserved = estimate;
        entry.started_at = Some(now);
        table.active += 1;
        self.inner.budget.reserve(estimate);

        info!(
            name = %entry.record.name,
            size = total_size,
            estimate,
            active = table.active,
            memory = self.inner.budget.used(),
            "session started"
        );
        Ok(())
    }

    /// Stops a running session and discards its backend transfer.
    ///
    /// # Errors
    ///
    /// - [`OrchestratorError::NotFound`] for unknown ids
    /// - [`OrchestratorError::InvalidState`] if the session is not running;
    ///   counters are left unchanged
    #[instrument(skip(self), fields(id = %id))]
    pub async fn stop(&self, id: &InfoHash) -> Result<(), OrchestratorError> {
        let mut guard = self.inner.table.lock().await;
        let table = &mut *guard;
        let entry = table
            .entries
            .get_mut(id)
            .ok_or(OrchestratorError::NotFound { id: *id })?;
        if !entry.record.started {
            return Err(OrchestratorError::InvalidState {
                id: *id,
                state: SessionState::AlreadyStopped,
            });
        }

        if let Some(handle) = entry.handle.take() {
            self.discard(&handle).await;
        }
        entry.record.started = false;
        entry.record.set_files_started(false);
        self.inner.budget.release(entry.reserved);
        entry.reserved = 0;
        table.active = table.active.saturating_sub(1);

        info!(
            name = %entry.record.name,
            active = table.active,
            memory = self.inner.budget.used(),
            "session stopped"
        );
        Ok(())
    }

    /// Removes a session, discarding its transfer and cached descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::NotFound`] for unknown ids.
    #[instrument(skip(self), fields(id = %id))]
    pub async fn delete(&self, id: &InfoHash) -> Result<(), OrchestratorError> {
        let entry = {
            let mut table = self.inner.table.lock().await;
            let entry = table
                .entries
                .remove(id)
                .ok_or(OrchestratorError::NotFound { id: *id })?;
            if entry.record.started {
                table.active = table.active.saturating_sub(1);
                self.inner.budget.release(entry.reserved);
            }

            // Discard before releasing the lock; a later add re-creates the transfer.
            let handle = match &entry.handle {
                Some(handle) => Some(Arc::clone(handle)),
                None => self.inner.backend.lookup(id).await,
            };
            if let Some(handle) = handle {
                self.discard(&handle).await;
            }
            entry
        };

        if let Some(token) = &entry.waiter {
            token.cancel();
        }

        if let Some(cache) = &self.inner.cache
            && let Err(e) = cache.remove(id).await
        {
            warn!(error = %e, "failed to remove cached descriptor");
        }

        info!(
            name = %entry.record.name,
            memory = self.inner.budget.used(),
            "session deleted"
        );
        Ok(())
    }

    /// Enables one file of a session.
    ///
    /// No admission control applies, and the session-level state is not
    /// touched.
    ///
    /// # Errors
    ///
    /// - [`OrchestratorError::NotFound`] / [`OrchestratorError::FileNotFound`]
    /// - [`OrchestratorError::InvalidState`] if the file is already started
    /// - [`OrchestratorError::Backend`] if the backend refuses the file
    #[instrument(skip(self), fields(id = %id))]
    pub async fn start_file(&self, id: &InfoHash, path: &str) -> Result<(), OrchestratorError> {
        let mut table = self.inner.table.lock().await;
        let entry = table
            .entries
            .get_mut(id)
            .ok_or(OrchestratorError::NotFound { id: *id })?;
        let file = entry
            .record
            .files
            .iter_mut()
            .find(|file| file.path == path)
            .ok_or_else(|| OrchestratorError::FileNotFound {
                id: *id,
                path: path.to_string(),
            })?;
        if file.started {
            return Err(OrchestratorError::InvalidState {
                id: *id,
                state: SessionState::AlreadyStarted,
            });
        }

        if let Some(handle) = &entry.handle {
            self.call_backend("start_file", handle.start_file(path))
                .await
                .map_err(|e| OrchestratorError::backend(*id, e))?;
        }
        file.started = true;
        info!(path, "file started");
        Ok(())
    }

    /// Stopping a single file is not supported by the transfer model.
    ///
    /// # Errors
    ///
    /// Always returns [`OrchestratorError::Unsupported`].
    #[allow(clippy::unused_async)]
    pub async fn stop_file(&self, _id: &InfoHash, _path: &str) -> Result<(), OrchestratorError> {
        Err(OrchestratorError::Unsupported {
            operation: "stop_file",
        })
    }

    /// Pulls backend statistics, recomputes every live session and returns a
    /// snapshot of the whole table.
    ///
    /// Sessions the backend reports but the table has never seen are
    /// inserted. Stopped sessions keep their last recorded state.
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> HashMap<InfoHash, SessionRecord> {
        let timeout = self.inner.backend_timeout;
        let live = bounded(timeout, "sessions", async {
            Ok::<_, BackendError>(self.inner.backend.sessions().await)
        })
        .await
        .unwrap_or_else(|e| {
            warn!(error = %e, "backend enumeration failed; refreshing known sessions only");
            Vec::new()
        });

        let now = self.now();
        let mut table = self.inner.table.lock().await;
        for handle in live {
            let id = handle.info_hash();
            match table.entries.get_mut(&id) {
                Some(entry) => {
                    if entry.handle.is_none() {
                        entry.handle = Some(handle);
                    }
                }
                None => {
                    debug!(id = %id, "discovered backend session");
                    let entry = SessionEntry::new(id, handle.descriptor(), handle, now);
                    table.entries.insert(id, entry);
                }
            }
        }

        for entry in table.entries.values_mut() {
            if let Some(handle) = &entry.handle {
                self.inner
                    .estimator
                    .recompute(&mut entry.record, &handle.stats(), now);
            }
        }

        table.snapshot()
    }

    /// Snapshot of one session without refreshing.
    pub async fn session(&self, id: &InfoHash) -> Option<SessionRecord> {
        let table = self.inner.table.lock().await;
        table.entries.get(id).map(|entry| entry.record.clone())
    }

    /// Snapshot of every session without refreshing.
    pub async fn sessions(&self) -> HashMap<InfoHash, SessionRecord> {
        self.inner.table.lock().await.snapshot()
    }

    /// Presentation view of one session.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::NotFound`] for unknown ids.
    pub async fn session_report(&self, id: &InfoHash) -> Result<SessionReport, OrchestratorError> {
        let now = self.now();
        let table = self.inner.table.lock().await;
        table
            .entries
            .get(id)
            .map(|entry| SessionReport::new(&entry.record, now))
            .ok_or(OrchestratorError::NotFound { id: *id })
    }

    /// Presentation view of every session, oldest first.
    pub async fn reports(&self) -> Vec<SessionReport> {
        let now = self.now();
        let table = self.inner.table.lock().await;
        let mut reports: Vec<SessionReport> = table
            .entries
            .values()
            .map(|entry| SessionReport::new(&entry.record, now))
            .collect();
        reports.sort_by(|a, b| a.time_added.cmp(&b.time_added).then(a.id.cmp(&b.id)));
        reports
    }

    /// Engine-wide health summary.
    pub async fn health(&self) -> EngineHealth {
        let table = self.inner.table.lock().await;
        let uptime = self.now() - self.inner.created_at;
        EngineHealth {
            sessions: table.entries.len(),
            active_sessions: table.active,
            memory_usage: self.inner.budget.used(),
            memory_ceiling: self.inner.budget.ceiling(),
            uptime_secs: u64::try_from(uptime.num_seconds()).unwrap_or(0),
        }
    }

    /// Number of running sessions.
    pub async fn active_sessions(&self) -> usize {
        self.inner.table.lock().await.active
    }

    /// The shared memory budget.
    #[must_use]
    pub fn budget(&self) -> &ResourceBudget {
        &self.inner.budget
    }

    async fn record_error(&self, id: &InfoHash, message: impl Into<String>) {
        let now = self.now();
        let mut table = self.inner.table.lock().await;
        if let Some(entry) = table.entries.get_mut(id) {
            entry.record.add_error(now, message);
        }
    }
}
