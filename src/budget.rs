//! Advisory memory budget for running sessions.
//!
//! The budget tracks an estimate of the bytes reserved by started sessions
//! against a configured ceiling. It is not an allocator: [`ResourceBudget::reserve`]
//! never blocks or fails, and callers consult [`ResourceBudget::would_exceed`]
//! before starting work.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

/// Reserved-bytes counter checked against a ceiling (0 = unlimited).
///
/// Uses a single atomic counter so it can be shared across tasks without
/// an external lock.
#[derive(Debug, Default)]
pub struct ResourceBudget {
    reserved: AtomicU64,
    ceiling: AtomicU64,
}

impl ResourceBudget {
    /// Creates an empty budget with the given ceiling in bytes.
    #[must_use]
    pub fn new(ceiling: u64) -> Self {
        Self {
            reserved: AtomicU64::new(0),
            ceiling: AtomicU64::new(ceiling),
        }
    }

    /// Creates an empty budget without a ceiling.
    #[must_use]
    pub fn unlimited() -> Self {
        Self::new(0)
    }

    /// Adds `amount` to the reserved total.
    pub fn reserve(&self, amount: u64) {
        let previous = self
            .reserved
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                Some(current.saturating_add(amount))
            })
            .unwrap_or_else(|current| current);
        debug!(amount, reserved = previous.saturating_add(amount), "budget reserved");
    }

    /// Subtracts `amount` from the reserved total, clamping at zero.
    ///
    /// Clamping absorbs double releases and estimate drift.
    pub fn release(&self, amount: u64) {
        let previous = self
            .reserved
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                Some(current.saturating_sub(amount))
            })
            .unwrap_or_else(|current| current);
        debug!(amount, reserved = previous.saturating_sub(amount), "budget released");
    }

    /// Returns the currently reserved bytes.
    #[must_use]
    pub fn used(&self) -> u64 {
        self.reserved.load(Ordering::SeqCst)
    }

    /// Returns the configured ceiling (0 = unlimited).
    #[must_use]
    pub fn ceiling(&self) -> u64 {
        self.ceiling.load(Ordering::SeqCst)
    }

    /// Replaces the ceiling. Existing reservations are kept.
    pub fn set_ceiling(&self, ceiling: u64) {
        self.ceiling.store(ceiling, Ordering::SeqCst);
    }

    /// Returns true when reserving `estimate` more bytes would reach the ceiling.
    #[must_use]
    pub fn would_exceed(&self, estimate: u64) -> bool {
        let ceiling = self.ceiling();
        ceiling > 0 && self.used().saturating_add(estimate) >= ceiling
    }
}
