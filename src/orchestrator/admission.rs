//! Admission control: concurrency ceiling and memory budget checks.

use std::fmt;

use super::AdmissionDenial;
use crate::budget::ResourceBudget;

/// Estimates the memory a session needs while running.
pub trait MemoryEstimate: Send + Sync + fmt::Debug {
    /// Bytes to reserve for a session of `total_size` bytes.
    fn estimate(&self, total_size: u64) -> u64;
}

/// Reserves a fixed percentage of the session size.
///
/// Integer division happens before the multiplication, so sizes below
/// 100 bytes estimate to zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PercentOfSize {
    /// Percentage of the total size.
    pub percent: u64,
}

impl Default for PercentOfSize {
    fn default() -> Self {
        Self { percent: 2 }
    }
}

impl MemoryEstimate for PercentOfSize {
    fn estimate(&self, total_size: u64) -> u64 {
        (total_size / 100).saturating_mul(self.percent)
    }
}

/// Checks whether one more session may start.
///
/// The concurrency ceiling is checked first; a limit of zero disables either
/// check.
pub(crate) fn admit(
    active: usize,
    max_concurrent: usize,
    budget: &ResourceBudget,
    estimate: u64,
) -> Result<(), AdmissionDenial> {
    if max_concurrent > 0 && active >= max_concurrent {
        return Err(AdmissionDenial::ConcurrencyLimit {
            active,
            limit: max_concurrent,
        });
    }
    if budget.would_exceed(estimate) {
        return Err(AdmissionDenial::MemoryLimit {
            used: budget.used(),
            estimate,
            ceiling: budget.ceiling(),
        });
    }
    Ok(())
}
