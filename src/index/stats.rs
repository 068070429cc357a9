//! Per-index statistics

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Counters updated by maintenance and lookups
///
/// Key and value counts are not kept here: they are read from the index
/// structure under its own lock so they always agree with its contents.
#[derive(Debug, Default)]
pub struct IndexStatistics {
    updates: AtomicU64,
    lookups: AtomicU64,
    exceptions: AtomicU64,
    violations: AtomicU64,
    update_time_nanos: AtomicU64,
}

impl IndexStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_update(&self, elapsed: Duration) {
        self.updates.fetch_add(1, Ordering::Relaxed);
        self.update_time_nanos
            .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn record_lookup(&self) {
        self.lookups.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_exception(&self) {
        self.exceptions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_violation(&self) {
        self.violations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, number_of_keys: usize, number_of_values: usize) -> IndexStatsSnapshot {
        IndexStatsSnapshot {
            number_of_keys,
            number_of_values,
            number_of_updates: self.updates.load(Ordering::Relaxed),
            number_of_lookups: self.lookups.load(Ordering::Relaxed),
            number_of_exceptions: self.exceptions.load(Ordering::Relaxed),
            number_of_violations: self.violations.load(Ordering::Relaxed),
            total_update_time: Duration::from_nanos(self.update_time_nanos.load(Ordering::Relaxed)),
        }
    }
}

/// Read-only statistics view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStatsSnapshot {
    /// Distinct indexed values, the undefined bucket counting as one
    pub number_of_keys: usize,
    /// Indexed values including repeats from multi-valued projections
    pub number_of_values: usize,
    /// Maintenance operations applied
    pub number_of_updates: u64,
    /// Lookups served
    pub number_of_lookups: u64,
    /// Entries excluded because the indexed expression failed
    pub number_of_exceptions: u64,
    /// Rejected primary-key mappings
    pub number_of_violations: u64,
    pub total_update_time: Duration,
}
