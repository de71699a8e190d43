//! Map Metrics
//!
//! Counters for inserts, evictions, expirations and callback failures.

use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics collector shared by every handle to a map
#[derive(Debug, Default)]
pub struct MapMetrics {
    /// Inserts of new keys and value replacements
    inserts: AtomicU64,

    /// Entries removed to respect the capacity limit
    evicted: AtomicU64,

    /// Entries removed by a per-entry timer or a sweep
    expired: AtomicU64,

    /// Expiry callbacks that panicked
    callback_failures: AtomicU64,

    /// Completed sweep passes
    sweeps: AtomicU64,
}

impl MapMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_insert(&self) {
        self.inserts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_eviction(&self) {
        self.evicted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_expired(&self, count: usize) {
        self.expired.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_callback_failure(&self) {
        self.callback_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_sweep(&self) {
        self.sweeps.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inserts(&self) -> u64 {
        self.inserts.load(Ordering::Relaxed)
    }

    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    pub fn expired(&self) -> u64 {
        self.expired.load(Ordering::Relaxed)
    }

    pub fn callback_failures(&self) -> u64 {
        self.callback_failures.load(Ordering::Relaxed)
    }

    pub fn sweeps(&self) -> u64 {
        self.sweeps.load(Ordering::Relaxed)
    }

    /// Get a summary of metrics
    pub fn summary(&self) -> String {
        format!(
            "Inserts: {} | Evicted: {} | Expired: {} | Sweeps: {} | Callback failures: {}",
            self.inserts(),
            self.evicted(),
            self.expired(),
            self.sweeps(),
            self.callback_failures()
        )
    }
}
