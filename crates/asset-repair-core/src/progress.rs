use crate::model::AssetEntry;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Trait for reporting repair progress.
///
/// CLI implements with tracing/indicatif. Calls are fire-and-forget: the
/// engine never waits on a reporter and calls it from worker threads.
/// All methods have default no-op implementations.
pub trait RepairReporter: Send + Sync {
    fn on_status(&self, _message: &str) {}
    fn on_fetch_complete(&self, _total_assets: usize, _total_bytes: u64) {}
    fn on_verify_start(&self, _total_assets: u64, _total_bytes: u64) {}
    fn on_verify_progress(&self, _snapshot: &ProgressSnapshot) {}
    fn on_asset_entry(&self, _entry: &AssetEntry) {}
    fn on_verify_complete(&self, _snapshot: &ProgressSnapshot, _duration_secs: f64) {}
}

/// No-op progress reporter for silent operation.
pub struct SilentReporter;

impl RepairReporter for SilentReporter {}

/// Counters shared by every worker of one verification pass.
///
/// Fields are independent so each is a plain atomic.
#[derive(Debug, Default)]
pub struct ProgressCounters {
    count_total: AtomicU64,
    count_current: AtomicU64,
    found_count: AtomicU64,
    size_total: AtomicU64,
    size_current: AtomicU64,
    found_size: AtomicU64,
    per_file_current: AtomicU64,
    per_file_total: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ProgressSnapshot {
    pub count_current: u64,
    pub count_total: u64,
    pub found_count: u64,
    pub size_current: u64,
    pub size_total: u64,
    pub found_size: u64,
    pub per_file_current: u64,
    pub per_file_total: u64,
}

impl ProgressCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_totals(&self, count: u64, size: u64) {
        self.count_total.store(count, Ordering::Relaxed);
        self.size_total.store(size, Ordering::Relaxed);
    }

    pub fn asset_started(&self, size: u64) {
        self.count_current.fetch_add(1, Ordering::Relaxed);
        self.per_file_total.store(size, Ordering::Relaxed);
        self.per_file_current.store(0, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, n: u64) {
        self.per_file_current.fetch_add(n, Ordering::Relaxed);
    }

    /// Record a broken asset (missing or mismatched).
    pub fn found_broken(&self, size: u64) {
        self.found_count.fetch_add(1, Ordering::Relaxed);
        self.found_size.fetch_add(size, Ordering::Relaxed);
        self.size_current.fetch_add(size, Ordering::Relaxed);
        self.per_file_current.store(size, Ordering::Relaxed);
    }

    /// Record a redundant file. Redundant files don't need downloading so
    /// they only count, they don't add to the repair size.
    pub fn found_redundant(&self) {
        self.found_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            count_current: self.count_current.load(Ordering::Relaxed),
            count_total: self.count_total.load(Ordering::Relaxed),
            found_count: self.found_count.load(Ordering::Relaxed),
            size_current: self.size_current.load(Ordering::Relaxed),
            size_total: self.size_total.load(Ordering::Relaxed),
            found_size: self.found_size.load(Ordering::Relaxed),
            per_file_current: self.per_file_current.load(Ordering::Relaxed),
            per_file_total: self.per_file_total.load(Ordering::Relaxed),
        }
    }
}
