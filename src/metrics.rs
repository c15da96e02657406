//! Lightweight global metrics for tmfix.
//!
//! Потокобезопасные атомарные счётчики:
//! - probes / verdicts (search)
//! - verification faults and retries
//! - remote sync runs (rsync), fsck repair passes
//! - rollback points (create/destroy)

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

// ----- Search -----
static PROBES_TOTAL: AtomicU64 = AtomicU64::new(0);
static VERDICTS_GOOD: AtomicU64 = AtomicU64::new(0);
static VERDICTS_BAD: AtomicU64 = AtomicU64::new(0);

// ----- Verification -----
static VERIFY_ERRORS: AtomicU64 = AtomicU64::new(0);
static VERIFY_RETRIES: AtomicU64 = AtomicU64::new(0);
static SYNC_RUNS: AtomicU64 = AtomicU64::new(0);
static FSCK_REPAIR_PASSES: AtomicU64 = AtomicU64::new(0);

// ----- Rollback points -----
static ROLLBACK_CREATED: AtomicU64 = AtomicU64::new(0);
static ROLLBACK_DESTROYED: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    pub probes_total: u64,
    pub verdicts_good: u64,
    pub verdicts_bad: u64,

    pub verify_errors: u64,
    pub verify_retries: u64,
    pub sync_runs: u64,
    pub fsck_repair_passes: u64,

    pub rollback_created: u64,
    pub rollback_destroyed: u64,
}

impl MetricsSnapshot {
    /// Share of probes that ended in a clean verdict (no oracle fault).
    pub fn clean_probe_ratio(&self) -> f64 {
        let attempts = self.probes_total + self.verify_errors;
        if attempts == 0 {
            0.0
        } else {
            self.probes_total as f64 / attempts as f64
        }
    }
}

// ----- Recorders (Search) -----
pub fn record_probe(good: bool) {
    PROBES_TOTAL.fetch_add(1, Ordering::Relaxed);
    if good {
        VERDICTS_GOOD.fetch_add(1, Ordering::Relaxed);
    } else {
        VERDICTS_BAD.fetch_add(1, Ordering::Relaxed);
    }
}

// ----- Recorders (Verification) -----
pub fn record_verify_error() {
    VERIFY_ERRORS.fetch_add(1, Ordering::Relaxed);
}

pub fn record_verify_retry() {
    VERIFY_RETRIES.fetch_add(1, Ordering::Relaxed);
}

pub fn record_sync_run() {
    SYNC_RUNS.fetch_add(1, Ordering::Relaxed);
}

pub fn record_fsck_repair_pass() {
    FSCK_REPAIR_PASSES.fetch_add(1, Ordering::Relaxed);
}

// ----- Recorders (Rollback) -----
pub fn record_rollback_created() {
    ROLLBACK_CREATED.fetch_add(1, Ordering::Relaxed);
}

pub fn record_rollback_destroyed() {
    ROLLBACK_DESTROYED.fetch_add(1, Ordering::Relaxed);
}

// ----- Snapshot / Reset -----
pub fn metrics_snapshot() -> MetricsSnapshot {
    MetricsSnapshot {
        probes_total: PROBES_TOTAL.load(Ordering::Relaxed),
        verdicts_good: VERDICTS_GOOD.load(Ordering::Relaxed),
        verdicts_bad: VERDICTS_BAD.load(Ordering::Relaxed),

        verify_errors: VERIFY_ERRORS.load(Ordering::Relaxed),
        verify_retries: VERIFY_RETRIES.load(Ordering::Relaxed),
        sync_runs: SYNC_RUNS.load(Ordering::Relaxed),
        fsck_repair_passes: FSCK_REPAIR_PASSES.load(Ordering::Relaxed),

        rollback_created: ROLLBACK_CREATED.load(Ordering::Relaxed),
        rollback_destroyed: ROLLBACK_DESTROYED.load(Ordering::Relaxed),
    }
}

pub fn metrics_reset() {
    PROBES_TOTAL.store(0, Ordering::Relaxed);
    VERDICTS_GOOD.store(0, Ordering::Relaxed);
    VERDICTS_BAD.store(0, Ordering::Relaxed);

    VERIFY_ERRORS.store(0, Ordering::Relaxed);
    VERIFY_RETRIES.store(0, Ordering::Relaxed);
    SYNC_RUNS.store(0, Ordering::Relaxed);
    FSCK_REPAIR_PASSES.store(0, Ordering::Relaxed);

    ROLLBACK_CREATED.store(0, Ordering::Relaxed);
    ROLLBACK_DESTROYED.store(0, Ordering::Relaxed);
}
