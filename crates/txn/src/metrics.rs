use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
struct Counters {
    started: AtomicU64,
    committed: AtomicU64,
    aborted: AtomicU64,
    failed: AtomicU64,
    exhausted: AtomicU64,
    cancelled: AtomicU64,
}

static COUNTERS: Lazy<Counters> = Lazy::new(Counters::default);

fn increment(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

pub fn record_started() {
    increment(&COUNTERS.started);
}

pub fn record_committed() {
    increment(&COUNTERS.committed);
}

/// One aborted attempt; a single transaction may record several.
pub fn record_aborted() {
    increment(&COUNTERS.aborted);
}

pub fn record_failed() {
    increment(&COUNTERS.failed);
}

pub fn record_exhausted() {
    increment(&COUNTERS.exhausted);
}

pub fn record_cancelled() {
    increment(&COUNTERS.cancelled);
}

#[derive(Clone, Debug, Default)]
pub struct TxnMetricsSnapshot {
    pub started: u64,
    pub committed: u64,
    pub aborted: u64,
    pub failed: u64,
    pub exhausted: u64,
    pub cancelled: u64,
}

pub fn snapshot() -> TxnMetricsSnapshot {
    TxnMetricsSnapshot {
        started: COUNTERS.started.load(Ordering::Relaxed),
        committed: COUNTERS.committed.load(Ordering::Relaxed),
        aborted: COUNTERS.aborted.load(Ordering::Relaxed),
        failed: COUNTERS.failed.load(Ordering::Relaxed),
        exhausted: COUNTERS.exhausted.load(Ordering::Relaxed),
        cancelled: COUNTERS.cancelled.load(Ordering::Relaxed),
    }
}
