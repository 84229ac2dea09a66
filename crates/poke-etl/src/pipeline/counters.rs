//! Per-stage counters shared by every worker of a run

use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

#[derive(Debug, Default)]
pub struct StageCounters {
    entities_attempted: AtomicUsize,
    entities_succeeded: AtomicUsize,
    entities_failed: AtomicUsize,
    downloads_claimed: AtomicUsize,
    downloads_succeeded: AtomicUsize,
    downloads_cached: AtomicUsize,
    downloads_failed: AtomicUsize,
    dedup_skipped: AtomicUsize,
    forms_processed: AtomicUsize,
    forms_failed: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

/// Point-in-time copy of [`StageCounters`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterSnapshot {
    pub entities_attempted: usize,
    pub entities_succeeded: usize,
    pub entities_failed: usize,
    pub downloads_claimed: usize,
    pub downloads_succeeded: usize,
    pub downloads_cached: usize,
    pub downloads_failed: usize,
    pub dedup_skipped: usize,
    pub forms_processed: usize,
    pub forms_failed: usize,
    pub peak_in_flight: usize,
}

impl StageCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entity_attempted(&self) {
        self.entities_attempted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn entity_succeeded(&self) {
        self.entities_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn entity_failed(&self) {
        self.entities_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn download_claimed(&self) {
        self.downloads_claimed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn download_finished(&self, succeeded: bool, cached: bool) {
        let counter = match (succeeded, cached) {
            (true, true) => &self.downloads_cached,
            (true, false) => &self.downloads_succeeded,
            (false, _) => &self.downloads_failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dedup_skipped(&self) {
        self.dedup_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn form_processed(&self) {
        self.forms_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn form_failed(&self) {
        self.forms_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a newly submitted download and update the peak
    pub fn submit(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
    }

    pub fn resolve(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Only meaningful once every stage has drained
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            entities_attempted: self.entities_attempted.load(Ordering::Relaxed),
            entities_succeeded: self.entities_succeeded.load(Ordering::Relaxed),
            entities_failed: self.entities_failed.load(Ordering::Relaxed),
            downloads_claimed: self.downloads_claimed.load(Ordering::Relaxed),
            downloads_succeeded: self.downloads_succeeded.load(Ordering::Relaxed),
            downloads_cached: self.downloads_cached.load(Ordering::Relaxed),
            downloads_failed: self.downloads_failed.load(Ordering::Relaxed),
            dedup_skipped: self.dedup_skipped.load(Ordering::Relaxed),
            forms_processed: self.forms_processed.load(Ordering::Relaxed),
            forms_failed: self.forms_failed.load(Ordering::Relaxed),
            peak_in_flight: self.peak_in_flight.load(Ordering::SeqCst),
        }
    }
}

impl CounterSnapshot {
    /// Downloads that ended with a file on disk
    pub fn downloads_completed(&self) -> usize {
        self.downloads_succeeded + self.downloads_cached
    }

    /// Every claimed download resolved one way or the other
    pub fn downloads_resolved(&self) -> usize {
        self.downloads_completed() + self.downloads_failed
    }
}
