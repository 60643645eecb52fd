//! Runtime counters

use std::sync::atomic::{AtomicU64, Ordering};

use ferry_notify::BusStats;

/// Snapshot of runtime activity
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RuntimeStats {
    pub submitted: u64,
    pub succeeded: u64,
    pub exhausted: u64,
    pub cancelled: u64,
    /// Requests refused before their first attempt (id already registered)
    pub rejected: u64,
    pub attempts: u64,
    /// Quality metrics dropped as malformed or foreign
    pub quality_anomalies: u64,
    /// Sessions currently in the registry
    pub active: usize,
    /// Sessions waiting for an orchestration slot
    pub queued: usize,
    pub bus: BusStats,
}

/// Shared counters updated by orchestrations
#[derive(Debug, Default)]
pub struct StatsRecorder {
    submitted: AtomicU64,
    succeeded: AtomicU64,
    exhausted: AtomicU64,
    cancelled: AtomicU64,
    rejected: AtomicU64,
    attempts: AtomicU64,
    quality_anomalies: AtomicU64,
}

impl StatsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_attempt(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_quality_anomalies(&self, n: u64) {
        if n > 0 {
            self.quality_anomalies.fetch_add(n, Ordering::Relaxed);
        }
    }

    /// Count a session that reached a terminal state
    pub fn record_finished(&self, succeeded: bool, cancelled: bool) {
        let counter = if succeeded {
            &self.succeeded
        } else if cancelled {
            &self.cancelled
        } else {
            &self.exhausted
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Counter values; registry, queue and bus fields are left at default
    pub fn snapshot(&self) -> RuntimeStats {
        RuntimeStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            attempts: self.attempts.load(Ordering::Relaxed),
            quality_anomalies: self.quality_anomalies.load(Ordering::Relaxed),
            ..RuntimeStats::default()
        }
    }
}
