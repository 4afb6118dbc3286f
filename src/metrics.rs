//! The Proposer's read-only metrics (§4.4): plain atomic counters sampled into a `Snapshot`.
//! Grounded in `aerolithdb-consensus::engine::ConsensusEngine`'s style of atomic counters
//! updated from async tasks and read back without any synchronization beyond the atomics
//! themselves.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default, Clone, Copy)]
pub struct Snapshot {
    pub started: u64,
    pub succeeded: u64,
    pub failed_prepare: u64,
    pub failed_accept: u64,
    pub failed_commit: u64,
    pub average_latency_micros: u64,
    pub in_flight: u64,
}

#[derive(Default)]
pub struct ProposerMetrics {
    started: AtomicU64,
    succeeded: AtomicU64,
    failed_prepare: AtomicU64,
    failed_accept: AtomicU64,
    failed_commit: AtomicU64,
    latency_sum_micros: AtomicU64,
    latency_samples: AtomicU64,
}

impl ProposerMetrics {
    pub fn record_started(&self) {
        self.started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed_prepare(&self) {
        self.failed_prepare.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed_accept(&self) {
        self.failed_accept.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed_commit(&self) {
        self.failed_commit.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_succeeded(&self, latency: std::time::Duration) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
        self.latency_sum_micros
            .fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
        self.latency_samples.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, in_flight: u64) -> Snapshot {
        let samples = self.latency_samples.load(Ordering::Relaxed).max(1);
        Snapshot {
            started: self.started.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed_prepare: self.failed_prepare.load(Ordering::Relaxed),
            failed_accept: self.failed_accept.load(Ordering::Relaxed),
            failed_commit: self.failed_commit.load(Ordering::Relaxed),
            average_latency_micros: self.latency_sum_micros.load(Ordering::Relaxed) / samples,
            in_flight,
        }
    }
}
