use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Pump-wide counters.
///
/// Constructed explicitly and shared by `Arc`, so independent pumps (and
/// tests) never see each other's numbers.
///
/// `received >= acknowledged` holds at every observation point: a message is
/// counted received before it can be acknowledged.
#[derive(Debug, Default)]
pub struct Metrics {
    received: AtomicU64,
    acknowledged: AtomicU64,
    bytes_persisted: AtomicU64,
    failed: AtomicU64,
    dead_lettered: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_received(&self) -> u64 {
        self.received.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn record_acknowledged(&self) -> u64 {
        self.acknowledged.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn record_persisted(&self, bytes: u64) -> u64 {
        self.bytes_persisted.fetch_add(bytes, Ordering::AcqRel) + bytes
    }

    pub fn record_failed(&self) -> u64 {
        self.failed.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn record_dead_lettered(&self) -> u64 {
        self.dead_lettered.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Acquire)
    }

    pub fn acknowledged(&self) -> u64 {
        self.acknowledged.load(Ordering::Acquire)
    }

    pub fn bytes_persisted(&self) -> u64 {
        self.bytes_persisted.load(Ordering::Acquire)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Acquire)
    }

    pub fn dead_lettered(&self) -> u64 {
        self.dead_lettered.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        // acknowledged first so a concurrent writer can't make it overtake received
        let acknowledged = self.acknowledged();
        MetricsSnapshot {
            received: self.received(),
            acknowledged,
            bytes_persisted: self.bytes_persisted(),
            failed: self.failed(),
            dead_lettered: self.dead_lettered(),
        }
    }
}

/// Point-in-time view of [`Metrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub received: u64,
    pub acknowledged: u64,
    pub bytes_persisted: u64,
    pub failed: u64,
    pub dead_lettered: u64,
}

impl MetricsSnapshot {
    /// Received but neither acknowledged nor failed. Dead-lettered messages are
    /// deleted from the queue, so they are already counted as acknowledged.
    pub fn outstanding(&self) -> u64 {
        self.received
            .saturating_sub(self.acknowledged)
            .saturating_sub(self.failed)
    }
}
