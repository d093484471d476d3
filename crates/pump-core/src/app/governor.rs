//! ConcurrencyGovernor - 同時実行数の上限管理
//!
//! # 学習ポイント
//! - watch channel で「現在の in-flight 数」を共有し、`wait_for` で待つ
//! - RAII（Drop）で increment / decrement を必ずペアにする
//! - high-water（limit）で止まり、low-water まで下がったら再開するヒステリシス

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::watch;

use crate::domain::ConfigError;

/// Bounds the number of in-flight units of work.
///
/// `0 <= in_flight <= limit` at all times. Once the count reaches `limit`,
/// [`acquire`](Self::acquire) blocks until it has fallen to `low_water`.
#[derive(Debug)]
pub struct ConcurrencyGovernor {
    limit: usize,
    low_water: usize,
    in_flight: watch::Sender<usize>,
    peak: AtomicUsize,
}

impl ConcurrencyGovernor {
    pub fn new(limit: usize, low_water: usize) -> Result<Self, ConfigError> {
        if limit == 0 {
            return Err(ConfigError::Invalid("governor limit must be > 0".into()));
        }
        if low_water >= limit {
            return Err(ConfigError::Invalid(format!(
                "low-water mark {low_water} must be below limit {limit}"
            )));
        }
        let (in_flight, _) = watch::channel(0);
        Ok(Self {
            limit,
            low_water,
            in_flight,
            peak: AtomicUsize::new(0),
        })
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn low_water(&self) -> usize {
        self.low_water
    }

    pub fn in_flight(&self) -> usize {
        *self.in_flight.borrow()
    }

    /// Highest in-flight count observed since construction.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::Acquire)
    }

    /// Take one slot, waiting if the governor is saturated.
    pub async fn acquire(self: &Arc<Self>) -> GovernorPermit {
        loop {
            let mut taken = None;
            self.in_flight.send_if_modified(|n| {
                if *n < self.limit {
                    *n += 1;
                    taken = Some(*n);
                    true
                } else {
                    false
                }
            });
            if let Some(now) = taken {
                self.peak.fetch_max(now, Ordering::AcqRel);
                return GovernorPermit {
                    governor: Arc::clone(self),
                };
            }

            let mut rx = self.in_flight.subscribe();
            // the sender lives in `self`, so this cannot observe a closed channel
            let _ = rx.wait_for(|n| *n <= self.low_water).await;
        }
    }

    /// Wait until every permit has been dropped.
    pub async fn drained(&self) {
        let mut rx = self.in_flight.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    fn release(&self) {
        self.in_flight.send_modify(|n| *n = n.saturating_sub(1));
    }
}

/// One in-flight slot. Dropping it gives the slot back, whether the unit of
/// work succeeded, failed, or panicked.
#[derive(Debug)]
pub struct GovernorPermit {
    governor: Arc<ConcurrencyGovernor>,
}

impl Drop for GovernorPermit {
    fn drop(&mut self) {
        self.governor.release();
    }
}
