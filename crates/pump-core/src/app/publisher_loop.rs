//! PublisherLoop - topic への並列 publish
//!
//! # フロー
//! 1. ConcurrencyGovernor から permit を取る（飽和中は low-water まで待つ）
//! 2. permit を持たせた unit of work を JoinSet に spawn
//! 3. unit of work は Transport::publish を 1 回呼び、成功/失敗を数える
//! 4. 全 unit of work の完了を待ってから PublishReport を返す
//!
//! 個々の publish 失敗はその場でログに出して数えるだけ。バッチも兄弟タスクも止めない。

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use tokio::task::{JoinError, JoinSet};

use super::config::PublisherConfig;
use super::governor::ConcurrencyGovernor;
use super::status::PublishReport;
use crate::domain::ConfigError;
use crate::ports::Transport;

/// Where each unit of work gets its message body from.
#[derive(Clone)]
pub enum BodySource {
    Fixed(String),
    /// Called with the 0-based sequence number of the publish.
    Generated(Arc<dyn Fn(u64) -> String + Send + Sync>),
}

impl BodySource {
    pub fn generated(f: impl Fn(u64) -> String + Send + Sync + 'static) -> Self {
        BodySource::Generated(Arc::new(f))
    }

    fn body_for(&self, seq: u64) -> String {
        match self {
            BodySource::Fixed(body) => body.clone(),
            BodySource::Generated(f) => f(seq),
        }
    }
}

impl fmt::Debug for BodySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BodySource::Fixed(body) => f.debug_tuple("Fixed").field(body).finish(),
            BodySource::Generated(_) => f.write_str("Generated(..)"),
        }
    }
}

/// Per-batch counters. `in_flight` and `peak` only see this batch's units,
/// even when the governor is shared.
#[derive(Debug, Default)]
struct PublishCounters {
    succeeded: AtomicU64,
    failed: AtomicU64,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

/// Counts one unit of this batch as in flight until dropped.
struct BatchSlot(Arc<PublishCounters>);

impl BatchSlot {
    fn take(counters: &Arc<PublishCounters>) -> Self {
        let now = counters.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        counters.peak.fetch_max(now, Ordering::AcqRel);
        Self(Arc::clone(counters))
    }
}

impl Drop for BatchSlot {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

pub struct PublisherLoop {
    transport: Arc<dyn Transport>,
    governor: Arc<ConcurrencyGovernor>,
    topic: String,
    body: BodySource,
}

impl PublisherLoop {
    pub fn new(
        transport: Arc<dyn Transport>,
        governor: Arc<ConcurrencyGovernor>,
        topic: impl Into<String>,
        body: BodySource,
    ) -> Self {
        Self {
            transport,
            governor,
            topic: topic.into(),
            body,
        }
    }

    pub fn from_config(
        transport: Arc<dyn Transport>,
        config: &PublisherConfig,
    ) -> Result<Self, ConfigError> {
        let governor = ConcurrencyGovernor::new(config.limit, config.low_water)?;
        Ok(Self::new(
            transport,
            Arc::new(governor),
            config.topic.clone(),
            BodySource::Fixed(config.body.clone()),
        ))
    }

    pub fn governor(&self) -> &Arc<ConcurrencyGovernor> {
        &self.governor
    }

    /// Publish `total` messages and wait for every unit of work to finish.
    pub async fn run(&self, total: u64) -> PublishReport {
        let counters = Arc::new(PublishCounters::default());
        let mut units = JoinSet::new();

        for seq in 0..total {
            let permit = self.governor.acquire().await;
            let slot = BatchSlot::take(&counters);
            let transport = Arc::clone(&self.transport);
            let counters_for_unit = Arc::clone(&counters);
            let topic = self.topic.clone();
            let body = self.body.body_for(seq);

            units.spawn(async move {
                let _permit = permit;
                let _slot = slot;
                match transport.publish(&topic, &body).await {
                    Ok(message_id) => {
                        let sent = counters_for_unit.succeeded.fetch_add(1, Ordering::AcqRel) + 1;
                        tracing::debug!(%message_id, seq, sent, "published");
                    }
                    Err(e) => {
                        counters_for_unit.failed.fetch_add(1, Ordering::AcqRel);
                        tracing::warn!(seq, error = %e, "publish failed");
                    }
                }
            });

            while let Some(res) = units.try_join_next() {
                reap(res, &counters);
            }
        }

        while let Some(res) = units.join_next().await {
            reap(res, &counters);
        }

        let report = PublishReport {
            attempted: total,
            succeeded: counters.succeeded.load(Ordering::Acquire),
            failed: counters.failed.load(Ordering::Acquire),
            peak_in_flight: counters.peak.load(Ordering::Acquire),
        };
        tracing::info!(
            topic = %self.topic,
            attempted = report.attempted,
            succeeded = report.succeeded,
            failed = report.failed,
            peak_in_flight = report.peak_in_flight,
            "publish batch drained"
        );
        report
    }
}

/// A unit of work that panicked never reached its own counter update.
fn reap(res: Result<(), JoinError>, counters: &PublishCounters) {
    if let Err(e) = res {
        counters.failed.fetch_add(1, Ordering::AcqRel);
        tracing::error!(error = %e, "publish task aborted");
    }
}
