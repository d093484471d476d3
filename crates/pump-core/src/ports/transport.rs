//! Transport port - queue/topic サービス
//!
//! # 実装
//! - InMemoryTransport（開発用・テスト用）: `impls::inmem_transport`

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{Envelope, MessageId, ReceiptToken, TransportError};

/// Parameters for a single receive call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveOptions {
    /// Upper bound on envelopes returned. The consumer always asks for 1.
    pub max_messages: usize,
    /// Long-poll wait; zero returns immediately.
    pub wait_time: Duration,
    /// How long a received message stays hidden from other receivers.
    pub visibility_timeout: Duration,
    /// Attribute allow-list. `"All"` requests every attribute.
    pub attribute_names: Vec<String>,
}

impl ReceiveOptions {
    pub const ALL_ATTRIBUTES: &'static str = "All";

    pub fn wants_attribute(&self, name: &str) -> bool {
        self.attribute_names
            .iter()
            .any(|a| a == Self::ALL_ATTRIBUTES || a == name)
    }
}

impl Default for ReceiveOptions {
    fn default() -> Self {
        Self {
            max_messages: 1,
            wait_time: Duration::ZERO,
            visibility_timeout: Duration::ZERO,
            attribute_names: vec![Self::ALL_ATTRIBUTES.to_string()],
        }
    }
}

/// Transport は queue からの受信・削除と topic への発行を提供
///
/// どの呼び出しもリトライしない。失敗はそのまま `TransportError` で返す。
#[async_trait]
pub trait Transport: Send + Sync {
    /// Receive up to `opts.max_messages` envelopes. An empty vec means the queue
    /// had nothing visible.
    async fn receive(
        &self,
        queue: &str,
        opts: &ReceiveOptions,
    ) -> Result<Vec<Envelope>, TransportError>;

    /// Acknowledge one delivery so the message is not redelivered.
    async fn delete(&self, queue: &str, receipt: &ReceiptToken) -> Result<(), TransportError>;

    async fn publish(&self, topic: &str, body: &str) -> Result<MessageId, TransportError>;
}
