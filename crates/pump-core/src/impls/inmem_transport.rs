//! InMemoryTransport - 開発用の queue/topic サービス
//!
//! # 学習ポイント
//! - tokio の Mutex + Notify による long-poll receive
//! - visibility timeout と delivery ごとの receipt
//! - topic → queue の fan-out（Notification で包んで配送）

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};
use ulid::Ulid;

use crate::domain::{Envelope, MessageId, Notification, ReceiptToken, TransportError};
use crate::ports::{ReceiveOptions, Transport};
use crate::typed::JsonCodec;

/// A message sitting in a queue.
#[derive(Debug, Clone)]
struct StoredMessage {
    id: MessageId,
    body: String,
    sent_at: DateTime<Utc>,
    sender: String,
    /// Receipt of the latest delivery; `None` until first received.
    receipt: Option<ReceiptToken>,
    visible_at: Instant,
    receive_count: u32,
}

impl StoredMessage {
    fn new(body: String, sender: &str) -> Self {
        Self {
            id: MessageId::new(Ulid::new().to_string()),
            body,
            sent_at: Utc::now(),
            sender: sender.to_string(),
            receipt: None,
            visible_at: Instant::now(),
            receive_count: 0,
        }
    }

    fn deliver(&mut self, queue: &str, opts: &ReceiveOptions, visible_at: Instant) -> Envelope {
        let receipt = ReceiptToken::new(Ulid::new().to_string());
        self.receipt = Some(receipt.clone());
        self.visible_at = visible_at;
        self.receive_count += 1;

        let attributes = [
            ("SentTimestamp", self.sent_at.timestamp_millis().to_string()),
            ("SenderId", self.sender.clone()),
            ("ApproximateReceiveCount", self.receive_count.to_string()),
        ];
        let mut envelope = Envelope::new(
            self.id.clone(),
            self.body.clone(),
            self.sent_at,
            queue,
            receipt,
        );
        for (name, value) in attributes {
            if opts.wants_attribute(name) {
                envelope = envelope.with_attribute(name, value);
            }
        }
        envelope
    }
}

#[derive(Default)]
struct InMemoryState {
    queues: HashMap<String, VecDeque<StoredMessage>>,
    /// topic -> subscribed queues
    subscriptions: HashMap<String, Vec<String>>,
    /// topic -> bodies published so far
    published: HashMap<String, Vec<String>>,
    fail_publishes: usize,
    fail_receives: usize,
    fail_deletes: usize,
    delete_calls: Vec<ReceiptToken>,
}

/// In-memory queue/topic service.
///
/// # 使用例
/// ```ignore
/// let transport = InMemoryTransport::new();
/// transport.subscribe("pub-seed", "pub-seed-queue").await;
/// transport.publish("pub-seed", r#"{"channel":"buu","name":"john","msg":"doe"}"#).await?;
/// let envelopes = transport.receive("pub-seed-queue", &ReceiveOptions::default()).await?;
/// ```
pub struct InMemoryTransport {
    state: Mutex<InMemoryState>,
    notify: Notify,
    codec: JsonCodec,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(InMemoryState::default()),
            notify: Notify::new(),
            codec: JsonCodec::new(),
        }
    }

    pub async fn create_queue(&self, queue: &str) {
        let mut state = self.state.lock().await;
        state.queues.entry(queue.to_string()).or_default();
    }

    pub async fn create_topic(&self, topic: &str) {
        let mut state = self.state.lock().await;
        state.subscriptions.entry(topic.to_string()).or_default();
        state.published.entry(topic.to_string()).or_default();
    }

    /// Route every future publish on `topic` to `queue`, creating both if needed.
    pub async fn subscribe(&self, topic: &str, queue: &str) {
        let mut state = self.state.lock().await;
        state.queues.entry(queue.to_string()).or_default();
        state.published.entry(topic.to_string()).or_default();
        let subscribers = state.subscriptions.entry(topic.to_string()).or_default();
        if !subscribers.iter().any(|q| q == queue) {
            subscribers.push(queue.to_string());
        }
    }

    /// Put a raw body straight onto a queue, bypassing any topic.
    pub async fn send(&self, queue: &str, body: impl Into<String>) -> Result<MessageId, TransportError> {
        let mut state = self.state.lock().await;
        let messages = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| TransportError::UnknownQueue(queue.to_string()))?;
        let message = StoredMessage::new(body.into(), "direct");
        let id = message.id.clone();
        messages.push_back(message);
        drop(state);
        self.notify.notify_waiters();
        Ok(id)
    }

    /// The next `n` publishes fail with `Rejected`.
    pub async fn fail_next_publishes(&self, n: usize) {
        self.state.lock().await.fail_publishes = n;
    }

    /// The next `n` receives fail with `Unavailable`.
    pub async fn fail_next_receives(&self, n: usize) {
        self.state.lock().await.fail_receives = n;
    }

    /// The next `n` deletes fail with `Unavailable`.
    pub async fn fail_next_deletes(&self, n: usize) {
        self.state.lock().await.fail_deletes = n;
    }

    /// Receipts passed to `delete`, in call order (failed calls included).
    pub async fn delete_calls(&self) -> Vec<ReceiptToken> {
        self.state.lock().await.delete_calls.clone()
    }

    /// Messages still on the queue, visible or not.
    pub async fn pending(&self, queue: &str) -> usize {
        let state = self.state.lock().await;
        state.queues.get(queue).map_or(0, VecDeque::len)
    }

    pub async fn published(&self, topic: &str) -> Vec<String> {
        let state = self.state.lock().await;
        state.published.get(topic).cloned().unwrap_or_default()
    }

    fn take_visible(
        state: &mut InMemoryState,
        queue: &str,
        opts: &ReceiveOptions,
    ) -> Result<Vec<Envelope>, TransportError> {
        let messages = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| TransportError::UnknownQueue(queue.to_string()))?;
        let now = Instant::now();
        // checked before any message is touched
        let visible_at = now.checked_add(opts.visibility_timeout).ok_or_else(|| {
            TransportError::Rejected(format!(
                "visibility timeout {:?} out of range",
                opts.visibility_timeout
            ))
        })?;
        let envelopes = messages
            .iter_mut()
            .filter(|m| m.visible_at <= now)
            .take(opts.max_messages)
            .map(|m| m.deliver(queue, opts, visible_at))
            .collect();
        Ok(envelopes)
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn receive(
        &self,
        queue: &str,
        opts: &ReceiveOptions,
    ) -> Result<Vec<Envelope>, TransportError> {
        let deadline = Instant::now().checked_add(opts.wait_time).ok_or_else(|| {
            TransportError::Rejected(format!("wait time {:?} out of range", opts.wait_time))
        })?;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock().await;
                if state.fail_receives > 0 {
                    state.fail_receives -= 1;
                    return Err(TransportError::Unavailable(format!("receive from {queue}")));
                }
                let envelopes = Self::take_visible(&mut state, queue, opts)?;
                if !envelopes.is_empty() {
                    return Ok(envelopes);
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(Vec::new());
            }
            // Woken by a send/publish, or re-check once hidden messages may be visible again.
            let _ = tokio::time::timeout(remaining.min(Duration::from_millis(50)), notified).await;
        }
    }

    async fn delete(&self, queue: &str, receipt: &ReceiptToken) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;
        state.delete_calls.push(receipt.clone());
        if state.fail_deletes > 0 {
            state.fail_deletes -= 1;
            return Err(TransportError::Unavailable(format!("delete from {queue}")));
        }
        let messages = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| TransportError::UnknownQueue(queue.to_string()))?;
        let position = messages
            .iter()
            .position(|m| m.receipt.as_ref() == Some(receipt))
            .ok_or_else(|| TransportError::InvalidReceipt(receipt.to_string()))?;
        messages.remove(position);
        Ok(())
    }

    async fn publish(&self, topic: &str, body: &str) -> Result<MessageId, TransportError> {
        let mut state = self.state.lock().await;
        if state.fail_publishes > 0 {
            state.fail_publishes -= 1;
            return Err(TransportError::Rejected(format!("publish to {topic}")));
        }
        let subscribers = state
            .subscriptions
            .get(topic)
            .cloned()
            .ok_or_else(|| TransportError::UnknownTopic(topic.to_string()))?;

        let message_id = MessageId::new(Ulid::new().to_string());
        let notification = Notification::wrap(message_id.as_str(), topic, body, Utc::now());
        let wrapped = self
            .codec
            .encode(&notification)
            .map_err(|e| TransportError::Rejected(e.to_string()))?;
        let wrapped = String::from_utf8(wrapped)
            .map_err(|e| TransportError::Rejected(e.to_string()))?;

        for queue in &subscribers {
            if let Some(messages) = state.queues.get_mut(queue) {
                messages.push_back(StoredMessage::new(wrapped.clone(), topic));
            }
        }
        state
            .published
            .entry(topic.to_string())
            .or_default()
            .push(body.to_string());
        drop(state);

        self.notify.notify_waiters();
        Ok(message_id)
    }
}
