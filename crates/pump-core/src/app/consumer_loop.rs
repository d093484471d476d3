//! ConsumerLoop - キュー消費ループ
//!
//! # フロー（1 サイクル）
//! 1. Polling: Transport::receive(max_messages=1)。空なら何もせず次の tick へ
//! 2. Processing: body → Notification → Payload の二段デコード
//! 3. PayloadStore::persist で `<message_id>.json` に保存
//! 4. Acknowledging: Transport::delete(receipt)。成功してから acknowledged を数える
//!
//! envelope i の persist + delete が終わるまで envelope i+1 には進まない。
//! 失敗時の扱いは `ErrorPolicy` で決める（ここでプロセスを止めることはしない）。

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::config::ConsumerConfig;
use super::retry::RetryPolicy;
use crate::domain::{Envelope, Metrics, PumpError, TransportError};
use crate::ports::{PayloadStore, ReceiveOptions, Transport};
use crate::typed::JsonCodec;

/// What the loop does when a message cannot be processed.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Stop the loop and hand the error to the caller.
    #[default]
    Halt,
    /// Log, leave the message on the queue for redelivery, keep polling.
    Skip,
    /// Publish the raw body to `topic`, delete the original, keep polling.
    DeadLetter { topic: String },
}

/// Result of one successfully processed envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Processed {
    /// Storage key the payload was written under.
    pub key: String,
    pub bytes_written: u64,
}

enum CycleError {
    /// The receive call itself failed; no message was touched.
    Receive(TransportError),
    Halt(PumpError),
}

pub struct ConsumerLoop {
    transport: Arc<dyn Transport>,
    store: Arc<dyn PayloadStore>,
    metrics: Arc<Metrics>,
    codec: JsonCodec,
    queue: String,
    receive: ReceiveOptions,
    poll_interval: Duration,
    policy: ErrorPolicy,
    retry: RetryPolicy,
}

impl ConsumerLoop {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn PayloadStore>,
        metrics: Arc<Metrics>,
        queue: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            store,
            metrics,
            codec: JsonCodec::new(),
            queue: queue.into(),
            receive: ReceiveOptions::default(),
            poll_interval: Duration::from_millis(1),
            policy: ErrorPolicy::Halt,
            retry: RetryPolicy::default(),
        }
    }

    pub fn from_config(
        transport: Arc<dyn Transport>,
        store: Arc<dyn PayloadStore>,
        metrics: Arc<Metrics>,
        config: &ConsumerConfig,
    ) -> Self {
        Self::new(transport, store, metrics, config.queue.clone())
            .with_receive_options(config.receive_options())
            .with_poll_interval(config.poll_interval())
            .with_policy(config.error_policy.clone())
            .with_retry(config.retry_policy())
    }

    pub fn with_receive_options(mut self, receive: ReceiveOptions) -> Self {
        self.receive = receive;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        // tokio's interval panics on a zero period
        self.poll_interval = poll_interval.max(Duration::from_millis(1));
        self
    }

    pub fn with_policy(mut self, policy: ErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// One Polling → Processing → Acknowledging cycle.
    ///
    /// Returns how many envelopes were processed and acknowledged.
    pub async fn poll_once(&self) -> Result<usize, PumpError> {
        self.cycle().await.map_err(|e| match e {
            CycleError::Receive(e) => PumpError::Transport(e),
            CycleError::Halt(e) => e,
        })
    }

    async fn cycle(&self) -> Result<usize, CycleError> {
        let envelopes = self
            .transport
            .receive(&self.queue, &self.receive)
            .await
            .map_err(CycleError::Receive)?;
        if envelopes.len() > self.receive.max_messages {
            tracing::warn!(
                got = envelopes.len(),
                asked = self.receive.max_messages,
                "transport returned more envelopes than requested"
            );
        }

        let batch = envelopes.len();
        let mut acknowledged = 0;
        for envelope in &envelopes {
            let received = self.metrics.record_received();
            match self.process(envelope).await {
                Ok(processed) => {
                    acknowledged += 1;
                    tracing::debug!(
                        message_id = %envelope.message_id(),
                        batch,
                        received,
                        acknowledged = self.metrics.acknowledged(),
                        bytes_written = processed.bytes_written,
                        key = %processed.key,
                        bytes_total = self.metrics.bytes_persisted(),
                        "envelope processed"
                    );
                }
                Err(err) => self.on_failure(envelope, err).await.map_err(CycleError::Halt)?,
            }
        }
        Ok(acknowledged)
    }

    /// Decode, persist, then delete one envelope.
    #[tracing::instrument(skip(self, envelope), fields(message_id = %envelope.message_id()))]
    pub async fn process(&self, envelope: &Envelope) -> Result<Processed, PumpError> {
        let (notification, payload) = self.codec.decode_envelope_body(envelope.body())?;
        let key = if notification.message_id.is_empty() {
            envelope.message_id().as_str().to_string()
        } else {
            notification.message_id
        };

        let bytes_written = self.store.persist(&key, &payload).await?;
        self.metrics.record_persisted(bytes_written);

        self.transport.delete(&self.queue, envelope.receipt()).await?;
        self.metrics.record_acknowledged();

        Ok(Processed { key, bytes_written })
    }

    async fn on_failure(&self, envelope: &Envelope, err: PumpError) -> Result<(), PumpError> {
        let message_id = envelope.message_id();
        match &self.policy {
            ErrorPolicy::Halt => {
                self.metrics.record_failed();
                tracing::error!(%message_id, kind = ?err.kind(), error = %err, "halting consumer");
                Err(err)
            }
            ErrorPolicy::DeadLetter { topic } if !matches!(err, PumpError::Transport(_)) => {
                tracing::warn!(%message_id, %topic, error = %err, "dead-lettering message");
                if let Err(dl_err) = self.dead_letter(topic, envelope).await {
                    self.metrics.record_failed();
                    tracing::error!(%message_id, error = %dl_err, "dead-letter failed, halting consumer");
                    return Err(dl_err);
                }
                self.metrics.record_dead_lettered();
                self.metrics.record_acknowledged();
                Ok(())
            }
            // a failed delete leaves the payload on disk; redelivery overwrites it
            ErrorPolicy::Skip | ErrorPolicy::DeadLetter { .. } => {
                self.metrics.record_failed();
                tracing::warn!(%message_id, kind = ?err.kind(), error = %err, "skipping message");
                Ok(())
            }
        }
    }

    async fn dead_letter(&self, topic: &str, envelope: &Envelope) -> Result<(), PumpError> {
        self.transport.publish(topic, envelope.body()).await?;
        self.transport.delete(&self.queue, envelope.receipt()).await?;
        Ok(())
    }

    /// Poll on a fixed tick until `shutdown` flips to `true` (or its sender is
    /// dropped). Returns `Err` when the error policy halts the loop.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), PumpError> {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut receive_failures: u32 = 0;

        tracing::info!(queue = %self.queue, policy = ?self.policy, "consumer started");
        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                _ = ticker.tick() => {}
            }

            match self.cycle().await {
                Ok(_) => receive_failures = 0,
                Err(CycleError::Halt(err)) => return Err(err),
                Err(CycleError::Receive(err)) => {
                    if self.policy == ErrorPolicy::Halt {
                        tracing::error!(error = %err, "receive failed, halting consumer");
                        return Err(err.into());
                    }
                    receive_failures = receive_failures.saturating_add(1);
                    let delay = self.retry.next_delay(receive_failures);
                    tracing::warn!(error = %err, receive_failures, ?delay, "receive failed, backing off");
                    tokio::select! {
                        changed = shutdown.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        let snapshot = self.metrics.snapshot();
        tracing::info!(
            received = snapshot.received,
            acknowledged = snapshot.acknowledged,
            bytes_persisted = snapshot.bytes_persisted,
            "consumer stopped"
        );
        Ok(())
    }

    /// Run on a background task.
    pub fn spawn(self) -> ConsumerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(async move { self.run(shutdown_rx).await });
        ConsumerHandle {
            shutdown_tx,
            task: join,
        }
    }
}

/// Consumer task handle.
/// - `request_shutdown()` で次の tick 前に止まる（処理中の envelope は最後まで処理する）
/// - `shutdown_and_join()` で終了を待ち、ループの結果を受け取る
pub struct ConsumerHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<Result<(), PumpError>>,
}

impl ConsumerHandle {
    pub fn request_shutdown(&self) {
        // receiver may already be gone if the loop halted
        let _ = self.shutdown_tx.send(true);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Shutdown and wait for the loop.
    pub async fn shutdown_and_join(self) -> Result<(), PumpError> {
        self.request_shutdown();
        self.join_loop().await
    }

    /// Wait for the loop to stop on its own (a halt), without asking it to.
    pub async fn join(self) -> Result<(), PumpError> {
        self.join_loop().await
    }

    async fn join_loop(self) -> Result<(), PumpError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MessageId, Payload, PersistenceError, ReceiptToken};
    use crate::impls::{FsPayloadStore, InMemoryTransport};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;

    const Q: &str = "pub-seed-queue";
    const T: &str = "pub-seed";
    const DLQ: &str = "pub-seed-dlq";
    const SCENARIO_BODY: &str = r#"{"Type":"Notification","MessageId":"abc-1","Message":"{\"channel\":\"buu\",\"name\":\"john\",\"msg\":\"doe\"}"}"#;

    struct Fixture {
        transport: Arc<InMemoryTransport>,
        store: Arc<FsPayloadStore>,
        metrics: Arc<Metrics>,
        _dir: tempfile::TempDir,
    }

    impl Fixture {
        async fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let transport = Arc::new(InMemoryTransport::new());
            transport.subscribe(T, Q).await;
            transport.create_topic(DLQ).await;
            let store = Arc::new(FsPayloadStore::open(dir.path()).await.unwrap());
            Self {
                transport,
                store,
                metrics: Arc::new(Metrics::new()),
                _dir: dir,
            }
        }

        fn consumer(&self) -> ConsumerLoop {
            ConsumerLoop::new(
                self.transport.clone(),
                self.store.clone(),
                self.metrics.clone(),
                Q,
            )
        }

        fn files(&self) -> Vec<String> {
            let mut names: Vec<String> = std::fs::read_dir(self.store.dir())
                .unwrap()
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect();
            names.sort();
            names
        }

        fn read(&self, key: &str) -> Payload {
            serde_json::from_slice(&std::fs::read(self.store.path_for(key)).unwrap()).unwrap()
        }
    }

    /// Hands out a fixed batch once, records deletes.
    struct BatchTransport {
        batch: Mutex<Option<Vec<Envelope>>>,
        deleted: Mutex<Vec<ReceiptToken>>,
    }

    #[async_trait]
    impl Transport for BatchTransport {
        async fn receive(
            &self,
            _queue: &str,
            _opts: &ReceiveOptions,
        ) -> Result<Vec<Envelope>, TransportError> {
            Ok(self.batch.lock().unwrap().take().unwrap_or_default())
        }

        async fn delete(&self, _queue: &str, receipt: &ReceiptToken) -> Result<(), TransportError> {
            self.deleted.lock().unwrap().push(receipt.clone());
            Ok(())
        }

        async fn publish(&self, _topic: &str, _body: &str) -> Result<MessageId, TransportError> {
            Ok(MessageId::new("unused"))
        }
    }

    /// Records keys in persist order; optionally fails every write.
    #[derive(Default)]
    struct RecordingStore {
        keys: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl PayloadStore for RecordingStore {
        async fn persist(&self, key: &str, _payload: &Payload) -> Result<u64, PersistenceError> {
            if self.fail {
                return Err(PersistenceError::Io {
                    path: key.into(),
                    source: std::io::Error::other("disk full"),
                });
            }
            self.keys.lock().unwrap().push(key.to_string());
            Ok(1)
        }
    }

    fn envelope(id: &str, body: &str) -> Envelope {
        Envelope::new(
            MessageId::new(id),
            body,
            Utc::now(),
            Q,
            ReceiptToken::new(format!("receipt-{id}")),
        )
    }

    fn payload_body(id: &str, channel: &str) -> String {
        let inner = serde_json::json!({ "channel": channel, "name": "john", "msg": "doe" }).to_string();
        serde_json::json!({ "Type": "Notification", "MessageId": id, "Message": inner }).to_string()
    }

    #[tokio::test]
    async fn scenario_single_notification_is_persisted_and_deleted() {
        let fx = Fixture::new().await;
        fx.transport.send(Q, SCENARIO_BODY).await.unwrap();

        let acked = fx.consumer().poll_once().await.unwrap();

        assert_eq!(acked, 1);
        assert_eq!(fx.files(), vec!["abc-1.json".to_string()]);
        assert_eq!(fx.read("abc-1"), Payload::new("buu", "john", "doe"));
        assert_eq!(fx.metrics.received(), 1);
        assert_eq!(fx.metrics.acknowledged(), 1);
        assert_eq!(fx.transport.delete_calls().await.len(), 1);
        assert_eq!(fx.transport.pending(Q).await, 0);
        let on_disk = std::fs::metadata(fx.store.path_for("abc-1")).unwrap().len();
        assert_eq!(fx.metrics.bytes_persisted(), on_disk);
    }

    #[tokio::test]
    async fn delete_uses_the_envelopes_receipt() {
        let transport = Arc::new(BatchTransport {
            batch: Mutex::new(Some(vec![envelope("e-1", SCENARIO_BODY)])),
            deleted: Mutex::new(Vec::new()),
        });
        let store = Arc::new(RecordingStore::default());
        let consumer = ConsumerLoop::new(transport.clone(), store, Arc::new(Metrics::new()), Q);

        consumer.poll_once().await.unwrap();

        assert_eq!(
            *transport.deleted.lock().unwrap(),
            vec![ReceiptToken::new("receipt-e-1")]
        );
    }

    #[tokio::test]
    async fn n_published_messages_give_n_files() {
        let fx = Fixture::new().await;
        for i in 0..5 {
            fx.transport
                .publish(T, &format!(r#"{{"channel":"c{i}","name":"n","msg":"m"}}"#))
                .await
                .unwrap();
        }
        let consumer = fx.consumer();

        let mut acked = 0;
        while acked < 5 {
            acked += consumer.poll_once().await.unwrap();
        }

        assert_eq!(consumer.poll_once().await.unwrap(), 0);
        assert_eq!(fx.files().len(), 5);
        assert_eq!(fx.metrics.received(), 5);
        assert_eq!(fx.metrics.acknowledged(), 5);
        assert_eq!(fx.transport.pending(Q).await, 0);
    }

    #[tokio::test]
    async fn oversized_batch_is_processed_in_order() {
        let batch = vec![
            envelope("e-1", &payload_body("k-1", "a")),
            envelope("e-2", &payload_body("k-2", "b")),
            envelope("e-3", &payload_body("k-3", "c")),
        ];
        let transport = Arc::new(BatchTransport {
            batch: Mutex::new(Some(batch)),
            deleted: Mutex::new(Vec::new()),
        });
        let store = Arc::new(RecordingStore::default());
        let metrics = Arc::new(Metrics::new());
        let consumer = ConsumerLoop::new(transport.clone(), store.clone(), metrics.clone(), Q);

        assert_eq!(consumer.poll_once().await.unwrap(), 3);
        assert_eq!(*store.keys.lock().unwrap(), vec!["k-1", "k-2", "k-3"]);
        assert_eq!(transport.deleted.lock().unwrap().len(), 3);
        assert_eq!(metrics.acknowledged(), 3);
    }

    #[tokio::test]
    async fn missing_notification_id_falls_back_to_envelope_id() {
        let body = r#"{"Message":"{\"channel\":\"c\",\"name\":\"n\",\"msg\":\"m\"}"}"#;
        let transport = Arc::new(BatchTransport {
            batch: Mutex::new(Some(vec![envelope("env-9", body)])),
            deleted: Mutex::new(Vec::new()),
        });
        let store = Arc::new(RecordingStore::default());
        let consumer = ConsumerLoop::new(transport, store.clone(), Arc::new(Metrics::new()), Q);

        consumer.poll_once().await.unwrap();
        assert_eq!(*store.keys.lock().unwrap(), vec!["env-9"]);
    }

    #[tokio::test]
    async fn malformed_body_halts_by_default() {
        let fx = Fixture::new().await;
        fx.transport.send(Q, "this is not json").await.unwrap();

        let err = fx.consumer().poll_once().await.unwrap_err();

        assert!(matches!(err, PumpError::Decode(_)));
        assert_eq!(fx.metrics.received(), 1);
        assert_eq!(fx.metrics.acknowledged(), 0);
        assert_eq!(fx.metrics.failed(), 1);
        assert_eq!(fx.transport.pending(Q).await, 1);
        assert!(fx.files().is_empty());
    }

    #[tokio::test]
    async fn malformed_inner_payload_halts_the_running_loop() {
        let fx = Fixture::new().await;
        let body = r#"{"Type":"Notification","MessageId":"bad","Message":"{\"channel\":42}"}"#;
        fx.transport.send(Q, body).await.unwrap();

        let handle = fx.consumer().spawn();
        let result = tokio::time::timeout(Duration::from_secs(5), handle.join())
            .await
            .unwrap();

        assert!(matches!(result, Err(PumpError::Decode(e)) if e.shape == "Payload"));
        assert_eq!(fx.transport.pending(Q).await, 1);
    }

    #[tokio::test]
    async fn persistence_failure_halts_before_delete() {
        let transport = Arc::new(BatchTransport {
            batch: Mutex::new(Some(vec![envelope("e-1", SCENARIO_BODY)])),
            deleted: Mutex::new(Vec::new()),
        });
        let store = Arc::new(RecordingStore {
            fail: true,
            ..RecordingStore::default()
        });
        let metrics = Arc::new(Metrics::new());
        let consumer = ConsumerLoop::new(transport.clone(), store, metrics.clone(), Q);

        let err = consumer.poll_once().await.unwrap_err();

        assert!(matches!(err, PumpError::Persistence(_)));
        assert!(transport.deleted.lock().unwrap().is_empty());
        assert_eq!(metrics.acknowledged(), 0);
        assert_eq!(metrics.bytes_persisted(), 0);
    }

    #[tokio::test]
    async fn delete_failure_halts_after_persisting() {
        let fx = Fixture::new().await;
        fx.transport.send(Q, SCENARIO_BODY).await.unwrap();
        fx.transport.fail_next_deletes(1).await;

        let err = fx.consumer().poll_once().await.unwrap_err();

        assert!(matches!(err, PumpError::Transport(TransportError::Unavailable(_))));
        assert_eq!(fx.files(), vec!["abc-1.json".to_string()]);
        assert_eq!(fx.metrics.acknowledged(), 0);
        assert_eq!(fx.transport.pending(Q).await, 1);
    }

    #[tokio::test]
    async fn redelivery_after_failed_delete_overwrites_same_file() {
        let fx = Fixture::new().await;
        fx.transport.send(Q, SCENARIO_BODY).await.unwrap();
        fx.transport.fail_next_deletes(1).await;
        let consumer = fx.consumer().with_policy(ErrorPolicy::Skip);

        assert_eq!(consumer.poll_once().await.unwrap(), 0);
        let first = std::fs::read(fx.store.path_for("abc-1")).unwrap();
        assert_eq!(consumer.poll_once().await.unwrap(), 1);
        let second = std::fs::read(fx.store.path_for("abc-1")).unwrap();

        assert_eq!(first, second);
        assert_eq!(fx.files().len(), 1);
        assert_eq!(fx.metrics.received(), 2);
        assert_eq!(fx.metrics.acknowledged(), 1);
        assert_eq!(fx.metrics.failed(), 1);
    }

    #[tokio::test]
    async fn skip_policy_leaves_bad_message_and_moves_on() {
        let fx = Fixture::new().await;
        fx.transport.send(Q, "garbage").await.unwrap();
        fx.transport.send(Q, SCENARIO_BODY).await.unwrap();
        let consumer = fx
            .consumer()
            .with_policy(ErrorPolicy::Skip)
            .with_receive_options(ReceiveOptions {
                visibility_timeout: Duration::from_secs(30),
                ..ReceiveOptions::default()
            });

        assert_eq!(consumer.poll_once().await.unwrap(), 0);
        assert_eq!(consumer.poll_once().await.unwrap(), 1);

        assert_eq!(fx.files(), vec!["abc-1.json".to_string()]);
        assert_eq!(fx.metrics.failed(), 1);
        assert_eq!(fx.metrics.acknowledged(), 1);
        assert_eq!(fx.transport.pending(Q).await, 1);
    }

    #[tokio::test]
    async fn dead_letter_policy_moves_bad_message_to_topic() {
        let fx = Fixture::new().await;
        fx.transport.send(Q, "garbage").await.unwrap();
        let consumer = fx.consumer().with_policy(ErrorPolicy::DeadLetter {
            topic: DLQ.to_string(),
        });

        assert_eq!(consumer.poll_once().await.unwrap(), 0);

        assert_eq!(fx.transport.published(DLQ).await, vec!["garbage".to_string()]);
        assert_eq!(fx.transport.pending(Q).await, 0);
        assert_eq!(fx.metrics.dead_lettered(), 1);
        assert_eq!(fx.metrics.acknowledged(), 1);
        assert_eq!(fx.metrics.snapshot().outstanding(), 0);
    }

    #[tokio::test]
    async fn failing_dead_letter_publish_halts() {
        let fx = Fixture::new().await;
        fx.transport.send(Q, "garbage").await.unwrap();
        fx.transport.fail_next_publishes(1).await;
        let consumer = fx.consumer().with_policy(ErrorPolicy::DeadLetter {
            topic: DLQ.to_string(),
        });

        let err = consumer.poll_once().await.unwrap_err();

        assert!(matches!(err, PumpError::Transport(TransportError::Rejected(_))));
        assert_eq!(fx.transport.pending(Q).await, 1);
        assert_eq!(fx.metrics.failed(), 1);
    }

    #[tokio::test]
    async fn receive_failure_halts_under_default_policy() {
        let fx = Fixture::new().await;
        fx.transport.fail_next_receives(1).await;

        let result = tokio::time::timeout(Duration::from_secs(5), fx.consumer().spawn().join())
            .await
            .unwrap();

        assert!(matches!(result, Err(PumpError::Transport(_))));
    }

    #[tokio::test]
    async fn out_of_range_visibility_timeout_is_an_error_not_a_panic() {
        let fx = Fixture::new().await;
        fx.transport.send(Q, SCENARIO_BODY).await.unwrap();
        let consumer = fx.consumer().with_receive_options(ReceiveOptions {
            visibility_timeout: Duration::from_secs(i64::MAX as u64),
            ..ReceiveOptions::default()
        });

        let err = consumer.poll_once().await.unwrap_err();

        assert!(matches!(err, PumpError::Transport(TransportError::Rejected(_))));
        assert_eq!(fx.metrics.snapshot().received, 0);
        assert_eq!(fx.transport.pending(Q).await, 1);
    }

    #[tokio::test]
    async fn receive_failures_back_off_under_skip_policy() {
        let fx = Fixture::new().await;
        fx.transport.fail_next_receives(3).await;
        fx.transport.send(Q, SCENARIO_BODY).await.unwrap();
        let handle = fx
            .consumer()
            .with_policy(ErrorPolicy::Skip)
            .with_retry(RetryPolicy {
                base_delay: Duration::from_millis(1),
                multiplier: 2.0,
                max_delay: Duration::from_millis(10),
            })
            .spawn();

        wait_for_acks(&fx.metrics, 1).await;
        handle.shutdown_and_join().await.unwrap();
        assert_eq!(fx.files(), vec!["abc-1.json".to_string()]);
    }

    #[tokio::test]
    async fn run_drains_queue_and_stops_on_shutdown() {
        let fx = Fixture::new().await;
        let handle = fx.consumer().spawn();

        for i in 0..10 {
            fx.transport.send(Q, payload_body(&format!("k-{i}"), "c")).await.unwrap();
        }
        wait_for_acks(&fx.metrics, 10).await;
        handle.shutdown_and_join().await.unwrap();

        let snapshot = fx.metrics.snapshot();
        assert_eq!(snapshot.received, 10);
        assert_eq!(snapshot.acknowledged, 10);
        assert_eq!(fx.files().len(), 10);
        assert_eq!(fx.transport.pending(Q).await, 0);
    }

    #[tokio::test]
    async fn run_returns_immediately_if_already_shut_down() {
        let fx = Fixture::new().await;
        let (tx, rx) = watch::channel(true);
        fx.consumer().run(rx).await.unwrap();
        drop(tx);
        assert_eq!(fx.metrics.received(), 0);
    }

    #[tokio::test]
    async fn received_never_lags_acknowledged() {
        let fx = Fixture::new().await;
        let handle = fx.consumer().spawn();
        for i in 0..20 {
            fx.transport.send(Q, payload_body(&format!("k-{i}"), "c")).await.unwrap();
            let s = fx.metrics.snapshot();
            assert!(s.received >= s.acknowledged);
        }
        wait_for_acks(&fx.metrics, 20).await;
        handle.shutdown_and_join().await.unwrap();
    }

    async fn wait_for_acks(metrics: &Metrics, n: u64) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while metrics.acknowledged() < n {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .unwrap();
    }
}
