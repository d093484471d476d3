//! PumpConfig - 起動時設定
//!
//! TOML ファイルから読み込む。全フィールドに default があるので、
//! 上書きしたい項目だけ書けばよい。
//!
//! ```toml
//! [consumer]
//! queue = "pub-seed-queue"
//! storage_dir = "messages"
//! poll_interval_ms = 1
//! error_policy = { kind = "dead_letter", topic = "pub-seed-dlq" }
//!
//! [publisher]
//! topic = "pub-seed"
//! total = 100
//! limit = 10
//! low_water = 5
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::consumer_loop::ErrorPolicy;
use super::retry::RetryPolicy;
use crate::domain::ConfigError;
use crate::ports::ReceiveOptions;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PumpConfig {
    pub consumer: ConsumerConfig,
    pub publisher: PublisherConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    pub queue: String,
    pub storage_dir: PathBuf,
    pub poll_interval_ms: u64,
    pub wait_time_secs: u64,
    pub visibility_timeout_secs: u64,
    pub attribute_names: Vec<String>,
    pub error_policy: ErrorPolicy,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl ConsumerConfig {
    /// Longest long-poll a receive may ask for.
    pub const MAX_WAIT_TIME_SECS: u64 = 20;
    /// Longest a received message may stay hidden (12 h).
    pub const MAX_VISIBILITY_TIMEOUT_SECS: u64 = 12 * 60 * 60;

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn receive_options(&self) -> ReceiveOptions {
        ReceiveOptions {
            max_messages: 1,
            wait_time: Duration::from_secs(self.wait_time_secs),
            visibility_timeout: Duration::from_secs(self.visibility_timeout_secs),
            attribute_names: self.attribute_names.clone(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(self.backoff_base_ms),
            max_delay: Duration::from_millis(self.backoff_max_ms),
            ..RetryPolicy::default()
        }
    }
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            queue: "pub-seed-queue".to_string(),
            storage_dir: PathBuf::from("messages"),
            poll_interval_ms: 1,
            wait_time_secs: 0,
            visibility_timeout_secs: 0,
            attribute_names: vec![ReceiveOptions::ALL_ATTRIBUTES.to_string()],
            error_policy: ErrorPolicy::Halt,
            backoff_base_ms: 100,
            backoff_max_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    pub topic: String,
    /// Number of messages one batch publishes.
    pub total: u64,
    /// Maximum in-flight publishes.
    pub limit: usize,
    /// Once saturated, launching resumes when in-flight drops to this.
    pub low_water: usize,
    pub body: String,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            topic: "pub-seed".to_string(),
            total: 100,
            limit: 100,
            low_water: 99,
            body: r#"{"channel":"buu","name":"john", "msg":"doe"}"#.to_string(),
        }
    }
}

impl PumpConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: PumpConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let c = &self.consumer;
        let p = &self.publisher;
        if c.queue.is_empty() {
            return Err(ConfigError::Invalid("consumer.queue is empty".into()));
        }
        if c.storage_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("consumer.storage_dir is empty".into()));
        }
        if c.wait_time_secs > ConsumerConfig::MAX_WAIT_TIME_SECS {
            return Err(ConfigError::Invalid(format!(
                "consumer.wait_time_secs ({}) exceeds {}",
                c.wait_time_secs,
                ConsumerConfig::MAX_WAIT_TIME_SECS
            )));
        }
        if c.visibility_timeout_secs > ConsumerConfig::MAX_VISIBILITY_TIMEOUT_SECS {
            return Err(ConfigError::Invalid(format!(
                "consumer.visibility_timeout_secs ({}) exceeds {}",
                c.visibility_timeout_secs,
                ConsumerConfig::MAX_VISIBILITY_TIMEOUT_SECS
            )));
        }
        if c.backoff_max_ms < c.backoff_base_ms {
            return Err(ConfigError::Invalid(
                "consumer.backoff_max_ms is below consumer.backoff_base_ms".into(),
            ));
        }
        if let ErrorPolicy::DeadLetter { topic } = &c.error_policy
            && topic.is_empty()
        {
            return Err(ConfigError::Invalid("dead-letter topic is empty".into()));
        }
        if p.topic.is_empty() {
            return Err(ConfigError::Invalid("publisher.topic is empty".into()));
        }
        if p.limit == 0 {
            return Err(ConfigError::Invalid("publisher.limit must be > 0".into()));
        }
        if p.low_water >= p.limit {
            return Err(ConfigError::Invalid(format!(
                "publisher.low_water ({}) must be below publisher.limit ({})",
                p.low_water, p.limit
            )));
        }
        Ok(())
    }
}
