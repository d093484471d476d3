//! App - アプリケーション層
//!
//! ports を組み合わせてポンプのロジックを実装する。
//!
//! # 主要コンポーネント
//! - **ConcurrencyGovernor**: publish の同時実行数の上限（high/low-water）
//! - **PublisherLoop**: topic への並列 publish（governor で上限を守る）
//! - **ConsumerLoop**: receive→decode→persist→delete の逐次ループ
//! - **PumpConfig**: 起動時設定（TOML）
//! - **Status**: カウンタのスナップショット

pub mod config;
pub mod governor;
pub mod publisher_loop;
pub mod consumer_loop;
pub mod retry;
pub mod status;

// 主要な型を再エクスポート
pub use self::config::{ConsumerConfig, PublisherConfig, PumpConfig};
pub use self::governor::{ConcurrencyGovernor, GovernorPermit};
pub use self::publisher_loop::{BodySource, PublisherLoop};
pub use self::consumer_loop::{ConsumerHandle, ConsumerLoop, ErrorPolicy, Processed};
pub use self::retry::RetryPolicy;
pub use self::status::{MetricsSnapshot, PublishReport};
