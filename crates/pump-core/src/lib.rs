//! pump-core
//!
//! Core building blocks for the queue pump.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（envelope, payload, metrics, errors）
//! - **ports**: 抽象化レイヤー（Transport, PayloadStore）
//! - **typed**: 型付き JSON codec（Notification → Payload の二段デコード）
//! - **app**: アプリケーションロジック（governor, publisher_loop, consumer_loop, config, status）
//! - **impls**: 実装（InMemoryTransport, FsPayloadStore）

pub mod domain;
pub mod ports;
pub mod typed;
pub mod app;
pub mod impls;

pub use domain::{Envelope, Metrics, Notification, Payload, PumpError};
pub use app::{ConsumerLoop, PublisherLoop, PumpConfig};
