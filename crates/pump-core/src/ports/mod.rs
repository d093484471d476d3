//! Ports - 抽象化レイヤー
//!
//! 外部システム（queue/topic サービス、ディスク）へのインターフェース。
//! コアのループはこの trait 越しにしか外部と話さない。
//!
//! # 設計原則
//! - ports にはリトライを入れない（リトライ方針はループ側が持つ）
//! - 実装は `impls` か別クレートに置く

pub mod transport;
pub mod payload_store;

pub use self::transport::{ReceiveOptions, Transport};
pub use self::payload_store::PayloadStore;
