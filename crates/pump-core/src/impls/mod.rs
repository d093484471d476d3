//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryTransport**: 開発用・テスト用の queue/topic サービス
//! - **FsPayloadStore**: ディレクトリに `<key>.json` を書く payload store
//!
//! 本物の queue/topic サービス向けの実装は別クレートに置く想定。

pub mod inmem_transport;
pub mod fs_store;

pub use self::inmem_transport::InMemoryTransport;
pub use self::fs_store::FsPayloadStore;
