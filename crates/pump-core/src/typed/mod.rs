//! Typed - 型付き JSON codec
//!
//! envelope body の二段デコード（Notification → Payload）と
//! 永続化用のエンコードを担当する。

pub mod codec;

pub use self::codec::JsonCodec;
