//! JsonCodec - JSON と型の相互変換
//!
//! # デコードフロー
//! 1. envelope body を `Notification` に decode
//! 2. `Notification::message` を `Payload` に decode
//!
//! どちらかで失敗すると `DecodeError`（どの shape で失敗したかを持つ）。

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::ser::PrettyFormatter;

use crate::domain::{DecodeError, EncodeError, Notification, Payload};

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl JsonCodec {
    pub fn new() -> Self {
        Self
    }

    pub fn decode<T: DeserializeOwned>(&self, raw: &str) -> Result<T, DecodeError> {
        serde_json::from_str(raw).map_err(|source| DecodeError {
            shape: short_type_name::<T>(),
            source,
        })
    }

    /// Tab-indented pretty JSON.
    pub fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, EncodeError> {
        let mut out = Vec::new();
        let mut ser =
            serde_json::Serializer::with_formatter(&mut out, PrettyFormatter::with_indent(b"\t"));
        value.serialize(&mut ser)?;
        Ok(out)
    }

    /// Body → Notification → Payload.
    pub fn decode_envelope_body(&self, body: &str) -> Result<(Notification, Payload), DecodeError> {
        let notification: Notification = self.decode(body)?;
        let payload: Payload = self.decode(&notification.message)?;
        Ok((notification, payload))
    }
}

fn short_type_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    full.rsplit("::").next().unwrap_or(full)
}
