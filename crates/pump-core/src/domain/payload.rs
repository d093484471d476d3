//! Payload / Notification - 二段構造のメッセージ本体
//!
//! topic 経由で queue に届いた envelope の body は Notification の JSON で、
//! その `Message` フィールドに Payload の JSON 文字列が入っている（二重エンコード）。
//!
//! ```text
//! Envelope.body ──decode──▶ Notification
//!                              └── Message ──decode──▶ Payload
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Application-level unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    pub channel: String,
    pub name: String,
    pub msg: String,
}

impl Payload {
    pub fn new(
        channel: impl Into<String>,
        name: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            name: name.into(),
            msg: msg.into(),
        }
    }
}

/// The notification wrapper a topic puts around every published body.
///
/// Only `Message` is required; the signing metadata is carried along but not
/// verified here.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Notification {
    #[serde(rename = "Type", default)]
    pub kind: String,
    #[serde(rename = "MessageId", default)]
    pub message_id: String,
    #[serde(rename = "TopicArn", default)]
    pub topic: String,
    /// JSON text of the inner [`Payload`].
    #[serde(rename = "Message")]
    pub message: String,
    #[serde(rename = "Timestamp", default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(rename = "SignatureVersion", default, skip_serializing_if = "String::is_empty")]
    pub signature_version: String,
    #[serde(rename = "Signature", default, skip_serializing_if = "String::is_empty")]
    pub signature: String,
    #[serde(rename = "SigningCertURL", default, skip_serializing_if = "String::is_empty")]
    pub signing_cert_url: String,
    #[serde(rename = "UnsubscribeURL", default, skip_serializing_if = "String::is_empty")]
    pub unsubscribe_url: String,
}

impl Notification {
    pub const KIND: &'static str = "Notification";

    /// Wrap a published body the way a topic delivers it to a subscribed queue.
    pub fn wrap(
        message_id: impl Into<String>,
        topic: impl Into<String>,
        message: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            kind: Self::KIND.to_string(),
            message_id: message_id.into(),
            topic: topic.into(),
            message: message.into(),
            timestamp: Some(timestamp),
            ..Self::default()
        }
    }
}
