use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Transport-assigned message identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Opaque handle that acknowledges exactly one delivery of a message.
///
/// A redelivered message gets a new token; the old one is no longer accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReceiptToken(String);

impl ReceiptToken {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReceiptToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A message as delivered by the transport.
///
/// Created on receive, dropped after acknowledgment. Never persisted itself:
/// only the payload extracted from `body` is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    message_id: MessageId,
    body: String,
    sent_at: DateTime<Utc>,
    source: String,
    receipt: ReceiptToken,
    #[serde(default)]
    attributes: BTreeMap<String, String>,
}

impl Envelope {
    pub fn new(
        message_id: MessageId,
        body: impl Into<String>,
        sent_at: DateTime<Utc>,
        source: impl Into<String>,
        receipt: ReceiptToken,
    ) -> Self {
        Self {
            message_id,
            body: body.into(),
            sent_at,
            source: source.into(),
            receipt,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn message_id(&self) -> &MessageId {
        &self.message_id
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn sent_at(&self) -> DateTime<Utc> {
        self.sent_at
    }

    /// Topic or queue the message came from.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn receipt(&self) -> &ReceiptToken {
        &self.receipt
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }
}
