//! Domain model (envelopes, payloads, counters, errors).

pub mod envelope;
pub mod payload;
pub mod metrics;
pub mod errors;

pub use self::envelope::{Envelope, MessageId, ReceiptToken};
pub use self::payload::{Notification, Payload};
pub use self::metrics::{Metrics, MetricsSnapshot};
pub use self::errors::{
    ConfigError, DecodeError, EncodeError, ErrorKind, PersistenceError, PumpError, TransportError,
};
