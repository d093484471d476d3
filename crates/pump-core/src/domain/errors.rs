//! Errors - エラー型と分類
//!
//! 低レベルの helper はプロセスを止めずに `Result` を返すだけ。
//! halt / skip / dead-letter の判断はループ側（ErrorPolicy）が行う。

use std::path::PathBuf;

use thiserror::Error;

/// ErrorKind は実行エラーの運用分類
///
/// - Transient: 一時的なエラー（次の poll で直る可能性がある）
/// - Permanent: 恒久的なエラー（同じメッセージは何度やっても失敗する）
/// - Infrastructure: インフラエラー（transport / disk の障害）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Permanent,
    Infrastructure,
}

/// Queue/topic service failures.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport unavailable: {0}")]
    Unavailable(String),

    #[error("operation rejected: {0}")]
    Rejected(String),

    #[error("invalid or expired receipt: {0}")]
    InvalidReceipt(String),

    #[error("unknown queue: {0}")]
    UnknownQueue(String),

    #[error("unknown topic: {0}")]
    UnknownTopic(String),
}

/// Body is not valid JSON, or does not fit the target shape.
#[derive(Debug, Error)]
#[error("failed to decode {shape}: {source}")]
pub struct DecodeError {
    pub shape: &'static str,
    #[source]
    pub source: serde_json::Error,
}

#[derive(Debug, Error)]
#[error("failed to encode value: {0}")]
pub struct EncodeError(#[from] pub serde_json::Error);

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to write {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error("invalid storage key: {0:?}")]
    InvalidKey(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum PumpError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl PumpError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PumpError::Transport(TransportError::Unavailable(_)) => ErrorKind::Transient,
            PumpError::Transport(_) => ErrorKind::Infrastructure,
            PumpError::Decode(_) => ErrorKind::Permanent,
            PumpError::Persistence(PersistenceError::InvalidKey(_)) => ErrorKind::Permanent,
            PumpError::Persistence(PersistenceError::Encode(_)) => ErrorKind::Permanent,
            PumpError::Persistence(PersistenceError::Io { .. }) => ErrorKind::Infrastructure,
            PumpError::Config(_) => ErrorKind::Permanent,
        }
    }
}
