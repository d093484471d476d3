//! PayloadStore port - 処理済み payload の永続化先

use async_trait::async_trait;

use crate::domain::{Payload, PersistenceError};

/// PayloadStore は payload を key 単位で保存する
///
/// # 設計原則
/// - 同じ key への再保存は上書き（冪等）。再配送された重複メッセージの安全網はこれだけ
/// - 別 key 同士の並行保存で互いのデータを壊さない
#[async_trait]
pub trait PayloadStore: Send + Sync {
    /// Persist `payload` under `key` and return the number of bytes written.
    async fn persist(&self, key: &str, payload: &Payload) -> Result<u64, PersistenceError>;
}
