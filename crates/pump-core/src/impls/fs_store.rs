//! FsPayloadStore - ディレクトリへの payload 保存
//!
//! # 実装詳細
//! - 1 メッセージ 1 ファイル: `<dir>/<key>.json`
//! - open → write → close を Mutex で囲む（複数 consumer で共有しても壊れない）
//! - 既存ファイルは上書き

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::domain::{Payload, PersistenceError};
use crate::ports::PayloadStore;
use crate::typed::JsonCodec;

pub struct FsPayloadStore {
    dir: PathBuf,
    codec: JsonCodec,
    lock: Mutex<()>,
}

impl FsPayloadStore {
    /// Resolve `dir` to an absolute path and create it (and parents) if missing.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let dir = std::path::absolute(dir.as_ref()).map_err(|source| PersistenceError::Io {
            path: dir.as_ref().to_path_buf(),
            source,
        })?;
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| PersistenceError::Io {
                path: dir.clone(),
                source,
            })?;
        tracing::debug!(dir = %dir.display(), "using storage directory");
        Ok(Self {
            dir,
            codec: JsonCodec::new(),
            lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

fn validate_key(key: &str) -> Result<(), PersistenceError> {
    let bad = key.is_empty()
        || key == "."
        || key.contains("..")
        || key.contains('/')
        || key.contains('\\')
        || key.contains('\0');
    if bad {
        return Err(PersistenceError::InvalidKey(key.to_string()));
    }
    Ok(())
}

#[async_trait]
impl PayloadStore for FsPayloadStore {
    async fn persist(&self, key: &str, payload: &Payload) -> Result<u64, PersistenceError> {
        validate_key(key)?;
        let bytes = self.codec.encode(payload)?;
        let path = self.path_for(key);
        let io_err = |source: std::io::Error| PersistenceError::Io {
            path: path.clone(),
            source,
        };

        let _guard = self.lock.lock().await;
        let mut file = tokio::fs::File::create(&path).await.map_err(io_err)?;
        file.write_all(&bytes).await.map_err(io_err)?;
        file.flush().await.map_err(io_err)?;
        drop(file);

        Ok(bytes.len() as u64)
    }
}
