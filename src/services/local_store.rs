//! src/services/local_store.rs
//!
//! LocalStore: object store backed by a plain directory tree. Objects live at
//! `base_path/{key}` so uploaders and the proxy share one layout. There are no
//! ETags on disk; `head` reports modification time and size instead.

use super::object_store::{ObjectHead, ObjectStore, PutOptions, StoreError, StoreResult};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

const MAX_OBJECT_KEY_LEN: usize = 1024;

#[derive(Clone, Debug)]
pub struct LocalStore {
    /// Base directory on disk where objects are stored.
    pub base_path: PathBuf,
}

impl LocalStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Reject keys that could escape `base_path`.
    fn ensure_key_safe(key: &str) -> StoreResult<()> {
        if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
            return Err(StoreError::InvalidKey);
        }
        if key.starts_with('/') || key.contains("..") {
            return Err(StoreError::InvalidKey);
        }
        if key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            return Err(StoreError::InvalidKey);
        }
        Ok(())
    }

    fn object_path(&self, key: &str) -> StoreResult<PathBuf> {
        Self::ensure_key_safe(key)?;
        Ok(self.base_path.join(key))
    }

    fn not_found(key: &str, err: io::Error) -> StoreError {
        if err.kind() == ErrorKind::NotFound {
            StoreError::NotFound {
                key: key.to_string(),
            }
        } else {
            StoreError::Io(err)
        }
    }

    /// Write to a temp file next to the target, fsync, then rename into
    /// place so readers never observe a partial object.
    async fn write_atomic(&self, file_path: &Path, body: &[u8]) -> StoreResult<()> {
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StoreError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));

        let result = async {
            let mut file = File::create(&tmp_path).await?;
            file.write_all(body).await?;
            file.flush().await?;
            file.sync_all().await?;
            fs::rename(&tmp_path, file_path).await
        }
        .await;

        if let Err(err) = result {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    async fn head(&self, key: &str) -> StoreResult<ObjectHead> {
        let path = self.object_path(key)?;
        let meta = fs::metadata(&path)
            .await
            .map_err(|err| Self::not_found(key, err))?;
        if !meta.is_file() {
            return Err(StoreError::NotFound {
                key: key.to_string(),
            });
        }

        let modified_millis = meta
            .modified()
            .ok()
            .map(|time| DateTime::<Utc>::from(time).timestamp_millis());

        Ok(ObjectHead {
            etag: None,
            content_length: meta.len(),
            modified_millis,
        })
    }

    async fn get(&self, key: &str) -> StoreResult<Bytes> {
        let path = self.object_path(key)?;
        let bytes = fs::read(&path)
            .await
            .map_err(|err| Self::not_found(key, err))?;
        Ok(Bytes::from(bytes))
    }

    /// Content type and cache control are implied by the file extension and
    /// the cache namespace, so only the payload is persisted.
    async fn put(&self, key: &str, body: Bytes, _opts: PutOptions<'_>) -> StoreResult<()> {
        let path = self.object_path(key)?;
        self.write_atomic(&path, &body).await?;
        debug!("stored {} bytes at {}", body.len(), path.display());
        Ok(())
    }

    /// Write/read/delete a temp file under `base_path`.
    async fn ready(&self) -> StoreResult<()> {
        fs::create_dir_all(&self.base_path).await?;
        let tmp_path = self.base_path.join(format!(".readyz-{}", Uuid::new_v4()));
        fs::write(&tmp_path, b"readyz").await?;
        let read_back = fs::read(&tmp_path).await;
        let _ = fs::remove_file(&tmp_path).await;

        if read_back? != b"readyz" {
            return Err(StoreError::Backend("file content mismatch".into()));
        }
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "local"
    }
}
