//! The object store seam.
//!
//! The proxy reads originals from, and writes derived images to, one
//! key-value object store. Backends implement [`ObjectStore`] and are injected
//! as `Arc<dyn ObjectStore>`, so handlers never touch a concrete client.

use async_trait::async_trait;
use bytes::Bytes;
use std::io;
use thiserror::Error;

/// Metadata returned by a HEAD-style probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectHead {
    /// ETag as reported by the store (quotes included if the store sends them).
    pub etag: Option<String>,

    /// Object size in bytes.
    pub content_length: u64,

    /// Last modification time in Unix milliseconds, for stores without ETags.
    pub modified_millis: Option<i64>,
}

/// Metadata attached to an object on write.
#[derive(Debug, Clone, Copy)]
pub struct PutOptions<'a> {
    pub content_type: &'a str,
    pub cache_control: &'a str,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object `{key}` not found")]
    NotFound { key: String },
    #[error("invalid object key")]
    InvalidKey,
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Metadata-only probe. Missing objects yield `StoreError::NotFound`.
    async fn head(&self, key: &str) -> StoreResult<ObjectHead>;

    /// Read the whole object.
    async fn get(&self, key: &str) -> StoreResult<Bytes>;

    /// Store `body` at `key`, replacing any existing object.
    async fn put(&self, key: &str, body: Bytes, opts: PutOptions<'_>) -> StoreResult<()>;

    /// Cheap end-to-end check used by `/readyz`.
    async fn ready(&self) -> StoreResult<()>;

    /// Short backend name for logs.
    fn backend(&self) -> &'static str;
}
