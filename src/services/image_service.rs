//! ImageProxy: the `/img` pipeline.
//!
//! Order per request: derive the version token from the source, look up the
//! derived key in the cache namespace, and on a miss fetch the original,
//! transform it and write the result back. Only the cache namespace is ever
//! written; originals are read-only here.

use crate::{
    errors::ImgError,
    models::{
        cache_key::{DerivedKey, VersionToken},
        image_request::{ImgRequest, OutputFormat},
    },
    services::{
        coalescer::{CoalescingSlot, RequestCoalescer},
        object_store::{ObjectStore, PutOptions, StoreError},
        transform,
    },
};
use bytes::Bytes;
use std::{future::Future, sync::Arc, time::Duration};
use tracing::{debug, warn};

pub const IMMUTABLE_CACHE_CONTROL: &str = "public, max-age=31536000, immutable";

/// How the version token of a source is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionMode {
    /// ETag (or mtime) plus length from a metadata probe.
    Metadata,
    /// MD5 of the full source plus length. Costs a full read per request.
    ContentHash,
}

#[derive(Debug, Clone)]
pub struct ProxySettings {
    /// Namespace for derived images, e.g. `cache/img`.
    pub cache_prefix: String,
    /// Upper bound for every object store call.
    pub io_timeout: Duration,
    pub version_mode: VersionMode,
    pub coalesce: bool,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            cache_prefix: "cache/img".into(),
            io_timeout: Duration::from_secs(5),
            version_mode: VersionMode::Metadata,
            coalesce: true,
        }
    }
}

/// Where a successful response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImgSource {
    /// Found in the cache namespace.
    Cache,
    /// Found in the cache after waiting on another request's render.
    CacheCoalesced,
    /// Rendered from the original by this request.
    OriginResized,
}

impl ImgSource {
    pub fn header_value(self) -> &'static str {
        match self {
            ImgSource::Cache => "CACHE",
            ImgSource::CacheCoalesced => "CACHE-COALESCED",
            ImgSource::OriginResized => "ORIGIN-RESIZED",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RenderedImage {
    pub bytes: Bytes,
    pub format: OutputFormat,
    pub source: ImgSource,
    pub key: DerivedKey,
}

#[derive(Clone)]
pub struct ImageProxy {
    store: Arc<dyn ObjectStore>,
    settings: ProxySettings,
    coalescer: RequestCoalescer,
}

impl ImageProxy {
    pub fn new(store: Arc<dyn ObjectStore>, settings: ProxySettings) -> Self {
        Self {
            store,
            settings,
            coalescer: RequestCoalescer::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Serve a validated request in the negotiated format.
    pub async fn serve(
        &self,
        req: &ImgRequest,
        format: OutputFormat,
    ) -> Result<RenderedImage, ImgError> {
        let (version, prefetched) = self.derive_version(&req.source_key).await?;
        let key = DerivedKey::new(req, &version, format);
        let cache_key = key.storage_key(&self.settings.cache_prefix);

        if let Some(bytes) = self.lookup(&cache_key).await {
            return Ok(RenderedImage {
                bytes,
                format,
                source: ImgSource::Cache,
                key,
            });
        }

        let _leader = if self.settings.coalesce {
            match self.coalescer.acquire(&cache_key).await {
                CoalescingSlot::Leader(guard) => {
                    // Another leader may have finished between our miss and
                    // the acquire.
                    if let Some(bytes) = self.lookup(&cache_key).await {
                        return Ok(RenderedImage {
                            bytes,
                            format,
                            source: ImgSource::Cache,
                            key,
                        });
                    }
                    Some(guard)
                }
                CoalescingSlot::Follower => {
                    if let Some(bytes) = self.lookup(&cache_key).await {
                        return Ok(RenderedImage {
                            bytes,
                            format,
                            source: ImgSource::CacheCoalesced,
                            key,
                        });
                    }
                    debug!("leader left no cache entry for {}, rendering", cache_key);
                    None
                }
            }
        } else {
            None
        };

        let original = match prefetched {
            Some(bytes) => bytes,
            None => {
                self.bounded("source fetch", self.store.get(&req.source_key))
                    .await?
            }
        };

        let bytes = self.render(original, req, format).await?;
        self.write_cache(&cache_key, bytes.clone(), format).await;

        Ok(RenderedImage {
            bytes,
            format,
            source: ImgSource::OriginResized,
            key,
        })
    }

    /// Version token for the source, plus the source bytes when the mode had
    /// to read them anyway.
    async fn derive_version(&self, source_key: &str) -> Result<(VersionToken, Option<Bytes>), ImgError> {
        match self.settings.version_mode {
            VersionMode::Metadata => {
                let head = self
                    .bounded("metadata probe", self.store.head(source_key))
                    .await?;
                Ok((VersionToken::from_head(&head), None))
            }
            VersionMode::ContentHash => {
                let bytes = self
                    .bounded("source fetch", self.store.get(source_key))
                    .await?;
                Ok((VersionToken::from_content(&bytes), Some(bytes)))
            }
        }
    }

    /// Any lookup failure counts as a miss.
    async fn lookup(&self, cache_key: &str) -> Option<Bytes> {
        match self.bounded("cache lookup", self.store.get(cache_key)).await {
            Ok(bytes) => {
                debug!("cache hit {}", cache_key);
                Some(bytes)
            }
            Err(ImgError::SourceMissing { .. }) => {
                debug!("cache miss {}", cache_key);
                None
            }
            Err(err) => {
                warn!("cache lookup for {} failed, treating as miss: {}", cache_key, err);
                None
            }
        }
    }

    async fn render(
        &self,
        original: Bytes,
        req: &ImgRequest,
        format: OutputFormat,
    ) -> Result<Bytes, ImgError> {
        let (width, quality) = (req.width, req.quality);
        let out = tokio::task::spawn_blocking(move || {
            transform::transform(&original, width, quality, format)
        })
        .await
        .map_err(|err| ImgError::Worker(err.to_string()))??;

        debug!(
            "rendered {} at {}x{} q{} as {}",
            req.source_key,
            out.width,
            out.height,
            quality,
            out.content_type
        );
        Ok(Bytes::from(out.data))
    }

    /// Best effort: the caller already has the bytes.
    async fn write_cache(&self, cache_key: &str, bytes: Bytes, format: OutputFormat) {
        let opts = PutOptions {
            content_type: format.content_type(),
            cache_control: IMMUTABLE_CACHE_CONTROL,
        };
        if let Err(err) = self
            .bounded("cache write", self.store.put(cache_key, bytes, opts))
            .await
        {
            warn!(
                "cache write to {} ({}) failed: {}",
                cache_key,
                self.store.backend(),
                err
            );
        }
    }

    async fn bounded<T>(
        &self,
        op: &'static str,
        fut: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, ImgError> {
        match tokio::time::timeout(self.settings.io_timeout, fut).await {
            Ok(result) => result.map_err(ImgError::from),
            Err(_) => Err(ImgError::Timeout { op }),
        }
    }
}
