//! S3-compatible object store (AWS S3, Cloudflare R2, MinIO, ...).

use super::object_store::{ObjectHead, ObjectStore, PutOptions, StoreError, StoreResult};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    Client, config::Region, error::DisplayErrorContext, primitives::ByteStream,
};
use bytes::Bytes;
use tracing::debug;

#[derive(Clone, Debug)]
pub struct S3Store {
    client: Client,
    bucket: String,
}

impl S3Store {
    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Build a client from the standard AWS credential chain.
    ///
    /// A custom `endpoint` switches to path-style addressing, which
    /// S3-compatible services expect.
    pub async fn connect(bucket: &str, region: &str, endpoint: Option<&str>) -> Self {
        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .load()
            .await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Self::new(Client::from_conf(builder.build()), bucket)
    }
}

fn backend_err<E: std::error::Error>(err: E) -> StoreError {
    StoreError::Backend(DisplayErrorContext(err).to_string())
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn head(&self, key: &str) -> StoreResult<ObjectHead> {
        let out = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| {
                if err.as_service_error().is_some_and(|e| e.is_not_found()) {
                    StoreError::NotFound {
                        key: key.to_string(),
                    }
                } else {
                    backend_err(err)
                }
            })?;

        Ok(ObjectHead {
            etag: out.e_tag().map(str::to_string),
            content_length: out.content_length().unwrap_or(0).max(0) as u64,
            modified_millis: None,
        })
    }

    async fn get(&self, key: &str) -> StoreResult<Bytes> {
        let out = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| {
                if err.as_service_error().is_some_and(|e| e.is_no_such_key()) {
                    StoreError::NotFound {
                        key: key.to_string(),
                    }
                } else {
                    backend_err(err)
                }
            })?;

        let body = out.body.collect().await.map_err(backend_err)?;
        Ok(body.into_bytes())
    }

    async fn put(&self, key: &str, body: Bytes, opts: PutOptions<'_>) -> StoreResult<()> {
        let len = body.len();
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(opts.content_type)
            .cache_control(opts.cache_control)
            .send()
            .await
            .map_err(backend_err)?;
        debug!("uploaded {} bytes to s3://{}/{}", len, self.bucket, key);
        Ok(())
    }

    async fn ready(&self) -> StoreResult<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(backend_err)?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "s3"
    }
}
