//! Version tokens and derived cache keys.

use super::image_request::{ImgRequest, OutputFormat};
use crate::services::object_store::ObjectHead;
use std::fmt;

/// Short string that changes whenever the source object changes.
///
/// Built from `{etag}_{length}` (remote stores), `{mtimeMillis}_{length}`
/// (local disk) or `{md5}_{length}` (content-hash mode). It is a proxy for
/// "has the source changed", not a content guarantee.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionToken(String);

impl VersionToken {
    /// Token from a metadata probe. ETags win over modification times; a
    /// store reporting neither yields an empty prefix.
    pub fn from_head(head: &ObjectHead) -> Self {
        let prefix = match (&head.etag, head.modified_millis) {
            (Some(etag), _) => etag.replace('"', ""),
            (None, Some(millis)) => millis.to_string(),
            (None, None) => String::new(),
        };
        Self(format!("{}_{}", prefix, head.content_length))
    }

    /// Token from the full source bytes.
    pub fn from_content(bytes: &[u8]) -> Self {
        Self(format!("{:x}_{}", md5::compute(bytes), bytes.len()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Name of a derived image inside the cache namespace:
/// `{width}_{quality}_{sanitizedKey}_{version}.{ext}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DerivedKey(String);

impl DerivedKey {
    pub fn new(req: &ImgRequest, version: &VersionToken, format: OutputFormat) -> Self {
        let base = req.source_key.replace(['/', '\\'], "_");
        Self(format!(
            "{}_{}_{}_{}.{}",
            req.width,
            req.quality,
            base,
            version.as_str(),
            format.extension()
        ))
    }

    /// Full object store key under the configured cache prefix.
    pub fn storage_key(&self, prefix: &str) -> String {
        let prefix = prefix.trim_end_matches('/');
        if prefix.is_empty() {
            self.as_str().to_string()
        } else {
            format!("{}/{}", prefix, self.as_str())
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
