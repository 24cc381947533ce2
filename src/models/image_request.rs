//! Parsed `/img/{width}/{quality}/{*path}` requests and output negotiation.

use crate::errors::ImgError;
use url::Url;

pub const MIN_WIDTH: u32 = 1;
pub const MAX_WIDTH: u32 = 3000;
pub const MIN_QUALITY: u8 = 30;
pub const MAX_QUALITY: u8 = 95;

/// A validated image request: clamped numbers and a safe storage key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImgRequest {
    /// Target width in pixels, within `[MIN_WIDTH, MAX_WIDTH]`.
    pub width: u32,

    /// Encoder quality, within `[MIN_QUALITY, MAX_QUALITY]`.
    pub quality: u8,

    /// Object store key of the original image (no leading slash, no `..`).
    pub source_key: String,
}

impl ImgRequest {
    /// Build a request from the raw (still percent-encoded) path segments.
    ///
    /// Malformed percent-encoding in any segment is a `BadPath`. Otherwise
    /// width and quality never fail: anything unparsable counts as `0` and is
    /// then clamped.
    pub fn parse(raw_width: &str, raw_quality: &str, raw_path: &str) -> Result<Self, ImgError> {
        let width = clamp_i64(leading_int(&decode(raw_width)?), MIN_WIDTH, MAX_WIDTH);
        let quality = clamp_i64(
            leading_int(&decode(raw_quality)?),
            MIN_QUALITY as u32,
            MAX_QUALITY as u32,
        ) as u8;
        let source_key = normalize_source_path(raw_path)?;

        Ok(Self {
            width,
            quality,
            source_key,
        })
    }
}

/// Output encoding picked from the client's `Accept` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputFormat {
    WebP,
    Jpeg,
}

impl OutputFormat {
    /// WebP when the client advertises WebP or AVIF support, JPEG otherwise.
    ///
    /// Pure function of the header: one client always maps to the same
    /// cache entries.
    pub fn negotiate(accept: Option<&str>) -> Self {
        let accept = accept.unwrap_or_default();
        if accept.contains("image/webp") || accept.contains("image/avif") {
            OutputFormat::WebP
        } else {
            OutputFormat::Jpeg
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::WebP => "webp",
            OutputFormat::Jpeg => "jpg",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            OutputFormat::WebP => "image/webp",
            OutputFormat::Jpeg => "image/jpeg",
        }
    }
}

/// Decode a percent-encoded segment once. A `%` not followed by two hex
/// digits, or bytes that are not UTF-8 after decoding, make it malformed.
fn decode(raw: &str) -> Result<String, ImgError> {
    let bytes = raw.as_bytes();
    let malformed = bytes.iter().enumerate().any(|(i, &b)| {
        b == b'%'
            && !matches!(
                bytes.get(i + 1..i + 3),
                Some([hi, lo]) if hi.is_ascii_hexdigit() && lo.is_ascii_hexdigit()
            )
    });
    if malformed {
        return Err(ImgError::BadPath);
    }

    urlencoding::decode(raw)
        .map(|cow| cow.into_owned())
        .map_err(|_| ImgError::BadPath)
}

/// `parseInt`-style parsing: optional whitespace and sign, then the leading
/// run of ASCII digits. Returns 0 when there are no digits.
fn leading_int(raw: &str) -> i64 {
    let s = raw.trim_start();
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };

    let value = digits
        .bytes()
        .take_while(u8::is_ascii_digit)
        .fold(0i64, |acc, b| {
            acc.saturating_mul(10).saturating_add(i64::from(b - b'0'))
        });

    if negative { -value } else { value }
}

fn clamp_i64(value: i64, min: u32, max: u32) -> u32 {
    value.clamp(i64::from(min), i64::from(max)) as u32
}

/// Turn the wildcard remainder of the URL into an object store key.
///
/// - percent-decoded once
/// - a full `http(s)://` URL is reduced to its path
/// - leading slashes removed, backslashes turned into forward slashes
/// - empty keys and keys containing `..` are rejected
fn normalize_source_path(raw: &str) -> Result<String, ImgError> {
    let mut path = decode(raw)?;

    if path.starts_with("http://") || path.starts_with("https://") {
        if let Ok(url) = Url::parse(&path) {
            path = url.path().to_string();
        }
    }

    let path = path.trim_start_matches('/').replace('\\', "/");
    if path.is_empty() || path.contains("..") {
        return Err(ImgError::BadPath);
    }

    Ok(path)
}
