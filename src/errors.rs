use crate::services::object_store::StoreError;
use axum::{
    body::Body,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Every way the image pipeline can fail.
///
/// At the HTTP boundary everything except `BadPath` becomes a bare 404.
#[derive(Debug, Error)]
pub enum ImgError {
    #[error("bad source path")]
    BadPath,
    #[error("source object `{key}` not found")]
    SourceMissing { key: String },
    #[error("object store failure: {0}")]
    Upstream(String),
    #[error("failed to decode source image: {0}")]
    Decode(String),
    #[error("failed to encode derived image: {0}")]
    Encode(String),
    #[error("source image {width}x{height} exceeds the pixel limit")]
    TooLarge { width: u32, height: u32 },
    #[error("{op} timed out")]
    Timeout { op: &'static str },
    #[error("transform worker failed: {0}")]
    Worker(String),
}

impl ImgError {
    pub fn status(&self) -> StatusCode {
        match self {
            ImgError::BadPath => StatusCode::BAD_REQUEST,
            _ => StatusCode::NOT_FOUND,
        }
    }
}

impl From<StoreError> for ImgError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { key } => ImgError::SourceMissing { key },
            other => ImgError::Upstream(other.to_string()),
        }
    }
}

impl IntoResponse for ImgError {
    fn into_response(self) -> Response {
        let status = self.status();
        // Storage details never reach the client.
        let mut response = match self {
            ImgError::BadPath => {
                let mut response = Response::new(Body::from("Bad path"));
                response.headers_mut().insert(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("text/plain; charset=utf-8"),
                );
                response
            }
            _ => Response::new(Body::empty()),
        };
        *response.status_mut() = status;
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_bad_paths_are_client_errors() {
        assert_eq!(ImgError::BadPath.status(), StatusCode::BAD_REQUEST);
        for err in [
            ImgError::SourceMissing { key: "a.jpg".into() },
            ImgError::Upstream("boom".into()),
            ImgError::Decode("garbage".into()),
            ImgError::Encode("nope".into()),
            ImgError::TooLarge { width: 1, height: 1 },
            ImgError::Timeout { op: "probe" },
            ImgError::Worker("panicked".into()),
        ] {
            assert_eq!(err.status(), StatusCode::NOT_FOUND, "{err}");
        }
    }

    #[test]
    fn store_not_found_becomes_source_missing() {
        let err: ImgError = StoreError::NotFound { key: "x.jpg".into() }.into();
        assert!(matches!(err, ImgError::SourceMissing { key } if key == "x.jpg"));

        let err: ImgError = StoreError::Backend("denied".into()).into();
        assert!(matches!(err, ImgError::Upstream(msg) if msg.contains("denied")));
    }

    #[tokio::test]
    async fn responses_hide_the_cause() {
        let response = ImgError::Decode("corrupt header".into()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert!(body.is_empty());

        let response = ImgError::BadPath.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"Bad path");
    }
}
