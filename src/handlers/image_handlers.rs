//! HTTP handlers for `/img/{width}/{quality}/{*path}`.
//! Parsing and negotiation happen here; everything else is delegated to
//! `ImageProxy`. Errors are mapped to status codes only in `ImgError`.

use crate::{
    errors::ImgError,
    models::image_request::{ImgRequest, OutputFormat},
    services::image_service::{IMMUTABLE_CACHE_CONTROL, ImageProxy, RenderedImage},
};
use axum::{
    body::Body,
    extract::{RawPathParams, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::Response,
};
use tracing::{debug, warn};

pub const IMG_SOURCE_HEADER: HeaderName = HeaderName::from_static("x-img-source");

/// GET `/img/{width}/{quality}/{*path}`: serve a resized, re-encoded image.
///
/// Path params are taken raw so the source path is percent-decoded exactly once.
pub async fn get_image(
    State(proxy): State<ImageProxy>,
    params: RawPathParams,
    headers: HeaderMap,
) -> Result<Response, ImgError> {
    let (mut width, mut quality, mut path) = ("", "", "");
    for (name, value) in &params {
        match name {
            "width" => width = value,
            "quality" => quality = value,
            "path" => path = value,
            _ => {}
        }
    }

    let req = ImgRequest::parse(width, quality, path)?;
    let accept = headers.get(header::ACCEPT).and_then(|v| v.to_str().ok());
    let format = OutputFormat::negotiate(accept);

    match proxy.serve(&req, format).await {
        Ok(image) => {
            debug!(
                key = %image.key,
                source = image.source.header_value(),
                "img proxy served {} bytes",
                image.bytes.len()
            );
            Ok(image_response(image))
        }
        Err(err) => {
            warn!(
                source_key = %req.source_key,
                width = req.width,
                quality = req.quality,
                "img proxy error: {}",
                err
            );
            Err(err)
        }
    }
}

/// GET `/img/{width}/{quality}` with no source path.
pub async fn missing_source() -> ImgError {
    ImgError::BadPath
}

fn image_response(image: RenderedImage) -> Response {
    let mut response = Response::new(Body::from(image.bytes));
    *response.status_mut() = StatusCode::OK;

    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(image.format.content_type()),
    );
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static(IMMUTABLE_CACHE_CONTROL),
    );
    headers.insert(header::VARY, HeaderValue::from_static("Accept"));
    headers.insert(
        IMG_SOURCE_HEADER,
        HeaderValue::from_static(image.source.header_value()),
    );
    response
}
