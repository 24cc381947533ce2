//! Defines the HTTP routes of the image proxy.
//!
//! ## Structure
//! - `GET /img/{width}/{quality}/{*path}`: resized, re-encoded image
//! - `GET /img/{width}/{quality}[/]`: no source path, 400
//! - `GET /healthz`, `GET /readyz`: liveness / readiness
//!
//! The wildcard `*path` allows nested keys like `uploads/builds/12/3.jpg`
//! as well as a full, percent-encoded URL.

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        image_handlers::{get_image, missing_source},
    },
    services::image_service::ImageProxy,
};
use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

/// Build the router. The `ImageProxy` state carries the injected object store.
pub fn routes() -> Router<ImageProxy> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/img/{width}/{quality}/{*path}", get(get_image))
        .route("/img/{width}/{quality}", get(missing_source))
        .route("/img/{width}/{quality}/", get(missing_source))
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{
        image_service::{IMMUTABLE_CACHE_CONTROL, ProxySettings},
        object_store::{ObjectStore, memory::MemoryStore},
        transform::tests::sample_jpeg,
    };
    use axum::{
        body::{Body, Bytes, to_bytes},
        http::{Request, StatusCode, header},
        response::Response,
    };
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app(store: &Arc<MemoryStore>) -> Router {
        let proxy = ImageProxy::new(
            store.clone() as Arc<dyn ObjectStore>,
            ProxySettings::default(),
        );
        routes().with_state(proxy)
    }

    async fn get(app: Router, uri: &str, accept: Option<&str>) -> Response {
        let mut builder = Request::builder().uri(uri);
        if let Some(accept) = accept {
            builder = builder.header(header::ACCEPT, accept);
        }
        app.oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn body(response: Response) -> Bytes {
        to_bytes(response.into_body(), usize::MAX).await.unwrap()
    }

    fn header_str<'a>(response: &'a Response, name: &str) -> &'a str {
        response.headers()[name].to_str().unwrap()
    }

    #[tokio::test]
    async fn end_to_end_webp_render_then_cache_hit() {
        let store = Arc::new(MemoryStore::new());
        store.insert("photos/car.jpg", sample_jpeg(1600, 1200), "image/jpeg");

        let first = get(app(&store), "/img/800/80/photos/car.jpg", Some("image/webp")).await;
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(header_str(&first, "content-type"), "image/webp");
        assert_eq!(header_str(&first, "cache-control"), IMMUTABLE_CACHE_CONTROL);
        assert_eq!(header_str(&first, "x-img-source"), "ORIGIN-RESIZED");
        let first_body = body(first).await;
        let img = image::load_from_memory(&first_body).unwrap();
        assert_eq!((img.width(), img.height()), (800, 600));

        let cached = store.keys_with_prefix("cache/img/");
        assert_eq!(cached.len(), 1);
        assert!(cached[0].starts_with("cache/img/800_80_photos_car.jpg_"));
        assert!(cached[0].ends_with(".webp"));

        let second = get(app(&store), "/img/800/80/photos/car.jpg", Some("image/webp")).await;
        assert_eq!(second.status(), StatusCode::OK);
        assert_eq!(header_str(&second, "x-img-source"), "CACHE");
        assert_eq!(body(second).await, first_body);
    }

    #[tokio::test]
    async fn cache_key_uses_the_store_etag_and_length() {
        let store = Arc::new(MemoryStore::new());
        let src = sample_jpeg(400, 300);
        let etag = format!("{:x}", md5::compute(&src));
        let len = src.len();
        store.insert("photos/car.jpg", src, "image/jpeg");

        let response = get(app(&store), "/img/200/75/photos/car.jpg", Some("text/html")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header_str(&response, "content-type"), "image/jpeg");
        assert_eq!(
            store.keys_with_prefix("cache/img/"),
            vec![format!("cache/img/200_75_photos_car.jpg_{etag}_{len}.jpg")]
        );
    }

    #[tokio::test]
    async fn out_of_range_parameters_are_clamped() {
        let store = Arc::new(MemoryStore::new());
        store.insert("a.jpg", sample_jpeg(64, 48), "image/jpeg");

        let response = get(app(&store), "/img/99999/1/a.jpg", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let keys = store.keys_with_prefix("cache/img/");
        assert!(keys[0].starts_with("cache/img/3000_30_a.jpg_"), "{keys:?}");

        let response = get(app(&store), "/img/0/999/a.jpg", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let keys = store.keys_with_prefix("cache/img/1_95_");
        assert_eq!(keys.len(), 1, "{keys:?}");
    }

    #[tokio::test]
    async fn encoded_and_full_url_paths_resolve_to_the_same_key() {
        let store = Arc::new(MemoryStore::new());
        store.insert("uploads/builds/12/3.jpg", sample_jpeg(64, 48), "image/jpeg");

        for uri in [
            "/img/32/80/uploads/builds/12/3.jpg",
            "/img/32/80/uploads%2Fbuilds%2F12%2F3.jpg",
            "/img/32/80/https%3A%2F%2Fexample.com%2Fuploads%2Fbuilds%2F12%2F3.jpg",
        ] {
            let response = get(app(&store), uri, None).await;
            assert_eq!(response.status(), StatusCode::OK, "{uri}");
        }
        assert_eq!(store.keys_with_prefix("cache/img/").len(), 1);
    }

    #[tokio::test]
    async fn bad_paths_are_rejected_before_any_store_io() {
        let store = Arc::new(MemoryStore::new());

        for uri in [
            "/img/800/80/..%2F..%2Fetc%2Fpasswd",
            "/img/800/80/uploads/%2E%2E/secret.jpg",
            "/img/800/80/%2F",
            "/img/800/80/photos/%zz.jpg",
            "/img/800/80/",
            "/img/800/80",
        ] {
            let response = get(app(&store), uri, None).await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
            assert_eq!(&body(response).await[..], b"Bad path");
        }
        assert_eq!(MemoryStore::count(&store.heads), 0);
        assert_eq!(MemoryStore::count(&store.gets), 0);
    }

    #[tokio::test]
    async fn missing_and_broken_sources_are_bare_404s() {
        let store = Arc::new(MemoryStore::new());
        store.insert("broken.jpg", &b"not really a jpeg"[..], "image/jpeg");

        for uri in ["/img/800/80/missing.jpg", "/img/800/80/broken.jpg"] {
            let response = get(app(&store), uri, Some("image/webp")).await;
            assert_eq!(response.status(), StatusCode::NOT_FOUND, "{uri}");
            assert!(body(response).await.is_empty());
        }
        assert!(store.keys_with_prefix("cache/").is_empty());
    }

    #[tokio::test]
    async fn health_endpoints_report_ok() {
        let store = Arc::new(MemoryStore::new());

        let response = get(app(&store), "/healthz", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body(response).await).unwrap();
        assert_eq!(json["status"], "ok");

        let response = get(app(&store), "/readyz", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body(response).await).unwrap();
        assert_eq!(json["checks"]["store"]["ok"], true);
        assert_eq!(json["checks"]["store"]["backend"], "memory");
    }
}
