//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that round-trips the object store

use crate::services::image_service::ImageProxy;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::HashMap;

/// `GET /healthz`
///
/// Liveness probe: always 200, never performs I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// Runs the backend's own readiness check (temp file round trip on disk,
/// `HeadBucket` on S3). HTTP 200 when it passes, 503 otherwise.
pub async fn readyz(State(proxy): State<ImageProxy>) -> impl IntoResponse {
    let store = proxy.store();
    let store_check = match store.ready().await {
        Ok(()) => CheckStatus {
            ok: true,
            backend: store.backend(),
            error: None,
        },
        Err(e) => CheckStatus {
            ok: false,
            backend: store.backend(),
            error: Some(e.to_string()),
        },
    };

    let overall_ok = store_check.ok;
    let mut checks = HashMap::new();
    checks.insert("store", store_check);

    let body = ReadyResponse {
        status: if overall_ok {
            "ok".into()
        } else {
            "error".into()
        },
        checks,
    };

    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    backend: &'static str,
    error: Option<String>,
}
