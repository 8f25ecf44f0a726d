//! Shared API plumbing: error mapping, health, artifact serving and public URLs.

use crate::AppState;
use axum::{
    extract::{Extension, Json, Path},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use callrelay_store::{parse_name, ArtifactKind, StoreError};
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;

/// API error type mapping to HTTP status codes.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid input: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("internal server error: {0}")]
    InternalServerError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::InternalServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(name) | StoreError::InvalidName(name) => ApiError::NotFound(name),
            StoreError::Io(e) => ApiError::InternalServerError(e.to_string()),
        }
    }
}

/// Handler for `GET /health`.
pub async fn health_handler(Extension(state): Extension<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": state.registry.len(),
    }))
}

/// Handler for `GET /artifacts/{name}`.
///
/// Serves synthesized replies only. Caller clips are never exposed.
pub async fn get_artifact_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    let kind = match parse_name(&name) {
        Some((ArtifactKind::SynthesizedReply, _)) => ArtifactKind::SynthesizedReply,
        _ => return Err(ApiError::NotFound(name)),
    };

    let bytes = state.pipeline.store().read(&name).await?;
    tracing::debug!(artifact = %name, bytes = bytes.len(), "serving artifact");

    Ok(([(header::CONTENT_TYPE, kind.content_type())], bytes).into_response())
}

/// Base URL the telephony provider should use to reach this server.
///
/// Prefers the configured URL; otherwise assumes HTTPS on the request's `Host`.
pub fn public_base_url(configured: Option<&str>, headers: &HeaderMap) -> String {
    if let Some(url) = configured.filter(|u| !u.trim().is_empty()) {
        return url.trim_end_matches('/').to_string();
    }
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    format!("https://{}", host)
}

/// Public URL of an artifact.
pub fn artifact_url(base: &str, name: &str) -> String {
    format!("{}/artifacts/{}", base, name)
}

/// WebSocket URL for `path` on the same origin as `base`.
pub fn websocket_url(base: &str, path: &str) -> String {
    let origin = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        base.to_string()
    };
    format!("{}{}", origin, path)
}
