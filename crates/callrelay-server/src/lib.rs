//! Call relay server library logic.
//!
//! Bridges telephone calls to a transcribe, respond and synthesize pipeline.
//! Each call is a [`session::CallSession`] held in the process-wide
//! [`registry::SessionRegistry`]; the HTTP and WebSocket handlers translate
//! telephony events into session operations.

pub mod accumulator;
pub mod api;
pub mod api_stream;
pub mod api_voice;
pub mod config;
pub mod media;
pub mod pipeline;
pub mod registry;
pub mod retention;
pub mod session;
pub mod twiml;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Extension, Router,
};
use config::TelephonyConfig;
use pipeline::Pipeline;
use registry::SessionRegistry;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Maximum request body size. Recordings are the largest bodies received.
const MAX_REQUEST_BODY_BYTES: usize = 25 * 1024 * 1024;

/// Application state shared across all request handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Live call sessions.
    pub registry: SessionRegistry,
    /// Stage chain and artifact store shared by every session.
    pub pipeline: Pipeline,
    /// Call flow settings.
    pub telephony: TelephonyConfig,
    /// Configured public base URL, if any.
    pub public_url: Option<String>,
    /// Client for downloading recordings.
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(pipeline: Pipeline, telephony: TelephonyConfig, public_url: Option<String>) -> Self {
        Self {
            registry: SessionRegistry::new(),
            pipeline,
            telephony,
            public_url,
            http: reqwest::Client::new(),
        }
    }
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(api::health_handler))
        .route(
            "/voice",
            get(api_voice::voice_followup_handler).post(api_voice::voice_handler),
        )
        .route("/voice/stream", post(api_voice::voice_stream_handler))
        .route(
            "/process-recording",
            post(api_voice::process_recording_handler),
        )
        .route("/call-status", post(api_voice::call_status_handler))
        .route("/artifacts/{name}", get(api::get_artifact_handler))
        .route("/media-stream", get(api_stream::media_stream_handler))
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(Extension(Arc::new(state)))
}
