//! HTTP Surface (C8) — the seven routes of §6, wired with the same
//! `axum::Router` + `tower_http` tracing/CORS layering style as the teacher's
//! own `main.rs`.

pub mod handlers;

use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::domain::plan::IntervalOverrides;
use crate::engine::ReservationEngine;
use crate::queue::WaitQueue;
use crate::registry::KeyRegistry;

pub struct AppState {
    pub engine: Arc<ReservationEngine>,
    pub registry: Arc<KeyRegistry>,
    pub queue: Arc<dyn WaitQueue>,
    pub default_wait_hint_ms: u64,
    pub queue_request_timeout_ms: u64,
}

impl AppState {
    pub fn new(
        engine: Arc<ReservationEngine>,
        registry: Arc<KeyRegistry>,
        queue: Arc<dyn WaitQueue>,
        overrides: IntervalOverrides,
        queue_request_timeout_ms: u64,
    ) -> Self {
        Self {
            engine,
            registry,
            queue,
            default_wait_hint_ms: crate::domain::plan::default_wait_hint_ms(overrides),
            queue_request_timeout_ms,
        }
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/key/available", get(handlers::get_key_available))
        .route("/key/available/queued", get(handlers::get_key_available_queued))
        .route("/status", get(handlers::get_status))
        .route("/limits", get(handlers::get_limits))
        .route("/keys", post(handlers::post_keys))
        .route("/keys/:id", delete(handlers::delete_key))
        .route("/health", get(handlers::get_health))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
