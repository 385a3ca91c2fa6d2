//! Error taxonomy for the broker, mapped to HTTP status codes at the edge.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Broker-wide error kinds. `NotAvailable` and `QueueTimeout` are distinguished
/// return values in the engine and queue, never propagated as `Err` past their
/// own layer — they only become `BrokerError` at the HTTP boundary when a
/// handler chooses to surface them as such.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("no key currently available")]
    NotAvailable { wait_ms: u64 },

    #[error("queue wait timed out")]
    QueueTimeout { wait_ms: u64 },

    #[error("store unavailable: {0}")]
    StoreTransient(String),

    #[error("store data corrupted for '{subscription_id}': {reason}")]
    StoreFatal {
        subscription_id: String,
        reason: String,
    },

    #[error("background job failed: {0}")]
    BackgroundJobFailure(String),
}

impl IntoResponse for BrokerError {
    fn into_response(self) -> Response {
        match &self {
            BrokerError::InvalidArgument(msg) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "message": msg }))).into_response()
            }
            BrokerError::NotAvailable { wait_ms } => (
                StatusCode::OK,
                Json(json!({ "status": "wait", "waitMs": wait_ms })),
            )
                .into_response(),
            BrokerError::QueueTimeout { wait_ms } => (
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({ "status": "wait", "waitMs": wait_ms })),
            )
                .into_response(),
            BrokerError::StoreTransient(msg) => {
                tracing::error!(error = %msg, "store transient error surfaced to caller");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "message": "store unavailable" })),
                )
                    .into_response()
            }
            BrokerError::StoreFatal {
                subscription_id,
                reason,
            } => {
                tracing::error!(subscription_id = %subscription_id, reason = %reason, "store fatal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "message": "internal error" })),
                )
                    .into_response()
            }
            BrokerError::BackgroundJobFailure(msg) => {
                tracing::warn!(error = %msg, "background job failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "message": "internal error" })),
                )
                    .into_response()
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, BrokerError>;
