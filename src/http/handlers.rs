use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::engine::Reservation;
use crate::error::{BrokerError, Result};
use crate::queue::QueueOutcome;

use super::AppState;

#[derive(Debug, Serialize)]
struct KeyDescriptor {
    #[serde(rename = "subscriptionId")]
    subscription_id: String,
    plan: crate::domain::plan::Plan,
    #[serde(rename = "avgRequestIntervalMs")]
    avg_request_interval_ms: u64,
    #[serde(rename = "lastUsed")]
    last_used: i64,
    #[serde(rename = "nextRequestAllowedAt")]
    next_request_allowed_at: i64,
}

impl From<&Reservation> for KeyDescriptor {
    fn from(r: &Reservation) -> Self {
        KeyDescriptor {
            subscription_id: r.subscription_id.clone(),
            plan: r.plan,
            avg_request_interval_ms: r.avg_interval_ms,
            last_used: r.last_used,
            next_request_allowed_at: r.next_request_allowed_at,
        }
    }
}

pub async fn get_key_available(State(state): State<Arc<AppState>>) -> Result<Json<Value>> {
    match state.engine.reserve().await? {
        Some(reservation) => Ok(Json(json!({
            "status": "ok",
            "key": KeyDescriptor::from(&reservation),
        }))),
        None => Err(BrokerError::NotAvailable {
            wait_ms: state.default_wait_hint_ms,
        }),
    }
}

pub async fn get_key_available_queued(State(state): State<Arc<AppState>>) -> Result<Json<Value>> {
    let job_id = state.queue.enqueue().await?;
    let timeout = if state.queue_request_timeout_ms == 0 {
        None
    } else {
        Some(Duration::from_millis(state.queue_request_timeout_ms))
    };

    match state.queue.await_result(&job_id, timeout).await? {
        QueueOutcome::Reserved(reservation) => Ok(Json(json!({
            "status": "ok",
            "key": KeyDescriptor::from(&reservation),
        }))),
        QueueOutcome::TimedOut => Err(BrokerError::QueueTimeout {
            wait_ms: state.default_wait_hint_ms,
        }),
    }
}

pub async fn get_status(State(state): State<Arc<AppState>>) -> Result<Json<Value>> {
    let statuses = state.registry.list_status().await?;
    Ok(Json(json!(statuses)))
}

pub async fn get_limits(State(state): State<Arc<AppState>>) -> Result<Json<Value>> {
    let limits = state.registry.list_limits().await?;
    Ok(Json(json!(limits)))
}

#[derive(Debug, Deserialize)]
pub struct RegisterKeyBody {
    #[serde(alias = "id", alias = "subscriptionId")]
    subscription_id: String,
    plan: String,
}

pub async fn post_keys(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RegisterKeyBody>,
) -> Result<(StatusCode, Json<Value>)> {
    state.registry.register(&body.subscription_id, &body.plan).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "key registered" })),
    ))
}

pub async fn delete_key(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    state.registry.delete(&id).await?;
    Ok(Json(json!({ "message": "key deleted" })))
}

pub async fn get_health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
