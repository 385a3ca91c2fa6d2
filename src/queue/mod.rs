//! Wait Queue contract (C5) — serializes blocking callers, bounds worker
//! concurrency, and hands reservation attempts off to a durable broker so a
//! restart of the HTTP tier does not drop an in-flight wait.
//!
//! The queue is not correctness-bearing (`engine::reserve`'s CAS loop is);
//! it exists for fairness under contention and for durable hand-off, per
//! the source's own framing of its role.

pub mod memory;
pub mod redis;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::engine::{now_ms, Reservation, ReservationEngine};
use crate::error::Result;

pub type JobId = String;

/// What became of a queued job: a won reservation, or the requester/worker
/// deadline elapsing first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum QueueOutcome {
    Reserved(Reservation),
    TimedOut,
}

#[async_trait]
pub trait WaitQueue: Send + Sync {
    /// Enqueue a new reservation-wait job and return its handle.
    async fn enqueue(&self) -> Result<JobId>;

    /// Block until the job resolves or `timeout` elapses (`None` = unbounded).
    /// A requester timing out here does not cancel the worker still
    /// servicing the job — see §5's cancellation policy.
    async fn await_result(&self, job_id: &JobId, timeout: Option<Duration>) -> Result<QueueOutcome>;
}

/// The worker side of a queue: dequeues jobs up to `concurrency` at a time
/// and services each with `service_job`.
#[async_trait]
pub trait WaitQueueWorker: Send + Sync {
    async fn run_worker(
        self: Arc<Self>,
        engine: Arc<ReservationEngine>,
        concurrency: usize,
        backoff_ms: u64,
        max_wait_ms: u64,
    );
}

/// Calls `reserve()` in a loop with `backoff_ms` between misses until it
/// succeeds or `max_wait_ms` elapses (`0` means unbounded). Shared by every
/// `WaitQueueWorker` implementation so the retry policy lives in one place.
pub async fn service_job(
    engine: &ReservationEngine,
    backoff_ms: u64,
    max_wait_ms: u64,
) -> QueueOutcome {
    let started = now_ms();
    loop {
        match engine.reserve().await {
            Ok(Some(reservation)) => return QueueOutcome::Reserved(reservation),
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(error = %err, "reserve attempt failed inside wait queue worker");
            }
        }

        if max_wait_ms != 0 && now_ms() - started >= max_wait_ms as i64 {
            return QueueOutcome::TimedOut;
        }
        tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
    }
}
