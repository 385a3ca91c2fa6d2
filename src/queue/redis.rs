//! Redis-backed Wait Queue — the production adapter. A list (`RPUSH`/`BLPOP`)
//! gives durable FIFO hand-off across HTTP-tier restarts and replicas;
//! results are written to a short-lived key the requester polls, since the
//! requester and the worker servicing its job may live in different
//! processes. Command usage follows the same `redis::AsyncCommands` idiom
//! the other_examples ratelimiter adapter uses for its sorted-set commands.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use uuid::Uuid;

use crate::engine::ReservationEngine;
use crate::error::{BrokerError, Result};

use super::{service_job, JobId, QueueOutcome, WaitQueue, WaitQueueWorker};

const RESULT_TTL_SECS: u64 = 3600;
const RESULT_POLL_INTERVAL: Duration = Duration::from_millis(50);
const BLPOP_TIMEOUT_SECS: f64 = 1.0;

pub struct RedisQueue {
    manager: ConnectionManager,
    queue_key: String,
    result_key_prefix: String,
}

impl RedisQueue {
    pub async fn connect(redis_url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let manager = ConnectionManager::new(client).await?;
        Ok(Self {
            manager,
            queue_key: "keybroker:wait_queue".to_string(),
            result_key_prefix: "keybroker:wait_result".to_string(),
        })
    }

    fn result_key(&self, job_id: &str) -> String {
        format!("{}:{job_id}", self.result_key_prefix)
    }

    fn transient(err: redis::RedisError) -> BrokerError {
        BrokerError::StoreTransient(err.to_string())
    }
}

#[async_trait]
impl WaitQueue for RedisQueue {
    async fn enqueue(&self) -> Result<JobId> {
        let job_id = Uuid::new_v4().to_string();
        let mut conn = self.manager.clone();
        conn.rpush::<_, _, ()>(&self.queue_key, &job_id)
            .await
            .map_err(Self::transient)?;
        Ok(job_id)
    }

    async fn await_result(&self, job_id: &JobId, timeout: Option<Duration>) -> Result<QueueOutcome> {
        let key = self.result_key(job_id);
        let started = Instant::now();

        loop {
            let mut conn = self.manager.clone();
            let raw: Option<String> = conn.get(&key).await.map_err(Self::transient)?;

            if let Some(raw) = raw {
                let _: std::result::Result<(), _> = conn.del(&key).await;
                let outcome: QueueOutcome =
                    serde_json::from_str(&raw).map_err(|e| BrokerError::StoreFatal {
                        subscription_id: job_id.clone(),
                        reason: e.to_string(),
                    })?;
                return Ok(outcome);
            }

            if let Some(deadline) = timeout {
                if started.elapsed() >= deadline {
                    return Ok(QueueOutcome::TimedOut);
                }
            }
            tokio::time::sleep(RESULT_POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl WaitQueueWorker for RedisQueue {
    async fn run_worker(
        self: Arc<Self>,
        engine: Arc<ReservationEngine>,
        concurrency: usize,
        backoff_ms: u64,
        max_wait_ms: u64,
    ) {
        let semaphore = Arc::new(tokio::sync::Semaphore::new(concurrency));

        loop {
            let mut conn = self.manager.clone();
            let popped: redis::RedisResult<Option<(String, String)>> =
                conn.blpop(&self.queue_key, BLPOP_TIMEOUT_SECS).await;

            let job_id = match popped {
                Ok(Some((_list, job_id))) => job_id,
                Ok(None) => continue,
                Err(err) => {
                    tracing::warn!(error = %err, "redis wait queue blpop failed");
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    continue;
                }
            };

            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .expect("semaphore never closed");
            let engine = engine.clone();
            let this = self.clone();

            tokio::spawn(async move {
                let _permit = permit;
                let outcome = service_job(&engine, backoff_ms, max_wait_ms).await;
                let key = this.result_key(&job_id);
                let mut conn = this.manager.clone();
                if let Ok(payload) = serde_json::to_string(&outcome) {
                    let _: std::result::Result<(), _> =
                        conn.set_ex(&key, payload, RESULT_TTL_SECS).await;
                } else {
                    tracing::warn!(job_id = %job_id, "failed to serialize wait queue result");
                }
            });
        }
    }
}
