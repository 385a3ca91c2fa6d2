//! In-memory Wait Queue — backs unit and scenario tests. `redis::RedisQueue`
//! is the durable adapter the server actually runs with.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{oneshot, Mutex, Notify, Semaphore};
use uuid::Uuid;

use crate::engine::ReservationEngine;
use crate::error::{BrokerError, Result};

use super::{service_job, JobId, QueueOutcome, WaitQueue, WaitQueueWorker};

#[derive(Default)]
pub struct InMemoryQueue {
    pending: Mutex<VecDeque<JobId>>,
    senders: Mutex<HashMap<JobId, oneshot::Sender<QueueOutcome>>>,
    receivers: Mutex<HashMap<JobId, oneshot::Receiver<QueueOutcome>>>,
    notify: Notify,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WaitQueue for InMemoryQueue {
    async fn enqueue(&self) -> Result<JobId> {
        let job_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.senders.lock().await.insert(job_id.clone(), tx);
        self.receivers.lock().await.insert(job_id.clone(), rx);
        self.pending.lock().await.push_back(job_id.clone());
        self.notify.notify_one();
        Ok(job_id)
    }

    async fn await_result(&self, job_id: &JobId, timeout: Option<Duration>) -> Result<QueueOutcome> {
        let rx = self
            .receivers
            .lock()
            .await
            .remove(job_id)
            .ok_or_else(|| BrokerError::InvalidArgument(format!("unknown job id {job_id}")))?;

        let outcome = match timeout {
            Some(d) => tokio::time::timeout(d, rx).await,
            None => Ok(rx.await),
        };

        match outcome {
            Ok(Ok(outcome)) => Ok(outcome),
            // Worker dropped the sender without resolving it, or our own
            // deadline elapsed first — both surface as a timed-out wait.
            Ok(Err(_)) | Err(_) => Ok(QueueOutcome::TimedOut),
        }
    }
}

#[async_trait]
impl WaitQueueWorker for InMemoryQueue {
    async fn run_worker(
        self: Arc<Self>,
        engine: Arc<ReservationEngine>,
        concurrency: usize,
        backoff_ms: u64,
        max_wait_ms: u64,
    ) {
        let semaphore = Arc::new(Semaphore::new(concurrency));

        loop {
            let job_id = loop {
                if let Some(id) = self.pending.lock().await.pop_front() {
                    break id;
                }
                self.notify.notified().await;
            };

            let Some(sender) = self.senders.lock().await.remove(&job_id) else {
                continue;
            };

            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .expect("semaphore never closed");
            let engine = engine.clone();

            tokio::spawn(async move {
                let _permit = permit;
                let outcome = service_job(&engine, backoff_ms, max_wait_ms).await;
                let _ = sender.send(outcome);
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::key::{Key, KeyStatus};
    use crate::domain::plan::Plan;
    use crate::store::memory::InMemoryKeyStore;
    use crate::store::KeyStore;

    #[tokio::test]
    async fn queued_caller_wins_once_spacing_elapses() {
        let store = Arc::new(InMemoryKeyStore::new());
        let now = crate::engine::now_ms();
        store
            .insert_one(Key {
                subscription_id: "sub_pro_test".into(),
                plan: Plan::Pro,
                status: KeyStatus::Active,
                window_limit: 35,
                daily_limit: 100_000,
                avg_interval_ms: 860,
                used_in_window: 0,
                window_start: now,
                used_daily: 0,
                day_start: now,
                last_used: now, // just reserved
            })
            .await
            .unwrap();

        let engine = Arc::new(ReservationEngine::new(store));
        let queue = Arc::new(InMemoryQueue::new());
        tokio::spawn(queue.clone().run_worker(engine, 5, 100, 2000));

        let job_id = queue.enqueue().await.unwrap();
        let outcome = queue
            .await_result(&job_id, Some(Duration::from_millis(2000)))
            .await
            .unwrap();

        match outcome {
            QueueOutcome::Reserved(r) => assert_eq!(r.subscription_id, "sub_pro_test"),
            QueueOutcome::TimedOut => panic!("expected a reservation before the deadline"),
        }
    }

    #[tokio::test]
    async fn timeout_surfaces_when_worker_deadline_too_short() {
        let store = Arc::new(InMemoryKeyStore::new());
        let now = crate::engine::now_ms();
        store
            .insert_one(Key {
                subscription_id: "slow_key".into(),
                plan: Plan::Pro,
                status: KeyStatus::Active,
                window_limit: 35,
                daily_limit: 100_000,
                avg_interval_ms: 3000,
                used_in_window: 0,
                window_start: now,
                used_daily: 0,
                day_start: now,
                last_used: now,
            })
            .await
            .unwrap();

        let engine = Arc::new(ReservationEngine::new(store));
        let queue = Arc::new(InMemoryQueue::new());
        tokio::spawn(queue.clone().run_worker(engine, 5, 200, 500));

        let job_id = queue.enqueue().await.unwrap();
        let outcome = queue
            .await_result(&job_id, Some(Duration::from_millis(2000)))
            .await
            .unwrap();

        assert!(matches!(outcome, QueueOutcome::TimedOut));
    }
}
