//! In-memory Key Store — backs unit and scenario tests. Not used in production;
//! `mongo::MongoKeyStore` is the durable adapter the server actually runs with.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::key::Key;
use crate::error::{BrokerError, Result};

use super::{KeyStore, PlanUpdate, ReservationCas, SweepUpdate};

#[derive(Default)]
pub struct InMemoryKeyStore {
    keys: Mutex<HashMap<String, Key>>,
}

impl InMemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyStore for InMemoryKeyStore {
    async fn find_all(&self) -> Result<Vec<Key>> {
        let keys = self.keys.lock().await;
        Ok(keys.values().cloned().collect())
    }

    async fn find_one(&self, subscription_id: &str) -> Result<Option<Key>> {
        let keys = self.keys.lock().await;
        Ok(keys.get(subscription_id).cloned())
    }

    async fn insert_one(&self, key: Key) -> Result<()> {
        let mut keys = self.keys.lock().await;
        if keys.contains_key(&key.subscription_id) {
            return Err(BrokerError::StoreFatal {
                subscription_id: key.subscription_id.clone(),
                reason: "duplicate subscriptionId on insert".into(),
            });
        }
        keys.insert(key.subscription_id.clone(), key);
        Ok(())
    }

    async fn apply_plan_update(&self, subscription_id: &str, update: PlanUpdate) -> Result<u64> {
        let mut keys = self.keys.lock().await;
        match keys.get_mut(subscription_id) {
            Some(k) => {
                k.plan = update.plan;
                k.window_limit = update.window_limit;
                k.daily_limit = update.daily_limit;
                k.avg_interval_ms = update.avg_interval_ms;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn apply_sweep(&self, subscription_id: &str, update: SweepUpdate) -> Result<u64> {
        let mut keys = self.keys.lock().await;
        match keys.get_mut(subscription_id) {
            Some(k) => {
                if let Some(v) = update.used_in_window {
                    k.used_in_window = v;
                }
                if let Some(v) = update.window_start {
                    k.window_start = v;
                }
                if let Some(v) = update.used_daily {
                    k.used_daily = v;
                }
                if let Some(v) = update.day_start {
                    k.day_start = v;
                }
                if let Some(v) = update.status {
                    k.status = v;
                }
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn try_reserve(&self, cas: &ReservationCas) -> Result<bool> {
        let mut keys = self.keys.lock().await;
        let Some(k) = keys.get_mut(&cas.subscription_id) else {
            return Ok(false);
        };
        let matches = k.used_in_window == cas.expect_used_in_window
            && k.window_start == cas.expect_window_start
            && k.used_daily == cas.expect_used_daily
            && k.day_start == cas.expect_day_start
            && k.status == cas.expect_status;
        if !matches {
            return Ok(false);
        }
        k.used_in_window = cas.new_used_in_window;
        k.window_start = cas.new_window_start;
        k.used_daily = cas.new_used_daily;
        k.day_start = cas.new_day_start;
        k.last_used = cas.new_last_used;
        k.status = cas.new_status;
        Ok(true)
    }

    async fn delete_one(&self, subscription_id: &str) -> Result<bool> {
        let mut keys = self.keys.lock().await;
        Ok(keys.remove(subscription_id).is_some())
    }
}
