//! Key Registry (C6) — register/update/delete keys and project their
//! externally-visible metadata for `/status` and `/limits`.

use std::sync::Arc;

use serde::Serialize;

use crate::domain::key::{Key, KeyStatus};
use crate::domain::plan::{limits_for, IntervalOverrides, Plan};
use crate::engine::now_ms;
use crate::error::{BrokerError, Result};
use crate::store::{KeyStore, PlanUpdate};

/// Full externally-visible view of a key, as returned by `/status`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyStatusView {
    pub subscription_id: String,
    pub plan: Plan,
    pub status: KeyStatus,
    pub window_limit: u32,
    pub daily_limit: u32,
    pub avg_interval_ms: u64,
    pub used_in_window: u32,
    pub used_daily: u32,
    pub last_used: i64,
    pub next_request_allowed_at: i64,
}

/// The `/limits` projection: just the fields a caller needs to plan ahead.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyLimitsView {
    pub subscription_id: String,
    pub plan: Plan,
    pub window_limit: u32,
    pub daily_limit: u32,
    pub avg_interval_ms: u64,
    pub last_used: i64,
    pub next_request_allowed_at: i64,
}

impl From<&Key> for KeyStatusView {
    fn from(k: &Key) -> Self {
        KeyStatusView {
            subscription_id: k.subscription_id.clone(),
            plan: k.plan,
            status: k.status,
            window_limit: k.window_limit,
            daily_limit: k.daily_limit,
            avg_interval_ms: k.avg_interval_ms,
            used_in_window: k.used_in_window,
            used_daily: k.used_daily,
            last_used: k.last_used,
            next_request_allowed_at: k.next_request_allowed_at(),
        }
    }
}

impl From<&Key> for KeyLimitsView {
    fn from(k: &Key) -> Self {
        KeyLimitsView {
            subscription_id: k.subscription_id.clone(),
            plan: k.plan,
            window_limit: k.window_limit,
            daily_limit: k.daily_limit,
            avg_interval_ms: k.avg_interval_ms,
            last_used: k.last_used,
            next_request_allowed_at: k.next_request_allowed_at(),
        }
    }
}

pub struct KeyRegistry {
    store: Arc<dyn KeyStore>,
    overrides: IntervalOverrides,
}

impl KeyRegistry {
    pub fn new(store: Arc<dyn KeyStore>, overrides: IntervalOverrides) -> Self {
        Self { store, overrides }
    }

    /// Insert-fresh-or-update-plan-only, per §4.5. Never touches counters,
    /// anchors, or `lastUsed` on an existing document.
    pub async fn register(&self, subscription_id: &str, plan_raw: &str) -> Result<()> {
        let subscription_id = subscription_id.trim();
        if subscription_id.is_empty() {
            return Err(BrokerError::InvalidArgument(
                "subscriptionId must not be empty".into(),
            ));
        }

        let plan = Plan::normalize(plan_raw);
        let limits = limits_for(plan, self.overrides);

        if let Some(_existing) = self.store.find_one(subscription_id).await? {
            self.store
                .apply_plan_update(
                    subscription_id,
                    PlanUpdate {
                        plan,
                        window_limit: limits.window_limit,
                        daily_limit: limits.daily_limit,
                        avg_interval_ms: limits.avg_interval_ms,
                    },
                )
                .await?;
            return Ok(());
        }

        let now = now_ms();
        self.store
            .insert_one(Key {
                subscription_id: subscription_id.to_string(),
                plan,
                status: KeyStatus::Active,
                window_limit: limits.window_limit,
                daily_limit: limits.daily_limit,
                avg_interval_ms: limits.avg_interval_ms,
                used_in_window: 0,
                window_start: now,
                used_daily: 0,
                day_start: now,
                last_used: 0,
            })
            .await
    }

    /// Absent documents are a no-op success.
    pub async fn delete(&self, subscription_id: &str) -> Result<()> {
        let subscription_id = subscription_id.trim();
        if subscription_id.is_empty() {
            return Err(BrokerError::InvalidArgument(
                "subscriptionId must not be empty".into(),
            ));
        }
        self.store.delete_one(subscription_id).await?;
        Ok(())
    }

    pub async fn list_status(&self) -> Result<Vec<KeyStatusView>> {
        let keys = self.store.find_all().await?;
        Ok(keys.iter().map(KeyStatusView::from).collect())
    }

    pub async fn list_limits(&self) -> Result<Vec<KeyLimitsView>> {
        let keys = self.store.find_all().await?;
        Ok(keys.iter().map(KeyLimitsView::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryKeyStore;

    fn registry() -> KeyRegistry {
        KeyRegistry::new(Arc::new(InMemoryKeyStore::new()), IntervalOverrides::default())
    }

    #[tokio::test]
    async fn register_rejects_empty_subscription_id() {
        let reg = registry();
        let err = reg.register("  ", "pro").await.unwrap_err();
        assert!(matches!(err, BrokerError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn register_unrecognized_plan_collapses_to_ultimate() {
        let reg = registry();
        reg.register("sub1", "enterprise").await.unwrap();
        let statuses = reg.list_status().await.unwrap();
        assert_eq!(statuses[0].plan, Plan::Ultimate);
    }

    #[tokio::test]
    async fn reregistration_preserves_counters_and_updates_limits() {
        let store = Arc::new(InMemoryKeyStore::new());
        let reg = KeyRegistry::new(store.clone(), IntervalOverrides::default());

        reg.register("sub_k", "pro").await.unwrap();
        let engine = crate::engine::ReservationEngine::new(store.clone());
        engine.reserve().await.unwrap();

        reg.register("sub_k", "ultimate").await.unwrap();

        let view = reg
            .list_status()
            .await
            .unwrap()
            .into_iter()
            .find(|k| k.subscription_id == "sub_k")
            .unwrap();
        assert_eq!(view.used_in_window, 1);
        assert_eq!(view.used_daily, 1);
        assert_eq!(view.avg_interval_ms, 170);
        assert_eq!(view.window_limit, 170);
    }

    #[tokio::test]
    async fn delete_absent_key_is_a_no_op_success() {
        let reg = registry();
        reg.delete("never_existed").await.unwrap();
    }

    #[tokio::test]
    async fn limits_projection_matches_status_projection() {
        let reg = registry();
        reg.register("sub_proj", "pro").await.unwrap();

        let status = &reg.list_status().await.unwrap()[0];
        let limits = &reg.list_limits().await.unwrap()[0];

        assert_eq!(status.subscription_id, limits.subscription_id);
        assert_eq!(status.plan, limits.plan);
        assert_eq!(status.window_limit, limits.window_limit);
        assert_eq!(status.daily_limit, limits.daily_limit);
        assert_eq!(status.avg_interval_ms, limits.avg_interval_ms);
        assert_eq!(status.next_request_allowed_at, limits.next_request_allowed_at);
    }
}
