//! Maintenance Scheduler (C4) — periodic sweeps that reset elapsed windows
//! and days and reactivate keys whose exhaustion has expired. Not
//! correctness-bearing (the Engine already treats expired windows/days as
//! reset): these sweeps only reduce drift in the `/status` projection and
//! let exhausted keys become selectable promptly after a day rollover.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;

use crate::domain::key::{Key, KeyStatus, DAY_MS, WINDOW_MS};
use crate::store::{KeyStore, SweepUpdate};

const WINDOW_SWEEP_INTERVAL: Duration = Duration::from_secs(30);
const DAY_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

pub struct MaintenanceScheduler {
    store: Arc<dyn KeyStore>,
}

impl MaintenanceScheduler {
    pub fn new(store: Arc<dyn KeyStore>) -> Self {
        Self { store }
    }

    /// Spawns the two sweep loops and returns immediately; the loops run
    /// until the process exits.
    pub fn spawn(self: Arc<Self>) {
        let window_scheduler = Arc::clone(&self);
        tokio::spawn(async move { window_scheduler.run_window_sweep().await });

        let day_scheduler = Arc::clone(&self);
        tokio::spawn(async move { day_scheduler.run_day_sweep().await });
    }

    async fn run_window_sweep(&self) {
        let mut ticker = tokio::time::interval(WINDOW_SWEEP_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // skip the immediate first tick

        loop {
            ticker.tick().await;
            if let Err(err) = self.sweep_windows().await {
                tracing::warn!(error = %err, "window sweep tick failed");
            }
        }
    }

    async fn run_day_sweep(&self) {
        let mut ticker = tokio::time::interval(DAY_SWEEP_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if let Err(err) = self.sweep_days().await {
                tracing::warn!(error = %err, "day sweep tick failed");
            }
        }
    }

    async fn sweep_windows(&self) -> crate::error::Result<()> {
        let now = crate::engine::now_ms();
        let keys = self.store.find_all().await?;
        let mut swept = 0u32;

        for key in &keys {
            if !key_window_needs_sweep(key, now) {
                continue;
            }
            match self
                .store
                .apply_sweep(
                    &key.subscription_id,
                    SweepUpdate {
                        used_in_window: Some(0),
                        window_start: Some(now),
                        used_daily: None,
                        day_start: None,
                        status: None,
                    },
                )
                .await
            {
                Ok(_) => swept += 1,
                Err(err) => {
                    tracing::warn!(subscription_id = %key.subscription_id, error = %err, "window sweep failed for key");
                }
            }
        }

        tracing::debug!(swept, "window sweep complete");
        Ok(())
    }

    async fn sweep_days(&self) -> crate::error::Result<()> {
        let now = crate::engine::now_ms();
        let keys = self.store.find_all().await?;
        let mut swept = 0u32;

        for key in &keys {
            if !key_day_needs_sweep(key, now) {
                continue;
            }
            let reactivate = key.status == KeyStatus::Exhausted;
            match self
                .store
                .apply_sweep(
                    &key.subscription_id,
                    SweepUpdate {
                        used_in_window: None,
                        window_start: None,
                        used_daily: Some(0),
                        day_start: Some(now),
                        status: if reactivate {
                            Some(KeyStatus::Active)
                        } else {
                            None
                        },
                    },
                )
                .await
            {
                Ok(_) => swept += 1,
                Err(err) => {
                    tracing::warn!(subscription_id = %key.subscription_id, error = %err, "day sweep failed for key");
                }
            }
        }

        tracing::debug!(swept, "day sweep complete");
        Ok(())
    }
}

fn key_window_needs_sweep(key: &Key, now: i64) -> bool {
    now - key.window_start >= WINDOW_MS
}

fn key_day_needs_sweep(key: &Key, now: i64) -> bool {
    key.status != KeyStatus::Banned && now - key.day_start >= DAY_MS
}
