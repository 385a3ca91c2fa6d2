//! External Reconcilers (C7) — out of core. Each mutates the Key Store in
//! response to something outside this process: configuration re-sync, or an
//! upstream provider's own health verdict. Both are specified only at their
//! interface boundary, per §1's non-goals.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::Result;
use crate::registry::KeyRegistry;

/// Re-syncs the desired key set from configuration (the §6 preload sources,
/// and any live edit the watcher in `crate::watch` observes). Registering an
/// id that already exists only updates its plan — see `KeyRegistry::register`
/// — so this never resets a key's counters.
pub struct ConfigReconciler {
    registry: Arc<KeyRegistry>,
}

impl ConfigReconciler {
    pub fn new(registry: Arc<KeyRegistry>) -> Self {
        Self { registry }
    }

    pub async fn sync(&self, desired: &[(String, String)]) -> Result<()> {
        let mut synced = 0u32;
        for (subscription_id, plan) in desired {
            match self.registry.register(subscription_id, plan).await {
                Ok(()) => synced += 1,
                Err(err) => {
                    warn!(subscription_id = %subscription_id, error = %err, "config reconcile failed for key");
                }
            }
        }
        info!(synced, total = desired.len(), "config reconcile sync complete");
        Ok(())
    }
}

/// The abstract upstream health check a key's provider subscription must
/// pass. A concrete implementation against a specific mail-verification API
/// is a non-goal (§1) — only this trait and the sweep against it belong to
/// the core.
#[async_trait]
pub trait UpstreamHealthProbe: Send + Sync {
    async fn is_healthy(&self, subscription_id: &str) -> bool;
}

/// Deletes any key its probe reports as dead. Intended to run on a daily
/// UTC-midnight cadence (§4.3); the calendar scheduling itself lives with
/// whatever drives `run_once`, not in this type.
pub struct HealthProbeReconciler {
    registry: Arc<KeyRegistry>,
    probe: Arc<dyn UpstreamHealthProbe>,
}

impl HealthProbeReconciler {
    pub fn new(registry: Arc<KeyRegistry>, probe: Arc<dyn UpstreamHealthProbe>) -> Self {
        Self { registry, probe }
    }

    pub async fn run_once(&self) -> Result<()> {
        let keys = self.registry.list_status().await?;
        let mut deleted = 0u32;
        for key in &keys {
            if !self.probe.is_healthy(&key.subscription_id).await {
                self.registry.delete(&key.subscription_id).await?;
                deleted += 1;
                warn!(subscription_id = %key.subscription_id, "upstream health probe failed, key deleted");
            }
        }
        info!(deleted, checked = keys.len(), "nightly health probe sweep complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::plan::IntervalOverrides;
    use crate::store::memory::InMemoryKeyStore;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct AlwaysHealthy;
    #[async_trait]
    impl UpstreamHealthProbe for AlwaysHealthy {
        async fn is_healthy(&self, _subscription_id: &str) -> bool {
            true
        }
    }

    struct FailsOne {
        target: String,
        called: AtomicBool,
    }
    #[async_trait]
    impl UpstreamHealthProbe for FailsOne {
        async fn is_healthy(&self, subscription_id: &str) -> bool {
            self.called.store(true, Ordering::SeqCst);
            subscription_id != self.target
        }
    }

    #[tokio::test]
    async fn config_sync_registers_desired_keys() {
        let registry = Arc::new(KeyRegistry::new(
            Arc::new(InMemoryKeyStore::new()),
            IntervalOverrides::default(),
        ));
        let reconciler = ConfigReconciler::new(registry.clone());

        reconciler
            .sync(&[
                ("k1".to_string(), "pro".to_string()),
                ("k2".to_string(), "ultimate".to_string()),
            ])
            .await
            .unwrap();

        let statuses = registry.list_status().await.unwrap();
        assert_eq!(statuses.len(), 2);
    }

    #[tokio::test]
    async fn healthy_keys_survive_probe_sweep() {
        let registry = Arc::new(KeyRegistry::new(
            Arc::new(InMemoryKeyStore::new()),
            IntervalOverrides::default(),
        ));
        registry.register("alive", "pro").await.unwrap();
        let reconciler = HealthProbeReconciler::new(registry.clone(), Arc::new(AlwaysHealthy));

        reconciler.run_once().await.unwrap();

        assert_eq!(registry.list_status().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unhealthy_key_is_deleted() {
        let registry = Arc::new(KeyRegistry::new(
            Arc::new(InMemoryKeyStore::new()),
            IntervalOverrides::default(),
        ));
        registry.register("dead", "pro").await.unwrap();
        registry.register("alive", "pro").await.unwrap();
        let probe = Arc::new(FailsOne {
            target: "dead".to_string(),
            called: AtomicBool::new(false),
        });
        let reconciler = HealthProbeReconciler::new(registry.clone(), probe);

        reconciler.run_once().await.unwrap();

        let remaining: Vec<_> = registry
            .list_status()
            .await
            .unwrap()
            .into_iter()
            .map(|k| k.subscription_id)
            .collect();
        assert_eq!(remaining, vec!["alive".to_string()]);
    }
}
