//! Key Store contract (C1) — a durable, compare-and-set-capable collection of
//! Key documents. `mongo` is the production adapter; `memory` backs tests.

pub mod memory;
pub mod mongo;

use async_trait::async_trait;

use crate::domain::key::{Key, KeyStatus};
use crate::error::Result;

/// Fields the Registry is allowed to change on re-registration: plan and the
/// limits derived from it. Counters, anchors, and `lastUsed` are never touched.
#[derive(Debug, Clone)]
pub struct PlanUpdate {
    pub plan: crate::domain::plan::Plan,
    pub window_limit: u32,
    pub daily_limit: u32,
    pub avg_interval_ms: u64,
}

/// A sweep update: resets counters/anchors and optionally flips status.
#[derive(Debug, Clone)]
pub struct SweepUpdate {
    pub used_in_window: Option<u32>,
    pub window_start: Option<i64>,
    pub used_daily: Option<u32>,
    pub day_start: Option<i64>,
    pub status: Option<KeyStatus>,
}

/// The exact prior values a reservation CAS pins its filter to, and the new
/// values it writes on success. Computed entirely from a snapshot the engine
/// already holds — the store only needs to confirm the snapshot still matches.
#[derive(Debug, Clone)]
pub struct ReservationCas {
    pub subscription_id: String,
    // Filter — must match the document exactly for the update to apply.
    pub expect_used_in_window: u32,
    pub expect_window_start: i64,
    pub expect_used_daily: u32,
    pub expect_day_start: i64,
    pub expect_status: KeyStatus,
    // New values written atomically with the filter.
    pub new_used_in_window: u32,
    pub new_window_start: i64,
    pub new_used_daily: u32,
    pub new_day_start: i64,
    pub new_last_used: i64,
    pub new_status: KeyStatus,
}

/// Durable, compare-and-set-capable storage for Key documents.
///
/// `update_one`/`find_one_and_update` in the abstract contract become the two
/// update methods below: `apply_sweep` (unconditional, idempotent — used by
/// the Scheduler and Registry) and `try_reserve` (the CAS proper — used only
/// by the Reservation Engine). Both are atomic per document.
#[async_trait]
pub trait KeyStore: Send + Sync {
    async fn find_all(&self) -> Result<Vec<Key>>;

    async fn find_one(&self, subscription_id: &str) -> Result<Option<Key>>;

    async fn insert_one(&self, key: Key) -> Result<()>;

    /// Update plan-derived fields only. Matched count lets the Registry tell
    /// "existed and updated" from "document vanished mid-call" (treated as
    /// `StoreTransient` by the caller, which retries at the HTTP layer's
    /// discretion — it is not expected in single-writer-per-id practice).
    async fn apply_plan_update(&self, subscription_id: &str, update: PlanUpdate) -> Result<u64>;

    /// Unconditional counter/anchor/status reset, used by the Scheduler's
    /// idempotent sweeps. Matching zero documents (key deleted concurrently)
    /// is not an error.
    async fn apply_sweep(&self, subscription_id: &str, update: SweepUpdate) -> Result<u64>;

    /// Attempt the reservation CAS. Returns `true` iff the filter matched
    /// exactly one document and the update applied.
    async fn try_reserve(&self, cas: &ReservationCas) -> Result<bool>;

    async fn delete_one(&self, subscription_id: &str) -> Result<bool>;
}
