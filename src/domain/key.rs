//! The Key document — the single entity the whole broker revolves around.

use serde::{Deserialize, Serialize};

use super::plan::Plan;

/// Lifecycle state of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStatus {
    Active,
    Exhausted,
    Banned,
}

/// A durable per-key document: plan, status, counters, window/day anchors,
/// last-used timestamp. Every field here is also a field in the Key Store's
/// filter/update documents — there is no field the engine mutates that isn't
/// represented on this struct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Key {
    pub subscription_id: String,
    pub plan: Plan,
    pub status: KeyStatus,
    pub window_limit: u32,
    pub daily_limit: u32,
    pub avg_interval_ms: u64,
    pub used_in_window: u32,
    pub window_start: i64,
    pub used_daily: u32,
    pub day_start: i64,
    pub last_used: i64,
}

/// 30-second rolling window.
pub const WINDOW_MS: i64 = 30_000;
/// 24-hour rolling day.
pub const DAY_MS: i64 = 86_400_000;

impl Key {
    /// `usedInWindow` as of `now`, treating an expired window as reset to 0.
    pub fn effective_used_in_window(&self, now: i64) -> u32 {
        if now - self.window_start >= WINDOW_MS {
            0
        } else {
            self.used_in_window
        }
    }

    /// `usedDaily` as of `now`, treating an expired day as reset to 0.
    pub fn effective_used_daily(&self, now: i64) -> u32 {
        if now - self.day_start >= DAY_MS {
            0
        } else {
            self.used_daily
        }
    }

    pub fn window_expired(&self, now: i64) -> bool {
        now - self.window_start >= WINDOW_MS
    }

    pub fn day_expired(&self, now: i64) -> bool {
        now - self.day_start >= DAY_MS
    }

    /// The spacing guard: ineligible until `lastUsed + avgIntervalMs` has elapsed.
    pub fn spacing_satisfied(&self, now: i64) -> bool {
        now >= self.last_used.saturating_add(self.avg_interval_ms as i64)
    }

    pub fn next_request_allowed_at(&self) -> i64 {
        if self.last_used == 0 {
            0
        } else {
            self.last_used + self.avg_interval_ms as i64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_key(now: i64) -> Key {
        Key {
            subscription_id: "k".into(),
            plan: Plan::Pro,
            status: KeyStatus::Active,
            window_limit: 35,
            daily_limit: 100_000,
            avg_interval_ms: 860,
            used_in_window: 0,
            window_start: now,
            used_daily: 0,
            day_start: now,
            last_used: 0,
        }
    }

    #[test]
    fn expired_window_reads_as_zero() {
        let now = 1_000_000;
        let mut k = fresh_key(now);
        k.used_in_window = 10;
        assert_eq!(k.effective_used_in_window(now + 29_000), 10);
        assert_eq!(k.effective_used_in_window(now + 30_000), 0);
    }

    #[test]
    fn expired_day_reads_as_zero() {
        let now = 1_000_000;
        let mut k = fresh_key(now);
        k.used_daily = 50;
        assert_eq!(k.effective_used_daily(now + DAY_MS - 1), 50);
        assert_eq!(k.effective_used_daily(now + DAY_MS), 0);
    }

    #[test]
    fn spacing_guard_blocks_until_interval_elapses() {
        let mut k = fresh_key(0);
        k.last_used = 1_000;
        assert!(!k.spacing_satisfied(1_859));
        assert!(k.spacing_satisfied(1_860));
    }

    #[test]
    fn next_request_allowed_at_is_zero_when_never_used() {
        let k = fresh_key(0);
        assert_eq!(k.next_request_allowed_at(), 0);
    }
}
