//! Plan policy — pure mapping from a subscription plan to its quota limits.

use serde::{Deserialize, Serialize};

/// A subscription plan. Determines window/day limits and default spacing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Pro,
    Ultimate,
}

impl Plan {
    /// Case-insensitive normalization. Any unrecognized value collapses to `Ultimate`.
    pub fn normalize(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pro" => Plan::Pro,
            _ => Plan::Ultimate,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Plan::Pro => "pro",
            Plan::Ultimate => "ultimate",
        }
    }
}

/// Derived quota limits for a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub window_limit: u32,
    pub daily_limit: u32,
    pub avg_interval_ms: u64,
}

/// Per-plan spacing overrides, sourced from configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntervalOverrides {
    pub pro_interval_ms: Option<u64>,
    pub ultimate_interval_ms: Option<u64>,
}

const PRO_WINDOW_LIMIT: u32 = 35;
const PRO_DAILY_LIMIT: u32 = 100_000;
const PRO_DEFAULT_INTERVAL_MS: u64 = 860;

const ULTIMATE_WINDOW_LIMIT: u32 = 170;
const ULTIMATE_DAILY_LIMIT: u32 = 500_000;
const ULTIMATE_DEFAULT_INTERVAL_MS: u64 = 170;

/// Resolve the limits for a plan, honoring any configured interval overrides.
///
/// `windowLimit`/`dailyLimit` are always the plan's fixed values; only
/// `avgIntervalMs` is overridable.
pub fn limits_for(plan: Plan, overrides: IntervalOverrides) -> Limits {
    match plan {
        Plan::Pro => Limits {
            window_limit: PRO_WINDOW_LIMIT,
            daily_limit: PRO_DAILY_LIMIT,
            avg_interval_ms: overrides.pro_interval_ms.unwrap_or(PRO_DEFAULT_INTERVAL_MS),
        },
        Plan::Ultimate => Limits {
            window_limit: ULTIMATE_WINDOW_LIMIT,
            daily_limit: ULTIMATE_DAILY_LIMIT,
            avg_interval_ms: overrides
                .ultimate_interval_ms
                .unwrap_or(ULTIMATE_DEFAULT_INTERVAL_MS),
        },
    }
}

/// The wait hint surfaced to clients when no key is currently reservable:
/// `min(proIntervalMs, ultimateIntervalMs)`.
pub fn default_wait_hint_ms(overrides: IntervalOverrides) -> u64 {
    let pro = limits_for(Plan::Pro, overrides).avg_interval_ms;
    let ultimate = limits_for(Plan::Ultimate, overrides).avg_interval_ms;
    pro.min(ultimate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_is_case_insensitive() {
        assert_eq!(Plan::normalize("PRO"), Plan::Pro);
        assert_eq!(Plan::normalize("  pro "), Plan::Pro);
        assert_eq!(Plan::normalize("Ultimate"), Plan::Ultimate);
    }

    #[test]
    fn unrecognized_plan_collapses_to_ultimate() {
        assert_eq!(Plan::normalize("enterprise"), Plan::Ultimate);
        assert_eq!(Plan::normalize(""), Plan::Ultimate);
    }

    #[test]
    fn default_limits_match_policy_table() {
        let pro = limits_for(Plan::Pro, IntervalOverrides::default());
        assert_eq!(pro.window_limit, 35);
        assert_eq!(pro.daily_limit, 100_000);
        assert_eq!(pro.avg_interval_ms, 860);

        let ultimate = limits_for(Plan::Ultimate, IntervalOverrides::default());
        assert_eq!(ultimate.window_limit, 170);
        assert_eq!(ultimate.daily_limit, 500_000);
        assert_eq!(ultimate.avg_interval_ms, 170);
    }

    #[test]
    fn interval_override_leaves_window_and_daily_limits_fixed() {
        let overrides = IntervalOverrides {
            pro_interval_ms: Some(2000),
            ultimate_interval_ms: None,
        };
        let pro = limits_for(Plan::Pro, overrides);
        assert_eq!(pro.avg_interval_ms, 2000);
        assert_eq!(pro.window_limit, 35);
        assert_eq!(pro.daily_limit, 100_000);
    }

    #[test]
    fn wait_hint_is_the_smaller_interval() {
        let hint = default_wait_hint_ms(IntervalOverrides::default());
        assert_eq!(hint, 170);
    }
}
