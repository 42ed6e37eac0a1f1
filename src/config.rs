use std::str::FromStr;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::limits::*;

/// Business rules and operational bounds for the booking engine.
///
/// Every field has a default; `from_env` overrides any of them from
/// `PITCHBOOK_*` variables and silently keeps the default for values that do
/// not parse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BookingPolicy {
    /// Minimum lead time before a new booking's start.
    pub min_notice_minutes: i64,
    /// Minimum lead time before a rescheduled booking's new start. Never longer than `min_notice_minutes`.
    pub reschedule_min_notice_minutes: i64,
    /// Last bookable date, counted from today.
    pub max_horizon_days: i64,
    pub max_duration_hours: u32,
    /// How long an online payment may stay pending before it is cancelled.
    pub payment_timeout_secs: u64,
    /// Bound on every store, catalog, and gateway call.
    pub call_timeout_ms: u64,
    /// Holder cancellations at least this far ahead get a full refund.
    pub full_refund_notice_hours: i64,
    /// Holder cancellations at least this far ahead get `partial_refund_percent`.
    pub partial_refund_notice_hours: i64,
    pub partial_refund_percent: u8,
    /// WAL appends between compactions.
    pub compact_threshold: u64,
}

impl Default for BookingPolicy {
    fn default() -> Self {
        Self {
            min_notice_minutes: 24 * 60,
            reschedule_min_notice_minutes: 24 * 60,
            max_horizon_days: 30,
            max_duration_hours: 3,
            payment_timeout_secs: 15 * 60,
            call_timeout_ms: 5_000,
            full_refund_notice_hours: 24,
            partial_refund_notice_hours: 12,
            partial_refund_percent: 50,
            compact_threshold: 1_000,
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl BookingPolicy {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            min_notice_minutes: env_or("PITCHBOOK_MIN_NOTICE_MINUTES", d.min_notice_minutes),
            reschedule_min_notice_minutes: env_or(
                "PITCHBOOK_RESCHEDULE_MIN_NOTICE_MINUTES",
                d.reschedule_min_notice_minutes,
            ),
            max_horizon_days: env_or("PITCHBOOK_MAX_HORIZON_DAYS", d.max_horizon_days),
            max_duration_hours: env_or("PITCHBOOK_MAX_DURATION_HOURS", d.max_duration_hours),
            payment_timeout_secs: env_or("PITCHBOOK_PAYMENT_TIMEOUT_SECS", d.payment_timeout_secs),
            call_timeout_ms: env_or("PITCHBOOK_CALL_TIMEOUT_MS", d.call_timeout_ms),
            full_refund_notice_hours: env_or("PITCHBOOK_FULL_REFUND_NOTICE_HOURS", d.full_refund_notice_hours),
            partial_refund_notice_hours: env_or(
                "PITCHBOOK_PARTIAL_REFUND_NOTICE_HOURS",
                d.partial_refund_notice_hours,
            ),
            partial_refund_percent: env_or("PITCHBOOK_PARTIAL_REFUND_PERCENT", d.partial_refund_percent),
            compact_threshold: env_or("PITCHBOOK_COMPACT_THRESHOLD", d.compact_threshold),
        }
    }

    fn window(minutes: i64) -> Duration {
        Duration::minutes(minutes.clamp(0, MAX_POLICY_WINDOW_MINUTES))
    }

    pub fn min_notice(&self) -> Duration {
        Self::window(self.min_notice_minutes)
    }

    pub fn reschedule_min_notice(&self) -> Duration {
        Self::window(self.reschedule_min_notice_minutes.min(self.min_notice_minutes))
    }

    pub fn max_horizon(&self) -> Duration {
        Self::window(self.max_horizon_days.saturating_mul(24 * 60))
    }

    pub fn max_duration_hours(&self) -> u32 {
        self.max_duration_hours.clamp(1, MAX_DURATION_HOURS)
    }

    pub fn payment_timeout(&self) -> Duration {
        let secs = i64::try_from(self.payment_timeout_secs).unwrap_or(i64::MAX);
        Duration::seconds(secs.min(MAX_POLICY_WINDOW_MINUTES * 60))
    }

    pub fn call_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.call_timeout_ms)
    }

    pub fn full_refund_notice(&self) -> Duration {
        Self::window(self.full_refund_notice_hours.saturating_mul(60))
    }

    pub fn partial_refund_notice(&self) -> Duration {
        Self::window(self.partial_refund_notice_hours.saturating_mul(60))
    }

    pub fn partial_refund_percent(&self) -> u64 {
        u64::from(self.partial_refund_percent.min(100))
    }
}
