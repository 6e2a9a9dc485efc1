//! Per-operation rate limiting, cost tracking and throttle backoff.
//!
//! Deliberately a separate accountant from [`crate::progression::XpRateLimiter`]:
//! this one governs outbound provider/tool calls and spend, with its own
//! reset cadences, not player-facing XP.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::persistence::{load_json_or_default, save_json_atomic};

const DAY_SECS: i64 = 86_400;
const MONTH_SECS: i64 = 2_592_000;

/// Kinds of rate-limited operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    LlmCall,
    McpToolCall,
    TokensUsed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub per_minute: Option<u32>,
    pub per_hour: Option<u32>,
    pub per_day: Option<u32>,
}

fn default_limits() -> HashMap<OperationType, RateLimitConfig> {
    let mut m = HashMap::new();
    m.insert(
        OperationType::LlmCall,
        RateLimitConfig { per_minute: Some(10), per_hour: Some(200), per_day: Some(1000) },
    );
    m.insert(
        OperationType::McpToolCall,
        RateLimitConfig { per_minute: Some(20), per_hour: Some(500), per_day: Some(2000) },
    );
    m.insert(
        OperationType::TokensUsed,
        RateLimitConfig { per_minute: None, per_hour: None, per_day: Some(500_000) },
    );
    m
}

/// A sliding-ish usage counter that lazily resets itself on next access once
/// its window has elapsed, rather than on a timer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct UsageRecord {
    minute_count: u32,
    minute_reset_ts: i64,
    hour_count: u32,
    hour_reset_ts: i64,
    day_count: u32,
    day_reset_ts: i64,
}

impl UsageRecord {
    fn reset_if_expired(&mut self, now: i64) {
        if now - self.minute_reset_ts >= 60 {
            self.minute_count = 0;
            self.minute_reset_ts = now;
        }
        if now - self.hour_reset_ts >= 3600 {
            self.hour_count = 0;
            self.hour_reset_ts = now;
        }
        if now - self.day_reset_ts >= DAY_SECS {
            self.day_count = 0;
            self.day_reset_ts = now;
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CostTracker {
    daily_cost: f64,
    monthly_cost: f64,
    total_cost: f64,
    daily_reset_ts: i64,
    monthly_reset_ts: i64,
}

impl CostTracker {
    fn maybe_reset(&mut self, now: i64) {
        if now - self.daily_reset_ts >= DAY_SECS {
            self.daily_cost = 0.0;
            self.daily_reset_ts = now;
        }
        if now - self.monthly_reset_ts >= MONTH_SECS {
            self.monthly_cost = 0.0;
            self.monthly_reset_ts = now;
        }
    }

    fn add_cost(&mut self, now: i64, amount: f64) {
        self.maybe_reset(now);
        self.daily_cost += amount;
        self.monthly_cost += amount;
        self.total_cost += amount;
    }
}

/// Usage snapshot returned to callers checking headroom before an operation.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct UsageSnapshot {
    pub minute_count: u32,
    pub hour_count: u32,
    pub day_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimiter {
    limits: HashMap<OperationType, RateLimitConfig>,
    usage: HashMap<OperationType, UsageRecord>,
    costs: CostTracker,
    #[serde(skip)]
    state_path: Option<PathBuf>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self {
            limits: default_limits(),
            usage: HashMap::new(),
            costs: CostTracker::default(),
            state_path: None,
        }
    }
}

impl RateLimiter {
    pub fn load(path: &Path) -> Self {
        let mut limiter: RateLimiter = load_json_or_default(path);
        if limiter.limits.is_empty() {
            limiter.limits = default_limits();
        }
        limiter.state_path = Some(path.to_path_buf());
        limiter
    }

    pub fn save(&self) {
        if let Some(path) = &self.state_path {
            save_json_atomic(path, self);
        }
    }

    fn usage_mut(&mut self, op: OperationType, now: i64) -> &mut UsageRecord {
        let record = self.usage.entry(op).or_default();
        record.reset_if_expired(now);
        record
    }

    /// Checks whether `n` more occurrences of `op` fit under every configured
    /// window. Returns `(allowed, remaining, reset_in_seconds)`, where
    /// `remaining`/`reset_in_seconds` describe the most binding window (the
    /// one with the fewest units left), so a caller can back off intelligently
    /// instead of just retrying blind.
    pub fn check(&mut self, op: OperationType, n: u32) -> (bool, u32, i64) {
        let now = chrono::Utc::now().timestamp();
        let limits = self.limits.get(&op).copied().unwrap_or(RateLimitConfig { per_minute: None, per_hour: None, per_day: None });
        let usage = self.usage_mut(op, now);

        let mut allowed = true;
        let mut remaining = u32::MAX;
        let mut reset_in: i64 = 0;

        if let Some(limit) = limits.per_minute {
            if usage.minute_count + n > limit {
                allowed = false;
            }
            let left = limit.saturating_sub(usage.minute_count);
            if left < remaining {
                remaining = left;
                reset_in = (usage.minute_reset_ts + 60 - now).max(0);
            }
        }
        if let Some(limit) = limits.per_hour {
            if usage.hour_count + n > limit {
                allowed = false;
            }
            let left = limit.saturating_sub(usage.hour_count);
            if left < remaining {
                remaining = left;
                reset_in = (usage.hour_reset_ts + 3600 - now).max(0);
            }
        }
        if let Some(limit) = limits.per_day {
            if usage.day_count + n > limit {
                allowed = false;
            }
            let left = limit.saturating_sub(usage.day_count);
            if left < remaining {
                remaining = left;
                reset_in = (usage.day_reset_ts + DAY_SECS - now).max(0);
            }
        }

        if remaining == u32::MAX {
            remaining = u32::MAX - n;
            reset_in = 0;
        }

        (allowed, remaining, reset_in)
    }

    /// Records one occurrence of `op`, and optional dollar cost.
    pub fn record(&mut self, op: OperationType, cost: Option<f64>) {
        let now = chrono::Utc::now().timestamp();
        let usage = self.usage_mut(op, now);
        usage.minute_count += 1;
        usage.hour_count += 1;
        usage.day_count += 1;

        if let Some(cost) = cost {
            self.costs.add_cost(now, cost);
        }

        self.save();
    }

    pub fn get_usage(&self, op: OperationType) -> UsageSnapshot {
        let record = self.usage.get(&op).cloned().unwrap_or_default();
        UsageSnapshot { minute_count: record.minute_count, hour_count: record.hour_count, day_count: record.day_count }
    }

    pub fn get_all_usage(&self) -> HashMap<OperationType, UsageSnapshot> {
        [OperationType::LlmCall, OperationType::McpToolCall, OperationType::TokensUsed]
            .into_iter()
            .map(|op| (op, self.get_usage(op)))
            .collect()
    }

    pub fn get_costs(&self) -> (f64, f64, f64) {
        (self.costs.daily_cost, self.costs.monthly_cost, self.costs.total_cost)
    }

    pub fn set_limit(&mut self, op: OperationType, config: RateLimitConfig) {
        self.limits.insert(op, config);
        self.save();
    }

    pub fn reset(&mut self, op: OperationType) {
        self.usage.remove(&op);
        self.save();
    }

    /// Fraction `[0, 1]` of the tightest configured window currently consumed
    /// for `op`, used by [`ThrottleController`] to pick a delay.
    pub fn utilization(&mut self, op: OperationType) -> f64 {
        let now = chrono::Utc::now().timestamp();
        let limits = self.limits.get(&op).copied().unwrap_or(RateLimitConfig { per_minute: None, per_hour: None, per_day: None });
        let usage = self.usage_mut(op, now);

        let mut worst: f64 = 0.0;
        if let Some(limit) = limits.per_minute {
            if limit > 0 {
                worst = worst.max(usage.minute_count as f64 / limit as f64);
            }
        }
        if let Some(limit) = limits.per_hour {
            if limit > 0 {
                worst = worst.max(usage.hour_count as f64 / limit as f64);
            }
        }
        if let Some(limit) = limits.per_day {
            if limit > 0 {
                worst = worst.max(usage.day_count as f64 / limit as f64);
            }
        }
        worst.min(1.0)
    }
}

/// Converts utilization into a caller-facing backoff policy.
pub struct ThrottleController;

impl ThrottleController {
    /// Delay in seconds for a given utilization, per the threshold table:
    /// `<0.5 -> 0`, `0.5-0.8 -> 0.5`, `0.8-0.95 -> 2`, `>=0.95 -> reset_in_seconds`
    /// (falling back to 60 if `reset_in_seconds` isn't usable, e.g. `<= 0`).
    pub fn get_delay(utilization: f64, reset_in_seconds: i64) -> f64 {
        if utilization >= 0.95 {
            if reset_in_seconds > 0 { reset_in_seconds as f64 } else { 60.0 }
        } else if utilization >= 0.8 {
            2.0
        } else if utilization >= 0.5 {
            0.5
        } else {
            0.0
        }
    }

    /// Sleeps for the computed delay, returning `false` at `>= 0.95`
    /// utilization (caller should give up rather than wait out a full
    /// window reset).
    pub async fn wait_if_needed(utilization: f64, reset_in_seconds: i64) -> bool {
        if utilization >= 0.95 {
            return false;
        }
        let delay = Self::get_delay(utilization, reset_in_seconds);
        if delay > 0.0 {
            tokio::time::sleep(std::time::Duration::from_secs_f64(delay)).await;
        }
        true
    }

    pub fn should_warn(utilization: f64) -> Option<&'static str> {
        if utilization >= 1.0 {
            Some("rate limit exhausted")
        } else if utilization >= 0.9 {
            Some("rate limit nearly exhausted")
        } else if utilization >= 0.75 {
            Some("rate limit usage elevated")
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_respects_configured_limits() {
        let mut limiter = RateLimiter::default();
        limiter.set_limit(OperationType::LlmCall, RateLimitConfig { per_minute: Some(2), per_hour: None, per_day: None });

        let (allowed, remaining, _) = limiter.check(OperationType::LlmCall, 1);
        assert!(allowed);
        assert_eq!(remaining, 2);
        limiter.record(OperationType::LlmCall, None);

        let (allowed, remaining, _) = limiter.check(OperationType::LlmCall, 1);
        assert!(allowed);
        assert_eq!(remaining, 1);
        limiter.record(OperationType::LlmCall, None);

        let (allowed, remaining, reset_in) = limiter.check(OperationType::LlmCall, 1);
        assert!(!allowed);
        assert_eq!(remaining, 0);
        assert!(reset_in <= 60);
    }

    #[test]
    fn check_reports_the_most_binding_window() {
        let mut limiter = RateLimiter::default();
        limiter.set_limit(OperationType::LlmCall, RateLimitConfig { per_minute: Some(100), per_hour: Some(3), per_day: Some(1000) });
        limiter.record(OperationType::LlmCall, None);
        limiter.record(OperationType::LlmCall, None);

        let (allowed, remaining, _) = limiter.check(OperationType::LlmCall, 1);
        assert!(allowed);
        assert_eq!(remaining, 1); // the per-hour window is the tightest, not per-minute or per-day
    }

    #[test]
    fn cost_tracking_accumulates() {
        let mut limiter = RateLimiter::default();
        limiter.record(OperationType::LlmCall, Some(0.02));
        limiter.record(OperationType::LlmCall, Some(0.03));
        let (daily, monthly, total) = limiter.get_costs();
        assert!((daily - 0.05).abs() < 1e-9);
        assert!((monthly - 0.05).abs() < 1e-9);
        assert!((total - 0.05).abs() < 1e-9);
    }

    #[test]
    fn throttle_delay_thresholds() {
        assert_eq!(ThrottleController::get_delay(0.1, 0), 0.0);
        assert_eq!(ThrottleController::get_delay(0.6, 0), 0.5);
        assert_eq!(ThrottleController::get_delay(0.85, 0), 2.0);
        assert_eq!(ThrottleController::get_delay(0.97, 45), 45.0);
        assert_eq!(ThrottleController::get_delay(0.97, 0), 60.0);
    }

    #[test]
    fn persists_and_reloads_via_atomic_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rate_limits.json");

        let mut limiter = RateLimiter::load(&path);
        limiter.record(OperationType::McpToolCall, None);

        let reloaded = RateLimiter::load(&path);
        assert_eq!(reloaded.get_usage(OperationType::McpToolCall).minute_count, 1);
    }
}
