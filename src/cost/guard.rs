//! Pre-flight budget checks and post-flight usage accounting.
//!
//! `precheck` runs before any provider call and refuses the turn when the
//! token estimate, the session's turn count, the project's daily/monthly
//! spend (at `hard_limit_percent`) or the trailing request rates are over
//! their ceilings. `record_usage` writes a [`UsageRecord`] and is idempotent
//! per `(trace_id, turn_index)` so a provider retry never double-bills.
//!
//! Budget windows are the wall-clock day and calendar month, in UTC.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Datelike, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::ai::registry;
use crate::config::CostConfig;
use crate::error::{NexusError, NexusResult};

use super::rate::RateTracker;

// ─── UsageRecord ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecord {
    pub project_id: String,
    pub session_id: String,
    pub trace_id: String,
    /// Which provider call within the trace this records (0-based).
    pub turn_index: u32,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost_usd: f64,
    pub timestamp: DateTime<Utc>,
}

// ─── UsageStore ───────────────────────────────────────────────────────────────

/// Persistence for usage records and the aggregates precheck reads.
pub trait UsageStore: Send + Sync {
    /// Insert unless a record with the same `(trace_id, turn_index)` exists.
    /// Returns whether a row was written.
    fn insert_if_absent(&self, record: &UsageRecord) -> NexusResult<bool>;

    /// Total spend for a project in `[from, to)`.
    fn spent_usd_between(
        &self,
        project_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> NexusResult<f64>;

    /// Number of distinct traces recorded for a session.
    fn turns_in_session(&self, session_id: &str) -> NexusResult<u32>;
}

/// In-process store for unit tests.
#[derive(Default)]
pub struct InMemoryUsageStore {
    records: Mutex<Vec<UsageRecord>>,
}

impl InMemoryUsageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UsageStore for InMemoryUsageStore {
    fn insert_if_absent(&self, record: &UsageRecord) -> NexusResult<bool> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| NexusError::internal("usage store lock poisoned"))?;
        let exists = records
            .iter()
            .any(|r| r.trace_id == record.trace_id && r.turn_index == record.turn_index);
        if exists {
            return Ok(false);
        }
        records.push(record.clone());
        Ok(true)
    }

    fn spent_usd_between(
        &self,
        project_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> NexusResult<f64> {
        let records = self
            .records
            .lock()
            .map_err(|_| NexusError::internal("usage store lock poisoned"))?;
        Ok(records
            .iter()
            .filter(|r| r.project_id == project_id && r.timestamp >= from && r.timestamp < to)
            .map(|r| r.cost_usd)
            .sum())
    }

    fn turns_in_session(&self, session_id: &str) -> NexusResult<u32> {
        let records = self
            .records
            .lock()
            .map_err(|_| NexusError::internal("usage store lock poisoned"))?;
        let traces: HashSet<&str> = records
            .iter()
            .filter(|r| r.session_id == session_id)
            .map(|r| r.trace_id.as_str())
            .collect();
        Ok(traces.len() as u32)
    }
}

// ─── Windows ──────────────────────────────────────────────────────────────────

/// Start of the current UTC day.
pub fn day_start(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(now.year(), now.month(), now.day(), 0, 0, 0)
        .single()
        .unwrap_or(now)
}

/// Start of the current UTC calendar month.
pub fn month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .single()
        .unwrap_or(now)
}

// ─── CostGuard ────────────────────────────────────────────────────────────────

/// Outcome of a successful precheck.
#[derive(Debug, Clone, Default)]
pub struct PrecheckReport {
    /// Set when spend crossed `alert_threshold_percent` (non-fatal).
    pub warning: Option<String>,
}

pub struct CostGuard {
    usage: Arc<dyn UsageStore>,
    rate: RateTracker,
}

impl CostGuard {
    pub fn new(usage: Arc<dyn UsageStore>) -> Self {
        Self {
            usage,
            rate: RateTracker::new(),
        }
    }

    /// Run every ceiling check, in the order: token estimate, session turns,
    /// hard budget limits, request rates. A passing request is counted
    /// against the rate windows.
    pub fn precheck(
        &self,
        project_id: &str,
        session_id: &str,
        config: &CostConfig,
        estimated_input_tokens: u32,
    ) -> NexusResult<PrecheckReport> {
        if estimated_input_tokens > config.max_tokens_per_turn {
            return Err(NexusError::TokenLimitExceeded {
                message: format!(
                    "estimated {estimated_input_tokens} input tokens exceeds the per-turn \
                     limit of {}",
                    config.max_tokens_per_turn
                ),
            });
        }

        let turns = self.usage.turns_in_session(session_id)?;
        if turns >= config.max_turns_per_session {
            return Err(NexusError::TurnLimitExceeded {
                message: format!(
                    "session has used {turns} of {} turns",
                    config.max_turns_per_session
                ),
            });
        }

        let now = Utc::now();
        let hard = config.hard_limit_percent / 100.0;
        let alert = config.alert_threshold_percent / 100.0;

        let daily_spent = self.usage.spent_usd_between(project_id, day_start(now), now)?;
        if daily_spent >= config.daily_budget_usd * hard {
            return Err(NexusError::BudgetExceeded {
                message: format!(
                    "daily spend ${daily_spent:.4} has reached the budget of ${:.4}",
                    config.daily_budget_usd
                ),
            });
        }

        let monthly_spent = self
            .usage
            .spent_usd_between(project_id, month_start(now), now)?;
        if monthly_spent >= config.monthly_budget_usd * hard {
            return Err(NexusError::BudgetExceeded {
                message: format!(
                    "monthly spend ${monthly_spent:.4} has reached the budget of ${:.4}",
                    config.monthly_budget_usd
                ),
            });
        }

        let counts = self.rate.counts(project_id);
        if counts.last_minute >= config.max_requests_per_minute {
            return Err(NexusError::RateLimitExceeded {
                message: format!(
                    "{} requests in the last minute (limit {})",
                    counts.last_minute, config.max_requests_per_minute
                ),
            });
        }
        if counts.last_hour >= config.max_requests_per_hour {
            return Err(NexusError::RateLimitExceeded {
                message: format!(
                    "{} requests in the last hour (limit {})",
                    counts.last_hour, config.max_requests_per_hour
                ),
            });
        }

        self.rate.record(project_id);

        let mut report = PrecheckReport::default();
        if daily_spent >= config.daily_budget_usd * alert
            || monthly_spent >= config.monthly_budget_usd * alert
        {
            let message = format!(
                "project {project_id} spend is over {}% of budget \
                 (daily ${daily_spent:.4}, monthly ${monthly_spent:.4})",
                config.alert_threshold_percent
            );
            warn!("{message}");
            report.warning = Some(message);
        }
        Ok(report)
    }

    /// Record one provider call's usage. Cost is derived from the model's
    /// registry pricing. Returns `false` when an identical
    /// `(trace_id, turn_index)` record already existed.
    pub fn record_usage(
        &self,
        project_id: &str,
        session_id: &str,
        trace_id: &str,
        turn_index: u32,
        input_tokens: u32,
        output_tokens: u32,
        model: &str,
    ) -> NexusResult<bool> {
        let record = UsageRecord {
            project_id: project_id.to_owned(),
            session_id: session_id.to_owned(),
            trace_id: trace_id.to_owned(),
            turn_index,
            input_tokens,
            output_tokens,
            cost_usd: registry::cost_of(model, input_tokens, output_tokens),
            timestamp: Utc::now(),
        };
        self.usage.insert_if_absent(&record)
    }

    /// Spend so far today, for status surfaces.
    pub fn spent_today(&self, project_id: &str) -> NexusResult<f64> {
        let now = Utc::now();
        self.usage.spent_usd_between(project_id, day_start(now), now)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    fn guard() -> CostGuard {
        CostGuard::new(Arc::new(InMemoryUsageStore::new()))
    }

    fn config() -> CostConfig {
        CostConfig::default()
    }

    #[test]
    fn clean_project_passes() {
        let report = guard().precheck("p1", "s1", &config(), 100).unwrap();
        assert!(report.warning.is_none());
    }

    #[test]
    fn token_estimate_over_limit_fails() {
        let mut config = config();
        config.max_tokens_per_turn = 50;
        let err = guard().precheck("p1", "s1", &config, 51).unwrap_err();
        assert_eq!(err.code(), ErrorCode::TokenLimitExceeded);
    }

    #[test]
    fn session_turn_ceiling_fails() {
        let guard = guard();
        let mut config = config();
        config.max_turns_per_session = 2;
        guard
            .record_usage("p1", "s1", "t1", 0, 10, 5, "gpt-4o")
            .unwrap();
        guard
            .record_usage("p1", "s1", "t2", 0, 10, 5, "gpt-4o")
            .unwrap();

        let err = guard.precheck("p1", "s1", &config, 10).unwrap_err();
        assert_eq!(err.code(), ErrorCode::TurnLimitExceeded);
    }

    #[test]
    fn daily_budget_hard_limit_fails() {
        let guard = guard();
        let mut config = config();
        config.daily_budget_usd = 0.01;
        // 1M input tokens on default pricing = $10, far past 1 cent.
        guard
            .record_usage("p1", "s1", "t1", 0, 1_000_000, 0, "unknown-model")
            .unwrap();

        let err = guard.precheck("p1", "s2", &config, 10).unwrap_err();
        assert_eq!(err.code(), ErrorCode::BudgetExceeded);
    }

    #[test]
    fn alert_threshold_warns_without_failing() {
        let guard = guard();
        let mut config = config();
        config.daily_budget_usd = 10.0;
        config.alert_threshold_percent = 50.0;
        // $9 of spend: over 50%, under 100%.
        guard
            .record_usage("p1", "s1", "t1", 0, 600_000, 100_000, "unknown-model")
            .unwrap();

        let report = guard.precheck("p1", "s2", &config, 10).unwrap();
        assert!(report.warning.is_some());
    }

    #[test]
    fn rate_limit_minute_fails() {
        let guard = guard();
        let mut config = config();
        config.max_requests_per_minute = 2;
        guard.precheck("p1", "s1", &config, 1).unwrap();
        guard.precheck("p1", "s1", &config, 1).unwrap();
        let err = guard.precheck("p1", "s1", &config, 1).unwrap_err();
        assert_eq!(err.code(), ErrorCode::RateLimitExceeded);
    }

    #[test]
    fn record_usage_is_idempotent_per_turn() {
        let guard = guard();
        assert!(guard.record_usage("p1", "s1", "t1", 0, 10, 5, "gpt-4o").unwrap());
        assert!(!guard.record_usage("p1", "s1", "t1", 0, 10, 5, "gpt-4o").unwrap());
        assert!(guard.record_usage("p1", "s1", "t1", 1, 20, 5, "gpt-4o").unwrap());

        // Only the two distinct turns were billed.
        let spent = guard.spent_today("p1").unwrap();
        let expected = registry::cost_of("gpt-4o", 10, 5) + registry::cost_of("gpt-4o", 20, 5);
        assert!((spent - expected).abs() < 1e-12);
    }

    #[test]
    fn windows_start_at_utc_boundaries() {
        let now = Utc.with_ymd_and_hms(2026, 7, 15, 13, 45, 0).unwrap();
        assert_eq!(
            day_start(now),
            Utc.with_ymd_and_hms(2026, 7, 15, 0, 0, 0).unwrap()
        );
        assert_eq!(
            month_start(now),
            Utc.with_ymd_and_hms(2026, 7, 1, 0, 0, 0).unwrap()
        );
    }
}
