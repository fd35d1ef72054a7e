//! Cron expression evaluation.
//!
//! Task schedules are standard 5-field cron (minute, hour, day-of-month,
//! month, day-of-week) evaluated in UTC. The `cron` crate expects a 6-field
//! expression with leading seconds, so a `0` seconds field is prepended;
//! 6-field input is accepted as-is.

use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::error::{NexusError, NexusResult};

fn parse(expr: &str) -> NexusResult<cron::Schedule> {
    let full_expr = if expr.split_whitespace().count() == 5 {
        format!("0 {expr}")
    } else {
        expr.to_owned()
    };
    cron::Schedule::from_str(&full_expr)
        .map_err(|e| NexusError::validation(format!("invalid cron expression '{expr}': {e}")))
}

/// The next fire time strictly after `after`.
pub fn next_fire(expr: &str, after: DateTime<Utc>) -> NexusResult<Option<DateTime<Utc>>> {
    Ok(parse(expr)?.after(&after).next())
}

/// Validate an expression by producing its next `n` (at least 3) fire times,
/// for UI preview. Fails `VALIDATION_ERROR` on a malformed expression.
pub fn validate_cron(expr: &str, n: usize) -> NexusResult<Vec<DateTime<Utc>>> {
    let schedule = parse(expr)?;
    Ok(schedule.upcoming(Utc).take(n.max(3)).collect())
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn five_field_expressions_are_accepted() {
        let after = Utc.with_ymd_and_hms(2026, 7, 1, 8, 30, 0).unwrap();
        let next = next_fire("0 9 * * *", after).unwrap().unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 7, 1, 9, 0, 0).unwrap());
    }

    #[test]
    fn six_field_expressions_pass_through() {
        let after = Utc.with_ymd_and_hms(2026, 7, 1, 8, 30, 0).unwrap();
        let next = next_fire("30 0 9 * * *", after).unwrap().unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 7, 1, 9, 0, 30).unwrap());
    }

    #[test]
    fn every_minute_advances_by_a_minute() {
        let after = Utc.with_ymd_and_hms(2026, 7, 1, 8, 30, 10).unwrap();
        let next = next_fire("* * * * *", after).unwrap().unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 7, 1, 8, 31, 0).unwrap());
    }

    #[test]
    fn invalid_expression_is_a_validation_error() {
        let err = validate_cron("not a cron", 3).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::ValidationError);
    }

    #[test]
    fn preview_returns_at_least_three_times() {
        let times = validate_cron("*/5 * * * *", 1).unwrap();
        assert!(times.len() >= 3);
        for pair in times.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }
}
