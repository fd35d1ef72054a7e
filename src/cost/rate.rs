//! Rolling-window request rate tracking, per project.
//!
//! One deque of instants per project, trimmed to the trailing hour; the
//! trailing-minute count is derived from the same deque.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(3600);

/// Counts inside the two trailing windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateCounts {
    pub last_minute: u32,
    pub last_hour: u32,
}

#[derive(Default)]
pub struct RateTracker {
    requests: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current counts for a project, after dropping expired entries.
    pub fn counts(&self, project_id: &str) -> RateCounts {
        let now = Instant::now();
        let mut map = match self.requests.lock() {
            Ok(map) => map,
            Err(_) => return RateCounts { last_minute: 0, last_hour: 0 },
        };
        let Some(entries) = map.get_mut(project_id) else {
            return RateCounts { last_minute: 0, last_hour: 0 };
        };
        while entries
            .front()
            .is_some_and(|t| now.duration_since(*t) >= HOUR)
        {
            entries.pop_front();
        }
        let last_hour = entries.len() as u32;
        let last_minute = entries
            .iter()
            .rev()
            .take_while(|t| now.duration_since(**t) < MINUTE)
            .count() as u32;
        RateCounts { last_minute, last_hour }
    }

    /// Record one admitted request.
    pub fn record(&self, project_id: &str) {
        if let Ok(mut map) = self.requests.lock() {
            map.entry(project_id.to_owned())
                .or_default()
                .push_back(Instant::now());
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_start_at_zero() {
        let tracker = RateTracker::new();
        let counts = tracker.counts("p1");
        assert_eq!(counts.last_minute, 0);
        assert_eq!(counts.last_hour, 0);
    }

    #[test]
    fn recorded_requests_are_counted_in_both_windows() {
        let tracker = RateTracker::new();
        for _ in 0..3 {
            tracker.record("p1");
        }
        let counts = tracker.counts("p1");
        assert_eq!(counts.last_minute, 3);
        assert_eq!(counts.last_hour, 3);
    }

    #[test]
    fn projects_do_not_share_counters() {
        let tracker = RateTracker::new();
        tracker.record("p1");
        assert_eq!(tracker.counts("p2").last_hour, 0);
    }
}
