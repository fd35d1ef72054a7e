//! Cost guard: budgets, token/turn ceilings and request rate limits.

pub mod guard;
pub mod rate;

pub use guard::{
    CostGuard, InMemoryUsageStore, PrecheckReport, UsageRecord, UsageStore, day_start,
    month_start,
};
pub use rate::{RateCounts, RateTracker};
