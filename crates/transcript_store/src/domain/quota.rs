use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// The countable thing a quota applies to, per §4.10.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Metric {
    CaptionsMethodCount,
    AiMethodCount,
    BulkVideosTotal,
    JobsPerDay,
}

impl Metric {
    pub fn as_str(self) -> &'static str {
        match self {
            Metric::CaptionsMethodCount => "captions_method_count",
            Metric::AiMethodCount => "ai_method_count",
            Metric::BulkVideosTotal => "bulk_videos_total",
            Metric::JobsPerDay => "jobs_per_day",
        }
    }
}

/// The reset granularity of a quota counter's bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Period {
    Day,
    Month,
}

impl Period {
    pub fn as_str(self) -> &'static str {
        match self {
            Period::Day => "day",
            Period::Month => "month",
        }
    }
}

/// A row of `quota_counters`: authenticated-tier usage, keyed by
/// `(principal, period_bucket, metric)`.
#[derive(Debug, Clone, FromRow)]
pub struct QuotaCounterRow {
    pub principal: String,
    pub period_bucket: String,
    pub metric: String,
    pub used: i64,
}

/// A row of `guest_usage`: guest-session usage, keyed by
/// `(session_id, usage_type, day_bucket)`.
#[derive(Debug, Clone, FromRow)]
pub struct GuestUsageRow {
    pub session_id: String,
    pub usage_type: String,
    pub day_bucket: NaiveDate,
    pub used: i64,
}

/// The outcome of a quota check, returned to the caller so it can build the
/// "requires-upgrade" payload described in §7.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaDecision {
    pub allowed: bool,
    pub used: i64,
    pub limit: i64,
    pub remaining: i64,
}

impl QuotaDecision {
    pub fn new(used: i64, limit: i64) -> Self {
        let remaining = (limit - used).max(0);
        QuotaDecision {
            allowed: used < limit,
            used,
            limit,
            remaining,
        }
    }
}
