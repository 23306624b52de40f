//! Tier registry (§4.10, §5): per-tier quota limits, inter-task delay, and
//! concurrent-job caps. Authenticated tiers are plain constants; guest
//! limits are the tightest tier plus the one-job-per-day cap.

use transcript_store::Metric;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TierName {
    Free,
    Basic,
    Pro,
    Enterprise,
}

impl TierName {
    pub fn as_str(self) -> &'static str {
        match self {
            TierName::Free => "free",
            TierName::Basic => "basic",
            TierName::Pro => "pro",
            TierName::Enterprise => "enterprise",
        }
    }

    pub fn from_str_or_free(s: &str) -> Self {
        match s {
            "basic" => TierName::Basic,
            "pro" => TierName::Pro,
            "enterprise" => TierName::Enterprise,
            _ => TierName::Free,
        }
    }
}

/// A resolved tier's limits and pacing rules (§5, §4.10). Bulk-videos-total
/// is per job; the other metrics are per calendar day.
#[derive(Debug, Clone, Copy)]
pub struct Tier {
    pub name: TierName,
    pub rate_limit_delay_secs: f64,
    pub max_concurrent_jobs: i64,
    pub bulk_videos_total_limit: i64,
    pub captions_method_daily_limit: i64,
    pub ai_method_daily_limit: i64,
}

/// Only the free tier's `bulk_videos_total_limit = 5` is pinned directly by
/// the worked example (§8.3); the remaining per-tier numbers are plain
/// constants scaled from that anchor, as an Open Question decision
/// (recorded in DESIGN.md) rather than an invented default buried in code.
const TIERS: [Tier; 4] = [
    Tier {
        name: TierName::Free,
        rate_limit_delay_secs: 5.0,
        max_concurrent_jobs: 1,
        bulk_videos_total_limit: 5,
        captions_method_daily_limit: 20,
        ai_method_daily_limit: 10,
    },
    Tier {
        name: TierName::Basic,
        rate_limit_delay_secs: 4.0,
        max_concurrent_jobs: 2,
        bulk_videos_total_limit: 25,
        captions_method_daily_limit: 100,
        ai_method_daily_limit: 50,
    },
    Tier {
        name: TierName::Pro,
        rate_limit_delay_secs: 3.0,
        max_concurrent_jobs: 3,
        bulk_videos_total_limit: 100,
        captions_method_daily_limit: 500,
        ai_method_daily_limit: 250,
    },
    Tier {
        name: TierName::Enterprise,
        rate_limit_delay_secs: 3.0,
        max_concurrent_jobs: 5,
        bulk_videos_total_limit: 500,
        captions_method_daily_limit: 5000,
        ai_method_daily_limit: 2500,
    },
];

/// Guest limits (§4.10): per-type counters plus a one-job-per-day cap,
/// matching the free tier's shape but tighter since a guest has no billing
/// relationship backing it.
pub const GUEST_CAPTIONS_METHOD_DAILY_LIMIT: i64 = 5;
pub const GUEST_AI_METHOD_DAILY_LIMIT: i64 = 2;
pub const GUEST_BULK_VIDEOS_TOTAL_LIMIT: i64 = 3;
pub const GUEST_JOBS_PER_DAY_LIMIT: i64 = 1;

pub fn resolve(tier: TierName) -> Tier {
    TIERS.into_iter().find(|t| t.name == tier).expect("TIERS covers every TierName variant")
}

impl Tier {
    pub fn limit_for(&self, metric: Metric) -> i64 {
        match metric {
            Metric::CaptionsMethodCount => self.captions_method_daily_limit,
            Metric::AiMethodCount => self.ai_method_daily_limit,
            Metric::BulkVideosTotal => self.bulk_videos_total_limit,
            Metric::JobsPerDay => i64::MAX,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_tier_bulk_limit_matches_worked_example() {
        assert_eq!(resolve(TierName::Free).bulk_videos_total_limit, 5);
    }

    #[test]
    fn inter_task_delays_match_tier_table() {
        assert_eq!(resolve(TierName::Free).rate_limit_delay_secs, 5.0);
        assert_eq!(resolve(TierName::Basic).rate_limit_delay_secs, 4.0);
        assert_eq!(resolve(TierName::Pro).rate_limit_delay_secs, 3.0);
        assert_eq!(resolve(TierName::Enterprise).rate_limit_delay_secs, 3.0);
    }

    #[test]
    fn concurrency_caps_match_tier_table() {
        assert_eq!(resolve(TierName::Free).max_concurrent_jobs, 1);
        assert_eq!(resolve(TierName::Basic).max_concurrent_jobs, 2);
        assert_eq!(resolve(TierName::Pro).max_concurrent_jobs, 3);
        assert_eq!(resolve(TierName::Enterprise).max_concurrent_jobs, 5);
    }

    #[test]
    fn unknown_tier_string_falls_back_to_free() {
        assert_eq!(TierName::from_str_or_free("nonexistent"), TierName::Free);
    }
}
