use chrono::Utc;
use sqlx::PgPool;

use crate::domain::{Metric, Period, QuotaDecision};

use super::StoreError;

/// Atomic counter operations keyed by `(principal, period, metric)`, per
/// §4.10. `check_and_increment` is a single `INSERT ... ON CONFLICT ...
/// RETURNING` round trip so concurrent callers never race past a limit
/// (P9): the database serialises the upsert, so exactly `min(k, limit -
/// used)` of `k` concurrent callers observe `allowed = true`.
#[derive(Debug, Clone)]
pub struct QuotaLedger {
    pool: PgPool,
}

impl QuotaLedger {
    pub fn new(pool: PgPool) -> Self {
        QuotaLedger { pool }
    }

    pub async fn check(
        &self,
        principal: &str,
        period: Period,
        metric: Metric,
        limit: i64,
    ) -> Result<QuotaDecision, StoreError> {
        let bucket = period_bucket(period);
        let (used,): (i64,) = sqlx::query_as(
            "SELECT COALESCE(used, 0) FROM quota_counters \
             WHERE principal = $1 AND period_bucket = $2 AND metric = $3",
        )
        .bind(principal)
        .bind(&bucket)
        .bind(metric.as_str())
        .fetch_optional(&self.pool)
        .await?
        .unwrap_or((0,));

        Ok(QuotaDecision::new(used, limit))
    }

    pub async fn increment(
        &self,
        principal: &str,
        period: Period,
        metric: Metric,
        n: i64,
    ) -> Result<i64, StoreError> {
        let bucket = period_bucket(period);
        let (used,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO quota_counters (principal, period_bucket, metric, used)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (principal, period_bucket, metric)
            DO UPDATE SET used = quota_counters.used + $4
            RETURNING used
            "#,
        )
        .bind(principal)
        .bind(&bucket)
        .bind(metric.as_str())
        .bind(n)
        .fetch_one(&self.pool)
        .await?;
        Ok(used)
    }

    /// Compound check-then-increment, atomic with respect to concurrent
    /// callers: the `UPDATE ... RETURNING` only applies when the resulting
    /// value would not exceed `limit`, so a denied caller leaves the
    /// counter untouched.
    #[tracing::instrument(skip(self))]
    pub async fn check_and_increment(
        &self,
        principal: &str,
        period: Period,
        metric: Metric,
        n: i64,
        limit: i64,
    ) -> Result<QuotaDecision, StoreError> {
        let bucket = period_bucket(period);

        sqlx::query(
            "INSERT INTO quota_counters (principal, period_bucket, metric, used) \
             VALUES ($1, $2, $3, 0) ON CONFLICT DO NOTHING",
        )
        .bind(principal)
        .bind(&bucket)
        .bind(metric.as_str())
        .execute(&self.pool)
        .await?;

        let row: Option<(i64,)> = sqlx::query_as(
            "UPDATE quota_counters SET used = used + $4 \
             WHERE principal = $1 AND period_bucket = $2 AND metric = $3 AND used + $4 <= $5 \
             RETURNING used",
        )
        .bind(principal)
        .bind(&bucket)
        .bind(metric.as_str())
        .bind(n)
        .bind(limit)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((used,)) => Ok(QuotaDecision::new(used, limit)),
            None => {
                let (used,): (i64,) = sqlx::query_as(
                    "SELECT used FROM quota_counters \
                     WHERE principal = $1 AND period_bucket = $2 AND metric = $3",
                )
                .bind(principal)
                .bind(&bucket)
                .bind(metric.as_str())
                .fetch_one(&self.pool)
                .await?;
                Ok(QuotaDecision::new(used, limit))
            }
        }
    }

    pub async fn check_guest_usage(
        &self,
        session_id: &str,
        usage_type: &str,
        limit: i64,
    ) -> Result<QuotaDecision, StoreError> {
        let today = Utc::now().date_naive();
        let (used,): (i64,) = sqlx::query_as(
            "SELECT COALESCE(used, 0) FROM guest_usage \
             WHERE session_id = $1 AND usage_type = $2 AND day_bucket = $3",
        )
        .bind(session_id)
        .bind(usage_type)
        .bind(today)
        .fetch_optional(&self.pool)
        .await?
        .unwrap_or((0,));
        Ok(QuotaDecision::new(used, limit))
    }

    pub async fn increment_guest_usage(
        &self,
        session_id: &str,
        usage_type: &str,
        n: i64,
    ) -> Result<i64, StoreError> {
        let today = Utc::now().date_naive();
        let (used,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO guest_usage (session_id, usage_type, day_bucket, used)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (session_id, usage_type, day_bucket)
            DO UPDATE SET used = guest_usage.used + $4
            RETURNING used
            "#,
        )
        .bind(session_id)
        .bind(usage_type)
        .bind(today)
        .bind(n)
        .fetch_one(&self.pool)
        .await?;
        Ok(used)
    }

    /// Deletes guest-usage rows older than `older_than_days`, for the
    /// guest-session GC maintenance cron (§10.6).
    pub async fn gc_guest_usage(&self, older_than_days: i64) -> Result<u64, StoreError> {
        let cutoff = Utc::now().date_naive() - chrono::Duration::days(older_than_days);
        let result = sqlx::query("DELETE FROM guest_usage WHERE day_bucket < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

fn period_bucket(period: Period) -> String {
    let now = Utc::now();
    match period {
        Period::Day => now.format("%Y-%m-%d").to_string(),
        Period::Month => now.format("%Y-%m").to_string(),
    }
}

#[cfg(test)]
mod tests {
    use sqlx::PgPool;

    use super::*;

    #[sqlx::test]
    async fn check_and_increment_denies_past_limit(pool: PgPool) {
        let ledger = QuotaLedger::new(pool);
        let principal = "user:test";

        for _ in 0..5 {
            let decision = ledger
                .check_and_increment(principal, Period::Day, Metric::BulkVideosTotal, 1, 5)
                .await
                .unwrap();
            assert!(decision.allowed);
        }

        let decision = ledger
            .check_and_increment(principal, Period::Day, Metric::BulkVideosTotal, 1, 5)
            .await
            .unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.used, 5);
        assert_eq!(decision.remaining, 0);
    }

    #[sqlx::test]
    async fn check_and_increment_is_atomic_under_concurrency(pool: PgPool) {
        let ledger = QuotaLedger::new(pool);
        let principal = "user:concurrent";
        let limit = 5i64;

        let mut handles = Vec::new();
        for _ in 0..20 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger
                    .check_and_increment(principal, Period::Day, Metric::AiMethodCount, 1, limit)
                    .await
                    .unwrap()
            }));
        }

        let mut allowed_count = 0;
        for handle in handles {
            if handle.await.unwrap().allowed {
                allowed_count += 1;
            }
        }

        // P9: exactly min(k, limit - c) callers succeed, starting from c=0.
        assert_eq!(allowed_count, limit);
    }

    #[sqlx::test]
    async fn check_does_not_mutate_state(pool: PgPool) {
        let ledger = QuotaLedger::new(pool);
        let principal = "user:readonly";

        let before = ledger
            .check(principal, Period::Month, Metric::CaptionsMethodCount, 10)
            .await
            .unwrap();
        assert_eq!(before.used, 0);
        assert!(before.allowed);

        let after = ledger
            .check(principal, Period::Month, Metric::CaptionsMethodCount, 10)
            .await
            .unwrap();
        assert_eq!(after.used, 0);
    }

    #[sqlx::test]
    async fn guest_usage_increments_and_gc_clears_old_buckets(pool: PgPool) {
        let ledger = QuotaLedger::new(pool);
        let session_id = "guest-session-abc";

        let used = ledger
            .increment_guest_usage(session_id, "bulk_videos_total", 2)
            .await
            .unwrap();
        assert_eq!(used, 2);

        let decision = ledger
            .check_guest_usage(session_id, "bulk_videos_total", 3)
            .await
            .unwrap();
        assert_eq!(decision.used, 2);
        assert!(decision.allowed);

        // today's bucket survives a 30-day-old cutoff
        let deleted = ledger.gc_guest_usage(30).await.unwrap();
        assert_eq!(deleted, 0);
    }
}
