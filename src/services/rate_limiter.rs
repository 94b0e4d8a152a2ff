use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::{RateLimitDecision, RateLimitProfile, WindowKind};

const DEGRADED_MEMORY_TTL: Duration = Duration::seconds(30);

fn bucket_index(window_ms: i64, now: DateTime<Utc>) -> i64 {
    now.timestamp_millis() / window_ms
}

fn bucket_end(window_ms: i64, bucket: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis((bucket + 1) * window_ms).unwrap_or_else(Utc::now)
}

fn limit_for(profile: &RateLimitProfile, window: WindowKind) -> u32 {
    match window {
        WindowKind::Burst => profile.burst_limit,
        WindowKind::Minute => profile.minute_limit,
        WindowKind::Hour => profile.hour_limit,
        WindowKind::Day => profile.day_limit,
    }
}

/// C2: four fixed-window counters per credential, batched in one
/// round-trip where the backing store allows it. On store failure, falls
/// back to "fail-open for minute window only" (§4.2) and records the
/// degradation for `/health`.
pub struct RateLimiter {
    pool: PgPool,
    degraded_until: Mutex<Option<DateTime<Utc>>>,
}

impl RateLimiter {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            degraded_until: Mutex::new(None),
        }
    }

    pub async fn is_degraded(&self) -> bool {
        match *self.degraded_until.lock().await {
            Some(until) => until > Utc::now(),
            None => false,
        }
    }

    async fn mark_degraded(&self) {
        *self.degraded_until.lock().await = Some(Utc::now() + DEGRADED_MEMORY_TTL);
    }

    pub async fn try_consume(
        &self,
        credential_id: Uuid,
        profile: &RateLimitProfile,
    ) -> RateLimitDecision {
        match self.try_consume_inner(credential_id, profile).await {
            Ok(decision) => decision,
            Err(err) => {
                tracing::warn!(error = %err, "rate limit store unavailable, failing open on minute window");
                self.mark_degraded().await;
                RateLimitDecision {
                    allowed: true,
                    remaining: profile.minute_limit,
                    window: WindowKind::Minute,
                    reset_at: Utc::now() + Duration::minutes(1),
                    limit: profile.minute_limit,
                    degraded: true,
                }
            }
        }
    }

    async fn try_consume_inner(
        &self,
        credential_id: Uuid,
        profile: &RateLimitProfile,
    ) -> anyhow::Result<RateLimitDecision> {
        let now = Utc::now();
        let windows = WindowKind::all();
        let keys: Vec<String> = windows
            .iter()
            .map(|w| {
                format!(
                    "rate_limit:{}:{}:{}",
                    credential_id,
                    w.as_str(),
                    bucket_index(w.window_ms(), now)
                )
            })
            .collect();

        let mut tx = self.pool.begin().await?;
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT key, count FROM rate_limit_counters WHERE key = ANY($1)",
        )
        .bind(&keys)
        .fetch_all(&mut *tx)
        .await?;

        let mut counts = vec![0i64; windows.len()];
        for (key, count) in rows {
            if let Some(idx) = keys.iter().position(|k| k == &key) {
                counts[idx] = count;
            }
        }

        let mut limiting_idx = 0usize;
        let mut min_remaining = i64::MAX;
        for (idx, window) in windows.iter().enumerate() {
            let limit = limit_for(profile, *window) as i64;
            let remaining = limit - counts[idx];
            if remaining < min_remaining {
                min_remaining = remaining;
                limiting_idx = idx;
            }
        }

        let limiting_window = windows[limiting_idx];
        let limit = limit_for(profile, limiting_window);
        let bucket = bucket_index(limiting_window.window_ms(), now);
        let reset_at = bucket_end(limiting_window.window_ms(), bucket);

        if min_remaining <= 0 {
            tx.rollback().await.ok();
            return Ok(RateLimitDecision {
                allowed: false,
                remaining: 0,
                window: limiting_window,
                reset_at,
                limit,
                degraded: false,
            });
        }

        for (idx, window) in windows.iter().enumerate() {
            let ttl_ms = window.window_ms() + 5_000;
            let expires_at = now + Duration::milliseconds(ttl_ms);
            sqlx::query(
                r#"
                INSERT INTO rate_limit_counters (key, count, expires_at)
                VALUES ($1, 1, $2)
                ON CONFLICT (key) DO UPDATE SET count = rate_limit_counters.count + 1, expires_at = $2
                "#,
            )
            .bind(&keys[idx])
            .bind(expires_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(RateLimitDecision {
            allowed: true,
            remaining: (min_remaining - 1).max(0) as u32,
            window: limiting_window,
            reset_at,
            limit,
            degraded: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_index_is_stable_within_a_window() {
        let t0 = DateTime::from_timestamp_millis(1_000_000).unwrap();
        let t1 = DateTime::from_timestamp_millis(1_000_999).unwrap();
        assert_eq!(
            bucket_index(WindowKind::Minute.window_ms(), t0),
            bucket_index(WindowKind::Minute.window_ms(), t1)
        );
    }

    #[test]
    fn most_restrictive_window_wins() {
        let profile = RateLimitProfile {
            burst_limit: 10,
            minute_limit: 600,
            hour_limit: 10_000,
            day_limit: 100_000,
        };
        assert_eq!(limit_for(&profile, WindowKind::Burst), 10);
        assert!(limit_for(&profile, WindowKind::Burst) < limit_for(&profile, WindowKind::Minute));
    }
}
