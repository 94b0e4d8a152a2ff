use std::time::Duration;

use crate::services::idempotency_cache::IdempotencyCache;

const SWEEP_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Periodic maintenance task: purges expired idempotency bindings
/// (§4.3 — `store` TTLs records out, but eviction itself needs a
/// sweeper since Postgres has no per-row TTL).
pub async fn run(idempotency_cache: IdempotencyCache) {
    loop {
        tokio::time::sleep(SWEEP_INTERVAL).await;
        match idempotency_cache.evict_expired().await {
            Ok(count) if count > 0 => {
                tracing::info!(count, "evicted expired idempotency bindings");
            }
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(error = %err, "failed to evict expired idempotency bindings");
            }
        }
    }
}
