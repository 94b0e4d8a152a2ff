use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};

use crate::domain::Scope;
use crate::error::AppError;
use crate::server::auth::{authenticate, rate_limit_headers};
use crate::server::request_context::client_ip;
use crate::server::AppState;

const DB_SOFT_THRESHOLD: Duration = Duration::from_secs(5);
const QUEUE_SOFT_THRESHOLD: Duration = Duration::from_secs(3);
const RATE_LIMITER_SOFT_THRESHOLD: Duration = Duration::from_secs(2);
const MEMORY_DEGRADED_MB: u64 = 400;
const MEMORY_UNHEALTHY_MB: u64 = 800;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum ComponentStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl ComponentStatus {
    fn worst_of(self, other: ComponentStatus) -> ComponentStatus {
        use ComponentStatus::*;
        match (self, other) {
            (Unhealthy, _) | (_, Unhealthy) => Unhealthy,
            (Degraded, _) | (_, Degraded) => Degraded,
            _ => Healthy,
        }
    }
}

async fn probe_database(state: &AppState) -> (ComponentStatus, Duration) {
    let start = Instant::now();
    let result = sqlx::query("SELECT 1").execute(&state.pool).await;
    let elapsed = start.elapsed();
    let status = match result {
        Err(err) => {
            tracing::warn!(error = %err, "database health probe failed");
            ComponentStatus::Unhealthy
        }
        Ok(_) if elapsed > DB_SOFT_THRESHOLD => ComponentStatus::Degraded,
        Ok(_) => ComponentStatus::Healthy,
    };
    (status, elapsed)
}

async fn probe_queue(state: &AppState) -> (ComponentStatus, Duration) {
    let start = Instant::now();
    let depths = state.broker.queue_depths().await;
    let elapsed = start.elapsed();
    let status = if depths.is_empty() && elapsed > QUEUE_SOFT_THRESHOLD {
        ComponentStatus::Degraded
    } else if elapsed > QUEUE_SOFT_THRESHOLD {
        ComponentStatus::Degraded
    } else {
        ComponentStatus::Healthy
    };
    (status, elapsed)
}

async fn probe_rate_limiter(state: &AppState) -> (ComponentStatus, Duration) {
    let start = Instant::now();
    let degraded = state.rate_limiter.is_degraded().await;
    let elapsed = start.elapsed();
    let status = if degraded {
        ComponentStatus::Degraded
    } else if elapsed > RATE_LIMITER_SOFT_THRESHOLD {
        ComponentStatus::Degraded
    } else {
        ComponentStatus::Healthy
    };
    (status, elapsed)
}

/// Resident set size in MB, read from `/proc/self/status`. Returns `None`
/// on platforms without procfs; memory is then reported healthy by
/// default rather than probed.
fn resident_memory_mb() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("VmRSS:") {
            let kb: u64 = rest.trim().trim_end_matches(" kB").trim().parse().ok()?;
            return Some(kb / 1024);
        }
    }
    None
}

fn probe_memory() -> (ComponentStatus, Option<u64>) {
    match resident_memory_mb() {
        Some(mb) if mb >= MEMORY_UNHEALTHY_MB => (ComponentStatus::Unhealthy, Some(mb)),
        Some(mb) if mb >= MEMORY_DEGRADED_MB => (ComponentStatus::Degraded, Some(mb)),
        Some(mb) => (ComponentStatus::Healthy, Some(mb)),
        None => (ComponentStatus::Healthy, None),
    }
}

pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let (db_status, db_elapsed) = probe_database(&state).await;
    let (queue_status, queue_elapsed) = probe_queue(&state).await;
    let (rate_limiter_status, rate_limiter_elapsed) = probe_rate_limiter(&state).await;
    let (memory_status, memory_mb) = probe_memory();

    let overall = db_status
        .worst_of(queue_status)
        .worst_of(rate_limiter_status)
        .worst_of(memory_status);

    let status_code = match overall {
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
    };

    let body = json!({
        "status": overall,
        "components": {
            "database": {"status": db_status, "latency_ms": db_elapsed.as_millis()},
            "queue": {"status": queue_status, "latency_ms": queue_elapsed.as_millis()},
            "rate_limiter": {"status": rate_limiter_status, "latency_ms": rate_limiter_elapsed.as_millis()},
            "memory": {"status": memory_status, "resident_mb": memory_mb},
        },
    });

    (status_code, Json(body))
}

pub async fn queues(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<(HeaderMap, Json<Value>), AppError> {
    let client_ip = client_ip(&headers);
    let (_ctx, decision) =
        authenticate(&state, &headers, &client_ip, &[Scope::DemographicsRead]).await?;

    let depths = state.broker.queue_depths().await;
    let topics: Vec<Value> = depths
        .into_iter()
        .map(|d| {
            json!({
                "topic": d.topic.as_str(),
                "active": d.active,
                "scheduled": d.scheduled,
                "dead_letter": d.dead_letter,
                "dead_letter_sample": d.dead_letter_sample,
            })
        })
        .collect();

    let headers = rate_limit_headers(&decision);
    Ok((headers, Json(json!({"topics": topics}))))
}
