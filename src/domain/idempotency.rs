use chrono::{DateTime, Utc};
use serde::Serialize;

/// `(tenant, idempotency-key) -> (request-fingerprint, method, path,
/// response-status, response-body, expires_at)`, per §3.
#[derive(Debug, Clone)]
pub struct IdempotencyBinding {
    pub tenant: String,
    pub key: String,
    pub method: String,
    pub path: String,
    pub fingerprint: String,
    pub response_status: u16,
    pub response_body: Vec<u8>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CachedResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct LookupOutcome {
    pub hit: bool,
    pub conflict: bool,
    pub cached: Option<CachedResponse>,
}

impl LookupOutcome {
    pub fn miss() -> Self {
        Self {
            hit: false,
            conflict: false,
            cached: None,
        }
    }

    pub fn conflict() -> Self {
        Self {
            hit: false,
            conflict: true,
            cached: None,
        }
    }

    pub fn hit(cached: CachedResponse) -> Self {
        Self {
            hit: true,
            conflict: false,
            cached: Some(cached),
        }
    }
}

pub const DEFAULT_IDEMPOTENCY_TTL_HOURS: i64 = 24;
