use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Delivered,
    RetryFailed,
    FailedPermanently,
}

/// Append-only audit row for one outbound webhook attempt (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    pub submission_id: Option<Uuid>,
    pub target_url: String,
    pub event: String,
    pub status: DeliveryOutcome,
    pub http_status: Option<u16>,
    pub response_excerpt: String,
    pub attempt: u32,
    pub last_error: Option<String>,
    pub attempted_at: DateTime<Utc>,
}

pub const RESPONSE_EXCERPT_MAX_BYTES: usize = 500;

pub fn truncate_excerpt(body: &str) -> String {
    if body.len() <= RESPONSE_EXCERPT_MAX_BYTES {
        return body.to_string();
    }
    let mut end = RESPONSE_EXCERPT_MAX_BYTES;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    body[..end].to_string()
}
