use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::RecordStatus;

/// Envelope around the opaque domain payload. The payload's hundreds of
/// demographics/settlement fields are never modeled here; they travel as
/// an opaque `serde_json::Value`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionRecord {
    pub id: Uuid,
    pub tenant: String,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: Uuid,
    pub status: RecordStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateSubmissionRequest {
    #[serde(flatten)]
    pub payload: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchCreateRequest {
    pub records: Vec<Value>,
    pub batch_options: Option<BatchOptions>,
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct BatchOptions {
    #[serde(default)]
    pub notify_on_completion: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchItemResult {
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchResultMetadata {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct Pagination {
    pub limit: u32,
    pub offset: u32,
    pub total: i64,
}
