use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Demographics,
    Webhook,
    DocumentProcessing,
}

/// A message placed on a `Topic`. `session` is mandatory for
/// `demographics`/`webhook` and absent for `document_processing` (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMessage {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub payload: Value,
    pub session: Option<String>,
    pub priority: u8,
    pub retry_count: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub correlation_id: String,
}

impl QueueMessage {
    pub fn new(
        message_type: MessageType,
        payload: Value,
        session: Option<String>,
        correlation_id: String,
    ) -> Self {
        let max_retries = match message_type {
            MessageType::Demographics | MessageType::DocumentProcessing => 3,
            MessageType::Webhook => 5,
        };
        Self {
            id: Uuid::new_v4(),
            message_type,
            payload,
            session,
            priority: 5,
            retry_count: 0,
            max_retries,
            created_at: Utc::now(),
            scheduled_for: None,
            correlation_id,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.scheduled_for {
            Some(t) => t <= now,
            None => true,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Topic {
    DemographicsFifo,
    WebhooksFifo,
    Documents,
    DeadLetter,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::DemographicsFifo => "demographics-fifo",
            Topic::WebhooksFifo => "webhooks-fifo",
            Topic::Documents => "documents",
            Topic::DeadLetter => "dead-letter",
        }
    }

    pub fn requires_session(&self) -> bool {
        matches!(self, Topic::DemographicsFifo | Topic::WebhooksFifo)
    }

    pub fn lock_duration(&self) -> chrono::Duration {
        match self {
            Topic::DemographicsFifo | Topic::Documents => chrono::Duration::minutes(5),
            Topic::WebhooksFifo => chrono::Duration::minutes(2),
            Topic::DeadLetter => chrono::Duration::minutes(5),
        }
    }

    pub fn max_delivery_count(&self) -> u32 {
        match self {
            Topic::DemographicsFifo | Topic::Documents => 3,
            Topic::WebhooksFifo => 5,
            Topic::DeadLetter => 1,
        }
    }
}
