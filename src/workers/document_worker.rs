use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use uuid::Uuid;

use crate::domain::{CapabilityStatus, Topic};
use crate::queue::Broker;
use crate::services::capability::CapabilityIssuer;

const DRAIN_BATCH: usize = 10;
const IDLE_POLL: Duration = Duration::from_millis(500);

#[derive(Debug, Deserialize)]
struct DocumentProcessingEnvelope {
    #[serde(rename = "correlationId")]
    correlation_id: Uuid,
}

/// Document worker named in §4.7: consumes the non-FIFO `documents`
/// topic produced by the blob reactor once a blob is validated. The
/// contract is deliberately thin ("completes the message or throws") —
/// classification/metadata extraction is out of scope (§1); this marks
/// the descriptor `completed`.
pub async fn run(broker: Arc<dyn Broker>, capability_issuer: CapabilityIssuer) {
    loop {
        let messages = broker.receive_any(Topic::Documents, DRAIN_BATCH).await;
        if messages.is_empty() {
            tokio::time::sleep(IDLE_POLL).await;
            continue;
        }

        for message in messages {
            let envelope: DocumentProcessingEnvelope =
                match serde_json::from_value(message.payload.clone()) {
                    Ok(envelope) => envelope,
                    Err(err) => {
                        tracing::error!(error = %err, message_id = %message.id, "malformed document_processing envelope");
                        broker
                            .dead_letter(Topic::Documents, message.id, "malformed")
                            .await
                            .ok();
                        continue;
                    }
                };

            let result = capability_issuer
                .update_status(envelope.correlation_id, CapabilityStatus::Completed, None, None)
                .await;

            match result {
                Ok(()) => {
                    broker.complete(Topic::Documents, message.id).await.ok();
                }
                Err(err) => {
                    tracing::warn!(error = %err, message_id = %message.id, "document processing failed, abandoning for redelivery");
                    broker.abandon(Topic::Documents, message.id).await.ok();
                }
            }
        }
    }
}
