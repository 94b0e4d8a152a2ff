use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use crate::domain::{webhook_session, CapabilityStatus, MessageType, QueueMessage, Topic};
use crate::queue::Broker;
use crate::services::capability::CapabilityIssuer;

const BATCH: i64 = 20;
const POLL_INTERVAL: Duration = Duration::from_secs(3);
const DEFAULT_MAX_SIZE_MB: f64 = 25.0;

/// C9: since the concrete object store is out of scope (§1), there is no
/// real "blob written" event stream to subscribe to. This loop polls
/// pending capability descriptors and treats a successful `stat` of the
/// blob path as the synthetic event, then runs the same validate/enqueue
/// contract §4.9 describes for a push-based reactor.
pub async fn run(broker: Arc<dyn Broker>, capability_issuer: CapabilityIssuer) {
    loop {
        let pending = match capability_issuer.list_pending_validation(BATCH).await {
            Ok(pending) => pending,
            Err(err) => {
                tracing::warn!(error = %err, "failed to poll pending capability descriptors");
                tokio::time::sleep(POLL_INTERVAL).await;
                continue;
            }
        };

        if pending.is_empty() {
            tokio::time::sleep(POLL_INTERVAL).await;
            continue;
        }

        for descriptor in pending {
            react_to(&broker, &capability_issuer, &descriptor).await;
        }
    }
}

fn mb_to_bytes(mb: f64) -> u64 {
    (mb * 1024.0 * 1024.0).round() as u64
}

async fn react_to(
    broker: &Arc<dyn Broker>,
    capability_issuer: &CapabilityIssuer,
    descriptor: &crate::domain::CapabilityDescriptor,
) {
    let correlation_id = match uuid::Uuid::parse_str(&descriptor.correlation_id) {
        Ok(id) => id,
        Err(_) => return,
    };

    let max_size_mb = capability_issuer
        .max_size_mb(correlation_id)
        .await
        .ok()
        .flatten()
        .unwrap_or(DEFAULT_MAX_SIZE_MB);

    let outcome = match capability_issuer
        .validate_uploaded(&descriptor.blob_path, max_size_mb)
        .await
    {
        Ok(outcome) => outcome,
        Err(err) => {
            tracing::warn!(error = %err, correlation_id = %descriptor.correlation_id, "blob stat failed");
            return;
        }
    };

    match outcome.error.as_deref() {
        Some("not-found") => {
            // Blob not written yet; not an event, just keep polling.
        }
        Some(reason) => {
            capability_issuer
                .update_status(correlation_id, CapabilityStatus::Failed, None, Some(reason))
                .await
                .ok();

            // §4.9: the validation-failed notification rides a `system`
            // session rather than the tenant's own webhook session, since
            // the failure is about the capability subsystem, not a
            // tenant-attributable record.
            let message = QueueMessage::new(
                MessageType::Webhook,
                json!({
                    "event": "document.validation_failed",
                    "data": {
                        "correlationId": descriptor.correlation_id,
                        "tenant": descriptor.tenant,
                        "reason": reason,
                    },
                }),
                Some("system".to_string()),
                descriptor.correlation_id.clone(),
            );
            if let Err(err) = broker.send(Topic::WebhooksFifo, message).await {
                tracing::error!(error = %err, "failed to enqueue document.validation_failed webhook");
            }
        }
        None => {
            let file_size_bytes = outcome.file_size_mb.map(mb_to_bytes);
            capability_issuer
                .update_status(correlation_id, CapabilityStatus::Uploaded, file_size_bytes, None)
                .await
                .ok();

            let processing_message = QueueMessage::new(
                MessageType::DocumentProcessing,
                json!({
                    "correlationId": descriptor.correlation_id,
                    "tenant": descriptor.tenant,
                    "blobPath": descriptor.blob_path,
                }),
                None,
                descriptor.correlation_id.clone(),
            );
            if let Err(err) = broker.send(Topic::Documents, processing_message).await {
                tracing::error!(error = %err, "failed to enqueue document_processing message");
            }

            let uploaded_message = QueueMessage::new(
                MessageType::Webhook,
                json!({
                    "event": "document.uploaded",
                    "data": {
                        "correlationId": descriptor.correlation_id,
                        "tenant": descriptor.tenant,
                        "fileSizeMb": outcome.file_size_mb,
                    },
                }),
                Some(webhook_session(&descriptor.tenant)),
                descriptor.correlation_id.clone(),
            );
            if let Err(err) = broker.send(Topic::WebhooksFifo, uploaded_message).await {
                tracing::error!(error = %err, "failed to enqueue document.uploaded webhook");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mb_to_bytes_round_trips_whole_megabytes() {
        assert_eq!(mb_to_bytes(1.0), 1024 * 1024);
        assert_eq!(mb_to_bytes(0.0), 0);
    }

    #[test]
    fn mb_to_bytes_rounds_rather_than_truncates() {
        // 2.5 MiB -> 2621440 exactly; use a value that exercises rounding.
        let bytes = mb_to_bytes(1.005);
        assert_eq!(bytes, (1.005 * 1024.0 * 1024.0).round() as u64);
    }
}
