use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use crate::domain::{webhook_session, MessageType, QueueMessage, Topic};
use crate::queue::Broker;

const DRAIN_BATCH: usize = 10;
const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Side consumer on the dead-letter topic (§4.7 point 4): records the
/// terminal outcome and, for dead-lettered demographics messages, emits a
/// `demographics.failed` webhook so the tenant learns a submission will
/// never complete. Webhook and document dead-letters are terminal audit
/// only — their delivery/processing history already lives in
/// `delivery_attempts`/application logs.
pub async fn run(broker: Arc<dyn Broker>) {
    loop {
        let messages = broker.receive_any(Topic::DeadLetter, DRAIN_BATCH).await;
        if messages.is_empty() {
            tokio::time::sleep(POLL_INTERVAL).await;
            continue;
        }

        for message in messages {
            handle_dead_letter(&broker, &message).await;
            broker.complete(Topic::DeadLetter, message.id).await.ok();
        }
    }
}

/// Pulls `(tenant, id)` out of a dead-lettered demographics message's own
/// payload — the only place that context still exists once a message is
/// terminal, since the record was never persisted.
fn demographics_notification_target(payload: &serde_json::Value) -> Option<(&str, serde_json::Value)> {
    let record = payload.get("record")?;
    let tenant = record.get("tenant").and_then(|t| t.as_str())?;
    let record_id = record.get("id").cloned().unwrap_or(serde_json::Value::Null);
    Some((tenant, record_id))
}

async fn handle_dead_letter(broker: &Arc<dyn Broker>, message: &QueueMessage) {
    tracing::warn!(
        message_id = %message.id,
        message_type = ?message.message_type,
        correlation_id = %message.correlation_id,
        "message dead-lettered"
    );

    if message.message_type != MessageType::Demographics {
        return;
    }

    let Some((tenant, record_id)) = demographics_notification_target(&message.payload) else {
        tracing::error!(message_id = %message.id, "dead-lettered demographics message carries no tenant, cannot notify");
        return;
    };

    let webhook_message = QueueMessage::new(
        MessageType::Webhook,
        json!({
            "event": "demographics.failed",
            "data": {"id": record_id, "tenant": tenant},
        }),
        Some(webhook_session(tenant)),
        message.correlation_id.clone(),
    );
    if let Err(err) = broker.send(Topic::WebhooksFifo, webhook_message).await {
        tracing::error!(error = %err, "failed to enqueue demographics.failed webhook");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_tenant_and_id_from_a_well_formed_payload() {
        let payload = json!({"action": "create", "record": {"id": "abc-123", "tenant": "acme"}});
        let (tenant, id) = demographics_notification_target(&payload).unwrap();
        assert_eq!(tenant, "acme");
        assert_eq!(id, json!("abc-123"));
    }

    #[test]
    fn missing_tenant_yields_none() {
        let payload = json!({"action": "create", "record": {"id": "abc-123"}});
        assert!(demographics_notification_target(&payload).is_none());
    }

    #[test]
    fn missing_record_yields_none() {
        let payload = json!({"action": "create"});
        assert!(demographics_notification_target(&payload).is_none());
    }
}
