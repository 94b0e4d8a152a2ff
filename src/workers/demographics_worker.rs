use std::time::{Duration, Instant};

use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::domain::{webhook_session, MessageType, QueueMessage, Topic};
use crate::queue::Broker;
use crate::repository::SubmissionRepository;

const DRAIN_BATCH: usize = 10;
const IDLE_POLL: Duration = Duration::from_millis(200);
const RENEW_EVERY: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct DemographicsEnvelope {
    action: String,
    record: EnvelopeRecord,
}

#[derive(Debug, Deserialize)]
struct EnvelopeRecord {
    id: Uuid,
    tenant: String,
    payload: serde_json::Value,
    created_by: Uuid,
}

/// C7: leases a `demographics-fifo` session, drains it in order, upserts
/// each record, and emits a `demographics.processed` follow-on webhook
/// (§4.7). Run one instance of this loop per pool worker.
pub async fn run(broker: std::sync::Arc<dyn Broker>, submissions: SubmissionRepository) {
    loop {
        let Some(handle) = broker.lease_next_session(Topic::DemographicsFifo).await else {
            tokio::time::sleep(IDLE_POLL).await;
            continue;
        };

        let mut last_renew = Instant::now();
        loop {
            let messages = broker.receive(&handle, DRAIN_BATCH).await;
            if messages.is_empty() {
                break;
            }

            for message in messages {
                if last_renew.elapsed() > RENEW_EVERY {
                    if broker.renew_lock(&handle).await.is_err() {
                        tracing::warn!(session = %handle.session, "failed to renew demographics session lock, abandoning");
                        broker
                            .abandon(Topic::DemographicsFifo, message.id)
                            .await
                            .ok();
                        continue;
                    }
                    last_renew = Instant::now();
                }

                handle_message(&broker, &submissions, &message).await;
            }
        }

        broker.release_session(&handle).await;
    }
}

async fn handle_message(
    broker: &std::sync::Arc<dyn Broker>,
    submissions: &SubmissionRepository,
    message: &QueueMessage,
) {
    let started = Instant::now();
    let envelope: DemographicsEnvelope = match serde_json::from_value(message.payload.clone()) {
        Ok(envelope) => envelope,
        Err(err) => {
            tracing::error!(error = %err, message_id = %message.id, "malformed demographics envelope");
            broker
                .dead_letter(Topic::DemographicsFifo, message.id, "malformed")
                .await
                .ok();
            return;
        }
    };

    if envelope.action != "create" {
        tracing::warn!(action = %envelope.action, message_id = %message.id, "unrecognized demographics action, dead-lettering");
        broker
            .dead_letter(Topic::DemographicsFifo, message.id, "malformed")
            .await
            .ok();
        return;
    }

    let record = envelope.record;
    let result = submissions
        .upsert_from_worker(record.id, &record.tenant, record.payload, record.created_by)
        .await;

    match result {
        Ok(_) => {
            broker
                .complete(Topic::DemographicsFifo, message.id)
                .await
                .ok();

            let duration_ms = started.elapsed().as_millis() as u64;
            let webhook_message = QueueMessage::new(
                MessageType::Webhook,
                json!({
                    "event": "demographics.processed",
                    "data": {"id": record.id, "tenant": record.tenant, "duration_ms": duration_ms},
                }),
                Some(webhook_session(&record.tenant)),
                message.correlation_id.clone(),
            );
            if let Err(err) = broker.send(Topic::WebhooksFifo, webhook_message).await {
                tracing::warn!(error = %err, "failed to enqueue demographics.processed webhook");
            }
        }
        Err(err) => {
            tracing::warn!(error = %err, message_id = %message.id, "demographics upsert failed, abandoning for redelivery");
            broker
                .abandon(Topic::DemographicsFifo, message.id)
                .await
                .ok();
        }
    }
}
