use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::domain::{truncate_excerpt, DeliveryAttempt, DeliveryOutcome, MessageType, QueueMessage, Topic};
use crate::queue::Broker;
use crate::repository::DeliveryRepository;
use crate::services::signing::{canonical_json, hmac_hex};

const DRAIN_BATCH: usize = 10;
const IDLE_POLL: Duration = Duration::from_millis(200);
const RENEW_EVERY: Duration = Duration::from_secs(30);
const INITIAL_TIMEOUT: Duration = Duration::from_secs(10);
const RETRY_TIMEOUT: Duration = Duration::from_secs(15);
const MAX_BACKOFF_MS: i64 = 60_000;
const USER_AGENT: &str = concat!("ingestion-plane/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Deserialize)]
struct WebhookEnvelope {
    event: String,
    data: Value,
}

/// C8: leases a `webhooks-fifo` session, drains it in order, HMAC-signs
/// and POSTs each event, and self-manages exponential-backoff retries by
/// scheduling a successor on the same session rather than relying on
/// broker redelivery (§4.8 — keeps the session free during the wait while
/// preserving per-tenant order).
pub async fn run(
    broker: Arc<dyn Broker>,
    deliveries: DeliveryRepository,
    http_client: Client,
    config: Arc<AppConfig>,
) {
    loop {
        let Some(handle) = broker.lease_next_session(Topic::WebhooksFifo).await else {
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
                        tracing::warn!(session = %handle.session, "failed to renew webhook session lock, abandoning");
                        broker.abandon(Topic::WebhooksFifo, message.id).await.ok();
                        continue;
                    }
                    last_renew = Instant::now();
                }

                dispatch_one(&broker, &deliveries, &http_client, &config, &message).await;
            }
        }

        broker.release_session(&handle).await;
    }
}

fn resolve_target_url(config: &AppConfig, data: &Value) -> Option<String> {
    if let Some(url) = data.get("target_url").and_then(|v| v.as_str()) {
        return Some(url.to_string());
    }
    let tenant = data.get("tenant").and_then(|v| v.as_str())?;
    config
        .tenant_webhook_url_override(tenant)
        .or_else(|| config.default_webhook_url.clone())
}

async fn dispatch_one(
    broker: &Arc<dyn Broker>,
    deliveries: &DeliveryRepository,
    http_client: &Client,
    config: &AppConfig,
    message: &QueueMessage,
) {
    let envelope: WebhookEnvelope = match serde_json::from_value(message.payload.clone()) {
        Ok(envelope) => envelope,
        Err(err) => {
            tracing::error!(error = %err, message_id = %message.id, "malformed webhook envelope");
            broker
                .dead_letter(Topic::WebhooksFifo, message.id, "malformed")
                .await
                .ok();
            return;
        }
    };

    let Some(target_url) = resolve_target_url(config, &envelope.data) else {
        tracing::info!(event = %envelope.event, message_id = %message.id, "no webhook target configured, skipping");
        broker.complete(Topic::WebhooksFifo, message.id).await.ok();
        return;
    };

    let submission_id = envelope
        .data
        .get("id")
        .and_then(|v| v.as_str())
        .and_then(|s| Uuid::parse_str(s).ok());

    let tenant = envelope
        .data
        .get("tenant")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string();
    let timestamp = Utc::now().to_rfc3339();
    let signing_payload = serde_json::json!({
        "event": envelope.event,
        "data": envelope.data,
        "timestamp": timestamp,
        "correlation_id": message.correlation_id,
        "tenant": tenant,
    });
    let signature = hmac_hex(&config.webhook_secret, &canonical_json(&signing_payload));
    let body = serde_json::json!({
        "event": envelope.event,
        "data": envelope.data,
        "timestamp": timestamp,
        "correlation_id": message.correlation_id,
        "tenant": tenant,
        "signature": signature,
    });
    let canonical = canonical_json(&body);
    let attempt = message.retry_count;
    let timeout = if attempt == 0 { INITIAL_TIMEOUT } else { RETRY_TIMEOUT };

    let response = http_client
        .post(&target_url)
        .timeout(timeout)
        .header("Content-Type", "application/json")
        .header("X-Webhook-Signature", &signature)
        .header("X-Correlation-ID", &message.correlation_id)
        .header("X-Retry-Attempt", attempt.to_string())
        .header("User-Agent", USER_AGENT)
        .body(canonical)
        .send()
        .await;

    match response {
        Ok(resp) if resp.status().is_success() => {
            let http_status = resp.status().as_u16();
            let body_excerpt = resp.text().await.unwrap_or_default();
            record_attempt(
                deliveries,
                submission_id,
                &target_url,
                &envelope.event,
                DeliveryOutcome::Delivered,
                Some(http_status),
                &body_excerpt,
                attempt,
                None,
            )
            .await;
            broker.complete(Topic::WebhooksFifo, message.id).await.ok();
        }
        Ok(resp) => {
            let http_status = resp.status().as_u16();
            let body_excerpt = resp.text().await.unwrap_or_default();
            handle_failure(
                broker,
                deliveries,
                message,
                &target_url,
                &envelope,
                attempt,
                Some(http_status),
                &body_excerpt,
                None,
            )
            .await;
        }
        Err(err) => {
            let error_message = err.to_string();
            handle_failure(
                broker,
                deliveries,
                message,
                &target_url,
                &envelope,
                attempt,
                None,
                "",
                Some(error_message),
            )
            .await;
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn handle_failure(
    broker: &Arc<dyn Broker>,
    deliveries: &DeliveryRepository,
    message: &QueueMessage,
    target_url: &str,
    envelope: &WebhookEnvelope,
    attempt: u32,
    http_status: Option<u16>,
    body_excerpt: &str,
    last_error: Option<String>,
) {
    let next_attempt = attempt + 1;
    if next_attempt < message.max_retries {
        record_attempt(
            deliveries,
            submission_id_of(envelope),
            target_url,
            &envelope.event,
            DeliveryOutcome::RetryFailed,
            http_status,
            body_excerpt,
            attempt,
            last_error,
        )
        .await;

        let delay_ms = (2i64.saturating_pow(attempt)).saturating_mul(1000).min(MAX_BACKOFF_MS);
        let mut successor = QueueMessage::new(
            MessageType::Webhook,
            message.payload.clone(),
            message.session.clone(),
            message.correlation_id.clone(),
        );
        successor.retry_count = next_attempt;
        successor.max_retries = message.max_retries;
        successor.scheduled_for = Some(Utc::now() + chrono::Duration::milliseconds(delay_ms));

        if let Err(err) = broker.send(Topic::WebhooksFifo, successor).await {
            tracing::error!(error = %err, "failed to enqueue webhook retry, abandoning for broker redelivery");
            broker.abandon(Topic::WebhooksFifo, message.id).await.ok();
            return;
        }
        broker.complete(Topic::WebhooksFifo, message.id).await.ok();
    } else {
        record_attempt(
            deliveries,
            submission_id_of(envelope),
            target_url,
            &envelope.event,
            DeliveryOutcome::FailedPermanently,
            http_status,
            body_excerpt,
            attempt,
            last_error,
        )
        .await;
        broker.complete(Topic::WebhooksFifo, message.id).await.ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base_config() -> AppConfig {
        AppConfig {
            environment: crate::config::Environment::Development,
            database_url: String::new(),
            port: 0,
            webhook_secret: "s".to_string(),
            credential_prefix: "ms_".to_string(),
            default_webhook_url: None,
            worker_pool_size: 1,
            batch_size_limit_bytes: 250_000,
            object_store_root: String::new(),
            object_store_base_url: String::new(),
        }
    }

    #[test]
    fn explicit_target_url_wins_over_tenant_resolution() {
        let config = base_config();
        let data = json!({"target_url": "https://example.com/hook", "tenant": "acme"});
        assert_eq!(
            resolve_target_url(&config, &data),
            Some("https://example.com/hook".to_string())
        );
    }

    #[test]
    fn falls_back_to_default_webhook_url_for_a_tenant() {
        let mut config = base_config();
        config.default_webhook_url = Some("https://default.example.com/hook".to_string());
        let data = json!({"tenant": "acme"});
        assert_eq!(
            resolve_target_url(&config, &data),
            Some("https://default.example.com/hook".to_string())
        );
    }

    #[test]
    fn no_tenant_and_no_target_url_resolves_to_none() {
        let config = base_config();
        let data = json!({});
        assert_eq!(resolve_target_url(&config, &data), None);
    }
}

fn submission_id_of(envelope: &WebhookEnvelope) -> Option<Uuid> {
    envelope
        .data
        .get("id")
        .and_then(|v| v.as_str())
        .and_then(|s| Uuid::parse_str(s).ok())
}

#[allow(clippy::too_many_arguments)]
async fn record_attempt(
    deliveries: &DeliveryRepository,
    submission_id: Option<Uuid>,
    target_url: &str,
    event: &str,
    status: DeliveryOutcome,
    http_status: Option<u16>,
    body_excerpt: &str,
    attempt: u32,
    last_error: Option<String>,
) {
    let record = DeliveryAttempt {
        submission_id,
        target_url: target_url.to_string(),
        event: event.to_string(),
        status,
        http_status,
        response_excerpt: truncate_excerpt(body_excerpt),
        attempt,
        last_error,
        attempted_at: Utc::now(),
    };
    if let Err(err) = deliveries.record(&record).await {
        tracing::warn!(error = %err, "failed to persist delivery attempt");
    }
}
