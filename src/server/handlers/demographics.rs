use axum::extract::{Extension, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::domain::{
    demographics_session, webhook_session, BatchCreateRequest, BatchItemResult,
    BatchResultMetadata, MessageType, Pagination, Scope, Topic,
};
use crate::error::{AppError, FieldError};
use crate::queue::QueueMessage;
use crate::server::auth::{authenticate, rate_limit_headers};
use crate::server::middleware::CorrelationId;
use crate::server::request_context::client_ip;
use crate::server::AppState;
use crate::services::signing::canonical_json;
use crate::validation::{validate_idempotency_key, validate_payload};

fn idempotency_key(headers: &HeaderMap) -> Result<Option<String>, AppError> {
    match headers.get("X-Idempotency-Key").and_then(|v| v.to_str().ok()) {
        Some(key) => {
            validate_idempotency_key(key).map_err(|e| AppError::Validation(vec![e]))?;
            Ok(Some(key.to_string()))
        }
        None => Ok(None),
    }
}

async fn check_idempotency(
    state: &AppState,
    tenant: &str,
    key: &Option<String>,
    body: &Value,
) -> Result<Option<(StatusCode, Value)>, AppError> {
    let Some(key) = key else { return Ok(None) };
    let canonical = canonical_json(body);
    let outcome = state
        .idempotency_cache
        .lookup(tenant, key, &canonical)
        .await?;
    if outcome.conflict {
        return Err(AppError::IdempotencyConflict);
    }
    if outcome.hit {
        let cached = outcome.cached.expect("hit implies cached response");
        let status = StatusCode::from_u16(cached.status).unwrap_or(StatusCode::OK);
        let body: Value = serde_json::from_slice(&cached.body).unwrap_or(Value::Null);
        return Ok(Some((status, body)));
    }
    Ok(None)
}

fn store_idempotency(
    state: &AppState,
    tenant: String,
    key: Option<String>,
    method: &'static str,
    path: String,
    request_body: Value,
    response_status: u16,
    response_body: Value,
) {
    let Some(key) = key else { return };
    let cache = state.idempotency_cache.clone();
    tokio::spawn(async move {
        let canonical = canonical_json(&request_body);
        let body_bytes = serde_json::to_vec(&response_body).unwrap_or_default();
        if let Err(err) = cache
            .store(
                &tenant,
                &key,
                method,
                &path,
                &canonical,
                response_status,
                &body_bytes,
            )
            .await
        {
            tracing::warn!(error = %err, "failed to persist idempotency binding");
        }
    });
}

pub async fn create(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> Result<(StatusCode, HeaderMap, Json<Value>), AppError> {
    let client_ip = client_ip(&headers);
    let (ctx, decision) = authenticate(
        &state,
        &headers,
        &client_ip,
        &[Scope::DemographicsWrite],
    )
    .await?;

    validate_payload(&payload, state.config.batch_size_limit_bytes)
        .map_err(AppError::Validation)?;

    let key = idempotency_key(&headers)?;
    if let Some((status, body)) =
        check_idempotency(&state, &ctx.tenant, &key, &payload).await?
    {
        return Ok((status, rate_limit_headers(&decision), Json(body)));
    }

    let id = Uuid::new_v4();
    let record = state
        .submissions
        .create(id, &ctx.tenant, payload.clone(), ctx.credential_id)
        .await?;

    let session = demographics_session(&ctx.tenant);
    let demographics_message = QueueMessage::new(
        MessageType::Demographics,
        json!({"action": "create", "record": record}),
        Some(session),
        correlation.0.clone(),
    );
    state
        .broker
        .send(Topic::DemographicsFifo, demographics_message)
        .await?;

    let webhook_message = QueueMessage::new(
        MessageType::Webhook,
        json!({
            "event": "demographics.created",
            "data": {"id": record.id, "tenant": record.tenant},
        }),
        Some(webhook_session(&ctx.tenant)),
        correlation.0.clone(),
    );
    state
        .broker
        .send(Topic::WebhooksFifo, webhook_message)
        .await?;

    let response_body = json!({
        "id": record.id,
        "status": "accepted",
        "created_at": record.created_at,
    });

    store_idempotency(
        &state,
        ctx.tenant.clone(),
        key,
        "POST",
        "/v1/demographics".to_string(),
        payload,
        StatusCode::CREATED.as_u16(),
        response_body.clone(),
    );

    let headers = rate_limit_headers(&decision);
    Ok((StatusCode::CREATED, headers, Json(response_body)))
}

pub async fn create_batch(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    headers: HeaderMap,
    Json(request): Json<BatchCreateRequest>,
) -> Result<(StatusCode, HeaderMap, Json<Value>), AppError> {
    let client_ip = client_ip(&headers);
    let (ctx, decision) = authenticate(
        &state,
        &headers,
        &client_ip,
        &[Scope::DemographicsWrite],
    )
    .await?;

    if request.records.len() > 100 {
        return Err(AppError::PayloadTooLarge);
    }

    let mut results = Vec::with_capacity(request.records.len());
    let mut succeeded = 0usize;
    let mut failed = 0usize;

    for (index, item) in request.records.into_iter().enumerate() {
        match validate_payload(&item, state.config.batch_size_limit_bytes) {
            Err(errors) => {
                failed += 1;
                results.push(BatchItemResult {
                    index,
                    id: None,
                    status: "failed",
                    error: Some(
                        errors
                            .into_iter()
                            .map(|e: FieldError| format!("{}: {}", e.field, e.message))
                            .collect::<Vec<_>>()
                            .join("; "),
                    ),
                });
                continue;
            }
            Ok(()) => {}
        }

        let id = Uuid::new_v4();
        match state
            .submissions
            .create(id, &ctx.tenant, item.clone(), ctx.credential_id)
            .await
        {
            Ok(record) => {
                let session = demographics_session(&ctx.tenant);
                let message = QueueMessage::new(
                    MessageType::Demographics,
                    json!({"action": "create", "record": record}),
                    Some(session),
                    correlation.0.clone(),
                );
                if let Err(err) = state.broker.send(Topic::DemographicsFifo, message).await {
                    failed += 1;
                    results.push(BatchItemResult {
                        index,
                        id: Some(id),
                        status: "failed",
                        error: Some(err.to_string()),
                    });
                    continue;
                }
                succeeded += 1;
                results.push(BatchItemResult {
                    index,
                    id: Some(record.id),
                    status: "accepted",
                    error: None,
                });
            }
            Err(err) => {
                failed += 1;
                results.push(BatchItemResult {
                    index,
                    id: None,
                    status: "failed",
                    error: Some(err.to_string()),
                });
            }
        }
    }

    let notify = request
        .batch_options
        .map(|o| o.notify_on_completion)
        .unwrap_or(false);
    if notify {
        if let Some(url) = request.webhook_url {
            let message = QueueMessage::new(
                MessageType::Webhook,
                json!({
                    "event": "demographics.batch_completed",
                    "data": {"succeeded": succeeded, "failed": failed, "target_url": url},
                }),
                Some(webhook_session(&ctx.tenant)),
                correlation.0.clone(),
            );
            state.broker.send(Topic::WebhooksFifo, message).await.ok();
        }
    }

    let metadata = BatchResultMetadata {
        total: succeeded + failed,
        succeeded,
        failed,
    };
    let headers = rate_limit_headers(&decision);
    Ok((
        StatusCode::ACCEPTED,
        headers,
        Json(json!({"results": results, "metadata": metadata})),
    ))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    pub search: Option<String>,
    pub filter_status: Option<String>,
    pub filter_created_by: Option<Uuid>,
}

pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
    headers: HeaderMap,
) -> Result<(HeaderMap, Json<Value>), AppError> {
    let client_ip = client_ip(&headers);
    let (ctx, decision) =
        authenticate(&state, &headers, &client_ip, &[Scope::DemographicsRead]).await?;

    let limit = query.limit.unwrap_or(20).min(100);
    let offset = query.offset.unwrap_or(0);
    let (records, pagination) = state
        .submissions
        .list(
            &ctx.tenant,
            limit,
            offset,
            query.search.as_deref(),
            query.filter_status.as_deref(),
            query.filter_created_by,
        )
        .await?;

    let headers = rate_limit_headers(&decision);
    Ok((
        headers,
        Json(json!({"data": records, "pagination": pagination_json(&pagination)})),
    ))
}

fn pagination_json(p: &Pagination) -> Value {
    json!({"limit": p.limit, "offset": p.offset, "total": p.total})
}

pub async fn get_one(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<(HeaderMap, Json<Value>), AppError> {
    let client_ip = client_ip(&headers);
    let (ctx, decision) =
        authenticate(&state, &headers, &client_ip, &[Scope::DemographicsRead]).await?;

    let record = state
        .submissions
        .get(&ctx.tenant, id)
        .await?
        .ok_or(AppError::NotFound)?;

    let headers = rate_limit_headers(&decision);
    Ok((headers, Json(json!({"data": record}))))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(correlation): Extension<CorrelationId>,
    headers: HeaderMap,
    Json(patch): Json<Value>,
) -> Result<(StatusCode, HeaderMap, Json<Value>), AppError> {
    let client_ip = client_ip(&headers);
    let (ctx, decision) =
        authenticate(&state, &headers, &client_ip, &[Scope::DemographicsWrite]).await?;

    let key = idempotency_key(&headers)?;
    let path = format!("/v1/demographics/{id}");
    if let Some((status, body)) = check_idempotency(&state, &ctx.tenant, &key, &patch).await? {
        return Ok((status, rate_limit_headers(&decision), Json(body)));
    }

    let record = state
        .submissions
        .update(&ctx.tenant, id, &patch)
        .await?
        .ok_or(AppError::NotFound)?;

    let message = QueueMessage::new(
        MessageType::Webhook,
        json!({
            "event": "demographics.updated",
            "data": {"id": record.id, "tenant": record.tenant},
        }),
        Some(webhook_session(&ctx.tenant)),
        correlation.0.clone(),
    );
    state.broker.send(Topic::WebhooksFifo, message).await.ok();

    let response_body = json!({"id": record.id, "updated_at": record.updated_at});
    store_idempotency(
        &state,
        ctx.tenant.clone(),
        key,
        "PUT",
        path,
        patch,
        StatusCode::OK.as_u16(),
        response_body.clone(),
    );

    Ok((StatusCode::OK, rate_limit_headers(&decision), Json(response_body)))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(correlation): Extension<CorrelationId>,
    headers: HeaderMap,
) -> Result<(HeaderMap, Json<Value>), AppError> {
    let client_ip = client_ip(&headers);
    let (ctx, decision) =
        authenticate(&state, &headers, &client_ip, &[Scope::DemographicsDelete]).await?;

    let deleted_at = state
        .submissions
        .soft_delete(&ctx.tenant, id)
        .await?
        .ok_or(AppError::NotFound)?;

    let message = QueueMessage::new(
        MessageType::Webhook,
        json!({
            "event": "demographics.deleted",
            "data": {"id": id, "tenant": ctx.tenant},
        }),
        Some(webhook_session(&ctx.tenant)),
        correlation.0,
    );
    state.broker.send(Topic::WebhooksFifo, message).await.ok();

    Ok((
        rate_limit_headers(&decision),
        Json(json!({"id": id, "deleted_at": deleted_at})),
    ))
}
