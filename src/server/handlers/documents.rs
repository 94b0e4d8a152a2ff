use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::domain::Scope;
use crate::error::{AppError, FieldError};
use crate::server::auth::{authenticate, rate_limit_headers};
use crate::server::request_context::client_ip;
use crate::server::AppState;

const MAX_BATCH_UPLOAD_URLS: usize = 50;
const MAX_FILE_SIZE_MB_CAP: f64 = 100.0;

#[derive(Debug, Deserialize)]
pub struct UploadUrlRequest {
    #[serde(rename = "fileName")]
    pub file_name: String,
    #[serde(rename = "contentType")]
    pub content_type: String,
    #[serde(rename = "maxFileSizeMB")]
    pub max_file_size_mb: f64,
}

fn validate_upload_request(req: &UploadUrlRequest) -> Result<(), FieldError> {
    if req.file_name.trim().is_empty() {
        return Err(FieldError::new("fileName", "must not be empty"));
    }
    if req.max_file_size_mb <= 0.0 || req.max_file_size_mb > MAX_FILE_SIZE_MB_CAP {
        return Err(FieldError::new(
            "maxFileSizeMB",
            format!("must be between 0 and {MAX_FILE_SIZE_MB_CAP}"),
        ));
    }
    Ok(())
}

pub async fn upload_url(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<UploadUrlRequest>,
) -> Result<(HeaderMap, Json<Value>), AppError> {
    let client_ip = client_ip(&headers);
    let (ctx, decision) = authenticate(&state, &headers, &client_ip, &[Scope::FilesUpload]).await?;

    validate_upload_request(&request).map_err(|e| AppError::Validation(vec![e]))?;

    let (upload_url, blob_path, correlation_id, expires_at) = state
        .capability_issuer
        .issue_upload(
            &ctx.tenant,
            &request.file_name,
            &request.content_type,
            request.max_file_size_mb,
        )
        .await?;

    let headers = rate_limit_headers(&decision);
    Ok((
        headers,
        Json(json!({
            "uploadUrl": upload_url,
            "blobName": blob_path,
            "correlationId": correlation_id,
            "expiresAt": expires_at,
        })),
    ))
}

#[derive(Debug, Deserialize)]
pub struct BatchUploadUrlsRequest {
    pub documents: Vec<UploadUrlRequest>,
}

pub async fn batch_upload_urls(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<BatchUploadUrlsRequest>,
) -> Result<(HeaderMap, Json<Value>), AppError> {
    let client_ip = client_ip(&headers);
    let (ctx, decision) = authenticate(&state, &headers, &client_ip, &[Scope::FilesUpload]).await?;

    if request.documents.len() > MAX_BATCH_UPLOAD_URLS {
        return Err(AppError::PayloadTooLarge);
    }

    let mut results = Vec::with_capacity(request.documents.len());
    for (index, doc) in request.documents.iter().enumerate() {
        if let Err(e) = validate_upload_request(doc) {
            results.push(json!({"index": index, "status": "failed", "error": e.message}));
            continue;
        }
        match state
            .capability_issuer
            .issue_upload(&ctx.tenant, &doc.file_name, &doc.content_type, doc.max_file_size_mb)
            .await
        {
            Ok((upload_url, blob_path, correlation_id, expires_at)) => {
                results.push(json!({
                    "index": index,
                    "status": "ok",
                    "uploadUrl": upload_url,
                    "blobName": blob_path,
                    "correlationId": correlation_id,
                    "expiresAt": expires_at,
                }));
            }
            Err(err) => {
                results.push(json!({"index": index, "status": "failed", "error": err.to_string()}));
            }
        }
    }

    let headers = rate_limit_headers(&decision);
    Ok((headers, Json(json!({"results": results}))))
}

pub async fn status(
    State(state): State<AppState>,
    Path(correlation_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<(HeaderMap, Json<Value>), AppError> {
    let client_ip = client_ip(&headers);
    let (ctx, decision) =
        authenticate(&state, &headers, &client_ip, &[Scope::DemographicsRead]).await?;

    let descriptor = state
        .capability_issuer
        .get_status(&ctx.tenant, correlation_id)
        .await?
        .ok_or(AppError::NotFound)?;

    let headers = rate_limit_headers(&decision);
    Ok((
        headers,
        Json(json!({
            "status": descriptor.status,
            "file_size": descriptor.file_size,
            "error": descriptor.error,
        })),
    ))
}
