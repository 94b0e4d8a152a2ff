use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::domain::{RateLimitProfile, Scope};
use crate::error::{AppError, FieldError};
use crate::server::auth::{authenticate, rate_limit_headers};
use crate::server::request_context::client_ip;
use crate::server::AppState;

const MAX_EXPIRES_IN_DAYS: i64 = 3650;

#[derive(Debug, Deserialize)]
pub struct IssueApiKeyRequest {
    pub name: String,
    pub scopes: Vec<String>,
    #[serde(default)]
    pub rate_limits: Option<RateLimitProfile>,
    #[serde(default)]
    pub expires_in_days: Option<i64>,
    #[serde(default)]
    pub allowed_ips: Option<Vec<String>>,
}

pub async fn issue_api_key(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<IssueApiKeyRequest>,
) -> Result<(StatusCode, HeaderMap, Json<Value>), AppError> {
    let client_ip = client_ip(&headers);
    let (ctx, decision) =
        authenticate(&state, &headers, &client_ip, &[Scope::DemographicsAdmin]).await?;

    if request.scopes.is_empty() {
        return Err(AppError::Validation(vec![FieldError::new(
            "scopes",
            "at least one scope is required",
        )]));
    }
    if let Some(days) = request.expires_in_days {
        if days <= 0 || days > MAX_EXPIRES_IN_DAYS {
            return Err(AppError::Validation(vec![FieldError::new(
                "expires_in_days",
                format!("must be between 1 and {MAX_EXPIRES_IN_DAYS}"),
            )]));
        }
    }

    let scopes: Vec<Scope> = request
        .scopes
        .iter()
        .filter_map(|s| Scope::parse(s))
        .collect();
    if scopes.len() != request.scopes.len() {
        return Err(AppError::Validation(vec![FieldError::new(
            "scopes",
            "contains an unrecognized scope",
        )]));
    }

    let expires_at = request
        .expires_in_days
        .map(|days| chrono::Utc::now() + chrono::Duration::days(days));

    let (id, plaintext) = state
        .credential_store
        .issue(
            &ctx.tenant,
            &request.name,
            &scopes,
            request.rate_limits.unwrap_or_default(),
            expires_at,
            request.allowed_ips,
        )
        .await?;

    let headers = rate_limit_headers(&decision);
    Ok((
        StatusCode::CREATED,
        headers,
        Json(json!({"apiKey": id, "key": plaintext})),
    ))
}

/// Rounds out credential lifecycle management alongside issuance (§9.5);
/// never returns `secure_hash` or a plaintext token.
pub async fn list_api_keys(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<(HeaderMap, Json<Value>), AppError> {
    let client_ip = client_ip(&headers);
    let (ctx, decision) =
        authenticate(&state, &headers, &client_ip, &[Scope::DemographicsAdmin]).await?;

    let summaries = state.credential_store.list(&ctx.tenant).await?;

    let headers = rate_limit_headers(&decision);
    Ok((headers, Json(json!({"data": summaries}))))
}

pub async fn revoke_api_key(
    State(state): State<AppState>,
    Path(credential_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<(HeaderMap, Json<Value>), AppError> {
    let client_ip = client_ip(&headers);
    let (ctx, decision) =
        authenticate(&state, &headers, &client_ip, &[Scope::DemographicsAdmin]).await?;

    let revoked = state
        .credential_store
        .revoke(credential_id, &ctx.tenant)
        .await?;
    if !revoked {
        return Err(AppError::NotFound);
    }

    let headers = rate_limit_headers(&decision);
    Ok((headers, Json(json!({"id": credential_id, "status": "revoked"}))))
}
