use axum::http::{HeaderMap, HeaderValue};
use chrono::Utc;

use crate::domain::{CredentialFailure, RateLimitDecision, Scope, TenantContext};
use crate::error::AppError;
use crate::server::AppState;

impl From<CredentialFailure> for AppError {
    fn from(failure: CredentialFailure) -> Self {
        match failure {
            CredentialFailure::Malformed | CredentialFailure::NotFound => AppError::MissingApiKey,
            CredentialFailure::HashMismatch => AppError::InvalidApiKey("credential not recognized"),
            CredentialFailure::StatusNotActive => AppError::InvalidApiKey("credential is not active"),
            CredentialFailure::Expired => AppError::InvalidApiKey("credential has expired"),
            CredentialFailure::IpNotAllowed => {
                AppError::Forbidden("source address not allowed for this credential")
            }
            CredentialFailure::ScopesInsufficient => {
                AppError::Forbidden("credential lacks a required scope")
            }
        }
    }
}

/// Steps 2-4 of §4.6's request pipeline: authenticate via C1, authorize
/// against `required_scopes`, then consult C2. Returns the resolved
/// identity and its rate-limit decision so handlers can attach
/// `X-RateLimit-*` headers to both success and error responses.
pub async fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
    client_ip: &str,
    required_scopes: &[Scope],
) -> Result<(TenantContext, RateLimitDecision), AppError> {
    let presented = headers
        .get("X-API-Key")
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::MissingApiKey)?;

    let ctx = state
        .credential_store
        .resolve(presented, client_ip, required_scopes)
        .await?;

    let decision = state
        .rate_limiter
        .try_consume(ctx.credential_id, &ctx.rate_limits)
        .await;

    if !decision.allowed {
        return Err(AppError::RateLimited {
            retry_after_secs: (decision.reset_at - Utc::now()).num_seconds().max(0) as u64,
            limit: decision.limit,
            remaining: decision.remaining,
            reset_at: decision.reset_at,
            window: decision.window.as_str(),
        });
    }

    Ok((ctx, decision))
}

/// `X-RateLimit-{Limit,Remaining,Reset,Window}`, attached to every
/// authenticated response (§6.1).
pub fn rate_limit_headers(decision: &RateLimitDecision) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        "X-RateLimit-Limit",
        HeaderValue::from_str(&decision.limit.to_string()).unwrap(),
    );
    headers.insert(
        "X-RateLimit-Remaining",
        HeaderValue::from_str(&decision.remaining.to_string()).unwrap(),
    );
    headers.insert(
        "X-RateLimit-Reset",
        HeaderValue::from_str(&decision.reset_at.timestamp().to_string()).unwrap(),
    );
    headers.insert(
        "X-RateLimit-Window",
        HeaderValue::from_str(decision.window.as_str()).unwrap(),
    );
    headers
}
