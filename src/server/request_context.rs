use axum::http::HeaderMap;

/// Best-effort originating address for rate-limiting/allow-list checks.
/// A production deployment terminates TLS and proxies through a load
/// balancer that sets `X-Forwarded-For`; this crate does not own that
/// infrastructure (§1 out-of-scope: TLS termination).
pub fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("X-Forwarded-For")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "0.0.0.0".to_string())
}
