use axum::body::Body;
use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use uuid::Uuid;

/// Correlation id attached to a request's extensions, accepted from
/// `X-Correlation-ID` or freshly generated (§4.6 step 1).
#[derive(Debug, Clone)]
pub struct CorrelationId(pub String);

pub async fn attach_correlation_id(mut request: Request, next: Next) -> Response {
    let id = request
        .headers()
        .get("X-Correlation-ID")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    request.extensions_mut().insert(CorrelationId(id.clone()));

    let response = next.run(request).await;
    rewrite_request_id(response, &id).await
}

/// `AppError`'s `IntoResponse` impl has no access to this request's
/// extensions, so it stamps error envelopes with a fresh `requestId`.
/// Patch it here, where the real correlation id is in scope, so the
/// body and the `X-Correlation-ID` header always agree.
async fn rewrite_request_id(response: Response, id: &str) -> Response {
    let (mut parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(_) => return Response::from_parts(parts, Body::empty()),
    };

    let rewritten = match serde_json::from_slice::<serde_json::Value>(&bytes) {
        Ok(mut value) if value.get("requestId").is_some() => {
            value["requestId"] = serde_json::Value::String(id.to_string());
            serde_json::to_vec(&value).unwrap_or_else(|_| bytes.to_vec())
        }
        _ => bytes.to_vec(),
    };

    if let Ok(value) = HeaderValue::from_str(id) {
        parts.headers.insert("X-Correlation-ID", value);
    }
    if let Ok(value) = HeaderValue::from_str(&rewritten.len().to_string()) {
        parts.headers.insert(axum::http::header::CONTENT_LENGTH, value);
    }

    Response::from_parts(parts, Body::from(rewritten))
}
