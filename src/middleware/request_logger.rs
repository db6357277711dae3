use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";
const MAX_BODY_BYTES: usize = 64 * 1024;
const MAX_BODY_LOG_CHARS: usize = 1024;

#[derive(Debug, Clone, Copy, Default)]
pub struct RequestLogging {
    pub log_body: bool,
}

pub async fn request_logger_middleware(
    State(settings): State<RequestLogging>,
    mut req: Request,
    next: Next,
) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let method = req.method().clone();
    let uri = req.uri().clone();
    let start = Instant::now();

    // A uuid string is always a valid header value.
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        req.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    let span = tracing::info_span!("request", request_id = %request_id, method = %method, uri = %uri);

    if settings.log_body {
        let (parts, body) = req.into_parts();
        let bytes = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
            Ok(bytes) => bytes,
            Err(_) => {
                span.in_scope(|| tracing::warn!("Request body too large or failed to read"));
                return (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large").into_response();
            }
        };

        let sanitized_body = match serde_json::from_slice::<serde_json::Value>(&bytes) {
            Ok(json) => {
                let sanitized = crate::utils::sanitize::sanitize_json(&json);
                let text = serde_json::to_string(&sanitized)
                    .unwrap_or_else(|_| "[invalid json]".to_string());
                text.chars().take(MAX_BODY_LOG_CHARS).collect()
            }
            Err(_) => format!("[non-json, {} bytes]", bytes.len()),
        };

        span.in_scope(|| {
            tracing::info!(body_size = bytes.len(), body = %sanitized_body, "Incoming request")
        });
        req = Request::from_parts(parts, Body::from(bytes));
    } else {
        span.in_scope(|| tracing::info!("Incoming request"));
    }

    let response = next.run(req).instrument(span.clone()).await;

    let latency = start.elapsed();
    let status = response.status();
    span.in_scope(|| {
        tracing::info!(
            status = status.as_u16(),
            latency_ms = latency.as_millis() as u64,
            "Outgoing response"
        )
    });

    let (mut parts, body) = response.into_parts();
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        parts.headers.insert(REQUEST_ID_HEADER, value);
    }

    Response::from_parts(parts, body)
}
