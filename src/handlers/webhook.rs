use axum::{body::Bytes, extract::State, http::HeaderMap, Json};
use serde::Serialize;
use utoipa::ToSchema;

use crate::domain::OrderStatus;
use crate::error::{AppError, ErrorBody};
use crate::services::payment_notifier::{PaymentNotification, SIGNATURE_HEADER};
use crate::services::NotificationOutcome;
use crate::AppState;

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WebhookResponse {
    /// One of `applied`, `unchanged`, `duplicate`, `ignored`.
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<OrderStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl From<NotificationOutcome> for WebhookResponse {
    fn from(outcome: NotificationOutcome) -> Self {
        let label = outcome.as_str().to_string();
        match outcome {
            NotificationOutcome::Applied(status) | NotificationOutcome::Unchanged(status) => Self {
                outcome: label,
                status: Some(status),
                reason: None,
            },
            NotificationOutcome::Duplicate => Self {
                outcome: label,
                status: None,
                reason: None,
            },
            NotificationOutcome::Ignored(reason) => Self {
                outcome: label,
                status: None,
                reason: Some(reason),
            },
        }
    }
}

/// Payment provider callback. The body is read raw so the signature can be
/// checked over the exact bytes the provider signed.
#[utoipa::path(
    post,
    path = "/webhooks/payments",
    request_body = PaymentNotification,
    params(("X-Signature" = String, Header, description = "sha256=<hex HMAC-SHA256 of the body>")),
    responses(
        (status = 200, description = "Notification handled", body = WebhookResponse),
        (status = 400, description = "Malformed payload", body = ErrorBody),
        (status = 401, description = "Missing or invalid signature", body = ErrorBody),
        (status = 503, description = "Temporarily unavailable, retry later", body = ErrorBody)
    ),
    tag = "Webhooks"
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    if let Err(e) = state.notifier.verify(&body, signature) {
        tracing::warn!(error = %e, body_size = body.len(), "payment webhook signature rejected");
        return Err(AppError::Unauthorized(e.to_string()));
    }

    let notification: PaymentNotification = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("invalid payment notification: {}", e)))?;

    tracing::info!(
        event_id = %notification.event_id,
        checkout_ref = %notification.checkout_ref,
        status = notification.status.as_str(),
        "payment notification received"
    );

    let outcome = state.notifier.handle(notification).await?;
    Ok(Json(outcome.into()))
}
