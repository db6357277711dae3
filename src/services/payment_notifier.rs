//! Translates payment provider notifications into checkout transitions.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error;
use utoipa::ToSchema;

use super::{ReservationError, ReservationService};
use crate::domain::{OrderStatus, PaymentDetails, PaymentEvent, Transition};
use crate::ports::Datastore;
use std::sync::Arc;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-signature";
const SIGNATURE_PREFIX: &str = "sha256=";
const UNSPECIFIED_PROVIDER: &str = "unspecified";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("missing signature header")]
    Missing,

    #[error("signature is not valid hex")]
    Malformed,

    #[error("webhook secret is not usable")]
    InvalidSecret,

    #[error("signature does not match payload")]
    Mismatch,
}

/// Checks `header` (`sha256=<hex>`, prefix optional) against the HMAC-SHA256
/// of `body`. The comparison runs in constant time.
pub fn verify_signature(secret: &str, body: &[u8], header: Option<&str>) -> Result<(), SignatureError> {
    let header = header.map(str::trim).ok_or(SignatureError::Missing)?;
    let hex_digest = header.strip_prefix(SIGNATURE_PREFIX).unwrap_or(header);
    let expected = hex::decode(hex_digest).map_err(|_| SignatureError::Malformed)?;

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::InvalidSecret)?;
    mac.update(body);
    mac.verify_slice(&expected).map_err(|_| SignatureError::Mismatch)
}

/// Provider-reported payment status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProviderStatus {
    Approved,
    Rejected,
    Cancelled,
    Expired,
    Pending,
    InProcess,
    #[serde(other)]
    Other,
}

impl ProviderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderStatus::Approved => "approved",
            ProviderStatus::Rejected => "rejected",
            ProviderStatus::Cancelled => "cancelled",
            ProviderStatus::Expired => "expired",
            ProviderStatus::Pending => "pending",
            ProviderStatus::InProcess => "in_process",
            ProviderStatus::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PaymentNotification {
    pub event_id: String,
    pub checkout_ref: String,
    pub status: ProviderStatus,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub provider_payment_id: Option<String>,
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub metadata: Option<serde_json::Value>,
}

impl PaymentNotification {
    fn payment_details(&self) -> PaymentDetails {
        PaymentDetails {
            provider: self
                .provider
                .clone()
                .unwrap_or_else(|| UNSPECIFIED_PROVIDER.to_string()),
            reference: self.provider_payment_id.clone(),
            metadata: self.metadata.clone().unwrap_or(serde_json::Value::Null),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationOutcome {
    Applied(OrderStatus),
    Unchanged(OrderStatus),
    Duplicate,
    Ignored(String),
}

impl NotificationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationOutcome::Applied(_) => "applied",
            NotificationOutcome::Unchanged(_) => "unchanged",
            NotificationOutcome::Duplicate => "duplicate",
            NotificationOutcome::Ignored(_) => "ignored",
        }
    }
}

impl From<Transition> for NotificationOutcome {
    fn from(transition: Transition) -> Self {
        match transition {
            Transition::Applied(status) => NotificationOutcome::Applied(status),
            Transition::Unchanged(status) => NotificationOutcome::Unchanged(status),
        }
    }
}

#[derive(Clone)]
pub struct PaymentNotifier {
    store: Arc<dyn Datastore>,
    reservations: ReservationService,
    secret: String,
}

impl PaymentNotifier {
    pub fn new(store: Arc<dyn Datastore>, reservations: ReservationService, secret: String) -> Self {
        Self {
            store,
            reservations,
            secret,
        }
    }

    pub fn verify(&self, body: &[u8], signature: Option<&str>) -> Result<(), SignatureError> {
        verify_signature(&self.secret, body, signature)
    }

    /// Applies a verified notification. Only transient datastore failures
    /// are returned as errors so the provider retries them; every business
    /// outcome is reported as a [`NotificationOutcome`].
    pub async fn handle(
        &self,
        notification: PaymentNotification,
    ) -> Result<NotificationOutcome, ReservationError> {
        if self.store.payment_event_seen(&notification.event_id).await? {
            tracing::info!(
                event_id = %notification.event_id,
                checkout_ref = %notification.checkout_ref,
                "duplicate payment notification"
            );
            return Ok(NotificationOutcome::Duplicate);
        }

        let outcome = match self.dispatch(&notification).await {
            Ok(outcome) => outcome,
            Err(ReservationError::InvalidState { order_id, from, action }) => {
                tracing::warn!(
                    event_id = %notification.event_id,
                    order_id = %order_id,
                    status = notification.status.as_str(),
                    current = %from,
                    action,
                    "payment notification conflicts with order state"
                );
                NotificationOutcome::Ignored(format!("order is {}", from))
            }
            Err(ReservationError::OrderNotFound(order_id)) => {
                tracing::warn!(order_id = %order_id, "payment notification for vanished order");
                NotificationOutcome::Ignored("unknown order".to_string())
            }
            Err(e) => return Err(e),
        };

        let event = PaymentEvent::new(
            notification.event_id.clone(),
            notification.checkout_ref.clone(),
            notification.status.as_str().to_string(),
        );
        if !self.store.record_payment_event(&event).await? {
            tracing::debug!(event_id = %event.event_id, "payment event recorded concurrently");
        }

        Ok(outcome)
    }

    async fn dispatch(
        &self,
        notification: &PaymentNotification,
    ) -> Result<NotificationOutcome, ReservationError> {
        let Some(order_id) = self
            .reservations
            .order_id_for_checkout(&notification.checkout_ref)
            .await?
        else {
            tracing::warn!(
                event_id = %notification.event_id,
                checkout_ref = %notification.checkout_ref,
                "payment notification for unknown checkout"
            );
            return Ok(NotificationOutcome::Ignored("unknown checkout reference".to_string()));
        };

        let transition = match notification.status {
            ProviderStatus::Approved => {
                self.reservations
                    .confirm_payment(order_id, notification.payment_details())
                    .await?
            }
            ProviderStatus::Rejected | ProviderStatus::Cancelled | ProviderStatus::Expired => {
                self.reservations
                    .fail_payment(order_id, notification.status.as_str())
                    .await?
            }
            ProviderStatus::Pending | ProviderStatus::InProcess | ProviderStatus::Other => {
                tracing::info!(
                    event_id = %notification.event_id,
                    order_id = %order_id,
                    status = notification.status.as_str(),
                    "non-final payment status ignored"
                );
                return Ok(NotificationOutcome::Ignored(format!(
                    "status {} is not final",
                    notification.status.as_str()
                )));
            }
        };

        Ok(transition.into())
    }
}
