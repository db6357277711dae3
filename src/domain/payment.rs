use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

/// Provider-returned payment data kept on a confirmed order for audit.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PaymentDetails {
    pub provider: String,
    pub reference: Option<String>,
    #[schema(value_type = Object)]
    pub metadata: serde_json::Value,
}

/// A provider notification that has been applied, keyed by the provider's event id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentEvent {
    pub event_id: String,
    pub checkout_ref: String,
    pub status: String,
    pub received_at: DateTime<Utc>,
}

impl PaymentEvent {
    pub fn new(event_id: String, checkout_ref: String, status: String) -> Self {
        Self {
            event_id,
            checkout_ref,
            status,
            received_at: Utc::now(),
        }
    }
}
