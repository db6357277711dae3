//! Events and the ticket types sold for them.

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

/// An event published by a producer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: Uuid,
    pub producer_id: Uuid,
    pub name: String,
    pub venue: Option<String>,
    pub starts_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Event {
    pub fn new(
        producer_id: Uuid,
        name: String,
        venue: Option<String>,
        starts_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            producer_id,
            name,
            venue,
            starts_at,
            created_at: Utc::now(),
        }
    }

    pub fn is_produced_by(&self, user_id: Uuid) -> bool {
        self.producer_id == user_id
    }
}

/// A purchasable category of admission with a fixed capacity.
///
/// Prices are integer minor currency units. `remaining` only changes
/// through the inventory store once the row exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TicketType {
    pub id: Uuid,
    pub event_id: Uuid,
    pub name: String,
    #[serde(rename = "unitPrice")]
    pub price_minor: i64,
    pub capacity: i32,
    pub remaining: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TicketType {
    /// A fresh ticket type starts with its full capacity available.
    pub fn new(event_id: Uuid, name: String, price_minor: i64, capacity: i32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            event_id,
            name,
            price_minor,
            capacity,
            remaining: capacity,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn allocated(&self) -> i32 {
        self.capacity - self.remaining
    }

    pub fn is_sold_out(&self) -> bool {
        self.remaining == 0
    }
}

/// Producer-facing allocation summary for one ticket type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TicketSales {
    pub ticket_type_id: Uuid,
    pub name: String,
    pub capacity: i32,
    pub remaining: i32,
    /// Quantity sitting in open carts or awaiting payment.
    pub held: i64,
    /// Quantity in confirmed orders.
    pub sold: i64,
    pub gross_minor: i64,
}
