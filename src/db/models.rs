//! Row types for SQLx. Not exposed outside the persistence layer; each one
//! converts into its domain type.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use crate::domain::{Event, Order, OrderLine, PaymentDetails, TicketSales, TicketType};
use crate::ports::StoreError;

#[derive(Debug, FromRow)]
pub struct EventRow {
    pub id: Uuid,
    pub producer_id: Uuid,
    pub name: String,
    pub venue: Option<String>,
    pub starts_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl EventRow {
    pub fn into_domain(self) -> Event {
        Event {
            id: self.id,
            producer_id: self.producer_id,
            name: self.name,
            venue: self.venue,
            starts_at: self.starts_at,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
pub struct TicketTypeRow {
    pub id: Uuid,
    pub event_id: Uuid,
    pub name: String,
    pub price_minor: i64,
    pub capacity: i32,
    pub remaining: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TicketTypeRow {
    pub fn into_domain(self) -> TicketType {
        TicketType {
            id: self.id,
            event_id: self.event_id,
            name: self.name,
            price_minor: self.price_minor,
            capacity: self.capacity,
            remaining: self.remaining,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
pub struct OrderRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub status: String,
    pub total_minor: i64,
    pub checkout_ref: Option<String>,
    pub checkout_expires_at: Option<DateTime<Utc>>,
    pub payment_provider: Option<String>,
    pub payment_reference: Option<String>,
    pub payment_metadata: Option<serde_json::Value>,
    pub cancel_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderRow {
    pub fn into_domain(self) -> Result<Order, StoreError> {
        let status = self
            .status
            .parse()
            .map_err(|e: String| StoreError::Corrupt(format!("order {}: {}", self.id, e)))?;

        let payment = self.payment_provider.map(|provider| PaymentDetails {
            provider,
            reference: self.payment_reference,
            metadata: self.payment_metadata.unwrap_or(serde_json::Value::Null),
        });

        Ok(Order {
            id: self.id,
            user_id: self.user_id,
            status,
            total_minor: self.total_minor,
            checkout_ref: self.checkout_ref,
            checkout_expires_at: self.checkout_expires_at,
            payment,
            cancel_reason: self.cancel_reason,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct OrderLineRow {
    pub id: Uuid,
    pub order_id: Uuid,
    pub ticket_type_id: Uuid,
    pub quantity: i32,
    pub unit_price_minor: i64,
    pub redemption_code: String,
    pub created_at: DateTime<Utc>,
}

impl OrderLineRow {
    pub fn into_domain(self) -> OrderLine {
        OrderLine {
            id: self.id,
            order_id: self.order_id,
            ticket_type_id: self.ticket_type_id,
            quantity: self.quantity,
            unit_price_minor: self.unit_price_minor,
            redemption_code: self.redemption_code,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
pub struct TicketSalesRow {
    pub ticket_type_id: Uuid,
    pub name: String,
    pub capacity: i32,
    pub remaining: i32,
    pub held: i64,
    pub sold: i64,
    pub gross_minor: i64,
}

impl TicketSalesRow {
    pub fn into_domain(self) -> TicketSales {
        TicketSales {
            ticket_type_id: self.ticket_type_id,
            name: self.name,
            capacity: self.capacity,
            remaining: self.remaining,
            held: self.held,
            sold: self.sold,
            gross_minor: self.gross_minor,
        }
    }
}
