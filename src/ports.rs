//! Datastore ports.
//!
//! Services only talk to persistence through these traits. A [`UnitOfWork`]
//! is one atomic batch of writes: nothing it did is visible to others until
//! [`UnitOfWork::commit`], and dropping it without committing discards
//! everything.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{Event, Order, OrderLine, PaymentEvent, TicketSales, TicketType};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("datastore call timed out")]
    Timeout,

    #[error("datastore unavailable: {0}")]
    Unavailable(String),

    #[error("conflicting write: {0}")]
    Conflict(String),

    #[error("datastore error: {0}")]
    Backend(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Transient failures may succeed when the whole unit of work is retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Timeout | StoreError::Unavailable(_))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Ticket type quantities around a release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Restock {
    pub previous: i32,
    pub remaining: i32,
    pub capacity: i32,
}

#[async_trait]
pub trait UnitOfWork: Send {
    async fn ticket_type(&mut self, id: Uuid) -> StoreResult<Option<TicketType>>;

    /// Atomically subtracts `quantity` when at least that much remains.
    /// Returns the updated row, or `None` when stock is short or the id is unknown.
    async fn decrement_remaining(
        &mut self,
        ticket_type_id: Uuid,
        quantity: i32,
    ) -> StoreResult<Option<TicketType>>;

    /// Adds `quantity` back, never beyond capacity. `None` for an unknown id.
    async fn increment_remaining(
        &mut self,
        ticket_type_id: Uuid,
        quantity: i32,
    ) -> StoreResult<Option<Restock>>;

    /// Inserts a new order. Returns `false` when the user already has an open one.
    async fn insert_order(&mut self, order: &Order) -> StoreResult<bool>;

    async fn save_order(&mut self, order: &Order) -> StoreResult<()>;

    async fn find_order(&mut self, id: Uuid) -> StoreResult<Option<Order>>;

    /// Like `find_order`, but holds the row until the unit of work ends.
    async fn lock_order(&mut self, id: Uuid) -> StoreResult<Option<Order>>;

    async fn find_open_order(&mut self, user_id: Uuid) -> StoreResult<Option<Order>>;

    async fn lock_open_order(&mut self, user_id: Uuid) -> StoreResult<Option<Order>>;

    async fn find_order_by_checkout_ref(&mut self, checkout_ref: &str)
        -> StoreResult<Option<Order>>;

    async fn orders_for_user(
        &mut self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Order>>;

    /// Ids of `awaiting_payment` orders whose checkout expired before `now`, oldest first.
    async fn expired_checkouts(&mut self, now: DateTime<Utc>, limit: i64) -> StoreResult<Vec<Uuid>>;

    async fn order_lines(&mut self, order_id: Uuid) -> StoreResult<Vec<OrderLine>>;

    async fn insert_line(&mut self, line: &OrderLine) -> StoreResult<()>;

    /// Deletes a line of the given order, returning it if it existed.
    async fn delete_line(&mut self, order_id: Uuid, line_id: Uuid)
        -> StoreResult<Option<OrderLine>>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;
}

#[async_trait]
pub trait Datastore: Send + Sync {
    async fn begin(&self) -> StoreResult<Box<dyn UnitOfWork>>;

    async fn ping(&self) -> StoreResult<()>;

    async fn insert_event(&self, event: &Event) -> StoreResult<()>;

    async fn event(&self, id: Uuid) -> StoreResult<Option<Event>>;

    /// Events ordered by start time.
    async fn list_events(&self, limit: i64, offset: i64) -> StoreResult<Vec<Event>>;

    async fn insert_ticket_type(&self, ticket_type: &TicketType) -> StoreResult<()>;

    async fn ticket_type(&self, id: Uuid) -> StoreResult<Option<TicketType>>;

    async fn ticket_types_for_event(&self, event_id: Uuid) -> StoreResult<Vec<TicketType>>;

    async fn ticket_sales(&self, event_id: Uuid) -> StoreResult<Vec<TicketSales>>;

    async fn payment_event_seen(&self, event_id: &str) -> StoreResult<bool>;

    /// Returns `false` when the event id was already recorded.
    async fn record_payment_event(&self, event: &PaymentEvent) -> StoreResult<bool>;
}
