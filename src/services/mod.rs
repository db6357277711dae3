pub mod cart;
pub mod catalog;
pub mod expiry;
pub mod inventory;
pub mod payment_notifier;
pub mod reservation;

pub use catalog::{CatalogError, CatalogService};
pub use expiry::run_expiry_sweeper;
pub use payment_notifier::{NotificationOutcome, PaymentNotifier};
pub use reservation::{ReservationService, RetryPolicy};

use thiserror::Error;
use uuid::Uuid;

use crate::domain::{InvalidTransition, OrderStatus};
use crate::ports::StoreError;

/// Failures of the cart, inventory and checkout operations.
#[derive(Debug, Error)]
pub enum ReservationError {
    #[error("only {available} tickets left for ticket type {ticket_type_id} ({requested} requested)")]
    InsufficientInventory {
        ticket_type_id: Uuid,
        requested: i32,
        available: i32,
    },

    #[error("ticket quantity must be positive, got {0}")]
    InvalidQuantity(i32),

    #[error("ticket type {0} not found")]
    TicketTypeNotFound(Uuid),

    #[error("order {0} not found")]
    OrderNotFound(Uuid),

    #[error("order line {0} not found")]
    LineNotFound(Uuid),

    #[error("cart is empty")]
    EmptyCart,

    #[error("cannot {action} order {order_id} while it is {from}")]
    InvalidState {
        order_id: Uuid,
        from: OrderStatus,
        action: &'static str,
    },

    #[error("transient datastore failure: {0}")]
    TransientStore(StoreError),

    #[error("datastore failure: {0}")]
    Store(StoreError),
}

impl ReservationError {
    pub fn invalid_state(order_id: Uuid, transition: InvalidTransition) -> Self {
        ReservationError::InvalidState {
            order_id,
            from: transition.from,
            action: transition.action,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ReservationError::TransientStore(_))
    }
}

impl From<StoreError> for ReservationError {
    fn from(err: StoreError) -> Self {
        if err.is_transient() {
            ReservationError::TransientStore(err)
        } else {
            ReservationError::Store(err)
        }
    }
}
