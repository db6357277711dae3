//! Inventory store: the only writer of `TicketType.remaining` after creation.

use uuid::Uuid;

use super::ReservationError;
use crate::ports::UnitOfWork;

/// Stock taken for a cart line, with the price read in the same statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    pub ticket_type_id: Uuid,
    pub quantity: i32,
    pub unit_price_minor: i64,
    pub remaining: i32,
}

/// Takes `quantity` units in one conditional decrement. Never reserves
/// partially: on shortage nothing changes and the caller learns how many
/// units are left.
pub async fn reserve(
    uow: &mut dyn UnitOfWork,
    ticket_type_id: Uuid,
    quantity: i32,
) -> Result<Reservation, ReservationError> {
    ensure_positive(quantity)?;
    if let Some(tt) = uow.decrement_remaining(ticket_type_id, quantity).await? {
        tracing::debug!(
            ticket_type_id = %ticket_type_id,
            quantity,
            remaining = tt.remaining,
            "inventory reserved"
        );
        return Ok(Reservation {
            ticket_type_id,
            quantity,
            unit_price_minor: tt.price_minor,
            remaining: tt.remaining,
        });
    }

    match uow.ticket_type(ticket_type_id).await? {
        Some(tt) => Err(ReservationError::InsufficientInventory {
            ticket_type_id,
            requested: quantity,
            available: tt.remaining,
        }),
        None => Err(ReservationError::TicketTypeNotFound(ticket_type_id)),
    }
}

/// Returns `quantity` units to stock. Remaining never exceeds capacity; an
/// overflow is clamped and logged.
pub async fn release(
    uow: &mut dyn UnitOfWork,
    ticket_type_id: Uuid,
    quantity: i32,
) -> Result<(), ReservationError> {
    ensure_positive(quantity)?;
    let restock = uow
        .increment_remaining(ticket_type_id, quantity)
        .await?
        .ok_or(ReservationError::TicketTypeNotFound(ticket_type_id))?;

    let overflow = i64::from(restock.previous) + i64::from(quantity) - i64::from(restock.capacity);
    if overflow > 0 {
        tracing::warn!(
            ticket_type_id = %ticket_type_id,
            quantity,
            previous = restock.previous,
            capacity = restock.capacity,
            overflow,
            "inventory release exceeded capacity, clamped"
        );
    } else {
        tracing::debug!(
            ticket_type_id = %ticket_type_id,
            quantity,
            remaining = restock.remaining,
            "inventory released"
        );
    }

    Ok(())
}

// A non-positive quantity would flip the conditional decrement into an increment.
fn ensure_positive(quantity: i32) -> Result<(), ReservationError> {
    if quantity <= 0 {
        return Err(ReservationError::InvalidQuantity(quantity));
    }
    Ok(())
}
