//! Cart aggregate: the user's open order and its lines.
//!
//! Every function runs inside the caller's unit of work; nothing is visible
//! until the caller commits.

use chrono::Utc;
use uuid::Uuid;

use super::{inventory, ReservationError};
use crate::domain::{order_total, Order, OrderLine};
use crate::ports::{StoreError, UnitOfWork};

/// Locks the user's open order, creating it on first use.
pub async fn get_or_create_open_order(
    uow: &mut dyn UnitOfWork,
    user_id: Uuid,
) -> Result<Order, ReservationError> {
    if let Some(order) = uow.lock_open_order(user_id).await? {
        return Ok(order);
    }

    let fresh = Order::open(user_id);
    if uow.insert_order(&fresh).await? {
        tracing::info!(order_id = %fresh.id, user_id = %user_id, "cart created");
        return Ok(fresh);
    }

    // A concurrent request created it first.
    uow.lock_open_order(user_id).await?.ok_or_else(|| {
        ReservationError::from(StoreError::Conflict(format!(
            "open order for user {} vanished",
            user_id
        )))
    })
}

/// Reserves stock and, only if that succeeds, adds a line priced at the
/// current unit price.
pub async fn add_line(
    uow: &mut dyn UnitOfWork,
    order: &mut Order,
    ticket_type_id: Uuid,
    quantity: i32,
) -> Result<OrderLine, ReservationError> {
    order
        .ensure_open("add tickets to")
        .map_err(|t| ReservationError::invalid_state(order.id, t))?;

    let reservation = inventory::reserve(uow, ticket_type_id, quantity).await?;
    let line = OrderLine::new(order.id, ticket_type_id, quantity, reservation.unit_price_minor);
    uow.insert_line(&line).await?;
    recompute_total(uow, order).await?;

    Ok(line)
}

/// Deletes a line, returns its stock and recomputes the total.
pub async fn remove_line(
    uow: &mut dyn UnitOfWork,
    order: &mut Order,
    line_id: Uuid,
) -> Result<OrderLine, ReservationError> {
    order
        .ensure_open("remove tickets from")
        .map_err(|t| ReservationError::invalid_state(order.id, t))?;

    let line = uow
        .delete_line(order.id, line_id)
        .await?
        .ok_or(ReservationError::LineNotFound(line_id))?;
    inventory::release(uow, line.ticket_type_id, line.quantity).await?;
    recompute_total(uow, order).await?;

    Ok(line)
}

/// Derives the total from the current lines and persists it.
pub async fn recompute_total(
    uow: &mut dyn UnitOfWork,
    order: &mut Order,
) -> Result<i64, ReservationError> {
    let lines = uow.order_lines(order.id).await?;
    order.total_minor = order_total(&lines);
    order.updated_at = Utc::now();
    uow.save_order(order).await?;
    Ok(order.total_minor)
}
