use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use super::Pagination;
use crate::domain::{Order, OrderLine, OrderStatus, PaymentDetails};
use crate::error::{AppError, ErrorBody};
use crate::middleware::auth::CurrentUser;
use crate::services::reservation::OrderDetails;
use crate::validation::page;
use crate::AppState;

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderLineView {
    pub id: Uuid,
    pub ticket_type_id: Uuid,
    pub quantity: i32,
    pub unit_price: i64,
    pub subtotal: i64,
    /// Present once the order is confirmed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redemption_code: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderView {
    pub id: Uuid,
    pub status: OrderStatus,
    pub total: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment: Option<PaymentDetails>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub lines: Vec<OrderLineView>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderSummary {
    pub id: Uuid,
    pub status: OrderStatus,
    pub total: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderLineView {
    fn new(line: OrderLine, confirmed: bool) -> Self {
        Self {
            id: line.id,
            ticket_type_id: line.ticket_type_id,
            quantity: line.quantity,
            unit_price: line.unit_price_minor,
            subtotal: line.subtotal_minor(),
            redemption_code: confirmed.then_some(line.redemption_code),
        }
    }
}

impl From<OrderDetails> for OrderView {
    fn from(details: OrderDetails) -> Self {
        let OrderDetails { order, lines } = details;
        let confirmed = order.status == OrderStatus::Confirmed;
        Self {
            id: order.id,
            status: order.status,
            total: order.total_minor,
            checkout_ref: order.checkout_ref,
            expires_at: order.checkout_expires_at,
            payment: order.payment,
            cancel_reason: order.cancel_reason,
            created_at: order.created_at,
            updated_at: order.updated_at,
            lines: lines
                .into_iter()
                .map(|line| OrderLineView::new(line, confirmed))
                .collect(),
        }
    }
}

impl From<Order> for OrderSummary {
    fn from(order: Order) -> Self {
        Self {
            id: order.id,
            status: order.status,
            total: order.total_minor,
            created_at: order.created_at,
            updated_at: order.updated_at,
        }
    }
}

#[utoipa::path(
    get,
    path = "/orders",
    params(
        ("X-User-Id" = Uuid, Header, description = "Caller id"),
        ("limit" = Option<i64>, Query, description = "Page size, 1 to 100"),
        ("offset" = Option<i64>, Query, description = "Rows to skip")
    ),
    responses(
        (status = 200, description = "The caller's orders, newest first", body = [OrderSummary]),
        (status = 400, description = "Invalid paging", body = ErrorBody)
    ),
    tag = "Orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Query(pagination): Query<Pagination>,
) -> Result<Json<Vec<OrderSummary>>, AppError> {
    let (limit, offset) = page(pagination.limit, pagination.offset)?;
    let orders = state
        .reservations
        .orders_for_user(user_id, limit, offset)
        .await?;

    Ok(Json(orders.into_iter().map(OrderSummary::from).collect()))
}

#[utoipa::path(
    get,
    path = "/orders/{orderId}",
    params(
        ("orderId" = Uuid, Path, description = "Order id"),
        ("X-User-Id" = Uuid, Header, description = "Caller id")
    ),
    responses(
        (status = 200, description = "Order with its lines", body = OrderView),
        (status = 404, description = "Order not found", body = ErrorBody)
    ),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(order_id): Path<Uuid>,
) -> Result<Json<OrderView>, AppError> {
    let details = state.reservations.order_for_user(user_id, order_id).await?;
    Ok(Json(OrderView::from(details)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn details(status: OrderStatus) -> OrderDetails {
        let mut order = Order::open(Uuid::new_v4());
        order.status = status;
        let line = OrderLine::new(order.id, Uuid::new_v4(), 2, 1_250);
        order.total_minor = line.subtotal_minor();
        OrderDetails {
            order,
            lines: vec![line],
        }
    }

    #[test]
    fn redemption_codes_hidden_until_confirmed() {
        let open = serde_json::to_value(OrderView::from(details(OrderStatus::Open))).unwrap();
        assert!(open["lines"][0].get("redemptionCode").is_none());
        assert_eq!(open["lines"][0]["subtotal"], 2_500);
        assert_eq!(open["status"], "open");

        let confirmed =
            serde_json::to_value(OrderView::from(details(OrderStatus::Confirmed))).unwrap();
        assert!(confirmed["lines"][0]["redemptionCode"].is_string());
    }
}
