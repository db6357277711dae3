use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::orders::OrderView;
use crate::error::{AppError, ErrorBody};
use crate::middleware::auth::CurrentUser;
use crate::services::reservation::AddToCart;
use crate::validation::{validate_quantity, ApiJson};
use crate::AppState;

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AddItemRequest {
    pub ticket_type_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AddItemResponse {
    pub line_id: Uuid,
    pub order_id: Uuid,
    pub unit_price: i64,
    pub quantity: i32,
    pub order_total: i64,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RemoveItemResponse {
    pub order_id: Uuid,
    pub new_total: i64,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutResponse {
    pub order_id: Uuid,
    pub checkout_ref: String,
    pub total: i64,
    pub expires_at: DateTime<Utc>,
}

#[utoipa::path(
    post,
    path = "/cart/items",
    request_body = AddItemRequest,
    params(("X-User-Id" = Uuid, Header, description = "Caller id")),
    responses(
        (status = 201, description = "Tickets reserved and added to the cart", body = AddItemResponse),
        (status = 400, description = "Invalid request", body = ErrorBody),
        (status = 404, description = "Unknown ticket type", body = ErrorBody),
        (status = 409, description = "Not enough tickets left", body = ErrorBody)
    ),
    tag = "Cart"
)]
pub async fn add_item(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    ApiJson(request): ApiJson<AddItemRequest>,
) -> Result<impl IntoResponse, AppError> {
    validate_quantity(request.quantity, state.config.max_line_quantity)?;

    let added = state
        .reservations
        .add_to_cart(AddToCart {
            user_id,
            ticket_type_id: request.ticket_type_id,
            quantity: request.quantity,
        })
        .await?;

    let body = AddItemResponse {
        line_id: added.line.id,
        order_id: added.order_id,
        unit_price: added.line.unit_price_minor,
        quantity: added.line.quantity,
        order_total: added.order_total_minor,
    };
    Ok((StatusCode::CREATED, Json(body)))
}

#[utoipa::path(
    delete,
    path = "/cart/items/{lineId}",
    params(
        ("lineId" = Uuid, Path, description = "Cart line id"),
        ("X-User-Id" = Uuid, Header, description = "Caller id")
    ),
    responses(
        (status = 200, description = "Line removed and tickets released", body = RemoveItemResponse),
        (status = 404, description = "No such line in the open cart", body = ErrorBody),
        (status = 409, description = "Order already processed", body = ErrorBody)
    ),
    tag = "Cart"
)]
pub async fn remove_item(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(line_id): Path<Uuid>,
) -> Result<Json<RemoveItemResponse>, AppError> {
    let order = state.reservations.remove_from_cart(user_id, line_id).await?;

    Ok(Json(RemoveItemResponse {
        order_id: order.id,
        new_total: order.total_minor,
    }))
}

#[utoipa::path(
    post,
    path = "/cart/checkout",
    params(("X-User-Id" = Uuid, Header, description = "Caller id")),
    responses(
        (status = 200, description = "Checkout started", body = CheckoutResponse),
        (status = 400, description = "Cart is empty", body = ErrorBody)
    ),
    tag = "Cart"
)]
pub async fn checkout(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
) -> Result<Json<CheckoutResponse>, AppError> {
    let checkout = state.reservations.initiate_checkout(user_id).await?;

    Ok(Json(CheckoutResponse {
        order_id: checkout.order_id,
        checkout_ref: checkout.checkout_ref,
        total: checkout.total_minor,
        expires_at: checkout.expires_at,
    }))
}

#[utoipa::path(
    get,
    path = "/cart",
    params(("X-User-Id" = Uuid, Header, description = "Caller id")),
    responses(
        (status = 200, description = "The open cart", body = OrderView),
        (status = 404, description = "No open cart", body = ErrorBody)
    ),
    tag = "Cart"
)]
pub async fn get_cart(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
) -> Result<Json<OrderView>, AppError> {
    let details = state
        .reservations
        .cart(user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("no open cart".to_string()))?;

    Ok(Json(OrderView::from(details)))
}

#[utoipa::path(
    delete,
    path = "/cart",
    params(("X-User-Id" = Uuid, Header, description = "Caller id")),
    responses(
        (status = 200, description = "Cart cancelled and tickets released", body = OrderView),
        (status = 404, description = "No open cart", body = ErrorBody)
    ),
    tag = "Cart"
)]
pub async fn abandon_cart(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
) -> Result<Json<OrderView>, AppError> {
    let order = state
        .reservations
        .abandon(user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("no open cart".to_string()))?;

    let details = state.reservations.order_for_user(user_id, order.id).await?;
    Ok(Json(OrderView::from(details)))
}
