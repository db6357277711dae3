pub mod cart;
pub mod events;
pub mod orders;
pub mod webhook;

use crate::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use utoipa::{OpenApi, ToSchema};

#[derive(Debug, Default, Deserialize)]
pub struct Pagination {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub db: String,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthStatus),
        (status = 503, description = "Service is unhealthy", body = HealthStatus)
    ),
    tag = "Health"
)]
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let (status_code, status, db) = match state.store.ping().await {
        Ok(()) => (StatusCode::OK, "healthy", "connected"),
        Err(e) => {
            tracing::warn!(error = %e, "health check could not reach datastore");
            (StatusCode::SERVICE_UNAVAILABLE, "unhealthy", "disconnected")
        }
    };

    let health_response = HealthStatus {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        db: db.to_string(),
    };

    (status_code, Json(health_response))
}

#[derive(OpenApi)]
#[openapi(
    info(title = "ticketbooth", description = "Ticket reservation and checkout API"),
    paths(
        health,
        cart::add_item,
        cart::remove_item,
        cart::checkout,
        cart::get_cart,
        cart::abandon_cart,
        orders::list_orders,
        orders::get_order,
        events::list_events,
        events::get_event,
        events::create_event,
        events::add_ticket_type,
        events::event_sales,
        webhook::payment_webhook,
    ),
    components(schemas(
        HealthStatus,
        crate::error::ErrorBody,
        crate::domain::Event,
        crate::domain::TicketType,
        crate::domain::TicketSales,
        crate::domain::OrderStatus,
        crate::domain::PaymentDetails,
        cart::AddItemRequest,
        cart::AddItemResponse,
        cart::RemoveItemResponse,
        cart::CheckoutResponse,
        orders::OrderView,
        orders::OrderLineView,
        orders::OrderSummary,
        events::CreateEventRequest,
        events::CreateTicketTypeRequest,
        events::EventView,
        crate::services::payment_notifier::PaymentNotification,
        crate::services::payment_notifier::ProviderStatus,
        webhook::WebhookResponse,
    )),
    tags(
        (name = "Cart", description = "Cart and checkout"),
        (name = "Orders", description = "Order history"),
        (name = "Events", description = "Public catalog"),
        (name = "Producer", description = "Event management for producers"),
        (name = "Webhooks", description = "Payment provider callbacks"),
        (name = "Health", description = "Liveness")
    )
)]
pub struct ApiDoc;

pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
