use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::Pagination;
use crate::domain::{Event, TicketSales, TicketType};
use crate::error::{AppError, ErrorBody};
use crate::middleware::auth::CurrentUser;
use crate::services::catalog::{EventListing, NewEvent, NewTicketType};
use crate::validation::{
    clean_name, page, validate_capacity, validate_future, validate_price_minor, ApiJson,
    ValidationError, EVENT_NAME_MAX_LEN, TICKET_TYPE_NAME_MAX_LEN, VENUE_MAX_LEN,
};
use crate::AppState;

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateEventRequest {
    pub name: String,
    #[serde(default)]
    pub venue: Option<String>,
    pub starts_at: DateTime<Utc>,
}

impl CreateEventRequest {
    fn validate(self, now: DateTime<Utc>) -> Result<NewEvent, ValidationError> {
        let name = clean_name("name", &self.name, EVENT_NAME_MAX_LEN)?;
        let venue = self
            .venue
            .map(|venue| clean_name("venue", &venue, VENUE_MAX_LEN))
            .transpose()?;
        validate_future("startsAt", self.starts_at, now)?;

        Ok(NewEvent {
            name,
            venue,
            starts_at: self.starts_at,
        })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateTicketTypeRequest {
    pub name: String,
    pub unit_price: i64,
    pub capacity: i32,
}

impl CreateTicketTypeRequest {
    fn validate(self) -> Result<NewTicketType, ValidationError> {
        let name = clean_name("name", &self.name, TICKET_TYPE_NAME_MAX_LEN)?;
        validate_price_minor(self.unit_price)?;
        validate_capacity(self.capacity)?;

        Ok(NewTicketType {
            name,
            price_minor: self.unit_price,
            capacity: self.capacity,
        })
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EventView {
    pub event: Event,
    pub ticket_types: Vec<TicketType>,
}

impl From<EventListing> for EventView {
    fn from(listing: EventListing) -> Self {
        Self {
            event: listing.event,
            ticket_types: listing.ticket_types,
        }
    }
}

#[utoipa::path(
    get,
    path = "/events",
    params(
        ("limit" = Option<i64>, Query, description = "Page size, 1 to 100"),
        ("offset" = Option<i64>, Query, description = "Rows to skip")
    ),
    responses((status = 200, description = "Events by start time", body = [Event])),
    tag = "Events"
)]
pub async fn list_events(
    State(state): State<AppState>,
    Query(pagination): Query<Pagination>,
) -> Result<Json<Vec<Event>>, AppError> {
    let (limit, offset) = page(pagination.limit, pagination.offset)?;
    Ok(Json(state.catalog.list_events(limit, offset).await?))
}

#[utoipa::path(
    get,
    path = "/events/{eventId}",
    params(("eventId" = Uuid, Path, description = "Event id")),
    responses(
        (status = 200, description = "Event with ticket availability", body = EventView),
        (status = 404, description = "Event not found", body = ErrorBody)
    ),
    tag = "Events"
)]
pub async fn get_event(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
) -> Result<Json<EventView>, AppError> {
    let listing = state.catalog.event_with_ticket_types(event_id).await?;
    Ok(Json(listing.into()))
}

#[utoipa::path(
    post,
    path = "/producer/events",
    request_body = CreateEventRequest,
    params(("X-User-Id" = Uuid, Header, description = "Producer id")),
    responses(
        (status = 201, description = "Event created", body = Event),
        (status = 400, description = "Invalid request", body = ErrorBody)
    ),
    tag = "Producer"
)]
pub async fn create_event(
    State(state): State<AppState>,
    CurrentUser(producer_id): CurrentUser,
    ApiJson(request): ApiJson<CreateEventRequest>,
) -> Result<impl IntoResponse, AppError> {
    let new_event = request.validate(Utc::now())?;
    let event = state.catalog.create_event(producer_id, new_event).await?;
    Ok((StatusCode::CREATED, Json(event)))
}

#[utoipa::path(
    post,
    path = "/producer/events/{eventId}/ticket-types",
    request_body = CreateTicketTypeRequest,
    params(
        ("eventId" = Uuid, Path, description = "Event id"),
        ("X-User-Id" = Uuid, Header, description = "Producer id")
    ),
    responses(
        (status = 201, description = "Ticket type created", body = TicketType),
        (status = 400, description = "Invalid request", body = ErrorBody),
        (status = 403, description = "Caller does not produce this event", body = ErrorBody),
        (status = 404, description = "Event not found", body = ErrorBody)
    ),
    tag = "Producer"
)]
pub async fn add_ticket_type(
    State(state): State<AppState>,
    CurrentUser(producer_id): CurrentUser,
    Path(event_id): Path<Uuid>,
    ApiJson(request): ApiJson<CreateTicketTypeRequest>,
) -> Result<impl IntoResponse, AppError> {
    let new_type = request.validate()?;
    let ticket_type = state
        .catalog
        .add_ticket_type(producer_id, event_id, new_type)
        .await?;
    Ok((StatusCode::CREATED, Json(ticket_type)))
}

#[utoipa::path(
    get,
    path = "/producer/events/{eventId}/sales",
    params(
        ("eventId" = Uuid, Path, description = "Event id"),
        ("X-User-Id" = Uuid, Header, description = "Producer id")
    ),
    responses(
        (status = 200, description = "Sales per ticket type", body = [TicketSales]),
        (status = 403, description = "Caller does not produce this event", body = ErrorBody),
        (status = 404, description = "Event not found", body = ErrorBody)
    ),
    tag = "Producer"
)]
pub async fn event_sales(
    State(state): State<AppState>,
    CurrentUser(producer_id): CurrentUser,
    Path(event_id): Path<Uuid>,
) -> Result<Json<Vec<TicketSales>>, AppError> {
    Ok(Json(state.catalog.sales(producer_id, event_id).await?))
}
