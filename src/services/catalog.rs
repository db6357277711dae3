//! Producer-facing catalog: events, their ticket types and sales figures.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{Event, TicketSales, TicketType};
use crate::ports::{Datastore, StoreError};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("event {0} not found")]
    EventNotFound(Uuid),

    #[error("event {event_id} belongs to another producer")]
    NotEventProducer { event_id: Uuid },

    #[error("transient datastore failure: {0}")]
    TransientStore(StoreError),

    #[error("datastore failure: {0}")]
    Store(StoreError),
}

impl From<StoreError> for CatalogError {
    fn from(err: StoreError) -> Self {
        if err.is_transient() {
            CatalogError::TransientStore(err)
        } else {
            CatalogError::Store(err)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEvent {
    pub name: String,
    pub venue: Option<String>,
    pub starts_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTicketType {
    pub name: String,
    pub price_minor: i64,
    pub capacity: i32,
}

#[derive(Debug, Clone)]
pub struct EventListing {
    pub event: Event,
    pub ticket_types: Vec<TicketType>,
}

#[derive(Clone)]
pub struct CatalogService {
    store: Arc<dyn Datastore>,
}

impl CatalogService {
    pub fn new(store: Arc<dyn Datastore>) -> Self {
        Self { store }
    }

    pub async fn create_event(
        &self,
        producer_id: Uuid,
        new_event: NewEvent,
    ) -> Result<Event, CatalogError> {
        let event = Event::new(producer_id, new_event.name, new_event.venue, new_event.starts_at);
        self.store.insert_event(&event).await?;

        tracing::info!(
            event_id = %event.id,
            producer_id = %producer_id,
            starts_at = %event.starts_at,
            "event created"
        );
        Ok(event)
    }

    /// Only the producer of the event may add ticket types to it.
    pub async fn add_ticket_type(
        &self,
        producer_id: Uuid,
        event_id: Uuid,
        new_type: NewTicketType,
    ) -> Result<TicketType, CatalogError> {
        self.owned_event(producer_id, event_id).await?;

        let ticket_type = TicketType::new(
            event_id,
            new_type.name,
            new_type.price_minor,
            new_type.capacity,
        );
        self.store.insert_ticket_type(&ticket_type).await?;

        tracing::info!(
            event_id = %event_id,
            ticket_type_id = %ticket_type.id,
            capacity = ticket_type.capacity,
            price_minor = ticket_type.price_minor,
            "ticket type created"
        );
        Ok(ticket_type)
    }

    pub async fn list_events(&self, limit: i64, offset: i64) -> Result<Vec<Event>, CatalogError> {
        Ok(self.store.list_events(limit, offset).await?)
    }

    pub async fn event_with_ticket_types(&self, event_id: Uuid) -> Result<EventListing, CatalogError> {
        let event = self
            .store
            .event(event_id)
            .await?
            .ok_or(CatalogError::EventNotFound(event_id))?;
        let ticket_types = self.store.ticket_types_for_event(event_id).await?;
        Ok(EventListing {
            event,
            ticket_types,
        })
    }

    pub async fn sales(
        &self,
        producer_id: Uuid,
        event_id: Uuid,
    ) -> Result<Vec<TicketSales>, CatalogError> {
        self.owned_event(producer_id, event_id).await?;
        Ok(self.store.ticket_sales(event_id).await?)
    }

    async fn owned_event(&self, producer_id: Uuid, event_id: Uuid) -> Result<Event, CatalogError> {
        let event = self
            .store
            .event(event_id)
            .await?
            .ok_or(CatalogError::EventNotFound(event_id))?;

        if !event.is_produced_by(producer_id) {
            tracing::warn!(
                event_id = %event_id,
                user_id = %producer_id,
                "catalog access by non-producer rejected"
            );
            return Err(CatalogError::NotEventProducer { event_id });
        }
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MemoryDatastore;
    use crate::services::reservation::AddToCart;
    use crate::services::{ReservationService, RetryPolicy};
    use chrono::Duration;

    fn services() -> (CatalogService, ReservationService) {
        let store: Arc<dyn Datastore> = Arc::new(MemoryDatastore::new());
        (
            CatalogService::new(store.clone()),
            ReservationService::new(store, Duration::minutes(15), RetryPolicy::none()),
        )
    }

    fn concert() -> NewEvent {
        NewEvent {
            name: "Night Market Sessions".to_string(),
            venue: Some("Pier 4".to_string()),
            starts_at: Utc::now() + Duration::days(30),
        }
    }

    fn general(capacity: i32) -> NewTicketType {
        NewTicketType {
            name: "General".to_string(),
            price_minor: 3_500,
            capacity,
        }
    }

    #[tokio::test]
    async fn producer_builds_event_with_ticket_types() {
        let (catalog, _) = services();
        let producer = Uuid::new_v4();

        let event = catalog.create_event(producer, concert()).await.unwrap();
        let tt = catalog
            .add_ticket_type(producer, event.id, general(50))
            .await
            .unwrap();
        assert_eq!(tt.remaining, 50);

        let listing = catalog.event_with_ticket_types(event.id).await.unwrap();
        assert_eq!(listing.event, event);
        assert_eq!(listing.ticket_types, vec![tt]);
    }

    #[tokio::test]
    async fn other_users_cannot_touch_the_event() {
        let (catalog, _) = services();
        let event = catalog.create_event(Uuid::new_v4(), concert()).await.unwrap();
        let stranger = Uuid::new_v4();

        let err = catalog
            .add_ticket_type(stranger, event.id, general(10))
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::NotEventProducer { .. }));

        let err = catalog.sales(stranger, event.id).await.unwrap_err();
        assert!(matches!(err, CatalogError::NotEventProducer { .. }));
    }

    #[tokio::test]
    async fn unknown_event_is_not_found() {
        let (catalog, _) = services();
        let err = catalog
            .event_with_ticket_types(Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::EventNotFound(_)));
    }

    #[tokio::test]
    async fn sales_split_held_and_sold() {
        let (catalog, reservations) = services();
        let producer = Uuid::new_v4();
        let event = catalog.create_event(producer, concert()).await.unwrap();
        let tt = catalog
            .add_ticket_type(producer, event.id, general(10))
            .await
            .unwrap();

        let buyer = Uuid::new_v4();
        reservations
            .add_to_cart(AddToCart {
                user_id: buyer,
                ticket_type_id: tt.id,
                quantity: 2,
            })
            .await
            .unwrap();
        let checkout = reservations.initiate_checkout(buyer).await.unwrap();
        reservations
            .confirm_payment(
                checkout.order_id,
                crate::domain::PaymentDetails {
                    provider: "test".to_string(),
                    reference: None,
                    metadata: serde_json::Value::Null,
                },
            )
            .await
            .unwrap();

        reservations
            .add_to_cart(AddToCart {
                user_id: Uuid::new_v4(),
                ticket_type_id: tt.id,
                quantity: 3,
            })
            .await
            .unwrap();

        let sales = catalog.sales(producer, event.id).await.unwrap();
        assert_eq!(sales.len(), 1);
        assert_eq!(sales[0].remaining, 5);
        assert_eq!(sales[0].sold, 2);
        assert_eq!(sales[0].held, 3);
        assert_eq!(sales[0].gross_minor, 7_000);
    }
}
