//! In-process datastore.
//!
//! Units of work are serialized: `begin` takes the state lock and holds it
//! until the unit of work is committed or dropped. Writes go to a staged copy
//! that replaces the shared state on commit, so an abandoned unit of work
//! leaves nothing behind. Lock acquisition is bounded by the configured
//! timeout and surfaces as [`StoreError::Timeout`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::domain::{
    Event, Order, OrderLine, OrderStatus, PaymentEvent, TicketSales, TicketType,
};
use crate::ports::{Datastore, Restock, StoreError, StoreResult, UnitOfWork};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Default)]
struct MemoryState {
    events: HashMap<Uuid, Event>,
    ticket_types: HashMap<Uuid, TicketType>,
    orders: HashMap<Uuid, Order>,
    lines: Vec<OrderLine>,
    payment_events: HashMap<String, PaymentEvent>,
}

impl MemoryState {
    fn open_order_for(&self, user_id: Uuid) -> Option<&Order> {
        self.orders
            .values()
            .find(|order| order.user_id == user_id && order.status == OrderStatus::Open)
    }
}

#[derive(Clone)]
pub struct MemoryDatastore {
    state: Arc<Mutex<MemoryState>>,
    timeout: Duration,
}

impl Default for MemoryDatastore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDatastore {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            timeout,
        }
    }

    async fn lock(&self) -> StoreResult<OwnedMutexGuard<MemoryState>> {
        tokio::time::timeout(self.timeout, Arc::clone(&self.state).lock_owned())
            .await
            .map_err(|_| StoreError::Timeout)
    }
}

pub struct MemoryUnitOfWork {
    guard: OwnedMutexGuard<MemoryState>,
    staged: MemoryState,
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn ticket_type(&mut self, id: Uuid) -> StoreResult<Option<TicketType>> {
        Ok(self.staged.ticket_types.get(&id).cloned())
    }

    async fn decrement_remaining(
        &mut self,
        ticket_type_id: Uuid,
        quantity: i32,
    ) -> StoreResult<Option<TicketType>> {
        match self.staged.ticket_types.get_mut(&ticket_type_id) {
            Some(tt) if tt.remaining >= quantity => {
                tt.remaining -= quantity;
                tt.updated_at = Utc::now();
                Ok(Some(tt.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn increment_remaining(
        &mut self,
        ticket_type_id: Uuid,
        quantity: i32,
    ) -> StoreResult<Option<Restock>> {
        Ok(self
            .staged
            .ticket_types
            .get_mut(&ticket_type_id)
            .map(|tt| {
                let previous = tt.remaining;
                tt.remaining = tt.capacity.min(tt.remaining.saturating_add(quantity));
                tt.updated_at = Utc::now();
                Restock {
                    previous,
                    remaining: tt.remaining,
                    capacity: tt.capacity,
                }
            }))
    }

    async fn insert_order(&mut self, order: &Order) -> StoreResult<bool> {
        if self.staged.orders.contains_key(&order.id) {
            return Err(StoreError::Conflict(format!("order {} already exists", order.id)));
        }
        if order.status == OrderStatus::Open && self.staged.open_order_for(order.user_id).is_some() {
            return Ok(false);
        }
        self.staged.orders.insert(order.id, order.clone());
        Ok(true)
    }

    async fn save_order(&mut self, order: &Order) -> StoreResult<()> {
        match self.staged.orders.get_mut(&order.id) {
            Some(existing) => {
                *existing = order.clone();
                Ok(())
            }
            None => Err(StoreError::Conflict(format!("order {} no longer exists", order.id))),
        }
    }

    async fn find_order(&mut self, id: Uuid) -> StoreResult<Option<Order>> {
        Ok(self.staged.orders.get(&id).cloned())
    }

    async fn lock_order(&mut self, id: Uuid) -> StoreResult<Option<Order>> {
        self.find_order(id).await
    }

    async fn find_open_order(&mut self, user_id: Uuid) -> StoreResult<Option<Order>> {
        Ok(self.staged.open_order_for(user_id).cloned())
    }

    async fn lock_open_order(&mut self, user_id: Uuid) -> StoreResult<Option<Order>> {
        self.find_open_order(user_id).await
    }

    async fn find_order_by_checkout_ref(
        &mut self,
        checkout_ref: &str,
    ) -> StoreResult<Option<Order>> {
        Ok(self
            .staged
            .orders
            .values()
            .find(|order| order.checkout_ref.as_deref() == Some(checkout_ref))
            .cloned())
    }

    async fn orders_for_user(
        &mut self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Order>> {
        let mut orders: Vec<Order> = self
            .staged
            .orders
            .values()
            .filter(|order| order.user_id == user_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));

        Ok(page(orders, limit, offset))
    }

    async fn expired_checkouts(&mut self, now: DateTime<Utc>, limit: i64) -> StoreResult<Vec<Uuid>> {
        let mut expired: Vec<&Order> = self
            .staged
            .orders
            .values()
            .filter(|order| order.is_checkout_expired(now))
            .collect();
        expired.sort_by_key(|order| order.checkout_expires_at);

        Ok(page(expired, limit, 0)
            .into_iter()
            .map(|order| order.id)
            .collect())
    }

    async fn order_lines(&mut self, order_id: Uuid) -> StoreResult<Vec<OrderLine>> {
        Ok(self
            .staged
            .lines
            .iter()
            .filter(|line| line.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn insert_line(&mut self, line: &OrderLine) -> StoreResult<()> {
        if !self.staged.orders.contains_key(&line.order_id) {
            return Err(StoreError::Backend(format!("order {} does not exist", line.order_id)));
        }
        if !self.staged.ticket_types.contains_key(&line.ticket_type_id) {
            return Err(StoreError::Backend(format!(
                "ticket type {} does not exist",
                line.ticket_type_id
            )));
        }
        if self
            .staged
            .lines
            .iter()
            .any(|existing| existing.id == line.id || existing.redemption_code == line.redemption_code)
        {
            return Err(StoreError::Conflict(format!("order line {} is not unique", line.id)));
        }
        self.staged.lines.push(line.clone());
        Ok(())
    }

    async fn delete_line(
        &mut self,
        order_id: Uuid,
        line_id: Uuid,
    ) -> StoreResult<Option<OrderLine>> {
        let position = self
            .staged
            .lines
            .iter()
            .position(|line| line.id == line_id && line.order_id == order_id);

        Ok(position.map(|index| self.staged.lines.remove(index)))
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryUnitOfWork { mut guard, staged } = *self;
        *guard = staged;
        Ok(())
    }
}

fn page<T>(items: Vec<T>, limit: i64, offset: i64) -> Vec<T> {
    let offset = usize::try_from(offset).unwrap_or(0);
    let limit = usize::try_from(limit).unwrap_or(0);
    items.into_iter().skip(offset).take(limit).collect()
}

#[async_trait]
impl Datastore for MemoryDatastore {
    async fn begin(&self) -> StoreResult<Box<dyn UnitOfWork>> {
        let guard = self.lock().await?;
        let staged = guard.clone();
        Ok(Box::new(MemoryUnitOfWork { guard, staged }))
    }

    async fn ping(&self) -> StoreResult<()> {
        self.lock().await.map(|_| ())
    }

    async fn insert_event(&self, event: &Event) -> StoreResult<()> {
        let mut state = self.lock().await?;
        if state.events.contains_key(&event.id) {
            return Err(StoreError::Conflict(format!("event {} already exists", event.id)));
        }
        state.events.insert(event.id, event.clone());
        Ok(())
    }

    async fn event(&self, id: Uuid) -> StoreResult<Option<Event>> {
        Ok(self.lock().await?.events.get(&id).cloned())
    }

    async fn list_events(&self, limit: i64, offset: i64) -> StoreResult<Vec<Event>> {
        let state = self.lock().await?;
        let mut events: Vec<Event> = state.events.values().cloned().collect();
        events.sort_by(|a, b| a.starts_at.cmp(&b.starts_at).then(a.id.cmp(&b.id)));
        Ok(page(events, limit, offset))
    }

    async fn insert_ticket_type(&self, ticket_type: &TicketType) -> StoreResult<()> {
        let mut state = self.lock().await?;
        if !state.events.contains_key(&ticket_type.event_id) {
            return Err(StoreError::Backend(format!(
                "event {} does not exist",
                ticket_type.event_id
            )));
        }
        if state.ticket_types.contains_key(&ticket_type.id) {
            return Err(StoreError::Conflict(format!(
                "ticket type {} already exists",
                ticket_type.id
            )));
        }
        state.ticket_types.insert(ticket_type.id, ticket_type.clone());
        Ok(())
    }

    async fn ticket_type(&self, id: Uuid) -> StoreResult<Option<TicketType>> {
        Ok(self.lock().await?.ticket_types.get(&id).cloned())
    }

    async fn ticket_types_for_event(&self, event_id: Uuid) -> StoreResult<Vec<TicketType>> {
        let state = self.lock().await?;
        let mut ticket_types: Vec<TicketType> = state
            .ticket_types
            .values()
            .filter(|tt| tt.event_id == event_id)
            .cloned()
            .collect();
        ticket_types.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.name.cmp(&b.name)));
        Ok(ticket_types)
    }

    async fn ticket_sales(&self, event_id: Uuid) -> StoreResult<Vec<TicketSales>> {
        let state = self.lock().await?;
        let mut ticket_types: Vec<&TicketType> = state
            .ticket_types
            .values()
            .filter(|tt| tt.event_id == event_id)
            .collect();
        ticket_types.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.name.cmp(&b.name)));

        Ok(ticket_types
            .into_iter()
            .map(|tt| {
                let mut sales = TicketSales {
                    ticket_type_id: tt.id,
                    name: tt.name.clone(),
                    capacity: tt.capacity,
                    remaining: tt.remaining,
                    held: 0,
                    sold: 0,
                    gross_minor: 0,
                };
                for line in state.lines.iter().filter(|line| line.ticket_type_id == tt.id) {
                    match state.orders.get(&line.order_id).map(|order| order.status) {
                        Some(OrderStatus::Open | OrderStatus::AwaitingPayment) => {
                            sales.held += i64::from(line.quantity);
                        }
                        Some(OrderStatus::Confirmed) => {
                            sales.sold += i64::from(line.quantity);
                            sales.gross_minor += line.subtotal_minor();
                        }
                        _ => {}
                    }
                }
                sales
            })
            .collect())
    }

    async fn payment_event_seen(&self, event_id: &str) -> StoreResult<bool> {
        Ok(self.lock().await?.payment_events.contains_key(event_id))
    }

    async fn record_payment_event(&self, event: &PaymentEvent) -> StoreResult<bool> {
        let mut state = self.lock().await?;
        if state.payment_events.contains_key(&event.event_id) {
            return Ok(false);
        }
        state
            .payment_events
            .insert(event.event_id.clone(), event.clone());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded() -> (MemoryDatastore, TicketType) {
        let store = MemoryDatastore::new();
        let event = Event::new(Uuid::new_v4(), "Warehouse Rave".to_string(), None, Utc::now());
        store.insert_event(&event).await.unwrap();
        let tt = TicketType::new(event.id, "Early bird".to_string(), 1_500, 4);
        store.insert_ticket_type(&tt).await.unwrap();
        (store, tt)
    }

    #[tokio::test]
    async fn dropped_unit_of_work_discards_writes() {
        let (store, tt) = seeded().await;

        {
            let mut uow = store.begin().await.unwrap();
            uow.decrement_remaining(tt.id, 3).await.unwrap();
        }

        let current = store.ticket_type(tt.id).await.unwrap().unwrap();
        assert_eq!(current.remaining, 4);
    }

    #[tokio::test]
    async fn committed_unit_of_work_is_visible() {
        let (store, tt) = seeded().await;

        let mut uow = store.begin().await.unwrap();
        let updated = uow.decrement_remaining(tt.id, 3).await.unwrap().unwrap();
        assert_eq!(updated.remaining, 1);
        assert!(uow.decrement_remaining(tt.id, 2).await.unwrap().is_none());
        uow.commit().await.unwrap();

        let current = store.ticket_type(tt.id).await.unwrap().unwrap();
        assert_eq!(current.remaining, 1);
    }

    #[tokio::test]
    async fn increment_is_clamped_at_capacity() {
        let (store, tt) = seeded().await;

        let mut uow = store.begin().await.unwrap();
        let restock = uow.increment_remaining(tt.id, 2).await.unwrap().unwrap();
        assert_eq!(
            restock,
            Restock {
                previous: 4,
                remaining: 4,
                capacity: 4
            }
        );
    }

    #[tokio::test]
    async fn second_open_order_for_user_is_rejected() {
        let store = MemoryDatastore::new();
        let user = Uuid::new_v4();

        let mut uow = store.begin().await.unwrap();
        assert!(uow.insert_order(&Order::open(user)).await.unwrap());
        assert!(!uow.insert_order(&Order::open(user)).await.unwrap());
        assert!(uow.insert_order(&Order::open(Uuid::new_v4())).await.unwrap());
    }

    #[tokio::test]
    async fn begin_times_out_while_another_unit_of_work_is_open() {
        let store = MemoryDatastore::with_timeout(Duration::from_millis(20));
        let _held = store.begin().await.unwrap();

        let second = store.begin().await;
        assert!(matches!(second, Err(StoreError::Timeout)));
    }
}
