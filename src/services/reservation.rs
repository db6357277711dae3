//! Reservation service: cart operations and the checkout state machine.
//!
//! Inventory is taken once, when a line is added. Checkout and payment
//! confirmation never touch it again; cancellation (payment failure, expiry,
//! abandonment) gives every line's quantity back.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::{cart, inventory, ReservationError};
use crate::domain::{Order, OrderLine, OrderStatus, PaymentDetails, Transition};
use crate::ports::{Datastore, UnitOfWork};

/// Backoff for rerunning a unit of work after a transient datastore failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    const MAX_DELAY: Duration = Duration::from_secs(2);

    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
        }
    }

    /// Delay before the attempt following `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(Self::MAX_DELAY)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(50),
        }
    }
}

/// Validated add-to-cart request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddToCart {
    pub user_id: Uuid,
    pub ticket_type_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Clone)]
pub struct AddedLine {
    pub order_id: Uuid,
    pub line: OrderLine,
    pub order_total_minor: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkout {
    pub order_id: Uuid,
    pub checkout_ref: String,
    pub total_minor: i64,
    pub expires_at: DateTime<Utc>,
}

/// An order together with its lines.
#[derive(Debug, Clone)]
pub struct OrderDetails {
    pub order: Order,
    pub lines: Vec<OrderLine>,
}

#[derive(Clone)]
pub struct ReservationService {
    store: Arc<dyn Datastore>,
    checkout_ttl: ChronoDuration,
    retry: RetryPolicy,
}

impl ReservationService {
    pub fn new(store: Arc<dyn Datastore>, checkout_ttl: ChronoDuration, retry: RetryPolicy) -> Self {
        Self {
            store,
            checkout_ttl,
            retry,
        }
    }

    pub async fn add_to_cart(&self, cmd: AddToCart) -> Result<AddedLine, ReservationError> {
        let mut uow = self.store.begin().await?;
        let mut order = cart::get_or_create_open_order(uow.as_mut(), cmd.user_id).await?;
        let line = cart::add_line(uow.as_mut(), &mut order, cmd.ticket_type_id, cmd.quantity).await?;
        uow.commit().await?;

        tracing::info!(
            order_id = %order.id,
            line_id = %line.id,
            ticket_type_id = %cmd.ticket_type_id,
            quantity = cmd.quantity,
            total_minor = order.total_minor,
            "tickets added to cart"
        );

        Ok(AddedLine {
            order_id: order.id,
            line,
            order_total_minor: order.total_minor,
        })
    }

    /// Removes a line from the user's open order and returns the updated order.
    pub async fn remove_from_cart(
        &self,
        user_id: Uuid,
        line_id: Uuid,
    ) -> Result<Order, ReservationError> {
        self.with_retry("remove_from_cart", || self.try_remove_from_cart(user_id, line_id))
            .await
    }

    async fn try_remove_from_cart(
        &self,
        user_id: Uuid,
        line_id: Uuid,
    ) -> Result<Order, ReservationError> {
        let mut uow = self.store.begin().await?;
        let mut order = uow
            .lock_open_order(user_id)
            .await?
            .ok_or(ReservationError::LineNotFound(line_id))?;
        let line = cart::remove_line(uow.as_mut(), &mut order, line_id).await?;
        uow.commit().await?;

        tracing::info!(
            order_id = %order.id,
            line_id = %line.id,
            quantity = line.quantity,
            total_minor = order.total_minor,
            "tickets removed from cart"
        );

        Ok(order)
    }

    pub async fn cart(&self, user_id: Uuid) -> Result<Option<OrderDetails>, ReservationError> {
        let mut uow = self.store.begin().await?;
        let Some(order) = uow.find_open_order(user_id).await? else {
            return Ok(None);
        };
        let lines = uow.order_lines(order.id).await?;
        Ok(Some(OrderDetails { order, lines }))
    }

    /// Only the owner can read an order; anyone else gets `OrderNotFound`.
    pub async fn order_for_user(
        &self,
        user_id: Uuid,
        order_id: Uuid,
    ) -> Result<OrderDetails, ReservationError> {
        let mut uow = self.store.begin().await?;
        let order = uow
            .find_order(order_id)
            .await?
            .filter(|order| order.user_id == user_id)
            .ok_or(ReservationError::OrderNotFound(order_id))?;
        let lines = uow.order_lines(order.id).await?;
        Ok(OrderDetails { order, lines })
    }

    pub async fn orders_for_user(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Order>, ReservationError> {
        let mut uow = self.store.begin().await?;
        Ok(uow.orders_for_user(user_id, limit, offset).await?)
    }

    pub async fn order_id_for_checkout(
        &self,
        checkout_ref: &str,
    ) -> Result<Option<Uuid>, ReservationError> {
        let mut uow = self.store.begin().await?;
        Ok(uow
            .find_order_by_checkout_ref(checkout_ref)
            .await?
            .map(|order| order.id))
    }

    /// Moves the user's open order to `awaiting_payment` and hands out the
    /// reference the payment provider will report back with.
    pub async fn initiate_checkout(&self, user_id: Uuid) -> Result<Checkout, ReservationError> {
        let mut uow = self.store.begin().await?;
        let mut order = uow
            .lock_open_order(user_id)
            .await?
            .ok_or(ReservationError::EmptyCart)?;

        let lines = uow.order_lines(order.id).await?;
        if lines.is_empty() {
            return Err(ReservationError::EmptyCart);
        }

        cart::recompute_total(uow.as_mut(), &mut order).await?;

        let now = Utc::now();
        let checkout_ref = format!("chk_{}", Uuid::new_v4().simple());
        let expires_at = now + self.checkout_ttl;
        order
            .mark_awaiting_payment(checkout_ref.clone(), expires_at, now)
            .map_err(|t| ReservationError::invalid_state(order.id, t))?;
        uow.save_order(&order).await?;
        uow.commit().await?;

        tracing::info!(
            order_id = %order.id,
            checkout_ref = %checkout_ref,
            total_minor = order.total_minor,
            expires_at = %expires_at,
            "checkout started"
        );

        Ok(Checkout {
            order_id: order.id,
            checkout_ref,
            total_minor: order.total_minor,
            expires_at,
        })
    }

    /// Idempotent: confirming a confirmed order is a no-op.
    pub async fn confirm_payment(
        &self,
        order_id: Uuid,
        payment: PaymentDetails,
    ) -> Result<Transition, ReservationError> {
        self.with_retry("confirm_payment", || self.try_confirm_payment(order_id, payment.clone()))
            .await
    }

    async fn try_confirm_payment(
        &self,
        order_id: Uuid,
        payment: PaymentDetails,
    ) -> Result<Transition, ReservationError> {
        let mut uow = self.store.begin().await?;
        let mut order = uow
            .lock_order(order_id)
            .await?
            .ok_or(ReservationError::OrderNotFound(order_id))?;

        let transition = order
            .confirm(payment, Utc::now())
            .map_err(|t| ReservationError::invalid_state(order_id, t))?;

        if transition.is_applied() {
            uow.save_order(&order).await?;
            uow.commit().await?;
            tracing::info!(order_id = %order_id, "payment confirmed");
        } else {
            tracing::debug!(order_id = %order_id, "duplicate payment confirmation ignored");
        }

        Ok(transition)
    }

    /// Cancels an order awaiting payment and gives its stock back. Repeated
    /// failures, and failures for confirmed orders, leave everything as is.
    pub async fn fail_payment(
        &self,
        order_id: Uuid,
        reason: &str,
    ) -> Result<Transition, ReservationError> {
        self.with_retry("fail_payment", || self.try_fail_payment(order_id, reason))
            .await
    }

    async fn try_fail_payment(
        &self,
        order_id: Uuid,
        reason: &str,
    ) -> Result<Transition, ReservationError> {
        let mut uow = self.store.begin().await?;
        let mut order = uow
            .lock_order(order_id)
            .await?
            .ok_or(ReservationError::OrderNotFound(order_id))?;

        let transition = order
            .fail_payment(reason, Utc::now())
            .map_err(|t| ReservationError::invalid_state(order_id, t))?;

        if transition.is_applied() {
            release_lines(uow.as_mut(), &order).await?;
            uow.save_order(&order).await?;
            uow.commit().await?;
            tracing::info!(order_id = %order_id, reason, "payment failed, order cancelled");
        } else {
            tracing::debug!(
                order_id = %order_id,
                status = %transition.status(),
                "payment failure for settled order ignored"
            );
        }

        Ok(transition)
    }

    /// Cancels the user's open cart. `None` when there is no open cart.
    pub async fn abandon(&self, user_id: Uuid) -> Result<Option<Order>, ReservationError> {
        self.with_retry("abandon", || self.try_abandon(user_id)).await
    }

    async fn try_abandon(&self, user_id: Uuid) -> Result<Option<Order>, ReservationError> {
        let mut uow = self.store.begin().await?;
        let Some(mut order) = uow.lock_open_order(user_id).await? else {
            return Ok(None);
        };

        let transition = order
            .abandon(Utc::now())
            .map_err(|t| ReservationError::invalid_state(order.id, t))?;
        if transition.is_applied() {
            release_lines(uow.as_mut(), &order).await?;
            uow.save_order(&order).await?;
            uow.commit().await?;
            tracing::info!(order_id = %order.id, "cart abandoned");
        }

        Ok(Some(order))
    }

    /// Cancels up to `batch_size` orders whose checkout expired before `now`.
    /// Returns how many were cancelled.
    pub async fn expire_stale_checkouts(
        &self,
        now: DateTime<Utc>,
        batch_size: i64,
    ) -> Result<usize, ReservationError> {
        let expired = {
            let mut uow = self.store.begin().await?;
            uow.expired_checkouts(now, batch_size).await?
        };

        let mut cancelled = 0;
        for order_id in expired {
            match self.fail_payment(order_id, "expired").await {
                Ok(transition) if transition.is_applied() => cancelled += 1,
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(order_id = %order_id, error = %e, "failed to expire checkout")
                }
            }
        }

        Ok(cancelled)
    }

    async fn with_retry<T, F, Fut>(&self, operation: &'static str, mut run: F) -> Result<T, ReservationError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ReservationError>>,
    {
        let mut attempt = 1;
        loop {
            match run().await {
                Err(e) if e.is_transient() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_after(attempt);
                    tracing::warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying after transient datastore failure"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

/// Gives back the stock held by every line of `order`, one release per
/// ticket type in id order so concurrent cancellations lock rows in the same order.
async fn release_lines(uow: &mut dyn UnitOfWork, order: &Order) -> Result<(), ReservationError> {
    debug_assert_eq!(order.status, OrderStatus::Cancelled);

    let mut per_ticket_type: BTreeMap<Uuid, i32> = BTreeMap::new();
    for line in uow.order_lines(order.id).await? {
        *per_ticket_type.entry(line.ticket_type_id).or_default() += line.quantity;
    }

    for (ticket_type_id, quantity) in per_ticket_type {
        inventory::release(uow, ticket_type_id, quantity).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MemoryDatastore;
    use crate::domain::{Event, PaymentEvent, TicketSales, TicketType};
    use crate::ports::{Restock, StoreError, StoreResult};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Fixture {
        store: Arc<MemoryDatastore>,
        service: ReservationService,
        ticket_type: TicketType,
    }

    async fn fixture(capacity: i32, price_minor: i64) -> Fixture {
        let store = Arc::new(MemoryDatastore::new());
        let event = Event::new(Uuid::new_v4(), "Harbour Lights".to_string(), None, Utc::now());
        store.insert_event(&event).await.unwrap();
        let ticket_type = TicketType::new(event.id, "Standing".to_string(), price_minor, capacity);
        store.insert_ticket_type(&ticket_type).await.unwrap();

        let service = ReservationService::new(
            store.clone(),
            ChronoDuration::minutes(15),
            RetryPolicy::none(),
        );
        Fixture {
            store,
            service,
            ticket_type,
        }
    }

    impl Fixture {
        async fn remaining(&self) -> i32 {
            self.store
                .ticket_type(self.ticket_type.id)
                .await
                .unwrap()
                .unwrap()
                .remaining
        }

        fn add(&self, user_id: Uuid, quantity: i32) -> AddToCart {
            AddToCart {
                user_id,
                ticket_type_id: self.ticket_type.id,
                quantity,
            }
        }
    }

    fn payment() -> PaymentDetails {
        PaymentDetails {
            provider: "mercadopago".to_string(),
            reference: Some("mp-7781".to_string()),
            metadata: json!({ "method": "card" }),
        }
    }

    #[tokio::test]
    async fn capacity_five_scenario() {
        let fx = fixture(5, 1_000).await;
        let user = Uuid::new_v4();

        let first = fx.service.add_to_cart(fx.add(user, 3)).await.unwrap();
        assert_eq!(fx.remaining().await, 2);
        assert_eq!(first.order_total_minor, 3_000);

        let err = fx.service.add_to_cart(fx.add(user, 3)).await.unwrap_err();
        assert!(matches!(
            err,
            ReservationError::InsufficientInventory { available: 2, .. }
        ));

        let order = fx.service.remove_from_cart(user, first.line.id).await.unwrap();
        assert_eq!(fx.remaining().await, 5);
        assert_eq!(order.total_minor, 0);
    }

    #[tokio::test]
    async fn failed_first_add_leaves_no_cart_behind() {
        let fx = fixture(1, 1_000).await;
        let user = Uuid::new_v4();

        fx.service.add_to_cart(fx.add(user, 2)).await.unwrap_err();
        assert!(fx.service.cart(user).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn non_positive_add_changes_nothing() {
        let fx = fixture(5, 1_000).await;
        let user = Uuid::new_v4();

        for quantity in [0, -3] {
            let err = fx.service.add_to_cart(fx.add(user, quantity)).await.unwrap_err();
            assert!(matches!(err, ReservationError::InvalidQuantity(q) if q == quantity));
        }

        assert_eq!(fx.remaining().await, 5);
        assert!(fx.service.cart(user).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn concurrent_adds_for_last_unit_have_one_winner() {
        let fx = fixture(1, 500).await;

        let attempts = (0..16).map(|_| {
            let service = fx.service.clone();
            let cmd = fx.add(Uuid::new_v4(), 1);
            tokio::spawn(async move { service.add_to_cart(cmd).await })
        });
        let results: Vec<_> = futures::future::join_all(attempts)
            .await
            .into_iter()
            .map(|joined| joined.expect("task panicked"))
            .collect();

        let winners = results.iter().filter(|r| r.is_ok()).count();
        let sold_out = results
            .iter()
            .filter(|r| {
                matches!(
                    r,
                    Err(ReservationError::InsufficientInventory { available: 0, .. })
                )
            })
            .count();
        assert_eq!(winners, 1);
        assert_eq!(sold_out, 15);
        assert_eq!(fx.remaining().await, 0);
    }

    #[tokio::test]
    async fn checkout_of_empty_cart_fails() {
        let fx = fixture(5, 1_000).await;
        let user = Uuid::new_v4();

        let err = fx.service.initiate_checkout(user).await.unwrap_err();
        assert!(matches!(err, ReservationError::EmptyCart));

        let added = fx.service.add_to_cart(fx.add(user, 1)).await.unwrap();
        fx.service.remove_from_cart(user, added.line.id).await.unwrap();
        let err = fx.service.initiate_checkout(user).await.unwrap_err();
        assert!(matches!(err, ReservationError::EmptyCart));
    }

    #[tokio::test]
    async fn two_line_order_confirms_and_ignores_later_failure() {
        let fx = fixture(10, 2_500).await;
        let user = Uuid::new_v4();
        fx.service.add_to_cart(fx.add(user, 2)).await.unwrap();
        fx.service.add_to_cart(fx.add(user, 1)).await.unwrap();

        let checkout = fx.service.initiate_checkout(user).await.unwrap();
        assert_eq!(checkout.total_minor, 7_500);
        assert!(checkout.checkout_ref.starts_with("chk_"));
        assert_eq!(fx.remaining().await, 7);

        let confirmed = fx
            .service
            .confirm_payment(checkout.order_id, payment())
            .await
            .unwrap();
        assert_eq!(confirmed, Transition::Applied(OrderStatus::Confirmed));
        assert_eq!(fx.remaining().await, 7);

        let failed = fx
            .service
            .fail_payment(checkout.order_id, "rejected")
            .await
            .unwrap();
        assert_eq!(failed, Transition::Unchanged(OrderStatus::Confirmed));
        assert_eq!(fx.remaining().await, 7);

        let details = fx.service.order_for_user(user, checkout.order_id).await.unwrap();
        assert_eq!(details.order.status, OrderStatus::Confirmed);
        assert_eq!(details.lines.len(), 2);
        assert_eq!(details.order.payment, Some(payment()));
    }

    #[tokio::test]
    async fn duplicate_confirmation_is_a_no_op() {
        let fx = fixture(4, 1_000).await;
        let user = Uuid::new_v4();
        fx.service.add_to_cart(fx.add(user, 2)).await.unwrap();
        let checkout = fx.service.initiate_checkout(user).await.unwrap();

        let first = fx.service.confirm_payment(checkout.order_id, payment()).await.unwrap();
        let second = fx.service.confirm_payment(checkout.order_id, payment()).await.unwrap();

        assert!(first.is_applied());
        assert_eq!(second, Transition::Unchanged(OrderStatus::Confirmed));
        assert_eq!(fx.remaining().await, 2);
    }

    #[tokio::test]
    async fn payment_failure_restores_stock_once() {
        let fx = fixture(6, 1_000).await;
        let user = Uuid::new_v4();
        fx.service.add_to_cart(fx.add(user, 2)).await.unwrap();
        fx.service.add_to_cart(fx.add(user, 3)).await.unwrap();
        let checkout = fx.service.initiate_checkout(user).await.unwrap();
        assert_eq!(fx.remaining().await, 1);

        let first = fx.service.fail_payment(checkout.order_id, "rejected").await.unwrap();
        let second = fx.service.fail_payment(checkout.order_id, "rejected").await.unwrap();

        assert!(first.is_applied());
        assert!(!second.is_applied());
        assert_eq!(fx.remaining().await, 6);
    }

    #[tokio::test]
    async fn confirming_cancelled_order_is_invalid() {
        let fx = fixture(3, 1_000).await;
        let user = Uuid::new_v4();
        fx.service.add_to_cart(fx.add(user, 1)).await.unwrap();
        let checkout = fx.service.initiate_checkout(user).await.unwrap();
        fx.service.fail_payment(checkout.order_id, "rejected").await.unwrap();

        let err = fx
            .service
            .confirm_payment(checkout.order_id, payment())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ReservationError::InvalidState {
                from: OrderStatus::Cancelled,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn abandon_releases_cart_and_next_add_opens_new_cart() {
        let fx = fixture(5, 1_000).await;
        let user = Uuid::new_v4();
        let first = fx.service.add_to_cart(fx.add(user, 4)).await.unwrap();

        let abandoned = fx.service.abandon(user).await.unwrap().expect("open cart");
        assert_eq!(abandoned.status, OrderStatus::Cancelled);
        assert_eq!(fx.remaining().await, 5);
        assert!(fx.service.abandon(user).await.unwrap().is_none());

        let second = fx.service.add_to_cart(fx.add(user, 1)).await.unwrap();
        assert_ne!(first.order_id, second.order_id);
    }

    #[tokio::test]
    async fn expired_checkouts_are_cancelled_and_restocked() {
        let fx = fixture(5, 1_000).await;
        let user = Uuid::new_v4();
        fx.service.add_to_cart(fx.add(user, 3)).await.unwrap();
        let checkout = fx.service.initiate_checkout(user).await.unwrap();

        let not_yet = fx.service.expire_stale_checkouts(Utc::now(), 10).await.unwrap();
        assert_eq!(not_yet, 0);

        let later = checkout.expires_at + ChronoDuration::seconds(1);
        let expired = fx.service.expire_stale_checkouts(later, 10).await.unwrap();
        assert_eq!(expired, 1);
        assert_eq!(fx.remaining().await, 5);

        let details = fx.service.order_for_user(user, checkout.order_id).await.unwrap();
        assert_eq!(details.order.status, OrderStatus::Cancelled);
        assert_eq!(details.order.cancel_reason.as_deref(), Some("expired"));
    }

    #[tokio::test]
    async fn orders_are_private_to_their_owner() {
        let fx = fixture(5, 1_000).await;
        let owner = Uuid::new_v4();
        let added = fx.service.add_to_cart(fx.add(owner, 1)).await.unwrap();

        let err = fx
            .service
            .order_for_user(Uuid::new_v4(), added.order_id)
            .await
            .unwrap_err();
        assert!(matches!(err, ReservationError::OrderNotFound(_)));
    }

    #[tokio::test]
    async fn store_timeouts_surface_as_transient() {
        let store = Arc::new(MemoryDatastore::with_timeout(Duration::from_millis(20)));
        let service = ReservationService::new(
            store.clone(),
            ChronoDuration::minutes(15),
            RetryPolicy {
                max_attempts: 2,
                base_delay: Duration::from_millis(1),
            },
        );
        let _held = store.begin().await.unwrap();

        let err = service.abandon(Uuid::new_v4()).await.unwrap_err();
        assert!(err.is_transient());
    }

    /// Wraps the memory store and fails the commit of the next `armed`
    /// units of work with a timeout. The failed unit is rolled back.
    struct FlakyStore {
        inner: Arc<MemoryDatastore>,
        armed: AtomicU32,
        failed_commits: Arc<AtomicU32>,
    }

    impl FlakyStore {
        fn new(inner: Arc<MemoryDatastore>) -> Self {
            Self {
                inner,
                armed: AtomicU32::new(0),
                failed_commits: Arc::new(AtomicU32::new(0)),
            }
        }

        fn fail_next_commits(&self, count: u32) {
            self.armed.store(count, Ordering::SeqCst);
        }

        fn failed_commits(&self) -> u32 {
            self.failed_commits.load(Ordering::SeqCst)
        }
    }

    struct FlakyUnit {
        inner: Box<dyn UnitOfWork>,
        fail_commit: bool,
        failed_commits: Arc<AtomicU32>,
    }

    #[async_trait]
    impl UnitOfWork for FlakyUnit {
        async fn ticket_type(&mut self, id: Uuid) -> StoreResult<Option<TicketType>> {
            self.inner.ticket_type(id).await
        }

        async fn decrement_remaining(
            &mut self,
            ticket_type_id: Uuid,
            quantity: i32,
        ) -> StoreResult<Option<TicketType>> {
            self.inner.decrement_remaining(ticket_type_id, quantity).await
        }

        async fn increment_remaining(
            &mut self,
            ticket_type_id: Uuid,
            quantity: i32,
        ) -> StoreResult<Option<Restock>> {
            self.inner.increment_remaining(ticket_type_id, quantity).await
        }

        async fn insert_order(&mut self, order: &Order) -> StoreResult<bool> {
            self.inner.insert_order(order).await
        }

        async fn save_order(&mut self, order: &Order) -> StoreResult<()> {
            self.inner.save_order(order).await
        }

        async fn find_order(&mut self, id: Uuid) -> StoreResult<Option<Order>> {
            self.inner.find_order(id).await
        }

        async fn lock_order(&mut self, id: Uuid) -> StoreResult<Option<Order>> {
            self.inner.lock_order(id).await
        }

        async fn find_open_order(&mut self, user_id: Uuid) -> StoreResult<Option<Order>> {
            self.inner.find_open_order(user_id).await
        }

        async fn lock_open_order(&mut self, user_id: Uuid) -> StoreResult<Option<Order>> {
            self.inner.lock_open_order(user_id).await
        }

        async fn find_order_by_checkout_ref(
            &mut self,
            checkout_ref: &str,
        ) -> StoreResult<Option<Order>> {
            self.inner.find_order_by_checkout_ref(checkout_ref).await
        }

        async fn orders_for_user(
            &mut self,
            user_id: Uuid,
            limit: i64,
            offset: i64,
        ) -> StoreResult<Vec<Order>> {
            self.inner.orders_for_user(user_id, limit, offset).await
        }

        async fn expired_checkouts(
            &mut self,
            now: DateTime<Utc>,
            limit: i64,
        ) -> StoreResult<Vec<Uuid>> {
            self.inner.expired_checkouts(now, limit).await
        }

        async fn order_lines(&mut self, order_id: Uuid) -> StoreResult<Vec<OrderLine>> {
            self.inner.order_lines(order_id).await
        }

        async fn insert_line(&mut self, line: &OrderLine) -> StoreResult<()> {
            self.inner.insert_line(line).await
        }

        async fn delete_line(
            &mut self,
            order_id: Uuid,
            line_id: Uuid,
        ) -> StoreResult<Option<OrderLine>> {
            self.inner.delete_line(order_id, line_id).await
        }

        async fn commit(self: Box<Self>) -> StoreResult<()> {
            if self.fail_commit {
                self.failed_commits.fetch_add(1, Ordering::SeqCst);
                return Err(StoreError::Timeout);
            }
            self.inner.commit().await
        }
    }

    #[async_trait]
    impl Datastore for FlakyStore {
        async fn begin(&self) -> StoreResult<Box<dyn UnitOfWork>> {
            let fail_commit = self
                .armed
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            Ok(Box::new(FlakyUnit {
                inner: self.inner.begin().await?,
                fail_commit,
                failed_commits: self.failed_commits.clone(),
            }))
        }

        async fn ping(&self) -> StoreResult<()> {
            self.inner.ping().await
        }

        async fn insert_event(&self, event: &Event) -> StoreResult<()> {
            self.inner.insert_event(event).await
        }

        async fn event(&self, id: Uuid) -> StoreResult<Option<Event>> {
            self.inner.event(id).await
        }

        async fn list_events(&self, limit: i64, offset: i64) -> StoreResult<Vec<Event>> {
            self.inner.list_events(limit, offset).await
        }

        async fn insert_ticket_type(&self, ticket_type: &TicketType) -> StoreResult<()> {
            self.inner.insert_ticket_type(ticket_type).await
        }

        async fn ticket_type(&self, id: Uuid) -> StoreResult<Option<TicketType>> {
            self.inner.ticket_type(id).await
        }

        async fn ticket_types_for_event(&self, event_id: Uuid) -> StoreResult<Vec<TicketType>> {
            self.inner.ticket_types_for_event(event_id).await
        }

        async fn ticket_sales(&self, event_id: Uuid) -> StoreResult<Vec<TicketSales>> {
            self.inner.ticket_sales(event_id).await
        }

        async fn payment_event_seen(&self, event_id: &str) -> StoreResult<bool> {
            self.inner.payment_event_seen(event_id).await
        }

        async fn record_payment_event(&self, event: &PaymentEvent) -> StoreResult<bool> {
            self.inner.record_payment_event(event).await
        }
    }

    async fn flaky_fixture(capacity: i32) -> (Fixture, Arc<FlakyStore>, ReservationService) {
        let fx = fixture(capacity, 1_000).await;
        let flaky = Arc::new(FlakyStore::new(fx.store.clone()));
        let service = ReservationService::new(
            flaky.clone(),
            ChronoDuration::minutes(15),
            RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
            },
        );
        (fx, flaky, service)
    }

    #[tokio::test]
    async fn retried_payment_failure_restocks_exactly_once() {
        let (fx, flaky, service) = flaky_fixture(6).await;
        let user = Uuid::new_v4();
        fx.service.add_to_cart(fx.add(user, 2)).await.unwrap();
        fx.service.add_to_cart(fx.add(user, 3)).await.unwrap();
        let checkout = fx.service.initiate_checkout(user).await.unwrap();
        assert_eq!(fx.remaining().await, 1);

        flaky.fail_next_commits(1);
        let transition = service.fail_payment(checkout.order_id, "rejected").await.unwrap();

        assert_eq!(transition, Transition::Applied(OrderStatus::Cancelled));
        assert_eq!(flaky.failed_commits(), 1);
        assert_eq!(fx.remaining().await, 6);

        let replay = service.fail_payment(checkout.order_id, "rejected").await.unwrap();
        assert!(!replay.is_applied());
        assert_eq!(fx.remaining().await, 6);
    }

    #[tokio::test]
    async fn retried_line_removal_restocks_exactly_once() {
        let (fx, flaky, service) = flaky_fixture(5).await;
        let user = Uuid::new_v4();
        let kept = fx.service.add_to_cart(fx.add(user, 1)).await.unwrap();
        let removed = fx.service.add_to_cart(fx.add(user, 3)).await.unwrap();
        assert_eq!(fx.remaining().await, 1);

        flaky.fail_next_commits(2);
        let order = service.remove_from_cart(user, removed.line.id).await.unwrap();

        assert_eq!(flaky.failed_commits(), 2);
        assert_eq!(order.total_minor, 1_000);
        assert_eq!(fx.remaining().await, 4);

        let cart = fx.service.cart(user).await.unwrap().unwrap();
        assert_eq!(cart.lines.len(), 1);
        assert_eq!(cart.lines[0].id, kept.line.id);
    }

    #[tokio::test]
    async fn retries_give_up_after_max_attempts() {
        let (fx, flaky, service) = flaky_fixture(5).await;
        let user = Uuid::new_v4();
        let added = fx.service.add_to_cart(fx.add(user, 2)).await.unwrap();

        flaky.fail_next_commits(3);
        let err = service.remove_from_cart(user, added.line.id).await.unwrap_err();

        assert!(err.is_transient());
        assert_eq!(flaky.failed_commits(), 3);
        assert_eq!(fx.remaining().await, 3);
        assert_eq!(fx.service.cart(user).await.unwrap().unwrap().lines.len(), 1);
    }

    #[test]
    fn retry_delay_grows_and_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
        };
        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(200));
        assert_eq!(policy.delay_after(3), Duration::from_millis(400));
        assert_eq!(policy.delay_after(9), Duration::from_secs(2));
    }
}
