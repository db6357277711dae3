//! Postgres implementation of the datastore ports.
//!
//! Every statement runs under the configured timeout. A unit of work is one
//! database transaction; dropping it without committing rolls back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use std::future::Future;
use std::time::Duration;
use uuid::Uuid;

use crate::db::models::{EventRow, OrderLineRow, OrderRow, TicketSalesRow, TicketTypeRow};
use crate::domain::{Event, Order, OrderLine, PaymentEvent, TicketSales, TicketType};
use crate::ports::{Datastore, Restock, StoreError, StoreResult, UnitOfWork};

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::PoolTimedOut => StoreError::Timeout,
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => StoreError::Unavailable(err.to_string()),
            sqlx::Error::Database(db) => match db.code() {
                Some(code) if is_transient_sqlstate(&code) => StoreError::Unavailable(err.to_string()),
                Some(code) if code == "23505" => StoreError::Conflict(err.to_string()),
                _ => StoreError::Backend(err.to_string()),
            },
            _ => StoreError::Backend(err.to_string()),
        }
    }
}

/// Serialization failures, deadlocks, lock timeouts, connection exceptions
/// and server shutdowns.
fn is_transient_sqlstate(code: &str) -> bool {
    matches!(code, "40001" | "40P01" | "55P03" | "57P01") || code.starts_with("08")
}

async fn bounded<T, F>(limit: Duration, fut: F) -> StoreResult<T>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(StoreError::from),
        Err(_) => Err(StoreError::Timeout),
    }
}

fn orders_from_rows(rows: Vec<OrderRow>) -> StoreResult<Vec<Order>> {
    rows.into_iter().map(OrderRow::into_domain).collect()
}

/// Postgres-backed datastore.
#[derive(Clone)]
pub struct PgDatastore {
    pool: PgPool,
    timeout: Duration,
}

impl PgDatastore {
    pub fn new(pool: PgPool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }
}

pub struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
    timeout: Duration,
}

impl PgUnitOfWork {
    async fn fetch_order(&mut self, sql: &'static str, id: Uuid) -> StoreResult<Option<Order>> {
        let limit = self.timeout;
        let row = bounded(
            limit,
            sqlx::query_as::<_, OrderRow>(sql)
                .bind(id)
                .fetch_optional(&mut *self.tx),
        )
        .await?;

        row.map(OrderRow::into_domain).transpose()
    }
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn ticket_type(&mut self, id: Uuid) -> StoreResult<Option<TicketType>> {
        let limit = self.timeout;
        let row = bounded(
            limit,
            sqlx::query_as::<_, TicketTypeRow>("SELECT * FROM ticket_types WHERE id = $1")
                .bind(id)
                .fetch_optional(&mut *self.tx),
        )
        .await?;

        Ok(row.map(TicketTypeRow::into_domain))
    }

    async fn decrement_remaining(
        &mut self,
        ticket_type_id: Uuid,
        quantity: i32,
    ) -> StoreResult<Option<TicketType>> {
        let limit = self.timeout;
        let row = bounded(
            limit,
            sqlx::query_as::<_, TicketTypeRow>(
                r#"
                UPDATE ticket_types
                SET remaining = remaining - $2, updated_at = NOW()
                WHERE id = $1 AND remaining >= $2
                RETURNING *
                "#,
            )
            .bind(ticket_type_id)
            .bind(quantity)
            .fetch_optional(&mut *self.tx),
        )
        .await?;

        Ok(row.map(TicketTypeRow::into_domain))
    }

    async fn increment_remaining(
        &mut self,
        ticket_type_id: Uuid,
        quantity: i32,
    ) -> StoreResult<Option<Restock>> {
        let limit = self.timeout;
        let current = bounded(
            limit,
            sqlx::query_as::<_, (i32, i32)>(
                "SELECT remaining, capacity FROM ticket_types WHERE id = $1 FOR UPDATE",
            )
            .bind(ticket_type_id)
            .fetch_optional(&mut *self.tx),
        )
        .await?;

        let Some((previous, capacity)) = current else {
            return Ok(None);
        };

        let remaining = bounded(
            limit,
            sqlx::query_scalar::<_, i32>(
                r#"
                UPDATE ticket_types
                SET remaining = LEAST(capacity, remaining + $2), updated_at = NOW()
                WHERE id = $1
                RETURNING remaining
                "#,
            )
            .bind(ticket_type_id)
            .bind(quantity)
            .fetch_one(&mut *self.tx),
        )
        .await?;

        Ok(Some(Restock {
            previous,
            remaining,
            capacity,
        }))
    }

    async fn insert_order(&mut self, order: &Order) -> StoreResult<bool> {
        let limit = self.timeout;
        let (provider, reference, metadata) = payment_columns(order);
        let result = bounded(
            limit,
            sqlx::query(
                r#"
                INSERT INTO orders (
                    id, user_id, status, total_minor, checkout_ref, checkout_expires_at,
                    payment_provider, payment_reference, payment_metadata, cancel_reason,
                    created_at, updated_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                ON CONFLICT (user_id) WHERE status = 'open' DO NOTHING
                "#,
            )
            .bind(order.id)
            .bind(order.user_id)
            .bind(order.status.as_str())
            .bind(order.total_minor)
            .bind(&order.checkout_ref)
            .bind(order.checkout_expires_at)
            .bind(provider)
            .bind(reference)
            .bind(metadata)
            .bind(&order.cancel_reason)
            .bind(order.created_at)
            .bind(order.updated_at)
            .execute(&mut *self.tx),
        )
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn save_order(&mut self, order: &Order) -> StoreResult<()> {
        let limit = self.timeout;
        let (provider, reference, metadata) = payment_columns(order);
        let result = bounded(
            limit,
            sqlx::query(
                r#"
                UPDATE orders
                SET status = $2, total_minor = $3, checkout_ref = $4, checkout_expires_at = $5,
                    payment_provider = $6, payment_reference = $7, payment_metadata = $8,
                    cancel_reason = $9, updated_at = $10
                WHERE id = $1
                "#,
            )
            .bind(order.id)
            .bind(order.status.as_str())
            .bind(order.total_minor)
            .bind(&order.checkout_ref)
            .bind(order.checkout_expires_at)
            .bind(provider)
            .bind(reference)
            .bind(metadata)
            .bind(&order.cancel_reason)
            .bind(order.updated_at)
            .execute(&mut *self.tx),
        )
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!("order {} no longer exists", order.id)));
        }
        Ok(())
    }

    async fn find_order(&mut self, id: Uuid) -> StoreResult<Option<Order>> {
        self.fetch_order("SELECT * FROM orders WHERE id = $1", id).await
    }

    async fn lock_order(&mut self, id: Uuid) -> StoreResult<Option<Order>> {
        self.fetch_order("SELECT * FROM orders WHERE id = $1 FOR UPDATE", id)
            .await
    }

    async fn find_open_order(&mut self, user_id: Uuid) -> StoreResult<Option<Order>> {
        self.fetch_order(
            "SELECT * FROM orders WHERE user_id = $1 AND status = 'open'",
            user_id,
        )
        .await
    }

    async fn lock_open_order(&mut self, user_id: Uuid) -> StoreResult<Option<Order>> {
        self.fetch_order(
            "SELECT * FROM orders WHERE user_id = $1 AND status = 'open' FOR UPDATE",
            user_id,
        )
        .await
    }

    async fn find_order_by_checkout_ref(
        &mut self,
        checkout_ref: &str,
    ) -> StoreResult<Option<Order>> {
        let limit = self.timeout;
        let row = bounded(
            limit,
            sqlx::query_as::<_, OrderRow>("SELECT * FROM orders WHERE checkout_ref = $1")
                .bind(checkout_ref)
                .fetch_optional(&mut *self.tx),
        )
        .await?;

        row.map(OrderRow::into_domain).transpose()
    }

    async fn orders_for_user(
        &mut self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Order>> {
        let timeout = self.timeout;
        let rows = bounded(
            timeout,
            sqlx::query_as::<_, OrderRow>(
                "SELECT * FROM orders WHERE user_id = $1 ORDER BY created_at DESC LIMIT $2 OFFSET $3",
            )
            .bind(user_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(&mut *self.tx),
        )
        .await?;

        orders_from_rows(rows)
    }

    async fn expired_checkouts(&mut self, now: DateTime<Utc>, limit: i64) -> StoreResult<Vec<Uuid>> {
        let timeout = self.timeout;
        bounded(
            timeout,
            sqlx::query_scalar::<_, Uuid>(
                r#"
                SELECT id FROM orders
                WHERE status = 'awaiting_payment' AND checkout_expires_at < $1
                ORDER BY checkout_expires_at ASC
                LIMIT $2
                "#,
            )
            .bind(now)
            .bind(limit)
            .fetch_all(&mut *self.tx),
        )
        .await
    }

    async fn order_lines(&mut self, order_id: Uuid) -> StoreResult<Vec<OrderLine>> {
        let limit = self.timeout;
        let rows = bounded(
            limit,
            sqlx::query_as::<_, OrderLineRow>(
                "SELECT * FROM order_lines WHERE order_id = $1 ORDER BY created_at ASC, id ASC",
            )
            .bind(order_id)
            .fetch_all(&mut *self.tx),
        )
        .await?;

        Ok(rows.into_iter().map(OrderLineRow::into_domain).collect())
    }

    async fn insert_line(&mut self, line: &OrderLine) -> StoreResult<()> {
        let limit = self.timeout;
        bounded(
            limit,
            sqlx::query(
                r#"
                INSERT INTO order_lines (
                    id, order_id, ticket_type_id, quantity, unit_price_minor, redemption_code, created_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(line.id)
            .bind(line.order_id)
            .bind(line.ticket_type_id)
            .bind(line.quantity)
            .bind(line.unit_price_minor)
            .bind(&line.redemption_code)
            .bind(line.created_at)
            .execute(&mut *self.tx),
        )
        .await?;

        Ok(())
    }

    async fn delete_line(
        &mut self,
        order_id: Uuid,
        line_id: Uuid,
    ) -> StoreResult<Option<OrderLine>> {
        let limit = self.timeout;
        let row = bounded(
            limit,
            sqlx::query_as::<_, OrderLineRow>(
                "DELETE FROM order_lines WHERE id = $1 AND order_id = $2 RETURNING *",
            )
            .bind(line_id)
            .bind(order_id)
            .fetch_optional(&mut *self.tx),
        )
        .await?;

        Ok(row.map(OrderLineRow::into_domain))
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let this = *self;
        bounded(this.timeout, this.tx.commit()).await
    }
}

fn payment_columns(order: &Order) -> (Option<&str>, Option<&str>, Option<&serde_json::Value>) {
    match &order.payment {
        Some(payment) => (
            Some(payment.provider.as_str()),
            payment.reference.as_deref(),
            Some(&payment.metadata),
        ),
        None => (None, None, None),
    }
}

#[async_trait]
impl Datastore for PgDatastore {
    async fn begin(&self) -> StoreResult<Box<dyn UnitOfWork>> {
        let tx = bounded(self.timeout, self.pool.begin()).await?;
        Ok(Box::new(PgUnitOfWork {
            tx,
            timeout: self.timeout,
        }))
    }

    async fn ping(&self) -> StoreResult<()> {
        bounded(self.timeout, sqlx::query("SELECT 1").execute(&self.pool)).await?;
        Ok(())
    }

    async fn insert_event(&self, event: &Event) -> StoreResult<()> {
        bounded(
            self.timeout,
            sqlx::query(
                r#"
                INSERT INTO events (id, producer_id, name, venue, starts_at, created_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(event.id)
            .bind(event.producer_id)
            .bind(&event.name)
            .bind(&event.venue)
            .bind(event.starts_at)
            .bind(event.created_at)
            .execute(&self.pool),
        )
        .await?;

        Ok(())
    }

    async fn event(&self, id: Uuid) -> StoreResult<Option<Event>> {
        let row = bounded(
            self.timeout,
            sqlx::query_as::<_, EventRow>("SELECT * FROM events WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool),
        )
        .await?;

        Ok(row.map(EventRow::into_domain))
    }

    async fn list_events(&self, limit: i64, offset: i64) -> StoreResult<Vec<Event>> {
        let rows = bounded(
            self.timeout,
            sqlx::query_as::<_, EventRow>(
                "SELECT * FROM events ORDER BY starts_at ASC, id ASC LIMIT $1 OFFSET $2",
            )
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool),
        )
        .await?;

        Ok(rows.into_iter().map(EventRow::into_domain).collect())
    }

    async fn insert_ticket_type(&self, ticket_type: &TicketType) -> StoreResult<()> {
        bounded(
            self.timeout,
            sqlx::query(
                r#"
                INSERT INTO ticket_types (
                    id, event_id, name, price_minor, capacity, remaining, created_at, updated_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(ticket_type.id)
            .bind(ticket_type.event_id)
            .bind(&ticket_type.name)
            .bind(ticket_type.price_minor)
            .bind(ticket_type.capacity)
            .bind(ticket_type.remaining)
            .bind(ticket_type.created_at)
            .bind(ticket_type.updated_at)
            .execute(&self.pool),
        )
        .await?;

        Ok(())
    }

    async fn ticket_type(&self, id: Uuid) -> StoreResult<Option<TicketType>> {
        let row = bounded(
            self.timeout,
            sqlx::query_as::<_, TicketTypeRow>("SELECT * FROM ticket_types WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool),
        )
        .await?;

        Ok(row.map(TicketTypeRow::into_domain))
    }

    async fn ticket_types_for_event(&self, event_id: Uuid) -> StoreResult<Vec<TicketType>> {
        let rows = bounded(
            self.timeout,
            sqlx::query_as::<_, TicketTypeRow>(
                "SELECT * FROM ticket_types WHERE event_id = $1 ORDER BY created_at ASC, name ASC",
            )
            .bind(event_id)
            .fetch_all(&self.pool),
        )
        .await?;

        Ok(rows.into_iter().map(TicketTypeRow::into_domain).collect())
    }

    async fn ticket_sales(&self, event_id: Uuid) -> StoreResult<Vec<TicketSales>> {
        let rows = bounded(
            self.timeout,
            sqlx::query_as::<_, TicketSalesRow>(
                r#"
                SELECT
                    t.id AS ticket_type_id,
                    t.name,
                    t.capacity,
                    t.remaining,
                    COALESCE(SUM(l.quantity) FILTER (WHERE o.status IN ('open', 'awaiting_payment')), 0)::BIGINT AS held,
                    COALESCE(SUM(l.quantity) FILTER (WHERE o.status = 'confirmed'), 0)::BIGINT AS sold,
                    COALESCE(SUM(l.quantity * l.unit_price_minor) FILTER (WHERE o.status = 'confirmed'), 0)::BIGINT AS gross_minor
                FROM ticket_types t
                LEFT JOIN order_lines l ON l.ticket_type_id = t.id
                LEFT JOIN orders o ON o.id = l.order_id
                WHERE t.event_id = $1
                GROUP BY t.id
                ORDER BY t.created_at ASC, t.name ASC
                "#,
            )
            .bind(event_id)
            .fetch_all(&self.pool),
        )
        .await?;

        Ok(rows.into_iter().map(TicketSalesRow::into_domain).collect())
    }

    async fn payment_event_seen(&self, event_id: &str) -> StoreResult<bool> {
        bounded(
            self.timeout,
            sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS (SELECT 1 FROM payment_events WHERE event_id = $1)",
            )
            .bind(event_id)
            .fetch_one(&self.pool),
        )
        .await
    }

    async fn record_payment_event(&self, event: &PaymentEvent) -> StoreResult<bool> {
        let result = bounded(
            self.timeout,
            sqlx::query(
                r#"
                INSERT INTO payment_events (event_id, checkout_ref, status, received_at)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (event_id) DO NOTHING
                "#,
            )
            .bind(&event.event_id)
            .bind(&event.checkout_ref)
            .bind(&event.status)
            .bind(event.received_at)
            .execute(&self.pool),
        )
        .await?;

        Ok(result.rows_affected() == 1)
    }
}
