//! Orders, their lines and the checkout state machine.
//!
//! An order is a user's cart while `open`. Transitions:
//! `open -> awaiting_payment -> confirmed`, and `open | awaiting_payment -> cancelled`.
//! `confirmed` and `cancelled` are terminal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

use super::payment::PaymentDetails;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Open,
    AwaitingPayment,
    Confirmed,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Open => "open",
            OrderStatus::AwaitingPayment => "awaiting_payment",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Confirmed | OrderStatus::Cancelled)
    }

    /// Whether lines in an order with this status hold inventory.
    pub fn holds_inventory(&self) -> bool {
        !matches!(self, OrderStatus::Cancelled)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(OrderStatus::Open),
            "awaiting_payment" => Ok(OrderStatus::AwaitingPayment),
            "confirmed" => Ok(OrderStatus::Confirmed),
            "cancelled" => Ok(OrderStatus::Cancelled),
            other => Err(format!("unknown order status '{}'", other)),
        }
    }
}

/// Result of applying a transition that is allowed to be repeated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied(OrderStatus),
    Unchanged(OrderStatus),
}

impl Transition {
    pub fn status(&self) -> OrderStatus {
        match self {
            Transition::Applied(status) | Transition::Unchanged(status) => *status,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, Transition::Applied(_))
    }
}

/// A transition attempted from a state that does not allow it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: OrderStatus,
    pub action: &'static str,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub status: OrderStatus,
    pub total_minor: i64,
    pub checkout_ref: Option<String>,
    pub checkout_expires_at: Option<DateTime<Utc>>,
    pub payment: Option<PaymentDetails>,
    pub cancel_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// A new, empty cart.
    pub fn open(user_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            status: OrderStatus::Open,
            total_minor: 0,
            checkout_ref: None,
            checkout_expires_at: None,
            payment: None,
            cancel_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn ensure_open(&self, action: &'static str) -> Result<(), InvalidTransition> {
        if self.status == OrderStatus::Open {
            Ok(())
        } else {
            Err(InvalidTransition {
                from: self.status,
                action,
            })
        }
    }

    pub fn mark_awaiting_payment(
        &mut self,
        checkout_ref: String,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), InvalidTransition> {
        self.ensure_open("start checkout")?;
        self.status = OrderStatus::AwaitingPayment;
        self.checkout_ref = Some(checkout_ref);
        self.checkout_expires_at = Some(expires_at);
        self.updated_at = now;
        Ok(())
    }

    /// Repeated confirmations of a confirmed order are no-ops.
    pub fn confirm(
        &mut self,
        payment: PaymentDetails,
        now: DateTime<Utc>,
    ) -> Result<Transition, InvalidTransition> {
        match self.status {
            OrderStatus::Confirmed => Ok(Transition::Unchanged(OrderStatus::Confirmed)),
            OrderStatus::AwaitingPayment => {
                self.status = OrderStatus::Confirmed;
                self.payment = Some(payment);
                self.updated_at = now;
                Ok(Transition::Applied(OrderStatus::Confirmed))
            }
            from => Err(InvalidTransition {
                from,
                action: "confirm payment",
            }),
        }
    }

    /// A failure notification for an order that already reached a terminal
    /// state leaves it untouched.
    pub fn fail_payment(
        &mut self,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Transition, InvalidTransition> {
        match self.status {
            OrderStatus::Cancelled | OrderStatus::Confirmed => Ok(Transition::Unchanged(self.status)),
            OrderStatus::AwaitingPayment => {
                self.cancel(reason, now);
                Ok(Transition::Applied(OrderStatus::Cancelled))
            }
            from => Err(InvalidTransition {
                from,
                action: "fail payment",
            }),
        }
    }

    pub fn abandon(&mut self, now: DateTime<Utc>) -> Result<Transition, InvalidTransition> {
        match self.status {
            OrderStatus::Cancelled => Ok(Transition::Unchanged(OrderStatus::Cancelled)),
            OrderStatus::Open => {
                self.cancel("abandoned", now);
                Ok(Transition::Applied(OrderStatus::Cancelled))
            }
            from => Err(InvalidTransition {
                from,
                action: "abandon",
            }),
        }
    }

    pub fn is_checkout_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == OrderStatus::AwaitingPayment
            && self.checkout_expires_at.map(|at| at < now).unwrap_or(false)
    }

    fn cancel(&mut self, reason: &str, now: DateTime<Utc>) {
        self.status = OrderStatus::Cancelled;
        self.cancel_reason = Some(reason.to_string());
        self.updated_at = now;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderLine {
    pub id: Uuid,
    pub order_id: Uuid,
    pub ticket_type_id: Uuid,
    pub quantity: i32,
    /// Price captured when the line was added, independent of later price changes.
    pub unit_price_minor: i64,
    pub redemption_code: String,
    pub created_at: DateTime<Utc>,
}

impl OrderLine {
    pub fn new(order_id: Uuid, ticket_type_id: Uuid, quantity: i32, unit_price_minor: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id,
            ticket_type_id,
            quantity,
            unit_price_minor,
            redemption_code: generate_redemption_code(),
            created_at: Utc::now(),
        }
    }

    pub fn subtotal_minor(&self) -> i64 {
        i64::from(self.quantity) * self.unit_price_minor
    }
}

/// Order totals are always derived from the lines.
pub fn order_total(lines: &[OrderLine]) -> i64 {
    lines.iter().map(OrderLine::subtotal_minor).sum()
}

fn generate_redemption_code() -> String {
    Uuid::new_v4().simple().to_string().to_uppercase()
}
