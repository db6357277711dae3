//! Framework-agnostic domain types for the catalog, carts and orders.

pub mod catalog;
pub mod order;
pub mod payment;

pub use catalog::{Event, TicketSales, TicketType};
pub use order::{order_total, InvalidTransition, Order, OrderLine, OrderStatus, Transition};
pub use payment::{PaymentDetails, PaymentEvent};
