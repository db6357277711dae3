pub mod adapters;
pub mod cli;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod ports;
pub mod services;
pub mod utils;
pub mod validation;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::CorsLayer;

use crate::config::Config;
use crate::middleware::ip_filter::IpFilterLayer;
use crate::middleware::request_logger::{request_logger_middleware, RequestLogging};
use crate::ports::Datastore;
use crate::services::{CatalogService, PaymentNotifier, ReservationService, RetryPolicy};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Datastore>,
    pub reservations: ReservationService,
    pub catalog: CatalogService,
    pub notifier: PaymentNotifier,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(store: Arc<dyn Datastore>, config: Config) -> Self {
        let retry = RetryPolicy {
            max_attempts: config.store_retry_attempts,
            base_delay: Duration::from_millis(config.store_retry_base_ms),
        };
        let reservations = ReservationService::new(store.clone(), config.checkout_ttl(), retry);
        let catalog = CatalogService::new(store.clone());
        let notifier = PaymentNotifier::new(
            store.clone(),
            reservations.clone(),
            config.payment_webhook_secret.clone(),
        );

        Self {
            store,
            reservations,
            catalog,
            notifier,
            config: Arc::new(config),
        }
    }
}

pub fn create_app(state: AppState) -> Router {
    let webhooks = Router::new()
        .route("/webhooks/payments", post(handlers::webhook::payment_webhook))
        .layer(IpFilterLayer::new(
            state.config.webhook_allowed_ips.clone(),
            state.config.trusted_proxy_depth,
        ));

    let logging = RequestLogging {
        log_body: state.config.log_request_body,
    };

    Router::new()
        .route("/health", get(handlers::health))
        .route("/api-docs/openapi.json", get(handlers::openapi_json))
        .route(
            "/cart",
            get(handlers::cart::get_cart).delete(handlers::cart::abandon_cart),
        )
        .route("/cart/items", post(handlers::cart::add_item))
        .route("/cart/items/:line_id", delete(handlers::cart::remove_item))
        .route("/cart/checkout", post(handlers::cart::checkout))
        .route("/orders", get(handlers::orders::list_orders))
        .route("/orders/:order_id", get(handlers::orders::get_order))
        .route("/events", get(handlers::events::list_events))
        .route("/events/:event_id", get(handlers::events::get_event))
        .route("/producer/events", post(handlers::events::create_event))
        .route(
            "/producer/events/:event_id/ticket-types",
            post(handlers::events::add_ticket_type),
        )
        .route(
            "/producer/events/:event_id/sales",
            get(handlers::events::event_sales),
        )
        .merge(webhooks)
        .layer(axum::middleware::from_fn_with_state(
            logging,
            request_logger_middleware,
        ))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
