use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use utoipa::ToSchema;

use crate::services::{CatalogError, ReservationError};
use crate::validation::ValidationError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("only {available} left")]
    InsufficientInventory { available: i32 },

    #[error("cart is empty")]
    EmptyCart,

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

/// Error body returned by every endpoint.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    pub error: String,
    pub status: u16,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available: Option<i32>,
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::BadRequest(_) | AppError::EmptyCart => {
                StatusCode::BAD_REQUEST
            }
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Conflict(_) | AppError::InsufficientInventory { .. } => StatusCode::CONFLICT,
            AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "ValidationError",
            AppError::BadRequest(_) => "BadRequest",
            AppError::NotFound(_) => "NotFound",
            AppError::Unauthorized(_) => "Unauthorized",
            AppError::Forbidden(_) => "Forbidden",
            AppError::Conflict(_) => "Conflict",
            AppError::InsufficientInventory { .. } => "InsufficientInventory",
            AppError::EmptyCart => "EmptyCart",
            AppError::Unavailable(_) => "ServiceUnavailable",
            AppError::Internal(_) => "InternalError",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut body = json!({
            "error": self.to_string(),
            "status": status.as_u16(),
            "code": self.code(),
        });
        if let AppError::InsufficientInventory { available } = &self {
            body["available"] = json!(available);
        }

        let mut response = (status, Json(body)).into_response();
        if status == StatusCode::SERVICE_UNAVAILABLE {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from_static("1"));
        }
        response
    }
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        AppError::Validation(err.to_string())
    }
}

impl From<ReservationError> for AppError {
    fn from(err: ReservationError) -> Self {
        match err {
            ReservationError::InsufficientInventory { available, .. } => {
                AppError::InsufficientInventory { available }
            }
            ReservationError::InvalidQuantity(_) => AppError::Validation(err.to_string()),
            ReservationError::TicketTypeNotFound(_)
            | ReservationError::OrderNotFound(_)
            | ReservationError::LineNotFound(_) => AppError::NotFound(err.to_string()),
            ReservationError::EmptyCart => AppError::EmptyCart,
            ReservationError::InvalidState { .. } => {
                tracing::warn!(error = %err, "rejected request for processed order");
                AppError::Conflict("order already processed".to_string())
            }
            ReservationError::TransientStore(e) => {
                tracing::warn!(error = %e, "transient datastore failure");
                AppError::Unavailable("datastore temporarily unavailable".to_string())
            }
            ReservationError::Store(e) => {
                tracing::error!(error = %e, "datastore failure");
                AppError::Internal("datastore failure".to_string())
            }
        }
    }
}

impl From<CatalogError> for AppError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::EventNotFound(_) => AppError::NotFound(err.to_string()),
            CatalogError::NotEventProducer { .. } => AppError::Forbidden(err.to_string()),
            CatalogError::TransientStore(e) => {
                tracing::warn!(error = %e, "transient datastore failure");
                AppError::Unavailable("datastore temporarily unavailable".to_string())
            }
            CatalogError::Store(e) => {
                tracing::error!(error = %e, "datastore failure");
                AppError::Internal("datastore failure".to_string())
            }
        }
    }
}
