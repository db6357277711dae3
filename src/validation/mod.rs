use axum::{
    async_trait,
    extract::{FromRequest, Request},
    Json,
};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use std::fmt;

use crate::error::AppError;

pub const EVENT_NAME_MAX_LEN: usize = 200;
pub const VENUE_MAX_LEN: usize = 200;
pub const TICKET_TYPE_NAME_MAX_LEN: usize = 100;
pub const TICKET_TYPE_MAX_CAPACITY: i32 = 100_000;
pub const PAGE_MAX_LIMIT: i64 = 100;
pub const PAGE_DEFAULT_LIMIT: i64 = 20;

/// JSON body extractor whose rejections (bad syntax, unknown fields, wrong
/// content type) become `400` responses in the API's error shape.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ApiJson(value)),
            Err(rejection) => Err(AppError::BadRequest(rejection.body_text())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

pub type ValidationResult = Result<(), ValidationError>;

pub fn sanitize_string(value: &str) -> String {
    value
        .chars()
        .filter(|ch| !ch.is_control())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn validate_required(field: &'static str, value: &str) -> ValidationResult {
    if value.trim().is_empty() {
        return Err(ValidationError::new(field, "must not be empty"));
    }

    Ok(())
}

pub fn validate_max_len(field: &'static str, value: &str, max_len: usize) -> ValidationResult {
    if value.chars().count() > max_len {
        return Err(ValidationError::new(
            field,
            format!("must be at most {} characters", max_len),
        ));
    }

    Ok(())
}

pub fn validate_range<T>(field: &'static str, value: T, min: T, max: T) -> ValidationResult
where
    T: PartialOrd + fmt::Display,
{
    if value < min || value > max {
        return Err(ValidationError::new(
            field,
            format!("must be between {} and {}", min, max),
        ));
    }

    Ok(())
}

/// Sanitizes a free-text name and checks it is present and short enough.
pub fn clean_name(field: &'static str, value: &str, max_len: usize) -> Result<String, ValidationError> {
    let cleaned = sanitize_string(value);
    validate_required(field, &cleaned)?;
    validate_max_len(field, &cleaned, max_len)?;
    Ok(cleaned)
}

pub fn validate_quantity(quantity: i32, max_line_quantity: i32) -> ValidationResult {
    validate_range("quantity", quantity, 1, max_line_quantity)
}

pub fn validate_price_minor(price_minor: i64) -> ValidationResult {
    if price_minor < 0 {
        return Err(ValidationError::new("unitPrice", "must not be negative"));
    }

    Ok(())
}

pub fn validate_capacity(capacity: i32) -> ValidationResult {
    validate_range("capacity", capacity, 1, TICKET_TYPE_MAX_CAPACITY)
}

pub fn validate_future(field: &'static str, at: DateTime<Utc>, now: DateTime<Utc>) -> ValidationResult {
    if at <= now {
        return Err(ValidationError::new(field, "must be in the future"));
    }

    Ok(())
}

/// Clamps optional paging parameters to sane bounds.
pub fn page(limit: Option<i64>, offset: Option<i64>) -> Result<(i64, i64), ValidationError> {
    let limit = limit.unwrap_or(PAGE_DEFAULT_LIMIT);
    let offset = offset.unwrap_or(0);
    validate_range("limit", limit, 1, PAGE_MAX_LIMIT)?;
    if offset < 0 {
        return Err(ValidationError::new("offset", "must not be negative"));
    }
    Ok((limit, offset))
}
