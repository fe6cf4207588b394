use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::error::{DbErr, SqlErr};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use uuid::Uuid;

/// A single field-level validation violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldViolation {
    /// Name of the offending field, e.g. `customer.email` or `items[2].quantity`
    pub field: String,
    pub message: String,
}

/// Collected validation violations for one request.
///
/// Validation runs to completion and reports every violation at once rather
/// than stopping at the first offending field.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationFailure {
    pub violations: Vec<FieldViolation>,
}

impl ValidationFailure {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.violations.push(FieldViolation {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }

    /// Resolves to `Err(ServiceError::Validation)` when any violation was recorded.
    pub fn into_result(self) -> Result<(), ServiceError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(ServiceError::Validation(self))
        }
    }
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, v) in self.violations.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}: {}", v.field, v.message)?;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Validation failed: {0}")]
    Validation(ValidationFailure),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(
        "Insufficient stock for product {product_id}: requested {requested}, available {available}"
    )]
    InsufficientStock {
        product_id: Uuid,
        requested: i32,
        available: i32,
    },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(
        #[from]
        #[serde(skip)]
        DbErr,
    ),

    #[error("Event error: {0}")]
    Event(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Other error: {0}")]
    Other(
        #[from]
        #[serde(skip)]
        anyhow::Error,
    ),
}

impl ServiceError {
    /// Convenience constructor for a single-field validation failure.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut failure = ValidationFailure::new();
        failure.push(field, message);
        ServiceError::Validation(failure)
    }

    /// Whether the underlying database error is a unique-constraint violation.
    /// The transaction number generator uses this to decide on a retry.
    pub fn is_unique_violation(&self) -> bool {
        matches!(
            self,
            ServiceError::Database(db_err)
                if matches!(db_err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
        )
    }

    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InsufficientStock { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::InvalidState(_) | Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Database(_) | Self::Event(_) | Self::Internal(_) | Self::Other(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::Database(_) => "Database error".to_string(),
            Self::Event(_) | Self::Internal(_) | Self::Other(_) => {
                "Internal server error".to_string()
            }
            _ => self.to_string(),
        }
    }

    /// Structured payload for the response `details` field, where one exists.
    fn response_details(&self) -> Option<serde_json::Value> {
        match self {
            Self::Validation(failure) => serde_json::to_value(&failure.violations).ok(),
            Self::InsufficientStock {
                product_id,
                requested,
                available,
            } => Some(json!({
                "product_id": product_id,
                "requested": requested,
                "available": available,
                "shortfall": requested - available,
            })),
            _ => None,
        }
    }
}

/// Standardized error body returned by the HTTP layer.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Unprocessable Entity")
    pub error: String,
    /// Human-readable error description
    pub message: String,
    /// Structured error details (field violations, stock shortfall)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    /// ISO 8601 timestamp when the error occurred
    pub timestamp: String,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.response_message(),
            details: self.response_details(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_failure_collects_all_violations() {
        let mut failure = ValidationFailure::new();
        failure.push("customer.email", "email is required");
        failure.push("items[0].quantity", "quantity must be at least 1");

        let err = failure.clone().into_result().unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(failure.violations.len(), 2);
        assert!(err.to_string().contains("customer.email"));
        assert!(err.to_string().contains("items[0].quantity"));
    }

    #[test]
    fn empty_failure_resolves_ok() {
        assert!(ValidationFailure::new().into_result().is_ok());
    }

    #[test]
    fn status_mapping_matches_error_kind() {
        let not_found = ServiceError::NotFound("order TRX-1".into());
        assert_eq!(not_found.status_code(), StatusCode::NOT_FOUND);

        let stock = ServiceError::InsufficientStock {
            product_id: Uuid::new_v4(),
            requested: 5,
            available: 2,
        };
        assert_eq!(stock.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        let details = stock.response_details().unwrap();
        assert_eq!(details["shortfall"], 3);

        let state = ServiceError::InvalidState("order already refunded".into());
        assert_eq!(state.status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn internal_errors_hide_detail_from_responses() {
        let err = ServiceError::Database(DbErr::Custom("connection reset".into()));
        assert_eq!(err.response_message(), "Database error");
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
