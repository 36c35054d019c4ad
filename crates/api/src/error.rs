//! API error types with HTTP response mapping.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use fulfillment::FulfillmentError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Missing or malformed caller identity.
    Unauthorized(String),
    /// Caller lacks the required role.
    Forbidden(String),
    /// The request conflicts with current state.
    Conflict(String),
    /// Error raised by the fulfillment core.
    Fulfillment(FulfillmentError),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Fulfillment(err) => fulfillment_error_to_response(err),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn fulfillment_error_to_response(err: FulfillmentError) -> (StatusCode, String) {
    let status = match &err {
        FulfillmentError::EmptyCart
        | FulfillmentError::ProductUnavailable(_)
        | FulfillmentError::InvalidQuantity { .. }
        | FulfillmentError::InvalidProduct(_)
        | FulfillmentError::UnknownStatus(_)
        | FulfillmentError::Overflow => StatusCode::BAD_REQUEST,
        FulfillmentError::OrderNotFound(_)
        | FulfillmentError::ProductNotFound(_)
        | FulfillmentError::CartItemNotFound(_)
        | FulfillmentError::PaymentIntentNotFound(_) => StatusCode::NOT_FOUND,
        FulfillmentError::InsufficientStock { .. }
        | FulfillmentError::InvalidTransition { .. }
        | FulfillmentError::OrderNotPayable { .. }
        | FulfillmentError::PaymentAmountMismatch { .. }
        | FulfillmentError::Conflict(_) => StatusCode::CONFLICT,
        FulfillmentError::Gateway(_) => StatusCode::BAD_GATEWAY,
        FulfillmentError::TransactionFailure(_) if err.is_retryable() => {
            tracing::warn!(error = %err, "transaction failed, client may retry");
            StatusCode::SERVICE_UNAVAILABLE
        }
        FulfillmentError::TransactionFailure(_) => {
            tracing::error!(error = %err, "transaction failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, err.to_string())
}

impl From<FulfillmentError> for ApiError {
    fn from(err: FulfillmentError) -> Self {
        ApiError::Fulfillment(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}
