//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use checkout_store::CheckoutError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Bad request from the client.
    BadRequest(String),
    /// Resource not found.
    NotFound(String),
    /// Checkout subsystem error.
    Checkout(CheckoutError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Checkout(err) => checkout_error_to_response(err),
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn checkout_error_to_response(err: CheckoutError) -> (StatusCode, String) {
    match &err {
        // Capacity: actionable, the shopper can pick less or something else.
        CheckoutError::OutOfStock { .. } => (StatusCode::CONFLICT, err.to_string()),

        // State: terminal for this request.
        CheckoutError::CartExpiredOrMissing(_) => (StatusCode::GONE, err.to_string()),
        CheckoutError::AlreadySettled(_) | CheckoutError::InvalidStatusTransition { .. } => {
            (StatusCode::CONFLICT, err.to_string())
        }
        CheckoutError::UnknownSku(_) | CheckoutError::OrderNotFound(_) => {
            (StatusCode::NOT_FOUND, err.to_string())
        }
        CheckoutError::ZeroQuantity | CheckoutError::QuantityTooLarge(_) => {
            (StatusCode::BAD_REQUEST, err.to_string())
        }

        // Transient: the caller may retry with backoff.
        CheckoutError::Contention { .. } => (
            StatusCode::SERVICE_UNAVAILABLE,
            "high contention, retry shortly".to_string(),
        ),

        // Fatal: log the detail, return a generic body.
        CheckoutError::Database(_) | CheckoutError::Migration(_) => {
            tracing::error!(error = %err, "storage failure");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal error".to_string(),
            )
        }
    }
}

impl From<CheckoutError> for ApiError {
    fn from(err: CheckoutError) -> Self {
        ApiError::Checkout(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{CartId, SkuId};

    fn status_of(err: CheckoutError) -> StatusCode {
        ApiError::Checkout(err).into_response().status()
    }

    #[test]
    fn capacity_and_state_errors_map_to_client_statuses() {
        assert_eq!(
            status_of(CheckoutError::OutOfStock {
                sku: SkuId::new("SKU-1"),
                requested: 2,
                available: 0,
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(CheckoutError::CartExpiredOrMissing(CartId::new())),
            StatusCode::GONE
        );
        assert_eq!(
            status_of(CheckoutError::AlreadySettled(CartId::new())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(CheckoutError::UnknownSku(SkuId::new("SKU-1"))),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn transient_errors_ask_for_retry() {
        assert_eq!(
            status_of(CheckoutError::Contention {
                resource: "SKU-1".to_string()
            }),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn fatal_errors_hide_internal_detail() {
        let response =
            ApiError::Checkout(CheckoutError::Database(sqlx::Error::PoolClosed)).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
