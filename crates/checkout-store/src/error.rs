use common::{CartId, OrderId, SkuId};
use thiserror::Error;

use crate::order::OrderStatus;

/// Broad classification of a checkout failure, used to decide retry and
/// reporting behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Not enough stock; the caller must choose a smaller quantity or a
    /// different SKU. Never retried automatically.
    Capacity,
    /// The cart or order is in a state that makes the request meaningless;
    /// terminal for this request.
    State,
    /// Nothing was committed; safe to retry with backoff.
    Transient,
    /// Storage failure; surfaced as a server error, never swallowed.
    Fatal,
}

/// Errors that can occur in the reservation and settlement subsystem.
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// The ledger does not have enough available stock for the request.
    #[error("out of stock for {sku}: requested {requested}, available {available}")]
    OutOfStock {
        sku: SkuId,
        requested: u32,
        available: u32,
    },

    /// The SKU has no ledger row.
    #[error("unknown SKU: {0}")]
    UnknownSku(SkuId),

    /// The cart does not exist, has expired, or was already reclaimed.
    #[error("cart {0} has expired or does not exist")]
    CartExpiredOrMissing(CartId),

    /// The cart was already converted into an order.
    #[error("cart {0} was already settled")]
    AlreadySettled(CartId),

    /// No order exists with the given ID.
    #[error("order not found: {0}")]
    OrderNotFound(OrderId),

    /// The requested order status change is not a legal transition.
    #[error("invalid order status transition: {from} -> {to}")]
    InvalidStatusTransition { from: OrderStatus, to: OrderStatus },

    /// A quantity of zero was supplied where a positive one is required.
    #[error("quantity must be greater than zero")]
    ZeroQuantity,

    /// The quantity exceeds what the ledger can represent.
    #[error("quantity {0} exceeds the supported maximum")]
    QuantityTooLarge(u32),

    /// A row lock could not be acquired within the bounded wait.
    #[error("contention on {resource}, retry with backoff")]
    Contention { resource: String },

    /// A database error occurred.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl CheckoutError {
    /// Returns the failure class this error belongs to.
    pub fn class(&self) -> ErrorClass {
        match self {
            CheckoutError::OutOfStock { .. } => ErrorClass::Capacity,
            CheckoutError::UnknownSku(_)
            | CheckoutError::CartExpiredOrMissing(_)
            | CheckoutError::AlreadySettled(_)
            | CheckoutError::OrderNotFound(_)
            | CheckoutError::InvalidStatusTransition { .. }
            | CheckoutError::ZeroQuantity
            | CheckoutError::QuantityTooLarge(_) => ErrorClass::State,
            CheckoutError::Contention { .. } => ErrorClass::Transient,
            CheckoutError::Database(_) | CheckoutError::Migration(_) => ErrorClass::Fatal,
        }
    }

    /// Returns true if the operation may be retried without new input.
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

/// Result type for checkout store operations.
pub type Result<T> = std::result::Result<T, CheckoutError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_stock_is_capacity_class() {
        let err = CheckoutError::OutOfStock {
            sku: SkuId::new("SKU-1"),
            requested: 3,
            available: 1,
        };
        assert_eq!(err.class(), ErrorClass::Capacity);
        assert!(!err.is_retryable());
    }

    #[test]
    fn contention_is_the_only_retryable_class() {
        let contention = CheckoutError::Contention {
            resource: "SKU-1".to_string(),
        };
        assert!(contention.is_retryable());

        let state = CheckoutError::CartExpiredOrMissing(CartId::new());
        assert_eq!(state.class(), ErrorClass::State);
        assert!(!state.is_retryable());
    }

    #[test]
    fn database_errors_are_fatal() {
        let err = CheckoutError::Database(sqlx::Error::PoolClosed);
        assert_eq!(err.class(), ErrorClass::Fatal);
        assert!(!err.is_retryable());
    }

    #[test]
    fn error_messages_name_the_offending_resource() {
        let err = CheckoutError::OutOfStock {
            sku: SkuId::new("SKU-9"),
            requested: 5,
            available: 2,
        };
        assert_eq!(
            err.to_string(),
            "out of stock for SKU-9: requested 5, available 2"
        );
    }
}
