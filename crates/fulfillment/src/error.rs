//! Fulfillment error types.

use common::{OrderId, PaymentIntentId, ProductId};
use domain::{DomainError, Money, OrderStatus};
use store::StoreError;
use thiserror::Error;

/// Errors that can occur in cart, checkout, lifecycle and payment operations.
#[derive(Debug, Error)]
pub enum FulfillmentError {
    /// Checkout attempted with no cart lines. No transaction was opened.
    #[error("Cart is empty")]
    EmptyCart,

    /// Not enough stock, either at checkout or because a concurrent checkout
    /// won the race.
    #[error(
        "Insufficient stock for product {product_id}: requested {requested}, available {available}"
    )]
    InsufficientStock {
        product_id: ProductId,
        requested: u32,
        available: u32,
    },

    /// The product is inactive.
    #[error("Product {0} is not available for purchase")]
    ProductUnavailable(ProductId),

    #[error("Invalid quantity: {quantity} (must be greater than 0)")]
    InvalidQuantity { quantity: u32 },

    /// A product create/update request failed validation.
    #[error("Invalid product: {0}")]
    InvalidProduct(String),

    /// The requested status is not reachable from the current one.
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("Unknown order status: {0}")]
    UnknownStatus(String),

    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    #[error("Product not found: {0}")]
    ProductNotFound(ProductId),

    #[error("Product {0} is not in the cart")]
    CartItemNotFound(ProductId),

    #[error("Payment intent not found: {0}")]
    PaymentIntentNotFound(PaymentIntentId),

    /// An intent's amount no longer matches its order's total.
    #[error("Payment intent {intent_id} amount {intent_amount} does not match order total {order_total}")]
    PaymentAmountMismatch {
        intent_id: PaymentIntentId,
        intent_amount: Money,
        order_total: Money,
    },

    /// Payment can only be started for a pending order.
    #[error("Order {order_id} is {status} and cannot be paid")]
    OrderNotPayable {
        order_id: OrderId,
        status: OrderStatus,
    },

    /// A uniqueness rule was violated (duplicate slug, concurrent change).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The payment gateway refused the request.
    #[error("Payment gateway error: {0}")]
    Gateway(String),

    #[error("Amount overflow")]
    Overflow,

    /// Infrastructure failure. Nothing was committed.
    #[error("Transaction failed: {0}")]
    TransactionFailure(StoreError),
}

impl FulfillmentError {
    /// Returns true if the caller may retry the whole operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FulfillmentError::TransactionFailure(e) if e.is_retryable())
    }

    /// Short label used for metrics and logs.
    pub fn reason(&self) -> &'static str {
        match self {
            FulfillmentError::EmptyCart => "empty_cart",
            FulfillmentError::InsufficientStock { .. } => "insufficient_stock",
            FulfillmentError::ProductUnavailable(_) => "product_unavailable",
            FulfillmentError::InvalidQuantity { .. } => "invalid_quantity",
            FulfillmentError::InvalidProduct(_) => "invalid_product",
            FulfillmentError::InvalidTransition { .. } => "invalid_transition",
            FulfillmentError::UnknownStatus(_) => "unknown_status",
            FulfillmentError::OrderNotFound(_)
            | FulfillmentError::ProductNotFound(_)
            | FulfillmentError::CartItemNotFound(_)
            | FulfillmentError::PaymentIntentNotFound(_) => "not_found",
            FulfillmentError::PaymentAmountMismatch { .. } => "amount_mismatch",
            FulfillmentError::OrderNotPayable { .. } => "order_not_payable",
            FulfillmentError::Conflict(_) => "conflict",
            FulfillmentError::Gateway(_) => "gateway",
            FulfillmentError::Overflow => "overflow",
            FulfillmentError::TransactionFailure(_) => "transaction_failure",
        }
    }
}

impl From<DomainError> for FulfillmentError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::InvalidQuantity { quantity } => {
                FulfillmentError::InvalidQuantity { quantity }
            }
            DomainError::InvalidPrice { price } => {
                FulfillmentError::InvalidProduct(format!("price {price} must not be negative"))
            }
            DomainError::InvalidProduct(msg) => FulfillmentError::InvalidProduct(msg),
            DomainError::InsufficientStock {
                product_id,
                requested,
                available,
            } => FulfillmentError::InsufficientStock {
                product_id,
                requested,
                available,
            },
            DomainError::ProductUnavailable(id) => FulfillmentError::ProductUnavailable(id),
            DomainError::EmptyCart => FulfillmentError::EmptyCart,
            DomainError::InvalidTransition { from, to } => {
                FulfillmentError::InvalidTransition { from, to }
            }
            DomainError::UnknownStatus(s) | DomainError::UnknownPaymentStatus(s) => {
                FulfillmentError::UnknownStatus(s)
            }
            DomainError::Overflow => FulfillmentError::Overflow,
        }
    }
}

impl From<StoreError> for FulfillmentError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(msg) => FulfillmentError::Conflict(msg),
            StoreError::Overflow(_) => FulfillmentError::Overflow,
            other => FulfillmentError::TransactionFailure(other),
        }
    }
}

/// Convenience type alias for fulfillment results.
pub type Result<T> = std::result::Result<T, FulfillmentError>;
