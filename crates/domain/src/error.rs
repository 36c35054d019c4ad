//! Domain error types.

use common::ProductId;
use thiserror::Error;

use crate::money::Money;
use crate::order::OrderStatus;

/// Rule violations detected by the domain model.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    /// Quantities must be at least one.
    #[error("Invalid quantity: {quantity} (must be greater than 0)")]
    InvalidQuantity { quantity: u32 },

    /// Prices must not be negative.
    #[error("Invalid price: {price} (must not be negative)")]
    InvalidPrice { price: Money },

    /// A product field failed validation.
    #[error("Invalid product: {0}")]
    InvalidProduct(String),

    /// Requested quantity exceeds the product's stock.
    #[error("Insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: ProductId,
        requested: u32,
        available: u32,
    },

    /// The product is inactive and cannot be purchased.
    #[error("Product {0} is not available for purchase")]
    ProductUnavailable(ProductId),

    /// An order cannot be placed without lines.
    #[error("Cart is empty")]
    EmptyCart,

    /// The requested status is not in the allowed-next set of the current one.
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    /// A status string did not name a known order status.
    #[error("Unknown order status: {0}")]
    UnknownStatus(String),

    /// A status string did not name a known payment status.
    #[error("Unknown payment status: {0}")]
    UnknownPaymentStatus(String),

    /// Arithmetic on an amount or quantity overflowed.
    #[error("Amount overflow")]
    Overflow,
}
