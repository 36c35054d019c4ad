//! Inventory-consistent order fulfillment.
//!
//! This crate holds the parts of the system where concurrent requests could
//! corrupt shared state:
//! 1. Checkout converts a cart into an order while deducting stock
//! 2. The order state machine governs status changes
//! 3. Cancellation restores the stock an order took
//! 4. Payment reconciliation confirms orders from gateway callbacks
//!
//! Every multi-row change runs inside one store transaction and either
//! commits completely or not at all.

pub mod cart;
pub mod catalog;
pub mod checkout;
pub mod error;
pub mod inventory;
pub mod orders;
pub mod payment;
pub mod transitions;

pub use cart::{CartService, CartView, PricedLine};
pub use catalog::CatalogService;
pub use checkout::CheckoutEngine;
pub use error::{FulfillmentError, Result};
pub use orders::OrderQueries;
pub use payment::{
    PaymentGateway, PaymentReconciler, Reconciliation, SimulatedGateway, StartedPayment,
};
pub use transitions::OrderStateMachine;
