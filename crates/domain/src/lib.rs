//! Domain layer for the order-fulfillment backend.
//!
//! This crate holds the data model and the rules that do not need I/O:
//! - `Money` arithmetic in cents
//! - Product and cart-line stock checks (the advisory, add-to-cart side)
//! - The `Order` aggregate with its immutable, price-snapshotted lines
//! - The order status state machine
//! - Payment intents and their terminal states

pub mod cart;
pub mod error;
pub mod money;
pub mod order;
pub mod payment;
pub mod product;

pub use cart::{CartItem, CartLine, merge_quantity};
pub use error::DomainError;
pub use money::Money;
pub use order::{Order, OrderLine, OrderStatus};
pub use payment::{PaymentIntent, PaymentStatus, Settlement};
pub use product::{NewProduct, Product, ProductUpdate, slugify};
