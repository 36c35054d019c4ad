//! Identifier and caller types shared by every crate in the workspace.

mod types;

pub use types::{OrderId, PaymentIntentId, ProductId, Role, UnknownRole, UserId};
