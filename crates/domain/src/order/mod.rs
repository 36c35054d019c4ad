//! Order aggregate and its status machine.

mod aggregate;
mod status;

pub use aggregate::{Order, OrderLine};
pub use status::OrderStatus;
