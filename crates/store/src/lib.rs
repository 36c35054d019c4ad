//! Transactional persistence for the fulfillment core.
//!
//! A [`Store`] opens [`StoreTransaction`]s: units of work that either commit
//! every write they made or none of them. Stock only changes through the
//! transaction's `try_decrement_stock` / `increment_stock` primitives.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod query;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::{FailPoint, InMemoryStore};
pub use postgres::PostgresStore;
pub use query::{OrderQuery, OrderStats, Page, ProductQuery};
pub use store::{Store, StoreTransaction};
