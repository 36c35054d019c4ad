use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OrderId, PaymentIntentId, ProductId, UserId};
use domain::{CartItem, CartLine, Order, OrderStatus, PaymentIntent, Product};

use crate::{OrderQuery, OrderStats, Page, ProductQuery, Result};

/// Entry point to the relational store.
///
/// Reads on the store itself see committed state only. Every write happens
/// inside a [`StoreTransaction`] obtained from [`Store::begin`].
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait Store: Send + Sync {
    /// Opens a unit of work.
    ///
    /// Fails with a retryable error if the transaction cannot be acquired.
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>>;

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>>;

    /// Lists active products matching the query, ordered by name.
    async fn list_products(&self, query: &ProductQuery) -> Result<Page<Product>>;

    /// Returns the user's cart joined with live product data, ordered by
    /// product id. Takes no locks.
    async fn cart_lines(&self, user_id: UserId) -> Result<Vec<CartLine>>;

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>>;

    /// Lists orders matching the query, newest first.
    async fn list_orders(&self, query: &OrderQuery) -> Result<Page<Order>>;

    /// Counts orders by status and sums revenue for orders created in the
    /// inclusive range.
    async fn order_stats(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<OrderStats>;

    async fn get_payment_intent(&self, id: PaymentIntentId) -> Result<Option<PaymentIntent>>;
}

/// A unit of work against the store.
///
/// Nothing written through a transaction is visible to other readers until
/// [`commit`](StoreTransaction::commit) succeeds. Dropping a transaction
/// without committing rolls it back.
#[async_trait]
pub trait StoreTransaction: Send {
    async fn get_product(&mut self, id: ProductId) -> Result<Option<Product>>;

    /// Inserts a new product. Fails with `Conflict` if the slug is taken.
    async fn insert_product(&mut self, product: &Product) -> Result<()>;

    /// Writes the product's catalog fields. Stock is not touched.
    async fn update_product(&mut self, product: &Product) -> Result<()>;

    /// Decrements stock by `quantity` iff at least that much remains.
    ///
    /// Returns whether the decrement happened. A `false` leaves the row
    /// untouched.
    async fn try_decrement_stock(&mut self, product_id: ProductId, quantity: u32) -> Result<bool>;

    /// Unconditionally increments stock by `quantity`.
    async fn increment_stock(&mut self, product_id: ProductId, quantity: u32) -> Result<()>;

    async fn get_cart_item(
        &mut self,
        user_id: UserId,
        product_id: ProductId,
    ) -> Result<Option<CartItem>>;

    async fn upsert_cart_item(&mut self, item: &CartItem) -> Result<()>;

    /// Returns true if a row was deleted.
    async fn delete_cart_item(&mut self, user_id: UserId, product_id: ProductId) -> Result<bool>;

    /// Deletes every cart row of the user, returning how many were removed.
    async fn clear_cart(&mut self, user_id: UserId) -> Result<u64>;

    /// Loads the user's cart joined with its products, ordered by product id,
    /// locking the product rows for the rest of the transaction.
    async fn lock_cart_lines(&mut self, user_id: UserId) -> Result<Vec<CartLine>>;

    /// Inserts an order together with its lines.
    async fn insert_order(&mut self, order: &Order) -> Result<()>;

    /// Loads an order and locks it for the rest of the transaction.
    async fn get_order_for_update(&mut self, id: OrderId) -> Result<Option<Order>>;

    /// Sets the order's status to `to` only if it is still `from`.
    ///
    /// Returns false if the order was not in `from`.
    async fn update_order_status(
        &mut self,
        id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<bool>;

    async fn insert_payment_intent(&mut self, intent: &PaymentIntent) -> Result<()>;

    /// Loads a payment intent and locks it for the rest of the transaction.
    async fn get_payment_intent_for_update(
        &mut self,
        id: PaymentIntentId,
    ) -> Result<Option<PaymentIntent>>;

    /// Returns the order's open (pending) intent, if any.
    async fn find_pending_intent(&mut self, order_id: OrderId) -> Result<Option<PaymentIntent>>;

    /// Writes the intent's status and `updated_at`.
    async fn update_payment_intent(&mut self, intent: &PaymentIntent) -> Result<()>;

    /// Makes every write of this transaction visible atomically.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discards every write of this transaction.
    async fn rollback(self: Box<Self>) -> Result<()>;
}
