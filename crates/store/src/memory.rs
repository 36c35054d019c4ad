use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OrderId, PaymentIntentId, ProductId, UserId};
use domain::{CartItem, CartLine, Order, OrderStatus, PaymentIntent, PaymentStatus, Product};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{
    OrderQuery, OrderStats, Page, ProductQuery, Result, StoreError,
    query::in_range,
    store::{Store, StoreTransaction},
};

/// A step at which the in-memory store can be told to fail once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    DecrementStock,
    IncrementStock,
    ClearCart,
    InsertOrder,
    UpdateOrderStatus,
    UpdatePaymentIntent,
    Commit,
}

#[derive(Debug, Clone, Default)]
struct Tables {
    products: HashMap<ProductId, Product>,
    cart_items: BTreeMap<(UserId, ProductId), CartItem>,
    orders: HashMap<OrderId, Order>,
    payment_intents: HashMap<PaymentIntentId, PaymentIntent>,
}

impl Tables {
    fn cart_lines(&self, user_id: UserId) -> Result<Vec<CartLine>> {
        self.cart_items
            .values()
            .filter(|item| item.user_id == user_id)
            .map(|item| {
                let product = self.products.get(&item.product_id).ok_or_else(|| {
                    StoreError::Corrupt(format!(
                        "cart item references missing product {}",
                        item.product_id
                    ))
                })?;
                Ok(CartLine {
                    product_id: product.id,
                    product_name: product.name.clone(),
                    quantity: item.quantity,
                    unit_price: product.price,
                    stock: product.stock,
                    active: product.active,
                })
            })
            .collect()
    }
}

#[derive(Debug, Default)]
struct Shared {
    committed: Tables,
    fail_point: Option<FailPoint>,
}

/// In-memory store for tests and database-less runs.
///
/// A transaction holds the store's lock from `begin` until it commits or is
/// dropped and works on a private copy of the tables, so transactions are
/// serializable and readers never observe uncommitted writes.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    shared: Arc<Mutex<Shared>>,
    lock_timeout: Option<Duration>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `begin` give up with a retryable error after waiting `timeout`
    /// for a concurrent transaction to finish.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    /// Makes the next transaction that reaches `point` fail there.
    pub async fn fail_next(&self, point: FailPoint) {
        self.shared.lock().await.fail_point = Some(point);
    }

    /// Returns the number of committed orders.
    pub async fn order_count(&self) -> usize {
        self.shared.lock().await.committed.orders.len()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        let lock = self.shared.clone().lock_owned();
        let guard = match self.lock_timeout {
            Some(timeout) => tokio::time::timeout(timeout, lock).await.map_err(|_| {
                tracing::warn!(?timeout, "timed out waiting for the store lock");
                StoreError::Unavailable(format!("no transaction available after {timeout:?}"))
            })?,
            None => lock.await,
        };
        let working = guard.committed.clone();
        Ok(Box::new(MemoryTransaction { guard, working }))
    }

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>> {
        Ok(self.shared.lock().await.committed.products.get(&id).cloned())
    }

    async fn list_products(&self, query: &ProductQuery) -> Result<Page<Product>> {
        let shared = self.shared.lock().await;
        let mut products: Vec<_> = shared
            .committed
            .products
            .values()
            .filter(|p| query.matches(p))
            .cloned()
            .collect();
        products.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));

        let total = products.len() as u64;
        let items = products
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .collect();
        Ok(Page { items, total })
    }

    async fn cart_lines(&self, user_id: UserId) -> Result<Vec<CartLine>> {
        self.shared.lock().await.committed.cart_lines(user_id)
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        Ok(self.shared.lock().await.committed.orders.get(&id).cloned())
    }

    async fn list_orders(&self, query: &OrderQuery) -> Result<Page<Order>> {
        let shared = self.shared.lock().await;
        let mut orders: Vec<_> = shared
            .committed
            .orders
            .values()
            .filter(|o| query.matches(o))
            .cloned()
            .collect();
        // Newest first
        orders.sort_by(|a, b| {
            b.created_at()
                .cmp(&a.created_at())
                .then(b.id().cmp(&a.id()))
        });

        let total = orders.len() as u64;
        let items = orders
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .collect();
        Ok(Page { items, total })
    }

    async fn order_stats(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<OrderStats> {
        let shared = self.shared.lock().await;
        let mut stats = OrderStats::default();
        shared
            .committed
            .orders
            .values()
            .filter(|o| in_range(o.created_at(), from, to))
            .for_each(|o| stats.record(o));
        Ok(stats)
    }

    async fn get_payment_intent(&self, id: PaymentIntentId) -> Result<Option<PaymentIntent>> {
        Ok(self
            .shared
            .lock()
            .await
            .committed
            .payment_intents
            .get(&id)
            .cloned())
    }
}

struct MemoryTransaction {
    guard: OwnedMutexGuard<Shared>,
    working: Tables,
}

impl MemoryTransaction {
    fn check(&mut self, point: FailPoint) -> Result<()> {
        if self.guard.fail_point == Some(point) {
            self.guard.fail_point = None;
            return Err(StoreError::Unavailable(format!(
                "injected failure at {point:?}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn get_product(&mut self, id: ProductId) -> Result<Option<Product>> {
        Ok(self.working.products.get(&id).cloned())
    }

    async fn insert_product(&mut self, product: &Product) -> Result<()> {
        if self.working.products.contains_key(&product.id) {
            return Err(StoreError::Conflict(format!(
                "product {} already exists",
                product.id
            )));
        }
        if self
            .working
            .products
            .values()
            .any(|p| p.slug == product.slug)
        {
            return Err(StoreError::Conflict(format!(
                "slug '{}' is already taken",
                product.slug
            )));
        }
        self.working.products.insert(product.id, product.clone());
        Ok(())
    }

    async fn update_product(&mut self, product: &Product) -> Result<()> {
        if let Some(existing) = self.working.products.get_mut(&product.id) {
            let stock = existing.stock;
            *existing = product.clone();
            existing.stock = stock;
        }
        Ok(())
    }

    async fn try_decrement_stock(&mut self, product_id: ProductId, quantity: u32) -> Result<bool> {
        self.check(FailPoint::DecrementStock)?;
        match self.working.products.get_mut(&product_id) {
            Some(product) if product.stock >= quantity => {
                product.stock -= quantity;
                product.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn increment_stock(&mut self, product_id: ProductId, quantity: u32) -> Result<()> {
        self.check(FailPoint::IncrementStock)?;
        let product = self.working.products.get_mut(&product_id).ok_or_else(|| {
            StoreError::Corrupt(format!("stock increment for missing product {product_id}"))
        })?;
        product.stock = product.stock.checked_add(quantity).ok_or_else(|| {
            StoreError::Overflow(format!("stock of product {product_id} would overflow"))
        })?;
        product.updated_at = Utc::now();
        Ok(())
    }

    async fn get_cart_item(
        &mut self,
        user_id: UserId,
        product_id: ProductId,
    ) -> Result<Option<CartItem>> {
        Ok(self.working.cart_items.get(&(user_id, product_id)).cloned())
    }

    async fn upsert_cart_item(&mut self, item: &CartItem) -> Result<()> {
        if !self.working.products.contains_key(&item.product_id) {
            return Err(StoreError::Conflict(format!(
                "product {} does not exist",
                item.product_id
            )));
        }
        self.working
            .cart_items
            .insert((item.user_id, item.product_id), item.clone());
        Ok(())
    }

    async fn delete_cart_item(&mut self, user_id: UserId, product_id: ProductId) -> Result<bool> {
        Ok(self
            .working
            .cart_items
            .remove(&(user_id, product_id))
            .is_some())
    }

    async fn clear_cart(&mut self, user_id: UserId) -> Result<u64> {
        self.check(FailPoint::ClearCart)?;
        let before = self.working.cart_items.len();
        self.working
            .cart_items
            .retain(|(owner, _), _| *owner != user_id);
        Ok((before - self.working.cart_items.len()) as u64)
    }

    async fn lock_cart_lines(&mut self, user_id: UserId) -> Result<Vec<CartLine>> {
        self.working.cart_lines(user_id)
    }

    async fn insert_order(&mut self, order: &Order) -> Result<()> {
        self.check(FailPoint::InsertOrder)?;
        if self.working.orders.contains_key(&order.id()) {
            return Err(StoreError::Conflict(format!(
                "order {} already exists",
                order.id()
            )));
        }
        self.working.orders.insert(order.id(), order.clone());
        Ok(())
    }

    async fn get_order_for_update(&mut self, id: OrderId) -> Result<Option<Order>> {
        Ok(self.working.orders.get(&id).cloned())
    }

    async fn update_order_status(
        &mut self,
        id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<bool> {
        self.check(FailPoint::UpdateOrderStatus)?;
        match self.working.orders.get_mut(&id) {
            Some(order) if order.status() == from => {
                *order = Order::from_parts(
                    order.id(),
                    order.user_id(),
                    order.lines().to_vec(),
                    order.total(),
                    to,
                    order.created_at(),
                    updated_at,
                );
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_payment_intent(&mut self, intent: &PaymentIntent) -> Result<()> {
        let open = self.working.payment_intents.values().any(|existing| {
            existing.order_id == intent.order_id && existing.status == PaymentStatus::Pending
        });
        if open && intent.status == PaymentStatus::Pending {
            return Err(StoreError::Conflict(format!(
                "order {} already has a pending payment intent",
                intent.order_id
            )));
        }
        self.working
            .payment_intents
            .insert(intent.id, intent.clone());
        Ok(())
    }

    async fn get_payment_intent_for_update(
        &mut self,
        id: PaymentIntentId,
    ) -> Result<Option<PaymentIntent>> {
        Ok(self.working.payment_intents.get(&id).cloned())
    }

    async fn find_pending_intent(&mut self, order_id: OrderId) -> Result<Option<PaymentIntent>> {
        Ok(self
            .working
            .payment_intents
            .values()
            .find(|intent| intent.order_id == order_id && intent.status == PaymentStatus::Pending)
            .cloned())
    }

    async fn update_payment_intent(&mut self, intent: &PaymentIntent) -> Result<()> {
        self.check(FailPoint::UpdatePaymentIntent)?;
        if let Some(existing) = self.working.payment_intents.get_mut(&intent.id) {
            existing.status = intent.status;
            existing.updated_at = intent.updated_at;
        }
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        self.check(FailPoint::Commit)?;
        let MemoryTransaction { mut guard, working } = *self;
        guard.committed = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
