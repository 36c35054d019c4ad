//! Cart to order conversion.

use std::time::Instant;

use chrono::Utc;
use common::{OrderId, UserId};
use domain::{CartLine, Order, OrderLine};
use store::Store;

use crate::error::{FulfillmentError, Result};
use crate::inventory;

/// Converts a user's cart into a pending order in one unit of work.
///
/// Within a single transaction the engine:
/// 1. Loads the cart lines with their products, ordered by product id, and
///    locks them
/// 2. Rejects the whole checkout if any line exceeds current stock
/// 3. Conditionally decrements stock for each line
/// 4. Snapshots prices into order lines and totals them
/// 5. Inserts the order with its lines
/// 6. Clears the cart
/// 7. Commits
///
/// Any failure drops the transaction, so stock, cart and orders are left
/// exactly as they were.
#[derive(Clone)]
pub struct CheckoutEngine<S: Store> {
    store: S,
}

impl<S: Store> CheckoutEngine<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Places an order for everything in the user's cart.
    #[tracing::instrument(skip(self))]
    pub async fn checkout(&self, user_id: UserId) -> Result<Order> {
        let started = Instant::now();

        let result = self.place_order(user_id).await;
        metrics::histogram!("checkout_duration_seconds").record(started.elapsed().as_secs_f64());

        match &result {
            Ok(order) => {
                metrics::counter!("checkouts_total").increment(1);
                tracing::info!(
                    order_id = %order.id(),
                    total = %order.total(),
                    lines = order.lines().len(),
                    "checkout completed"
                );
            }
            Err(e) => {
                metrics::counter!("checkout_failures_total", "reason" => e.reason()).increment(1);
                if matches!(e, FulfillmentError::TransactionFailure(_)) {
                    tracing::warn!(error = %e, retryable = e.is_retryable(), "checkout failed");
                } else {
                    tracing::info!(reason = e.reason(), error = %e, "checkout rejected");
                }
            }
        }
        result
    }

    async fn place_order(&self, user_id: UserId) -> Result<Order> {
        if self.store.cart_lines(user_id).await?.is_empty() {
            return Err(FulfillmentError::EmptyCart);
        }

        let mut tx = self.store.begin().await?;

        let lines = tx.lock_cart_lines(user_id).await?;
        // Emptied by a concurrent request since the check above
        if lines.is_empty() {
            return Err(FulfillmentError::EmptyCart);
        }

        for line in &lines {
            line.ensure_fulfillable()?;
        }
        for line in &lines {
            inventory::take(tx.as_mut(), line.product_id, line.quantity).await?;
        }

        let snapshot = lines
            .iter()
            .map(CartLine::snapshot)
            .collect::<std::result::Result<Vec<OrderLine>, _>>()?;
        let order = Order::place(OrderId::new(), user_id, snapshot, Utc::now())?;

        tx.insert_order(&order).await?;
        tx.clear_cart(user_id).await?;
        tx.commit().await?;

        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::ProductId;
    use domain::{CartItem, Money, NewProduct, Product};
    use store::{FailPoint, InMemoryStore};

    async fn product(store: &InMemoryStore, name: &str, cents: i64, stock: u32) -> Product {
        let product = NewProduct::new(name, Money::from_cents(cents), stock)
            .into_product(ProductId::new(), Utc::now());
        let mut tx = store.begin().await.unwrap();
        tx.insert_product(&product).await.unwrap();
        tx.commit().await.unwrap();
        product
    }

    async fn put_in_cart(store: &InMemoryStore, user_id: UserId, product: &Product, quantity: u32) {
        let now = Utc::now();
        let mut tx = store.begin().await.unwrap();
        tx.upsert_cart_item(&CartItem {
            user_id,
            product_id: product.id,
            quantity,
            created_at: now,
            updated_at: now,
        })
        .await
        .unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_checkout_snapshots_prices_and_clears_cart() {
        let store = InMemoryStore::new();
        let engine = CheckoutEngine::new(store.clone());
        let user = UserId::new();
        let a = product(&store, "Alpha", 1000, 5).await;
        let b = product(&store, "Beta", 250, 10).await;
        put_in_cart(&store, user, &a, 2).await;
        put_in_cart(&store, user, &b, 4).await;

        let order = engine.checkout(user).await.unwrap();

        assert_eq!(order.total().cents(), 3000);
        assert_eq!(order.lines().len(), 2);
        assert!(store.cart_lines(user).await.unwrap().is_empty());
        assert_eq!(store.get_product(a.id).await.unwrap().unwrap().stock, 3);
        assert_eq!(store.get_product(b.id).await.unwrap().unwrap().stock, 6);
        assert!(store.get_order(order.id()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_empty_cart_is_rejected() {
        let store = InMemoryStore::new();
        let engine = CheckoutEngine::new(store.clone());

        let err = engine.checkout(UserId::new()).await.unwrap_err();
        assert!(matches!(err, FulfillmentError::EmptyCart));
    }

    #[tokio::test]
    async fn test_one_short_line_rejects_the_whole_cart() {
        let store = InMemoryStore::new();
        let engine = CheckoutEngine::new(store.clone());
        let user = UserId::new();
        let plenty = product(&store, "Plenty", 100, 10).await;
        let scarce = product(&store, "Scarce", 100, 1).await;
        put_in_cart(&store, user, &plenty, 3).await;
        put_in_cart(&store, user, &scarce, 2).await;

        let err = engine.checkout(user).await.unwrap_err();

        assert!(matches!(
            err,
            FulfillmentError::InsufficientStock { product_id, requested: 2, available: 1 }
                if product_id == scarce.id
        ));
        assert_eq!(store.get_product(plenty.id).await.unwrap().unwrap().stock, 10);
        assert_eq!(store.cart_lines(user).await.unwrap().len(), 2);
        assert_eq!(store.order_count().await, 0);
    }

    #[tokio::test]
    async fn test_inactive_product_blocks_checkout() {
        let store = InMemoryStore::new();
        let engine = CheckoutEngine::new(store.clone());
        let user = UserId::new();
        let mut retired = product(&store, "Retired", 100, 10).await;
        put_in_cart(&store, user, &retired, 1).await;

        retired.active = false;
        let mut tx = store.begin().await.unwrap();
        tx.update_product(&retired).await.unwrap();
        tx.commit().await.unwrap();

        let err = engine.checkout(user).await.unwrap_err();
        assert!(matches!(err, FulfillmentError::ProductUnavailable(id) if id == retired.id));
    }

    #[tokio::test]
    async fn test_failure_after_decrement_leaves_no_trace() {
        let store = InMemoryStore::new();
        let engine = CheckoutEngine::new(store.clone());
        let user = UserId::new();
        let widget = product(&store, "Widget", 1000, 5).await;
        put_in_cart(&store, user, &widget, 2).await;
        store.fail_next(FailPoint::ClearCart).await;

        let err = engine.checkout(user).await.unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(store.get_product(widget.id).await.unwrap().unwrap().stock, 5);
        assert_eq!(store.cart_lines(user).await.unwrap().len(), 1);
        assert_eq!(store.order_count().await, 0);

        // A clean retry re-validates and succeeds
        engine.checkout(user).await.unwrap();
        assert_eq!(store.get_product(widget.id).await.unwrap().unwrap().stock, 3);
    }
}
