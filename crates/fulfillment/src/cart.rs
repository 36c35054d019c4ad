//! Cart management.
//!
//! Stock checks here are advisory: they reject obviously unfulfillable
//! quantities early. Checkout re-validates against locked stock.

use chrono::Utc;
use common::{ProductId, UserId};
use domain::{CartItem, CartLine, Money, merge_quantity};
use store::Store;

use crate::error::{FulfillmentError, Result};

/// A cart line with its subtotal at the current price.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricedLine {
    pub line: CartLine,
    pub subtotal: Money,
}

/// A user's cart priced at current catalog prices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartView {
    pub lines: Vec<PricedLine>,
    pub total: Money,
}

/// User-scoped cart operations. Every lookup is keyed by
/// `(user_id, product_id)`, so one user can never touch another's lines.
#[derive(Clone)]
pub struct CartService<S: Store> {
    store: S,
}

impl<S: Store> CartService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Adds `quantity` units, merging with an existing line.
    #[tracing::instrument(skip(self))]
    pub async fn add_item(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<CartItem> {
        if quantity == 0 {
            return Err(FulfillmentError::InvalidQuantity { quantity });
        }

        let mut tx = self.store.begin().await?;
        let product = tx
            .get_product(product_id)
            .await?
            .ok_or(FulfillmentError::ProductNotFound(product_id))?;

        let now = Utc::now();
        let item = match tx.get_cart_item(user_id, product_id).await? {
            Some(mut existing) => {
                existing.quantity = merge_quantity(existing.quantity, quantity)?;
                existing.updated_at = now;
                existing
            }
            None => CartItem {
                user_id,
                product_id,
                quantity,
                created_at: now,
                updated_at: now,
            },
        };
        product.ensure_available(item.quantity)?;

        tx.upsert_cart_item(&item).await?;
        tx.commit().await?;
        Ok(item)
    }

    /// Returns the cart with live prices and total.
    ///
    /// Fails with `Overflow` when a subtotal or the total is not
    /// representable.
    pub async fn view(&self, user_id: UserId) -> Result<CartView> {
        let lines = self
            .store
            .cart_lines(user_id)
            .await?
            .into_iter()
            .map(|line| -> Result<PricedLine> {
                let subtotal = line.subtotal()?;
                Ok(PricedLine { line, subtotal })
            })
            .collect::<Result<Vec<_>>>()?;
        let total = Money::checked_sum(lines.iter().map(|priced| priced.subtotal))
            .ok_or(FulfillmentError::Overflow)?;
        Ok(CartView { lines, total })
    }

    /// Replaces the quantity of an existing line.
    #[tracing::instrument(skip(self))]
    pub async fn update_quantity(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<CartItem> {
        if quantity == 0 {
            return Err(FulfillmentError::InvalidQuantity { quantity });
        }

        let mut tx = self.store.begin().await?;
        let mut item = tx
            .get_cart_item(user_id, product_id)
            .await?
            .ok_or(FulfillmentError::CartItemNotFound(product_id))?;
        let product = tx
            .get_product(product_id)
            .await?
            .ok_or(FulfillmentError::ProductNotFound(product_id))?;
        product.ensure_available(quantity)?;

        item.quantity = quantity;
        item.updated_at = Utc::now();
        tx.upsert_cart_item(&item).await?;
        tx.commit().await?;
        Ok(item)
    }

    #[tracing::instrument(skip(self))]
    pub async fn remove_item(&self, user_id: UserId, product_id: ProductId) -> Result<()> {
        let mut tx = self.store.begin().await?;
        if !tx.delete_cart_item(user_id, product_id).await? {
            return Err(FulfillmentError::CartItemNotFound(product_id));
        }
        tx.commit().await?;
        Ok(())
    }

    /// Empties the cart, returning how many lines were removed.
    #[tracing::instrument(skip(self))]
    pub async fn clear(&self, user_id: UserId) -> Result<u64> {
        let mut tx = self.store.begin().await?;
        let removed = tx.clear_cart(user_id).await?;
        tx.commit().await?;
        Ok(removed)
    }
}
