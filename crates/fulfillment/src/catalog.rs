//! Product catalog service.

use chrono::Utc;
use common::ProductId;
use domain::{NewProduct, Product, ProductUpdate};
use store::{Page, ProductQuery, Store};

use crate::error::{FulfillmentError, Result};

/// Creates, lists and edits products.
///
/// Stock only moves through [`CatalogService::restock`] here; sales and
/// cancellations move it through checkout and the state machine.
#[derive(Clone)]
pub struct CatalogService<S: Store> {
    store: S,
}

impl<S: Store> CatalogService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    #[tracing::instrument(skip(self, new_product), fields(slug = %new_product.slug))]
    pub async fn create_product(&self, new_product: NewProduct) -> Result<Product> {
        new_product.validate()?;
        let product = new_product.into_product(ProductId::new(), Utc::now());

        let mut tx = self.store.begin().await?;
        tx.insert_product(&product).await?;
        tx.commit().await?;

        tracing::info!(product_id = %product.id, stock = product.stock, "product created");
        Ok(product)
    }

    /// Loads any product, active or not.
    pub async fn get_product(&self, id: ProductId) -> Result<Product> {
        self.store
            .get_product(id)
            .await?
            .ok_or(FulfillmentError::ProductNotFound(id))
    }

    /// Loads a product that is visible in the public catalog.
    pub async fn get_listed_product(&self, id: ProductId) -> Result<Product> {
        match self.store.get_product(id).await? {
            Some(product) if product.active => Ok(product),
            _ => Err(FulfillmentError::ProductNotFound(id)),
        }
    }

    pub async fn list_products(&self, query: &ProductQuery) -> Result<Page<Product>> {
        Ok(self.store.list_products(query).await?)
    }

    #[tracing::instrument(skip(self, update))]
    pub async fn update_product(&self, id: ProductId, update: ProductUpdate) -> Result<Product> {
        if update.is_empty() {
            return Err(FulfillmentError::InvalidProduct(
                "no fields to update".to_string(),
            ));
        }
        update.validate()?;

        let mut tx = self.store.begin().await?;
        let mut product = tx
            .get_product(id)
            .await?
            .ok_or(FulfillmentError::ProductNotFound(id))?;
        update.apply(&mut product, Utc::now());
        tx.update_product(&product).await?;
        tx.commit().await?;

        Ok(product)
    }

    /// Adds `quantity` units to a product's stock.
    #[tracing::instrument(skip(self))]
    pub async fn restock(&self, id: ProductId, quantity: u32) -> Result<Product> {
        if quantity == 0 {
            return Err(FulfillmentError::InvalidQuantity { quantity });
        }

        let mut tx = self.store.begin().await?;
        if tx.get_product(id).await?.is_none() {
            return Err(FulfillmentError::ProductNotFound(id));
        }
        tx.increment_stock(id, quantity).await?;
        let product = tx
            .get_product(id)
            .await?
            .ok_or(FulfillmentError::ProductNotFound(id))?;
        tx.commit().await?;

        tracing::info!(product_id = %id, quantity, stock = product.stock, "product restocked");
        Ok(product)
    }
}

