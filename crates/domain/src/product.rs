//! Catalog products as seen by the fulfillment core.

use chrono::{DateTime, Utc};
use common::ProductId;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::money::Money;

/// A sellable product with its live price and available stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub slug: String,
    pub description: String,
    /// Free-form grouping used by the catalog filter. Empty when unset.
    pub category: String,
    pub price: Money,
    pub stock: u32,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Checks that `quantity` units could be bought right now.
    ///
    /// This is the advisory check used by cart operations. Checkout re-runs
    /// the authoritative check against locked stock.
    pub fn ensure_available(&self, quantity: u32) -> Result<(), DomainError> {
        if quantity == 0 {
            return Err(DomainError::InvalidQuantity { quantity });
        }
        if !self.active {
            return Err(DomainError::ProductUnavailable(self.id));
        }
        if quantity > self.stock {
            return Err(DomainError::InsufficientStock {
                product_id: self.id,
                requested: quantity,
                available: self.stock,
            });
        }
        Ok(())
    }
}

/// Input for creating a product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProduct {
    pub name: String,
    pub slug: String,
    pub description: String,
    pub category: String,
    pub price: Money,
    pub stock: u32,
    pub active: bool,
}

impl NewProduct {
    /// Creates an active product whose slug is derived from its name.
    pub fn new(name: impl Into<String>, price: Money, stock: u32) -> Self {
        let name = name.into();
        Self {
            slug: slugify(&name),
            name,
            description: String::new(),
            category: String::new(),
            price,
            stock,
            active: true,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into().trim().to_string();
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if self.name.trim().is_empty() {
            return Err(DomainError::InvalidProduct("name is required".to_string()));
        }
        if self.slug.is_empty() {
            return Err(DomainError::InvalidProduct("slug is required".to_string()));
        }
        if self.price.is_negative() {
            return Err(DomainError::InvalidPrice { price: self.price });
        }
        Ok(())
    }

    /// Materializes the product with a fresh identifier.
    pub fn into_product(self, id: ProductId, now: DateTime<Utc>) -> Product {
        Product {
            id,
            name: self.name,
            slug: self.slug,
            description: self.description,
            category: self.category,
            price: self.price,
            stock: self.stock,
            active: self.active,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update of a product's catalog fields. `None` fields are left
/// untouched. Stock is never set here; see restocking in fulfillment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub price: Option<Money>,
    pub active: Option<bool>,
}

impl ProductUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.category.is_none()
            && self.price.is_none()
            && self.active.is_none()
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if let Some(name) = &self.name
            && name.trim().is_empty()
        {
            return Err(DomainError::InvalidProduct("name is required".to_string()));
        }
        match self.price {
            Some(price) if price.is_negative() => Err(DomainError::InvalidPrice { price }),
            _ => Ok(()),
        }
    }

    pub fn apply(&self, product: &mut Product, now: DateTime<Utc>) {
        if let Some(name) = &self.name {
            product.name = name.clone();
        }
        if let Some(description) = &self.description {
            product.description = description.clone();
        }
        if let Some(category) = &self.category {
            product.category = category.trim().to_string();
        }
        if let Some(price) = self.price {
            product.price = price;
        }
        if let Some(active) = self.active {
            product.active = active;
        }
        product.updated_at = now;
    }
}

/// Lowercases and hyphenates a product name into a URL slug.
pub fn slugify(name: &str) -> String {
    name.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(|part| part.to_ascii_lowercase())
        .collect::<Vec<_>>()
        .join("-")
}
