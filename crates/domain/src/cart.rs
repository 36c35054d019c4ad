//! Cart lines: pending, user-owned purchase intents.

use chrono::{DateTime, Utc};
use common::{ProductId, UserId};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::money::Money;
use crate::order::OrderLine;

/// A stored cart line. `(user_id, product_id)` is unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub user_id: UserId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A cart line joined with its product's current price and stock.
///
/// Checkout reads these inside its transaction, so `stock` is the value the
/// transaction observed (and has locked, on stores with row locks).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price: Money,
    pub stock: u32,
    pub active: bool,
}

impl CartLine {
    /// Live subtotal at the current catalog price.
    pub fn subtotal(&self) -> Result<Money, DomainError> {
        self.unit_price
            .checked_multiply(self.quantity)
            .ok_or(DomainError::Overflow)
    }

    /// Authoritative stock check performed at checkout.
    pub fn ensure_fulfillable(&self) -> Result<(), DomainError> {
        if !self.active {
            return Err(DomainError::ProductUnavailable(self.product_id));
        }
        if self.quantity > self.stock {
            return Err(DomainError::InsufficientStock {
                product_id: self.product_id,
                requested: self.quantity,
                available: self.stock,
            });
        }
        Ok(())
    }

    /// Freezes the current price into an order line.
    pub fn snapshot(&self) -> Result<OrderLine, DomainError> {
        OrderLine::new(self.product_id, self.quantity, self.unit_price)
    }
}

/// Merges a repeat add into an existing cart quantity.
pub fn merge_quantity(existing: u32, added: u32) -> Result<u32, DomainError> {
    if added == 0 {
        return Err(DomainError::InvalidQuantity { quantity: added });
    }
    existing.checked_add(added).ok_or(DomainError::Overflow)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(quantity: u32, stock: u32, active: bool) -> CartLine {
        CartLine {
            product_id: ProductId::new(),
            product_name: "Widget".to_string(),
            quantity,
            unit_price: Money::from_cents(1000),
            stock,
            active,
        }
    }

    #[test]
    fn test_merge_quantity_adds() {
        assert_eq!(merge_quantity(2, 3), Ok(5));
    }

    #[test]
    fn test_merge_quantity_rejects_zero_and_overflow() {
        assert_eq!(
            merge_quantity(2, 0),
            Err(DomainError::InvalidQuantity { quantity: 0 })
        );
        assert_eq!(merge_quantity(u32::MAX, 1), Err(DomainError::Overflow));
    }

    #[test]
    fn test_fulfillable_at_exact_stock() {
        assert!(line(5, 5, true).ensure_fulfillable().is_ok());
    }

    #[test]
    fn test_not_fulfillable_over_stock() {
        let l = line(6, 5, true);
        assert_eq!(
            l.ensure_fulfillable(),
            Err(DomainError::InsufficientStock {
                product_id: l.product_id,
                requested: 6,
                available: 5
            })
        );
    }

    #[test]
    fn test_not_fulfillable_when_inactive() {
        let l = line(1, 5, false);
        assert_eq!(
            l.ensure_fulfillable(),
            Err(DomainError::ProductUnavailable(l.product_id))
        );
    }

    #[test]
    fn test_subtotal_overflow() {
        let mut l = line(2, 5, true);
        assert_eq!(l.subtotal(), Ok(Money::from_cents(2000)));
        l.unit_price = Money::from_cents(i64::MAX);
        assert_eq!(l.subtotal(), Err(DomainError::Overflow));
    }

    #[test]
    fn test_snapshot_copies_price() {
        let l = line(3, 5, true);
        let snap = l.snapshot().unwrap();
        assert_eq!(snap.unit_price, l.unit_price);
        assert_eq!(snap.subtotal.cents(), 3000);
    }
}
