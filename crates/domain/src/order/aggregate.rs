//! Order aggregate implementation.

use chrono::{DateTime, Utc};
use common::{OrderId, ProductId, UserId};
use serde::{Deserialize, Serialize};

use super::OrderStatus;
use crate::error::DomainError;
use crate::money::Money;

/// An immutable, priced record of what was purchased.
///
/// `unit_price` is the catalog price captured at checkout and never follows
/// later catalog changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_id: ProductId,
    pub quantity: u32,
    pub unit_price: Money,
    pub subtotal: Money,
}

impl OrderLine {
    pub fn new(product_id: ProductId, quantity: u32, unit_price: Money) -> Result<Self, DomainError> {
        if quantity == 0 {
            return Err(DomainError::InvalidQuantity { quantity });
        }
        if unit_price.is_negative() {
            return Err(DomainError::InvalidPrice { price: unit_price });
        }
        let subtotal = unit_price
            .checked_multiply(quantity)
            .ok_or(DomainError::Overflow)?;
        Ok(Self {
            product_id,
            quantity,
            unit_price,
            subtotal,
        })
    }
}

/// Order aggregate root.
///
/// Lines and total are fixed at creation; only the status and `updated_at`
/// change afterwards, and only through [`Order::transition`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    id: OrderId,
    user_id: UserId,
    lines: Vec<OrderLine>,
    total: Money,
    status: OrderStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Order {
    /// Places a new pending order from snapshotted lines.
    ///
    /// Lines are kept in ascending product order and the total is the sum of
    /// their subtotals.
    pub fn place(
        id: OrderId,
        user_id: UserId,
        mut lines: Vec<OrderLine>,
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        if lines.is_empty() {
            return Err(DomainError::EmptyCart);
        }
        lines.sort_by_key(|line| line.product_id);

        let total = Money::checked_sum(lines.iter().map(|line| line.subtotal))
            .ok_or(DomainError::Overflow)?;

        Ok(Self {
            id,
            user_id,
            lines,
            total,
            status: OrderStatus::Pending,
            created_at: now,
            updated_at: now,
        })
    }

    /// Rebuilds an order from persisted parts.
    pub fn from_parts(
        id: OrderId,
        user_id: UserId,
        lines: Vec<OrderLine>,
        total: Money,
        status: OrderStatus,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            user_id,
            lines,
            total,
            status,
            created_at,
            updated_at,
        }
    }

    /// Moves the order to `next`, returning the status it left.
    ///
    /// Fails with `InvalidTransition` and leaves the order untouched when
    /// `next` is not reachable from the current status.
    pub fn transition(
        &mut self,
        next: OrderStatus,
        now: DateTime<Utc>,
    ) -> Result<OrderStatus, DomainError> {
        let previous = self.status;
        self.status = previous.transition_to(next)?;
        self.updated_at = now;
        Ok(previous)
    }
}

// Query methods
impl Order {
    pub fn id(&self) -> OrderId {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
    }

    pub fn total(&self) -> Money {
        self.total
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Returns the total quantity of all lines.
    pub fn total_quantity(&self) -> u64 {
        self.lines.iter().map(|line| u64::from(line.quantity)).sum()
    }

    pub fn is_owned_by(&self, user_id: UserId) -> bool {
        self.user_id == user_id
    }
}
