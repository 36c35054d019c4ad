//! Payment intents tracked against orders.

use chrono::{DateTime, Utc};
use common::{OrderId, PaymentIntentId};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::money::Money;
use crate::order::Order;

/// Status of a payment intent. `Paid` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Paid,
    Failed,
}

impl PaymentStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "paid" => Ok(PaymentStatus::Paid),
            "failed" => Ok(PaymentStatus::Failed),
            other => Err(DomainError::UnknownPaymentStatus(other.to_string())),
        }
    }
}

/// Result of applying a gateway outcome to an intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// The intent moved from pending to the given terminal status.
    Applied(PaymentStatus),
    /// The intent was already terminal; nothing changed.
    AlreadyTerminal(PaymentStatus),
}

/// A tracked request to collect payment for an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: PaymentIntentId,
    pub order_id: OrderId,
    /// Equal to the order's total when the intent was created.
    pub amount: Money,
    pub status: PaymentStatus,
    pub gateway_ref: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentIntent {
    /// Creates a pending intent for the full order total.
    pub fn for_order(
        id: PaymentIntentId,
        order: &Order,
        gateway_ref: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            order_id: order.id(),
            amount: order.total(),
            status: PaymentStatus::Pending,
            gateway_ref: gateway_ref.into(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Applies a terminal gateway outcome exactly once.
    ///
    /// Settling with `Pending` is a no-op reported as the current state.
    pub fn settle(&mut self, outcome: PaymentStatus, now: DateTime<Utc>) -> Settlement {
        if self.status.is_terminal() || !outcome.is_terminal() {
            return Settlement::AlreadyTerminal(self.status);
        }
        self.status = outcome;
        self.updated_at = now;
        Settlement::Applied(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::OrderLine;
    use common::{ProductId, UserId};

    fn intent() -> PaymentIntent {
        let order = Order::place(
            OrderId::new(),
            UserId::new(),
            vec![OrderLine::new(ProductId::new(), 5, Money::from_cents(1000)).unwrap()],
            Utc::now(),
        )
        .unwrap();
        PaymentIntent::for_order(PaymentIntentId::new(), &order, "PAY-1", Utc::now())
    }

    #[test]
    fn test_intent_amount_matches_order_total() {
        let intent = intent();
        assert_eq!(intent.amount.cents(), 5000);
        assert_eq!(intent.status, PaymentStatus::Pending);
    }

    #[test]
    fn test_settle_paid_once() {
        let mut intent = intent();
        assert_eq!(
            intent.settle(PaymentStatus::Paid, Utc::now()),
            Settlement::Applied(PaymentStatus::Paid)
        );
        assert_eq!(
            intent.settle(PaymentStatus::Paid, Utc::now()),
            Settlement::AlreadyTerminal(PaymentStatus::Paid)
        );
        assert_eq!(
            intent.settle(PaymentStatus::Failed, Utc::now()),
            Settlement::AlreadyTerminal(PaymentStatus::Paid)
        );
        assert_eq!(intent.status, PaymentStatus::Paid);
    }

    #[test]
    fn test_failed_is_terminal() {
        let mut intent = intent();
        intent.settle(PaymentStatus::Failed, Utc::now());
        assert_eq!(
            intent.settle(PaymentStatus::Paid, Utc::now()),
            Settlement::AlreadyTerminal(PaymentStatus::Failed)
        );
    }

    #[test]
    fn test_settle_with_pending_changes_nothing() {
        let mut intent = intent();
        let before = intent.clone();
        intent.settle(PaymentStatus::Pending, Utc::now());
        assert_eq!(intent, before);
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!("paid".parse::<PaymentStatus>(), Ok(PaymentStatus::Paid));
        assert!(matches!(
            "refunded".parse::<PaymentStatus>(),
            Err(DomainError::UnknownPaymentStatus(_))
        ));
    }
}
