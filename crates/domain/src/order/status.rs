//! Order status state machine.

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// The status of an order in its lifecycle.
///
/// State transitions:
/// ```text
/// Pending ──► Confirmed ──► Shipped ──► Delivered
///    │            │
///    └────────────┴──► Cancelled
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Placed at checkout, awaiting payment.
    #[default]
    Pending,

    /// Payment received or confirmed by an admin.
    Confirmed,

    /// Handed to the carrier. Can no longer be cancelled.
    Shipped,

    /// Received by the customer (terminal state).
    Delivered,

    /// Cancelled before shipping; stock has been restored (terminal state).
    Cancelled,
}

impl OrderStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [OrderStatus; 5] = [
        OrderStatus::Pending,
        OrderStatus::Confirmed,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
    ];

    /// The transition table: statuses reachable in one step from `self`.
    pub fn allowed_next(&self) -> &'static [OrderStatus] {
        match self {
            OrderStatus::Pending => &[OrderStatus::Confirmed, OrderStatus::Cancelled],
            OrderStatus::Confirmed => &[OrderStatus::Shipped, OrderStatus::Cancelled],
            OrderStatus::Shipped => &[OrderStatus::Delivered],
            OrderStatus::Delivered | OrderStatus::Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        self.allowed_next().contains(&next)
    }

    /// Validates a transition, returning the target status when allowed.
    pub fn transition_to(&self, next: OrderStatus) -> Result<OrderStatus, DomainError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(DomainError::InvalidTransition {
                from: *self,
                to: next,
            })
        }
    }

    /// Returns true if entering this status must give the order's stock back.
    pub fn restores_stock(&self) -> bool {
        matches!(self, OrderStatus::Cancelled)
    }

    /// Returns true if this is a terminal state (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        self.allowed_next().is_empty()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| DomainError::UnknownStatus(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use OrderStatus::*;

    const VALID: [(OrderStatus, OrderStatus); 5] = [
        (Pending, Confirmed),
        (Pending, Cancelled),
        (Confirmed, Shipped),
        (Confirmed, Cancelled),
        (Shipped, Delivered),
    ];

    #[test]
    fn test_default_status_is_pending() {
        assert_eq!(OrderStatus::default(), Pending);
    }

    #[test]
    fn test_transition_table_is_exhaustive() {
        for from in OrderStatus::ALL {
            for to in OrderStatus::ALL {
                let expected = VALID.contains(&(from, to));
                assert_eq!(
                    from.can_transition_to(to),
                    expected,
                    "{from} -> {to} should be {}",
                    if expected { "allowed" } else { "rejected" }
                );
                match from.transition_to(to) {
                    Ok(next) => {
                        assert!(expected);
                        assert_eq!(next, to);
                    }
                    Err(err) => {
                        assert!(!expected);
                        assert_eq!(err, DomainError::InvalidTransition { from, to });
                    }
                }
            }
        }
    }

    #[test]
    fn test_no_transition_to_current_status() {
        for status in OrderStatus::ALL {
            assert!(!status.can_transition_to(status));
        }
    }

    #[test]
    fn test_shipped_cannot_be_cancelled() {
        assert_eq!(
            Shipped.transition_to(Cancelled),
            Err(DomainError::InvalidTransition {
                from: Shipped,
                to: Cancelled
            })
        );
    }

    #[test]
    fn test_cannot_skip_states() {
        assert!(!Pending.can_transition_to(Shipped));
        assert!(!Pending.can_transition_to(Delivered));
        assert!(!Confirmed.can_transition_to(Delivered));
    }

    #[test]
    fn test_terminal_states() {
        assert!(!Pending.is_terminal());
        assert!(!Confirmed.is_terminal());
        assert!(!Shipped.is_terminal());
        assert!(Delivered.is_terminal());
        assert!(Cancelled.is_terminal());
    }

    #[test]
    fn test_only_cancelled_restores_stock() {
        for status in OrderStatus::ALL {
            assert_eq!(status.restores_stock(), status == Cancelled);
        }
    }

    #[test]
    fn test_parse_round_trips_display() {
        for status in OrderStatus::ALL {
            assert_eq!(status.to_string().parse::<OrderStatus>(), Ok(status));
        }
    }

    #[test]
    fn test_parse_unknown_status() {
        assert_eq!(
            "refunded".parse::<OrderStatus>(),
            Err(DomainError::UnknownStatus("refunded".to_string()))
        );
        assert!("Pending".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn test_serialization_uses_lowercase() {
        assert_eq!(serde_json::to_string(&Shipped).unwrap(), "\"shipped\"");
    }
}
