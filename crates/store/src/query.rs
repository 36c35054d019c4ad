use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use common::UserId;
use domain::{Money, Order, OrderStatus, Product};

/// Default page size for list queries.
pub const DEFAULT_LIMIT: usize = 20;

/// Upper bound on page size.
pub const MAX_LIMIT: usize = 100;

/// Builder for constructing order queries.
///
/// Results are ordered newest first.
#[derive(Debug, Clone)]
pub struct OrderQuery {
    /// Filter by owning user.
    pub user_id: Option<UserId>,

    /// Filter by current status.
    pub status: Option<OrderStatus>,

    /// Orders created at or after this timestamp.
    pub from: Option<DateTime<Utc>>,

    /// Orders created at or before this timestamp.
    pub to: Option<DateTime<Utc>>,

    /// Maximum number of orders to return.
    pub limit: usize,

    /// Number of orders to skip.
    pub offset: usize,
}

impl Default for OrderQuery {
    fn default() -> Self {
        Self {
            user_id: None,
            status: None,
            from: None,
            to: None,
            limit: DEFAULT_LIMIT,
            offset: 0,
        }
    }
}

impl OrderQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a query for one user's orders.
    pub fn for_user(user_id: UserId) -> Self {
        Self {
            user_id: Some(user_id),
            ..Default::default()
        }
    }

    pub fn status(mut self, status: OrderStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn from(mut self, from: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self
    }

    pub fn to(mut self, to: DateTime<Utc>) -> Self {
        self.to = Some(to);
        self
    }

    /// Selects a 1-based page of `limit` orders. `limit` is clamped to
    /// `1..=MAX_LIMIT`.
    pub fn page(mut self, page: usize, limit: usize) -> Self {
        self.limit = limit.clamp(1, MAX_LIMIT);
        self.offset = page.saturating_sub(1).saturating_mul(self.limit);
        self
    }

    /// Returns true if the order passes every filter (pagination aside).
    pub fn matches(&self, order: &Order) -> bool {
        if let Some(user_id) = self.user_id
            && order.user_id() != user_id
        {
            return false;
        }
        if let Some(status) = self.status
            && order.status() != status
        {
            return false;
        }
        in_range(order.created_at(), self.from, self.to)
    }
}

/// Catalog listing query. Only active products are listed.
#[derive(Debug, Clone)]
pub struct ProductQuery {
    /// Case-insensitive substring of the product name.
    pub search: Option<String>,
    /// Exact category match.
    pub category: Option<String>,
    pub limit: usize,
    pub offset: usize,
}

impl Default for ProductQuery {
    fn default() -> Self {
        Self {
            search: None,
            category: None,
            limit: DEFAULT_LIMIT,
            offset: 0,
        }
    }
}

impl ProductQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn search(mut self, term: impl Into<String>) -> Self {
        let term = term.into();
        self.search = (!term.trim().is_empty()).then_some(term);
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        let category = category.into().trim().to_string();
        self.category = (!category.is_empty()).then_some(category);
        self
    }

    pub fn page(mut self, page: usize, limit: usize) -> Self {
        self.limit = limit.clamp(1, MAX_LIMIT);
        self.offset = page.saturating_sub(1).saturating_mul(self.limit);
        self
    }

    pub fn matches(&self, product: &Product) -> bool {
        if !product.active {
            return false;
        }
        if let Some(category) = &self.category
            && product.category != *category
        {
            return false;
        }
        match &self.search {
            Some(term) => product
                .name
                .to_lowercase()
                .contains(&term.to_lowercase()),
            None => true,
        }
    }
}

/// One page of results plus the unpaginated match count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
}

/// Order counts by status and revenue over a date range.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderStats {
    pub counts: BTreeMap<OrderStatus, u64>,
    /// Sum of totals of orders that were not cancelled, clamped at the
    /// largest representable amount.
    pub revenue: Money,
}

impl OrderStats {
    pub fn count(&self, status: OrderStatus) -> u64 {
        self.counts.get(&status).copied().unwrap_or(0)
    }

    /// Folds one order into the stats.
    pub fn record(&mut self, order: &Order) {
        *self.counts.entry(order.status()).or_insert(0) += 1;
        if order.status() != OrderStatus::Cancelled {
            self.revenue = self.revenue.saturating_add(order.total());
        }
    }
}

pub(crate) fn in_range(
    at: DateTime<Utc>,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
) -> bool {
    from.is_none_or(|from| at >= from) && to.is_none_or(|to| at <= to)
}
