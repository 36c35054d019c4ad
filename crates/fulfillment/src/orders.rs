//! Read-side order queries for customers and administrators.

use chrono::{DateTime, Utc};
use common::{OrderId, UserId};
use domain::Order;
use store::{OrderQuery, OrderStats, Page, Store};

use crate::error::{FulfillmentError, Result};

#[derive(Clone)]
pub struct OrderQueries<S: Store> {
    store: S,
}

impl<S: Store> OrderQueries<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// The caller's own orders, newest first.
    pub async fn my_orders(&self, user_id: UserId, page: usize, limit: usize) -> Result<Page<Order>> {
        let query = OrderQuery::for_user(user_id).page(page, limit);
        Ok(self.store.list_orders(&query).await?)
    }

    /// One of the caller's orders. Someone else's order reads as missing.
    pub async fn order_details(&self, user_id: UserId, order_id: OrderId) -> Result<Order> {
        self.store
            .get_order(order_id)
            .await?
            .filter(|order| order.is_owned_by(user_id))
            .ok_or(FulfillmentError::OrderNotFound(order_id))
    }

    pub async fn list_orders(&self, query: &OrderQuery) -> Result<Page<Order>> {
        Ok(self.store.list_orders(query).await?)
    }

    pub async fn get_order(&self, order_id: OrderId) -> Result<Order> {
        self.store
            .get_order(order_id)
            .await?
            .ok_or(FulfillmentError::OrderNotFound(order_id))
    }

    pub async fn stats(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<OrderStats> {
        Ok(self.store.order_stats(from, to).await?)
    }
}
