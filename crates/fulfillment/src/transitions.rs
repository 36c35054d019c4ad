//! Order status state machine with stock compensation.

use chrono::{DateTime, Utc};
use common::OrderId;
use domain::{Order, OrderStatus};
use store::{Store, StoreTransaction};

use crate::error::{FulfillmentError, Result};
use crate::inventory;

/// Applies status transitions to persisted orders.
///
/// A transition to `Cancelled` restores the stock of every order line in the
/// same transaction as the status write, so either both commit or neither
/// does.
#[derive(Clone)]
pub struct OrderStateMachine<S: Store> {
    store: S,
}

impl<S: Store> OrderStateMachine<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Moves the order to `requested`, returning the updated order.
    #[tracing::instrument(skip(self))]
    pub async fn transition(&self, order_id: OrderId, requested: OrderStatus) -> Result<Order> {
        let mut tx = self.store.begin().await?;
        let order = apply(tx.as_mut(), order_id, requested, Utc::now()).await?;
        tx.commit().await?;

        record(&order);
        Ok(order)
    }

    /// Cancels an order and restocks its lines.
    pub async fn cancel(&self, order_id: OrderId) -> Result<Order> {
        self.transition(order_id, OrderStatus::Cancelled).await
    }
}

/// Validates and writes a transition inside an open transaction.
///
/// The order row is locked before it is read and the status write is a
/// compare-and-set on the status that was read.
pub(crate) async fn apply(
    tx: &mut dyn StoreTransaction,
    order_id: OrderId,
    requested: OrderStatus,
    now: DateTime<Utc>,
) -> Result<Order> {
    let mut order = tx
        .get_order_for_update(order_id)
        .await?
        .ok_or(FulfillmentError::OrderNotFound(order_id))?;

    let from = order.transition(requested, now).inspect_err(|e| {
        tracing::info!(%order_id, error = %e, "transition rejected");
    })?;

    if !tx
        .update_order_status(order_id, from, requested, now)
        .await?
    {
        return Err(FulfillmentError::Conflict(format!(
            "order {order_id} changed status concurrently"
        )));
    }

    if requested.restores_stock() {
        let restored = inventory::restore(tx, order.lines()).await?;
        metrics::counter!("stock_restored_units_total").increment(restored);
        tracing::info!(%order_id, units = restored, "stock restored for cancelled order");
    }

    Ok(order)
}

/// Records a committed transition.
pub(crate) fn record(order: &Order) {
    metrics::counter!("order_transitions_total", "to" => order.status().as_str()).increment(1);
    tracing::info!(order_id = %order.id(), status = %order.status(), "order status changed");
}
