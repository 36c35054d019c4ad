//! Payment start and webhook reconciliation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use common::{OrderId, PaymentIntentId, UserId};
use domain::{Money, OrderStatus, PaymentIntent, PaymentStatus, Settlement};
use store::Store;

use crate::error::{FulfillmentError, Result};
use crate::transitions;

/// The outbound side of the payment provider.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Registers an intent with the provider and returns its reference.
    async fn create_intent(
        &self,
        intent_id: PaymentIntentId,
        order_id: OrderId,
        amount: Money,
    ) -> Result<String>;

    /// Where the customer is sent to complete payment.
    fn redirect_url(&self, intent: &PaymentIntent) -> String;
}

/// Stand-in provider that accepts every intent and points the customer at a
/// local hosted page.
#[derive(Debug, Clone)]
pub struct SimulatedGateway {
    redirect_base: String,
    fail_on_create: Arc<AtomicBool>,
}

impl SimulatedGateway {
    pub fn new(redirect_base: impl Into<String>) -> Self {
        Self {
            redirect_base: redirect_base.into(),
            fail_on_create: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Makes every following `create_intent` call fail until reset.
    pub fn set_fail_on_create(&self, fail: bool) {
        self.fail_on_create.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl PaymentGateway for SimulatedGateway {
    async fn create_intent(
        &self,
        _intent_id: PaymentIntentId,
        order_id: OrderId,
        _amount: Money,
    ) -> Result<String> {
        if self.fail_on_create.load(Ordering::SeqCst) {
            return Err(FulfillmentError::Gateway("intent creation refused".to_string()));
        }
        Ok(format!("PAY-{order_id}"))
    }

    fn redirect_url(&self, intent: &PaymentIntent) -> String {
        format!("{}?intent={}", self.redirect_base, intent.id)
    }
}

/// A pending intent and where to send the customer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartedPayment {
    pub intent: PaymentIntent,
    pub redirect_url: String,
}

/// Outcome of a webhook delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// Intent marked paid and the order moved to `Confirmed`.
    Confirmed { order_id: OrderId },
    /// Intent marked failed. The order is untouched.
    Declined { order_id: OrderId },
    /// Redelivery of an already settled intent. Nothing changed.
    AlreadyTerminal { status: PaymentStatus },
    /// Intent marked paid but the order had already left `Pending`.
    OrderNotPending {
        order_id: OrderId,
        status: OrderStatus,
    },
}

impl Reconciliation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reconciliation::Confirmed { .. } => "confirmed",
            Reconciliation::Declined { .. } => "declined",
            Reconciliation::AlreadyTerminal { .. } => "already_terminal",
            Reconciliation::OrderNotPending { .. } => "order_not_pending",
        }
    }
}

/// Creates payment intents and applies gateway callbacks to orders.
pub struct PaymentReconciler<S: Store, G: PaymentGateway> {
    store: S,
    gateway: Arc<G>,
}

impl<S: Store + Clone, G: PaymentGateway> Clone for PaymentReconciler<S, G> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            gateway: Arc::clone(&self.gateway),
        }
    }
}

impl<S: Store, G: PaymentGateway> PaymentReconciler<S, G> {
    pub fn new(store: S, gateway: G) -> Self {
        Self {
            store,
            gateway: Arc::new(gateway),
        }
    }

    /// Starts (or resumes) payment for one of the caller's pending orders.
    #[tracing::instrument(skip(self))]
    pub async fn start_payment(&self, user_id: UserId, order_id: OrderId) -> Result<StartedPayment> {
        let mut tx = self.store.begin().await?;

        let order = tx
            .get_order_for_update(order_id)
            .await?
            .filter(|order| order.is_owned_by(user_id))
            .ok_or(FulfillmentError::OrderNotFound(order_id))?;
        if order.status() != OrderStatus::Pending {
            return Err(FulfillmentError::OrderNotPayable {
                order_id,
                status: order.status(),
            });
        }

        if let Some(existing) = tx.find_pending_intent(order_id).await? {
            let redirect_url = self.gateway.redirect_url(&existing);
            return Ok(StartedPayment {
                intent: existing,
                redirect_url,
            });
        }

        let intent_id = PaymentIntentId::new();
        let gateway_ref = self
            .gateway
            .create_intent(intent_id, order_id, order.total())
            .await?;
        let intent = PaymentIntent::for_order(intent_id, &order, gateway_ref, Utc::now());
        tx.insert_payment_intent(&intent).await?;
        tx.commit().await?;

        tracing::info!(%order_id, intent_id = %intent.id, amount = %intent.amount, "payment intent created");
        let redirect_url = self.gateway.redirect_url(&intent);
        Ok(StartedPayment {
            intent,
            redirect_url,
        })
    }

    /// Applies a "paid" callback.
    ///
    /// Safe under redelivery: a settled intent yields `AlreadyTerminal` and
    /// the order is not advanced again.
    #[tracing::instrument(skip(self))]
    pub async fn on_payment_confirmed(&self, intent_id: PaymentIntentId) -> Result<Reconciliation> {
        let result = self.settle(intent_id, PaymentStatus::Paid).await;
        observe(&result);
        result
    }

    /// Applies a "failed" callback. The order stays as it is.
    #[tracing::instrument(skip(self))]
    pub async fn on_payment_failed(&self, intent_id: PaymentIntentId) -> Result<Reconciliation> {
        let result = self.settle(intent_id, PaymentStatus::Failed).await;
        observe(&result);
        result
    }

    pub async fn get_intent(&self, intent_id: PaymentIntentId) -> Result<PaymentIntent> {
        self.store
            .get_payment_intent(intent_id)
            .await?
            .ok_or(FulfillmentError::PaymentIntentNotFound(intent_id))
    }

    async fn settle(
        &self,
        intent_id: PaymentIntentId,
        outcome: PaymentStatus,
    ) -> Result<Reconciliation> {
        let now = Utc::now();
        let mut tx = self.store.begin().await?;

        let mut intent = tx
            .get_payment_intent_for_update(intent_id)
            .await?
            .ok_or(FulfillmentError::PaymentIntentNotFound(intent_id))?;
        if let Settlement::AlreadyTerminal(status) = intent.settle(outcome, now) {
            return Ok(Reconciliation::AlreadyTerminal { status });
        }
        tx.update_payment_intent(&intent).await?;

        let order_id = intent.order_id;
        if outcome == PaymentStatus::Failed {
            tx.commit().await?;
            return Ok(Reconciliation::Declined { order_id });
        }

        let order = tx
            .get_order_for_update(order_id)
            .await?
            .ok_or(FulfillmentError::OrderNotFound(order_id))?;
        if intent.amount != order.total() {
            return Err(FulfillmentError::PaymentAmountMismatch {
                intent_id,
                intent_amount: intent.amount,
                order_total: order.total(),
            });
        }

        if order.status() != OrderStatus::Pending {
            // Money landed but the order moved on. Keep the payment record
            // and leave the order for an operator.
            tx.commit().await?;
            metrics::counter!("payment_inconsistencies_total").increment(1);
            tracing::error!(
                %order_id,
                %intent_id,
                status = %order.status(),
                "payment confirmed for an order that is no longer pending"
            );
            return Ok(Reconciliation::OrderNotPending {
                order_id,
                status: order.status(),
            });
        }

        let confirmed = transitions::apply(tx.as_mut(), order_id, OrderStatus::Confirmed, now).await?;
        tx.commit().await?;
        transitions::record(&confirmed);

        Ok(Reconciliation::Confirmed { order_id })
    }
}

fn observe(result: &Result<Reconciliation>) {
    let outcome = match result {
        Ok(reconciliation) => reconciliation.as_str(),
        Err(e) => e.reason(),
    };
    metrics::counter!("payment_webhooks_total", "outcome" => outcome).increment(1);
    if let Ok(Reconciliation::AlreadyTerminal { status }) = result {
        tracing::info!(%status, "duplicate payment callback ignored");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::ProductId;
    use domain::{Order, OrderLine};
    use store::InMemoryStore;

    async fn pending_order(store: &InMemoryStore, user_id: UserId) -> Order {
        let line = OrderLine::new(ProductId::new(), 2, Money::from_cents(1250)).unwrap();
        let order = Order::place(OrderId::new(), user_id, vec![line], Utc::now()).unwrap();
        let mut tx = store.begin().await.unwrap();
        tx.insert_order(&order).await.unwrap();
        tx.commit().await.unwrap();
        order
    }

    fn reconciler(store: &InMemoryStore) -> PaymentReconciler<InMemoryStore, SimulatedGateway> {
        PaymentReconciler::new(store.clone(), SimulatedGateway::new("http://pay.test/gw"))
    }

    #[tokio::test]
    async fn test_start_payment_builds_reference_and_redirect() {
        let store = InMemoryStore::new();
        let user = UserId::new();
        let order = pending_order(&store, user).await;

        let started = reconciler(&store).start_payment(user, order.id()).await.unwrap();

        assert_eq!(started.intent.amount, order.total());
        assert_eq!(started.intent.gateway_ref, format!("PAY-{}", order.id()));
        assert_eq!(
            started.redirect_url,
            format!("http://pay.test/gw?intent={}", started.intent.id)
        );
    }

    #[tokio::test]
    async fn test_gateway_refusal_creates_nothing() {
        let store = InMemoryStore::new();
        let user = UserId::new();
        let order = pending_order(&store, user).await;
        let gateway = SimulatedGateway::new("http://pay.test/gw");
        gateway.set_fail_on_create(true);
        let payments = PaymentReconciler::new(store.clone(), gateway.clone());

        let err = payments.start_payment(user, order.id()).await.unwrap_err();
        assert!(matches!(err, FulfillmentError::Gateway(_)));

        gateway.set_fail_on_create(false);
        payments.start_payment(user, order.id()).await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_callback_leaves_order_pending() {
        let store = InMemoryStore::new();
        let user = UserId::new();
        let order = pending_order(&store, user).await;
        let payments = reconciler(&store);
        let started = payments.start_payment(user, order.id()).await.unwrap();

        let outcome = payments.on_payment_failed(started.intent.id).await.unwrap();

        assert_eq!(outcome, Reconciliation::Declined { order_id: order.id() });
        let stored = store.get_order(order.id()).await.unwrap().unwrap();
        assert_eq!(stored.status(), OrderStatus::Pending);
        let intent = payments.get_intent(started.intent.id).await.unwrap();
        assert_eq!(intent.status, PaymentStatus::Failed);
    }

    #[tokio::test]
    async fn test_unknown_intent() {
        let store = InMemoryStore::new();
        let missing = PaymentIntentId::new();
        let err = reconciler(&store)
            .on_payment_confirmed(missing)
            .await
            .unwrap_err();
        assert!(matches!(err, FulfillmentError::PaymentIntentNotFound(id) if id == missing));
    }
}
