//! Payment start, gateway webhook and the simulated hosted payment page.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use common::{OrderId, PaymentIntentId};
use domain::PaymentStatus;
use fulfillment::{Reconciliation, StartedPayment};
use serde::{Deserialize, Serialize};
use store::Store;

use super::parse_id;
use crate::AppState;
use crate::auth::Caller;
use crate::error::ApiError;

#[derive(Debug, Serialize)]
pub struct StartPaymentResponse {
    pub payment_intent: String,
    pub order_id: String,
    pub amount_cents: i64,
    pub status: String,
    pub gateway_ref: String,
    pub redirect_url: String,
}

impl From<StartedPayment> for StartPaymentResponse {
    fn from(started: StartedPayment) -> Self {
        Self {
            payment_intent: started.intent.id.to_string(),
            order_id: started.intent.order_id.to_string(),
            amount_cents: started.intent.amount.cents(),
            status: started.intent.status.to_string(),
            gateway_ref: started.intent.gateway_ref,
            redirect_url: started.redirect_url,
        }
    }
}

/// Gateway callback body. A missing status means the payment succeeded.
#[derive(Debug, Deserialize)]
pub struct WebhookRequest {
    pub intent_id: String,
    #[serde(default = "default_webhook_status")]
    pub status: PaymentStatus,
}

fn default_webhook_status() -> PaymentStatus {
    PaymentStatus::Paid
}

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent_status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GatewayPageParams {
    pub intent: String,
}

#[derive(Debug, Serialize)]
pub struct GatewayPageResponse {
    pub message: &'static str,
    pub instructions: &'static str,
    pub intent_id: String,
    pub order_id: String,
    pub amount_cents: i64,
    pub status: String,
}

/// POST /payments/{order_id}/start
#[tracing::instrument(skip(state))]
pub async fn start<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
    Path(order_id): Path<String>,
) -> Result<Json<StartPaymentResponse>, ApiError> {
    let order_id: OrderId = parse_id(&order_id)?;
    let started = state.payments.start_payment(caller.user_id, order_id).await?;
    Ok(Json(started.into()))
}

/// POST /payments/webhook: delivered at least once by the gateway.
#[tracing::instrument(skip(state, payload))]
pub async fn webhook<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    payload: Result<Json<WebhookRequest>, JsonRejection>,
) -> Result<Json<WebhookResponse>, ApiError> {
    let Json(req) = payload?;
    let intent_id: PaymentIntentId = parse_id(&req.intent_id)?;

    let outcome = match req.status {
        PaymentStatus::Paid => state.payments.on_payment_confirmed(intent_id).await?,
        PaymentStatus::Failed => state.payments.on_payment_failed(intent_id).await?,
        PaymentStatus::Pending => {
            return Err(ApiError::BadRequest(
                "webhook status must be paid or failed".to_string(),
            ));
        }
    };

    let response = match outcome {
        Reconciliation::Confirmed { order_id } | Reconciliation::Declined { order_id } => {
            WebhookResponse {
                outcome: outcome.as_str(),
                order_id: Some(order_id.to_string()),
                intent_status: None,
            }
        }
        Reconciliation::AlreadyTerminal { status } => WebhookResponse {
            outcome: outcome.as_str(),
            order_id: None,
            intent_status: Some(status.to_string()),
        },
        Reconciliation::OrderNotPending { order_id, status } => {
            return Err(ApiError::Conflict(format!(
                "payment recorded but order {order_id} is {status}"
            )));
        }
    };
    Ok(Json(response))
}

/// GET /pay-gateway?intent=<id>: stands in for the provider's hosted page.
#[tracing::instrument(skip(state, params))]
pub async fn gateway_page<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    params: Result<Query<GatewayPageParams>, QueryRejection>,
) -> Result<Json<GatewayPageResponse>, ApiError> {
    let Query(params) = params?;
    let intent_id: PaymentIntentId = parse_id(&params.intent)?;
    let intent = state.payments.get_intent(intent_id).await?;

    Ok(Json(GatewayPageResponse {
        message: "This simulates a real payment page.",
        instructions: "POST /payments/webhook with {\"intent_id\": ..., \"status\": \"paid\"} to simulate success",
        intent_id: intent.id.to_string(),
        order_id: intent.order_id.to_string(),
        amount_cents: intent.amount.cents(),
        status: intent.status.to_string(),
    }))
}
