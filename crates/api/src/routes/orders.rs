//! Checkout and customer order endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use common::OrderId;
use domain::{Order, OrderLine};
use serde::Serialize;
use store::{Page, Store};

use super::{ListResponse, PageMeta, Pagination, parse_id};
use crate::AppState;
use crate::auth::Caller;
use crate::error::ApiError;

#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub id: String,
    pub user_id: String,
    pub status: String,
    pub lines: Vec<OrderLineResponse>,
    pub total_cents: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Serialize)]
pub struct OrderLineResponse {
    pub product_id: String,
    pub quantity: u32,
    pub unit_price_cents: i64,
    pub subtotal_cents: i64,
}

impl From<&OrderLine> for OrderLineResponse {
    fn from(line: &OrderLine) -> Self {
        Self {
            product_id: line.product_id.to_string(),
            quantity: line.quantity,
            unit_price_cents: line.unit_price.cents(),
            subtotal_cents: line.subtotal.cents(),
        }
    }
}

impl From<&Order> for OrderResponse {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id().to_string(),
            user_id: order.user_id().to_string(),
            status: order.status().to_string(),
            lines: order.lines().iter().map(OrderLineResponse::from).collect(),
            total_cents: order.total().cents(),
            created_at: order.created_at().to_rfc3339(),
            updated_at: order.updated_at().to_rfc3339(),
        }
    }
}

pub(crate) fn list_response(page: Page<Order>, pagination: &Pagination) -> ListResponse<OrderResponse> {
    ListResponse {
        items: page.items.iter().map(OrderResponse::from).collect(),
        meta: PageMeta {
            page: pagination.page(),
            limit: pagination.limit().clamp(1, store::query::MAX_LIMIT),
            total: page.total,
        },
    }
}

/// POST /orders/checkout: converts the caller's cart into a pending order.
#[tracing::instrument(skip(state))]
pub async fn checkout<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
) -> Result<(StatusCode, Json<OrderResponse>), ApiError> {
    let order = state.checkout.checkout(caller.user_id).await?;
    Ok((StatusCode::CREATED, Json(OrderResponse::from(&order))))
}

/// GET /orders: the caller's orders, newest first.
#[tracing::instrument(skip(state))]
pub async fn list<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
    Query(pagination): Query<Pagination>,
) -> Result<Json<ListResponse<OrderResponse>>, ApiError> {
    let page = state
        .orders
        .my_orders(caller.user_id, pagination.page(), pagination.limit())
        .await?;
    Ok(Json(list_response(page, &pagination)))
}

/// GET /orders/{id}
#[tracing::instrument(skip(state))]
pub async fn get<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id: OrderId = parse_id(&id)?;
    let order = state.orders.order_details(caller.user_id, order_id).await?;
    Ok(Json(OrderResponse::from(&order)))
}
