//! Cart endpoints. Every operation is scoped to the calling user.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::ProductId;
use domain::CartItem;
use fulfillment::{CartView, PricedLine};
use serde::{Deserialize, Serialize};
use store::Store;

use super::parse_id;
use crate::AppState;
use crate::auth::Caller;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct AddItemRequest {
    pub product_id: String,
    pub quantity: u32,
}

#[derive(Debug, Deserialize)]
pub struct UpdateQuantityRequest {
    pub quantity: u32,
}

#[derive(Debug, Serialize)]
pub struct CartLineResponse {
    pub product_id: String,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price_cents: i64,
    pub subtotal_cents: i64,
}

impl From<&PricedLine> for CartLineResponse {
    fn from(priced: &PricedLine) -> Self {
        let line = &priced.line;
        Self {
            product_id: line.product_id.to_string(),
            product_name: line.product_name.clone(),
            quantity: line.quantity,
            unit_price_cents: line.unit_price.cents(),
            subtotal_cents: priced.subtotal.cents(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CartResponse {
    pub items: Vec<CartLineResponse>,
    pub total_cents: i64,
}

impl From<CartView> for CartResponse {
    fn from(view: CartView) -> Self {
        Self {
            items: view.lines.iter().map(CartLineResponse::from).collect(),
            total_cents: view.total.cents(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CartItemResponse {
    pub product_id: String,
    pub quantity: u32,
}

impl From<CartItem> for CartItemResponse {
    fn from(item: CartItem) -> Self {
        Self {
            product_id: item.product_id.to_string(),
            quantity: item.quantity,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ClearedResponse {
    pub removed: u64,
}

/// GET /cart
#[tracing::instrument(skip(state))]
pub async fn view<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
) -> Result<Json<CartResponse>, ApiError> {
    let view = state.cart.view(caller.user_id).await?;
    Ok(Json(view.into()))
}

/// POST /cart/items: adds to (or merges into) a cart line.
#[tracing::instrument(skip(state, payload))]
pub async fn add_item<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
    payload: Result<Json<AddItemRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CartItemResponse>), ApiError> {
    let Json(req) = payload?;
    let product_id: ProductId = parse_id(&req.product_id)?;

    let item = state
        .cart
        .add_item(caller.user_id, product_id, req.quantity)
        .await?;
    Ok((StatusCode::CREATED, Json(item.into())))
}

/// PUT /cart/items/{product_id}
#[tracing::instrument(skip(state, payload))]
pub async fn update_item<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
    Path(product_id): Path<String>,
    payload: Result<Json<UpdateQuantityRequest>, JsonRejection>,
) -> Result<Json<CartItemResponse>, ApiError> {
    let product_id: ProductId = parse_id(&product_id)?;
    let Json(req) = payload?;

    let item = state
        .cart
        .update_quantity(caller.user_id, product_id, req.quantity)
        .await?;
    Ok(Json(item.into()))
}

/// DELETE /cart/items/{product_id}
#[tracing::instrument(skip(state))]
pub async fn remove_item<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
    Path(product_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let product_id: ProductId = parse_id(&product_id)?;
    state.cart.remove_item(caller.user_id, product_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /cart
#[tracing::instrument(skip(state))]
pub async fn clear<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
) -> Result<Json<ClearedResponse>, ApiError> {
    let removed = state.cart.clear(caller.user_id).await?;
    Ok(Json(ClearedResponse { removed }))
}
