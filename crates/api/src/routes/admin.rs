//! Admin order management: listing, stats and status changes.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use common::OrderId;
use domain::OrderStatus;
use fulfillment::FulfillmentError;
use serde::{Deserialize, Serialize};
use store::{OrderQuery, Store};

use super::orders::{OrderResponse, list_response};
use super::{ListResponse, Pagination, parse_id};
use crate::AppState;
use crate::auth::Admin;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct AdminOrderParams {
    pub status: Option<String>,
    /// `YYYY-MM-DD`, inclusive.
    pub from: Option<String>,
    /// `YYYY-MM-DD`, inclusive to the end of the day.
    pub to: Option<String>,
    pub page: Option<usize>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct DateRangeParams {
    pub from: Option<String>,
    pub to: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub counts: BTreeMap<String, u64>,
    pub total_orders: u64,
    pub revenue_cents: i64,
}

/// Parses a `YYYY-MM-DD` bound. Upper bounds cover the whole day.
fn parse_day(raw: &str, end_of_day: bool) -> Result<DateTime<Utc>, ApiError> {
    let date = NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| ApiError::BadRequest(format!("Invalid date {raw:?}, expected YYYY-MM-DD")))?;
    let time = if end_of_day {
        NaiveTime::from_hms_nano_opt(23, 59, 59, 999_999_999)
    } else {
        NaiveTime::from_hms_opt(0, 0, 0)
    }
    .ok_or_else(|| ApiError::Internal("invalid time of day".to_string()))?;
    Ok(date.and_time(time).and_utc())
}

fn parse_range(
    from: Option<&str>,
    to: Option<&str>,
) -> Result<(Option<DateTime<Utc>>, Option<DateTime<Utc>>), ApiError> {
    let from = from.map(|raw| parse_day(raw, false)).transpose()?;
    let to = to.map(|raw| parse_day(raw, true)).transpose()?;
    if let (Some(from), Some(to)) = (from, to)
        && from > to
    {
        return Err(ApiError::BadRequest("from must not be after to".to_string()));
    }
    Ok((from, to))
}

fn parse_status(raw: &str) -> Result<OrderStatus, ApiError> {
    raw.trim()
        .to_ascii_lowercase()
        .parse::<OrderStatus>()
        .map_err(|e| FulfillmentError::from(e).into())
}

/// GET /admin/orders
#[tracing::instrument(skip(state, params))]
pub async fn list<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    _admin: Admin,
    params: Result<Query<AdminOrderParams>, QueryRejection>,
) -> Result<Json<ListResponse<OrderResponse>>, ApiError> {
    let Query(params) = params?;
    let pagination = Pagination {
        page: params.page,
        limit: params.limit,
    };

    let mut query = OrderQuery::new().page(pagination.page(), pagination.limit());
    if let Some(status) = params.status.as_deref() {
        query = query.status(parse_status(status)?);
    }
    let (from, to) = parse_range(params.from.as_deref(), params.to.as_deref())?;
    if let Some(from) = from {
        query = query.from(from);
    }
    if let Some(to) = to {
        query = query.to(to);
    }

    let page = state.orders.list_orders(&query).await?;
    Ok(Json(list_response(page, &pagination)))
}

/// GET /admin/orders/stats
#[tracing::instrument(skip(state, params))]
pub async fn stats<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    _admin: Admin,
    params: Result<Query<DateRangeParams>, QueryRejection>,
) -> Result<Json<StatsResponse>, ApiError> {
    let Query(params) = params?;
    let (from, to) = parse_range(params.from.as_deref(), params.to.as_deref())?;

    let stats = state.orders.stats(from, to).await?;
    let counts: BTreeMap<String, u64> = OrderStatus::ALL
        .into_iter()
        .map(|status| (status.to_string(), stats.count(status)))
        .collect();
    Ok(Json(StatsResponse {
        total_orders: counts.values().sum(),
        counts,
        revenue_cents: stats.revenue.cents(),
    }))
}

/// GET /admin/orders/{id}
#[tracing::instrument(skip(state))]
pub async fn get<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    _admin: Admin,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id: OrderId = parse_id(&id)?;
    let order = state.orders.get_order(order_id).await?;
    Ok(Json(OrderResponse::from(&order)))
}

/// PUT /admin/orders/{id}/status
#[tracing::instrument(skip(state, payload))]
pub async fn update_status<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Admin(caller): Admin,
    Path(id): Path<String>,
    payload: Result<Json<UpdateStatusRequest>, JsonRejection>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id: OrderId = parse_id(&id)?;
    let Json(req) = payload?;
    let status = parse_status(&req.status)?;

    let order = state.lifecycle.transition(order_id, status).await?;
    tracing::info!(admin = %caller.user_id, %order_id, %status, "order status updated by admin");
    Ok(Json(OrderResponse::from(&order)))
}
