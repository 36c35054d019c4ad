//! Public catalog and admin product management endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use common::ProductId;
use domain::{Money, NewProduct, Product, ProductUpdate};
use serde::{Deserialize, Serialize};
use store::{ProductQuery, Store};

use super::{ListResponse, PageMeta, parse_id};
use crate::AppState;
use crate::auth::Admin;
use crate::error::ApiError;

// -- Request types --

#[derive(Debug, Deserialize)]
pub struct ProductListParams {
    pub page: Option<usize>,
    pub limit: Option<usize>,
    pub search: Option<String>,
    pub category: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateProductRequest {
    pub name: String,
    pub slug: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    pub price_cents: i64,
    #[serde(default)]
    pub stock: u32,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct UpdateProductRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub price_cents: Option<i64>,
    pub active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct RestockRequest {
    pub quantity: u32,
}

// -- Response types --

#[derive(Debug, Serialize)]
pub struct ProductResponse {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub description: String,
    pub category: String,
    pub price_cents: i64,
    pub stock: u32,
    pub active: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Product> for ProductResponse {
    fn from(product: Product) -> Self {
        Self {
            id: product.id.to_string(),
            name: product.name,
            slug: product.slug,
            description: product.description,
            category: product.category,
            price_cents: product.price.cents(),
            stock: product.stock,
            active: product.active,
            created_at: product.created_at.to_rfc3339(),
            updated_at: product.updated_at.to_rfc3339(),
        }
    }
}

// -- Handlers --

/// GET /products: active products, optionally filtered by name and category.
#[tracing::instrument(skip(state))]
pub async fn list<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Query(params): Query<ProductListParams>,
) -> Result<Json<ListResponse<ProductResponse>>, ApiError> {
    let mut query = ProductQuery::new().page(
        params.page.unwrap_or(1).max(1),
        params.limit.unwrap_or(store::query::DEFAULT_LIMIT),
    );
    if let Some(search) = params.search {
        query = query.search(search);
    }
    if let Some(category) = params.category {
        query = query.category(category);
    }

    let page = state.catalog.list_products(&query).await?;
    Ok(Json(ListResponse {
        items: page.items.into_iter().map(ProductResponse::from).collect(),
        meta: PageMeta {
            page: query.offset / query.limit + 1,
            limit: query.limit,
            total: page.total,
        },
    }))
}

/// GET /products/{id}
#[tracing::instrument(skip(state))]
pub async fn get<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<ProductResponse>, ApiError> {
    let id: ProductId = parse_id(&id)?;
    let product = state.catalog.get_listed_product(id).await?;
    Ok(Json(product.into()))
}

/// POST /admin/products
#[tracing::instrument(skip(state, payload))]
pub async fn create<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    _admin: Admin,
    payload: Result<Json<CreateProductRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ProductResponse>), ApiError> {
    let Json(req) = payload?;

    let mut new_product = NewProduct::new(req.name, Money::from_cents(req.price_cents), req.stock)
        .with_description(req.description)
        .with_category(req.category);
    if let Some(slug) = req.slug {
        new_product.slug = domain::slugify(&slug);
    }
    new_product.active = req.active;

    let product = state.catalog.create_product(new_product).await?;
    Ok((StatusCode::CREATED, Json(product.into())))
}

/// PATCH /admin/products/{id}
#[tracing::instrument(skip(state, payload))]
pub async fn update<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    _admin: Admin,
    Path(id): Path<String>,
    payload: Result<Json<UpdateProductRequest>, JsonRejection>,
) -> Result<Json<ProductResponse>, ApiError> {
    let id: ProductId = parse_id(&id)?;
    let Json(req) = payload?;

    let update = ProductUpdate {
        name: req.name,
        description: req.description,
        category: req.category,
        price: req.price_cents.map(Money::from_cents),
        active: req.active,
    };
    let product = state.catalog.update_product(id, update).await?;
    Ok(Json(product.into()))
}

/// POST /admin/products/{id}/restock
#[tracing::instrument(skip(state, payload))]
pub async fn restock<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    _admin: Admin,
    Path(id): Path<String>,
    payload: Result<Json<RestockRequest>, JsonRejection>,
) -> Result<Json<ProductResponse>, ApiError> {
    let id: ProductId = parse_id(&id)?;
    let Json(req) = payload?;

    let product = state.catalog.restock(id, req.quantity).await?;
    Ok(Json(product.into()))
}
