//! HTTP API server for the order-fulfillment backend.
//!
//! Exposes the catalog, cart, checkout, order lifecycle and payment
//! endpoints, with structured logging (tracing) and Prometheus metrics.
//! Caller identity arrives as trusted headers from the upstream auth layer.

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, patch, post, put};
use fulfillment::{
    CartService, CatalogService, CheckoutEngine, OrderQueries, OrderStateMachine,
    PaymentReconciler, SimulatedGateway,
};
use metrics_exporter_prometheus::PrometheusHandle;
use store::Store;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared application state accessible from all handlers.
pub struct AppState<S: Store> {
    /// Which store backs the services, reported by `/health`.
    pub backend: &'static str,
    pub catalog: CatalogService<S>,
    pub cart: CartService<S>,
    pub checkout: CheckoutEngine<S>,
    pub lifecycle: OrderStateMachine<S>,
    pub orders: OrderQueries<S>,
    pub payments: PaymentReconciler<S, SimulatedGateway>,
}

impl<S: Store + Clone> AppState<S> {
    /// Wires every service to the same store.
    pub fn new(backend: &'static str, store: S, gateway: SimulatedGateway) -> Self {
        Self {
            backend,
            catalog: CatalogService::new(store.clone()),
            cart: CartService::new(store.clone()),
            checkout: CheckoutEngine::new(store.clone()),
            lifecycle: OrderStateMachine::new(store.clone()),
            orders: OrderQueries::new(store.clone()),
            payments: PaymentReconciler::new(store, gateway),
        }
    }
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: Store + Clone + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    use routes::{admin, cart, health, orders, payments, products};

    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(health::check::<S>))
        // Catalog
        .route("/products", get(products::list::<S>))
        .route("/products/{id}", get(products::get::<S>))
        .route("/admin/products", post(products::create::<S>))
        .route("/admin/products/{id}", patch(products::update::<S>))
        .route("/admin/products/{id}/restock", post(products::restock::<S>))
        // Cart
        .route("/cart", get(cart::view::<S>).delete(cart::clear::<S>))
        .route("/cart/items", post(cart::add_item::<S>))
        .route(
            "/cart/items/{product_id}",
            put(cart::update_item::<S>).delete(cart::remove_item::<S>),
        )
        // Orders
        .route("/orders/checkout", post(orders::checkout::<S>))
        .route("/orders", get(orders::list::<S>))
        .route("/orders/{id}", get(orders::get::<S>))
        // Payments
        .route("/payments/{order_id}/start", post(payments::start::<S>))
        .route("/payments/webhook", post(payments::webhook::<S>))
        .route("/pay-gateway", get(payments::gateway_page::<S>))
        // Admin orders
        .route("/admin/orders", get(admin::list::<S>))
        .route("/admin/orders/stats", get(admin::stats::<S>))
        .route("/admin/orders/{id}", get(admin::get::<S>))
        .route("/admin/orders/{id}/status", put(admin::update_status::<S>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
