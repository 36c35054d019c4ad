//! Integration tests for the API server.

use std::sync::{Arc, OnceLock};

use api::AppState;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::UserId;
use fulfillment::SimulatedGateway;
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{Value, json};
use store::InMemoryStore;
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

fn setup() -> axum::Router {
    let state = AppState::new(
        "memory",
        InMemoryStore::new(),
        SimulatedGateway::new("http://localhost:3000/pay-gateway"),
    );
    api::create_app(Arc::new(state), get_metrics_handle())
}

enum As {
    Anonymous,
    Customer(UserId),
    Admin,
}

async fn send(app: &axum::Router, method: &str, uri: &str, who: As, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    match who {
        As::Anonymous => {}
        As::Customer(user) => {
            builder = builder
                .header("x-user-id", user.to_string())
                .header("x-user-role", "customer");
        }
        As::Admin => {
            builder = builder
                .header("x-user-id", UserId::new().to_string())
                .header("x-user-role", "admin");
        }
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_string(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

async fn create_product(app: &axum::Router, name: &str, price_cents: i64, stock: u32) -> String {
    let (status, json) = send(
        app,
        "POST",
        "/admin/products",
        As::Admin,
        Some(json!({ "name": name, "price_cents": price_cents, "stock": stock })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{json}");
    json["id"].as_str().unwrap().to_string()
}

async fn add_to_cart(app: &axum::Router, user: UserId, product_id: &str, quantity: u32) -> StatusCode {
    send(
        app,
        "POST",
        "/cart/items",
        As::Customer(user),
        Some(json!({ "product_id": product_id, "quantity": quantity })),
    )
    .await
    .0
}

async fn stock_of(app: &axum::Router, product_id: &str) -> u64 {
    let (_, json) = send(app, "GET", &format!("/products/{product_id}"), As::Anonymous, None).await;
    json["stock"].as_u64().unwrap()
}

#[tokio::test]
async fn test_health_check() {
    let app = setup();

    let (status, json) = send(&app, "GET", "/health", As::Anonymous, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["store"], "memory");
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = setup();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers().get("content-type").unwrap();
    assert!(content_type.to_str().unwrap().starts_with("text/plain"));
}

#[tokio::test]
async fn test_missing_identity_is_unauthorized() {
    let app = setup();

    let (status, json) = send(&app, "GET", "/cart", As::Anonymous, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(json["error"].as_str().unwrap().contains("x-user-id"));

    let request = Request::builder()
        .uri("/cart")
        .header("x-user-id", "not-a-uuid")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_customer_cannot_use_admin_routes() {
    let app = setup();

    let (status, _) = send(
        &app,
        "POST",
        "/admin/products",
        As::Customer(UserId::new()),
        Some(json!({ "name": "Widget", "price_cents": 100, "stock": 1 })),
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_checkout_pay_and_redeliver_webhook() {
    let app = setup();
    let user = UserId::new();
    let product_id = create_product(&app, "Widget", 1000, 5).await;

    assert_eq!(add_to_cart(&app, user, &product_id, 2).await, StatusCode::CREATED);
    let (_, cart) = send(&app, "GET", "/cart", As::Customer(user), None).await;
    assert_eq!(cart["total_cents"], 2000);

    let (status, order) = send(&app, "POST", "/orders/checkout", As::Customer(user), None).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(order["status"], "pending");
    assert_eq!(order["total_cents"], 2000);
    assert_eq!(stock_of(&app, &product_id).await, 3);
    let order_id = order["id"].as_str().unwrap().to_string();

    let (status, started) = send(
        &app,
        "POST",
        &format!("/payments/{order_id}/start"),
        As::Customer(user),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(started["amount_cents"], 2000);
    assert_eq!(started["gateway_ref"], format!("PAY-{order_id}"));
    let intent_id = started["payment_intent"].as_str().unwrap().to_string();
    assert_eq!(
        started["redirect_url"],
        format!("http://localhost:3000/pay-gateway?intent={intent_id}")
    );

    let (status, page) = send(
        &app,
        "GET",
        &format!("/pay-gateway?intent={intent_id}"),
        As::Anonymous,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["amount_cents"], 2000);

    let webhook = json!({ "intent_id": intent_id });
    let (status, first) = send(&app, "POST", "/payments/webhook", As::Anonymous, Some(webhook.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["outcome"], "confirmed");

    let (status, second) = send(&app, "POST", "/payments/webhook", As::Anonymous, Some(webhook)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["outcome"], "already_terminal");

    let (_, order) = send(&app, "GET", &format!("/orders/{order_id}"), As::Customer(user), None).await;
    assert_eq!(order["status"], "confirmed");
}

#[tokio::test]
async fn test_checkout_errors_map_to_statuses() {
    let app = setup();
    let user = UserId::new();

    let (status, json) = send(&app, "POST", "/orders/checkout", As::Customer(user), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "Cart is empty");

    let product_id = create_product(&app, "Scarce", 500, 1).await;
    let (status, _) = send(
        &app,
        "POST",
        "/cart/items",
        As::Customer(user),
        Some(json!({ "product_id": product_id, "quantity": 2 })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = send(
        &app,
        "POST",
        "/cart/items",
        As::Customer(user),
        Some(json!({ "product_id": product_id, "quantity": 0 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        "POST",
        "/cart/items",
        As::Customer(user),
        Some(json!({ "product_id": UserId::new().to_string(), "quantity": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_last_unit_goes_to_one_customer() {
    let app = setup();
    let alice = UserId::new();
    let bob = UserId::new();
    let product_id = create_product(&app, "Last One", 500, 1).await;
    add_to_cart(&app, alice, &product_id, 1).await;
    add_to_cart(&app, bob, &product_id, 1).await;

    let (a, b) = tokio::join!(
        send(&app, "POST", "/orders/checkout", As::Customer(alice), None),
        send(&app, "POST", "/orders/checkout", As::Customer(bob), None),
    );

    let mut statuses = [a.0, b.0];
    statuses.sort();
    assert_eq!(statuses, [StatusCode::CREATED, StatusCode::CONFLICT]);
    assert_eq!(stock_of(&app, &product_id).await, 0);
}

#[tokio::test]
async fn test_admin_lifecycle_and_cancellation_restock() {
    let app = setup();
    let user = UserId::new();
    let product_id = create_product(&app, "Gadget", 700, 4).await;
    add_to_cart(&app, user, &product_id, 3).await;
    let (_, order) = send(&app, "POST", "/orders/checkout", As::Customer(user), None).await;
    let order_id = order["id"].as_str().unwrap().to_string();

    let status_uri = format!("/admin/orders/{order_id}/status");
    let (status, json) = send(&app, "PUT", &status_uri, As::Admin, Some(json!({ "status": "confirmed" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "confirmed");

    let (status, _) = send(&app, "PUT", &status_uri, As::Admin, Some(json!({ "status": "delivered" }))).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = send(&app, "PUT", &status_uri, As::Admin, Some(json!({ "status": "lost" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, json) = send(&app, "PUT", &status_uri, As::Admin, Some(json!({ "status": "cancelled" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "cancelled");
    assert_eq!(stock_of(&app, &product_id).await, 4);
}

#[tokio::test]
async fn test_payment_after_cancellation_is_flagged() {
    let app = setup();
    let user = UserId::new();
    let product_id = create_product(&app, "Widget", 1000, 5).await;
    add_to_cart(&app, user, &product_id, 1).await;
    let (_, order) = send(&app, "POST", "/orders/checkout", As::Customer(user), None).await;
    let order_id = order["id"].as_str().unwrap().to_string();
    let (_, started) = send(&app, "POST", &format!("/payments/{order_id}/start"), As::Customer(user), None).await;
    let intent_id = started["payment_intent"].as_str().unwrap().to_string();

    send(
        &app,
        "PUT",
        &format!("/admin/orders/{order_id}/status"),
        As::Admin,
        Some(json!({ "status": "cancelled" })),
    )
    .await;

    let webhook = json!({ "intent_id": intent_id, "status": "paid" });
    let (status, json) = send(&app, "POST", "/payments/webhook", As::Anonymous, Some(webhook.clone())).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(json["error"].as_str().unwrap().contains("cancelled"));

    let (status, _) = send(&app, "POST", "/payments/webhook", As::Anonymous, Some(webhook)).await;
    assert_eq!(status, StatusCode::OK);

    let (_, order) = send(&app, "GET", &format!("/admin/orders/{order_id}"), As::Admin, None).await;
    assert_eq!(order["status"], "cancelled");
}

#[tokio::test]
async fn test_orders_are_private_to_their_owner() {
    let app = setup();
    let owner = UserId::new();
    let product_id = create_product(&app, "Widget", 1000, 5).await;
    add_to_cart(&app, owner, &product_id, 1).await;
    let (_, order) = send(&app, "POST", "/orders/checkout", As::Customer(owner), None).await;
    let order_id = order["id"].as_str().unwrap().to_string();

    let stranger = As::Customer(UserId::new());
    let (status, _) = send(&app, "GET", &format!("/orders/{order_id}"), stranger, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app,
        "POST",
        &format!("/payments/{order_id}/start"),
        As::Customer(UserId::new()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, mine) = send(&app, "GET", "/orders", As::Customer(owner), None).await;
    assert_eq!(mine["meta"]["total"], 1);
    assert_eq!(mine["items"][0]["id"], order_id.as_str());
}

#[tokio::test]
async fn test_admin_listing_and_stats() {
    let app = setup();
    let product_id = create_product(&app, "Widget", 1000, 10).await;
    let mut order_ids = Vec::new();
    for quantity in [1, 2] {
        let user = UserId::new();
        add_to_cart(&app, user, &product_id, quantity).await;
        let (_, order) = send(&app, "POST", "/orders/checkout", As::Customer(user), None).await;
        order_ids.push(order["id"].as_str().unwrap().to_string());
    }
    send(
        &app,
        "PUT",
        &format!("/admin/orders/{}/status", order_ids[1]),
        As::Admin,
        Some(json!({ "status": "cancelled" })),
    )
    .await;

    let (status, list) = send(&app, "GET", "/admin/orders?status=pending&page=1&limit=5", As::Admin, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["meta"]["total"], 1);
    assert_eq!(list["meta"]["limit"], 5);
    assert_eq!(list["items"][0]["id"], order_ids[0].as_str());

    let (status, _) = send(&app, "GET", "/admin/orders?from=yesterday", As::Admin, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, stats) = send(&app, "GET", "/admin/orders/stats", As::Admin, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["counts"]["pending"], 1);
    assert_eq!(stats["counts"]["cancelled"], 1);
    assert_eq!(stats["total_orders"], 2);
    assert_eq!(stats["revenue_cents"], 1000);

    let (_, empty) = send(&app, "GET", "/admin/orders/stats?from=2000-01-01&to=2000-01-31", As::Admin, None).await;
    assert_eq!(empty["total_orders"], 0);
}

#[tokio::test]
async fn test_catalog_management() {
    let app = setup();
    let product_id = create_product(&app, "Desk Lamp", 4500, 2).await;

    let (status, _) = send(
        &app,
        "POST",
        "/admin/products",
        As::Admin,
        Some(json!({ "name": "Desk Lamp", "price_cents": 100 })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, json) = send(
        &app,
        "PATCH",
        &format!("/admin/products/{product_id}"),
        As::Admin,
        Some(json!({ "price_cents": 3900 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["price_cents"], 3900);
    assert_eq!(json["stock"], 2);

    let (status, json) = send(
        &app,
        "POST",
        &format!("/admin/products/{product_id}/restock"),
        As::Admin,
        Some(json!({ "quantity": 3 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["stock"], 5);

    let (_, list) = send(&app, "GET", "/products?search=lamp", As::Anonymous, None).await;
    assert_eq!(list["meta"]["total"], 1);

    send(
        &app,
        "PATCH",
        &format!("/admin/products/{product_id}"),
        As::Admin,
        Some(json!({ "active": false })),
    )
    .await;
    let (status, _) = send(&app, "GET", &format!("/products/{product_id}"), As::Anonymous, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, "GET", "/products/not-a-uuid", As::Anonymous, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_catalog_category_filter_and_page_bounds() {
    let app = setup();
    for (name, category) in [("Floor Lamp", "Lighting"), ("Oak Desk", "Furniture")] {
        let (status, json) = send(
            &app,
            "POST",
            "/admin/products",
            As::Admin,
            Some(json!({ "name": name, "category": category, "price_cents": 1000, "stock": 1 })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{json}");
        assert_eq!(json["category"], category);
    }

    let (status, list) = send(&app, "GET", "/products?category=Lighting", As::Anonymous, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["meta"]["total"], 1);
    assert_eq!(list["items"][0]["name"], "Floor Lamp");

    let (_, list) = send(&app, "GET", "/products?category=Garden", As::Anonymous, None).await;
    assert_eq!(list["meta"]["total"], 0);

    let uri = format!("/products?page={}&limit=100", usize::MAX);
    let (status, list) = send(&app, "GET", &uri, As::Anonymous, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["meta"]["total"], 2);
    assert!(list["items"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_unrepresentable_amounts_are_bad_requests() {
    let app = setup();
    let full = create_product(&app, "Warehouse", 100, u32::MAX).await;
    let (status, _) = send(
        &app,
        "POST",
        &format!("/admin/products/{full}/restock"),
        As::Admin,
        Some(json!({ "quantity": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(stock_of(&app, &full).await, u64::from(u32::MAX));

    let half = i64::MAX / 2 + 1;
    let first = create_product(&app, "Vault A", half, 1).await;
    let second = create_product(&app, "Vault B", half, 1).await;
    let user = UserId::new();
    assert_eq!(add_to_cart(&app, user, &first, 1).await, StatusCode::CREATED);
    assert_eq!(add_to_cart(&app, user, &second, 1).await, StatusCode::CREATED);

    let (status, json) = send(&app, "GET", "/cart", As::Customer(user), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{json}");
}

#[tokio::test]
async fn test_cart_update_remove_and_clear() {
    let app = setup();
    let user = UserId::new();
    let a = create_product(&app, "Alpha", 100, 10).await;
    let b = create_product(&app, "Beta", 250, 10).await;
    add_to_cart(&app, user, &a, 1).await;
    add_to_cart(&app, user, &b, 1).await;

    let (status, json) = send(
        &app,
        "PUT",
        &format!("/cart/items/{a}"),
        As::Customer(user),
        Some(json!({ "quantity": 4 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["quantity"], 4);

    let (status, _) = send(&app, "DELETE", &format!("/cart/items/{b}"), As::Customer(user), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(&app, "DELETE", &format!("/cart/items/{b}"), As::Customer(user), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, cart) = send(&app, "GET", "/cart", As::Customer(user), None).await;
    assert_eq!(cart["total_cents"], 400);

    let (status, json) = send(&app, "DELETE", "/cart", As::Customer(user), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["removed"], 1);
}
