//! Cart behaviour over HTTP: stock-aware adds, clamped updates, removal on
//! zero and folding a guest cart into an account at sign-in.

mod common;

use axum::http::{Method, StatusCode};
use common::{line, response_json, TestApp};
use serde_json::{json, Value};

async fn cart_for_session(app: &TestApp, session: &str) -> Vec<Value> {
    let body = response_json(
        app.request(
            Method::GET,
            &format!("/api/cart?sessionId={}", session),
            None,
            None,
        )
        .await,
    )
    .await;
    body["data"].as_array().cloned().unwrap_or_default()
}

#[tokio::test]
async fn adding_out_of_stock_product_is_refused() {
    let app = TestApp::new().await;
    let product = app.seed_product("Sold Out Ikat", "3200.00", 1).await;
    let order = app
        .checkout(None, Some("earlier-buyer"), json!([line(&product, 1)]))
        .await;
    app.set_order_status(order["id"].as_str().unwrap(), "shipped")
        .await;
    assert_eq!(app.product(product.id).await.in_stock, 0);

    let response = app
        .request(
            Method::POST,
            "/api/cart",
            Some(json!({ "productId": product.id, "quantity": 1, "sessionId": "guest-a" })),
            None,
        )
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(cart_for_session(&app, "guest-a").await.is_empty());
}

#[tokio::test]
async fn repeated_adds_accumulate_up_to_stock() {
    let app = TestApp::new().await;
    let product = app.seed_product("Gadwal Silk", "7800.00", 4).await;

    for quantity in [3, 3] {
        let response = app
            .request(
                Method::POST,
                "/api/cart",
                Some(json!({ "productId": product.id, "quantity": quantity, "sessionId": "guest-b" })),
                None,
            )
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let cart = cart_for_session(&app, "guest-b").await;
    assert_eq!(cart.len(), 1);
    assert_eq!(cart[0]["quantity"], 4);
    assert_eq!(cart[0]["product"]["name"], "Gadwal Silk");
}

#[tokio::test]
async fn absolute_update_is_clamped_and_delta_to_zero_removes() {
    let app = TestApp::new().await;
    let product = app.seed_product("Pochampally", "5400.00", 5).await;

    let added = response_json(
        app.request(
            Method::POST,
            "/api/cart",
            Some(json!({ "productId": product.id, "quantity": 2, "sessionId": "guest-c" })),
            None,
        )
        .await,
    )
    .await;
    let item_id = added["data"]["id"].as_str().unwrap().to_string();

    let clamped = response_json(
        app.request(
            Method::PATCH,
            &format!("/api/cart/{}", item_id),
            Some(json!({ "quantity": 50, "sessionId": "guest-c" })),
            None,
        )
        .await,
    )
    .await;
    assert_eq!(clamped["data"]["item"]["quantity"], 5);
    assert_eq!(clamped["data"]["removed"], false);

    let zero = app
        .request(
            Method::PATCH,
            &format!("/api/cart/{}", item_id),
            Some(json!({ "quantity": 0, "sessionId": "guest-c" })),
            None,
        )
        .await;
    assert_eq!(zero.status(), StatusCode::BAD_REQUEST);

    let removed = response_json(
        app.request(
            Method::PATCH,
            &format!("/api/cart/{}", item_id),
            Some(json!({ "delta": -5, "sessionId": "guest-c" })),
            None,
        )
        .await,
    )
    .await;
    assert_eq!(removed["data"]["removed"], true);
    assert!(cart_for_session(&app, "guest-c").await.is_empty());
}

#[tokio::test]
async fn other_sessions_cannot_touch_an_item() {
    let app = TestApp::new().await;
    let product = app.seed_product("Sambalpuri", "6100.00", 3).await;

    let added = response_json(
        app.request(
            Method::POST,
            "/api/cart",
            Some(json!({ "productId": product.id, "sessionId": "owner" })),
            None,
        )
        .await,
    )
    .await;
    assert_eq!(added["data"]["quantity"], 1);
    let item_id = added["data"]["id"].as_str().unwrap().to_string();

    let response = app
        .request(
            Method::DELETE,
            &format!("/api/cart/{}?sessionId=intruder", item_id),
            None,
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .request(
            Method::DELETE,
            &format!("/api/cart/{}?sessionId=owner", item_id),
            None,
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(response.headers().contains_key("x-invalidates"));
}

#[tokio::test]
async fn cart_needs_an_owner_and_user_ids_must_match_the_token() {
    let app = TestApp::new().await;

    let anonymous = app.request(Method::GET, "/api/cart", None, None).await;
    assert_eq!(anonymous.status(), StatusCode::BAD_REQUEST);

    let token = app.customer_token("shopper-1");
    let mismatched = app
        .request(Method::GET, "/api/cart?userId=shopper-2", None, Some(&token))
        .await;
    assert_eq!(mismatched.status(), StatusCode::FORBIDDEN);

    let own = app
        .request(Method::GET, "/api/cart", None, Some(&token))
        .await;
    assert_eq!(own.status(), StatusCode::OK);
}

#[tokio::test]
async fn guest_cart_merges_into_account_on_sign_in() {
    let app = TestApp::new().await;
    let shared = app.seed_product("Baluchari", "9900.00", 4).await;
    let guest_only = app.seed_product("Tant Cotton", "1500.00", 10).await;
    let token = app.customer_token("shopper-9");

    for (product, quantity) in [(&shared, 3), (&guest_only, 2)] {
        app.request(
            Method::POST,
            "/api/cart",
            Some(json!({ "productId": product.id, "quantity": quantity, "sessionId": "guest-z" })),
            None,
        )
        .await;
    }
    app.request(
        Method::POST,
        "/api/cart",
        Some(json!({ "productId": shared.id, "quantity": 2 })),
        Some(&token),
    )
    .await;

    let response = app
        .request(
            Method::POST,
            "/api/cart/merge",
            Some(json!({ "sessionId": "guest-z" })),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let summary = response_json(response).await;
    assert_eq!(summary["data"]["moved"], 1);
    assert_eq!(summary["data"]["combined"], 1);

    assert!(cart_for_session(&app, "guest-z").await.is_empty());

    let body = response_json(app.request(Method::GET, "/api/cart", None, Some(&token)).await).await;
    let lines = body["data"].as_array().unwrap();
    assert_eq!(lines.len(), 2);
    let shared_line = lines
        .iter()
        .find(|l| l["productId"] == shared.id.to_string())
        .unwrap();
    assert_eq!(shared_line["quantity"], 4, "3 + 2 is clamped to stock");
}

#[tokio::test]
async fn merge_requires_sign_in() {
    let app = TestApp::new().await;
    let response = app
        .request(
            Method::POST,
            "/api/cart/merge",
            Some(json!({ "sessionId": "guest-z" })),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
