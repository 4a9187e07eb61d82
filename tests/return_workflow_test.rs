//! Return requests against delivered orders and the seller's decision on them.

mod common;

use axum::http::{Method, StatusCode};
use common::{line, response_json, TestApp};
use chrono::Utc;
use saree_storefront::entities::{return_request, ProductModel, ReturnStatus};
use sea_orm::{ActiveModelTrait, Set, SqlErr};
use serde_json::{json, Value};
use uuid::Uuid;

/// Delivers an order of `quantity` units to `user_id` and returns it.
async fn delivered_order(app: &TestApp, product: &ProductModel, user_id: &str, quantity: i32) -> Value {
    let token = app.customer_token(user_id);
    let order = app
        .checkout(Some(&token), None, json!([line(product, quantity)]))
        .await;
    let id = order["id"].as_str().unwrap().to_string();
    assert_eq!(app.set_order_status(&id, "shipped").await.status(), StatusCode::OK);
    assert_eq!(app.set_order_status(&id, "delivered").await.status(), StatusCode::OK);
    order
}

#[tokio::test]
async fn partial_return_computes_refund_and_blocks_duplicates() {
    let app = TestApp::new().await;
    let product = app.seed_product("Patola Double Ikat", "1250.50", 6).await;
    let order = delivered_order(&app, &product, "shopper-r", 3).await;
    let token = app.customer_token("shopper-r");

    let request = json!({
        "orderId": order["id"],
        "productId": product.id,
        "quantity": 2,
        "reason": "Colour differs from the photos",
    });
    let response = app
        .request(Method::POST, "/api/returns", Some(request.clone()), Some(&token))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = response_json(response).await;
    assert_eq!(created["data"]["refundAmount"], "2501.00");
    assert_eq!(created["data"]["status"], "requested");

    let duplicate = app
        .request(Method::POST, "/api/returns", Some(request), Some(&token))
        .await;
    assert_eq!(duplicate.status(), StatusCode::CONFLICT);

    let fetched = response_json(
        app.request(
            Method::GET,
            &format!("/api/orders/{}", order["id"].as_str().unwrap()),
            None,
            Some(&token),
        )
        .await,
    )
    .await;
    assert_eq!(fetched["data"]["refundStatus"], "requested");
    assert_eq!(fetched["data"]["returnNotes"], "Colour differs from the photos");
}

#[tokio::test]
async fn return_quantity_and_refund_are_checked_against_the_line() {
    let app = TestApp::new().await;
    let product = app.seed_product("Kalamkari", "900.00", 5).await;
    let order = delivered_order(&app, &product, "shopper-q", 2).await;
    let token = app.customer_token("shopper-q");

    let too_many = app
        .request(
            Method::POST,
            "/api/returns",
            Some(json!({
                "orderId": order["id"],
                "productId": product.id,
                "quantity": 3,
                "reason": "Ordered too many",
            })),
            Some(&token),
        )
        .await;
    assert_eq!(too_many.status(), StatusCode::BAD_REQUEST);

    let wrong_refund = app
        .request(
            Method::POST,
            "/api/returns",
            Some(json!({
                "orderId": order["id"],
                "productId": product.id,
                "quantity": 1,
                "reason": "Damaged pallu",
                "refundAmount": 1800,
            })),
            Some(&token),
        )
        .await;
    assert_eq!(wrong_refund.status(), StatusCode::BAD_REQUEST);

    let blank_reason = app
        .request(
            Method::POST,
            "/api/returns",
            Some(json!({
                "orderId": order["id"],
                "productId": product.id,
                "quantity": 1,
                "reason": "   ",
            })),
            Some(&token),
        )
        .await;
    assert_eq!(blank_reason.status(), StatusCode::BAD_REQUEST);

    let matching = app
        .request(
            Method::POST,
            "/api/returns",
            Some(json!({
                "orderId": order["id"],
                "productId": product.id,
                "quantity": 1,
                "reason": "Damaged pallu",
                "refundAmount": "900",
            })),
            Some(&token),
        )
        .await;
    assert_eq!(matching.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn only_delivered_orders_owned_by_the_caller_can_be_returned() {
    let app = TestApp::new().await;
    let product = app.seed_product("Maheshwari", "2100.00", 5).await;
    let token = app.customer_token("shopper-p");

    let pending = app
        .checkout(Some(&token), None, json!([line(&product, 1)]))
        .await;
    let response = app
        .request(
            Method::POST,
            "/api/returns",
            Some(json!({
                "orderId": pending["id"],
                "productId": product.id,
                "quantity": 1,
                "reason": "Changed my mind",
            })),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let delivered = delivered_order(&app, &product, "shopper-p", 1).await;
    let stranger = app.customer_token("shopper-x");
    let response = app
        .request(
            Method::POST,
            "/api/returns",
            Some(json!({
                "orderId": delivered["id"],
                "productId": product.id,
                "quantity": 1,
                "reason": "Not mine",
            })),
            Some(&stranger),
        )
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let anonymous = app
        .request(Method::GET, "/api/returns", None, None)
        .await;
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn seller_decision_is_final_and_mirrored_on_the_order() {
    let app = TestApp::new().await;
    let product = app.seed_product("Bomkai", "3300.00", 4).await;
    let order = delivered_order(&app, &product, "shopper-o", 1).await;
    let token = app.customer_token("shopper-o");

    let created = response_json(
        app.request(
            Method::POST,
            "/api/returns",
            Some(json!({
                "orderId": order["id"],
                "productId": product.id,
                "quantity": 1,
                "reason": "Loose threads",
            })),
            Some(&token),
        )
        .await,
    )
    .await;
    let return_id = created["data"]["id"].as_str().unwrap().to_string();

    let seller = app.seller_token();
    let queue = response_json(
        app.request(
            Method::GET,
            "/api/inventory/returns?status=requested",
            None,
            Some(&seller),
        )
        .await,
    )
    .await;
    assert_eq!(queue["data"].as_array().unwrap().len(), 1);

    let approved = app
        .request(
            Method::PATCH,
            &format!("/api/inventory/returns/{}", return_id),
            Some(json!({ "status": "approved", "notes": "Refund issued" })),
            Some(&seller),
        )
        .await;
    assert_eq!(approved.status(), StatusCode::OK);
    let approved = response_json(approved).await;
    assert_eq!(approved["data"]["status"], "approved");
    assert!(approved["data"]["approvedAt"].is_string());

    let again = app
        .request(
            Method::PATCH,
            &format!("/api/inventory/returns/{}", return_id),
            Some(json!({ "status": "rejected" })),
            Some(&seller),
        )
        .await;
    assert_eq!(again.status(), StatusCode::BAD_REQUEST);

    let mine = response_json(
        app.request(
            Method::GET,
            &format!("/api/returns?orderId={}", order["id"].as_str().unwrap()),
            None,
            Some(&token),
        )
        .await,
    )
    .await;
    assert_eq!(mine["data"][0]["status"], "approved");

    let fetched = response_json(
        app.request(
            Method::GET,
            &format!("/api/orders/{}", order["id"].as_str().unwrap()),
            None,
            Some(&token),
        )
        .await,
    )
    .await;
    assert_eq!(fetched["data"]["refundStatus"], "approved");
    assert_eq!(fetched["data"]["returnNotes"], "Refund issued");
    assert_eq!(app.product(product.id).await.in_stock, 3, "approval does not restock");
}

#[tokio::test]
async fn rejected_return_can_be_requested_again() {
    let app = TestApp::new().await;
    let product = app.seed_product("Tussar", "4100.00", 4).await;
    let order = delivered_order(&app, &product, "shopper-n", 2).await;
    let token = app.customer_token("shopper-n");
    let request = json!({
        "orderId": order["id"],
        "productId": product.id,
        "quantity": 1,
        "reason": "Fraying edge",
    });

    let created = response_json(
        app.request(Method::POST, "/api/returns", Some(request.clone()), Some(&token))
            .await,
    )
    .await;
    let seller = app.seller_token();
    app.request(
        Method::PATCH,
        &format!("/api/inventory/returns/{}", created["data"]["id"].as_str().unwrap()),
        Some(json!({ "status": "rejected", "notes": "Outside return window" })),
        Some(&seller),
    )
    .await;

    let retry = app
        .request(Method::POST, "/api/returns", Some(request), Some(&token))
        .await;
    assert_eq!(retry.status(), StatusCode::CREATED);
}

/// A raw row for `order_id`/`product_id`, bypassing the service checks.
fn raw_return(order_id: Uuid, product_id: Uuid) -> return_request::ActiveModel {
    let now = Utc::now();
    return_request::ActiveModel {
        id: Set(Uuid::new_v4()),
        order_id: Set(order_id),
        product_id: Set(product_id),
        user_id: Set(Some("shopper-m".to_string())),
        quantity: Set(1),
        reason: Set("Second request".to_string()),
        refund_amount: Set("5200.00".to_string()),
        status: Set(ReturnStatus::Requested),
        requested_at: Set(now),
        approved_at: Set(None),
        rejected_at: Set(None),
        updated_at: Set(now),
    }
}

#[tokio::test]
async fn storage_refuses_a_second_open_return_for_a_line() {
    let app = TestApp::new().await;
    let product = app.seed_product("Paithani", "5200.00", 4).await;
    let order = delivered_order(&app, &product, "shopper-m", 2).await;
    let order_id: Uuid = order["id"].as_str().unwrap().parse().unwrap();
    let token = app.customer_token("shopper-m");

    let created = response_json(
        app.request(
            Method::POST,
            "/api/returns",
            Some(json!({
                "orderId": order_id,
                "productId": product.id,
                "quantity": 1,
                "reason": "Zari tarnished",
            })),
            Some(&token),
        )
        .await,
    )
    .await;

    let err = raw_return(order_id, product.id)
        .insert(&*app.state.db)
        .await
        .unwrap_err();
    assert!(matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))));

    app.request(
        Method::PATCH,
        &format!("/api/inventory/returns/{}", created["data"]["id"].as_str().unwrap()),
        Some(json!({ "status": "rejected" })),
        Some(&app.seller_token()),
    )
    .await;
    raw_return(order_id, product.id)
        .insert(&*app.state.db)
        .await
        .expect("rejected returns do not block a new one");
}
