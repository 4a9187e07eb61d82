//! Saved shipping addresses and the single-default rule.

mod common;

use axum::http::{Method, StatusCode};
use common::{response_json, TestApp};
use saree_storefront::entities::address;
use sea_orm::{sea_query::Expr, ColumnTrait, EntityTrait, QueryFilter, SqlErr};
use serde_json::{json, Value};

fn address(line1: &str, is_default: bool) -> Value {
    json!({
        "fullName": "Meera Iyer",
        "phone": "9876543210",
        "line1": line1,
        "city": "Chennai",
        "state": "Tamil Nadu",
        "postalCode": "600004",
        "isDefault": is_default,
    })
}

async fn defaults(app: &TestApp, token: &str) -> Vec<String> {
    let body = response_json(app.request(Method::GET, "/api/addresses", None, Some(token)).await).await;
    body["data"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|a| a["isDefault"] == true)
        .map(|a| a["line1"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn first_address_becomes_default_and_later_defaults_take_over() {
    let app = TestApp::new().await;
    let token = app.customer_token("shopper-1");

    let first = response_json(
        app.request(Method::POST, "/api/addresses", Some(address("1 Beach Road", false)), Some(&token))
            .await,
    )
    .await;
    assert_eq!(first["data"]["isDefault"], true);
    assert_eq!(first["data"]["country"], "India");

    let second = app
        .request(Method::POST, "/api/addresses", Some(address("2 Hill Road", true)), Some(&token))
        .await;
    assert_eq!(second.status(), StatusCode::CREATED);
    assert_eq!(defaults(&app, &token).await, vec!["2 Hill Road"]);

    let first_id = first["data"]["id"].as_str().unwrap();
    let promoted = app
        .request(
            Method::POST,
            &format!("/api/addresses/{}/default", first_id),
            None,
            Some(&token),
        )
        .await;
    assert_eq!(promoted.status(), StatusCode::OK);
    assert_eq!(defaults(&app, &token).await, vec!["1 Beach Road"]);
}

#[tokio::test]
async fn deleting_the_default_promotes_the_oldest_remaining() {
    let app = TestApp::new().await;
    let token = app.customer_token("shopper-2");

    let mut ids = Vec::new();
    for line1 in ["A Street", "B Street", "C Street"] {
        let body = response_json(
            app.request(Method::POST, "/api/addresses", Some(address(line1, false)), Some(&token))
                .await,
        )
        .await;
        ids.push(body["data"]["id"].as_str().unwrap().to_string());
    }

    let deleted = app
        .request(
            Method::DELETE,
            &format!("/api/addresses/{}", ids[0]),
            None,
            Some(&token),
        )
        .await;
    assert_eq!(deleted.status(), StatusCode::NO_CONTENT);
    assert_eq!(defaults(&app, &token).await, vec!["B Street"]);
}

#[tokio::test]
async fn addresses_are_scoped_to_their_owner() {
    let app = TestApp::new().await;
    let owner = app.customer_token("shopper-3");
    let other = app.customer_token("shopper-4");

    let body = response_json(
        app.request(Method::POST, "/api/addresses", Some(address("9 Lake View", false)), Some(&owner))
            .await,
    )
    .await;
    let id = body["data"]["id"].as_str().unwrap();

    let response = app
        .request(Method::DELETE, &format!("/api/addresses/{}", id), None, Some(&other))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(defaults(&app, &other).await.is_empty());

    let anonymous = app.request(Method::GET, "/api/addresses", None, None).await;
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn incomplete_address_is_rejected() {
    let app = TestApp::new().await;
    let token = app.customer_token("shopper-5");

    let mut payload = address("", false);
    payload["postalCode"] = json!("6");
    let response = app
        .request(Method::POST, "/api/addresses", Some(payload), Some(&token))
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = response_json(response).await;
    assert!(body["details"]["line1"].is_array());
}

#[tokio::test]
async fn storage_holds_at_most_one_default_per_user() {
    let app = TestApp::new().await;
    let token = app.customer_token("shopper-6");
    for line1 in ["7 Fort Road", "8 Fort Road"] {
        app.request(Method::POST, "/api/addresses", Some(address(line1, false)), Some(&token))
            .await;
    }

    let err = address::Entity::update_many()
        .col_expr(address::Column::IsDefault, Expr::value(true))
        .filter(address::Column::UserId.eq("shopper-6"))
        .filter(address::Column::Line1.eq("8 Fort Road"))
        .exec(&*app.state.db)
        .await
        .unwrap_err();
    assert!(matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))));
    assert_eq!(defaults(&app, &token).await, vec!["7 Fort Road"]);

    let other = app.customer_token("shopper-7");
    let response = app
        .request(Method::POST, "/api/addresses", Some(address("1 Mall Road", true)), Some(&other))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED, "defaults are scoped per user");
}
