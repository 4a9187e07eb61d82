#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    response::Response,
    Router,
};
use saree_storefront::{
    auth::roles,
    config::AppConfig,
    db,
    entities::ProductModel,
    events::{self, EventSender},
    services::{allocation::AllocationRequest, products::NewProduct},
    AppState,
};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower::ServiceExt;

pub const SELLER_ID: &str = "seller-1";

/// Application harness backed by a private SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_database("sqlite::memory:").await
    }

    /// Harness over `database_url`, e.g. a file-backed SQLite pool for tests
    /// that need more than one connection.
    pub async fn with_database(database_url: &str) -> Self {
        let cfg = AppConfig::new(
            database_url.to_string(),
            "storefront_integration_signing_key_0123456789".to_string(),
            3600,
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = Arc::new(EventSender::new(event_tx));
        let event_task = tokio::spawn(events::process_events(event_rx));

        let state = AppState::new(Arc::new(pool), cfg, event_sender);
        let router = saree_storefront::build_router(state.clone());

        Self {
            router,
            state,
            _event_task: event_task,
        }
    }

    /// Bearer token for a shopper.
    pub fn customer_token(&self, user_id: &str) -> String {
        self.token_with_roles(user_id, vec![roles::CUSTOMER.to_string()])
    }

    /// Bearer token for the store owner.
    pub fn seller_token(&self) -> String {
        self.token_with_roles(SELLER_ID, vec![roles::STORE_OWNER.to_string()])
    }

    pub fn token_with_roles(&self, user_id: &str, roles: Vec<String>) -> String {
        self.state
            .auth
            .issue_token(user_id, None, None, roles)
            .expect("issue test token")
            .access_token
    }

    /// Send a request against the router with an optional bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Seeds an online-only product whose whole stock is sellable on the web.
    pub async fn seed_product(&self, name: &str, price: &str, stock: i32) -> ProductModel {
        self.seed_product_with(name, price, AllocationRequest::online_only(stock))
            .await
    }

    pub async fn seed_product_with(
        &self,
        name: &str,
        price: &str,
        allocation: AllocationRequest,
    ) -> ProductModel {
        let input = NewProduct {
            tracking_id: None,
            name: name.to_string(),
            description: Some(format!("{} seeded for integration tests", name)),
            fabric: "Silk".to_string(),
            color: "Maroon".to_string(),
            occasion: "Wedding".to_string(),
            category: "Kanjivaram".to_string(),
            price: price.to_string(),
            image_url: None,
            allocation,
        };
        self.state
            .services
            .products
            .create(input)
            .await
            .expect("seed product for tests")
            .into_parts()
            .0
    }

    pub async fn product(&self, id: uuid::Uuid) -> ProductModel {
        self.state
            .services
            .products
            .get(id)
            .await
            .expect("load product")
    }

    /// Places an order for `lines` through the API and returns its JSON.
    pub async fn checkout(&self, token: Option<&str>, session_id: Option<&str>, lines: Value) -> Value {
        let mut body = shipping_payload();
        body["items"] = lines;
        if let Some(session) = session_id {
            body["sessionId"] = json!(session);
        }
        let response = self.request(Method::POST, "/api/orders", Some(body), token).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        response_json(response).await["data"].clone()
    }

    /// Moves an order through the seller endpoint.
    pub async fn set_order_status(&self, order_id: &str, status: &str) -> Response {
        let token = self.seller_token();
        self.request(
            Method::PATCH,
            &format!("/api/inventory/orders/{}/status", order_id),
            Some(json!({ "status": status })),
            Some(&token),
        )
        .await
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

pub fn shipping_payload() -> Value {
    json!({
        "customerName": "Meera Iyer",
        "customerEmail": "meera@example.com",
        "customerPhone": "9876543210",
        "shippingAddress": "12 Temple Street",
        "shippingCity": "Chennai",
        "shippingState": "Tamil Nadu",
        "shippingPostalCode": "600004"
    })
}

/// One order line in the wire shape checkout accepts.
pub fn line(product: &ProductModel, quantity: i32) -> Value {
    json!({
        "productId": product.id,
        "productName": product.name,
        "quantity": quantity,
        "price": product.price,
    })
}

pub async fn response_json(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(&bytes).expect("response body is json")
}
