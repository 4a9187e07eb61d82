//! Saree storefront core
//!
//! Catalog, cart reconciliation, checkout, the order lifecycle, returns and
//! saved addresses behind a JSON REST API. Business rules live in
//! [`services`]; [`handlers`] are thin axum adapters over them.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod middleware_helpers;
pub mod migrator;
pub mod services;
pub mod tracing;

use axum::{
    http::{HeaderValue, Method},
    middleware,
    response::Json,
    routing::get,
    Extension, Router,
};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    timeout::TimeoutLayer,
};

use crate::{
    auth::AuthService,
    config::AppConfig,
    db::DbPool,
    events::EventSender,
    services::{
        invalidation::{Invalidation, Mutation},
        AppServices,
    },
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DbPool>,
    pub config: Arc<AppConfig>,
    pub event_sender: Arc<EventSender>,
    pub auth: Arc<AuthService>,
    pub services: AppServices,
}

impl AppState {
    pub fn new(db: Arc<DbPool>, config: AppConfig, event_sender: Arc<EventSender>) -> Self {
        let auth = Arc::new(AuthService::new((&config).into()));
        let services = AppServices::new(db.clone(), event_sender.clone());
        Self {
            db,
            config: Arc::new(config),
            event_sender,
            auth,
            services,
        }
    }
}

// Common response wrappers
#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
    /// Cache entries the request made stale
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub invalidates: Vec<Invalidation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            errors: None,
            invalidates: Vec::new(),
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn from_mutation(mutation: Mutation<T>) -> Self {
        let (data, invalidates) = mutation.into_parts();
        Self {
            invalidates,
            ..Self::success(data)
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
            errors: None,
            invalidates: Vec::new(),
            meta: Some(ResponseMeta::capture()),
        }
    }
}

/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

/// Builds the full application router with middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config);
    let auth = state.auth.clone();

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .nest("/api", handlers::api_routes())
        .with_state(state)
        .layer(Extension(auth))
        .layer(cors)
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(crate::tracing::http_trace_layer())
        .layer(middleware::from_fn(
            middleware_helpers::request_id_middleware,
        ))
}

fn cors_layer(config: &AppConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_origins()
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                ::tracing::warn!(%origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    if origins.is_empty() {
        if config.is_development() {
            return CorsLayer::permissive();
        }
        return CorsLayer::new();
    }

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any)
}

#[cfg(test)]
mod response_tests {
    use super::*;
    use crate::services::invalidation::Resource;
    use chrono::DateTime;

    #[tokio::test]
    async fn success_response_includes_request_metadata() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("meta-123"), async {
                ApiResponse::success("ok")
            })
            .await;

        let meta = response.meta.expect("metadata expected");
        assert_eq!(meta.request_id.as_deref(), Some("meta-123"));
        DateTime::parse_from_rfc3339(&meta.timestamp).expect("timestamp should parse");
    }

    #[test]
    fn mutation_envelope_lists_invalidations() {
        let mutation = Mutation::new(7).invalidate(Invalidation::all(Resource::Orders));
        let json = serde_json::to_value(ApiResponse::from_mutation(mutation)).unwrap();

        assert_eq!(json["data"], 7);
        assert_eq!(json["invalidates"][0]["resource"], "orders");
    }

    #[test]
    fn plain_success_omits_empty_invalidations() {
        let json = serde_json::to_value(ApiResponse::success("ok")).unwrap();
        assert!(json.get("invalidates").is_none());
    }

    #[tokio::test]
    async fn error_response_includes_request_metadata() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("meta-err"), async {
                ApiResponse::<()>::error("oops".into())
            })
            .await;

        assert!(!response.success);
        let meta = response.meta.expect("metadata expected");
        assert_eq!(meta.request_id.as_deref(), Some("meta-err"));
    }
}
