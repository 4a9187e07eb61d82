//! Seller dashboard: catalog management, order fulfillment and return
//! decisions. Every route requires the `admin` or `store_owner` role.

use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
    routing::{get, patch},
    Router,
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::{
    entities::{FulfillmentChannel, OrderModel, OrderStatus, ProductModel, ReturnModel, ReturnStatus},
    errors::ServiceError,
    handlers::common::{
        created_response, mutation_response, parse_status, success_response, validate_input,
        AppJson,
    },
    services::{
        allocation::{AllocationEntry, AllocationRequest},
        products::{NewProduct, ProductUpdate},
    },
    ApiResult, AppState,
};

const ORDER_STATUSES: &str = "pending, shipped, delivered";
const RETURN_DECISIONS: &str = "approved, rejected";

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateProductRequest {
    #[validate(length(min = 1, max = 64))]
    pub tracking_id: Option<String>,
    #[validate(length(min = 1, max = 200, message = "name is required"))]
    pub name: String,
    #[validate(length(max = 4000))]
    pub description: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub fabric: String,
    #[validate(length(min = 1, max = 100))]
    pub color: String,
    #[validate(length(min = 1, max = 100))]
    pub occasion: String,
    #[validate(length(min = 1, max = 100))]
    pub category: String,
    #[validate(length(min = 1, message = "price is required"))]
    pub price: String,
    pub image_url: Option<String>,
    pub total_stock: i32,
    /// Defaults to `online` without store entries and `both` with them
    pub channel: Option<FulfillmentChannel>,
    #[serde(default)]
    pub store_inventory: Vec<AllocationEntry>,
}

impl From<CreateProductRequest> for NewProduct {
    fn from(req: CreateProductRequest) -> Self {
        let channel = req.channel.unwrap_or(if req.store_inventory.is_empty() {
            FulfillmentChannel::Online
        } else {
            FulfillmentChannel::Both
        });
        Self {
            tracking_id: req.tracking_id,
            name: req.name,
            description: req.description,
            fabric: req.fabric,
            color: req.color,
            occasion: req.occasion,
            category: req.category,
            price: req.price,
            image_url: req.image_url,
            allocation: AllocationRequest {
                total_stock: req.total_stock,
                channel,
                allocations: req.store_inventory,
            },
        }
    }
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProductRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: Option<String>,
    #[validate(length(max = 4000))]
    pub description: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub fabric: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub color: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub occasion: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub category: Option<String>,
    pub price: Option<String>,
    pub image_url: Option<String>,
}

impl From<UpdateProductRequest> for ProductUpdate {
    fn from(req: UpdateProductRequest) -> Self {
        Self {
            name: req.name,
            description: req.description,
            fabric: req.fabric,
            color: req.color,
            occasion: req.occasion,
            category: req.category,
            price: req.price,
            image_url: req.image_url,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct StatusFilter {
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateOrderStatusRequest {
    pub status: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct DecideReturnRequest {
    pub status: String,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/products", get(list_products).post(create_product))
        .route("/products/:id", patch(update_product))
        .route("/orders", get(list_orders))
        .route("/orders/:id/status", patch(update_order_status))
        .route("/returns", get(list_returns))
        .route("/returns/:id", patch(decide_return))
}

async fn list_products(State(state): State<AppState>) -> ApiResult<Vec<ProductModel>> {
    Ok(success_response(state.services.products.list_all().await?))
}

async fn create_product(
    State(state): State<AppState>,
    AppJson(payload): AppJson<CreateProductRequest>,
) -> Result<Response, ServiceError> {
    validate_input(&payload)?;
    let mutation = state.services.products.create(payload.into()).await?;
    Ok(created_response(mutation).into_response())
}

async fn update_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    AppJson(payload): AppJson<UpdateProductRequest>,
) -> ApiResult<ProductModel> {
    validate_input(&payload)?;
    let mutation = state
        .services
        .products
        .update_details(id, payload.into())
        .await?;
    Ok(mutation_response(mutation))
}

async fn list_orders(
    State(state): State<AppState>,
    Query(filter): Query<StatusFilter>,
) -> ApiResult<Vec<OrderModel>> {
    let status = filter
        .status
        .filter(|s| !s.trim().is_empty())
        .map(|s| parse_status::<OrderStatus>(&s, ORDER_STATUSES))
        .transpose()?;
    Ok(success_response(state.services.checkout.list_all(status).await?))
}

async fn update_order_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    AppJson(payload): AppJson<UpdateOrderStatusRequest>,
) -> ApiResult<OrderModel> {
    let target = parse_status::<OrderStatus>(&payload.status, ORDER_STATUSES)?;
    let mutation = state.services.lifecycle.transition(id, target).await?;
    Ok(mutation_response(mutation))
}

async fn list_returns(
    State(state): State<AppState>,
    Query(filter): Query<StatusFilter>,
) -> ApiResult<Vec<ReturnModel>> {
    let status = filter
        .status
        .filter(|s| !s.trim().is_empty())
        .map(|s| parse_status::<ReturnStatus>(&s, "requested, approved, rejected"))
        .transpose()?;
    Ok(success_response(state.services.returns.list_all(status).await?))
}

async fn decide_return(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    AppJson(payload): AppJson<DecideReturnRequest>,
) -> ApiResult<ReturnModel> {
    validate_input(&payload)?;
    let decision = parse_status::<ReturnStatus>(&payload.status, RETURN_DECISIONS)?;
    let mutation = state
        .services
        .returns
        .decide(id, decision, payload.notes)
        .await?;
    Ok(mutation_response(mutation))
}
