use axum::{
    extract::{Path, Query, State},
    routing::get,
    Router,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    entities::ProductModel,
    errors::ServiceError,
    handlers::common::success_response,
    services::{pricing::parse_amount, products::ProductQuery},
    ApiResult, AppState,
};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductSearchParams {
    pub search: Option<String>,
    pub fabric: Option<String>,
    pub occasion: Option<String>,
    pub category: Option<String>,
    pub color: Option<String>,
    pub min_price: Option<String>,
    pub max_price: Option<String>,
}

impl TryFrom<ProductSearchParams> for ProductQuery {
    type Error = ServiceError;

    fn try_from(params: ProductSearchParams) -> Result<Self, Self::Error> {
        let price = |field: &str, raw: Option<String>| {
            raw.filter(|v| !v.trim().is_empty())
                .map(|v| parse_amount(field, &v))
                .transpose()
        };
        Ok(Self {
            min_price: price("minPrice", params.min_price)?,
            max_price: price("maxPrice", params.max_price)?,
            search: params.search,
            fabric: params.fabric,
            occasion: params.occasion,
            category: params.category,
            color: params.color,
        })
    }
}

/// Public catalog routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/products", get(search_products))
        .route("/products/tracking/:tracking_id", get(get_product_by_tracking_id))
        .route("/products/:id", get(get_product))
}

async fn search_products(
    State(state): State<AppState>,
    Query(params): Query<ProductSearchParams>,
) -> ApiResult<Vec<ProductModel>> {
    let products = state.services.products.search(params.try_into()?).await?;
    Ok(success_response(products))
}

async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<ProductModel> {
    Ok(success_response(state.services.products.get(id).await?))
}

async fn get_product_by_tracking_id(
    State(state): State<AppState>,
    Path(tracking_id): Path<String>,
) -> ApiResult<ProductModel> {
    Ok(success_response(
        state.services.products.get_by_tracking_id(&tracking_id).await?,
    ))
}
