use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth::{CurrentUser, MaybeUser},
    entities::CartItemModel,
    errors::ServiceError,
    handlers::common::{
        created_response, mutation_response, no_content_response, resolve_cart_owner,
        success_response, validate_input, AppJson,
    },
    services::cart::{CartLine, MergeSummary},
    ApiResult, AppState,
};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartOwnerQuery {
    pub session_id: Option<String>,
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AddToCartRequest {
    pub product_id: Uuid,
    #[serde(default = "default_quantity")]
    #[validate(range(min = 1, max = 1000, message = "quantity must be between 1 and 1000"))]
    pub quantity: i32,
    pub session_id: Option<String>,
    pub user_id: Option<String>,
}

fn default_quantity() -> i32 {
    1
}

/// Either an absolute `quantity` or a relative `delta`.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCartItemRequest {
    pub quantity: Option<i32>,
    #[validate(range(min = -1000, max = 1000))]
    pub delta: Option<i32>,
    pub session_id: Option<String>,
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct MergeCartRequest {
    #[validate(length(min = 1, message = "sessionId is required"))]
    pub session_id: String,
}

/// Result of a relative update: the row, or `removed` when it hit zero.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItemUpdate {
    pub item: Option<CartItemModel>,
    pub removed: bool,
}

/// Guest-friendly cart routes; callers are identified by session or token.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/cart", get(list_cart).post(add_to_cart).delete(clear_cart))
        .route("/cart/merge", post(merge_cart))
        .route("/cart/:id", patch(update_cart_item).delete(remove_cart_item))
}

async fn list_cart(
    State(state): State<AppState>,
    MaybeUser(caller): MaybeUser,
    Query(query): Query<CartOwnerQuery>,
) -> ApiResult<Vec<CartLine>> {
    let owner = resolve_cart_owner(query.session_id, query.user_id, caller.as_ref())?;
    Ok(success_response(state.services.cart.list(&owner).await?))
}

async fn add_to_cart(
    State(state): State<AppState>,
    MaybeUser(caller): MaybeUser,
    AppJson(payload): AppJson<AddToCartRequest>,
) -> Result<Response, ServiceError> {
    validate_input(&payload)?;
    let owner = resolve_cart_owner(payload.session_id, payload.user_id, caller.as_ref())?;
    let mutation = state
        .services
        .cart
        .add_item(&owner, payload.product_id, payload.quantity)
        .await?;
    Ok(created_response(mutation).into_response())
}

async fn update_cart_item(
    State(state): State<AppState>,
    MaybeUser(caller): MaybeUser,
    Path(id): Path<Uuid>,
    AppJson(payload): AppJson<UpdateCartItemRequest>,
) -> ApiResult<CartItemUpdate> {
    validate_input(&payload)?;
    let owner = resolve_cart_owner(payload.session_id, payload.user_id, caller.as_ref())?;
    let cart = &state.services.cart;

    let mutation = match (payload.quantity, payload.delta) {
        (Some(quantity), None) => cart.update_quantity(&owner, id, quantity).await?.map(Some),
        (None, Some(delta)) => cart.adjust_quantity(&owner, id, delta).await?,
        _ => {
            return Err(ServiceError::ValidationError(
                "provide exactly one of quantity or delta".to_string(),
            ))
        }
    };

    Ok(mutation_response(mutation.map(|item| CartItemUpdate {
        removed: item.is_none(),
        item,
    })))
}

async fn remove_cart_item(
    State(state): State<AppState>,
    MaybeUser(caller): MaybeUser,
    Path(id): Path<Uuid>,
    Query(query): Query<CartOwnerQuery>,
) -> Result<Response, ServiceError> {
    let owner = resolve_cart_owner(query.session_id, query.user_id, caller.as_ref())?;
    let mutation = state.services.cart.remove_item(&owner, id).await?;
    Ok(no_content_response(&mutation.invalidates))
}

async fn clear_cart(
    State(state): State<AppState>,
    MaybeUser(caller): MaybeUser,
    Query(query): Query<CartOwnerQuery>,
) -> ApiResult<u64> {
    let owner = resolve_cart_owner(query.session_id, query.user_id, caller.as_ref())?;
    Ok(mutation_response(state.services.cart.clear(&owner).await?))
}

async fn merge_cart(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    AppJson(payload): AppJson<MergeCartRequest>,
) -> ApiResult<MergeSummary> {
    validate_input(&payload)?;
    let mutation = state
        .services
        .cart
        .merge_session_into_user(payload.session_id.trim(), &user.user_id)
        .await?;
    Ok(mutation_response(mutation))
}
