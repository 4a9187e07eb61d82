use axum::{
    extract::{Path, State},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth::{CurrentUser, MaybeUser},
    entities::OrderModel,
    errors::ServiceError,
    handlers::common::{amount_text, created_response, success_response, validate_input, AppJson},
    services::{
        checkout::{PlaceOrder, ShippingDetails},
        Requester,
    },
    ApiResult, AppState,
};

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrderRequest {
    pub session_id: Option<String>,
    /// JSON string of lines, an array of lines, or a tagged items document
    pub items: Value,
    #[serde(default)]
    pub total_amount: Option<Value>,
    #[validate(length(min = 1, max = 120, message = "customerName is required"))]
    pub customer_name: String,
    #[validate(email(message = "customerEmail must be a valid email"))]
    pub customer_email: String,
    #[validate(length(min = 5, max = 20, message = "customerPhone must be 5-20 characters"))]
    pub customer_phone: String,
    #[validate(length(min = 1, max = 500, message = "shippingAddress is required"))]
    pub shipping_address: String,
    #[validate(length(min = 1, max = 100, message = "shippingCity is required"))]
    pub shipping_city: String,
    #[validate(length(min = 1, max = 100, message = "shippingState is required"))]
    pub shipping_state: String,
    #[validate(length(min = 3, max = 12, message = "shippingPostalCode must be 3-12 characters"))]
    pub shipping_postal_code: String,
}

/// Checkout is open to guests; order history needs a signed-in caller.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/orders", get(list_my_orders).post(place_order))
        .route("/orders/:id", get(get_order))
}

async fn place_order(
    State(state): State<AppState>,
    MaybeUser(caller): MaybeUser,
    AppJson(payload): AppJson<PlaceOrderRequest>,
) -> Result<Response, ServiceError> {
    validate_input(&payload)?;

    let session_id = payload.session_id.filter(|s| !s.trim().is_empty());
    let user_id = caller.map(|user| user.user_id);
    if session_id.is_none() && user_id.is_none() {
        return Err(ServiceError::ValidationError(
            "sessionId is required for guest checkout".to_string(),
        ));
    }

    let input = PlaceOrder {
        user_id,
        session_id,
        items: payload.items,
        total_amount: amount_text("totalAmount", payload.total_amount)?,
        shipping: ShippingDetails {
            customer_name: payload.customer_name.trim().to_string(),
            customer_email: payload.customer_email.trim().to_string(),
            customer_phone: payload.customer_phone.trim().to_string(),
            shipping_address: payload.shipping_address.trim().to_string(),
            shipping_city: payload.shipping_city.trim().to_string(),
            shipping_state: payload.shipping_state.trim().to_string(),
            shipping_postal_code: payload.shipping_postal_code.trim().to_string(),
        },
    };

    let mutation = state.services.checkout.place_order(input).await?;
    Ok(created_response(mutation).into_response())
}

async fn list_my_orders(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> ApiResult<Vec<OrderModel>> {
    Ok(success_response(
        state.services.checkout.list_for_user(&user.user_id).await?,
    ))
}

async fn get_order(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<OrderModel> {
    let requester = Requester::from(&user);
    Ok(success_response(
        state.services.checkout.get_order(id, &requester).await?,
    ))
}
