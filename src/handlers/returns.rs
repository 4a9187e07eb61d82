use axum::{
    extract::{Query, State},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth::CurrentUser,
    entities::ReturnModel,
    errors::ServiceError,
    handlers::common::{amount_text, created_response, success_response, validate_input, AppJson},
    services::{returns::NewReturn, Requester},
    ApiResult, AppState,
};

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateReturnRequest {
    pub order_id: Uuid,
    pub product_id: Uuid,
    #[validate(range(min = 1, message = "quantity must be at least 1"))]
    pub quantity: i32,
    #[validate(length(min = 1, max = 2000, message = "reason is required"))]
    pub reason: String,
    #[serde(default)]
    pub refund_amount: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReturnListQuery {
    pub order_id: Option<Uuid>,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/returns", get(list_returns).post(create_return))
}

async fn create_return(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    AppJson(payload): AppJson<CreateReturnRequest>,
) -> Result<Response, ServiceError> {
    validate_input(&payload)?;
    let input = NewReturn {
        order_id: payload.order_id,
        product_id: payload.product_id,
        quantity: payload.quantity,
        reason: payload.reason,
        refund_amount: amount_text("refundAmount", payload.refund_amount)?,
    };

    let mutation = state
        .services
        .returns
        .request_return(&Requester::from(&user), input)
        .await?;
    Ok(created_response(mutation).into_response())
}

async fn list_returns(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(query): Query<ReturnListQuery>,
) -> ApiResult<Vec<ReturnModel>> {
    let returns = state
        .services
        .returns
        .list_for_user(&Requester::from(&user), query.order_id)
        .await?;
    Ok(success_response(returns))
}
