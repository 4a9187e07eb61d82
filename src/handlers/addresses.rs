use axum::{
    extract::{Path, State},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Router,
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth::CurrentUser,
    entities::AddressModel,
    errors::ServiceError,
    handlers::common::{
        created_response, mutation_response, no_content_response, success_response,
        validate_input, AppJson,
    },
    services::addresses::NewAddress,
    ApiResult, AppState,
};

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateAddressRequest {
    #[validate(length(min = 1, max = 120))]
    pub full_name: String,
    #[validate(length(min = 5, max = 20))]
    pub phone: String,
    #[validate(length(min = 1, max = 200))]
    pub line1: String,
    #[validate(length(max = 200))]
    pub line2: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub city: String,
    #[validate(length(min = 1, max = 100))]
    pub state: String,
    #[validate(length(min = 3, max = 12))]
    pub postal_code: String,
    #[serde(default = "default_country")]
    #[validate(length(min = 2, max = 56))]
    pub country: String,
    #[serde(default)]
    pub is_default: bool,
}

fn default_country() -> String {
    "India".to_string()
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/addresses", get(list_addresses).post(create_address))
        .route("/addresses/:id/default", post(set_default_address))
        .route("/addresses/:id", delete(delete_address))
}

async fn list_addresses(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> ApiResult<Vec<AddressModel>> {
    Ok(success_response(
        state.services.addresses.list(&user.user_id).await?,
    ))
}

async fn create_address(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    AppJson(payload): AppJson<CreateAddressRequest>,
) -> Result<Response, ServiceError> {
    validate_input(&payload)?;
    let input = NewAddress {
        full_name: payload.full_name,
        phone: payload.phone,
        line1: payload.line1,
        line2: payload.line2,
        city: payload.city,
        state: payload.state,
        postal_code: payload.postal_code,
        country: payload.country,
        is_default: payload.is_default,
    };
    let mutation = state.services.addresses.create(&user.user_id, input).await?;
    Ok(created_response(mutation).into_response())
}

async fn set_default_address(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<AddressModel> {
    let mutation = state.services.addresses.set_default(&user.user_id, id).await?;
    Ok(mutation_response(mutation))
}

async fn delete_address(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    let mutation = state.services.addresses.delete(&user.user_id, id).await?;
    Ok(no_content_response(&mutation.invalidates))
}
