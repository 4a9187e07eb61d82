use async_trait::async_trait;
use axum::{
    extract::{rejection::JsonRejection, FromRequest, Request},
    http::{HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use validator::Validate;

use crate::{
    auth::AuthUser,
    entities::CartOwner,
    errors::ServiceError,
    services::invalidation::{Invalidation, Mutation},
    ApiResponse,
};

/// Header carrying invalidations on bodiless responses, as `resource[:key]` pairs.
pub const INVALIDATES_HEADER: HeaderName = HeaderName::from_static("x-invalidates");

/// Standard success response
pub fn success_response<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse::success(data))
}

/// Success response for a mutation, carrying its invalidation contract
pub fn mutation_response<T: Serialize>(mutation: Mutation<T>) -> Json<ApiResponse<T>> {
    Json(ApiResponse::from_mutation(mutation))
}

/// Standard created response
pub fn created_response<T: Serialize>(
    mutation: Mutation<T>,
) -> (StatusCode, Json<ApiResponse<T>>) {
    (StatusCode::CREATED, mutation_response(mutation))
}

/// Standard no content response
pub fn no_content_response(invalidates: &[Invalidation]) -> Response {
    let mut response = StatusCode::NO_CONTENT.into_response();
    if invalidates.is_empty() {
        return response;
    }

    let listed = invalidates
        .iter()
        .map(|inv| {
            let resource = serde_json::to_value(inv.resource)
                .ok()
                .and_then(|v| v.as_str().map(str::to_owned))
                .unwrap_or_default();
            match &inv.key {
                Some(key) => format!("{resource}:{key}"),
                None => resource,
            }
        })
        .collect::<Vec<_>>()
        .join(", ");
    if let Ok(value) = HeaderValue::from_str(&listed) {
        response.headers_mut().insert(INVALIDATES_HEADER, value);
    }
    response
}

/// Validate request input
pub fn validate_input<T: Validate>(input: &T) -> Result<(), ServiceError> {
    input.validate().map_err(ServiceError::from)
}

/// JSON body extractor whose rejections use the service error envelope.
#[derive(Debug, Clone, Copy, Default)]
pub struct AppJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for AppJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection: JsonRejection| ServiceError::BadRequest(rejection.body_text()))?;
        Ok(Self(value))
    }
}

/// Resolves whose cart a request addresses.
///
/// An explicit `userId` must match the token subject. With no identifier at
/// all, a signed-in caller gets their own cart.
pub fn resolve_cart_owner(
    session_id: Option<String>,
    user_id: Option<String>,
    caller: Option<&AuthUser>,
) -> Result<CartOwner, ServiceError> {
    let session_id = session_id.filter(|s| !s.trim().is_empty());
    let user_id = user_id.filter(|s| !s.trim().is_empty());

    match (session_id, user_id, caller) {
        (Some(_), Some(_), _) => Err(ServiceError::ValidationError(
            "provide either sessionId or userId, not both".to_string(),
        )),
        (None, Some(user_id), Some(caller)) if caller.user_id == user_id => {
            Ok(CartOwner::User(user_id))
        }
        (None, Some(_), Some(_)) => Err(ServiceError::Forbidden(
            "cannot access another user's cart".to_string(),
        )),
        (None, Some(_), None) => Err(ServiceError::Unauthorized(
            "sign in to use a user cart".to_string(),
        )),
        (Some(session_id), None, _) => Ok(CartOwner::Session(session_id)),
        (None, None, Some(caller)) => Ok(CartOwner::User(caller.user_id.clone())),
        (None, None, None) => Err(ServiceError::ValidationError(
            "sessionId or userId is required".to_string(),
        )),
    }
}

/// Accepts an amount sent either as a JSON string or a JSON number.
pub fn amount_text(field: &str, raw: Option<Value>) -> Result<Option<String>, ServiceError> {
    match raw {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(text)) => Ok(Some(text)),
        Some(Value::Number(number)) => Ok(Some(number.to_string())),
        Some(_) => Err(ServiceError::ValidationError(format!(
            "{field} must be a decimal string or number"
        ))),
    }
}

/// Parses a lowercase status name, mapping failures to `InvalidStatus`.
pub fn parse_status<T>(raw: &str, allowed: &str) -> Result<T, ServiceError>
where
    T: std::str::FromStr,
{
    raw.trim()
        .to_ascii_lowercase()
        .parse::<T>()
        .map_err(|_| ServiceError::InvalidStatus(format!("status must be one of {allowed}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::OrderStatus;
    use crate::services::invalidation::Resource;
    use assert_matches::assert_matches;

    fn caller(id: &str) -> AuthUser {
        AuthUser {
            user_id: id.into(),
            name: None,
            email: None,
            roles: vec![],
            token_id: "t".into(),
        }
    }

    #[test]
    fn cart_owner_resolution() {
        assert_eq!(
            resolve_cart_owner(Some("s1".into()), None, None).unwrap(),
            CartOwner::Session("s1".into())
        );
        assert_eq!(
            resolve_cart_owner(None, None, Some(&caller("u1"))).unwrap(),
            CartOwner::User("u1".into())
        );
        assert_matches!(
            resolve_cart_owner(None, Some("u2".into()), Some(&caller("u1"))),
            Err(ServiceError::Forbidden(_))
        );
        assert_matches!(
            resolve_cart_owner(None, Some("u1".into()), None),
            Err(ServiceError::Unauthorized(_))
        );
        assert_matches!(
            resolve_cart_owner(None, None, None),
            Err(ServiceError::ValidationError(_))
        );
    }

    #[test]
    fn status_parsing_is_case_insensitive() {
        let status: OrderStatus = parse_status(" Shipped ", "pending, shipped, delivered").unwrap();
        assert_eq!(status, OrderStatus::Shipped);
        assert_matches!(
            parse_status::<OrderStatus>("cancelled", "pending, shipped, delivered"),
            Err(ServiceError::InvalidStatus(_))
        );
    }

    #[test]
    fn no_content_lists_invalidations_in_header() {
        let response = no_content_response(&[
            Invalidation::keyed(Resource::Cart, "session:s1"),
            Invalidation::all(Resource::Products),
        ]);
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(
            response.headers().get(INVALIDATES_HEADER).unwrap(),
            "cart:session:s1, products"
        );
    }

    #[test]
    fn amounts_accept_strings_and_numbers() {
        assert_eq!(amount_text("x", Some(Value::from("12.50"))).unwrap().as_deref(), Some("12.50"));
        assert_eq!(amount_text("x", Some(serde_json::json!(12.5))).unwrap().as_deref(), Some("12.5"));
        assert_eq!(amount_text("x", None).unwrap(), None);
        assert_matches!(amount_text("x", Some(serde_json::json!([]))), Err(ServiceError::ValidationError(_)));
    }
}
