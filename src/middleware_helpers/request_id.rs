use crate::tracing::{scope_request_id, RequestId};
use axum::{
    extract::Request,
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

const MAX_INCOMING_LEN: usize = 128;

/// Accepts a caller-supplied id only when it is short, non-empty printable ASCII.
fn incoming_request_id(headers: &HeaderMap) -> Option<RequestId> {
    let raw = headers.get(REQUEST_ID_HEADER)?.to_str().ok()?.trim();
    let acceptable = !raw.is_empty()
        && raw.len() <= MAX_INCOMING_LEN
        && raw.bytes().all(|b| b.is_ascii_graphic());
    acceptable.then(|| RequestId::new(raw))
}

/// Tags each request with a correlation id, exposes it to handlers and
/// error bodies, and echoes it back on the response.
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let request_id = incoming_request_id(request.headers()).unwrap_or_else(RequestId::generate);

    // Generated ids are UUIDs and accepted ids are printable ASCII, so this always converts.
    let echoed = HeaderValue::from_str(request_id.as_str()).ok();
    if let Some(value) = &echoed {
        request.headers_mut().insert(REQUEST_ID_HEADER, value.clone());
    }
    request.extensions_mut().insert(request_id.clone());

    let mut response = scope_request_id(request_id, next.run(request)).await;
    if let Some(value) = echoed {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{to_bytes, Body},
        extract::Extension,
        http::Request as HttpRequest,
        routing::get,
        Router,
    };
    use tower::ServiceExt;

    async fn echo_id(Extension(request_id): Extension<RequestId>) -> String {
        request_id.to_string()
    }

    async fn call(header: Option<&str>) -> (Option<String>, String) {
        let app = Router::new()
            .route("/", get(echo_id))
            .layer(axum::middleware::from_fn(request_id_middleware));

        let mut builder = HttpRequest::builder().uri("/");
        if let Some(value) = header {
            builder = builder.header(REQUEST_ID_HEADER, value);
        }
        let response = app.oneshot(builder.body(Body::empty()).unwrap()).await.unwrap();

        let echoed = response
            .headers()
            .get(REQUEST_ID_HEADER)
            .map(|v| v.to_str().unwrap().to_string());
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (echoed, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn caller_supplied_id_is_kept() {
        let (echoed, seen) = call(Some("checkout-42")).await;
        assert_eq!(echoed.as_deref(), Some("checkout-42"));
        assert_eq!(seen, "checkout-42");
    }

    #[tokio::test]
    async fn missing_id_is_minted_and_matches_extension() {
        let (echoed, seen) = call(None).await;
        let echoed = echoed.expect("response carries an id");
        assert_eq!(echoed, seen);
        assert!(uuid::Uuid::parse_str(&echoed).is_ok());
    }

    #[tokio::test]
    async fn oversized_or_blank_ids_are_replaced() {
        let long = "a".repeat(MAX_INCOMING_LEN + 1);
        for bad in [long.as_str(), "   ", "has space"] {
            let (echoed, _) = call(Some(bad)).await;
            assert_ne!(echoed.as_deref(), Some(bad));
        }
    }
}
