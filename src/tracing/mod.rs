use axum::http::{Request, Response};
use std::{fmt, future::Future, sync::Arc, time::Duration};
use tower_http::{
    classify::{SharedClassifier, StatusInRangeAsFailures},
    trace::{DefaultOnFailure, MakeSpan, OnRequest, OnResponse, TraceLayer},
};
use tracing::Span;
use uuid::Uuid;

/// Correlation id carried by every storefront request.
///
/// Cheap to clone; handlers and error responses read it through
/// [`current_request_id`] rather than threading it by hand.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestId(Arc<str>);

impl RequestId {
    pub fn new(value: impl AsRef<str>) -> Self {
        Self(Arc::from(value.as_ref()))
    }

    pub fn generate() -> Self {
        Self::new(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::generate()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

tokio::task_local! {
    static REQUEST_SCOPE: RequestId;
}

/// Runs `future` with `request_id` visible through [`current_request_id`].
pub async fn scope_request_id<Fut, R>(request_id: RequestId, future: Fut) -> R
where
    Fut: Future<Output = R>,
{
    REQUEST_SCOPE.scope(request_id, future).await
}

pub fn current_request_id() -> Option<RequestId> {
    REQUEST_SCOPE.try_with(RequestId::clone).ok()
}

/// Opens one `storefront.http` span per request, tagged with its correlation id.
#[derive(Clone, Copy, Default)]
pub struct StorefrontSpan;

impl<B> MakeSpan<B> for StorefrontSpan {
    fn make_span(&mut self, request: &Request<B>) -> Span {
        let request_id = match request.extensions().get::<RequestId>() {
            Some(id) => id.clone(),
            None => request
                .headers()
                .get(crate::middleware_helpers::REQUEST_ID_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(RequestId::new)
                .unwrap_or_default(),
        };

        tracing::info_span!(
            "storefront.http",
            request_id = %request_id,
            method = %request.method(),
            path = %request.uri().path(),
            status = tracing::field::Empty,
        )
    }
}

#[derive(Clone, Copy, Default)]
pub struct LogRequestStart;

impl<B> OnRequest<B> for LogRequestStart {
    fn on_request(&mut self, request: &Request<B>, _span: &Span) {
        tracing::debug!(query = request.uri().query().unwrap_or(""), "request started");
    }
}

#[derive(Clone, Copy, Default)]
pub struct LogRequestEnd;

impl<B> OnResponse<B> for LogRequestEnd {
    fn on_response(self, response: &Response<B>, latency: Duration, span: &Span) {
        let status = response.status().as_u16();
        span.record("status", status);
        if response.status().is_client_error() {
            tracing::info!(status, latency_ms = latency.as_millis() as u64, "request rejected");
        } else {
            tracing::info!(status, latency_ms = latency.as_millis() as u64, "request finished");
        }
    }
}

/// Request tracing for the router. Only 5xx responses count as failures;
/// 4xx are ordinary storefront outcomes such as an empty cart or stale stock.
pub fn http_trace_layer(
) -> TraceLayer<SharedClassifier<StatusInRangeAsFailures>, StorefrontSpan, LogRequestStart, LogRequestEnd>
{
    TraceLayer::new(SharedClassifier::new(StatusInRangeAsFailures::new(500..=599)))
        .make_span_with(StorefrontSpan)
        .on_request(LogRequestStart)
        .on_response(LogRequestEnd)
        .on_failure(DefaultOnFailure::default())
}
