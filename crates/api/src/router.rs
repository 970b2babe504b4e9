//! The HTTP surface: `/health` plus the four image operations under
//! `/api/v1`, wrapped in the layers every request passes through.

use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderName, Method, StatusCode};
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::classify::{ServerErrorsAsFailures, SharedClassifier};
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::config::ServerConfig;
use crate::routes;
use crate::state::AppState;

/// Header correlating a client request with the server's log lines.
const REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Assemble the router used by the binary and by the integration tests.
///
/// Outermost first, a request meets CORS, gets an `x-request-id`, is traced,
/// then runs under `request_timeout_secs` and panic recovery before the
/// upload limit applies. The request timeout must stay above the engine
/// timeout so a slow job surfaces as the handler's 504, not a bare 408.
pub fn build_app_router(state: AppState, config: &ServerConfig) -> Router {
    Router::new()
        // Unversioned so load balancers need no path config.
        .merge(routes::health::router())
        .nest("/api/v1", routes::api_routes())
        // Camera photos routinely exceed axum's 2 MB default.
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        // A panicking handler answers 500 instead of dropping the socket.
        .layer(CatchPanicLayer::new())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(config.request_timeout_secs),
        ))
        .layer(PropagateRequestIdLayer::new(REQUEST_ID))
        .layer(trace_layer())
        .layer(SetRequestIdLayer::new(REQUEST_ID, MakeRequestUuid))
        .layer(build_cors_layer(config))
        .with_state(state)
}

/// One INFO span per request, closed with status and latency.
fn trace_layer() -> TraceLayer<SharedClassifier<ServerErrorsAsFailures>> {
    TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO))
}

/// CORS for the browser front-end: the configured origins may send
/// multipart POSTs and read the image or JSON reply, including the
/// request id.
///
/// Panics at startup on an origin that is not a valid header value.
pub fn build_cors_layer(config: &ServerConfig) -> CorsLayer {
    let origins: Vec<_> = config
        .cors_origins
        .iter()
        .map(|o| {
            o.parse()
                .unwrap_or_else(|e| panic!("Invalid CORS origin '{o}': {e}"))
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([CONTENT_TYPE])
        .expose_headers([REQUEST_ID])
        .max_age(Duration::from_secs(3600))
}
