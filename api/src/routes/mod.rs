pub mod discovery;
pub mod health;
pub mod mcp;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::auth::AuthLayer;
use crate::middleware::access_log::AccessLogLayer;
use crate::middleware::body_limit::{MAX_BODY_BYTES, limit_body};
use crate::middleware::error_report::report_errors;
use crate::middleware::request_info::{MakeTraceId, REQUEST_ID_HEADER};
use crate::middleware::span::RequestSpan;
use crate::state::AppState;

/// The full HTTP surface with its middleware chain.
pub fn app(state: AppState) -> Router {
    let middleware = ServiceBuilder::new()
        .layer(axum::middleware::from_fn(limit_body))
        .layer(SetRequestIdLayer::new(REQUEST_ID_HEADER, MakeTraceId))
        .layer(PropagateRequestIdLayer::new(REQUEST_ID_HEADER))
        .layer(AccessLogLayer::new(MAX_BODY_BYTES))
        .layer(axum::middleware::from_fn(report_errors))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(RequestSpan::new(&state.config.service_name)),
        )
        .layer(AuthLayer::new(&state));

    Router::new()
        .merge(health::router())
        .merge(discovery::router())
        .merge(mcp::router())
        // Size is enforced by `limit_body`; extractors must not cap it lower.
        .layer(DefaultBodyLimit::disable())
        .layer(middleware)
        .with_state(state)
}
