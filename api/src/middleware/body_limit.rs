use axum::body::Body;
use axum::extract::Request;
use axum::http::header::CONTENT_LENGTH;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use http_body_util::Limited;

use crate::error::AppError;

/// Largest request body accepted by any route.
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Reject oversized bodies before anything buffers them.
///
/// A declared `Content-Length` over the limit is refused outright; bodies
/// without one are wrapped so reading past the limit fails.
pub async fn limit_body(req: Request, next: Next) -> Response {
    let declared = req
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared.is_some_and(|len| len > MAX_BODY_BYTES) {
        return AppError::PayloadTooLarge {
            limit: MAX_BODY_BYTES,
        }
        .into_response();
    }
    let req = req.map(|body| Body::new(Limited::new(body, MAX_BODY_BYTES)));
    next.run(req).await
}
