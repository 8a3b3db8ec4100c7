use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;

use super::request_info::trace_id;

/// Attach request metadata to every server error.
pub async fn report_errors(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_owned();
    let trace_id = trace_id(&req);

    let response = next.run(req).await;
    if response.status().is_server_error() {
        tracing::error!(
            event = "server_error",
            %method,
            path,
            trace_id,
            status = response.status().as_u16(),
        );
    }
    response
}
