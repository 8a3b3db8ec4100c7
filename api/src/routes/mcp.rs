use axum::body::Bytes;
use axum::extract::{Extension, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::Value;
use twmcp_core::RequestContext;
use twmcp_runtime::protocol::{RpcError, error_response};

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/", post(handle))
}

/// Stateless JSON-RPC endpoint: one POST carries one message or a batch.
async fn handle(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    body: Bytes,
) -> Response {
    let incoming: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            let error = RpcError::parse_error(format!("Parse error: {e}"));
            return Json(error_response(Value::Null, error)).into_response();
        }
    };

    let batch = incoming.is_array();
    let mut responses = state.server.handle_incoming(Some(&ctx), incoming).await;
    match (batch, responses.len()) {
        (_, 0) => StatusCode::ACCEPTED.into_response(),
        (false, 1) => Json(responses.remove(0)).into_response(),
        _ => Json(Value::Array(responses)).into_response(),
    }
}
