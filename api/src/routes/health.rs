use axum::Router;
use axum::routing::get;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/health", get(health_check).options(health_check))
}

/// Liveness only: no downstream or account-service checks.
pub async fn health_check() -> &'static str {
    "OK"
}
