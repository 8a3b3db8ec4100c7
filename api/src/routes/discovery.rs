use axum::extract::State;
use axum::http::Method;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};

use crate::state::AppState;

pub const DISCOVERY_PATH: &str = "/.well-known/oauth-protected-resource";

const SCOPES_SUPPORTED: [&str; 2] = ["projects", "desk"];

/// OAuth protected-resource metadata.
#[derive(Debug, Serialize)]
pub struct ResourceMetadata {
    pub resource: String,
    pub authorization_servers: Vec<String>,
    pub bearer_methods_supported: Vec<&'static str>,
    pub resource_documentation: &'static str,
    pub scopes_supported: Vec<&'static str>,
}

pub fn router() -> Router<AppState> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any);
    Router::new()
        .route(DISCOVERY_PATH, get(resource_metadata).options(resource_metadata))
        .layer(cors)
}

pub async fn resource_metadata(State(state): State<AppState>) -> Json<ResourceMetadata> {
    let config = &state.config;
    Json(ResourceMetadata {
        resource: config.mcp_url.as_str().trim_end_matches('/').to_string(),
        authorization_servers: vec![config.api_url.as_str().trim_end_matches('/').to_string()],
        bearer_methods_supported: vec!["header"],
        resource_documentation: config.resource_documentation(),
        scopes_supported: SCOPES_SUPPORTED.to_vec(),
    })
}
