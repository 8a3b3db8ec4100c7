use std::sync::Arc;

use twmcp_core::CredentialResolver;
use twmcp_core::config::ServiceConfig;
use twmcp_runtime::McpServer;

/// Shared, read-only process state. Nothing request-scoped lives here.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServiceConfig>,
    pub resolver: CredentialResolver,
    pub server: McpServer,
}
