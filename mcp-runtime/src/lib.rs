//! MCP runtime for the Teamwork bridge: parameter binding, toolset gating,
//! JSON-RPC dispatch and the Projects API operations.

pub mod client;
pub mod params;
pub mod protocol;
pub mod stdio;
pub mod toolsets;
pub mod twprojects;
pub mod weblink;

pub use client::{DownstreamError, ProjectsClient};
pub use protocol::{McpServer, ToolError};
pub use toolsets::{MethodRegistry, ToolsetGroup};

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::BTreeSet;

    use twmcp_core::{BearerToken, Identity, RequestContext};

    const HOME_REGION: &str = "us-east-1";

    /// Context for user 7 of installation 42 with the `projects` scope.
    pub fn context(installation_url: &str, cross_region: bool) -> RequestContext {
        let identity = Identity {
            user_id: 7,
            installation_id: 42,
            url: installation_url.to_string(),
            region: HOME_REGION.to_string(),
            scopes: BTreeSet::from(["projects".to_string()]),
        };
        let serving = if cross_region { "eu-west-1" } else { HOME_REGION };
        RequestContext::new(
            BearerToken::new("test-token").expect("non-empty token"),
            identity,
            serving,
        )
    }
}
