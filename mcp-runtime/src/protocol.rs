//! JSON-RPC dispatch of MCP messages onto an enabled [`ToolsetGroup`].
//!
//! The dispatcher is transport agnostic: HTTP and stdio both hand it one
//! decoded JSON value plus the caller's [`RequestContext`] (if any) and get
//! back the responses to write.

use std::sync::Arc;

use serde_json::{Map, Value, json};
use twmcp_core::RequestContext;
use twmcp_core::auth::scope_allows;

use crate::client::DownstreamError;
use crate::params::ParamErrors;
use crate::toolsets::ToolsetGroup;

pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";
pub const MCP_SERVER_NAME: &str = "twmcp";

const REAUTH_HINT: &str = "Provide a valid Teamwork.com bearer token and retry.";

/// Failure of a tool, prompt or resource handler.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error(transparent)]
    InvalidParams(#[from] ParamErrors),
    #[error(transparent)]
    Downstream(#[from] DownstreamError),
    /// Request was understood but cannot be served as asked
    #[error("{0}")]
    Rejected(String),
}

impl ToolError {
    /// Whether the failure is the caller's to fix (reported as a tool
    /// result) rather than a server fault.
    fn is_caller_error(&self) -> bool {
        match self {
            Self::InvalidParams(_) | Self::Rejected(_) => true,
            Self::Downstream(e) => e.is_client_error(),
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::InvalidParams(_) => "invalid_params",
            Self::Downstream(_) => "downstream_rejected",
            Self::Rejected(_) => "rejected",
        }
    }

    fn to_value(&self) -> Value {
        let mut payload = json!({
            "error": self.code(),
            "message": self.to_string(),
        });
        match self {
            Self::InvalidParams(errors) => payload["details"] = errors.to_value(),
            Self::Downstream(DownstreamError::Status { status, body }) => {
                payload["details"] = json!({ "status": status, "body": body });
            }
            _ => {}
        }
        payload
    }
}

#[derive(Debug)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    pub data: Option<Value>,
}

impl RpcError {
    fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(-32700, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(-32600, message)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(-32601, format!("Method not found: {method}"))
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(-32602, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(-32603, message)
    }

    pub fn unauthorized() -> Self {
        Self {
            code: -32001,
            message: "Unauthorized".to_string(),
            data: Some(json!({ "docs_hint": REAUTH_HINT })),
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

pub fn success_response(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result
    })
}

pub fn error_response(id: Value, error: RpcError) -> Value {
    let mut payload = json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": error.code,
            "message": error.message
        }
    });
    if let Some(data) = error.data {
        payload["error"]["data"] = data;
    }
    payload
}

fn tool_result(payload: Value, is_error: bool) -> Value {
    let text = match &payload {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    };
    let mut result = json!({ "content": [{ "type": "text", "text": text }] });
    if payload.is_object() {
        result["structuredContent"] = payload;
    }
    if is_error {
        result["isError"] = Value::Bool(true);
    }
    result
}

/// Stateless MCP server over an immutable capability set.
#[derive(Clone)]
pub struct McpServer {
    group: Arc<ToolsetGroup>,
}

impl McpServer {
    pub fn new(group: Arc<ToolsetGroup>) -> Self {
        Self { group }
    }

    /// Handle one decoded frame (single message or batch).
    ///
    /// Notifications and client responses produce no output, so the result
    /// may be empty.
    pub async fn handle_incoming(&self, ctx: Option<&RequestContext>, incoming: Value) -> Vec<Value> {
        let mut responses = Vec::new();

        if let Some(batch) = incoming.as_array() {
            if batch.is_empty() {
                responses.push(error_response(
                    Value::Null,
                    RpcError::invalid_request("Batch request must not be empty"),
                ));
                return responses;
            }
            for item in batch {
                if let Some(response) = self.handle_single_message(ctx, item.clone()).await {
                    responses.push(response);
                }
            }
            return responses;
        }

        if let Some(response) = self.handle_single_message(ctx, incoming).await {
            responses.push(response);
        }
        responses
    }

    async fn handle_single_message(
        &self,
        ctx: Option<&RequestContext>,
        incoming: Value,
    ) -> Option<Value> {
        let Some(obj) = incoming.as_object() else {
            return Some(error_response(
                Value::Null,
                RpcError::invalid_request("Request must be a JSON object"),
            ));
        };

        if obj.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
            let id = obj.get("id").cloned().unwrap_or(Value::Null);
            return Some(error_response(
                id,
                RpcError::invalid_request("jsonrpc must be '2.0'"),
            ));
        }

        // Client responses carry no method; this server never issues requests.
        let method = obj.get("method").and_then(Value::as_str)?;

        let params = obj.get("params").cloned().unwrap_or(Value::Null);
        let id = obj.get("id").cloned()?;
        Some(match self.handle_request(ctx, method, params).await {
            Ok(payload) => success_response(id, payload),
            Err(err) => error_response(id, err),
        })
    }

    async fn handle_request(
        &self,
        ctx: Option<&RequestContext>,
        method: &str,
        params: Value,
    ) -> Result<Value, RpcError> {
        match method {
            "initialize" => Ok(self.initialize_payload()),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(self.tools_list_payload()),
            "tools/call" => self.handle_tools_call(ctx, params).await,
            "prompts/list" => Ok(self.prompts_list_payload()),
            "prompts/get" => self.handle_prompts_get(ctx, params).await,
            "resources/list" => Ok(json!({ "resources": [] })),
            "resources/templates/list" => Ok(self.resource_templates_payload()),
            "resources/read" => self.handle_resources_read(ctx, params).await,
            _ => Err(RpcError::method_not_found(method)),
        }
    }

    fn initialize_payload(&self) -> Value {
        json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": {
                "tools": { "listChanged": false },
                "prompts": { "listChanged": false },
                "resources": { "listChanged": false }
            },
            "serverInfo": {
                "name": MCP_SERVER_NAME,
                "version": env!("CARGO_PKG_VERSION")
            }
        })
    }

    fn tools_list_payload(&self) -> Value {
        let tools: Vec<Value> = self.group.tools().map(|tool| tool.to_value()).collect();
        json!({ "tools": tools })
    }

    fn prompts_list_payload(&self) -> Value {
        let prompts: Vec<Value> = self.group.prompts().map(|p| p.to_value()).collect();
        json!({ "prompts": prompts })
    }

    fn resource_templates_payload(&self) -> Value {
        let templates: Vec<Value> = self
            .group
            .resource_templates()
            .map(|t| t.to_value())
            .collect();
        json!({ "resourceTemplates": templates })
    }

    async fn handle_tools_call(
        &self,
        ctx: Option<&RequestContext>,
        params: Value,
    ) -> Result<Value, RpcError> {
        let params = params
            .as_object()
            .ok_or_else(|| RpcError::invalid_params("tools/call params must be an object"))?;
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::invalid_params("tools/call requires string field 'name'"))?;
        let args = arguments(params, "tools/call")?;

        let (toolset, tool) = self
            .group
            .find_tool(name)
            .ok_or_else(|| RpcError::invalid_params(format!("Unknown tool: {name}")))?;
        let ctx = ctx.ok_or_else(RpcError::unauthorized)?;

        if !scope_allows(&ctx.identity().scopes, toolset.scope) {
            tracing::info!(event = "tool_call", tool = name, trace_id = ctx.trace_id(), decision = "deny", reason = "insufficient_scope");
            return Ok(tool_result(
                json!({
                    "error": "insufficient_scope",
                    "message": format!("Token lacks the '{}' scope required by {name}", toolset.scope.unwrap_or_default()),
                }),
                true,
            ));
        }

        match tool.call(ctx.clone(), args).await {
            Ok(payload) => {
                tracing::info!(event = "tool_call", tool = name, trace_id = ctx.trace_id(), outcome = "ok");
                Ok(tool_result(payload, false))
            }
            Err(err) if err.is_caller_error() => {
                tracing::info!(event = "tool_call", tool = name, trace_id = ctx.trace_id(), outcome = "tool_error", error = %err);
                Ok(tool_result(err.to_value(), true))
            }
            Err(err) => Err(server_fault("tool", name, ctx, &err)),
        }
    }

    async fn handle_prompts_get(
        &self,
        ctx: Option<&RequestContext>,
        params: Value,
    ) -> Result<Value, RpcError> {
        let params = params
            .as_object()
            .ok_or_else(|| RpcError::invalid_params("prompts/get params must be an object"))?;
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::invalid_params("prompts/get requires string field 'name'"))?;
        let args = arguments(params, "prompts/get")?;

        let (toolset, prompt) = self
            .group
            .find_prompt(name)
            .ok_or_else(|| RpcError::invalid_params(format!("Unknown prompt: {name}")))?;
        let ctx = ctx.ok_or_else(RpcError::unauthorized)?;
        if !scope_allows(&ctx.identity().scopes, toolset.scope) {
            return Err(RpcError::invalid_request(format!(
                "Token lacks the scope required by {name}"
            )));
        }

        (prompt.handler)(ctx.clone(), args)
            .await
            .map_err(|err| caller_or_fault("prompt", name, ctx, err))
    }

    async fn handle_resources_read(
        &self,
        ctx: Option<&RequestContext>,
        params: Value,
    ) -> Result<Value, RpcError> {
        let uri = params
            .get("uri")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::invalid_params("resources/read requires string field 'uri'"))?;
        let (toolset, template, vars) = self
            .group
            .find_resource(uri)
            .ok_or_else(|| RpcError::invalid_params(format!("Unknown resource: {uri}")))?;
        let ctx = ctx.ok_or_else(RpcError::unauthorized)?;
        if !scope_allows(&ctx.identity().scopes, toolset.scope) {
            return Err(RpcError::invalid_request(format!(
                "Token lacks the scope required by {uri}"
            )));
        }

        let contents = (template.handler)(ctx.clone(), vars)
            .await
            .map_err(|err| caller_or_fault("resource", uri, ctx, err))?;
        Ok(json!({
            "contents": [{
                "uri": uri,
                "mimeType": template.mime_type,
                "text": contents.to_string(),
            }]
        }))
    }
}

fn arguments(params: &Map<String, Value>, method: &str) -> Result<Map<String, Value>, RpcError> {
    match params.get("arguments") {
        Some(Value::Object(map)) => Ok(map.clone()),
        Some(Value::Null) | None => Ok(Map::new()),
        Some(_) => Err(RpcError::invalid_params(format!(
            "{method} 'arguments' must be an object"
        ))),
    }
}

fn caller_or_fault(kind: &str, name: &str, ctx: &RequestContext, err: ToolError) -> RpcError {
    if err.is_caller_error() {
        RpcError::invalid_params(err.to_string()).with_data(err.to_value())
    } else {
        server_fault(kind, name, ctx, &err)
    }
}

fn server_fault(kind: &str, name: &str, ctx: &RequestContext, err: &ToolError) -> RpcError {
    tracing::error!(
        event = "handler_failed",
        kind,
        name,
        trace_id = ctx.trace_id(),
        user_id = ctx.identity().user_id,
        installation_id = ctx.identity().installation_id,
        error = %err,
    );
    RpcError::internal(format!("{kind} {name} failed"))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use serde_json::json;

    use super::*;
    use crate::testing::context;
    use crate::toolsets::tests::group;

    fn server(read_only: bool) -> McpServer {
        McpServer::new(Arc::new(group(read_only, true, &["all"])))
    }

    fn call(name: &str, arguments: Value) -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "tools/call",
            "params": { "name": name, "arguments": arguments }
        })
    }

    #[tokio::test]
    async fn initialize_and_list_reflect_enabled_tools() {
        let server = server(true);
        let responses = server
            .handle_incoming(
                None,
                json!([
                    { "jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {} },
                    { "jsonrpc": "2.0", "method": "notifications/initialized" },
                    { "jsonrpc": "2.0", "id": 2, "method": "tools/list" }
                ]),
            )
            .await;
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0]["result"]["protocolVersion"], MCP_PROTOCOL_VERSION);
        let names: Vec<&str> = responses[1]["result"]["tools"]
            .as_array()
            .expect("tools array")
            .iter()
            .filter_map(|t| t["name"].as_str())
            .collect();
        assert_eq!(names, vec!["demo-list_things", "demo-get_thing"]);
    }

    #[tokio::test]
    async fn tool_call_binds_arguments_and_returns_structured_content() {
        let ctx = context("https://acme.teamwork.com", false);
        let responses = server(false)
            .handle_incoming(Some(&ctx), call("demo-get_thing", json!({ "id": 9 })))
            .await;
        let result = &responses[0]["result"];
        assert!(result.get("isError").is_none());
        assert_eq!(result["structuredContent"]["id"], 9);
    }

    #[tokio::test]
    async fn invalid_arguments_become_tool_error_results() {
        let ctx = context("https://acme.teamwork.com", false);
        let responses = server(false)
            .handle_incoming(Some(&ctx), call("demo-get_thing", json!({})))
            .await;
        let result = &responses[0]["result"];
        assert_eq!(result["isError"], true);
        assert_eq!(result["structuredContent"]["error"], "invalid_params");
        assert_eq!(result["structuredContent"]["details"][0]["field"], "id");
    }

    #[tokio::test]
    async fn calls_without_context_or_to_unknown_tools_fail() {
        let server = server(false);
        let responses = server
            .handle_incoming(None, call("demo-get_thing", json!({ "id": 1 })))
            .await;
        assert_eq!(responses[0]["error"]["code"], -32001);

        let ctx = context("https://acme.teamwork.com", false);
        let responses = server
            .handle_incoming(Some(&ctx), call("demo-create_thing", json!({ "id": 1 })))
            .await;
        assert!(responses[0]["result"].get("isError").is_none());

        let read_only = self::server(true);
        let responses = read_only
            .handle_incoming(Some(&ctx), call("demo-create_thing", json!({ "id": 1 })))
            .await;
        assert_eq!(responses[0]["error"]["code"], -32602);
    }

    #[tokio::test]
    async fn scopes_gate_toolsets() {
        let mut ctx_identity = context("https://acme.teamwork.com", false).identity().clone();
        ctx_identity.scopes = BTreeSet::from(["desk".to_string()]);
        let ctx = RequestContext::new(
            twmcp_core::BearerToken::new("t").expect("token"),
            ctx_identity,
            "us-east-1",
        );
        let responses = server(false)
            .handle_incoming(Some(&ctx), call("demo-get_thing", json!({ "id": 1 })))
            .await;
        assert_eq!(responses[0]["result"]["isError"], true);
        assert_eq!(
            responses[0]["result"]["structuredContent"]["error"],
            "insufficient_scope"
        );
    }

    #[tokio::test]
    async fn protocol_errors_use_standard_codes() {
        let server = server(false);
        let responses = server.handle_incoming(None, json!([])).await;
        assert_eq!(responses[0]["error"]["code"], -32600);

        let responses = server
            .handle_incoming(None, json!({ "jsonrpc": "1.0", "id": 3, "method": "ping" }))
            .await;
        assert_eq!(responses[0]["error"]["code"], -32600);
        assert_eq!(responses[0]["id"], 3);

        let responses = server
            .handle_incoming(None, json!({ "jsonrpc": "2.0", "id": 4, "method": "nope" }))
            .await;
        assert_eq!(responses[0]["error"]["code"], -32601);

        let responses = server
            .handle_incoming(None, json!({ "jsonrpc": "2.0", "id": 5, "result": {} }))
            .await;
        assert!(responses.is_empty());
    }
}
