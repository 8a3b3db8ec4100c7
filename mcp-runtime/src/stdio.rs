//! Newline-delimited JSON-RPC over a byte stream (stdin/stdout).

use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use twmcp_core::auth::BearerToken;
use twmcp_core::{CredentialResolver, RequestContext};

use crate::protocol::{McpServer, RpcError, error_response};

/// Methods an unauthenticated session may still call.
const UNAUTHENTICATED_METHODS: [&str; 6] = [
    "initialize",
    "ping",
    "tools/list",
    "prompts/list",
    "resources/list",
    "resources/templates/list",
];

/// Resolve the session's context once, at startup.
///
/// A missing or rejected token leaves the session unauthenticated; the
/// reason is logged and the session keeps serving handshake frames.
pub async fn authenticate(
    resolver: &CredentialResolver,
    raw_token: Option<&str>,
    serving_region: &str,
) -> Option<RequestContext> {
    let Some(token) = raw_token.and_then(|raw| BearerToken::new(raw.trim())) else {
        tracing::warn!(event = "stdio_unauthenticated", reason = "missing_token");
        return None;
    };
    match resolver.resolve(&token).await {
        Ok(identity) => {
            tracing::info!(
                event = "stdio_authenticated",
                user_id = identity.user_id,
                installation_id = identity.installation_id,
            );
            Some(RequestContext::new(token, identity, serving_region))
        }
        Err(e) => {
            tracing::warn!(event = "stdio_unauthenticated", reason = %e);
            None
        }
    }
}

fn admitted_without_auth(frame: &Value) -> bool {
    match frame.get("method").and_then(Value::as_str) {
        Some(method) => {
            method.starts_with("notifications/") || UNAUTHENTICATED_METHODS.contains(&method)
        }
        // Client responses and malformed frames are left to the dispatcher.
        None => true,
    }
}

/// Split a frame into what the dispatcher may see and the rejections to
/// send back for everything else.
fn gate(incoming: Value) -> (Option<Value>, Vec<Value>) {
    let reject = |frame: &Value| {
        frame
            .get("id")
            .cloned()
            .map(|id| error_response(id, RpcError::unauthorized()))
    };
    match incoming {
        Value::Array(batch) if !batch.is_empty() => {
            let (admitted, denied): (Vec<Value>, Vec<Value>) =
                batch.into_iter().partition(admitted_without_auth);
            let rejections = denied.iter().filter_map(reject).collect();
            let admitted = (!admitted.is_empty()).then_some(Value::Array(admitted));
            (admitted, rejections)
        }
        frame if admitted_without_auth(&frame) => (Some(frame), Vec::new()),
        frame => (None, reject(&frame).into_iter().collect()),
    }
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, value: &Value) -> std::io::Result<()> {
    let mut line = serde_json::to_vec(value)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await
}

/// Serve frames until the reader reaches EOF.
pub async fn serve<R, W>(
    server: &McpServer,
    ctx: Option<&RequestContext>,
    reader: R,
    mut writer: W,
) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let incoming: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => {
                let response =
                    error_response(Value::Null, RpcError::parse_error(format!("Parse error: {e}")));
                write_line(&mut writer, &response).await?;
                continue;
            }
        };

        let batch = matches!(&incoming, Value::Array(items) if !items.is_empty());
        let responses = match ctx {
            Some(ctx) => server.handle_incoming(Some(ctx), incoming).await,
            None => {
                let (admitted, mut responses) = gate(incoming);
                if let Some(frame) = admitted {
                    responses.extend(server.handle_incoming(None, frame).await);
                }
                responses
            }
        };
        if batch {
            // One reply line per batch, rejections included.
            if !responses.is_empty() {
                write_line(&mut writer, &Value::Array(responses)).await?;
            }
        } else {
            for response in &responses {
                write_line(&mut writer, response).await?;
            }
        }
    }
    Ok(())
}
