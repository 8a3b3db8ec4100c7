use std::time::Duration;

use reqwest::Method;
use reqwest::header::{ACCEPT, AUTHORIZATION, HOST};
use serde_json::Value;
use twmcp_core::RequestContext;
use url::Url;

const TRACE_HEADER: &str = "x-request-id";

#[derive(Debug, thiserror::Error)]
pub enum DownstreamError {
    #[error("downstream API returned {status}")]
    Status { status: u16, body: Value },
    #[error("failed to reach downstream API: {0}")]
    Transport(String),
    #[error("downstream response did not decode: {0}")]
    Decode(String),
    #[error("invalid downstream URL: {0}")]
    Url(String),
}

impl DownstreamError {
    /// 4xx answers are the caller's problem and surface as tool errors.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Status { status, .. } if (400..500).contains(status))
    }
}

/// REST client for the Teamwork Projects API of the caller's installation.
///
/// Holds no per-request state; credentials and the target installation come
/// from the [`RequestContext`] passed into every call.
#[derive(Clone, Debug)]
pub struct ProjectsClient {
    http: reqwest::Client,
    base_url: Option<Url>,
    internal_proxy: Option<Url>,
}

impl ProjectsClient {
    /// `base_url` overrides the installation URL for every request;
    /// `internal_proxy` receives same-region traffic.
    pub fn new(
        base_url: Option<Url>,
        internal_proxy: Option<Url>,
        timeout: Duration,
    ) -> Result<Self, DownstreamError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("twmcp/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DownstreamError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            base_url,
            internal_proxy,
        })
    }

    /// Final request URL plus the `Host` header to send when the call is
    /// routed through the internal proxy.
    fn endpoint(
        &self,
        ctx: &RequestContext,
        path: &str,
    ) -> Result<(Url, Option<String>), DownstreamError> {
        let base = match &self.base_url {
            Some(base) => base.as_str().trim_end_matches('/').to_string(),
            None => ctx.installation_url().to_string(),
        };
        let mut url = Url::parse(&format!("{base}{path}"))
            .map_err(|e| DownstreamError::Url(format!("{base}{path}: {e}")))?;

        let proxy = match (&self.internal_proxy, &self.base_url) {
            (Some(proxy), None) if !ctx.cross_region() => proxy,
            _ => return Ok((url, None)),
        };
        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => return Err(DownstreamError::Url(format!("{url} has no host"))),
        };
        let rerouted = url.set_scheme(proxy.scheme()).is_ok()
            && url.set_host(proxy.host_str()).is_ok()
            && url.set_port(proxy.port()).is_ok();
        if !rerouted {
            return Err(DownstreamError::Url(format!("cannot route {host} through {proxy}")));
        }
        Ok((url, Some(host)))
    }

    pub async fn send(
        &self,
        ctx: &RequestContext,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Value, DownstreamError> {
        let (url, host) = self.endpoint(ctx, path)?;
        let mut request = self
            .http
            .request(method.clone(), url)
            .header(AUTHORIZATION, ctx.token().header_value())
            .header(ACCEPT, "application/json");
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(host) = host {
            request = request.header(HOST, host);
        }
        if let Some(trace_id) = ctx.trace_id() {
            request = request.header(TRACE_HEADER, trace_id);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            tracing::warn!(event = "downstream_failed", %method, path, error = %e);
            DownstreamError::Transport(e.to_string())
        })?;
        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| DownstreamError::Transport(e.to_string()))?;
        tracing::debug!(event = "downstream_call", %method, path, status = status.as_u16());

        if !status.is_success() {
            return Err(DownstreamError::Status {
                status: status.as_u16(),
                body: parse_lenient(&bytes),
            });
        }
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes).map_err(|e| DownstreamError::Decode(e.to_string()))
    }

    pub async fn get(
        &self,
        ctx: &RequestContext,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Value, DownstreamError> {
        self.send(ctx, Method::GET, path, query, None).await
    }

    pub async fn post(
        &self,
        ctx: &RequestContext,
        path: &str,
        body: &Value,
    ) -> Result<Value, DownstreamError> {
        self.send(ctx, Method::POST, path, &[], Some(body)).await
    }

    pub async fn put(
        &self,
        ctx: &RequestContext,
        path: &str,
        body: &Value,
    ) -> Result<Value, DownstreamError> {
        self.send(ctx, Method::PUT, path, &[], Some(body)).await
    }

    pub async fn patch(
        &self,
        ctx: &RequestContext,
        path: &str,
        body: &Value,
    ) -> Result<Value, DownstreamError> {
        self.send(ctx, Method::PATCH, path, &[], Some(body)).await
    }

    pub async fn delete(&self, ctx: &RequestContext, path: &str) -> Result<Value, DownstreamError> {
        self.send(ctx, Method::DELETE, path, &[], None).await
    }
}

fn parse_lenient(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}
