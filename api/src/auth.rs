use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::extract::Request;
use axum::http::Method;
use axum::http::header::AUTHORIZATION;
use axum::response::{IntoResponse, Response};
use tower::{Layer, Service, ServiceExt};
use twmcp_core::auth::parse_bearer_header;
use twmcp_core::{CredentialResolver, RequestContext, ResolveError};

use crate::error::AppError;
use crate::middleware::request_info::trace_id;
use crate::state::AppState;

const PUBLIC_METHODS: &str = "GET, OPTIONS";

/// Routes that skip credential resolution: liveness and discovery.
fn is_public_path(path: &str) -> bool {
    path == "/api/health" || path.starts_with("/.well-known/")
}

fn is_public_method(method: &Method) -> bool {
    method == Method::GET || method == Method::OPTIONS
}

/// Resolver plus the values every challenge and context needs.
struct Gate {
    resolver: CredentialResolver,
    discovery_url: String,
    serving_region: String,
}

/// Tower Layer that authenticates every non-public request.
///
/// On success a [`RequestContext`] is inserted into the request extensions
/// and the caller is recorded on the current request span. Failures
/// short-circuit: the inner service never sees the request.
#[derive(Clone)]
pub struct AuthLayer {
    gate: Arc<Gate>,
}

impl AuthLayer {
    pub fn new(state: &AppState) -> Self {
        Self {
            gate: Arc::new(Gate {
                resolver: state.resolver.clone(),
                discovery_url: state.config.discovery_url(),
                serving_region: state.config.region.clone(),
            }),
        }
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthService {
            inner,
            gate: Arc::clone(&self.gate),
        }
    }
}

#[derive(Clone)]
pub struct AuthService<S> {
    inner: S,
    gate: Arc<Gate>,
}

impl<S> Service<Request> for AuthService<S>
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        let not_ready = self.inner.clone();
        let ready = std::mem::replace(&mut self.inner, not_ready);
        let gate = Arc::clone(&self.gate);

        let trace_id = trace_id(&req);
        let public = is_public_path(req.uri().path());
        let token = req
            .headers()
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_bearer_header);

        Box::pin(async move {
            if public {
                if is_public_method(req.method()) {
                    return Ok(ready.oneshot(req).await.into_response());
                }
                return Ok(AppError::MethodNotAllowed {
                    allow: PUBLIC_METHODS,
                }
                .respond(trace_id));
            }

            let Some(token) = token else {
                tracing::info!(event = "auth_rejected", trace_id, reason = "missing_or_malformed_header");
                return Ok(AppError::unauthorized(
                    "Missing or malformed bearer token",
                    &gate.discovery_url,
                )
                .respond(trace_id));
            };

            let identity = match gate.resolver.resolve(&token).await {
                Ok(identity) => identity,
                Err(ResolveError::Unauthorized) => {
                    return Ok(AppError::unauthorized(
                        "Bearer token was rejected",
                        &gate.discovery_url,
                    )
                    .respond(trace_id));
                }
                Err(ResolveError::Internal(message)) => {
                    return Ok(AppError::Internal(message).respond(trace_id));
                }
            };

            let span = tracing::Span::current();
            span.record("user_id", identity.user_id);
            span.record("installation_id", identity.installation_id);
            span.record("installation_url", identity.url.as_str());

            let ctx = RequestContext::new(token, identity, &gate.serving_region)
                .with_trace_id(trace_id);
            req.extensions_mut().insert(ctx);
            Ok(ready.oneshot(req).await.into_response())
        })
    }
}
