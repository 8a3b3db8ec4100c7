use std::sync::Arc;

use axum::http::Request;
use tower_http::trace::MakeSpan;
use tracing::Span;
use tracing::field::Empty;

use super::request_info::REQUEST_ID_HEADER;

/// Paths that never get a request span.
fn untraced(path: &str) -> bool {
    path == "/api/health" || path.starts_with("/.well-known/")
}

/// `http.request` span per request; the auth stage fills in the caller.
#[derive(Clone)]
pub struct RequestSpan {
    service: Arc<str>,
}

impl RequestSpan {
    pub fn new(service: &str) -> Self {
        Self {
            service: Arc::from(service),
        }
    }
}

impl<B> MakeSpan<B> for RequestSpan {
    fn make_span(&mut self, req: &Request<B>) -> Span {
        let path = req.uri().path();
        if untraced(path) {
            return Span::none();
        }
        let trace_id = req
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        tracing::info_span!(
            "http.request",
            service = %self.service,
            resource = %format!("{}_{}", req.method(), path),
            trace_id,
            user_id = Empty,
            installation_id = Empty,
            installation_url = Empty,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_and_discovery_are_untraced() {
        assert!(untraced("/api/health"));
        assert!(untraced("/.well-known/oauth-protected-resource"));
        assert!(!untraced("/"));
        assert!(!untraced("/api/healthz"));
    }
}
