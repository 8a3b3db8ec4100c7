use std::convert::Infallible;
use std::error::Error as StdError;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::body::{Body, Bytes};
use axum::extract::Request;
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum::response::{IntoResponse, Response};
use http_body_util::BodyExt;
use http_body_util::LengthLimitError;
use serde_json::{Map, Value};
use tower::{Layer, Service, ServiceExt};
use twmcp_core::auth::redact_authorization;

use super::request_info::trace_id;
use crate::error::AppError;

/// Tower Layer logging one `request` event per request and response.
///
/// Both bodies are buffered for the log line and handed on unchanged. The
/// `Authorization` header is redacted before it reaches the log.
#[derive(Clone)]
pub struct AccessLogLayer {
    limit: usize,
}

impl AccessLogLayer {
    pub fn new(limit: usize) -> Self {
        Self { limit }
    }
}

impl<S> Layer<S> for AccessLogLayer {
    type Service = AccessLogService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AccessLogService {
            inner,
            limit: self.limit,
        }
    }
}

#[derive(Clone)]
pub struct AccessLogService<S> {
    inner: S,
    limit: usize,
}

impl<S> Service<Request> for AccessLogService<S>
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

    fn call(&mut self, req: Request) -> Self::Future {
        let not_ready = self.inner.clone();
        let ready = std::mem::replace(&mut self.inner, not_ready);
        let limit = self.limit;

        Box::pin(async move {
            let started = Instant::now();
            let trace_id = trace_id(&req);
            let (parts, body) = req.into_parts();
            let request_body = match body.collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(e) if exceeded_limit(&e) => {
                    return Ok(AppError::PayloadTooLarge { limit }.respond(trace_id));
                }
                Err(e) => return Ok(AppError::BadRequest(e.to_string()).respond(trace_id)),
            };
            let method = parts.method.clone();
            let url = parts.uri.to_string();
            let request_headers = redacted_headers(&parts.headers);

            let req = Request::from_parts(parts, Body::from(request_body.clone()));
            let response = ready.oneshot(req).await.into_response();

            let (parts, body) = response.into_parts();
            let response_body = body
                .collect()
                .await
                .map(|collected| collected.to_bytes())
                .unwrap_or_else(|e| {
                    tracing::warn!(event = "response_body_unreadable", trace_id, error = %e);
                    Bytes::new()
                });

            tracing::info!(
                event = "request",
                trace_id,
                url,
                %method,
                request_headers = %request_headers,
                request_body = %String::from_utf8_lossy(&request_body),
                status = parts.status.as_u16(),
                response_headers = %redacted_headers(&parts.headers),
                response_body = %String::from_utf8_lossy(&response_body),
                duration_ms = started.elapsed().as_millis() as u64,
            );

            Ok(Response::from_parts(parts, Body::from(response_body)))
        })
    }
}

fn exceeded_limit(err: &axum::Error) -> bool {
    let mut source: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = source {
        if e.is::<LengthLimitError>() {
            return true;
        }
        source = e.source();
    }
    false
}

/// Headers as a JSON object, with the credential redacted.
fn redacted_headers(headers: &HeaderMap) -> Value {
    let mut out = Map::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes());
        let value = if name == AUTHORIZATION {
            redact_authorization(&value)
        } else {
            value.into_owned()
        };
        out.insert(name.as_str().to_string(), Value::String(value));
    }
    Value::Object(out)
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::{Arc, Mutex};

    use axum::Router;
    use axum::http::{HeaderValue, Request as HttpRequest, StatusCode};
    use axum::routing::post;
    use tracing_subscriber::fmt::MakeWriter;

    use super::*;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().expect("lock").clone()).expect("utf8")
        }
    }

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().expect("lock").extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Captured {
        type Writer = Captured;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    fn echo_app(limit: usize) -> Router {
        Router::new()
            .route("/", post(|body: Bytes| async move { body }))
            .layer(AccessLogLayer::new(limit))
    }

    #[test]
    fn authorization_header_is_redacted() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer s3cret"));
        headers.insert("x-other", HeaderValue::from_static("kept"));
        let logged = redacted_headers(&headers);
        assert_eq!(logged["authorization"], "Bearer REDACTED");
        assert_eq!(logged["x-other"], "kept");
    }

    #[tokio::test]
    async fn logged_requests_never_contain_the_token() {
        let capture = Captured::default();
        let subscriber = tracing_subscriber::fmt()
            .json()
            .with_writer(capture.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let response = echo_app(1024)
            .oneshot(
                HttpRequest::post("/")
                    .header(AUTHORIZATION, "Bearer super-secret-token")
                    .body(Body::from("{\"jsonrpc\":\"2.0\"}"))
                    .expect("request"),
            )
            .await
            .expect("infallible");
        assert_eq!(response.status(), StatusCode::OK);
        let echoed = response.into_body().collect().await.expect("body").to_bytes();
        assert_eq!(&echoed[..], b"{\"jsonrpc\":\"2.0\"}");

        let logs = capture.text();
        assert!(logs.contains("Bearer REDACTED"), "logs: {logs}");
        assert!(logs.contains("\\\"jsonrpc\\\""), "request body logged: {logs}");
        assert!(!logs.contains("super-secret-token"));
    }

    #[tokio::test]
    async fn body_past_the_limit_is_rejected() {
        let response = echo_app(4)
            .oneshot(
                HttpRequest::post("/")
                    .body(Body::new(http_body_util::Limited::new(
                        Body::from("more than four bytes"),
                        4,
                    )))
                    .expect("request"),
            )
            .await
            .expect("infallible");
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
