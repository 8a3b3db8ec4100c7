use std::time::Duration;

use reqwest::StatusCode;
use url::Url;

use crate::auth::BearerToken;
use crate::identity::{Identity, UserInfo};

/// Failure modes of one identity lookup.
///
/// Callers answer `Unauthorized` with a re-authentication challenge and
/// `Internal` with an opaque server error.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("bearer token was rejected by the account service")]
    Unauthorized,
    #[error("identity lookup failed: {0}")]
    Internal(String),
}

/// Exchanges bearer tokens for identities against the account service.
///
/// One outbound call per `resolve`; no retries, no caching. The inner
/// client is pooled and cheap to clone.
#[derive(Clone, Debug)]
pub struct CredentialResolver {
    http: reqwest::Client,
    userinfo_url: Url,
}

impl CredentialResolver {
    pub fn new(userinfo_url: &str, timeout: Duration) -> Result<Self, ResolveError> {
        let userinfo_url = Url::parse(userinfo_url)
            .map_err(|e| ResolveError::Internal(format!("invalid userinfo URL: {e}")))?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ResolveError::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http, userinfo_url })
    }

    pub async fn resolve(&self, token: &BearerToken) -> Result<Identity, ResolveError> {
        let response = self
            .http
            .get(self.userinfo_url.clone())
            .header(reqwest::header::AUTHORIZATION, token.header_value())
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(event = "identity_lookup_failed", error = %e, "identity lookup transport error");
                ResolveError::Internal(format!("transport error: {e}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status));
        }

        let info: UserInfo = response.json().await.map_err(|e| {
            tracing::warn!(event = "identity_lookup_failed", error = %e, "identity payload did not decode");
            ResolveError::Internal(format!("invalid userinfo payload: {e}"))
        })?;
        let identity = Identity::from(info);
        tracing::debug!(
            event = "identity_resolved",
            user_id = identity.user_id,
            installation_id = identity.installation_id,
            region = %identity.region,
        );
        Ok(identity)
    }
}

fn classify_status(status: StatusCode) -> ResolveError {
    if status.is_server_error() {
        tracing::warn!(event = "identity_lookup_failed", status = status.as_u16(), "account service error");
        ResolveError::Internal(format!("account service returned {status}"))
    } else {
        tracing::info!(event = "identity_rejected", status = status.as_u16());
        ResolveError::Unauthorized
    }
}

#[cfg(test)]
mod tests {
    use axum::Router;
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::IntoResponse;
    use axum::routing::get;

    use super::*;

    async fn userinfo(headers: HeaderMap) -> axum::response::Response {
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        match auth {
            "Bearer good" => (
                StatusCode::OK,
                axum::Json(serde_json::json!({
                    "user_id": 7,
                    "installation_id": 42,
                    "url": "https://acme.teamwork.com",
                    "region": "us-east-1",
                    "meta": { "scopes": ["projects"] }
                })),
            )
                .into_response(),
            "Bearer garbage" => (StatusCode::OK, "not json").into_response(),
            "Bearer explode" => StatusCode::BAD_GATEWAY.into_response(),
            "Bearer forbidden" => StatusCode::FORBIDDEN.into_response(),
            _ => StatusCode::UNAUTHORIZED.into_response(),
        }
    }

    async fn spawn_account_service() -> String {
        let app = Router::new().route("/launchpad/v1/userinfo.json", get(userinfo));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind stub listener");
        let addr = listener.local_addr().expect("stub addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{addr}/launchpad/v1/userinfo.json")
    }

    fn token(raw: &str) -> BearerToken {
        BearerToken::new(raw).expect("non-empty")
    }

    #[tokio::test]
    async fn accepted_token_yields_full_identity() {
        let resolver = CredentialResolver::new(&spawn_account_service().await, Duration::from_secs(5))
            .expect("resolver");
        let identity = resolver.resolve(&token("good")).await.expect("identity");
        assert_eq!(identity.user_id, 7);
        assert_eq!(identity.installation_id, 42);
        assert_eq!(identity.region, "us-east-1");
        assert!(identity.scopes.contains("projects"));
    }

    #[tokio::test]
    async fn client_errors_are_unauthorized() {
        let resolver = CredentialResolver::new(&spawn_account_service().await, Duration::from_secs(5))
            .expect("resolver");
        assert!(matches!(
            resolver.resolve(&token("nope")).await,
            Err(ResolveError::Unauthorized)
        ));
        assert!(matches!(
            resolver.resolve(&token("forbidden")).await,
            Err(ResolveError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn server_errors_and_bad_payloads_are_internal() {
        let resolver = CredentialResolver::new(&spawn_account_service().await, Duration::from_secs(5))
            .expect("resolver");
        assert!(matches!(
            resolver.resolve(&token("explode")).await,
            Err(ResolveError::Internal(_))
        ));
        assert!(matches!(
            resolver.resolve(&token("garbage")).await,
            Err(ResolveError::Internal(_))
        ));
    }

    #[tokio::test]
    async fn unreachable_service_is_internal() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);

        let resolver = CredentialResolver::new(
            &format!("http://{addr}/launchpad/v1/userinfo.json"),
            Duration::from_secs(2),
        )
        .expect("resolver");
        assert!(matches!(
            resolver.resolve(&token("good")).await,
            Err(ResolveError::Internal(_))
        ));
    }
}
