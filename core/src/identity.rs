use std::collections::BTreeSet;

use serde::Deserialize;

use crate::auth::BearerToken;

/// Installation and user resolved from a bearer token.
///
/// Resolved once per request and never cached across requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: i64,
    pub installation_id: i64,
    /// Installation base URL, e.g. `https://acme.teamwork.com`
    pub url: String,
    /// Home region of the installation
    pub region: String,
    pub scopes: BTreeSet<String>,
}

/// Wire shape of the account service's userinfo document.
#[derive(Debug, Deserialize)]
pub(crate) struct UserInfo {
    pub user_id: i64,
    pub installation_id: i64,
    pub url: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub meta: UserInfoMeta,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct UserInfoMeta {
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl From<UserInfo> for Identity {
    fn from(info: UserInfo) -> Self {
        Self {
            user_id: info.user_id,
            installation_id: info.installation_id,
            url: info.url,
            region: info.region,
            scopes: info.meta.scopes.into_iter().collect(),
        }
    }
}

/// Everything a handler may know about the caller of one request.
///
/// Built by the authentication stage and passed by reference down to the
/// downstream client. Never stored anywhere that outlives the request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    token: BearerToken,
    identity: Identity,
    cross_region: bool,
    trace_id: Option<String>,
}

impl RequestContext {
    /// `serving_region` is the region of this node; the cross-region flag is
    /// always derived from it and the identity's home region.
    pub fn new(token: BearerToken, identity: Identity, serving_region: &str) -> Self {
        let cross_region = !serving_region.eq_ignore_ascii_case(&identity.region);
        Self {
            token,
            identity,
            cross_region,
            trace_id: None,
        }
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    pub fn token(&self) -> &BearerToken {
        &self.token
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn cross_region(&self) -> bool {
        self.cross_region
    }

    pub fn trace_id(&self) -> Option<&str> {
        self.trace_id.as_deref()
    }

    /// Installation URL without a trailing slash.
    pub fn installation_url(&self) -> &str {
        self.identity.url.trim_end_matches('/')
    }
}

#[cfg(test)]
pub(crate) fn sample_identity(region: &str) -> Identity {
    Identity {
        user_id: 7,
        installation_id: 42,
        url: "https://acme.teamwork.com/".to_string(),
        region: region.to_string(),
        scopes: BTreeSet::from(["projects".to_string()]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token() -> BearerToken {
        BearerToken::new("tkn").expect("non-empty")
    }

    #[test]
    fn cross_region_is_derived_case_insensitively() {
        let same = RequestContext::new(token(), sample_identity("us-east-1"), "US-EAST-1");
        assert!(!same.cross_region());

        let other = RequestContext::new(token(), sample_identity("eu-west-1"), "us-east-1");
        assert!(other.cross_region());
    }

    #[test]
    fn missing_home_region_counts_as_cross_region() {
        let ctx = RequestContext::new(token(), sample_identity(""), "us-east-1");
        assert!(ctx.cross_region());
    }

    #[test]
    fn installation_url_drops_trailing_slash() {
        let ctx = RequestContext::new(token(), sample_identity("us-east-1"), "us-east-1")
            .with_trace_id("trace-1");
        assert_eq!(ctx.installation_url(), "https://acme.teamwork.com");
        assert_eq!(ctx.trace_id(), Some("trace-1"));
    }

    #[test]
    fn userinfo_defaults_region_and_scopes() {
        let info: UserInfo = serde_json::from_str(
            r#"{"user_id":1,"installation_id":2,"url":"https://x.teamwork.com"}"#,
        )
        .expect("userinfo should decode");
        let identity = Identity::from(info);
        assert_eq!(identity.region, "");
        assert!(identity.scopes.is_empty());
    }
}
