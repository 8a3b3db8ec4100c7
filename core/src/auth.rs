use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

/// Marker written in place of a credential whenever a header is logged.
pub const REDACTED: &str = "REDACTED";

static BEARER_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Bearer (.+)$").unwrap_or_else(|_| unreachable!("static pattern"))
});

/// Opaque bearer credential.
///
/// Only lives inside a request-scoped [`crate::identity::RequestContext`];
/// `Debug` and `Display` never print the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken(String);

impl BearerToken {
    pub fn new(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        if raw.is_empty() { None } else { Some(Self(raw)) }
    }

    /// The raw secret, for use as an outbound credential only.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// `Authorization` header value carrying this token.
    pub fn header_value(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BearerToken({REDACTED})")
    }
}

impl fmt::Display for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bearer {REDACTED}")
    }
}

/// Strict `Authorization: Bearer <token>` grammar.
///
/// The scheme is case-sensitive and separated by exactly one space; anything
/// else is rejected before any lookup is attempted.
pub fn parse_bearer_header(raw: &str) -> Option<BearerToken> {
    let captures = BEARER_HEADER.captures(raw)?;
    BearerToken::new(captures.get(1)?.as_str())
}

/// Redact an `Authorization` header value for logging.
///
/// Keeps the scheme token (`Bearer REDACTED`); values without a scheme
/// separator collapse to `REDACTED`.
pub fn redact_authorization(raw: &str) -> String {
    match raw.split_once(' ') {
        Some((scheme, _)) => format!("{scheme} {REDACTED}"),
        None => REDACTED.to_string(),
    }
}

/// True when `granted` covers `required`.
///
/// Identities resolved without any scope metadata are treated as
/// unrestricted; scope lists only narrow access when present.
pub fn scope_allows<'a>(
    granted: impl IntoIterator<Item = &'a String>,
    required: Option<&str>,
) -> bool {
    let Some(required) = required else {
        return true;
    };
    let mut granted = granted.into_iter().peekable();
    if granted.peek().is_none() {
        return true;
    }
    granted.any(|scope| scope.trim().eq_ignore_ascii_case(required))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_bearer_header() {
        let token = parse_bearer_header("Bearer abc.def").expect("token should parse");
        assert_eq!(token.expose(), "abc.def");
    }

    #[test]
    fn rejects_malformed_bearer_headers() {
        assert!(parse_bearer_header("").is_none());
        assert!(parse_bearer_header("Bearer").is_none());
        assert!(parse_bearer_header("Bearer ").is_none());
        assert!(parse_bearer_header("bearer abc").is_none());
        assert!(parse_bearer_header("Basic dXNlcjpwYXNz").is_none());
        assert!(parse_bearer_header("Token abc").is_none());
    }

    #[test]
    fn redaction_keeps_scheme_only() {
        assert_eq!(redact_authorization("Bearer s3cr3t"), "Bearer REDACTED");
        assert_eq!(redact_authorization("Basic a b c"), "Basic REDACTED");
        assert_eq!(redact_authorization("s3cr3t"), "REDACTED");
    }

    #[test]
    fn token_formatting_never_leaks_secret() {
        let token = BearerToken::new("s3cr3t").expect("non-empty");
        assert!(!format!("{token:?}").contains("s3cr3t"));
        assert!(!format!("{token}").contains("s3cr3t"));
        assert_eq!(token.header_value(), "Bearer s3cr3t");
    }

    #[test]
    fn scope_check_is_open_for_legacy_identities() {
        let none: Vec<String> = Vec::new();
        assert!(scope_allows(&none, Some("projects")));

        let desk_only = vec!["desk".to_string()];
        assert!(!scope_allows(&desk_only, Some("projects")));
        assert!(scope_allows(&desk_only, Some("DESK")));
        assert!(scope_allows(&desk_only, None));
    }
}
