use std::time::Duration;

use url::Url;

const DEFAULT_SERVER_ADDRESS: &str = "localhost:8012";
const DEFAULT_SERVICE_NAME: &str = "mcp-server";
const DEFAULT_AUTH_TIMEOUT_SECS: u64 = 10;
const RESOURCE_DOCUMENTATION: &str = "https://apidocs.teamwork.com/guides/teamwork/app-login-flow";
const USERINFO_PATH: &str = "/launchpad/v1/userinfo.json";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid URL in {var}: {source}")]
    InvalidUrl {
        var: &'static str,
        #[source]
        source: url::ParseError,
    },
    #[error("invalid value for {var}: {value:?}")]
    InvalidValue { var: &'static str, value: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Environment {
    Dev,
    Staging,
    Production,
}

impl Environment {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "dev" | "development" => Self::Dev,
            "staging" => Self::Staging,
            _ => Self::Production,
        }
    }
}

/// Process-level settings, loaded once at startup.
#[derive(Clone, Debug)]
pub struct ServiceConfig {
    pub server_address: String,
    pub environment: Environment,
    pub service_name: String,
    /// Public URL of this MCP resource
    pub mcp_url: Url,
    /// Authorization server / account service
    pub api_url: Url,
    /// Region of the node serving traffic
    pub region: String,
    pub downstream_base_url: Option<Url>,
    pub internal_proxy_url: Option<Url>,
    pub allow_delete: bool,
    pub auth_timeout: Duration,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup (used by tests instead of the
    /// process environment).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let environment = Environment::parse(&get("ENV").unwrap_or_else(|| "dev".to_string()));
        let devenv = get("DEVENV_INSTALLATION");
        let (default_mcp, default_api) = default_addresses(environment, devenv.as_deref());

        let mcp_url = parse_url("MCP_URL", get("MCP_URL").unwrap_or(default_mcp))?;
        let api_url = parse_url("API_URL", get("API_URL").unwrap_or(default_api))?;
        let downstream_base_url = get("DOWNSTREAM_BASE_URL")
            .map(|raw| parse_url("DOWNSTREAM_BASE_URL", raw))
            .transpose()?;
        let internal_proxy_url = get("HAPROXY_URL")
            .map(|raw| parse_url("HAPROXY_URL", raw))
            .transpose()?;

        let allow_delete = match get("MCP_ALLOW_DELETE") {
            None => false,
            Some(raw) => parse_bool("MCP_ALLOW_DELETE", &raw)?,
        };
        let auth_timeout_secs = match get("AUTH_TIMEOUT_SECS") {
            None => DEFAULT_AUTH_TIMEOUT_SECS,
            Some(raw) => raw
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .ok_or(ConfigError::InvalidValue {
                    var: "AUTH_TIMEOUT_SECS",
                    value: raw,
                })?,
        };

        Ok(Self {
            server_address: get("SERVER_ADDRESS")
                .unwrap_or_else(|| DEFAULT_SERVER_ADDRESS.to_string()),
            environment,
            service_name: get("SERVICE_NAME").unwrap_or_else(|| DEFAULT_SERVICE_NAME.to_string()),
            mcp_url,
            api_url,
            region: get("AWS_REGION").unwrap_or_else(|| "unknown".to_string()),
            downstream_base_url,
            internal_proxy_url,
            allow_delete,
            auth_timeout: Duration::from_secs(auth_timeout_secs),
        })
    }

    /// URL of the discovery document advertised in bearer challenges.
    pub fn discovery_url(&self) -> String {
        format!(
            "{}/.well-known/oauth-protected-resource",
            self.mcp_url.as_str().trim_end_matches('/')
        )
    }

    pub fn userinfo_url(&self) -> String {
        format!("{}{USERINFO_PATH}", self.api_url.as_str().trim_end_matches('/'))
    }

    pub fn resource_documentation(&self) -> &'static str {
        RESOURCE_DOCUMENTATION
    }
}

fn default_addresses(environment: Environment, devenv: Option<&str>) -> (String, String) {
    match (environment, devenv) {
        (Environment::Staging, _) => (
            "https://mcp.eks.stg.teamworkops.com".to_string(),
            "https://www.staging.teamwork.com".to_string(),
        ),
        (Environment::Dev, Some(installation)) => (
            format!("https://mcp.{installation}"),
            format!("https://{installation}"),
        ),
        _ => (
            "https://mcp.teamwork.com".to_string(),
            "https://www.teamwork.com".to_string(),
        ),
    }
}

fn parse_url(var: &'static str, raw: String) -> Result<Url, ConfigError> {
    Url::parse(&raw).map_err(|source| ConfigError::InvalidUrl { var, source })
}

fn parse_bool(var: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            var,
            value: raw.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(pairs: &[(&str, &str)]) -> Result<ServiceConfig, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServiceConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_match_production_endpoints_outside_dev_installations() {
        let config = load(&[]).expect("defaults should load");
        assert_eq!(config.server_address, "localhost:8012");
        assert_eq!(config.environment, Environment::Dev);
        assert_eq!(config.mcp_url.as_str(), "https://mcp.teamwork.com/");
        assert_eq!(
            config.userinfo_url(),
            "https://www.teamwork.com/launchpad/v1/userinfo.json"
        );
        assert_eq!(
            config.discovery_url(),
            "https://mcp.teamwork.com/.well-known/oauth-protected-resource"
        );
        assert!(!config.allow_delete);
        assert_eq!(config.auth_timeout, Duration::from_secs(10));
    }

    #[test]
    fn dev_installation_drives_both_addresses() {
        let config = load(&[("ENV", "dev"), ("DEVENV_INSTALLATION", "sunbeam.teamwork.dev")])
            .expect("dev config should load");
        assert_eq!(config.mcp_url.as_str(), "https://mcp.sunbeam.teamwork.dev/");
        assert_eq!(config.api_url.as_str(), "https://sunbeam.teamwork.dev/");
    }

    #[test]
    fn staging_and_explicit_overrides() {
        let config = load(&[
            ("ENV", "Staging"),
            ("API_URL", "http://127.0.0.1:9000/"),
            ("MCP_ALLOW_DELETE", "true"),
            ("AWS_REGION", "eu-west-1"),
        ])
        .expect("staging config should load");
        assert_eq!(config.environment, Environment::Staging);
        assert_eq!(config.mcp_url.as_str(), "https://mcp.eks.stg.teamworkops.com/");
        assert_eq!(
            config.userinfo_url(),
            "http://127.0.0.1:9000/launchpad/v1/userinfo.json"
        );
        assert!(config.allow_delete);
        assert_eq!(config.region, "eu-west-1");
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            load(&[("MCP_URL", "not a url")]),
            Err(ConfigError::InvalidUrl { var: "MCP_URL", .. })
        ));
        assert!(matches!(
            load(&[("MCP_ALLOW_DELETE", "maybe")]),
            Err(ConfigError::InvalidValue { var: "MCP_ALLOW_DELETE", .. })
        ));
        assert!(matches!(
            load(&[("AUTH_TIMEOUT_SECS", "0")]),
            Err(ConfigError::InvalidValue { var: "AUTH_TIMEOUT_SECS", .. })
        ));
    }
}
