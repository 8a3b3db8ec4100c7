use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::io::BufReader;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use twmcp_core::CredentialResolver;
use twmcp_core::config::ServiceConfig;
use twmcp_runtime::{McpServer, MethodRegistry, ProjectsClient, stdio, twprojects};

const DOWNSTREAM_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(
    name = "twmcp-stdio",
    version,
    about = "Teamwork.com MCP server speaking newline-delimited JSON-RPC over stdio"
)]
struct Cli {
    /// Methods to enable, comma separated ("all" enables every registered method)
    #[arg(long, value_delimiter = ',', default_value = "all")]
    toolsets: Vec<String>,

    /// Drop every write tool, even ones named in --toolsets
    #[arg(long)]
    read_only: bool,

    /// Expose destructive tools such as deletes
    #[arg(long)]
    allow_delete: bool,

    /// Bearer token resolved once at startup
    #[arg(long, env = "TW_MCP_BEARER_TOKEN", hide_env_values = true)]
    bearer_token: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    // stdout carries protocol frames, so logs go to stderr
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "twmcp_stdio=info,twmcp_runtime=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr),
        )
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            tracing::error!(event = "startup_failed", error = %message);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), String> {
    let config = ServiceConfig::from_env().map_err(|e| e.to_string())?;
    let resolver = CredentialResolver::new(&config.userinfo_url(), config.auth_timeout)
        .map_err(|e| e.to_string())?;

    let mut registry = MethodRegistry::new();
    twprojects::register_methods(&mut registry).map_err(|e| e.to_string())?;
    tracing::info!(event = "methods_registered", count = registry.methods().len());

    let client = ProjectsClient::new(
        config.downstream_base_url.clone(),
        config.internal_proxy_url.clone(),
        DOWNSTREAM_TIMEOUT,
    )
    .map_err(|e| e.to_string())?;
    let mut group =
        twprojects::default_toolset_group(cli.read_only, cli.allow_delete, Arc::new(client));
    group
        .enable_toolsets(&registry, &cli.toolsets)
        .map_err(|e| e.to_string())?;

    let ctx = stdio::authenticate(&resolver, cli.bearer_token.as_deref(), &config.region).await;
    let server = McpServer::new(Arc::new(group));

    tracing::info!(
        event = "stdio_started",
        authenticated = ctx.is_some(),
        read_only = cli.read_only,
        allow_delete = cli.allow_delete,
    );
    stdio::serve(
        &server,
        ctx.as_ref(),
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
    )
    .await
    .map_err(|e| format!("stdio transport failed: {e}"))?;

    tracing::info!(event = "stdio_closed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn toolsets_split_on_commas_and_default_to_all() {
        let cli = Cli::parse_from(["twmcp-stdio"]);
        assert_eq!(cli.toolsets, vec!["all"]);
        assert!(!cli.read_only);

        let cli = Cli::parse_from([
            "twmcp-stdio",
            "--toolsets",
            "twprojects-get_task,twprojects-list_tasks",
            "--read-only",
            "--allow-delete",
        ]);
        assert_eq!(cli.toolsets, vec!["twprojects-get_task", "twprojects-list_tasks"]);
        assert!(cli.read_only);
        assert!(cli.allow_delete);
    }
}
