use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use twmcp_core::CredentialResolver;
use twmcp_core::config::ServiceConfig;
use twmcp_runtime::{McpServer, MethodRegistry, ProjectsClient, twprojects};

mod auth;
mod error;
mod middleware;
mod routes;
mod state;

const DOWNSTREAM_TIMEOUT: Duration = Duration::from_secs(30);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    // Load .env if present (dev only)
    let _ = dotenvy::dotenv();

    // Structured JSON logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "twmcp_api=debug,twmcp_runtime=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let config = ServiceConfig::from_env().expect("invalid configuration");
    let resolver = CredentialResolver::new(&config.userinfo_url(), config.auth_timeout)
        .expect("failed to build credential resolver");

    let mut registry = MethodRegistry::new();
    twprojects::register_methods(&mut registry).expect("duplicate method registration");
    tracing::info!(event = "methods_registered", count = registry.methods().len());

    let client = ProjectsClient::new(
        config.downstream_base_url.clone(),
        config.internal_proxy_url.clone(),
        DOWNSTREAM_TIMEOUT,
    )
    .expect("failed to build Projects client");
    let mut group = twprojects::default_toolset_group(false, config.allow_delete, Arc::new(client));
    group
        .enable_toolsets(&registry, &["all"])
        .expect("failed to enable toolsets");

    let app_state = state::AppState {
        config: Arc::new(config.clone()),
        resolver,
        server: McpServer::new(Arc::new(group)),
    };
    let app = routes::app(app_state);

    let listener = tokio::net::TcpListener::bind(&config.server_address)
        .await
        .expect("failed to bind server address");
    tracing::info!(
        event = "server_started",
        address = %config.server_address,
        environment = ?config.environment,
        region = %config.region,
        allow_delete = config.allow_delete,
    );

    let stop = Arc::new(Notify::new());
    let server = axum::serve(listener, app)
        .with_graceful_shutdown({
            let stop = Arc::clone(&stop);
            async move { stop.notified().await }
        })
        .into_future();
    tokio::pin!(server);
    tokio::select! {
        result = &mut server => {
            if let Err(e) = result {
                tracing::error!(event = "server_failed", error = %e);
            }
            return;
        }
        () = shutdown_signal() => stop.notify_one(),
    }

    tracing::info!(event = "shutdown_started", grace_secs = SHUTDOWN_GRACE.as_secs());
    match tokio::time::timeout(SHUTDOWN_GRACE, server).await {
        Ok(Ok(())) => tracing::info!(event = "shutdown_complete"),
        Ok(Err(e)) => tracing::error!(event = "server_failed", error = %e),
        Err(_) => tracing::warn!(event = "shutdown_forced", "in-flight requests did not drain"),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(event = "signal_handler_failed", error = %e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(event = "signal_handler_failed", error = %e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
