//! The `grok-proxy` binary: parses [`GrokProxyConfig`] from the environment,
//! builds the core service from `grok-service`, and serves it over HTTP
//! until asked to shut down.

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use eyre::Context;
use grok_service::ProxyServiceBuilder;
use grok_service::config::ProxyConfig;
use grok_service::services::persistence::postgres::PostgresGateway;
use tokio_util::sync::CancellationToken;

/// The configuration for the `grok-proxy` node: the AXUM bind address, the
/// shutdown grace period, and every knob [`ProxyConfig`] defines.
#[derive(Parser, Debug)]
struct GrokProxyConfig {
    /// The bind address of the AXUM server.
    #[clap(long, env = "GROK_PROXY_BIND_ADDR", default_value = "0.0.0.0:8080")]
    bind_addr: SocketAddr,

    /// Max wait time the service waits for the health loop during shutdown.
    #[clap(
        long,
        env = "GROK_PROXY_MAX_WAIT_TIME_SHUTDOWN",
        default_value = "10s",
        value_parser = humantime::parse_duration,
    )]
    max_wait_time_shutdown: Duration,

    /// The core service config.
    #[clap(flatten)]
    service_config: ProxyConfig,
}

#[tokio::main]
async fn main() -> eyre::Result<ExitCode> {
    rustls::crypto::aws_lc_rs::default_provider().install_default().expect("can install");
    install_tracing("grok_proxy=info,grok_service=info,tower_http=info");

    let config = GrokProxyConfig::parse();

    let persistence = Arc::new(
        PostgresGateway::init(
            &config.service_config.db_connection_string,
            config.service_config.persistence_min_connections,
            config.service_config.persistence_max_connections,
        )
        .await
        .context("while connecting to the persistence store")?,
    );

    let result = start_service(config, persistence, default_shutdown_signal()).await;
    match result {
        Ok(()) => {
            tracing::info!("shutdown complete");
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            tracing::error!("{err:?}");
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn start_service(
    config: GrokProxyConfig,
    persistence: Arc<PostgresGateway>,
    shutdown_signal: impl std::future::Future<Output = ()> + Send + 'static,
) -> eyre::Result<()> {
    tracing::info!(bind_addr = %config.bind_addr, "starting grok-proxy");

    let service = ProxyServiceBuilder::new(config.service_config).build(persistence).await?;

    let external_shutdown = CancellationToken::new();
    let watcher = external_shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal.await;
        watcher.cancel();
    });

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    let router_cancel = service.cancellation_token.clone();
    let axum_shutdown = external_shutdown.clone();
    let server = tokio::spawn(async move {
        tracing::info!(
            "listening on {}",
            listener.local_addr().map(|a| a.to_string()).unwrap_or_else(|_| "invalid addr".to_string())
        );
        let result = axum::serve(listener, service.router)
            .with_graceful_shutdown(async move { axum_shutdown.cancelled().await })
            .await;
        tracing::info!("axum server shut down");
        if let Err(err) = result {
            tracing::error!("axum server error: {err:?}");
        }
        router_cancel.cancel();
    });

    external_shutdown.cancelled().await;
    service.cancellation_token.cancel();

    tracing::info!("waiting for background tasks to finish (max wait {:?})", config.max_wait_time_shutdown);
    match tokio::time::timeout(config.max_wait_time_shutdown, async { tokio::join!(server, service.health_loop) }).await
    {
        Ok(_) => tracing::info!("clean shutdown within grace period"),
        Err(_) => tracing::warn!("background tasks did not finish within grace period"),
    }

    Ok(())
}

/// Resolves once either a Ctrl+C or a `SIGTERM` is received.
async fn default_shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received Ctrl+C"),
        () = terminate => tracing::info!("received SIGTERM"),
    }
}

/// Installs a `tracing_subscriber` that respects `RUST_LOG`, falling back to
/// `default_filter` when unset.
fn install_tracing(default_filter: &str) {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}
