//! s3proxy - S3 bucket gateway
//!
//! Serves the configured targets on the business port and health/metrics on
//! the internal port. SIGHUP reloads the configuration.

use anyhow::{Context, Result};
use clap::Parser;
use s3proxy::internal_server;
use s3proxy::server::{RouterHandle, build_router};
use s3proxy::state::AppState;
use s3proxy_common::{Config, ConfigManager, LogFormat};
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "s3proxy")]
#[command(about = "HTTP gateway exposing S3 buckets behind access rules")]
#[command(version)]
struct Args {
    /// Configuration file or directory
    #[arg(short, long, env = "S3PROXY_CONFIG", default_value = "conf/config.yaml")]
    config: String,

    /// Log level, overrides the configured one
    #[arg(long)]
    log_level: Option<String>,
}

fn init_logging(config: &Config, level_override: Option<&str>) {
    let level = level_override.unwrap_or(&config.log.level).to_string();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| level.into());

    match config.log.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
    }
}

fn listen_addr(host: &str, port: u16) -> Result<SocketAddr> {
    let host = if host.is_empty() { "0.0.0.0" } else { host };
    format!("{host}:{port}")
        .parse()
        .with_context(|| format!("invalid listen address {host}:{port}"))
}

/// Resolves on Ctrl-C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("Shutting down...");
}

/// Rebuild the router from a freshly loaded configuration
async fn reload(manager: &ConfigManager, handle: &RouterHandle) -> Result<()> {
    let config = manager.reload()?;
    let state = Arc::new(AppState::from_config(config).await?);
    handle.swap(build_router(&state)?);
    Ok(())
}

#[cfg(unix)]
async fn watch_reloads(manager: Arc<ConfigManager>, handle: Arc<RouterHandle>) {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(signal) => signal,
        Err(e) => {
            error!("Cannot listen for SIGHUP, reload disabled: {}", e);
            return;
        }
    };

    while hangup.recv().await.is_some() {
        info!("SIGHUP received, reloading configuration");
        match reload(&manager, &handle).await {
            Ok(()) => info!("Router rebuilt from reloaded configuration"),
            Err(e) => error!("Reload failed, keeping current router: {:#}", e),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let manager = Arc::new(
        ConfigManager::load(&args.config).with_context(|| format!("loading configuration {}", args.config))?,
    );
    let config = manager.snapshot();

    init_logging(&config, args.log_level.as_deref());
    info!("Starting s3proxy with configuration {}", args.config);
    info!("{} target(s) configured", config.targets.len());

    let prometheus = internal_server::install_recorder()?;

    let state = Arc::new(AppState::from_config(config.clone()).await?);
    let handle = RouterHandle::new(build_router(&state)?);

    #[cfg(unix)]
    tokio::spawn(watch_reloads(manager.clone(), handle.clone()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown_tx.send(true).ok();
    });
    let wait_shutdown = |mut rx: watch::Receiver<bool>| async move {
        rx.wait_for(|stop| *stop).await.ok();
    };

    let internal_addr = listen_addr(&config.internal_server.listen_addr, config.internal_server.port)?;
    let internal_listener = TcpListener::bind(internal_addr).await?;
    info!("Starting internal server on {}", internal_addr);
    let internal = tokio::spawn(
        axum::serve(internal_listener, internal_server::router(prometheus).into_make_service())
            .with_graceful_shutdown(wait_shutdown(shutdown_rx.clone()))
            .into_future(),
    );

    let addr = listen_addr(&config.server.listen_addr, config.server.port)?;
    let listener = TcpListener::bind(addr).await?;
    info!("Starting server on {}", addr);

    axum::serve(
        listener,
        handle.service().into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(wait_shutdown(shutdown_rx))
    .await?;

    internal.await??;
    info!("s3proxy shut down gracefully");

    Ok(())
}
