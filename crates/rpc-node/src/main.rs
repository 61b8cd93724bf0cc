//! # RPC Node
//!
//! Runs an RPC server with the demo services.
//!
//! ## Startup Sequence
//!
//! 1. Install logging (`RUST_LOG`, default `info`)
//! 2. Load configuration from the path argument or `RPC_CONFIG`, then apply
//!    `RPC_*` environment overrides
//! 3. Build the I/O runtime sized by `server.io_threads`
//! 4. Bind the server and publish every service
//! 5. Serve the admin surface if enabled
//! 6. Wait for Ctrl+C, then drain and unregister

mod services;

use std::sync::Arc;

use anyhow::{Context, Result};
use rpc_runtime::{io_runtime, serve_admin, RpcConfig, RpcServer, RuntimeMetrics, TimingInterceptor};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .with_thread_ids(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to install tracing subscriber")?;

    let config = load_config()?;
    let runtime = io_runtime(&config.server).context("failed to build I/O runtime")?;
    runtime.block_on(run(config))
}

fn load_config() -> Result<RpcConfig> {
    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("RPC_CONFIG").ok());

    let mut config = match path {
        Some(path) => {
            info!(path = %path, "Loading configuration");
            RpcConfig::load(&path).with_context(|| format!("failed to load config from {path}"))?
        }
        None => RpcConfig::default(),
    };
    config
        .apply_env_overrides(|key| std::env::var(key).ok())
        .context("invalid RPC_* environment override")?;
    Ok(config)
}

async fn run(config: RpcConfig) -> Result<()> {
    info!("===========================================");
    info!("  RPC Node v{}", rpc_runtime::VERSION);
    info!("  Transport: {} / {}", config.transport.kind, config.transport.serializer);
    info!("===========================================");

    let metrics = Arc::new(RuntimeMetrics::new());
    let server = RpcServer::builder()
        .config(config.clone())
        .metrics(Arc::clone(&metrics))
        .interceptor(Arc::new(TimingInterceptor::new(Arc::clone(&metrics))))
        .service(services::user_service())
        .service(services::echo_service())
        .bind()
        .await
        .context("failed to bind RPC server")?;

    let shutdown = CancellationToken::new();
    let admin = config.admin.enabled.then(|| {
        tokio::spawn(serve_admin(
            config.admin_addr(),
            server.admin_state(),
            shutdown.child_token(),
        ))
    });
    let rpc = tokio::spawn(server.run(shutdown.clone()));

    info!("Node is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;

    info!("Shutdown signal received");
    shutdown.cancel();
    rpc.await.context("RPC server task panicked")??;
    if let Some(admin) = admin {
        admin.await.context("admin server task panicked")??;
    }

    let stats = metrics.snapshot();
    info!(
        requests = stats.requests_total,
        failed = stats.requests_failed,
        "Node stopped"
    );
    Ok(())
}
