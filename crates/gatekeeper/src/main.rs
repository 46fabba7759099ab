//! Gatekeeper - policy-driven proxy in front of private and public
//! package registries

use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;

use config::{Config, ProxyMode};
use gatekeeper_api::{AppState, PassthroughCredentials};
use gatekeeper_core::{spawn_rotation_task, EventBus, PolicyStore, Rotator, RoutingEngine};
use gatekeeper_proxy::{ClientOptions, Merger, RegistryClient};

/// Gatekeeper - registry routing proxy
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/default.toml")]
    config: String,

    /// Bind address
    #[arg(long, env = "GATEKEEPER_BIND")]
    bind: Option<String>,

    /// Port
    #[arg(short, long, env = "GATEKEEPER_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load(&args.config)?;

    init_logging(&config.logging.level);

    info!("Starting Gatekeeper v{}", env!("CARGO_PKG_VERSION"));

    let events = EventBus::new();

    // Upstream targets
    let private_target = config.registry.private.to_target()?;
    let public_targets = config
        .registry
        .public
        .clone()
        .into_vec()
        .iter()
        .map(|t| t.to_target())
        .collect::<Result<Vec<_>>>()?;

    info!("Private registry: {}", private_target);
    for target in &public_targets {
        info!("Public mirror: {}", target);
    }

    let rotator = Arc::new(
        Rotator::new(public_targets, events.clone())
            .ok_or_else(|| anyhow::anyhow!("at least one public registry target is required"))?,
    );
    let rotation_task = spawn_rotation_task(rotator.clone(), config.proxy.rotation_interval());

    // Shared upstream client
    let client = Arc::new(RegistryClient::new(ClientOptions {
        skip_tls_verify: config.proxy.skip_tls_verify,
        probe_timeout: config.proxy.probe_timeout(),
    })?);

    // Policy and decision engine
    let policy = Arc::new(PolicyStore::new(config.policy.clone()));
    let mut engine = RoutingEngine::new(
        policy,
        private_target.clone(),
        rotator,
        client.clone(),
    );

    if let Some(read) = &config.registry.read {
        engine = engine.with_read_target(read.to_target()?);
    }
    if let Some(write) = &config.registry.write {
        engine = engine.with_write_target(write.to_target()?);
    }

    let merger = Arc::new(Merger::new(client.clone()));
    let credentials = Arc::new(PassthroughCredentials::new(client.clone()));

    let state = AppState::new(
        Arc::new(engine),
        merger,
        private_target,
        client,
        credentials,
        events,
    );

    let app = match config.proxy.mode {
        ProxyMode::Route => gatekeeper_api::create_router(state),
        ProxyMode::Merge => gatekeeper_api::create_merge_router(state),
    }
    .layer(TraceLayer::new_for_http());

    // Determine bind address
    let bind_addr = args.bind.unwrap_or(config.server.bind_address);
    let port = args.port.unwrap_or(config.server.port);
    let addr: SocketAddr = format!("{}:{}", bind_addr, port).parse()?;

    info!("Listening on {} ({:?} mode)", addr, config.proxy.mode);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(task) = rotation_task {
        task.abort();
    }

    info!("Server stopped");
    Ok(())
}

/// Initialize logging
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C handler");
    info!("Shutdown signal received");
}
