//! padl-server - pattern launcher daemon
//!
//! Discovers pattern manifests, launches and supervises pattern processes
//! under isolation policies, and exposes the control API over HTTP.

use clap::Parser;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use padl_core::{Launcher, OsSupervisor, PatternRegistry};

mod config;
mod routes;
mod state;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("padl_server=info".parse()?))
        .init();

    info!("padl-server v{}", env!("CARGO_PKG_VERSION"));

    let args = config::Args::parse();
    let launcher_config = args.launcher_config()?;
    launcher_config.validate()?;
    info!(patterns_dir = %launcher_config.patterns_dir.display(), "config loaded");

    let registry = Arc::new(PatternRegistry::new(&launcher_config.patterns_dir));
    let discovered = registry.discover()?;
    info!(patterns = discovered, "pattern discovery complete");

    let launcher = Launcher::new(launcher_config, registry, Arc::new(OsSupervisor::new()));
    launcher.start_background();

    let state = state::AppState::new(launcher.clone());
    let app = routes::create_router(state);

    let listener = tokio::net::TcpListener::bind(args.listen).await?;
    info!(addr = %listener.local_addr()?, "control API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutting down, stopping pattern processes");
    launcher.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");
    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM"),
        _ = tokio::signal::ctrl_c() => info!("received Ctrl-C"),
    }
}
