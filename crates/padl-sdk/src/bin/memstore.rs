//! padl-memstore - in-memory key-value pattern process
//!
//! Launched by the padl launcher, which passes the control port through the
//! environment. Initializes and starts itself on boot so the launcher's
//! first health probe succeeds as soon as the store is ready.

use clap::Parser;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use padl_core::wire;
use padl_sdk::{server, LifecycleHost, MemStore};

#[derive(Parser)]
#[command(name = "padl-memstore", version, about = "In-memory key-value pattern")]
struct Args {
    /// Control-plane port; 0 binds an OS-assigned port.
    #[arg(long, env = wire::ENV_CONTROL_PORT, default_value_t = 0)]
    control_port: u16,

    /// Drain window when stopping on a signal, in seconds.
    #[arg(long, default_value_t = 10)]
    stop_timeout_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("padl_memstore=info".parse()?))
        .init();

    let args = Args::parse();
    info!("padl-memstore v{}", env!("CARGO_PKG_VERSION"));

    if let Ok(scope) = std::env::var(wire::ENV_SCOPE) {
        info!(scope = %scope, "running scoped");
    }

    let host = LifecycleHost::new(Arc::new(MemStore::new()));
    host.initialize(HashMap::new()).await?;
    host.start().await?;

    let server = server::serve(host.clone(), args.control_port).await?;
    info!(addr = %server.addr, "memstore ready");

    // Run until SIGTERM (launcher-driven stop) or Ctrl-C.
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM"),
        _ = tokio::signal::ctrl_c() => info!("received Ctrl-C"),
    }

    host.stop(Duration::from_secs(args.stop_timeout_secs)).await?;
    server.shutdown();
    info!("memstore stopped");
    Ok(())
}
