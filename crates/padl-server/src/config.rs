//! Daemon configuration: CLI arguments layered over the launcher config
//! file.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

use padl_core::LauncherConfig;

#[derive(Parser)]
#[command(name = "padl-server", version, about = "Pattern launcher daemon")]
pub struct Args {
    /// Address the control API listens on.
    #[arg(long, env = "PADL_LISTEN", default_value = "127.0.0.1:8090")]
    pub listen: SocketAddr,

    /// Launcher configuration file (TOML). Unset fields use defaults.
    #[arg(long, env = "PADL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Overrides the patterns directory from the config file.
    #[arg(long, env = "PADL_PATTERNS_DIR")]
    pub patterns_dir: Option<PathBuf>,
}

impl Args {
    /// Resolve the launcher configuration: file, then CLI overrides.
    pub fn launcher_config(&self) -> anyhow::Result<LauncherConfig> {
        let mut config = match &self.config {
            Some(path) => LauncherConfig::load(path)?,
            None => LauncherConfig::default(),
        };
        if let Some(dir) = &self.patterns_dir {
            config.patterns_dir = dir.clone();
        }
        Ok(config)
    }
}
