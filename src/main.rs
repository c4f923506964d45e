//! Channel-state server.
//!
//! Serves wireless channel state (delay, wideband loss, per-subcarrier CSI)
//! for mobile nodes to a discrete-event network simulator. The optional first
//! argument is the path of a TOML configuration file.

use anyhow::Context;
use env_logger::Builder;
use log::{LevelFilter, error, info};
use std::path::Path;

mod common;
mod control;
mod simulation;

use crate::control::ServerConfig;
use crate::simulation::SceneDirectoryProvider;

fn main() {
    let config = load_config();

    // Logging setup
    let verbose = config.as_ref().map(|c| c.verbose).unwrap_or(false);
    Builder::new()
        .filter_level(LevelFilter::Info)
        .filter(Some("channel_state_server"), if verbose { LevelFilter::Debug } else { LevelFilter::Info })
        .parse_default_env()
        .init();

    info!("Starting up");

    if let Err(e) = config.and_then(|config| run(&config)) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn load_config() -> anyhow::Result<ServerConfig> {
    match std::env::args().nth(1) {
        Some(path) => ServerConfig::load(Path::new(&path))
            .map_err(anyhow::Error::msg)
            .with_context(|| format!("Invalid configuration {}", path)),
        None => Ok(ServerConfig::default()),
    }
}

fn run(config: &ServerConfig) -> anyhow::Result<()> {
    info!(
        "Scene directory {}, max depth {}, default sub_mode {}, CSI {}",
        config.scene_dir.display(),
        config.rt_max_depth,
        config.rt_max_parallel_links,
        if config.est_csi { "on" } else { "off" }
    );
    let provider = SceneDirectoryProvider::new(config.scene_dir.clone());
    control::server::run(config, &provider)
}
