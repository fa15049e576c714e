//! Command handlers.

pub mod auth;
pub mod config_cmd;
pub mod launch;
pub mod regions;

use std::path::PathBuf;

use mandelbox_config::{self as config, Config};

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// The config file this invocation reads and writes.
pub fn config_file(global: &GlobalOpts) -> PathBuf {
    global.config.clone().unwrap_or_else(config::config_path)
}

/// Load the config from `--config` or the platform default location.
pub fn load(global: &GlobalOpts) -> Result<(Config, PathBuf), CliError> {
    let path = config_file(global);
    let cfg = config::load_config_from(&path)?;
    tracing::debug!(path = %path.display(), "loaded config");
    Ok((cfg, path))
}
