//! Command-line interface and configuration loading.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

use dm_domain::config::Config;

#[derive(Debug, Parser)]
#[command(name = "deskmated", about = "DeskMate companion gateway", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the gateway server (default).
    Serve,
    /// Configuration helpers.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print the version.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Validate the config file and report issues.
    Validate,
    /// Print the effective configuration as YAML.
    Show,
}

/// Load the YAML config.
///
/// Path resolution: `DM_CONFIG` env var, else `./config.yaml`. A missing
/// file falls back to built-in defaults (every field is defaulted) with a
/// warning, so a bare binary still starts in dev mode.
pub fn load_config() -> anyhow::Result<(Config, PathBuf)> {
    let path = PathBuf::from(
        std::env::var("DM_CONFIG").unwrap_or_else(|_| "config.yaml".to_owned()),
    );

    if !path.exists() {
        tracing::warn!(path = %path.display(), "config file not found; using defaults");
        return Ok((Config::default(), path));
    }

    let config = Config::load(&path)
        .with_context(|| format!("loading config from {}", path.display()))?;
    Ok((config, path))
}
