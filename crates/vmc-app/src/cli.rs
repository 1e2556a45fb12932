//! CLI argument definitions for the `vmc` binary.
//!
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::Parser;
use std::path::PathBuf;

/// vmc - vending machine controller action engine console.
#[derive(Parser, Debug)]
#[command(name = "vmc", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level")]
    pub log_level: Option<String>,

    /// Execute a line and exit instead of reading stdin. Repeatable.
    #[arg(short = 'e', long = "exec")]
    pub exec: Vec<String>,

    /// Skip the `on_boot` hook.
    #[arg(long = "no-boot")]
    pub no_boot: bool,
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > VMC_CONFIG env var > ~/.vmc/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("VMC_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Resolve the log level.
    ///
    /// Priority: --log-level flag > config file value.
    pub fn resolve_log_level(&self, config_level: &str) -> String {
        self.log_level
            .clone()
            .unwrap_or_else(|| config_level.to_string())
    }
}

fn default_config_path() -> PathBuf {
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".vmc").join("config.toml");
    }
    PathBuf::from("config.toml")
}

/// Expand a leading `~/` to the home directory.
pub fn resolve_data_dir(data_dir: &str) -> PathBuf {
    match data_dir.strip_prefix("~/") {
        Some(rest) => {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(rest)
        }
        None => PathBuf::from(data_dir),
    }
}
