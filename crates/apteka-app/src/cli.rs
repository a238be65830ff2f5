//! CLI argument definitions for the Apteka application.
//!
//! Uses `clap` with derive macros for ergonomic argument parsing.
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Apteka - a voice assistant that finds pharmacies.
#[derive(Parser, Debug)]
#[command(name = "apteka", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// API server port.
    #[arg(short = 'p', long = "port", global = true)]
    pub port: Option<u16>,

    /// Data directory for the locations database.
    #[arg(short = 'd', long = "data-dir", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Log level or filter directive (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the HTTP API (default).
    Serve,
    /// Upload a JSON-lines file of `{text, metadata}` records to the semantic index.
    Ingest {
        /// Input file.
        file: PathBuf,
    },
    /// Load a JSON-lines file of geocoded records into the locations table.
    LoadLocations {
        /// Input file.
        file: PathBuf,
    },
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > APTEKA_CONFIG env var > ~/.apteka/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        self.resolve_config_path_with(std::env::var("APTEKA_CONFIG").ok())
    }

    fn resolve_config_path_with(&self, env: Option<String>) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Some(p) = env.filter(|p| !p.trim().is_empty()) {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Resolve the API server port.
    ///
    /// Priority: --port flag > APTEKA_PORT env var > config file value > 8080.
    pub fn resolve_port(&self, config_port: u16) -> u16 {
        self.resolve_port_with(std::env::var("APTEKA_PORT").ok(), config_port)
    }

    fn resolve_port_with(&self, env: Option<String>, config_port: u16) -> u16 {
        if let Some(p) = self.port {
            return p;
        }
        if let Some(p) = env.and_then(|v| v.trim().parse::<u16>().ok()) {
            return p;
        }
        if config_port != 0 {
            return config_port;
        }
        8080
    }

    /// Resolve the data directory path.
    ///
    /// Priority: --data-dir flag > APTEKA_DATA_DIR env var > config file value.
    /// Returns `None` if neither is overridden.
    pub fn resolve_data_dir(&self) -> Option<String> {
        self.data_dir
            .as_ref()
            .map(|p| p.to_string_lossy().to_string())
            .or_else(|| std::env::var("APTEKA_DATA_DIR").ok().filter(|d| !d.trim().is_empty()))
    }

    /// Tracing filter directive.
    ///
    /// Priority: --log-level flag > RUST_LOG > config file value > "info".
    pub fn log_filter(&self, config_level: &str) -> String {
        self.log_filter_with(std::env::var("RUST_LOG").ok(), config_level)
    }

    fn log_filter_with(&self, rust_log: Option<String>, config_level: &str) -> String {
        [self.log_level.clone(), rust_log, Some(config_level.to_string())]
            .into_iter()
            .flatten()
            .map(|l| l.trim().to_string())
            .find(|l| !l.is_empty())
            .unwrap_or_else(|| "info".to_string())
    }
}

/// Default config file path for the current platform.
fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    if let Ok(home) = std::env::var("USERPROFILE") {
        return PathBuf::from(home).join(".apteka").join("config.toml");
    }
    #[cfg(not(target_os = "windows"))]
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".apteka").join("config.toml");
    }
    PathBuf::from("config.toml")
}

/// Expand a leading `~` to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/").or_else(|| path.strip_prefix("~\\")) {
        #[cfg(target_os = "windows")]
        let home = std::env::var("USERPROFILE").unwrap_or_else(|_| ".".to_string());
        #[cfg(not(target_os = "windows"))]
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(rest)
    } else {
        PathBuf::from(path)
    }
}
