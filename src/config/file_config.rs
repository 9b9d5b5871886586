//! Configuration file discovery and generation.
//!
//! Lookup order when no path is given:
//!
//! 1. `./mcp-search-hub.toml`
//! 2. `<config dir>/mcp-search-hub/config.toml`
//!
//! # Configuration File Format
//!
//! ```toml
//! cache_ttl_seconds = 3600
//!
//! [search]
//! max_results = 100
//! timeout_ms = 30000
//! retry_count = 3
//! retry_delay_ms = 1000
//!
//! [reconnect]
//! max_attempts = 3
//! delay_ms = 5000
//!
//! [providers.github]
//! transport = { type = "stdio", command = "npx", args = ["-y", "@modelcontextprotocol/server-github"] }
//! credentials = { GITHUB_PERSONAL_ACCESS_TOKEN = "ghp_..." }
//! limits = { max_results = 50, requests_per_second = 5 }
//!
//! [providers.firecrawl]
//! transport = { type = "http", url = "http://localhost:3001/mcp" }
//! credentials = { bearer_token = "fc-..." }
//!
//! [logging]
//! level = "info"
//! format = "json"
//! ```

use super::Config;
use std::path::{Path, PathBuf};

/// Config file name looked up in the working directory
pub const CONFIG_FILE_NAME: &str = "mcp-search-hub.toml";

/// Configuration file errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Load error: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// `<config dir>/mcp-search-hub/config.toml`, if the platform has a config dir
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(env!("CARGO_PKG_NAME")).join("config.toml"))
}

/// First existing config file in the lookup order
pub fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.is_file() {
        return Some(local);
    }
    default_config_path().filter(|path| path.is_file())
}

/// Write the default configuration as TOML, creating parent directories.
/// Refuses to overwrite an existing file unless `force` is set.
pub fn write_default_config(path: &Path, force: bool) -> Result<(), ConfigFileError> {
    if path.exists() && !force {
        return Err(ConfigFileError::Invalid(format!(
            "{} already exists (use --force to overwrite)",
            path.display()
        )));
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let content = toml::to_string_pretty(&Config::default())?;
    std::fs::write(path, content)?;
    Ok(())
}
