//! Configuration management.
//!
//! Settings are layered: built-in defaults, then an optional TOML file, then
//! `MCP_SEARCH_HUB__*` environment variables (`__` separates nested keys,
//! e.g. `MCP_SEARCH_HUB__SEARCH__TIMEOUT_MS=5000`).

mod file_config;

pub use file_config::{
    default_config_path, find_config_file, write_default_config, ConfigFileError, CONFIG_FILE_NAME,
};

use crate::models::{ProviderConfig, ReconnectPolicy, TransportConfig};
use crate::utils::RetryConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "MCP_SEARCH_HUB";

/// Roots searched by the filesystem provider when none are configured
pub const DEFAULT_ALLOWED_PATHS: [&str; 3] = ["./data", "./public", "./src"];

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Lifetime of cached search outcomes
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_seconds: u64,

    #[serde(default)]
    pub search: SearchConfig,

    /// Reconnect policy for providers that do not set their own
    #[serde(default)]
    pub reconnect: ReconnectPolicy,

    /// Provider table keyed by provider name
    #[serde(default = "default_providers")]
    pub providers: BTreeMap<String, ProviderConfig>,

    #[serde(default)]
    pub enrichment: EnrichmentConfig,

    #[serde(default)]
    pub history: HistoryConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_ttl_seconds: default_cache_ttl(),
            search: SearchConfig::default(),
            reconnect: ReconnectPolicy::default(),
            providers: default_providers(),
            enrichment: EnrichmentConfig::default(),
            history: HistoryConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

fn default_cache_ttl() -> u64 {
    3600
}

impl Config {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }

    /// Provider configs with their names filled in from the table keys
    pub fn provider_configs(&self) -> Vec<ProviderConfig> {
        self.providers
            .iter()
            .map(|(name, provider)| {
                let mut provider = provider.clone();
                provider.name = name.clone();
                provider
            })
            .collect()
    }

    /// Roots the filesystem provider may search
    pub fn allowed_paths(&self) -> Vec<String> {
        let configured = self
            .providers
            .get("filesystem")
            .map(|p| p.limit_strings("allowed_paths"))
            .unwrap_or_default();

        if configured.is_empty() {
            DEFAULT_ALLOWED_PATHS.iter().map(|p| p.to_string()).collect()
        } else {
            configured
        }
    }

    /// Reject settings that would make every search or connection fail
    pub fn validate(&self) -> Result<(), ConfigFileError> {
        if self.search.max_results == 0 {
            return Err(ConfigFileError::Invalid(
                "search.max_results must be at least 1".to_string(),
            ));
        }
        if self.search.timeout_ms == 0 {
            return Err(ConfigFileError::Invalid(
                "search.timeout_ms must be at least 1".to_string(),
            ));
        }

        for (name, provider) in &self.providers {
            match &provider.transport {
                TransportConfig::Stdio { command, .. } if command.trim().is_empty() => {
                    return Err(ConfigFileError::Invalid(format!(
                        "provider '{}' has an empty command",
                        name
                    )));
                }
                TransportConfig::Http { url, .. } => {
                    if let Err(e) = url::Url::parse(url) {
                        return Err(ConfigFileError::Invalid(format!(
                            "provider '{}' has an invalid url '{}': {}",
                            name, url, e
                        )));
                    }
                }
                TransportConfig::Stdio { .. } => {}
            }
        }
        Ok(())
    }
}

/// Search defaults
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Result cap when a query sets none
    #[serde(default = "default_max_results")]
    pub max_results: usize,

    /// Overall deadline for one search when a query sets none
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Retries for the enrichment call
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_results: default_max_results(),
            timeout_ms: default_timeout_ms(),
            retry_count: default_retry_count(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

fn default_max_results() -> usize {
    100
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_retry_count() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

impl SearchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::new(self.retry_count, Duration::from_millis(self.retry_delay_ms))
    }
}

/// LLM enrichment settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    /// Enrich when a query asks for it and an API key is available
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Falls back to `ANTHROPIC_API_KEY`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: None,
            model: default_model(),
            endpoint: default_endpoint(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl EnrichmentConfig {
    /// Configured key, else `ANTHROPIC_API_KEY`
    pub fn api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok())
            .filter(|key| !key.trim().is_empty())
    }
}

fn default_true() -> bool {
    true
}

fn default_model() -> String {
    "claude-3-5-sonnet-latest".to_string()
}

fn default_endpoint() -> String {
    "https://api.anthropic.com/v1/messages".to_string()
}

fn default_max_tokens() -> u32 {
    4000
}

/// Search history settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Defaults to `<config dir>/mcp-search-hub/history.jsonl`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn env_url(var: &str, fallback: &str) -> String {
    std::env::var(var).unwrap_or_else(|_| fallback.to_string())
}

fn env_present(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.trim().is_empty())
}

/// The stock provider table. Keyed providers are enabled only when their
/// key is present in the environment.
fn default_providers() -> BTreeMap<String, ProviderConfig> {
    let firecrawl_key = env_present("FIRECRAWL_API_KEY");
    let github_token = env_present("GITHUB_TOKEN");

    let mut firecrawl =
        ProviderConfig::http("firecrawl", env_url("MCP_FIRECRAWL_URL", "http://localhost:3001"))
            .enabled(firecrawl_key.is_some())
            .with_limit("max_pages", 10)
            .with_limit("connect_timeout_ms", 30_000);
    if let Some(key) = firecrawl_key {
        firecrawl = firecrawl.with_credential("bearer_token", key);
    }

    let mut github =
        ProviderConfig::http("github", env_url("MCP_GITHUB_URL", "http://localhost:3002"))
            .enabled(github_token.is_some())
            .with_limit("max_results", 50);
    if let Some(token) = github_token {
        github = github.with_credential("bearer_token", token);
    }

    let context7 =
        ProviderConfig::http("context7", env_url("MCP_CONTEXT7_URL", "http://localhost:3003"));

    let filesystem =
        ProviderConfig::http("filesystem", env_url("MCP_FILESYSTEM_URL", "http://localhost:3004"))
            .with_limit("allowed_paths", DEFAULT_ALLOWED_PATHS.to_vec())
            .with_limit("max_file_size", 50 * 1024 * 1024);

    let browser = ProviderConfig::stdio(
        "browser",
        "npx",
        ["-y", "@modelcontextprotocol/server-puppeteer"],
    )
    .enabled(env_present("MCP_BROWSER_ENABLED").is_some());

    [firecrawl, github, context7, filesystem, browser]
        .into_iter()
        .map(|p| (p.name.clone(), p))
        .collect()
}

/// Load configuration from defaults, an optional TOML file and the
/// environment.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigFileError> {
    let defaults = config::Config::try_from(&Config::default())?;

    let mut builder = config::Config::builder().add_source(defaults);
    if let Some(path) = path {
        if !path.exists() {
            return Err(ConfigFileError::NotFound(path.to_path_buf()));
        }
        builder = builder.add_source(config::File::from(path));
    }
    builder = builder.add_source(
        config::Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true),
    );

    let config: Config = builder.build()?.try_deserialize()?;
    config.validate()?;
    Ok(config)
}

/// Load from `path`, or the first config file found, or defaults only
pub fn get_config(path: Option<&Path>) -> Result<Config, ConfigFileError> {
    match path {
        Some(path) => load_config(Some(path)),
        None => load_config(find_config_file().as_deref()),
    }
}
