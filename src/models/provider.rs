//! Provider configuration, connection state and capability models.

use bitflags::bitflags;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Default handshake timeout when a provider does not set `limits.connect_timeout_ms`
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// How a provider process or endpoint is reached
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportConfig {
    /// Spawn a child process and speak newline-delimited JSON-RPC over stdio
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        env: BTreeMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<PathBuf>,
    },
    /// POST JSON-RPC to a streamable HTTP endpoint
    Http {
        url: String,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        headers: BTreeMap<String, String>,
    },
}

impl TransportConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            TransportConfig::Stdio { .. } => "stdio",
            TransportConfig::Http { .. } => "http",
        }
    }
}

/// Reconnect policy applied when an established session drops
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// Scheduled attempts before the provider is marked failed
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Fixed delay before each attempt
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_delay_ms() -> u64 {
    5000
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_ms: default_delay_ms(),
        }
    }
}

impl ReconnectPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay_ms: delay.as_millis() as u64,
        }
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// Configuration for a single provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider name; filled from the config table key when loaded from a file
    #[serde(default, skip_serializing)]
    pub name: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    pub transport: TransportConfig,

    /// Passed to stdio children as environment variables and to HTTP
    /// providers as headers
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub credentials: BTreeMap<String, String>,

    /// Free-form provider limits (`requests_per_second`, `max_results`,
    /// `allowed_paths`, `connect_timeout_ms`, ...)
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub limits: Map<String, Value>,

    /// Overrides the registry-wide reconnect policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconnect: Option<ReconnectPolicy>,
}

fn default_true() -> bool {
    true
}

impl ProviderConfig {
    /// Create a provider config for the given transport
    pub fn new(name: impl Into<String>, transport: TransportConfig) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            transport,
            credentials: BTreeMap::new(),
            limits: Map::new(),
            reconnect: None,
        }
    }

    /// Provider spawned as a child process
    pub fn stdio<I, S>(name: impl Into<String>, command: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            name,
            TransportConfig::Stdio {
                command: command.into(),
                args: args.into_iter().map(Into::into).collect(),
                env: BTreeMap::new(),
                cwd: None,
            },
        )
    }

    /// Provider reached over streamable HTTP
    pub fn http(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self::new(
            name,
            TransportConfig::Http {
                url: url.into(),
                headers: BTreeMap::new(),
            },
        )
    }

    pub fn with_credential(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.credentials.insert(key.into(), value.into());
        self
    }

    pub fn with_limit(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.limits.insert(key.into(), value.into());
        self
    }

    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = Some(policy);
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Numeric limit, accepting integers or floats
    pub fn limit_f64(&self, key: &str) -> Option<f64> {
        self.limits.get(key).and_then(Value::as_f64)
    }

    pub fn limit_u64(&self, key: &str) -> Option<u64> {
        self.limits.get(key).and_then(|v| {
            v.as_u64()
                .or_else(|| v.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
        })
    }

    /// String-list limit; a single string is treated as a one-element list
    pub fn limit_strings(&self, key: &str) -> Vec<String> {
        match self.limits.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            Some(Value::String(s)) => vec![s.clone()],
            _ => Vec::new(),
        }
    }

    /// Steady-state request rate, if rate limiting is configured
    pub fn requests_per_second(&self) -> Option<f64> {
        self.limit_f64("requests_per_second").filter(|r| *r > 0.0)
    }

    /// Bound on transport creation plus handshake
    pub fn connect_timeout(&self) -> Duration {
        self.limit_u64("connect_timeout_ms")
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT)
    }

    pub fn reconnect_policy(&self, fallback: ReconnectPolicy) -> ReconnectPolicy {
        self.reconnect.unwrap_or(fallback)
    }
}

/// Lifecycle of a provider session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

impl ConnectionState {
    /// Whether moving from `self` to `next` is a legal edge of the lifecycle.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connected, Reconnecting)
                | (Connected, Failed)
                | (Reconnecting, Connected)
                | (Reconnecting, Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Failed => "failed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

bitflags! {
    /// Capability kinds whose listing succeeded during the handshake
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CapabilityKinds: u32 {
        const TOOLS = 1 << 0;
        const RESOURCES = 1 << 1;
        const PROMPTS = 1 << 2;
    }
}

impl fmt::Display for CapabilityKinds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self
            .iter_names()
            .map(|(name, _)| match name {
                "TOOLS" => "tools",
                "RESOURCES" => "resources",
                _ => "prompts",
            })
            .collect();
        if names.is_empty() {
            f.write_str("none")
        } else {
            f.write_str(&names.join(","))
        }
    }
}

/// A tool advertised by a provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub input_schema: Value,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            input_schema: Value::Null,
        }
    }
}

/// A resource advertised by a provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDescriptor {
    pub uri: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// A prompt template advertised by a provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub arguments: Vec<Value>,
}

/// What a provider advertised at handshake time. A kind whose listing
/// failed is `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilityManifest {
    pub tools: Option<Vec<ToolDescriptor>>,
    pub resources: Option<Vec<ResourceDescriptor>>,
    pub prompts: Option<Vec<PromptDescriptor>>,
}

impl CapabilityManifest {
    pub fn tools(&self) -> &[ToolDescriptor] {
        self.tools.as_deref().unwrap_or_default()
    }

    pub fn resources(&self) -> &[ResourceDescriptor] {
        self.resources.as_deref().unwrap_or_default()
    }

    pub fn prompts(&self) -> &[PromptDescriptor] {
        self.prompts.as_deref().unwrap_or_default()
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools().iter().any(|t| t.name == name)
    }

    /// Kinds whose listing succeeded
    pub fn listed(&self) -> CapabilityKinds {
        let mut kinds = CapabilityKinds::empty();
        kinds.set(CapabilityKinds::TOOLS, self.tools.is_some());
        kinds.set(CapabilityKinds::RESOURCES, self.resources.is_some());
        kinds.set(CapabilityKinds::PROMPTS, self.prompts.is_some());
        kinds
    }
}

/// Health snapshot of a provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStatus {
    pub connected: bool,
    pub state: ConnectionState,
    pub reconnect_attempts: u32,
    pub last_error: Option<String>,
    pub last_connected_at: Option<DateTime<Utc>>,
}

/// A provider with its advertised capabilities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub name: String,
    pub state: ConnectionState,
    pub transport: String,
    pub capabilities: CapabilityManifest,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        use ConnectionState::*;
        assert!(Disconnected.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Connected));
        assert!(Connected.can_transition_to(Reconnecting));
        assert!(Reconnecting.can_transition_to(Connected));
        assert!(Reconnecting.can_transition_to(Failed));

        assert!(!Disconnected.can_transition_to(Connected));
        assert!(!Failed.can_transition_to(Connected));
        assert!(!Connecting.can_transition_to(Reconnecting));
    }

    #[test]
    fn test_transport_config_deserialize() {
        let stdio: TransportConfig = serde_json::from_value(serde_json::json!({
            "type": "stdio",
            "command": "npx",
            "args": ["-y", "@modelcontextprotocol/server-github"]
        }))
        .unwrap();
        assert_eq!(stdio.kind(), "stdio");

        let http: TransportConfig = serde_json::from_value(serde_json::json!({
            "type": "http",
            "url": "http://localhost:8931/mcp"
        }))
        .unwrap();
        assert_eq!(http.kind(), "http");
    }

    #[test]
    fn test_limits() {
        let config = ProviderConfig::stdio("filesystem", "fs-server", ["/tmp"])
            .with_limit("requests_per_second", 2.5)
            .with_limit("max_results", 20)
            .with_limit("allowed_paths", serde_json::json!(["./src", "./docs"]));

        assert_eq!(config.requests_per_second(), Some(2.5));
        assert_eq!(config.limit_u64("max_results"), Some(20));
        assert_eq!(config.limit_strings("allowed_paths"), vec!["./src", "./docs"]);
        assert_eq!(config.connect_timeout(), DEFAULT_CONNECT_TIMEOUT);
    }

    #[test]
    fn test_manifest_partial_listing() {
        let manifest = CapabilityManifest {
            tools: Some(vec![ToolDescriptor::new("search_repositories")]),
            resources: None,
            prompts: Some(Vec::new()),
        };

        assert!(manifest.has_tool("search_repositories"));
        assert!(manifest.resources().is_empty());
        assert_eq!(
            manifest.listed(),
            CapabilityKinds::TOOLS | CapabilityKinds::PROMPTS
        );
        assert_eq!(manifest.listed().to_string(), "tools,prompts");
    }

    #[test]
    fn test_reconnect_policy_fallback() {
        let config = ProviderConfig::http("browser", "http://localhost:3000/mcp");
        let fallback = ReconnectPolicy::new(5, Duration::from_secs(1));
        assert_eq!(config.reconnect_policy(fallback), fallback);

        let custom = ReconnectPolicy::new(1, Duration::from_millis(10));
        let config = config.with_reconnect(custom);
        assert_eq!(config.reconnect_policy(fallback).max_attempts, 1);
    }
}
