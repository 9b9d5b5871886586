//! MCP provider sessions: transports, the JSON-RPC client and the registry.
//!
//! A provider is an external MCP server (GitHub, Firecrawl, a filesystem
//! server, ...). The [`ProviderRegistry`] owns one session per provider and
//! drives it through its lifecycle:
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Reconnecting -> Connected
//!                                                         -> Failed
//! ```
//!
//! Transports are created through a [`TransportConnector`]. The production
//! connector, [`McpConnector`], speaks JSON-RPC 2.0 over either a child
//! process's stdio or a streamable HTTP endpoint. Tests plug in
//! [`MockConnector`] instead.

mod client;
mod http;
mod jsonrpc;
pub mod mock;
mod registry;
mod session;
mod stdio;
mod transport;

pub use client::{McpClient, RpcChannel};
pub use http::HttpChannel;
pub use mock::{MockConnector, MockProvider};
pub use registry::ProviderRegistry;
pub use stdio::StdioChannel;
pub use transport::{
    McpConnector, ProviderTransport, TransportConnector, TransportEvent, TransportEvents,
};

use crate::models::CapabilityManifest;
use serde::Serialize;

/// Protocol revision sent in the `initialize` request
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Errors that can occur when talking to a provider
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    /// Transport creation or handshake failed
    #[error("Failed to connect to provider '{provider}': {message}")]
    Connection { provider: String, message: String },

    /// No live session for the provider
    #[error("Provider '{0}' is not connected")]
    NotConnected(String),

    /// A tool call, resource read or prompt fetch failed
    #[error("Provider '{provider}' failed to run '{operation}': {message}")]
    Invocation {
        provider: String,
        operation: String,
        message: String,
    },

    /// The provider did not answer in time
    #[error("Provider '{provider}' timed out after {elapsed_ms}ms")]
    Timeout { provider: String, elapsed_ms: u64 },

    /// The transport broke (pipe closed, HTTP failure, ...)
    #[error("Transport error: {0}")]
    Transport(String),

    /// The peer sent something that is not valid MCP
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A JSON-RPC error object returned by the peer
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// The tool ran but reported `isError`
    #[error("Tool error: {0}")]
    Tool(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        ProviderError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        ProviderError::Protocol(format!("JSON: {}", err))
    }
}

impl From<std::io::Error> for ProviderError {
    fn from(err: std::io::Error) -> Self {
        ProviderError::Transport(err.to_string())
    }
}

/// Lifecycle notifications published by the registry
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ProviderEvent {
    Connected {
        name: String,
        capabilities: CapabilityManifest,
    },
    ConnectionFailed {
        name: String,
        error: String,
    },
    Disconnected {
        name: String,
    },
    Reconnecting {
        name: String,
        attempt: u32,
    },
    ReconnectFailed {
        name: String,
    },
}

impl ProviderEvent {
    /// Provider the event concerns
    pub fn name(&self) -> &str {
        match self {
            ProviderEvent::Connected { name, .. }
            | ProviderEvent::ConnectionFailed { name, .. }
            | ProviderEvent::Disconnected { name }
            | ProviderEvent::Reconnecting { name, .. }
            | ProviderEvent::ReconnectFailed { name } => name,
        }
    }
}
