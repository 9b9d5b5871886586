//! Transport traits and the production connector.

use super::client::McpClient;
use super::http::HttpChannel;
use super::stdio::StdioChannel;
use super::ProviderError;
use crate::models::{
    PromptDescriptor, ProviderConfig, ResourceDescriptor, ToolDescriptor, TransportConfig,
};
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Unsolicited transport-level happenings reported to the registry
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The peer closed the connection
    Closed,
    /// The transport failed
    Error(String),
}

impl fmt::Display for TransportEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportEvent::Closed => f.write_str("connection closed"),
            TransportEvent::Error(message) => write!(f, "transport error: {}", message),
        }
    }
}

/// Sending half handed to a transport so it can report connection loss
pub type TransportEvents = mpsc::UnboundedSender<TransportEvent>;

/// A live, handshaken MCP session
#[async_trait]
pub trait ProviderTransport: Send + Sync + fmt::Debug {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ProviderError>;

    async fn list_resources(&self) -> Result<Vec<ResourceDescriptor>, ProviderError>;

    async fn list_prompts(&self) -> Result<Vec<PromptDescriptor>, ProviderError>;

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, ProviderError>;

    async fn read_resource(&self, uri: &str) -> Result<Value, ProviderError>;

    async fn get_prompt(&self, name: &str, arguments: Value) -> Result<Value, ProviderError>;

    /// Release the transport. Must not report [`TransportEvent::Closed`].
    async fn close(&self) -> Result<(), ProviderError>;
}

/// Creates transports and performs the protocol handshake
#[async_trait]
pub trait TransportConnector: Send + Sync + fmt::Debug {
    /// Open a transport for `config` and complete the handshake. Connection
    /// loss after this returns is reported through `events`.
    async fn connect(
        &self,
        config: &ProviderConfig,
        events: TransportEvents,
    ) -> Result<Arc<dyn ProviderTransport>, ProviderError>;
}

/// Connector for real MCP servers over stdio or streamable HTTP
#[derive(Debug, Clone)]
pub struct McpConnector {
    http: reqwest::Client,
}

impl McpConnector {
    pub fn new() -> Self {
        Self {
            http: crate::utils::HttpClient::new().client().clone(),
        }
    }

    /// Use a caller-supplied HTTP client for HTTP transports
    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    async fn open(
        &self,
        config: &ProviderConfig,
        events: TransportEvents,
    ) -> Result<Arc<dyn ProviderTransport>, ProviderError> {
        match &config.transport {
            TransportConfig::Stdio { .. } => {
                let channel = StdioChannel::spawn(config, events)?;
                let client = McpClient::new(&config.name, channel);
                client.initialize().await?;
                Ok(Arc::new(client))
            }
            TransportConfig::Http { .. } => {
                let channel = HttpChannel::new(config, self.http.clone(), events)?;
                let client = McpClient::new(&config.name, channel);
                client.initialize().await?;
                Ok(Arc::new(client))
            }
        }
    }
}

impl Default for McpConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransportConnector for McpConnector {
    async fn connect(
        &self,
        config: &ProviderConfig,
        events: TransportEvents,
    ) -> Result<Arc<dyn ProviderTransport>, ProviderError> {
        let timeout = config.connect_timeout();
        tracing::debug!(
            provider = %config.name,
            transport = config.transport.kind(),
            timeout_ms = timeout.as_millis() as u64,
            "Opening transport"
        );

        match tokio::time::timeout(timeout, self.open(config, events)).await {
            Ok(Ok(transport)) => Ok(transport),
            Ok(Err(ProviderError::Connection { provider, message })) => {
                Err(ProviderError::Connection { provider, message })
            }
            Ok(Err(e)) => Err(ProviderError::Connection {
                provider: config.name.clone(),
                message: e.to_string(),
            }),
            Err(_) => Err(ProviderError::Connection {
                provider: config.name.clone(),
                message: format!("handshake timed out after {}ms", timeout.as_millis()),
            }),
        }
    }
}
