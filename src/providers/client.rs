//! MCP client methods layered over a raw JSON-RPC channel.

use super::transport::ProviderTransport;
use super::{jsonrpc, ProviderError};
use crate::models::{PromptDescriptor, ResourceDescriptor, ToolDescriptor};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::fmt;

/// Upper bound on `nextCursor` pages followed for one listing
const MAX_LIST_PAGES: usize = 32;

/// A bidirectional JSON-RPC pipe to one MCP server
#[async_trait]
pub trait RpcChannel: Send + Sync + fmt::Debug {
    /// Send a request and wait for its response.
    async fn request(&self, method: &str, params: Value) -> Result<Value, ProviderError>;

    /// Send a notification.
    async fn notify(&self, method: &str, params: Value) -> Result<(), ProviderError>;

    /// Tear the channel down without reporting it as a connection loss.
    async fn shutdown(&self) -> Result<(), ProviderError>;
}

/// Typed MCP operations over any [`RpcChannel`]
#[derive(Debug)]
pub struct McpClient<C> {
    provider: String,
    channel: C,
}

impl<C: RpcChannel> McpClient<C> {
    pub fn new(provider: &str, channel: C) -> Self {
        Self {
            provider: provider.to_string(),
            channel,
        }
    }

    /// Run the `initialize` / `notifications/initialized` handshake.
    pub async fn initialize(&self) -> Result<Value, ProviderError> {
        let result = self
            .channel
            .request("initialize", jsonrpc::initialize_params())
            .await?;

        let version = result
            .get("protocolVersion")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ProviderError::Protocol("initialize result lacks protocolVersion".to_string())
            })?;

        let server = result
            .pointer("/serverInfo/name")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        tracing::debug!(
            provider = %self.provider,
            server,
            protocol_version = version,
            "Handshake complete"
        );

        self.channel
            .notify("notifications/initialized", json!({}))
            .await?;
        Ok(result)
    }

    /// Follow `nextCursor` pagination and collect the `field` arrays.
    async fn list_all<T: DeserializeOwned>(
        &self,
        method: &str,
        field: &str,
    ) -> Result<Vec<T>, ProviderError> {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let params = match &cursor {
                Some(cursor) => json!({ "cursor": cursor }),
                None => json!({}),
            };
            let mut page = self.channel.request(method, params).await?;

            let entries = page
                .get_mut(field)
                .map(Value::take)
                .unwrap_or_else(|| Value::Array(Vec::new()));
            let mut batch: Vec<T> = serde_json::from_value(entries)?;
            items.append(&mut batch);

            cursor = page
                .get("nextCursor")
                .and_then(Value::as_str)
                .map(str::to_string);
            if cursor.is_none() {
                break;
            }
        }

        Ok(items)
    }
}

#[async_trait]
impl<C: RpcChannel> ProviderTransport for McpClient<C> {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ProviderError> {
        self.list_all("tools/list", "tools").await
    }

    async fn list_resources(&self) -> Result<Vec<ResourceDescriptor>, ProviderError> {
        self.list_all("resources/list", "resources").await
    }

    async fn list_prompts(&self) -> Result<Vec<PromptDescriptor>, ProviderError> {
        self.list_all("prompts/list", "prompts").await
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, ProviderError> {
        let result = self
            .channel
            .request("tools/call", json!({ "name": name, "arguments": arguments }))
            .await?;

        if result.get("isError").and_then(Value::as_bool) == Some(true) {
            return Err(ProviderError::Tool(content_text(&result)));
        }
        Ok(result)
    }

    async fn read_resource(&self, uri: &str) -> Result<Value, ProviderError> {
        self.channel
            .request("resources/read", json!({ "uri": uri }))
            .await
    }

    async fn get_prompt(&self, name: &str, arguments: Value) -> Result<Value, ProviderError> {
        self.channel
            .request("prompts/get", json!({ "name": name, "arguments": arguments }))
            .await
    }

    async fn close(&self) -> Result<(), ProviderError> {
        self.channel.shutdown().await
    }
}

/// Concatenate the text blocks of a tool result.
fn content_text(result: &Value) -> String {
    let text: Vec<&str> = result
        .get("content")
        .and_then(Value::as_array)
        .map(|blocks| {
            blocks
                .iter()
                .filter_map(|b| b.get("text").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default();

    if text.is_empty() {
        "tool reported an error".to_string()
    } else {
        text.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned responses and records what was sent
    #[derive(Debug, Default)]
    struct ScriptedChannel {
        responses: Mutex<VecDeque<Result<Value, ProviderError>>>,
        sent: Mutex<Vec<(String, Value)>>,
    }

    impl ScriptedChannel {
        fn with(responses: Vec<Result<Value, ProviderError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                sent: Mutex::default(),
            }
        }
    }

    #[async_trait]
    impl RpcChannel for ScriptedChannel {
        async fn request(&self, method: &str, params: Value) -> Result<Value, ProviderError> {
            self.sent.lock().unwrap().push((method.to_string(), params));
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ProviderError::Transport("no response".into())))
        }

        async fn notify(&self, method: &str, params: Value) -> Result<(), ProviderError> {
            self.sent.lock().unwrap().push((method.to_string(), params));
            Ok(())
        }

        async fn shutdown(&self) -> Result<(), ProviderError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_initialize_sends_initialized_notification() {
        let channel = ScriptedChannel::with(vec![Ok(json!({
            "protocolVersion": "2024-11-05",
            "serverInfo": {"name": "github", "version": "1.0"},
            "capabilities": {}
        }))]);
        let client = McpClient::new("github", channel);

        client.initialize().await.unwrap();

        let sent = client.channel.sent.lock().unwrap();
        assert_eq!(sent[0].0, "initialize");
        assert_eq!(sent[0].1["protocolVersion"], "2024-11-05");
        assert_eq!(sent[1].0, "notifications/initialized");
    }

    #[tokio::test]
    async fn test_initialize_rejects_missing_version() {
        let channel = ScriptedChannel::with(vec![Ok(json!({"capabilities": {}}))]);
        let client = McpClient::new("github", channel);
        assert!(matches!(
            client.initialize().await,
            Err(ProviderError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_list_tools_follows_cursor() {
        let channel = ScriptedChannel::with(vec![
            Ok(json!({"tools": [{"name": "search_code"}], "nextCursor": "p2"})),
            Ok(json!({"tools": [{"name": "search_repositories", "inputSchema": {"type": "object"}}]})),
        ]);
        let client = McpClient::new("github", channel);

        let tools = client.list_tools().await.unwrap();
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[1].name, "search_repositories");

        let sent = client.channel.sent.lock().unwrap();
        assert_eq!(sent[1].1["cursor"], "p2");
    }

    #[tokio::test]
    async fn test_call_tool_is_error() {
        let channel = ScriptedChannel::with(vec![Ok(json!({
            "isError": true,
            "content": [{"type": "text", "text": "Bad credentials"}]
        }))]);
        let client = McpClient::new("github", channel);

        match client.call_tool("search_code", json!({"q": "x"})).await {
            Err(ProviderError::Tool(message)) => assert_eq!(message, "Bad credentials"),
            other => panic!("unexpected {:?}", other),
        }
    }
}
