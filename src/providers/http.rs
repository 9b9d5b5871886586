//! Streamable HTTP transport: JSON-RPC POSTed to a single endpoint.

use super::client::RpcChannel;
use super::jsonrpc::{self, Incoming};
use super::transport::{TransportEvent, TransportEvents};
use super::ProviderError;
use crate::models::{ProviderConfig, TransportConfig};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::RwLock;
use url::Url;

/// Header carrying the server-assigned session id
pub const SESSION_HEADER: &str = "mcp-session-id";

/// Credential sent as `Authorization: Bearer <value>`
pub const BEARER_CREDENTIAL: &str = "bearer_token";

/// JSON-RPC channel to an MCP server's HTTP endpoint
#[derive(Debug)]
pub struct HttpChannel {
    provider: String,
    client: Client,
    url: Url,
    headers: HeaderMap,
    session_id: RwLock<Option<String>>,
    next_id: AtomicU64,
    closing: AtomicBool,
    events: TransportEvents,
}

impl HttpChannel {
    pub fn new(
        config: &ProviderConfig,
        client: Client,
        events: TransportEvents,
    ) -> Result<Self, ProviderError> {
        let connection_error = |message: String| ProviderError::Connection {
            provider: config.name.clone(),
            message,
        };

        let TransportConfig::Http { url, headers } = &config.transport else {
            return Err(connection_error("not an http transport".to_string()));
        };

        let url = Url::parse(url).map_err(|e| connection_error(format!("invalid url: {}", e)))?;

        let mut header_map = HeaderMap::new();
        for (key, value) in headers.iter().chain(config.credentials.iter()) {
            let (name, value) = if key == BEARER_CREDENTIAL {
                (AUTHORIZATION, format!("Bearer {}", value))
            } else {
                let name = HeaderName::from_bytes(key.as_bytes())
                    .map_err(|e| connection_error(format!("invalid header '{}': {}", key, e)))?;
                (name, value.clone())
            };
            let value = HeaderValue::from_str(&value)
                .map_err(|e| connection_error(format!("invalid value for '{}': {}", key, e)))?;
            header_map.insert(name, value);
        }

        Ok(Self {
            provider: config.name.clone(),
            client,
            url,
            headers: header_map,
            session_id: RwLock::new(None),
            next_id: AtomicU64::new(1),
            closing: AtomicBool::new(false),
            events,
        })
    }

    async fn post(&self, body: &Value) -> Result<reqwest::Response, ProviderError> {
        let mut request = self
            .client
            .post(self.url.clone())
            .headers(self.headers.clone())
            .header(ACCEPT, "application/json, text/event-stream")
            .json(body);
        if let Some(session) = self.session_id.read().await.as_deref() {
            request = request.header(SESSION_HEADER, session);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_connect() {
                self.report(TransportEvent::Error(e.to_string()));
            }
            ProviderError::from(e)
        })?;

        if let Some(session) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            let mut current = self.session_id.write().await;
            if current.as_deref() != Some(session) {
                *current = Some(session.to_string());
            }
        }

        let status = response.status();
        if status == StatusCode::NOT_FOUND && self.session_id.read().await.is_some() {
            // the server forgot our session
            self.report(TransportEvent::Closed);
            return Err(ProviderError::Transport("session expired".to_string()));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::Transport(format!(
                "HTTP {}: {}",
                status,
                text.chars().take(200).collect::<String>()
            )));
        }

        Ok(response)
    }

    fn report(&self, event: TransportEvent) {
        if !self.closing.load(Ordering::SeqCst) {
            let _ = self.events.send(event);
        }
    }
}

/// Find the response for `id` in an HTTP response body.
fn extract_response(content_type: &str, body: &str, id: u64) -> Result<Value, ProviderError> {
    let frames = if content_type.starts_with("text/event-stream") {
        jsonrpc::sse_payloads(body)
    } else {
        match serde_json::from_str::<Value>(body)? {
            Value::Array(batch) => batch,
            single => vec![single],
        }
    };

    for frame in frames {
        if let Ok(Incoming::Response { id: got, outcome }) = jsonrpc::classify(frame) {
            if got == id {
                return outcome;
            }
        }
    }

    Err(ProviderError::Protocol(format!(
        "no response for request {} in body",
        id
    )))
}

#[async_trait]
impl RpcChannel for HttpChannel {
    async fn request(&self, method: &str, params: Value) -> Result<Value, ProviderError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let response = self.post(&jsonrpc::request(id, method, params)).await?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/json")
            .to_string();
        let body = response.text().await?;

        extract_response(&content_type, &body, id)
    }

    async fn notify(&self, method: &str, params: Value) -> Result<(), ProviderError> {
        self.post(&jsonrpc::notification(method, params)).await?;
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ProviderError> {
        self.closing.store(true, Ordering::SeqCst);

        let Some(session) = self.session_id.write().await.take() else {
            return Ok(());
        };
        let result = self
            .client
            .delete(self.url.clone())
            .headers(self.headers.clone())
            .header(SESSION_HEADER, session)
            .send()
            .await;
        if let Err(e) = result {
            tracing::debug!(provider = %self.provider, error = %e, "Session delete failed");
        }
        Ok(())
    }
}
