//! Scripted in-memory providers for testing.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::transport::{ProviderTransport, TransportConnector, TransportEvent, TransportEvents};
use super::ProviderError;
use crate::models::{
    CapabilityKinds, PromptDescriptor, ProviderConfig, ResourceDescriptor, ToolDescriptor,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A connector handing out [`MockProvider`]-backed transports by provider name.
#[derive(Debug, Default)]
pub struct MockConnector {
    providers: Mutex<HashMap<String, Arc<MockProvider>>>,
}

impl MockConnector {
    /// Create a new mock connector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get (or create) the scripted provider for `name`.
    pub fn provider(&self, name: &str) -> Arc<MockProvider> {
        Arc::clone(lock(&self.providers).entry(name.to_string()).or_default())
    }
}

#[async_trait]
impl TransportConnector for MockConnector {
    async fn connect(
        &self,
        config: &ProviderConfig,
        events: TransportEvents,
    ) -> Result<Arc<dyn ProviderTransport>, ProviderError> {
        let provider = self.provider(&config.name);
        provider.connects.fetch_add(1, Ordering::SeqCst);

        let failing = provider
            .failing_handshakes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ProviderError::Connection {
                provider: config.name.clone(),
                message: "mock handshake failure".to_string(),
            });
        }

        *lock(&provider.events) = Some(events);
        Ok(Arc::new(MockTransport { provider }))
    }
}

/// Scripted behaviour of one mock provider
#[derive(Debug, Default)]
pub struct MockProvider {
    tools: Mutex<Vec<ToolDescriptor>>,
    failing_listings: Mutex<Option<CapabilityKinds>>,
    failing_handshakes: AtomicU32,
    responses: Mutex<HashMap<String, Result<Value, String>>>,
    delays: Mutex<HashMap<String, Duration>>,
    calls: Mutex<Vec<(String, Value)>>,
    events: Mutex<Option<TransportEvents>>,
    connects: AtomicUsize,
    closes: AtomicUsize,
}

impl MockProvider {
    /// Advertise tools with the given names.
    pub fn tools<I, S>(&self, names: I) -> &Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        *lock(&self.tools) = names
            .into_iter()
            .map(|n| ToolDescriptor::new(n.into()))
            .collect();
        self
    }

    /// Make listing of the given capability kinds fail.
    pub fn fail_listing(&self, kinds: CapabilityKinds) -> &Self {
        *lock(&self.failing_listings) = Some(kinds);
        self
    }

    /// Fail the next `count` handshakes.
    pub fn fail_handshakes(&self, count: u32) -> &Self {
        self.failing_handshakes.store(count, Ordering::SeqCst);
        self
    }

    /// Return `response` when `tool` is called.
    pub fn respond(&self, tool: &str, response: Value) -> &Self {
        lock(&self.responses).insert(tool.to_string(), Ok(response));
        self
    }

    /// Fail calls to `tool` with `message`.
    pub fn fail_tool(&self, tool: &str, message: &str) -> &Self {
        lock(&self.responses).insert(tool.to_string(), Err(message.to_string()));
        self
    }

    /// Sleep for `delay` before answering `tool`.
    pub fn delay(&self, tool: &str, delay: Duration) -> &Self {
        lock(&self.delays).insert(tool.to_string(), delay);
        self
    }

    /// Simulate the peer closing the live connection.
    pub fn drop_connection(&self) {
        if let Some(events) = lock(&self.events).as_ref() {
            let _ = events.send(TransportEvent::Closed);
        }
    }

    /// Number of connection attempts so far
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Number of transports closed so far
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Number of calls made to `tool`
    pub fn calls(&self, tool: &str) -> usize {
        lock(&self.calls).iter().filter(|(t, _)| t == tool).count()
    }

    /// Arguments of the most recent call to `tool`
    pub fn last_args(&self, tool: &str) -> Option<Value> {
        lock(&self.calls)
            .iter()
            .rev()
            .find(|(t, _)| t == tool)
            .map(|(_, args)| args.clone())
    }

    fn listing_fails(&self, kind: CapabilityKinds) -> bool {
        lock(&self.failing_listings).is_some_and(|k| k.contains(kind))
    }
}

/// Transport backed by a [`MockProvider`]
#[derive(Debug)]
pub struct MockTransport {
    provider: Arc<MockProvider>,
}

fn listing_error(kind: &str) -> ProviderError {
    ProviderError::Rpc {
        code: -32601,
        message: format!("{} not supported", kind),
    }
}

#[async_trait]
impl ProviderTransport for MockTransport {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ProviderError> {
        if self.provider.listing_fails(CapabilityKinds::TOOLS) {
            return Err(listing_error("tools"));
        }
        Ok(lock(&self.provider.tools).clone())
    }

    async fn list_resources(&self) -> Result<Vec<ResourceDescriptor>, ProviderError> {
        if self.provider.listing_fails(CapabilityKinds::RESOURCES) {
            return Err(listing_error("resources"));
        }
        Ok(Vec::new())
    }

    async fn list_prompts(&self) -> Result<Vec<PromptDescriptor>, ProviderError> {
        if self.provider.listing_fails(CapabilityKinds::PROMPTS) {
            return Err(listing_error("prompts"));
        }
        Ok(Vec::new())
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, ProviderError> {
        lock(&self.provider.calls).push((name.to_string(), arguments));

        let delay = lock(&self.provider.delays).get(name).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let response = lock(&self.provider.responses).get(name).cloned();
        match response {
            Some(Ok(value)) => Ok(value),
            Some(Err(message)) => Err(ProviderError::Tool(message)),
            None => Ok(json!({ "content": [] })),
        }
    }

    async fn read_resource(&self, uri: &str) -> Result<Value, ProviderError> {
        Ok(json!({ "contents": [{ "uri": uri, "text": "" }] }))
    }

    async fn get_prompt(&self, name: &str, _arguments: Value) -> Result<Value, ProviderError> {
        Ok(json!({ "description": name, "messages": [] }))
    }

    async fn close(&self) -> Result<(), ProviderError> {
        self.provider.closes.fetch_add(1, Ordering::SeqCst);
        *lock(&self.provider.events) = None;
        Ok(())
    }
}
