//! Registry owning every provider session and its reconnect machinery.

use super::session::ProviderSession;
use super::transport::{ProviderTransport, TransportConnector, TransportEvent};
use super::{ProviderError, ProviderEvent};
use crate::models::{
    CapabilityManifest, ConnectionState, ProviderConfig, ProviderInfo, ProviderStatus,
    ReconnectPolicy,
};
use futures_util::future::{join_all, BoxFuture};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;

const EVENT_CAPACITY: usize = 64;

/// Owns provider sessions keyed by name.
///
/// Cloning is cheap; clones share the same sessions.
#[derive(Debug, Clone)]
pub struct ProviderRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Debug)]
struct RegistryInner {
    connector: Arc<dyn TransportConnector>,
    default_policy: ReconnectPolicy,
    sessions: RwLock<HashMap<String, ProviderSession>>,
    events: broadcast::Sender<ProviderEvent>,
    generation: AtomicU64,
    shutting_down: AtomicBool,
}

impl ProviderRegistry {
    /// Create an empty registry that opens transports through `connector`
    pub fn new(connector: Arc<dyn TransportConnector>, default_policy: ReconnectPolicy) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(RegistryInner {
                connector,
                default_policy,
                sessions: RwLock::new(HashMap::new()),
                events,
                generation: AtomicU64::new(0),
                shutting_down: AtomicBool::new(false),
            }),
        }
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<ProviderEvent> {
        self.inner.events.subscribe()
    }

    /// Connect every enabled provider concurrently.
    ///
    /// Individual failures are logged and do not abort the others. Returns the
    /// number of providers that connected.
    pub async fn init<I>(&self, configs: I) -> usize
    where
        I: IntoIterator<Item = ProviderConfig>,
    {
        let enabled: Vec<ProviderConfig> = configs.into_iter().filter(|c| c.enabled).collect();
        tracing::info!(providers = enabled.len(), "Connecting providers");

        let attempts = enabled.into_iter().map(|config| async move {
            let name = config.name.clone();
            match self.connect(&name, config).await {
                Ok(_) => true,
                Err(e) => {
                    tracing::error!(provider = %name, error = %e, "Provider failed to connect");
                    false
                }
            }
        });

        let connected = join_all(attempts).await.into_iter().filter(|ok| *ok).count();
        tracing::info!(connected, "Provider registry initialized");
        connected
    }

    /// Connect (or replace) the provider `name`.
    ///
    /// An existing session under the same name is torn down first. On
    /// handshake failure no session is left behind and
    /// [`ProviderEvent::ConnectionFailed`] is emitted.
    pub async fn connect(
        &self,
        name: &str,
        mut config: ProviderConfig,
    ) -> Result<CapabilityManifest, ProviderError> {
        let inner = &self.inner;
        if inner.shutting_down.load(Ordering::SeqCst) {
            return Err(ProviderError::Connection {
                provider: name.to_string(),
                message: "registry is shutting down".to_string(),
            });
        }
        config.name = name.to_string();

        let generation = inner.next_generation();
        let policy = config.reconnect_policy(inner.default_policy);
        let previous = {
            let mut sessions = inner.sessions.write().await;
            sessions.insert(
                name.to_string(),
                ProviderSession::connecting(config.clone(), policy, generation),
            )
        };
        if let Some(previous) = previous {
            tracing::info!(provider = %name, "Replacing existing session");
            inner.release(previous).await;
        }

        tracing::info!(provider = %name, transport = config.transport.kind(), "Connecting");

        match inner.establish(&config).await {
            Ok((transport, capabilities, events)) => {
                let mut sessions = inner.sessions.write().await;
                match sessions.get_mut(name) {
                    Some(session)
                        if session.generation == generation
                            && session.state == ConnectionState::Connecting =>
                    {
                        let generation = inner.next_generation();
                        session.install(Arc::clone(&transport), capabilities.clone(), generation);
                        session.monitor = Some(inner.spawn_monitor(name, generation, events));
                        drop(sessions);

                        tracing::info!(
                            provider = %name,
                            tools = capabilities.tools().len(),
                            resources = capabilities.resources().len(),
                            prompts = capabilities.prompts().len(),
                            listed = %capabilities.listed(),
                            "Provider connected"
                        );
                        inner.emit(ProviderEvent::Connected {
                            name: name.to_string(),
                            capabilities: capabilities.clone(),
                        });
                        Ok(capabilities)
                    }
                    _ => {
                        drop(sessions);
                        let _ = transport.close().await;
                        Err(ProviderError::Connection {
                            provider: name.to_string(),
                            message: "session was replaced during handshake".to_string(),
                        })
                    }
                }
            }
            Err(e) => {
                {
                    let mut sessions = inner.sessions.write().await;
                    if sessions.get(name).map(|s| s.generation) == Some(generation) {
                        sessions.remove(name);
                    }
                }
                tracing::error!(provider = %name, error = %e, "Connection failed");
                inner.emit(ProviderEvent::ConnectionFailed {
                    name: name.to_string(),
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Disconnect the provider `name`, cancelling any pending reconnect.
    ///
    /// Close errors are logged, never returned. Unknown names are a no-op.
    pub async fn disconnect(&self, name: &str) {
        let removed = self.inner.sessions.write().await.remove(name);
        if let Some(session) = removed {
            self.inner.release(session).await;
            tracing::info!(provider = %name, "Provider disconnected");
            self.inner.emit(ProviderEvent::Disconnected {
                name: name.to_string(),
            });
        }
    }

    /// Disconnect everything and refuse further reconnects.
    pub async fn shutdown(&self) {
        self.inner.shutting_down.store(true, Ordering::SeqCst);

        let names: Vec<String> = {
            let mut sessions = self.inner.sessions.write().await;
            for session in sessions.values_mut() {
                session.cancel_tasks();
            }
            sessions.keys().cloned().collect()
        };

        join_all(names.iter().map(|name| self.disconnect(name))).await;
        tracing::info!(providers = names.len(), "Provider registry shut down");
    }

    /// Call `tool` on the connected provider `provider`.
    ///
    /// Fails with [`ProviderError::NotConnected`] unless the session is
    /// `Connected`. Provider-side errors become [`ProviderError::Invocation`].
    pub async fn invoke(
        &self,
        provider: &str,
        tool: &str,
        args: Value,
    ) -> Result<Value, ProviderError> {
        let transport = self.inner.ready_transport(provider).await?;
        tracing::debug!(provider, tool, "Invoking tool");

        transport
            .call_tool(tool, args)
            .await
            .map_err(|e| invocation_error(provider, tool, e))
    }

    /// Read a resource from the connected provider `provider`.
    pub async fn read_resource(&self, provider: &str, uri: &str) -> Result<Value, ProviderError> {
        let transport = self.inner.ready_transport(provider).await?;
        tracing::debug!(provider, uri, "Reading resource");

        transport
            .read_resource(uri)
            .await
            .map_err(|e| invocation_error(provider, uri, e))
    }

    /// Fetch a prompt from the connected provider `provider`.
    pub async fn get_prompt(
        &self,
        provider: &str,
        prompt: &str,
        args: Value,
    ) -> Result<Value, ProviderError> {
        let transport = self.inner.ready_transport(provider).await?;
        tracing::debug!(provider, prompt, "Fetching prompt");

        transport
            .get_prompt(prompt, args)
            .await
            .map_err(|e| invocation_error(provider, prompt, e))
    }

    /// Health snapshot for every known provider, sorted by name
    pub async fn get_status(&self) -> BTreeMap<String, ProviderStatus> {
        self.inner
            .sessions
            .read()
            .await
            .iter()
            .map(|(name, session)| (name.clone(), session.status()))
            .collect()
    }

    /// Providers with their advertised capabilities, sorted by name
    pub async fn list_providers(&self) -> Vec<ProviderInfo> {
        let mut providers: Vec<ProviderInfo> = self
            .inner
            .sessions
            .read()
            .await
            .values()
            .map(ProviderSession::info)
            .collect();
        providers.sort_by(|a, b| a.name.cmp(&b.name));
        providers
    }

    /// Current state of `name`, if the registry knows it
    pub async fn state(&self, name: &str) -> Option<ConnectionState> {
        self.inner.sessions.read().await.get(name).map(|s| s.state)
    }

    pub async fn is_connected(&self, name: &str) -> bool {
        self.state(name).await == Some(ConnectionState::Connected)
    }

    /// Whether a reconnect timer is pending for `name`
    pub async fn has_pending_reconnect(&self, name: &str) -> bool {
        self.inner
            .sessions
            .read()
            .await
            .get(name)
            .and_then(|s| s.reconnect_timer.as_ref())
            .is_some_and(|timer| !timer.is_finished())
    }
}

fn invocation_error(provider: &str, operation: &str, err: ProviderError) -> ProviderError {
    ProviderError::Invocation {
        provider: provider.to_string(),
        operation: operation.to_string(),
        message: err.to_string(),
    }
}

type Established = (
    Arc<dyn ProviderTransport>,
    CapabilityManifest,
    mpsc::UnboundedReceiver<TransportEvent>,
);

impl RegistryInner {
    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn emit(&self, event: ProviderEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    /// Open a transport, handshake and list capabilities. No locks held.
    async fn establish(&self, config: &ProviderConfig) -> Result<Established, ProviderError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = self
            .connector
            .connect(config, tx)
            .await
            .map_err(|e| match e {
                ProviderError::Connection { .. } => e,
                other => ProviderError::Connection {
                    provider: config.name.clone(),
                    message: other.to_string(),
                },
            })?;

        let capabilities = list_capabilities(&config.name, transport.as_ref()).await;
        Ok((transport, capabilities, rx))
    }

    /// Stop a session's tasks and close its transport, best effort.
    async fn release(&self, mut session: ProviderSession) {
        session.cancel_tasks();
        if let Some(transport) = session.transport.take() {
            if let Err(e) = transport.close().await {
                tracing::warn!(provider = %session.name, error = %e, "Error while closing transport");
            }
        }
    }

    async fn ready_transport(&self, name: &str) -> Result<Arc<dyn ProviderTransport>, ProviderError> {
        let (transport, limiter) = {
            let sessions = self.sessions.read().await;
            match sessions.get(name) {
                Some(session) if session.state == ConnectionState::Connected => {
                    match &session.transport {
                        Some(transport) => (Arc::clone(transport), session.limiter.clone()),
                        None => return Err(ProviderError::NotConnected(name.to_string())),
                    }
                }
                _ => return Err(ProviderError::NotConnected(name.to_string())),
            }
        };

        if let Some(limiter) = limiter {
            limiter.until_ready().await;
        }
        Ok(transport)
    }

    fn spawn_monitor(
        self: &Arc<Self>,
        name: &str,
        generation: u64,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> JoinHandle<()> {
        let inner = Arc::clone(self);
        let name = name.to_string();
        tokio::spawn(async move {
            if let Some(event) = events.recv().await {
                inner.connection_lost(&name, generation, event).await;
            }
        })
    }

    /// A connected transport reported closure or error.
    async fn connection_lost(self: &Arc<Self>, name: &str, generation: u64, event: TransportEvent) {
        if self.shutting_down.load(Ordering::SeqCst) {
            return;
        }

        let dead = {
            let mut sessions = self.sessions.write().await;
            let Some(session) = sessions.get_mut(name) else {
                return;
            };
            if session.generation != generation || session.state != ConnectionState::Connected {
                tracing::debug!(provider = %name, %event, "Ignoring event from stale transport");
                return;
            }

            match &event {
                TransportEvent::Closed => tracing::warn!(provider = %name, "Connection lost"),
                TransportEvent::Error(message) => {
                    tracing::error!(provider = %name, error = %message, "Transport error")
                }
            }
            session.last_error = Some(event.to_string());
            // this task is the monitor; dropping the handle does not abort it
            session.monitor = None;
            let dead = session.transport.take();
            self.schedule_reconnect(session);
            dead
        };

        if let Some(transport) = dead {
            if let Err(e) = transport.close().await {
                tracing::debug!(provider = %name, error = %e, "Error closing lost transport");
            }
        }
    }

    /// Arm a reconnect timer, or mark the session failed once attempts run out.
    fn schedule_reconnect(self: &Arc<Self>, session: &mut ProviderSession) {
        if self.shutting_down.load(Ordering::SeqCst) {
            return;
        }

        if session.reconnect_attempts >= session.policy.max_attempts {
            session.transition(ConnectionState::Failed);
            session.reconnect_timer = None;
            tracing::error!(
                provider = %session.name,
                attempts = session.reconnect_attempts,
                "Giving up on reconnecting"
            );
            self.emit(ProviderEvent::ReconnectFailed {
                name: session.name.clone(),
            });
            return;
        }

        session.reconnect_attempts += 1;
        session.transition(ConnectionState::Reconnecting);

        let attempt = session.reconnect_attempts;
        let delay = session.policy.delay();
        tracing::info!(
            provider = %session.name,
            attempt,
            max_attempts = session.policy.max_attempts,
            delay_ms = delay.as_millis() as u64,
            "Scheduling reconnect"
        );
        self.emit(ProviderEvent::Reconnecting {
            name: session.name.clone(),
            attempt,
        });

        let inner = Arc::clone(self);
        let name = session.name.clone();
        session.reconnect_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.attempt_reconnect(name).await;
        }));
    }

    /// Runs when a reconnect timer fires. Boxed so `schedule_reconnect` can spawn it.
    fn attempt_reconnect(self: Arc<Self>, name: String) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            if self.shutting_down.load(Ordering::SeqCst) {
                return;
            }

            let config = {
                let sessions = self.sessions.read().await;
                match sessions.get(&name) {
                    Some(s) if s.state == ConnectionState::Reconnecting => s.config.clone(),
                    _ => return,
                }
            };

            tracing::info!(provider = %name, "Attempting reconnect");
            let established = self.establish(&config).await;

            let mut sessions = self.sessions.write().await;
            let Some(session) = sessions
                .get_mut(&name)
                .filter(|s| s.state == ConnectionState::Reconnecting)
            else {
                drop(sessions);
                if let Ok((transport, _, _)) = established {
                    let _ = transport.close().await;
                }
                return;
            };

            match established {
                Ok((transport, capabilities, events)) => {
                    let generation = self.next_generation();
                    session.reconnect_timer = None;
                    session.install(transport, capabilities.clone(), generation);
                    session.monitor = Some(self.spawn_monitor(&name, generation, events));
                    drop(sessions);

                    tracing::info!(provider = %name, "Reconnected");
                    self.emit(ProviderEvent::Connected {
                        name,
                        capabilities,
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        provider = %name,
                        attempt = session.reconnect_attempts,
                        error = %e,
                        "Reconnect attempt failed"
                    );
                    session.last_error = Some(e.to_string());
                    self.schedule_reconnect(session);
                }
            }
        })
    }
}

/// List each capability kind independently; a failed kind is left `None`.
async fn list_capabilities(name: &str, transport: &dyn ProviderTransport) -> CapabilityManifest {
    let (tools, resources, prompts) = tokio::join!(
        transport.list_tools(),
        transport.list_resources(),
        transport.list_prompts()
    );

    fn keep<T>(name: &str, kind: &str, listed: Result<Vec<T>, ProviderError>) -> Option<Vec<T>> {
        match listed {
            Ok(items) => Some(items),
            Err(e) => {
                tracing::debug!(provider = %name, kind, error = %e, "Capability listing failed");
                None
            }
        }
    }

    CapabilityManifest {
        tools: keep(name, "tools", tools),
        resources: keep(name, "resources", resources),
        prompts: keep(name, "prompts", prompts),
    }
}
