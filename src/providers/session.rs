//! Per-provider session record kept by the registry.

use super::transport::ProviderTransport;
use crate::models::{
    CapabilityManifest, ConnectionState, ProviderConfig, ProviderInfo, ProviderStatus,
    ReconnectPolicy,
};
use chrono::{DateTime, Utc};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Debug)]
pub(crate) struct ProviderSession {
    pub name: String,
    pub config: ProviderConfig,
    pub policy: ReconnectPolicy,
    pub state: ConnectionState,
    pub capabilities: CapabilityManifest,
    pub reconnect_attempts: u32,
    pub last_error: Option<String>,
    pub last_connected_at: Option<DateTime<Utc>>,
    /// Tags the current transport; events from older transports are ignored
    pub generation: u64,
    pub transport: Option<Arc<dyn ProviderTransport>>,
    pub limiter: Option<Arc<DefaultDirectRateLimiter>>,
    pub monitor: Option<JoinHandle<()>>,
    pub reconnect_timer: Option<JoinHandle<()>>,
}

impl ProviderSession {
    /// A fresh record in the `Connecting` state
    pub fn connecting(config: ProviderConfig, policy: ReconnectPolicy, generation: u64) -> Self {
        let mut session = Self {
            name: config.name.clone(),
            limiter: build_limiter(&config),
            config,
            policy,
            state: ConnectionState::Disconnected,
            capabilities: CapabilityManifest::default(),
            reconnect_attempts: 0,
            last_error: None,
            last_connected_at: None,
            generation,
            transport: None,
            monitor: None,
            reconnect_timer: None,
        };
        session.transition(ConnectionState::Connecting);
        session
    }

    /// Move to `next` if the lifecycle allows it.
    pub fn transition(&mut self, next: ConnectionState) -> bool {
        if self.state == next {
            return true;
        }
        if !self.state.can_transition_to(next) {
            tracing::warn!(
                provider = %self.name,
                from = %self.state,
                to = %next,
                "Ignoring invalid state transition"
            );
            return false;
        }
        tracing::debug!(provider = %self.name, from = %self.state, to = %next, "State change");
        self.state = next;
        true
    }

    /// Install a freshly handshaken transport and mark the session connected.
    pub fn install(
        &mut self,
        transport: Arc<dyn ProviderTransport>,
        capabilities: CapabilityManifest,
        generation: u64,
    ) {
        self.transport = Some(transport);
        self.capabilities = capabilities;
        self.generation = generation;
        self.reconnect_attempts = 0;
        self.last_connected_at = Some(Utc::now());
        self.transition(ConnectionState::Connected);
    }

    /// Abort the monitor and any pending reconnect timer.
    pub fn cancel_tasks(&mut self) {
        if let Some(monitor) = self.monitor.take() {
            monitor.abort();
        }
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
    }

    pub fn status(&self) -> ProviderStatus {
        ProviderStatus {
            connected: self.state == ConnectionState::Connected,
            state: self.state,
            reconnect_attempts: self.reconnect_attempts,
            last_error: self.last_error.clone(),
            last_connected_at: self.last_connected_at,
        }
    }

    pub fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: self.name.clone(),
            state: self.state,
            transport: self.config.transport.kind().to_string(),
            capabilities: self.capabilities.clone(),
        }
    }
}

/// Build the per-provider limiter from `limits.requests_per_second`.
fn build_limiter(config: &ProviderConfig) -> Option<Arc<DefaultDirectRateLimiter>> {
    let rps = config.requests_per_second()?;

    let quota = if rps >= 1.0 {
        NonZeroU32::new(rps.floor() as u32).map(Quota::per_second)
    } else {
        match Duration::try_from_secs_f64(1.0 / rps) {
            Ok(period) => Quota::with_period(period),
            Err(e) => {
                tracing::warn!(
                    provider = %config.name,
                    rps,
                    error = %e,
                    "Ignoring unusable requests_per_second limit"
                );
                None
            }
        }
    }?;

    tracing::debug!(provider = %config.name, rps, "Rate limiting provider");
    Some(Arc::new(RateLimiter::direct(quota)))
}
