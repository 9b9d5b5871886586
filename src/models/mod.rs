//! Core data models for providers and search operations.

mod provider;
mod search;

pub use provider::{
    CapabilityKinds, CapabilityManifest, ConnectionState, PromptDescriptor, ProviderConfig,
    ProviderInfo, ProviderStatus, ReconnectPolicy, ResourceDescriptor, ToolDescriptor,
    TransportConfig, DEFAULT_CONNECT_TIMEOUT,
};
pub use search::{
    FailureKind, ProviderFailure, SearchOptions, SearchOutcome, SearchQuery, SearchResult,
    SearchType,
};
