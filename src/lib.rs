//! # MCP Search Hub
//!
//! Federated search over pluggable MCP provider sessions: web pages, GitHub,
//! local files and documentation, merged into one ranked result list.
//!
//! ## Architecture
//!
//! - [`providers`]: provider transports and the [`ProviderRegistry`] that owns
//!   connection lifecycles, reconnects and health
//! - [`search`]: adapters, de-duplication, scoring and the
//!   [`SearchOrchestrator`] that fans a query out and merges the replies
//! - [`models`]: queries, results, outcomes and provider configuration
//! - [`utils`]: result cache with single-flight, HTTP client, retry, history
//! - [`mcp`]: MCP server exposing the hub as tools
//! - [`config`]: configuration management

pub mod config;
pub mod mcp;
pub mod models;
pub mod providers;
pub mod search;
pub mod ui;
pub mod utils;

// Re-export commonly used types
pub use models::{SearchOptions, SearchOutcome, SearchQuery, SearchResult, SearchType};
pub use providers::{ProviderError, ProviderRegistry};
pub use search::{SearchError, SearchOrchestrator};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
