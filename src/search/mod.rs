//! Federated search over MCP providers.
//!
//! A search fans out to every adapter routed for its [`SearchType`], waits
//! for all of them under one shared deadline, then de-duplicates, scores,
//! ranks and truncates the merged hits. Results are memoized in a
//! [`ResultCache`] and identical concurrent searches share one execution.
//!
//! ```rust,no_run
//! use mcp_search_hub::config::Config;
//! use mcp_search_hub::models::{SearchOptions, SearchType};
//! use mcp_search_hub::providers::{McpConnector, ProviderRegistry};
//! use mcp_search_hub::search::build_orchestrator;
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::default();
//! let registry = ProviderRegistry::new(Arc::new(McpConnector::new()), config.reconnect);
//! registry.init(config.provider_configs()).await;
//!
//! let hub = build_orchestrator(&config, registry.clone());
//! let outcome = hub
//!     .search("react hooks", SearchType::Github, SearchOptions::new().max_results(5))
//!     .await?;
//! for result in &outcome.results {
//!     println!("{:>5.1} {}", result.score, result.title);
//! }
//! registry.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod adapters;
mod dedup;
mod enrich;
mod orchestrator;
mod scoring;

pub use adapters::{AdapterTable, SearchAdapter};
pub use dedup::deduplicate;
pub use enrich::{Enricher, LlmEnricher};
pub use orchestrator::SearchOrchestrator;
pub use scoring::{rank, relevance_score, source_weight};

use crate::config::Config;
use crate::models::{SearchOptions, SearchOutcome, SearchQuery, SearchType};
use crate::providers::ProviderRegistry;
use crate::utils::{HistoryService, HttpClient, ResultCache};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Errors surfaced by a search. Provider failures are not errors; they are
/// recorded on the outcome.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SearchError {
    /// The request itself is unusable (empty query, zero result cap, ...)
    #[error("Invalid search request: {0}")]
    Validation(String),

    /// The enricher failed or returned something unusable. Never reaches
    /// `search` callers; the unenriched ranking is returned instead.
    #[error("Enrichment failed: {0}")]
    Enrichment(String),
}

/// What a search sink is told after each completed search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRecord {
    pub query: String,
    #[serde(rename = "type")]
    pub search_type: SearchType,
    #[serde(default)]
    pub options: SearchOptions,
    pub result_count: usize,
    pub elapsed_ms: u64,
    #[serde(default)]
    pub cached: bool,
    #[serde(default)]
    pub failed_providers: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl SearchRecord {
    pub fn new(query: &SearchQuery, outcome: &SearchOutcome) -> Self {
        Self {
            query: query.text.clone(),
            search_type: query.search_type,
            options: query.options.clone(),
            result_count: outcome.results.len(),
            elapsed_ms: outcome.elapsed_ms,
            cached: outcome.cached,
            failed_providers: outcome
                .provider_failures
                .iter()
                .map(|f| f.adapter.clone())
                .collect(),
            timestamp: Utc::now(),
        }
    }
}

/// Receives a record of every completed search. Called fire-and-forget;
/// implementations handle their own errors.
#[async_trait]
pub trait SearchSink: Send + Sync + fmt::Debug {
    async fn record(&self, record: SearchRecord);
}

/// Wire an orchestrator from configuration: default adapters, a cache with
/// the configured TTL, the LLM enricher when enabled and the history sink
/// when enabled.
pub fn build_orchestrator(config: &Config, registry: ProviderRegistry) -> SearchOrchestrator {
    let http = HttpClient::new();
    let adapters = AdapterTable::from_config(config, HttpClient::browser());
    let cache = Arc::new(ResultCache::new(config.cache_ttl()));

    let mut orchestrator = SearchOrchestrator::new(registry, adapters, cache, &config.search);

    if config.enrichment.enabled {
        match LlmEnricher::from_config(&config.enrichment, &config.search, http) {
            Some(enricher) => orchestrator = orchestrator.with_enricher(Arc::new(enricher)),
            None => tracing::debug!("No enrichment API key configured"),
        }
    }

    if config.history.enabled {
        let history = match &config.history.path {
            Some(path) => HistoryService::with_path(path),
            None => HistoryService::new(),
        };
        orchestrator = orchestrator.with_sink(Arc::new(history));
    }

    orchestrator
}
