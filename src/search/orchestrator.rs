//! Fan-out, merge and ranking of a search across provider adapters.

use super::adapters::{AdapterTable, SearchAdapter};
use super::{deduplicate, rank, Enricher, SearchError, SearchRecord, SearchSink};
use crate::config::SearchConfig;
use crate::models::{
    FailureKind, ProviderFailure, SearchOptions, SearchOutcome, SearchQuery, SearchResult,
    SearchType,
};
use crate::providers::{ProviderError, ProviderRegistry};
use crate::utils::{cache_key, ResultCache};
use futures_util::future::join_all;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Runs searches against the providers held by a [`ProviderRegistry`].
///
/// Cloning is cheap; clones share the registry, cache, enricher and sink.
#[derive(Debug, Clone)]
pub struct SearchOrchestrator {
    registry: ProviderRegistry,
    adapters: Arc<AdapterTable>,
    cache: Arc<ResultCache>,
    defaults: SearchConfig,
    enricher: Option<Arc<dyn Enricher>>,
    sink: Option<Arc<dyn SearchSink>>,
}

impl SearchOrchestrator {
    pub fn new(
        registry: ProviderRegistry,
        adapters: AdapterTable,
        cache: Arc<ResultCache>,
        defaults: &SearchConfig,
    ) -> Self {
        Self {
            registry,
            adapters: Arc::new(adapters),
            cache,
            defaults: *defaults,
            enricher: None,
            sink: None,
        }
    }

    /// Annotate results with `enricher` when a query asks for enrichment
    pub fn with_enricher(mut self, enricher: Arc<dyn Enricher>) -> Self {
        self.enricher = Some(enricher);
        self
    }

    /// Report every completed search to `sink`
    pub fn with_sink(mut self, sink: Arc<dyn SearchSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn adapters(&self) -> &AdapterTable {
        &self.adapters
    }

    /// Search for `text` across every adapter routed for `search_type`.
    ///
    /// Only [`SearchError::Validation`] is ever returned. Provider failures
    /// and timeouts are recorded on the outcome, so a search where every
    /// provider failed is an empty, successful outcome.
    pub async fn search(
        &self,
        text: impl Into<String>,
        search_type: SearchType,
        options: SearchOptions,
    ) -> Result<SearchOutcome, SearchError> {
        self.execute(SearchQuery::new(text, search_type).with_options(options))
            .await
    }

    /// Like [`search`](Self::search), for a prepared query
    pub async fn execute(&self, query: SearchQuery) -> Result<SearchOutcome, SearchError> {
        validate(&query)?;

        let key = cache_key(&query, self.max_results(&query));
        if let Some(mut outcome) = self.cache.get(&key).await {
            tracing::debug!(query = %query.text, search_type = %query.search_type, "Cache hit");
            outcome.cached = true;
            self.notify(&query, &outcome);
            return Ok(outcome);
        }
        tracing::debug!(query = %query.text, search_type = %query.search_type, "Cache miss");

        let this = self.clone();
        let flight_query = query.clone();
        let flight_key = key.clone();
        let outcome = self
            .cache
            .with_single_flight(&key, move || async move {
                this.run(&flight_query, &flight_key).await
            })
            .await?;

        self.notify(&query, &outcome);
        Ok(outcome)
    }

    fn max_results(&self, query: &SearchQuery) -> usize {
        query.options.max_results.unwrap_or(self.defaults.max_results)
    }

    fn timeout(&self, query: &SearchQuery) -> Duration {
        query
            .options
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.defaults.timeout())
    }

    /// One full fan-out. Runs at most once per key at a time.
    async fn run(&self, query: &SearchQuery, key: &str) -> Result<SearchOutcome, SearchError> {
        // a previous flight for this key may have finished since the lookup
        if let Some(mut outcome) = self.cache.get(key).await {
            outcome.cached = true;
            return Ok(outcome);
        }

        let started = Instant::now();
        let timeout = self.timeout(query);
        let deadline = started + timeout;
        let adapters = self.adapters.resolve(query.search_type);

        tracing::info!(
            query = %query.text,
            search_type = %query.search_type,
            adapters = adapters.len(),
            timeout_ms = timeout.as_millis() as u64,
            "Starting search"
        );

        let settled = join_all(adapters.iter().map(|adapter| async move {
            let result = tokio::time::timeout_at(deadline, self.dispatch(adapter.as_ref(), query)).await;
            (adapter, result)
        }))
        .await;

        let mut merged: Vec<SearchResult> = Vec::new();
        let mut failures: Vec<ProviderFailure> = Vec::new();
        for (adapter, result) in settled {
            match result {
                Ok(Ok(raw)) => {
                    let parsed = adapter.parse_response(&raw);
                    tracing::debug!(adapter = adapter.id(), results = parsed.len(), "Adapter settled");
                    merged.extend(parsed);
                }
                Ok(Err(failure)) => failures.push(failure),
                Err(_) => failures.push(ProviderFailure {
                    adapter: adapter.id().to_string(),
                    provider: adapter.provider().to_string(),
                    kind: FailureKind::Timeout,
                    message: format!("no reply within {} ms", timeout.as_millis()),
                }),
            }
        }

        for failure in &failures {
            tracing::warn!(
                adapter = %failure.adapter,
                provider = %failure.provider,
                kind = %failure.kind,
                error = %failure.message,
                "Adapter failed"
            );
        }

        let mut results = rank(&query.terms(), deduplicate(merged));
        results.truncate(self.max_results(query));

        let mut enriched = false;
        if query.options.enrich {
            if let Some(enricher) = &self.enricher {
                match tokio::time::timeout(timeout, enricher.enrich(query, &results)).await {
                    Ok(Ok(annotated)) if same_results(&results, &annotated) => {
                        results = annotated;
                        enriched = true;
                    }
                    Ok(Ok(annotated)) => tracing::warn!(
                        expected = results.len(),
                        returned = annotated.len(),
                        "Enricher changed the result list; returning unenriched results"
                    ),
                    Ok(Err(e)) => {
                        tracing::warn!(error = %e, "Enrichment failed; returning unenriched results")
                    }
                    Err(_) => tracing::warn!("Enrichment timed out; returning unenriched results"),
                }
            }
        }

        let outcome = SearchOutcome {
            query: query.text.clone(),
            search_type: query.search_type,
            total_results: results.len(),
            results,
            elapsed_ms: started.elapsed().as_millis() as u64,
            provider_failures: failures,
            cached: false,
            enriched,
        };

        tracing::info!(
            query = %query.text,
            results = outcome.total_results,
            failures = outcome.provider_failures.len(),
            elapsed_ms = outcome.elapsed_ms,
            "Search complete"
        );

        self.cache.put(key, outcome.clone(), self.cache.ttl()).await;
        Ok(outcome)
    }

    /// Raw reply for one adapter: the provider's tool output when it has a
    /// live session, else the adapter's fallback.
    async fn dispatch(
        &self,
        adapter: &dyn SearchAdapter,
        query: &SearchQuery,
    ) -> Result<Value, ProviderFailure> {
        let provider = adapter.provider();
        let failure = |kind: FailureKind, message: String| ProviderFailure {
            adapter: adapter.id().to_string(),
            provider: provider.to_string(),
            kind,
            message,
        };

        if self.registry.is_connected(provider).await {
            return self
                .registry
                .invoke(provider, adapter.tool(), adapter.build_request(query))
                .await
                .map_err(|e| {
                    let kind = match e {
                        ProviderError::NotConnected(_) => FailureKind::NotConnected,
                        ProviderError::Timeout { .. } => FailureKind::Timeout,
                        _ => FailureKind::Invocation,
                    };
                    failure(kind, e.to_string())
                });
        }

        match adapter.fallback(query).await {
            Some(result) => {
                tracing::debug!(adapter = adapter.id(), provider, "Using adapter fallback");
                result.map_err(|e| failure(FailureKind::Invocation, e.to_string()))
            }
            None => Err(failure(
                FailureKind::NotConnected,
                format!("provider '{}' is not connected", provider),
            )),
        }
    }

    /// Fire-and-forget report to the sink
    fn notify(&self, query: &SearchQuery, outcome: &SearchOutcome) {
        if let Some(sink) = &self.sink {
            let sink = Arc::clone(sink);
            let record = SearchRecord::new(query, outcome);
            tokio::spawn(async move { sink.record(record).await });
        }
    }
}

/// Annotations may add metadata but must keep the ranked list as is
fn same_results(ranked: &[SearchResult], annotated: &[SearchResult]) -> bool {
    ranked.len() == annotated.len()
        && ranked
            .iter()
            .zip(annotated)
            .all(|(a, b)| a.identity() == b.identity())
}

fn validate(query: &SearchQuery) -> Result<(), SearchError> {
    if query.trimmed().is_empty() {
        return Err(SearchError::Validation("query must not be empty".to_string()));
    }
    if query.options.max_results == Some(0) {
        return Err(SearchError::Validation("maxResults must be at least 1".to_string()));
    }
    if query.options.timeout_ms == Some(0) {
        return Err(SearchError::Validation("timeoutMs must be at least 1".to_string()));
    }
    Ok(())
}
