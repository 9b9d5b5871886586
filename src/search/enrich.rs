//! Best-effort LLM annotation of ranked results.

use super::SearchError;
use crate::config::{EnrichmentConfig, SearchConfig};
use crate::models::{SearchQuery, SearchResult};
use crate::utils::{with_retry, HttpClient, RetryConfig};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::fmt;

/// `anthropic-version` header sent with every request
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Annotates a ranked result list. Implementations return the same results in
/// the same order, or an error; the orchestrator falls back to the
/// unannotated list on error.
#[async_trait]
pub trait Enricher: Send + Sync + fmt::Debug {
    async fn enrich(
        &self,
        query: &SearchQuery,
        results: &[SearchResult],
    ) -> Result<Vec<SearchResult>, SearchError>;
}

/// Enricher backed by an Anthropic-style Messages endpoint
#[derive(Debug, Clone)]
pub struct LlmEnricher {
    http: HttpClient,
    endpoint: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    retry: RetryConfig,
}

impl LlmEnricher {
    pub fn new(
        http: HttpClient,
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        let defaults = EnrichmentConfig::default();
        Self {
            http,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            model: model.into(),
            max_tokens: defaults.max_tokens,
            retry: RetryConfig::default(),
        }
    }

    /// `None` when enrichment is disabled or no API key is available
    pub fn from_config(
        enrichment: &EnrichmentConfig,
        search: &SearchConfig,
        http: HttpClient,
    ) -> Option<Self> {
        if !enrichment.enabled {
            return None;
        }
        let api_key = enrichment.api_key()?;
        Some(
            Self::new(http, &enrichment.endpoint, api_key, &enrichment.model)
                .with_max_tokens(enrichment.max_tokens)
                .with_retry_config(search.retry_config()),
        )
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn prompt(query: &SearchQuery, results: &[SearchResult]) -> String {
        let listing: Vec<Value> = results
            .iter()
            .map(|r| {
                json!({
                    "url": r.url,
                    "title": r.title,
                    "snippet": r.snippet,
                    "source": r.source,
                })
            })
            .collect();
        let listing = serde_json::to_string_pretty(&listing).unwrap_or_default();

        format!(
            "Analyze these search results for the query \"{}\".\n\n{}\n\n\
             For each result, in the same order, return an object with:\n\
             - \"url\": the result's url, unchanged\n\
             - \"relevance\": a relevance rating from 0 to 10\n\
             - \"summary\": an improved one-sentence summary\n\
             - \"tags\": a short list of topical tags\n\
             - \"usage\": a suggestion for how to use the result\n\n\
             Respond with only a JSON array.",
            query.trimmed(),
            listing
        )
    }

    async fn complete(&self, prompt: String) -> Result<Value, reqwest::Error> {
        let body = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "messages": [{"role": "user", "content": prompt}],
        });

        with_retry(self.retry, || async {
            self.http
                .client()
                .post(&self.endpoint)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&body)
                .send()
                .await?
                .error_for_status()?
                .json::<Value>()
                .await
        })
        .await
    }
}

#[async_trait]
impl Enricher for LlmEnricher {
    async fn enrich(
        &self,
        query: &SearchQuery,
        results: &[SearchResult],
    ) -> Result<Vec<SearchResult>, SearchError> {
        if results.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .complete(Self::prompt(query, results))
            .await
            .map_err(|e| SearchError::Enrichment(e.to_string()))?;

        let text = response
            .pointer("/content/0/text")
            .and_then(Value::as_str)
            .ok_or_else(|| SearchError::Enrichment("response has no text content".to_string()))?;

        let annotations: Vec<Value> = serde_json::from_str(strip_code_fence(text))
            .map_err(|e| SearchError::Enrichment(format!("response is not a JSON array: {}", e)))?;

        merge_annotations(results, &annotations)
    }
}

/// Strip a surrounding markdown code fence, if any
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(body) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // drop the language tag line
    let body = body.split_once('\n').map(|(_, rest)| rest).unwrap_or(body);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Attach annotations to `results` as `ai_*` metadata.
///
/// The annotation list must line up with the results one to one, matched by
/// url, otherwise the whole response is rejected.
fn merge_annotations(
    results: &[SearchResult],
    annotations: &[Value],
) -> Result<Vec<SearchResult>, SearchError> {
    if annotations.len() != results.len() {
        return Err(SearchError::Enrichment(format!(
            "expected {} annotations, got {}",
            results.len(),
            annotations.len()
        )));
    }

    results
        .iter()
        .zip(annotations)
        .map(|(result, annotation)| {
            let url = annotation.get("url").and_then(Value::as_str);
            if url.map(str::trim) != Some(result.url.trim()) {
                return Err(SearchError::Enrichment(format!(
                    "annotation url {:?} does not match '{}'",
                    url, result.url
                )));
            }

            let field = |key: &str| annotation.get(key).cloned().unwrap_or(Value::Null);
            Ok(result
                .clone()
                .meta("ai_relevance", field("relevance"))
                .meta("ai_summary", field("summary"))
                .meta("ai_tags", field("tags"))
                .meta("ai_usage", field("usage")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SearchType;
    use mockito::Matcher;
    use std::time::Duration;

    fn results() -> Vec<SearchResult> {
        vec![
            SearchResult::new("Tokio", "https://tokio.rs", "web"),
            SearchResult::new("async-std", "https://async.rs", "web"),
        ]
    }

    fn enricher(server: &mockito::Server) -> LlmEnricher {
        LlmEnricher::new(
            HttpClient::new(),
            format!("{}/v1/messages", server.url()),
            "test-key",
            "test-model",
        )
        .with_retry_config(RetryConfig::new(1, Duration::from_millis(1)))
    }

    fn reply(text: &str) -> String {
        json!({"content": [{"type": "text", "text": text}]}).to_string()
    }

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(strip_code_fence("```json\n[1]\n```"), "[1]");
        assert_eq!(strip_code_fence("  [1] "), "[1]");
    }

    #[test]
    fn test_merge_rejects_mismatched_urls() {
        let annotations = vec![json!({"url": "https://tokio.rs"}), json!({"url": "https://other"})];
        assert!(matches!(
            merge_annotations(&results(), &annotations),
            Err(SearchError::Enrichment(_))
        ));
    }

    #[tokio::test]
    async fn test_enrich_annotates_results() {
        let mut server = mockito::Server::new_async().await;
        let text = json!([
            {"url": "https://tokio.rs", "relevance": 9, "summary": "Async runtime", "tags": ["async"]},
            {"url": "https://async.rs", "relevance": 6, "summary": "Alternative runtime", "tags": []}
        ])
        .to_string();
        let mock = server
            .mock("POST", "/v1/messages")
            .match_header("x-api-key", "test-key")
            .match_header("anthropic-version", ANTHROPIC_VERSION)
            .match_body(Matcher::PartialJson(json!({"model": "test-model"})))
            .with_body(reply(&format!("```json\n{}\n```", text)))
            .create_async()
            .await;

        let query = SearchQuery::new("rust async", SearchType::All);
        let enriched = enricher(&server).enrich(&query, &results()).await.unwrap();

        assert_eq!(enriched.len(), 2);
        assert_eq!(enriched[0].metadata["ai_relevance"], 9);
        assert_eq!(enriched[1].metadata["ai_summary"], "Alternative runtime");
        assert!(!enriched[0].metadata.contains_key("ai_usage"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_enrich_rejects_wrong_length() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/messages")
            .with_body(reply(r#"[{"url": "https://tokio.rs"}]"#))
            .create_async()
            .await;

        let query = SearchQuery::new("rust", SearchType::All);
        let result = enricher(&server).enrich(&query, &results()).await;
        assert!(matches!(result, Err(SearchError::Enrichment(_))));
    }

    #[tokio::test]
    async fn test_enrich_client_error_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/messages")
            .with_status(401)
            .expect(1)
            .create_async()
            .await;

        let query = SearchQuery::new("rust", SearchType::All);
        assert!(enricher(&server).enrich(&query, &results()).await.is_err());
        mock.assert_async().await;
    }

    #[test]
    fn test_from_config_requires_key() {
        let search = SearchConfig::default();
        let disabled = EnrichmentConfig {
            enabled: false,
            api_key: Some("k".to_string()),
            ..EnrichmentConfig::default()
        };
        assert!(LlmEnricher::from_config(&disabled, &search, HttpClient::new()).is_none());

        let keyed = EnrichmentConfig {
            api_key: Some("k".to_string()),
            ..EnrichmentConfig::default()
        };
        assert!(LlmEnricher::from_config(&keyed, &search, HttpClient::new()).is_some());
    }
}
