//! Search request and response models.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Category of a federated search. Each category routes to a set of adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SearchType {
    Web,
    Github,
    Files,
    Docs,
    Code,
    #[default]
    All,
}

impl SearchType {
    /// Every concrete category, in the order `all` unions them.
    pub const CONCRETE: [SearchType; 5] = [
        SearchType::Web,
        SearchType::Github,
        SearchType::Files,
        SearchType::Docs,
        SearchType::Code,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SearchType::Web => "web",
            SearchType::Github => "github",
            SearchType::Files => "files",
            SearchType::Docs => "docs",
            SearchType::Code => "code",
            SearchType::All => "all",
        }
    }
}

impl fmt::Display for SearchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "web" => Ok(SearchType::Web),
            "github" => Ok(SearchType::Github),
            "files" | "file" => Ok(SearchType::Files),
            "docs" | "documentation" => Ok(SearchType::Docs),
            "code" => Ok(SearchType::Code),
            "all" | "" => Ok(SearchType::All),
            other => Err(format!(
                "unknown search type '{}' (expected web, github, files, docs, code or all)",
                other
            )),
        }
    }
}

/// Per-call search options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchOptions {
    /// Cap on returned results; falls back to the configured default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_results: Option<usize>,

    /// Overall fan-out timeout; falls back to the configured default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    /// Ask the enricher to annotate results
    #[serde(default)]
    pub enrich: bool,

    /// Extra request arguments keyed by provider name, merged into each
    /// adapter request for that provider
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub filters: BTreeMap<String, Map<String, Value>>,
}

impl SearchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum results
    pub fn max_results(mut self, max: usize) -> Self {
        self.max_results = Some(max);
        self
    }

    /// Set the overall timeout in milliseconds
    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Enable/disable enrichment
    pub fn enrich(mut self, enrich: bool) -> Self {
        self.enrich = enrich;
        self
    }

    /// Add a provider-specific request argument
    pub fn filter(
        mut self,
        provider: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.filters
            .entry(provider.into())
            .or_default()
            .insert(key.into(), value.into());
        self
    }
}

/// A search request as seen by the orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    /// Free text query
    pub text: String,

    /// Category to search
    #[serde(rename = "type", default)]
    pub search_type: SearchType,

    #[serde(default)]
    pub options: SearchOptions,
}

impl SearchQuery {
    /// Create a new search query
    pub fn new(text: impl Into<String>, search_type: SearchType) -> Self {
        Self {
            text: text.into(),
            search_type,
            options: SearchOptions::default(),
        }
    }

    /// Replace the options
    pub fn with_options(mut self, options: SearchOptions) -> Self {
        self.options = options;
        self
    }

    /// Lowercased, whitespace-collapsed query text.
    pub fn normalized_text(&self) -> String {
        self.text
            .split_whitespace()
            .map(str::to_lowercase)
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Lowercased query terms used for relevance scoring.
    pub fn terms(&self) -> Vec<String> {
        self.text.split_whitespace().map(str::to_lowercase).collect()
    }

    /// The query text with surrounding whitespace removed
    pub fn trimmed(&self) -> &str {
        self.text.trim()
    }
}

/// One normalized search hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,

    pub url: String,

    #[serde(default)]
    pub snippet: String,

    /// Source label such as `github-repo` or `documentation`
    pub source: String,

    /// Relevance score, always >= 0
    #[serde(default)]
    pub score: f64,

    /// 1-based position after ranking (0 before ranking)
    #[serde(default)]
    pub rank: usize,

    /// Popularity signal, e.g. GitHub stars
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub popularity: Option<f64>,

    /// Source-specific extras
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl SearchResult {
    /// Create a new result with empty snippet and metadata
    pub fn new(title: impl Into<String>, url: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            snippet: String::new(),
            source: source.into(),
            score: 0.0,
            rank: 0,
            popularity: None,
            metadata: Map::new(),
        }
    }

    /// Set the snippet
    pub fn snippet(mut self, snippet: impl Into<String>) -> Self {
        self.snippet = snippet.into();
        self
    }

    /// Set the popularity signal
    pub fn popularity(mut self, popularity: f64) -> Self {
        self.popularity = Some(popularity);
        self
    }

    /// Attach a metadata value; null values are skipped
    pub fn meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let value = value.into();
        if !value.is_null() {
            self.metadata.insert(key.into(), value);
        }
        self
    }

    /// Identity used for de-duplication: trimmed, lowercased (url, title).
    pub fn identity(&self) -> (String, String) {
        (
            self.url.trim().to_lowercase(),
            self.title.trim().to_lowercase(),
        )
    }
}

/// Why an adapter contributed nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The adapter did not settle before the overall deadline
    Timeout,
    /// The provider returned an error for the tool call
    Invocation,
    /// The provider had no live session and the adapter has no fallback
    NotConnected,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Timeout => f.write_str("timeout"),
            FailureKind::Invocation => f.write_str("invocation"),
            FailureKind::NotConnected => f.write_str("not connected"),
        }
    }
}

/// A provider failure recorded on a search outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderFailure {
    /// Adapter identifier, e.g. `github-repo`
    pub adapter: String,

    /// Provider the adapter targets
    pub provider: String,

    pub kind: FailureKind,

    pub message: String,
}

/// The aggregated answer to a search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchOutcome {
    /// Query text as submitted
    pub query: String,

    #[serde(rename = "type")]
    pub search_type: SearchType,

    /// Ranked results, best first
    pub results: Vec<SearchResult>,

    /// Number of results returned
    pub total_results: usize,

    /// Wall-clock time of the fan-out
    pub elapsed_ms: u64,

    /// Adapters that failed or timed out, in routing order
    #[serde(default)]
    pub provider_failures: Vec<ProviderFailure>,

    /// Served from the result cache
    #[serde(default)]
    pub cached: bool,

    /// Results carry enrichment annotations
    #[serde(default)]
    pub enriched: bool,
}

impl SearchOutcome {
    /// An outcome with no results and no failures
    pub fn empty(query: &SearchQuery) -> Self {
        Self {
            query: query.text.clone(),
            search_type: query.search_type,
            results: Vec::new(),
            total_results: 0,
            elapsed_ms: 0,
            provider_failures: Vec::new(),
            cached: false,
            enriched: false,
        }
    }

    /// Failures recorded for the given provider name
    pub fn failures_for<'a>(&'a self, provider: &'a str) -> impl Iterator<Item = &'a ProviderFailure> + 'a {
        self.provider_failures
            .iter()
            .filter(move |f| f.provider == provider)
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_type_parse() {
        assert_eq!("web".parse::<SearchType>().unwrap(), SearchType::Web);
        assert_eq!("GitHub".parse::<SearchType>().unwrap(), SearchType::Github);
        assert_eq!("documentation".parse::<SearchType>().unwrap(), SearchType::Docs);
        assert_eq!("".parse::<SearchType>().unwrap(), SearchType::All);
        assert!("papers".parse::<SearchType>().is_err());
    }

    #[test]
    fn test_query_terms_and_normalization() {
        let query = SearchQuery::new("  React   Hooks ", SearchType::Web);
        assert_eq!(query.terms(), vec!["react", "hooks"]);
        assert_eq!(query.normalized_text(), "react hooks");
        assert_eq!(query.trimmed(), "React   Hooks");
    }

    #[test]
    fn test_options_builder() {
        let options = SearchOptions::new()
            .max_results(5)
            .timeout_ms(1000)
            .enrich(true)
            .filter("github", "sort", "stars");

        assert_eq!(options.max_results, Some(5));
        assert_eq!(options.timeout_ms, Some(1000));
        assert!(options.enrich);
        assert_eq!(options.filters["github"]["sort"], "stars");
    }

    #[test]
    fn test_result_identity_ignores_case_and_whitespace() {
        let a = SearchResult::new(" React Hooks ", "https://Example.com/a", "web");
        let b = SearchResult::new("react hooks", "https://example.com/a ", "github-repo");
        assert_eq!(a.identity(), b.identity());
    }

    #[test]
    fn test_meta_skips_null() {
        let result = SearchResult::new("t", "u", "web")
            .meta("language", "Rust")
            .meta("missing", Value::Null);
        assert_eq!(result.metadata.len(), 1);
        assert_eq!(result.metadata["language"], "Rust");
    }

    #[test]
    fn test_outcome_serializes_camel_case() {
        let query = SearchQuery::new("rust", SearchType::Github);
        let outcome = SearchOutcome::empty(&query);
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["type"], "github");
        assert_eq!(json["totalResults"], 0);
        assert!(json["providerFailures"].as_array().unwrap().is_empty());
    }
}
