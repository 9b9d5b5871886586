//! Search adapters: per-provider request builders and response parsers.
//!
//! Each adapter knows which provider tool to call for a query and how to turn
//! the tool's raw output into [`SearchResult`]s. The [`AdapterTable`] maps
//! each [`SearchType`] to the adapters it fans out to.

mod docs;
mod files;
mod github;
mod web;

pub use docs::DocsAdapter;
pub use files::FilesystemAdapter;
pub use github::{GithubCodeAdapter, GithubRepoAdapter};
pub use web::{parse_duckduckgo_html, parse_google_html, HeadlessWebAdapter, RenderWebAdapter};

use crate::config::Config;
use crate::models::{SearchQuery, SearchResult, SearchType};
use crate::providers::ProviderError;
use crate::utils::HttpClient;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Default number of hits requested from a provider when the query sets no cap
pub const DEFAULT_PROVIDER_RESULTS: usize = 10;

/// Turns a query into a provider tool call and the tool output into results
#[async_trait]
pub trait SearchAdapter: Send + Sync + fmt::Debug {
    /// Unique identifier, e.g. `github-repo`
    fn id(&self) -> &str;

    /// Name of the provider session to invoke
    fn provider(&self) -> &str;

    /// Tool to call on the provider
    fn tool(&self) -> &str;

    /// Tool arguments for `query`
    fn build_request(&self, query: &SearchQuery) -> Value;

    /// Normalize raw tool output. Malformed or partial output yields fewer
    /// results, never an error.
    fn parse_response(&self, raw: &Value) -> Vec<SearchResult>;

    /// Raw output obtained without the provider, used when the provider has
    /// no live session. `None` means the adapter has no fallback.
    async fn fallback(&self, _query: &SearchQuery) -> Option<Result<Value, ProviderError>> {
        None
    }
}

/// Routing from search type to adapters
#[derive(Debug, Clone, Default)]
pub struct AdapterTable {
    routes: HashMap<SearchType, Vec<Arc<dyn SearchAdapter>>>,
}

impl AdapterTable {
    /// An empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// The default routing for the configured providers.
    ///
    /// - `web`: rendered Google scrape, headless browser (DuckDuckGo fallback)
    /// - `github`: repository and code search
    /// - `files`: one adapter per allowed filesystem root
    /// - `docs`: documentation search
    /// - `code`: GitHub code search plus the filesystem adapters
    pub fn from_config(config: &Config, http: HttpClient) -> Self {
        let github_per_page = config
            .providers
            .get("github")
            .and_then(|p| p.limit_u64("max_results"))
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_PROVIDER_RESULTS);

        let github_code: Arc<dyn SearchAdapter> = Arc::new(GithubCodeAdapter::new(github_per_page));
        let files: Vec<Arc<dyn SearchAdapter>> = config
            .allowed_paths()
            .into_iter()
            .map(|root| Arc::new(FilesystemAdapter::new(root)) as Arc<dyn SearchAdapter>)
            .collect();

        let mut table = Self::new();
        table.register(SearchType::Web, Arc::new(RenderWebAdapter::new()));
        table.register(SearchType::Web, Arc::new(HeadlessWebAdapter::new(http)));
        table.register(SearchType::Github, Arc::new(GithubRepoAdapter::new(github_per_page)));
        table.register(SearchType::Github, Arc::clone(&github_code));
        for adapter in &files {
            table.register(SearchType::Files, Arc::clone(adapter));
        }
        table.register(SearchType::Docs, Arc::new(DocsAdapter::new()));
        table.register(SearchType::Code, github_code);
        for adapter in files {
            table.register(SearchType::Code, adapter);
        }
        table
    }

    /// Route `search_type` to `adapter`. `All` is derived and cannot be
    /// registered directly.
    pub fn register(&mut self, search_type: SearchType, adapter: Arc<dyn SearchAdapter>) {
        if search_type == SearchType::All {
            tracing::warn!(adapter = adapter.id(), "Ignoring registration for derived type 'all'");
            return;
        }
        self.routes.entry(search_type).or_default().push(adapter);
    }

    /// Adapters for `search_type`, in registration order. `All` is the union
    /// of every concrete type, de-duplicated by adapter id.
    pub fn resolve(&self, search_type: SearchType) -> Vec<Arc<dyn SearchAdapter>> {
        let types = match search_type {
            SearchType::All => SearchType::CONCRETE.to_vec(),
            other => vec![other],
        };

        let mut seen = HashSet::new();
        types
            .iter()
            .filter_map(|t| self.routes.get(t))
            .flatten()
            .filter(|adapter| seen.insert(adapter.id().to_string()))
            .cloned()
            .collect()
    }

    /// Every distinct adapter id
    pub fn adapter_ids(&self) -> Vec<String> {
        self.resolve(SearchType::All)
            .iter()
            .map(|a| a.id().to_string())
            .collect()
    }
}

/// Unwrap an MCP tool result into the payload adapters parse.
///
/// Tool results arrive as `{"content": [{"type": "text", "text": ...}]}`.
/// Text blocks are joined and parsed as JSON when possible, otherwise the
/// text is returned as a string. `structuredContent` wins when present.
/// Anything else is passed through unchanged.
pub fn tool_payload(raw: &Value) -> Value {
    if let Some(structured) = raw.get("structuredContent").filter(|v| !v.is_null()) {
        return structured.clone();
    }

    let Some(blocks) = raw.get("content").and_then(Value::as_array) else {
        return raw.clone();
    };

    let text: Vec<&str> = blocks
        .iter()
        .filter(|b| b.get("type").and_then(Value::as_str).unwrap_or("text") == "text")
        .filter_map(|b| b.get("text").and_then(Value::as_str))
        .collect();

    if text.is_empty() {
        return Value::Null;
    }
    let joined = text.join("\n");
    serde_json::from_str(&joined).unwrap_or(Value::String(joined))
}

/// String field or empty string
pub(crate) fn str_field<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or_default()
}

/// The array at `key`, or the value itself when it is an array
pub(crate) fn items<'a>(payload: &'a Value, key: &str) -> &'a [Value] {
    payload
        .get(key)
        .and_then(Value::as_array)
        .or_else(|| payload.as_array())
        .map(Vec::as_slice)
        .unwrap_or_default()
}

/// Merge per-provider filters from the query into `args`
pub(crate) fn with_filters(mut args: Value, query: &SearchQuery, provider: &str) -> Value {
    if let (Some(object), Some(extra)) = (args.as_object_mut(), query.options.filters.get(provider)) {
        merge(object, extra);
    }
    args
}

fn merge(target: &mut Map<String, Value>, extra: &Map<String, Value>) {
    for (key, value) in extra {
        target.insert(key.clone(), value.clone());
    }
}

/// Requested per-provider result count
pub(crate) fn requested(query: &SearchQuery, default: usize) -> usize {
    query.options.max_results.unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_payload_parses_json_text() {
        let raw = json!({"content": [{"type": "text", "text": "{\"items\": [1, 2]}"}]});
        assert_eq!(tool_payload(&raw), json!({"items": [1, 2]}));
    }

    #[test]
    fn test_tool_payload_keeps_plain_text() {
        let raw = json!({"content": [
            {"type": "text", "text": "/src/a.rs"},
            {"type": "image", "data": "..."},
            {"type": "text", "text": "/src/b.rs"}
        ]});
        assert_eq!(tool_payload(&raw), json!("/src/a.rs\n/src/b.rs"));
    }

    #[test]
    fn test_tool_payload_passthrough() {
        let raw = json!({"items": []});
        assert_eq!(tool_payload(&raw), raw);
        let structured = json!({"content": [], "structuredContent": {"ok": true}});
        assert_eq!(tool_payload(&structured), json!({"ok": true}));
    }

    #[test]
    fn test_items_accepts_bare_arrays() {
        assert_eq!(items(&json!([1, 2]), "results").len(), 2);
        assert_eq!(items(&json!({"results": [1]}), "results").len(), 1);
        assert!(items(&json!({"other": 1}), "results").is_empty());
    }

    #[test]
    fn test_with_filters_merges_provider_arguments() {
        let query = SearchQuery::new("q", SearchType::Github).with_options(
            crate::models::SearchOptions::new()
                .filter("github", "sort", "stars")
                .filter("context7", "framework", "react"),
        );
        let args = with_filters(json!({"query": "q"}), &query, "github");
        assert_eq!(args, json!({"query": "q", "sort": "stars"}));
    }

    fn table() -> AdapterTable {
        let config = Config::default();
        AdapterTable::from_config(&config, HttpClient::new())
    }

    fn ids(adapters: &[Arc<dyn SearchAdapter>]) -> Vec<String> {
        adapters.iter().map(|a| a.id().to_string()).collect()
    }

    #[test]
    fn test_default_routing() {
        let table = table();
        assert_eq!(ids(&table.resolve(SearchType::Web)), vec!["web-render", "web-headless"]);
        assert_eq!(
            ids(&table.resolve(SearchType::Github)),
            vec!["github-repo", "github-code"]
        );
        assert_eq!(ids(&table.resolve(SearchType::Docs)), vec!["docs"]);

        let code = ids(&table.resolve(SearchType::Code));
        assert_eq!(code[0], "github-code");
        assert!(code[1..].iter().all(|id| id.starts_with("files:")));
    }

    #[test]
    fn test_all_is_deduplicated_union() {
        let table = table();
        let all = ids(&table.resolve(SearchType::All));
        let unique: HashSet<_> = all.iter().collect();
        assert_eq!(all.len(), unique.len());
        assert!(all.contains(&"github-code".to_string()));
        assert!(all.contains(&"docs".to_string()));
    }

    #[test]
    fn test_empty_table_resolves_nothing() {
        assert!(AdapterTable::new().resolve(SearchType::All).is_empty());
    }
}
