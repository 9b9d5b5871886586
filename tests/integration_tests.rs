//! End-to-end search behaviour over scripted providers.

use async_trait::async_trait;
use futures_util::future::join_all;
use mcp_search_hub::config::SearchConfig;
use mcp_search_hub::models::{
    ConnectionState, FailureKind, ProviderConfig, ReconnectPolicy, SearchOptions, SearchQuery,
    SearchResult, SearchType,
};
use mcp_search_hub::providers::{MockConnector, ProviderEvent, ProviderRegistry};
use mcp_search_hub::search::adapters::{DocsAdapter, GithubRepoAdapter};
use mcp_search_hub::search::{
    AdapterTable, SearchAdapter, SearchError, SearchOrchestrator, SearchRecord, SearchSink,
};
use mcp_search_hub::utils::ResultCache;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Adapter calling `search` on its provider and reading `{"results": [...]}`
#[derive(Debug)]
struct ScriptedAdapter {
    id: &'static str,
    provider: &'static str,
    source: &'static str,
}

impl ScriptedAdapter {
    fn new(id: &'static str, provider: &'static str, source: &'static str) -> Arc<Self> {
        Arc::new(Self { id, provider, source })
    }
}

#[async_trait]
impl SearchAdapter for ScriptedAdapter {
    fn id(&self) -> &str {
        self.id
    }

    fn provider(&self) -> &str {
        self.provider
    }

    fn tool(&self) -> &str {
        "search"
    }

    fn build_request(&self, query: &SearchQuery) -> Value {
        json!({ "query": query.trimmed() })
    }

    fn parse_response(&self, raw: &Value) -> Vec<SearchResult> {
        raw["results"]
            .as_array()
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .map(|hit| {
                SearchResult::new(
                    hit["title"].as_str().unwrap_or_default(),
                    hit["url"].as_str().unwrap_or_default(),
                    self.source,
                )
                .snippet(hit["snippet"].as_str().unwrap_or_default())
            })
            .collect()
    }
}

fn hits(titles: &[&str]) -> Value {
    let results: Vec<Value> = titles
        .iter()
        .map(|t| json!({"title": t, "url": format!("https://example.com/{}", t.replace(' ', "-"))}))
        .collect();
    json!({ "results": results })
}

fn config(name: &str) -> ProviderConfig {
    ProviderConfig::stdio(name, "mock", Vec::<String>::new())
}

async fn connected_registry(connector: &Arc<MockConnector>, names: &[&str]) -> ProviderRegistry {
    let registry = ProviderRegistry::new(
        connector.clone(),
        ReconnectPolicy::new(2, Duration::from_millis(100)),
    );
    for name in names {
        registry.connect(name, config(name)).await.unwrap();
    }
    registry
}

fn hub(registry: ProviderRegistry, adapters: AdapterTable, ttl: Duration) -> SearchOrchestrator {
    SearchOrchestrator::new(
        registry,
        adapters,
        Arc::new(ResultCache::new(ttl)),
        &SearchConfig::default(),
    )
}

#[tokio::test]
async fn test_react_hooks_ranking_across_providers() {
    let connector = Arc::new(MockConnector::new());
    connector.provider("github").respond(
        "search_repositories",
        json!({"items": [
            {
                "full_name": "facebook/react",
                "html_url": "https://github.com/facebook/react",
                "description": "The library for web and native user interfaces",
                "stargazers_count": 220000
            },
            {
                "full_name": "rehooks/awesome-react-hooks",
                "html_url": "https://github.com/rehooks/awesome-react-hooks",
                "description": "Awesome React Hooks",
                "stargazers_count": 9000
            }
        ]}),
    );
    connector.provider("context7").respond(
        "search",
        json!({"results": [{
            "title": "React Hooks Reference",
            "url": "https://react.dev/reference/react/hooks",
            "content": "Hooks let you use different React features from your components."
        }]}),
    );

    let registry = connected_registry(&connector, &["github", "context7"]).await;
    let mut adapters = AdapterTable::new();
    adapters.register(SearchType::Github, Arc::new(GithubRepoAdapter::new(10)));
    adapters.register(SearchType::Docs, Arc::new(DocsAdapter::new()));
    let hub = hub(registry, adapters, Duration::from_secs(60));

    let outcome = hub
        .search("React Hooks", SearchType::All, SearchOptions::new())
        .await
        .unwrap();

    let titles: Vec<&str> = outcome.results.iter().map(|r| r.title.as_str()).collect();
    // 20 + 10 + 2 + 5 = 37, 20 + 10 + 4 = 34, 10 + 2 + 5 = 17
    assert_eq!(
        titles,
        vec!["rehooks/awesome-react-hooks", "React Hooks Reference", "facebook/react"]
    );
    assert_eq!(outcome.results[0].score, 37.0);
    assert_eq!(outcome.results[1].score, 34.0);
    assert_eq!(outcome.results[2].score, 17.0);
    let ranks: Vec<usize> = outcome.results.iter().map(|r| r.rank).collect();
    assert_eq!(ranks, vec![1, 2, 3]);
    assert_eq!(outcome.total_results, 3);
    assert!(outcome.provider_failures.is_empty());
    assert!(!outcome.cached);
}

#[tokio::test]
async fn test_title_match_outranks_generic_repository() {
    let connector = Arc::new(MockConnector::new());
    connector.provider("github").respond(
        "search_repositories",
        json!({"items": [
            {"full_name": "generic-lib", "html_url": "https://github.com/x/generic-lib"},
            {"full_name": "React Hooks Guide", "html_url": "https://github.com/x/guide"}
        ]}),
    );
    let registry = connected_registry(&connector, &["github"]).await;
    let mut adapters = AdapterTable::new();
    adapters.register(SearchType::Github, Arc::new(GithubRepoAdapter::new(10)));
    let hub = hub(registry, adapters, Duration::from_secs(60));

    let outcome = hub
        .search("react hooks", SearchType::Github, SearchOptions::new())
        .await
        .unwrap();

    assert_eq!(outcome.results[0].title, "React Hooks Guide");
    assert_eq!(outcome.results[1].title, "generic-lib");
    assert!(outcome.results[0].score > outcome.results[1].score);
}

#[tokio::test(start_paused = true)]
async fn test_slow_provider_times_out_without_sinking_search() {
    let connector = Arc::new(MockConnector::new());
    connector
        .provider("fast")
        .respond("search", hits(&["tokio runtime", "tokio console"]));
    connector
        .provider("slow")
        .respond("search", hits(&["tokio never"]))
        .delay("search", Duration::from_secs(60));

    let registry = connected_registry(&connector, &["fast", "slow"]).await;
    let mut adapters = AdapterTable::new();
    adapters.register(SearchType::Web, ScriptedAdapter::new("fast-web", "fast", "web"));
    adapters.register(SearchType::Web, ScriptedAdapter::new("slow-web", "slow", "web"));
    let hub = hub(registry, adapters, Duration::from_secs(60));

    let outcome = hub
        .search("tokio", SearchType::Web, SearchOptions::new().timeout_ms(1000))
        .await
        .unwrap();

    let titles: Vec<&str> = outcome.results.iter().map(|r| r.title.as_str()).collect();
    assert_eq!(titles, vec!["tokio runtime", "tokio console"]);
    assert_eq!(outcome.provider_failures.len(), 1);
    let failure = &outcome.provider_failures[0];
    assert_eq!(failure.adapter, "slow-web");
    assert_eq!(failure.provider, "slow");
    assert_eq!(failure.kind, FailureKind::Timeout);
    assert!(outcome.elapsed_ms <= 1100);
}

#[tokio::test]
async fn test_max_results_keeps_best_scored() {
    let connector = Arc::new(MockConnector::new());
    connector
        .provider("misc")
        .respond("search", hits(&["alpha", "alpha beta", "alpha beta gamma"]));

    let registry = connected_registry(&connector, &["misc"]).await;
    let mut adapters = AdapterTable::new();
    adapters.register(SearchType::Web, ScriptedAdapter::new("misc", "misc", "misc"));
    let hub = hub(registry, adapters, Duration::from_secs(60));

    let outcome = hub
        .search("alpha beta gamma", SearchType::Web, SearchOptions::new().max_results(1))
        .await
        .unwrap();

    assert_eq!(outcome.results.len(), 1);
    assert_eq!(outcome.total_results, 1);
    assert_eq!(outcome.results[0].title, "alpha beta gamma");
    assert_eq!(outcome.results[0].score, 30.0);
    assert_eq!(outcome.results[0].rank, 1);
}

#[tokio::test]
async fn test_empty_query_is_rejected_before_dispatch() {
    let connector = Arc::new(MockConnector::new());
    let registry = connected_registry(&connector, &["misc"]).await;
    let mut adapters = AdapterTable::new();
    adapters.register(SearchType::Web, ScriptedAdapter::new("misc", "misc", "web"));
    let hub = hub(registry, adapters, Duration::from_secs(60));

    let result = hub.search("  \t ", SearchType::All, SearchOptions::new()).await;

    assert!(matches!(result, Err(SearchError::Validation(_))));
    assert_eq!(connector.provider("misc").calls("search"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cache_hit_then_expiry() {
    let connector = Arc::new(MockConnector::new());
    connector.provider("misc").respond("search", hits(&["serde json"]));
    let registry = connected_registry(&connector, &["misc"]).await;
    let mut adapters = AdapterTable::new();
    adapters.register(SearchType::Web, ScriptedAdapter::new("misc", "misc", "web"));
    let hub = hub(registry, adapters, Duration::from_secs(60));

    let first = hub.search("serde", SearchType::Web, SearchOptions::new()).await.unwrap();
    assert!(!first.cached);

    // normalized text hits the same entry
    let second = hub.search("  SERDE ", SearchType::Web, SearchOptions::new()).await.unwrap();
    assert!(second.cached);
    assert_eq!(second.results, first.results);
    assert_eq!(connector.provider("misc").calls("search"), 1);

    tokio::time::advance(Duration::from_secs(61)).await;

    let third = hub.search("serde", SearchType::Web, SearchOptions::new()).await.unwrap();
    assert!(!third.cached);
    assert_eq!(connector.provider("misc").calls("search"), 2);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_identical_searches_share_one_fanout() {
    let connector = Arc::new(MockConnector::new());
    connector
        .provider("misc")
        .respond("search", hits(&["axum router"]))
        .delay("search", Duration::from_millis(200));
    let registry = connected_registry(&connector, &["misc"]).await;
    let mut adapters = AdapterTable::new();
    adapters.register(SearchType::Web, ScriptedAdapter::new("misc", "misc", "web"));
    let hub = hub(registry, adapters, Duration::from_secs(60));

    let searches = (0..8).map(|_| {
        let hub = hub.clone();
        async move { hub.search("axum", SearchType::Web, SearchOptions::new()).await }
    });
    let outcomes = join_all(searches).await;

    assert_eq!(connector.provider("misc").calls("search"), 1);
    for outcome in outcomes {
        let outcome = outcome.unwrap();
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.results[0].title, "axum router");
    }
    assert_eq!(hub.cache().in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_first_search_keeps_single_fanout() {
    let connector = Arc::new(MockConnector::new());
    connector
        .provider("github")
        .respond("search", hits(&["rust lang"]))
        .delay("search", Duration::from_millis(500));
    let registry = connected_registry(&connector, &["github"]).await;
    let mut adapters = AdapterTable::new();
    adapters.register(SearchType::Github, ScriptedAdapter::new("gh", "github", "github-repo"));
    let hub = hub(registry, adapters, Duration::from_secs(60));

    let spawn_search = |hub: &SearchOrchestrator| {
        let hub = hub.clone();
        tokio::spawn(async move { hub.search("rust", SearchType::Github, SearchOptions::new()).await })
    };

    let first = spawn_search(&hub);
    tokio::time::sleep(Duration::from_millis(10)).await;
    let second = spawn_search(&hub);
    tokio::time::sleep(Duration::from_millis(40)).await;

    first.abort();
    assert!(first.await.unwrap_err().is_cancelled());
    assert_eq!(hub.cache().in_flight(), 1);

    let third = spawn_search(&hub);
    let second = second.await.unwrap().unwrap();
    let third = third.await.unwrap().unwrap();

    assert_eq!(second.results[0].title, "rust lang");
    assert_eq!(third.results, second.results);
    assert_eq!(connector.provider("github").calls("search"), 1);
    assert_eq!(hub.cache().in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_exhaustion_marks_provider_failed() {
    let connector = Arc::new(MockConnector::new());
    let registry = connected_registry(&connector, &["flaky"]).await;
    let mut events = registry.subscribe();

    connector.provider("flaky").fail_handshakes(10);
    connector.provider("flaky").drop_connection();

    let mut seen = Vec::new();
    loop {
        let event = events.recv().await.unwrap();
        let done = matches!(event, ProviderEvent::ReconnectFailed { .. });
        seen.push(event);
        if done {
            break;
        }
    }

    assert!(matches!(seen[0], ProviderEvent::Reconnecting { attempt: 1, .. }));
    assert!(matches!(seen[1], ProviderEvent::Reconnecting { attempt: 2, .. }));
    assert_eq!(seen.len(), 3);

    let status = registry.get_status().await;
    assert_eq!(status["flaky"].state, ConnectionState::Failed);
    assert!(!status["flaky"].connected);
    assert_eq!(status["flaky"].reconnect_attempts, 2);
    assert!(status["flaky"].last_error.is_some());
    assert!(!registry.has_pending_reconnect("flaky").await);
    // initial connect plus two failed reconnects
    assert_eq!(connector.provider("flaky").connects(), 3);

    // nothing fires on its own once failed
    tokio::time::advance(Duration::from_secs(5)).await;
    tokio::task::yield_now().await;
    assert_eq!(connector.provider("flaky").connects(), 3);
    assert_eq!(registry.state("flaky").await, Some(ConnectionState::Failed));

    // an explicit connect revives it
    connector.provider("flaky").fail_handshakes(0);
    registry.connect("flaky", config("flaky")).await.unwrap();
    let status = registry.get_status().await;
    assert_eq!(status["flaky"].state, ConnectionState::Connected);
    assert!(status["flaky"].connected);
    assert_eq!(status["flaky"].reconnect_attempts, 0);
    assert_eq!(connector.provider("flaky").connects(), 4);
}

#[tokio::test]
async fn test_no_providers_yields_empty_success() {
    let connector = Arc::new(MockConnector::new());
    let registry = connected_registry(&connector, &[]).await;
    let hub = hub(registry, AdapterTable::new(), Duration::from_secs(60));

    let outcome = hub.search("anything", SearchType::All, SearchOptions::new()).await.unwrap();

    assert!(outcome.is_empty());
    assert_eq!(outcome.total_results, 0);
    assert!(outcome.provider_failures.is_empty());
}

#[tokio::test]
async fn test_failed_provider_is_reported_not_raised() {
    let connector = Arc::new(MockConnector::new());
    connector.provider("good").respond("search", hits(&["rust book"]));
    connector.provider("bad").fail_tool("search", "rate limited");
    let registry = connected_registry(&connector, &["good", "bad"]).await;
    let mut adapters = AdapterTable::new();
    adapters.register(SearchType::Docs, ScriptedAdapter::new("good-docs", "good", "documentation"));
    adapters.register(SearchType::Docs, ScriptedAdapter::new("bad-docs", "bad", "documentation"));
    adapters.register(SearchType::Docs, ScriptedAdapter::new("gone-docs", "gone", "documentation"));
    let hub = hub(registry, adapters, Duration::from_secs(60));

    let outcome = hub.search("rust", SearchType::Docs, SearchOptions::new()).await.unwrap();

    assert_eq!(outcome.results.len(), 1);
    let kinds: Vec<(&str, FailureKind)> = outcome
        .provider_failures
        .iter()
        .map(|f| (f.adapter.as_str(), f.kind))
        .collect();
    assert_eq!(
        kinds,
        vec![
            ("bad-docs", FailureKind::Invocation),
            ("gone-docs", FailureKind::NotConnected)
        ]
    );
    assert!(outcome.provider_failures[0].message.contains("rate limited"));
}

#[tokio::test]
async fn test_duplicates_across_providers_are_merged() {
    let connector = Arc::new(MockConnector::new());
    connector.provider("a").respond(
        "search",
        json!({"results": [{"title": "Tokio", "url": "https://tokio.rs"}]}),
    );
    connector.provider("b").respond(
        "search",
        json!({"results": [
            {"title": " tokio ", "url": "HTTPS://TOKIO.RS"},
            {"title": "Tokio tutorial", "url": "https://tokio.rs/tokio/tutorial"}
        ]}),
    );
    let registry = connected_registry(&connector, &["a", "b"]).await;
    let mut adapters = AdapterTable::new();
    adapters.register(SearchType::Web, ScriptedAdapter::new("a-web", "a", "web"));
    adapters.register(SearchType::Web, ScriptedAdapter::new("b-web", "b", "web"));
    let hub = hub(registry, adapters, Duration::from_secs(60));

    let outcome = hub.search("tokio", SearchType::Web, SearchOptions::new()).await.unwrap();

    assert_eq!(outcome.results.len(), 2);
    // first seen wins
    assert_eq!(outcome.results[0].title, "Tokio");
    assert_eq!(outcome.results[0].url, "https://tokio.rs");
}

#[derive(Debug)]
struct ChannelSink(mpsc::UnboundedSender<SearchRecord>);

#[async_trait]
impl SearchSink for ChannelSink {
    async fn record(&self, record: SearchRecord) {
        let _ = self.0.send(record);
    }
}

#[tokio::test]
async fn test_sink_sees_fresh_and_cached_searches() {
    let connector = Arc::new(MockConnector::new());
    connector.provider("misc").respond("search", hits(&["clap derive"]));
    let registry = connected_registry(&connector, &["misc"]).await;
    let mut adapters = AdapterTable::new();
    adapters.register(SearchType::Web, ScriptedAdapter::new("misc", "misc", "web"));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let hub = hub(registry, adapters, Duration::from_secs(60)).with_sink(Arc::new(ChannelSink(tx)));

    hub.search("clap", SearchType::Web, SearchOptions::new()).await.unwrap();
    hub.search("clap", SearchType::Web, SearchOptions::new()).await.unwrap();

    let first = rx.recv().await.unwrap();
    let second = rx.recv().await.unwrap();
    assert_eq!(first.query, "clap");
    assert_eq!(first.search_type, SearchType::Web);
    assert_eq!(first.result_count, 1);
    assert!(!first.cached);
    assert!(second.cached);
}
