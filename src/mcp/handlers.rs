//! Tool handlers over the orchestrator and provider registry.

use serde_json::{Map, Value};

use super::tools::{ToolError, ToolHandler};
use crate::models::{SearchOptions, SearchQuery, SearchType};
use crate::providers::ProviderRegistry;
use crate::search::{SearchError, SearchOrchestrator};

fn to_json<T: serde::Serialize>(value: &T) -> Result<Value, ToolError> {
    serde_json::to_value(value).map_err(|e| ToolError::Failed(e.to_string()))
}

/// Optional positive integer argument
fn positive(args: &Value, key: &str) -> Result<Option<u64>, ToolError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_u64()
            .filter(|n| *n > 0)
            .map(Some)
            .ok_or_else(|| ToolError::InvalidParams(format!("'{}' must be a positive integer", key))),
    }
}

/// Build a query from `search` tool arguments
pub(crate) fn parse_search_args(args: &Value) -> Result<SearchQuery, ToolError> {
    let text = args
        .get("query")
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::InvalidParams("Missing 'query' parameter".to_string()))?;

    let search_type = match args.get("type").and_then(Value::as_str) {
        Some(raw) => raw.parse::<SearchType>().map_err(ToolError::InvalidParams)?,
        None => SearchType::All,
    };

    let mut options = SearchOptions::new();
    if let Some(max) = positive(args, "max_results")? {
        options = options.max_results(max as usize);
    }
    if let Some(timeout) = positive(args, "timeout_ms")? {
        options = options.timeout_ms(timeout);
    }
    if let Some(enrich) = args.get("enrich").and_then(Value::as_bool) {
        options = options.enrich(enrich);
    }

    if let Some(filters) = args.get("filters").filter(|f| !f.is_null()) {
        let filters: Map<String, Value> = filters
            .as_object()
            .cloned()
            .ok_or_else(|| ToolError::InvalidParams("'filters' must be an object".to_string()))?;
        for (provider, extra) in filters {
            let Value::Object(extra) = extra else {
                return Err(ToolError::InvalidParams(format!(
                    "filters for '{}' must be an object",
                    provider
                )));
            };
            for (key, value) in extra {
                options = options.filter(&provider, key, value);
            }
        }
    }

    Ok(SearchQuery::new(text, search_type).with_options(options))
}

/// `search`: run a federated search
#[derive(Debug)]
pub struct SearchHandler {
    pub orchestrator: SearchOrchestrator,
}

#[async_trait::async_trait]
impl ToolHandler for SearchHandler {
    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let query = parse_search_args(&args)?;

        let outcome = self.orchestrator.execute(query).await.map_err(|e| match e {
            SearchError::Validation(message) => ToolError::InvalidParams(message),
            other => ToolError::Failed(other.to_string()),
        })?;

        to_json(&outcome)
    }
}

/// `provider_status`: connection health per provider
#[derive(Debug)]
pub struct ProviderStatusHandler {
    pub registry: ProviderRegistry,
}

#[async_trait::async_trait]
impl ToolHandler for ProviderStatusHandler {
    async fn execute(&self, _args: Value) -> Result<Value, ToolError> {
        to_json(&self.registry.get_status().await)
    }
}

/// `list_providers`: providers and their capabilities
#[derive(Debug)]
pub struct ListProvidersHandler {
    pub registry: ProviderRegistry,
}

#[async_trait::async_trait]
impl ToolHandler for ListProvidersHandler {
    async fn execute(&self, _args: Value) -> Result<Value, ToolError> {
        to_json(&self.registry.list_providers().await)
    }
}
