//! Framework documentation search through the Context7 MCP server.

use super::{items, requested, str_field, tool_payload, with_filters, SearchAdapter, DEFAULT_PROVIDER_RESULTS};
use crate::models::{SearchQuery, SearchResult};
use async_trait::async_trait;
use serde_json::{json, Value};

const PROVIDER: &str = "context7";

#[derive(Debug, Clone, Default)]
pub struct DocsAdapter;

impl DocsAdapter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SearchAdapter for DocsAdapter {
    fn id(&self) -> &str {
        "docs"
    }

    fn provider(&self) -> &str {
        PROVIDER
    }

    fn tool(&self) -> &str {
        "search"
    }

    fn build_request(&self, query: &SearchQuery) -> Value {
        let args = json!({
            "query": query.trimmed(),
            "type": "documentation",
            "maxResults": requested(query, DEFAULT_PROVIDER_RESULTS),
        });
        with_filters(args, query, PROVIDER)
    }

    fn parse_response(&self, raw: &Value) -> Vec<SearchResult> {
        let payload = tool_payload(raw);

        items(&payload, "results")
            .iter()
            .filter_map(|doc| {
                let title = str_field(doc, "title");
                let url = str_field(doc, "url");
                if title.is_empty() || url.is_empty() {
                    return None;
                }
                Some(
                    SearchResult::new(title, url, "documentation")
                        .snippet(str_field(doc, "content"))
                        .meta("framework", doc.get("framework").cloned().unwrap_or_default())
                        .meta("version", doc.get("version").cloned().unwrap_or_default()),
                )
            })
            .collect()
    }
}
