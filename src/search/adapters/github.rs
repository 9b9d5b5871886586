//! GitHub repository and code search through the GitHub MCP server.

use super::{items, requested, str_field, tool_payload, with_filters, SearchAdapter};
use crate::models::{SearchQuery, SearchResult};
use async_trait::async_trait;
use serde_json::{json, Value};

const PROVIDER: &str = "github";

/// GitHub caps `per_page` at 100
const MAX_PER_PAGE: usize = 100;

/// `search_repositories`: one result per repository, popularity = stars
#[derive(Debug, Clone)]
pub struct GithubRepoAdapter {
    per_page: usize,
}

impl GithubRepoAdapter {
    pub fn new(per_page: usize) -> Self {
        Self { per_page }
    }
}

#[async_trait]
impl SearchAdapter for GithubRepoAdapter {
    fn id(&self) -> &str {
        "github-repo"
    }

    fn provider(&self) -> &str {
        PROVIDER
    }

    fn tool(&self) -> &str {
        "search_repositories"
    }

    fn build_request(&self, query: &SearchQuery) -> Value {
        let args = json!({
            "query": query.trimmed(),
            "per_page": requested(query, self.per_page).min(MAX_PER_PAGE),
        });
        with_filters(args, query, PROVIDER)
    }

    fn parse_response(&self, raw: &Value) -> Vec<SearchResult> {
        let payload = tool_payload(raw);
        let repos = match payload.get("repositories") {
            Some(Value::Array(repos)) => repos.as_slice(),
            _ => items(&payload, "items"),
        };

        repos
            .iter()
            .filter_map(|repo| {
                let name = str_field(repo, "full_name");
                let url = str_field(repo, "html_url");
                if name.is_empty() || url.is_empty() {
                    return None;
                }

                let mut result = SearchResult::new(name, url, self.id())
                    .snippet(str_field(repo, "description"))
                    .meta("language", repo.get("language").cloned().unwrap_or_default())
                    .meta("updated_at", repo.get("updated_at").cloned().unwrap_or_default());
                if let Some(stars) = repo.get("stargazers_count").and_then(Value::as_f64) {
                    result = result.popularity(stars).meta("stars", stars);
                }
                Some(result)
            })
            .collect()
    }
}

/// `search_code`: one result per matching file
#[derive(Debug, Clone)]
pub struct GithubCodeAdapter {
    per_page: usize,
}

impl GithubCodeAdapter {
    pub fn new(per_page: usize) -> Self {
        Self { per_page }
    }
}

#[async_trait]
impl SearchAdapter for GithubCodeAdapter {
    fn id(&self) -> &str {
        "github-code"
    }

    fn provider(&self) -> &str {
        PROVIDER
    }

    fn tool(&self) -> &str {
        "search_code"
    }

    fn build_request(&self, query: &SearchQuery) -> Value {
        let args = json!({
            "q": query.trimmed(),
            "per_page": requested(query, self.per_page).min(MAX_PER_PAGE),
        });
        with_filters(args, query, PROVIDER)
    }

    fn parse_response(&self, raw: &Value) -> Vec<SearchResult> {
        let payload = tool_payload(raw);

        items(&payload, "items")
            .iter()
            .filter_map(|item| {
                let name = str_field(item, "name");
                let url = str_field(item, "html_url");
                if name.is_empty() || url.is_empty() {
                    return None;
                }

                let repository = item.get("repository").cloned().unwrap_or_default();
                Some(
                    SearchResult::new(name, url, self.id())
                        .snippet(str_field(&repository, "description"))
                        .meta("repository", str_field(&repository, "full_name"))
                        .meta("path", str_field(item, "path")),
                )
            })
            .collect()
    }
}
