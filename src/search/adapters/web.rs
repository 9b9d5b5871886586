//! Web search: a Google results page rendered by a scraping provider, or by a
//! headless browser provider with a DuckDuckGo HTML fallback.

use super::{tool_payload, SearchAdapter};
use crate::models::{SearchQuery, SearchResult};
use crate::providers::ProviderError;
use crate::utils::HttpClient;
use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use serde_json::{json, Value};
use std::time::Duration;
use url::Url;

const SOURCE: &str = "web";

/// HTML-only DuckDuckGo endpoint, no JavaScript required
pub const DUCKDUCKGO_HTML_URL: &str = "https://html.duckduckgo.com/html/";

const FALLBACK_TIMEOUT: Duration = Duration::from_secs(15);

fn google_search_url(query: &SearchQuery) -> String {
    format!(
        "https://www.google.com/search?q={}",
        urlencoding::encode(query.trimmed())
    )
}

/// Pull page HTML out of a scrape result: a bare string or an object with
/// `html` / `rawHtml`, possibly under `data`.
fn page_html(raw: &Value) -> Option<String> {
    match tool_payload(raw) {
        Value::String(html) => Some(html),
        payload => ["/html", "/rawHtml", "/data/html", "/data/rawHtml"]
            .iter()
            .find_map(|pointer| payload.pointer(pointer).and_then(Value::as_str))
            .map(str::to_string),
    }
}

/// Google results page rendered through the scraping provider's `scrape` tool
#[derive(Debug, Clone, Default)]
pub struct RenderWebAdapter;

impl RenderWebAdapter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SearchAdapter for RenderWebAdapter {
    fn id(&self) -> &str {
        "web-render"
    }

    fn provider(&self) -> &str {
        "firecrawl"
    }

    fn tool(&self) -> &str {
        "scrape"
    }

    fn build_request(&self, query: &SearchQuery) -> Value {
        json!({
            "url": google_search_url(query),
            "formats": ["markdown", "html"],
            "includeTags": ["title", "meta", "h1", "h2", "h3", "p", "a"],
            "excludeTags": ["nav", "footer", "aside", "script", "style"],
            "waitFor": 2000,
        })
    }

    fn parse_response(&self, raw: &Value) -> Vec<SearchResult> {
        page_html(raw)
            .map(|html| parse_google_html(&html))
            .unwrap_or_default()
    }
}

/// Google results page rendered by a headless browser provider. Without a
/// browser session it scrapes DuckDuckGo's HTML endpoint directly.
#[derive(Debug, Clone)]
pub struct HeadlessWebAdapter {
    http: HttpClient,
    fallback_url: String,
}

impl HeadlessWebAdapter {
    pub fn new(http: HttpClient) -> Self {
        Self::with_fallback_url(http, DUCKDUCKGO_HTML_URL)
    }

    /// Use a different DuckDuckGo-compatible endpoint for the fallback
    pub fn with_fallback_url(http: HttpClient, url: impl Into<String>) -> Self {
        Self {
            http,
            fallback_url: url.into(),
        }
    }
}

#[async_trait]
impl SearchAdapter for HeadlessWebAdapter {
    fn id(&self) -> &str {
        "web-headless"
    }

    fn provider(&self) -> &str {
        "browser"
    }

    fn tool(&self) -> &str {
        "search"
    }

    fn build_request(&self, query: &SearchQuery) -> Value {
        json!({
            "query": query.trimmed(),
            "url": google_search_url(query),
            "waitUntil": "networkidle2",
        })
    }

    fn parse_response(&self, raw: &Value) -> Vec<SearchResult> {
        let Some(html) = page_html(raw) else {
            return Vec::new();
        };
        let google = parse_google_html(&html);
        if google.is_empty() {
            parse_duckduckgo_html(&html)
        } else {
            google
        }
    }

    async fn fallback(&self, query: &SearchQuery) -> Option<Result<Value, ProviderError>> {
        tracing::debug!(query = %query.text, "No browser session; falling back to DuckDuckGo HTML");
        let html = self
            .http
            .get_text(&self.fallback_url, &[("q", query.trimmed())], FALLBACK_TIMEOUT)
            .await;
        Some(html.map(Value::String).map_err(ProviderError::from))
    }
}

fn selector(css: &str) -> Option<Selector> {
    match Selector::parse(css) {
        Ok(sel) => Some(sel),
        Err(e) => {
            tracing::error!(css, error = ?e, "Invalid selector");
            None
        }
    }
}

fn text_of(element: ElementRef<'_>) -> String {
    element
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Unwrap Google's `/url?q=<target>` redirect links.
fn google_target(href: &str) -> Option<String> {
    if href.starts_with("/url?") {
        let parsed = Url::parse(&format!("https://www.google.com{}", href)).ok()?;
        return parsed
            .query_pairs()
            .find(|(key, _)| key == "q" || key == "url")
            .map(|(_, value)| value.into_owned());
    }
    if href.starts_with("http://") || href.starts_with("https://") {
        return Some(href.to_string());
    }
    None
}

/// Parse a Google results page: `.g` blocks with an `h3` title, the first
/// link and a `.VwiC3b` snippet.
pub fn parse_google_html(html: &str) -> Vec<SearchResult> {
    let (Some(block_sel), Some(title_sel), Some(link_sel), Some(snippet_sel)) = (
        selector(".g"),
        selector("h3"),
        selector("a[href]"),
        selector(".VwiC3b"),
    ) else {
        return Vec::new();
    };

    let document = Html::parse_document(html);
    document
        .select(&block_sel)
        .filter_map(|block| {
            let title = text_of(block.select(&title_sel).next()?);
            let href = block.select(&link_sel).next()?.value().attr("href")?;
            let url = google_target(href)?;
            if title.is_empty() {
                return None;
            }
            let snippet = block
                .select(&snippet_sel)
                .next()
                .map(text_of)
                .unwrap_or_default();
            Some(SearchResult::new(title, url, SOURCE).snippet(snippet))
        })
        .collect()
}

/// Unwrap DuckDuckGo's `//duckduckgo.com/l/?uddg=<target>` redirect links.
fn duckduckgo_target(href: &str) -> Option<String> {
    let full = if href.starts_with("//") {
        format!("https:{}", href)
    } else {
        href.to_string()
    };
    let parsed = Url::parse(&full).ok()?;

    if parsed.host_str() == Some("duckduckgo.com") && parsed.path().starts_with("/l/") {
        parsed
            .query_pairs()
            .find(|(key, _)| key == "uddg")
            .map(|(_, value)| value.into_owned())
    } else {
        Some(full)
    }
}

/// Parse DuckDuckGo's HTML results page, skipping ads.
pub fn parse_duckduckgo_html(html: &str) -> Vec<SearchResult> {
    let (Some(result_sel), Some(title_sel), Some(snippet_sel)) = (
        selector(".result:not(.result--ad), .web-result:not(.result--ad)"),
        selector(".result__a"),
        selector(".result__snippet"),
    ) else {
        return Vec::new();
    };

    let document = Html::parse_document(html);
    let mut results: Vec<SearchResult> = Vec::new();
    for element in document.select(&result_sel) {
        let Some(title_el) = element.select(&title_sel).next() else {
            continue;
        };
        let title = text_of(title_el);
        let Some(url) = title_el.value().attr("href").and_then(duckduckgo_target) else {
            continue;
        };
        // nested .web-result inside .result matches twice
        if title.is_empty() || results.iter().any(|r| r.url == url) {
            continue;
        }
        let snippet = element
            .select(&snippet_sel)
            .next()
            .map(text_of)
            .unwrap_or_default();
        results.push(SearchResult::new(title, url, SOURCE).snippet(snippet));
    }
    results
}
