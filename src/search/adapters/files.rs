//! Local file search through the filesystem MCP server.

use super::{items, requested, str_field, tool_payload, with_filters, SearchAdapter};
use crate::models::{SearchQuery, SearchResult, SearchType};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::Path;

const PROVIDER: &str = "filesystem";

const DEFAULT_MAX_RESULTS: usize = 20;

/// Extensions searched for general file queries
pub const TEXT_EXTENSIONS: &[&str] = &[".txt", ".md", ".js", ".json", ".py", ".html", ".css"];

/// Extensions searched for `code` queries
pub const CODE_EXTENSIONS: &[&str] = &[
    ".js", ".py", ".java", ".cpp", ".c", ".h", ".php", ".rb", ".go", ".rs", ".ts",
];

/// Searches one allowed root directory
#[derive(Debug, Clone)]
pub struct FilesystemAdapter {
    id: String,
    root: String,
}

impl FilesystemAdapter {
    pub fn new(root: impl Into<String>) -> Self {
        let root = root.into();
        Self {
            id: format!("files:{}", root),
            root,
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }
}

#[async_trait]
impl SearchAdapter for FilesystemAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    fn provider(&self) -> &str {
        PROVIDER
    }

    fn tool(&self) -> &str {
        "search"
    }

    fn build_request(&self, query: &SearchQuery) -> Value {
        let extensions = if query.search_type == SearchType::Code {
            CODE_EXTENSIONS
        } else {
            TEXT_EXTENSIONS
        };

        let args = json!({
            "path": self.root,
            "query": query.trimmed(),
            "extensions": extensions,
            "maxResults": requested(query, DEFAULT_MAX_RESULTS),
        });
        with_filters(args, query, PROVIDER)
    }

    /// Accepts `{"files": [{path, preview, size, modifiedAt}]}` or plain
    /// text with one path per line.
    fn parse_response(&self, raw: &Value) -> Vec<SearchResult> {
        match tool_payload(raw) {
            Value::String(text) => text
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with("No matches"))
                .map(|path| file_result(self.id(), path, ""))
                .collect(),
            payload => items(&payload, "files")
                .iter()
                .filter_map(|file| {
                    let path = str_field(file, "path");
                    if path.is_empty() {
                        return None;
                    }
                    Some(
                        file_result(self.id(), path, str_field(file, "preview"))
                            .meta("size", file.get("size").cloned().unwrap_or_default())
                            .meta(
                                "modified_at",
                                file.get("modifiedAt").cloned().unwrap_or_default(),
                            ),
                    )
                })
                .collect(),
        }
    }
}

fn file_result(adapter: &str, path: &str, preview: &str) -> SearchResult {
    let title = Path::new(path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string());

    SearchResult::new(title, format!("file://{}", path), "file")
        .snippet(preview)
        .meta("path", path)
        .meta("adapter", adapter)
}
