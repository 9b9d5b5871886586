//! Search history stored as JSON lines in the config directory.

use crate::search::{SearchRecord, SearchSink};
use async_trait::async_trait;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// Append-only history of completed searches
#[derive(Debug, Clone)]
pub struct HistoryService {
    /// History file path
    path: PathBuf,
}

impl HistoryService {
    /// History at the default location
    pub fn new() -> Self {
        Self::with_path(default_history_path())
    }

    /// History at an explicit path
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Append one record
    pub fn append(&self, record: &SearchRecord) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let json = serde_json::to_string(record)?;
        writeln!(file, "{}", json)?;
        Ok(())
    }

    /// The most recent `limit` records, newest first
    pub fn read_entries(&self, limit: usize) -> io::Result<Vec<SearchRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let reader = BufReader::new(File::open(&self.path)?);
        let mut entries: Vec<SearchRecord> = Vec::new();
        for line in reader.lines() {
            let line = line?;
            // skip lines from older formats
            if let Ok(entry) = serde_json::from_str(&line) {
                entries.push(entry);
            }
        }

        entries.reverse();
        entries.truncate(limit);
        Ok(entries)
    }

    /// Clear history
    pub fn clear(&self) -> io::Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }

    /// Get history file path (for external access)
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for HistoryService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SearchSink for HistoryService {
    async fn record(&self, record: SearchRecord) {
        let history = self.clone();
        let written = tokio::task::spawn_blocking(move || history.append(&record)).await;
        match written {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(path = %self.path.display(), error = %e, "Failed to write history"),
            Err(e) => tracing::warn!(error = %e, "History writer panicked"),
        }
    }
}

/// `<config dir>/mcp-search-hub/history.jsonl`
pub fn default_history_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from(".config"))
        .join(env!("CARGO_PKG_NAME"))
        .join("history.jsonl")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SearchOptions, SearchType};
    use chrono::Utc;
    use tempfile::TempDir;

    fn record(query: &str, results: usize) -> SearchRecord {
        SearchRecord {
            query: query.to_string(),
            search_type: SearchType::Github,
            options: SearchOptions::default(),
            result_count: results,
            elapsed_ms: 12,
            cached: false,
            failed_providers: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_append_and_read_newest_first() {
        let dir = TempDir::new().unwrap();
        let history = HistoryService::with_path(dir.path().join("nested").join("history.jsonl"));

        history.append(&record("first", 1)).unwrap();
        history.append(&record("second", 2)).unwrap();
        history.append(&record("third", 3)).unwrap();

        let entries = history.read_entries(2).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].query, "third");
        assert_eq!(entries[1].query, "second");
    }

    #[test]
    fn test_read_missing_file() {
        let dir = TempDir::new().unwrap();
        let history = HistoryService::with_path(dir.path().join("none.jsonl"));
        assert!(history.read_entries(10).unwrap().is_empty());
    }

    #[test]
    fn test_skips_garbage_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.jsonl");
        fs::write(&path, "not json\n").unwrap();

        let history = HistoryService::with_path(&path);
        history.append(&record("ok", 0)).unwrap();

        let entries = history.read_entries(10).unwrap();
        assert_eq!(entries.len(), 1);

        history.clear().unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_sink_writes_record() {
        let dir = TempDir::new().unwrap();
        let history = HistoryService::with_path(dir.path().join("history.jsonl"));

        history.record(record("from sink", 4)).await;

        let entries = history.read_entries(1).unwrap();
        assert_eq!(entries[0].result_count, 4);
    }
}
