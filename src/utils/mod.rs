//! Utility modules supporting search operations.
//!
//! - [`ResultCache`]: TTL cache of search outcomes with single-flight execution
//! - [`cache_key`]: Cache key derivation from a normalized query
//! - [`HistoryService`]: JSON-lines search history, usable as a search sink
//! - [`HttpClient`]: Shared reqwest client with sensible defaults
//! - [`RetryConfig`] / [`with_retry`]: Exponential backoff on transient errors
//!
//! # Retry with Backoff
//!
//! ```rust,no_run
//! use mcp_search_hub::utils::{with_retry, HttpClient, RetryConfig};
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), reqwest::Error> {
//! let client = HttpClient::new();
//! let body = with_retry(RetryConfig::new(3, Duration::from_millis(500)), || {
//!     client.get_text("https://example.com", &[], Duration::from_secs(10))
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

mod cache;
mod history;
mod http;
mod retry;

pub use cache::{cache_key, CacheResult, ResultCache};
pub use history::{default_history_path, HistoryService};
pub use http::{HttpClient, BROWSER_USER_AGENT};
pub use retry::{with_retry, RetryConfig, Transient, TransientError};
