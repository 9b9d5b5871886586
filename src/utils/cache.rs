//! In-memory result cache with single-flight deduplication.
//!
//! Outcomes are keyed by an md5 digest over the normalized query text,
//! search type and result-shaping options, and expire after a TTL.
//! Concurrent searches for the same key share one execution: the first
//! caller starts it, later callers await the same shared future. The
//! in-flight entry lives until the execution resolves, or until every
//! caller waiting on it has gone away.

use crate::models::{SearchOutcome, SearchQuery};
use crate::search::SearchError;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

type SharedOutcome = Shared<BoxFuture<'static, Result<SearchOutcome, SearchError>>>;
type Flights = Arc<Mutex<HashMap<String, Flight>>>;

/// One in-flight execution and the number of callers awaiting it
struct Flight {
    id: u64,
    future: SharedOutcome,
    waiters: usize,
}

impl std::fmt::Debug for Flight {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Flight")
            .field("id", &self.id)
            .field("waiters", &self.waiters)
            .finish()
    }
}

fn lock(flights: &Mutex<HashMap<String, Flight>>) -> MutexGuard<'_, HashMap<String, Flight>> {
    flights.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Result of a cache lookup
#[derive(Debug)]
pub enum CacheResult<T> {
    /// Item was found and is valid
    Hit(T),

    /// Item was not found
    Miss,

    /// Item was found but has expired (and was evicted)
    Expired,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    outcome: SearchOutcome,
    expires_at: Instant,
}

/// Compute the cache key for a query with its effective result cap.
pub fn cache_key(query: &SearchQuery, max_results: usize) -> String {
    let filters = serde_json::to_string(&query.options.filters).unwrap_or_default();
    let material = format!(
        "{}|{}|{}|{}|{}",
        query.normalized_text(),
        query.search_type,
        max_results,
        query.options.enrich,
        filters
    );
    format!("{:x}", md5::compute(material.as_bytes()))
}

/// TTL cache of search outcomes
#[derive(Debug)]
pub struct ResultCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, CacheEntry>>,
    in_flight: Flights,
    next_flight: AtomicU64,
}

impl ResultCache {
    /// Create a cache whose entries live for `ttl`
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            next_flight: AtomicU64::new(0),
        }
    }

    /// Default entry lifetime
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Look up `key`, evicting it if expired.
    pub async fn lookup(&self, key: &str) -> CacheResult<SearchOutcome> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => return CacheResult::Miss,
                Some(entry) if Instant::now() < entry.expires_at => {
                    return CacheResult::Hit(entry.outcome.clone())
                }
                Some(_) => {}
            }
        }

        let mut entries = self.entries.write().await;
        if entries
            .get(key)
            .is_some_and(|entry| Instant::now() >= entry.expires_at)
        {
            entries.remove(key);
            tracing::debug!(key, "Cache entry expired");
        }
        CacheResult::Expired
    }

    /// Fresh outcome for `key`, if any. Expired entries count as misses.
    pub async fn get(&self, key: &str) -> Option<SearchOutcome> {
        match self.lookup(key).await {
            CacheResult::Hit(outcome) => Some(outcome),
            CacheResult::Miss | CacheResult::Expired => None,
        }
    }

    /// Store `outcome` under `key` for `ttl`
    pub async fn put(&self, key: &str, outcome: SearchOutcome, ttl: Duration) {
        let entry = CacheEntry {
            outcome,
            expires_at: Instant::now() + ttl,
        };
        self.entries.write().await.insert(key.to_string(), entry);
    }

    /// Drop every expired entry, returning how many were removed
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| now < entry.expires_at);
        before - entries.len()
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    /// Number of stored entries, expired ones included
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Number of executions currently in flight
    pub fn in_flight(&self) -> usize {
        lock(&self.in_flight).len()
    }

    /// Run `compute` for `key` unless an identical execution is already in
    /// flight, in which case its result is shared.
    ///
    /// Cancelling any one caller does not release the key while others are
    /// still waiting; the execution keeps running for them.
    pub async fn with_single_flight<F, Fut>(
        &self,
        key: &str,
        compute: F,
    ) -> Result<SearchOutcome, SearchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<SearchOutcome, SearchError>> + Send + 'static,
    {
        let (future, _waiter) = {
            let mut flights = lock(&self.in_flight);
            let (future, id) = if let Some(flight) = flights.get_mut(key) {
                tracing::debug!(key, "Joining in-flight search");
                flight.waiters += 1;
                (flight.future.clone(), flight.id)
            } else {
                let id = self.next_flight.fetch_add(1, Ordering::Relaxed);
                let work = compute();
                let registry = Arc::clone(&self.in_flight);
                let owned_key = key.to_string();
                let future = async move {
                    let result = work.await;
                    release(&registry, &owned_key, id);
                    result
                }
                .boxed()
                .shared();
                flights.insert(
                    key.to_string(),
                    Flight {
                        id,
                        future: future.clone(),
                        waiters: 1,
                    },
                );
                (future, id)
            };
            let waiter = Waiter {
                flights: &self.in_flight,
                key,
                id,
            };
            (future, waiter)
        };

        future.await
    }
}

/// Drop the entry for `key` if it still belongs to execution `id`
fn release(flights: &Mutex<HashMap<String, Flight>>, key: &str, id: u64) {
    let mut flights = lock(flights);
    if flights.get(key).is_some_and(|f| f.id == id) {
        flights.remove(key);
    }
}

/// One caller's interest in a flight. The last waiter to leave an
/// unfinished flight removes it, abandoning the execution.
struct Waiter<'a> {
    flights: &'a Mutex<HashMap<String, Flight>>,
    key: &'a str,
    id: u64,
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        let mut flights = lock(self.flights);
        let abandoned = match flights.get_mut(self.key) {
            Some(flight) if flight.id == self.id => {
                flight.waiters -= 1;
                flight.waiters == 0
            }
            _ => false,
        };
        if abandoned {
            tracing::debug!(key = self.key, "Abandoning in-flight search");
            flights.remove(self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SearchOptions, SearchResult, SearchType};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn outcome(title: &str) -> SearchOutcome {
        let query = SearchQuery::new("rust", SearchType::All);
        let mut outcome = SearchOutcome::empty(&query);
        outcome.results.push(SearchResult::new(title, "https://example.com", "web"));
        outcome.total_results = 1;
        outcome
    }

    #[test]
    fn test_cache_key_normalizes_query() {
        let a = SearchQuery::new("React  Hooks", SearchType::Web);
        let b = SearchQuery::new("  react hooks ", SearchType::Web);
        let c = SearchQuery::new("react hooks", SearchType::Github);
        assert_eq!(cache_key(&a, 10), cache_key(&b, 10));
        assert_ne!(cache_key(&a, 10), cache_key(&c, 10));
        assert_ne!(cache_key(&a, 10), cache_key(&a, 20));
    }

    #[test]
    fn test_cache_key_includes_options() {
        let plain = SearchQuery::new("rust", SearchType::All);
        let enriched = plain
            .clone()
            .with_options(SearchOptions::new().enrich(true));
        let filtered = plain
            .clone()
            .with_options(SearchOptions::new().filter("github", "sort", "stars"));
        assert_ne!(cache_key(&plain, 10), cache_key(&enriched, 10));
        assert_ne!(cache_key(&plain, 10), cache_key(&filtered, 10));
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let cache = ResultCache::new(Duration::from_secs(60));
        assert!(cache.get("k").await.is_none());

        cache.put("k", outcome("a"), cache.ttl()).await;
        let hit = cache.get("k").await.unwrap();
        assert_eq!(hit.results[0].title, "a");
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_is_evicted() {
        let cache = ResultCache::new(Duration::from_secs(60));
        cache.put("k", outcome("a"), Duration::from_secs(1)).await;

        tokio::time::advance(Duration::from_millis(1001)).await;

        assert!(matches!(cache.lookup("k").await, CacheResult::Expired));
        assert!(cache.is_empty().await);
        assert!(matches!(cache.lookup("k").await, CacheResult::Miss));
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let cache = ResultCache::new(Duration::from_secs(60));
        cache.put("short", outcome("a"), Duration::from_secs(1)).await;
        cache.put("long", outcome("b"), Duration::from_secs(10)).await;

        tokio::time::advance(Duration::from_secs(2)).await;

        assert_eq!(cache.purge_expired().await, 1);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_single_flight_shares_execution() {
        let cache = Arc::new(ResultCache::new(Duration::from_secs(60)));
        let runs = Arc::new(AtomicUsize::new(0));
        let (release, gate) = tokio::sync::watch::channel(false);

        let callers: Vec<_> = (0..5)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let runs = Arc::clone(&runs);
                let mut gate = gate.clone();
                tokio::spawn(async move {
                    cache
                        .with_single_flight("k", move || async move {
                            runs.fetch_add(1, Ordering::SeqCst);
                            let _ = gate.wait_for(|open| *open).await;
                            Ok(outcome("shared"))
                        })
                        .await
                })
            })
            .collect();

        while cache.in_flight() == 0 {
            tokio::task::yield_now().await;
        }
        tokio::task::yield_now().await;
        release.send_replace(true);

        for caller in callers {
            let result = caller.await.unwrap().unwrap();
            assert_eq!(result.results[0].title, "shared");
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(cache.in_flight(), 0);
    }

    fn slow_caller(
        cache: &Arc<ResultCache>,
        runs: &Arc<AtomicUsize>,
    ) -> tokio::task::JoinHandle<Result<SearchOutcome, SearchError>> {
        let cache = Arc::clone(cache);
        let runs = Arc::clone(runs);
        tokio::spawn(async move {
            cache
                .with_single_flight("k", move || async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    Ok(outcome("shared"))
                })
                .await
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_flight_survives_first_caller_cancellation() {
        let cache = Arc::new(ResultCache::new(Duration::from_secs(60)));
        let runs = Arc::new(AtomicUsize::new(0));

        let first = slow_caller(&cache, &runs);
        tokio::time::sleep(Duration::from_millis(10)).await;
        let second = slow_caller(&cache, &runs);
        tokio::time::sleep(Duration::from_millis(40)).await;

        first.abort();
        assert!(first.await.unwrap_err().is_cancelled());
        assert_eq!(cache.in_flight(), 1);

        let third = slow_caller(&cache, &runs);
        assert_eq!(second.await.unwrap().unwrap().results[0].title, "shared");
        assert_eq!(third.await.unwrap().unwrap().results[0].title, "shared");
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(cache.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_flight_abandoned_when_every_caller_leaves() {
        let cache = Arc::new(ResultCache::new(Duration::from_secs(60)));
        let runs = Arc::new(AtomicUsize::new(0));

        let only = slow_caller(&cache, &runs);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(cache.in_flight(), 1);

        only.abort();
        assert!(only.await.unwrap_err().is_cancelled());
        assert_eq!(cache.in_flight(), 0);

        let next = slow_caller(&cache, &runs);
        assert!(next.await.unwrap().is_ok());
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_single_flight_releases_key_on_error() {
        let cache = ResultCache::new(Duration::from_secs(60));
        let result = cache
            .with_single_flight("k", || async {
                Err(SearchError::Validation("boom".to_string()))
            })
            .await;
        assert!(matches!(result, Err(SearchError::Validation(_))));
        assert_eq!(cache.in_flight(), 0);
    }
}
