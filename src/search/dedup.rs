//! De-duplication of merged provider results.

use crate::models::SearchResult;
use std::collections::HashSet;

/// Drop results whose normalized `(url, title)` pair was already seen.
///
/// First-seen wins and later duplicates are dropped as-is, without merging
/// their metadata into the survivor.
pub fn deduplicate(results: Vec<SearchResult>) -> Vec<SearchResult> {
    let mut seen = HashSet::with_capacity(results.len());
    let before = results.len();

    let unique: Vec<SearchResult> = results
        .into_iter()
        .filter(|result| seen.insert(result.identity()))
        .collect();

    if unique.len() < before {
        tracing::debug!(dropped = before - unique.len(), "Removed duplicate results");
    }
    unique
}
