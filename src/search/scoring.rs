//! Relevance scoring and ranking.

use crate::models::SearchResult;

/// Title match bonus per query term
pub const TITLE_TERM_WEIGHT: f64 = 10.0;

/// Snippet match bonus per query term
pub const SNIPPET_TERM_WEIGHT: f64 = 5.0;

/// Cap on the popularity bonus
pub const MAX_POPULARITY_BONUS: f64 = 5.0;

/// Static weight for a result's source tag. Unknown sources weigh nothing.
pub fn source_weight(source: &str) -> f64 {
    match source {
        "documentation" => 4.0,
        "github-code" => 3.0,
        "github-repo" => 2.0,
        "file" | "web" => 1.0,
        _ => 0.0,
    }
}

/// Score `result` against lowercased query `terms`.
///
/// Terms match as case-insensitive substrings of the title and snippet.
/// Popularity contributes `popularity / 1000`, capped at 5 and never
/// negative.
pub fn relevance_score(terms: &[String], result: &SearchResult) -> f64 {
    let title = result.title.to_lowercase();
    let snippet = result.snippet.to_lowercase();

    let term_score: f64 = terms
        .iter()
        .map(|term| {
            let mut score = 0.0;
            if title.contains(term.as_str()) {
                score += TITLE_TERM_WEIGHT;
            }
            if snippet.contains(term.as_str()) {
                score += SNIPPET_TERM_WEIGHT;
            }
            score
        })
        .sum();

    let popularity = result
        .popularity
        .filter(|p| p.is_finite())
        .map(|p| (p / 1000.0).clamp(0.0, MAX_POPULARITY_BONUS))
        .unwrap_or(0.0);

    term_score + source_weight(&result.source) + popularity
}

/// Score every result, sort by descending score and assign 1-based ranks.
///
/// The sort is stable: equal scores keep their discovery order.
pub fn rank(terms: &[String], mut results: Vec<SearchResult>) -> Vec<SearchResult> {
    for result in &mut results {
        result.score = relevance_score(terms, result);
    }
    results.sort_by(|a, b| b.score.total_cmp(&a.score));
    for (index, result) in results.iter_mut().enumerate() {
        result.rank = index + 1;
    }
    results
}
