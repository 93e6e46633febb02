//! Deterministic keyword-coverage scorer, used whenever the remote model
//! cannot produce a trustworthy answer. Pure and fully testable.

/// Coverage score plus the keywords actually found in the text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordScore {
    pub score: u32,
    pub matched: Vec<String>,
}

/// Case-insensitive keyword coverage: `round(100 * matched / distinct)`.
///
/// Duplicate keywords are collapsed (first spelling wins) before the
/// denominator is computed. An empty keyword list scores 0 with no matches.
pub fn score_keywords(text: &str, keywords: &[String]) -> KeywordScore {
    let distinct = dedupe_keywords(keywords);
    if distinct.is_empty() {
        return KeywordScore {
            score: 0,
            matched: vec![],
        };
    }

    let haystack = text.to_lowercase();
    let matched: Vec<String> = distinct
        .iter()
        .filter(|kw| haystack.contains(&kw.to_lowercase()))
        .cloned()
        .collect();

    let ratio = matched.len() as f64 / distinct.len() as f64;
    let score = (ratio * 100.0).round().clamp(0.0, 100.0) as u32;

    KeywordScore { score, matched }
}

/// Collapses case-insensitive duplicates, preserving order and the first
/// spelling encountered.
pub fn dedupe_keywords(keywords: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    keywords
        .iter()
        .filter(|kw| seen.insert(kw.to_lowercase()))
        .cloned()
        .collect()
}
