//! Query route classification
//!
//! A small rule table over structural-token and semantic-history regex
//! sets, not a learned model. The rule set must be preserved verbatim for
//! reproducibility of rankings.

use crate::types::Route;
use once_cell::sync::Lazy;
use regex::Regex;

/// Phrases that signal a code-structure question
static STRUCTURAL_PHRASES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(calls?|called by|depends on|imports?|implements|extends|what uses|used by|callers? of|callees? of|references)\b",
    )
    .expect("structural phrase regex is valid")
});

/// Identifier-looking tokens: lowerCamelCase, snake_case, or a name
/// followed by a call parenthesis. Capitalised prose words are deliberately
/// not matched.
static IDENTIFIER_TOKENS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[a-z]+[A-Z][A-Za-z0-9]*\b|\b[a-z][a-z0-9]*_[a-z0-9_]+\b|\b[A-Za-z_][A-Za-z0-9_]{2,}\(")
        .expect("identifier regex is valid")
});

/// Phrases that signal a question about decisions and their history
static SEMANTIC_PHRASES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(why did we|why was|decided|decisions?|trade-?offs?|history|chose|choose|chosen|rationale|reasoning)\b",
    )
    .expect("semantic phrase regex is valid")
});

/// Whether the query carries structural (code-graph) signals
pub fn has_structural_tokens(query: &str) -> bool {
    STRUCTURAL_PHRASES.is_match(query) || IDENTIFIER_TOKENS.is_match(query)
}

/// Whether the query carries semantic-history signals
pub fn has_semantic_tokens(query: &str) -> bool {
    SEMANTIC_PHRASES.is_match(query)
}

/// Map (query, include_code_graph) to a retrieval route
pub fn classify_route(query: &str, include_code_graph: bool) -> Route {
    if !include_code_graph {
        return Route::Memory;
    }
    let structural = has_structural_tokens(query);
    let semantic = has_semantic_tokens(query);
    match (structural, semantic) {
        (true, false) => Route::Code,
        (true, true) => Route::Hybrid,
        _ => Route::Memory,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structural_and_semantic_is_hybrid() {
        let query = "What calls validateToken and why did we choose this design?";
        assert_eq!(classify_route(query, true), Route::Hybrid);
    }

    #[test]
    fn test_code_graph_disabled_forces_memory() {
        let query = "What calls validateToken and why did we choose this design?";
        assert_eq!(classify_route(query, false), Route::Memory);
    }

    #[test]
    fn test_history_question_is_memory_route() {
        // "PostgreSQL" is a capitalised prose word, not an identifier signal.
        let query = "Why did we choose PostgreSQL and what was the tradeoff?";
        assert_eq!(classify_route(query, true), Route::Memory);
    }

    #[test]
    fn test_pure_structural_is_code_route() {
        let query = "What calls validateToken and what depends on AuthService?";
        assert_eq!(classify_route(query, true), Route::Code);
    }

    #[test]
    fn test_plain_question_is_memory() {
        assert_eq!(classify_route("how does the login flow work", true), Route::Memory);
    }

    #[test]
    fn test_identifier_alone_is_structural() {
        assert_eq!(classify_route("parseConfig behaviour", true), Route::Code);
        assert_eq!(classify_route("handle_request hot path", true), Route::Code);
        assert_eq!(classify_route("main() entrypoint", true), Route::Code);
    }

    #[test]
    fn test_capitalised_words_alone_are_not_structural() {
        assert_eq!(classify_route("Kubernetes deployment overview", true), Route::Memory);
    }
}
