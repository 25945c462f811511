//! Synonym expansion for the lexical channel.
//!
//! BM25 only matches literal tokens, so an abbreviation such as `ml` never
//! meets a chunk that spells out `machine learning`. The expander appends
//! related terms to the lexical query. The semantic channel always sees the
//! original query.

use std::collections::{BTreeMap, HashSet};

use tracing::debug;

use crate::config::ExpansionConfig;

const BUILTIN: [(&str, &[&str]); 8] = [
    ("ml", &["machine learning", "ai", "artificial intelligence"]),
    ("ai", &["artificial intelligence", "machine learning", "ml"]),
    ("rag", &["retrieval augmented generation", "retrieval-augmented generation"]),
    ("llm", &["large language model", "language model", "ai model"]),
    ("pdf", &["document", "file"]),
    ("email", &["message", "mail", "correspondence"]),
    ("db", &["database"]),
    ("api", &["application programming interface", "endpoint"]),
];

/// Expands queries with related terms from a lower-case rule table.
#[derive(Debug, Clone)]
pub struct QueryExpander {
    rules: BTreeMap<String, Vec<String>>,
}

impl Default for QueryExpander {
    fn default() -> Self {
        let rules = BUILTIN
            .iter()
            .map(|(term, related)| {
                (term.to_string(), related.iter().map(|r| r.to_string()).collect())
            })
            .collect();
        Self { rules }
    }
}

impl QueryExpander {
    /// The built-in table with `config.synonyms` merged over it.
    pub fn from_config(config: &ExpansionConfig) -> Self {
        let mut expander = Self::default();
        for (term, related) in &config.synonyms {
            expander.add_rule(term, related.iter().map(String::as_str));
        }
        expander
    }

    /// Add or replace the expansion rule for `term`.
    pub fn add_rule<'a>(&mut self, term: &str, related: impl IntoIterator<Item = &'a str>) {
        self.rules
            .insert(term.to_lowercase(), related.into_iter().map(str::to_lowercase).collect());
    }

    /// Expand `query`.
    ///
    /// The result keeps the original tokens in order and appends the tokens
    /// of every matching rule, skipping tokens already present. Output is
    /// lower-case and deterministic.
    pub fn expand(&self, query: &str) -> String {
        let words: Vec<String> = query.split_whitespace().map(str::to_lowercase).collect();
        let mut seen: HashSet<String> = words.iter().cloned().collect();
        let mut terms = words.clone();

        for word in &words {
            let Some(related) = self.rules.get(word) else {
                continue;
            };
            for token in related.iter().flat_map(|r| r.split_whitespace()) {
                if seen.insert(token.to_string()) {
                    terms.push(token.to_string());
                }
            }
        }

        let expanded = terms.join(" ");
        if terms.len() > words.len() {
            debug!(original = query, expanded = %expanded, "expanded lexical query");
        }
        expanded
    }
}
