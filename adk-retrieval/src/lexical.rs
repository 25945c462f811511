//! Exact-term scoring with BM25.
//!
//! A [`Bm25Index`] is an immutable snapshot of corpus-wide term statistics.
//! Document frequencies and the average chunk length change whenever a chunk
//! is added or removed, so the index is never patched in place: the index
//! manager builds a fresh one from the full chunk set and swaps it in.
//!
//! Tokenization is deliberately simple (lower-case, whitespace-delimited, no
//! stemming) so every score can be explained by pointing at literal tokens.

use std::collections::{BTreeMap, HashMap};

use crate::config::Bm25Config;

/// Split text into lower-case whitespace-delimited tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split_whitespace().map(str::to_lowercase).collect()
}

#[derive(Debug, Clone, Copy)]
struct Posting {
    doc: usize,
    tf: u32,
}

/// Inverted BM25 statistics over a fixed set of chunks.
#[derive(Debug, Clone)]
pub struct Bm25Index {
    version: u64,
    params: Bm25Config,
    ids: Vec<String>,
    doc_lens: Vec<usize>,
    avg_len: f64,
    postings: HashMap<String, Vec<Posting>>,
}

impl Bm25Index {
    /// An index with no chunks, built for `version`.
    pub fn empty(version: u64, params: Bm25Config) -> Self {
        Self {
            version,
            params,
            ids: Vec::new(),
            doc_lens: Vec::new(),
            avg_len: 0.0,
            postings: HashMap::new(),
        }
    }

    /// Build statistics over `(chunk_id, text)` pairs for corpus `version`.
    ///
    /// Chunks are indexed in ascending id order, so the same chunk set always
    /// yields the same index regardless of input order.
    pub fn build<'a, I>(version: u64, params: Bm25Config, chunks: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut sorted: Vec<(&str, &str)> = chunks.into_iter().collect();
        sorted.sort_by(|a, b| a.0.cmp(b.0));
        sorted.dedup_by(|a, b| a.0 == b.0);

        let mut index = Self::empty(version, params);
        let mut total_len = 0usize;

        for (doc, (id, text)) in sorted.into_iter().enumerate() {
            let tokens = tokenize(text);
            total_len += tokens.len();
            index.ids.push(id.to_string());
            index.doc_lens.push(tokens.len());

            let mut counts: HashMap<String, u32> = HashMap::new();
            for token in tokens {
                *counts.entry(token).or_default() += 1;
            }
            for (term, tf) in counts {
                index.postings.entry(term).or_default().push(Posting { doc, tf });
            }
        }

        if !index.ids.is_empty() {
            index.avg_len = total_len as f64 / index.ids.len() as f64;
        }
        index
    }

    /// The corpus version this index was built from.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Number of indexed chunks (`N`).
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether no chunks are indexed.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Indexed chunk ids in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(String::as_str)
    }

    /// Mean chunk length in tokens.
    pub fn avg_len(&self) -> f64 {
        self.avg_len
    }

    /// Number of chunks containing `term` (`n_t`).
    pub fn doc_freq(&self, term: &str) -> usize {
        self.postings.get(&term.to_lowercase()).map_or(0, Vec::len)
    }

    /// `ln((N - n_t + 0.5) / (n_t + 0.5) + 1)`; always positive.
    pub fn idf(&self, term: &str) -> f64 {
        let n = self.ids.len() as f64;
        let n_t = self.doc_freq(term) as f64;
        ((n - n_t + 0.5) / (n_t + 0.5) + 1.0).ln()
    }

    fn raw_scores(&self, query: &str) -> Vec<f64> {
        let mut scores = vec![0.0f64; self.ids.len()];
        if self.ids.is_empty() {
            return scores;
        }

        let k1 = f64::from(self.params.k1);
        let b = f64::from(self.params.b);
        let n = self.ids.len() as f64;
        let avg_len = if self.avg_len > 0.0 { self.avg_len } else { 1.0 };

        for term in tokenize(query) {
            let Some(postings) = self.postings.get(&term) else {
                continue;
            };
            let n_t = postings.len() as f64;
            let idf = ((n - n_t + 0.5) / (n_t + 0.5) + 1.0).ln();
            for posting in postings {
                let tf = f64::from(posting.tf);
                let len_norm = 1.0 - b + b * self.doc_lens[posting.doc] as f64 / avg_len;
                scores[posting.doc] += idf * tf * (k1 + 1.0) / (tf + k1 * len_norm);
            }
        }
        scores
    }

    /// Score every indexed chunk against `query`.
    ///
    /// The map is dense: chunks sharing no term with the query score 0.
    pub fn get_scores(&self, query: &str) -> BTreeMap<String, f32> {
        self.ids.iter().cloned().zip(self.raw_scores(query).into_iter().map(|s| s as f32)).collect()
    }

    /// The `n` best chunks with a positive score, by descending score and then
    /// ascending id.
    pub fn top_n(&self, query: &str, n: usize) -> Vec<(String, f32)> {
        let mut ranked: Vec<(usize, f64)> =
            self.raw_scores(query).into_iter().enumerate().filter(|(_, s)| *s > 0.0).collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(n);
        ranked.into_iter().map(|(doc, score)| (self.ids[doc].clone(), score as f32)).collect()
    }
}
