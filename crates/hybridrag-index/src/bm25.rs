use hybridrag_core::{Document, RagError, RagResult};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// BM25 tuning parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bm25Params {
    /// Term-frequency saturation.
    #[serde(default = "default_k1")]
    pub k1: f32,
    /// Document-length normalization strength, in `[0, 1]`.
    #[serde(default = "default_b")]
    pub b: f32,
}

fn default_k1() -> f32 {
    1.5
}

fn default_b() -> f32 {
    0.75
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self {
            k1: default_k1(),
            b: default_b(),
        }
    }
}

impl Bm25Params {
    /// Reject parameters outside their meaningful range.
    pub fn validate(&self) -> RagResult<()> {
        if !self.k1.is_finite() || self.k1 < 0.0 {
            return Err(RagError::Config(format!(
                "bm25.k1 must be a non-negative number, got {}",
                self.k1
            )));
        }
        if !(0.0..=1.0).contains(&self.b) {
            return Err(RagError::Config(format!(
                "bm25.b must be within [0, 1], got {}",
                self.b
            )));
        }
        Ok(())
    }
}

/// Tokenize text into lowercase terms, splitting on every character that is
/// not alphanumeric (whitespace and punctuation alike).
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// A document's occurrence count for one term.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Posting {
    /// Insertion ordinal of the document.
    doc: usize,
    tf: u32,
}

/// A BM25 inverted index for keyword-based document retrieval.
///
/// Maintains term → postings (in document insertion order), per-document
/// lengths, and the total corpus length. Document frequency for a term is
/// the length of its postings list, so it always agrees with exactly the
/// documents indexed.
#[derive(Debug, Clone, Default)]
pub struct LexicalIndex {
    params: Bm25Params,
    /// term -> postings, ordered by document insertion
    postings: HashMap<String, Vec<Posting>>,
    /// insertion ordinal -> document id
    doc_ids: Vec<String>,
    /// document id -> insertion ordinal
    positions: HashMap<String, usize>,
    /// insertion ordinal -> document length in tokens
    doc_lengths: Vec<u32>,
    total_length: u64,
}

impl LexicalIndex {
    /// Create a new, empty index with the given BM25 parameters.
    pub fn new(params: Bm25Params) -> Self {
        Self {
            params,
            ..Self::default()
        }
    }

    /// BM25 parameters in use.
    pub fn params(&self) -> Bm25Params {
        self.params
    }

    /// Add documents to the index.
    ///
    /// Re-adding an id that is already indexed (or repeating one inside the
    /// batch) fails with [`RagError::InvalidArgument`] and leaves the index
    /// untouched.
    pub fn add(&mut self, documents: &[Document]) -> RagResult<()> {
        let mut batch_ids = HashSet::with_capacity(documents.len());
        for doc in documents {
            if self.positions.contains_key(&doc.id) || !batch_ids.insert(doc.id.as_str()) {
                return Err(RagError::InvalidArgument(format!(
                    "document '{}' is already indexed",
                    doc.id
                )));
            }
        }

        for doc in documents {
            let ordinal = self.doc_ids.len();
            let tokens = tokenize(&doc.text);

            // Count term frequencies for this document
            let mut term_freq: HashMap<String, u32> = HashMap::new();
            for token in &tokens {
                *term_freq.entry(token.clone()).or_insert(0) += 1;
            }

            for (term, tf) in term_freq {
                self.postings
                    .entry(term)
                    .or_default()
                    .push(Posting { doc: ordinal, tf });
            }

            let len = tokens.len() as u32;
            self.doc_lengths.push(len);
            self.total_length += u64::from(len);
            self.positions.insert(doc.id.clone(), ordinal);
            self.doc_ids.push(doc.id.clone());
        }

        debug!(
            documents = self.doc_ids.len(),
            terms = self.postings.len(),
            "Lexical index updated"
        );
        Ok(())
    }

    /// Search the index for documents matching the query, returning up to
    /// `k` results sorted by descending BM25 score, ties by insertion order.
    ///
    /// Only documents sharing at least one query term are candidates.
    ///
    /// ```text
    /// score = sum over query terms of:
    ///   IDF(t) * (tf * (k1 + 1)) / (tf + k1 * (1 - b + b * dl / avgdl))
    /// IDF(t) = ln((N - df + 0.5) / (df + 0.5) + 1.0)
    /// ```
    pub fn search(&self, query: &str, k: usize) -> RagResult<Vec<(String, f32)>> {
        if k == 0 {
            return Err(RagError::InvalidArgument("k must be positive".to_string()));
        }
        if self.doc_ids.is_empty() {
            return Ok(Vec::new());
        }

        let query_tokens = tokenize(query);
        if query_tokens.is_empty() {
            return Ok(Vec::new());
        }

        let n = self.doc_ids.len() as f32;
        let avgdl = match self.total_length as f32 / n {
            avg if avg > 0.0 => avg,
            _ => 1.0,
        };
        let Bm25Params { k1, b } = self.params;

        let mut scores: HashMap<usize, f32> = HashMap::new();
        for token in &query_tokens {
            let Some(postings) = self.postings.get(token) else {
                continue;
            };
            let df = postings.len() as f32;
            // Robertson IDF (always non-negative)
            let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();

            for posting in postings {
                let tf = posting.tf as f32;
                let dl = self.doc_lengths[posting.doc] as f32;
                let numerator = tf * (k1 + 1.0);
                let denominator = tf + k1 * (1.0 - b + b * dl / avgdl);
                *scores.entry(posting.doc).or_insert(0.0) += idf * numerator / denominator;
            }
        }

        let mut results: Vec<(usize, f32)> = scores.into_iter().collect();
        results.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        results.truncate(k);

        Ok(results
            .into_iter()
            .map(|(ordinal, score)| (self.doc_ids[ordinal].clone(), score))
            .collect())
    }

    /// Number of documents currently indexed.
    pub fn document_count(&self) -> usize {
        self.doc_ids.len()
    }

    /// Number of distinct terms.
    pub fn term_count(&self) -> usize {
        self.postings.len()
    }

    /// Number of indexed documents containing `term` (already tokenized).
    pub fn document_frequency(&self, term: &str) -> usize {
        self.postings.get(term).map_or(0, Vec::len)
    }

    /// Token count of an indexed document.
    pub fn document_length(&self, id: &str) -> Option<usize> {
        self.positions
            .get(id)
            .map(|&ordinal| self.doc_lengths[ordinal] as usize)
    }

    /// Indexed ids in insertion order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.doc_ids.iter().map(String::as_str)
    }
}
