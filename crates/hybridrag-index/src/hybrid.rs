use std::collections::BTreeMap;
use std::sync::Arc;

use hybridrag_core::{is_scalar, Metadata, MetadataFilter, RagError, RagResult};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::snapshot::IndexSnapshot;

/// Retriever tuning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetrieverConfig {
    /// Weight of the dense signal: 0.0 = pure BM25, 1.0 = pure vector.
    #[serde(default = "default_alpha")]
    pub alpha: f32,
    /// Each side fetches `k * overfetch` candidates before fusion.
    #[serde(default = "default_overfetch")]
    pub overfetch: usize,
}

fn default_alpha() -> f32 {
    0.5
}

fn default_overfetch() -> usize {
    2
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            alpha: default_alpha(),
            overfetch: default_overfetch(),
        }
    }
}

impl RetrieverConfig {
    /// Reject an alpha outside `[0, 1]` or a zero over-fetch factor.
    pub fn validate(&self) -> RagResult<()> {
        if !(0.0..=1.0).contains(&self.alpha) {
            return Err(RagError::InvalidArgument(format!(
                "alpha must be within [0, 1], got {}",
                self.alpha
            )));
        }
        if self.overfetch == 0 {
            return Err(RagError::InvalidArgument(
                "overfetch must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// One ranked document with its per-signal scores.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalResult {
    /// Id of the matched document.
    pub document_id: String,
    /// Document text.
    pub text: String,
    /// Document metadata.
    pub metadata: Metadata,
    /// Raw cosine similarity, when the dense side returned this document.
    pub dense_score: Option<f32>,
    /// Raw BM25 score, when the lexical side returned this document.
    pub sparse_score: Option<f32>,
    /// Dense score after min-max normalization (0 when absent).
    pub dense_norm: f32,
    /// Lexical score after min-max normalization (0 when absent).
    pub sparse_norm: f32,
    /// `alpha * dense_norm + (1 - alpha) * sparse_norm`.
    pub fused_score: f32,
}

/// A fused candidate before it is resolved against the document store.
#[derive(Debug, Clone, PartialEq)]
struct Candidate {
    id: String,
    dense: Option<f32>,
    sparse: Option<f32>,
    dense_norm: f32,
    sparse_norm: f32,
    fused: f32,
}

/// Combines dense and lexical rankings over one [`IndexSnapshot`] using
/// min-max normalized linear fusion.
///
/// The snapshot is shared read-only, so one retriever (or many) can serve
/// concurrent queries.
///
/// ```text
/// fused = alpha * norm(dense) + (1 - alpha) * norm(bm25)
/// ```
#[derive(Debug, Clone)]
pub struct HybridRetriever {
    snapshot: Arc<IndexSnapshot>,
    config: RetrieverConfig,
}

impl HybridRetriever {
    /// Create a retriever. Fails with [`RagError::InvalidArgument`] when the
    /// config is out of range.
    pub fn new(snapshot: Arc<IndexSnapshot>, config: RetrieverConfig) -> RagResult<Self> {
        config.validate()?;
        Ok(Self { snapshot, config })
    }

    /// Dense weight in use.
    pub fn alpha(&self) -> f32 {
        self.config.alpha
    }

    /// Active configuration.
    pub fn config(&self) -> RetrieverConfig {
        self.config
    }

    /// The snapshot being queried.
    pub fn snapshot(&self) -> &Arc<IndexSnapshot> {
        &self.snapshot
    }

    /// Hybrid search.
    ///
    /// Both sides fetch `k * overfetch` candidates, each side is normalized
    /// within its own candidate set, and the union is ranked by fused score
    /// (ties by id). Metadata filters apply after ranking, then the list is
    /// truncated to `k`.
    pub fn search(
        &self,
        query_text: &str,
        query_embedding: &[f32],
        k: usize,
        filters: &MetadataFilter,
    ) -> RagResult<Vec<RetrievalResult>> {
        validate_request(k, filters)?;
        if self.snapshot.is_empty() {
            return Ok(Vec::new());
        }

        let fetch = k.saturating_mul(self.config.overfetch);
        let dense = self.snapshot.vectors().search(query_embedding, fetch)?;
        let sparse = self.snapshot.lexical().search(query_text, fetch)?;
        debug!(
            dense = dense.len(),
            sparse = sparse.len(),
            fetch,
            "Hybrid candidates collected"
        );

        let candidates = fuse(&dense, &sparse, self.config.alpha);
        self.resolve(candidates, k, filters)
    }

    /// Dense-only ranking, normalized the same way as [`Self::search`].
    pub fn search_dense(
        &self,
        query_embedding: &[f32],
        k: usize,
        filters: &MetadataFilter,
    ) -> RagResult<Vec<RetrievalResult>> {
        validate_request(k, filters)?;
        if self.snapshot.is_empty() {
            return Ok(Vec::new());
        }
        let fetch = k.saturating_mul(self.config.overfetch);
        let dense = self.snapshot.vectors().search(query_embedding, fetch)?;
        self.resolve(fuse(&dense, &[], 1.0), k, filters)
    }

    /// BM25-only ranking, normalized the same way as [`Self::search`].
    pub fn search_lexical(
        &self,
        query_text: &str,
        k: usize,
        filters: &MetadataFilter,
    ) -> RagResult<Vec<RetrievalResult>> {
        validate_request(k, filters)?;
        if self.snapshot.is_empty() {
            return Ok(Vec::new());
        }
        let fetch = k.saturating_mul(self.config.overfetch);
        let sparse = self.snapshot.lexical().search(query_text, fetch)?;
        self.resolve(fuse(&[], &sparse, 0.0), k, filters)
    }

    fn resolve(
        &self,
        candidates: Vec<Candidate>,
        k: usize,
        filters: &MetadataFilter,
    ) -> RagResult<Vec<RetrievalResult>> {
        let documents = self.snapshot.documents();
        let mut results = Vec::with_capacity(k.min(candidates.len()));
        for candidate in candidates {
            let document = documents.get(&candidate.id)?;
            if !document.matches(filters) {
                continue;
            }
            results.push(RetrievalResult {
                document_id: candidate.id,
                text: document.text.clone(),
                metadata: document.metadata.clone(),
                dense_score: candidate.dense,
                sparse_score: candidate.sparse,
                dense_norm: candidate.dense_norm,
                sparse_norm: candidate.sparse_norm,
                fused_score: candidate.fused,
            });
            if results.len() == k {
                break;
            }
        }
        Ok(results)
    }
}

/// Format results as the numbered context block handed to a language model.
pub fn retrieve_context(results: &[RetrievalResult]) -> String {
    let mut parts = Vec::with_capacity(results.len() * 4);
    for (i, result) in results.iter().enumerate() {
        parts.push(format!("[Document {}]", i + 1));
        parts.push(result.text.clone());
        parts.push(format!("(Hybrid Score: {:.3})", result.fused_score));
        parts.push(String::new());
    }
    parts.join("\n")
}

fn validate_request(k: usize, filters: &MetadataFilter) -> RagResult<()> {
    if k == 0 {
        return Err(RagError::InvalidArgument("k must be positive".to_string()));
    }
    for (field, value) in filters {
        if field.is_empty() {
            return Err(RagError::InvalidArgument(
                "filter field name must not be empty".to_string(),
            ));
        }
        if !is_scalar(value) {
            return Err(RagError::InvalidArgument(format!(
                "filter on '{field}' must be a scalar"
            )));
        }
    }
    Ok(())
}

/// Scale scores into `[0, 1]` relative to their own set. A set with a single
/// distinct value maps to 1.0 when that value is positive, else 0.0.
fn min_max_normalize(scores: &[f32]) -> Vec<f32> {
    let Some(min) = scores.iter().copied().reduce(f32::min) else {
        return Vec::new();
    };
    let max = scores.iter().copied().fold(min, f32::max);
    let range = max - min;

    if range > 0.0 {
        scores
            .iter()
            .map(|s| ((s - min) / range).clamp(0.0, 1.0))
            .collect()
    } else {
        let flat = if max > 0.0 { 1.0 } else { 0.0 };
        vec![flat; scores.len()]
    }
}

/// Union both candidate lists and rank them by fused score, ties by id.
fn fuse(dense: &[(String, f32)], sparse: &[(String, f32)], alpha: f32) -> Vec<Candidate> {
    let dense_raw: Vec<f32> = dense.iter().map(|(_, s)| *s).collect();
    let sparse_raw: Vec<f32> = sparse.iter().map(|(_, s)| *s).collect();
    let dense_norm = min_max_normalize(&dense_raw);
    let sparse_norm = min_max_normalize(&sparse_raw);

    let mut merged: BTreeMap<&str, Candidate> = BTreeMap::new();
    let blank = |id: &str| Candidate {
        id: id.to_string(),
        dense: None,
        sparse: None,
        dense_norm: 0.0,
        sparse_norm: 0.0,
        fused: 0.0,
    };

    for ((id, raw), norm) in dense.iter().zip(dense_norm) {
        let entry = merged.entry(id.as_str()).or_insert_with(|| blank(id));
        entry.dense = Some(*raw);
        entry.dense_norm = norm;
    }
    for ((id, raw), norm) in sparse.iter().zip(sparse_norm) {
        let entry = merged.entry(id.as_str()).or_insert_with(|| blank(id));
        entry.sparse = Some(*raw);
        entry.sparse_norm = norm;
    }

    let mut candidates: Vec<Candidate> = merged
        .into_values()
        .map(|mut c| {
            c.fused = (alpha * c.dense_norm + (1.0 - alpha) * c.sparse_norm).clamp(0.0, 1.0);
            c
        })
        .collect();
    candidates.sort_by(|a, b| b.fused.total_cmp(&a.fused).then_with(|| a.id.cmp(&b.id)));
    candidates
}
