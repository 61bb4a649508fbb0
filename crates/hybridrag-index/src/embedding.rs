use async_trait::async_trait;
use hybridrag_core::{RagError, RagResult};
use std::collections::BTreeMap;

use crate::bm25::tokenize;

/// Computes dense vector representations of text.
///
/// Implementations must be deterministic for identical input within the
/// lifetime of one index: the query embedding has to come from the same
/// model that embedded the documents.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text.
    async fn embed(&self, text: &str) -> RagResult<Vec<f32>>;

    /// Embed a batch of texts, one vector per input in the same order.
    async fn embed_batch(&self, texts: &[&str]) -> RagResult<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }

    /// Length of every vector this provider returns.
    fn dimension(&self) -> usize;
}

/// Hash probes per term: (seed, weight).
const PROBES: [(u8, f32); 3] = [(0, 1.0), (1, 0.7), (2, 0.5)];

/// Offline feature-hashing embedder.
///
/// Each term is hashed into three signed slots weighted by `1 + ln(tf)`, then
/// the vector is L2-normalized. Single-character terms are dropped unless
/// nothing else is left, and text with no alphanumeric tokens at all is
/// hashed by its whitespace-separated words, so any non-blank text gets a
/// direction. Texts sharing vocabulary land close together; there is no
/// semantic generalization.
#[derive(Debug, Clone)]
pub struct LocalEmbedding {
    dimension: usize,
}

impl LocalEmbedding {
    /// Create a provider producing vectors of `dimension` components.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }
}

impl Default for LocalEmbedding {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl EmbeddingProvider for LocalEmbedding {
    async fn embed(&self, text: &str) -> RagResult<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(RagError::EmbeddingFailure(
                "cannot embed blank text".to_string(),
            ));
        }

        // Ordered map so float accumulation order, and thus output, is stable.
        let mut counts: BTreeMap<String, u32> = BTreeMap::new();
        for term in terms(text) {
            *counts.entry(term).or_insert(0) += 1;
        }

        let mut vector = vec![0.0f32; self.dimension];
        for (term, count) in &counts {
            let weight = 1.0 + (*count as f32).ln();
            for (seed, scale) in PROBES {
                let hash = fnv1a64(seed, term.as_bytes());
                let slot = (hash % self.dimension as u64) as usize;
                let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
                vector[slot] += sign * scale * weight;
            }
        }

        l2_normalize(&mut vector);
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

fn terms(text: &str) -> Vec<String> {
    let tokens = tokenize(text);
    let long: Vec<String> = tokens
        .iter()
        .filter(|t| t.chars().count() > 1)
        .cloned()
        .collect();
    if !long.is_empty() {
        long
    } else if !tokens.is_empty() {
        tokens
    } else {
        text.split_whitespace().map(str::to_lowercase).collect()
    }
}

/// Scale `vector` to unit L2 norm in place.
///
/// Returns `false` (leaving the vector untouched) when the norm is zero or
/// not finite, since such a vector has no direction.
pub fn l2_normalize(vector: &mut [f32]) -> bool {
    let norm = l2_norm(vector);
    if norm == 0.0 || !norm.is_finite() {
        return false;
    }
    vector.iter_mut().for_each(|v| *v /= norm);
    true
}

/// Euclidean length of `vector`.
pub fn l2_norm(vector: &[f32]) -> f32 {
    vector.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// 64-bit FNV-1a over a seed byte followed by `data`.
fn fnv1a64(seed: u8, data: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    std::iter::once(seed)
        .chain(data.iter().copied())
        .fold(OFFSET, |hash, byte| {
            (hash ^ u64::from(byte)).wrapping_mul(PRIME)
        })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[tokio::test]
    async fn test_output_has_configured_dimension() {
        let emb = LocalEmbedding::new(64);
        assert_eq!(emb.dimension(), 64);
        assert_eq!(emb.embed("espresso machine").await.unwrap().len(), 64);
        assert_eq!(LocalEmbedding::new(0).dimension(), 1);
    }

    #[tokio::test]
    async fn test_output_is_unit_length() {
        let emb = LocalEmbedding::default();
        let v = emb
            .embed("Stainless steel espresso machine, 15 bar pump")
            .await
            .unwrap();
        assert!((l2_norm(&v) - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_shared_vocabulary_scores_higher() {
        let emb = LocalEmbedding::default();
        let kettle = emb.embed("electric kettle with temperature control").await.unwrap();
        let similar = emb.embed("electric kettle, stainless steel").await.unwrap();
        let unrelated = emb.embed("hiking boots for winter trails").await.unwrap();
        assert!(cosine(&kettle, &similar) > cosine(&kettle, &unrelated));
    }

    #[tokio::test]
    async fn test_identical_text_is_identical_vector() {
        let emb = LocalEmbedding::default();
        let a = emb.embed("red car red car blue").await.unwrap();
        let b = emb.embed("red car red car blue").await.unwrap();
        assert_eq!(a, b);
        assert!((cosine(&a, &b) - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_blank_text_fails() {
        let emb = LocalEmbedding::default();
        for text in ["", "   \n"] {
            assert!(matches!(
                emb.embed(text).await,
                Err(RagError::EmbeddingFailure(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_short_texts_still_have_direction() {
        let emb = LocalEmbedding::new(16);
        for text in ["C", "5 %", "x y", "%%", "-- ++"] {
            let v = emb.embed(text).await.unwrap();
            assert!((l2_norm(&v) - 1.0).abs() < 1e-5, "{text:?}");
        }
    }

    #[test]
    fn test_single_letters_dropped_when_longer_terms_exist() {
        assert_eq!(terms("a red car"), vec!["red", "car"]);
        assert_eq!(terms("x y"), vec!["x", "y"]);
        assert_eq!(terms("%% !"), vec!["%%", "!"]);
    }

    #[tokio::test]
    async fn test_default_batch_matches_single_calls() {
        let emb = LocalEmbedding::new(32);
        let batch = emb.embed_batch(&["red apple", "blue car"]).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[1], emb.embed("blue car").await.unwrap());
    }

    #[test]
    fn test_l2_normalize() {
        let mut zero = vec![0.0f32; 4];
        assert!(!l2_normalize(&mut zero));
        assert_eq!(zero, vec![0.0; 4]);

        let mut v = vec![3.0f32, 4.0];
        assert!(l2_normalize(&mut v));
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);

        let mut inf = vec![f32::INFINITY, 1.0];
        assert!(!l2_normalize(&mut inf));
    }
}
