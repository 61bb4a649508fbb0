use hybridrag_core::{RagError, RagResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};

use crate::embedding::{l2_norm, l2_normalize};
use crate::persist::{self, FORMAT_VERSION};
use crate::snapshot::SnapshotStamp;

/// Maximum distance from 1.0 a stored vector's norm may drift before a
/// snapshot is considered corrupt.
pub const NORM_TOLERANCE: f32 = 1e-4;

/// One stored vector and the document it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct VectorEntry {
    id: String,
    vector: Vec<f32>,
}

#[derive(Serialize, Deserialize)]
struct PersistedVectors {
    format_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    snapshot: Option<SnapshotStamp>,
    dimension: Option<usize>,
    entries: Vec<VectorEntry>,
}

/// Exact (brute-force) cosine-similarity index over unit-length vectors.
///
/// Every stored vector is L2-normalized on insert, so similarity reduces to
/// an inner product. The dimensionality is fixed by the first `add` and
/// enforced for every later insert and query. Suitable for corpora of a few
/// thousand chunks; a query costs O(n·d).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VectorIndex {
    dimension: Option<usize>,
    entries: Vec<VectorEntry>,
}

impl VectorIndex {
    /// Create an empty index; the dimensionality is set by the first insert.
    pub fn new() -> Self {
        Self::default()
    }

    /// Dimensionality of stored vectors, or `None` before the first insert.
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    /// Number of stored vectors.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the index holds no vectors.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stored `(document_id, vector)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[f32])> {
        self.entries
            .iter()
            .map(|e| (e.id.as_str(), e.vector.as_slice()))
    }

    /// Append vectors for the given document ids.
    ///
    /// The whole batch is validated before anything is stored: on error the
    /// index is left unchanged. Fails with [`RagError::DimensionMismatch`]
    /// when a vector's length differs from the index dimensionality, and with
    /// [`RagError::InvalidArgument`] for mismatched input lengths, duplicate
    /// ids, empty or zero vectors and non-finite components.
    pub fn add(&mut self, vectors: Vec<Vec<f32>>, ids: Vec<String>) -> RagResult<()> {
        if vectors.len() != ids.len() {
            return Err(RagError::InvalidArgument(format!(
                "got {} vectors for {} ids",
                vectors.len(),
                ids.len()
            )));
        }
        let Some(first) = vectors.first() else {
            return Ok(());
        };

        let dimension = match self.dimension {
            Some(d) => d,
            None if first.is_empty() => {
                return Err(RagError::InvalidArgument(
                    "cannot index zero-length vectors".to_string(),
                ))
            }
            None => first.len(),
        };

        let mut known: HashSet<String> = self.entries.iter().map(|e| e.id.clone()).collect();
        let mut staged = Vec::with_capacity(vectors.len());
        for (mut vector, id) in vectors.into_iter().zip(ids) {
            if !known.insert(id.clone()) {
                return Err(RagError::InvalidArgument(format!(
                    "vector for '{id}' is already indexed"
                )));
            }
            if vector.len() != dimension {
                return Err(RagError::DimensionMismatch {
                    expected: dimension,
                    actual: vector.len(),
                });
            }
            if vector.iter().any(|x| !x.is_finite()) {
                return Err(RagError::InvalidArgument(format!(
                    "vector for '{id}' has non-finite components"
                )));
            }
            if !l2_normalize(&mut vector) {
                return Err(RagError::InvalidArgument(format!(
                    "vector for '{id}' has zero norm"
                )));
            }
            staged.push(VectorEntry { id, vector });
        }

        self.dimension = Some(dimension);
        self.entries.extend(staged);
        debug!(count = self.entries.len(), dimension, "Vectors added");
        Ok(())
    }

    /// Return up to `k` `(document_id, similarity)` pairs, most similar first.
    ///
    /// The query is normalized before scoring; a zero query scores `0.0`
    /// against everything. Ties keep insertion order. An empty index yields
    /// an empty list regardless of the query's shape.
    pub fn search(&self, query: &[f32], k: usize) -> RagResult<Vec<(String, f32)>> {
        if k == 0 {
            return Err(RagError::InvalidArgument("k must be positive".to_string()));
        }
        let Some(dimension) = self.dimension else {
            return Ok(Vec::new());
        };
        if self.entries.is_empty() {
            return Ok(Vec::new());
        }
        if query.len() != dimension {
            return Err(RagError::DimensionMismatch {
                expected: dimension,
                actual: query.len(),
            });
        }

        let mut query = query.to_vec();
        if !l2_normalize(&mut query) {
            query.iter_mut().for_each(|v| *v = 0.0);
        }

        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(pos, e)| (pos, dot(&query, &e.vector).clamp(-1.0, 1.0)))
            .collect();

        // Stable sort keeps insertion order among equal similarities.
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(pos, score)| (self.entries[pos].id.clone(), score))
            .collect())
    }

    /// Serialize the full vector set, id mapping and dimensionality.
    pub fn to_bytes(&self) -> RagResult<Vec<u8>> {
        self.encode(None)
    }

    pub(crate) fn encode(&self, stamp: Option<&SnapshotStamp>) -> RagResult<Vec<u8>> {
        let persisted = PersistedVectors {
            format_version: FORMAT_VERSION,
            snapshot: stamp.copied(),
            dimension: self.dimension,
            entries: self.entries.clone(),
        };
        Ok(serde_json::to_vec(&persisted)?)
    }

    /// Rebuild an index from [`VectorIndex::to_bytes`] output, checking every
    /// invariant the in-memory index relies on.
    pub fn from_bytes(bytes: &[u8]) -> RagResult<Self> {
        Self::decode(bytes).map(|(index, _)| index)
    }

    pub(crate) fn decode(bytes: &[u8]) -> RagResult<(Self, Option<SnapshotStamp>)> {
        let persisted: PersistedVectors = serde_json::from_slice(bytes)
            .map_err(|e| RagError::CorruptIndex(format!("invalid vector artifact: {e}")))?;

        if persisted.format_version != FORMAT_VERSION {
            return Err(RagError::CorruptIndex(format!(
                "unsupported vector format_version {} (expected {FORMAT_VERSION})",
                persisted.format_version
            )));
        }

        if !persisted.entries.is_empty() {
            let Some(dimension) = persisted.dimension else {
                return Err(RagError::CorruptIndex(
                    "vectors present but dimension missing".to_string(),
                ));
            };
            let mut seen = HashSet::with_capacity(persisted.entries.len());
            for entry in &persisted.entries {
                if entry.vector.len() != dimension {
                    return Err(RagError::CorruptIndex(format!(
                        "vector for '{}' has length {} (expected {dimension})",
                        entry.id,
                        entry.vector.len()
                    )));
                }
                let norm = l2_norm(&entry.vector);
                if !norm.is_finite() || (norm - 1.0).abs() > NORM_TOLERANCE {
                    return Err(RagError::CorruptIndex(format!(
                        "vector for '{}' is not unit length (norm {norm})",
                        entry.id
                    )));
                }
                if !seen.insert(entry.id.as_str()) {
                    return Err(RagError::CorruptIndex(format!(
                        "duplicate vector id '{}'",
                        entry.id
                    )));
                }
            }
        }

        let index = Self {
            dimension: persisted.dimension,
            entries: persisted.entries,
        };
        Ok((index, persisted.snapshot))
    }

    /// Persist the index to `path` (temp file + rename).
    pub async fn save(&self, path: &Path) -> RagResult<()> {
        persist::write_atomic(path, &self.to_bytes()?).await?;
        info!(path = %path.display(), vectors = self.len(), "Vector index saved");
        Ok(())
    }

    /// Load an index saved with [`VectorIndex::save`].
    ///
    /// Fails with [`RagError::IndexNotFound`] when nothing exists at `path`
    /// and [`RagError::CorruptIndex`] when the content is not a valid index.
    pub async fn load(path: &Path) -> RagResult<Self> {
        let bytes = persist::read_if_exists(path)
            .await?
            .ok_or_else(|| RagError::IndexNotFound(path.display().to_string()))?;
        let index = Self::from_bytes(&bytes)?;
        info!(path = %path.display(), vectors = index.len(), "Vector index loaded");
        Ok(index)
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}
