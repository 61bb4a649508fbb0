use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use hybridrag_core::{Document, RagError, RagResult};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::bm25::{Bm25Params, LexicalIndex};
use crate::document_store::DocumentStore;
use crate::embedding::{l2_normalize, EmbeddingProvider};
use crate::snapshot::IndexSnapshot;
use crate::vector::VectorIndex;

/// Index build tuning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BuilderConfig {
    /// Documents sent to the embedding provider per call.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_batch_size() -> usize {
    32
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
        }
    }
}

impl BuilderConfig {
    /// Reject a zero batch size.
    pub fn validate(&self) -> RagResult<()> {
        if self.batch_size == 0 {
            return Err(RagError::Config(
                "builder.batch_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// One-shot construction of an [`IndexSnapshot`] from a document collection.
///
/// Nothing is indexed until every embedding batch has succeeded, so a failed
/// build leaves no partial state behind (and nothing on disk).
pub struct IndexBuilder {
    embedder: Arc<dyn EmbeddingProvider>,
    config: BuilderConfig,
    params: Bm25Params,
}

impl IndexBuilder {
    /// Create a builder around an embedding provider.
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        config: BuilderConfig,
        params: Bm25Params,
    ) -> RagResult<Self> {
        config.validate()?;
        params.validate()?;
        Ok(Self {
            embedder,
            config,
            params,
        })
    }

    /// Validate, embed and index `documents`.
    pub async fn build(&self, documents: Vec<Document>) -> RagResult<IndexSnapshot> {
        validate_documents(&documents)?;
        if documents.is_empty() {
            info!("No documents supplied, building an empty index");
            return Ok(IndexSnapshot::empty(self.params));
        }

        let vectors = self.embed_all(&documents).await?;
        let ids: Vec<String> = documents.iter().map(|d| d.id.clone()).collect();

        let mut vector_index = VectorIndex::new();
        vector_index.add(vectors, ids)?;

        let mut lexical = LexicalIndex::new(self.params);
        lexical.add(&documents)?;

        let mut store = DocumentStore::new();
        for document in documents {
            store.insert(document)?;
        }

        let snapshot = IndexSnapshot::from_parts(vector_index, lexical, store)?;
        info!(
            documents = snapshot.len(),
            terms = snapshot.lexical().term_count(),
            dimension = ?snapshot.vectors().dimension(),
            "Index built"
        );
        Ok(snapshot)
    }

    /// [`Self::build`], then save the snapshot under `root`.
    pub async fn build_and_persist(
        &self,
        documents: Vec<Document>,
        root: &Path,
    ) -> RagResult<IndexSnapshot> {
        let snapshot = self.build(documents).await?;
        snapshot.save(root).await?;
        Ok(snapshot)
    }

    async fn embed_all(&self, documents: &[Document]) -> RagResult<Vec<Vec<f32>>> {
        let batch_size = self.config.batch_size;
        let batches = documents.len().div_ceil(batch_size);
        let mut vectors = Vec::with_capacity(documents.len());

        for (batch, chunk) in documents.chunks(batch_size).enumerate() {
            let texts: Vec<&str> = chunk.iter().map(|d| d.text.as_str()).collect();
            let embedded = self
                .embedder
                .embed_batch(&texts)
                .await
                .map_err(|e| match e {
                    RagError::EmbeddingFailure(_) => e,
                    other => RagError::EmbeddingFailure(format!(
                        "batch {} of {batches} failed: {other}",
                        batch + 1
                    )),
                })?;

            if embedded.len() != chunk.len() {
                return Err(RagError::EmbeddingFailure(format!(
                    "batch {} of {batches}: expected {} vectors, got {}",
                    batch + 1,
                    chunk.len(),
                    embedded.len()
                )));
            }

            for (document, mut vector) in chunk.iter().zip(embedded) {
                if !l2_normalize(&mut vector) {
                    return Err(RagError::EmbeddingFailure(format!(
                        "degenerate embedding for document '{}'",
                        document.id
                    )));
                }
                vectors.push(vector);
            }

            info!(
                batch = batch + 1,
                batches,
                embedded = vectors.len(),
                total = documents.len(),
                "Embedding batch complete"
            );
        }
        Ok(vectors)
    }
}

fn validate_documents(documents: &[Document]) -> RagResult<()> {
    let mut seen = HashSet::with_capacity(documents.len());
    for document in documents {
        document.validate()?;
        if !seen.insert(document.id.as_str()) {
            return Err(RagError::InvalidArgument(format!(
                "duplicate document id '{}'",
                document.id
            )));
        }
    }
    Ok(())
}
