use hybridrag_core::{Document, RagError, RagResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;
use uuid::Uuid;

use crate::bm25::{Bm25Params, LexicalIndex};
use crate::document_store::DocumentStore;
use crate::persist;
use crate::vector::VectorIndex;

/// File name of the vector artifact inside an index root.
pub const VECTORS_FILE: &str = "vectors.json";
/// File name of the document/metadata artifact inside an index root.
pub const DOCUMENTS_FILE: &str = "documents.json";

/// Summary counts for a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotStats {
    /// Stored documents.
    pub documents: usize,
    /// Stored vectors.
    pub vectors: usize,
    /// Distinct lexical terms.
    pub terms: usize,
    /// Embedding dimensionality, unset for an empty index.
    pub dimension: Option<usize>,
}

/// Written into both artifacts by one [`IndexSnapshot::save`]. A pair whose
/// stamps differ was not written by the same save.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub(crate) struct SnapshotStamp {
    pub(crate) generation: Uuid,
    pub(crate) bm25: Bm25Params,
}

/// The vector index, lexical index and document store as one self-consistent
/// unit. Read-only once built; share it behind an `Arc` for concurrent
/// queries.
#[derive(Debug, Clone)]
pub struct IndexSnapshot {
    vectors: VectorIndex,
    lexical: LexicalIndex,
    documents: DocumentStore,
}

impl IndexSnapshot {
    /// A snapshot with no documents.
    pub fn empty(params: Bm25Params) -> Self {
        Self {
            vectors: VectorIndex::new(),
            lexical: LexicalIndex::new(params),
            documents: DocumentStore::new(),
        }
    }

    /// Assemble a snapshot, checking that both indexes cover exactly the
    /// documents in the store.
    pub fn from_parts(
        vectors: VectorIndex,
        lexical: LexicalIndex,
        documents: DocumentStore,
    ) -> RagResult<Self> {
        check_references(&vectors, &lexical, &documents)?;
        Ok(Self {
            vectors,
            lexical,
            documents,
        })
    }

    /// The dense index.
    pub fn vectors(&self) -> &VectorIndex {
        &self.vectors
    }

    /// The BM25 index.
    pub fn lexical(&self) -> &LexicalIndex {
        &self.lexical
    }

    /// The document store.
    pub fn documents(&self) -> &DocumentStore {
        &self.documents
    }

    /// Number of indexed documents.
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// Whether nothing has been indexed.
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Summary counts.
    pub fn stats(&self) -> SnapshotStats {
        SnapshotStats {
            documents: self.documents.len(),
            vectors: self.vectors.len(),
            terms: self.lexical.term_count(),
            dimension: self.vectors.dimension(),
        }
    }

    /// Whether `root` holds at least one snapshot artifact.
    pub fn exists(root: &Path) -> bool {
        root.join(VECTORS_FILE).exists() || root.join(DOCUMENTS_FILE).exists()
    }

    /// Write both artifacts under `root`.
    ///
    /// Both files are fully staged before either is renamed into place, and
    /// the vector artifact is committed last. Each artifact carries the same
    /// fresh generation id plus the BM25 parameters, so [`IndexSnapshot::load`]
    /// can reject a pair left behind by an interrupted save. Staged temp files
    /// are removed when the save fails.
    pub async fn save(&self, root: &Path) -> RagResult<()> {
        tokio::fs::create_dir_all(root).await?;
        let documents_path = root.join(DOCUMENTS_FILE);
        let vectors_path = root.join(VECTORS_FILE);

        let stamp = SnapshotStamp {
            generation: Uuid::new_v4(),
            bm25: self.lexical.params(),
        };
        let document_bytes = self.documents.encode(Some(&stamp))?;
        let vector_bytes = self.vectors.encode(Some(&stamp))?;

        let documents_tmp = persist::stage(&documents_path, &document_bytes).await?;
        let vectors_tmp = match persist::stage(&vectors_path, &vector_bytes).await {
            Ok(tmp) => tmp,
            Err(e) => {
                persist::discard(&[&documents_tmp]).await;
                return Err(e);
            }
        };
        if let Err(e) = persist::commit(&documents_tmp, &documents_path).await {
            persist::discard(&[&documents_tmp, &vectors_tmp]).await;
            return Err(e);
        }
        if let Err(e) = persist::commit(&vectors_tmp, &vectors_path).await {
            persist::discard(&[&vectors_tmp]).await;
            return Err(e);
        }

        info!(
            root = %root.display(),
            generation = %stamp.generation,
            documents = self.documents.len(),
            vectors = self.vectors.len(),
            "Index snapshot saved"
        );
        Ok(())
    }

    /// Load a snapshot written by [`IndexSnapshot::save`].
    ///
    /// The lexical index is rebuilt from the stored documents with the BM25
    /// parameters recorded at save time. Fails with
    /// [`RagError::IndexNotFound`] when `root` holds neither artifact and
    /// [`RagError::CorruptIndex`] when one is missing or invalid, when the two
    /// come from different saves, or when either references ids the other
    /// does not know.
    pub async fn load(root: &Path) -> RagResult<Self> {
        let vectors_path = root.join(VECTORS_FILE);
        let documents_path = root.join(DOCUMENTS_FILE);

        let vector_bytes = persist::read_if_exists(&vectors_path).await?;
        let document_bytes = persist::read_if_exists(&documents_path).await?;

        let (vector_bytes, document_bytes) = match (vector_bytes, document_bytes) {
            (Some(v), Some(d)) => (v, d),
            (None, None) => return Err(RagError::IndexNotFound(root.display().to_string())),
            (Some(_), None) => {
                return Err(RagError::CorruptIndex(format!(
                    "{} present without {DOCUMENTS_FILE}",
                    vectors_path.display()
                )))
            }
            (None, Some(_)) => {
                return Err(RagError::CorruptIndex(format!(
                    "{} present without {VECTORS_FILE}",
                    documents_path.display()
                )))
            }
        };

        let (vectors, vector_stamp) = VectorIndex::decode(&vector_bytes)?;
        let (documents, document_stamp) = DocumentStore::decode(&document_bytes)?;

        let stamp = match (document_stamp, vector_stamp) {
            (Some(d), Some(v)) if d == v => d,
            (Some(d), Some(v)) => {
                return Err(RagError::CorruptIndex(format!(
                    "{DOCUMENTS_FILE} (generation {}) and {VECTORS_FILE} (generation {}) \
                     were written by different saves",
                    d.generation, v.generation
                )))
            }
            _ => {
                return Err(RagError::CorruptIndex(format!(
                    "{} lacks a snapshot stamp",
                    root.display()
                )))
            }
        };
        stamp
            .bm25
            .validate()
            .map_err(|e| RagError::CorruptIndex(e.to_string()))?;

        let texts: Vec<Document> = documents.iter().cloned().collect();
        let mut lexical = LexicalIndex::new(stamp.bm25);
        lexical
            .add(&texts)
            .map_err(|e| RagError::CorruptIndex(e.to_string()))?;

        let snapshot = Self::from_parts(vectors, lexical, documents)
            .map_err(|e| RagError::CorruptIndex(e.to_string()))?;

        info!(
            root = %root.display(),
            generation = %stamp.generation,
            documents = snapshot.len(),
            dimension = ?snapshot.vectors.dimension(),
            "Index snapshot loaded"
        );
        Ok(snapshot)
    }
}

fn check_references(
    vectors: &VectorIndex,
    lexical: &LexicalIndex,
    documents: &DocumentStore,
) -> RagResult<()> {
    if let Some((id, _)) = vectors.iter().find(|(id, _)| !documents.contains(id)) {
        return Err(RagError::DocumentNotFound(id.to_string()));
    }
    if let Some(id) = lexical.ids().find(|id| !documents.contains(id)) {
        return Err(RagError::DocumentNotFound(id.to_string()));
    }
    if vectors.len() != documents.len() || lexical.document_count() != documents.len() {
        return Err(RagError::InvalidArgument(format!(
            "index coverage mismatch: {} documents, {} vectors, {} lexical entries",
            documents.len(),
            vectors.len(),
            lexical.document_count()
        )));
    }
    Ok(())
}
