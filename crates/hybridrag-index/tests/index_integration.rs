#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Integration tests for the hybridrag-index crate.
//!
//! Covers end-to-end build + search with the local embedder, snapshot
//! persistence, partial and mismatched snapshots on disk, concurrent readers,
//! metadata filtering and context formatting.

use std::sync::Arc;

use tempfile::TempDir;

use hybridrag_core::{Document, MetadataFilter, RagError};
use hybridrag_index::{
    retrieve_context, Bm25Params, BuilderConfig, EmbeddingProvider, HybridRetriever,
    IndexBuilder, IndexSnapshot, LocalEmbedding, RetrievalResult, RetrieverConfig,
    DOCUMENTS_FILE, VECTORS_FILE,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn colors() -> Vec<Document> {
    vec![
        Document::new("d1", "red apple").with_metadata("kind", "fruit"),
        Document::new("d2", "blue car").with_metadata("kind", "vehicle"),
        Document::new("d3", "red car")
            .with_metadata("kind", "vehicle")
            .with_metadata("year", 2021),
    ]
}

fn catalog() -> Vec<Document> {
    vec![
        Document::new("p1", "Wireless noise cancelling headphones with long battery life")
            .with_metadata("category", "audio"),
        Document::new("p2", "Bluetooth speaker, waterproof, deep bass")
            .with_metadata("category", "audio"),
        Document::new("p3", "Mechanical keyboard with hot swappable switches")
            .with_metadata("category", "peripherals"),
        Document::new("p4", "Ergonomic wireless mouse with silent clicks")
            .with_metadata("category", "peripherals"),
        Document::new("p5", "USB-C charging cable, braided, two meters")
            .with_metadata("category", "accessories"),
        Document::new("p6", "Noise isolating earbuds for running")
            .with_metadata("category", "audio"),
    ]
}

fn embedder() -> Arc<LocalEmbedding> {
    Arc::new(LocalEmbedding::new(128))
}

async fn build(docs: Vec<Document>) -> Arc<IndexSnapshot> {
    let builder = IndexBuilder::new(embedder(), BuilderConfig::default(), Bm25Params::default())
        .unwrap();
    Arc::new(builder.build(docs).await.unwrap())
}

async fn query(
    retriever: &HybridRetriever,
    text: &str,
    k: usize,
    filters: &MetadataFilter,
) -> Vec<RetrievalResult> {
    let embedding = embedder().embed(text).await.unwrap();
    retriever.search(text, &embedding, k, filters).unwrap()
}

fn ids(results: &[RetrievalResult]) -> Vec<&str> {
    results.iter().map(|r| r.document_id.as_str()).collect()
}

// ---------------------------------------------------------------------------
// 1. End-to-end ranking
// ---------------------------------------------------------------------------

#[tokio::test]
async fn exact_phrase_ranks_first() {
    let retriever = HybridRetriever::new(build(colors()).await, RetrieverConfig::default()).unwrap();
    let results = query(&retriever, "red car", 2, &MetadataFilter::new()).await;

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].document_id, "d3");
    assert!(results[0].fused_score >= results[1].fused_score);
}

#[tokio::test]
async fn keyword_query_finds_product() {
    let retriever = HybridRetriever::new(build(catalog()).await, RetrieverConfig::default()).unwrap();
    let results = query(&retriever, "mechanical keyboard", 3, &MetadataFilter::new()).await;
    assert_eq!(results[0].document_id, "p3");
}

#[tokio::test]
async fn empty_index_returns_no_results() {
    let retriever = HybridRetriever::new(build(Vec::new()).await, RetrieverConfig::default()).unwrap();
    for k in [1, 3, 50] {
        assert!(query(&retriever, "anything", k, &MetadataFilter::new())
            .await
            .is_empty());
    }
}

#[tokio::test]
async fn zero_k_is_invalid_argument() {
    let retriever = HybridRetriever::new(build(colors()).await, RetrieverConfig::default()).unwrap();
    let embedding = embedder().embed("red").await.unwrap();
    let err = retriever
        .search("red", &embedding, 0, &MetadataFilter::new())
        .unwrap_err();
    assert!(matches!(err, RagError::InvalidArgument(_)));
}

// ---------------------------------------------------------------------------
// 2. Metadata filters
// ---------------------------------------------------------------------------

#[tokio::test]
async fn filter_on_absent_field_is_empty() {
    let retriever = HybridRetriever::new(build(colors()).await, RetrieverConfig::default()).unwrap();
    let mut filter = MetadataFilter::new();
    filter.insert("brand".into(), "acme".into());
    assert!(query(&retriever, "red car", 3, &filter).await.is_empty());
}

#[tokio::test]
async fn numeric_filter_matches_integer_and_float() {
    let retriever = HybridRetriever::new(build(colors()).await, RetrieverConfig::default()).unwrap();

    let mut as_int = MetadataFilter::new();
    as_int.insert("year".into(), serde_json::json!(2021));
    let mut as_float = MetadataFilter::new();
    as_float.insert("year".into(), serde_json::json!(2021.0));

    assert_eq!(ids(&query(&retriever, "car", 3, &as_int).await), vec!["d3"]);
    assert_eq!(ids(&query(&retriever, "car", 3, &as_float).await), vec!["d3"]);
}

#[tokio::test]
async fn filtering_preserves_relative_order() {
    let retriever = HybridRetriever::new(build(catalog()).await, RetrieverConfig::default()).unwrap();
    let unfiltered = query(&retriever, "wireless noise", 6, &MetadataFilter::new()).await;

    let mut filter = MetadataFilter::new();
    filter.insert("category".into(), "audio".into());
    let filtered = query(&retriever, "wireless noise", 6, &filter).await;

    let expected: Vec<&str> = unfiltered
        .iter()
        .filter(|r| r.metadata.get("category") == Some(&serde_json::json!("audio")))
        .map(|r| r.document_id.as_str())
        .collect();
    assert_eq!(ids(&filtered), expected);
}

// ---------------------------------------------------------------------------
// 3. Persistence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn snapshot_round_trip_preserves_results() {
    let tmp = TempDir::new().unwrap();
    let builder = IndexBuilder::new(embedder(), BuilderConfig { batch_size: 2 }, Bm25Params::default())
        .unwrap();
    let built = Arc::new(builder.build_and_persist(catalog(), tmp.path()).await.unwrap());
    let loaded = Arc::new(IndexSnapshot::load(tmp.path()).await.unwrap());

    let before = HybridRetriever::new(built, RetrieverConfig::default()).unwrap();
    let after = HybridRetriever::new(loaded, RetrieverConfig::default()).unwrap();

    for text in ["wireless", "noise cancelling headphones", "braided cable", "zzz"] {
        let a = query(&before, text, 4, &MetadataFilter::new()).await;
        let b = query(&after, text, 4, &MetadataFilter::new()).await;
        assert_eq!(ids(&a), ids(&b), "query {text:?}");
        for (x, y) in a.iter().zip(&b) {
            assert!((x.fused_score - y.fused_score).abs() < 1e-5);
            assert_eq!(x.metadata, y.metadata);
        }
    }
}

#[tokio::test]
async fn missing_snapshot_is_index_not_found() {
    let tmp = TempDir::new().unwrap();
    let err = IndexSnapshot::load(&tmp.path().join("never-built"))
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::IndexNotFound(_)));
}

#[tokio::test]
async fn lone_vector_artifact_is_corrupt() {
    let tmp = TempDir::new().unwrap();
    let builder =
        IndexBuilder::new(embedder(), BuilderConfig::default(), Bm25Params::default()).unwrap();
    builder.build_and_persist(colors(), tmp.path()).await.unwrap();
    std::fs::remove_file(tmp.path().join(DOCUMENTS_FILE)).unwrap();

    let err = IndexSnapshot::load(tmp.path()).await.unwrap_err();
    assert!(matches!(err, RagError::CorruptIndex(_)));
}

#[tokio::test]
async fn truncated_vector_artifact_is_corrupt() {
    let tmp = TempDir::new().unwrap();
    let builder =
        IndexBuilder::new(embedder(), BuilderConfig::default(), Bm25Params::default()).unwrap();
    builder.build_and_persist(colors(), tmp.path()).await.unwrap();

    let path = tmp.path().join(VECTORS_FILE);
    let bytes = std::fs::read(&path).unwrap();
    std::fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();

    let err = IndexSnapshot::load(tmp.path()).await.unwrap_err();
    assert!(matches!(err, RagError::CorruptIndex(_)));
}

// ---------------------------------------------------------------------------
// 4. Concurrency and formatting
// ---------------------------------------------------------------------------

#[tokio::test]
async fn concurrent_readers_agree() {
    let snapshot = build(catalog()).await;
    let embedding = embedder().embed("wireless mouse").await.unwrap();
    let reference = HybridRetriever::new(snapshot.clone(), RetrieverConfig::default())
        .unwrap()
        .search("wireless mouse", &embedding, 3, &MetadataFilter::new())
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let snapshot = snapshot.clone();
        let embedding = embedding.clone();
        handles.push(tokio::spawn(async move {
            HybridRetriever::new(snapshot, RetrieverConfig::default())
                .unwrap()
                .search("wireless mouse", &embedding, 3, &MetadataFilter::new())
                .unwrap()
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap(), reference);
    }
}

#[tokio::test]
async fn context_block_numbers_documents() {
    let retriever = HybridRetriever::new(build(colors()).await, RetrieverConfig::default()).unwrap();
    let results = query(&retriever, "red car", 2, &MetadataFilter::new()).await;
    let context = retrieve_context(&results);

    let lines: Vec<&str> = context.split('\n').collect();
    assert_eq!(lines[0], "[Document 1]");
    assert_eq!(lines[1], "red car");
    assert!(lines[2].starts_with("(Hybrid Score: "));
    assert_eq!(lines[3], "");
    assert_eq!(lines[4], "[Document 2]");
}
