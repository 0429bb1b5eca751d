use super::*;
use crate::store::MemoryStore;
use crate::store::models::{Document, DocumentStatus, NewChunk, NewDocument};
use serde_json::json;
use uuid::Uuid;

struct StubEmbedder {
    vectors: HashMap<String, Vec<f32>>,
}

impl StubEmbedder {
    fn new() -> Self {
        Self {
            vectors: HashMap::new(),
        }
    }

    fn with(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.vectors.insert(text.to_string(), vector);
        self
    }
}

impl Embedder for StubEmbedder {
    fn model_id(&self) -> &str {
        "stub-model"
    }

    fn dimension(&self) -> usize {
        3
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| {
                self.vectors
                    .get(text)
                    .cloned()
                    .unwrap_or_else(|| vec![0.0, 0.0, 1.0])
            })
            .collect())
    }
}

async fn seed_document(
    store: &MemoryStore,
    name: &str,
    doc_type: DocType,
    status: DocumentStatus,
    model_id: &str,
    contents: &[(&str, Vec<f32>)],
) -> Document {
    let document = store
        .create_document(NewDocument {
            filename: name.to_string(),
            original_filename: name.to_string(),
            doc_type,
            total_pages: None,
        })
        .await
        .expect("can create document");

    let batch: Vec<NewChunk> = contents
        .iter()
        .enumerate()
        .map(|(i, (content, embedding))| NewChunk {
            id: Uuid::new_v4().to_string(),
            document_id: document.id.clone(),
            content: (*content).to_string(),
            section_title: None,
            chunk_index: i as i64,
            token_count: content.split_whitespace().count() as i64,
            page_number: None,
            embedding: embedding.clone(),
            metadata: json!({}),
        })
        .collect();
    store
        .insert_chunks(&document.id, batch, model_id)
        .await
        .expect("can insert chunks");
    store
        .mark_document_status(&document.id, status, None)
        .await
        .expect("can mark status");
    document
}

fn retriever(store: &Arc<MemoryStore>, embedder: StubEmbedder) -> Retriever {
    Retriever::new(
        Arc::clone(store) as Arc<dyn IndexStore>,
        Arc::new(embedder),
        RetrievalConfig::default(),
    )
}

#[tokio::test]
async fn blank_query_and_empty_index_return_empty() {
    let store = Arc::new(MemoryStore::new());
    let retriever = retriever(&store, StubEmbedder::new());

    let blank = retriever
        .search("   ", &SearchOptions::default())
        .await
        .expect("blank query is not an error");
    assert!(blank.is_empty());

    let unpopulated = retriever
        .search("anything", &SearchOptions::default())
        .await
        .expect("empty index is not an error");
    assert!(unpopulated.is_empty());
}

#[tokio::test]
async fn vector_mode_thresholds_sorts_and_truncates() {
    let store = Arc::new(MemoryStore::new());
    seed_document(
        &store,
        "policy.pdf",
        DocType::Policy,
        DocumentStatus::Indexed,
        "stub-model",
        &[
            ("exact", vec![1.0, 0.0, 0.0]),
            ("close", vec![0.8, 0.6, 0.0]),
            ("weak", vec![0.6, 0.8, 0.0]),
            ("orthogonal", vec![0.0, 1.0, 0.0]),
        ],
    )
    .await;
    // Chunks of a failed document never surface.
    seed_document(
        &store,
        "broken.pdf",
        DocType::Policy,
        DocumentStatus::Failed,
        "stub-model",
        &[("hidden", vec![1.0, 0.0, 0.0])],
    )
    .await;

    let retriever = retriever(
        &store,
        StubEmbedder::new().with("refund policy", vec![1.0, 0.0, 0.0]),
    );
    let options = SearchOptions {
        top_k: 3,
        similarity_threshold: 0.75,
        ..SearchOptions::default()
    };

    let results = retriever
        .search("refund policy", &options)
        .await
        .expect("search succeeds");

    let contents: Vec<&str> = results.iter().map(|r| r.chunk.content.as_str()).collect();
    assert_eq!(contents, vec!["exact", "close"]);
    assert!(results[0].score > results[1].score);
    assert!(results.iter().all(|r| r.score >= 0.75));
    assert_eq!(results[0].document_filename, "policy.pdf");
}

#[tokio::test]
async fn equal_scores_break_by_document_age_then_chunk_index() {
    let store = Arc::new(MemoryStore::new());
    seed_document(
        &store,
        "older.pdf",
        DocType::Other,
        DocumentStatus::Indexed,
        "stub-model",
        &[
            ("older-0", vec![1.0, 0.0, 0.0]),
            ("older-1", vec![1.0, 0.0, 0.0]),
        ],
    )
    .await;
    seed_document(
        &store,
        "newer.pdf",
        DocType::Other,
        DocumentStatus::Indexed,
        "stub-model",
        &[("newer-0", vec![1.0, 0.0, 0.0])],
    )
    .await;

    let retriever = retriever(
        &store,
        StubEmbedder::new().with("q", vec![1.0, 0.0, 0.0]),
    );
    let options = SearchOptions {
        top_k: 10,
        similarity_threshold: 0.5,
        ..SearchOptions::default()
    };

    let results = retriever.search("q", &options).await.expect("search succeeds");

    let contents: Vec<&str> = results.iter().map(|r| r.chunk.content.as_str()).collect();
    assert_eq!(contents, vec!["older-0", "older-1", "newer-0"]);
}

#[tokio::test]
async fn hybrid_keeps_lexical_only_matches() {
    let store = Arc::new(MemoryStore::new());
    seed_document(
        &store,
        "guides.pdf",
        DocType::ProductGuide,
        DocumentStatus::Indexed,
        "stub-model",
        &[
            // Lexical match, but orthogonal to the query vector.
            ("shipping rates guide", vec![0.0, 1.0, 0.0]),
            // Strong vector match with no query terms.
            ("unrelated words entirely", vec![1.0, 0.0, 0.0]),
        ],
    )
    .await;

    let retriever = retriever(
        &store,
        StubEmbedder::new().with("shipping", vec![1.0, 0.0, 0.0]),
    );
    let options = SearchOptions {
        top_k: 5,
        mode: SearchMode::Hybrid,
        ..SearchOptions::default()
    };

    let results = retriever
        .search("shipping", &options)
        .await
        .expect("search succeeds");

    assert_eq!(results.len(), 2);
    // vector_weight 0.7 * 1.0 beats text_weight 0.3 * 1.0.
    assert_eq!(results[0].chunk.content, "unrelated words entirely");
    assert_eq!(results[1].chunk.content, "shipping rates guide");
    assert!((results[0].score - 0.7).abs() < 1e-6);
    assert!((results[1].score - 0.3).abs() < 1e-6);
}

#[tokio::test]
async fn hybrid_weights_are_configurable() {
    let store = Arc::new(MemoryStore::new());
    seed_document(
        &store,
        "guides.pdf",
        DocType::ProductGuide,
        DocumentStatus::Indexed,
        "stub-model",
        &[
            ("shipping rates guide", vec![0.0, 1.0, 0.0]),
            ("unrelated words entirely", vec![1.0, 0.0, 0.0]),
        ],
    )
    .await;

    let embedder = StubEmbedder::new().with("shipping", vec![1.0, 0.0, 0.0]);
    let retriever = Retriever::new(
        Arc::clone(&store) as Arc<dyn IndexStore>,
        Arc::new(embedder),
        RetrievalConfig {
            vector_weight: 0.1,
            text_weight: 0.9,
            ..RetrievalConfig::default()
        },
    );
    let options = SearchOptions {
        top_k: 5,
        mode: SearchMode::Hybrid,
        ..SearchOptions::default()
    };

    let results = retriever
        .search("shipping", &options)
        .await
        .expect("search succeeds");

    assert_eq!(results[0].chunk.content, "shipping rates guide");
}

#[tokio::test]
async fn hybrid_ordering_is_deterministic() {
    let store = Arc::new(MemoryStore::new());
    seed_document(
        &store,
        "corpus.pdf",
        DocType::Other,
        DocumentStatus::Indexed,
        "stub-model",
        &[
            ("returns within thirty days", vec![0.9, 0.1, 0.0]),
            ("shipping is free over fifty", vec![0.7, 0.7, 0.0]),
            ("warranty covers two years", vec![0.5, 0.5, 0.7]),
            ("thirty day return window", vec![0.85, 0.2, 0.0]),
        ],
    )
    .await;

    let retriever = retriever(
        &store,
        StubEmbedder::new().with("return policy thirty days", vec![1.0, 0.0, 0.0]),
    );
    let options = SearchOptions {
        top_k: 4,
        mode: SearchMode::Hybrid,
        ..SearchOptions::default()
    };

    let first = retriever
        .search("return policy thirty days", &options)
        .await
        .expect("search succeeds");
    for _ in 0..3 {
        let again = retriever
            .search("return policy thirty days", &options)
            .await
            .expect("search succeeds");
        let first_ids: Vec<&str> = first.iter().map(|r| r.chunk.id.as_str()).collect();
        let again_ids: Vec<&str> = again.iter().map(|r| r.chunk.id.as_str()).collect();
        assert_eq!(first_ids, again_ids);
    }
}

#[tokio::test]
async fn model_mismatch_fails_closed() {
    let store = Arc::new(MemoryStore::new());
    seed_document(
        &store,
        "old-space.pdf",
        DocType::Other,
        DocumentStatus::Indexed,
        "legacy-model",
        &[("content", vec![1.0, 0.0, 0.0])],
    )
    .await;

    let retriever = retriever(&store, StubEmbedder::new());

    let result = retriever.search("anything", &SearchOptions::default()).await;
    assert!(matches!(result, Err(RagError::Consistency(_))));
}
