use super::*;
use serde_json::json;

fn new_doc(name: &str) -> NewDocument {
    NewDocument {
        filename: name.to_string(),
        original_filename: name.to_string(),
        doc_type: DocType::Other,
        total_pages: None,
    }
}

fn chunk(document: &Document, index: i64, content: &str, embedding: Vec<f32>) -> NewChunk {
    NewChunk {
        id: Uuid::new_v4().to_string(),
        document_id: document.id.clone(),
        content: content.to_string(),
        section_title: None,
        chunk_index: index,
        token_count: content.split_whitespace().count() as i64,
        page_number: None,
        embedding,
        metadata: json!({}),
    }
}

#[tokio::test]
async fn lifecycle_matches_sqlite_semantics() {
    let store = MemoryStore::new();

    let document = store
        .create_document(new_doc("guide.pdf"))
        .await
        .expect("can create");
    assert_eq!(document.status, DocumentStatus::Pending);

    // Indexed without chunks is a consistency violation.
    let premature = store
        .mark_document_status(&document.id, DocumentStatus::Indexed, None)
        .await;
    assert!(matches!(premature, Err(RagError::Consistency(_))));

    store
        .insert_chunks(
            &document.id,
            vec![chunk(&document, 0, "hello memory", vec![1.0, 0.0])],
            "mem-model",
        )
        .await
        .expect("can insert");
    store
        .mark_document_status(&document.id, DocumentStatus::Indexed, None)
        .await
        .expect("can mark indexed");

    let stored = store
        .get_document(&document.id)
        .await
        .expect("can fetch")
        .expect("exists");
    assert_eq!(stored.total_chunks, 1);
    assert_eq!(stored.embedding_model.as_deref(), Some("mem-model"));

    let manifest = store
        .embedding_model()
        .await
        .expect("can read manifest")
        .expect("manifest exists");
    assert_eq!(manifest.dimension, 2);

    assert!(store
        .delete_document(&document.id)
        .await
        .expect("can delete"));
    assert!(store
        .get_document(&document.id)
        .await
        .expect("can fetch")
        .is_none());
}

#[tokio::test]
async fn lexical_overlap_scoring() {
    let store = MemoryStore::new();
    let document = store
        .create_document(new_doc("faq.md"))
        .await
        .expect("can create");
    store
        .insert_chunks(
            &document.id,
            vec![
                chunk(&document, 0, "returns accepted within thirty days", vec![1.0, 0.0]),
                chunk(&document, 1, "shipping is free over fifty euros", vec![0.0, 1.0]),
            ],
            "mem-model",
        )
        .await
        .expect("can insert");
    store
        .mark_document_status(&document.id, DocumentStatus::Indexed, None)
        .await
        .expect("can mark indexed");

    let hits = store
        .query_lexical("are returns free within thirty days", None)
        .await
        .expect("can query");

    assert_eq!(hits.len(), 2);
    // More overlapping terms rank higher.
    assert_eq!(hits[0].chunk.chunk_index, 0);
    assert!(hits[0].score > hits[1].score);
}

#[tokio::test]
async fn model_mismatch_rejected() {
    let store = MemoryStore::new();
    let first = store
        .create_document(new_doc("a.pdf"))
        .await
        .expect("can create");
    store
        .insert_chunks(
            &first.id,
            vec![chunk(&first, 0, "content", vec![1.0, 0.0])],
            "model-a",
        )
        .await
        .expect("can insert");

    let second = store
        .create_document(new_doc("b.pdf"))
        .await
        .expect("can create");
    let result = store
        .insert_chunks(
            &second.id,
            vec![chunk(&second, 0, "content", vec![0.0, 1.0])],
            "model-b",
        )
        .await;

    assert!(matches!(result, Err(RagError::Consistency(_))));
}
