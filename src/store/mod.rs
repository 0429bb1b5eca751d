//! Index Store boundary.
//!
//! The [`IndexStore`] trait defines the query/insert contract the pipeline
//! holds against persistent storage. The store owns consistency of the chunk
//! set: `(document_id, chunk_index)` uniqueness, atomic visibility of a
//! document's full batch, and the identity of the vector space recorded in
//! the index manifest.

pub mod memory;
pub mod models;
pub mod sqlite;

use async_trait::async_trait;
use std::cmp::Ordering;

use crate::{RagError, Result};
use models::{
    DocType, Document, DocumentStatus, IndexManifest, NewChunk, NewDocument, ScoredChunk,
};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Persistent storage contract for documents, chunks, and vectors.
///
/// Vector queries return cosine similarity directly; lexical queries return
/// rank-style scores where larger is better. Both only consider chunks whose
/// owning document has `status = indexed` and, when a filter is given,
/// the matching category.
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Create a document in `pending` state.
    async fn create_document(&self, new_doc: NewDocument) -> Result<Document>;

    async fn get_document(&self, id: &str) -> Result<Option<Document>>;

    /// All documents in creation order.
    async fn list_documents(&self) -> Result<Vec<Document>>;

    /// Transition a document's processing status, recording error detail for
    /// failures. Marking `indexed` fails if the document has no chunks.
    async fn mark_document_status(
        &self,
        id: &str,
        status: DocumentStatus,
        error: Option<&str>,
    ) -> Result<()>;

    /// Insert a document's full chunk set atomically, recording the embedding
    /// model that produced the vectors. The batch must carry contiguous
    /// indices starting at 0 and a uniform dimensionality compatible with
    /// the populated index; violations discard the whole batch.
    async fn insert_chunks(
        &self,
        document_id: &str,
        batch: Vec<NewChunk>,
        model_id: &str,
    ) -> Result<usize>;

    /// Delete a document, cascading to its chunks. Returns whether the
    /// document existed.
    async fn delete_document(&self, id: &str) -> Result<bool>;

    /// Identity of the vector space of the populated index, if any chunks
    /// have been stored.
    async fn embedding_model(&self) -> Result<Option<IndexManifest>>;

    /// Cosine-similarity query over eligible chunks: results scoring at or
    /// above `threshold`, best first, truncated to `top_k`.
    async fn query_vector(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<DocType>,
        threshold: f32,
    ) -> Result<Vec<ScoredChunk>>;

    /// Lexical relevance query over eligible chunks, all matches, best first.
    async fn query_lexical(&self, text: &str, filter: Option<DocType>)
    -> Result<Vec<ScoredChunk>>;
}

/// Deterministic result ordering: score descending, then earlier-created
/// document, then ascending chunk index, then document id as a final
/// disambiguator.
pub(crate) fn rank_ordering(a: &ScoredChunk, b: &ScoredChunk) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.document_created_at.cmp(&b.document_created_at))
        .then_with(|| a.chunk.chunk_index.cmp(&b.chunk.chunk_index))
        .then_with(|| a.chunk.document_id.cmp(&b.chunk.document_id))
}

/// Validate a chunk batch before insertion. Returns the uniform vector
/// dimensionality.
pub(crate) fn validate_chunk_batch(document_id: &str, batch: &[NewChunk]) -> Result<usize> {
    if batch.is_empty() {
        return Err(RagError::Validation("chunk batch is empty".to_string()));
    }

    if let Some(stray) = batch.iter().find(|c| c.document_id != document_id) {
        return Err(RagError::Consistency(format!(
            "chunk {} belongs to document {} but the batch targets {}",
            stray.id, stray.document_id, document_id
        )));
    }

    let mut indices: Vec<i64> = batch.iter().map(|c| c.chunk_index).collect();
    indices.sort_unstable();
    for (expected, actual) in indices.iter().enumerate() {
        if *actual != expected as i64 {
            return Err(RagError::Consistency(format!(
                "chunk indices for document {document_id} must be contiguous starting at 0, found {actual} at position {expected}"
            )));
        }
    }

    let dimension = batch[0].embedding.len();
    if dimension == 0 {
        return Err(RagError::Consistency(format!(
            "chunk {} carries an empty embedding",
            batch[0].id
        )));
    }
    if let Some(odd) = batch.iter().find(|c| c.embedding.len() != dimension) {
        return Err(RagError::Consistency(format!(
            "embedding dimensionality mismatch within batch: chunk {} has {} values, expected {}",
            odd.id,
            odd.embedding.len(),
            dimension
        )));
    }

    Ok(dimension)
}

/// Reject vectors from a different model or dimensionality than the
/// populated index records.
pub(crate) fn check_manifest(
    manifest: &IndexManifest,
    model_id: &str,
    dimension: usize,
) -> Result<()> {
    if manifest.model_id != model_id {
        return Err(RagError::Consistency(format!(
            "index is populated with embeddings from '{}' but the batch was produced by '{}'; re-embed before mixing models",
            manifest.model_id, model_id
        )));
    }
    if manifest.dimension != dimension {
        return Err(RagError::Consistency(format!(
            "index dimension is {} but the batch vectors have {} values",
            manifest.dimension, dimension
        )));
    }
    Ok(())
}
