#[cfg(test)]
mod tests;

use async_trait::async_trait;
use chrono::Utc;
use itertools::Itertools;
use std::collections::HashSet;
use std::sync::RwLock;
use uuid::Uuid;

use super::models::{
    ChunkRecord, DocType, Document, DocumentStatus, IndexManifest, NewChunk, NewDocument,
    ScoredChunk,
};
use super::{IndexStore, check_manifest, rank_ordering, validate_chunk_batch};
use crate::embeddings::cosine_similarity;
use crate::{RagError, Result};

/// In-memory [`IndexStore`] for tests and embedded use.
///
/// Lexical relevance is scored as distinct query-term overlap, the rank-style
/// stand-in for the SQLite store's stemmed BM25.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    documents: Vec<Document>,
    chunks: Vec<StoredChunk>,
    manifest: Option<IndexManifest>,
}

#[derive(Debug, Clone)]
struct StoredChunk {
    record: ChunkRecord,
    embedding: Vec<f32>,
}

impl MemoryStore {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|_| RagError::Storage("memory store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|_| RagError::Storage("memory store lock poisoned".to_string()))
    }
}

impl Inner {
    fn document(&self, id: &str) -> Option<&Document> {
        self.documents.iter().find(|d| d.id == id)
    }

    fn document_mut(&mut self, id: &str) -> Option<&mut Document> {
        self.documents.iter_mut().find(|d| d.id == id)
    }

    /// Chunks whose owning document is indexed and matches the filter,
    /// paired with that document.
    fn eligible_chunks(&self, filter: Option<DocType>) -> Vec<(&StoredChunk, &Document)> {
        self.chunks
            .iter()
            .filter_map(|chunk| {
                let document = self.document(&chunk.record.document_id)?;
                if document.status != DocumentStatus::Indexed {
                    return None;
                }
                if let Some(doc_type) = filter {
                    if document.doc_type != doc_type {
                        return None;
                    }
                }
                Some((chunk, document))
            })
            .collect()
    }
}

#[async_trait]
impl IndexStore for MemoryStore {
    async fn create_document(&self, new_doc: NewDocument) -> Result<Document> {
        let mut inner = self.write()?;

        // Creation timestamps are strictly increasing so that the
        // earlier-created-document tie-break is well defined.
        let mut now = Utc::now().naive_utc();
        if let Some(last) = inner.documents.last() {
            if now <= last.created_at {
                now = last.created_at + chrono::Duration::microseconds(1);
            }
        }

        let document = Document {
            id: Uuid::new_v4().to_string(),
            filename: new_doc.filename,
            original_filename: new_doc.original_filename,
            doc_type: new_doc.doc_type,
            status: DocumentStatus::Pending,
            total_pages: new_doc.total_pages,
            total_chunks: 0,
            error_message: None,
            embedding_model: None,
            created_at: now,
            updated_at: now,
        };

        inner.documents.push(document.clone());
        Ok(document)
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        Ok(self.read()?.document(id).cloned())
    }

    async fn list_documents(&self) -> Result<Vec<Document>> {
        Ok(self.read()?.documents.clone())
    }

    async fn mark_document_status(
        &self,
        id: &str,
        status: DocumentStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let mut inner = self.write()?;

        if status == DocumentStatus::Indexed {
            let chunk_count = inner
                .chunks
                .iter()
                .filter(|c| c.record.document_id == id)
                .count();
            if chunk_count == 0 {
                return Err(RagError::Consistency(format!(
                    "document {id} has no chunks and cannot be marked indexed"
                )));
            }
        }

        let document = inner
            .document_mut(id)
            .ok_or_else(|| RagError::Storage(format!("document not found: {id}")))?;
        document.status = status;
        document.error_message = error.map(str::to_owned);
        document.updated_at = Utc::now().naive_utc();
        Ok(())
    }

    async fn insert_chunks(
        &self,
        document_id: &str,
        batch: Vec<NewChunk>,
        model_id: &str,
    ) -> Result<usize> {
        let dimension = validate_chunk_batch(document_id, &batch)?;

        let mut inner = self.write()?;

        if inner.document(document_id).is_none() {
            return Err(RagError::Storage(format!(
                "document not found: {document_id}"
            )));
        }

        if let Some(manifest) = inner.manifest.clone() {
            check_manifest(&manifest, model_id, dimension)?;
        } else {
            inner.manifest = Some(IndexManifest {
                model_id: model_id.to_string(),
                dimension,
            });
        }

        let existing: HashSet<i64> = inner
            .chunks
            .iter()
            .filter(|c| c.record.document_id == document_id)
            .map(|c| c.record.chunk_index)
            .collect();
        if let Some(duplicate) = batch.iter().find(|c| existing.contains(&c.chunk_index)) {
            return Err(RagError::Consistency(format!(
                "duplicate chunk index {} for document {}",
                duplicate.chunk_index, document_id
            )));
        }

        let count = batch.len();
        for chunk in batch {
            inner.chunks.push(StoredChunk {
                record: ChunkRecord {
                    id: chunk.id,
                    document_id: chunk.document_id,
                    content: chunk.content,
                    section_title: chunk.section_title,
                    chunk_index: chunk.chunk_index,
                    token_count: chunk.token_count,
                    page_number: chunk.page_number,
                    metadata: chunk.metadata,
                },
                embedding: chunk.embedding,
            });
        }

        let model = model_id.to_string();
        let document = inner
            .document_mut(document_id)
            .ok_or_else(|| RagError::Storage(format!("document not found: {document_id}")))?;
        document.total_chunks = count as i64;
        document.embedding_model = Some(model);
        document.updated_at = Utc::now().naive_utc();

        Ok(count)
    }

    async fn delete_document(&self, id: &str) -> Result<bool> {
        let mut inner = self.write()?;
        let before = inner.documents.len();
        inner.documents.retain(|d| d.id != id);
        inner.chunks.retain(|c| c.record.document_id != id);
        Ok(inner.documents.len() < before)
    }

    async fn embedding_model(&self) -> Result<Option<IndexManifest>> {
        Ok(self.read()?.manifest.clone())
    }

    async fn query_vector(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<DocType>,
        threshold: f32,
    ) -> Result<Vec<ScoredChunk>> {
        let inner = self.read()?;

        if let Some(manifest) = &inner.manifest {
            if manifest.dimension != vector.len() {
                return Err(RagError::Consistency(format!(
                    "query vector has {} values but the index dimension is {}",
                    vector.len(),
                    manifest.dimension
                )));
            }
        }

        let mut hits: Vec<ScoredChunk> = inner
            .eligible_chunks(filter)
            .into_iter()
            .filter_map(|(chunk, document)| {
                let score = cosine_similarity(vector, &chunk.embedding);
                if score >= threshold {
                    Some(ScoredChunk {
                        chunk: chunk.record.clone(),
                        score,
                        document_filename: document.filename.clone(),
                        document_created_at: document.created_at,
                    })
                } else {
                    None
                }
            })
            .collect();

        hits.sort_by(rank_ordering);
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn query_lexical(
        &self,
        text: &str,
        filter: Option<DocType>,
    ) -> Result<Vec<ScoredChunk>> {
        let terms: Vec<String> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|term| !term.is_empty())
            .map(str::to_lowercase)
            .unique()
            .collect();
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let inner = self.read()?;

        let mut hits: Vec<ScoredChunk> = inner
            .eligible_chunks(filter)
            .into_iter()
            .filter_map(|(chunk, document)| {
                let content_terms: HashSet<String> = chunk
                    .record
                    .content
                    .split(|c: char| !c.is_alphanumeric())
                    .filter(|term| !term.is_empty())
                    .map(str::to_lowercase)
                    .collect();
                let overlap = terms
                    .iter()
                    .filter(|term| content_terms.contains(*term))
                    .count();
                if overlap > 0 {
                    Some(ScoredChunk {
                        chunk: chunk.record.clone(),
                        score: overlap as f32,
                        document_filename: document.filename.clone(),
                        document_created_at: document.created_at,
                    })
                } else {
                    None
                }
            })
            .collect();

        hits.sort_by(rank_ordering);
        Ok(hits)
    }
}
