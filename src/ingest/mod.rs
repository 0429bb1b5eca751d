
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::chunking::{ChunkingConfig, ParsedDocument, chunk_document};
use crate::embeddings::Embedder;
use crate::store::models::{DocType, Document, DocumentStatus, NewChunk, NewDocument};
use crate::store::IndexStore;
use crate::{RagError, Result};

/// Options for a single ingestion run.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Align chunks to parser-recognized section boundaries.
    pub preserve_sections: bool,
}

impl Default for IngestOptions {
    #[inline]
    fn default() -> Self {
        Self {
            preserve_sections: true,
        }
    }
}

/// Outcome of a successful ingestion.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestReport {
    pub document: Document,
    pub chunks_created: usize,
}

/// Write path of the pipeline: parsed text → chunks → vectors → store.
///
/// Each run is synchronous relative to the caller and request-scoped; the
/// store is the only shared state. A document is marked `indexed` only after
/// its full chunk batch has committed, so a concurrent reader never observes
/// a partially written document as indexed.
pub struct IngestPipeline {
    store: Arc<dyn IndexStore>,
    embedder: Arc<dyn Embedder>,
    chunking: ChunkingConfig,
}

impl IngestPipeline {
    #[inline]
    pub fn new(
        store: Arc<dyn IndexStore>,
        embedder: Arc<dyn Embedder>,
        chunking: ChunkingConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            chunking,
        }
    }

    /// Ingest one parsed document end to end.
    ///
    /// The document transitions `pending → processing → indexed`, or to
    /// `failed` with the error detail recorded when any pipeline step
    /// (chunking, embedding, storage consistency) fails.
    #[inline]
    pub async fn ingest(
        &self,
        original_filename: &str,
        doc_type: DocType,
        parsed: &ParsedDocument,
        options: &IngestOptions,
    ) -> Result<IngestReport> {
        info!("Starting ingestion: {}", original_filename);

        let stored_filename = format!("{}_{}", Uuid::new_v4(), original_filename);
        let document = self
            .store
            .create_document(NewDocument {
                filename: stored_filename,
                original_filename: original_filename.to_string(),
                doc_type,
                total_pages: parsed.total_pages(),
            })
            .await?;

        self.store
            .mark_document_status(&document.id, DocumentStatus::Processing, None)
            .await?;

        match self.run(&document, parsed, options).await {
            Ok(chunks_created) => {
                self.store
                    .mark_document_status(&document.id, DocumentStatus::Indexed, None)
                    .await?;

                let document = self
                    .store
                    .get_document(&document.id)
                    .await?
                    .ok_or_else(|| {
                        RagError::Storage("ingested document disappeared".to_string())
                    })?;

                info!(
                    "Successfully indexed {} ({} chunks)",
                    original_filename, chunks_created
                );

                Ok(IngestReport {
                    document,
                    chunks_created,
                })
            }
            Err(e) => {
                error!("Ingestion failed for {}: {}", original_filename, e);
                self.mark_failed(&document.id, &e).await;
                Err(e)
            }
        }
    }

    /// Delete a document; its chunks are removed by cascade.
    #[inline]
    pub async fn delete_document(&self, id: &str) -> Result<bool> {
        let deleted = self.store.delete_document(id).await?;
        if deleted {
            info!("Deleted document {}", id);
        }
        Ok(deleted)
    }

    async fn run(
        &self,
        document: &Document,
        parsed: &ParsedDocument,
        options: &IngestOptions,
    ) -> Result<usize> {
        let chunks = chunk_document(parsed, &self.chunking, options.preserve_sections)?;

        if chunks.is_empty() {
            return Err(RagError::Validation(
                "document produced no chunks".to_string(),
            ));
        }

        debug!("Generated {} chunks", chunks.len());

        // One batched call per configured batch size bounds the round trips.
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = self.embedder.embed_batch(&texts)?;

        if vectors.len() != chunks.len() {
            return Err(RagError::Consistency(format!(
                "embedder returned {} vectors for {} chunks",
                vectors.len(),
                chunks.len()
            )));
        }

        let expected_dimension = self.embedder.dimension();
        if let Some(odd) = vectors.iter().find(|v| v.len() != expected_dimension) {
            return Err(RagError::Consistency(format!(
                "embedding dimension mismatch: got {} values, expected {}",
                odd.len(),
                expected_dimension
            )));
        }

        debug!("Generated {} embeddings", vectors.len());

        let batch: Vec<NewChunk> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, embedding)| NewChunk {
                id: Uuid::new_v4().to_string(),
                document_id: document.id.clone(),
                content: chunk.content,
                section_title: chunk.section_title,
                chunk_index: chunk.chunk_index as i64,
                token_count: chunk.token_count as i64,
                page_number: chunk.page_number,
                embedding,
                metadata: json!({
                    "original_filename": document.original_filename,
                }),
            })
            .collect();

        self.store
            .insert_chunks(&document.id, batch, self.embedder.model_id())
            .await
    }

    /// Best-effort failure marking; the original error stays authoritative.
    async fn mark_failed(&self, document_id: &str, cause: &RagError) {
        if let Err(mark_error) = self
            .store
            .mark_document_status(document_id, DocumentStatus::Failed, Some(&cause.to_string()))
            .await
        {
            error!(
                "Failed to record failure for document {}: {}",
                document_id, mark_error
            );
        }
    }
}
