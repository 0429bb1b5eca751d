#[cfg(test)]
mod tests;

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

use crate::config::RetrievalConfig;
use crate::embeddings::Embedder;
use crate::store::models::{ChunkRecord, DocType, ScoredChunk};
use crate::store::{IndexStore, rank_ordering};
use crate::{RagError, Result};

/// How many vector candidates to fetch per requested result in hybrid mode.
const HYBRID_CANDIDATE_FACTOR: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Vector,
    Hybrid,
}

#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub top_k: usize,
    pub category_filter: Option<DocType>,
    pub similarity_threshold: f32,
    pub mode: SearchMode,
}

impl Default for SearchOptions {
    #[inline]
    fn default() -> Self {
        let config = RetrievalConfig::default();
        Self {
            top_k: config.default_top_k,
            category_filter: None,
            similarity_threshold: config.default_threshold,
            mode: SearchMode::Vector,
        }
    }
}

/// A ranked retrieval result with provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedChunk {
    pub chunk: ChunkRecord,
    pub score: f32,
    pub document_filename: String,
}

/// Ranks stored chunks against a query by vector similarity, optionally
/// fused with lexical relevance.
pub struct Retriever {
    store: Arc<dyn IndexStore>,
    embedder: Arc<dyn Embedder>,
    config: RetrievalConfig,
}

impl Retriever {
    #[inline]
    pub fn new(
        store: Arc<dyn IndexStore>,
        embedder: Arc<dyn Embedder>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            config,
        }
    }

    #[inline]
    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Run a search and return a ranked, deduplicated context set.
    ///
    /// An empty result is a valid zero-result state: blank queries, an
    /// unpopulated index, and queries nothing matches all return an empty
    /// sequence rather than an error. A query embedded with a different
    /// model than the one that populated the index fails closed instead of
    /// comparing incompatible vector spaces.
    #[inline]
    pub async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<RetrievedChunk>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let Some(manifest) = self.store.embedding_model().await? else {
            debug!("Index holds no vectors; returning empty retrieval");
            return Ok(Vec::new());
        };

        if manifest.model_id != self.embedder.model_id() {
            return Err(RagError::Consistency(format!(
                "index vectors were produced by '{}' but the query is embedded with '{}'; re-embed the corpus before searching",
                manifest.model_id,
                self.embedder.model_id()
            )));
        }
        if manifest.dimension != self.embedder.dimension() {
            return Err(RagError::Consistency(format!(
                "index dimension is {} but the embedder produces {} values",
                manifest.dimension,
                self.embedder.dimension()
            )));
        }

        let query_vector = self.embedder.embed(query)?;

        let hits = match options.mode {
            SearchMode::Vector => {
                self.store
                    .query_vector(
                        &query_vector,
                        options.top_k,
                        options.category_filter,
                        options.similarity_threshold,
                    )
                    .await?
            }
            SearchMode::Hybrid => self.hybrid_search(query, &query_vector, options).await?,
        };

        let results: Vec<RetrievedChunk> = hits
            .into_iter()
            .unique_by(|hit| (hit.chunk.document_id.clone(), hit.chunk.chunk_index))
            .map(|hit| RetrievedChunk {
                chunk: hit.chunk,
                score: hit.score,
                document_filename: hit.document_filename,
            })
            .collect();

        debug!(
            "Retrieved {} chunks for query ({} mode)",
            results.len(),
            match options.mode {
                SearchMode::Vector => "vector",
                SearchMode::Hybrid => "hybrid",
            }
        );

        Ok(results)
    }

    /// Fuse lexical and vector relevance.
    ///
    /// A chunk is eligible when it satisfies the lexical predicate OR clears
    /// the configured vector-similarity floor; the floor keeps lexical-only
    /// matches from being starved without opening the gate to every chunk.
    /// Lexical ranks are min-max normalized before weighting since their
    /// scale is backend-specific.
    async fn hybrid_search(
        &self,
        query: &str,
        query_vector: &[f32],
        options: &SearchOptions,
    ) -> Result<Vec<ScoredChunk>> {
        let lexical = self
            .store
            .query_lexical(query, options.category_filter)
            .await?;

        let candidate_k = options
            .top_k
            .saturating_mul(HYBRID_CANDIDATE_FACTOR)
            .max(options.top_k);
        let vector = self
            .store
            .query_vector(
                query_vector,
                candidate_k,
                options.category_filter,
                self.config.vector_floor,
            )
            .await?;

        if lexical.is_empty() && vector.is_empty() {
            return Ok(Vec::new());
        }

        let lexical_scores = normalize_scores(&lexical);
        let vector_scores: HashMap<(String, i64), f32> = vector
            .iter()
            .map(|hit| (chunk_key(&hit.chunk), hit.score))
            .collect();

        let mut seen: HashSet<(String, i64)> = HashSet::new();
        let mut merged: Vec<ScoredChunk> = Vec::new();

        for mut hit in vector.into_iter().chain(lexical.into_iter()) {
            let key = chunk_key(&hit.chunk);
            if !seen.insert(key.clone()) {
                continue;
            }
            let vector_component = vector_scores.get(&key).copied().unwrap_or(0.0);
            let lexical_component = lexical_scores.get(&key).copied().unwrap_or(0.0);
            hit.score = self
                .config
                .vector_weight
                .mul_add(vector_component, self.config.text_weight * lexical_component);
            merged.push(hit);
        }

        merged.sort_by(rank_ordering);
        merged.truncate(options.top_k);
        Ok(merged)
    }
}

fn chunk_key(chunk: &ChunkRecord) -> (String, i64) {
    (chunk.document_id.clone(), chunk.chunk_index)
}

/// Min-max normalize raw scores to `[0, 1]`. All-equal scores normalize
/// to 1.0.
fn normalize_scores(hits: &[ScoredChunk]) -> HashMap<(String, i64), f32> {
    if hits.is_empty() {
        return HashMap::new();
    }

    let min = hits.iter().map(|h| h.score).fold(f32::INFINITY, f32::min);
    let max = hits
        .iter()
        .map(|h| h.score)
        .fold(f32::NEG_INFINITY, f32::max);

    hits.iter()
        .map(|hit| {
            let normalized = if (max - min).abs() < f32::EPSILON {
                1.0
            } else {
                (hit.score - min) / (max - min)
            };
            (chunk_key(&hit.chunk), normalized)
        })
        .collect()
}
