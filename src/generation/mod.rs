
use itertools::Itertools;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::llm::{LlmProvider, TokenUsage};
use crate::prompts::{CONTEXT_VARIABLE, EMPTY_CONTEXT_MARKER, PromptRegistry};
use crate::retrieval::{RetrievedChunk, Retriever, SearchMode, SearchOptions};
use crate::store::models::DocType;
use crate::{RagError, Result};

/// Variables whose values tend to make good retrieval queries, in priority
/// order, consulted when the caller gives no explicit query.
const QUERY_PRIORITY_KEYS: [&str; 6] = [
    "product_name",
    "customer_query",
    "recurring_question",
    "complaint",
    "topic",
    "description",
];

/// Variable values longer than this are skipped when synthesizing a
/// retrieval query from the request.
const MAX_QUERY_VARIABLE_LEN: usize = 200;

const FALLBACK_QUERY: &str = "general information";

/// A single generation request. Constructed per call, never stored.
#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    pub template: String,
    pub variables: HashMap<String, String>,
    pub use_retrieval: bool,
    /// Explicit retrieval query; when absent one is synthesized from the
    /// variable values.
    pub retrieval_query: Option<String>,
    pub category_filter: Option<DocType>,
    pub top_k: Option<usize>,
    pub similarity_threshold: Option<f32>,
}

/// The packaged outcome of a generation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationResult {
    pub text: String,
    /// Distinct source filenames that contributed retrieved context, in
    /// rank order.
    pub sources: Vec<String>,
    pub usage: TokenUsage,
    /// Model identifier actually used, which names the fallback provider's
    /// model after a failover.
    pub model: String,
}

/// Composes retrieval, template rendering, and the provider call into a
/// single validated request.
pub struct GenerationOrchestrator {
    registry: Arc<PromptRegistry>,
    retriever: Retriever,
    primary: Arc<dyn LlmProvider>,
    fallback: Option<Arc<dyn LlmProvider>>,
}

impl GenerationOrchestrator {
    #[inline]
    pub fn new(
        registry: Arc<PromptRegistry>,
        retriever: Retriever,
        primary: Arc<dyn LlmProvider>,
        fallback: Option<Arc<dyn LlmProvider>>,
    ) -> Self {
        Self {
            registry,
            retriever,
            primary,
            fallback,
        }
    }

    /// Run the full generation pipeline for one request.
    ///
    /// Template lookup, retrieval, and rendering failures are caller
    /// mistakes and surface immediately. A primary provider failure triggers
    /// the configured fallback exactly once; only when both fail does the
    /// upstream error reach the caller.
    #[inline]
    pub async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResult> {
        let template = self.registry.get(&request.template)?;

        info!("Generating with template '{}'", template.name);

        let mut variables = request.variables.clone();
        let mut context_blocks: Vec<String> = Vec::new();
        let mut sources: Vec<String> = Vec::new();

        if request.use_retrieval {
            let query = request
                .retrieval_query
                .clone()
                .unwrap_or_else(|| synthesize_query(&request.variables));

            let defaults = self.retriever.config();
            let options = SearchOptions {
                top_k: request.top_k.unwrap_or(defaults.default_top_k),
                category_filter: request.category_filter,
                similarity_threshold: request
                    .similarity_threshold
                    .unwrap_or(defaults.default_threshold),
                mode: SearchMode::Vector,
            };

            let results = self.retriever.search(&query, &options).await?;

            debug!(
                "Retrieved {} chunks for generation query '{}'",
                results.len(),
                query
            );

            context_blocks = results.iter().map(context_block).collect();
            sources = results
                .iter()
                .map(|r| r.document_filename.clone())
                .unique()
                .collect();
        }

        // Bind the implicit context slot unless the caller supplied one.
        // Empty retrieval and retrieval-disabled both render the explicit
        // marker rather than a silent blank.
        if template.declares(CONTEXT_VARIABLE) && !variables.contains_key(CONTEXT_VARIABLE) {
            let bound = if context_blocks.is_empty() {
                EMPTY_CONTEXT_MARKER.to_string()
            } else {
                context_blocks.join("\n\n")
            };
            variables.insert(CONTEXT_VARIABLE.to_string(), bound);
        }

        let rendered = self.registry.render(&request.template, &variables)?;

        let completion = match self.primary.complete(
            rendered.system.as_deref(),
            &rendered.user,
            template.temperature,
            template.max_tokens,
        ) {
            Ok(completion) => completion,
            Err(RagError::Upstream { provider, detail }) => {
                let Some(fallback) = &self.fallback else {
                    return Err(RagError::Upstream { provider, detail });
                };
                warn!(
                    "Provider '{}' unavailable ({}); trying fallback '{}'",
                    provider,
                    detail,
                    fallback.name()
                );
                fallback.complete(
                    rendered.system.as_deref(),
                    &rendered.user,
                    template.temperature,
                    template.max_tokens,
                )?
            }
            Err(other) => return Err(other),
        };

        info!(
            "Generated {} characters with model '{}'",
            completion.text.len(),
            completion.model
        );

        Ok(GenerationResult {
            text: completion.text,
            sources,
            usage: completion.usage,
            model: completion.model,
        })
    }
}

fn context_block(result: &RetrievedChunk) -> String {
    format!(
        "[source: {}]\n{}",
        result.document_filename, result.chunk.content
    )
}

/// Derive a retrieval query from the request variables: a priority key when
/// one is bound, otherwise a concatenation of the first few short values.
fn synthesize_query(variables: &HashMap<String, String>) -> String {
    for key in QUERY_PRIORITY_KEYS {
        if let Some(value) = variables.get(key) {
            if !value.trim().is_empty() {
                return value.clone();
            }
        }
    }

    let joined = variables
        .iter()
        .filter(|(_, value)| !value.trim().is_empty() && value.len() < MAX_QUERY_VARIABLE_LEN)
        .sorted_by(|(a, _), (b, _)| a.cmp(b))
        .take(3)
        .map(|(_, value)| value.as_str())
        .join(" ");

    if joined.is_empty() {
        FALLBACK_QUERY.to_string()
    } else {
        joined
    }
}
