#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, warn};
use url::Url;

use crate::config::EmbeddingConfig;
use crate::{RagError, Result};

const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const EXPONENTIAL_BACKOFF_BASE: u64 = 2;

/// Maps text to a fixed-dimension vector space.
///
/// Batch and single-item calls must be numerically equivalent; the default
/// `embed` delegates to `embed_batch` to guarantee it. Implementations are
/// versioned by `model_id`, which the store records so that vectors from
/// incompatible models are never compared.
pub trait Embedder: Send + Sync {
    /// Identifier of the model producing the vectors.
    fn model_id(&self) -> &str;

    /// Dimensionality of every vector produced by this embedder.
    fn dimension(&self) -> usize;

    /// Embed a batch of texts, one L2-normalized vector per input.
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text.
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(std::slice::from_ref(&text.to_owned()))?
            .into_iter()
            .next()
            .ok_or_else(|| RagError::Consistency("embedding batch returned no vectors".to_string()))
    }
}

/// Scale a vector to unit length. Zero vectors are left untouched.
#[inline]
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}

/// Cosine similarity between two vectors of equal dimension.
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum::<f32>();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// HTTP embedding client speaking the Ollama-style `/api/embed` protocol.
#[derive(Debug, Clone)]
pub struct HttpEmbeddingClient {
    base_url: Url,
    model: String,
    batch_size: u32,
    dimension: usize,
    agent: ureq::Agent,
    retry_attempts: u32,
}

#[derive(Debug, Serialize)]
struct EmbedRequest {
    model: String,
    prompt: String,
}

#[derive(Debug, Serialize)]
struct BatchEmbedRequest {
    model: String,
    #[serde(rename = "input")]
    inputs: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct BatchEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl HttpEmbeddingClient {
    #[inline]
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let base_url = config.url()?;

        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(DEFAULT_TIMEOUT_SECONDS)))
            .build()
            .into();

        Ok(Self {
            base_url,
            model: config.model.clone(),
            batch_size: config.batch_size,
            dimension: config.dimension as usize,
            agent,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
        })
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        self
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    fn embed_single_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = self
            .base_url
            .join("/api/embed")
            .map_err(|e| self.upstream(format!("failed to build embedding URL: {e}")))?;

        let request_json = if texts.len() == 1 {
            serde_json::to_string(&EmbedRequest {
                model: self.model.clone(),
                prompt: texts[0].clone(),
            })
        } else {
            serde_json::to_string(&BatchEmbedRequest {
                model: self.model.clone(),
                inputs: texts.to_vec(),
            })
        }
        .map_err(|e| self.upstream(format!("failed to serialize embedding request: {e}")))?;

        let response_text = self.make_request_with_retry(|| {
            self.agent
                .post(url.as_str())
                .header("Content-Type", "application/json")
                .send(&request_json)
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })?;

        let vectors = if texts.len() == 1 {
            let response: EmbedResponse = serde_json::from_str(&response_text)
                .map_err(|e| self.upstream(format!("failed to parse embedding response: {e}")))?;
            vec![response.embedding]
        } else {
            let response: BatchEmbedResponse = serde_json::from_str(&response_text)
                .map_err(|e| self.upstream(format!("failed to parse embedding response: {e}")))?;
            response.embeddings
        };

        if vectors.len() != texts.len() {
            return Err(self.upstream(format!(
                "mismatch between request and response counts: {} vs {}",
                texts.len(),
                vectors.len()
            )));
        }

        for vector in &vectors {
            if vector.len() != self.dimension {
                return Err(RagError::Consistency(format!(
                    "embedding dimension mismatch: model '{}' returned {} values, expected {}",
                    self.model,
                    vector.len(),
                    self.dimension
                )));
            }
        }

        Ok(vectors)
    }

    fn make_request_with_retry<F>(&self, mut request_fn: F) -> Result<String>
    where
        F: FnMut() -> std::result::Result<String, ureq::Error>,
    {
        let mut last_error = None;

        for attempt in 1..=self.retry_attempts {
            debug!("Embedding request attempt {}/{}", attempt, self.retry_attempts);

            match request_fn() {
                Ok(response_text) => return Ok(response_text),
                Err(error) => {
                    let should_retry = match &error {
                        ureq::Error::StatusCode(status) => {
                            if *status >= 500 || *status == 429 {
                                warn!(
                                    "Embedding server error (status {}), attempt {}/{}",
                                    status, attempt, self.retry_attempts
                                );
                                true
                            } else {
                                warn!("Embedding client error (status {}), not retrying", status);
                                return Err(self.upstream(format!("HTTP {status}")));
                            }
                        }
                        ureq::Error::ConnectionFailed
                        | ureq::Error::HostNotFound
                        | ureq::Error::Timeout(_)
                        | ureq::Error::Io(_) => {
                            warn!(
                                "Embedding transport error: {}, attempt {}/{}",
                                error, attempt, self.retry_attempts
                            );
                            true
                        }
                        _ => {
                            warn!("Non-retryable embedding error: {}", error);
                            false
                        }
                    };

                    if !should_retry {
                        return Err(self.upstream(format!("non-retryable error: {error}")));
                    }

                    last_error = Some(self.upstream(format!("request error: {error}")));

                    if attempt < self.retry_attempts {
                        let delay_ms = EXPONENTIAL_BACKOFF_BASE.pow(attempt - 1) * 1000;
                        std::thread::sleep(Duration::from_millis(delay_ms));
                    }
                }
            }
        }

        error!(
            "All embedding retry attempts failed for request to {}",
            self.base_url
        );

        Err(last_error
            .unwrap_or_else(|| self.upstream("request failed after retries".to_string())))
    }

    fn upstream(&self, detail: String) -> RagError {
        RagError::Upstream {
            provider: format!("embeddings({})", self.model),
            detail,
        }
    }
}

impl Embedder for HttpEmbeddingClient {
    #[inline]
    fn model_id(&self) -> &str {
        &self.model
    }

    #[inline]
    fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Generating embeddings for {} texts", texts.len());

        let mut results = Vec::with_capacity(texts.len());

        // Process in batches to avoid overwhelming the server.
        for batch in texts.chunks(self.batch_size as usize) {
            let mut vectors = self.embed_single_batch(batch)?;
            for vector in &mut vectors {
                l2_normalize(vector);
            }
            results.extend(vectors);
        }

        debug!("Generated {} embeddings total", results.len());
        Ok(results)
    }
}
