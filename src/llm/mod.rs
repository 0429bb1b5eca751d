
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, warn};
use url::Url;

use crate::config::ProviderConfig;
use crate::{RagError, Result};

const DEFAULT_TIMEOUT_SECONDS: u64 = 60;
const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const EXPONENTIAL_BACKOFF_BASE: u64 = 2;

/// Token accounting reported by a provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A completed model call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    /// Model identifier actually used, distinguishable between providers.
    pub model: String,
    pub usage: TokenUsage,
}

/// Boundary to a hosted text-generation provider.
pub trait LlmProvider: Send + Sync {
    /// Configured provider name, used in logs and failover error detail.
    fn name(&self) -> &str;

    /// Model this provider is configured to call.
    fn model_id(&self) -> &str;

    /// Issue a completion call. Unreachable or rate-limited providers
    /// surface as [`RagError::Upstream`], the only error class eligible for
    /// failover.
    fn complete(
        &self,
        system: Option<&str>,
        user: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<Completion>;
}

/// Chat-completions client for OpenAI-compatible APIs (OpenAI, Groq, and
/// compatible gateways).
#[derive(Debug, Clone)]
pub struct ChatCompletionsProvider {
    name: String,
    endpoint: Url,
    api_key: Option<String>,
    model: String,
    agent: ureq::Agent,
    retry_attempts: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    model: Option<String>,
    choices: Vec<ChatChoice>,
    usage: Option<UsageBody>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsageBody {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

/// Build a provider from configuration.
#[inline]
pub fn provider_from_config(config: &ProviderConfig) -> Result<ChatCompletionsProvider> {
    ChatCompletionsProvider::new(config)
}

impl ChatCompletionsProvider {
    #[inline]
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let endpoint = config.endpoint_url()?;

        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(DEFAULT_TIMEOUT_SECONDS)))
            .build()
            .into();

        Ok(Self {
            name: config.name.clone(),
            endpoint,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
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

    fn make_request_with_retry(&self, url: &Url, body: &str) -> Result<String> {
        let mut last_error = None;

        for attempt in 1..=self.retry_attempts {
            debug!(
                "Completion request to '{}' attempt {}/{}",
                self.name, attempt, self.retry_attempts
            );

            let mut request = self
                .agent
                .post(url.as_str())
                .header("Content-Type", "application/json");
            if let Some(key) = &self.api_key {
                request = request.header("Authorization", &format!("Bearer {key}"));
            }

            match request
                .send(body)
                .and_then(|mut resp| resp.body_mut().read_to_string())
            {
                Ok(response_text) => return Ok(response_text),
                Err(error) => {
                    let should_retry = match &error {
                        ureq::Error::StatusCode(status) => {
                            if *status >= 500 || *status == 429 {
                                warn!(
                                    "Provider '{}' server error (status {}), attempt {}/{}",
                                    self.name, status, attempt, self.retry_attempts
                                );
                                true
                            } else {
                                warn!(
                                    "Provider '{}' client error (status {}), not retrying",
                                    self.name, status
                                );
                                return Err(self.upstream(format!("HTTP {status}")));
                            }
                        }
                        ureq::Error::ConnectionFailed
                        | ureq::Error::HostNotFound
                        | ureq::Error::Timeout(_)
                        | ureq::Error::Io(_) => {
                            warn!(
                                "Provider '{}' transport error: {}, attempt {}/{}",
                                self.name, error, attempt, self.retry_attempts
                            );
                            true
                        }
                        _ => {
                            warn!("Provider '{}' non-retryable error: {}", self.name, error);
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
            "All completion retry attempts failed for provider '{}'",
            self.name
        );

        Err(last_error
            .unwrap_or_else(|| self.upstream("request failed after retries".to_string())))
    }

    fn upstream(&self, detail: String) -> RagError {
        RagError::Upstream {
            provider: self.name.clone(),
            detail,
        }
    }
}

impl LlmProvider for ChatCompletionsProvider {
    #[inline]
    fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    fn model_id(&self) -> &str {
        &self.model
    }

    #[inline]
    fn complete(
        &self,
        system: Option<&str>,
        user: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<Completion> {
        let url = self
            .endpoint
            .join("/v1/chat/completions")
            .map_err(|e| self.upstream(format!("failed to build completion URL: {e}")))?;

        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: user,
        });

        let body = serde_json::to_string(&ChatRequest {
            model: &self.model,
            messages,
            temperature,
            max_tokens,
        })
        .map_err(|e| self.upstream(format!("failed to serialize completion request: {e}")))?;

        let response_text = self.make_request_with_retry(&url, &body)?;

        let response: ChatResponse = serde_json::from_str(&response_text)
            .map_err(|e| self.upstream(format!("failed to parse completion response: {e}")))?;

        let text = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| self.upstream("response contained no choices".to_string()))?;

        let usage = response.usage.map_or_else(TokenUsage::default, |u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });

        let model = response.model.unwrap_or_else(|| self.model.clone());

        debug!(
            "Provider '{}' completed with model '{}' ({} total tokens)",
            self.name, model, usage.total_tokens
        );

        Ok(Completion { text, model, usage })
    }
}
