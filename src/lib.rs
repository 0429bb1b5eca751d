use thiserror::Error;

pub type Result<T> = std::result::Result<T, RagError>;

/// Error taxonomy for the retrieval-augmented pipeline.
///
/// Validation-class errors (`UnknownTemplate`, `MissingVariables`,
/// `TemplateDeclaration`, `Validation`) are caller mistakes and are never
/// retried. `Upstream` marks an unreachable or rate-limited provider and is
/// the only class eligible for provider failover. `Consistency` is fatal for
/// the ingestion batch that raised it. Empty retrieval is not an error.
#[derive(Error, Debug)]
pub enum RagError {
    #[error("Unknown template: '{0}'")]
    UnknownTemplate(String),

    #[error("Template '{template}' is missing required variables: {missing:?}")]
    MissingVariables {
        template: String,
        missing: Vec<String>,
    },

    #[error(
        "Template '{template}' declaration mismatch (undeclared placeholders: {undeclared:?}, unused variables: {unused:?})"
    )]
    TemplateDeclaration {
        template: String,
        undeclared: Vec<String>,
        unused: Vec<String>,
    },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Provider '{provider}' unavailable: {detail}")]
    Upstream { provider: String, detail: String },

    #[error("Consistency violation: {0}")]
    Consistency(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub mod chunking;
pub mod config;
pub mod embeddings;
pub mod generation;
pub mod ingest;
pub mod llm;
pub mod prompts;
pub mod retrieval;
pub mod store;
