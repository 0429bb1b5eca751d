
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use std::str::FromStr;

use crate::RagError;

/// Category tag for ingested documents, drawn from a fixed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DocType {
    Policy,
    Faq,
    ProductGuide,
    BrandGuide,
    Other,
}

impl DocType {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match *self {
            DocType::Policy => "policy",
            DocType::Faq => "faq",
            DocType::ProductGuide => "product_guide",
            DocType::BrandGuide => "brand_guide",
            DocType::Other => "other",
        }
    }
}

impl std::fmt::Display for DocType {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocType {
    type Err = RagError;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "policy" => Ok(DocType::Policy),
            "faq" => Ok(DocType::Faq),
            "product_guide" => Ok(DocType::ProductGuide),
            "brand_guide" => Ok(DocType::BrandGuide),
            "other" => Ok(DocType::Other),
            _ => Err(RagError::Validation(format!(
                "invalid document category: '{s}' (expected one of policy, faq, product_guide, brand_guide, other)"
            ))),
        }
    }
}

/// Processing status of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Indexed,
    Failed,
}

impl std::fmt::Display for DocumentStatus {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            DocumentStatus::Pending => write!(f, "pending"),
            DocumentStatus::Processing => write!(f, "processing"),
            DocumentStatus::Indexed => write!(f, "indexed"),
            DocumentStatus::Failed => write!(f, "failed"),
        }
    }
}

/// An ingested document. `status == Indexed` implies `total_chunks > 0` and
/// every chunk row references this document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Document {
    pub id: String,
    /// Stored (unique) filename.
    pub filename: String,
    /// Filename as originally uploaded.
    pub original_filename: String,
    pub doc_type: DocType,
    pub status: DocumentStatus,
    pub total_pages: Option<i64>,
    pub total_chunks: i64,
    pub error_message: Option<String>,
    /// Model identifier that produced this document's vectors.
    pub embedding_model: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Document {
    #[inline]
    pub fn is_indexed(&self) -> bool {
        self.status == DocumentStatus::Indexed
    }

    #[inline]
    pub fn is_failed(&self) -> bool {
        self.status == DocumentStatus::Failed
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDocument {
    pub filename: String,
    pub original_filename: String,
    pub doc_type: DocType,
    pub total_pages: Option<i64>,
}

/// A stored retrievable unit belonging to exactly one document.
/// Immutable once created; removed only by document cascade.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkRecord {
    pub id: String,
    pub document_id: String,
    pub content: String,
    pub section_title: Option<String>,
    pub chunk_index: i64,
    pub token_count: i64,
    pub page_number: Option<i64>,
    pub metadata: serde_json::Value,
}

/// A chunk plus its vector, ready for insertion.
#[derive(Debug, Clone, PartialEq)]
pub struct NewChunk {
    pub id: String,
    pub document_id: String,
    pub content: String,
    pub section_title: Option<String>,
    pub chunk_index: i64,
    pub token_count: i64,
    pub page_number: Option<i64>,
    pub embedding: Vec<f32>,
    pub metadata: serde_json::Value,
}

/// A chunk scored against a query, with enough document context for
/// deterministic ranking and provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk: ChunkRecord,
    pub score: f32,
    pub document_filename: String,
    pub document_created_at: NaiveDateTime,
}

/// Identity of the vector space backing a populated index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexManifest {
    pub model_id: String,
    pub dimension: usize,
}
