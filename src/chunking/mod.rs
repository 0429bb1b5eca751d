
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{RagError, Result};

/// Normalized parser output consumed by the chunker.
///
/// Supplied by the external document parser; the core never reads binary
/// formats itself.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedDocument {
    /// Full normalized text of the document.
    pub text: String,
    /// Recognized section structure, empty for unstructured text.
    pub sections: Vec<Section>,
    /// Page start offsets in document order (character offsets into `text`).
    pub page_map: Vec<PageBreak>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub title: String,
    pub body: String,
    pub page: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageBreak {
    /// Character offset at which the page begins.
    pub offset: usize,
    pub page: i64,
}

impl ParsedDocument {
    #[inline]
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            sections: Vec::new(),
            page_map: Vec::new(),
        }
    }

    /// Highest page number known to the parser, if any.
    #[inline]
    pub fn total_pages(&self) -> Option<i64> {
        let from_map = self.page_map.iter().map(|p| p.page).max();
        let from_sections = self.sections.iter().filter_map(|s| s.page).max();
        from_map.into_iter().chain(from_sections).max()
    }
}

/// A single retrievable unit produced by the chunker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentChunk {
    pub content: String,
    pub section_title: Option<String>,
    /// Zero-based position within the document, gap-free.
    pub chunk_index: usize,
    /// Estimated token count of `content`.
    pub token_count: usize,
    pub page_number: Option<i64>,
}

/// Configuration for document chunking.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Target chunk size in tokens.
    pub target_tokens: usize,
    /// Overlap carried from the end of one chunk into the next. Must be
    /// strictly less than `target_tokens`.
    pub overlap_tokens: usize,
    /// A trailing remainder below this size is merged into the previous
    /// chunk instead of being emitted standalone.
    pub min_chunk_tokens: usize,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            target_tokens: 512,
            overlap_tokens: 64,
            min_chunk_tokens: 20,
        }
    }
}

/// Split a parsed document into overlapping, size-bounded chunks.
///
/// When `preserve_sections` is set and the parser recognized sections, a
/// chunk never spans two sections; a section that alone exceeds the target
/// size is split with the same sliding window used for unstructured text.
/// Empty input produces zero chunks; callers treat that as a pipeline
/// failure, not a degenerate success.
#[inline]
pub fn chunk_document(
    doc: &ParsedDocument,
    config: &ChunkingConfig,
    preserve_sections: bool,
) -> Result<Vec<DocumentChunk>> {
    if config.overlap_tokens >= config.target_tokens {
        return Err(RagError::Validation(format!(
            "overlap_tokens ({}) must be strictly less than target_tokens ({})",
            config.overlap_tokens, config.target_tokens
        )));
    }
    if config.min_chunk_tokens >= config.target_tokens {
        return Err(RagError::Validation(format!(
            "min_chunk_tokens ({}) must be less than target_tokens ({})",
            config.min_chunk_tokens, config.target_tokens
        )));
    }

    let mut chunks = Vec::new();

    if preserve_sections && !doc.sections.is_empty() {
        for section in &doc.sections {
            chunk_section(section, config, &mut chunks);
        }
    } else {
        let words = words_with_offsets(&doc.text);
        for (start, end) in window_ranges(&words, config) {
            let page = page_for_offset(&doc.page_map, words[start].0);
            chunks.push(build_chunk(&words[start..end], None, page));
        }
    }

    // Assign document-order indices after all sections are processed.
    for (index, chunk) in chunks.iter_mut().enumerate() {
        chunk.chunk_index = index;
    }

    debug!(
        "Chunked document into {} chunks ({} tokens total)",
        chunks.len(),
        chunks.iter().map(|c| c.token_count).sum::<usize>()
    );

    Ok(chunks)
}

/// Chunk a single section, keeping its title and page on every piece.
fn chunk_section(section: &Section, config: &ChunkingConfig, chunks: &mut Vec<DocumentChunk>) {
    let words = words_with_offsets(&section.body);
    for (start, end) in window_ranges(&words, config) {
        chunks.push(build_chunk(
            &words[start..end],
            Some(section.title.clone()),
            section.page,
        ));
    }
}

/// Compute sliding-window word ranges over `words`.
///
/// Each window accumulates words until the token estimate reaches the target,
/// then the next window restarts `overlap_tokens`-worth of words before the
/// previous end. A trailing remainder below the minimum size is merged into
/// the previous window.
fn window_ranges(words: &[(usize, &str)], config: &ChunkingConfig) -> Vec<(usize, usize)> {
    if words.is_empty() {
        return Vec::new();
    }

    let overlap_words = words_for_tokens(config.overlap_tokens);
    let mut ranges: Vec<(usize, usize)> = Vec::new();
    let mut start = 0;

    loop {
        let end = window_end(words, start, config.target_tokens);
        ranges.push((start, end));
        if end >= words.len() {
            break;
        }
        let taken = end - start;
        let step_back = overlap_words.min(taken.saturating_sub(1));
        start = end - step_back;
    }

    if ranges.len() >= 2 {
        let (last_start, last_end) = ranges[ranges.len() - 1];
        if token_estimate_of(&words[last_start..last_end]) < config.min_chunk_tokens {
            ranges.pop();
            let merge_into = ranges.len() - 1;
            ranges[merge_into].1 = last_end;
        }
    }

    ranges
}

/// Walk forward from `start` until the token estimate reaches the target.
/// Always takes at least one word so the window makes progress.
fn window_end(words: &[(usize, &str)], start: usize, target_tokens: usize) -> usize {
    let mut end = start;
    let mut word_count = 0usize;
    let mut punct_count = 0usize;

    while end < words.len() {
        let punct = words[end]
            .1
            .chars()
            .filter(|c| c.is_ascii_punctuation())
            .count();
        let estimate =
            ((punct_count + punct) as f64).mul_add(0.1, (word_count + 1) as f64 / 0.75) as usize;
        if estimate > target_tokens && word_count > 0 {
            break;
        }
        word_count += 1;
        punct_count += punct;
        end += 1;
    }

    end
}

fn build_chunk(
    words: &[(usize, &str)],
    section_title: Option<String>,
    page_number: Option<i64>,
) -> DocumentChunk {
    let content = words.iter().map(|(_, word)| *word).join(" ");
    DocumentChunk {
        content,
        section_title,
        chunk_index: 0,
        token_count: token_estimate_of(words),
        page_number,
    }
}

fn words_with_offsets(text: &str) -> Vec<(usize, &str)> {
    text.split_whitespace()
        .map(|word| (word.as_ptr() as usize - text.as_ptr() as usize, word))
        .collect()
}

fn token_estimate_of(words: &[(usize, &str)]) -> usize {
    let word_count = words.len();
    let punct_count = words
        .iter()
        .map(|(_, word)| word.chars().filter(|c| c.is_ascii_punctuation()).count())
        .sum::<usize>();
    (punct_count as f64).mul_add(0.1, word_count as f64 / 0.75) as usize
}

/// Page containing the given character offset, assuming `page_map` is sorted.
fn page_for_offset(page_map: &[PageBreak], offset: usize) -> Option<i64> {
    page_map
        .iter()
        .take_while(|p| p.offset <= offset)
        .last()
        .map(|p| p.page)
}

/// Estimate token count using a simple heuristic.
/// This is a rough approximation; only monotonic consistency with the
/// chunking budgets matters, not tokenizer-exact counts.
#[inline]
pub fn estimate_token_count(text: &str) -> usize {
    // Rough heuristic: 1 token ≈ 0.75 words for English text, with a small
    // correction for punctuation-heavy content.
    let word_count = text.split_whitespace().count();
    let punct_count = text.chars().filter(|c| c.is_ascii_punctuation()).count();

    (punct_count as f64).mul_add(0.1, word_count as f64 / 0.75) as usize
}

/// Convert a token budget into an approximate word budget.
fn words_for_tokens(tokens: usize) -> usize {
    (tokens as f64 * 0.75) as usize
}
