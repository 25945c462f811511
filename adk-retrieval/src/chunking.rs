//! Document chunking.
//!
//! [`split_text`] recursively splits text on a prioritized list of boundary
//! separators and merges the pieces back into chunks of at most `chunk_size`
//! characters, each chunk starting with up to `chunk_overlap` characters
//! carried over from the end of the previous one. [`RecursiveChunker`] wraps
//! it behind the [`Chunker`] trait and produces [`Chunk`] records.

use std::collections::VecDeque;

use crate::config::{DEFAULT_SEPARATORS, RagConfig, validate_chunking};
use crate::document::{Chunk, Document};
use crate::error::{RagError, Result};

/// A strategy for splitting documents into chunks.
///
/// Implementations produce [`Chunk`]s with text and position metadata but no
/// embeddings. Embeddings are attached later by the index manager.
pub trait Chunker: Send + Sync {
    /// Split a document into chunks.
    ///
    /// Returns an empty `Vec` if the document text is empty or whitespace.
    fn chunk(&self, document: &Document) -> Result<Vec<Chunk>>;
}

/// Splits text hierarchically on separators: paragraphs, lines, sentences,
/// words, then characters.
///
/// # Example
///
/// ```rust,ignore
/// use adk_retrieval::RecursiveChunker;
///
/// let chunker = RecursiveChunker::new(500, 50)?;
/// let chunks = chunker.chunk(&document)?;
/// ```
#[derive(Debug, Clone)]
pub struct RecursiveChunker {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<String>,
}

impl RecursiveChunker {
    /// Create a chunker with the default separators.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if `chunk_size == 0` or
    /// `chunk_overlap >= chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        validate_chunking(chunk_size, chunk_overlap)?;
        Ok(Self {
            chunk_size,
            chunk_overlap,
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
        })
    }

    /// Create a chunker from the chunking section of a [`RagConfig`].
    pub fn from_config(config: &RagConfig) -> Result<Self> {
        Self::new(config.chunk_size, config.chunk_overlap)?
            .with_separators(config.separators.iter().cloned())
    }

    /// Replace the separator priority list.
    pub fn with_separators<I, S>(mut self, separators: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let separators: Vec<String> = separators.into_iter().map(Into::into).collect();
        if separators.is_empty() {
            return Err(RagError::ConfigError("separators must not be empty".to_string()));
        }
        self.separators = separators;
        Ok(self)
    }

    /// Split raw text with this chunker's settings.
    pub fn split(&self, text: &str) -> Result<Vec<String>> {
        split_text(text, self.chunk_size, self.chunk_overlap, &self.separators)
    }
}

impl Chunker for RecursiveChunker {
    fn chunk(&self, document: &Document) -> Result<Vec<Chunk>> {
        let texts = self.split(&document.text)?;
        let total_chunks = texts.len();

        Ok(texts
            .into_iter()
            .enumerate()
            .map(|(chunk_index, text)| Chunk {
                id: Chunk::make_id(&document.id, chunk_index),
                document_id: document.id.clone(),
                char_len: text.chars().count(),
                text,
                chunk_index,
                total_chunks,
                file_type: document.file_type.clone(),
                embedding: Vec::new(),
            })
            .collect())
    }
}

/// Split `text` into chunks of at most `chunk_size` characters.
///
/// The first separator that occurs in the text is used; pieces that are
/// still too large are split again with the separators that follow it. An
/// empty separator splits between characters. A piece larger than
/// `chunk_size` survives only when no separator is left to split it.
///
/// # Errors
///
/// Returns [`RagError::ConfigError`] if `chunk_size == 0`,
/// `chunk_overlap >= chunk_size`, or `separators` is empty.
pub fn split_text<S: AsRef<str>>(
    text: &str,
    chunk_size: usize,
    chunk_overlap: usize,
    separators: &[S],
) -> Result<Vec<String>> {
    validate_chunking(chunk_size, chunk_overlap)?;
    if separators.is_empty() {
        return Err(RagError::ConfigError("separators must not be empty".to_string()));
    }
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    let separators: Vec<&str> = separators.iter().map(AsRef::as_ref).collect();
    Ok(split_recursive(text, chunk_size, chunk_overlap, &separators))
}

fn split_recursive(
    text: &str,
    chunk_size: usize,
    chunk_overlap: usize,
    separators: &[&str],
) -> Vec<String> {
    let position = separators
        .iter()
        .position(|sep| sep.is_empty() || text.contains(sep))
        .unwrap_or(separators.len().saturating_sub(1));
    let separator = separators.get(position).copied().unwrap_or("");
    let remaining = separators.get(position + 1..).unwrap_or(&[]);

    let pieces = if separator.is_empty() {
        split_chars(text)
    } else {
        split_keeping_separator(text, separator)
    };

    let mut chunks = Vec::new();
    let mut fitting: Vec<&str> = Vec::new();

    for piece in pieces {
        if char_len(piece) <= chunk_size {
            fitting.push(piece);
            continue;
        }
        if !fitting.is_empty() {
            chunks.extend(merge_pieces(&fitting, chunk_size, chunk_overlap));
            fitting.clear();
        }
        if remaining.is_empty() {
            // Unsplittable token; emit as is.
            push_trimmed(&mut chunks, piece.to_string());
        } else {
            chunks.extend(split_recursive(piece, chunk_size, chunk_overlap, remaining));
        }
    }

    if !fitting.is_empty() {
        chunks.extend(merge_pieces(&fitting, chunk_size, chunk_overlap));
    }

    chunks
}

/// Greedily merge pieces into chunks, seeding each new chunk with the tail
/// pieces of the previous one while they fit within `chunk_overlap`.
fn merge_pieces(pieces: &[&str], chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut window: VecDeque<(&str, usize)> = VecDeque::new();
    let mut total = 0usize;

    for piece in pieces {
        let len = char_len(piece);
        if total + len > chunk_size && !window.is_empty() {
            push_trimmed(&mut chunks, window.iter().map(|(p, _)| *p).collect());
            while total > chunk_overlap || (total + len > chunk_size && total > 0) {
                match window.pop_front() {
                    Some((_, popped)) => total -= popped,
                    None => break,
                }
            }
        }
        window.push_back((piece, len));
        total += len;
    }

    if !window.is_empty() {
        push_trimmed(&mut chunks, window.iter().map(|(p, _)| *p).collect());
    }

    chunks
}

fn push_trimmed(chunks: &mut Vec<String>, chunk: String) {
    let trimmed = chunk.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

/// Split text at a separator while keeping the separator attached to the preceding segment.
fn split_keeping_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    let mut result = Vec::new();
    let mut start = 0;

    while let Some(pos) = text[start..].find(separator) {
        let end = start + pos + separator.len();
        result.push(&text[start..end]);
        start = end;
    }

    if start < text.len() {
        result.push(&text[start..]);
    }

    result
}

fn split_chars(text: &str) -> Vec<&str> {
    text.char_indices().map(|(i, c)| &text[i..i + c.len_utf8()]).collect()
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}
