use crate::config::ChunkingConfig;
use crate::error::{Error, Result};

/// Represents a window of document text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    /// The actual text content of this chunk
    pub text: String,
    /// Position of this chunk within its document
    pub index: usize,
    /// Starting character offset of this chunk in the original document
    pub start_position: usize,
}

/// Split `text` into windows of `size` characters, each starting `size - overlap`
/// characters after the previous one.
///
/// Offsets count Unicode scalar values, so a window never splits a code point.
/// The last window may be shorter than `size`; a window that would only repeat
/// the tail of its predecessor is not emitted.
pub fn split_into_chunks(text: &str, size: usize, overlap: usize) -> Result<Vec<TextChunk>> {
    if size == 0 {
        return Err(Error::Configuration("chunk size must be positive".into()));
    }
    if overlap >= size {
        return Err(Error::Configuration(format!(
            "chunk overlap ({}) must be smaller than chunk size ({})",
            overlap, size
        )));
    }

    // Byte offset of every char, plus the end of the text
    let boundaries: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let char_count = boundaries.len() - 1;
    let step = size - overlap;

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < char_count {
        let end = (start + size).min(char_count);
        chunks.push(TextChunk {
            text: text[boundaries[start]..boundaries[end]].to_string(),
            index: chunks.len(),
            start_position: start,
        });
        if end == char_count {
            break;
        }
        start += step;
    }

    Ok(chunks)
}

/// Split `text` using the configured window
pub fn chunk_document(text: &str, config: &ChunkingConfig) -> Result<Vec<TextChunk>> {
    split_into_chunks(text, config.size, config.overlap)
}
