use serde::{Deserialize, Serialize};

use crate::error::{Result, RetrievalError};

pub const DEFAULT_CHUNK_SIZE: usize = 500;
pub const DEFAULT_OVERLAP: usize = 100;

/// A contiguous window of the source text. `id` is the window's position in
/// the ordered sequence and doubles as the row of its vector in the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: usize,
    pub text: String,
}

impl Chunk {
    /// Length in characters.
    pub fn len(&self) -> usize {
        self.text.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingOptions {
    pub chunk_size: usize,
    pub overlap: usize,
}

impl Default for ChunkingOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_OVERLAP,
        }
    }
}

pub fn split_with(text: &str, options: ChunkingOptions) -> Result<Vec<Chunk>> {
    split(text, options.chunk_size, options.overlap)
}

/// Splits `text` into windows of `chunk_size` characters, each starting
/// `chunk_size - overlap` characters after the previous one. The last window
/// may be shorter.
pub fn split(text: &str, chunk_size: usize, overlap: usize) -> Result<Vec<Chunk>> {
    if text.is_empty() {
        return Err(RetrievalError::InvalidArgument(
            "text must be a non-empty string".into(),
        ));
    }
    if chunk_size <= overlap {
        return Err(RetrievalError::InvalidArgument(format!(
            "chunk_size ({}) must be greater than overlap ({})",
            chunk_size, overlap
        )));
    }
    let stride = chunk_size - overlap;

    // Byte offset of every character, plus the end of the text.
    let boundaries: Vec<usize> = text
        .char_indices()
        .map(|(offset, _)| offset)
        .chain(std::iter::once(text.len()))
        .collect();
    let char_count = boundaries.len() - 1;

    let mut chunks = Vec::with_capacity(char_count / stride + 1);
    let mut start = 0;
    while start < char_count {
        let end = (start + chunk_size).min(char_count);
        chunks.push(Chunk {
            id: chunks.len(),
            text: text[boundaries[start]..boundaries[end]].to_string(),
        });
        start += stride;
    }

    if chunks.is_empty() {
        return Err(RetrievalError::EmptyResult(
            "text splitting produced no chunks".into(),
        ));
    }

    log::debug!(
        "Split {} characters into {} chunks (size {}, overlap {})",
        char_count,
        chunks.len(),
        chunk_size,
        overlap
    );
    Ok(chunks)
}
