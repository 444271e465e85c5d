use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::chunk::Chunk;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkerConfig {
    /// Window length in characters.
    pub chunk_size: usize,
    /// Characters shared by consecutive windows.
    pub overlap: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            overlap: 100,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChunkerError {
    #[error("chunk_size must be greater than zero")]
    ZeroChunkSize,
    #[error("overlap ({overlap}) must be smaller than chunk_size ({chunk_size})")]
    OverlapTooLarge { chunk_size: usize, overlap: usize },
}

impl ChunkerConfig {
    pub fn validate(&self) -> Result<(), ChunkerError> {
        if self.chunk_size == 0 {
            return Err(ChunkerError::ZeroChunkSize);
        }
        if self.overlap >= self.chunk_size {
            return Err(ChunkerError::OverlapTooLarge {
                chunk_size: self.chunk_size,
                overlap: self.overlap,
            });
        }
        Ok(())
    }

    fn stride(&self) -> usize {
        self.chunk_size - self.overlap
    }
}

/// Fixed-size sliding window splitter.
#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    pub fn new(config: ChunkerConfig) -> Result<Self, ChunkerError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Lazily yields the windows of `text` in document order.
    ///
    /// The returned iterator is `Clone`; cloning it (or calling this again)
    /// restarts the sequence from the same position.
    pub fn chunks<'a>(&self, doc_id: &'a str, text: &'a str, source: &'a str) -> Chunks<'a> {
        Chunks {
            doc_id,
            text,
            source,
            chunk_size: self.config.chunk_size,
            stride: self.config.stride(),
            start_char: 0,
            start_byte: 0,
            done: false,
        }
    }

    pub fn chunk_text(&self, doc_id: &str, text: &str, source: &str) -> Vec<Chunk> {
        self.chunks(doc_id, text, source).collect()
    }
}

#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    doc_id: &'a str,
    text: &'a str,
    source: &'a str,
    chunk_size: usize,
    stride: usize,
    start_char: usize,
    start_byte: usize,
    done: bool,
}

impl Iterator for Chunks<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.done {
            return None;
        }

        let rest = &self.text[self.start_byte..];
        if rest.is_empty() {
            self.done = true;
            return None;
        }

        let (end_byte, taken, is_last) = match rest.char_indices().nth(self.chunk_size) {
            Some((idx, _)) => (idx, self.chunk_size, false),
            None => (rest.len(), rest.chars().count(), true),
        };

        let chunk = Chunk::new(
            self.doc_id.to_string(),
            rest[..end_byte].to_string(),
            self.source.to_string(),
            (self.start_char, self.start_char + taken),
        );

        if is_last {
            self.done = true;
        } else {
            // stride < chunk_size, so this index always exists here
            let step_bytes = rest
                .char_indices()
                .nth(self.stride)
                .map(|(idx, _)| idx)
                .unwrap_or(rest.len());
            self.start_byte += step_bytes;
            self.start_char += self.stride;
        }

        Some(chunk)
    }
}

impl std::iter::FusedIterator for Chunks<'_> {}
