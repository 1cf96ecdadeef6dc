//! Document chunking for fastsearch.
//!
//! Splits text into overlapping retrieval units. Paragraphs are the
//! atomic unit: a chunk accumulates whole paragraphs up to a target
//! character size and carries a character-level overlap into the next
//! chunk. Markdown input additionally tracks section headings, which
//! force chunk boundaries and become chunk metadata.

mod splitter;

pub use splitter::chunk_text;

use std::path::Path;

/// Default chunk target size in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 2_000;

/// Default overlap between consecutive chunks, in characters.
pub const DEFAULT_OVERLAP: usize = 200;

/// Input format hint for the chunker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DocumentFormat {
    /// Plain text: paragraph accumulation only.
    #[default]
    Plain,
    /// Markdown: heading-aware sectioning on top of paragraph
    /// accumulation.
    Markdown,
}

impl DocumentFormat {
    /// Sniffs the format from a file extension.
    #[must_use]
    pub fn from_path<P: AsRef<Path>>(path: P) -> Self {
        match path
            .as_ref()
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("md" | "markdown") => Self::Markdown,
            _ => Self::Plain,
        }
    }

    /// Parses a format name (`plain` | `markdown`).
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "plain" | "text" => Some(Self::Plain),
            "markdown" | "md" => Some(Self::Markdown),
            _ => None,
        }
    }
}

/// One chunk produced by the chunker, before embedding and storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPiece {
    /// Chunk text, including any overlap prefix carried from the
    /// previous chunk.
    pub text: String,
    /// Nearest preceding Markdown heading, without `#` markers.
    pub section: Option<String>,
}

/// Chunker configuration.
#[derive(Debug, Clone, Copy)]
pub struct ChunkerConfig {
    /// Target chunk size in characters.
    pub target_size: usize,
    /// Characters carried from the end of one chunk into the next.
    pub overlap: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            target_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_OVERLAP,
        }
    }
}

impl ChunkerConfig {
    /// Creates a config with a custom target size and overlap.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidArgument`] if the target size is
    /// zero or the overlap is not smaller than the target.
    pub fn new(target_size: usize, overlap: usize) -> crate::Result<Self> {
        if target_size == 0 {
            return Err(crate::Error::InvalidArgument(
                "chunk target size must be > 0".to_string(),
            ));
        }
        if overlap >= target_size {
            return Err(crate::Error::InvalidArgument(format!(
                "overlap {overlap} must be less than chunk size {target_size}"
            )));
        }
        Ok(Self {
            target_size,
            overlap,
        })
    }
}
