//! Chunk record types.
//!
//! A chunk is the unit of retrieval: a bounded slice of a source document
//! together with its position, metadata and creation time. The numeric
//! `id` assigned by the store is the only durable identifier; the
//! `(source, chunk_index)` pair is rewritten wholesale on re-index.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A chunk as stored and returned by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Durable identifier assigned by the store (monotonic, never reused).
    pub id: i64,

    /// Origin path of the source document.
    pub source: String,

    /// Position within the source, 0-based and contiguous per source.
    pub chunk_index: usize,

    /// Chunk content (UTF-8 text).
    pub content: String,

    /// Small key/value map, e.g. the `section` heading for Markdown.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,

    /// Unix timestamp of insertion.
    pub created_at: i64,
}

/// A chunk prepared for insertion, before the store assigns an id.
#[derive(Debug, Clone)]
pub struct NewChunk {
    /// Origin path of the source document.
    pub source: String,

    /// Position within the source, 0-based.
    pub chunk_index: usize,

    /// Chunk content. Must be non-empty.
    pub content: String,

    /// Metadata map attached to the chunk.
    pub metadata: BTreeMap<String, String>,

    /// Dense embedding of the content; length must equal the store
    /// dimension.
    pub embedding: Vec<f32>,
}

impl NewChunk {
    /// Creates a new chunk for insertion.
    #[must_use]
    pub fn new(
        source: impl Into<String>,
        chunk_index: usize,
        content: impl Into<String>,
        embedding: Vec<f32>,
    ) -> Self {
        Self {
            source: source.into(),
            chunk_index,
            content: content.into(),
            metadata: BTreeMap::new(),
            embedding,
        }
    }

    /// Attaches a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Returns the current Unix timestamp in seconds.
#[must_use]
#[allow(clippy::cast_possible_wrap)]
pub fn current_timestamp() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
