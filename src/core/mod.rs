//! Core domain types for fastsearch.
//!
//! Contains the chunk record types shared by the store, the retrieval
//! engine and the RPC layer.

mod chunk;

pub use chunk::{ChunkRecord, NewChunk, current_timestamp};
