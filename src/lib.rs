//! # fastsearch
//!
//! Local hybrid text search for CPU-constrained hosts.
//!
//! Documents are chunked, embedded and written into a single-file
//! store; queries combine BM25 over an FTS index with dense-vector
//! similarity, fused by Reciprocal Rank Fusion and optionally
//! re-ordered by a cross-encoder. A long-lived daemon keeps the models
//! resident so warm queries complete in single-digit milliseconds;
//! clients reach it over length-framed JSON-RPC on a Unix socket, and
//! fall back to running everything in-process when no daemon is up.
//!
//! ## Subsystems
//!
//! - [`chunking`]: paragraph/Markdown chunker with overlap carry
//! - [`embedding`]: embedder/reranker adapters (fastembed or fallback)
//! - [`storage`]: the single-file chunk + FTS + vector store
//! - [`search`]: the retrieval engine and RRF fusion
//! - [`model`]: slot lifecycle, eviction and single-flight loads
//! - [`rpc`]: the daemon, the wire protocol and the client library

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
// Note: unsafe is needed for memory-mapped I/O (memmap2)
#![warn(unsafe_code)]

pub mod chunking;
pub mod cli;
pub mod config;
pub mod core;
pub mod embedding;
pub mod error;
pub mod io;
pub mod model;
pub mod rpc;
pub mod search;
pub mod storage;

// Re-export commonly used types at crate root
pub use error::{Error, Result};

// Re-export core domain types
pub use core::{ChunkRecord, NewChunk};

// Re-export configuration
pub use config::Config;

// Re-export chunking types
pub use chunking::{ChunkPiece, ChunkerConfig, DocumentFormat, chunk_text};

// Re-export embedding types
#[cfg(feature = "fastembed-models")]
pub use embedding::{FastEmbedEmbedder, FastEmbedReranker};
pub use embedding::{
    DEFAULT_DIMENSIONS, Embedder, FallbackEmbedder, FallbackReranker, Reranker, cosine_similarity,
    create_embedder, create_reranker,
};

// Re-export storage types
pub use storage::{DEFAULT_DB_PATH, SearchStore, StoreStats};

// Re-export search types
pub use search::{
    RrfConfig, SearchEngine, SearchHit, SearchMode, reciprocal_rank_fusion,
};

// Re-export model manager types
pub use model::{KeepPolicy, ModelManager, SlotKind, SlotState};

// Re-export transport types
pub use rpc::{Daemon, DaemonClient, SearchClient};
