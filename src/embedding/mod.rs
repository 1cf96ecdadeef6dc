//! Embedding and reranking adapters.
//!
//! Defines the capability traits the model manager is parameterized
//! over, plus concrete producers: fastembed-backed models (when the
//! `fastembed-models` feature is enabled) and deterministic hash-based
//! fallbacks for environments without model downloads.
//!
//! # Feature Flags
//!
//! - `fastembed-models`: ONNX embeddings + cross-encoder reranking via
//!   fastembed.
//! - Without the feature: hash-based embeddings and lexical-overlap
//!   rerank scores (deterministic but not semantic).

mod fallback;

#[cfg(feature = "fastembed-models")]
mod fastembed_impl;

pub use fallback::{FallbackEmbedder, FallbackReranker};

#[cfg(feature = "fastembed-models")]
pub use fastembed_impl::{FastEmbedEmbedder, FastEmbedReranker};

use crate::Result;
use std::sync::Arc;

/// Default embedding dimension when no model dictates otherwise.
pub const DEFAULT_DIMENSIONS: usize = 768;

/// Default embedder model identifier.
pub const DEFAULT_EMBEDDER_MODEL: &str = "bge-base-en-v1.5";

/// Default reranker model identifier.
pub const DEFAULT_RERANKER_MODEL: &str = "bge-reranker-base";

/// Trait for dense-vector producers.
///
/// Implementations must be thread-safe (`Send + Sync`); a single loaded
/// model is shared by all daemon connections.
pub trait Embedder: Send + Sync {
    /// Returns the embedding dimension.
    fn dimensions(&self) -> usize;

    /// Generates an embedding for the given text.
    ///
    /// # Errors
    ///
    /// Returns an error if embedding generation fails.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generates embeddings for multiple texts.
    ///
    /// The default implementation calls `embed` sequentially;
    /// implementations override this for batch optimization.
    ///
    /// # Errors
    ///
    /// Returns an error if embedding generation fails for any text.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    /// Static memory footprint estimate used for budget accounting.
    fn estimated_memory_mb(&self) -> u64;
}

/// Trait for cross-encoder relevance scorers.
pub trait Reranker: Send + Sync {
    /// Scores each `(query, document)` pair; one score per document,
    /// higher is more relevant.
    ///
    /// # Errors
    ///
    /// Returns an error if scoring fails.
    fn score_pairs(&self, query: &str, documents: &[&str]) -> Result<Vec<f32>>;

    /// Static memory footprint estimate used for budget accounting.
    fn estimated_memory_mb(&self) -> u64;
}

/// Returns the embedding dimension for a known model name.
///
/// Unknown names fall back to [`DEFAULT_DIMENSIONS`].
#[must_use]
pub fn embedder_dimensions(model_name: &str) -> usize {
    match model_name.to_ascii_lowercase().as_str() {
        "all-minilm-l6-v2" | "bge-small-en-v1.5" => 384,
        "bge-large-en-v1.5" => 1024,
        _ => DEFAULT_DIMENSIONS,
    }
}

/// Static per-model memory estimate in MB.
///
/// The contract is a static estimate, never resident-set sampling; a
/// config-level override takes precedence over this table.
#[must_use]
pub fn default_memory_estimate_mb(model_name: &str) -> u64 {
    match model_name.to_ascii_lowercase().as_str() {
        "all-minilm-l6-v2" => 90,
        "bge-small-en-v1.5" => 130,
        "bge-base-en-v1.5" => 440,
        "bge-large-en-v1.5" => 1300,
        "nomic-embed-text-v1.5" => 550,
        "bge-reranker-base" => 1100,
        "jina-reranker-v1-turbo-en" => 150,
        _ => 400,
    }
}

/// Whether a model name selects the hash-based fallback explicitly.
///
/// Useful on hosts that must not download model files; the store then
/// carries deterministic lexical pseudo-embeddings.
#[must_use]
pub fn is_fallback_model(model_name: &str) -> bool {
    matches!(
        model_name.to_ascii_lowercase().as_str(),
        "hash-fallback" | "fallback"
    )
}

/// Creates an embedder for the given model name.
///
/// # Errors
///
/// Returns an error if model initialization fails.
#[cfg(feature = "fastembed-models")]
pub fn create_embedder(model_name: &str) -> Result<Arc<dyn Embedder>> {
    if is_fallback_model(model_name) {
        return Ok(Arc::new(FallbackEmbedder::new(embedder_dimensions(
            model_name,
        ))));
    }
    Ok(Arc::new(FastEmbedEmbedder::load(model_name)?))
}

/// Creates an embedder for the given model name.
///
/// Without the `fastembed-models` feature this is the hash-based
/// fallback at the model's nominal dimension.
///
/// # Errors
///
/// Returns an error if model initialization fails (never fails for the
/// fallback).
#[cfg(not(feature = "fastembed-models"))]
pub fn create_embedder(model_name: &str) -> Result<Arc<dyn Embedder>> {
    Ok(Arc::new(FallbackEmbedder::new(embedder_dimensions(
        model_name,
    ))))
}

/// Creates a reranker for the given model name.
///
/// # Errors
///
/// Returns an error if model initialization fails.
#[cfg(feature = "fastembed-models")]
pub fn create_reranker(model_name: &str) -> Result<Arc<dyn Reranker>> {
    if is_fallback_model(model_name) {
        return Ok(Arc::new(FallbackReranker::new()));
    }
    Ok(Arc::new(FastEmbedReranker::load(model_name)?))
}

/// Creates a reranker for the given model name.
///
/// Without the `fastembed-models` feature this is the lexical-overlap
/// fallback.
///
/// # Errors
///
/// Returns an error if model initialization fails (never fails for the
/// fallback).
#[cfg(not(feature = "fastembed-models"))]
pub fn create_reranker(_model_name: &str) -> Result<Arc<dyn Reranker>> {
    Ok(Arc::new(FallbackReranker::new()))
}

/// Computes cosine similarity between two embedding vectors.
///
/// Returns a value between -1.0 (opposite) and 1.0 (identical), or 0.0
/// if the vectors differ in length or have zero magnitude.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot / (mag_a * mag_b)
}

/// Cosine distance: `max(0, 1 - cosine_similarity)`. Lower is closer.
#[must_use]
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    (1.0 - cosine_similarity(a, b)).max(0.0)
}
