//! fastembed-backed embedder and cross-encoder reranker.
//!
//! Only available when the `fastembed-models` feature is enabled. Model
//! files are downloaded and cached by fastembed itself; each struct owns
//! its loaded model, and the model manager owns the struct.

use crate::Result;
use crate::embedding::{Embedder, Reranker, default_memory_estimate_mb};
use crate::error::ModelError;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Mutex;

/// Maps a model identifier to a fastembed embedding model and its
/// dimension.
fn embedding_model_from_name(name: &str) -> Option<(fastembed::EmbeddingModel, usize)> {
    match name.to_ascii_lowercase().as_str() {
        "all-minilm-l6-v2" => Some((fastembed::EmbeddingModel::AllMiniLML6V2, 384)),
        "bge-small-en-v1.5" => Some((fastembed::EmbeddingModel::BGESmallENV15, 384)),
        "bge-base-en-v1.5" => Some((fastembed::EmbeddingModel::BGEBaseENV15, 768)),
        "bge-large-en-v1.5" => Some((fastembed::EmbeddingModel::BGELargeENV15, 1024)),
        "nomic-embed-text-v1.5" => Some((fastembed::EmbeddingModel::NomicEmbedTextV15, 768)),
        _ => None,
    }
}

/// Maps a model identifier to a fastembed reranker model.
fn reranker_model_from_name(name: &str) -> Option<fastembed::RerankerModel> {
    match name.to_ascii_lowercase().as_str() {
        "bge-reranker-base" => Some(fastembed::RerankerModel::BGERerankerBase),
        "jina-reranker-v1-turbo-en" => Some(fastembed::RerankerModel::JINARerankerV1TurboEn),
        _ => None,
    }
}

/// Renders a panic payload from the ONNX runtime into a message.
fn panic_message(panic_info: &Box<dyn std::any::Any + Send>) -> String {
    panic_info
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic_info.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// fastembed text embedder.
///
/// The model is loaded eagerly in [`FastEmbedEmbedder::load`]; lifecycle
/// (lazy loading, eviction) is the model manager's concern.
pub struct FastEmbedEmbedder {
    /// Loaded model; fastembed requires `&mut` for inference.
    model: Mutex<fastembed::TextEmbedding>,
    /// Model identifier for diagnostics.
    model_name: String,
    /// Embedding dimension.
    dimensions: usize,
    /// Static memory estimate.
    memory_mb: u64,
}

impl FastEmbedEmbedder {
    /// Loads the named embedding model.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown model names or if model
    /// initialization fails.
    pub fn load(model_name: &str) -> Result<Self> {
        let (model, dimensions) = embedding_model_from_name(model_name).ok_or_else(|| {
            crate::Error::InvalidArgument(format!("unknown embedding model: {model_name}"))
        })?;

        let options = fastembed::InitOptions::new(model).with_show_download_progress(false);

        let loaded = fastembed::TextEmbedding::try_new(options).map_err(|e| {
            ModelError::LoadFailed {
                slot: "embedder".to_string(),
                reason: e.to_string(),
            }
        })?;

        Ok(Self {
            model: Mutex::new(loaded),
            model_name: model_name.to_string(),
            dimensions,
            memory_mb: default_memory_estimate_mb(model_name),
        })
    }

    /// Returns the model name.
    #[must_use]
    pub fn model_name(&self) -> &str {
        &self.model_name
    }
}

impl Embedder for FastEmbedEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut batch = self.embed_batch(&[text])?;
        batch.pop().ok_or_else(|| {
            ModelError::LoadFailed {
                slot: "embedder".to_string(),
                reason: "no embedding returned from model".to_string(),
            }
            .into()
        })
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        if texts.iter().any(|t| t.is_empty()) {
            return Err(crate::Error::InvalidArgument(
                "cannot embed empty text".to_string(),
            ));
        }

        let mut model = self.model.lock().map_err(|e| ModelError::LoadFailed {
            slot: "embedder".to_string(),
            reason: format!("failed to lock embedding model: {e}"),
        })?;

        // ONNX runtime can panic on malformed inputs or internal errors;
        // degrade to an error instead of taking down the daemon.
        let result = catch_unwind(AssertUnwindSafe(|| model.embed(texts.to_vec(), None)));

        result
            .map_err(|panic_info| {
                crate::Error::Model(ModelError::LoadFailed {
                    slot: "embedder".to_string(),
                    reason: format!("ONNX runtime panic: {}", panic_message(&panic_info)),
                })
            })?
            .map_err(|e| {
                crate::Error::Model(ModelError::LoadFailed {
                    slot: "embedder".to_string(),
                    reason: format!("embedding failed: {e}"),
                })
            })
    }

    fn estimated_memory_mb(&self) -> u64 {
        self.memory_mb
    }
}

/// fastembed cross-encoder reranker.
pub struct FastEmbedReranker {
    /// Loaded model; fastembed requires `&mut` for inference.
    model: Mutex<fastembed::TextRerank>,
    /// Model identifier for diagnostics.
    model_name: String,
    /// Static memory estimate.
    memory_mb: u64,
}

impl FastEmbedReranker {
    /// Loads the named reranker model.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown model names or if model
    /// initialization fails.
    pub fn load(model_name: &str) -> Result<Self> {
        let model = reranker_model_from_name(model_name).ok_or_else(|| {
            crate::Error::InvalidArgument(format!("unknown reranker model: {model_name}"))
        })?;

        let options = fastembed::RerankInitOptions::new(model).with_show_download_progress(false);

        let loaded = fastembed::TextRerank::try_new(options).map_err(|e| {
            ModelError::LoadFailed {
                slot: "reranker".to_string(),
                reason: e.to_string(),
            }
        })?;

        Ok(Self {
            model: Mutex::new(loaded),
            model_name: model_name.to_string(),
            memory_mb: default_memory_estimate_mb(model_name),
        })
    }

    /// Returns the model name.
    #[must_use]
    pub fn model_name(&self) -> &str {
        &self.model_name
    }
}

impl Reranker for FastEmbedReranker {
    fn score_pairs(&self, query: &str, documents: &[&str]) -> Result<Vec<f32>> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let mut model = self.model.lock().map_err(|e| ModelError::LoadFailed {
            slot: "reranker".to_string(),
            reason: format!("failed to lock reranker model: {e}"),
        })?;

        let result = catch_unwind(AssertUnwindSafe(|| {
            model.rerank(query, documents.to_vec(), false, None)
        }));

        let ranked = result
            .map_err(|panic_info| {
                crate::Error::Model(ModelError::LoadFailed {
                    slot: "reranker".to_string(),
                    reason: format!("ONNX runtime panic: {}", panic_message(&panic_info)),
                })
            })?
            .map_err(|e| {
                crate::Error::Model(ModelError::LoadFailed {
                    slot: "reranker".to_string(),
                    reason: format!("reranking failed: {e}"),
                })
            })?;

        // fastembed returns results sorted by score; map back to input order.
        let mut scores = vec![0.0f32; documents.len()];
        for item in ranked {
            if let Some(slot) = scores.get_mut(item.index) {
                *slot = item.score;
            }
        }

        Ok(scores)
    }

    fn estimated_memory_mb(&self) -> u64 {
        self.memory_mb
    }
}
