//! Hash-based fallback embedder and lexical fallback reranker.
//!
//! Used when the `fastembed-models` feature is disabled, and by tests
//! that must not download models. Deterministic but not semantic:
//! embeddings cluster by lexical overlap, rerank scores by token
//! coverage.

use crate::Result;
use crate::embedding::{Embedder, Reranker};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Hash-based fallback embedder.
///
/// Generates deterministic pseudo-embeddings using a combination of:
/// - Word-level hashing for vocabulary capture
/// - Character trigram hashing for fuzzy matching
/// - Normalization to unit length for cosine similarity
///
/// # Examples
///
/// ```
/// use fastsearch::embedding::{Embedder, FallbackEmbedder};
///
/// let embedder = FallbackEmbedder::new(128);
/// let emb1 = embedder.embed("hello world").unwrap();
/// let emb2 = embedder.embed("hello world").unwrap();
/// assert_eq!(emb1, emb2); // Deterministic
/// ```
pub struct FallbackEmbedder {
    dimensions: usize,
}

impl FallbackEmbedder {
    /// Creates a new fallback embedder with the specified dimension.
    #[must_use]
    pub const fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    /// Hashes a string to a u64 value.
    fn hash_string(s: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        s.hash(&mut hasher);
        hasher.finish()
    }

    /// Generates a pseudo-embedding from text.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    fn generate_embedding(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.dimensions];

        let normalized: String = text
            .chars()
            .map(|c| {
                if c.is_alphanumeric() || c.is_whitespace() {
                    c.to_ascii_lowercase()
                } else {
                    ' '
                }
            })
            .collect();

        // Word-level hashing (primary signal)
        for word in normalized.split_whitespace() {
            let hash = Self::hash_string(word);
            let idx = (hash as usize) % self.dimensions;
            let sign = if (hash >> 32) & 1 == 0 { 1.0 } else { -1.0 };
            let magnitude = 1.0 + ((hash >> 16) & 0xFF) as f32 / 255.0;
            embedding[idx] += sign * magnitude;
        }

        // Character trigram hashing (secondary signal for fuzzy matching)
        let chars: Vec<char> = normalized.chars().collect();
        if chars.len() >= 3 {
            for window in chars.windows(3) {
                let trigram: String = window.iter().collect();
                let hash = Self::hash_string(&trigram);
                let idx = (hash as usize) % self.dimensions;
                let sign = if (hash >> 32) & 1 == 0 { 0.5 } else { -0.5 };
                embedding[idx] += sign;
            }
        }

        // Normalize to unit length for cosine similarity
        let magnitude: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for val in &mut embedding {
                *val /= magnitude;
            }
        }

        embedding
    }
}

impl Embedder for FallbackEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.generate_embedding(text))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        use rayon::prelude::*;

        Ok(texts
            .par_iter()
            .map(|text| self.generate_embedding(text))
            .collect())
    }

    fn estimated_memory_mb(&self) -> u64 {
        // No model weights; only the hashing tables on the stack.
        1
    }
}

/// Lexical-overlap fallback reranker.
///
/// Scores a `(query, document)` pair from token coverage, exact phrase
/// presence and a token-overlap ratio. Scores land in `[0, 1]`.
pub struct FallbackReranker;

impl FallbackReranker {
    /// Creates a new fallback reranker.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    #[allow(clippy::cast_precision_loss)]
    fn score(query: &str, document: &str) -> f32 {
        let query_lower = query.to_lowercase();
        let doc_lower = document.to_lowercase();
        let query_tokens: Vec<&str> = query_lower.split_whitespace().collect();

        if query_tokens.is_empty() || doc_lower.is_empty() {
            return 0.0;
        }

        let mut score = 0.0f32;

        // Exact phrase presence is the strongest signal.
        if doc_lower.contains(&query_lower) {
            score += 0.4;
        }

        // Fraction of query tokens present in the document.
        let present = query_tokens
            .iter()
            .filter(|t| doc_lower.contains(**t))
            .count();
        score += 0.5 * (present as f32 / query_tokens.len() as f32);

        // Mild length normalization: long documents that merely mention
        // a token rank below short focused ones.
        let doc_tokens = doc_lower.split_whitespace().count().max(1);
        score += 0.1 * (present as f32 / doc_tokens as f32).min(1.0);

        score.min(1.0)
    }
}

impl Default for FallbackReranker {
    fn default() -> Self {
        Self::new()
    }
}

impl Reranker for FallbackReranker {
    fn score_pairs(&self, query: &str, documents: &[&str]) -> Result<Vec<f32>> {
        Ok(documents
            .iter()
            .map(|doc| Self::score(query, doc))
            .collect())
    }

    fn estimated_memory_mb(&self) -> u64 {
        1
    }
}
