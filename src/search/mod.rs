//! Hybrid retrieval engine.
//!
//! Executes the four query modes (BM25, vector, hybrid-RRF, reranked
//! hybrid) against a store, borrowing models from the manager, and runs
//! the indexing pipeline (chunk → embed → store).

mod rrf;

pub use rrf::{FusedHit, RrfConfig, reciprocal_rank_fusion};

use crate::chunking::{ChunkPiece, ChunkerConfig, DocumentFormat, chunk_text};
use crate::core::NewChunk;
use crate::error::{Result, StoreError};
use crate::model::ModelManager;
use crate::storage::SearchStore;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Default number of results returned by a search.
pub const DEFAULT_LIMIT: usize = 10;

/// Default number of candidates handed to the reranker.
pub const DEFAULT_RERANK_TOP_K: usize = 10;

/// Floor on the candidate count fetched per leg of a hybrid query.
const MIN_HYBRID_FETCH: usize = 20;

/// Query mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    /// Lexical BM25 only.
    Bm25,
    /// Dense-vector similarity only.
    Vector,
    /// BM25 + vector fused by RRF.
    #[default]
    Hybrid,
}

impl SearchMode {
    /// Parses a mode name.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "bm25" | "fts" => Some(Self::Bm25),
            "vector" | "semantic" => Some(Self::Vector),
            "hybrid" => Some(Self::Hybrid),
            _ => None,
        }
    }
}

/// One search result row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    /// Chunk id.
    pub id: i64,
    /// Origin path of the chunk's source.
    pub source: String,
    /// Position within the source.
    pub chunk_index: usize,
    /// Chunk content.
    pub content: String,
    /// Chunk metadata (e.g. `section`).
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// 1-based rank in the final result order.
    pub rank: usize,
    /// 1-based BM25 rank, when the lexical leg saw this chunk.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bm25_rank: Option<usize>,
    /// 1-based vector rank, when the dense leg saw this chunk.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vec_rank: Option<usize>,
    /// Fused RRF score for hybrid modes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rrf_score: Option<f64>,
    /// Cross-encoder score when reranking ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rerank_score: Option<f32>,
}

/// Summary of one indexed document.
#[derive(Debug, Clone, Serialize)]
pub struct IndexSummary {
    /// The source path that was indexed.
    pub source: String,
    /// Number of chunks written.
    pub chunks: usize,
    /// True when an already-indexed source was skipped
    /// (`reindex = false`).
    pub skipped: bool,
}

/// The retrieval engine. Borrows the model manager and caches open
/// store handles by canonical path.
pub struct SearchEngine {
    manager: Arc<ModelManager>,
    stores: Mutex<HashMap<PathBuf, Arc<SearchStore>>>,
}

impl SearchEngine {
    /// Creates an engine over a model manager.
    #[must_use]
    pub fn new(manager: Arc<ModelManager>) -> Self {
        Self {
            manager,
            stores: Mutex::new(HashMap::new()),
        }
    }

    /// The engine's model manager.
    #[must_use]
    pub const fn manager(&self) -> &Arc<ModelManager> {
        &self.manager
    }

    /// Opens (or returns the cached handle of) an existing store.
    ///
    /// # Errors
    ///
    /// `StoreUnavailable` when the file is missing or unreadable.
    pub fn open_store<P: AsRef<Path>>(&self, path: P) -> Result<Arc<SearchStore>> {
        self.store_handle(path.as_ref(), None)
    }

    /// Opens a store, creating it with the given dimension when absent.
    ///
    /// # Errors
    ///
    /// `DimensionMismatch` when an existing store disagrees.
    pub fn open_or_create_store<P: AsRef<Path>>(
        &self,
        path: P,
        dimension: usize,
    ) -> Result<Arc<SearchStore>> {
        self.store_handle(path.as_ref(), Some(dimension))
    }

    fn store_handle(&self, path: &Path, create_dimension: Option<usize>) -> Result<Arc<SearchStore>> {
        let key = path
            .canonicalize()
            .unwrap_or_else(|_| path.to_path_buf());

        let mut stores = self
            .stores
            .lock()
            .map_err(|e| StoreError::Database(format!("store cache poisoned: {e}")))?;

        if let Some(store) = stores.get(&key) {
            return Ok(Arc::clone(store));
        }

        let store = match create_dimension {
            Some(dimension) => SearchStore::open_or_create(path, dimension)?,
            None => SearchStore::open(path)?,
        };
        let store = Arc::new(store);
        stores.insert(key, Arc::clone(&store));
        Ok(store)
    }

    // ==================== Query Modes ====================

    /// Lexical BM25 search.
    ///
    /// # Errors
    ///
    /// `EmptyQuery` when the query trims to nothing.
    pub fn bm25(&self, store: &SearchStore, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let query = validate_query(query)?;
        validate_limit(limit)?;

        let ranked = store.search_bm25(query, limit)?;
        let ids: Vec<i64> = ranked.iter().map(|(id, _)| *id).collect();
        let records = self.records_by_id(store, &ids)?;

        Ok(ranked
            .into_iter()
            .filter_map(|(id, bm25_rank)| {
                records.get(&id).map(|record| (id, bm25_rank, record))
            })
            .enumerate()
            .map(|(i, (_, bm25_rank, record))| {
                let mut hit = hit_from_record(record, i + 1);
                hit.bm25_rank = Some(bm25_rank);
                hit
            })
            .collect())
    }

    /// Dense-vector similarity search.
    ///
    /// # Errors
    ///
    /// `EmptyQuery`, `DimensionMismatch` when the embedder and store
    /// disagree, or any model acquisition failure.
    pub fn vector(&self, store: &SearchStore, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let query = validate_query(query)?;
        validate_limit(limit)?;

        let query_vec = self.embed_query(store, query)?;
        let ranked = store.search_vector(&query_vec, limit)?;
        let ids: Vec<i64> = ranked.iter().map(|(id, _)| *id).collect();
        let records = self.records_by_id(store, &ids)?;

        Ok(ids
            .iter()
            .filter_map(|id| records.get(id))
            .enumerate()
            .map(|(i, record)| {
                let mut hit = hit_from_record(record, i + 1);
                hit.vec_rank = Some(i + 1);
                hit
            })
            .collect())
    }

    /// Hybrid search: BM25 and vector legs fused by RRF.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`SearchEngine::vector`].
    pub fn hybrid(&self, store: &SearchStore, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let query = validate_query(query)?;
        validate_limit(limit)?;

        let fused = self.fused_candidates(store, query, limit)?;
        self.hits_from_fused(store, &fused, limit)
    }

    /// Hybrid search re-ordered by the cross-encoder.
    ///
    /// The candidate set is a hybrid search of `max(limit,
    /// rerank_top_k)` rows; the top `rerank_top_k` are scored and
    /// ordered by reranker score (ties by RRF score). Unscored
    /// candidates follow in fused order.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`SearchEngine::vector`], plus reranker
    /// acquisition failures.
    pub fn hybrid_reranked(
        &self,
        store: &SearchStore,
        query: &str,
        limit: usize,
        rerank_top_k: usize,
    ) -> Result<Vec<SearchHit>> {
        let query = validate_query(query)?;
        validate_limit(limit)?;
        if rerank_top_k == 0 {
            return Err(crate::Error::InvalidArgument(
                "rerank_top_k must be > 0".to_string(),
            ));
        }

        let candidate_limit = limit.max(rerank_top_k);
        let fused = self.fused_candidates(store, query, candidate_limit)?;
        let mut hits = self.hits_from_fused(store, &fused, candidate_limit)?;

        let top_k = rerank_top_k.min(hits.len());
        if top_k > 0 {
            let scores = {
                let reranker = self.manager.acquire_reranker()?;
                let documents: Vec<&str> =
                    hits[..top_k].iter().map(|h| h.content.as_str()).collect();
                reranker.score_pairs(query, &documents)?
            };
            for (hit, score) in hits[..top_k].iter_mut().zip(scores) {
                hit.rerank_score = Some(score);
            }

            // Reranked block first, by score; fused order for the rest.
            let tail = hits.split_off(top_k);
            hits.sort_by(|a, b| {
                b.rerank_score
                    .unwrap_or(f32::MIN)
                    .total_cmp(&a.rerank_score.unwrap_or(f32::MIN))
                    .then_with(|| {
                        b.rrf_score
                            .unwrap_or(f64::MIN)
                            .total_cmp(&a.rrf_score.unwrap_or(f64::MIN))
                    })
                    .then_with(|| a.id.cmp(&b.id))
            });
            hits.extend(tail);
        }

        hits.truncate(limit);
        for (i, hit) in hits.iter_mut().enumerate() {
            hit.rank = i + 1;
        }
        Ok(hits)
    }

    /// Embeds a batch of texts with the managed embedder.
    ///
    /// # Errors
    ///
    /// Model acquisition or inference failures.
    pub fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let embedder = self.manager.acquire_embedder()?;
        embedder.embed_batch(texts)
    }

    /// Scores `(query, document)` pairs with the managed reranker.
    ///
    /// # Errors
    ///
    /// Model acquisition or inference failures.
    pub fn rerank(&self, query: &str, documents: &[&str]) -> Result<Vec<f32>> {
        let query = validate_query(query)?;
        let reranker = self.manager.acquire_reranker()?;
        reranker.score_pairs(query, documents)
    }

    // ==================== Indexing ====================

    /// Runs the indexing pipeline for one document: chunk, embed, and
    /// replace the source's rows in a single transaction.
    ///
    /// With `reindex = false` an already-indexed source is skipped.
    ///
    /// # Errors
    ///
    /// Chunker, model and store failures propagate unchanged.
    pub fn index_document(
        &self,
        store: &SearchStore,
        source: &str,
        text: &str,
        format: DocumentFormat,
        reindex: bool,
        chunker: &ChunkerConfig,
    ) -> Result<IndexSummary> {
        if !reindex && store.source_exists(source)? {
            return Ok(IndexSummary {
                source: source.to_string(),
                chunks: 0,
                skipped: true,
            });
        }

        let pieces = chunk_text(text, format, chunker)?;
        let chunks = self.embed_pieces(store, source, &pieces)?;
        store.replace_source(source, &chunks)?;

        debug!(source, chunks = chunks.len(), "indexed document");
        Ok(IndexSummary {
            source: source.to_string(),
            chunks: chunks.len(),
            skipped: false,
        })
    }

    fn embed_pieces(
        &self,
        store: &SearchStore,
        source: &str,
        pieces: &[ChunkPiece],
    ) -> Result<Vec<NewChunk>> {
        if pieces.is_empty() {
            return Ok(Vec::new());
        }

        let embeddings = {
            let embedder = self.manager.acquire_embedder()?;
            if embedder.dimensions() != store.dimension() {
                return Err(StoreError::DimensionMismatch {
                    expected: store.dimension(),
                    actual: embedder.dimensions(),
                }
                .into());
            }
            let texts: Vec<&str> = pieces.iter().map(|p| p.text.as_str()).collect();
            embedder.embed_batch(&texts)?
        };

        Ok(pieces
            .iter()
            .zip(embeddings)
            .enumerate()
            .map(|(index, (piece, embedding))| {
                let mut chunk = NewChunk::new(source, index, piece.text.clone(), embedding);
                if let Some(section) = &piece.section {
                    chunk = chunk.with_metadata("section", section.clone());
                }
                chunk
            })
            .collect())
    }

    // ==================== Internals ====================

    fn embed_query(&self, store: &SearchStore, query: &str) -> Result<Vec<f32>> {
        let embedder = self.manager.acquire_embedder()?;
        if embedder.dimensions() != store.dimension() {
            return Err(StoreError::DimensionMismatch {
                expected: store.dimension(),
                actual: embedder.dimensions(),
            }
            .into());
        }
        embedder.embed(query)
    }

    /// Runs both hybrid legs and fuses them. Each leg fetches
    /// `max(limit × 4, 20)` candidates.
    fn fused_candidates(
        &self,
        store: &SearchStore,
        query: &str,
        limit: usize,
    ) -> Result<Vec<FusedHit>> {
        let fetch = (limit * 4).max(MIN_HYBRID_FETCH);

        let bm25_ids: Vec<i64> = store
            .search_bm25(query, fetch)?
            .into_iter()
            .map(|(id, _)| id)
            .collect();

        let query_vec = self.embed_query(store, query)?;
        let vec_ids: Vec<i64> = store
            .search_vector(&query_vec, fetch)?
            .into_iter()
            .map(|(id, _)| id)
            .collect();

        Ok(reciprocal_rank_fusion(
            &[(&bm25_ids, 1.0), (&vec_ids, 1.0)],
            &RrfConfig::default(),
        ))
    }

    fn hits_from_fused(
        &self,
        store: &SearchStore,
        fused: &[FusedHit],
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let ids: Vec<i64> = fused.iter().take(limit).map(|h| h.id).collect();
        let records = self.records_by_id(store, &ids)?;

        Ok(fused
            .iter()
            .take(limit)
            .filter_map(|candidate| records.get(&candidate.id).map(|r| (candidate, r)))
            .enumerate()
            .map(|(i, (candidate, record))| {
                let mut hit = hit_from_record(record, i + 1);
                hit.bm25_rank = candidate.ranks.first().copied().flatten();
                hit.vec_rank = candidate.ranks.get(1).copied().flatten();
                hit.rrf_score = Some(candidate.score);
                hit
            })
            .collect())
    }

    fn records_by_id(
        &self,
        store: &SearchStore,
        ids: &[i64],
    ) -> Result<HashMap<i64, crate::core::ChunkRecord>> {
        Ok(store
            .get_chunks_by_ids(ids)?
            .into_iter()
            .map(|record| (record.id, record))
            .collect())
    }
}

fn validate_query(query: &str) -> Result<&str> {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return Err(crate::Error::EmptyQuery);
    }
    Ok(trimmed)
}

fn validate_limit(limit: usize) -> Result<()> {
    if limit == 0 {
        return Err(crate::Error::InvalidArgument(
            "limit must be > 0".to_string(),
        ));
    }
    Ok(())
}

fn hit_from_record(record: &crate::core::ChunkRecord, rank: usize) -> SearchHit {
    SearchHit {
        id: record.id,
        source: record.source.clone(),
        chunk_index: record.chunk_index,
        content: record.content.clone(),
        metadata: record.metadata.clone(),
        rank,
        bm25_rank: None,
        vec_rank: None,
        rrf_score: None,
        rerank_score: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{FallbackEmbedder, FallbackReranker};
    use crate::model::{
        EvictionPolicy, KeepPolicy, ManagerConfig, ModelLoaders, SlotConfig,
    };
    use std::time::Duration;

    const DIMS: usize = 64;

    fn test_manager() -> Arc<ModelManager> {
        let slot = |policy| SlotConfig {
            model: "fallback".to_string(),
            policy,
            idle_timeout: Duration::from_secs(0),
            memory_estimate_mb: 1,
        };
        let loaders = ModelLoaders {
            embedder: Box::new(|_| Ok(Arc::new(FallbackEmbedder::new(DIMS)))),
            reranker: Box::new(|_| Ok(Arc::new(FallbackReranker::new()))),
        };
        Arc::new(ModelManager::new(
            ManagerConfig {
                embedder: slot(KeepPolicy::OnDemand),
                reranker: slot(KeepPolicy::OnDemand),
                max_ram_mb: 1000,
                eviction_policy: EvictionPolicy::Lru,
                acquire_timeout: Duration::from_secs(5),
            },
            loaders,
        ))
    }

    fn engine_with_corpus() -> (SearchEngine, Arc<SearchStore>) {
        let engine = SearchEngine::new(test_manager());
        let store = Arc::new(SearchStore::in_memory(DIMS).unwrap());

        let docs = [
            ("rust.md", "Rust is a systems programming language focused on safety."),
            ("search.md", "Hybrid search fuses BM25 with dense vector retrieval."),
            ("daemon.md", "The daemon keeps embedding models resident in memory."),
        ];
        for (source, text) in docs {
            engine
                .index_document(
                    &store,
                    source,
                    text,
                    DocumentFormat::Plain,
                    true,
                    &ChunkerConfig::default(),
                )
                .unwrap();
        }
        (engine, store)
    }

    #[test]
    fn test_bm25_mode() {
        let (engine, store) = engine_with_corpus();
        let hits = engine.bm25(&store, "systems programming", 5).unwrap();

        assert!(!hits.is_empty());
        assert_eq!(hits[0].source, "rust.md");
        assert_eq!(hits[0].rank, 1);
        assert_eq!(hits[0].bm25_rank, Some(1));
        assert!(hits[0].vec_rank.is_none());
        assert!(hits[0].rrf_score.is_none());
    }

    #[test]
    fn test_vector_mode() {
        let (engine, store) = engine_with_corpus();
        let hits = engine
            .vector(&store, "dense vector retrieval search", 3)
            .unwrap();

        assert!(!hits.is_empty());
        assert_eq!(hits[0].vec_rank, Some(1));
        assert!(hits[0].bm25_rank.is_none());
        // The fallback embedder clusters by lexical overlap.
        assert_eq!(hits[0].source, "search.md");
    }

    #[test]
    fn test_hybrid_mode() {
        let (engine, store) = engine_with_corpus();
        let hits = engine.hybrid(&store, "hybrid search retrieval", 3).unwrap();

        assert!(!hits.is_empty());
        assert_eq!(hits[0].source, "search.md");
        assert!(hits[0].rrf_score.is_some());
        // The winner appears in both legs here.
        assert!(hits[0].bm25_rank.is_some());
        assert!(hits[0].vec_rank.is_some());
        for (i, hit) in hits.iter().enumerate() {
            assert_eq!(hit.rank, i + 1);
        }
    }

    #[test]
    fn test_hybrid_reranked_mode() {
        let (engine, store) = engine_with_corpus();
        let hits = engine
            .hybrid_reranked(&store, "hybrid search", 3, 3)
            .unwrap();

        assert!(!hits.is_empty());
        assert!(hits[0].rerank_score.is_some());
        assert_eq!(hits[0].source, "search.md");

        // Rerank scores are non-increasing over the reranked block.
        for pair in hits.windows(2) {
            if let (Some(a), Some(b)) = (pair[0].rerank_score, pair[1].rerank_score) {
                assert!(a >= b);
            }
        }
    }

    #[test]
    fn test_empty_query_rejected() {
        let (engine, store) = engine_with_corpus();
        for query in ["", "   ", "\n\t"] {
            assert!(matches!(
                engine.hybrid(&store, query, 5),
                Err(crate::Error::EmptyQuery)
            ));
        }
    }

    #[test]
    fn test_zero_limit_rejected() {
        let (engine, store) = engine_with_corpus();
        assert!(matches!(
            engine.bm25(&store, "rust", 0),
            Err(crate::Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_special_characters_sanitized() {
        let (engine, store) = engine_with_corpus();
        engine
            .index_document(
                &store,
                "tools.md",
                "install node-llama-cpp from source",
                DocumentFormat::Plain,
                true,
                &ChunkerConfig::default(),
            )
            .unwrap();

        let hits = engine.bm25(&store, "node-llama-cpp", 5).unwrap();
        assert_eq!(hits[0].source, "tools.md");
    }

    #[test]
    fn test_index_document_reindex_semantics() {
        let (engine, store) = engine_with_corpus();

        // reindex = false skips an already-indexed source.
        let summary = engine
            .index_document(
                &store,
                "rust.md",
                "entirely new text",
                DocumentFormat::Plain,
                false,
                &ChunkerConfig::default(),
            )
            .unwrap();
        assert!(summary.skipped);
        assert!(!engine.bm25(&store, "safety", 5).unwrap().is_empty());

        // reindex = true replaces.
        let summary = engine
            .index_document(
                &store,
                "rust.md",
                "entirely new text",
                DocumentFormat::Plain,
                true,
                &ChunkerConfig::default(),
            )
            .unwrap();
        assert!(!summary.skipped);
        assert_eq!(summary.chunks, 1);
        assert!(engine.bm25(&store, "safety", 5).unwrap().is_empty());
    }

    #[test]
    fn test_index_markdown_sections_in_metadata() {
        let (engine, store) = engine_with_corpus();
        engine
            .index_document(
                &store,
                "guide.md",
                "# Install\n\nBuild from source.\n\n# Run\n\nStart the daemon.",
                DocumentFormat::Markdown,
                true,
                &ChunkerConfig::default(),
            )
            .unwrap();

        let hits = engine.bm25(&store, "daemon start", 5).unwrap();
        let guide_hit = hits.iter().find(|h| h.source == "guide.md").unwrap();
        assert_eq!(
            guide_hit.metadata.get("section").map(String::as_str),
            Some("Run")
        );
    }

    #[test]
    fn test_dimension_mismatch_between_store_and_embedder() {
        let engine = SearchEngine::new(test_manager());
        let store = SearchStore::in_memory(DIMS + 1).unwrap();

        let result = engine.vector(&store, "anything", 5);
        assert!(matches!(
            result,
            Err(crate::Error::Store(StoreError::DimensionMismatch { .. }))
        ));
    }

    #[test]
    fn test_embed_and_rerank_passthrough() {
        let (engine, _) = engine_with_corpus();

        let embeddings = engine.embed(&["one", "two"]).unwrap();
        assert_eq!(embeddings.len(), 2);
        assert_eq!(embeddings[0].len(), DIMS);

        let scores = engine
            .rerank("daemon", &["the daemon runs", "unrelated"])
            .unwrap();
        assert_eq!(scores.len(), 2);
        assert!(scores[0] > scores[1]);
    }

    #[test]
    fn test_store_cache_returns_same_handle() {
        let engine = SearchEngine::new(test_manager());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");

        let first = engine.open_or_create_store(&path, DIMS).unwrap();
        let second = engine.open_or_create_store(&path, DIMS).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_open_store_missing_is_unavailable() {
        let engine = SearchEngine::new(test_manager());
        let result = engine.open_store("/nonexistent/fastsearch.db");
        assert!(matches!(
            result,
            Err(crate::Error::Store(StoreError::Unavailable { .. }))
        ));
    }

    #[test]
    fn test_search_mode_parse() {
        assert_eq!(SearchMode::parse("bm25"), Some(SearchMode::Bm25));
        assert_eq!(SearchMode::parse("Hybrid"), Some(SearchMode::Hybrid));
        assert_eq!(SearchMode::parse("semantic"), Some(SearchMode::Vector));
        assert_eq!(SearchMode::parse("bogus"), None);
    }
}
