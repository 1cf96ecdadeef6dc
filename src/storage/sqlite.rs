//! `SQLite` store implementation.
//!
//! Provides the single-file store with transactional indexing and the
//! BM25 / vector search primitives. The connection sits behind a mutex:
//! the store has one writer at a time and the daemon shares one handle
//! across connections.

// SQLite stores all integers as i64. These casts are intentional and safe
// because we only store non-negative values that fit in usize.
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]

use crate::core::{ChunkRecord, NewChunk, current_timestamp};
use crate::error::{Result, StoreError};
use crate::storage::schema::{
    CHECK_SCHEMA_SQL, CURRENT_SCHEMA_VERSION, GET_META_SQL, META_DIMENSION, META_SCHEMA_VERSION,
    SCHEMA_SQL, SET_META_SQL, get_migrations_from,
};
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Characters the FTS5 query parser treats as operator syntax.
const FTS_SPECIALS: &[char] = &['"', '-', ':', '(', ')', '*'];

/// Default embedding dimension for newly created stores.
pub(crate) const DEFAULT_STORE_DIMENSION: usize = 768;

/// Chunk count per source, used in [`StoreStats`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceCount {
    /// Source path.
    pub source: String,
    /// Number of chunks indexed from it.
    pub chunks: usize,
}

/// Store-level statistics.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    /// Total chunk rows.
    pub chunk_count: usize,
    /// Distinct sources.
    pub source_count: usize,
    /// Store file size in bytes (0 for in-memory stores).
    pub bytes: u64,
    /// Up to five largest sources by chunk count.
    pub top_sources: Vec<SourceCount>,
}

/// Single-file document + FTS + vector store.
///
/// # Examples
///
/// ```no_run
/// use fastsearch::storage::SearchStore;
///
/// let store = SearchStore::open_or_create("index.db", 768).unwrap();
/// assert_eq!(store.dimension(), 768);
/// ```
pub struct SearchStore {
    /// `SQLite` connection. The mutex is the single-writer discipline.
    conn: Mutex<Connection>,
    /// Path to the store file (None for in-memory).
    path: Option<PathBuf>,
    /// Embedding dimension, fixed for the lifetime of the store.
    dimension: usize,
}

impl SearchStore {
    /// Opens an existing store, or creates one with the given dimension.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DimensionMismatch`] if the store was
    /// created with a different dimension, or
    /// [`StoreError::Unavailable`] if the file cannot be opened.
    pub fn open_or_create<P: AsRef<Path>>(path: P, dimension: usize) -> Result<Self> {
        Self::open_inner(path.as_ref(), Some(dimension), true)
    }

    /// Opens an existing store, reading its recorded dimension.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the file is missing or is
    /// not a fastsearch store.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_inner(path.as_ref(), None, false)
    }

    /// Creates an in-memory store. Useful for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be created.
    pub fn in_memory(dimension: usize) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(StoreError::from)?;
        conn.execute("PRAGMA foreign_keys = ON;", [])
            .map_err(StoreError::from)?;

        let store = Self {
            conn: Mutex::new(conn),
            path: None,
            dimension,
        };
        store.init(Some(dimension), true)?;
        Ok(store)
    }

    fn open_inner(path: &Path, dimension: Option<usize>, create: bool) -> Result<Self> {
        let unavailable = |reason: String| StoreError::Unavailable {
            path: path.to_string_lossy().to_string(),
            reason,
        };

        if !create && !path.exists() {
            return Err(unavailable("no such file".to_string()).into());
        }

        if create && let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| unavailable(e.to_string()))?;
        }

        let conn = Connection::open(path).map_err(|e| unavailable(e.to_string()))?;

        conn.execute("PRAGMA foreign_keys = ON;", [])
            .map_err(|e| unavailable(e.to_string()))?;

        // WAL mode for concurrent readers alongside the writer
        let _: String = conn
            .query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))
            .map_err(|e| unavailable(e.to_string()))?;

        let mut store = Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
            dimension: dimension.unwrap_or(DEFAULT_STORE_DIMENSION),
        };
        let recorded = store.init(dimension, create)?;
        store.dimension = recorded;
        Ok(store)
    }

    /// Initializes or verifies the schema; returns the store dimension.
    fn init(&self, requested: Option<usize>, create: bool) -> Result<usize> {
        let conn = self.lock()?;

        let is_init: i64 = conn
            .query_row(CHECK_SCHEMA_SQL, [], |row| row.get(0))
            .map_err(|e| self.unavailable(e.to_string()))?;

        if is_init == 0 {
            if !create {
                return Err(self.unavailable("not a fastsearch store".to_string()).into());
            }

            let dimension = requested.unwrap_or(DEFAULT_STORE_DIMENSION);
            conn.execute_batch(SCHEMA_SQL).map_err(StoreError::from)?;
            conn.execute(
                SET_META_SQL,
                params![META_SCHEMA_VERSION, CURRENT_SCHEMA_VERSION.to_string()],
            )
            .map_err(StoreError::from)?;
            conn.execute(SET_META_SQL, params![META_DIMENSION, dimension.to_string()])
                .map_err(StoreError::from)?;
            return Ok(dimension);
        }

        // Existing store: run pending migrations, then verify dimension.
        let version = Self::get_meta(&conn, META_SCHEMA_VERSION)?
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(0);
        if version < CURRENT_SCHEMA_VERSION {
            for migration in get_migrations_from(version) {
                conn.execute_batch(migration.sql)
                    .map_err(StoreError::from)?;
            }
            conn.execute(
                SET_META_SQL,
                params![META_SCHEMA_VERSION, CURRENT_SCHEMA_VERSION.to_string()],
            )
            .map_err(StoreError::from)?;
        }

        let recorded = Self::get_meta(&conn, META_DIMENSION)?
            .and_then(|v| v.parse::<usize>().ok())
            .ok_or_else(|| self.unavailable("missing dimension metadata".to_string()))?;

        if let Some(requested) = requested
            && requested != recorded
        {
            return Err(StoreError::DimensionMismatch {
                expected: recorded,
                actual: requested,
            }
            .into());
        }

        Ok(recorded)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Database(format!("store lock poisoned: {e}")).into())
    }

    fn unavailable(&self, reason: String) -> StoreError {
        StoreError::Unavailable {
            path: self
                .path
                .as_ref()
                .map_or_else(|| ":memory:".to_string(), |p| p.to_string_lossy().to_string()),
            reason,
        }
    }

    fn get_meta(conn: &Connection, key: &str) -> Result<Option<String>> {
        conn.query_row(GET_META_SQL, params![key], |row| row.get(0))
            .optional()
            .map_err(|e| StoreError::from(e).into())
    }

    /// Returns the embedding dimension recorded in the store.
    #[must_use]
    pub const fn dimension(&self) -> usize {
        self.dimension
    }

    /// Returns the store path (None for in-memory).
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    // ==================== Write Operations ====================

    /// Inserts one chunk; all three tables are written in one
    /// transaction.
    ///
    /// # Errors
    ///
    /// `DimensionMismatch` if the embedding length differs from the
    /// store dimension; `InvalidArgument` if the content is empty.
    pub fn insert(&self, chunk: &NewChunk) -> Result<i64> {
        let ids = self.insert_batch(std::slice::from_ref(chunk))?;
        ids.first().copied().ok_or_else(|| {
            StoreError::Database("insert produced no row id".to_string()).into()
        })
    }

    /// Inserts a batch of chunks in a single transaction; either all
    /// succeed or none do.
    ///
    /// # Errors
    ///
    /// Any invalid item aborts and rolls back the whole batch.
    pub fn insert_batch(&self, chunks: &[NewChunk]) -> Result<Vec<i64>> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(StoreError::from)?;
        let ids = Self::insert_all(&tx, chunks, self.dimension)?;
        tx.commit().map_err(StoreError::from)?;
        Ok(ids)
    }

    /// Replaces all chunks of a source in one transaction: the
    /// all-or-nothing (re)index primitive.
    ///
    /// On any failure the previous contents of the source remain
    /// untouched.
    ///
    /// # Errors
    ///
    /// Same validation as [`SearchStore::insert_batch`].
    pub fn replace_source(&self, source: &str, chunks: &[NewChunk]) -> Result<Vec<i64>> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(StoreError::from)?;
        tx.execute("DELETE FROM chunks WHERE source = ?", params![source])
            .map_err(StoreError::from)?;
        let ids = Self::insert_all(&tx, chunks, self.dimension)?;
        tx.commit().map_err(StoreError::from)?;
        Ok(ids)
    }

    /// Inserts chunks within an open transaction. Validation happens
    /// per item so a bad item aborts the transaction midway (the caller
    /// drops the transaction, rolling everything back).
    fn insert_all(tx: &Transaction<'_>, chunks: &[NewChunk], dimension: usize) -> Result<Vec<i64>> {
        let now = current_timestamp();
        let mut ids = Vec::with_capacity(chunks.len());

        let mut chunk_stmt = tx
            .prepare(
                r"
                INSERT INTO chunks (source, chunk_index, content, metadata, created_at)
                VALUES (?, ?, ?, ?, ?)
            ",
            )
            .map_err(StoreError::from)?;
        let mut vec_stmt = tx
            .prepare("INSERT INTO chunks_vec (id, embedding) VALUES (?, ?)")
            .map_err(StoreError::from)?;

        for chunk in chunks {
            if chunk.content.is_empty() {
                return Err(crate::Error::InvalidArgument(
                    "chunk content must not be empty".to_string(),
                ));
            }
            if chunk.embedding.len() != dimension {
                return Err(StoreError::DimensionMismatch {
                    expected: dimension,
                    actual: chunk.embedding.len(),
                }
                .into());
            }

            let metadata = serde_json::to_string(&chunk.metadata).map_err(StoreError::from)?;
            chunk_stmt
                .execute(params![
                    chunk.source,
                    chunk.chunk_index as i64,
                    chunk.content,
                    metadata,
                    now,
                ])
                .map_err(StoreError::from)?;

            let id = tx.last_insert_rowid();
            vec_stmt
                .execute(params![id, encode_embedding(&chunk.embedding)])
                .map_err(StoreError::from)?;
            ids.push(id);
        }

        Ok(ids)
    }

    /// Deletes all chunks of a source; accepts an exact path or a
    /// non-empty path suffix. Returns the number of chunks removed.
    ///
    /// Suffix matching is case-sensitive. A suffix matching more than
    /// one distinct source deletes nothing and reports the candidates.
    ///
    /// # Errors
    ///
    /// [`crate::Error::AmbiguousSource`] when the suffix is ambiguous.
    pub fn delete_source(&self, pattern: &str) -> Result<usize> {
        if pattern.is_empty() {
            return Err(crate::Error::InvalidArgument(
                "source pattern must not be empty".to_string(),
            ));
        }

        let conn = self.lock()?;

        let exact = conn
            .execute("DELETE FROM chunks WHERE source = ?", params![pattern])
            .map_err(StoreError::from)?;
        if exact > 0 {
            return Ok(exact);
        }

        let mut stmt = conn
            .prepare("SELECT DISTINCT source FROM chunks")
            .map_err(StoreError::from)?;
        let sources = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(StoreError::from)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::from)?;
        drop(stmt);

        let mut candidates: Vec<String> = sources
            .into_iter()
            .filter(|s| s.ends_with(pattern))
            .collect();
        candidates.sort();

        match candidates.len() {
            0 => Ok(0),
            1 => {
                let removed = conn
                    .execute("DELETE FROM chunks WHERE source = ?", params![candidates[0]])
                    .map_err(StoreError::from)?;
                Ok(removed)
            }
            _ => Err(crate::Error::AmbiguousSource {
                suffix: pattern.to_string(),
                candidates,
            }),
        }
    }

    // ==================== Search Operations ====================

    /// Performs FTS5 BM25 full-text search.
    ///
    /// The raw query is sanitized first (see [`sanitize_fts_query`]); an
    /// empty sanitized query yields zero results rather than an error.
    /// Returns `(id, rank)` pairs, best match first, ranks 1-based.
    ///
    /// # Errors
    ///
    /// Returns an error if the search fails.
    pub fn search_bm25(&self, query: &str, limit: usize) -> Result<Vec<(i64, usize)>> {
        let fts_query = sanitize_fts_query(query);
        if fts_query.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                r"
                SELECT rowid
                FROM chunks_fts
                WHERE chunks_fts MATCH ?
                ORDER BY bm25(chunks_fts), rowid
                LIMIT ?
            ",
            )
            .map_err(StoreError::from)?;

        let ids = stmt
            .query_map(params![fts_query, limit as i64], |row| {
                row.get::<_, i64>(0)
            })
            .map_err(StoreError::from)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::from)?;

        Ok(ids
            .into_iter()
            .enumerate()
            .map(|(i, id)| (id, i + 1))
            .collect())
    }

    /// Returns the top-`limit` nearest chunks by cosine distance
    /// (non-negative; lower is better). Ties break toward lower ids.
    ///
    /// # Errors
    ///
    /// `DimensionMismatch` if the query vector has the wrong length.
    pub fn search_vector(&self, query_vec: &[f32], limit: usize) -> Result<Vec<(i64, f32)>> {
        use rayon::prelude::*;

        if query_vec.len() != self.dimension {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimension,
                actual: query_vec.len(),
            }
            .into());
        }
        if limit == 0 {
            return Ok(Vec::new());
        }

        let rows = {
            let conn = self.lock()?;
            let mut stmt = conn
                .prepare("SELECT id, embedding FROM chunks_vec")
                .map_err(StoreError::from)?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?))
                })
                .map_err(StoreError::from)?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(StoreError::from)?;
            rows
        };

        // Brute-force scan; rayon keeps the cosine loop off a single core.
        let mut scored: Vec<(i64, f32)> = rows
            .par_iter()
            .map(|(id, bytes)| {
                let embedding = decode_embedding(bytes);
                (*id, crate::embedding::cosine_distance(query_vec, &embedding))
            })
            .collect();

        scored.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        scored.truncate(limit);
        Ok(scored)
    }

    // ==================== Read Operations ====================

    /// Fetches a chunk by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_chunk(&self, id: i64) -> Result<Option<ChunkRecord>> {
        let conn = self.lock()?;
        conn.query_row(
            r"
            SELECT id, source, chunk_index, content, metadata, created_at
            FROM chunks WHERE id = ?
        ",
            params![id],
            row_to_chunk,
        )
        .optional()
        .map_err(|e| StoreError::from(e).into())
    }

    /// Fetches chunks by id, preserving the order of `ids`. Missing ids
    /// are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if a query fails.
    pub fn get_chunks_by_ids(&self, ids: &[i64]) -> Result<Vec<ChunkRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                r"
                SELECT id, source, chunk_index, content, metadata, created_at
                FROM chunks WHERE id = ?
            ",
            )
            .map_err(StoreError::from)?;

        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            let record = stmt
                .query_row(params![id], row_to_chunk)
                .optional()
                .map_err(StoreError::from)?;
            if let Some(record) = record {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Whether any chunks exist for an exact source path.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn source_exists(&self, source: &str) -> Result<bool> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM chunks WHERE source = ?",
                params![source],
                |row| row.get(0),
            )
            .map_err(StoreError::from)?;
        Ok(count > 0)
    }

    /// Returns the embedding stored for a chunk.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_embedding(&self, id: i64) -> Result<Option<Vec<f32>>> {
        let conn = self.lock()?;
        let bytes: Option<Vec<u8>> = conn
            .query_row(
                "SELECT embedding FROM chunks_vec WHERE id = ?",
                params![id],
                |row| row.get(0),
            )
            .optional()
            .map_err(StoreError::from)?;
        Ok(bytes.as_deref().map(decode_embedding))
    }

    /// Store statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if a query fails.
    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.lock()?;

        let chunk_count: i64 = conn
            .query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))
            .map_err(StoreError::from)?;

        let source_count: i64 = conn
            .query_row("SELECT COUNT(DISTINCT source) FROM chunks", [], |row| {
                row.get(0)
            })
            .map_err(StoreError::from)?;

        let mut stmt = conn
            .prepare(
                r"
                SELECT source, COUNT(*) as n FROM chunks
                GROUP BY source ORDER BY n DESC, source LIMIT 5
            ",
            )
            .map_err(StoreError::from)?;
        let top_sources = stmt
            .query_map([], |row| {
                Ok(SourceCount {
                    source: row.get(0)?,
                    chunks: row.get::<_, i64>(1)? as usize,
                })
            })
            .map_err(StoreError::from)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::from)?;

        let bytes = self
            .path
            .as_ref()
            .and_then(|p| std::fs::metadata(p).ok().map(|m| m.len()))
            .unwrap_or(0);

        Ok(StoreStats {
            chunk_count: chunk_count as usize,
            source_count: source_count as usize,
            bytes,
            top_sources,
        })
    }
}

/// Rewrites a raw query so the FTS5 parser treats it as terms, not
/// operator syntax.
///
/// Queries without special characters pass through untouched. Otherwise
/// each whitespace token containing a special character is wrapped in
/// double-quotes (embedded quotes doubled), preserving phrase intent:
/// `node-llama-cpp` becomes `"node-llama-cpp"`. Tokens with no
/// alphanumeric characters tokenize to nothing and are dropped; if
/// nothing remains the result is an empty string, which callers treat
/// as "no results".
#[must_use]
pub fn sanitize_fts_query(raw: &str) -> String {
    let raw = raw.trim();
    if !raw.chars().any(|c| FTS_SPECIALS.contains(&c)) {
        return raw.to_string();
    }

    raw.split_whitespace()
        .filter(|token| token.chars().any(char::is_alphanumeric))
        .map(|token| {
            if token.chars().any(|c| FTS_SPECIALS.contains(&c)) {
                format!("\"{}\"", token.replace('"', "\"\""))
            } else {
                token.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Serializes an f32 array to little-endian bytes.
fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Deserializes little-endian bytes to an f32 array.
fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

fn row_to_chunk(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChunkRecord> {
    let metadata: Option<String> = row.get(4)?;
    let metadata: BTreeMap<String, String> = metadata
        .as_deref()
        .and_then(|m| serde_json::from_str(m).ok())
        .unwrap_or_default();

    Ok(ChunkRecord {
        id: row.get(0)?,
        source: row.get(1)?,
        chunk_index: row.get::<_, i64>(2)? as usize,
        content: row.get(3)?,
        metadata,
        created_at: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> SearchStore {
        SearchStore::in_memory(4).unwrap()
    }

    fn chunk(source: &str, index: usize, content: &str, embedding: [f32; 4]) -> NewChunk {
        NewChunk::new(source, index, content, embedding.to_vec())
    }

    #[test]
    fn test_insert_and_get() {
        let store = setup();
        let id = store
            .insert(&chunk("a.md", 0, "alpha beta gamma", [1.0, 0.0, 0.0, 0.0]))
            .unwrap();
        assert!(id > 0);

        let record = store.get_chunk(id).unwrap().unwrap();
        assert_eq!(record.source, "a.md");
        assert_eq!(record.chunk_index, 0);
        assert_eq!(record.content, "alpha beta gamma");
    }

    #[test]
    fn test_insert_empty_content_rejected() {
        let store = setup();
        let result = store.insert(&chunk("a.md", 0, "", [1.0, 0.0, 0.0, 0.0]));
        assert!(matches!(result, Err(crate::Error::InvalidArgument(_))));
    }

    #[test]
    fn test_insert_dimension_mismatch() {
        let store = setup();
        let result = store.insert(&NewChunk::new("a.md", 0, "text", vec![1.0, 0.0]));
        assert!(matches!(
            result,
            Err(crate::Error::Store(StoreError::DimensionMismatch {
                expected: 4,
                actual: 2
            }))
        ));
    }

    #[test]
    fn test_bm25_roundtrip() {
        let store = setup();
        let id = store
            .insert(&chunk("a.md", 0, "alpha beta gamma", [1.0, 0.0, 0.0, 0.0]))
            .unwrap();
        store
            .insert(&chunk("a.md", 1, "delta epsilon", [0.0, 1.0, 0.0, 0.0]))
            .unwrap();

        let hits = store.search_bm25("alpha", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0], (id, 1));
    }

    #[test]
    fn test_vector_roundtrip_distance_zero() {
        let store = setup();
        let id = store
            .insert(&chunk("a.md", 0, "alpha beta gamma", [1.0, 0.0, 0.0, 0.0]))
            .unwrap();
        store
            .insert(&chunk("a.md", 1, "other", [0.0, 1.0, 0.0, 0.0]))
            .unwrap();

        let hits = store.search_vector(&[1.0, 0.0, 0.0, 0.0], 1).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, id);
        assert!(hits[0].1.abs() < 1e-6);
    }

    #[test]
    fn test_vector_query_dimension_checked() {
        let store = setup();
        let result = store.search_vector(&[1.0, 0.0], 5);
        assert!(matches!(
            result,
            Err(crate::Error::Store(StoreError::DimensionMismatch { .. }))
        ));
    }

    #[test]
    fn test_batch_atomicity_on_midway_failure() {
        let store = setup();
        store
            .insert(&chunk("base.md", 0, "existing row", [0.5, 0.5, 0.0, 0.0]))
            .unwrap();
        let before = store.stats().unwrap().chunk_count;

        // Item 2 has a bad dimension: the whole batch must roll back.
        let batch = vec![
            chunk("b.md", 0, "first new", [1.0, 0.0, 0.0, 0.0]),
            chunk("b.md", 1, "second new", [0.0, 1.0, 0.0, 0.0]),
            NewChunk::new("b.md", 2, "broken", vec![1.0]),
        ];
        assert!(store.insert_batch(&batch).is_err());

        assert_eq!(store.stats().unwrap().chunk_count, before);
        assert!(store.search_bm25("first", 10).unwrap().is_empty());
        let hits = store.search_vector(&[1.0, 0.0, 0.0, 0.0], 10).unwrap();
        for (id, _) in hits {
            let record = store.get_chunk(id).unwrap().unwrap();
            assert_ne!(record.source, "b.md");
        }
    }

    #[test]
    fn test_replace_source_is_atomic_and_contiguous() {
        let store = setup();
        store
            .insert_batch(&[
                chunk("doc.md", 0, "old zero", [1.0, 0.0, 0.0, 0.0]),
                chunk("doc.md", 1, "old one", [0.0, 1.0, 0.0, 0.0]),
                chunk("doc.md", 2, "old two", [0.0, 0.0, 1.0, 0.0]),
            ])
            .unwrap();

        let ids = store
            .replace_source(
                "doc.md",
                &[
                    chunk("doc.md", 0, "new zero", [1.0, 0.0, 0.0, 0.0]),
                    chunk("doc.md", 1, "new one", [0.0, 1.0, 0.0, 0.0]),
                ],
            )
            .unwrap();
        assert_eq!(ids.len(), 2);

        let stats = store.stats().unwrap();
        assert_eq!(stats.chunk_count, 2);
        assert!(store.search_bm25("old", 10).unwrap().is_empty());

        // Failed replace leaves the previous contents unchanged.
        let result = store.replace_source(
            "doc.md",
            &[
                chunk("doc.md", 0, "newer zero", [1.0, 0.0, 0.0, 0.0]),
                NewChunk::new("doc.md", 1, "broken", vec![1.0]),
            ],
        );
        assert!(result.is_err());
        assert_eq!(store.stats().unwrap().chunk_count, 2);
        assert!(!store.search_bm25("new", 10).unwrap().is_empty());
    }

    #[test]
    fn test_ids_monotonic_never_reused() {
        let store = setup();
        let first = store
            .insert(&chunk("a.md", 0, "alpha", [1.0, 0.0, 0.0, 0.0]))
            .unwrap();
        store.delete_source("a.md").unwrap();
        let second = store
            .insert(&chunk("a.md", 0, "alpha again", [1.0, 0.0, 0.0, 0.0]))
            .unwrap();
        assert!(second > first);
    }

    #[test]
    fn test_delete_source_exact() {
        let store = setup();
        store
            .insert_batch(&[
                chunk("a.md", 0, "alpha", [1.0, 0.0, 0.0, 0.0]),
                chunk("a.md", 1, "beta", [0.0, 1.0, 0.0, 0.0]),
                chunk("b.md", 0, "gamma", [0.0, 0.0, 1.0, 0.0]),
            ])
            .unwrap();

        let removed = store.delete_source("a.md").unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.stats().unwrap().chunk_count, 1);
        assert!(store.search_bm25("alpha", 10).unwrap().is_empty());
    }

    #[test]
    fn test_delete_source_suffix_unique() {
        let store = setup();
        store
            .insert_batch(&[
                chunk("docs/guide.md", 0, "alpha", [1.0, 0.0, 0.0, 0.0]),
                chunk("docs/other.md", 0, "beta", [0.0, 1.0, 0.0, 0.0]),
            ])
            .unwrap();

        let removed = store.delete_source("guide.md").unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.stats().unwrap().chunk_count, 1);
    }

    #[test]
    fn test_delete_source_suffix_ambiguous() {
        let store = setup();
        store
            .insert_batch(&[
                chunk("a/notes.md", 0, "alpha", [1.0, 0.0, 0.0, 0.0]),
                chunk("b/notes.md", 0, "beta", [0.0, 1.0, 0.0, 0.0]),
            ])
            .unwrap();

        let result = store.delete_source("notes.md");
        match result {
            Err(crate::Error::AmbiguousSource { candidates, .. }) => {
                assert_eq!(candidates, vec!["a/notes.md", "b/notes.md"]);
            }
            other => panic!("expected AmbiguousSource, got {other:?}"),
        }
        // Nothing was deleted.
        assert_eq!(store.stats().unwrap().chunk_count, 2);
    }

    #[test]
    fn test_delete_source_no_match() {
        let store = setup();
        store
            .insert(&chunk("a.md", 0, "alpha", [1.0, 0.0, 0.0, 0.0]))
            .unwrap();
        assert_eq!(store.delete_source("zzz.md").unwrap(), 0);
    }

    #[test]
    fn test_delete_cascades_to_fts_and_vec() {
        let store = setup();
        store
            .insert(&chunk("a.md", 0, "cascade check", [1.0, 0.0, 0.0, 0.0]))
            .unwrap();
        store.delete_source("a.md").unwrap();

        assert!(store.search_bm25("cascade", 10).unwrap().is_empty());
        assert!(store.search_vector(&[1.0, 0.0, 0.0, 0.0], 10).unwrap().is_empty());
    }

    #[test]
    fn test_sanitize_passthrough() {
        assert_eq!(sanitize_fts_query("plain words here"), "plain words here");
    }

    #[test]
    fn test_sanitize_quotes_special_tokens() {
        assert_eq!(
            sanitize_fts_query("node-llama-cpp"),
            "\"node-llama-cpp\""
        );
        assert_eq!(
            sanitize_fts_query("find node-llama-cpp now"),
            "find \"node-llama-cpp\" now"
        );
    }

    #[test]
    fn test_sanitize_doubles_embedded_quotes() {
        assert_eq!(sanitize_fts_query("say \"hi\""), "say \"\"\"hi\"\"\"");
    }

    #[test]
    fn test_sanitize_drops_tokenless_terms() {
        assert_eq!(sanitize_fts_query("()"), "");
        assert_eq!(sanitize_fts_query("- : *"), "");
    }

    #[test]
    fn test_bm25_special_characters_do_not_error() {
        let store = setup();
        let id = store
            .insert(&chunk(
                "a.md",
                0,
                "install node-llama-cpp from source",
                [1.0, 0.0, 0.0, 0.0],
            ))
            .unwrap();

        let hits = store.search_bm25("node-llama-cpp", 10).unwrap();
        assert_eq!(hits.first().map(|(id, _)| *id), Some(id));

        // Pure operator noise is empty results, not a syntax error.
        assert!(store.search_bm25("(((", 10).unwrap().is_empty());
    }

    #[test]
    fn test_stats() {
        let store = setup();
        store
            .insert_batch(&[
                chunk("a.md", 0, "one", [1.0, 0.0, 0.0, 0.0]),
                chunk("a.md", 1, "two", [0.0, 1.0, 0.0, 0.0]),
                chunk("b.md", 0, "three", [0.0, 0.0, 1.0, 0.0]),
            ])
            .unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.chunk_count, 3);
        assert_eq!(stats.source_count, 2);
        assert_eq!(stats.top_sources[0].source, "a.md");
        assert_eq!(stats.top_sources[0].chunks, 2);
    }

    #[test]
    fn test_open_or_create_dimension_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");

        let store = SearchStore::open_or_create(&path, 4).unwrap();
        drop(store);

        // Reopen with matching dimension is fine.
        let store = SearchStore::open_or_create(&path, 4).unwrap();
        drop(store);

        // Reopen with a different dimension is refused.
        let result = SearchStore::open_or_create(&path, 8);
        assert!(matches!(
            result,
            Err(crate::Error::Store(StoreError::DimensionMismatch {
                expected: 4,
                actual: 8
            }))
        ));

        // Open without a requested dimension reads the recorded one.
        let store = SearchStore::open(&path).unwrap();
        assert_eq!(store.dimension(), 4);
    }

    #[test]
    fn test_open_missing_store_unavailable() {
        let result = SearchStore::open("/nonexistent/fastsearch/index.db");
        assert!(matches!(
            result,
            Err(crate::Error::Store(StoreError::Unavailable { .. }))
        ));
    }

    #[test]
    fn test_embedding_blob_roundtrip() {
        let original = vec![0.25f32, -1.5, 3.75, 0.0];
        let decoded = decode_embedding(&encode_embedding(&original));
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_get_chunks_by_ids_preserves_order() {
        let store = setup();
        let ids = store
            .insert_batch(&[
                chunk("a.md", 0, "one", [1.0, 0.0, 0.0, 0.0]),
                chunk("a.md", 1, "two", [0.0, 1.0, 0.0, 0.0]),
            ])
            .unwrap();

        let records = store.get_chunks_by_ids(&[ids[1], ids[0], 9999]).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].content, "two");
        assert_eq!(records[1].content, "one");
    }

    #[test]
    fn test_get_embedding() {
        let store = setup();
        let id = store
            .insert(&chunk("a.md", 0, "text", [1.0, 0.0, 0.0, 0.0]))
            .unwrap();
        assert_eq!(
            store.get_embedding(id).unwrap(),
            Some(vec![1.0, 0.0, 0.0, 0.0])
        );
        assert_eq!(store.get_embedding(9999).unwrap(), None);
    }
}
