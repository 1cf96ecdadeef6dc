//! Database schema definitions.
//!
//! Contains SQL schema and migration scaffolding for the single-file
//! `SQLite` store. Three logical tables stay in lockstep: `chunks`
//! (primary), `chunks_fts` (FTS5 projection, synced by triggers) and
//! `chunks_vec` (embedding blobs, synced by cascade).

/// Current schema version.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Metadata key recording the embedding dimension.
pub const META_DIMENSION: &str = "dimension";

/// Metadata key recording the schema version.
pub const META_SCHEMA_VERSION: &str = "schema_version";

/// SQL schema for initial store setup.
pub const SCHEMA_SQL: &str = r"
-- Store-level metadata (embedding dimension, schema version)
CREATE TABLE IF NOT EXISTS store_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- Chunks (the unit of retrieval)
CREATE TABLE IF NOT EXISTS chunks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source TEXT NOT NULL,
    chunk_index INTEGER NOT NULL,
    content TEXT NOT NULL,
    metadata TEXT,  -- JSON key/value map
    created_at INTEGER NOT NULL
);

-- Index for per-source lookup and deletion
CREATE INDEX IF NOT EXISTS idx_chunks_source ON chunks(source, chunk_index);

-- FTS5 virtual table for BM25 full-text search
CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts USING fts5(
    content,
    content='chunks',
    content_rowid='id',
    tokenize='porter unicode61'
);

-- Embedding vectors, one per chunk, fixed dimension per store
CREATE TABLE IF NOT EXISTS chunks_vec (
    id INTEGER PRIMARY KEY,
    embedding BLOB NOT NULL,  -- f32 array serialized as little-endian bytes
    FOREIGN KEY (id) REFERENCES chunks(id) ON DELETE CASCADE
);

-- Triggers to keep the FTS5 index in sync with the chunks table
CREATE TRIGGER IF NOT EXISTS chunks_ai AFTER INSERT ON chunks BEGIN
    INSERT INTO chunks_fts(rowid, content) VALUES (new.id, new.content);
END;

CREATE TRIGGER IF NOT EXISTS chunks_ad AFTER DELETE ON chunks BEGIN
    INSERT INTO chunks_fts(chunks_fts, rowid, content) VALUES('delete', old.id, old.content);
END;

CREATE TRIGGER IF NOT EXISTS chunks_au AFTER UPDATE ON chunks BEGIN
    INSERT INTO chunks_fts(chunks_fts, rowid, content) VALUES('delete', old.id, old.content);
    INSERT INTO chunks_fts(chunks_fts, rowid, content) VALUES (new.id, new.content);
END;
";

/// SQL to check if the schema is initialized.
pub const CHECK_SCHEMA_SQL: &str = r"
SELECT COUNT(*) FROM sqlite_master
WHERE type='table' AND name='store_meta';
";

/// SQL to get a metadata value.
pub const GET_META_SQL: &str = r"
SELECT value FROM store_meta WHERE key = ?;
";

/// SQL to set a metadata value.
pub const SET_META_SQL: &str = r"
INSERT OR REPLACE INTO store_meta (key, value) VALUES (?, ?);
";

/// Migrations from older schema versions.
pub struct Migration {
    /// Version this migration upgrades from.
    pub from_version: u32,
    /// Version this migration upgrades to.
    pub to_version: u32,
    /// SQL statements to execute.
    pub sql: &'static str,
}

/// Available migrations (none yet; v1 is the first shipped schema).
pub const MIGRATIONS: &[Migration] = &[];

/// Gets migrations needed to upgrade from a version.
#[must_use]
pub fn get_migrations_from(current_version: u32) -> Vec<&'static Migration> {
    MIGRATIONS
        .iter()
        .filter(|m| m.from_version >= current_version && m.to_version <= CURRENT_SCHEMA_VERSION)
        .collect()
}
