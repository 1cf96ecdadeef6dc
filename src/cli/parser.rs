//! Command-line argument parsing.
//!
//! Defines the CLI structure using clap derive macros.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// fastsearch: local hybrid text search with a warm-model daemon.
///
/// Indexes text and Markdown into a single-file store and serves
/// BM25 + vector + RRF queries, either in-process or through the
/// daemon socket.
#[derive(Parser, Debug)]
#[command(name = "fastsearch")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the store file.
    #[arg(short, long, env = "FASTSEARCH_DB")]
    pub db_path: Option<PathBuf>,

    /// Path to the configuration file.
    #[arg(short, long, env = "FASTSEARCH_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, default_value = "text", global = true)]
    pub format: String,

    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Resolves the store path: flag/env first, then the crate default.
    #[must_use]
    pub fn resolved_db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(crate::config::default_db_path)
    }
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the daemon in the foreground.
    Daemon,

    /// Create an empty store.
    Init {
        /// Embedding dimension; defaults to the configured embedder's.
        #[arg(long)]
        dimension: Option<usize>,
    },

    /// Index files into the store.
    Index {
        /// Files to index.
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Force re-indexing of already-indexed sources.
        #[arg(long)]
        reindex: bool,

        /// Override format sniffing (plain, markdown).
        #[arg(long)]
        doc_format: Option<String>,

        /// Chunk target size in characters.
        #[arg(long, default_value = "2000")]
        chunk_size: usize,

        /// Overlap between chunks in characters.
        #[arg(long, default_value = "200")]
        overlap: usize,
    },

    /// Search the store (uses the daemon when it is running).
    Search {
        /// Query text.
        query: String,

        /// Maximum number of results.
        #[arg(short = 'n', long, default_value = "10")]
        limit: usize,

        /// Query mode (bm25, vector, hybrid).
        #[arg(short, long, default_value = "hybrid")]
        mode: String,

        /// Re-order hybrid results with the cross-encoder.
        #[arg(long)]
        rerank: bool,

        /// Candidates handed to the reranker.
        #[arg(long, default_value = "10")]
        rerank_top_k: usize,
    },

    /// Delete all chunks of a source (exact path or unique suffix).
    #[command(name = "delete", alias = "rm")]
    Delete {
        /// Source path or suffix.
        source: String,
    },

    /// Show daemon and store status.
    Status,

    /// Stop a running daemon.
    Stop,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_search() {
        let cli = Cli::try_parse_from([
            "fastsearch", "search", "alpha beta", "--mode", "bm25", "-n", "5",
        ])
        .unwrap();
        match cli.command {
            Commands::Search {
                query, limit, mode, ..
            } => {
                assert_eq!(query, "alpha beta");
                assert_eq!(limit, 5);
                assert_eq!(mode, "bm25");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_index_requires_files() {
        assert!(Cli::try_parse_from(["fastsearch", "index"]).is_err());
        assert!(Cli::try_parse_from(["fastsearch", "index", "a.md"]).is_ok());
    }

    #[test]
    fn test_parse_unknown_command_fails() {
        assert!(Cli::try_parse_from(["fastsearch", "frobnicate"]).is_err());
    }

    #[test]
    fn test_delete_alias() {
        let cli = Cli::try_parse_from(["fastsearch", "rm", "notes.md"]).unwrap();
        assert!(matches!(cli.command, Commands::Delete { .. }));
    }

    #[test]
    fn test_resolved_db_path_prefers_flag() {
        let cli =
            Cli::try_parse_from(["fastsearch", "--db-path", "/tmp/custom.db", "status"]).unwrap();
        assert_eq!(cli.resolved_db_path(), PathBuf::from("/tmp/custom.db"));
    }
}
