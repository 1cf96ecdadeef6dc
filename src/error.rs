//! Error types for fastsearch operations.
//!
//! This module provides the error hierarchy using `thiserror` for all
//! subsystems: the store, the retrieval engine, the model manager and the
//! RPC transport. [`Error::kind`] maps errors onto the wire-level
//! `data.kind` taxonomy carried in JSON-RPC error objects.

use thiserror::Error;

/// Result type alias for fastsearch operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type.
#[derive(Error, Debug)]
pub enum Error {
    /// Query was empty after trimming.
    #[error("query is empty")]
    EmptyQuery,

    /// A parameter had the wrong shape or range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A suffix deletion matched more than one distinct source.
    #[error("ambiguous source suffix '{suffix}': matches {}", candidates.join(", "))]
    AmbiguousSource {
        /// The suffix that was requested.
        suffix: String,
        /// Distinct sources the suffix matched.
        candidates: Vec<String>,
    },

    /// The daemon (or a manager slot) could not take the request in time.
    #[error("daemon busy: {0}")]
    Busy(String),

    /// Store-related errors (database operations).
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Model slot lifecycle errors.
    #[error("model error: {0}")]
    Model(#[from] ModelError),

    /// Wire protocol errors.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Configuration errors.
    #[error("configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// I/O errors (file and socket operations).
    #[error("I/O error: {0}")]
    Io(String),
}

/// Store-specific errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Store file missing, unreadable or corrupt.
    #[error("store unavailable: {path}: {reason}")]
    Unavailable {
        /// Path of the store file.
        path: String,
        /// Reason it could not be opened.
        reason: String,
    },

    /// Embedding length differs from the store dimension.
    #[error("dimension mismatch: store expects {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension recorded in the store.
        expected: usize,
        /// Dimension that was offered.
        actual: usize,
    },

    /// Database connection or query error.
    #[error("database error: {0}")]
    Database(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Model manager errors.
#[derive(Error, Debug)]
pub enum ModelError {
    /// The requested slot has policy `disabled`.
    #[error("model slot '{slot}' is disabled")]
    Disabled {
        /// Slot name.
        slot: String,
    },

    /// The underlying model producer failed.
    #[error("model load failed for slot '{slot}': {reason}")]
    LoadFailed {
        /// Slot name.
        slot: String,
        /// Failure message, shared by all waiters of the attempt.
        reason: String,
    },

    /// Eviction could not free enough room for the load.
    #[error("memory budget exceeded: need {needed_mb} MB, budget {budget_mb} MB")]
    BudgetExceeded {
        /// Estimated footprint of the requested load plus residents.
        needed_mb: u64,
        /// Configured budget.
        budget_mb: u64,
    },

    /// No slot with that name exists.
    #[error("unknown model slot: {name}")]
    UnknownSlot {
        /// The offending name.
        name: String,
    },
}

/// Wire protocol errors.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Frame length exceeds the maximum.
    #[error("frame of {len} bytes exceeds maximum {max}")]
    FrameTooLarge {
        /// Declared frame length.
        len: usize,
        /// Maximum allowed length.
        max: usize,
    },

    /// The frame body was not valid JSON.
    #[error("malformed JSON body: {0}")]
    Json(String),

    /// The connection closed before a complete frame was read.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// The message was not a valid JSON-RPC 2.0 request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A server-side error surfaced by the client library.
    #[error("server error {code}: {message}")]
    Rpc {
        /// JSON-RPC error code.
        code: i64,
        /// Human-readable message.
        message: String,
        /// Error kind from the server taxonomy, if present.
        kind: Option<String>,
    },
}

impl Error {
    /// Maps the error onto the RPC `data.kind` taxonomy.
    ///
    /// Returns `None` for internal errors outside the taxonomy.
    #[must_use]
    pub fn kind(&self) -> Option<&'static str> {
        match self {
            Self::EmptyQuery => Some("EmptyQuery"),
            Self::InvalidArgument(_) => Some("InvalidArgument"),
            Self::AmbiguousSource { .. } => Some("AmbiguousSource"),
            Self::Busy(_) => Some("DaemonBusy"),
            Self::Store(StoreError::Unavailable { .. }) => Some("StoreUnavailable"),
            Self::Store(StoreError::DimensionMismatch { .. }) => Some("DimensionMismatch"),
            Self::Model(ModelError::Disabled { .. }) => Some("ModelDisabled"),
            Self::Model(ModelError::LoadFailed { .. }) => Some("ModelLoadFailed"),
            Self::Model(ModelError::BudgetExceeded { .. }) => Some("MemoryBudgetExceeded"),
            Self::Model(ModelError::UnknownSlot { .. }) => Some("InvalidArgument"),
            Self::Protocol(_) => Some("ProtocolError"),
            Self::Store(_) | Self::Config { .. } | Self::Io(_) => None,
        }
    }
}

// Implement From traits for standard library and dependency errors

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::Store(StoreError::Database(err.to_string()))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::EmptyQuery;
        assert_eq!(err.to_string(), "query is empty");

        let err = Error::InvalidArgument("limit must be > 0".to_string());
        assert_eq!(err.to_string(), "invalid argument: limit must be > 0");
    }

    #[test]
    fn test_ambiguous_source_display() {
        let err = Error::AmbiguousSource {
            suffix: "notes.md".to_string(),
            candidates: vec!["a/notes.md".to_string(), "b/notes.md".to_string()],
        };
        assert!(err.to_string().contains("a/notes.md"));
        assert!(err.to_string().contains("b/notes.md"));
    }

    #[test]
    fn test_store_error_display() {
        let err = StoreError::DimensionMismatch {
            expected: 768,
            actual: 384,
        };
        assert_eq!(
            err.to_string(),
            "dimension mismatch: store expects 768, got 384"
        );

        let err = StoreError::Unavailable {
            path: "/tmp/missing.db".to_string(),
            reason: "no such file".to_string(),
        };
        assert!(err.to_string().contains("/tmp/missing.db"));
    }

    #[test]
    fn test_model_error_display() {
        let err = ModelError::Disabled {
            slot: "reranker".to_string(),
        };
        assert_eq!(err.to_string(), "model slot 'reranker' is disabled");

        let err = ModelError::BudgetExceeded {
            needed_mb: 600,
            budget_mb: 500,
        };
        assert!(err.to_string().contains("600"));
        assert!(err.to_string().contains("500"));
    }

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::FrameTooLarge {
            len: 100_000_000,
            max: 67_108_864,
        };
        assert!(err.to_string().contains("100000000"));
    }

    #[test]
    fn test_kind_taxonomy() {
        assert_eq!(Error::EmptyQuery.kind(), Some("EmptyQuery"));
        assert_eq!(
            Error::Busy("per-method cap".to_string()).kind(),
            Some("DaemonBusy")
        );
        assert_eq!(
            Error::from(StoreError::DimensionMismatch {
                expected: 4,
                actual: 3
            })
            .kind(),
            Some("DimensionMismatch")
        );
        assert_eq!(
            Error::from(ModelError::LoadFailed {
                slot: "embedder".to_string(),
                reason: "onnx".to_string()
            })
            .kind(),
            Some("ModelLoadFailed")
        );
        assert_eq!(
            Error::from(StoreError::Database("locked".to_string())).kind(),
            None
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_error_from_rusqlite() {
        let rusqlite_err = rusqlite::Error::InvalidQuery;
        let err: Error = rusqlite_err.into();
        assert!(matches!(err, Error::Store(StoreError::Database(_))));
    }

    #[test]
    fn test_error_from_serde_json() {
        let json_err: serde_json::Error = serde_json::from_str::<i32>("invalid").unwrap_err();
        let err: StoreError = json_err.into();
        assert!(matches!(err, StoreError::Serialization(_)));
    }
}
