//! JSON-RPC 2.0 message types and method schemas.
//!
//! Requests carry `jsonrpc: "2.0"`, a method, optional object params
//! and an id; responses carry exactly one of `result` or `error`.
//! Server errors map onto code −32000 with the error kind in
//! `data.kind`.

use crate::search::{DEFAULT_LIMIT, DEFAULT_RERANK_TOP_K, SearchHit, SearchMode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// The protocol version string.
pub const JSONRPC_VERSION: &str = "2.0";

/// Parse error (malformed JSON).
pub const CODE_PARSE_ERROR: i64 = -32700;
/// Not a valid JSON-RPC request object.
pub const CODE_INVALID_REQUEST: i64 = -32600;
/// Unknown method.
pub const CODE_METHOD_NOT_FOUND: i64 = -32601;
/// Parameters failed validation.
pub const CODE_INVALID_PARAMS: i64 = -32602;
/// Generic server error; `data.kind` carries the taxonomy kind.
pub const CODE_SERVER_ERROR: i64 = -32000;

/// A JSON-RPC request (or notification, when `id` is absent).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Must be `"2.0"`.
    pub jsonrpc: String,
    /// Method name.
    pub method: String,
    /// Method parameters (an object).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Request id (number or string); absent for notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

impl Request {
    /// Builds a request.
    #[must_use]
    pub fn new(method: &str, params: Option<Value>, id: u64) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.to_string(),
            params,
            id: Some(Value::from(id)),
        }
    }
}

/// A JSON-RPC response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// Mirrors the request id (`null` when it was unreadable).
    pub id: Value,
    /// Success payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl Response {
    /// Builds a success response.
    #[must_use]
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Builds an error response with an explicit code.
    #[must_use]
    pub fn failure(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    /// Maps a component error onto a −32000 server error with
    /// `data.kind` (and deletion candidates, when present).
    #[must_use]
    pub fn from_error(id: Value, error: &crate::Error) -> Self {
        let candidates = match error {
            crate::Error::AmbiguousSource { candidates, .. } => Some(candidates.clone()),
            _ => None,
        };
        let data = match (error.kind(), &candidates) {
            (None, None) => None,
            (kind, _) => Some(RpcErrorData {
                kind: kind.map(str::to_string),
                candidates,
            }),
        };

        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(RpcError {
                code: CODE_SERVER_ERROR,
                message: error.to_string(),
                data,
            }),
        }
    }
}

/// A JSON-RPC error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    /// JSON-RPC error code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
    /// Structured error detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<RpcErrorData>,
}

/// Structured error detail carried in `error.data`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcErrorData {
    /// Error kind from the taxonomy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Candidate sources for an ambiguous deletion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidates: Option<Vec<String>>,
}

// ==================== Method Params ====================

/// `search` parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchParams {
    /// Query text.
    pub query: String,
    /// Store file to search.
    pub db_path: PathBuf,
    /// Result count cap.
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Query mode.
    #[serde(default)]
    pub mode: SearchMode,
    /// Whether to rerank hybrid results with the cross-encoder.
    #[serde(default)]
    pub rerank: bool,
    /// Candidate count handed to the reranker.
    #[serde(default = "default_rerank_top_k")]
    pub rerank_top_k: usize,
}

fn default_limit() -> usize {
    DEFAULT_LIMIT
}

fn default_rerank_top_k() -> usize {
    DEFAULT_RERANK_TOP_K
}

/// `embed` parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedParams {
    /// Texts to embed.
    pub texts: Vec<String>,
}

/// `rerank` parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankParams {
    /// Query text.
    pub query: String,
    /// Documents to score against the query.
    pub documents: Vec<String>,
}

/// `load_model` / `unload_model` parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotParams {
    /// Slot name (`embedder` | `reranker`).
    pub slot: String,
}

/// `reload_config` parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReloadParams {
    /// Explicit config file; defaults to the daemon's resolved path.
    #[serde(default)]
    pub config_path: Option<PathBuf>,
}

// ==================== Method Results ====================

/// `search` result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    /// Ranked result rows.
    pub results: Vec<SearchHit>,
    /// Number of rows returned.
    pub count: usize,
    /// Wall-clock time spent serving the search.
    pub search_time_ms: u64,
}

/// `embed` result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedResult {
    /// One embedding per input text.
    pub embeddings: Vec<Vec<f32>>,
    /// Number of embeddings.
    pub count: usize,
    /// Wall-clock time spent embedding.
    pub embed_time_ms: u64,
}

/// `rerank` result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankResult {
    /// Scores in input order.
    pub scores: Vec<f32>,
    /// `(index, score)` pairs sorted by score descending.
    pub ranked: Vec<RankedScore>,
    /// Wall-clock time spent scoring.
    pub rerank_time_ms: u64,
}

/// One reranked entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedScore {
    /// Index into the input documents.
    pub index: usize,
    /// Cross-encoder score.
    pub score: f32,
}

/// `status` result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResult {
    /// Seconds since the daemon started.
    pub uptime_seconds: u64,
    /// Requests served since start.
    pub request_count: u64,
    /// Socket the daemon listens on.
    pub socket_path: PathBuf,
    /// Currently LOADED slots only.
    pub loaded_models: BTreeMap<String, Value>,
    /// Sum of loaded model estimates.
    pub total_memory_mb: u64,
    /// Configured budget.
    pub max_memory_mb: u64,
}

/// `load_model` result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadModelResult {
    /// Slot name.
    pub slot: String,
    /// Static memory estimate of the loaded model.
    pub memory_mb: u64,
}
