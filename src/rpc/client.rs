//! Client library for the daemon.
//!
//! [`DaemonClient`] speaks the framed JSON-RPC protocol over a
//! persistent Unix-socket connection, reconnecting once on transient
//! I/O failure. [`SearchClient`] adds the direct-mode fallback: when
//! the daemon socket is absent, the embedder and store are loaded
//! in-process so the same `search` call succeeds at cold-start latency.

use crate::config::Config;
use crate::error::{ProtocolError, Result};
use crate::model::ModelManager;
use crate::rpc::frame::{read_frame, write_frame};
use crate::rpc::protocol::{
    EmbedParams, EmbedResult, Request, RerankParams, RerankResult, Response, SearchParams,
    SearchResult, SlotParams, StatusResult,
};
use crate::search::{SearchEngine, SearchMode};
use serde_json::Value;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Synchronous client over the daemon socket.
pub struct DaemonClient {
    socket_path: PathBuf,
    stream: Option<UnixStream>,
    next_id: u64,
}

impl DaemonClient {
    /// Connects to the daemon.
    ///
    /// # Errors
    ///
    /// I/O errors when the socket is absent or refuses the connection.
    pub fn connect<P: AsRef<Path>>(socket_path: P) -> Result<Self> {
        let socket_path = socket_path.as_ref().to_path_buf();
        let stream = UnixStream::connect(&socket_path)?;
        Ok(Self {
            socket_path,
            stream: Some(stream),
            next_id: 0,
        })
    }

    fn reconnect(&mut self) -> Result<()> {
        self.stream = Some(UnixStream::connect(&self.socket_path)?);
        Ok(())
    }

    fn call_once(&mut self, method: &str, params: Option<Value>) -> Result<Value> {
        self.next_id += 1;
        let request = Request::new(method, params, self.next_id);
        let body = serde_json::to_vec(&request).map_err(ProtocolError::from)?;

        if self.stream.is_none() {
            self.reconnect()?;
        }
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| crate::Error::Io("not connected".to_string()))?;

        write_frame(stream, &body)?;
        let frame = read_frame(stream)?
            .ok_or_else(|| crate::Error::Io("daemon closed the connection".to_string()))?;

        let response: Response = serde_json::from_slice(&frame).map_err(ProtocolError::from)?;
        if let Some(error) = response.error {
            let kind = error.data.as_ref().and_then(|d| d.kind.clone());
            return Err(ProtocolError::Rpc {
                code: error.code,
                message: error.message,
                kind,
            }
            .into());
        }
        response
            .result
            .ok_or_else(|| ProtocolError::InvalidRequest("response carried no result".to_string()).into())
    }

    /// Issues one call, reconnecting once on transient I/O failure and
    /// retrying `ModelLoadFailed` at most once after reconnect.
    ///
    /// # Errors
    ///
    /// The final failure after the single retry.
    pub fn call(&mut self, method: &str, params: Option<Value>) -> Result<Value> {
        match self.call_once(method, params.clone()) {
            Ok(value) => Ok(value),
            Err(crate::Error::Io(first)) => {
                debug!(error = %first, "reconnecting after I/O failure");
                self.stream = None;
                self.reconnect()?;
                self.call_once(method, params)
            }
            Err(crate::Error::Protocol(ProtocolError::Rpc { kind, message, code }))
                if kind.as_deref() == Some("ModelLoadFailed") =>
            {
                debug!(error = %message, "retrying once after model load failure");
                self.stream = None;
                self.reconnect()?;
                match self.call_once(method, params) {
                    Ok(value) => Ok(value),
                    // Surface the original failure shape if the retry
                    // also fails.
                    Err(_) => Err(ProtocolError::Rpc {
                        code,
                        message,
                        kind,
                    }
                    .into()),
                }
            }
            Err(e) => Err(e),
        }
    }

    fn call_typed<T: serde::de::DeserializeOwned>(
        &mut self,
        method: &str,
        params: Option<Value>,
    ) -> Result<T> {
        let value = self.call(method, params)?;
        serde_json::from_value(value).map_err(|e| ProtocolError::from(e).into())
    }

    /// `ping`.
    ///
    /// # Errors
    ///
    /// Transport or server failures.
    pub fn ping(&mut self) -> Result<bool> {
        let value = self.call("ping", None)?;
        Ok(value.get("ok").and_then(Value::as_bool).unwrap_or(false))
    }

    /// `status`.
    ///
    /// # Errors
    ///
    /// Transport or server failures.
    pub fn status(&mut self) -> Result<StatusResult> {
        self.call_typed("status", None)
    }

    /// `search`.
    ///
    /// # Errors
    ///
    /// Transport or server failures.
    pub fn search(&mut self, params: &SearchParams) -> Result<SearchResult> {
        let params = serde_json::to_value(params).map_err(ProtocolError::from)?;
        self.call_typed("search", Some(params))
    }

    /// `embed`.
    ///
    /// # Errors
    ///
    /// Transport or server failures.
    pub fn embed(&mut self, texts: Vec<String>) -> Result<EmbedResult> {
        let params = serde_json::to_value(EmbedParams { texts }).map_err(ProtocolError::from)?;
        self.call_typed("embed", Some(params))
    }

    /// `rerank`.
    ///
    /// # Errors
    ///
    /// Transport or server failures.
    pub fn rerank(&mut self, query: String, documents: Vec<String>) -> Result<RerankResult> {
        let params = serde_json::to_value(RerankParams { query, documents })
            .map_err(ProtocolError::from)?;
        self.call_typed("rerank", Some(params))
    }

    /// `load_model`.
    ///
    /// # Errors
    ///
    /// Transport or server failures.
    pub fn load_model(&mut self, slot: &str) -> Result<Value> {
        let params = serde_json::to_value(SlotParams {
            slot: slot.to_string(),
        })
        .map_err(ProtocolError::from)?;
        self.call("load_model", Some(params))
    }

    /// `unload_model`.
    ///
    /// # Errors
    ///
    /// Transport or server failures.
    pub fn unload_model(&mut self, slot: &str) -> Result<Value> {
        let params = serde_json::to_value(SlotParams {
            slot: slot.to_string(),
        })
        .map_err(ProtocolError::from)?;
        self.call("unload_model", Some(params))
    }

    /// `reload_config`.
    ///
    /// # Errors
    ///
    /// Transport or server failures.
    pub fn reload_config(&mut self, config_path: Option<&Path>) -> Result<Value> {
        let params = config_path.map(|path| serde_json::json!({"config_path": path}));
        self.call("reload_config", params)
    }

    /// `shutdown`. The server responds, then drains and exits.
    ///
    /// # Errors
    ///
    /// Transport or server failures.
    pub fn shutdown(&mut self) -> Result<Value> {
        self.call("shutdown", None)
    }
}

/// In-process fallback backend.
pub struct DirectClient {
    engine: SearchEngine,
}

impl DirectClient {
    /// Builds the in-process engine from configuration.
    #[must_use]
    pub fn new(config: &Config) -> Self {
        let manager = Arc::new(ModelManager::with_production_loaders(
            config.manager_config(),
        ));
        Self {
            engine: SearchEngine::new(manager),
        }
    }

    /// Wraps an existing engine (custom manager or loaders).
    #[must_use]
    pub const fn with_engine(engine: SearchEngine) -> Self {
        Self { engine }
    }

    /// The in-process engine (also used by the CLI for indexing).
    #[must_use]
    pub const fn engine(&self) -> &SearchEngine {
        &self.engine
    }

    fn search(&self, params: &SearchParams) -> Result<SearchResult> {
        let started = Instant::now();
        let store = self.engine.open_store(&params.db_path)?;
        let hits = match (params.mode, params.rerank) {
            (SearchMode::Hybrid, true) => self.engine.hybrid_reranked(
                &store,
                &params.query,
                params.limit,
                params.rerank_top_k,
            ),
            (SearchMode::Hybrid, false) => {
                self.engine.hybrid(&store, &params.query, params.limit)
            }
            (SearchMode::Bm25, _) => self.engine.bm25(&store, &params.query, params.limit),
            (SearchMode::Vector, _) => self.engine.vector(&store, &params.query, params.limit),
        }?;

        #[allow(clippy::cast_possible_truncation)]
        Ok(SearchResult {
            count: hits.len(),
            results: hits,
            search_time_ms: started.elapsed().as_millis() as u64,
        })
    }
}

/// Convenience client: the daemon when it is running, the in-process
/// engine when it is not.
pub enum SearchClient {
    /// Connected to a running daemon.
    Daemon(DaemonClient),
    /// Daemon absent; working in-process.
    Direct(Box<DirectClient>),
}

impl SearchClient {
    /// Probes the daemon socket; falls back to direct mode when the
    /// connect fails. The absent daemon is a normal branch, not an
    /// error.
    #[must_use]
    pub fn connect(config: &Config) -> Self {
        match DaemonClient::connect(&config.daemon.socket_path) {
            Ok(client) => {
                debug!(socket = %config.daemon.socket_path.display(), "using daemon");
                Self::Daemon(client)
            }
            Err(_) => {
                debug!("daemon absent; using direct mode");
                Self::Direct(Box::new(DirectClient::new(config)))
            }
        }
    }

    /// Whether this client talks to a daemon.
    #[must_use]
    pub const fn is_daemon(&self) -> bool {
        matches!(self, Self::Daemon(_))
    }

    /// Runs a search through whichever backend is active.
    ///
    /// # Errors
    ///
    /// Engine, store or transport failures.
    pub fn search(&mut self, params: &SearchParams) -> Result<SearchResult> {
        match self {
            Self::Daemon(client) => client.search(params),
            Self::Direct(direct) => direct.search(params),
        }
    }
}
