//! The fastsearch daemon: a length-framed JSON-RPC 2.0 server on a
//! local Unix socket.
//!
//! Connections are accepted concurrently; each connection is serviced
//! sequentially (read one frame, dispatch, respond, repeat), so
//! responses per connection arrive in request order. Engine, store and
//! manager work is blocking and runs on the blocking pool.

use crate::config::Config;
use crate::error::Result;
use crate::model::{DEFAULT_SWEEP_PERIOD, ModelManager, SlotKind, SlotState};
use crate::rpc::frame::{read_frame_async, write_frame_async};
use crate::rpc::protocol::{
    CODE_INVALID_PARAMS, CODE_INVALID_REQUEST, CODE_METHOD_NOT_FOUND, CODE_PARSE_ERROR,
    EmbedParams, EmbedResult, JSONRPC_VERSION, LoadModelResult, RankedScore, ReloadParams,
    Request, RerankParams, RerankResult, Response, SearchParams, SearchResult, SlotParams,
    StatusResult,
};
use crate::search::{SearchEngine, SearchHit, SearchMode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Bound on concurrently served connections; above it new connections
/// are refused rather than queued.
const MAX_CONNECTIONS: usize = 128;

/// Cap on concurrent model-bound method executions
/// (`search`/`embed`/`rerank`).
const MODEL_METHOD_PERMITS: usize = 4;

/// How long a request waits for a model-method permit before
/// `DaemonBusy`.
const PERMIT_WAIT: Duration = Duration::from_secs(10);

/// The daemon.
pub struct Daemon {
    state: Arc<ServerState>,
    shutdown_rx: watch::Receiver<bool>,
}

struct ServerState {
    engine: Arc<SearchEngine>,
    manager: Arc<ModelManager>,
    config_path: Option<PathBuf>,
    socket_path: PathBuf,
    pid_path: PathBuf,
    started: Instant,
    requests: AtomicU64,
    shutdown: watch::Sender<bool>,
    model_permits: Semaphore,
}

impl Daemon {
    /// Creates a daemon from configuration. `config_path` is remembered
    /// for `reload_config` calls without an explicit path.
    #[must_use]
    pub fn new(config: &Config, config_path: Option<PathBuf>) -> Self {
        let manager = Arc::new(ModelManager::with_production_loaders(
            config.manager_config(),
        ));
        Self::with_manager(config, config_path, manager)
    }

    /// Creates a daemon over an existing manager (used by tests to
    /// inject loaders).
    #[must_use]
    pub fn with_manager(
        config: &Config,
        config_path: Option<PathBuf>,
        manager: Arc<ModelManager>,
    ) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let state = Arc::new(ServerState {
            engine: Arc::new(SearchEngine::new(Arc::clone(&manager))),
            manager,
            config_path,
            socket_path: config.daemon.socket_path.clone(),
            pid_path: config.daemon.pid_path.clone(),
            started: Instant::now(),
            requests: AtomicU64::new(0),
            shutdown,
            model_permits: Semaphore::new(MODEL_METHOD_PERMITS),
        });
        Self { state, shutdown_rx }
    }

    /// The socket path the daemon will bind.
    #[must_use]
    pub fn socket_path(&self) -> &Path {
        &self.state.socket_path
    }

    /// Runs the daemon until a `shutdown` request arrives.
    ///
    /// # Errors
    ///
    /// Binding failures, or a failed load of an `always` slot.
    pub async fn run(mut self) -> Result<()> {
        let listener = bind_socket(&self.state.socket_path)?;
        std::fs::write(&self.state.pid_path, std::process::id().to_string())?;

        {
            let manager = Arc::clone(&self.state.manager);
            tokio::task::spawn_blocking(move || manager.load_always_slots())
                .await
                .map_err(|e| crate::Error::Io(format!("startup load task failed: {e}")))??;
        }

        let sweeper = ModelManager::spawn_idle_sweeper(
            Arc::clone(&self.state.manager),
            DEFAULT_SWEEP_PERIOD,
        );

        info!(socket = %self.state.socket_path.display(), "daemon listening");

        let conn_permits = Arc::new(Semaphore::new(MAX_CONNECTIONS));
        let conn_shutdown = self.shutdown_rx.clone();
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let Ok(permit) = Arc::clone(&conn_permits).try_acquire_owned() else {
                            warn!("refusing connection: accept queue full");
                            drop(stream);
                            continue;
                        };
                        let state = Arc::clone(&self.state);
                        let shutdown = conn_shutdown.clone();
                        tasks.spawn(async move {
                            handle_connection(state, stream, shutdown).await;
                            drop(permit);
                        });
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                },
                _ = self.shutdown_rx.changed() => break,
            }

            // Reap finished connection tasks as we go.
            while tasks.try_join_next().is_some() {}
        }

        drop(listener);
        debug!("draining in-flight connections");
        while tasks.join_next().await.is_some() {}
        drop(sweeper);

        let _ = std::fs::remove_file(&self.state.socket_path);
        let _ = std::fs::remove_file(&self.state.pid_path);
        info!("daemon stopped");
        Ok(())
    }
}

/// Binds the listener with transport hygiene: refuse when a live
/// daemon answers on the socket, unlink a stale file, restrict
/// permissions to the owning user.
fn bind_socket(path: &Path) -> Result<UnixListener> {
    if path.exists() {
        match std::os::unix::net::UnixStream::connect(path) {
            Ok(_) => {
                return Err(crate::Error::Io(format!(
                    "a daemon is already listening on {}",
                    path.display()
                )));
            }
            Err(_) => {
                warn!(socket = %path.display(), "removing stale socket file");
                std::fs::remove_file(path)?;
            }
        }
    }

    let listener = UnixListener::bind(path)?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(listener)
}

async fn handle_connection(
    state: Arc<ServerState>,
    stream: UnixStream,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!("client connected");
    let (read_half, write_half) = stream.into_split();
    let mut reader = tokio::io::BufReader::new(read_half);
    let mut writer = tokio::io::BufWriter::new(write_half);

    loop {
        let frame = tokio::select! {
            frame = read_frame_async(&mut reader) => frame,
            _ = shutdown.changed() => break,
        };

        match frame {
            Ok(Some(body)) => {
                let (response, close) = dispatch(&state, &body).await;
                if let Some(response) = response {
                    let Ok(bytes) = serde_json::to_vec(&response) else {
                        break;
                    };
                    if write_frame_async(&mut writer, &bytes).await.is_err() {
                        // Peer closed mid-response; abort this connection.
                        break;
                    }
                }
                if close {
                    break;
                }
            }
            // EOF or reset is the cancellation signal for this connection.
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "closing connection on protocol error");
                break;
            }
        }
    }
    debug!("client disconnected");
}

enum MethodOutcome {
    Value(Value),
    NotFound,
    InvalidParams(String),
}

async fn dispatch(state: &Arc<ServerState>, body: &[u8]) -> (Option<Response>, bool) {
    let request: Request = match serde_json::from_slice(body) {
        Ok(request) => request,
        Err(e) => {
            // Send the parse error if possible, then close.
            return (
                Some(Response::failure(
                    Value::Null,
                    CODE_PARSE_ERROR,
                    format!("parse error: {e}"),
                )),
                true,
            );
        }
    };

    if request.jsonrpc != JSONRPC_VERSION {
        let id = request.id.unwrap_or(Value::Null);
        return (
            Some(Response::failure(
                id,
                CODE_INVALID_REQUEST,
                "unsupported jsonrpc version",
            )),
            false,
        );
    }

    state.requests.fetch_add(1, Ordering::Relaxed);
    let outcome = handle_method(state, &request.method, request.params).await;

    // Notifications get no response.
    let Some(id) = request.id else {
        return (None, false);
    };

    let response = match outcome {
        Ok(MethodOutcome::Value(value)) => Response::success(id, value),
        Ok(MethodOutcome::NotFound) => Response::failure(
            id,
            CODE_METHOD_NOT_FOUND,
            format!("method not found: {}", request.method),
        ),
        Ok(MethodOutcome::InvalidParams(message)) => {
            Response::failure(id, CODE_INVALID_PARAMS, message)
        }
        Err(e) => Response::from_error(id, &e),
    };
    (Some(response), false)
}

async fn handle_method(
    state: &Arc<ServerState>,
    method: &str,
    params: Option<Value>,
) -> Result<MethodOutcome> {
    match method {
        "ping" => Ok(MethodOutcome::Value(serde_json::json!({"ok": true}))),
        "status" => status(state),
        "search" => match parse_params::<SearchParams>(params) {
            Ok(p) => search(state, p).await,
            Err(message) => Ok(MethodOutcome::InvalidParams(message)),
        },
        "embed" => match parse_params::<EmbedParams>(params) {
            Ok(p) => embed(state, p).await,
            Err(message) => Ok(MethodOutcome::InvalidParams(message)),
        },
        "rerank" => match parse_params::<RerankParams>(params) {
            Ok(p) => rerank(state, p).await,
            Err(message) => Ok(MethodOutcome::InvalidParams(message)),
        },
        "load_model" => match parse_slot(params) {
            Ok(kind) => load_model(state, kind).await,
            Err(message) => Ok(MethodOutcome::InvalidParams(message)),
        },
        "unload_model" => match parse_slot(params) {
            Ok(kind) => {
                let manager = Arc::clone(&state.manager);
                run_blocking(move || manager.unload(kind)).await?;
                Ok(MethodOutcome::Value(
                    serde_json::json!({"slot": kind.as_str()}),
                ))
            }
            Err(message) => Ok(MethodOutcome::InvalidParams(message)),
        },
        "reload_config" => match parse_params::<ReloadParams>(params) {
            Ok(p) => reload_config(state, p).await,
            Err(message) => Ok(MethodOutcome::InvalidParams(message)),
        },
        "shutdown" => {
            info!("shutdown requested");
            let _ = state.shutdown.send(true);
            Ok(MethodOutcome::Value(serde_json::json!({"stopping": true})))
        }
        _ => Ok(MethodOutcome::NotFound),
    }
}

fn parse_params<T: DeserializeOwned>(params: Option<Value>) -> std::result::Result<T, String> {
    let params = params.unwrap_or_else(|| Value::Object(serde_json::Map::new()));
    serde_json::from_value(params).map_err(|e| format!("invalid params: {e}"))
}

fn parse_slot(params: Option<Value>) -> std::result::Result<SlotKind, String> {
    let p: SlotParams = parse_params(params)?;
    SlotKind::parse(&p.slot).ok_or_else(|| format!("unknown model slot: {}", p.slot))
}

async fn run_blocking<T, F>(work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| crate::Error::Io(format!("worker task failed: {e}")))?
}

/// Waits for a model-method permit; `DaemonBusy` past the bounded wait.
async fn model_permit(state: &ServerState) -> Result<tokio::sync::SemaphorePermit<'_>> {
    tokio::time::timeout(PERMIT_WAIT, state.model_permits.acquire())
        .await
        .map_err(|_| crate::Error::Busy("concurrent model request cap reached".to_string()))?
        .map_err(|_| crate::Error::Busy("server is shutting down".to_string()))
}

fn status(state: &Arc<ServerState>) -> Result<MethodOutcome> {
    let slots = state.manager.status()?;
    let loaded_models: BTreeMap<String, Value> = slots
        .iter()
        .filter(|slot| slot.state == SlotState::Loaded)
        .map(|slot| {
            (
                slot.slot.clone(),
                serde_json::to_value(slot).unwrap_or(Value::Null),
            )
        })
        .collect();

    let result = StatusResult {
        uptime_seconds: state.started.elapsed().as_secs(),
        request_count: state.requests.load(Ordering::Relaxed),
        socket_path: state.socket_path.clone(),
        loaded_models,
        total_memory_mb: state.manager.loaded_memory_mb()?,
        max_memory_mb: state.manager.max_memory_mb()?,
    };
    to_outcome(&result)
}

async fn search(state: &Arc<ServerState>, params: SearchParams) -> Result<MethodOutcome> {
    let permit = model_permit(state).await?;
    let started = Instant::now();

    let engine = Arc::clone(&state.engine);
    let hits: Vec<SearchHit> = run_blocking(move || {
        let store = engine.open_store(&params.db_path)?;
        match (params.mode, params.rerank) {
            (SearchMode::Hybrid, true) => {
                engine.hybrid_reranked(&store, &params.query, params.limit, params.rerank_top_k)
            }
            (SearchMode::Hybrid, false) => engine.hybrid(&store, &params.query, params.limit),
            (SearchMode::Bm25, _) => engine.bm25(&store, &params.query, params.limit),
            (SearchMode::Vector, _) => engine.vector(&store, &params.query, params.limit),
        }
    })
    .await?;
    drop(permit);

    let result = SearchResult {
        count: hits.len(),
        results: hits,
        search_time_ms: elapsed_ms(started),
    };
    to_outcome(&result)
}

async fn embed(state: &Arc<ServerState>, params: EmbedParams) -> Result<MethodOutcome> {
    let permit = model_permit(state).await?;
    let started = Instant::now();

    let engine = Arc::clone(&state.engine);
    let embeddings = run_blocking(move || {
        let texts: Vec<&str> = params.texts.iter().map(String::as_str).collect();
        engine.embed(&texts)
    })
    .await?;
    drop(permit);

    let result = EmbedResult {
        count: embeddings.len(),
        embeddings,
        embed_time_ms: elapsed_ms(started),
    };
    to_outcome(&result)
}

async fn rerank(state: &Arc<ServerState>, params: RerankParams) -> Result<MethodOutcome> {
    let permit = model_permit(state).await?;
    let started = Instant::now();

    let engine = Arc::clone(&state.engine);
    let scores = run_blocking(move || {
        let documents: Vec<&str> = params.documents.iter().map(String::as_str).collect();
        engine.rerank(&params.query, &documents)
    })
    .await?;
    drop(permit);

    let mut ranked: Vec<RankedScore> = scores
        .iter()
        .enumerate()
        .map(|(index, score)| RankedScore {
            index,
            score: *score,
        })
        .collect();
    ranked.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.index.cmp(&b.index)));

    let result = RerankResult {
        scores,
        ranked,
        rerank_time_ms: elapsed_ms(started),
    };
    to_outcome(&result)
}

async fn load_model(state: &Arc<ServerState>, kind: SlotKind) -> Result<MethodOutcome> {
    let manager = Arc::clone(&state.manager);
    let status = run_blocking(move || manager.load(kind)).await?;
    let result = LoadModelResult {
        slot: status.slot,
        memory_mb: status.memory_mb,
    };
    to_outcome(&result)
}

async fn reload_config(state: &Arc<ServerState>, params: ReloadParams) -> Result<MethodOutcome> {
    let path = params
        .config_path
        .or_else(|| state.config_path.clone())
        .or_else(crate::config::default_config_path)
        .ok_or_else(|| crate::Error::Config {
            message: "no configuration path to reload from".to_string(),
        })?;

    let config = Config::load(&path)?;
    if config.daemon.socket_path != state.socket_path {
        warn!(
            new = %config.daemon.socket_path.display(),
            "socket path change requires restart; keeping current socket"
        );
    }

    let manager = Arc::clone(&state.manager);
    let manager_config = config.manager_config();
    run_blocking(move || manager.reload(&manager_config)).await?;

    info!(config = %path.display(), "configuration reloaded");
    Ok(MethodOutcome::Value(serde_json::json!({"reloaded": true})))
}

fn to_outcome<T: serde::Serialize>(value: &T) -> Result<MethodOutcome> {
    serde_json::to_value(value)
        .map(MethodOutcome::Value)
        .map_err(|e| crate::Error::Io(format!("response serialization failed: {e}")))
}

#[allow(clippy::cast_possible_truncation)]
fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
