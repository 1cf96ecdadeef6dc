//! Daemon configuration.
//!
//! YAML configuration with defaults for every key, loaded from an
//! explicit path, `FASTSEARCH_CONFIG`, or the user config directory.
//! The store path resolves separately through `FASTSEARCH_DB`.

use crate::embedding::{DEFAULT_EMBEDDER_MODEL, DEFAULT_RERANKER_MODEL, default_memory_estimate_mb};
use crate::model::{
    DEFAULT_ACQUIRE_TIMEOUT, EvictionPolicy, KeepPolicy, ManagerConfig, SlotConfig,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding the default store path.
pub const ENV_DB: &str = "FASTSEARCH_DB";

/// Environment variable overriding the default config path.
pub const ENV_CONFIG: &str = "FASTSEARCH_CONFIG";

/// Default socket path.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/fastsearch.sock";

/// Default PID file path.
pub const DEFAULT_PID_PATH: &str = "/tmp/fastsearch.pid";

/// Daemon log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    /// Everything, including per-request traces.
    #[serde(alias = "debug")]
    Debug,
    /// Lifecycle events (default).
    #[default]
    #[serde(alias = "info")]
    Info,
    /// Only anomalies.
    #[serde(alias = "warning", alias = "WARN", alias = "warn")]
    Warning,
    /// Only failures.
    #[serde(alias = "error")]
    Error,
}

impl LogLevel {
    /// The equivalent `tracing` filter directive.
    #[must_use]
    pub const fn as_filter(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warn",
            Self::Error => "error",
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Daemon transport settings.
    pub daemon: DaemonConfig,
    /// Per-slot model settings.
    pub models: ModelsConfig,
    /// Memory budget settings.
    pub memory: MemoryConfig,
}

/// Daemon transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Unix socket path.
    pub socket_path: PathBuf,
    /// PID file path.
    pub pid_path: PathBuf,
    /// Log level.
    pub log_level: LogLevel,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            pid_path: PathBuf::from(DEFAULT_PID_PATH),
            log_level: LogLevel::Info,
        }
    }
}

/// Per-slot model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    /// Embedder slot.
    pub embedder: ModelSlotConfig,
    /// Reranker slot.
    pub reranker: ModelSlotConfig,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            embedder: ModelSlotConfig {
                name: DEFAULT_EMBEDDER_MODEL.to_string(),
                ..ModelSlotConfig::default()
            },
            reranker: ModelSlotConfig {
                name: DEFAULT_RERANKER_MODEL.to_string(),
                ..ModelSlotConfig::default()
            },
        }
    }
}

/// One model slot's settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSlotConfig {
    /// Model identifier.
    pub name: String,
    /// Keep-loaded policy.
    pub keep_loaded: KeepPolicy,
    /// Idle eviction timeout in seconds; 0 = never.
    pub idle_timeout_seconds: u64,
    /// Optional override of the built-in per-model memory estimate.
    pub memory_estimate_mb: Option<u64>,
}

impl Default for ModelSlotConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_EMBEDDER_MODEL.to_string(),
            keep_loaded: KeepPolicy::OnDemand,
            idle_timeout_seconds: 300,
            memory_estimate_mb: None,
        }
    }
}

/// Memory budget settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Budget over the sum of loaded model estimates.
    pub max_ram_mb: u64,
    /// Eviction order under memory pressure.
    pub eviction_policy: EvictionPolicy,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_ram_mb: 4000,
            eviction_policy: EvictionPolicy::Lru,
        }
    }
}

impl Config {
    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// [`crate::Error::Config`] when the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| crate::Error::Config {
            message: format!("cannot read {}: {e}", path.display()),
        })?;
        serde_yaml::from_str(&raw).map_err(|e| crate::Error::Config {
            message: format!("cannot parse {}: {e}", path.display()),
        })
    }

    /// Loads from an explicit path, else the resolved default path if it
    /// exists, else built-in defaults.
    ///
    /// # Errors
    ///
    /// Propagates parse failures; a missing default file is not an
    /// error.
    pub fn load_or_default(path: Option<&Path>) -> crate::Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match default_config_path() {
            Some(path) if path.exists() => Self::load(path),
            _ => Ok(Self::default()),
        }
    }

    /// Maps the configuration onto the model manager's view.
    #[must_use]
    pub fn manager_config(&self) -> ManagerConfig {
        let slot = |slot: &ModelSlotConfig| SlotConfig {
            model: slot.name.clone(),
            policy: slot.keep_loaded,
            idle_timeout: Duration::from_secs(slot.idle_timeout_seconds),
            memory_estimate_mb: slot
                .memory_estimate_mb
                .unwrap_or_else(|| default_memory_estimate_mb(&slot.name)),
        };

        ManagerConfig {
            embedder: slot(&self.models.embedder),
            reranker: slot(&self.models.reranker),
            max_ram_mb: self.memory.max_ram_mb,
            eviction_policy: self.memory.eviction_policy,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
        }
    }
}

/// Resolves the default store path: `FASTSEARCH_DB` if set, else the
/// crate default.
#[must_use]
pub fn default_db_path() -> PathBuf {
    std::env::var(ENV_DB)
        .map_or_else(|_| PathBuf::from(crate::storage::DEFAULT_DB_PATH), PathBuf::from)
}

/// Resolves the default config path: `FASTSEARCH_CONFIG` if set, else
/// `<config dir>/fastsearch/config.yaml`.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(ENV_CONFIG) {
        return Some(PathBuf::from(path));
    }
    dirs::config_dir().map(|dir| dir.join("fastsearch").join("config.yaml"))
}
