//! Model lifecycle management.
//!
//! The manager owns the process-wide set of model slots (`embedder`,
//! `reranker`) and is the only place models are loaded, shared and
//! evicted. Request workers acquire RAII handles; a background sweeper
//! evicts idle `on_demand` slots; an LRU/FIFO policy keeps the sum of
//! loaded models inside the memory budget.

mod manager;

pub use manager::{
    EmbedderHandle, IdleSweeper, ModelLoaders, ModelManager, RerankerHandle, SlotStatus,
};

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default bound on how long an `acquire` waits for a slot.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default idle-sweeper period.
pub const DEFAULT_SWEEP_PERIOD: Duration = Duration::from_secs(10);

/// The fixed, process-wide slot names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SlotKind {
    /// Dense-vector producer.
    Embedder,
    /// Cross-encoder relevance scorer.
    Reranker,
}

impl SlotKind {
    /// Canonical slot name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Embedder => "embedder",
            Self::Reranker => "reranker",
        }
    }

    /// Parses a canonical slot name.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "embedder" => Some(Self::Embedder),
            "reranker" => Some(Self::Reranker),
            _ => None,
        }
    }

    /// All slots, in canonical order.
    #[must_use]
    pub const fn all() -> [Self; 2] {
        [Self::Embedder, Self::Reranker]
    }
}

impl std::fmt::Display for SlotKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Slot lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotState {
    /// No model resident.
    Unloaded,
    /// A single-flight load is running.
    Loading,
    /// Model resident and usable.
    Loaded,
    /// Model being released.
    Unloading,
}

/// Keep-loaded policy for a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum KeepPolicy {
    /// Loaded at start-up; never evicted, never idle-timed-out.
    Always,
    /// Loaded on first use; evictable and idle-timed-out.
    #[default]
    OnDemand,
    /// All requests fail with `ModelDisabled`.
    Disabled,
}

/// Eviction order under memory pressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    /// Least recently used first.
    #[default]
    Lru,
    /// Oldest load first.
    Fifo,
}

/// Configuration of one slot.
#[derive(Debug, Clone)]
pub struct SlotConfig {
    /// Model identifier handed to the loader.
    pub model: String,
    /// Keep-loaded policy.
    pub policy: KeepPolicy,
    /// Idle eviction timeout; zero disables idle eviction for the slot.
    pub idle_timeout: Duration,
    /// Static memory estimate used for budget accounting.
    pub memory_estimate_mb: u64,
}

/// Full manager configuration.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Embedder slot configuration.
    pub embedder: SlotConfig,
    /// Reranker slot configuration.
    pub reranker: SlotConfig,
    /// Budget over the sum of loaded model estimates.
    pub max_ram_mb: u64,
    /// Eviction order.
    pub eviction_policy: EvictionPolicy,
    /// Bound on how long `acquire` waits for a busy slot.
    pub acquire_timeout: Duration,
}

impl ManagerConfig {
    /// Returns the slot configuration for a kind.
    #[must_use]
    pub const fn slot(&self, kind: SlotKind) -> &SlotConfig {
        match kind {
            SlotKind::Embedder => &self.embedder,
            SlotKind::Reranker => &self.reranker,
        }
    }
}
