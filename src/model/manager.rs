//! The model manager.
//!
//! Slot state lives under one mutex; loads run outside it. Single-flight
//! is the state machine itself: the thread that flips a slot from
//! UNLOADED to LOADING performs the load, everyone else waits on the
//! condvar and observes the outcome.

use crate::embedding::{Embedder, Reranker, create_embedder, create_reranker};
use crate::error::{ModelError, Result};
use crate::model::{
    EvictionPolicy, KeepPolicy, ManagerConfig, SlotConfig, SlotKind, SlotState,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::ops::Deref;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Factory functions producing model resources for the slots.
///
/// Parameterized so tests can count loads and inject failures.
pub struct ModelLoaders {
    /// Produces an embedder for a model identifier.
    pub embedder: Box<dyn Fn(&str) -> Result<Arc<dyn Embedder>> + Send + Sync>,
    /// Produces a reranker for a model identifier.
    pub reranker: Box<dyn Fn(&str) -> Result<Arc<dyn Reranker>> + Send + Sync>,
}

impl ModelLoaders {
    /// The production loaders backed by the embedding module factories.
    #[must_use]
    pub fn production() -> Self {
        Self {
            embedder: Box::new(create_embedder),
            reranker: Box::new(create_reranker),
        }
    }
}

/// A loaded model resource.
#[derive(Clone)]
enum SlotResource {
    Embedder(Arc<dyn Embedder>),
    Reranker(Arc<dyn Reranker>),
}

/// Per-slot bookkeeping.
struct Slot {
    config: SlotConfig,
    state: SlotState,
    resource: Option<SlotResource>,
    /// (monotonic, unix seconds) stamps.
    loaded_at: Option<(Instant, i64)>,
    last_used: Option<(Instant, i64)>,
    /// Load order for FIFO eviction.
    load_order: u64,
    /// Outstanding handles; blocks eviction and unload.
    in_use: usize,
    /// Increments when a load starts; identifies failure outcomes.
    attempt: u64,
    /// Error of the most recent failed attempt.
    attempt_error: Option<(u64, String)>,
}

impl Slot {
    fn new(config: SlotConfig) -> Self {
        Self {
            config,
            state: SlotState::Unloaded,
            resource: None,
            loaded_at: None,
            last_used: None,
            load_order: 0,
            in_use: 0,
            attempt: 0,
            attempt_error: None,
        }
    }

    fn touch(&mut self) {
        self.last_used = Some((Instant::now(), crate::core::current_timestamp()));
    }
}

struct Inner {
    slots: BTreeMap<SlotKind, Slot>,
    max_ram_mb: u64,
    eviction: EvictionPolicy,
    load_seq: u64,
}

impl Inner {
    // The map always holds both slots, so these lookups cannot miss.
    #[allow(clippy::unwrap_used)]
    fn slot(&self, kind: SlotKind) -> &Slot {
        self.slots.get(&kind).unwrap()
    }

    #[allow(clippy::unwrap_used)]
    fn slot_mut(&mut self, kind: SlotKind) -> &mut Slot {
        self.slots.get_mut(&kind).unwrap()
    }

    /// Memory currently committed: LOADED plus in-flight LOADING slots.
    fn used_mb(&self) -> u64 {
        self.slots
            .values()
            .filter(|s| matches!(s.state, SlotState::Loaded | SlotState::Loading))
            .map(|s| s.config.memory_estimate_mb)
            .sum()
    }

    /// Picks eviction victims until `needed` fits, or returns what it
    /// could free. Victims transition to UNLOADING and their resources
    /// are returned for dropping outside the lock.
    fn evict_for(&mut self, needed: u64) -> Vec<(SlotKind, SlotResource)> {
        let mut victims: Vec<SlotKind> = self
            .slots
            .iter()
            .filter(|(_, s)| {
                s.config.policy == KeepPolicy::OnDemand
                    && s.state == SlotState::Loaded
                    && s.in_use == 0
            })
            .map(|(k, _)| *k)
            .collect();

        match self.eviction {
            EvictionPolicy::Lru => victims.sort_by_key(|k| {
                self.slot(*k).last_used.map_or(Instant::now(), |(i, _)| i)
            }),
            EvictionPolicy::Fifo => victims.sort_by_key(|k| self.slot(*k).load_order),
        }

        let mut dropped = Vec::new();
        for kind in victims {
            if self.used_mb() + needed <= self.max_ram_mb {
                break;
            }
            let slot = self.slot_mut(kind);
            slot.state = SlotState::Unloading;
            slot.loaded_at = None;
            slot.last_used = None;
            if let Some(resource) = slot.resource.take() {
                dropped.push((kind, resource));
            }
        }
        dropped
    }
}

/// Status snapshot of one slot, as surfaced over RPC.
#[derive(Debug, Clone, Serialize)]
pub struct SlotStatus {
    /// Slot name (`embedder` | `reranker`).
    pub slot: String,
    /// Configured model identifier.
    pub model: String,
    /// Keep-loaded policy.
    pub policy: KeepPolicy,
    /// Current lifecycle state.
    pub state: SlotState,
    /// Static memory estimate.
    pub memory_mb: u64,
    /// Unix seconds of the load, when loaded.
    pub loaded_at: Option<i64>,
    /// Unix seconds of the last use, when loaded.
    pub last_used: Option<i64>,
    /// Seconds since last use, when loaded.
    pub idle_seconds: Option<u64>,
}

/// Lifecycle controller for the model slots.
pub struct ModelManager {
    inner: Mutex<Inner>,
    cond: Condvar,
    loaders: ModelLoaders,
    acquire_timeout: Duration,
}

impl ModelManager {
    /// Creates a manager with the given configuration and loaders.
    #[must_use]
    pub fn new(config: ManagerConfig, loaders: ModelLoaders) -> Self {
        let mut slots = BTreeMap::new();
        slots.insert(SlotKind::Embedder, Slot::new(config.embedder));
        slots.insert(SlotKind::Reranker, Slot::new(config.reranker));

        Self {
            inner: Mutex::new(Inner {
                slots,
                max_ram_mb: config.max_ram_mb,
                eviction: config.eviction_policy,
                load_seq: 0,
            }),
            cond: Condvar::new(),
            loaders,
            acquire_timeout: config.acquire_timeout,
        }
    }

    /// Creates a manager with the production loaders.
    #[must_use]
    pub fn with_production_loaders(config: ManagerConfig) -> Self {
        Self::new(config, ModelLoaders::production())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|e| crate::Error::Busy(format!("manager lock poisoned: {e}")))
    }

    /// Loads every slot whose policy is `always`. Called at daemon
    /// start-up.
    ///
    /// # Errors
    ///
    /// Returns the first load failure.
    pub fn load_always_slots(self: &Arc<Self>) -> Result<()> {
        for kind in SlotKind::all() {
            let policy = self.lock()?.slot(kind).config.policy;
            if policy == KeepPolicy::Always {
                self.load(kind)?;
            }
        }
        Ok(())
    }

    /// Acquires the embedder, loading it if necessary.
    ///
    /// # Errors
    ///
    /// `ModelDisabled`, `ModelLoadFailed`, `MemoryBudgetExceeded`, or
    /// `DaemonBusy` if the slot stays busy past the acquire timeout.
    pub fn acquire_embedder(self: &Arc<Self>) -> Result<EmbedderHandle> {
        match self.acquire(SlotKind::Embedder)? {
            SlotResource::Embedder(resource) => Ok(EmbedderHandle {
                resource,
                manager: Arc::clone(self),
            }),
            SlotResource::Reranker(_) => Err(crate::Error::Model(ModelError::LoadFailed {
                slot: "embedder".to_string(),
                reason: "slot produced the wrong resource type".to_string(),
            })),
        }
    }

    /// Acquires the reranker, loading it if necessary.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`ModelManager::acquire_embedder`].
    pub fn acquire_reranker(self: &Arc<Self>) -> Result<RerankerHandle> {
        match self.acquire(SlotKind::Reranker)? {
            SlotResource::Reranker(resource) => Ok(RerankerHandle {
                resource,
                manager: Arc::clone(self),
            }),
            SlotResource::Embedder(_) => Err(crate::Error::Model(ModelError::LoadFailed {
                slot: "reranker".to_string(),
                reason: "slot produced the wrong resource type".to_string(),
            })),
        }
    }

    /// Ensures a slot is loaded without handing out a handle. Idempotent
    /// in the LOADED state (does not touch `last_used`).
    ///
    /// # Errors
    ///
    /// Same failure modes as acquire.
    pub fn load(self: &Arc<Self>, kind: SlotKind) -> Result<SlotStatus> {
        self.ensure_loaded(kind, false)?;
        let inner = self.lock()?;
        Ok(Self::slot_status(kind, inner.slot(kind)))
    }

    fn acquire(self: &Arc<Self>, kind: SlotKind) -> Result<SlotResource> {
        self.ensure_loaded(kind, true)?
            .ok_or_else(|| crate::Error::Busy(format!("slot '{kind}' yielded no resource")))
    }

    /// The single-flight core. With `for_use`, touches `last_used`,
    /// bumps the in-use count and returns the resource.
    fn ensure_loaded(self: &Arc<Self>, kind: SlotKind, for_use: bool) -> Result<Option<SlotResource>> {
        let deadline = Instant::now() + self.acquire_timeout;
        let mut inner = self.lock()?;

        loop {
            let slot = inner.slot_mut(kind);

            if slot.config.policy == KeepPolicy::Disabled {
                return Err(ModelError::Disabled {
                    slot: kind.as_str().to_string(),
                }
                .into());
            }

            match slot.state {
                SlotState::Loaded => {
                    let resource = slot.resource.clone();
                    if for_use {
                        slot.touch();
                        slot.in_use += 1;
                        return Ok(resource);
                    }
                    return Ok(None);
                }
                SlotState::Loading | SlotState::Unloading => {
                    let attempt = slot.attempt;
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(crate::Error::Busy(format!(
                            "timed out waiting for model slot '{kind}'"
                        )));
                    }

                    let (guard, _timeout) = self
                        .cond
                        .wait_timeout(inner, remaining)
                        .map_err(|e| crate::Error::Busy(format!("manager lock poisoned: {e}")))?;
                    inner = guard;

                    // A failed load wakes every waiter with the same error.
                    let slot = inner.slot(kind);
                    if slot.state == SlotState::Unloaded
                        && let Some((failed_attempt, reason)) = &slot.attempt_error
                        && *failed_attempt == attempt
                    {
                        return Err(ModelError::LoadFailed {
                            slot: kind.as_str().to_string(),
                            reason: reason.clone(),
                        }
                        .into());
                    }
                }
                SlotState::Unloaded => {
                    // Budget + eviction decision happens under the lock;
                    // the load itself must not.
                    let needed = slot.config.memory_estimate_mb;
                    let model_name = slot.config.model.clone();

                    let mut evicted = Vec::new();
                    if inner.used_mb() + needed > inner.max_ram_mb {
                        evicted = inner.evict_for(needed);
                        if inner.used_mb() + needed > inner.max_ram_mb {
                            // Roll the victims forward to UNLOADED before
                            // reporting failure.
                            let over = inner.used_mb() + needed;
                            let budget = inner.max_ram_mb;
                            for (victim, _) in &evicted {
                                inner.slot_mut(*victim).state = SlotState::Unloaded;
                            }
                            self.cond.notify_all();
                            drop(inner);
                            drop(evicted);
                            return Err(ModelError::BudgetExceeded {
                                needed_mb: over,
                                budget_mb: budget,
                            }
                            .into());
                        }
                    }

                    let slot = inner.slot_mut(kind);
                    slot.state = SlotState::Loading;
                    slot.attempt += 1;
                    let attempt = slot.attempt;
                    drop(inner);

                    // Free evicted models before loading the new one.
                    if !evicted.is_empty() {
                        for (victim, resource) in evicted {
                            info!(slot = %victim, "evicted model under memory pressure");
                            drop(resource);
                            let mut guard = self.lock()?;
                            guard.slot_mut(victim).state = SlotState::Unloaded;
                        }
                        self.cond.notify_all();
                    }

                    debug!(slot = %kind, model = %model_name, "loading model");
                    let loaded = Instant::now();
                    let result = self.load_resource(kind, &model_name);

                    inner = self.lock()?;
                    let seq = inner.load_seq;
                    inner.load_seq += 1;
                    let slot = inner.slot_mut(kind);
                    match result {
                        Ok(resource) => {
                            info!(
                                slot = %kind,
                                model = %model_name,
                                elapsed_ms = loaded.elapsed().as_millis() as u64,
                                "model loaded"
                            );
                            slot.state = SlotState::Loaded;
                            slot.resource = Some(resource);
                            let now = (Instant::now(), crate::core::current_timestamp());
                            slot.loaded_at = Some(now);
                            slot.last_used = Some(now);
                            slot.load_order = seq;
                            slot.attempt_error = None;
                            self.cond.notify_all();
                            // Loop back into the LOADED branch.
                        }
                        Err(e) => {
                            warn!(slot = %kind, model = %model_name, error = %e, "model load failed");
                            let reason = e.to_string();
                            slot.state = SlotState::Unloaded;
                            slot.resource = None;
                            slot.attempt_error = Some((attempt, reason.clone()));
                            self.cond.notify_all();
                            return Err(ModelError::LoadFailed {
                                slot: kind.as_str().to_string(),
                                reason,
                            }
                            .into());
                        }
                    }
                }
            }
        }
    }

    fn load_resource(&self, kind: SlotKind, model_name: &str) -> Result<SlotResource> {
        match kind {
            SlotKind::Embedder => Ok(SlotResource::Embedder((self.loaders.embedder)(model_name)?)),
            SlotKind::Reranker => Ok(SlotResource::Reranker((self.loaders.reranker)(model_name)?)),
        }
    }

    /// Unloads a slot. Unloading an UNLOADED slot is a no-op.
    ///
    /// # Errors
    ///
    /// `DaemonBusy` when the slot has outstanding handles or an
    /// in-flight load.
    pub fn unload(&self, kind: SlotKind) -> Result<()> {
        let mut inner = self.lock()?;
        let slot = inner.slot_mut(kind);

        match slot.state {
            SlotState::Unloaded | SlotState::Unloading => Ok(()),
            SlotState::Loading => Err(crate::Error::Busy(format!(
                "slot '{kind}' has a load in flight"
            ))),
            SlotState::Loaded => {
                if slot.in_use > 0 {
                    return Err(crate::Error::Busy(format!(
                        "slot '{kind}' is in use by {} request(s)",
                        slot.in_use
                    )));
                }
                slot.state = SlotState::Unloading;
                slot.loaded_at = None;
                slot.last_used = None;
                let resource = slot.resource.take();
                drop(inner);

                drop(resource);

                let mut inner = self.lock()?;
                inner.slot_mut(kind).state = SlotState::Unloaded;
                self.cond.notify_all();
                info!(slot = %kind, "model unloaded");
                Ok(())
            }
        }
    }

    /// Marks a handle released.
    fn release(&self, kind: SlotKind) {
        if let Ok(mut inner) = self.inner.lock() {
            let slot = inner.slot_mut(kind);
            slot.in_use = slot.in_use.saturating_sub(1);
            self.cond.notify_all();
        }
    }

    /// Unloads `on_demand` slots idle past their timeout. Returns how
    /// many were unloaded.
    ///
    /// # Errors
    ///
    /// Returns an error only if the manager lock is poisoned.
    pub fn sweep_idle(&self) -> Result<usize> {
        let mut inner = self.lock()?;
        let now = Instant::now();

        let mut victims = Vec::new();
        for kind in SlotKind::all() {
            let slot = inner.slot_mut(kind);
            let timeout = slot.config.idle_timeout;
            if slot.config.policy != KeepPolicy::OnDemand
                || slot.state != SlotState::Loaded
                || slot.in_use > 0
                || timeout.is_zero()
            {
                continue;
            }
            let idle_enough = slot
                .last_used
                .is_none_or(|(instant, _)| now.duration_since(instant) >= timeout);
            if idle_enough {
                slot.state = SlotState::Unloading;
                slot.loaded_at = None;
                slot.last_used = None;
                if let Some(resource) = slot.resource.take() {
                    victims.push((kind, resource));
                }
            }
        }
        drop(inner);

        // Unload decisions were taken under the lock; the drops happen
        // outside it.
        let count = victims.len();
        for (kind, resource) in victims {
            info!(slot = %kind, "idle model unloaded");
            drop(resource);
            let mut inner = self.lock()?;
            inner.slot_mut(kind).state = SlotState::Unloaded;
        }
        if count > 0 {
            self.cond.notify_all();
        }
        Ok(count)
    }

    /// Applies a new configuration: policies, idle timeouts, memory
    /// estimates, budget and eviction order. Model identity changes
    /// require a restart and are ignored with a warning.
    ///
    /// # Errors
    ///
    /// Returns an error only if the manager lock is poisoned.
    pub fn reload(&self, config: &ManagerConfig) -> Result<()> {
        let mut inner = self.lock()?;
        inner.max_ram_mb = config.max_ram_mb;
        inner.eviction = config.eviction_policy;

        let mut dropped = Vec::new();
        for kind in SlotKind::all() {
            let new = config.slot(kind);
            let slot = inner.slot_mut(kind);
            if new.model != slot.config.model {
                warn!(
                    slot = %kind,
                    old = %slot.config.model,
                    new = %new.model,
                    "model identity change requires restart; keeping loaded model"
                );
            }
            let model = slot.config.model.clone();
            slot.config = SlotConfig {
                model,
                ..new.clone()
            };

            // A slot disabled by the new config unloads now (if free).
            if slot.config.policy == KeepPolicy::Disabled
                && slot.state == SlotState::Loaded
                && slot.in_use == 0
            {
                slot.state = SlotState::Unloading;
                slot.loaded_at = None;
                slot.last_used = None;
                if let Some(resource) = slot.resource.take() {
                    dropped.push((kind, resource));
                }
            }
        }

        // A shrunken budget evicts on_demand residents until it fits.
        if inner.used_mb() > inner.max_ram_mb {
            let evicted = inner.evict_for(0);
            dropped.extend(evicted);
        }
        drop(inner);

        for (kind, resource) in dropped {
            info!(slot = %kind, "model unloaded by config reload");
            drop(resource);
            let mut inner = self.lock()?;
            inner.slot_mut(kind).state = SlotState::Unloaded;
        }
        self.cond.notify_all();
        Ok(())
    }

    /// Per-slot status snapshots, in canonical slot order.
    ///
    /// # Errors
    ///
    /// Returns an error only if the manager lock is poisoned.
    pub fn status(&self) -> Result<Vec<SlotStatus>> {
        let inner = self.lock()?;
        Ok(SlotKind::all()
            .iter()
            .map(|kind| Self::slot_status(*kind, inner.slot(*kind)))
            .collect())
    }

    /// Sum of memory estimates of LOADED slots.
    ///
    /// # Errors
    ///
    /// Returns an error only if the manager lock is poisoned.
    pub fn loaded_memory_mb(&self) -> Result<u64> {
        let inner = self.lock()?;
        Ok(inner
            .slots
            .values()
            .filter(|s| s.state == SlotState::Loaded)
            .map(|s| s.config.memory_estimate_mb)
            .sum())
    }

    /// The configured memory budget.
    ///
    /// # Errors
    ///
    /// Returns an error only if the manager lock is poisoned.
    pub fn max_memory_mb(&self) -> Result<u64> {
        Ok(self.lock()?.max_ram_mb)
    }

    fn slot_status(kind: SlotKind, slot: &Slot) -> SlotStatus {
        let idle_seconds = slot
            .last_used
            .map(|(instant, _)| instant.elapsed().as_secs());
        SlotStatus {
            slot: kind.as_str().to_string(),
            model: slot.config.model.clone(),
            policy: slot.config.policy,
            state: slot.state,
            memory_mb: slot.config.memory_estimate_mb,
            loaded_at: slot.loaded_at.map(|(_, ts)| ts),
            last_used: slot.last_used.map(|(_, ts)| ts),
            idle_seconds,
        }
    }

    /// Spawns the idle-sweeper thread.
    #[must_use]
    pub fn spawn_idle_sweeper(manager: Arc<Self>, period: Duration) -> IdleSweeper {
        let shutdown = Arc::new((Mutex::new(false), Condvar::new()));
        let thread_shutdown = Arc::clone(&shutdown);

        let handle = std::thread::Builder::new()
            .name("model-idle-sweeper".to_string())
            .spawn(move || {
                let (flag, cond) = &*thread_shutdown;
                loop {
                    {
                        let Ok(guard) = flag.lock() else { return };
                        let Ok((guard, _)) = cond.wait_timeout(guard, period) else {
                            return;
                        };
                        if *guard {
                            return;
                        }
                    }
                    match manager.sweep_idle() {
                        Ok(0) => {}
                        Ok(n) => debug!(count = n, "idle sweep unloaded models"),
                        Err(e) => warn!(error = %e, "idle sweep failed"),
                    }
                }
            })
            .ok();

        IdleSweeper { handle, shutdown }
    }
}

/// Handle to the dedicated idle-sweeper thread; stops it on drop.
pub struct IdleSweeper {
    handle: Option<std::thread::JoinHandle<()>>,
    shutdown: Arc<(Mutex<bool>, Condvar)>,
}

impl Drop for IdleSweeper {
    fn drop(&mut self) {
        let (flag, cond) = &*self.shutdown;
        if let Ok(mut guard) = flag.lock() {
            *guard = true;
        }
        cond.notify_all();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// RAII handle to the loaded embedder. Blocks eviction while held.
pub struct EmbedderHandle {
    resource: Arc<dyn Embedder>,
    manager: Arc<ModelManager>,
}

impl Deref for EmbedderHandle {
    type Target = dyn Embedder;

    fn deref(&self) -> &Self::Target {
        self.resource.as_ref()
    }
}

impl Drop for EmbedderHandle {
    fn drop(&mut self) {
        self.manager.release(SlotKind::Embedder);
    }
}

/// RAII handle to the loaded reranker. Blocks eviction while held.
pub struct RerankerHandle {
    resource: Arc<dyn Reranker>,
    manager: Arc<ModelManager>,
}

impl Deref for RerankerHandle {
    type Target = dyn Reranker;

    fn deref(&self) -> &Self::Target {
        self.resource.as_ref()
    }
}

impl Drop for RerankerHandle {
    fn drop(&mut self) {
        self.manager.release(SlotKind::Reranker);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{FallbackEmbedder, FallbackReranker};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn slot_config(policy: KeepPolicy, memory_mb: u64) -> SlotConfig {
        SlotConfig {
            model: "test-model".to_string(),
            policy,
            idle_timeout: Duration::from_secs(0),
            memory_estimate_mb: memory_mb,
        }
    }

    fn config(embedder: SlotConfig, reranker: SlotConfig, max_ram_mb: u64) -> ManagerConfig {
        ManagerConfig {
            embedder,
            reranker,
            max_ram_mb,
            eviction_policy: EvictionPolicy::Lru,
            acquire_timeout: Duration::from_secs(5),
        }
    }

    fn counting_loaders(count: Arc<AtomicUsize>) -> ModelLoaders {
        ModelLoaders {
            embedder: Box::new(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
                // Simulate real load latency so concurrent acquires overlap.
                std::thread::sleep(Duration::from_millis(30));
                Ok(Arc::new(FallbackEmbedder::new(8)))
            }),
            reranker: Box::new(|_| Ok(Arc::new(FallbackReranker::new()))),
        }
    }

    fn manager(config: ManagerConfig, loaders: ModelLoaders) -> Arc<ModelManager> {
        Arc::new(ModelManager::new(config, loaders))
    }

    #[test]
    fn test_acquire_loads_once_and_reuses() {
        let count = Arc::new(AtomicUsize::new(0));
        let mgr = manager(
            config(
                slot_config(KeepPolicy::OnDemand, 100),
                slot_config(KeepPolicy::OnDemand, 100),
                1000,
            ),
            counting_loaders(Arc::clone(&count)),
        );

        let handle = mgr.acquire_embedder().unwrap();
        assert_eq!(handle.dimensions(), 8);
        drop(handle);

        let _again = mgr.acquire_embedder().unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_single_flight_concurrent_acquires() {
        let count = Arc::new(AtomicUsize::new(0));
        let mgr = manager(
            config(
                slot_config(KeepPolicy::OnDemand, 100),
                slot_config(KeepPolicy::OnDemand, 100),
                1000,
            ),
            counting_loaders(Arc::clone(&count)),
        );

        let threads: Vec<_> = (0..50)
            .map(|_| {
                let mgr = Arc::clone(&mgr);
                std::thread::spawn(move || {
                    let handle = mgr.acquire_embedder().unwrap();
                    handle.embed("hello").unwrap().len()
                })
            })
            .collect();

        for thread in threads {
            assert_eq!(thread.join().unwrap(), 8);
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_disabled_slot_rejected() {
        let mgr = manager(
            config(
                slot_config(KeepPolicy::Disabled, 100),
                slot_config(KeepPolicy::OnDemand, 100),
                1000,
            ),
            counting_loaders(Arc::new(AtomicUsize::new(0))),
        );

        let result = mgr.acquire_embedder();
        assert!(matches!(
            result,
            Err(crate::Error::Model(ModelError::Disabled { .. }))
        ));
    }

    #[test]
    fn test_load_failure_shared_and_retryable() {
        let fail_once = Arc::new(AtomicBool::new(true));
        let fail_flag = Arc::clone(&fail_once);
        let loaders = ModelLoaders {
            embedder: Box::new(move |_| {
                if fail_flag.swap(false, Ordering::SeqCst) {
                    std::thread::sleep(Duration::from_millis(20));
                    Err(crate::Error::Io("model file corrupt".to_string()))
                } else {
                    Ok(Arc::new(FallbackEmbedder::new(8)))
                }
            }),
            reranker: Box::new(|_| Ok(Arc::new(FallbackReranker::new()))),
        };
        let mgr = manager(
            config(
                slot_config(KeepPolicy::OnDemand, 100),
                slot_config(KeepPolicy::OnDemand, 100),
                1000,
            ),
            loaders,
        );

        // Two concurrent acquires share the single failed attempt.
        let waiter = {
            let mgr = Arc::clone(&mgr);
            std::thread::spawn(move || mgr.acquire_embedder().map(|_| ()))
        };
        let first = mgr.acquire_embedder().map(|_| ());
        let second = waiter.join().unwrap();

        let failures = [first, second]
            .into_iter()
            .filter(|r| {
                matches!(
                    r,
                    Err(crate::Error::Model(ModelError::LoadFailed { .. }))
                )
            })
            .count();
        assert!(failures >= 1, "at least the loading thread must fail");

        // The slot returned to UNLOADED; the next request retries and wins.
        let handle = mgr.acquire_embedder().unwrap();
        assert_eq!(handle.dimensions(), 8);
    }

    #[test]
    fn test_lru_eviction_under_budget() {
        let mgr = manager(
            config(
                slot_config(KeepPolicy::OnDemand, 300),
                slot_config(KeepPolicy::OnDemand, 300),
                500,
            ),
            counting_loaders(Arc::new(AtomicUsize::new(0))),
        );

        // Load X (embedder), then request Y (reranker): X must be evicted.
        drop(mgr.acquire_embedder().unwrap());
        drop(mgr.acquire_reranker().unwrap());

        let status = mgr.status().unwrap();
        let embedder = status.iter().find(|s| s.slot == "embedder").unwrap();
        let reranker = status.iter().find(|s| s.slot == "reranker").unwrap();
        assert_eq!(embedder.state, SlotState::Unloaded);
        assert_eq!(reranker.state, SlotState::Loaded);
        assert_eq!(mgr.loaded_memory_mb().unwrap(), 300);
    }

    #[test]
    fn test_in_use_slot_not_evicted() {
        let mgr = manager(
            config(
                slot_config(KeepPolicy::OnDemand, 300),
                slot_config(KeepPolicy::OnDemand, 300),
                500,
            ),
            counting_loaders(Arc::new(AtomicUsize::new(0))),
        );

        let held = mgr.acquire_embedder().unwrap();
        let result = mgr.acquire_reranker();
        assert!(matches!(
            result,
            Err(crate::Error::Model(ModelError::BudgetExceeded { .. }))
        ));
        drop(held);

        // Once released, the eviction can proceed.
        drop(mgr.acquire_reranker().unwrap());
        let status = mgr.status().unwrap();
        let embedder = status.iter().find(|s| s.slot == "embedder").unwrap();
        assert_eq!(embedder.state, SlotState::Unloaded);
    }

    #[test]
    fn test_budget_exceeded_when_nothing_evictable() {
        let mgr = manager(
            config(
                slot_config(KeepPolicy::OnDemand, 600),
                slot_config(KeepPolicy::OnDemand, 100),
                500,
            ),
            counting_loaders(Arc::new(AtomicUsize::new(0))),
        );

        let result = mgr.acquire_embedder();
        assert!(matches!(
            result,
            Err(crate::Error::Model(ModelError::BudgetExceeded { .. }))
        ));
    }

    #[test]
    fn test_always_slot_never_evicted() {
        let mgr = manager(
            config(
                slot_config(KeepPolicy::Always, 300),
                slot_config(KeepPolicy::OnDemand, 300),
                500,
            ),
            counting_loaders(Arc::new(AtomicUsize::new(0))),
        );

        mgr.load_always_slots().unwrap();
        let result = mgr.acquire_reranker();
        assert!(matches!(
            result,
            Err(crate::Error::Model(ModelError::BudgetExceeded { .. }))
        ));

        let status = mgr.status().unwrap();
        let embedder = status.iter().find(|s| s.slot == "embedder").unwrap();
        assert_eq!(embedder.state, SlotState::Loaded);
    }

    #[test]
    fn test_load_is_idempotent_when_loaded() {
        let count = Arc::new(AtomicUsize::new(0));
        let mgr = manager(
            config(
                slot_config(KeepPolicy::OnDemand, 100),
                slot_config(KeepPolicy::OnDemand, 100),
                1000,
            ),
            counting_loaders(Arc::clone(&count)),
        );

        let first = mgr.load(SlotKind::Embedder).unwrap();
        let second = mgr.load(SlotKind::Embedder).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(first.state, SlotState::Loaded);
        assert_eq!(second.state, SlotState::Loaded);
        assert_eq!(first.memory_mb, second.memory_mb);
        assert_eq!(first.loaded_at, second.loaded_at);
        assert_eq!(first.last_used, second.last_used);
    }

    #[test]
    fn test_unload_and_reload() {
        let mgr = manager(
            config(
                slot_config(KeepPolicy::OnDemand, 100),
                slot_config(KeepPolicy::OnDemand, 100),
                1000,
            ),
            counting_loaders(Arc::new(AtomicUsize::new(0))),
        );

        mgr.load(SlotKind::Embedder).unwrap();
        mgr.unload(SlotKind::Embedder).unwrap();
        // Unloading an unloaded slot is a no-op.
        mgr.unload(SlotKind::Embedder).unwrap();

        let status = mgr.status().unwrap();
        assert_eq!(status[0].state, SlotState::Unloaded);
    }

    #[test]
    fn test_unload_in_use_is_busy() {
        let mgr = manager(
            config(
                slot_config(KeepPolicy::OnDemand, 100),
                slot_config(KeepPolicy::OnDemand, 100),
                1000,
            ),
            counting_loaders(Arc::new(AtomicUsize::new(0))),
        );

        let handle = mgr.acquire_embedder().unwrap();
        assert!(matches!(
            mgr.unload(SlotKind::Embedder),
            Err(crate::Error::Busy(_))
        ));
        drop(handle);
        mgr.unload(SlotKind::Embedder).unwrap();
    }

    #[test]
    fn test_idle_sweep() {
        let mut embedder = slot_config(KeepPolicy::OnDemand, 100);
        embedder.idle_timeout = Duration::from_millis(5);
        // Zero timeout exempts the reranker from sweeping.
        let reranker = slot_config(KeepPolicy::OnDemand, 100);

        let mgr = manager(
            config(embedder, reranker, 1000),
            counting_loaders(Arc::new(AtomicUsize::new(0))),
        );

        drop(mgr.acquire_embedder().unwrap());
        drop(mgr.acquire_reranker().unwrap());

        std::thread::sleep(Duration::from_millis(20));
        let swept = mgr.sweep_idle().unwrap();
        assert_eq!(swept, 1);

        let status = mgr.status().unwrap();
        let embedder = status.iter().find(|s| s.slot == "embedder").unwrap();
        let reranker = status.iter().find(|s| s.slot == "reranker").unwrap();
        assert_eq!(embedder.state, SlotState::Unloaded);
        assert_eq!(reranker.state, SlotState::Loaded);
    }

    #[test]
    fn test_sweeper_thread_lifecycle() {
        let mut embedder = slot_config(KeepPolicy::OnDemand, 100);
        embedder.idle_timeout = Duration::from_millis(1);
        let mgr = manager(
            config(embedder, slot_config(KeepPolicy::OnDemand, 100), 1000),
            counting_loaders(Arc::new(AtomicUsize::new(0))),
        );

        drop(mgr.acquire_embedder().unwrap());
        let sweeper =
            ModelManager::spawn_idle_sweeper(Arc::clone(&mgr), Duration::from_millis(5));

        // The sweeper should unload the embedder within a few periods.
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            let state = mgr.status().unwrap()[0].state;
            if state == SlotState::Unloaded {
                break;
            }
            assert!(Instant::now() < deadline, "sweeper never fired");
            std::thread::sleep(Duration::from_millis(5));
        }
        drop(sweeper);
    }

    #[test]
    fn test_reload_disables_and_unloads() {
        let mgr = manager(
            config(
                slot_config(KeepPolicy::OnDemand, 100),
                slot_config(KeepPolicy::OnDemand, 100),
                1000,
            ),
            counting_loaders(Arc::new(AtomicUsize::new(0))),
        );

        mgr.load(SlotKind::Embedder).unwrap();

        let new_config = config(
            slot_config(KeepPolicy::Disabled, 100),
            slot_config(KeepPolicy::OnDemand, 100),
            1000,
        );
        mgr.reload(&new_config).unwrap();

        let status = mgr.status().unwrap();
        assert_eq!(status[0].state, SlotState::Unloaded);
        assert!(matches!(
            mgr.acquire_embedder(),
            Err(crate::Error::Model(ModelError::Disabled { .. }))
        ));
    }

    #[test]
    fn test_reload_keeps_model_identity() {
        let mgr = manager(
            config(
                slot_config(KeepPolicy::OnDemand, 100),
                slot_config(KeepPolicy::OnDemand, 100),
                1000,
            ),
            counting_loaders(Arc::new(AtomicUsize::new(0))),
        );

        let mut new_config = config(
            slot_config(KeepPolicy::OnDemand, 200),
            slot_config(KeepPolicy::OnDemand, 100),
            1000,
        );
        new_config.embedder.model = "some-other-model".to_string();
        mgr.reload(&new_config).unwrap();

        let status = mgr.status().unwrap();
        // The estimate updated, the identity did not.
        assert_eq!(status[0].memory_mb, 200);
        assert_eq!(status[0].model, "test-model");
    }

    #[test]
    fn test_status_shape() {
        let mgr = manager(
            config(
                slot_config(KeepPolicy::OnDemand, 100),
                slot_config(KeepPolicy::Disabled, 50),
                1000,
            ),
            counting_loaders(Arc::new(AtomicUsize::new(0))),
        );

        let status = mgr.status().unwrap();
        assert_eq!(status.len(), 2);
        assert_eq!(status[0].slot, "embedder");
        assert_eq!(status[0].state, SlotState::Unloaded);
        assert!(status[0].loaded_at.is_none());
        assert_eq!(status[1].slot, "reranker");
        assert_eq!(status[1].policy, KeepPolicy::Disabled);
        assert_eq!(mgr.max_memory_mb().unwrap(), 1000);
    }
}
