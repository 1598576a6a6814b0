//! Model lifecycle manager — loads, evicts and tracks resident models.
//!
//! # Concurrency
//!
//! Each device has a decision lock (an async mutex) that serializes every
//! load decision, eviction and registration on that device. Memory is
//! re-read under the lock immediately before a decision, so two requests
//! can never both conclude there is room for them.
//!
//! Engine construction runs *outside* the lock on a bounded worker pool,
//! protected by a [`Reservation`] that counts against the device until the
//! handle is committed. A reservation that is dropped uncommitted (timeout,
//! construction error, or the caller going away) removes itself.
//!
//! `touch` never takes the decision lock: access times are atomics on the
//! handle, advanced from a strictly monotonic clock.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;
use switchyard_config::OrchestratorConfig;
use switchyard_core::engine::{EngineLoader, Generation, InferenceEngine};
use switchyard_core::error::{EngineError, OrchestratorError};
use switchyard_core::gpu::GpuSnapshot;
use switchyard_core::model::{DeviceId, ModelDescriptor};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::gpu::GpuResourceTracker;
use crate::registry::ModelRegistry;

/// Memory-policy knobs for load decisions.
#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    pub max_models_per_gpu: usize,
    pub safety_buffer_fraction: f64,
    pub min_safety_buffer_mb: u64,
    pub peak_multiplier: f64,
    pub max_concurrent_loads: usize,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self::from(&OrchestratorConfig::default())
    }
}

impl From<&OrchestratorConfig> for LifecycleSettings {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            max_models_per_gpu: config.max_models_per_gpu,
            safety_buffer_fraction: config.safety_buffer_fraction,
            min_safety_buffer_mb: config.min_safety_buffer_mb,
            peak_multiplier: config.peak_multiplier,
            max_concurrent_loads: config.max_concurrent_loads,
        }
    }
}

impl LifecycleSettings {
    /// `max(free * fraction, min_buffer)`
    pub fn safety_buffer_mb(&self, free_mb: u64) -> f64 {
        (free_mb as f64 * self.safety_buffer_fraction).max(self.min_safety_buffer_mb as f64)
    }

    /// Stated requirement scaled for inference-time peaks.
    pub fn required_effective_mb(&self, required_mb: u64) -> f64 {
        required_mb as f64 * self.peak_multiplier
    }

    /// Memory left for a new model once the buffer is held back.
    pub fn usable_mb(&self, free_mb: u64) -> f64 {
        (free_mb as f64 - self.safety_buffer_mb(free_mb)).max(0.0)
    }

    pub fn fits(&self, free_mb: u64, required_mb: u64) -> bool {
        free_mb as f64 - self.safety_buffer_mb(free_mb) >= self.required_effective_mb(required_mb)
    }
}

// ── Access clock ───────────────────────────────────────────────────────

/// Strictly increasing microsecond ticks since the manager was created.
struct AccessClock {
    origin: Instant,
    last: AtomicU64,
}

impl AccessClock {
    fn new() -> Self {
        Self {
            origin: Instant::now(),
            last: AtomicU64::new(0),
        }
    }

    fn tick(&self) -> u64 {
        let now = self.origin.elapsed().as_micros() as u64;
        let mut prev = self.last.load(Ordering::Relaxed);
        loop {
            let next = now.max(prev + 1);
            match self
                .last
                .compare_exchange_weak(prev, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return next,
                Err(actual) => prev = actual,
            }
        }
    }
}

// ── Loaded handle ──────────────────────────────────────────────────────

/// A resident model. Owned by the manager; callers hold shared references.
pub struct LoadedModel {
    descriptor: Arc<ModelDescriptor>,
    engine: Arc<dyn InferenceEngine>,
    loaded_at: DateTime<Utc>,
    load_tick: u64,
    last_access: AtomicU64,
}

impl LoadedModel {
    fn new(descriptor: Arc<ModelDescriptor>, engine: Arc<dyn InferenceEngine>, tick: u64) -> Self {
        Self {
            descriptor,
            engine,
            loaded_at: Utc::now(),
            load_tick: tick,
            last_access: AtomicU64::new(tick),
        }
    }

    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    pub fn device(&self) -> DeviceId {
        self.descriptor.device
    }

    pub fn descriptor(&self) -> &Arc<ModelDescriptor> {
        &self.descriptor
    }

    pub fn engine(&self) -> &Arc<dyn InferenceEngine> {
        &self.engine
    }

    /// Wall-clock load time, for display.
    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    /// Monotonic tick of the load.
    pub fn load_tick(&self) -> u64 {
        self.load_tick
    }

    /// Monotonic tick of the most recent access.
    pub fn last_access(&self) -> u64 {
        self.last_access.load(Ordering::Acquire)
    }

    fn touch(&self, tick: u64) {
        self.last_access.fetch_max(tick, Ordering::AcqRel);
    }

    /// Run a generation on this model's engine.
    pub async fn generate(&self, prompt: &str, max_tokens: u32) -> Result<Generation, EngineError> {
        self.engine.generate(prompt, max_tokens).await
    }
}

impl std::fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModel")
            .field("id", &self.descriptor.id)
            .field("device", &self.descriptor.device)
            .field("load_tick", &self.load_tick)
            .field("last_access", &self.last_access())
            .finish()
    }
}

// ── Per-device bookkeeping ─────────────────────────────────────────────

#[derive(Default)]
struct DeviceBook {
    loaded: HashMap<String, Arc<LoadedModel>>,
    /// In-flight constructions: model id → required MB
    pending: HashMap<String, u64>,
}

impl DeviceBook {
    fn occupied(&self) -> usize {
        self.loaded.len() + self.pending.len()
    }

    fn accounted_mb(&self) -> u64 {
        self.loaded.values().map(|m| m.descriptor.required_mb).sum()
    }

    fn accounted_mb_except(&self, model_id: &str) -> u64 {
        self.loaded
            .values()
            .filter(|m| m.id() != model_id)
            .map(|m| m.descriptor.required_mb)
            .sum()
    }

    fn pending_mb(&self) -> u64 {
        self.pending.values().sum()
    }

    /// Smallest last access wins; ties go to the earliest load.
    fn lru_victim(&self, exclude: &str) -> Option<Arc<LoadedModel>> {
        self.loaded
            .values()
            .filter(|m| m.id() != exclude)
            .min_by_key(|m| (m.last_access(), m.load_tick))
            .cloned()
    }
}

struct DeviceSlot {
    device: DeviceId,
    decision: Mutex<()>,
    book: RwLock<DeviceBook>,
}

impl DeviceSlot {
    fn new(device: DeviceId) -> Self {
        Self {
            device,
            decision: Mutex::new(()),
            book: RwLock::new(DeviceBook::default()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, DeviceBook> {
        self.book.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, DeviceBook> {
        self.book.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Capacity held for a model while its engine is being constructed.
struct Reservation {
    slot: Arc<DeviceSlot>,
    model_id: String,
    armed: bool,
}

impl Reservation {
    fn new(slot: Arc<DeviceSlot>, model_id: &str, required_mb: u64) -> Self {
        slot.write().pending.insert(model_id.to_string(), required_mb);
        Self {
            slot,
            model_id: model_id.to_string(),
            armed: true,
        }
    }

    /// Swap the reservation for a registered handle.
    fn commit(mut self, handle: Arc<LoadedModel>) {
        let mut book = self.slot.write();
        book.pending.remove(&self.model_id);
        book.loaded.insert(self.model_id.clone(), handle);
        self.armed = false;
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.armed {
            self.slot.write().pending.remove(&self.model_id);
            debug!(model = %self.model_id, device = self.slot.device, "Reservation rolled back");
        }
    }
}

/// Aborts the wrapped task when dropped.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

// ── Manager ────────────────────────────────────────────────────────────

/// Loads and unloads models under GPU memory and per-device count limits.
///
/// One instance owns its own registry of loaded handles; independent
/// managers can coexist (e.g. in tests).
pub struct ModelLifecycleManager {
    registry: Arc<ModelRegistry>,
    tracker: GpuResourceTracker,
    loader: Arc<dyn EngineLoader>,
    settings: LifecycleSettings,
    slots: HashMap<DeviceId, Arc<DeviceSlot>>,
    /// Serializes concurrent loads of the same model id
    gates: HashMap<String, Arc<Mutex<()>>>,
    workers: Arc<Semaphore>,
    /// Per-device model cap; starts at `settings.max_models_per_gpu`
    max_models: AtomicUsize,
    clock: AccessClock,
}

impl ModelLifecycleManager {
    pub fn new(
        registry: Arc<ModelRegistry>,
        tracker: GpuResourceTracker,
        loader: Arc<dyn EngineLoader>,
        settings: LifecycleSettings,
    ) -> Self {
        let slots = registry
            .devices()
            .into_iter()
            .map(|d| (d, Arc::new(DeviceSlot::new(d))))
            .collect();
        let gates = registry
            .iter()
            .map(|d| (d.id.clone(), Arc::new(Mutex::new(()))))
            .collect();
        let workers = Arc::new(Semaphore::new(settings.max_concurrent_loads.max(1)));
        let max_models = AtomicUsize::new(settings.max_models_per_gpu.max(1));

        Self {
            registry,
            tracker,
            loader,
            settings,
            slots,
            gates,
            workers,
            max_models,
            clock: AccessClock::new(),
        }
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub fn tracker(&self) -> &GpuResourceTracker {
        &self.tracker
    }

    pub fn settings(&self) -> &LifecycleSettings {
        &self.settings
    }

    fn slot(&self, device: DeviceId) -> Option<&Arc<DeviceSlot>> {
        self.slots.get(&device)
    }

    /// The resident handle for a model, if loaded.
    pub fn get(&self, model_id: &str) -> Option<Arc<LoadedModel>> {
        let descriptor = self.registry.get(model_id)?;
        let slot = self.slot(descriptor.device)?;
        let book = slot.read();
        book.loaded.get(model_id).cloned()
    }

    pub fn is_loaded(&self, model_id: &str) -> bool {
        self.get(model_id).is_some()
    }

    /// Loaded models on one device, least recently used first.
    pub fn loaded_on(&self, device: DeviceId) -> Vec<Arc<LoadedModel>> {
        let Some(slot) = self.slot(device) else {
            return Vec::new();
        };
        let mut models: Vec<_> = slot.read().loaded.values().cloned().collect();
        models.sort_by_key(|m| (m.last_access(), m.load_tick));
        models
    }

    /// Every loaded model, least recently used first per device.
    pub fn loaded_models(&self) -> Vec<Arc<LoadedModel>> {
        self.registry
            .devices()
            .into_iter()
            .flat_map(|d| self.loaded_on(d))
            .collect()
    }

    /// MB currently held by in-flight constructions on a device.
    pub fn reserved_mb(&self, device: DeviceId) -> u64 {
        self.slot(device).map(|s| s.read().pending_mb()).unwrap_or(0)
    }

    /// Mark a model as just used. Returns false if it is not loaded.
    pub fn touch(&self, model_id: &str) -> bool {
        match self.get(model_id) {
            Some(handle) => {
                handle.touch(self.clock.tick());
                true
            }
            None => false,
        }
    }

    /// Return a loaded handle for `model_id`, loading (and evicting) as
    /// needed.
    pub async fn load(&self, model_id: &str) -> Result<Arc<LoadedModel>, OrchestratorError> {
        let descriptor = self
            .registry
            .get(model_id)
            .ok_or_else(|| OrchestratorError::ModelNotFound(model_id.to_string()))?;

        if let Some(handle) = self.get(model_id) {
            handle.touch(self.clock.tick());
            debug!(model = %model_id, "Model already loaded");
            return Ok(handle);
        }

        let gate = self
            .gates
            .get(model_id)
            .cloned()
            .ok_or_else(|| OrchestratorError::ModelNotFound(model_id.to_string()))?;
        let _gate = gate.lock().await;

        // Another caller may have finished loading while we waited.
        if let Some(handle) = self.get(model_id) {
            handle.touch(self.clock.tick());
            return Ok(handle);
        }

        let slot = self
            .slot(descriptor.device)
            .cloned()
            .ok_or_else(|| OrchestratorError::ModelNotFound(model_id.to_string()))?;

        let reservation = self.reserve(&slot, &descriptor).await?;
        self.construct(&slot, descriptor, reservation).await
    }

    /// Decide under the device lock whether the model fits, evicting LRU
    /// models until it does, and reserve its capacity.
    async fn reserve(
        &self,
        slot: &Arc<DeviceSlot>,
        descriptor: &Arc<ModelDescriptor>,
    ) -> Result<Reservation, OrchestratorError> {
        let _decision = slot.decision.lock().await;
        let device = slot.device;
        let required_mb = descriptor.required_mb;

        let mut snapshot = self.tracker.snapshot(device).await?;

        // What the device would offer with every other model evicted: memory
        // held outside the manager stays held.
        let ceiling = {
            let book = slot.read();
            available_mb(&snapshot, &book) + book.accounted_mb_except(&descriptor.id)
        };
        if !self.settings.fits(ceiling, required_mb) {
            warn!(
                model = %descriptor.id,
                device,
                total_mb = snapshot.total_mb,
                free_mb = snapshot.free_mb,
                ceiling_mb = ceiling,
                required_mb,
                "Model cannot fit on device even after full eviction"
            );
            return Err(self.exhausted(descriptor, ceiling));
        }

        let cap = self.max_models_per_gpu();
        if !self
            .evict_to_cap(slot, cap.saturating_sub(1), &descriptor.id)
            .await
            .is_empty()
        {
            snapshot = self.tracker.snapshot(device).await?;
        }

        loop {
            let (available, occupied) = {
                let book = slot.read();
                (available_mb(&snapshot, &book), book.occupied())
            };

            if occupied >= cap {
                warn!(
                    model = %descriptor.id,
                    device,
                    occupied,
                    cap,
                    "Device at its model cap with nothing evictable"
                );
                return Err(self.exhausted(descriptor, available));
            }
            if self.settings.fits(available, required_mb) {
                debug!(
                    model = %descriptor.id,
                    device,
                    available_mb = available,
                    required_effective_mb = self.settings.required_effective_mb(required_mb),
                    "Capacity reserved"
                );
                return Ok(Reservation::new(slot.clone(), &descriptor.id, required_mb));
            }

            let victim = slot.read().lru_victim(&descriptor.id);
            match victim {
                Some(victim) => {
                    info!(
                        model = %descriptor.id,
                        evicted = %victim.id(),
                        device,
                        available_mb = available,
                        "Evicting least recently used model for memory"
                    );
                    self.release(slot, &victim).await;
                    snapshot = self.tracker.snapshot(device).await?;
                }
                None => {
                    warn!(
                        model = %descriptor.id,
                        device,
                        available_mb = available,
                        "No evictable model left"
                    );
                    return Err(self.exhausted(descriptor, available));
                }
            }
        }
    }

    fn exhausted(&self, descriptor: &ModelDescriptor, free_mb: u64) -> OrchestratorError {
        OrchestratorError::ResourceExhausted {
            model: descriptor.id.clone(),
            device: descriptor.device,
            required_mb: self.settings.required_effective_mb(descriptor.required_mb).ceil() as u64,
            available_mb: self.settings.usable_mb(free_mb) as u64,
        }
    }

    /// Build the engine on a worker under the descriptor's timeout, then
    /// register it.
    async fn construct(
        &self,
        slot: &Arc<DeviceSlot>,
        descriptor: Arc<ModelDescriptor>,
        reservation: Reservation,
    ) -> Result<Arc<LoadedModel>, OrchestratorError> {
        let model_id = descriptor.id.clone();
        let timeout = descriptor.load_timeout();

        let permit = self
            .workers
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| OrchestratorError::LoadFailed {
                model: model_id.clone(),
                reason: "load worker pool closed".into(),
            })?;

        let loader = self.loader.clone();
        let task_descriptor = descriptor.clone();
        let mut task = AbortOnDrop(tokio::spawn(async move {
            let _permit = permit;
            loader.load(&task_descriptor).await
        }));

        let started = Instant::now();
        let engine = match tokio::time::timeout(timeout, &mut task.0).await {
            Ok(Ok(Ok(engine))) => engine,
            Ok(Ok(Err(e))) => {
                warn!(model = %model_id, error = %e, "Engine construction failed");
                return Err(OrchestratorError::LoadFailed {
                    model: model_id,
                    reason: e.to_string(),
                });
            }
            Ok(Err(join_err)) => {
                warn!(model = %model_id, error = %join_err, "Engine construction task died");
                return Err(OrchestratorError::LoadFailed {
                    model: model_id,
                    reason: join_err.to_string(),
                });
            }
            Err(_) => {
                warn!(
                    model = %model_id,
                    timeout_secs = timeout.as_secs(),
                    "Engine construction timed out, rolling back"
                );
                return Err(OrchestratorError::LoadTimeout {
                    model: model_id,
                    timeout_secs: timeout.as_secs(),
                });
            }
        };

        let handle = Arc::new(LoadedModel::new(descriptor, engine, self.clock.tick()));
        {
            let _decision = slot.decision.lock().await;
            reservation.commit(handle.clone());
        }

        info!(
            model = %model_id,
            device = slot.device,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Model loaded"
        );
        Ok(handle)
    }

    /// Remove a handle from the book and release its engine. Caller holds
    /// the device decision lock.
    async fn release(&self, slot: &DeviceSlot, handle: &Arc<LoadedModel>) {
        let removed = slot.write().loaded.remove(handle.id());
        if let Some(model) = removed {
            self.loader
                .unload(&model.descriptor, model.engine.clone())
                .await;
        }
    }

    /// Unload a model. Idempotent: returns false when it was not loaded.
    pub async fn unload(&self, model_id: &str) -> bool {
        let Some(descriptor) = self.registry.get(model_id) else {
            return false;
        };
        let Some(slot) = self.slot(descriptor.device) else {
            return false;
        };

        let _decision = slot.decision.lock().await;
        let removed = slot.write().loaded.remove(model_id);
        match removed {
            Some(model) => {
                self.loader
                    .unload(&model.descriptor, model.engine.clone())
                    .await;
                info!(model = %model_id, device = slot.device, "Model unloaded");
                true
            }
            None => false,
        }
    }

    /// Evict LRU models on `device` until it is within the per-device cap.
    /// Returns the evicted ids in eviction order.
    pub async fn enforce_limit(&self, device: DeviceId) -> Vec<String> {
        let Some(slot) = self.slot(device) else {
            return Vec::new();
        };
        let _decision = slot.decision.lock().await;
        self.evict_to_cap(slot, self.max_models_per_gpu(), "").await
    }

    /// Current per-device model cap.
    pub fn max_models_per_gpu(&self) -> usize {
        self.max_models.load(Ordering::Acquire)
    }

    /// Change the per-device cap at runtime and trim every device to it.
    /// Returns the evicted ids.
    pub async fn set_max_models_per_gpu(&self, cap: usize) -> Vec<String> {
        let cap = cap.max(1);
        let previous = self.max_models.swap(cap, Ordering::AcqRel);
        info!(previous, cap, "Per-device model cap changed");

        let mut evicted = Vec::new();
        for device in self.registry.devices() {
            evicted.extend(self.enforce_limit(device).await);
        }
        evicted
    }

    /// Evict LRU models, never `exclude`, until at most `limit` slots are
    /// occupied. In-flight loads count but cannot be evicted. Caller holds
    /// the device decision lock.
    async fn evict_to_cap(&self, slot: &DeviceSlot, limit: usize, exclude: &str) -> Vec<String> {
        let mut evicted = Vec::new();
        loop {
            let victim = {
                let book = slot.read();
                if book.occupied() <= limit {
                    None
                } else {
                    book.lru_victim(exclude)
                }
            };
            let Some(victim) = victim else { break };
            info!(
                evicted = %victim.id(),
                device = slot.device,
                limit,
                "Evicting least recently used model to honor the per-device cap"
            );
            evicted.push(victim.id().to_string());
            self.release(slot, &victim).await;
        }
        evicted
    }

    /// Unload everything, e.g. on shutdown. Devices release in parallel.
    pub async fn unload_all(&self) {
        let loaded = self.loaded_models();
        let released = join_all(loaded.iter().map(|model| self.unload(model.id()))).await;
        info!(
            released = released.into_iter().filter(|r| *r).count(),
            "All models unloaded"
        );
    }
}

/// Memory usable for a new reservation: the smaller of what the probe sees
/// and what committed loads leave, minus in-flight reservations.
fn available_mb(snapshot: &GpuSnapshot, book: &DeviceBook) -> u64 {
    let by_accounting = snapshot.total_mb.saturating_sub(book.accounted_mb());
    snapshot
        .free_mb
        .min(by_accounting)
        .saturating_sub(book.pending_mb())
}
