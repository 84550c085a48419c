//! The chunk cache controller: the only object callers talk to.
//!
//! `fetch` checks the store, records a placeholder on a miss and dispatches
//! one load job, all under a single lock, so two callers racing on the same
//! key can never start two loads. Jobs fill the placeholder under the same
//! lock and then publish a [`ChunkLoaded`] event.
//!
//! A placeholder evicted while its job is still running stays in the
//! in-flight table; the next `fetch` for that key puts the same placeholder
//! back instead of starting another load.

use ahash::AHashMap;
use mapview_common::ChunkKey;
use parking_lot::{Mutex, RwLock};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::budget::{chunk_footprint, viewport_budget, CacheBudget, MemoryProbe};
use crate::chunk::{Chunk, ChunkView, Section};
use crate::config::CacheConfig;
use crate::events::{self, ChunkEvents, ChunkLoaded, EventSink};
use crate::executor::Executor;
use crate::job::{ChunkLoader, LoadJob, LoadOutcome};
use crate::store::CacheStore;

/// Everything guarded by the cache lock.
#[derive(Debug)]
struct CacheState {
    store: CacheStore,
    /// Placeholders whose load job has not finished yet
    in_flight: AHashMap<ChunkKey, Arc<Chunk>>,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    pending_hits: AtomicU64,
    misses: AtomicU64,
    readmitted: AtomicU64,
    loads_dispatched: AtomicU64,
    loads_completed: AtomicU64,
    load_failures: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// State shared between the controller and its load jobs.
#[derive(Debug)]
pub(crate) struct Shared {
    state: Mutex<CacheState>,
    events: EventSink,
    counters: Counters,
}

impl Shared {
    /// Fills `target` under the lock, then notifies listeners.
    pub(crate) fn complete(
        &self,
        key: ChunkKey,
        target: &Arc<Chunk>,
        sections: Vec<Section>,
        outcome: LoadOutcome,
    ) {
        {
            let mut state = self.state.lock();
            if !target.fill(sections) {
                warn!(chunk = %key, "Chunk was already filled, discarding second load");
            }
            if state
                .in_flight
                .get(&key)
                .is_some_and(|pending| Arc::ptr_eq(pending, target))
            {
                state.in_flight.remove(&key);
            }
        }

        Counters::bump(&self.counters.loads_completed);
        if outcome == LoadOutcome::Failed {
            Counters::bump(&self.counters.load_failures);
        }
        self.events.publish(ChunkLoaded { x: key.x, z: key.z });
    }
}

/// Point-in-time cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Fetches that returned a loaded chunk
    pub hits: u64,
    /// Fetches that found a load already in flight
    pub pending_hits: u64,
    /// Fetches that found nothing resident
    pub misses: u64,
    /// Misses served by re-admitting an evicted in-flight placeholder
    pub readmitted: u64,
    /// Load jobs handed to the executor
    pub loads_dispatched: u64,
    /// Load jobs that finished (including failures)
    pub loads_completed: u64,
    /// Load jobs whose loader failed or panicked
    pub load_failures: u64,
    /// Entries evicted to stay within budget
    pub evictions: u64,
    /// Notifications folded into an identical pending one, or sent to no receiver
    pub dropped_events: u64,
    /// Resident chunks
    pub resident: usize,
    /// Current cost of resident chunks
    pub current_cost: usize,
    /// Current budget
    pub max_cost: usize,
    /// Loads not yet finished
    pub in_flight: usize,
}

impl CacheStats {
    /// Fraction of fetches served from the cache (0.0 to 1.0).
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.pending_hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Serves cached chunks and loads missing ones in the background.
pub struct ChunkCacheController {
    shared: Arc<Shared>,
    executor: Arc<dyn Executor>,
    loader: Arc<dyn ChunkLoader>,
    path: RwLock<PathBuf>,
    max_cache: usize,
}

impl ChunkCacheController {
    /// Creates a controller sized from available memory.
    ///
    /// Returns the controller and the receiver for its notifications.
    pub fn new(
        config: &CacheConfig,
        loader: Arc<dyn ChunkLoader>,
        executor: Arc<dyn Executor>,
        probe: &dyn MemoryProbe,
    ) -> (Self, ChunkEvents) {
        let budget = CacheBudget::from_probe(
            probe,
            chunk_footprint(config.section_footprint_bytes),
            config.fallback_budget,
        );
        let (controller, events) =
            Self::with_budget(budget, config.event_capacity, loader, executor);
        controller.set_path(config.resolved_storage_root());
        if let Some((width, height)) = config.initial_viewport {
            controller.adapt_cache_to_window(width, height);
        }
        (controller, events)
    }

    /// Creates a controller with an explicit budget.
    pub fn with_budget(
        budget: CacheBudget,
        event_capacity: usize,
        loader: Arc<dyn ChunkLoader>,
        executor: Arc<dyn Executor>,
    ) -> (Self, ChunkEvents) {
        let (sink, events) = events::channel(event_capacity);
        let shared = Arc::new(Shared {
            state: Mutex::new(CacheState {
                store: CacheStore::new(budget.initial),
                in_flight: AHashMap::new(),
            }),
            events: sink,
            counters: Counters::default(),
        });
        let controller = Self {
            shared,
            executor,
            loader,
            path: RwLock::new(PathBuf::new()),
            max_cache: budget.ceiling,
        };
        (controller, events)
    }

    /// Returns the chunk at `(x, z)` if it is loaded.
    ///
    /// `None` means "not ready": a load is in flight or was just started.
    /// Poll again after the matching [`ChunkLoaded`] event.
    pub fn fetch(&self, x: i32, z: i32) -> Option<ChunkView> {
        self.fetch_key(ChunkKey::new(x, z))
    }

    /// Key-based form of [`fetch`](Self::fetch).
    pub fn fetch_key(&self, key: ChunkKey) -> Option<ChunkView> {
        let counters = &self.shared.counters;
        let target = {
            let mut state = self.shared.state.lock();
            if let Some(chunk) = state.store.get(key) {
                if chunk.is_loaded() {
                    Counters::bump(&counters.hits);
                    return Some(ChunkView::new(chunk));
                }
                Counters::bump(&counters.pending_hits);
                return None;
            }

            Counters::bump(&counters.misses);
            if let Some(pending) = state.in_flight.get(&key).cloned() {
                Counters::bump(&counters.readmitted);
                state.store.reinsert(pending);
                return None;
            }

            let chunk = state.store.insert_placeholder(key);
            state.in_flight.insert(key, Arc::clone(&chunk));
            chunk
        };

        self.dispatch(key, target);
        None
    }

    fn dispatch(&self, key: ChunkKey, target: Arc<Chunk>) {
        let job = LoadJob::new(
            key,
            self.path(),
            target,
            Arc::clone(&self.loader),
            Arc::clone(&self.shared),
        );
        Counters::bump(&self.shared.counters.loads_dispatched);
        debug!(chunk = %key, "Dispatching chunk load");
        self.executor.execute(Box::new(move || job.run()));
    }

    /// Sets the storage root used by future loads.
    ///
    /// Cached chunks are kept, even those loaded from a previous root.
    pub fn set_path(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        info!("Chunk storage root set to {}", path.display());
        *self.path.write() = path;
    }

    /// Returns the storage root.
    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.path.read().clone()
    }

    /// Resizes the budget for a viewport of the given pixel size.
    ///
    /// Returns the budget applied, capped at [`max_cache`](Self::max_cache).
    pub fn adapt_cache_to_window(&self, width_px: u32, height_px: u32) -> usize {
        let budget = viewport_budget(width_px, height_px).min(self.max_cache);
        debug!(width_px, height_px, budget, "Adapting chunk cache to window");
        self.set_max_cost(budget);
        budget
    }

    /// Updates the budget, evicting immediately if it shrank.
    pub fn set_max_cost(&self, max_cost: usize) {
        let evicted = self.shared.state.lock().store.set_max_cost(max_cost);
        if evicted > 0 {
            debug!(max_cost, evicted, "Evicted chunks after budget change");
        }
    }

    /// Waits for the loads dispatched before the call, then empties the cache.
    ///
    /// Loads dispatched by concurrent fetches while waiting are not waited
    /// for; their placeholders stay in the in-flight table and are
    /// re-admitted on the next fetch. A load that never returns blocks the
    /// caller forever. Views handed out earlier remain valid.
    pub fn clear(&self) {
        info!(in_flight = self.executor.in_flight(), "Clearing chunk cache");
        self.executor.wait_submitted();
        let mut state = self.shared.state.lock();
        state.store.clear();
    }

    /// Absolute ceiling for viewport-derived budgets.
    #[must_use]
    pub const fn max_cache(&self) -> usize {
        self.max_cache
    }

    /// Current budget.
    #[must_use]
    pub fn max_cost(&self) -> usize {
        self.shared.state.lock().store.max_cost()
    }

    /// Number of resident chunks, loaded or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.state.lock().store.len()
    }

    /// Returns whether no chunk is resident.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns whether a chunk (loaded or placeholder) is resident.
    #[must_use]
    pub fn is_resident(&self, x: i32, z: i32) -> bool {
        self.shared.state.lock().store.contains(ChunkKey::new(x, z))
    }

    /// Snapshot of the cache statistics.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let counters = &self.shared.counters;
        let state = self.shared.state.lock();
        CacheStats {
            hits: counters.hits.load(Ordering::Relaxed),
            pending_hits: counters.pending_hits.load(Ordering::Relaxed),
            misses: counters.misses.load(Ordering::Relaxed),
            readmitted: counters.readmitted.load(Ordering::Relaxed),
            loads_dispatched: counters.loads_dispatched.load(Ordering::Relaxed),
            loads_completed: counters.loads_completed.load(Ordering::Relaxed),
            load_failures: counters.load_failures.load(Ordering::Relaxed),
            evictions: state.store.evictions(),
            dropped_events: self.shared.events.dropped(),
            resident: state.store.len(),
            current_cost: state.store.current_cost(),
            max_cost: state.store.max_cost(),
            in_flight: state.in_flight.len(),
        }
    }
}

impl std::fmt::Debug for ChunkCacheController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkCacheController")
            .field("path", &*self.path.read())
            .field("max_cache", &self.max_cache)
            .finish_non_exhaustive()
    }
}
