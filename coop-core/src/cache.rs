//! Self-persisting, self-refreshing memory caches.
//!
//! A [`MemoryCache`] owns one value, optionally writes it through its
//! connector on a fixed interval, optionally replaces it from storage on a
//! fixed interval, and optionally expires itself after a lifespan. The
//! lifecycle is one-way: `ALIVE → DEAD`, entered by an explicit
//! [`MemoryCache::kill`] or by lifespan expiry. A dead cache answers every
//! `get` with `None` and has cancelled its scheduled tasks.
//!
//! The cache swaps an `Arc<T>` slot and never touches the value itself;
//! callers that mutate a shared value concurrently bring their own locks
//! (the registry types in this crate carry them internally), because a
//! scheduled read can replace the slot at any time.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::connector::StorageConnector;
use crate::error::Result;
use crate::sched::{Scheduler, TaskHandle};

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Configures the schedules of a [`MemoryCache`].
///
/// All intervals are in milliseconds; zero disables the schedule.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheBuilder {
    lifespan_ms: u64,
    write_ms: u64,
    read_ms: u64,
}

impl CacheBuilder {
    /// Start a builder with every schedule disabled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Kill the cache this many milliseconds after construction.
    #[must_use]
    pub fn lifespan_ms(mut self, millis: u64) -> Self {
        self.lifespan_ms = millis;
        self
    }

    /// Write the current value through the connector at this fixed rate.
    #[must_use]
    pub fn write_ms(mut self, millis: u64) -> Self {
        self.write_ms = millis;
        self
    }

    /// Replace the value from storage at this fixed rate (last-read-wins).
    #[must_use]
    pub fn read_ms(mut self, millis: u64) -> Self {
        self.read_ms = millis;
        self
    }

    /// Build a cache around `initial`, persisted through `connector`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build<T: Send + Sync + 'static>(
        self,
        initial: T,
        connector: StorageConnector<T>,
        scheduler: &Scheduler,
    ) -> MemoryCache<T> {
        MemoryCache::start(self, Arc::new(initial), Some(connector), scheduler)
    }

    /// Build a cache around a value that other components already share.
    ///
    /// The scheduled write flushes the live shared value; a scheduled read
    /// would replace only the cache's own slot, so pair this constructor
    /// with write-only schedules.
    pub fn build_shared<T: Send + Sync + 'static>(
        self,
        value: Arc<T>,
        connector: StorageConnector<T>,
        scheduler: &Scheduler,
    ) -> MemoryCache<T> {
        MemoryCache::start(self, value, Some(connector), scheduler)
    }

    /// Build a cache with no connector.
    ///
    /// Write/read intervals are ignored (with a logged warning) since there
    /// is nowhere to persist to; the lifespan still applies.
    pub fn build_detached<T: Send + Sync + 'static>(
        self,
        initial: T,
        scheduler: &Scheduler,
    ) -> MemoryCache<T> {
        if self.write_ms > 0 || self.read_ms > 0 {
            warn!(
                write_ms = self.write_ms,
                read_ms = self.read_ms,
                "detached cache has no connector; write/read schedules ignored"
            );
        }
        MemoryCache::start(self, Arc::new(initial), None, scheduler)
    }
}

// ---------------------------------------------------------------------------
// MemoryCache
// ---------------------------------------------------------------------------

struct CacheInner<T> {
    slot: RwLock<Option<Arc<T>>>,
    alive: AtomicBool,
    connector: Option<StorageConnector<T>>,
    tasks: Mutex<Vec<TaskHandle>>,
}

impl<T> CacheInner<T> {
    fn alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    fn kill(&self) {
        if self.alive.swap(false, Ordering::AcqRel) {
            *self.slot.write() = None;
            for task in self.tasks.lock().drain(..) {
                task.cancel();
            }
            debug!("memory cache killed");
        }
    }

    /// Replace the slot, unless the cache died in the meantime.
    fn replace(&self, value: T) {
        let mut slot = self.slot.write();
        if self.alive() {
            *slot = Some(Arc::new(value));
        }
    }
}

/// A periodically persisted, periodically refreshed in-memory value.
///
/// Cloning the cache clones a handle to the same value and lifecycle.
pub struct MemoryCache<T> {
    inner: Arc<CacheInner<T>>,
}

impl<T> Clone for MemoryCache<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for MemoryCache<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCache")
            .field("alive", &self.inner.alive())
            .finish_non_exhaustive()
    }
}

impl<T: Send + Sync + 'static> MemoryCache<T> {
    /// Start building a cache.
    #[must_use]
    pub fn builder() -> CacheBuilder {
        CacheBuilder::new()
    }

    fn start(
        config: CacheBuilder,
        initial: Arc<T>,
        connector: Option<StorageConnector<T>>,
        scheduler: &Scheduler,
    ) -> Self {
        let inner = Arc::new(CacheInner {
            slot: RwLock::new(Some(initial)),
            alive: AtomicBool::new(true),
            connector,
            tasks: Mutex::new(Vec::new()),
        });
        let cache = Self { inner };

        let mut tasks = Vec::new();

        if config.lifespan_ms > 0 {
            let weak = Arc::downgrade(&cache.inner);
            tasks.push(scheduler.schedule_once(
                Duration::from_millis(config.lifespan_ms),
                async move {
                    if let Some(inner) = weak.upgrade() {
                        inner.kill();
                    }
                },
            ));
        }

        if config.write_ms > 0 {
            if let Some(connector) = cache.inner.connector.clone() {
                let weak = Arc::downgrade(&cache.inner);
                tasks.push(scheduler.schedule_fixed_rate(
                    Duration::from_millis(config.write_ms),
                    move || {
                        let weak = weak.clone();
                        let connector = connector.clone();
                        async move {
                            let Some(inner) = weak.upgrade() else { return };
                            if !inner.alive() {
                                return;
                            }
                            let snapshot = inner.slot.read().clone();
                            if let Some(value) = snapshot {
                                if let Err(error) = connector.write(Some(&*value)).wait().await {
                                    // Best-effort caching: the next cycle is
                                    // the retry.
                                    warn!(
                                        path = connector.path(),
                                        %error,
                                        "scheduled cache write failed"
                                    );
                                }
                            }
                        }
                    },
                ));
            }
        }

        if config.read_ms > 0 {
            if let Some(connector) = cache.inner.connector.clone() {
                let weak = Arc::downgrade(&cache.inner);
                tasks.push(scheduler.schedule_fixed_rate(
                    Duration::from_millis(config.read_ms),
                    move || {
                        let weak = weak.clone();
                        let connector = connector.clone();
                        async move {
                            let Some(inner) = weak.upgrade() else { return };
                            if !inner.alive() {
                                return;
                            }
                            match connector.read().await {
                                Ok(Some(value)) => inner.replace(value),
                                Ok(None) => debug!(
                                    path = connector.path(),
                                    "scheduled cache read found nothing; keeping current value"
                                ),
                                Err(error) => warn!(
                                    path = connector.path(),
                                    %error,
                                    "scheduled cache read failed; keeping current value"
                                ),
                            }
                        }
                    },
                ));
            }
        }

        *cache.inner.tasks.lock() = tasks;
        cache
    }

    /// The current value, or `None` once the cache is dead.
    #[must_use]
    pub fn get(&self) -> Option<Arc<T>> {
        if !self.inner.alive() {
            return None;
        }
        self.inner.slot.read().clone()
    }

    /// Fetch the value, optionally forcing a write and/or a refreshing read
    /// through the connector first.
    ///
    /// `force_read` replaces the in-memory value with the freshly loaded
    /// one when storage has something at the path.
    ///
    /// # Errors
    ///
    /// Propagates connector errors from the forced operations.
    pub async fn get_synced(&self, force_write: bool, force_read: bool) -> Result<Option<Arc<T>>> {
        if !self.inner.alive() {
            return Ok(None);
        }
        if let Some(connector) = &self.inner.connector {
            if force_write {
                let snapshot = self.inner.slot.read().clone();
                if let Some(value) = snapshot {
                    connector.write(Some(&*value)).wait().await?;
                }
            }
            if force_read {
                if let Some(value) = connector.read().await? {
                    self.inner.replace(value);
                }
            }
        }
        Ok(self.get())
    }

    /// Kill the cache: drop the value and cancel its scheduled tasks.
    ///
    /// Idempotent; only this cache's own tasks are cancelled.
    pub fn kill(&self) {
        self.inner.kill();
    }

    /// Whether the cache is still alive.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.inner.alive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
