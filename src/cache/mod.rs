//! Caching layer — an in-memory read-through cache with background refresh.
//!
//! [`Cache`] stores values in a bounded LRU map and loads missing ones through
//! a [`Fetcher`]. Every entry moves through three states as it ages (see
//! [`Freshness`]):
//!
//! | State     | Age                                  | `get` behaviour                          |
//! |-----------|--------------------------------------|------------------------------------------|
//! | `Fresh`   | `< fresh_ttl`                        | return the value                         |
//! | `Stale`   | `< fresh_ttl + stale_ttl`            | return the value, enqueue a refresh      |
//! | `Expired` | beyond that                          | fetch synchronously, like a miss         |
//!
//! ## Side effects of a lookup
//!
//! - **Network I/O**: a miss or an expired entry awaits the origin, bounded by
//!   the configured fetch timeout. Concurrent misses for one key share a
//!   single fetch.
//! - **Background work**: a stale hit enqueues at most one refresh per key on
//!   the refresh worker pool. A full queue never blocks the caller; the stale
//!   value is still returned.
//! - **Locking**: the store, the in-flight map and the pending-refresh set are
//!   guarded by short synchronous locks that are never held across an
//!   `.await`.

use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use lru::LruCache;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::background::{QueueError, QueueStats, TaskQueue};
use crate::config::{CacheConfig, ConfigError};
use crate::fetch::{FetchError, Fetcher};

mod entry;
mod refresh;
mod stats;

pub use entry::{Freshness, Lookup};
pub use stats::CacheStats;

use entry::Entry;
use refresh::{RefreshJob, Refresher};
use stats::Counters;

/// Errors produced by cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("invalid cache configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("no Tokio runtime available to run refresh workers: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),

    #[error("fetching {key} failed: {source}")]
    Fetch {
        key: String,
        #[source]
        source: FetchError,
    },

    #[error("fetching {key} timed out after {after:?}")]
    Timeout { key: String, after: Duration },

    #[error("refresh queue is full")]
    QueueFull,

    #[error("refresh queue is closed")]
    Closed,
}

impl CacheError {
    /// Whether retrying the failed operation later could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Fetch { source, .. } => source.is_transient(),
            Self::Timeout { .. } | Self::QueueFull => true,
            Self::Config(_) | Self::NoRuntime(_) | Self::Closed => false,
        }
    }
}

impl<J> From<QueueError<J>> for CacheError {
    fn from(err: QueueError<J>) -> Self {
        match err {
            QueueError::Full(_) => Self::QueueFull,
            QueueError::Closed(_) => Self::Closed,
        }
    }
}

/// A thread-safe read-through cache with stale-while-refresh semantics.
///
/// `Cache` is not `Clone`; share it behind an [`Arc`]. Dropping it stops the
/// refresh workers once they have drained their queue; call
/// [`shutdown`](Self::shutdown) to wait for that.
///
/// # Examples
///
/// ```
/// use freshcache::{Cache, CacheConfig, Lookup, fetch::FetchError};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let origin = |key: u64| async move { Ok::<_, FetchError>(key * key) };
///     let cache = Cache::new(origin, CacheConfig::default())?;
///
///     assert_eq!(cache.get(&12).await?, Lookup::Loaded(144));
///     assert_eq!(cache.get(&12).await?, Lookup::Fresh(144));
///     Ok(())
/// }
/// ```
pub struct Cache<K, V> {
    shared: Arc<Shared<K, V>>,
    refresher: TaskQueue<RefreshJob<K>>,
}

/// State shared between callers and refresh workers.
pub(crate) struct Shared<K, V> {
    store: Mutex<LruCache<K, Entry<V>>>,
    /// Per-key gates serializing synchronous loads.
    inflight: Mutex<HashMap<K, Arc<AsyncMutex<()>>>>,
    /// Keys with a refresh queued or running.
    pub(crate) pending: Mutex<HashSet<K>>,
    fetcher: Box<dyn Fetcher<K, V>>,
    config: CacheConfig,
    pub(crate) counters: Counters,
}

impl<K, V> Cache<K, V>
where
    K: Clone + Eq + Hash + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Creates a cache in front of `fetcher` and starts its refresh workers.
    ///
    /// # Errors
    ///
    /// - [`CacheError::Config`] if `config` fails validation.
    /// - [`CacheError::NoRuntime`] if called outside a Tokio runtime.
    pub fn new<F>(fetcher: F, config: CacheConfig) -> Result<Self, CacheError>
    where
        F: Fetcher<K, V>,
    {
        config.validate()?;
        tokio::runtime::Handle::try_current()?;

        let capacity = NonZeroUsize::new(config.capacity)
            .ok_or_else(|| ConfigError::Invalid("capacity must be greater than zero".into()))?;
        let queue_config = config.refresh.queue_config();

        let shared = Arc::new(Shared {
            store: Mutex::new(LruCache::new(capacity)),
            inflight: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashSet::new()),
            fetcher: Box::new(fetcher),
            config,
            counters: Counters::default(),
        });
        let refresher = TaskQueue::start(
            Refresher {
                shared: Arc::clone(&shared),
            },
            queue_config,
        );

        info!(
            capacity = shared.config.capacity,
            fresh_ttl = ?shared.config.fresh_ttl(),
            stale_ttl = ?shared.config.stale_ttl(),
            "cache ready"
        );
        Ok(Self { shared, refresher })
    }

    /// Looks up `key`, loading or refreshing it as its freshness requires.
    ///
    /// - Fresh entry → [`Lookup::Fresh`], no I/O.
    /// - Stale entry → [`Lookup::Stale`]; a background refresh is enqueued
    ///   unless one is already pending for `key`.
    /// - Missing or expired entry → the origin is fetched before returning,
    ///   giving [`Lookup::Loaded`], or [`Lookup::Absent`] if the origin has no
    ///   such key.
    ///
    /// # Errors
    ///
    /// [`CacheError::Fetch`] or [`CacheError::Timeout`] when a synchronous
    /// fetch fails. Background refresh failures are never reported here.
    pub async fn get(&self, key: &K) -> Result<Lookup<V>, CacheError> {
        match self.shared.lookup(key) {
            Some((value, Freshness::Fresh)) => {
                Counters::bump(&self.shared.counters.hits);
                debug!(key = ?key, "cache hit");
                Ok(Lookup::Fresh(value))
            }
            Some((value, _)) => {
                Counters::bump(&self.shared.counters.stale_hits);
                debug!(key = ?key, "stale hit — requesting refresh");
                if let Err(e) = self.enqueue_refresh(key, false) {
                    warn!(key = ?key, error = %e, "refresh not scheduled — serving stale value");
                }
                Ok(Lookup::Stale(value))
            }
            None => {
                Counters::bump(&self.shared.counters.misses);
                debug!(key = ?key, "cache miss — loading from origin");
                self.shared.load(key).await
            }
        }
    }

    /// Returns the stored value and its freshness without any I/O, refresh,
    /// or LRU promotion. Expired entries are reported as `None`.
    pub fn peek(&self, key: &K) -> Option<(V, Freshness)> {
        self.shared.peek(key)
    }

    /// Stores `value` as if it had just been fetched.
    pub fn insert(&self, key: K, value: V) {
        self.shared.store_value(key, value);
    }

    /// Removes `key`, returning `true` if it was present.
    pub fn invalidate(&self, key: &K) -> bool {
        self.shared.remove(key)
    }

    /// Removes every entry. Pending refreshes still run and may repopulate.
    pub fn clear(&self) {
        self.shared.store.lock().clear();
    }

    /// Requests a background refetch of `key`, even if its entry is fresh or
    /// missing.
    ///
    /// Does nothing if a refresh for `key` is already pending.
    ///
    /// # Errors
    ///
    /// [`CacheError::QueueFull`] or [`CacheError::Closed`] if the refresh
    /// could not be enqueued.
    pub fn refresh(&self, key: &K) -> Result<(), CacheError> {
        self.enqueue_refresh(key, true)
    }

    /// Number of stored entries, including expired ones not yet reclaimed.
    pub fn len(&self) -> usize {
        self.shared.store.lock().len()
    }

    /// Returns `true` if no entries are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the cache counters.
    pub fn stats(&self) -> CacheStats {
        self.shared.counters.snapshot()
    }

    /// Snapshot of the refresh worker pool counters.
    pub fn queue_stats(&self) -> QueueStats {
        self.refresher.stats()
    }

    /// The configuration this cache was built with.
    pub fn config(&self) -> &CacheConfig {
        &self.shared.config
    }

    /// Stops accepting refreshes and waits for queued ones to finish.
    pub async fn shutdown(self) {
        self.refresher.shutdown().await;
    }

    fn enqueue_refresh(&self, key: &K, force: bool) -> Result<(), CacheError> {
        if !self.shared.pending.lock().insert(key.clone()) {
            debug!(key = ?key, "refresh already pending");
            return Ok(());
        }

        let job = RefreshJob {
            key: key.clone(),
            force,
        };
        match self.refresher.try_enqueue(job) {
            Ok(()) => {
                Counters::bump(&self.shared.counters.refreshes_enqueued);
                debug!(key = ?key, force, "refresh enqueued");
                Ok(())
            }
            Err(e) => {
                self.shared.pending.lock().remove(key);
                Counters::bump(&self.shared.counters.refreshes_dropped);
                Err(e.into())
            }
        }
    }
}

impl<K, V> Shared<K, V>
where
    K: Clone + Eq + Hash + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn classify(&self, entry: &Entry<V>) -> Freshness {
        entry.freshness(Instant::now(), self.config.fresh_ttl(), self.config.max_age())
    }

    /// Servable value for `key`, promoting it in the LRU order. Expired
    /// entries are removed.
    fn lookup(&self, key: &K) -> Option<(V, Freshness)> {
        let mut store = self.store.lock();
        let freshness = self.classify(store.get(key)?);
        if freshness.is_servable() {
            store.peek(key).map(|entry| (entry.value.clone(), freshness))
        } else {
            store.pop(key);
            None
        }
    }

    pub(crate) fn peek(&self, key: &K) -> Option<(V, Freshness)> {
        let store = self.store.lock();
        let entry = store.peek(key)?;
        let freshness = self.classify(entry);
        freshness
            .is_servable()
            .then(|| (entry.value.clone(), freshness))
    }

    pub(crate) fn store_value(&self, key: K, value: V) {
        let displaced = self.store.lock().push(key.clone(), Entry::new(value));
        if let Some((old_key, _)) = displaced {
            if old_key != key {
                Counters::bump(&self.counters.evictions);
                debug!(evicted = ?old_key, "capacity reached — evicted least recently used entry");
            }
        }
    }

    pub(crate) fn remove(&self, key: &K) -> bool {
        self.store.lock().pop(key).is_some()
    }

    /// Fetches `key` from the origin under the configured timeout.
    /// `Ok(None)` means the origin does not have the key.
    pub(crate) async fn fetch(&self, key: &K) -> Result<Option<V>, CacheError> {
        let timeout = self.config.fetch_timeout();
        match tokio::time::timeout(timeout, self.fetcher.fetch(key)).await {
            Ok(Ok(value)) => Ok(Some(value)),
            Ok(Err(FetchError::NotFound)) => Ok(None),
            Ok(Err(source)) => Err(CacheError::Fetch {
                key: format!("{key:?}"),
                source,
            }),
            Err(_) => Err(CacheError::Timeout {
                key: format!("{key:?}"),
                after: timeout,
            }),
        }
    }

    /// Synchronous load with single-flight: callers racing on the same key
    /// queue behind one gate, and whoever gets through after a successful
    /// load reuses the stored value instead of fetching again.
    async fn load(&self, key: &K) -> Result<Lookup<V>, CacheError> {
        // The slot exists before the wait so a caller dropped while queued
        // still releases its hold on the gate.
        let mut slot = LoadSlot {
            shared: self,
            key,
            gate: self.gate_for(key),
            permit: None,
        };
        slot.permit = Some(Arc::clone(&slot.gate).lock_owned().await);

        if let Some((value, Freshness::Fresh)) = self.peek(key) {
            debug!(key = ?key, "loaded by a concurrent caller");
            return Ok(Lookup::Fresh(value));
        }

        let started = Instant::now();
        match self.fetch(key).await {
            Ok(Some(value)) => {
                self.store_value(key.clone(), value.clone());
                Counters::bump(&self.counters.loads);
                debug!(key = ?key, elapsed = ?started.elapsed(), "loaded from origin");
                Ok(Lookup::Loaded(value))
            }
            Ok(None) => {
                self.remove(key);
                Counters::bump(&self.counters.loads);
                debug!(key = ?key, "origin has no such key");
                Ok(Lookup::Absent)
            }
            Err(e) => {
                Counters::bump(&self.counters.load_failures);
                warn!(key = ?key, error = %e, "load from origin failed");
                Err(e)
            }
        }
    }

    fn gate_for(&self, key: &K) -> Arc<AsyncMutex<()>> {
        let mut inflight = self.inflight.lock();
        Arc::clone(inflight.entry(key.clone()).or_default())
    }
}

/// Holds a key's load gate; the last holder removes the gate from the
/// in-flight map, including when the load future is dropped midway.
struct LoadSlot<'a, K, V>
where
    K: Eq + Hash,
{
    shared: &'a Shared<K, V>,
    key: &'a K,
    gate: Arc<AsyncMutex<()>>,
    permit: Option<OwnedMutexGuard<()>>,
}

impl<K, V> Drop for LoadSlot<'_, K, V>
where
    K: Eq + Hash,
{
    fn drop(&mut self) {
        let mut inflight = self.shared.inflight.lock();
        drop(self.permit.take());
        // Map + this slot: nobody else holds or waits on the gate.
        let last = inflight
            .get(self.key)
            .is_some_and(|g| Arc::ptr_eq(g, &self.gate) && Arc::strong_count(&self.gate) == 2);
        if last {
            inflight.remove(self.key);
        }
    }
}

/// Looks up `key` and writes a usable value into `out`.
///
/// Returns `true` when `out` was written: the entry was fresh, stale (a
/// background refresh is then enqueued), or was fetched from the origin during
/// this call. Returns `false`, leaving `out` untouched, when the origin has
/// no such key or the fetch failed or timed out; the reason is logged.
///
/// # Side effects
///
/// - May perform network I/O if the entry is missing or expired.
/// - May enqueue background work to refresh a stale entry.
/// - Takes internal locks briefly; none are held while waiting on the origin.
///
/// # Examples
///
/// ```
/// use freshcache::{Cache, CacheConfig, cache_get, fetch::FetchError};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let origin = |key: String| async move {
///         match key.as_str() {
///             "answer" => Ok(42),
///             _ => Err(FetchError::NotFound),
///         }
///     };
///     let cache = Cache::new(origin, CacheConfig::default())?;
///
///     let mut out = 0;
///     assert!(cache_get(&cache, &"answer".to_string(), &mut out).await);
///     assert_eq!(out, 42);
///
///     let mut missing = -1;
///     assert!(!cache_get(&cache, &"question".to_string(), &mut missing).await);
///     assert_eq!(missing, -1);
///     Ok(())
/// }
/// ```
pub async fn cache_get<K, V>(cache: &Cache<K, V>, key: &K, out: &mut V) -> bool
where
    K: Clone + Eq + Hash + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    match cache.get(key).await {
        Ok(lookup) => match lookup.into_value() {
            Some(value) => {
                *out = value;
                true
            }
            None => {
                debug!(key = ?key, "no usable value — origin has no such key");
                false
            }
        },
        Err(e) => {
            warn!(key = ?key, error = %e, "no usable value");
            false
        }
    }
}
