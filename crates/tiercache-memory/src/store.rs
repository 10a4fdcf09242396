//! Expiring key-value store with eviction notifications.
//!
//! The generic store under the in-memory backend: entries carry a priority,
//! an optional absolute or sliding expiration, a weight for capacity
//! accounting, and the per-entry sync object backends use to serialize
//! replace/remove of a single key.
//!
//! A registered eviction listener is notified of every removal the store
//! performs on its own (expiration sweeps, capacity eviction). Removals
//! performed inline through [`insert`](ExpiringStore::insert) /
//! [`remove`](ExpiringStore::remove) are the caller's responsibility and do
//! not reach the listener.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tracing::trace;

use tiercache_backend::{CacheValue, Clock, DynClock, Ticks};

use crate::dependency::BackwardSet;

/// Why the store removed an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvictionCause {
    /// Removed by an explicit caller request.
    Explicit,
    /// Replaced by a newer entry under the same key.
    Replaced,
    /// The entry's expiration elapsed.
    Expired,
    /// Evicted to bring the store back under capacity.
    Capacity,
    /// Removed because an associated token or dependency was invalidated.
    Invalidated,
}

/// Eviction priority understood natively by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum StorePriority {
    /// First capacity-eviction victim.
    Low,
    /// Normal priority.
    #[default]
    Default,
    /// Last capacity-eviction victim.
    High,
    /// Exempt from capacity eviction.
    NeverRemove,
}

/// What is stored under a key.
#[derive(Debug, Clone)]
pub enum StoredPayload {
    /// An ordinary cached value.
    Value(CacheValue),
    /// A marker recording that the key was removed at the given timestamp
    /// while a non-blocking remote tier completes the removal.
    Tombstone {
        /// When the removal was issued.
        timestamp: Ticks,
    },
    /// The backward-dependency set for a dependency key.
    Dependents(Arc<BackwardSet>),
}

/// Storage policy for one entry.
#[derive(Debug, Clone, Copy)]
pub struct EntryPolicy {
    /// Eviction priority.
    pub priority: StorePriority,
    /// Instant after which the entry is dead.
    pub absolute_expiration: Option<OffsetDateTime>,
    /// Idle window after which the entry is dead.
    pub sliding_expiration: Option<Duration>,
    /// Weight in capacity units.
    pub weight: u64,
}

impl EntryPolicy {
    /// Policy for backward-dependency sets: exempt from eviction and
    /// weightless.
    #[must_use]
    pub fn dependents() -> Self {
        Self {
            priority: StorePriority::NeverRemove,
            absolute_expiration: None,
            sliding_expiration: None,
            weight: 0,
        }
    }
}

/// Notification of a store-initiated removal.
#[derive(Debug)]
pub struct EvictionNotice {
    /// The removed entry's key, as stored (prefix included).
    pub key: String,
    /// The removed payload.
    pub payload: StoredPayload,
    /// Why the store removed it.
    pub cause: EvictionCause,
}

/// Callback invoked for store-initiated removals.
pub type EvictionListener = Arc<dyn Fn(EvictionNotice) + Send + Sync>;

struct StoreEntry {
    payload: StoredPayload,
    sync: Arc<Mutex<()>>,
    priority: StorePriority,
    absolute_expiration: Option<OffsetDateTime>,
    sliding_expiration: Option<Duration>,
    last_access: AtomicI64,
    weight: u64,
}

impl StoreEntry {
    fn new(payload: StoredPayload, policy: EntryPolicy, sync: Arc<Mutex<()>>, now: Ticks) -> Self {
        Self {
            payload,
            sync,
            priority: policy.priority,
            absolute_expiration: policy.absolute_expiration,
            sliding_expiration: policy.sliding_expiration,
            last_access: AtomicI64::new(now),
            weight: policy.weight,
        }
    }

    fn is_expired(&self, now: Ticks) -> bool {
        if let Some(at) = self.absolute_expiration {
            if at.unix_timestamp_nanos() as i64 <= now {
                return true;
            }
        }
        if let Some(window) = self.sliding_expiration {
            let last = self.last_access.load(Ordering::Relaxed);
            if last.saturating_add(window.as_nanos() as i64) <= now {
                return true;
            }
        }
        false
    }
}

struct StoreInner {
    map: DashMap<String, StoreEntry>,
    capacity: Option<u64>,
    total_weight: AtomicU64,
    clock: DynClock,
    sweep_interval: Duration,
    listener: RwLock<Option<EvictionListener>>,
    janitor: Mutex<Option<JoinHandle<()>>>,
}

impl StoreInner {
    fn notify(&self, key: String, payload: StoredPayload, cause: EvictionCause) {
        let listener = self.listener.read().clone();
        if let Some(listener) = listener {
            listener(EvictionNotice {
                key,
                payload,
                cause,
            });
        }
    }

    /// Removes `key` if `predicate` holds for it, adjusting the weight
    /// accounting. Does not notify the listener.
    fn take_if(
        &self,
        key: &str,
        predicate: impl FnOnce(&StoreEntry) -> bool,
    ) -> Option<StoreEntry> {
        let (_, entry) = self.map.remove_if(key, |_, entry| predicate(entry))?;
        self.total_weight.fetch_sub(entry.weight, Ordering::SeqCst);
        Some(entry)
    }

    fn sweep_expired(&self) {
        let now = self.clock.ticks();
        let expired: Vec<String> = self
            .map
            .iter()
            .filter(|entry| entry.value().is_expired(now))
            .map(|entry| entry.key().clone())
            .collect();
        for key in expired {
            if let Some(entry) = self.take_if(&key, |entry| entry.is_expired(now)) {
                trace!(key, "expired entry swept");
                self.notify(key, entry.payload, EvictionCause::Expired);
            }
        }
    }

    fn evict_for_capacity(&self) {
        let Some(capacity) = self.capacity else {
            return;
        };
        while self.total_weight.load(Ordering::SeqCst) > capacity {
            let now = self.clock.ticks();
            // Expired entries go first; among live ones the lowest priority
            // with the oldest access loses.
            let victim = self
                .map
                .iter()
                .filter(|entry| entry.value().priority != StorePriority::NeverRemove)
                .min_by_key(|entry| {
                    let value = entry.value();
                    (
                        !value.is_expired(now),
                        value.priority,
                        value.last_access.load(Ordering::Relaxed),
                    )
                })
                .map(|entry| entry.key().clone());
            let Some(key) = victim else {
                return;
            };
            let Some(entry) = self.take_if(&key, |_| true) else {
                continue;
            };
            let cause = if entry.is_expired(now) {
                EvictionCause::Expired
            } else {
                EvictionCause::Capacity
            };
            trace!(key, ?cause, "entry evicted for capacity");
            self.notify(key, entry.payload, cause);
        }
    }
}

/// Expiring key-value store shared by the in-memory backend.
///
/// Cloning is cheap; clones share the same storage.
#[derive(Clone)]
pub struct ExpiringStore {
    inner: Arc<StoreInner>,
}

impl ExpiringStore {
    /// Creates a store.
    ///
    /// `capacity` bounds the sum of entry weights; `None` means unbounded.
    /// `sweep_interval` is the cadence of the background expiration sweep
    /// once [`spawn_janitor`](Self::spawn_janitor) has been called.
    #[must_use]
    pub fn new(capacity: Option<u64>, sweep_interval: Duration, clock: DynClock) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                map: DashMap::new(),
                capacity,
                total_weight: AtomicU64::new(0),
                clock,
                sweep_interval,
                listener: RwLock::new(None),
                janitor: Mutex::new(None),
            }),
        }
    }

    /// Registers the eviction listener. Replaces any previous listener.
    pub fn set_eviction_listener(&self, listener: EvictionListener) {
        *self.inner.listener.write() = Some(listener);
    }

    /// Starts the background expiration sweep. Must be called within a tokio
    /// runtime. Idempotent.
    pub fn spawn_janitor(&self) {
        let mut slot = self.inner.janitor.lock();
        if slot.is_some() {
            return;
        }
        let weak = Arc::downgrade(&self.inner);
        let interval = self.inner.sweep_interval;
        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                inner.sweep_expired();
            }
        }));
    }

    /// Stops the background expiration sweep.
    pub fn stop_janitor(&self) {
        if let Some(handle) = self.inner.janitor.lock().take() {
            handle.abort();
        }
    }

    /// Looks up a live payload, refreshing its sliding window. An entry found
    /// expired is removed and reported to the listener.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<StoredPayload> {
        let now = self.inner.clock.ticks();
        {
            let entry = self.inner.map.get(key)?;
            if !entry.is_expired(now) {
                entry.last_access.store(now, Ordering::Relaxed);
                return Some(entry.payload.clone());
            }
        }
        if let Some(entry) = self.inner.take_if(key, |entry| entry.is_expired(now)) {
            self.inner
                .notify(key.to_string(), entry.payload, EvictionCause::Expired);
        }
        None
    }

    /// Looks up a live payload without refreshing its sliding window.
    #[must_use]
    pub fn peek(&self, key: &str) -> Option<StoredPayload> {
        let now = self.inner.clock.ticks();
        let entry = self.inner.map.get(key)?;
        if entry.is_expired(now) {
            return None;
        }
        Some(entry.payload.clone())
    }

    /// Returns the entry's sync object, live or not. Reusing it across a
    /// replacement keeps lock holders valid.
    #[must_use]
    pub fn sync_object(&self, key: &str) -> Option<Arc<Mutex<()>>> {
        self.inner.map.get(key).map(|entry| entry.sync.clone())
    }

    /// Installs a payload under `key`, replacing any previous entry inline
    /// (no listener notification). Returns the replaced payload.
    pub fn insert(
        &self,
        key: String,
        payload: StoredPayload,
        policy: EntryPolicy,
        sync: Option<Arc<Mutex<()>>>,
    ) -> Option<StoredPayload> {
        let now = self.inner.clock.ticks();
        let entry = StoreEntry::new(
            payload,
            policy,
            sync.unwrap_or_else(|| Arc::new(Mutex::new(()))),
            now,
        );
        self.inner.total_weight.fetch_add(entry.weight, Ordering::SeqCst);
        let previous = self.inner.map.insert(key, entry);
        let previous_payload = previous.map(|entry| {
            self.inner
                .total_weight
                .fetch_sub(entry.weight, Ordering::SeqCst);
            entry.payload
        });
        self.inner.evict_for_capacity();
        previous_payload
    }

    /// Removes `key` inline (no listener notification). Returns the removed
    /// payload.
    pub fn remove(&self, key: &str) -> Option<StoredPayload> {
        self.inner.take_if(key, |_| true).map(|entry| entry.payload)
    }

    /// Removes `key` inline if `predicate` holds for its payload.
    pub fn remove_matching(
        &self,
        key: &str,
        predicate: impl FnOnce(&StoredPayload) -> bool,
    ) -> Option<StoredPayload> {
        self.inner
            .take_if(key, |entry| predicate(&entry.payload))
            .map(|entry| entry.payload)
    }

    /// Returns the backward-dependency set stored under `key`, installing an
    /// empty one if absent.
    #[must_use]
    pub fn dependents_entry(&self, key: &str) -> Arc<BackwardSet> {
        let mut entry = self
            .inner
            .map
            .entry(key.to_string())
            .or_insert_with(|| {
                StoreEntry::new(
                    StoredPayload::Dependents(BackwardSet::new()),
                    EntryPolicy::dependents(),
                    Arc::new(Mutex::new(())),
                    self.inner.clock.ticks(),
                )
            });
        match &entry.payload {
            StoredPayload::Dependents(set) => set.clone(),
            _ => {
                // The key namespace guarantees this slot only ever holds a
                // backward set; restore the invariant if it was violated.
                let set = BackwardSet::new();
                entry.payload = StoredPayload::Dependents(set.clone());
                set
            }
        }
    }

    /// Returns whether a live entry exists under `key`.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.peek(key).is_some()
    }

    /// Number of entries, including not-yet-swept expired ones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.map.len()
    }

    /// Returns `true` if the store holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.map.is_empty()
    }

    /// Current sum of entry weights.
    #[must_use]
    pub fn total_weight(&self) -> u64 {
        self.inner.total_weight.load(Ordering::SeqCst)
    }

    /// Removes every entry. No listener notifications.
    pub fn clear(&self) {
        self.inner.map.clear();
        self.inner.total_weight.store(0, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for ExpiringStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpiringStore")
            .field("len", &self.len())
            .field("total_weight", &self.total_weight())
            .field("capacity", &self.inner.capacity)
            .finish()
    }
}
