//! The in-memory cache backend.
//!
//! Built over [`ExpiringStore`]. Item keys are namespaced with an `item:`
//! prefix and dependency keys with a `dependency:` prefix, so both share one
//! store without collision. Each stored item carries a sync object used to
//! serialize replace/remove of that single key; each backward-dependency set
//! has its own lock, so unrelated keys never contend.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, MutexGuard};
use tracing::warn;
use uuid::Uuid;

use tiercache_backend::{
    BackendError, BackendFeatures, BackendOptions, BackendResult, CacheBackend, CacheEvent,
    CacheItem, CachePriority, CacheValue, DynClock, EventBus, ItemRemovedReason, Lifecycle,
    SystemClock, Ticks,
};

use crate::dependency::LOCK_TIMEOUT;
use crate::store::{
    EntryPolicy, EvictionCause, EvictionNotice, ExpiringStore, StorePriority, StoredPayload,
};

const ITEM_PREFIX: &str = "item:";
const DEPENDENCY_PREFIX: &str = "dependency:";

/// Default cadence of the expiration sweep.
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Computes an entry's weight in capacity units from its raw value.
pub type ValueSizer = Arc<dyn Fn(&serde_json::Value) -> u64 + Send + Sync>;

/// Serializes a value to a byte buffer so its footprint can be measured.
pub type ValueSerializer = Arc<dyn Fn(&serde_json::Value) -> BackendResult<Vec<u8>> + Send + Sync>;

/// Configuration for [`MemoryBackend`].
#[derive(Clone)]
pub struct MemoryBackendOptions {
    /// Bound on the sum of entry weights. `None` means unbounded.
    pub capacity: Option<u64>,
    /// Cadence of the background expiration sweep.
    pub sweep_interval: Duration,
    /// Measures an entry's weight from the raw value. Ignored when a
    /// serializer is configured. Defaults to weight 1 per entry.
    pub size_calculator: Option<ValueSizer>,
    /// When set, entries are measured on their serialized form instead of
    /// the raw value.
    pub serializer: Option<ValueSerializer>,
    /// Common backend options.
    pub backend: BackendOptions,
}

impl MemoryBackendOptions {
    /// Creates default options: unbounded, one-second sweep.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bounds the store's total weight.
    #[must_use]
    pub fn with_capacity(mut self, capacity: u64) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Sets the expiration sweep cadence.
    #[must_use]
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Installs a weight calculator for capacity-limited eviction.
    #[must_use]
    pub fn with_size_calculator(mut self, calculator: ValueSizer) -> Self {
        self.size_calculator = Some(calculator);
        self
    }

    /// Installs a serializer so entries are measured on their serialized
    /// form.
    #[must_use]
    pub fn with_serializer(mut self, serializer: ValueSerializer) -> Self {
        self.serializer = Some(serializer);
        self
    }

    /// Sets the common backend options.
    #[must_use]
    pub fn with_backend_options(mut self, backend: BackendOptions) -> Self {
        self.backend = backend;
        self
    }
}

impl Default for MemoryBackendOptions {
    fn default() -> Self {
        Self {
            capacity: None,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            size_calculator: None,
            serializer: None,
            backend: BackendOptions::default(),
        }
    }
}

impl std::fmt::Debug for MemoryBackendOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackendOptions")
            .field("capacity", &self.capacity)
            .field("sweep_interval", &self.sweep_interval)
            .field("size_calculator", &self.size_calculator.is_some())
            .field("serializer", &self.serializer.is_some())
            .field("backend", &self.backend)
            .finish()
    }
}

/// Result of a local-tier lookup that distinguishes tombstones from misses.
///
/// Consumed by a wrapping two-layer enhancer; plain backend reads report
/// tombstones as misses.
#[derive(Debug, Clone)]
pub enum LocalLookup {
    /// An ordinary cached value.
    Value(CacheValue),
    /// The key was removed at the given timestamp and the removal may still
    /// be in flight on a remote tier.
    Tombstone {
        /// When the removal was issued.
        timestamp: Ticks,
    },
}

#[derive(Debug, Clone, Copy)]
struct TombstoneReplacement {
    timestamp: Ticks,
    ttl: Duration,
}

/// In-memory cache backend with dependency tracking.
pub struct MemoryBackend {
    id: Uuid,
    options: MemoryBackendOptions,
    store: ExpiringStore,
    lifecycle: Lifecycle,
    bus: EventBus,
    clock: DynClock,
}

impl MemoryBackend {
    /// Creates a backend with the system clock.
    #[must_use]
    pub fn new(options: MemoryBackendOptions) -> Arc<Self> {
        Self::with_clock(options, Arc::new(SystemClock))
    }

    /// Creates a backend with an injected clock.
    #[must_use]
    pub fn with_clock(options: MemoryBackendOptions, clock: DynClock) -> Arc<Self> {
        let store = ExpiringStore::new(options.capacity, options.sweep_interval, clock.clone());
        let backend = Arc::new(Self {
            id: Uuid::new_v4(),
            options,
            store,
            lifecycle: Lifecycle::new(),
            bus: EventBus::new(),
            clock,
        });
        let weak: Weak<Self> = Arc::downgrade(&backend);
        backend
            .store
            .set_eviction_listener(Arc::new(move |notice| {
                if let Some(backend) = weak.upgrade() {
                    backend.on_store_eviction(notice);
                }
            }));
        backend
    }

    /// Direct access to the underlying store, for diagnostics.
    #[must_use]
    pub fn store(&self) -> &ExpiringStore {
        &self.store
    }

    /// Looks up the local tier, distinguishing tombstones from misses.
    #[must_use]
    pub fn lookup_local(&self, key: &str) -> Option<LocalLookup> {
        match self.store.get(&item_key(key)) {
            Some(StoredPayload::Value(value)) => Some(LocalLookup::Value(value)),
            Some(StoredPayload::Tombstone { timestamp }) => {
                Some(LocalLookup::Tombstone { timestamp })
            }
            _ => None,
        }
    }

    /// Removes the item under `key`, raising `ItemRemoved` if a live item was
    /// removed. Returns whether a removal occurred.
    pub fn remove_local(&self, key: &str) -> BackendResult<bool> {
        let removed = self.remove_item_impl(key, None)?;
        if removed {
            self.publish_item_removed(key, ItemRemovedReason::Removed);
        }
        Ok(removed)
    }

    /// Replaces the item under `key` with a tombstone recording `timestamp`,
    /// expiring after `ttl`. Raises `ItemRemoved` if a live item was
    /// replaced. Returns whether a removal occurred.
    pub fn remove_item_with_tombstone(
        &self,
        key: &str,
        timestamp: Ticks,
        ttl: Duration,
    ) -> BackendResult<bool> {
        let removed = self.remove_item_impl(key, Some(TombstoneReplacement { timestamp, ttl }))?;
        if removed {
            self.publish_item_removed(key, ItemRemovedReason::Removed);
        }
        Ok(removed)
    }

    /// Removes every item that declared the dependency `key`, raising the
    /// corresponding events.
    pub fn invalidate_local(&self, key: &str) -> BackendResult<()> {
        self.invalidate_with(key, None)
    }

    /// Tombstone-replaces every item that declared the dependency `key`.
    pub fn invalidate_dependency_with_tombstone(
        &self,
        key: &str,
        timestamp: Ticks,
        ttl: Duration,
    ) -> BackendResult<()> {
        self.invalidate_with(key, Some(TombstoneReplacement { timestamp, ttl }))
    }

    fn invalidate_with(
        &self,
        key: &str,
        replacement: Option<TombstoneReplacement>,
    ) -> BackendResult<()> {
        let removed = self.invalidate_dependency_impl(key, replacement)?;
        for item_key in &removed {
            self.publish_item_removed(item_key, ItemRemovedReason::Invalidated);
        }
        // The invalidation itself is observable even when nothing depended
        // on the key.
        if self.bus.has_subscribers() {
            self.bus
                .publish(CacheEvent::dependency_invalidated(key, self.id));
        }
        Ok(())
    }

    /// Removes or tombstone-replaces one item under its entry lock.
    ///
    /// Re-validates existence after acquiring the lock: a concurrent remover
    /// may have won, in which case this is a no-op reporting `false`.
    fn remove_item_impl(
        &self,
        key: &str,
        replacement: Option<TombstoneReplacement>,
    ) -> BackendResult<bool> {
        let store_key = item_key(key);
        let Some(sync) = self.store.sync_object(&store_key) else {
            return Ok(false);
        };
        let _guard = lock_entry(&sync, &store_key)?;
        let Some(previous) = self.store.peek(&store_key) else {
            return Ok(false);
        };
        match replacement {
            None => {
                self.store.remove(&store_key);
            }
            Some(tombstone) => {
                let policy = EntryPolicy {
                    priority: StorePriority::Default,
                    absolute_expiration: Some(self.clock.now() + tombstone.ttl),
                    sliding_expiration: None,
                    weight: 0,
                };
                self.store.insert(
                    store_key.clone(),
                    StoredPayload::Tombstone {
                        timestamp: tombstone.timestamp,
                    },
                    policy,
                    Some(sync.clone()),
                );
            }
        }
        if let StoredPayload::Value(value) = &previous {
            if let Some(dependencies) = &value.dependencies {
                self.clean_dependencies(key, dependencies)?;
            }
        }
        Ok(matches!(previous, StoredPayload::Value(_)))
    }

    fn invalidate_dependency_impl(
        &self,
        key: &str,
        replacement: Option<TombstoneReplacement>,
    ) -> BackendResult<Vec<String>> {
        let store_key = dependency_key(key);
        // Snapshot the dependents under the set's lock; the per-item
        // removals below each re-take it to clean their own membership.
        let members: Vec<String> = match self.store.peek(&store_key) {
            Some(StoredPayload::Dependents(set)) => {
                let guard = set.guard(key)?;
                guard.iter().cloned().collect()
            }
            _ => Vec::new(),
        };
        let mut removed = Vec::with_capacity(members.len());
        for item in members {
            if self.remove_item_impl(&item, replacement)? {
                removed.push(item);
            }
        }
        Ok(removed)
    }

    /// Adds `item_key` to the backward set of `dependency`, creating the set
    /// on demand. Retries if the set is concurrently emptied and dropped.
    fn register_dependency(&self, dependency: &str, item_key: &str) -> BackendResult<()> {
        let store_key = dependency_key(dependency);
        loop {
            let set = self.store.dependents_entry(&store_key);
            let mut guard = set.guard(dependency)?;
            match self.store.peek(&store_key) {
                Some(StoredPayload::Dependents(current)) if Arc::ptr_eq(&current, &set) => {
                    guard.insert(item_key.to_string());
                    return Ok(());
                }
                _ => {
                    // Lost a race with an invalidation that emptied and
                    // removed the set; install a fresh one.
                    drop(guard);
                }
            }
        }
    }

    /// Removes `item_key` from the backward sets of `dependencies`, dropping
    /// any set that becomes empty.
    fn clean_dependencies(&self, item_key: &str, dependencies: &[String]) -> BackendResult<()> {
        for dependency in dependencies {
            let store_key = dependency_key(dependency);
            if let Some(StoredPayload::Dependents(set)) = self.store.peek(&store_key) {
                let mut guard = set.guard(dependency)?;
                guard.remove(item_key);
                if guard.is_empty() {
                    self.store.remove_matching(&store_key, |payload| {
                        matches!(payload, StoredPayload::Dependents(current) if Arc::ptr_eq(current, &set))
                    });
                }
            }
        }
        Ok(())
    }

    /// Handles a store-initiated removal: cleans dependency associations and
    /// raises `ItemRemoved` with the mapped reason.
    fn on_store_eviction(&self, notice: EvictionNotice) {
        let Some(key) = notice.key.strip_prefix(ITEM_PREFIX) else {
            // Backward sets are pinned and weightless; nothing else lives in
            // the store.
            return;
        };
        if let StoredPayload::Value(value) = &notice.payload {
            if let Some(dependencies) = &value.dependencies {
                if let Err(error) = self.clean_dependencies(key, dependencies) {
                    warn!(key, %error, "failed to clean dependency associations of evicted item");
                }
            }
        }
        let reason = match notice.cause {
            EvictionCause::Explicit => ItemRemovedReason::Removed,
            EvictionCause::Replaced => ItemRemovedReason::Other,
            EvictionCause::Expired => ItemRemovedReason::Expired,
            EvictionCause::Capacity => ItemRemovedReason::Evicted,
            EvictionCause::Invalidated => ItemRemovedReason::Invalidated,
        };
        self.publish_item_removed(key, reason);
    }

    fn publish_item_removed(&self, key: &str, reason: ItemRemovedReason) {
        if self.bus.has_subscribers() {
            self.bus
                .publish(CacheEvent::item_removed(key, reason, self.id));
        }
    }

    fn entry_weight(&self, value: &serde_json::Value) -> BackendResult<u64> {
        if let Some(serializer) = &self.options.serializer {
            let buffer = serializer(value)?;
            return Ok(buffer.len() as u64);
        }
        if let Some(calculator) = &self.options.size_calculator {
            return Ok(calculator(value));
        }
        Ok(1)
    }

    fn entry_policy(&self, item: &CacheItem, weight: u64) -> EntryPolicy {
        let configuration = item.configuration.clone().unwrap_or_default();
        EntryPolicy {
            priority: match configuration.priority.unwrap_or_default() {
                CachePriority::Low => StorePriority::Low,
                CachePriority::Default => StorePriority::Default,
                CachePriority::High => StorePriority::High,
                CachePriority::NotRemovable => StorePriority::NeverRemove,
            },
            absolute_expiration: configuration.absolute_expiration,
            sliding_expiration: configuration.sliding_expiration,
            weight,
        }
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    fn id(&self) -> Uuid {
        self.id
    }

    fn backend_kind(&self) -> &'static str {
        "memory"
    }

    fn options(&self) -> &BackendOptions {
        &self.options.backend
    }

    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    fn events(&self) -> &EventBus {
        &self.bus
    }

    fn features(&self) -> BackendFeatures {
        BackendFeatures::all()
    }

    async fn set_item_core(&self, key: &str, item: &CacheItem) -> BackendResult<()> {
        let store_key = item_key(key);
        let weight = self.entry_weight(&item.value)?;
        let policy = self.entry_policy(item, weight);
        let sync = self
            .store
            .sync_object(&store_key)
            .unwrap_or_else(|| Arc::new(Mutex::new(())));

        let _guard = lock_entry(&sync, &store_key)?;
        if let Some(StoredPayload::Value(previous)) = self.store.peek(&store_key) {
            if let Some(dependencies) = &previous.dependencies {
                self.clean_dependencies(key, dependencies)?;
            }
        }
        let dependencies = item
            .dependencies
            .as_ref()
            .map(|keys| keys.iter().cloned().collect::<Vec<_>>());
        self.store.insert(
            store_key,
            StoredPayload::Value(CacheValue::new(item.value.clone(), dependencies)),
            policy,
            Some(sync.clone()),
        );
        if let Some(dependencies) = &item.dependencies {
            for dependency in dependencies {
                self.register_dependency(dependency, key)?;
            }
        }
        Ok(())
    }

    async fn get_item_core(
        &self,
        key: &str,
        include_dependencies: bool,
    ) -> BackendResult<Option<CacheValue>> {
        Ok(match self.store.get(&item_key(key)) {
            Some(StoredPayload::Value(value)) => Some(if include_dependencies {
                value
            } else {
                value.without_dependencies()
            }),
            _ => None,
        })
    }

    async fn contains_item_core(&self, key: &str) -> BackendResult<bool> {
        Ok(matches!(
            self.store.peek(&item_key(key)),
            Some(StoredPayload::Value(_))
        ))
    }

    async fn remove_item_core(&self, key: &str) -> BackendResult<()> {
        self.remove_local(key)?;
        Ok(())
    }

    async fn invalidate_dependency_core(&self, key: &str) -> BackendResult<()> {
        self.invalidate_local(key)
    }

    async fn contains_dependency_core(&self, key: &str) -> BackendResult<bool> {
        Ok(matches!(
            self.store.peek(&dependency_key(key)),
            Some(StoredPayload::Dependents(_))
        ))
    }

    async fn clear_core(&self) -> BackendResult<()> {
        self.store.clear();
        Ok(())
    }

    async fn initialize_core(&self) -> BackendResult<()> {
        self.store.spawn_janitor();
        Ok(())
    }

    async fn dispose_core(&self) -> BackendResult<()> {
        self.background_tasks_completed().await?;
        self.store.stop_janitor();
        Ok(())
    }
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("id", &self.id)
            .field("store", &self.store)
            .finish()
    }
}

fn item_key(key: &str) -> String {
    format!("{ITEM_PREFIX}{key}")
}

fn dependency_key(key: &str) -> String {
    format!("{DEPENDENCY_PREFIX}{key}")
}

fn lock_entry<'a>(
    sync: &'a Arc<Mutex<()>>,
    key: &str,
) -> BackendResult<MutexGuard<'a, ()>> {
    sync.try_lock_for(LOCK_TIMEOUT)
        .ok_or_else(|| BackendError::lock_timeout(key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tiercache_backend::{CacheBackendExt, ItemConfiguration, ManualClock};

    fn item(value: serde_json::Value) -> CacheItem {
        CacheItem::new(value)
    }

    #[tokio::test]
    async fn test_round_trip() {
        let backend = MemoryBackend::new(MemoryBackendOptions::new());
        for value in [
            serde_json::Value::Null,
            serde_json::json!(17),
            serde_json::json!({"k": [1, 2, 3]}),
        ] {
            backend.set_item("k", item(value.clone())).await.expect("set");
            let got = backend.get_item("k").await.expect("get").expect("hit");
            assert_eq!(got.value, value);
        }
    }

    #[tokio::test]
    async fn test_dependencies_are_recorded() {
        let backend = MemoryBackend::new(MemoryBackendOptions::new());
        backend
            .set_item("a", item(serde_json::json!(1)).with_dependency("d"))
            .await
            .expect("set");

        let got = backend.get_item("a").await.expect("get").expect("hit");
        assert_eq!(got.dependencies, Some(vec!["d".to_string()]));
        assert!(backend.contains_dependency("d").await.expect("contains"));

        let got = backend
            .get_item_with("a", false)
            .await
            .expect("get")
            .expect("hit");
        assert!(got.dependencies.is_none());
    }

    #[tokio::test]
    async fn test_invalidation_removes_all_dependents() {
        let backend = MemoryBackend::new(MemoryBackendOptions::new());
        let mut events = backend.events().subscribe();

        backend
            .set_item("a", item(serde_json::json!("a")).with_dependency("d"))
            .await
            .expect("set");
        backend
            .set_item("b", item(serde_json::json!("b")).with_dependency("d"))
            .await
            .expect("set");

        backend.invalidate_dependency("d").await.expect("invalidate");

        assert!(backend.get_item("a").await.expect("get").is_none());
        assert!(backend.get_item("b").await.expect("get").is_none());

        let mut removed = Vec::new();
        let mut invalidated = 0;
        for _ in 0..3 {
            match events.try_recv().expect("event") {
                CacheEvent::ItemRemoved { key, reason, .. } => {
                    assert_eq!(reason, ItemRemovedReason::Invalidated);
                    removed.push(key);
                }
                CacheEvent::DependencyInvalidated { key, .. } => {
                    assert_eq!(key, "d");
                    invalidated += 1;
                }
            }
        }
        removed.sort();
        assert_eq!(removed, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(invalidated, 1);
        assert!(events.try_recv().is_err(), "exactly one event per removal");
    }

    #[tokio::test]
    async fn test_backward_index_cleaned_after_invalidation() {
        let backend = MemoryBackend::new(MemoryBackendOptions::new());
        backend
            .set_item("a", item(serde_json::json!(1)).with_dependency("d"))
            .await
            .expect("set");

        backend.invalidate_dependency("d").await.expect("invalidate");
        assert!(!backend.contains_dependency("d").await.expect("contains"));
    }

    #[tokio::test]
    async fn test_replacement_updates_dependency_index() {
        let backend = MemoryBackend::new(MemoryBackendOptions::new());
        backend
            .set_item("k", item(serde_json::json!(1)).with_dependency("old"))
            .await
            .expect("set");
        backend
            .set_item("k", item(serde_json::json!(2)).with_dependency("new"))
            .await
            .expect("set");

        assert!(!backend.contains_dependency("old").await.expect("contains"));
        assert!(backend.contains_dependency("new").await.expect("contains"));

        backend.invalidate_dependency("old").await.expect("invalidate");
        assert!(backend.contains_item("k").await.expect("contains"));

        backend.invalidate_dependency("new").await.expect("invalidate");
        assert!(!backend.contains_item("k").await.expect("contains"));
    }

    #[tokio::test]
    async fn test_remove_is_a_noop_for_missing_items() {
        let backend = MemoryBackend::new(MemoryBackendOptions::new());
        backend.initialize().await.expect("initialize");
        let mut events = backend.events().subscribe();

        backend.remove_item("missing").await.expect("remove");
        assert!(events.try_recv().is_err(), "no event for a no-op removal");
    }

    #[tokio::test]
    async fn test_tombstone_reads_as_miss() {
        let clock = ManualClock::starting_at(1_000);
        let backend = MemoryBackend::with_clock(MemoryBackendOptions::new(), clock.clone());
        backend
            .set_item("k", item(serde_json::json!("v")))
            .await
            .expect("set");

        let removed = backend
            .remove_item_with_tombstone("k", clock.ticks(), Duration::from_secs(60))
            .expect("tombstone");
        assert!(removed);

        assert!(backend.get_item("k").await.expect("get").is_none());
        assert!(!backend.contains_item("k").await.expect("contains"));
        assert!(matches!(
            backend.lookup_local("k"),
            Some(LocalLookup::Tombstone { timestamp: 1_000 })
        ));

        // A later write replaces the tombstone.
        backend
            .set_item("k", item(serde_json::json!("v2")))
            .await
            .expect("set");
        assert!(matches!(
            backend.lookup_local("k"),
            Some(LocalLookup::Value(_))
        ));
    }

    #[tokio::test]
    async fn test_tombstone_expires_after_transition_period() {
        let clock = ManualClock::starting_at(0);
        let backend = MemoryBackend::with_clock(MemoryBackendOptions::new(), clock.clone());
        backend
            .set_item("k", item(serde_json::json!("v")))
            .await
            .expect("set");
        backend
            .remove_item_with_tombstone("k", clock.ticks(), Duration::from_secs(60))
            .expect("tombstone");

        clock.advance(Duration::from_secs(61));
        assert!(backend.lookup_local("k").is_none());
    }

    #[tokio::test]
    async fn test_expired_item_raises_event_and_cleans_index() {
        let clock = ManualClock::starting_at(0);
        let backend = MemoryBackend::with_clock(MemoryBackendOptions::new(), clock.clone());
        let mut events = backend.events().subscribe();

        let configured = item(serde_json::json!("v"))
            .with_dependency("d")
            .with_configuration(
                ItemConfiguration::new().with_absolute_expiration(
                    time::OffsetDateTime::UNIX_EPOCH + Duration::from_secs(5),
                ),
            );
        backend.set_item("k", configured).await.expect("set");

        clock.advance(Duration::from_secs(6));
        assert!(backend.get_item("k").await.expect("get").is_none());

        match events.try_recv().expect("event") {
            CacheEvent::ItemRemoved { key, reason, .. } => {
                assert_eq!(key, "k");
                assert_eq!(reason, ItemRemovedReason::Expired);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(!backend.contains_dependency("d").await.expect("contains"));
    }

    #[tokio::test]
    async fn test_capacity_eviction_raises_evicted() {
        let backend = MemoryBackend::new(MemoryBackendOptions::new().with_capacity(2));
        let mut events = backend.events().subscribe();

        for key in ["a", "b", "c"] {
            backend
                .set_item(key, item(serde_json::json!(key)))
                .await
                .expect("set");
        }

        match events.try_recv().expect("event") {
            CacheEvent::ItemRemoved { reason, .. } => {
                assert_eq!(reason, ItemRemovedReason::Evicted);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_serializer_drives_weights() {
        let serializer: ValueSerializer = Arc::new(|value| {
            serde_json::to_vec(value)
                .map_err(|error| BackendError::internal(error.to_string()))
        });
        let backend = MemoryBackend::new(
            MemoryBackendOptions::new().with_serializer(serializer),
        );
        backend
            .set_item("k", item(serde_json::json!("abcdefgh")))
            .await
            .expect("set");
        // "abcdefgh" serializes to ten bytes including the quotes.
        assert_eq!(backend.store().total_weight(), 10);
    }

    #[tokio::test]
    async fn test_clear_empties_everything() {
        let backend = MemoryBackend::new(MemoryBackendOptions::new());
        backend
            .set_item("a", item(serde_json::json!(1)).with_dependency("d"))
            .await
            .expect("set");
        backend.clear().await.expect("clear");

        assert!(!backend.contains_item("a").await.expect("contains"));
        assert!(!backend.contains_dependency("d").await.expect("contains"));
        assert!(backend.store().is_empty());
    }
}
