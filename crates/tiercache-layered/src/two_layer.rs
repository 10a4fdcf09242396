//! Two-layer (local + remote) cache enhancer.
//!
//! Composes a fast in-process tier with an arbitrary authoritative remote
//! backend. Writes go to both tiers; reads are served locally when possible
//! and populate the local tier from the remote on a miss.
//!
//! When the remote tier is non-blocking its removals complete asynchronously,
//! so removing a key installs a *tombstone* in the local tier instead of
//! deleting outright: a read racing the in-flight remote removal must not
//! resurrect a stale value. On read, a remote value is only trusted over a
//! tombstone when its wrapped timestamp is newer than the tombstone's.
//!
//! Events from the remote bus whose source is another backend instance (a
//! different process or replica) are replayed onto the local tier before
//! being re-published, which is how cross-instance coherence reaches the
//! local fast tier.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::warn;
use uuid::Uuid;

use tiercache_backend::{
    BackendError, BackendFeatures, BackendOptions, BackendResult, CacheBackend, CacheBackendExt,
    CacheEvent, CacheItem, CacheValue, Clock, DynBackend, DynClock, EventBus, ItemConfiguration,
    Lifecycle, SystemClock, Ticks,
};
use tiercache_memory::{LocalLookup, MemoryBackend};

use crate::relay::spawn_event_relay;

/// Default transition period during which a tombstone shields a removed key
/// from resurrection while the remote removal completes.
pub const DEFAULT_TOMBSTONE_TTL: Duration = Duration::from_secs(60);

/// Configuration for [`TwoLayerEnhancer`].
#[derive(Debug, Clone)]
pub struct TwoLayerOptions {
    /// How long tombstones shield removed keys when the remote tier is
    /// non-blocking.
    pub tombstone_ttl: Duration,
    /// Common backend options.
    pub backend: BackendOptions,
}

impl TwoLayerOptions {
    /// Creates default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the tombstone transition period.
    #[must_use]
    pub fn with_tombstone_ttl(mut self, ttl: Duration) -> Self {
        self.tombstone_ttl = ttl;
        self
    }

    /// Sets the common backend options.
    #[must_use]
    pub fn with_backend_options(mut self, backend: BackendOptions) -> Self {
        self.backend = backend;
        self
    }
}

impl Default for TwoLayerOptions {
    fn default() -> Self {
        Self {
            tombstone_ttl: DEFAULT_TOMBSTONE_TTL,
            backend: BackendOptions::default(),
        }
    }
}

/// The wire form of a value in the remote tier: the original payload plus a
/// versioning timestamp and the computed absolute-expiration instant.
///
/// The timestamp decides, on read, whether a remote value is newer than a
/// local tombstone. Concrete remote backends see this structure as the item
/// payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayeredValue {
    /// The original payload.
    #[serde(rename = "v")]
    pub value: serde_json::Value,
    /// When the value was written.
    #[serde(rename = "ts")]
    pub timestamp: Ticks,
    /// Absolute expiration computed at write time, if any.
    #[serde(
        rename = "exp",
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub absolute_expiration: Option<OffsetDateTime>,
}

impl LayeredValue {
    /// Creates a wrapped value.
    #[must_use]
    pub fn new(
        value: serde_json::Value,
        timestamp: Ticks,
        absolute_expiration: Option<OffsetDateTime>,
    ) -> Self {
        Self {
            value,
            timestamp,
            absolute_expiration,
        }
    }
}

/// Two-layer cache enhancer: a local [`MemoryBackend`] in front of an
/// arbitrary remote backend.
///
/// Must be created within a tokio runtime (the event relay task is spawned
/// at construction).
pub struct TwoLayerEnhancer {
    options: TwoLayerOptions,
    local: Arc<MemoryBackend>,
    remote: DynBackend,
    clock: DynClock,
    lifecycle: Lifecycle,
    bus: EventBus,
    relay: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl TwoLayerEnhancer {
    /// Creates an enhancer with the system clock.
    #[must_use]
    pub fn new(local: Arc<MemoryBackend>, remote: DynBackend, options: TwoLayerOptions) -> Self {
        Self::with_clock(local, remote, options, Arc::new(SystemClock))
    }

    /// Creates an enhancer with an injected clock.
    #[must_use]
    pub fn with_clock(
        local: Arc<MemoryBackend>,
        remote: DynBackend,
        options: TwoLayerOptions,
        clock: DynClock,
    ) -> Self {
        let bus = EventBus::new();
        let relay = {
            let local = Arc::clone(&local);
            let bus = bus.clone();
            let remote_id = remote.id();
            spawn_event_relay(remote.events(), move |event| {
                // Events originating elsewhere (another process or replica)
                // must reach the local tier; our own writes already did.
                if event.source_id() != remote_id {
                    let applied = match &event {
                        CacheEvent::ItemRemoved { key, .. } => {
                            local.remove_local(key).map(|_| ())
                        }
                        CacheEvent::DependencyInvalidated { key, .. } => {
                            local.invalidate_local(key)
                        }
                    };
                    if let Err(error) = applied {
                        warn!(
                            key = event.key(),
                            %error,
                            "failed to apply remote cache event to the local tier"
                        );
                    }
                }
                bus.publish(event);
            })
        };
        Self {
            options,
            local,
            remote,
            clock,
            lifecycle: Lifecycle::new(),
            bus,
            relay: parking_lot::Mutex::new(Some(relay)),
        }
    }

    /// The local tier.
    #[must_use]
    pub fn local(&self) -> &Arc<MemoryBackend> {
        &self.local
    }

    /// The remote tier.
    #[must_use]
    pub fn remote(&self) -> &DynBackend {
        &self.remote
    }

    fn remote_is_blocking(&self) -> bool {
        self.remote.features().blocking
    }

    /// Computes the absolute-expiration instant recorded in the wrapped
    /// value: the configured instant, or the sliding window projected from
    /// now.
    fn expiration_instant(&self, configuration: Option<&ItemConfiguration>) -> Option<OffsetDateTime> {
        let configuration = configuration?;
        configuration.absolute_expiration.or_else(|| {
            configuration
                .sliding_expiration
                .map(|window| self.clock.now() + window)
        })
    }

    /// Fetches and unwraps the remote value for `key`.
    ///
    /// A payload that does not decode as a [`LayeredValue`] surfaces as a
    /// stale-item error, which the guarded read recovers by evicting the
    /// entry.
    async fn fetch_remote(
        &self,
        key: &str,
        include_dependencies: bool,
    ) -> BackendResult<Option<(LayeredValue, Option<Vec<String>>)>> {
        let Some(remote_value) = self.remote.get_item_with(key, include_dependencies).await? else {
            return Ok(None);
        };
        let wrapped: LayeredValue = serde_json::from_value(remote_value.value).map_err(|error| {
            BackendError::stale_item(format!("cannot decode remote cache value: {error}"))
        })?;
        Ok(Some((wrapped, remote_value.dependencies)))
    }

    /// Installs an unwrapped remote value into the local tier so subsequent
    /// reads hit locally.
    async fn populate_local(
        &self,
        key: &str,
        wrapped: &LayeredValue,
        dependencies: Option<Vec<String>>,
    ) -> BackendResult<()> {
        let mut item = CacheItem::new(wrapped.value.clone());
        if let Some(dependencies) = dependencies {
            item.dependencies = Some(dependencies.into_iter().collect());
        }
        if let Some(at) = wrapped.absolute_expiration {
            item.configuration = Some(ItemConfiguration::new().with_absolute_expiration(at));
        }
        self.local.set_item(key, item).await
    }
}

#[async_trait]
impl CacheBackend for TwoLayerEnhancer {
    // The enhancer adopts the identity of the backend it wraps, so event
    // source comparisons see through enhancer stacks.
    fn id(&self) -> Uuid {
        self.remote.id()
    }

    fn backend_kind(&self) -> &'static str {
        "two-layer"
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
        let remote = self.remote.features();
        BackendFeatures {
            contains_dependency: remote.contains_dependency && remote.blocking,
            ..remote
        }
    }

    async fn set_item_core(&self, key: &str, item: &CacheItem) -> BackendResult<()> {
        // The local tier gets the unmodified item.
        self.local.set_item(key, item.clone()).await?;

        let wrapped = LayeredValue::new(
            item.value.clone(),
            self.clock.ticks(),
            self.expiration_instant(item.configuration.as_ref()),
        );
        // The remote tier does not drive auto-reload.
        let configuration = item.configuration.clone().map(|mut configuration| {
            configuration.auto_reload = None;
            configuration
        });
        let remote_item = CacheItem {
            value: serde_json::to_value(&wrapped)
                .map_err(|error| BackendError::internal(error.to_string()))?,
            dependencies: item.dependencies.clone(),
            configuration,
        };
        self.remote.set_item(key, remote_item).await
    }

    async fn get_item_core(
        &self,
        key: &str,
        include_dependencies: bool,
    ) -> BackendResult<Option<CacheValue>> {
        match self.local.lookup_local(key) {
            Some(LocalLookup::Value(value)) => Ok(Some(if include_dependencies {
                value
            } else {
                value.without_dependencies()
            })),
            Some(LocalLookup::Tombstone { timestamp }) => {
                match self.fetch_remote(key, include_dependencies).await? {
                    // The remote write is newer than the local removal.
                    Some((wrapped, dependencies)) if wrapped.timestamp > timestamp => {
                        self.populate_local(key, &wrapped, dependencies.clone()).await?;
                        Ok(Some(CacheValue::new(wrapped.value, dependencies)))
                    }
                    // Remote missing or older: the tombstone is authoritative.
                    _ => Ok(None),
                }
            }
            None => match self.fetch_remote(key, include_dependencies).await? {
                Some((wrapped, dependencies)) => {
                    self.populate_local(key, &wrapped, dependencies.clone()).await?;
                    Ok(Some(CacheValue::new(wrapped.value, dependencies)))
                }
                None => Ok(None),
            },
        }
    }

    async fn contains_item_core(&self, key: &str) -> BackendResult<bool> {
        if self.remote_is_blocking() {
            if self.local.contains_item(key).await? {
                return Ok(true);
            }
            self.remote.contains_item(key).await
        } else {
            // A non-blocking remote cannot answer existence reliably; degrade
            // to a get.
            Ok(self.get_item_core(key, false).await?.is_some())
        }
    }

    async fn remove_item_core(&self, key: &str) -> BackendResult<()> {
        if self.remote_is_blocking() {
            self.local.remove_item(key).await?;
        } else {
            self.local.remove_item_with_tombstone(
                key,
                self.clock.ticks(),
                self.options.tombstone_ttl,
            )?;
        }
        self.remote.remove_item(key).await
    }

    async fn invalidate_dependency_core(&self, key: &str) -> BackendResult<()> {
        if self.remote_is_blocking() {
            self.local.invalidate_dependency(key).await?;
        } else {
            self.local.invalidate_dependency_with_tombstone(
                key,
                self.clock.ticks(),
                self.options.tombstone_ttl,
            )?;
        }
        self.remote.invalidate_dependency(key).await
    }

    async fn contains_dependency_core(&self, key: &str) -> BackendResult<bool> {
        if self.local.contains_dependency(key).await? {
            return Ok(true);
        }
        self.remote.contains_dependency(key).await
    }

    async fn clear_core(&self) -> BackendResult<()> {
        self.local.clear().await?;
        self.remote.clear().await
    }

    async fn initialize_core(&self) -> BackendResult<()> {
        self.local.initialize().await?;
        self.remote.initialize().await
    }

    async fn dispose_core(&self) -> BackendResult<()> {
        self.remote.dispose().await?;
        self.local.dispose().await?;
        if let Some(relay) = self.relay.lock().take() {
            relay.abort();
        }
        Ok(())
    }

    async fn background_tasks_completed(&self) -> BackendResult<()> {
        self.remote.background_tasks_completed().await
    }
}

impl std::fmt::Debug for TwoLayerEnhancer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TwoLayerEnhancer")
            .field("remote", &self.remote.backend_kind())
            .finish()
    }
}
