//! Non-blocking cache enhancer.
//!
//! Turns the write-class operations (set, remove, invalidate, clear) into
//! fire-and-forget background tasks against the underlying backend: callers
//! block only long enough to enqueue. Tasks execute in submission order per
//! enhancer instance, which is what makes later writes to the same key win.
//! Read operations pass straight through.
//!
//! Once a write is enqueued it always runs to completion or failure;
//! cancelling the caller does not retract it. Failures are counted and
//! logged by the scheduler rather than thrown into unrelated call sites.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use tiercache_backend::{
    BackendFeatures, BackendOptions, BackendResult, CacheBackend, CacheBackendExt, CacheItem,
    CacheValue, DynBackend, EventBus, Lifecycle, TaskScheduler,
};

use crate::relay::spawn_event_relay;

/// Non-blocking enhancer over any backend.
///
/// Must be created within a tokio runtime (the scheduler consumer and the
/// event relay are spawned at construction).
pub struct NonBlockingEnhancer {
    options: BackendOptions,
    underlying: DynBackend,
    scheduler: TaskScheduler,
    lifecycle: Lifecycle,
    bus: EventBus,
    relay: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl NonBlockingEnhancer {
    /// Wraps `underlying` with a background write queue.
    #[must_use]
    pub fn new(underlying: DynBackend, options: BackendOptions) -> Self {
        let bus = EventBus::new();
        let relay = {
            let bus = bus.clone();
            spawn_event_relay(underlying.events(), move |event| {
                bus.publish(event);
            })
        };
        let scheduler = TaskScheduler::new(format!("non-blocking:{}", underlying.backend_kind()));
        Self {
            options,
            underlying,
            scheduler,
            lifecycle: Lifecycle::new(),
            bus,
            relay: parking_lot::Mutex::new(Some(relay)),
        }
    }

    /// The wrapped backend.
    #[must_use]
    pub fn underlying(&self) -> &DynBackend {
        &self.underlying
    }

    /// Number of write operations that failed in the background.
    #[must_use]
    pub fn background_task_exceptions(&self) -> u64 {
        self.scheduler.background_task_exceptions()
    }
}

#[async_trait]
impl CacheBackend for NonBlockingEnhancer {
    // The enhancer adopts the identity of the backend it wraps, so event
    // source comparisons see through enhancer stacks.
    fn id(&self) -> Uuid {
        self.underlying.id()
    }

    fn backend_kind(&self) -> &'static str {
        "non-blocking"
    }

    fn options(&self) -> &BackendOptions {
        &self.options
    }

    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    fn events(&self) -> &EventBus {
        &self.bus
    }

    fn features(&self) -> BackendFeatures {
        BackendFeatures {
            blocking: false,
            ..self.underlying.features()
        }
    }

    async fn set_item_core(&self, key: &str, item: &CacheItem) -> BackendResult<()> {
        let underlying = Arc::clone(&self.underlying);
        let key = key.to_string();
        let item = item.clone();
        self.scheduler
            .enqueue(async move { underlying.set_item(&key, item).await })
    }

    async fn get_item_core(
        &self,
        key: &str,
        include_dependencies: bool,
    ) -> BackendResult<Option<CacheValue>> {
        self.underlying.get_item_with(key, include_dependencies).await
    }

    async fn contains_item_core(&self, key: &str) -> BackendResult<bool> {
        self.underlying.contains_item(key).await
    }

    async fn remove_item_core(&self, key: &str) -> BackendResult<()> {
        let underlying = Arc::clone(&self.underlying);
        let key = key.to_string();
        self.scheduler
            .enqueue(async move { underlying.remove_item(&key).await })
    }

    async fn invalidate_dependency_core(&self, key: &str) -> BackendResult<()> {
        let underlying = Arc::clone(&self.underlying);
        let key = key.to_string();
        self.scheduler
            .enqueue(async move { underlying.invalidate_dependency(&key).await })
    }

    async fn contains_dependency_core(&self, key: &str) -> BackendResult<bool> {
        self.underlying.contains_dependency(key).await
    }

    async fn clear_core(&self) -> BackendResult<()> {
        let underlying = Arc::clone(&self.underlying);
        self.scheduler
            .enqueue(async move { underlying.clear().await })
    }

    async fn initialize_core(&self) -> BackendResult<()> {
        self.underlying.initialize().await
    }

    async fn dispose_core(&self) -> BackendResult<()> {
        // Drain the write queue before the backend it writes to goes away.
        self.scheduler.shutdown().await;
        self.underlying.dispose().await?;
        if let Some(relay) = self.relay.lock().take() {
            relay.abort();
        }
        Ok(())
    }

    async fn background_tasks_completed(&self) -> BackendResult<()> {
        self.scheduler.wait_until_drained().await;
        self.underlying.background_tasks_completed().await
    }
}

impl std::fmt::Debug for NonBlockingEnhancer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NonBlockingEnhancer")
            .field("underlying", &self.underlying.backend_kind())
            .field("pending", &self.scheduler.pending_tasks())
            .finish()
    }
}
