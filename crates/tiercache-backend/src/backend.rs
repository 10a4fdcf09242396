//! The cache backend contract.
//!
//! [`CacheBackend`] is the core operation set a physical cache store (or an
//! enhancer wrapping one) implements. [`CacheBackendExt`] is the guarded
//! public surface built on top of it: every public operation ensures the
//! backend is initialized (lazily initializing on first use), validates its
//! arguments, checks feature gates, runs the core method inside a tracing
//! span, and applies the stale-item recovery policy on reads.
//!
//! Enhancers compose by holding an `Arc<dyn CacheBackend>` and implementing
//! the trait themselves, forwarding the operations they do not change.
//!
//! # Cancellation
//!
//! Async operations are cancelled by dropping their futures; every await is a
//! cancellation point. Work already handed to a background scheduler is
//! detached and always runs to completion — only the caller's wait for it is
//! cancellable.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{Instrument, debug, debug_span, warn};
use uuid::Uuid;

use crate::BackendResult;
use crate::error::BackendError;
use crate::events::EventBus;
use crate::features::BackendFeatures;
use crate::item::{CacheItem, CachePriority, CacheValue};
use crate::lifecycle::{BackendStatus, Lifecycle};

/// Decides whether a stale-cached-item error should be rethrown instead of
/// being recovered as a miss.
pub trait StaleItemObserver: Send + Sync {
    /// Returns `true` to veto suppression and propagate the error.
    fn should_rethrow(&self, error: &BackendError) -> bool;
}

/// Configuration surface recognized by every backend.
#[derive(Clone, Default)]
pub struct BackendOptions {
    /// Diagnostic label used in logs and spans.
    pub debug_name: Option<String>,
    /// Whether a wrapping local (L1) layer exists above this backend.
    pub is_behind_l1: bool,
    /// Observer consulted before a stale-item error is suppressed.
    pub stale_item_observer: Option<Arc<dyn StaleItemObserver>>,
}

impl BackendOptions {
    /// Creates default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the diagnostic label.
    #[must_use]
    pub fn with_debug_name(mut self, name: impl Into<String>) -> Self {
        self.debug_name = Some(name.into());
        self
    }

    /// Marks this backend as sitting behind a local layer.
    #[must_use]
    pub fn behind_l1(mut self) -> Self {
        self.is_behind_l1 = true;
        self
    }

    /// Installs a stale-item observer.
    #[must_use]
    pub fn with_stale_item_observer(mut self, observer: Arc<dyn StaleItemObserver>) -> Self {
        self.stale_item_observer = Some(observer);
        self
    }
}

impl std::fmt::Debug for BackendOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendOptions")
            .field("debug_name", &self.debug_name)
            .field("is_behind_l1", &self.is_behind_l1)
            .field("stale_item_observer", &self.stale_item_observer.is_some())
            .finish()
    }
}

/// Core contract implemented by every physical cache store and enhancer.
///
/// The `*_core` methods carry the storage semantics; callers go through the
/// guarded operations on [`CacheBackendExt`] instead of invoking them
/// directly. Implementations must be thread-safe (`Send + Sync`).
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Unique id of this backend instance, used to attribute events to their
    /// originating instance.
    fn id(&self) -> Uuid;

    /// Short name of the backend kind for logging/debugging.
    fn backend_kind(&self) -> &'static str;

    /// The backend's configuration.
    fn options(&self) -> &BackendOptions;

    /// The backend's lifecycle state.
    fn lifecycle(&self) -> &Lifecycle;

    /// The backend's event bus.
    fn events(&self) -> &EventBus;

    /// The capabilities this backend advertises.
    fn features(&self) -> BackendFeatures;

    /// Stores an item under `key`, replacing any previous entry.
    async fn set_item_core(&self, key: &str, item: &CacheItem) -> BackendResult<()>;

    /// Looks up an item. Returns `None` on a miss.
    ///
    /// # Errors
    ///
    /// A stale entry (deserialization or type mismatch) surfaces as
    /// [`BackendError::StaleItem`]; the guarded read recovers it.
    async fn get_item_core(
        &self,
        key: &str,
        include_dependencies: bool,
    ) -> BackendResult<Option<CacheValue>>;

    /// Returns whether an item exists under `key`.
    async fn contains_item_core(&self, key: &str) -> BackendResult<bool>;

    /// Removes the item under `key`, if any.
    async fn remove_item_core(&self, key: &str) -> BackendResult<()>;

    /// Removes every item that declared the dependency `key`.
    async fn invalidate_dependency_core(&self, key: &str) -> BackendResult<()>;

    /// Returns whether any item currently declares the dependency `key`.
    async fn contains_dependency_core(&self, key: &str) -> BackendResult<bool>;

    /// Removes all entries.
    async fn clear_core(&self) -> BackendResult<()>;

    /// Initialization hook. Runs at most once, under the lifecycle guard.
    async fn initialize_core(&self) -> BackendResult<()> {
        Ok(())
    }

    /// Disposal hook. Defaults to waiting for outstanding background work.
    async fn dispose_core(&self) -> BackendResult<()> {
        self.background_tasks_completed().await
    }

    /// Completes when all background work enqueued as of the call has
    /// finished. More work may be enqueued concurrently; no fully-quiescent
    /// state is guaranteed at return.
    async fn background_tasks_completed(&self) -> BackendResult<()> {
        Ok(())
    }
}

/// Guarded public operations, available on every [`CacheBackend`].
#[async_trait]
pub trait CacheBackendExt: CacheBackend {
    /// Label used in spans and log events.
    fn debug_label(&self) -> String {
        match &self.options().debug_name {
            Some(name) => name.clone(),
            None => format!("{}:{}", self.backend_kind(), self.id()),
        }
    }

    /// Initializes the backend. Idempotent; concurrent callers serialize and
    /// the initialization hook runs exactly once.
    async fn initialize(&self) -> BackendResult<()> {
        let lifecycle = self.lifecycle();
        if lifecycle.status() == BackendStatus::Initialized {
            return Ok(());
        }
        let _permit = lifecycle.acquire().await?;
        match lifecycle.status() {
            BackendStatus::Initialized => Ok(()),
            BackendStatus::NotInitialized => {
                lifecycle.transition(BackendStatus::NotInitialized, BackendStatus::Initializing)?;
                match self.initialize_core().await {
                    Ok(()) => {
                        lifecycle.transition(BackendStatus::Initializing, BackendStatus::Initialized)?;
                        debug!(backend = %self.debug_label(), "cache backend initialized");
                        Ok(())
                    }
                    Err(error) => {
                        lifecycle.transition(BackendStatus::Initializing, BackendStatus::Failed)?;
                        warn!(backend = %self.debug_label(), %error, "cache backend initialization failed");
                        Err(error)
                    }
                }
            }
            BackendStatus::Failed => Err(BackendError::invalid_operation(
                "a previous initialization attempt failed",
            )),
            status if status.is_disposed_class() => Err(BackendError::disposed(status)),
            status => Err(BackendError::assertion_failed(format!(
                "backend is {status} while the lifecycle permit is held"
            ))),
        }
    }

    /// Ensures the backend is usable, lazily initializing on first use.
    async fn ensure_initialized(&self) -> BackendResult<()> {
        match self.lifecycle().status() {
            BackendStatus::Initialized => Ok(()),
            BackendStatus::Failed => Err(BackendError::invalid_operation(
                "a previous initialization attempt failed",
            )),
            status if status.is_disposed_class() => Err(BackendError::disposed(status)),
            _ => self.initialize().await,
        }
    }

    /// Disposes the backend. Safe to call concurrently: exactly one caller
    /// runs the disposal hook, the others await its completion signal.
    async fn dispose(&self) -> BackendResult<()> {
        let lifecycle = self.lifecycle();
        if lifecycle.status().is_disposed_class() {
            return lifecycle.wait_disposed().await;
        }
        let permit = lifecycle.acquire().await?;
        let status = lifecycle.status();
        match status {
            BackendStatus::Disposed => Ok(()),
            BackendStatus::DisposeFailed => Err(BackendError::disposed(status)),
            BackendStatus::NotInitialized | BackendStatus::Initialized | BackendStatus::Failed => {
                lifecycle.transition(status, BackendStatus::Disposing)?;
                let result = self.dispose_core().await;
                match &result {
                    Ok(()) => {
                        lifecycle.transition(BackendStatus::Disposing, BackendStatus::Disposed)?;
                        debug!(backend = %self.debug_label(), "cache backend disposed");
                    }
                    Err(error) => {
                        lifecycle.transition(BackendStatus::Disposing, BackendStatus::DisposeFailed)?;
                        warn!(backend = %self.debug_label(), %error, "cache backend disposal failed");
                    }
                }
                drop(permit);
                lifecycle.notify_disposed();
                result
            }
            status => Err(BackendError::assertion_failed(format!(
                "backend is {status} while the lifecycle permit is held"
            ))),
        }
    }

    /// Stores an item under `key`.
    async fn set_item(&self, key: &str, item: CacheItem) -> BackendResult<()> {
        self.ensure_initialized().await?;
        self.validate_item(&item)?;
        let span = debug_span!("cache.set_item", backend = %self.debug_label(), key);
        let result = self.set_item_core(key, &item).instrument(span).await;
        if let Err(error) = &result {
            warn!(backend = %self.debug_label(), key, %error, "set_item failed");
        }
        result
    }

    /// Looks up an item, including its recorded dependencies.
    async fn get_item(&self, key: &str) -> BackendResult<Option<CacheValue>> {
        self.get_item_with(key, true).await
    }

    /// Looks up an item, optionally omitting its dependency list.
    ///
    /// A stale entry is evicted and reported as a miss unless the configured
    /// stale-item observer vetoes the suppression.
    async fn get_item_with(
        &self,
        key: &str,
        include_dependencies: bool,
    ) -> BackendResult<Option<CacheValue>> {
        self.ensure_initialized().await?;
        let span = debug_span!("cache.get_item", backend = %self.debug_label(), key);
        let result = self
            .get_item_core(key, include_dependencies)
            .instrument(span)
            .await;
        match result {
            Ok(value) => {
                debug!(
                    backend = %self.debug_label(),
                    key,
                    hit = value.is_some(),
                    "get_item"
                );
                Ok(value)
            }
            Err(error) if error.is_stale_item() => {
                let rethrow = self
                    .options()
                    .stale_item_observer
                    .as_ref()
                    .is_some_and(|observer| observer.should_rethrow(&error));
                if rethrow {
                    return Err(error);
                }
                warn!(
                    backend = %self.debug_label(),
                    key,
                    %error,
                    "evicting stale cached item"
                );
                if let Err(remove_error) = self.remove_item_core(key).await {
                    warn!(
                        backend = %self.debug_label(),
                        key,
                        error = %remove_error,
                        "failed to evict stale cached item"
                    );
                }
                Ok(None)
            }
            Err(error) => Err(error),
        }
    }

    /// Returns whether an item exists under `key`.
    async fn contains_item(&self, key: &str) -> BackendResult<bool> {
        self.ensure_initialized().await?;
        let span = debug_span!("cache.contains_item", backend = %self.debug_label(), key);
        self.contains_item_core(key).instrument(span).await
    }

    /// Removes the item under `key`, if any.
    async fn remove_item(&self, key: &str) -> BackendResult<()> {
        self.ensure_initialized().await?;
        let span = debug_span!("cache.remove_item", backend = %self.debug_label(), key);
        self.remove_item_core(key).instrument(span).await
    }

    /// Removes every item that declared the dependency `key`.
    async fn invalidate_dependency(&self, key: &str) -> BackendResult<()> {
        self.ensure_initialized().await?;
        if !self.features().dependencies {
            return Err(BackendError::not_supported("dependencies"));
        }
        let span = debug_span!("cache.invalidate_dependency", backend = %self.debug_label(), key);
        self.invalidate_dependency_core(key).instrument(span).await
    }

    /// Invalidates several dependency keys.
    async fn invalidate_dependencies(&self, keys: &[String]) -> BackendResult<()> {
        for key in keys {
            self.invalidate_dependency(key).await?;
        }
        Ok(())
    }

    /// Returns whether any item currently declares the dependency `key`.
    async fn contains_dependency(&self, key: &str) -> BackendResult<bool> {
        self.ensure_initialized().await?;
        let features = self.features();
        if !features.dependencies {
            return Err(BackendError::not_supported("dependencies"));
        }
        if !features.contains_dependency {
            return Err(BackendError::not_supported("contains_dependency"));
        }
        let span = debug_span!("cache.contains_dependency", backend = %self.debug_label(), key);
        self.contains_dependency_core(key).instrument(span).await
    }

    /// Removes all entries.
    async fn clear(&self) -> BackendResult<()> {
        self.ensure_initialized().await?;
        if !self.features().clear {
            return Err(BackendError::not_supported("clear"));
        }
        let span = debug_span!("cache.clear", backend = %self.debug_label());
        self.clear_core().instrument(span).await
    }

    /// Validates an item against this backend's capabilities.
    fn validate_item(&self, item: &CacheItem) -> BackendResult<()> {
        if let Some(configuration) = &item.configuration {
            if configuration.absolute_expiration.is_some()
                && configuration.sliding_expiration.is_some()
            {
                return Err(BackendError::invalid_argument(
                    "absolute and sliding expiration are mutually exclusive",
                ));
            }
            if configuration.priority == Some(CachePriority::NotRemovable)
                && configuration.has_expiration()
            {
                return Err(BackendError::invalid_argument(
                    "a not-removable item cannot have an expiration",
                ));
            }
        }
        if item.has_dependencies() && !self.features().dependencies {
            return Err(BackendError::invalid_argument(
                "this backend does not support dependencies",
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl<T: CacheBackend + ?Sized> CacheBackendExt for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::item::ItemConfiguration;

    // Compile-time test that CacheBackend is object-safe.
    fn _assert_backend_object_safe(_: &dyn CacheBackend) {}

    #[derive(Default)]
    struct TestBackend {
        id: Uuid,
        options: BackendOptions,
        lifecycle: Lifecycle,
        bus: EventBus,
        features: BackendFeatures,
        items: parking_lot::Mutex<HashMap<String, CacheItem>>,
        stale_keys: parking_lot::Mutex<HashSet<String>>,
        init_calls: AtomicUsize,
        dispose_calls: AtomicUsize,
        fail_initialize: bool,
    }

    impl TestBackend {
        fn new() -> Self {
            Self {
                id: Uuid::new_v4(),
                features: BackendFeatures::all(),
                bus: EventBus::new(),
                ..Self::default()
            }
        }

        fn with_features(features: BackendFeatures) -> Self {
            Self {
                features,
                ..Self::new()
            }
        }

        fn mark_stale(&self, key: &str) {
            self.stale_keys.lock().insert(key.to_string());
        }
    }

    #[async_trait]
    impl CacheBackend for TestBackend {
        fn id(&self) -> Uuid {
            self.id
        }

        fn backend_kind(&self) -> &'static str {
            "test"
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
            self.features
        }

        async fn set_item_core(&self, key: &str, item: &CacheItem) -> BackendResult<()> {
            self.items.lock().insert(key.to_string(), item.clone());
            Ok(())
        }

        async fn get_item_core(
            &self,
            key: &str,
            include_dependencies: bool,
        ) -> BackendResult<Option<CacheValue>> {
            if self.stale_keys.lock().contains(key) {
                return Err(BackendError::stale_item("simulated type mismatch"));
            }
            Ok(self.items.lock().get(key).map(|item| {
                let dependencies = include_dependencies
                    .then(|| item.dependencies.iter().flatten().cloned().collect::<Vec<_>>())
                    .filter(|deps: &Vec<String>| !deps.is_empty());
                CacheValue::new(item.value.clone(), dependencies)
            }))
        }

        async fn contains_item_core(&self, key: &str) -> BackendResult<bool> {
            Ok(self.items.lock().contains_key(key))
        }

        async fn remove_item_core(&self, key: &str) -> BackendResult<()> {
            self.items.lock().remove(key);
            self.stale_keys.lock().remove(key);
            Ok(())
        }

        async fn invalidate_dependency_core(&self, key: &str) -> BackendResult<()> {
            self.items.lock().retain(|_, item| {
                !item.dependencies.as_ref().is_some_and(|deps| deps.contains(key))
            });
            Ok(())
        }

        async fn contains_dependency_core(&self, key: &str) -> BackendResult<bool> {
            Ok(self.items.lock().values().any(|item| {
                item.dependencies.as_ref().is_some_and(|deps| deps.contains(key))
            }))
        }

        async fn clear_core(&self) -> BackendResult<()> {
            self.items.lock().clear();
            Ok(())
        }

        async fn initialize_core(&self) -> BackendResult<()> {
            self.init_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_initialize {
                return Err(BackendError::internal("simulated initialization failure"));
            }
            Ok(())
        }

        async fn dispose_core(&self) -> BackendResult<()> {
            self.dispose_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_lazy_initialization_is_idempotent() {
        let backend = TestBackend::new();
        assert_eq!(backend.lifecycle().status(), BackendStatus::NotInitialized);

        backend
            .set_item("k", CacheItem::new(serde_json::json!(1)))
            .await
            .expect("set");
        assert_eq!(backend.lifecycle().status(), BackendStatus::Initialized);

        backend.initialize().await.expect("initialize");
        backend.initialize().await.expect("initialize");
        assert_eq!(backend.init_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_initialize_runs_hook_once() {
        let backend = Arc::new(TestBackend::new());
        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let backend = backend.clone();
                tokio::spawn(async move { backend.initialize().await })
            })
            .collect();
        for task in tasks {
            task.await.expect("join").expect("initialize");
        }
        assert_eq!(backend.init_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_initialization_poisons_backend() {
        let backend = TestBackend {
            fail_initialize: true,
            ..TestBackend::new()
        };

        let error = backend.get_item("k").await.expect_err("should fail");
        assert!(matches!(error, BackendError::Internal { .. }));

        let error = backend.get_item("k").await.expect_err("should fail");
        assert!(matches!(error, BackendError::InvalidOperation { .. }));
    }

    #[tokio::test]
    async fn test_disposed_guard() {
        let backend = TestBackend::new();
        backend.initialize().await.expect("initialize");
        backend.dispose().await.expect("dispose");

        let error = backend
            .set_item("k", CacheItem::new(serde_json::Value::Null))
            .await
            .expect_err("should fail");
        assert!(error.is_disposed());
    }

    #[tokio::test]
    async fn test_concurrent_dispose_runs_hook_once() {
        let backend = Arc::new(TestBackend::new());
        backend.initialize().await.expect("initialize");

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let backend = backend.clone();
                tokio::spawn(async move { backend.dispose().await })
            })
            .collect();
        for task in tasks {
            task.await.expect("join").expect("dispose");
        }
        assert_eq!(backend.dispose_calls.load(Ordering::SeqCst), 1);
        assert_eq!(backend.lifecycle().status(), BackendStatus::Disposed);
    }

    #[tokio::test]
    async fn test_conflicting_expirations_rejected() {
        let backend = TestBackend::new();
        let item = CacheItem::new(serde_json::Value::Null).with_configuration(
            ItemConfiguration::new()
                .with_absolute_expiration(time::OffsetDateTime::now_utc())
                .with_sliding_expiration(Duration::from_secs(60)),
        );
        let error = backend.set_item("k", item).await.expect_err("should fail");
        assert!(matches!(error, BackendError::InvalidArgument { .. }));
    }

    #[tokio::test]
    async fn test_not_removable_with_expiration_rejected() {
        let backend = TestBackend::new();
        let item = CacheItem::new(serde_json::Value::Null).with_configuration(
            ItemConfiguration::new()
                .with_priority(CachePriority::NotRemovable)
                .with_sliding_expiration(Duration::from_secs(60)),
        );
        let error = backend.set_item("k", item).await.expect_err("should fail");
        assert!(matches!(error, BackendError::InvalidArgument { .. }));
    }

    #[tokio::test]
    async fn test_dependencies_rejected_when_unsupported() {
        let backend = TestBackend::with_features(BackendFeatures::minimal());
        let item = CacheItem::new(serde_json::Value::Null).with_dependency("d");
        let error = backend.set_item("k", item).await.expect_err("should fail");
        assert!(matches!(error, BackendError::InvalidArgument { .. }));
    }

    #[tokio::test]
    async fn test_feature_gated_invalidation() {
        let backend = TestBackend::with_features(BackendFeatures::minimal());
        backend
            .set_item("k", CacheItem::new(serde_json::json!(1)))
            .await
            .expect("set");

        let error = backend
            .invalidate_dependency("d")
            .await
            .expect_err("should fail");
        assert!(error.is_not_supported());
        assert!(backend.contains_item("k").await.expect("contains"));
    }

    #[tokio::test]
    async fn test_stale_item_self_healing() {
        let backend = TestBackend::new();
        backend
            .set_item("k", CacheItem::new(serde_json::json!(1)))
            .await
            .expect("set");
        backend.mark_stale("k");

        let value = backend.get_item("k").await.expect("get");
        assert!(value.is_none());
        assert!(!backend.contains_item("k").await.expect("contains"));
    }

    #[tokio::test]
    async fn test_stale_item_observer_veto() {
        struct Rethrow;
        impl StaleItemObserver for Rethrow {
            fn should_rethrow(&self, _: &BackendError) -> bool {
                true
            }
        }

        let backend = TestBackend {
            options: BackendOptions::new().with_stale_item_observer(Arc::new(Rethrow)),
            ..TestBackend::new()
        };
        backend
            .set_item("k", CacheItem::new(serde_json::json!(1)))
            .await
            .expect("set");
        backend.mark_stale("k");

        let error = backend.get_item("k").await.expect_err("should fail");
        assert!(error.is_stale_item());
    }

    #[tokio::test]
    async fn test_round_trip_values() {
        let backend = TestBackend::new();
        for value in [
            serde_json::Value::Null,
            serde_json::json!(42),
            serde_json::json!({"nested": ["x", "y"]}),
        ] {
            backend
                .set_item("k", CacheItem::new(value.clone()))
                .await
                .expect("set");
            let got = backend.get_item("k").await.expect("get").expect("hit");
            assert_eq!(got.value, value);
        }

        let item = CacheItem::new(serde_json::json!("v")).with_dependency("d");
        backend.set_item("with-deps", item).await.expect("set");
        let got = backend
            .get_item("with-deps")
            .await
            .expect("get")
            .expect("hit");
        assert_eq!(got.dependencies, Some(vec!["d".to_string()]));
        let got = backend
            .get_item_with("with-deps", false)
            .await
            .expect("get")
            .expect("hit");
        assert!(got.dependencies.is_none());
    }
}
