//! # tiercache-backend
//!
//! Backend contract for the TierCache caching library.
//!
//! This crate defines the traits and types every physical cache store must
//! implement. It does not contain storage implementations — those live in
//! separate crates (`tiercache-memory` for the in-process store,
//! `tiercache-layered` for the composition layers).
//!
//! ## Overview
//!
//! The central trait is [`CacheBackend`], the core operation set of a
//! backend: set/get/contains/remove, dependency invalidation and clear, plus
//! lifecycle hooks. Callers use the guarded surface on [`CacheBackendExt`],
//! which adds lazy initialization, argument validation, feature gating,
//! tracing and stale-item recovery on top of the core methods.
//!
//! Every backend owns a [`Lifecycle`] (the initialization/disposal state
//! machine) and an [`EventBus`] publishing [`CacheEvent`]s; which operations
//! are legal against a backend is described by its [`BackendFeatures`].
//!
//! ## Implementing a backend
//!
//! ```ignore
//! use async_trait::async_trait;
//! use tiercache_backend::{BackendResult, CacheBackend, CacheItem, CacheValue};
//!
//! struct MyBackend { /* ... */ }
//!
//! #[async_trait]
//! impl CacheBackend for MyBackend {
//!     async fn set_item_core(&self, key: &str, item: &CacheItem) -> BackendResult<()> {
//!         // Implementation
//!     }
//!     // ... other methods
//! }
//! ```

pub mod backend;
pub mod blocking;
pub mod clock;
mod error;
mod events;
mod features;
mod item;
mod lifecycle;
pub mod tasks;

pub use backend::{BackendOptions, CacheBackend, CacheBackendExt, StaleItemObserver};
pub use blocking::BlockingCache;
pub use clock::{Clock, DynClock, ManualClock, SystemClock, Ticks};
pub use error::{BackendError, ErrorCategory};
pub use events::{CacheEvent, EventBus, ItemRemovedReason};
pub use features::BackendFeatures;
pub use item::{CacheItem, CachePriority, CacheValue, ItemConfiguration};
pub use lifecycle::{BackendStatus, Lifecycle};
pub use tasks::TaskScheduler;

/// Type alias for a backend operation result.
pub type BackendResult<T> = Result<T, BackendError>;

/// Type alias for a shared backend trait object.
pub type DynBackend = std::sync::Arc<dyn CacheBackend>;

/// Prelude module for convenient imports.
///
/// ```ignore
/// use tiercache_backend::prelude::*;
/// ```
pub mod prelude {
    pub use crate::backend::{BackendOptions, CacheBackend, CacheBackendExt, StaleItemObserver};
    pub use crate::clock::{Clock, DynClock, SystemClock, Ticks};
    pub use crate::error::{BackendError, ErrorCategory};
    pub use crate::events::{CacheEvent, EventBus, ItemRemovedReason};
    pub use crate::features::BackendFeatures;
    pub use crate::item::{CacheItem, CachePriority, CacheValue, ItemConfiguration};
    pub use crate::lifecycle::{BackendStatus, Lifecycle};
    pub use crate::{BackendResult, DynBackend};
}
