//! # tiercache-memory
//!
//! In-memory cache backend for TierCache.
//!
//! This crate provides [`MemoryBackend`], an implementation of the
//! `CacheBackend` trait from `tiercache-backend` over an expiring key-value
//! store with eviction notifications, plus the reverse dependency index that
//! makes dependency invalidation work.
//!
//! # Example
//!
//! ```ignore
//! use tiercache_backend::{CacheBackendExt, CacheItem};
//! use tiercache_memory::{MemoryBackend, MemoryBackendOptions};
//!
//! let backend = MemoryBackend::new(MemoryBackendOptions::new());
//! backend.set_item("user:1", CacheItem::new(serde_json::json!({"name": "Ada"}))).await?;
//! let value = backend.get_item("user:1").await?;
//! ```

mod backend;
pub mod dependency;
pub mod store;

pub use backend::{
    LocalLookup, MemoryBackend, MemoryBackendOptions, ValueSerializer, ValueSizer,
};
pub use dependency::BackwardSet;
pub use store::{
    EntryPolicy, EvictionCause, EvictionListener, EvictionNotice, ExpiringStore, StorePriority,
    StoredPayload,
};

// Re-export the contract for convenience.
pub use tiercache_backend::{CacheBackend, CacheBackendExt};
