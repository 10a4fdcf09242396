//! # tiercache-layered
//!
//! Composition layers for TierCache backends.
//!
//! Two enhancers give any backend distributed-caching properties:
//!
//! - [`TwoLayerEnhancer`] puts a fast local in-memory tier in front of an
//!   authoritative remote backend, with read-through population,
//!   write-through duplication, and tombstone-based staleness reconciliation
//!   when the remote tier is non-blocking.
//! - [`NonBlockingEnhancer`] defers write operations to a FIFO background
//!   queue, so callers return as soon as the write is enqueued.
//!
//! Enhancers compose through the single underlying-backend wrapping
//! contract: each implements `CacheBackend` and holds an
//! `Arc<dyn CacheBackend>`; [`LayeredCacheBuilder`] chains them.

mod builder;
mod non_blocking;
mod relay;
mod two_layer;

pub use builder::LayeredCacheBuilder;
pub use non_blocking::NonBlockingEnhancer;
pub use two_layer::{DEFAULT_TOMBSTONE_TTL, LayeredValue, TwoLayerEnhancer, TwoLayerOptions};

// Re-export the contract for convenience.
pub use tiercache_backend::{CacheBackend, CacheBackendExt, DynBackend};
