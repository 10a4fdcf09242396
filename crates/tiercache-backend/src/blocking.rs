//! Synchronous facade over the async backend surface.
//!
//! [`BlockingCache`] exposes the guarded operation set to non-async callers
//! by blocking on a captured runtime handle, in the style of
//! `reqwest::blocking`. The methods must be called from outside the runtime's
//! worker threads; calling them from within an async context panics (a
//! limitation of `Handle::block_on`).

use std::sync::Arc;

use tokio::runtime::Handle;

use crate::BackendResult;
use crate::backend::{CacheBackend, CacheBackendExt};
use crate::error::BackendError;
use crate::item::{CacheItem, CacheValue};

/// Blocking wrapper around a shared backend.
#[derive(Clone)]
pub struct BlockingCache {
    backend: Arc<dyn CacheBackend>,
    handle: Handle,
}

impl BlockingCache {
    /// Wraps `backend`, driving its operations on the given runtime handle.
    #[must_use]
    pub fn new(backend: Arc<dyn CacheBackend>, handle: Handle) -> Self {
        Self { backend, handle }
    }

    /// Wraps `backend` using the ambient runtime.
    ///
    /// # Errors
    ///
    /// Fails when called outside a tokio runtime.
    pub fn current(backend: Arc<dyn CacheBackend>) -> BackendResult<Self> {
        let handle = Handle::try_current()
            .map_err(|_| BackendError::invalid_operation("no tokio runtime available"))?;
        Ok(Self::new(backend, handle))
    }

    /// The wrapped backend.
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn CacheBackend> {
        &self.backend
    }

    /// See [`CacheBackendExt::initialize`].
    pub fn initialize(&self) -> BackendResult<()> {
        self.handle.block_on(self.backend.initialize())
    }

    /// See [`CacheBackendExt::set_item`].
    pub fn set_item(&self, key: &str, item: CacheItem) -> BackendResult<()> {
        self.handle.block_on(self.backend.set_item(key, item))
    }

    /// See [`CacheBackendExt::get_item`].
    pub fn get_item(&self, key: &str) -> BackendResult<Option<CacheValue>> {
        self.handle.block_on(self.backend.get_item(key))
    }

    /// See [`CacheBackendExt::contains_item`].
    pub fn contains_item(&self, key: &str) -> BackendResult<bool> {
        self.handle.block_on(self.backend.contains_item(key))
    }

    /// See [`CacheBackendExt::remove_item`].
    pub fn remove_item(&self, key: &str) -> BackendResult<()> {
        self.handle.block_on(self.backend.remove_item(key))
    }

    /// See [`CacheBackendExt::invalidate_dependency`].
    pub fn invalidate_dependency(&self, key: &str) -> BackendResult<()> {
        self.handle.block_on(self.backend.invalidate_dependency(key))
    }

    /// See [`CacheBackendExt::contains_dependency`].
    pub fn contains_dependency(&self, key: &str) -> BackendResult<bool> {
        self.handle.block_on(self.backend.contains_dependency(key))
    }

    /// See [`CacheBackendExt::clear`].
    pub fn clear(&self) -> BackendResult<()> {
        self.handle.block_on(self.backend.clear())
    }

    /// See [`CacheBackendExt::dispose`].
    pub fn dispose(&self) -> BackendResult<()> {
        self.handle.block_on(self.backend.dispose())
    }
}

impl std::fmt::Debug for BlockingCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingCache")
            .field("backend", &self.backend.backend_kind())
            .finish()
    }
}
