//! Builds a layered backend from a base backend plus enhancement steps.

use std::sync::Arc;

use tiercache_backend::{BackendOptions, DynBackend, DynClock, SystemClock};
use tiercache_memory::{MemoryBackend, MemoryBackendOptions};

use crate::non_blocking::NonBlockingEnhancer;
use crate::two_layer::{TwoLayerEnhancer, TwoLayerOptions};

enum Step {
    NonBlocking { options: BackendOptions },
    LocalLayer {
        memory: MemoryBackendOptions,
        two_layer: TwoLayerOptions,
    },
}

/// Builder composing enhancers around a base backend.
///
/// Steps apply inside-out: the first step wraps the base backend, the next
/// wraps the result, and so on. A typical distributed setup is
/// `non_blocking()` followed by `with_local_layer(...)`.
///
/// ```ignore
/// use tiercache_layered::LayeredCacheBuilder;
///
/// let cache = LayeredCacheBuilder::new(redis_backend)
///     .non_blocking()
///     .with_local_layer(MemoryBackendOptions::new(), TwoLayerOptions::new())
///     .build();
/// ```
pub struct LayeredCacheBuilder {
    base: DynBackend,
    clock: DynClock,
    steps: Vec<Step>,
}

impl LayeredCacheBuilder {
    /// Starts from a base backend.
    #[must_use]
    pub fn new(base: DynBackend) -> Self {
        Self {
            base,
            clock: Arc::new(SystemClock),
            steps: Vec::new(),
        }
    }

    /// Uses an injected clock for all layers that need one.
    #[must_use]
    pub fn with_clock(mut self, clock: DynClock) -> Self {
        self.clock = clock;
        self
    }

    /// Defers write operations to a background queue.
    #[must_use]
    pub fn non_blocking(self) -> Self {
        self.non_blocking_with(BackendOptions::default())
    }

    /// Defers write operations to a background queue, with options.
    #[must_use]
    pub fn non_blocking_with(mut self, options: BackendOptions) -> Self {
        self.steps.push(Step::NonBlocking { options });
        self
    }

    /// Adds a local in-memory layer in front of the current stack.
    #[must_use]
    pub fn with_local_layer(
        mut self,
        memory: MemoryBackendOptions,
        two_layer: TwoLayerOptions,
    ) -> Self {
        self.steps.push(Step::LocalLayer { memory, two_layer });
        self
    }

    /// Composes the stack. Must be called within a tokio runtime.
    #[must_use]
    pub fn build(self) -> DynBackend {
        let clock = self.clock;
        let mut backend = self.base;
        for step in self.steps {
            backend = match step {
                Step::NonBlocking { options } => {
                    Arc::new(NonBlockingEnhancer::new(backend, options))
                }
                Step::LocalLayer { memory, two_layer } => {
                    let local = MemoryBackend::with_clock(memory, clock.clone());
                    Arc::new(TwoLayerEnhancer::with_clock(
                        local,
                        backend,
                        two_layer,
                        clock.clone(),
                    ))
                }
            };
        }
        backend
    }
}

impl std::fmt::Debug for LayeredCacheBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayeredCacheBuilder")
            .field("base", &self.base.backend_kind())
            .field("steps", &self.steps.len())
            .finish()
    }
}
