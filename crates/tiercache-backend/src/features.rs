//! Backend capability descriptor.

use serde::{Deserialize, Serialize};

/// The set of capabilities a backend advertises.
///
/// Feature-gated operations check the corresponding flag before delegating;
/// invoking one against a backend that does not advertise it fails with a
/// not-supported error naming the feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendFeatures {
    /// Items may declare dependency keys, and dependencies can be
    /// invalidated.
    pub dependencies: bool,
    /// `contains_dependency` can answer reliably.
    pub contains_dependency: bool,
    /// The backend raises `ItemRemoved`/`DependencyInvalidated` events.
    pub events: bool,
    /// The backend supports clearing all entries.
    pub clear: bool,
    /// Write operations complete before returning to the caller. A
    /// non-blocking backend defers writes, so a subsequent synchronous
    /// existence check cannot be trusted.
    pub blocking: bool,
}

impl BackendFeatures {
    /// Features of a backend that supports everything and completes writes
    /// synchronously.
    #[must_use]
    pub fn all() -> Self {
        Self {
            dependencies: true,
            contains_dependency: true,
            events: true,
            clear: true,
            blocking: true,
        }
    }

    /// Features of a minimal key-value backend.
    #[must_use]
    pub fn minimal() -> Self {
        Self {
            dependencies: false,
            contains_dependency: false,
            events: false,
            clear: false,
            blocking: true,
        }
    }
}

impl Default for BackendFeatures {
    fn default() -> Self {
        Self::minimal()
    }
}

impl std::fmt::Display for BackendFeatures {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "dependencies={} contains_dependency={} events={} clear={} blocking={}",
            self.dependencies, self.contains_dependency, self.events, self.clear, self.blocking
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_presets() {
        assert!(BackendFeatures::all().dependencies);
        assert!(!BackendFeatures::minimal().events);
        assert!(BackendFeatures::minimal().blocking);
    }
}
