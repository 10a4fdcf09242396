//! Cache item and value types.
//!
//! A [`CacheItem`] is what callers hand to a backend at set-time; it is
//! immutable once passed. A [`CacheValue`] is what get-operations produce.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Relative priority of a cached entry, used by eviction policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CachePriority {
    /// Evicted first under memory pressure.
    Low,
    /// Normal priority.
    #[default]
    Default,
    /// Evicted last under memory pressure.
    High,
    /// Never evicted for capacity reasons. Incompatible with expiration.
    NotRemovable,
}

impl std::fmt::Display for CachePriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Default => write!(f, "default"),
            Self::High => write!(f, "high"),
            Self::NotRemovable => write!(f, "not_removable"),
        }
    }
}

/// Per-item caching configuration.
///
/// Absolute and sliding expiration are mutually exclusive; the combination is
/// rejected at set-time, not at construction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemConfiguration {
    /// Instant after which the entry is no longer served.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde(with = "time::serde::rfc3339::option")]
    pub absolute_expiration: Option<OffsetDateTime>,
    /// Idle duration after which the entry is no longer served.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sliding_expiration: Option<Duration>,
    /// Eviction priority.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<CachePriority>,
    /// Name of the caching profile this configuration was derived from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_name: Option<String>,
    /// Whether the item should be reloaded automatically upon invalidation.
    /// Only meaningful to a local tier; stripped before writes to a remote
    /// tier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_reload: Option<bool>,
}

impl ItemConfiguration {
    /// Creates an empty configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the absolute expiration instant.
    #[must_use]
    pub fn with_absolute_expiration(mut self, at: OffsetDateTime) -> Self {
        self.absolute_expiration = Some(at);
        self
    }

    /// Sets the sliding expiration duration.
    #[must_use]
    pub fn with_sliding_expiration(mut self, after: Duration) -> Self {
        self.sliding_expiration = Some(after);
        self
    }

    /// Sets the eviction priority.
    #[must_use]
    pub fn with_priority(mut self, priority: CachePriority) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Sets the profile name.
    #[must_use]
    pub fn with_profile(mut self, name: impl Into<String>) -> Self {
        self.profile_name = Some(name.into());
        self
    }

    /// Sets the auto-reload flag.
    #[must_use]
    pub fn with_auto_reload(mut self, auto_reload: bool) -> Self {
        self.auto_reload = Some(auto_reload);
        self
    }

    /// Returns `true` if any expiration is configured.
    #[must_use]
    pub fn has_expiration(&self) -> bool {
        self.absolute_expiration.is_some() || self.sliding_expiration.is_some()
    }
}

/// A value to be stored in a cache backend, together with its dependencies
/// and configuration. Immutable once passed to a backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheItem {
    /// The opaque cached payload.
    pub value: serde_json::Value,
    /// Dependency keys this item declares. Invalidating any of them evicts
    /// the item.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<BTreeSet<String>>,
    /// Optional per-item configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<ItemConfiguration>,
}

impl CacheItem {
    /// Creates a new item holding `value` with no dependencies and no
    /// configuration.
    #[must_use]
    pub fn new(value: serde_json::Value) -> Self {
        Self {
            value,
            dependencies: None,
            configuration: None,
        }
    }

    /// Adds a dependency key.
    #[must_use]
    pub fn with_dependency(mut self, key: impl Into<String>) -> Self {
        self.dependencies
            .get_or_insert_with(BTreeSet::new)
            .insert(key.into());
        self
    }

    /// Replaces the dependency set.
    #[must_use]
    pub fn with_dependencies(mut self, keys: impl IntoIterator<Item = String>) -> Self {
        self.dependencies = Some(keys.into_iter().collect());
        self
    }

    /// Sets the configuration.
    #[must_use]
    pub fn with_configuration(mut self, configuration: ItemConfiguration) -> Self {
        self.configuration = Some(configuration);
        self
    }

    /// Returns `true` if this item declares at least one dependency.
    #[must_use]
    pub fn has_dependencies(&self) -> bool {
        self.dependencies.as_ref().is_some_and(|d| !d.is_empty())
    }
}

/// A value retrieved from a cache backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheValue {
    /// The opaque cached payload.
    pub value: serde_json::Value,
    /// The dependency keys recorded for the item, if the caller asked for
    /// them and the backend tracks dependencies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<Vec<String>>,
}

impl CacheValue {
    /// Creates a new cache value.
    #[must_use]
    pub fn new(value: serde_json::Value, dependencies: Option<Vec<String>>) -> Self {
        Self {
            value,
            dependencies,
        }
    }

    /// Drops the dependency list, e.g. when the caller did not request it.
    #[must_use]
    pub fn without_dependencies(mut self) -> Self {
        self.dependencies = None;
        self
    }
}
