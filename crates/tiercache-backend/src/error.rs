//! Error types for cache backend operations.
//!
//! This module defines all error classes that can surface from a backend,
//! together with a coarse category used for logging and monitoring.

use std::fmt;

use crate::lifecycle::BackendStatus;

/// Errors that can occur during cache backend operations.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The backend has been disposed (or disposal is in progress) and can no
    /// longer serve operations.
    #[error("cache backend is no longer usable (status: {status})")]
    Disposed {
        /// The lifecycle status observed at the time of the call.
        status: BackendStatus,
    },

    /// The operation is not valid in the backend's current state, e.g.
    /// re-initializing after a failed initialization attempt.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },

    /// An internal invariant did not hold. This indicates a programming error
    /// (such as a lifecycle transition failing under compare-and-swap) and is
    /// never suppressed.
    #[error("assertion failed: {message}")]
    AssertionFailed {
        /// Description of the violated invariant.
        message: String,
    },

    /// A caller-supplied argument was rejected, e.g. conflicting expiration
    /// settings on a cache item.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the rejected argument.
        message: String,
    },

    /// A feature-gated operation was invoked against a backend that does not
    /// advertise the required feature.
    #[error("operation requires the `{feature}` feature, which this backend does not support")]
    NotSupported {
        /// The missing feature.
        feature: String,
    },

    /// A cached entry could not be materialized (deserialization or type
    /// mismatch), typically because code or settings changed since it was
    /// written. Recoverable: the entry is evicted and the read reports a miss.
    #[error("stale cached item: {message}")]
    StaleItem {
        /// Description of why the entry is unusable.
        message: String,
    },

    /// A per-entry or per-dependency lock could not be acquired in time.
    #[error("timed out acquiring lock for `{key}`")]
    LockTimeout {
        /// The key whose lock acquisition timed out.
        key: String,
    },

    /// An infrastructure-level error from a concrete backend implementation.
    #[error("internal cache error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl BackendError {
    /// Creates a new `Disposed` error.
    #[must_use]
    pub fn disposed(status: BackendStatus) -> Self {
        Self::Disposed { status }
    }

    /// Creates a new `InvalidOperation` error.
    #[must_use]
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates a new `AssertionFailed` error.
    ///
    /// Debug builds additionally assert eagerly so the failure is caught at
    /// the point of corruption.
    #[must_use]
    pub fn assertion_failed(message: impl Into<String>) -> Self {
        let message = message.into();
        debug_assert!(false, "{message}");
        Self::AssertionFailed { message }
    }

    /// Creates a new `InvalidArgument` error.
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a new `NotSupported` error naming the missing feature.
    #[must_use]
    pub fn not_supported(feature: impl Into<String>) -> Self {
        Self::NotSupported {
            feature: feature.into(),
        }
    }

    /// Creates a new `StaleItem` error.
    #[must_use]
    pub fn stale_item(message: impl Into<String>) -> Self {
        Self::StaleItem {
            message: message.into(),
        }
    }

    /// Creates a new `LockTimeout` error.
    #[must_use]
    pub fn lock_timeout(key: impl Into<String>) -> Self {
        Self::LockTimeout { key: key.into() }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` if this is a disposed-state error.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        matches!(self, Self::Disposed { .. })
    }

    /// Returns `true` if this is a stale-cached-item error.
    #[must_use]
    pub fn is_stale_item(&self) -> bool {
        matches!(self, Self::StaleItem { .. })
    }

    /// Returns `true` if this is a not-supported error.
    #[must_use]
    pub fn is_not_supported(&self) -> bool {
        matches!(self, Self::NotSupported { .. })
    }

    /// Returns `true` if this error indicates a programming error that must
    /// never be swallowed.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::AssertionFailed { .. })
    }

    /// Returns the error category for logging/monitoring purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Disposed { .. } | Self::InvalidOperation { .. } => ErrorCategory::State,
            Self::AssertionFailed { .. } => ErrorCategory::Fatal,
            Self::InvalidArgument { .. } => ErrorCategory::Validation,
            Self::NotSupported { .. } => ErrorCategory::NotSupported,
            Self::StaleItem { .. } => ErrorCategory::Stale,
            Self::LockTimeout { .. } => ErrorCategory::Timeout,
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }
}

/// Categories of backend errors for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Lifecycle-state error (disposed, invalid operation).
    State,
    /// Fatal invariant violation.
    Fatal,
    /// Argument validation error.
    Validation,
    /// Feature-gated operation against an unsupporting backend.
    NotSupported,
    /// Stale cached item (recoverable).
    Stale,
    /// Lock acquisition timeout.
    Timeout,
    /// Infrastructure error.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::State => write!(f, "state"),
            Self::Fatal => write!(f, "fatal"),
            Self::Validation => write!(f, "validation"),
            Self::NotSupported => write!(f, "not_supported"),
            Self::Stale => write!(f, "stale"),
            Self::Timeout => write!(f, "timeout"),
            Self::Internal => write!(f, "internal"),
        }
    }
}
