//! Backend lifecycle state machine.
//!
//! Every backend owns a [`Lifecycle`]: an atomic status cell with
//! compare-and-swap guarded transitions, a single-permit semaphore that
//! serializes initialization and disposal across the sync and async paths,
//! and a completion signal that concurrent disposers wait on instead of
//! re-entering disposal logic.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use tokio::sync::{Notify, Semaphore, SemaphorePermit};

use crate::error::BackendError;
use crate::BackendResult;

/// Lifecycle status of a cache backend.
///
/// Legal transitions:
/// `NotInitialized`/`Initializing` → `Initialized`,
/// `NotInitialized`/`Initialized`/`Failed` → `Disposing`,
/// `Disposing` → `Disposed`/`DisposeFailed`.
/// `Failed` is reached only from `Initializing` and is internal to the
/// initialization path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BackendStatus {
    /// Constructed but not yet initialized. Operations trigger lazy
    /// initialization from this state.
    NotInitialized = 0,
    /// Initialization in progress.
    Initializing = 1,
    /// Ready to serve operations.
    Initialized = 2,
    /// Disposal in progress.
    Disposing = 3,
    /// Disposed successfully; terminal.
    Disposed = 4,
    /// Disposal failed; terminal.
    DisposeFailed = 5,
    /// A prior initialization attempt failed.
    Failed = 6,
}

impl BackendStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::NotInitialized,
            1 => Self::Initializing,
            2 => Self::Initialized,
            3 => Self::Disposing,
            4 => Self::Disposed,
            5 => Self::DisposeFailed,
            _ => Self::Failed,
        }
    }

    /// Returns `true` if the backend is being or has been disposed.
    #[must_use]
    pub fn is_disposed_class(&self) -> bool {
        matches!(self, Self::Disposing | Self::Disposed | Self::DisposeFailed)
    }

    /// Returns `true` if no further transitions are possible.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Disposed | Self::DisposeFailed)
    }
}

impl fmt::Display for BackendStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotInitialized => write!(f, "not_initialized"),
            Self::Initializing => write!(f, "initializing"),
            Self::Initialized => write!(f, "initialized"),
            Self::Disposing => write!(f, "disposing"),
            Self::Disposed => write!(f, "disposed"),
            Self::DisposeFailed => write!(f, "dispose_failed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Lifecycle state shared by every backend.
///
/// Status transitions are lock-free compare-and-swap operations; the
/// semaphore serializes the initialize/dispose critical sections, and the
/// notify handle signals disposal completion to concurrent disposers.
pub struct Lifecycle {
    status: AtomicU8,
    guard: Semaphore,
    dispose_signal: Notify,
}

impl Lifecycle {
    /// Creates a lifecycle in the `NotInitialized` state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            status: AtomicU8::new(BackendStatus::NotInitialized as u8),
            guard: Semaphore::new(1),
            dispose_signal: Notify::new(),
        }
    }

    /// Returns the current status.
    #[must_use]
    pub fn status(&self) -> BackendStatus {
        BackendStatus::from_u8(self.status.load(Ordering::SeqCst))
    }

    /// Attempts the `from` → `to` transition, returning whether it happened.
    pub fn try_transition(&self, from: BackendStatus, to: BackendStatus) -> bool {
        self.status
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Performs the `from` → `to` transition.
    ///
    /// A failed compare-and-swap here means the status changed underneath a
    /// caller that held exclusive rights to it, which implies concurrent
    /// corruption: the resulting error is fatal and must never be suppressed.
    pub fn transition(&self, from: BackendStatus, to: BackendStatus) -> BackendResult<()> {
        if self.try_transition(from, to) {
            Ok(())
        } else {
            Err(BackendError::assertion_failed(format!(
                "unexpected lifecycle transition failure: {from} -> {to} (current: {})",
                self.status()
            )))
        }
    }

    /// Acquires the initialize/dispose serialization permit.
    pub async fn acquire(&self) -> BackendResult<SemaphorePermit<'_>> {
        self.guard
            .acquire()
            .await
            .map_err(|_| BackendError::assertion_failed("lifecycle semaphore closed"))
    }

    /// Wakes all tasks waiting for disposal to complete.
    pub fn notify_disposed(&self) {
        self.dispose_signal.notify_waiters();
    }

    /// Waits until a disposal started by another caller reaches a terminal
    /// state, then reports its outcome.
    pub async fn wait_disposed(&self) -> BackendResult<()> {
        loop {
            // Register interest before re-reading the status so a signal
            // between the check and the await is not lost.
            let notified = self.dispose_signal.notified();
            match self.status() {
                BackendStatus::Disposed => return Ok(()),
                BackendStatus::DisposeFailed => {
                    return Err(BackendError::disposed(BackendStatus::DisposeFailed));
                }
                BackendStatus::Disposing => notified.await,
                other => {
                    return Err(BackendError::assertion_failed(format!(
                        "waited for disposal but backend is {other}"
                    )));
                }
            }
        }
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifecycle")
            .field("status", &self.status())
            .finish()
    }
}
