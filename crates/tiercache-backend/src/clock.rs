//! Injectable time source.
//!
//! Versioning timestamps (two-layer reconciliation, tombstones) come from a
//! [`Clock`] rather than hidden static state, so tests can order timestamps
//! deterministically.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use time::OffsetDateTime;

/// Monotonically increasing wall-clock ticks, in nanoseconds since the Unix
/// epoch.
pub type Ticks = i64;

/// A source of wall-clock time and versioning ticks.
pub trait Clock: Send + Sync {
    /// Current versioning timestamp.
    fn ticks(&self) -> Ticks;

    /// Current wall-clock instant.
    fn now(&self) -> OffsetDateTime;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn ticks(&self) -> Ticks {
        // i64 nanoseconds cover well past the year 2200.
        OffsetDateTime::now_utc().unix_timestamp_nanos() as i64
    }

    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// A manually driven clock for tests and simulations.
#[derive(Debug)]
pub struct ManualClock {
    nanos: AtomicI64,
}

impl ManualClock {
    /// Creates a clock positioned at the given nanosecond offset from the
    /// Unix epoch.
    #[must_use]
    pub fn starting_at(nanos: Ticks) -> Arc<Self> {
        Arc::new(Self {
            nanos: AtomicI64::new(nanos),
        })
    }

    /// Creates a clock positioned at the current system time.
    #[must_use]
    pub fn now() -> Arc<Self> {
        Self::starting_at(SystemClock.ticks())
    }

    /// Advances the clock.
    pub fn advance(&self, by: Duration) {
        self.nanos.fetch_add(by.as_nanos() as i64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn ticks(&self) -> Ticks {
        self.nanos.load(Ordering::SeqCst)
    }

    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp_nanos(i128::from(self.ticks()))
            .unwrap_or(OffsetDateTime::UNIX_EPOCH)
    }
}

/// Type alias for a shareable clock.
pub type DynClock = Arc<dyn Clock>;
