//! # Timestamp Allocation
//!
//! Entry timestamps come from a coarse seconds clock offset by a base epoch.
//! The allocator bumps any candidate that does not move forward, so issued
//! values are strictly increasing and unique even when the clock stalls or
//! steps backward.
//!
//! Under bursty logging the issued values can run ahead of the clock. At the
//! rates this log is meant for (rare diagnostic events) the drift is a few
//! seconds at most; a clock that jumps backward by more than the number of
//! entries written per tick keeps the log ahead of wall time until the clock
//! catches up.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

use crate::codec::ERASED_TIMESTAMP;
use crate::error::FlashLogError;

/// Source of uptime in whole seconds
pub trait Clock: Send + Sync {
    /// Seconds since boot
    fn uptime_secs(&self) -> u32;
}

impl<C: Clock + ?Sized> Clock for std::sync::Arc<C> {
    fn uptime_secs(&self) -> u32 {
        (**self).uptime_secs()
    }
}

/// Real clock measuring uptime from construction
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    started: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn uptime_secs(&self) -> u32 {
        u32::try_from(self.started.elapsed().as_secs()).unwrap_or(u32::MAX)
    }
}

/// Hand-driven clock for tests and simulation
#[derive(Debug, Default)]
pub struct ManualClock {
    secs: AtomicU32,
}

impl ManualClock {
    pub fn new(secs: u32) -> Self {
        Self {
            secs: AtomicU32::new(secs),
        }
    }

    /// Jump to an absolute uptime, backward jumps included
    pub fn set(&self, secs: u32) {
        self.secs.store(secs, Ordering::Release);
    }

    pub fn advance(&self, secs: u32) {
        self.secs.fetch_add(secs, Ordering::AcqRel);
    }
}

impl Clock for ManualClock {
    fn uptime_secs(&self) -> u32 {
        self.secs.load(Ordering::Acquire)
    }
}

/// Issues strictly increasing timestamps
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampAllocator {
    base: u32,
    last: u32,
}

impl TimestampAllocator {
    /// Seed from the newest timestamp found in flash.
    pub fn seeded(last_seen: u32) -> Self {
        Self {
            base: last_seen.saturating_add(1),
            last: last_seen,
        }
    }

    /// Current time on the log's scale
    pub fn now(&self, uptime_secs: u32) -> u32 {
        self.base.wrapping_add(uptime_secs)
    }

    /// Last issued (or seeded) timestamp
    pub fn last_allocated(&self) -> u32 {
        self.last
    }

    /// Move the epoch so that `now()` reads `value` at the given uptime.
    pub fn set_base(&mut self, value: u32, uptime_secs: u32) -> Result<(), FlashLogError> {
        if value <= self.last || value == ERASED_TIMESTAMP {
            return Err(FlashLogError::InvalidTimestamp {
                value,
                last: self.last,
            });
        }
        self.base = value.wrapping_sub(uptime_secs);
        Ok(())
    }

    /// Issue the next timestamp.
    pub fn allocate(&mut self, uptime_secs: u32) -> Result<u32, FlashLogError> {
        let candidate = self.now(uptime_secs);
        let stamp = if candidate <= self.last {
            self.last.checked_add(1).ok_or(FlashLogError::TimestampExhausted)?
        } else {
            candidate
        };
        if stamp == ERASED_TIMESTAMP {
            return Err(FlashLogError::TimestampExhausted);
        }
        self.last = stamp;
        Ok(stamp)
    }
}
