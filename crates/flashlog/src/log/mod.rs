//! Flash event log
//!
//! [`FlashLog`] owns the flash region and every piece of mutable state that
//! goes with it: write cursor, read context, timestamp allocator and failure
//! counters. It is built once by [`FlashLogBuilder::init`], which runs the
//! startup scan and recovery before the log accepts callers.
//!
//! ## Operations
//!
//! - [`FlashLog::add_event`]: append an entry, compacting first when full
//! - [`FlashLog::dequeue`]: resumable forward scan by timestamp
//! - [`FlashLog::compact`]: keep the trailing preserve window, erase the rest
//! - [`FlashLog::erase`]: wipe the region
//!
//! Every operation takes the non-blocking [`AccessGuard`]; a caller that
//! finds it taken gets [`FlashLogError::Busy`] and retries later.

mod append;
mod compaction;
mod dequeue;
mod recovery;

pub use compaction::CompactionStats;
pub use recovery::{RecoveryAction, RecoveryReport};

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::MutexGuard;
use tracing::{info, trace};

use crate::codec::{self, EntryHeader, MAX_ENTRY_SIZE};
use crate::config::FlashLogConfig;
use crate::error::{FlashError, FlashLogError};
use crate::flash::{AccessControl, FlashDriver, NoAccessControl, with_access};
use crate::guard::AccessGuard;
use crate::platform::{HostPlatform, Platform};
use crate::shared_mem::SharedMemory;
use crate::timestamp::{Clock, SystemClock, TimestampAllocator};

/// Resumable scan position for [`FlashLog::dequeue`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadContext {
    /// Offset of the next entry to inspect
    pub cursor: u16,
    /// Timestamp of the entry last handed out
    pub prev_timestamp: u32,
}

impl ReadContext {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Mutable state behind the guard
#[derive(Debug)]
pub(crate) struct LogState<F> {
    pub(crate) flash: F,
    pub(crate) write_cursor: usize,
    pub(crate) read_ctx: ReadContext,
    pub(crate) stamps: TimestampAllocator,
    /// Bytes past the write cursor may not be erased; compact before writing
    pub(crate) dirty: bool,
}

#[derive(Debug, Default)]
struct FailureCounters {
    lock_failures: AtomicU32,
    overflow_failures: AtomicU32,
}

/// Point-in-time view of the log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogStats {
    pub capacity: usize,
    pub write_cursor: usize,
    pub last_timestamp: u32,
    pub lock_failures: u32,
    pub overflow_failures: u32,
}

impl LogStats {
    pub fn free_bytes(&self) -> usize {
        self.capacity - self.write_cursor
    }
}

/// Circular, crash-tolerant event log over a raw flash region
pub struct FlashLog<F: FlashDriver> {
    config: FlashLogConfig,
    guard: AccessGuard<LogState<F>>,
    counters: FailureCounters,
    clock: Box<dyn Clock>,
    platform: Box<dyn Platform>,
    access_control: Box<dyn AccessControl>,
    shared_mem: Arc<SharedMemory>,
    recovery: RecoveryReport,
}

impl<F: FlashDriver> FlashLog<F> {
    /// Open a log with default collaborators.
    pub fn init(flash: F, config: FlashLogConfig) -> Result<Self, FlashLogError> {
        FlashLogBuilder::new(flash).config(config).init()
    }

    pub fn config(&self) -> &FlashLogConfig {
        &self.config
    }

    /// What the startup scan found and did
    pub fn recovery(&self) -> &RecoveryReport {
        &self.recovery
    }

    /// Lock failures not yet reported into the log
    pub fn lock_failures(&self) -> u32 {
        self.counters.lock_failures.load(Ordering::Acquire)
    }

    /// Overflow failures not yet reported into the log
    pub fn overflow_failures(&self) -> u32 {
        self.counters.overflow_failures.load(Ordering::Acquire)
    }

    /// Snapshot of cursor, clock and counters.
    pub fn stats(&self) -> Result<LogStats, FlashLogError> {
        let state = self.lock()?;
        Ok(LogStats {
            capacity: self.config.capacity,
            write_cursor: state.write_cursor,
            last_timestamp: state.stamps.last_allocated(),
            lock_failures: self.lock_failures(),
            overflow_failures: self.overflow_failures(),
        })
    }

    /// The log's notion of the current time
    pub fn current_timestamp(&self) -> Result<u32, FlashLogError> {
        let state = self.lock()?;
        Ok(state.stamps.now(self.clock.uptime_secs()))
    }

    /// Re-anchor the timestamp epoch so the current time reads `value`.
    ///
    /// Rejected unless `value` is newer than every timestamp already issued.
    pub fn set_timestamp_base(&self, value: u32) -> Result<(), FlashLogError> {
        let mut state = self.lock()?;
        state.stamps.set_base(value, self.clock.uptime_secs())?;
        info!(timestamp = value, "Timestamp base updated");
        Ok(())
    }

    /// Erase the whole region.
    ///
    /// Issued timestamps are remembered, so entries written afterwards still
    /// sort after anything a host has already retrieved.
    pub fn erase(&self) -> Result<(), FlashLogError> {
        let mut state = self.lock()?;
        let result = with_access(&*self.access_control, || state.flash.erase());
        if let Err(e) = result {
            state.dirty = true;
            return Err(e.into());
        }

        state.write_cursor = 0;
        state.read_ctx.reset();
        state.dirty = false;
        info!("Flash log erased");
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, LogState<F>>, FlashLogError> {
        self.guard.try_acquire(&*self.platform).map_err(|reason| {
            trace!(?reason, "Flash log access refused");
            FlashLogError::Busy
        })
    }

    fn program(&self, flash: &mut F, offset: usize, bytes: &[u8]) -> Result<(), FlashError> {
        with_access(&*self.access_control, || flash.write(offset, bytes))
    }
}

/// Builder for [`FlashLog`]
pub struct FlashLogBuilder<F: FlashDriver> {
    flash: F,
    config: FlashLogConfig,
    clock: Option<Box<dyn Clock>>,
    platform: Option<Box<dyn Platform>>,
    access_control: Option<Box<dyn AccessControl>>,
    shared_mem: Option<Arc<SharedMemory>>,
}

impl<F: FlashDriver> FlashLogBuilder<F> {
    pub fn new(flash: F) -> Self {
        Self {
            flash,
            config: FlashLogConfig::default(),
            clock: None,
            platform: None,
            access_control: None,
            shared_mem: None,
        }
    }

    pub fn config(mut self, config: FlashLogConfig) -> Self {
        self.config = config;
        self
    }

    /// Uptime source (default: [`SystemClock`])
    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Some(Box::new(clock));
        self
    }

    /// Interrupt primitives (default: [`HostPlatform`])
    pub fn platform(mut self, platform: impl Platform + 'static) -> Self {
        self.platform = Some(Box::new(platform));
        self
    }

    /// Write-protect hook (default: [`NoAccessControl`])
    pub fn access_control(mut self, access_control: impl AccessControl + 'static) -> Self {
        self.access_control = Some(Box::new(access_control));
        self
    }

    /// Staging memory shared with other subsystems (default: a private pool
    /// the size of the preserve window)
    pub fn shared_memory(mut self, shared_mem: Arc<SharedMemory>) -> Self {
        self.shared_mem = Some(shared_mem);
        self
    }

    /// Validate the configuration, scan the region and recover.
    pub fn init(self) -> Result<FlashLog<F>, FlashLogError> {
        self.config.validate()?;
        let actual = self.flash.capacity();
        if actual != self.config.capacity {
            return Err(crate::error::ConfigError::RegionMismatch {
                expected: self.config.capacity,
                actual,
            }
            .into());
        }

        let shared_mem = self
            .shared_mem
            .unwrap_or_else(|| Arc::new(SharedMemory::new(self.config.preserve_window)));

        recovery::recover(
            self.flash,
            self.config,
            self.clock.unwrap_or_else(|| Box::new(SystemClock::new())),
            self.platform.unwrap_or_else(|| Box::new(HostPlatform)),
            self.access_control
                .unwrap_or_else(|| Box::new(NoAccessControl)),
            shared_mem,
        )
    }
}

/// Bytes at `offset`, up to one maximal entry, clipped at the region end
pub(crate) struct Slot {
    buf: [u8; MAX_ENTRY_SIZE],
    len: usize,
}

impl Slot {
    pub(crate) fn read<F: FlashDriver>(
        flash: &F,
        offset: usize,
        capacity: usize,
    ) -> Result<Self, FlashError> {
        let len = capacity.saturating_sub(offset).min(MAX_ENTRY_SIZE);
        let mut buf = [0u8; MAX_ENTRY_SIZE];
        flash.read(offset, &mut buf[..len])?;
        Ok(Self { buf, len })
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    pub(crate) fn header(&self) -> Option<EntryHeader> {
        EntryHeader::parse(self.bytes())
    }

    pub(crate) fn is_valid(&self) -> bool {
        codec::validate(self.bytes())
    }

    pub(crate) fn is_erased(&self) -> bool {
        self.bytes().iter().all(|&b| b == codec::ERASED_BYTE)
    }
}

/// How the run of valid entries ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Terminator {
    /// Followed by erased flash
    Erased,
    /// Followed by bytes that are neither a valid entry nor erased
    Corrupt { offset: usize },
}

/// Result of walking valid entries from offset 0
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Scan {
    /// First byte past the last valid entry
    pub(crate) end: usize,
    pub(crate) entries: usize,
    pub(crate) last_timestamp: u32,
    pub(crate) terminator: Terminator,
}

/// Walk valid entries from the start of the region.
pub(crate) fn scan<F: FlashDriver>(
    flash: &F,
    config: &FlashLogConfig,
) -> Result<Scan, FlashError> {
    let mut offset = 0;
    let mut entries = 0;
    let mut last_timestamp = 0;

    loop {
        let slot = Slot::read(flash, offset, config.capacity)?;
        let Some(header) = slot.header() else {
            // Tail too short for a header: clean only if still erased
            let terminator = if slot.is_erased() {
                Terminator::Erased
            } else {
                Terminator::Corrupt { offset }
            };
            return Ok(Scan {
                end: offset,
                entries,
                last_timestamp,
                terminator,
            });
        };

        if !slot.is_valid() {
            // A torn write can leave the type byte programmed ahead of an
            // erased timestamp; only a fully erased slot ends the log cleanly
            let terminator = if header.is_erased() && slot.is_erased() {
                Terminator::Erased
            } else {
                Terminator::Corrupt { offset }
            };
            return Ok(Scan {
                end: offset,
                entries,
                last_timestamp,
                terminator,
            });
        }

        last_timestamp = last_timestamp.max(header.timestamp);
        entries += 1;
        offset += codec::padded_size(header.payload_len(), config.write_granularity);
    }
}
