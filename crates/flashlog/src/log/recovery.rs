//! Startup scan and recovery
//!
//! ```text
//! Uninit -> scan -> [CorruptRecovery -> Compacting ->] Ready
//! ```
//!
//! The scan runs before the guard is marked ready, so no caller can observe
//! half-initialized cursors. Repairs run afterwards through the normal
//! guarded operations.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use super::{FailureCounters, FlashLog, LogState, ReadContext, Terminator, scan};
use crate::config::FlashLogConfig;
use crate::error::FlashLogError;
use crate::event::EventKind;
use crate::flash::{AccessControl, FlashDriver};
use crate::guard::AccessGuard;
use crate::platform::Platform;
use crate::shared_mem::SharedMemory;
use crate::timestamp::{Clock, TimestampAllocator};

/// What init did with the region it found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Existing entries were kept as they are
    Resumed,
    /// The region was empty; a start marker was written
    Started,
    /// Existing data passed the startup high-water mark and was compacted
    Compacted,
    /// Valid entries were followed by damaged bytes at `offset`
    Corrupted { offset: usize, compacted: bool },
}

/// Outcome of the startup scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Valid entries found before any repair
    pub entries: usize,
    /// Extent of valid data before any repair
    pub valid_bytes: usize,
    /// Newest timestamp found; seeds the allocator
    pub last_timestamp: u32,
    pub action: RecoveryAction,
}

impl RecoveryReport {
    fn pending() -> Self {
        Self {
            entries: 0,
            valid_bytes: 0,
            last_timestamp: 0,
            action: RecoveryAction::Resumed,
        }
    }
}

#[instrument(skip_all, fields(capacity = config.capacity))]
pub(super) fn recover<F: FlashDriver>(
    flash: F,
    config: FlashLogConfig,
    clock: Box<dyn Clock>,
    platform: Box<dyn Platform>,
    access_control: Box<dyn AccessControl>,
    shared_mem: Arc<SharedMemory>,
) -> Result<FlashLog<F>, FlashLogError> {
    let found = scan(&flash, &config)?;

    let state = LogState {
        flash,
        write_cursor: found.end,
        read_ctx: ReadContext::default(),
        stamps: TimestampAllocator::seeded(found.last_timestamp),
        dirty: matches!(found.terminator, Terminator::Corrupt { .. }),
    };

    let mut log = FlashLog {
        config,
        guard: AccessGuard::new(state),
        counters: FailureCounters::default(),
        clock,
        platform,
        access_control,
        shared_mem,
        recovery: RecoveryReport::pending(),
    };
    log.guard.mark_ready();

    let action = match found.terminator {
        Terminator::Corrupt { offset } => {
            warn!(
                offset,
                entries = found.entries,
                "Flash log corrupted, compacting"
            );
            let compacted = match log.compact() {
                Ok(_) => true,
                Err(e) => {
                    warn!(error = %e, "Recovery compaction failed");
                    false
                }
            };
            if let Err(e) = log.add_event(EventKind::LogCorrupted.into(), &[]) {
                warn!(error = %e, "Could not record corruption marker");
            }
            RecoveryAction::Corrupted { offset, compacted }
        }
        Terminator::Erased if found.end > log.config.startup_high_water => {
            match log.compact() {
                Ok(stats) => info!(kept = stats.kept_bytes, "Compacted full log at startup"),
                Err(e) => warn!(error = %e, "Startup compaction failed"),
            }
            RecoveryAction::Compacted
        }
        Terminator::Erased if found.end == 0 => {
            if let Err(e) = log.add_event(EventKind::LogStart.into(), &[]) {
                warn!(error = %e, "Could not record start marker");
            }
            RecoveryAction::Started
        }
        Terminator::Erased => RecoveryAction::Resumed,
    };

    log.recovery = RecoveryReport {
        entries: found.entries,
        valid_bytes: found.end,
        last_timestamp: found.last_timestamp,
        action,
    };

    info!(
        entries = found.entries,
        write_cursor = found.end,
        last_timestamp = found.last_timestamp,
        action = ?action,
        "Flash log ready"
    );
    Ok(log)
}
