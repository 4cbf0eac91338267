//! Compaction
//!
//! Keeps the newest `preserve_window` bytes of valid entries, erases the
//! region and writes the survivors back at offset 0. Entries are kept whole:
//! an entry survives when its start lies inside the window.

use tracing::{debug, info, instrument};

use super::{FlashLog, LogState, Slot, scan};
use crate::codec;
use crate::error::FlashLogError;
use crate::flash::{FlashDriver, with_access};

/// What a compaction pass kept and discarded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactionStats {
    pub kept_bytes: usize,
    pub dropped_bytes: usize,
    pub kept_entries: usize,
    pub dropped_entries: usize,
}

impl<F: FlashDriver> FlashLog<F> {
    /// Compact the log now.
    ///
    /// Fails with [`FlashLogError::StagingUnavailable`] without touching
    /// flash when the shared staging memory is taken.
    pub fn compact(&self) -> Result<CompactionStats, FlashLogError> {
        let mut state = self.lock()?;
        self.compact_locked(&mut state)
    }

    #[instrument(skip_all, fields(write_cursor = state.write_cursor))]
    pub(super) fn compact_locked(
        &self,
        state: &mut LogState<F>,
    ) -> Result<CompactionStats, FlashLogError> {
        let window = self.config.preserve_window;
        let mut staging = self.shared_mem.try_allocate(window)?;

        let found = scan(&state.flash, &self.config)?;
        let end = found.end;

        // First entry start inside the window
        let mut keep_from = end;
        let mut stats = CompactionStats::default();
        let mut offset = 0;
        while offset < end {
            let slot = Slot::read(&state.flash, offset, self.config.capacity)?;
            let Some(header) = slot.header() else {
                break;
            };
            if end - offset < window {
                keep_from = keep_from.min(offset);
                stats.kept_entries += 1;
            } else {
                stats.dropped_entries += 1;
            }
            offset += codec::padded_size(header.payload_len(), self.config.write_granularity);
        }

        stats.kept_bytes = end - keep_from;
        stats.dropped_bytes = keep_from;
        let staged = &mut staging[..stats.kept_bytes];
        state.flash.read(keep_from, staged)?;

        let flash = &mut state.flash;
        if let Err(e) = with_access(&*self.access_control, || flash.erase()) {
            state.dirty = true;
            return Err(e.into());
        }
        state.write_cursor = 0;
        state.read_ctx.reset();

        if !staged.is_empty() {
            if let Err(e) = self.program(&mut state.flash, 0, staged) {
                debug!(error = %e, "Write-back after erase failed");
                state.dirty = true;
                return Err(e.into());
            }
        }

        state.write_cursor = stats.kept_bytes;
        state.dirty = false;

        info!(
            kept_bytes = stats.kept_bytes,
            kept_entries = stats.kept_entries,
            dropped_entries = stats.dropped_entries,
            "Flash log compacted"
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::codec::ERASED_BYTE;
    use crate::config::FlashLogConfig;
    use crate::flash::RamFlash;
    use crate::log::{FlashLogBuilder, ReadContext};
    use crate::log::test_support::*;
    use crate::shared_mem::SharedMemory;
    use crate::timestamp::ManualClock;

    #[test]
    fn test_keeps_entries_starting_inside_window() {
        let config = FlashLogConfig::small().with_preserve_window(64);
        let (log, flash, _clock) = log_with(config);
        // marker at 0, then 16 byte entries at 8, 24, 40, 56, 72
        for i in 0..5u8 {
            log.add_event(3, &[i; 9]).unwrap();
        }

        let stats = log.compact().unwrap();
        // end is 88; starts 40, 56, 72 are within 64 bytes of it
        assert_eq!(stats.kept_entries, 3);
        assert_eq!(stats.dropped_entries, 3);
        assert_eq!(stats.kept_bytes, 48);
        assert_eq!(stats.dropped_bytes, 40);

        let entries = log.read_all().unwrap();
        let payloads: Vec<u8> = entries.iter().map(|e| e.payload[0]).collect();
        assert_eq!(payloads, vec![2, 3, 4]);
        assert_eq!(log.stats().unwrap().write_cursor, 48);
        assert_eq!(flash.snapshot()[48], ERASED_BYTE);
    }

    #[test]
    fn test_window_is_bytes_not_entries_with_mixed_sizes() {
        let config = FlashLogConfig::small().with_preserve_window(96);
        let (log, _flash, _clock) = log_with(config);
        // padded sizes 8, 12, 40, 72, 8 after the 8 byte marker
        log.add_event(10, &[0; 1]).unwrap();
        log.add_event(11, &[0; 5]).unwrap();
        log.add_event(12, &[0; 33]).unwrap();
        log.add_event(13, &[0; 63]).unwrap();
        log.add_event(14, &[0; 1]).unwrap();

        // end is 148; starts 8, 16 and 28 are too far back, 68 and 140 are kept
        let stats = log.compact().unwrap();
        assert_eq!(stats.kept_entries, 2);
        assert_eq!(stats.kept_bytes, 80);
        assert_eq!(stats.dropped_entries, 4);
        assert_eq!(stats.dropped_bytes, 68);

        let types: Vec<u8> = log
            .read_all()
            .unwrap()
            .iter()
            .map(|e| e.event_type)
            .collect();
        assert_eq!(types, vec![13, 14]);
        assert_eq!(log.stats().unwrap().write_cursor, 80);
    }

    #[test]
    fn test_window_boundary_is_exclusive() {
        let config = FlashLogConfig::small().with_preserve_window(16);
        let (log, _flash, _clock) = log_with(config);
        log.add_event(3, &[1; 9]).unwrap();
        log.add_event(3, &[2; 9]).unwrap();

        // end is 40; the entry at 24 is exactly 16 bytes back and is dropped
        let stats = log.compact().unwrap();
        assert_eq!(stats.kept_entries, 0);
        assert_eq!(stats.kept_bytes, 0);
        assert_eq!(log.stats().unwrap().write_cursor, 0);
        assert!(log.read_all().unwrap().is_empty());
    }

    #[test]
    fn test_resets_read_context() {
        let (log, _flash, _clock) = small_log();
        for i in 0..4u8 {
            log.add_event(3, &[i]).unwrap();
        }
        let mut buf = [0u8; 16];
        log.dequeue(0, &mut buf).unwrap();
        log.dequeue(1, &mut buf).unwrap();

        log.compact().unwrap();
        let state = log.lock().unwrap();
        assert_eq!(state.read_ctx, ReadContext::default());
    }

    #[test]
    fn test_staging_unavailable_leaves_flash_untouched() {
        let config = FlashLogConfig::small();
        let flash = RamFlash::new(config.capacity, config.write_granularity);
        let pool = Arc::new(SharedMemory::new(config.preserve_window));
        let log = FlashLogBuilder::new(flash.clone())
            .config(config)
            .clock(ManualClock::new(0))
            .shared_memory(Arc::clone(&pool))
            .init()
            .unwrap();
        log.add_event(3, b"keep").unwrap();
        let before = flash.snapshot();
        let erases = flash.erase_count();

        let held = pool.try_allocate(1).unwrap();
        assert!(matches!(
            log.compact(),
            Err(FlashLogError::StagingUnavailable(_))
        ));
        assert_eq!(flash.snapshot(), before);
        assert_eq!(flash.erase_count(), erases);
        drop(held);

        log.compact().unwrap();
        assert_eq!(pool.allocated_bytes(), 0);
    }

    #[test]
    fn test_compact_while_held_is_busy() {
        let (log, _flash, _clock) = small_log();
        let _held = log.lock().unwrap();
        assert!(matches!(log.compact(), Err(FlashLogError::Busy)));
    }

    #[test]
    fn test_failed_write_back_marks_dirty() {
        let (log, flash, _clock) = small_log();
        for i in 0..3u8 {
            log.add_event(3, &[i; 4]).unwrap();
        }
        flash.fail_after(0);
        assert!(matches!(log.compact(), Err(FlashLogError::Flash(_))));
        flash.restore_power();

        assert!(log.lock().unwrap().dirty);
    }
}
