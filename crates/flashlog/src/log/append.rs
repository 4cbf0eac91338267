//! Write path

use std::sync::atomic::{AtomicU32, Ordering};

use tracing::{debug, trace, warn};

use super::FlashLog;
use crate::codec::{self, MAX_PAYLOAD_SIZE};
use crate::error::FlashLogError;
use crate::event::EventKind;
use crate::flash::FlashDriver;

impl<F: FlashDriver> FlashLog<F> {
    /// Append an event.
    ///
    /// Pending lock and overflow failures are flushed into the log first as
    /// one-byte [`EventKind::LogLocks`] / [`EventKind::LogOverflows`]
    /// entries. When the write cursor is past the runtime high-water mark
    /// the log is compacted before the entry is written.
    pub fn add_event(&self, event_type: u8, payload: &[u8]) -> Result<(), FlashLogError> {
        self.report_failures();
        self.append(event_type, payload)
    }

    fn report_failures(&self) {
        let pending = [
            (&self.counters.lock_failures, EventKind::LogLocks),
            (&self.counters.overflow_failures, EventKind::LogOverflows),
        ];
        for (counter, kind) in pending {
            let count = counter.load(Ordering::Acquire);
            if count == 0 {
                continue;
            }
            let reported = count.min(u8::MAX as u32);
            match self.append(kind.into(), &[reported as u8]) {
                Ok(()) => {
                    counter.fetch_sub(reported, Ordering::AcqRel);
                }
                Err(e) => trace!(kind = kind.name(), error = %e, "Failure report deferred"),
            }
        }
    }

    fn append(&self, event_type: u8, payload: &[u8]) -> Result<(), FlashLogError> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(FlashLogError::PayloadTooLarge {
                size: payload.len(),
                limit: MAX_PAYLOAD_SIZE,
            });
        }

        let mut state = match self.lock() {
            Ok(state) => state,
            Err(e) => {
                bump(&self.counters.lock_failures);
                return Err(e);
            }
        };

        if state.dirty || state.write_cursor > self.config.runtime_high_water {
            if let Err(e) = self.compact_locked(&mut state) {
                debug!(error = %e, "Compaction before append failed");
            }
        }

        let needed = codec::padded_size(payload.len(), self.config.write_granularity);
        let available = self.config.capacity - state.write_cursor;
        if state.dirty || needed > available {
            bump(&self.counters.overflow_failures);
            return Err(FlashLogError::Overflow { needed, available });
        }

        let timestamp = state.stamps.allocate(self.clock.uptime_secs())?;
        let entry = codec::encode(event_type, timestamp, payload, self.config.write_granularity)?;

        let offset = state.write_cursor;
        if let Err(e) = self.program(&mut state.flash, offset, &entry) {
            warn!(offset, error = %e, "Flash log write failed");
            state.dirty = true;
            return Err(e.into());
        }
        state.write_cursor += entry.len();

        trace!(event_type, timestamp, offset, len = entry.len(), "Event logged");
        Ok(())
    }
}

fn bump(counter: &AtomicU32) {
    // Saturate rather than wrap back to "nothing to report"
    let _ = counter.fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| v.checked_add(1));
}
