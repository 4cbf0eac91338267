//! Read path
//!
//! Hosts pull entries in timestamp order with a resumable cursor: each call
//! passes the timestamp of the entry it last received and gets the next one.
//! Passing 0, or a timestamp older than the last one handed out, restarts
//! the scan from the beginning of the log.

use super::{FlashLog, Slot};
use crate::codec::{self, LogEntry, MAX_ENTRY_SIZE};
use crate::error::FlashLogError;
use crate::flash::FlashDriver;

impl<F: FlashDriver> FlashLog<F> {
    /// Copy the first entry newer than `after` into `buffer`.
    ///
    /// Returns the unpadded entry length, or `None` when no newer entry
    /// exists. A damaged entry is reported as [`FlashLogError::Corrupt`]
    /// and the cursor stays on it.
    pub fn dequeue(&self, after: u32, buffer: &mut [u8]) -> Result<Option<usize>, FlashLogError> {
        let mut guard = self.lock()?;
        let state = &mut *guard;

        if after == 0 || after < state.read_ctx.prev_timestamp {
            state.read_ctx.reset();
        }

        loop {
            let offset = usize::from(state.read_ctx.cursor);
            if offset >= state.write_cursor {
                return Ok(None);
            }

            let slot = Slot::read(&state.flash, offset, self.config.capacity)?;
            let Some(header) = slot.header() else {
                return Ok(None);
            };
            if header.is_erased() {
                return Ok(None);
            }
            if !slot.is_valid() {
                return Err(FlashLogError::Corrupt { offset });
            }

            let next = offset + codec::padded_size(header.payload_len(), self.config.write_granularity);
            // capacity is bounded by u16::MAX at configuration time
            state.read_ctx.cursor = next.min(self.config.capacity) as u16;

            if header.timestamp <= after {
                continue;
            }

            let size = header.entry_size();
            if size > buffer.len() {
                state.read_ctx.reset();
                return Err(FlashLogError::TooLarge {
                    size,
                    capacity: buffer.len(),
                });
            }

            buffer[..size].copy_from_slice(&slot.bytes()[..size]);
            state.read_ctx.prev_timestamp = header.timestamp;
            return Ok(Some(size));
        }
    }

    /// [`FlashLog::dequeue`] for host command handlers.
    ///
    /// `Ok(0)` means there are no more entries; errors are the negative
    /// numeric codes from [`FlashLogError::error_code`].
    pub fn dequeue_event(&self, after: u32, buffer: &mut [u8]) -> Result<usize, i32> {
        match self.dequeue(after, buffer) {
            Ok(Some(len)) => Ok(len),
            Ok(None) => Ok(0),
            Err(e) => Err(e.error_code()),
        }
    }

    /// Decoded form of the first entry newer than `after`
    pub fn next_entry(&self, after: u32) -> Result<Option<LogEntry>, FlashLogError> {
        let mut buf = [0u8; MAX_ENTRY_SIZE];
        match self.dequeue(after, &mut buf)? {
            Some(len) => LogEntry::decode(&buf[..len]).map(Some),
            None => Ok(None),
        }
    }

    /// Every readable entry, oldest first. Stops at the first damaged entry.
    pub fn read_all(&self) -> Result<Vec<LogEntry>, FlashLogError> {
        let mut entries = Vec::new();
        let mut after = 0;
        while let Some(entry) = self.next_entry(after)? {
            after = entry.timestamp;
            entries.push(entry);
        }
        Ok(entries)
    }
}
