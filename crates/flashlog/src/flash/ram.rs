//! In-memory NOR flash.
//!
//! Programs follow NOR rules: a write can only clear bits, so writing over
//! data that was not erased ANDs the two. Writes must be aligned to the
//! configured granularity. A write budget can be armed to simulate power
//! loss part-way through a program operation.
//!
//! Clones share the same storage, which lets a test keep a handle to flash
//! owned by a log and inspect or damage it underneath.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::codec::ERASED_BYTE;
use crate::error::FlashError;
use crate::flash::FlashDriver;

#[derive(Debug)]
struct RamFlashState {
    cells: Vec<u8>,
    /// Bytes that may still be programmed before "power loss"
    write_budget: Option<usize>,
    writes: usize,
    erases: usize,
}

/// Shared, simulated NOR region
#[derive(Debug, Clone)]
pub struct RamFlash {
    state: Arc<Mutex<RamFlashState>>,
    granularity: usize,
}

impl RamFlash {
    /// Create an erased region.
    ///
    /// # Panics
    ///
    /// Panics if `granularity` is zero.
    pub fn new(capacity: usize, granularity: usize) -> Self {
        assert!(granularity > 0, "granularity must be positive");
        Self {
            state: Arc::new(Mutex::new(RamFlashState {
                cells: vec![ERASED_BYTE; capacity],
                write_budget: None,
                writes: 0,
                erases: 0,
            })),
            granularity,
        }
    }

    /// Build a region from a raw image.
    pub fn from_image(image: Vec<u8>, granularity: usize) -> Self {
        let flash = Self::new(0, granularity);
        flash.state.lock().cells = image;
        flash
    }

    /// Copy of the whole region
    pub fn snapshot(&self) -> Vec<u8> {
        self.state.lock().cells.clone()
    }

    /// Overwrite one byte, bypassing NOR rules. Used to inject damage.
    pub fn poke(&self, offset: usize, value: u8) {
        self.state.lock().cells[offset] = value;
    }

    /// Cut power after `bytes` more programmed bytes.
    pub fn fail_after(&self, bytes: usize) {
        self.state.lock().write_budget = Some(bytes);
    }

    /// Restore power.
    pub fn restore_power(&self) {
        self.state.lock().write_budget = None;
    }

    /// Number of program calls so far
    pub fn write_count(&self) -> usize {
        self.state.lock().writes
    }

    /// Number of erase calls so far
    pub fn erase_count(&self) -> usize {
        self.state.lock().erases
    }

    fn check_range(capacity: usize, offset: usize, len: usize) -> Result<(), FlashError> {
        match offset.checked_add(len) {
            Some(end) if end <= capacity => Ok(()),
            _ => Err(FlashError::OutOfBounds {
                offset,
                len,
                capacity,
            }),
        }
    }
}

impl FlashDriver for RamFlash {
    fn capacity(&self) -> usize {
        self.state.lock().cells.len()
    }

    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), FlashError> {
        let state = self.state.lock();
        Self::check_range(state.cells.len(), offset, buf.len())?;
        buf.copy_from_slice(&state.cells[offset..offset + buf.len()]);
        Ok(())
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), FlashError> {
        let mut state = self.state.lock();
        Self::check_range(state.cells.len(), offset, data.len())?;
        if offset % self.granularity != 0 || data.len() % self.granularity != 0 {
            return Err(FlashError::Misaligned {
                offset,
                len: data.len(),
                granularity: self.granularity,
            });
        }

        state.writes += 1;

        let programmed = match state.write_budget {
            Some(budget) => budget.min(data.len()),
            None => data.len(),
        };
        for (cell, byte) in state.cells[offset..offset + programmed]
            .iter_mut()
            .zip(data)
        {
            *cell &= *byte;
        }

        if let Some(budget) = state.write_budget.as_mut() {
            *budget -= programmed;
            if programmed < data.len() {
                return Err(FlashError::PowerLoss {
                    written: programmed,
                    len: data.len(),
                });
            }
        }
        Ok(())
    }

    fn erase(&mut self) -> Result<(), FlashError> {
        let mut state = self.state.lock();
        state.erases += 1;
        state.cells.fill(ERASED_BYTE);
        Ok(())
    }
}
