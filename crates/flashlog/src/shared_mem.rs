//! # Shared Memory
//!
//! Budgeted scratch memory for compaction staging.
//!
//! On the controller the staging area is borrowed from a region shared with
//! other subsystems, so it may simply not be available when compaction wants
//! it. [`SharedMemory`] models that: a fixed byte budget, handed out through
//! RAII [`SharedBuffer`] guards that return their bytes on drop.
//!
//! ## Thread Safety
//!
//! [`SharedMemory`] is thread-safe and can be shared via `Arc<SharedMemory>`.
//! Accounting uses atomic compare-and-swap, so the budget is never exceeded
//! under concurrent callers.
//!
//! ## Example
//!
//! ```
//! use flashlog::shared_mem::SharedMemory;
//!
//! let pool = SharedMemory::new(512);
//!
//! let buffer = pool.try_allocate(256).unwrap();
//! assert_eq!(pool.allocated_bytes(), 256);
//! assert_eq!(buffer.len(), 256);
//!
//! drop(buffer);
//! assert_eq!(pool.allocated_bytes(), 0);
//! ```

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};

use thiserror::Error;

/// Errors for shared memory requests
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MemoryError {
    #[error("shared memory budget exceeded: requested {requested} bytes, available {available}")]
    BudgetExceeded { requested: usize, available: usize },
}

/// Byte budget shared between the log and its neighbours.
#[derive(Debug)]
pub struct SharedMemory {
    budget: usize,
    allocated: AtomicUsize,
}

impl SharedMemory {
    /// Create a pool holding `budget` bytes.
    pub fn new(budget: usize) -> Self {
        Self {
            budget,
            allocated: AtomicUsize::new(0),
        }
    }

    /// Try to take `bytes` from the pool.
    ///
    /// The returned buffer is zero-filled and gives its bytes back when
    /// dropped.
    pub fn try_allocate(&self, bytes: usize) -> Result<SharedBuffer<'_>, MemoryError> {
        loop {
            let current = self.allocated.load(Ordering::Acquire);

            let new_value = match current.checked_add(bytes) {
                Some(v) if v <= self.budget => v,
                _ => {
                    return Err(MemoryError::BudgetExceeded {
                        requested: bytes,
                        available: self.budget.saturating_sub(current),
                    });
                }
            };

            match self.allocated.compare_exchange_weak(
                current,
                new_value,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return Ok(SharedBuffer {
                        pool: self,
                        data: vec![0u8; bytes],
                    });
                }
                Err(_) => continue,
            }
        }
    }

    /// Bytes currently handed out
    pub fn allocated_bytes(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    /// Bytes still available
    pub fn available_bytes(&self) -> usize {
        self.budget
            .saturating_sub(self.allocated.load(Ordering::Relaxed))
    }
}

/// RAII buffer borrowed from a [`SharedMemory`] pool.
#[derive(Debug)]
pub struct SharedBuffer<'a> {
    pool: &'a SharedMemory,
    data: Vec<u8>,
}

impl Deref for SharedBuffer<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl DerefMut for SharedBuffer<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl Drop for SharedBuffer<'_> {
    fn drop(&mut self) {
        let bytes = self.data.len();
        let prev = self.pool.allocated.fetch_sub(bytes, Ordering::AcqRel);
        debug_assert!(
            prev >= bytes,
            "SharedBuffer underflow: had {}, subtracting {}",
            prev,
            bytes
        );
    }
}
