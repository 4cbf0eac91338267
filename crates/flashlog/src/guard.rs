//! # Concurrency Guard
//!
//! Single-accessor, non-blocking lock around the log state.
//!
//! [`AccessGuard::try_acquire`] never waits: it fails at once when the caller
//! is in interrupt context, when the log has not finished initialization, or
//! when another operation holds the lock. Interrupts are masked only for the
//! test-and-set itself, never for the guarded operation.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, MutexGuard};

use crate::platform::{InterruptMask, Platform};

/// Why an acquisition was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Contention {
    InterruptContext,
    NotReady,
    Held,
}

/// Try-lock over `T` gated by a readiness flag
#[derive(Debug)]
pub struct AccessGuard<T> {
    ready: AtomicBool,
    inner: Mutex<T>,
}

impl<T> AccessGuard<T> {
    /// Wrap `value`; acquisition fails until [`AccessGuard::mark_ready`].
    pub fn new(value: T) -> Self {
        Self {
            ready: AtomicBool::new(false),
            inner: Mutex::new(value),
        }
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Take the lock without waiting.
    pub fn try_acquire(&self, platform: &dyn Platform) -> Result<MutexGuard<'_, T>, Contention> {
        if platform.in_interrupt_context() {
            return Err(Contention::InterruptContext);
        }
        if !self.is_ready() {
            return Err(Contention::NotReady);
        }

        let _mask = InterruptMask::new(platform);
        self.inner.try_lock().ok_or(Contention::Held)
    }

    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}
