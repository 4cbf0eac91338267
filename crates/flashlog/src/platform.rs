//! Execution context primitives.
//!
//! The log only needs two things from the platform: whether the caller runs
//! in interrupt context, and a way to mask interrupts around the lock's
//! test-and-set.

use std::sync::Arc;

/// Interrupt state of the running core
pub trait Platform: Send + Sync {
    /// Whether the caller is an interrupt or exception handler
    fn in_interrupt_context(&self) -> bool {
        false
    }

    fn disable_interrupts(&self) {}

    fn enable_interrupts(&self) {}
}

impl<P: Platform + ?Sized> Platform for Arc<P> {
    fn in_interrupt_context(&self) -> bool {
        (**self).in_interrupt_context()
    }

    fn disable_interrupts(&self) {
        (**self).disable_interrupts()
    }

    fn enable_interrupts(&self) {
        (**self).enable_interrupts()
    }
}

/// Hosted platform: never in interrupt context, masking is a no-op
#[derive(Debug, Clone, Copy, Default)]
pub struct HostPlatform;

impl Platform for HostPlatform {}

/// RAII interrupt mask.
///
/// Interrupts are disabled on construction and re-enabled when dropped.
pub struct InterruptMask<'a> {
    platform: &'a dyn Platform,
}

impl<'a> InterruptMask<'a> {
    pub fn new(platform: &'a dyn Platform) -> Self {
        platform.disable_interrupts();
        Self { platform }
    }
}

impl Drop for InterruptMask<'_> {
    fn drop(&mut self) {
        self.platform.enable_interrupts();
    }
}
