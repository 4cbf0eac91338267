//! Flash collaborators.
//!
//! The log never touches hardware directly. It drives a [`FlashDriver`] over
//! the reserved region and brackets every program/erase burst with an
//! [`AccessControl`] callback so boards can lift write protection only while
//! the log needs it.

mod ram;

pub use ram::RamFlash;

use std::sync::Arc;

use crate::error::FlashError;

/// Synchronous access to the log's flash region.
///
/// Offsets are relative to the start of the region. Calls block until the
/// hardware finishes and are never reentered.
pub trait FlashDriver: Send {
    /// Region length in bytes
    fn capacity(&self) -> usize;

    /// Copy `buf.len()` bytes starting at `offset`.
    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), FlashError>;

    /// Program `data` at `offset`. Both must respect the write granularity.
    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), FlashError>;

    /// Erase the whole region back to all-ones.
    fn erase(&mut self) -> Result<(), FlashError>;
}

impl<F: FlashDriver + ?Sized> FlashDriver for Box<F> {
    fn capacity(&self) -> usize {
        (**self).capacity()
    }

    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), FlashError> {
        (**self).read(offset, buf)
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), FlashError> {
        (**self).write(offset, data)
    }

    fn erase(&mut self) -> Result<(), FlashError> {
        (**self).erase()
    }
}

/// Board hook invoked around physical write/erase bursts
pub trait AccessControl: Send + Sync {
    fn enable(&self, enable: bool);
}

impl<A: AccessControl + ?Sized> AccessControl for Arc<A> {
    fn enable(&self, enable: bool) {
        (**self).enable(enable)
    }
}

/// Default hook for boards without write gating
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAccessControl;

impl AccessControl for NoAccessControl {
    fn enable(&self, _enable: bool) {}
}

/// Run `op` with flash access enabled, disabling it again on every path.
pub(crate) fn with_access<R>(access: &dyn AccessControl, op: impl FnOnce() -> R) -> R {
    access.enable(true);
    let result = op();
    access.enable(false);
    result
}
