//! Read-only character device over the `edu` status register.

extern crate alloc;

use alloc::sync::Arc;
use core::sync::atomic::{AtomicUsize, Ordering};

use muon_kernel::chrdev::FileError;
use muon_kernel::driver_api::{CharDevice, DriverError, OpenFile};
use muon_kernel::uaccess::UserSliceMut;
use muon_mmio::register_block;

/// Bytes returned by every read.
pub const STATUS_LEN: usize = 4;

register_block! {
    /// Status window at the start of BAR 0.
    pub StatusRegs {
        /// Live status word; the identification register on the `edu` device.
        [0x00; u32; ro] status,
    }
}

/// The character device registered for one attached instance.
pub struct StatusInterface {
    regs: StatusRegs,
    opens: Arc<AtomicUsize>,
}

impl StatusInterface {
    pub(super) fn new(regs: StatusRegs, opens: Arc<AtomicUsize>) -> Self {
        Self { regs, opens }
    }
}

impl CharDevice for StatusInterface {
    type File = StatusHandle;

    fn open(&self) -> Result<StatusHandle, DriverError> {
        self.opens.fetch_add(1, Ordering::Relaxed);
        Ok(StatusHandle {
            regs: self.regs,
            opens: self.opens.clone(),
        })
    }
}

/// One open of the status device. Dropping it is the release.
pub struct StatusHandle {
    regs: StatusRegs,
    opens: Arc<AtomicUsize>,
}

impl OpenFile for StatusHandle {
    /// Copies the live register value, native byte order, to `buf`.
    ///
    /// Always reports [`STATUS_LEN`] bytes whatever length was requested,
    /// and leaves `pos` alone so every read sees the current value.
    fn read(&self, buf: &mut UserSliceMut<'_>, _pos: &mut u64) -> Result<usize, FileError> {
        let value = self.regs.status();
        buf.copy_to_user(&value.to_ne_bytes())?;
        Ok(STATUS_LEN)
    }
}

impl Drop for StatusHandle {
    fn drop(&mut self) {
        self.opens.fetch_sub(1, Ordering::Relaxed);
    }
}
