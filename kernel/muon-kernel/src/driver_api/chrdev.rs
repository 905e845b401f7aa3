//! Character device interface traits.
//!
//! A driver exposes a character device by implementing [`CharDevice`] for a
//! cheap handle type. Opening yields an [`OpenFile`]; there is deliberately
//! no write method, so a device registered through these traits is
//! read-only by construction.

use super::error::DriverError;
use crate::chrdev::FileError;
use crate::uaccess::UserSliceMut;

/// A registered character device.
pub trait CharDevice: Send + Sync + 'static {
    /// Per-open state.
    type File: OpenFile;

    /// Binds a new caller to the device.
    ///
    /// # Errors
    ///
    /// Returns a [`DriverError`] if the device refuses the open.
    fn open(&self) -> Result<Self::File, DriverError>;
}

/// One open instance of a character device.
///
/// Dropping the value is the release operation.
pub trait OpenFile: Send + Sync + 'static {
    /// Reads into `buf`.
    ///
    /// `pos` is the file position owned by the kernel's file object; the
    /// device decides whether to consult or advance it.
    ///
    /// # Errors
    ///
    /// Returns [`FileError::Fault`] if `buf` cannot be written.
    fn read(&self, buf: &mut UserSliceMut<'_>, pos: &mut u64) -> Result<usize, FileError>;
}
