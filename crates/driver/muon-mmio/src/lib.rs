//! Mapped MMIO windows and typed register blocks.
//!
//! [`MmioRegion`] describes a register window that a bus has mapped into the
//! caller's address space. The [`register_block!`] macro generates a typed
//! accessor struct over such a window; its `new()` constructor is the only
//! `unsafe` point, after which every register read and write is safe.
//!
//! # Example
//!
//! ```ignore
//! use muon_mmio::register_block;
//!
//! register_block! {
//!     /// Status window of the edu device.
//!     pub StatusRegs {
//!         /// Live status word.
//!         [0x00; u32; ro] status,
//!     }
//! }
//! ```

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]

pub use muon_mmio_macros::register_block;

/// A mapped memory-mapped I/O window.
///
/// The region is a plain descriptor: copying it does not duplicate the
/// mapping, and unmapping is the business of whoever mapped it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MmioRegion {
    phys_base: u64,
    virt_base: usize,
    size: u64,
}

impl MmioRegion {
    /// Creates a new MMIO region descriptor.
    ///
    /// # Safety
    ///
    /// The caller must ensure that:
    /// - `[virt_base, virt_base + size)` is mapped and backs the device range
    ///   starting at `phys_base`.
    /// - The mapping outlives every use of the returned region.
    #[must_use]
    pub const unsafe fn new(phys_base: u64, virt_base: usize, size: u64) -> Self {
        Self {
            phys_base,
            virt_base,
            size,
        }
    }

    /// Returns the bus (physical) base address.
    #[must_use]
    pub const fn phys_base(&self) -> u64 {
        self.phys_base
    }

    /// Returns the virtual base address.
    #[must_use]
    pub const fn virt_base(&self) -> usize {
        self.virt_base
    }

    /// Returns the size of the window in bytes.
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }

    /// Returns `true` if an access of `width` bytes at `offset` fits the window.
    #[must_use]
    pub const fn covers(&self, offset: u64, width: u64) -> bool {
        match offset.checked_add(width) {
            Some(end) => end <= self.size,
            None => false,
        }
    }

    /// Returns a pointer to the given byte offset within the window.
    ///
    /// Returns `None` if the offset is out of bounds.
    #[must_use]
    pub const fn ptr_at(&self, offset: u64) -> Option<*mut u8> {
        if offset < self.size {
            Some((self.virt_base + offset as usize) as *mut u8)
        } else {
            None
        }
    }
}
