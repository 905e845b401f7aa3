//! Emulated PCI functions.
//!
//! An [`EmulatedDevice`] is a configuration header plus host memory standing
//! in for each memory BAR. Mapping a BAR hands out the address of that
//! memory, so register blocks built on the mapping read and write it with
//! the same volatile accesses they would use on real hardware.

extern crate alloc;

use alloc::boxed::Box;
use alloc::vec;
use core::ptr::NonNull;

use crate::driver_api::pci::BAR_COUNT;
use crate::driver_api::{PciAddress, PciBar, PciDeviceInfo};

/// Vendor ID of the QEMU `edu` device.
pub const EDU_VENDOR_ID: u16 = 0x1234;
/// Device ID of the QEMU `edu` device.
pub const EDU_DEVICE_ID: u16 = 0x11e8;
/// Bus address QEMU assigns to the `edu` BAR0.
pub const EDU_BAR0_BASE: u64 = 0xfea0_0000;
/// Size of the `edu` BAR0.
pub const EDU_BAR0_SIZE: u64 = 0x10_0000;
/// Identification register of the `edu` device (major 1, minor 0, `0xed`).
pub const EDU_IDENT: u32 = 0x0100_00ed;

/// Host memory backing one memory BAR.
///
/// The words are reached through raw pointers handed out by `iomap`, so the
/// allocation is held as a raw pointer rather than a `Box` that would claim
/// unique access.
#[derive(Debug)]
pub(crate) struct BarMemory {
    words: NonNull<[u32]>,
}

// SAFETY: the backing words are only accessed with volatile reads and writes
// of whole `u32`s, which is how device registers are shared across CPUs.
unsafe impl Send for BarMemory {}
// SAFETY: see above.
unsafe impl Sync for BarMemory {}

impl BarMemory {
    fn zeroed(size: u64) -> Self {
        let words = usize::try_from(size.div_ceil(4)).unwrap_or(0);
        let boxed = vec![0u32; words].into_boxed_slice();
        Self {
            words: NonNull::from(Box::leak(boxed)),
        }
    }

    /// Host address of the first byte.
    pub(crate) fn addr(&self) -> usize {
        self.words.cast::<u32>().as_ptr() as usize
    }

    /// Size of the backing in bytes.
    pub(crate) fn len_bytes(&self) -> u64 {
        self.words.len() as u64 * 4
    }

    fn word_ptr(&self, offset: u64) -> Option<*mut u32> {
        if offset % 4 != 0 {
            return None;
        }
        let idx = usize::try_from(offset / 4).ok()?;
        if idx >= self.words.len() {
            return None;
        }
        // SAFETY: `idx` is in bounds of the allocation.
        Some(unsafe { self.words.cast::<u32>().as_ptr().add(idx) })
    }

    pub(crate) fn read32(&self, offset: u64) -> Option<u32> {
        let ptr = self.word_ptr(offset)?;
        // SAFETY: `ptr` is aligned and in bounds.
        Some(unsafe { core::ptr::read_volatile(ptr) })
    }

    pub(crate) fn write32(&self, offset: u64, value: u32) -> bool {
        match self.word_ptr(offset) {
            Some(ptr) => {
                // SAFETY: `ptr` is aligned and in bounds.
                unsafe { core::ptr::write_volatile(ptr, value) };
                true
            }
            None => false,
        }
    }
}

impl Drop for BarMemory {
    fn drop(&mut self) {
        // SAFETY: `words` came from `Box::leak` in `zeroed` and is freed once.
        drop(unsafe { Box::from_raw(self.words.as_ptr()) });
    }
}

/// A PCI function that can be plugged into the emulated bus.
#[derive(Debug)]
pub struct EmulatedDevice {
    info: PciDeviceInfo,
    memory: [Option<BarMemory>; BAR_COUNT],
}

impl EmulatedDevice {
    /// Creates a function with the given IDs and no BARs.
    ///
    /// Subsystem IDs and class codes default to what QEMU reports for its
    /// emulated devices.
    #[must_use]
    pub fn new(address: PciAddress, vendor_id: u16, device_id: u16) -> Self {
        Self {
            info: PciDeviceInfo {
                address,
                vendor_id,
                device_id,
                subsystem_vendor_id: 0x1af4,
                subsystem_device_id: 0x1100,
                revision: 0x10,
                class: 0x00,
                subclass: 0xff,
                bars: [PciBar::Unused; BAR_COUNT],
            },
            memory: [const { None }; BAR_COUNT],
        }
    }

    /// The QEMU `edu` device: 1 MiB of registers at BAR0 with the
    /// identification word at offset 0.
    #[must_use]
    pub fn edu(address: PciAddress) -> Self {
        Self::new(address, EDU_VENDOR_ID, EDU_DEVICE_ID)
            .with_memory_bar(0, EDU_BAR0_BASE, EDU_BAR0_SIZE)
            .with_register(0, 0x00, EDU_IDENT)
    }

    /// Adds a memory BAR of `size` bytes backed by zeroed host memory.
    ///
    /// Out-of-range indices are ignored.
    #[must_use]
    pub fn with_memory_bar(mut self, index: usize, base: u64, size: u64) -> Self {
        if index < BAR_COUNT {
            self.info.bars[index] = PciBar::Memory {
                base,
                size,
                prefetchable: false,
            };
            self.memory[index] = Some(BarMemory::zeroed(size));
        }
        self
    }

    /// Adds an I/O port BAR. Such BARs decode but cannot be memory-mapped.
    #[must_use]
    pub fn with_io_bar(mut self, index: usize, base: u32, size: u32) -> Self {
        if index < BAR_COUNT {
            self.info.bars[index] = PciBar::Io { base, size };
            self.memory[index] = None;
        }
        self
    }

    /// Presets a 32-bit register inside a memory BAR.
    #[must_use]
    pub fn with_register(self, bar: usize, offset: u64, value: u32) -> Self {
        self.write32(bar, offset, value);
        self
    }

    /// Returns the configuration header.
    #[must_use]
    pub fn info(&self) -> &PciDeviceInfo {
        &self.info
    }

    pub(crate) fn bar_memory(&self, bar: usize) -> Option<&BarMemory> {
        self.memory.get(bar)?.as_ref()
    }

    /// Reads a 32-bit register the way the device would see it.
    #[must_use]
    pub fn read32(&self, bar: usize, offset: u64) -> Option<u32> {
        self.bar_memory(bar)?.read32(offset)
    }

    /// Writes a 32-bit register from the device side.
    ///
    /// Returns `false` if the BAR is not memory or the offset is unaligned
    /// or out of range.
    pub fn write32(&self, bar: usize, offset: u64, value: u32) -> bool {
        self.bar_memory(bar)
            .is_some_and(|memory| memory.write32(offset, value))
    }
}
