//! Muon device drivers.
//!
//! - [`edu_status`] -- read-only status register of the QEMU `edu` PCI device,
//!   exposed as a character device.

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]

extern crate alloc;

pub mod edu_status;
