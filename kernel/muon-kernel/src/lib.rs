//! Muon driver core.
//!
//! A hosted model of the kernel services a PCI character-device driver
//! consumes: bus enumeration and driver binding, device enable, region
//! reservation and BAR mapping, device number allocation, character device
//! registration, device classes and nodes, and user buffer copies. Every
//! acquisition is recorded in a [`trace::ResourceTrace`] and can be made to
//! fail through a [`fault::FaultInjector`], so driver bring-up and teardown
//! paths can be exercised without hardware.

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]

extern crate alloc;

pub mod chrdev;
pub mod class;
pub mod config;
pub mod driver_api;
pub mod fault;
pub mod id;
pub mod kernel;
pub mod log;
pub mod pci;
pub mod trace;
pub mod uaccess;

pub use kernel::Kernel;
pub use log::LogLevel;
