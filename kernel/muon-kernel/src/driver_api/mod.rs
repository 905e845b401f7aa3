//! Driver subsystem API traits and types.
//!
//! - **Identity** -- [`PciDeviceId`] tables and [`PciDeviceInfo`] used for matching.
//! - **Drivers** -- [`PciDriver`] with probe/remove and per-device driver data.
//! - **Interfaces** -- [`CharDevice`] / [`OpenFile`] describing what a device exposes.
//! - **Erasure** -- wrappers in [`dyn_dispatch`] used by the kernel's tables.

pub mod chrdev;
pub mod driver;
pub mod dyn_dispatch;
pub mod error;
pub mod pci;

pub use chrdev::{CharDevice, OpenFile};
pub use driver::{DriverInfo, PciDriver};
pub use dyn_dispatch::{DynCharDevice, DynCharDeviceWrapper, DynPciDriver, DynPciDriverWrapper};
pub use error::DriverError;
pub use pci::{PCI_ANY_ID, PciAddress, PciBar, PciDeviceId, PciDeviceInfo};
