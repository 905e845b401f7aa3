//! Dyn-compatible wrappers for driver traits.
//!
//! [`PciDriver`] and [`CharDevice`] carry associated types, which makes them
//! non-dyn-compatible. The kernel stores drivers and devices of different
//! types side by side, so this module provides object-safe wrapper traits
//! that erase the associated types at the storage boundary only. Drivers keep
//! implementing the static traits.

extern crate alloc;

use alloc::boxed::Box;
use core::any::Any;

use super::chrdev::{CharDevice, OpenFile};
use super::driver::{DriverInfo, PciDriver};
use super::error::DriverError;
use super::pci::PciDeviceId;
use crate::pci::PciDevice;

// ---------------------------------------------------------------------------
// DynPciDriver
// ---------------------------------------------------------------------------

/// Type-erased driver data kept by the bus between probe and remove.
pub type DriverData = Box<dyn Any + Send>;

/// Dyn-compatible version of [`PciDriver`].
pub trait DynPciDriver: Send + Sync {
    /// Returns static information about the driver.
    fn info(&self) -> DriverInfo;

    /// Device IDs the driver supports.
    fn id_table(&self) -> &'static [PciDeviceId];

    /// Probes and boxes the resulting driver data.
    fn dyn_probe(&self, dev: &PciDevice, id: &PciDeviceId) -> Result<DriverData, DriverError>;

    /// Unboxes the driver data and removes the device.
    fn dyn_remove(&self, dev: &PciDevice, data: DriverData);
}

/// Wrapper that adapts any [`PciDriver`] into a [`DynPciDriver`].
pub struct DynPciDriverWrapper<D>(pub D);

impl<D: PciDriver> DynPciDriver for DynPciDriverWrapper<D> {
    fn info(&self) -> DriverInfo {
        self.0.info()
    }

    fn id_table(&self) -> &'static [PciDeviceId] {
        self.0.id_table()
    }

    fn dyn_probe(&self, dev: &PciDevice, id: &PciDeviceId) -> Result<DriverData, DriverError> {
        let data = self.0.probe(dev, id)?;
        Ok(Box::new(data))
    }

    fn dyn_remove(&self, dev: &PciDevice, data: DriverData) {
        match data.downcast::<D::Data>() {
            Ok(data) => self.0.remove(dev, *data),
            Err(_) => crate::kerr!(
                "PCI: driver '{}' got foreign driver data for {}",
                self.0.info().name,
                dev.address(),
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// DynCharDevice
// ---------------------------------------------------------------------------

/// Dyn-compatible version of [`CharDevice`].
pub trait DynCharDevice: Send + Sync {
    /// Opens the device and boxes the per-open state.
    fn dyn_open(&self) -> Result<Box<dyn OpenFile>, DriverError>;
}

/// Wrapper that adapts any [`CharDevice`] into a [`DynCharDevice`].
pub struct DynCharDeviceWrapper<D>(pub D);

impl<D: CharDevice> DynCharDevice for DynCharDeviceWrapper<D> {
    fn dyn_open(&self) -> Result<Box<dyn OpenFile>, DriverError> {
        let file = self.0.open()?;
        Ok(Box::new(file))
    }
}
