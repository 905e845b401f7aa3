//! Base driver traits and metadata types.

use super::error::DriverError;
use super::pci::PciDeviceId;
use crate::pci::PciDevice;

/// Static metadata describing a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverInfo {
    /// Short name of the driver (e.g. "my_pcie_driver"). Unique per bus.
    pub name: &'static str,
    /// Human-readable description.
    pub description: &'static str,
}

/// A driver for PCI functions.
///
/// The bus calls [`probe`](Self::probe) when a device matches one of the
/// driver's ID table entries. On success the returned driver data is kept
/// with the device until the bus calls [`remove`](Self::remove), which gets
/// it back by value. The bus never runs `probe` and `remove` for one device
/// concurrently, and only calls `remove` after a successful `probe`.
pub trait PciDriver: Send + Sync + 'static {
    /// Per-device state produced by a successful probe.
    type Data: Send + 'static;

    /// Returns static information about this driver.
    fn info(&self) -> DriverInfo;

    /// Device IDs this driver supports.
    fn id_table(&self) -> &'static [PciDeviceId];

    /// Attaches to a matched device.
    ///
    /// # Errors
    ///
    /// Returns the [`DriverError`] of whichever acquisition failed; the
    /// driver must have released everything it acquired before returning.
    fn probe(&self, dev: &PciDevice, id: &PciDeviceId) -> Result<Self::Data, DriverError>;

    /// Detaches from a device, releasing everything held in `data`.
    fn remove(&self, dev: &PciDevice, data: Self::Data);
}
