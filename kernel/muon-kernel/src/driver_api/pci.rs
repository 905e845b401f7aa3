//! PCI bus types for device enumeration and driver matching.

/// PCI bus/device/function address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PciAddress {
    /// Bus number (0-255).
    pub bus: u8,
    /// Device number (0-31).
    pub device: u8,
    /// Function number (0-7).
    pub function: u8,
}

impl PciAddress {
    /// Creates an address from its parts.
    #[must_use]
    pub const fn new(bus: u8, device: u8, function: u8) -> Self {
        Self {
            bus,
            device,
            function,
        }
    }
}

impl core::fmt::Display for PciAddress {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{:04x}:{:02x}:{:02x}.{}",
            0, self.bus, self.device, self.function
        )
    }
}

/// Wildcard value for PCI ID matching: matches any vendor/device ID.
pub const PCI_ANY_ID: u16 = 0xFFFF;

/// PCI device ID for driver-to-device matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PciDeviceId {
    /// Vendor ID (`PCI_ANY_ID` = wildcard).
    pub vendor: u16,
    /// Device ID (`PCI_ANY_ID` = wildcard).
    pub device: u16,
    /// Subsystem vendor ID (`PCI_ANY_ID` = wildcard).
    pub subvendor: u16,
    /// Subsystem device ID (`PCI_ANY_ID` = wildcard).
    pub subdevice: u16,
}

impl PciDeviceId {
    /// Creates an ID entry matching a specific vendor/device pair.
    #[must_use]
    pub const fn new(vendor: u16, device: u16) -> Self {
        Self {
            vendor,
            device,
            subvendor: PCI_ANY_ID,
            subdevice: PCI_ANY_ID,
        }
    }

    /// Returns `true` if this ID entry matches the given device info.
    #[must_use]
    pub fn matches(&self, info: &PciDeviceInfo) -> bool {
        let field = |want: u16, have: u16| want == PCI_ANY_ID || want == have;
        field(self.vendor, info.vendor_id)
            && field(self.device, info.device_id)
            && field(self.subvendor, info.subsystem_vendor_id)
            && field(self.subdevice, info.subsystem_device_id)
    }
}

/// Returns the first entry of `table` matching `info`.
#[must_use]
pub fn match_id<'t>(table: &'t [PciDeviceId], info: &PciDeviceInfo) -> Option<&'t PciDeviceId> {
    table.iter().find(|id| id.matches(info))
}

/// Decoded PCI Base Address Register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PciBar {
    /// Memory-mapped BAR.
    Memory {
        /// Base bus address.
        base: u64,
        /// Size in bytes.
        size: u64,
        /// Whether the region is prefetchable.
        prefetchable: bool,
    },
    /// I/O port BAR.
    Io {
        /// Base I/O port address.
        base: u32,
        /// Size in bytes.
        size: u32,
    },
    /// BAR slot is unused.
    Unused,
}

impl PciBar {
    /// Returns the size of the BAR in bytes (0 for unused slots).
    #[must_use]
    pub const fn size(&self) -> u64 {
        match *self {
            Self::Memory { size, .. } => size,
            Self::Io { size, .. } => size as u64,
            Self::Unused => 0,
        }
    }

    /// Returns `true` if the slot decodes memory or I/O space.
    #[must_use]
    pub const fn is_present(&self) -> bool {
        !matches!(self, Self::Unused) && self.size() != 0
    }
}

/// Number of BAR slots in a type-0 header.
pub const BAR_COUNT: usize = 6;

/// Identity and resources of a discovered PCI function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PciDeviceInfo {
    /// Bus/device/function address.
    pub address: PciAddress,
    /// Vendor ID.
    pub vendor_id: u16,
    /// Device ID.
    pub device_id: u16,
    /// Subsystem vendor ID.
    pub subsystem_vendor_id: u16,
    /// Subsystem device ID.
    pub subsystem_device_id: u16,
    /// Revision ID.
    pub revision: u8,
    /// Class code.
    pub class: u8,
    /// Subclass code.
    pub subclass: u8,
    /// Decoded BARs.
    pub bars: [PciBar; BAR_COUNT],
}
