//! Status register driver for the QEMU `edu` PCI device.
//!
//! Each matching device is brought up by [`acquire`], which maps BAR 0 and
//! publishes the 32-bit register at offset 0 as a read-only character device
//! with the node `myClass/myDevice<minor>`. Removing the device runs the
//! same steps backwards.
//!
//! [`EduStatusModule`] owns the class the nodes live in and the driver
//! registration; it is the load/unload entry point.

extern crate alloc;

use alloc::sync::Arc;

use muon_kernel::Kernel;
use muon_kernel::chrdev::CharDevTable;
use muon_kernel::class::DeviceClass;
use muon_kernel::driver_api::{DriverError, DriverInfo, PciDeviceId, PciDriver};
use muon_kernel::pci::PciDevice;
use muon_kernel::{kerr, kinfo, kwarn};

pub mod acquire;
pub mod context;
pub mod file;
pub mod node;

pub use acquire::{AcquireError, acquire, detach};
pub use context::{DeviceContext, ResourceStage};
pub use file::{STATUS_LEN, StatusHandle, StatusInterface, StatusRegs};

// ---------------------------------------------------------------------------
// Names and IDs
// ---------------------------------------------------------------------------

/// Name of the class the device nodes are created in.
pub const CLASS_NAME: &str = "myClass";
/// Prefix of every node name, and owner name for regions and device numbers.
pub const DEVICE_NAME: &str = "myDevice";
/// Name the driver registers under on the PCI bus.
pub const DRIVER_NAME: &str = "my_pcie_driver";

/// QEMU vendor ID.
const EDU_VENDOR: u16 = 0x1234;
/// `edu` device ID.
const EDU_DEVICE: u16 = 0x11e8;

/// Devices the driver binds to.
pub static ID_TABLE: [PciDeviceId; 1] = [PciDeviceId::new(EDU_VENDOR, EDU_DEVICE)];

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// The PCI driver. Holds the services its instances acquire from.
pub struct EduStatusDriver {
    chrdev: Arc<CharDevTable>,
    class: Arc<DeviceClass>,
}

impl EduStatusDriver {
    /// Creates a driver publishing nodes under `class`.
    #[must_use]
    pub fn new(chrdev: Arc<CharDevTable>, class: Arc<DeviceClass>) -> Self {
        Self { chrdev, class }
    }
}

impl PciDriver for EduStatusDriver {
    type Data = DeviceContext;

    fn info(&self) -> DriverInfo {
        DriverInfo {
            name: DRIVER_NAME,
            description: "edu status register as a read-only character device",
        }
    }

    fn id_table(&self) -> &'static [PciDeviceId] {
        &ID_TABLE
    }

    fn probe(&self, dev: &PciDevice, id: &PciDeviceId) -> Result<DeviceContext, DriverError> {
        kinfo!(
            "edu_status: probing {} [{:04x}:{:04x}]",
            dev.address(),
            id.vendor,
            id.device
        );
        match acquire(dev, &self.chrdev, &self.class) {
            Ok(ctx) => {
                kinfo!(
                    "edu_status: {} ready at {} ({}), status {:#010x}",
                    dev.address(),
                    ctx.node_path(),
                    ctx.devnum(),
                    ctx.status()
                );
                Ok(ctx)
            }
            Err(err) => {
                let reached = err.stage().prev().unwrap_or(ResourceStage::None);
                kerr!(
                    "edu_status: {} failed after {}: {}",
                    dev.address(),
                    reached,
                    err
                );
                Err(err.into())
            }
        }
    }

    fn remove(&self, dev: &PciDevice, data: DeviceContext) {
        if data.open_count() != 0 {
            kwarn!(
                "edu_status: {} removed with {} open files",
                dev.address(),
                data.open_count()
            );
        }
        detach(data);
    }
}

// ---------------------------------------------------------------------------
// Module
// ---------------------------------------------------------------------------

/// A loaded instance of the driver module.
///
/// Loading creates the class and registers the driver; unloading reverses
/// both. Dropping the module without calling [`exit`](Self::exit) leaves
/// both in place.
#[derive(Debug)]
pub struct EduStatusModule {
    kernel: Kernel,
    class: Arc<DeviceClass>,
}

impl EduStatusModule {
    /// Loads the module into `kernel`.
    ///
    /// Matching devices already on the bus are probed before this returns;
    /// a failed probe does not fail the load.
    ///
    /// # Errors
    ///
    /// Returns the error of class creation or driver registration. The
    /// class is destroyed again if registration fails.
    pub fn init(kernel: &Kernel) -> Result<Self, DriverError> {
        let class = kernel.class_create(CLASS_NAME).inspect_err(|err| {
            kerr!("edu_status: class '{}' not created: {}", CLASS_NAME, err);
        })?;

        let driver = EduStatusDriver::new(kernel.chrdev().clone(), class.clone());
        if let Err(err) = kernel.register_pci_driver(driver) {
            kerr!("edu_status: driver '{}' not registered: {}", DRIVER_NAME, err);
            if let Err(destroy_err) = kernel.class_destroy(&class) {
                kerr!("edu_status: class '{}' left behind: {}", CLASS_NAME, destroy_err);
            }
            return Err(err);
        }

        kinfo!("edu_status: loaded");
        Ok(Self {
            kernel: kernel.clone(),
            class,
        })
    }

    /// Returns the class the module's nodes live in.
    #[must_use]
    pub fn class(&self) -> &Arc<DeviceClass> {
        &self.class
    }

    /// Unloads the module: detaches every bound device, most recently bound
    /// first, then destroys the class.
    pub fn exit(self) {
        if let Err(err) = self.kernel.unregister_pci_driver(DRIVER_NAME) {
            kerr!("edu_status: driver '{}' not unregistered: {}", DRIVER_NAME, err);
        }
        if let Err(err) = self.kernel.class_destroy(&self.class) {
            kerr!("edu_status: class '{}' not destroyed: {}", CLASS_NAME, err);
        }
        kinfo!("edu_status: unloaded");
    }
}
