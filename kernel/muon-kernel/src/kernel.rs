//! The emulated kernel instance.
//!
//! [`Kernel`] ties the subsystems together: one PCI bus, one character
//! device table and one class registry, sharing a fault injector and a
//! resource trace. Handles are cheap to clone; every clone refers to the
//! same kernel.

extern crate alloc;

use alloc::sync::Arc;

use crate::chrdev::{CharDevTable, File};
use crate::class::{ClassTable, DeviceClass};
use crate::config::KernelConfig;
use crate::driver_api::{DriverError, DynPciDriverWrapper, PciAddress, PciDriver};
use crate::fault::FaultInjector;
use crate::pci::{EmulatedDevice, PciBus, ProbeOutcome};
use crate::trace::ResourceTrace;

struct KernelInner {
    config: KernelConfig,
    pci: PciBus,
    chrdev: Arc<CharDevTable>,
    classes: ClassTable,
    faults: Arc<FaultInjector>,
    trace: Arc<ResourceTrace>,
}

/// Handle to an emulated kernel.
#[derive(Clone)]
pub struct Kernel {
    inner: Arc<KernelInner>,
}

impl core::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Kernel")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new()
    }
}

impl Kernel {
    /// Boots a kernel with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(KernelConfig::default())
    }

    /// Boots a kernel with the given configuration.
    #[must_use]
    pub fn with_config(config: KernelConfig) -> Self {
        let faults = Arc::new(FaultInjector::new());
        let trace = Arc::new(ResourceTrace::new());
        crate::kdebug!(
            "kernel: up, {} minors per major",
            config.minors_per_major
        );
        Self {
            inner: Arc::new(KernelInner {
                config,
                pci: PciBus::new(faults.clone(), trace.clone()),
                chrdev: Arc::new(CharDevTable::new(config, faults.clone(), trace.clone())),
                classes: ClassTable::new(faults.clone(), trace.clone()),
                faults,
                trace,
            }),
        }
    }

    /// Returns the PCI bus.
    #[must_use]
    pub fn pci(&self) -> &PciBus {
        &self.inner.pci
    }

    /// Returns the character device table.
    ///
    /// Drivers keep their own reference so they do not need to hold the
    /// whole kernel.
    #[must_use]
    pub fn chrdev(&self) -> &Arc<CharDevTable> {
        &self.inner.chrdev
    }

    /// Returns the fault injector shared by every subsystem.
    #[must_use]
    pub fn faults(&self) -> &FaultInjector {
        &self.inner.faults
    }

    /// Returns the resource trace shared by every subsystem.
    #[must_use]
    pub fn trace(&self) -> &ResourceTrace {
        &self.inner.trace
    }

    /// Creates a device class.
    ///
    /// # Errors
    ///
    /// - [`DriverError::Exists`] if a class with that name exists.
    /// - [`DriverError::InvalidArgument`] if the name is empty or contains
    ///   a `/`.
    pub fn class_create(&self, name: &str) -> Result<Arc<DeviceClass>, DriverError> {
        self.inner.classes.create(name)
    }

    /// Destroys a device class.
    ///
    /// # Errors
    ///
    /// - [`DriverError::Busy`] if nodes remain in the class.
    /// - [`DriverError::NotFound`] if the class is not registered.
    pub fn class_destroy(&self, class: &DeviceClass) -> Result<(), DriverError> {
        self.inner.classes.destroy(class)
    }

    /// Looks up a class by name.
    #[must_use]
    pub fn class(&self, name: &str) -> Option<Arc<DeviceClass>> {
        self.inner.classes.get(name)
    }

    /// Opens the node at `"<class>/<node>"`.
    ///
    /// # Errors
    ///
    /// - [`DriverError::NotFound`] if the path does not name a node.
    /// - [`DriverError::NoDevice`] if the node's device number has no
    ///   registered device.
    pub fn open(&self, path: &str) -> Result<File, DriverError> {
        let (class, node) = path.split_once('/').ok_or(DriverError::NotFound)?;
        let dev = self
            .class(class)
            .and_then(|class| class.lookup(node))
            .ok_or(DriverError::NotFound)?;
        self.inner.chrdev.open(dev)
    }

    /// Registers a PCI driver and probes matching functions.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Exists`] if a driver with the same name is
    /// registered.
    pub fn register_pci_driver<D: PciDriver>(&self, driver: D) -> Result<(), DriverError> {
        self.inner
            .pci
            .register_driver(Arc::new(DynPciDriverWrapper(driver)))
    }

    /// Unregisters a PCI driver, removing it from every bound function.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::NotFound`] if no driver has that name.
    pub fn unregister_pci_driver(&self, name: &str) -> Result<(), DriverError> {
        self.inner.pci.unregister_driver(name)
    }

    /// Plugs a function into the PCI bus.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Exists`] if the address is taken.
    pub fn add_pci_device(&self, device: EmulatedDevice) -> Result<ProbeOutcome, DriverError> {
        self.inner.pci.add_device(device)
    }

    /// Unplugs the function at `address`, unbinding its driver first.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::NotFound`] if nothing is plugged in there.
    pub fn remove_pci_device(&self, address: PciAddress) -> Result<(), DriverError> {
        self.inner.pci.remove_device(address)
    }
}
