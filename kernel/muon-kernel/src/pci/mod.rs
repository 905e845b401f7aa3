//! Emulated PCI bus: device slots, driver matching and per-device services.
//!
//! The bus keeps every plugged-in [`EmulatedDevice`] in a slot and every
//! registered driver in a list. Whenever either side changes it walks the
//! other, probing each unbound device against each driver's ID table.
//! Drivers reach the hardware through [`PciDevice`], which implements the
//! enable / region reservation / BAR mapping services and their releases.

extern crate alloc;

pub mod emulated;

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use muon_mmio::MmioRegion;
use spin::Mutex;

pub use emulated::EmulatedDevice;

use crate::driver_api::dyn_dispatch::DriverData;
use crate::driver_api::pci::{BAR_COUNT, match_id};
use crate::driver_api::{DriverError, DynPciDriver, PciAddress, PciBar, PciDeviceInfo};
use crate::fault::{FaultInjector, FaultPoint};
use crate::trace::{ResourceEvent, ResourceTrace};

/// Result of plugging a device into the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// A driver probed the device successfully.
    Bound(&'static str),
    /// At least one driver matched, but every probe failed. Carries the
    /// last probe error.
    Failed(DriverError),
    /// No registered driver matches the device.
    Unclaimed,
}

#[derive(Debug, Clone, Copy)]
struct Mapping {
    bar: u8,
    virt_base: usize,
}

/// Hardware-side state of one function.
#[derive(Debug, Default)]
struct HwState {
    enable_count: u32,
    region_owner: Option<&'static str>,
    mappings: Vec<Mapping>,
}

struct Binding {
    driver: Arc<dyn DynPciDriver>,
    data: DriverData,
    seq: u64,
}

/// One occupied position on the bus.
pub(crate) struct PciSlot {
    device: EmulatedDevice,
    hw: Mutex<HwState>,
    /// Held across probe and remove so a device is never bound and unbound
    /// at once.
    binding: Mutex<Option<Binding>>,
    faults: Arc<FaultInjector>,
    trace: Arc<ResourceTrace>,
}

impl PciSlot {
    fn address(&self) -> PciAddress {
        self.device.info().address
    }

    fn leaked_resources(&self) -> bool {
        let hw = self.hw.lock();
        hw.enable_count != 0 || hw.region_owner.is_some() || !hw.mappings.is_empty()
    }
}

/// A driver's handle to a PCI function.
///
/// Cloning the handle keeps the function's register memory alive; it does
/// not keep the function bound.
#[derive(Clone)]
pub struct PciDevice {
    slot: Arc<PciSlot>,
}

impl core::fmt::Debug for PciDevice {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PciDevice")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}

impl PciDevice {
    /// Returns the configuration header.
    #[must_use]
    pub fn info(&self) -> &PciDeviceInfo {
        self.slot.device.info()
    }

    /// Returns the bus address.
    #[must_use]
    pub fn address(&self) -> PciAddress {
        self.slot.address()
    }

    /// Enables the function. Nested enables are counted.
    ///
    /// # Errors
    ///
    /// Returns the injected error if the enable is made to fail.
    pub fn enable(&self) -> Result<(), DriverError> {
        self.slot.faults.check(FaultPoint::EnableDevice)?;
        self.slot.hw.lock().enable_count += 1;
        self.slot
            .trace
            .record(ResourceEvent::DeviceEnabled(self.address()));
        Ok(())
    }

    /// Drops one enable reference.
    pub fn disable(&self) {
        {
            let mut hw = self.slot.hw.lock();
            if hw.enable_count == 0 {
                crate::kwarn!("PCI: {} disabled while not enabled", self.address());
                return;
            }
            hw.enable_count -= 1;
        }
        self.slot
            .trace
            .record(ResourceEvent::DeviceDisabled(self.address()));
    }

    /// Reserves all of the function's BAR regions for `owner`.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Busy`] if another owner already holds them.
    pub fn request_regions(&self, owner: &'static str) -> Result<(), DriverError> {
        self.slot.faults.check(FaultPoint::RequestRegions)?;
        {
            let mut hw = self.slot.hw.lock();
            if let Some(current) = hw.region_owner {
                crate::kwarn!(
                    "PCI: {} regions requested by '{}' but owned by '{}'",
                    self.address(),
                    owner,
                    current,
                );
                return Err(DriverError::Busy);
            }
            hw.region_owner = Some(owner);
        }
        self.slot
            .trace
            .record(ResourceEvent::RegionsRequested(self.address()));
        Ok(())
    }

    /// Releases the function's BAR regions.
    pub fn release_regions(&self) {
        if self.slot.hw.lock().region_owner.take().is_none() {
            crate::kwarn!("PCI: {} regions released while not held", self.address());
            return;
        }
        self.slot
            .trace
            .record(ResourceEvent::RegionsReleased(self.address()));
    }

    /// Maps up to `max_len` bytes of memory BAR `bar`; `0` maps all of it.
    ///
    /// # Errors
    ///
    /// - [`DriverError::InvalidArgument`] for an out-of-range index or an
    ///   I/O port BAR.
    /// - [`DriverError::NoMemory`] for an unused BAR.
    pub fn iomap(&self, bar: u8, max_len: u64) -> Result<MmioRegion, DriverError> {
        self.slot.faults.check(FaultPoint::IoMap)?;
        let index = usize::from(bar);
        if index >= BAR_COUNT {
            return Err(DriverError::InvalidArgument);
        }
        let base = match self.info().bars[index] {
            PciBar::Memory { base, size, .. } if size != 0 => base,
            PciBar::Io { .. } => return Err(DriverError::InvalidArgument),
            _ => return Err(DriverError::NoMemory),
        };
        let memory = self
            .slot
            .device
            .bar_memory(index)
            .ok_or(DriverError::NoMemory)?;
        let full = self.info().bars[index].size().min(memory.len_bytes());
        let len = if max_len == 0 { full } else { max_len.min(full) };

        // SAFETY: `memory` covers `len` bytes and lives as long as the slot,
        // which every `PciDevice` handle (and so every mapper) keeps alive.
        let region = unsafe { MmioRegion::new(base, memory.addr(), len) };
        self.slot.hw.lock().mappings.push(Mapping {
            bar,
            virt_base: region.virt_base(),
        });
        self.slot
            .trace
            .record(ResourceEvent::BarMapped(self.address(), bar));
        crate::kdebug!(
            "PCI: {} bar{} mapped {:#x}+{:#x}",
            self.address(),
            bar,
            base,
            len,
        );
        Ok(region)
    }

    /// Tears down a mapping made by [`iomap`](Self::iomap).
    pub fn iounmap(&self, region: MmioRegion) {
        let removed = {
            let mut hw = self.slot.hw.lock();
            hw.mappings
                .iter()
                .position(|m| m.virt_base == region.virt_base())
                .map(|idx| hw.mappings.remove(idx))
        };
        match removed {
            Some(mapping) => self
                .slot
                .trace
                .record(ResourceEvent::BarUnmapped(self.address(), mapping.bar)),
            None => crate::kwarn!(
                "PCI: {} unmap of {:#x} which is not mapped",
                self.address(),
                region.virt_base(),
            ),
        }
    }

    /// Returns `true` while at least one enable reference is held.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.slot.hw.lock().enable_count != 0
    }

    /// Returns the current owner of the function's regions.
    #[must_use]
    pub fn region_owner(&self) -> Option<&'static str> {
        self.slot.hw.lock().region_owner
    }

    /// Returns the number of live BAR mappings.
    #[must_use]
    pub fn mapping_count(&self) -> usize {
        self.slot.hw.lock().mappings.len()
    }

    /// Returns the name of the driver bound to the function, if any.
    #[must_use]
    pub fn bound_driver(&self) -> Option<&'static str> {
        self.slot
            .binding
            .lock()
            .as_ref()
            .map(|b| b.driver.info().name)
    }

    /// Writes a 32-bit register from the device side, as the hardware
    /// itself would.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::InvalidArgument`] if the location is not a
    /// 32-bit word inside a memory BAR.
    pub fn device_write32(&self, bar: u8, offset: u64, value: u32) -> Result<(), DriverError> {
        if self.slot.device.write32(usize::from(bar), offset, value) {
            Ok(())
        } else {
            Err(DriverError::InvalidArgument)
        }
    }
}

#[derive(Default)]
struct BusState {
    slots: BTreeMap<PciAddress, Arc<PciSlot>>,
    drivers: Vec<Arc<dyn DynPciDriver>>,
}

/// The emulated PCI bus.
pub struct PciBus {
    state: Mutex<BusState>,
    next_seq: AtomicU64,
    faults: Arc<FaultInjector>,
    trace: Arc<ResourceTrace>,
}

impl PciBus {
    pub(crate) fn new(faults: Arc<FaultInjector>, trace: Arc<ResourceTrace>) -> Self {
        Self {
            state: Mutex::new(BusState::default()),
            next_seq: AtomicU64::new(0),
            faults,
            trace,
        }
    }

    /// Returns a handle to the function at `address`.
    #[must_use]
    pub fn device(&self, address: PciAddress) -> Option<PciDevice> {
        let slot = self.state.lock().slots.get(&address).cloned()?;
        Some(PciDevice { slot })
    }

    /// Returns the addresses of every plugged-in function.
    #[must_use]
    pub fn addresses(&self) -> Vec<PciAddress> {
        self.state.lock().slots.keys().copied().collect()
    }

    /// Returns the names of the registered drivers, in registration order.
    #[must_use]
    pub fn driver_names(&self) -> Vec<&'static str> {
        self.state
            .lock()
            .drivers
            .iter()
            .map(|d| d.info().name)
            .collect()
    }

    /// Plugs a function into the bus and offers it to every driver.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Exists`] if the address is taken.
    pub fn add_device(&self, device: EmulatedDevice) -> Result<ProbeOutcome, DriverError> {
        let address = device.info().address;
        let slot = Arc::new(PciSlot {
            device,
            hw: Mutex::new(HwState::default()),
            binding: Mutex::new(None),
            faults: self.faults.clone(),
            trace: self.trace.clone(),
        });
        let drivers = {
            let mut state = self.state.lock();
            if state.slots.contains_key(&address) {
                return Err(DriverError::Exists);
            }
            state.slots.insert(address, slot.clone());
            state.drivers.clone()
        };
        crate::kinfo!(
            "PCI: {} [{:04x}:{:04x}] added",
            address,
            slot.device.info().vendor_id,
            slot.device.info().device_id,
        );

        let mut outcome = ProbeOutcome::Unclaimed;
        for driver in &drivers {
            match self.try_bind(&slot, driver) {
                Some(Ok(name)) => return Ok(ProbeOutcome::Bound(name)),
                Some(Err(err)) => outcome = ProbeOutcome::Failed(err),
                None => {}
            }
        }
        Ok(outcome)
    }

    /// Unbinds and unplugs the function at `address`.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::NotFound`] if nothing is plugged in there.
    pub fn remove_device(&self, address: PciAddress) -> Result<(), DriverError> {
        let slot = self
            .state
            .lock()
            .slots
            .remove(&address)
            .ok_or(DriverError::NotFound)?;
        Self::unbind(&slot);
        if slot.leaked_resources() {
            crate::kwarn!("PCI: {} removed with resources still held", address);
        }
        crate::kinfo!("PCI: {} removed", address);
        Ok(())
    }

    /// Registers a driver and probes every unbound matching function.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Exists`] if a driver with the same name is
    /// already registered.
    pub fn register_driver(&self, driver: Arc<dyn DynPciDriver>) -> Result<(), DriverError> {
        let name = driver.info().name;
        let slots: Vec<Arc<PciSlot>> = {
            let mut state = self.state.lock();
            if state.drivers.iter().any(|d| d.info().name == name) {
                return Err(DriverError::Exists);
            }
            state.drivers.push(driver.clone());
            state.slots.values().cloned().collect()
        };
        crate::kinfo!("PCI: driver '{}' registered", name);

        for slot in &slots {
            if let Some(Err(err)) = self.try_bind(slot, &driver) {
                crate::kdebug!("PCI: {} left unbound: {}", slot.device.info().address, err);
            }
        }
        Ok(())
    }

    /// Unregisters a driver, removing every function it is bound to, most
    /// recently bound first.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::NotFound`] if no driver has that name.
    pub fn unregister_driver(&self, name: &str) -> Result<(), DriverError> {
        let slots: Vec<Arc<PciSlot>> = {
            let mut state = self.state.lock();
            let idx = state
                .drivers
                .iter()
                .position(|d| d.info().name == name)
                .ok_or(DriverError::NotFound)?;
            state.drivers.remove(idx);
            state.slots.values().cloned().collect()
        };

        let mut bound: Vec<(u64, Arc<PciSlot>)> = slots
            .into_iter()
            .filter_map(|slot| {
                let seq = slot
                    .binding
                    .lock()
                    .as_ref()
                    .filter(|b| b.driver.info().name == name)
                    .map(|b| b.seq)?;
                Some((seq, slot))
            })
            .collect();
        bound.sort_by(|a, b| b.0.cmp(&a.0));

        for (_, slot) in &bound {
            Self::unbind(slot);
        }
        crate::kinfo!("PCI: driver '{}' unregistered", name);
        Ok(())
    }

    /// Probes `slot` with `driver` if the slot is free and the IDs match.
    ///
    /// Returns `None` when no probe was attempted.
    fn try_bind(
        &self,
        slot: &Arc<PciSlot>,
        driver: &Arc<dyn DynPciDriver>,
    ) -> Option<Result<&'static str, DriverError>> {
        let mut binding = slot.binding.lock();
        if binding.is_some() {
            return None;
        }
        let id = match_id(driver.id_table(), slot.device.info())?;
        let name = driver.info().name;
        let dev = PciDevice { slot: slot.clone() };

        crate::kdebug!("PCI: probing {} with '{}'", dev.address(), name);
        match driver.dyn_probe(&dev, id) {
            Ok(data) => {
                *binding = Some(Binding {
                    driver: driver.clone(),
                    data,
                    seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
                });
                crate::kinfo!("PCI: {} bound to '{}'", dev.address(), name);
                Some(Ok(name))
            }
            Err(err) => {
                crate::kwarn!("PCI: '{}' probe of {} failed: {}", name, dev.address(), err);
                Some(Err(err))
            }
        }
    }

    fn unbind(slot: &Arc<PciSlot>) {
        let mut binding = slot.binding.lock();
        if let Some(Binding { driver, data, .. }) = binding.take() {
            let dev = PciDevice { slot: slot.clone() };
            driver.dyn_remove(&dev, data);
            crate::kinfo!("PCI: {} unbound from '{}'", dev.address(), driver.info().name);
        }
    }
}

impl Drop for PciBus {
    fn drop(&mut self) {
        // Bound drivers hold their device's slot; unbinding breaks the cycle.
        let slots = core::mem::take(&mut self.state.get_mut().slots);
        for slot in slots.values() {
            Self::unbind(slot);
        }
    }
}
