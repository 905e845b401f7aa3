//! Bring-up and teardown of one `edu` instance.
//!
//! Acquisition runs six steps in a fixed order. Every step that succeeds
//! pushes what it acquired onto a [`ResourceStack`]; the stack releases its
//! contents in reverse when dropped. A failing step therefore only has to
//! return its error, and teardown is dropping the stack.
//!
//! | step | acquires               | released by         |
//! |------|------------------------|---------------------|
//! | 1    | device enable          | disable             |
//! | 2    | BAR region reservation | release regions     |
//! | 3    | BAR 0 mapping          | unmap               |
//! | 4    | device number          | free device number  |
//! | 5    | character device       | unregister          |
//! | 6    | device node            | destroy node        |

extern crate alloc;

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::AtomicUsize;

use muon_kernel::chrdev::CharDevTable;
use muon_kernel::class::{DeviceClass, DeviceNode};
use muon_kernel::driver_api::DriverError;
use muon_kernel::id::DevNum;
use muon_kernel::pci::PciDevice;
use muon_kernel::{kdebug, kinfo, kwarn};
use muon_mmio::MmioRegion;

use super::DEVICE_NAME;
use super::context::{DeviceContext, ResourceStage};
use super::file::{StatusInterface, StatusRegs};
use super::node;

/// BAR holding the status register.
const STATUS_BAR: u8 = 0;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A step of acquisition failed. Each variant carries the kernel's error
/// unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireError {
    /// Step 1: the device could not be enabled.
    Enable(DriverError),
    /// Step 2: the device's regions could not be reserved.
    RegionConflict(DriverError),
    /// Step 3: BAR 0 could not be mapped, or the mapping is too small.
    Mapping(DriverError),
    /// Step 4: no device number was available.
    IdentifierExhaustion(DriverError),
    /// Step 5: the character device could not be registered.
    InterfaceRegistration(DriverError),
    /// Step 6: the device node could not be created.
    NodeCreation(DriverError),
}

impl AcquireError {
    /// Returns the stage the failing step would have reached.
    #[must_use]
    pub const fn stage(&self) -> ResourceStage {
        match self {
            Self::Enable(_) => ResourceStage::Enabled,
            Self::RegionConflict(_) => ResourceStage::RegionsReserved,
            Self::Mapping(_) => ResourceStage::BarMapped,
            Self::IdentifierExhaustion(_) => ResourceStage::IdAllocated,
            Self::InterfaceRegistration(_) => ResourceStage::InterfaceRegistered,
            Self::NodeCreation(_) => ResourceStage::NodeCreated,
        }
    }

    /// Returns the step number (1 to 6) that failed.
    #[must_use]
    pub const fn step(&self) -> usize {
        self.stage().depth()
    }

    /// Returns the kernel error behind the failure.
    #[must_use]
    pub const fn source(&self) -> DriverError {
        match *self {
            Self::Enable(err)
            | Self::RegionConflict(err)
            | Self::Mapping(err)
            | Self::IdentifierExhaustion(err)
            | Self::InterfaceRegistration(err)
            | Self::NodeCreation(err) => err,
        }
    }

    const fn kind(&self) -> &'static str {
        match self {
            Self::Enable(_) => "enable failed",
            Self::RegionConflict(_) => "region conflict",
            Self::Mapping(_) => "mapping failed",
            Self::IdentifierExhaustion(_) => "identifier exhausted",
            Self::InterfaceRegistration(_) => "interface registration failed",
            Self::NodeCreation(_) => "node creation failed",
        }
    }
}

impl fmt::Display for AcquireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at step {}: {}", self.kind(), self.step(), self.source())
    }
}

impl From<AcquireError> for DriverError {
    fn from(err: AcquireError) -> Self {
        err.source()
    }
}

// ---------------------------------------------------------------------------
// Resource stack
// ---------------------------------------------------------------------------

/// A resource held by an instance, with what is needed to give it back.
enum Acquired {
    Enabled,
    Regions,
    Window(MmioRegion),
    Identifier(DevNum),
    Interface(DevNum),
    Node(DeviceNode),
}

/// Resources held for one instance, in acquisition order.
pub(crate) struct ResourceStack {
    dev: PciDevice,
    chrdev: Arc<CharDevTable>,
    class: Arc<DeviceClass>,
    held: Vec<Acquired>,
}

impl ResourceStack {
    fn new(dev: PciDevice, chrdev: Arc<CharDevTable>, class: Arc<DeviceClass>) -> Self {
        Self {
            dev,
            chrdev,
            class,
            held: Vec::with_capacity(ResourceStage::NodeCreated.depth()),
        }
    }

    /// Returns the stage matching what is held.
    pub(crate) fn stage(&self) -> ResourceStage {
        ResourceStage::from_depth(self.held.len())
    }

    fn push(&mut self, resource: Acquired) {
        self.held.push(resource);
        kdebug!("edu_status: {} -> {}", self.dev.address(), self.stage());
    }

    /// Releases the most recent resource. Returns `false` once empty.
    fn pop(&mut self) -> bool {
        let Some(resource) = self.held.pop() else {
            return false;
        };
        match resource {
            Acquired::Node(node) => node::destroy(&self.class, node),
            Acquired::Interface(devnum) => self.chrdev.del(devnum),
            Acquired::Identifier(devnum) => self.chrdev.unregister_region(devnum, 1),
            Acquired::Window(window) => self.dev.iounmap(window),
            Acquired::Regions => self.dev.release_regions(),
            Acquired::Enabled => self.dev.disable(),
        }
        kdebug!("edu_status: {} <- {}", self.dev.address(), self.stage());
        true
    }

    /// Releases everything, most recent first.
    fn unwind(&mut self) {
        while self.pop() {}
    }
}

impl Drop for ResourceStack {
    fn drop(&mut self) {
        if !self.held.is_empty() {
            kdebug!(
                "edu_status: {} unwinding from {}",
                self.dev.address(),
                self.stage()
            );
        }
        self.unwind();
    }
}

// ---------------------------------------------------------------------------
// Acquire / detach
// ---------------------------------------------------------------------------

/// Brings up `dev`: runs every step and returns the ready context.
///
/// # Errors
///
/// Returns the [`AcquireError`] of the first failing step, after every
/// earlier step has been undone in reverse order.
pub fn acquire(
    dev: &PciDevice,
    chrdev: &Arc<CharDevTable>,
    class: &Arc<DeviceClass>,
) -> Result<DeviceContext, AcquireError> {
    let mut stack = ResourceStack::new(dev.clone(), chrdev.clone(), class.clone());

    dev.enable().map_err(AcquireError::Enable)?;
    stack.push(Acquired::Enabled);

    dev.request_regions(DEVICE_NAME)
        .map_err(AcquireError::RegionConflict)?;
    stack.push(Acquired::Regions);

    let window = dev.iomap(STATUS_BAR, 0).map_err(AcquireError::Mapping)?;
    // SAFETY: the window stays mapped until the stack unmaps it, which it
    // does only after unregistering the interface that reads through `regs`.
    let Some(regs) = (unsafe { StatusRegs::new(&window) }) else {
        kwarn!(
            "edu_status: {} bar{} is {:#x} bytes, need {:#x}",
            dev.address(),
            STATUS_BAR,
            window.size(),
            StatusRegs::SPAN
        );
        dev.iounmap(window);
        return Err(AcquireError::Mapping(DriverError::NoMemory));
    };
    stack.push(Acquired::Window(window));

    let devnum = chrdev
        .alloc_region(0, 1, DEVICE_NAME)
        .map_err(AcquireError::IdentifierExhaustion)?;
    stack.push(Acquired::Identifier(devnum));

    let opens = Arc::new(AtomicUsize::new(0));
    chrdev
        .add(devnum, 1, StatusInterface::new(regs, opens.clone()))
        .map_err(AcquireError::InterfaceRegistration)?;
    stack.push(Acquired::Interface(devnum));

    let node = node::create(class, dev.address(), devnum).map_err(AcquireError::NodeCreation)?;
    stack.push(Acquired::Node(node));

    Ok(DeviceContext::new(stack, regs, devnum, class.clone(), opens))
}

/// Tears down a context returned by [`acquire`], releasing every resource
/// in reverse acquisition order.
pub fn detach(ctx: DeviceContext) {
    let path = ctx.node_path();
    let mut resources = ctx.resources;
    resources.unwind();
    kinfo!("edu_status: {} detached ({})", path, resources.stage());
}
