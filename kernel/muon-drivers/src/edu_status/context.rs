//! Per-instance state of an attached `edu` device.

extern crate alloc;

use alloc::string::String;
use alloc::sync::Arc;
use core::fmt;
use core::sync::atomic::{AtomicUsize, Ordering};

use muon_kernel::class::DeviceClass;
use muon_kernel::id::DevNum;

use super::acquire::ResourceStack;
use super::file::StatusRegs;
use super::node::node_name;

/// How far acquisition has progressed for one instance.
///
/// The stage of a live instance is the number of resources it holds, so it
/// moves one step at a time in either direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceStage {
    /// Nothing held.
    None,
    /// Device enabled on the bus.
    Enabled,
    /// BAR regions reserved.
    RegionsReserved,
    /// BAR 0 mapped.
    BarMapped,
    /// Device number allocated.
    IdAllocated,
    /// Character device registered.
    InterfaceRegistered,
    /// Node published; the instance is ready.
    NodeCreated,
}

impl ResourceStage {
    /// Every stage in acquisition order.
    pub const ALL: [Self; 7] = [
        Self::None,
        Self::Enabled,
        Self::RegionsReserved,
        Self::BarMapped,
        Self::IdAllocated,
        Self::InterfaceRegistered,
        Self::NodeCreated,
    ];

    /// Returns the stage reached after `depth` successful steps.
    ///
    /// Depths past the last step saturate at [`NodeCreated`](Self::NodeCreated).
    #[must_use]
    pub const fn from_depth(depth: usize) -> Self {
        if depth < Self::ALL.len() {
            Self::ALL[depth]
        } else {
            Self::NodeCreated
        }
    }

    /// Returns the number of steps needed to reach this stage.
    #[must_use]
    pub const fn depth(self) -> usize {
        self as usize
    }

    /// Returns the stage before this one, if any.
    #[must_use]
    pub const fn prev(self) -> Option<Self> {
        match self.depth() {
            0 => None,
            d => Some(Self::from_depth(d - 1)),
        }
    }

    /// Returns the stage's name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Enabled => "ENABLED",
            Self::RegionsReserved => "REGIONS_RESERVED",
            Self::BarMapped => "BAR_MAPPED",
            Self::IdAllocated => "ID_ALLOCATED",
            Self::InterfaceRegistered => "INTERFACE_REGISTERED",
            Self::NodeCreated => "NODE_CREATED",
        }
    }
}

impl fmt::Display for ResourceStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One attached `edu` device.
///
/// The context owns every resource acquired for the device. It is created
/// only once all of them are held and gives them back when torn down by
/// [`detach`](super::acquire::detach) or dropped.
pub struct DeviceContext {
    pub(super) resources: ResourceStack,
    regs: StatusRegs,
    devnum: DevNum,
    class: Arc<DeviceClass>,
    opens: Arc<AtomicUsize>,
}

impl fmt::Debug for DeviceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceContext")
            .field("devnum", &self.devnum)
            .field("stage", &self.stage())
            .field("open_count", &self.open_count())
            .finish_non_exhaustive()
    }
}

impl DeviceContext {
    pub(super) fn new(
        resources: ResourceStack,
        regs: StatusRegs,
        devnum: DevNum,
        class: Arc<DeviceClass>,
        opens: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            resources,
            regs,
            devnum,
            class,
            opens,
        }
    }

    /// Returns the current stage; [`ResourceStage::NodeCreated`] while the
    /// context is attached.
    #[must_use]
    pub fn stage(&self) -> ResourceStage {
        self.resources.stage()
    }

    /// Returns the allocated device number.
    #[must_use]
    pub fn devnum(&self) -> DevNum {
        self.devnum
    }

    /// Returns the minor component of the device number.
    #[must_use]
    pub fn minor(&self) -> u32 {
        self.devnum.minor()
    }

    /// Returns the class the node lives in.
    #[must_use]
    pub fn class(&self) -> &Arc<DeviceClass> {
        &self.class
    }

    /// Returns the node's `"<class>/<node>"` path.
    #[must_use]
    pub fn node_path(&self) -> String {
        alloc::format!("{}/{}", self.class.name(), node_name(self.minor()))
    }

    /// Returns the number of files currently open on the device.
    ///
    /// Informational only; it does not hold off teardown.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::Relaxed)
    }

    /// Reads the status register directly.
    #[must_use]
    pub fn status(&self) -> u32 {
        self.regs.status()
    }
}
