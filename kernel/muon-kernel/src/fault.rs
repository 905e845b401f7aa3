//! Fault injection for kernel services.
//!
//! Every service a driver uses during probe checks the injector first. Arming
//! a [`FaultPoint`] makes the next call (or every call) of that service fail
//! with a chosen [`DriverError`] before any state changes.

extern crate alloc;

use alloc::vec::Vec;
use core::fmt;

use spin::Mutex;

use crate::driver_api::DriverError;

/// A kernel service that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FaultPoint {
    /// `PciDevice::enable`.
    EnableDevice,
    /// `PciDevice::request_regions`.
    RequestRegions,
    /// `PciDevice::iomap`.
    IoMap,
    /// `CharDevTable::alloc_region`.
    AllocChrdevRegion,
    /// `CharDevTable::add`.
    CdevAdd,
    /// `DeviceClass::create_node`.
    DeviceCreate,
}

impl fmt::Display for FaultPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::EnableDevice => "enable_device",
            Self::RequestRegions => "request_regions",
            Self::IoMap => "iomap",
            Self::AllocChrdevRegion => "alloc_chrdev_region",
            Self::CdevAdd => "cdev_add",
            Self::DeviceCreate => "device_create",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
struct ArmedFault {
    point: FaultPoint,
    error: DriverError,
    /// `None` fails forever.
    remaining: Option<u32>,
}

/// Registry of armed faults.
#[derive(Debug, Default)]
pub struct FaultInjector {
    armed: Mutex<Vec<ArmedFault>>,
}

impl FaultInjector {
    /// Creates an injector with nothing armed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next call at `point` fail with `error`.
    pub fn fail_next(&self, point: FaultPoint, error: DriverError) {
        self.arm(point, error, Some(1));
    }

    /// Makes every call at `point` fail with `error` until cleared.
    pub fn fail_always(&self, point: FaultPoint, error: DriverError) {
        self.arm(point, error, None);
    }

    /// Disarms every fault.
    pub fn clear(&self) {
        self.armed.lock().clear();
    }

    fn arm(&self, point: FaultPoint, error: DriverError, remaining: Option<u32>) {
        let mut armed = self.armed.lock();
        armed.retain(|f| f.point != point);
        armed.push(ArmedFault {
            point,
            error,
            remaining,
        });
    }

    /// Consumes an armed fault for `point`, if any.
    pub(crate) fn check(&self, point: FaultPoint) -> Result<(), DriverError> {
        let mut armed = self.armed.lock();
        let Some(idx) = armed.iter().position(|f| f.point == point) else {
            return Ok(());
        };
        let error = armed[idx].error;
        if let Some(ref mut remaining) = armed[idx].remaining {
            *remaining -= 1;
            if *remaining == 0 {
                armed.remove(idx);
            }
        }
        crate::kdebug!("fault: injected {} at {}", error, point);
        Err(error)
    }
}
