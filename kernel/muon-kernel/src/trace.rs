//! Ordered trace of resource acquisitions and releases.
//!
//! Kernel services append a [`ResourceEvent`] each time they hand out or
//! take back a resource. The trace is the ground truth for checking that a
//! driver releases exactly what it acquired, in reverse order.

extern crate alloc;

use alloc::vec::Vec;
use core::fmt;

use spin::Mutex;

use crate::driver_api::PciAddress;
use crate::id::DevNum;

/// One acquisition or release performed by a kernel service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceEvent {
    /// A device was enabled on its bus.
    DeviceEnabled(PciAddress),
    /// A device was disabled.
    DeviceDisabled(PciAddress),
    /// A device's regions were reserved.
    RegionsRequested(PciAddress),
    /// A device's regions were released.
    RegionsReleased(PciAddress),
    /// A BAR was mapped.
    BarMapped(PciAddress, u8),
    /// A BAR mapping was torn down.
    BarUnmapped(PciAddress, u8),
    /// A device number was allocated.
    DevNumAllocated(DevNum),
    /// A device number was freed.
    DevNumFreed(DevNum),
    /// A character device was registered.
    CdevAdded(DevNum),
    /// A character device was unregistered.
    CdevRemoved(DevNum),
    /// A device node was created.
    NodeCreated(DevNum),
    /// A device node was destroyed.
    NodeDestroyed(DevNum),
}

impl ResourceEvent {
    /// Returns `true` for events that hand out a resource.
    #[must_use]
    pub const fn is_acquire(&self) -> bool {
        matches!(
            self,
            Self::DeviceEnabled(_)
                | Self::RegionsRequested(_)
                | Self::BarMapped(..)
                | Self::DevNumAllocated(_)
                | Self::CdevAdded(_)
                | Self::NodeCreated(_)
        )
    }

    /// Returns the event that undoes this one.
    #[must_use]
    pub const fn inverse(&self) -> Self {
        match *self {
            Self::DeviceEnabled(a) => Self::DeviceDisabled(a),
            Self::DeviceDisabled(a) => Self::DeviceEnabled(a),
            Self::RegionsRequested(a) => Self::RegionsReleased(a),
            Self::RegionsReleased(a) => Self::RegionsRequested(a),
            Self::BarMapped(a, bar) => Self::BarUnmapped(a, bar),
            Self::BarUnmapped(a, bar) => Self::BarMapped(a, bar),
            Self::DevNumAllocated(d) => Self::DevNumFreed(d),
            Self::DevNumFreed(d) => Self::DevNumAllocated(d),
            Self::CdevAdded(d) => Self::CdevRemoved(d),
            Self::CdevRemoved(d) => Self::CdevAdded(d),
            Self::NodeCreated(d) => Self::NodeDestroyed(d),
            Self::NodeDestroyed(d) => Self::NodeCreated(d),
        }
    }
}

impl fmt::Display for ResourceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeviceEnabled(a) => write!(f, "enable {a}"),
            Self::DeviceDisabled(a) => write!(f, "disable {a}"),
            Self::RegionsRequested(a) => write!(f, "request regions {a}"),
            Self::RegionsReleased(a) => write!(f, "release regions {a}"),
            Self::BarMapped(a, bar) => write!(f, "map {a} bar{bar}"),
            Self::BarUnmapped(a, bar) => write!(f, "unmap {a} bar{bar}"),
            Self::DevNumAllocated(d) => write!(f, "alloc devnum {d}"),
            Self::DevNumFreed(d) => write!(f, "free devnum {d}"),
            Self::CdevAdded(d) => write!(f, "cdev add {d}"),
            Self::CdevRemoved(d) => write!(f, "cdev del {d}"),
            Self::NodeCreated(d) => write!(f, "node create {d}"),
            Self::NodeDestroyed(d) => write!(f, "node destroy {d}"),
        }
    }
}

/// Append-only event log shared by the kernel's subsystems.
#[derive(Debug, Default)]
pub struct ResourceTrace {
    events: Mutex<Vec<ResourceEvent>>,
}

impl ResourceTrace {
    /// Creates an empty trace.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(&self, event: ResourceEvent) {
        crate::ktrace!("trace: {}", event);
        self.events.lock().push(event);
    }

    /// Returns a copy of the events recorded so far.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ResourceEvent> {
        self.events.lock().clone()
    }

    /// Removes and returns the events recorded so far.
    pub fn take(&self) -> Vec<ResourceEvent> {
        core::mem::take(&mut *self.events.lock())
    }
}

/// Checks that `events` releases everything it acquires in strict reverse
/// order (a well-nested sequence), returning the acquisitions still held.
///
/// Returns `Err(index)` at the first release that does not undo the most
/// recent outstanding acquisition.
pub fn outstanding(events: &[ResourceEvent]) -> Result<Vec<ResourceEvent>, usize> {
    let mut held = Vec::new();
    for (idx, event) in events.iter().enumerate() {
        if event.is_acquire() {
            held.push(*event);
        } else if held.last().map(ResourceEvent::inverse) == Some(*event) {
            held.pop();
        } else {
            return Err(idx);
        }
    }
    Ok(held)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDR: PciAddress = PciAddress::new(0, 4, 0);

    #[test]
    fn inverse_roundtrips() {
        let event = ResourceEvent::BarMapped(ADDR, 0);
        assert_eq!(event.inverse(), ResourceEvent::BarUnmapped(ADDR, 0));
        assert_eq!(event.inverse().inverse(), event);
        assert!(event.is_acquire());
        assert!(!event.inverse().is_acquire());
    }

    #[test]
    fn nested_sequence_has_nothing_outstanding() {
        let events = [
            ResourceEvent::DeviceEnabled(ADDR),
            ResourceEvent::RegionsRequested(ADDR),
            ResourceEvent::RegionsReleased(ADDR),
            ResourceEvent::DeviceDisabled(ADDR),
        ];
        assert_eq!(outstanding(&events), Ok(Vec::new()));
    }

    #[test]
    fn out_of_order_release_is_reported() {
        let events = [
            ResourceEvent::DeviceEnabled(ADDR),
            ResourceEvent::RegionsRequested(ADDR),
            ResourceEvent::DeviceDisabled(ADDR),
        ];
        assert_eq!(outstanding(&events), Err(2));
    }

    #[test]
    fn unmatched_acquire_stays_outstanding() {
        let events = [ResourceEvent::DeviceEnabled(ADDR)];
        assert_eq!(
            outstanding(&events),
            Ok(alloc::vec![ResourceEvent::DeviceEnabled(ADDR)])
        );
    }

    #[test]
    fn take_drains_the_trace() {
        let trace = ResourceTrace::new();
        trace.record(ResourceEvent::DeviceEnabled(ADDR));
        assert_eq!(trace.snapshot().len(), 1);
        assert_eq!(trace.take().len(), 1);
        assert!(trace.snapshot().is_empty());
    }
}
