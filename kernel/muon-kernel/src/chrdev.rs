//! Character device numbers, registrations and open files.
//!
//! [`CharDevTable`] hands out device numbers under dynamically chosen majors
//! and maps registered number ranges to [`CharDevice`] implementations.
//! Opening a registered number yields a [`File`].
//!
//! Unregistering a device revokes it: the table takes the entry's write gate,
//! which waits out any read in progress, and marks the entry dead. Files
//! opened before that point stay valid objects but every further read fails
//! with [`FileError::NoDevice`], so a driver may tear down the hardware
//! behind a device right after unregistering it.

extern crate alloc;

use alloc::boxed::Box;
use alloc::collections::{BTreeMap, BTreeSet};
use alloc::sync::Arc;
use core::fmt;

use spin::{Mutex, RwLock};

use crate::config::{DYNAMIC_MAJOR_END, DYNAMIC_MAJOR_START, KernelConfig};
use crate::driver_api::{CharDevice, DriverError, DynCharDevice, DynCharDeviceWrapper, OpenFile};
use crate::fault::{FaultInjector, FaultPoint};
use crate::id::DevNum;
use crate::trace::{ResourceEvent, ResourceTrace};
use crate::uaccess::{TransferFault, UserSliceMut};

/// Errors returned by file operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileError {
    /// The user buffer could not be written.
    Fault(TransferFault),
    /// The device behind the file has been unregistered.
    NoDevice,
}

impl fmt::Display for FileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fault(fault) => write!(f, "{fault}"),
            Self::NoDevice => f.write_str("device is gone"),
        }
    }
}

impl From<TransferFault> for FileError {
    fn from(fault: TransferFault) -> Self {
        Self::Fault(fault)
    }
}

impl From<FileError> for DriverError {
    fn from(err: FileError) -> Self {
        match err {
            FileError::Fault(_) => Self::Fault,
            FileError::NoDevice => Self::NoDevice,
        }
    }
}

/// Minors handed out under one major.
struct MajorRegion {
    name: &'static str,
    used: BTreeSet<u32>,
}

struct CdevEntry {
    first: DevNum,
    count: u32,
    device: Box<dyn DynCharDevice>,
    /// `false` once the device is unregistered. Reads hold the read side.
    live: RwLock<bool>,
}

impl CdevEntry {
    fn contains(&self, dev: DevNum) -> bool {
        dev.major() == self.first.major()
            && dev.minor() >= self.first.minor()
            && dev.minor() - self.first.minor() < self.count
    }
}

#[derive(Default)]
struct ChrdevState {
    majors: BTreeMap<u32, MajorRegion>,
    cdevs: BTreeMap<DevNum, Arc<CdevEntry>>,
}

impl ChrdevState {
    fn lookup(&self, dev: DevNum) -> Option<&Arc<CdevEntry>> {
        self.cdevs
            .range(..=dev)
            .next_back()
            .map(|(_, entry)| entry)
            .filter(|entry| entry.contains(dev))
    }

    fn overlaps(&self, first: DevNum, count: u32) -> bool {
        self.cdevs.values().any(|entry| {
            entry.first.major() == first.major()
                && first.minor() < entry.first.minor() + entry.count
                && entry.first.minor() < first.minor() + count
        })
    }
}

/// Device number allocator and character device registry.
pub struct CharDevTable {
    config: KernelConfig,
    state: Mutex<ChrdevState>,
    faults: Arc<FaultInjector>,
    trace: Arc<ResourceTrace>,
}

impl CharDevTable {
    pub(crate) fn new(
        config: KernelConfig,
        faults: Arc<FaultInjector>,
        trace: Arc<ResourceTrace>,
    ) -> Self {
        Self {
            config,
            state: Mutex::new(ChrdevState::default()),
            faults,
            trace,
        }
    }

    /// Allocates `count` consecutive device numbers for `name`.
    ///
    /// All allocations under one name share a major, chosen downwards from
    /// the top of the dynamic range on first use. Within it the lowest free
    /// run of minors at or above `first_minor` is taken, so numbers freed by
    /// a departed device are reused.
    ///
    /// # Errors
    ///
    /// - [`DriverError::InvalidArgument`] if `count` is zero.
    /// - [`DriverError::NoSpace`] if the name's major has no room left or
    ///   every dynamic major is taken.
    pub fn alloc_region(
        &self,
        first_minor: u32,
        count: u32,
        name: &'static str,
    ) -> Result<DevNum, DriverError> {
        self.faults.check(FaultPoint::AllocChrdevRegion)?;
        if count == 0 {
            return Err(DriverError::InvalidArgument);
        }
        let capacity = self.config.minors_per_major;

        let dev = {
            let mut state = self.state.lock();
            let existing = state
                .majors
                .iter()
                .find(|(_, r)| r.name == name)
                .map(|(&major, _)| major);
            let major = match existing {
                Some(major) => major,
                None => {
                    let major = (DYNAMIC_MAJOR_START..=DYNAMIC_MAJOR_END)
                        .rev()
                        .find(|m| !state.majors.contains_key(m))
                        .ok_or(DriverError::NoSpace)?;
                    state.majors.insert(
                        major,
                        MajorRegion {
                            name,
                            used: BTreeSet::new(),
                        },
                    );
                    major
                }
            };
            let region = state
                .majors
                .get_mut(&major)
                .ok_or(DriverError::NoSpace)?;

            let mut start = first_minor;
            loop {
                let end = start.checked_add(count).ok_or(DriverError::NoSpace)?;
                if end > capacity {
                    if region.used.is_empty() {
                        state.majors.remove(&major);
                    }
                    return Err(DriverError::NoSpace);
                }
                match region.used.range(start..end).next_back() {
                    Some(&taken) => start = taken + 1,
                    None => break,
                }
            }
            region.used.extend(start..start + count);
            DevNum::new(major, start)
        };

        crate::kdebug!("chrdev: allocated {} (+{}) for '{}'", dev, count, name);
        self.trace.record(ResourceEvent::DevNumAllocated(dev));
        Ok(dev)
    }

    /// Frees device numbers allocated by [`alloc_region`](Self::alloc_region).
    pub fn unregister_region(&self, first: DevNum, count: u32) {
        let freed = {
            let mut state = self.state.lock();
            let Some(region) = state.majors.get_mut(&first.major()) else {
                crate::kwarn!("chrdev: freeing {} from an unknown major", first);
                return;
            };
            let mut freed = 0;
            for minor in first.minor()..first.minor().saturating_add(count) {
                if region.used.remove(&minor) {
                    freed += 1;
                }
            }
            if region.used.is_empty() {
                state.majors.remove(&first.major());
            }
            freed
        };
        if freed != count {
            crate::kwarn!(
                "chrdev: freed {} of {} numbers at {}",
                freed,
                count,
                first
            );
        }
        if freed != 0 {
            self.trace.record(ResourceEvent::DevNumFreed(first));
        }
    }

    /// Registers `device` for the `count` numbers starting at `first`.
    ///
    /// The device is reachable through [`open`](Self::open) as soon as this
    /// returns.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Exists`] if any of the numbers is already
    /// registered.
    pub fn add<D: CharDevice>(&self, first: DevNum, count: u32, device: D) -> Result<(), DriverError> {
        self.faults.check(FaultPoint::CdevAdd)?;
        if count == 0 {
            return Err(DriverError::InvalidArgument);
        }
        {
            let mut state = self.state.lock();
            if state.overlaps(first, count) {
                return Err(DriverError::Exists);
            }
            state.cdevs.insert(
                first,
                Arc::new(CdevEntry {
                    first,
                    count,
                    device: Box::new(DynCharDeviceWrapper(device)),
                    live: RwLock::new(true),
                }),
            );
        }
        self.trace.record(ResourceEvent::CdevAdded(first));
        Ok(())
    }

    /// Unregisters the device registered at `first` and revokes its files.
    ///
    /// Blocks until reads already in progress on the device finish.
    pub fn del(&self, first: DevNum) {
        let Some(entry) = self.state.lock().cdevs.remove(&first) else {
            crate::kwarn!("chrdev: {} is not registered", first);
            return;
        };
        *entry.live.write() = false;
        self.trace.record(ResourceEvent::CdevRemoved(first));
    }

    /// Returns `true` if `dev` falls in a registered range.
    #[must_use]
    pub fn is_registered(&self, dev: DevNum) -> bool {
        self.state.lock().lookup(dev).is_some()
    }

    /// Returns the number of device numbers currently allocated.
    #[must_use]
    pub fn allocated_count(&self) -> usize {
        self.state
            .lock()
            .majors
            .values()
            .map(|r| r.used.len())
            .sum()
    }

    /// Opens the device registered for `dev`.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::NoDevice`] if nothing is registered there, or
    /// whatever the device's own open returns.
    pub fn open(&self, dev: DevNum) -> Result<File, DriverError> {
        let entry = self
            .state
            .lock()
            .lookup(dev)
            .cloned()
            .ok_or(DriverError::NoDevice)?;
        let file = {
            let live = entry.live.read();
            if !*live {
                return Err(DriverError::NoDevice);
            }
            entry.device.dyn_open()?
        };
        Ok(File {
            dev,
            entry,
            file,
            pos: 0,
        })
    }
}

/// An open character device.
///
/// Dropping the file releases it.
pub struct File {
    dev: DevNum,
    entry: Arc<CdevEntry>,
    file: Box<dyn OpenFile>,
    pos: u64,
}

impl fmt::Debug for File {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("File")
            .field("dev", &self.dev)
            .field("pos", &self.pos)
            .finish_non_exhaustive()
    }
}

impl File {
    /// Reads from the device into `buf`.
    ///
    /// # Errors
    ///
    /// - [`FileError::NoDevice`] if the device has been unregistered.
    /// - [`FileError::Fault`] if the device could not write `buf`.
    pub fn read(&mut self, buf: &mut UserSliceMut<'_>) -> Result<usize, FileError> {
        let live = self.entry.live.read();
        if !*live {
            return Err(FileError::NoDevice);
        }
        self.file.read(buf, &mut self.pos)
    }

    /// Returns the device number the file was opened on.
    #[must_use]
    pub fn dev(&self) -> DevNum {
        self.dev
    }

    /// Returns the file position.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.pos
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicUsize, Ordering};

    fn table(minors: u32) -> CharDevTable {
        CharDevTable::new(
            KernelConfig::with_minor_capacity(minors),
            Arc::new(FaultInjector::new()),
            Arc::new(ResourceTrace::new()),
        )
    }

    struct Counter {
        opens: Arc<AtomicUsize>,
    }

    struct CounterFile;

    impl CharDevice for Counter {
        type File = CounterFile;

        fn open(&self) -> Result<CounterFile, DriverError> {
            self.opens.fetch_add(1, Ordering::Relaxed);
            Ok(CounterFile)
        }
    }

    impl OpenFile for CounterFile {
        fn read(&self, buf: &mut UserSliceMut<'_>, pos: &mut u64) -> Result<usize, FileError> {
            buf.copy_to_user(&[0xab])?;
            *pos += 1;
            Ok(1)
        }
    }

    fn counter() -> (Counter, Arc<AtomicUsize>) {
        let opens = Arc::new(AtomicUsize::new(0));
        (
            Counter {
                opens: opens.clone(),
            },
            opens,
        )
    }

    #[test]
    fn names_share_a_major_and_reuse_minors() {
        let table = table(256);
        let a = table.alloc_region(0, 1, "alpha").unwrap();
        let b = table.alloc_region(0, 1, "alpha").unwrap();
        let c = table.alloc_region(0, 1, "beta").unwrap();
        assert_eq!(a, DevNum::new(DYNAMIC_MAJOR_END, 0));
        assert_eq!(b, DevNum::new(DYNAMIC_MAJOR_END, 1));
        assert_eq!(c.major(), DYNAMIC_MAJOR_END - 1);

        table.unregister_region(a, 1);
        let again = table.alloc_region(0, 1, "alpha").unwrap();
        assert_eq!(again, a);
        assert_eq!(table.allocated_count(), 3);
    }

    #[test]
    fn exhausted_major_reports_no_space() {
        let table = table(2);
        table.alloc_region(0, 1, "alpha").unwrap();
        table.alloc_region(0, 1, "alpha").unwrap();
        assert_eq!(
            table.alloc_region(0, 1, "alpha"),
            Err(DriverError::NoSpace)
        );
        assert_eq!(table.alloc_region(0, 3, "beta"), Err(DriverError::NoSpace));
        // The failed first allocation for "beta" does not pin a major.
        assert_eq!(
            table.alloc_region(0, 1, "gamma").unwrap().major(),
            DYNAMIC_MAJOR_END - 1
        );
    }

    #[test]
    fn runs_skip_taken_minors() {
        let table = table(8);
        let first = table.alloc_region(0, 2, "alpha").unwrap();
        let second = table.alloc_region(1, 2, "alpha").unwrap();
        assert_eq!(first.minor(), 0);
        assert_eq!(second.minor(), 2);
        assert_eq!(table.alloc_region(0, 0, "alpha"), Err(DriverError::InvalidArgument));
    }

    #[test]
    fn open_read_and_revoke() {
        let table = table(256);
        let dev = table.alloc_region(0, 1, "alpha").unwrap();
        let (device, opens) = counter();
        table.add(dev, 1, device).unwrap();
        assert!(table.is_registered(dev));

        let mut file = table.open(dev).unwrap();
        assert_eq!(opens.load(Ordering::Relaxed), 1);
        let mut buf = [0u8; 4];
        assert_eq!(file.read(&mut UserSliceMut::new(&mut buf)), Ok(1));
        assert_eq!(buf[0], 0xab);
        assert_eq!(file.position(), 1);

        table.del(dev);
        assert!(!table.is_registered(dev));
        assert_eq!(
            file.read(&mut UserSliceMut::new(&mut buf)),
            Err(FileError::NoDevice)
        );
        assert_eq!(table.open(dev).unwrap_err(), DriverError::NoDevice);
    }

    #[test]
    fn overlapping_registration_is_rejected() {
        let table = table(256);
        let dev = table.alloc_region(0, 2, "alpha").unwrap();
        table.add(dev, 2, counter().0).unwrap();
        let second = DevNum::new(dev.major(), dev.minor() + 1);
        assert_eq!(table.add(second, 1, counter().0), Err(DriverError::Exists));
        assert!(table.open(second).is_ok());
    }

    #[test]
    fn read_fault_propagates() {
        let table = table(256);
        let dev = table.alloc_region(0, 1, "alpha").unwrap();
        table.add(dev, 1, counter().0).unwrap();
        let mut file = table.open(dev).unwrap();
        let err = file.read(&mut UserSliceMut::unmapped(16)).unwrap_err();
        assert!(matches!(err, FileError::Fault(_)));
        assert_eq!(DriverError::from(err), DriverError::Fault);
    }
}
