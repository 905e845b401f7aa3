//! Attach, detach and failure unwinding of the `edu` status driver against
//! the emulated kernel.

use muon_drivers::edu_status::{
    self, AcquireError, CLASS_NAME, DRIVER_NAME, EduStatusModule, ResourceStage, STATUS_LEN,
};
use muon_kernel::Kernel;
use muon_kernel::chrdev::FileError;
use muon_kernel::class::DeviceClass;
use muon_kernel::config::{DYNAMIC_MAJOR_END, KernelConfig};
use muon_kernel::driver_api::{DriverError, PciAddress};
use muon_kernel::fault::FaultPoint;
use muon_kernel::id::DevNum;
use muon_kernel::pci::emulated::EDU_IDENT;
use muon_kernel::pci::{EmulatedDevice, PciDevice, ProbeOutcome};
use muon_kernel::trace::{ResourceEvent, outstanding};
use muon_kernel::uaccess::UserSliceMut;

use std::sync::Arc;

const EDU0: PciAddress = PciAddress::new(0, 4, 0);
const EDU1: PciAddress = PciAddress::new(0, 5, 0);
const EDU2: PciAddress = PciAddress::new(0, 6, 0);

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn devnum(minor: u32) -> DevNum {
    DevNum::new(DYNAMIC_MAJOR_END, minor)
}

/// A kernel with the module loaded and the boot-time trace discarded.
fn boot_with(config: KernelConfig) -> (Kernel, EduStatusModule) {
    init_logging();
    let kernel = Kernel::with_config(config);
    let module = EduStatusModule::init(&kernel).unwrap();
    kernel.trace().take();
    (kernel, module)
}

fn boot() -> (Kernel, EduStatusModule) {
    boot_with(KernelConfig::default())
}

/// A kernel with the class created but no driver, and one unclaimed `edu`
/// device, for driving acquisition by hand.
fn bare(address: PciAddress) -> (Kernel, Arc<DeviceClass>, PciDevice) {
    init_logging();
    let kernel = Kernel::new();
    let class = kernel.class_create(CLASS_NAME).unwrap();
    let outcome = kernel.add_pci_device(EmulatedDevice::edu(address)).unwrap();
    assert_eq!(outcome, ProbeOutcome::Unclaimed);
    let dev = kernel.pci().device(address).unwrap();
    (kernel, class, dev)
}

/// Everything a successful attach acquires, in order.
fn attach_events(address: PciAddress, dev: DevNum) -> Vec<ResourceEvent> {
    vec![
        ResourceEvent::DeviceEnabled(address),
        ResourceEvent::RegionsRequested(address),
        ResourceEvent::BarMapped(address, 0),
        ResourceEvent::DevNumAllocated(dev),
        ResourceEvent::CdevAdded(dev),
        ResourceEvent::NodeCreated(dev),
    ]
}

/// The exact inverse of `acquired`.
fn unwind_of(acquired: &[ResourceEvent]) -> Vec<ResourceEvent> {
    acquired.iter().rev().map(ResourceEvent::inverse).collect()
}

fn read_status(kernel: &Kernel, path: &str) -> [u8; 4] {
    let mut file = kernel.open(path).unwrap();
    let mut buf = [0u8; 4];
    let n = file.read(&mut UserSliceMut::new(&mut buf)).unwrap();
    assert_eq!(n, STATUS_LEN);
    buf
}

fn assert_released(dev: &PciDevice) {
    assert!(!dev.is_enabled());
    assert_eq!(dev.region_owner(), None);
    assert_eq!(dev.mapping_count(), 0);
}

// ---------------------------------------------------------------------------
// Attach
// ---------------------------------------------------------------------------

#[test]
fn first_device_gets_minor_zero_and_reads_ident() {
    let (kernel, module) = boot();
    let outcome = kernel.add_pci_device(EmulatedDevice::edu(EDU0)).unwrap();
    assert_eq!(outcome, ProbeOutcome::Bound(DRIVER_NAME));

    assert_eq!(module.class().lookup("myDevice0"), Some(devnum(0)));
    assert_eq!(module.class().parent_of("myDevice0"), Some(EDU0));
    assert_eq!(read_status(&kernel, "myClass/myDevice0"), EDU_IDENT.to_ne_bytes());
    assert_eq!(kernel.trace().take(), attach_events(EDU0, devnum(0)));

    let dev = kernel.pci().device(EDU0).unwrap();
    assert!(dev.is_enabled());
    assert_eq!(dev.region_owner(), Some("myDevice"));
    assert_eq!(dev.mapping_count(), 1);
    assert_eq!(dev.bound_driver(), Some(DRIVER_NAME));
    module.exit();
}

#[test]
fn device_present_at_load_is_probed() {
    init_logging();
    let kernel = Kernel::new();
    kernel.add_pci_device(EmulatedDevice::edu(EDU0)).unwrap();
    let module = EduStatusModule::init(&kernel).unwrap();
    assert_eq!(
        kernel.pci().device(EDU0).unwrap().bound_driver(),
        Some(DRIVER_NAME)
    );
    assert_eq!(module.class().node_names(), vec!["myDevice0".to_string()]);
    module.exit();
}

#[test]
fn other_devices_are_ignored() {
    let (kernel, module) = boot();
    let nic = EmulatedDevice::new(EDU0, 0x8086, 0x10d3).with_memory_bar(0, 0xfeb0_0000, 0x2_0000);
    assert_eq!(kernel.add_pci_device(nic).unwrap(), ProbeOutcome::Unclaimed);
    assert!(kernel.trace().take().is_empty());
    module.exit();
}

#[test]
fn direct_acquire_reaches_node_created() {
    let (kernel, class, dev) = bare(EDU0);
    let ctx = edu_status::acquire(&dev, kernel.chrdev(), &class).unwrap();
    assert_eq!(ctx.stage(), ResourceStage::NodeCreated);
    assert_eq!(ctx.devnum(), devnum(0));
    assert_eq!(ctx.node_path(), "myClass/myDevice0");
    assert_eq!(ctx.status(), EDU_IDENT);
    edu_status::detach(ctx);
    assert_released(&dev);
}

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

#[test]
fn reads_ignore_length_and_position() {
    let (kernel, module) = boot();
    kernel.add_pci_device(EmulatedDevice::edu(EDU0)).unwrap();
    let mut file = kernel.open("myClass/myDevice0").unwrap();

    let mut buf = [0u8; 64];
    let n = file
        .read(&mut UserSliceMut::with_requested_len(&mut buf, 64))
        .unwrap();
    assert_eq!(n, 4);
    let first = buf;

    let mut buf = [0u8; 64];
    let n = file
        .read(&mut UserSliceMut::with_requested_len(&mut buf, 1))
        .unwrap();
    assert_eq!(n, 4);
    assert_eq!(buf, first);
    assert_eq!(file.position(), 0);
    module.exit();
}

#[test]
fn reads_observe_register_changes() {
    let (kernel, module) = boot();
    kernel.add_pci_device(EmulatedDevice::edu(EDU0)).unwrap();
    let dev = kernel.pci().device(EDU0).unwrap();
    let path = "myClass/myDevice0";

    assert_eq!(read_status(&kernel, path), EDU_IDENT.to_ne_bytes());
    dev.device_write32(0, 0, 0xcafe_f00d).unwrap();
    assert_eq!(read_status(&kernel, path), 0xcafe_f00d_u32.to_ne_bytes());
    module.exit();
}

#[test]
fn transfer_fault_is_scoped_to_one_read() {
    let (kernel, module) = boot();
    kernel.add_pci_device(EmulatedDevice::edu(EDU0)).unwrap();
    let mut file = kernel.open("myClass/myDevice0").unwrap();

    let err = file.read(&mut UserSliceMut::unmapped(4)).unwrap_err();
    assert!(matches!(err, FileError::Fault(_)));
    let mut short = [0u8; 2];
    let err = file.read(&mut UserSliceMut::new(&mut short)).unwrap_err();
    assert!(matches!(err, FileError::Fault(_)));

    let mut buf = [0u8; 4];
    assert_eq!(file.read(&mut UserSliceMut::new(&mut buf)), Ok(4));
    assert_eq!(buf, EDU_IDENT.to_ne_bytes());
    assert!(kernel.trace().take().iter().all(ResourceEvent::is_acquire));
    module.exit();
}

#[test]
fn open_count_follows_files() {
    let (kernel, class, dev) = bare(EDU0);
    let ctx = edu_status::acquire(&dev, kernel.chrdev(), &class).unwrap();
    assert_eq!(ctx.open_count(), 0);
    let a = kernel.open(&ctx.node_path()).unwrap();
    let b = kernel.chrdev().open(ctx.devnum()).unwrap();
    assert_eq!(ctx.open_count(), 2);
    drop(a);
    assert_eq!(ctx.open_count(), 1);
    drop(b);
    assert_eq!(ctx.open_count(), 0);
    edu_status::detach(ctx);
}

#[test]
fn concurrent_readers_see_the_register() {
    let (kernel, module) = boot();
    kernel.add_pci_device(EmulatedDevice::edu(EDU0)).unwrap();

    let readers: Vec<_> = (0..8)
        .map(|_| {
            let kernel = kernel.clone();
            std::thread::spawn(move || {
                let mut file = kernel.open("myClass/myDevice0").unwrap();
                for _ in 0..200 {
                    let mut buf = [0u8; 4];
                    assert_eq!(file.read(&mut UserSliceMut::new(&mut buf)), Ok(4));
                    assert_eq!(u32::from_ne_bytes(buf), EDU_IDENT);
                }
            })
        })
        .collect();
    for reader in readers {
        reader.join().unwrap();
    }
    module.exit();
}

#[test]
fn concurrent_attaches_bind_distinct_instances() {
    const N: u8 = 8;
    let (kernel, module) = boot();

    let attachers: Vec<_> = (0..N)
        .map(|i| {
            let kernel = kernel.clone();
            std::thread::spawn(move || {
                let address = PciAddress::new(0, 4 + i, 0);
                kernel.add_pci_device(EmulatedDevice::edu(address)).unwrap()
            })
        })
        .collect();
    for attacher in attachers {
        assert_eq!(attacher.join().unwrap(), ProbeOutcome::Bound(DRIVER_NAME));
    }

    let mut names = module.class().node_names();
    names.sort();
    let mut expected: Vec<String> = (0..u32::from(N)).map(|m| format!("myDevice{m}")).collect();
    expected.sort();
    assert_eq!(names, expected);
    for minor in 0..u32::from(N) {
        let path = format!("myClass/myDevice{minor}");
        assert_eq!(read_status(&kernel, &path), EDU_IDENT.to_ne_bytes());
    }

    module.exit();
    assert_eq!(outstanding(&kernel.trace().take()), Ok(Vec::new()));
    assert_eq!(kernel.chrdev().allocated_count(), 0);
}

// ---------------------------------------------------------------------------
// Failure unwinding
// ---------------------------------------------------------------------------

#[test]
fn failure_at_each_step_unwinds_exactly_the_earlier_steps() {
    let steps: [(FaultPoint, DriverError, fn(DriverError) -> AcquireError); 6] = [
        (FaultPoint::EnableDevice, DriverError::NoDevice, AcquireError::Enable),
        (FaultPoint::RequestRegions, DriverError::Busy, AcquireError::RegionConflict),
        (FaultPoint::IoMap, DriverError::NoMemory, AcquireError::Mapping),
        (
            FaultPoint::AllocChrdevRegion,
            DriverError::NoSpace,
            AcquireError::IdentifierExhaustion,
        ),
        (
            FaultPoint::CdevAdd,
            DriverError::Busy,
            AcquireError::InterfaceRegistration,
        ),
        (FaultPoint::DeviceCreate, DriverError::NoMemory, AcquireError::NodeCreation),
    ];
    let full = attach_events(EDU0, devnum(0));

    for (idx, (point, error, variant)) in steps.into_iter().enumerate() {
        let step = idx + 1;
        let (kernel, class, dev) = bare(EDU0);
        kernel.trace().take();
        kernel.faults().fail_next(point, error);

        let err = edu_status::acquire(&dev, kernel.chrdev(), &class).unwrap_err();
        assert_eq!(err, variant(error), "step {step}");
        assert_eq!(err.step(), step);
        assert_eq!(DriverError::from(err), error);

        let mut expected = full[..idx].to_vec();
        expected.extend(unwind_of(&full[..idx]));
        let events = kernel.trace().take();
        assert_eq!(events, expected, "step {step}");
        assert_eq!(outstanding(&events), Ok(Vec::new()));

        assert_released(&dev);
        assert_eq!(kernel.chrdev().allocated_count(), 0);
        assert!(!kernel.chrdev().is_registered(devnum(0)));
        assert_eq!(class.node_count(), 0);
    }
}

#[test]
fn mapping_failure_through_the_bus() {
    let (kernel, module) = boot();
    kernel
        .faults()
        .fail_next(FaultPoint::IoMap, DriverError::NoMemory);
    let outcome = kernel.add_pci_device(EmulatedDevice::edu(EDU0)).unwrap();
    assert_eq!(outcome, ProbeOutcome::Failed(DriverError::NoMemory));

    assert_eq!(
        kernel.trace().take(),
        vec![
            ResourceEvent::DeviceEnabled(EDU0),
            ResourceEvent::RegionsRequested(EDU0),
            ResourceEvent::RegionsReleased(EDU0),
            ResourceEvent::DeviceDisabled(EDU0),
        ]
    );
    let dev = kernel.pci().device(EDU0).unwrap();
    assert_released(&dev);
    assert_eq!(dev.bound_driver(), None);
    assert_eq!(kernel.chrdev().allocated_count(), 0);
    assert_eq!(module.class().node_count(), 0);
    module.exit();
}

#[test]
fn undersized_window_is_a_mapping_error() {
    init_logging();
    let kernel = Kernel::new();
    let class = kernel.class_create(CLASS_NAME).unwrap();
    let tiny = EmulatedDevice::new(EDU0, 0x1234, 0x11e8).with_memory_bar(0, 0xfea0_0000, 2);
    kernel.add_pci_device(tiny).unwrap();
    let dev = kernel.pci().device(EDU0).unwrap();

    let err = edu_status::acquire(&dev, kernel.chrdev(), &class).unwrap_err();
    assert_eq!(err, AcquireError::Mapping(DriverError::NoMemory));
    assert_eq!(err.stage(), ResourceStage::BarMapped);
    let events = kernel.trace().take();
    assert_eq!(outstanding(&events), Ok(Vec::new()));
    assert_released(&dev);
}

#[test]
fn missing_bar_is_a_mapping_error() {
    init_logging();
    let kernel = Kernel::new();
    let class = kernel.class_create(CLASS_NAME).unwrap();
    kernel
        .add_pci_device(EmulatedDevice::new(EDU0, 0x1234, 0x11e8))
        .unwrap();
    let dev = kernel.pci().device(EDU0).unwrap();

    let err = edu_status::acquire(&dev, kernel.chrdev(), &class).unwrap_err();
    assert_eq!(err, AcquireError::Mapping(DriverError::NoMemory));
    assert_released(&dev);
}

#[test]
fn region_conflict_leaves_device_disabled() {
    let (kernel, class, dev) = bare(EDU0);
    dev.request_regions("squatter").unwrap();
    kernel.trace().take();

    let err = edu_status::acquire(&dev, kernel.chrdev(), &class).unwrap_err();
    assert_eq!(err, AcquireError::RegionConflict(DriverError::Busy));
    assert_eq!(err.stage(), ResourceStage::RegionsReserved);
    assert_eq!(
        kernel.trace().take(),
        vec![
            ResourceEvent::DeviceEnabled(EDU0),
            ResourceEvent::DeviceDisabled(EDU0),
        ]
    );
    assert!(!dev.is_enabled());
    assert_eq!(dev.region_owner(), Some("squatter"));
}

#[test]
fn minor_exhaustion_fails_the_second_device() {
    let (kernel, module) = boot_with(KernelConfig::with_minor_capacity(1));
    assert_eq!(
        kernel.add_pci_device(EmulatedDevice::edu(EDU0)).unwrap(),
        ProbeOutcome::Bound(DRIVER_NAME)
    );
    assert_eq!(
        kernel.add_pci_device(EmulatedDevice::edu(EDU1)).unwrap(),
        ProbeOutcome::Failed(DriverError::NoSpace)
    );
    assert_released(&kernel.pci().device(EDU1).unwrap());
    assert_eq!(module.class().node_names(), vec!["myDevice0".to_string()]);
    module.exit();
}

#[test]
fn dropping_a_context_releases_everything() {
    let (kernel, class, dev) = bare(EDU0);
    kernel.trace().take();
    let ctx = edu_status::acquire(&dev, kernel.chrdev(), &class).unwrap();
    drop(ctx);
    let events = kernel.trace().take();
    let full = attach_events(EDU0, devnum(0));
    assert_eq!(events[..6], full[..]);
    assert_eq!(events[6..], unwind_of(&full)[..]);
    assert_released(&dev);
}

// ---------------------------------------------------------------------------
// Detach
// ---------------------------------------------------------------------------

#[test]
fn detach_runs_the_exact_reverse_chain() {
    let (kernel, module) = boot();
    kernel.add_pci_device(EmulatedDevice::edu(EDU0)).unwrap();
    let dev = kernel.pci().device(EDU0).unwrap();
    kernel.trace().take();

    kernel.remove_pci_device(EDU0).unwrap();
    assert_eq!(
        kernel.trace().take(),
        vec![
            ResourceEvent::NodeDestroyed(devnum(0)),
            ResourceEvent::CdevRemoved(devnum(0)),
            ResourceEvent::DevNumFreed(devnum(0)),
            ResourceEvent::BarUnmapped(EDU0, 0),
            ResourceEvent::RegionsReleased(EDU0),
            ResourceEvent::DeviceDisabled(EDU0),
        ]
    );
    assert_released(&dev);
    assert!(kernel.pci().device(EDU0).is_none());
    assert_eq!(kernel.open("myClass/myDevice0").unwrap_err(), DriverError::NotFound);
    module.exit();
}

#[test]
fn open_file_is_revoked_on_detach() {
    let (kernel, module) = boot();
    kernel.add_pci_device(EmulatedDevice::edu(EDU0)).unwrap();
    let mut file = kernel.open("myClass/myDevice0").unwrap();

    kernel.remove_pci_device(EDU0).unwrap();
    let mut buf = [0u8; 4];
    assert_eq!(
        file.read(&mut UserSliceMut::new(&mut buf)),
        Err(FileError::NoDevice)
    );
    assert_eq!(buf, [0; 4]);
    drop(file);
    module.exit();
}

#[test]
fn instances_get_sequential_minors_and_reuse_freed_ones() {
    let (kernel, module) = boot();
    kernel.add_pci_device(EmulatedDevice::edu(EDU0)).unwrap();
    kernel
        .add_pci_device(EmulatedDevice::edu(EDU1).with_register(0, 0, 0x0200_00ed))
        .unwrap();

    assert_eq!(module.class().lookup("myDevice0"), Some(devnum(0)));
    assert_eq!(module.class().lookup("myDevice1"), Some(devnum(1)));
    assert_eq!(read_status(&kernel, "myClass/myDevice1"), 0x0200_00ed_u32.to_ne_bytes());

    kernel.remove_pci_device(EDU0).unwrap();
    assert_eq!(module.class().lookup("myDevice0"), None);

    kernel.add_pci_device(EmulatedDevice::edu(EDU2)).unwrap();
    assert_eq!(module.class().lookup("myDevice0"), Some(devnum(0)));
    assert_eq!(module.class().parent_of("myDevice0"), Some(EDU2));
    module.exit();
}

#[test]
fn module_exit_releases_everything_newest_first() {
    let (kernel, module) = boot();
    kernel.add_pci_device(EmulatedDevice::edu(EDU0)).unwrap();
    kernel.add_pci_device(EmulatedDevice::edu(EDU1)).unwrap();
    let _file = kernel.open("myClass/myDevice0").unwrap();
    let attached = kernel.trace().take();

    module.exit();
    let detached = kernel.trace().take();
    assert_eq!(detached.len(), 12);
    assert_eq!(detached[0], ResourceEvent::NodeDestroyed(devnum(1)));
    assert_eq!(detached[6], ResourceEvent::NodeDestroyed(devnum(0)));

    let mut all = attached;
    all.extend(detached);
    assert_eq!(outstanding(&all), Ok(Vec::new()));

    assert!(kernel.class(CLASS_NAME).is_none());
    assert_eq!(kernel.chrdev().allocated_count(), 0);
    assert!(kernel.pci().driver_names().is_empty());
    for address in [EDU0, EDU1] {
        let dev = kernel.pci().device(address).unwrap();
        assert_released(&dev);
        assert_eq!(dev.bound_driver(), None);
    }
}

#[test]
fn module_can_be_reloaded() {
    let (kernel, module) = boot();
    kernel.add_pci_device(EmulatedDevice::edu(EDU0)).unwrap();
    module.exit();

    let module = EduStatusModule::init(&kernel).unwrap();
    assert_eq!(read_status(&kernel, "myClass/myDevice0"), EDU_IDENT.to_ne_bytes());
    module.exit();
}

#[test]
fn init_fails_cleanly_when_the_class_exists() {
    init_logging();
    let kernel = Kernel::new();
    let squatter = kernel.class_create(CLASS_NAME).unwrap();
    assert_eq!(
        EduStatusModule::init(&kernel).unwrap_err(),
        DriverError::Exists
    );
    assert!(kernel.pci().driver_names().is_empty());
    kernel.class_destroy(&squatter).unwrap();
}
