//! Device node naming, creation and removal.

extern crate alloc;

use alloc::string::String;

use muon_kernel::class::{DeviceClass, DeviceNode};
use muon_kernel::driver_api::{DriverError, PciAddress};
use muon_kernel::id::DevNum;
use muon_kernel::kerr;

use super::DEVICE_NAME;

/// Returns the node name for a minor: the device name followed by the minor
/// in decimal.
#[must_use]
pub fn node_name(minor: u32) -> String {
    alloc::format!("{DEVICE_NAME}{minor}")
}

/// Publishes the node for `devnum` under `class`.
///
/// # Errors
///
/// Returns the class's error unchanged, e.g. [`DriverError::Exists`] if a
/// node of that name is already present.
pub fn create(
    class: &DeviceClass,
    parent: PciAddress,
    devnum: DevNum,
) -> Result<DeviceNode, DriverError> {
    class.create_node(Some(parent), devnum, &node_name(devnum.minor()))
}

/// Removes a node published by [`create`].
pub fn destroy(class: &DeviceClass, node: DeviceNode) {
    let name = String::from(node.name());
    if let Err(err) = class.destroy_node(node) {
        kerr!(
            "edu_status: node {}/{} could not be destroyed: {}",
            class.name(),
            name,
            err
        );
    }
}
