//! Device classes and the nodes published under them.
//!
//! A [`DeviceClass`] is a named directory of device nodes. Each node maps a
//! name to a device number; [`Kernel::open`](crate::Kernel::open) resolves
//! `"<class>/<node>"` paths through it.

extern crate alloc;

use alloc::collections::BTreeMap;
use alloc::format;
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};

use spin::Mutex;

use crate::driver_api::{DriverError, PciAddress};
use crate::fault::{FaultInjector, FaultPoint};
use crate::id::{ClassId, DevNum};
use crate::trace::{ResourceEvent, ResourceTrace};

#[derive(Debug, Clone, Copy)]
struct NodeRecord {
    dev: DevNum,
    parent: Option<PciAddress>,
}

/// Proof that a node exists, returned by [`DeviceClass::create_node`] and
/// consumed by [`DeviceClass::destroy_node`].
#[derive(Debug, PartialEq, Eq)]
pub struct DeviceNode {
    class: ClassId,
    dev: DevNum,
    name: String,
}

impl DeviceNode {
    /// Returns the node's name within its class.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the device number the node points at.
    #[must_use]
    pub fn dev(&self) -> DevNum {
        self.dev
    }

    /// Returns the class the node was created in.
    #[must_use]
    pub fn class(&self) -> ClassId {
        self.class
    }
}

/// A named namespace of device nodes.
pub struct DeviceClass {
    id: ClassId,
    name: String,
    nodes: Mutex<BTreeMap<String, NodeRecord>>,
    faults: Arc<FaultInjector>,
    trace: Arc<ResourceTrace>,
}

impl fmt::Debug for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceClass")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl DeviceClass {
    /// Returns the class identity.
    #[must_use]
    pub fn id(&self) -> ClassId {
        self.id
    }

    /// Returns the class name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Publishes a node named `name` for `dev`.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Exists`] if the class already has a node with
    /// that name.
    pub fn create_node(
        &self,
        parent: Option<PciAddress>,
        dev: DevNum,
        name: &str,
    ) -> Result<DeviceNode, DriverError> {
        self.faults.check(FaultPoint::DeviceCreate)?;
        {
            let mut nodes = self.nodes.lock();
            if nodes.contains_key(name) {
                return Err(DriverError::Exists);
            }
            nodes.insert(name.to_string(), NodeRecord { dev, parent });
        }
        crate::kdebug!("class: created {}/{} -> {}", self.name, name, dev);
        self.trace.record(ResourceEvent::NodeCreated(dev));
        Ok(DeviceNode {
            class: self.id,
            dev,
            name: name.to_string(),
        })
    }

    /// Removes a node created by [`create_node`](Self::create_node).
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::NotFound`] if `node` belongs to another class
    /// or no longer exists; the node is left untouched in that case.
    pub fn destroy_node(&self, node: DeviceNode) -> Result<(), DriverError> {
        if node.class != self.id {
            crate::kwarn!(
                "class: {} is not a node of '{}'",
                node.name,
                self.name
            );
            return Err(DriverError::NotFound);
        }
        let removed = {
            let mut nodes = self.nodes.lock();
            match nodes.get(&node.name) {
                Some(record) if record.dev == node.dev => nodes.remove(&node.name),
                _ => None,
            }
        };
        if removed.is_none() {
            return Err(DriverError::NotFound);
        }
        crate::kdebug!("class: destroyed {}/{}", self.name, node.name);
        self.trace.record(ResourceEvent::NodeDestroyed(node.dev));
        Ok(())
    }

    /// Returns the device number behind the node named `name`.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<DevNum> {
        self.nodes.lock().get(name).map(|r| r.dev)
    }

    /// Returns the PCI function a node was created for, if any.
    #[must_use]
    pub fn parent_of(&self, name: &str) -> Option<PciAddress> {
        self.nodes.lock().get(name).and_then(|r| r.parent)
    }

    /// Returns every node name, sorted.
    #[must_use]
    pub fn node_names(&self) -> Vec<String> {
        self.nodes.lock().keys().cloned().collect()
    }

    /// Returns the number of nodes in the class.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.lock().len()
    }

    /// Returns the `"<class>/<node>"` path of a node.
    #[must_use]
    pub fn path(&self, node: &DeviceNode) -> String {
        format!("{}/{}", self.name, node.name)
    }
}

/// Registry of classes, keyed by name.
pub(crate) struct ClassTable {
    classes: Mutex<BTreeMap<String, Arc<DeviceClass>>>,
    next_id: AtomicU32,
    faults: Arc<FaultInjector>,
    trace: Arc<ResourceTrace>,
}

impl ClassTable {
    pub(crate) fn new(faults: Arc<FaultInjector>, trace: Arc<ResourceTrace>) -> Self {
        Self {
            classes: Mutex::new(BTreeMap::new()),
            next_id: AtomicU32::new(1),
            faults,
            trace,
        }
    }

    pub(crate) fn create(&self, name: &str) -> Result<Arc<DeviceClass>, DriverError> {
        if name.is_empty() || name.contains('/') {
            return Err(DriverError::InvalidArgument);
        }
        let mut classes = self.classes.lock();
        if classes.contains_key(name) {
            return Err(DriverError::Exists);
        }
        let class = Arc::new(DeviceClass {
            id: ClassId::new(self.next_id.fetch_add(1, Ordering::Relaxed)),
            name: name.to_string(),
            nodes: Mutex::new(BTreeMap::new()),
            faults: self.faults.clone(),
            trace: self.trace.clone(),
        });
        classes.insert(name.to_string(), class.clone());
        crate::kinfo!("class: '{}' created", name);
        Ok(class)
    }

    pub(crate) fn destroy(&self, class: &DeviceClass) -> Result<(), DriverError> {
        let mut classes = self.classes.lock();
        match classes.get(class.name()) {
            Some(registered) if registered.id == class.id => {}
            _ => return Err(DriverError::NotFound),
        }
        if class.node_count() != 0 {
            crate::kwarn!(
                "class: '{}' still has {} nodes",
                class.name(),
                class.node_count()
            );
            return Err(DriverError::Busy);
        }
        classes.remove(class.name());
        crate::kinfo!("class: '{}' destroyed", class.name());
        Ok(())
    }

    pub(crate) fn get(&self, name: &str) -> Option<Arc<DeviceClass>> {
        self.classes.lock().get(name).cloned()
    }
}
