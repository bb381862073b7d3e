//! The device core state object.
//!
//! [`DeviceManager`] owns every piece of shared state: the device pool, the
//! registry order, the power-management order, the link graph and the probe
//! gate. Nothing is global; callers pass the manager around.
//!
//! # Locking
//!
//! ```text
//! links (graph, RwLock) ──> dpm (pm order) ──> kset (registry order)
//!                                          ──> pool ──> device fields
//! ```
//!
//! Locks are always taken left to right. The per-device lock (held across
//! driver callbacks) is taken before any of them. No release callback ever
//! runs under the graph lock: links deleted under it are collected and their
//! device references are dropped after the lock is released.

mod driver;
mod links;
mod order;
mod shutdown;

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};

use spin::{Mutex, RwLock};

use crate::config::{AssertPolicy, DeviceCoreConfig};
use crate::device::{DeviceId, DeviceNode};
use crate::error::DevResult;
use crate::lifecycle::ProbeGate;
use crate::link::LinkTable;
use crate::ops::DeviceOps;
use crate::registry::DeviceList;

pub use order::DpmOrder;

/// Device hierarchy manager.
///
/// # Lifecycle
///
/// ```text
/// initialize() ──> add_device() ──> [links, probe, unbind] ──> del_device() ──> put_device()
///   ref = 1          registered                                 unregistered      ref = 0: release
/// ```
///
/// `register()` and `unregister()` combine the two steps on each side.
pub struct DeviceManager {
    config: DeviceCoreConfig,
    /// Every live device, indexed by ID.
    pool: RwLock<BTreeMap<DeviceId, Arc<DeviceNode>>>,
    /// Counter for generating unique device IDs.
    next_id: AtomicUsize,
    /// Registry order, walked backwards at shutdown.
    kset: Mutex<DeviceList>,
    /// Power-management order.
    dpm: Mutex<DeviceList>,
    /// The link graph.
    links: RwLock<LinkTable>,
    /// Driver probes in flight.
    probe: ProbeGate,
    /// Broken invariants seen so far.
    assert_failures: AtomicUsize,
}

impl DeviceManager {
    /// Creates an empty device core.
    pub fn new(config: DeviceCoreConfig) -> Self {
        Self {
            config,
            pool: RwLock::new(BTreeMap::new()),
            next_id: AtomicUsize::new(1),
            kset: Mutex::new(DeviceList::new()),
            dpm: Mutex::new(DeviceList::new()),
            links: RwLock::new(LinkTable::new()),
            probe: ProbeGate::new(),
            assert_failures: AtomicUsize::new(0),
        }
    }

    /// Gets the configuration.
    pub fn config(&self) -> &DeviceCoreConfig {
        &self.config
    }

    fn next_device_id(&self) -> DeviceId {
        DeviceId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn node(&self, dev: DeviceId) -> Option<Arc<DeviceNode>> {
        self.pool.read().get(&dev).cloned()
    }

    pub(crate) fn node_or_err(&self, dev: DeviceId) -> DevResult<Arc<DeviceNode>> {
        match self.node(dev) {
            Some(node) => Ok(node),
            None => dev_err!(InvalidArgument, "unknown device {}", dev),
        }
    }

    /// Name of `dev` for log messages.
    pub(crate) fn dev_name(&self, dev: DeviceId) -> String {
        self.node(dev)
            .map_or_else(|| alloc::format!("{dev}"), |node| String::from(node.name()))
    }

    /// Reports a broken invariant according to the assertion policy.
    ///
    /// Returns `cond`, so it can guard the rest of an operation.
    #[track_caller]
    pub(crate) fn warn_on(&self, cond: bool, what: &str) -> bool {
        if cond {
            self.assert_failures.fetch_add(1, Ordering::Relaxed);
            match self.config.assert_policy {
                AssertPolicy::Panic => panic!("device core invariant violated: {what}"),
                AssertPolicy::Log => warn!(
                    "device core invariant violated at {}: {}",
                    core::panic::Location::caller(),
                    what
                ),
            }
        }
        cond
    }

    /// Number of broken invariants logged so far.
    pub fn assertion_failures(&self) -> usize {
        self.assert_failures.load(Ordering::Relaxed)
    }

    /// Creates a device holding one reference, owned by the caller.
    ///
    /// The device is not part of the hierarchy until [`add_device`](Self::add_device).
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `name` is empty or `parent` is unknown.
    pub fn initialize(
        &self,
        name: &str,
        parent: Option<DeviceId>,
        ops: Arc<dyn DeviceOps>,
    ) -> DevResult<DeviceId> {
        if name.is_empty() {
            return dev_err!(InvalidArgument, "device name is empty");
        }
        if let Some(parent) = parent {
            self.node_or_err(parent)?;
        }

        let id = self.next_device_id();
        let node = Arc::new(DeviceNode::new(id, String::from(name), parent, ops));

        self.links.write().insert_device(id);
        self.pool.write().insert(id, node);
        debug!("device: '{}': initialized as {}", name, id);
        Ok(id)
    }

    /// Adds an initialized device to the hierarchy.
    ///
    /// The device joins the tail of the registry and power-management
    /// orders and of its parent's children, and holds a reference on the
    /// parent until it is deleted.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the device is unknown, already added, or
    /// its parent has gone away.
    pub fn add_device(&self, dev: DeviceId) -> DevResult {
        let node = self.node_or_err(dev)?;

        let parent = match node.parent() {
            Some(parent) => match self.get_device(parent) {
                Some(_) => self.node(parent),
                None => return dev_err!(InvalidArgument, "parent {} of {} is gone", parent, dev),
            },
            None => None,
        };

        {
            let mut inner = node.inner();
            if inner.registered {
                drop(inner);
                if let Some(parent) = &parent {
                    self.put_device(parent.id());
                }
                return dev_err!(InvalidArgument, "device '{}' is already added", node.name());
            }
            inner.registered = true;
        }

        debug!("device: '{}': add", node.name());
        self.kset.lock().push_back(dev);
        {
            let mut dpm = self.dpm.lock();
            dpm.push_back(dev);
            node.inner().in_dpm = true;
        }
        if let Some(parent) = &parent {
            parent.inner().children.push(dev);
        }
        Ok(())
    }

    /// Initializes and adds a device in one step.
    ///
    /// On failure the device is released again.
    pub fn register(
        &self,
        name: &str,
        parent: Option<DeviceId>,
        ops: Arc<dyn DeviceOps>,
    ) -> DevResult<DeviceId> {
        let dev = self.initialize(name, parent, ops)?;
        if let Err(err) = self.add_device(dev) {
            self.put_device(dev);
            return Err(err);
        }
        Ok(dev)
    }

    /// Removes a device from the hierarchy.
    ///
    /// Unbinds its driver, leaves the parent's children and the
    /// power-management order, drops all of its links, leaves the registry
    /// order and drops the reference on the parent. The caller's own
    /// reference is untouched.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for unknown devices and `NoDevice` if the
    /// device is not added.
    pub fn del_device(&self, dev: DeviceId) -> DevResult {
        let node = self.node_or_err(dev)?;
        if !node.is_registered() {
            return dev_err!(NoDevice, "device '{}' is not added", node.name());
        }
        debug!("device: '{}': del", node.name());

        self.release_driver(dev)?;

        let parent = node.parent();
        if let Some(parent) = parent.and_then(|p| self.node(p)) {
            parent.inner().children.retain(|&child| child != dev);
        }
        {
            let mut dpm = self.dpm.lock();
            dpm.remove(dev);
            node.inner().in_dpm = false;
        }
        self.purge(dev)?;
        self.kset.lock().remove(dev);
        node.inner().registered = false;

        if let Some(parent) = parent {
            self.put_device(parent);
        }
        Ok(())
    }

    /// Deletes a device and drops the caller's reference.
    pub fn unregister(&self, dev: DeviceId) -> DevResult {
        self.del_device(dev)?;
        self.put_device(dev);
        Ok(())
    }

    /// Acquires a reference to `dev`.
    ///
    /// Returns `None`, and acquires nothing, for unknown or dying devices.
    pub fn get_device(&self, dev: DeviceId) -> Option<DeviceId> {
        let node = self.node(dev)?;
        node.kref().get_unless_zero().then_some(dev)
    }

    /// Drops a reference to `dev`.
    ///
    /// Dropping the last one runs the device's release callback, then frees
    /// the device. Must not be called with the link graph lock held.
    pub fn put_device(&self, dev: DeviceId) {
        let Some(node) = self.node(dev) else {
            self.warn_on(true, "reference dropped on a freed device");
            return;
        };
        node.kref().put(|| self.release_node(&node));
    }

    fn release_node(&self, node: &Arc<DeviceNode>) {
        let dev = node.id();
        self.warn_on(node.is_registered(), "last reference dropped on an added device");
        debug!("device: '{}': release", node.name());

        node.ops().release(dev);

        if let Some(links) = self.links.write().remove_device(dev) {
            self.warn_on(
                !links.consumers.is_empty() || !links.suppliers.is_empty(),
                "device freed with links attached",
            );
        }
        self.pool.write().remove(&dev);
    }

    /// Current reference count, or `None` once the device is freed.
    pub fn ref_count(&self, dev: DeviceId) -> Option<usize> {
        self.node(dev).map(|node| node.kref().read())
    }

    /// Number of live (not yet freed) devices.
    pub fn device_count(&self) -> usize {
        self.pool.read().len()
    }

    /// Device name.
    pub fn name(&self, dev: DeviceId) -> Option<String> {
        self.node(dev).map(|node| String::from(node.name()))
    }

    /// Parent device.
    pub fn parent(&self, dev: DeviceId) -> Option<DeviceId> {
        self.node(dev)?.parent()
    }

    /// Children of `dev`, oldest first.
    pub fn children(&self, dev: DeviceId) -> Vec<DeviceId> {
        self.node(dev).map(|node| node.children()).unwrap_or_default()
    }

    /// Whether `dev` has been added and not deleted.
    pub fn is_registered(&self, dev: DeviceId) -> bool {
        self.node(dev).is_some_and(|node| node.is_registered())
    }

    /// Snapshot of the registry order, head first.
    pub fn registry_order(&self) -> Vec<DeviceId> {
        self.kset.lock().to_vec()
    }

    /// Snapshot of the power-management order, head first.
    pub fn pm_order(&self) -> Vec<DeviceId> {
        self.dpm.lock().to_vec()
    }

    /// Calls `f` on each child of `parent`, oldest first.
    ///
    /// Stops at, and returns, the first error.
    pub fn for_each_child<E, F>(&self, parent: DeviceId, mut f: F) -> Result<(), E>
    where
        F: FnMut(DeviceId) -> Result<(), E>,
    {
        self.children(parent).into_iter().try_for_each(&mut f)
    }

    /// Calls `f` on each child of `parent`, newest first.
    pub fn for_each_child_reverse<E, F>(&self, parent: DeviceId, mut f: F) -> Result<(), E>
    where
        F: FnMut(DeviceId) -> Result<(), E>,
    {
        self.children(parent).into_iter().rev().try_for_each(&mut f)
    }

    /// Finds the first child of `parent` accepted by `matches`.
    ///
    /// A reference to the returned child is acquired; drop it with
    /// [`put_device`](Self::put_device).
    pub fn find_child<F>(&self, parent: DeviceId, mut matches: F) -> Option<DeviceId>
    where
        F: FnMut(DeviceId) -> bool,
    {
        self.children(parent)
            .into_iter()
            .find(|&child| matches(child) && self.get_device(child).is_some())
    }

    /// Waits until no driver probe is in flight.
    pub fn wait_for_device_probe(&self) {
        self.probe.wait_idle();
    }

    /// Gets the probe gate.
    pub fn probe_gate(&self) -> &ProbeGate {
        &self.probe
    }
}

impl Default for DeviceManager {
    fn default() -> Self {
        Self::new(DeviceCoreConfig::default())
    }
}

impl core::fmt::Debug for DeviceManager {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DeviceManager")
            .field("devices", &self.device_count())
            .field("links", &self.links.read().live_links())
            .field("probe", &self.probe)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DevError;
    use crate::ops::NoopDeviceOps;

    fn noop() -> Arc<dyn DeviceOps> {
        Arc::new(NoopDeviceOps)
    }

    #[test]
    fn test_register_and_order() {
        let mgr = DeviceManager::default();
        let bus = mgr.register("bus", None, noop()).unwrap();
        let a = mgr.register("a", Some(bus), noop()).unwrap();
        let b = mgr.register("b", Some(bus), noop()).unwrap();

        assert_eq!(mgr.registry_order(), alloc::vec![bus, a, b]);
        assert_eq!(mgr.pm_order(), alloc::vec![bus, a, b]);
        assert_eq!(mgr.children(bus), alloc::vec![a, b]);
        assert_eq!(mgr.parent(a), Some(bus));
        // Own reference plus one from each child.
        assert_eq!(mgr.ref_count(bus), Some(3));
        assert_eq!(mgr.ref_count(a), Some(1));
    }

    #[test]
    fn test_initialize_rejects_bad_input() {
        let mgr = DeviceManager::default();
        assert_eq!(mgr.initialize("", None, noop()), Err(DevError::InvalidArgument));
        assert_eq!(
            mgr.initialize("orphan", Some(DeviceId(42)), noop()),
            Err(DevError::InvalidArgument)
        );
        assert_eq!(mgr.device_count(), 0);
    }

    #[test]
    fn test_double_add_rejected() {
        let mgr = DeviceManager::default();
        let root = mgr.register("root", None, noop()).unwrap();
        let dev = mgr.register("dev", Some(root), noop()).unwrap();

        assert_eq!(mgr.add_device(dev), Err(DevError::InvalidArgument));
        // The failed add must not keep an extra parent reference.
        assert_eq!(mgr.ref_count(root), Some(2));
    }

    #[test]
    fn test_unregister_frees_device() {
        let mgr = DeviceManager::default();
        let root = mgr.register("root", None, noop()).unwrap();
        let dev = mgr.register("dev", Some(root), noop()).unwrap();

        mgr.unregister(dev).unwrap();
        assert_eq!(mgr.ref_count(dev), None);
        assert!(mgr.children(root).is_empty());
        assert_eq!(mgr.registry_order(), alloc::vec![root]);
        assert_eq!(mgr.ref_count(root), Some(1));

        assert_eq!(mgr.del_device(dev), Err(DevError::InvalidArgument));
    }

    #[test]
    fn test_child_iteration() {
        let mgr = DeviceManager::default();
        let root = mgr.register("root", None, noop()).unwrap();
        let a = mgr.register("a", Some(root), noop()).unwrap();
        let b = mgr.register("b", Some(root), noop()).unwrap();

        let mut seen = Vec::new();
        mgr.for_each_child(root, |c| -> Result<(), ()> {
            seen.push(c);
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, alloc::vec![a, b]);

        seen.clear();
        let res = mgr.for_each_child_reverse(root, |c| {
            seen.push(c);
            if c == b { Err(c) } else { Ok(()) }
        });
        assert_eq!(res, Err(b));
        assert_eq!(seen, alloc::vec![b]);

        let found = mgr.find_child(root, |c| c == b).unwrap();
        assert_eq!(found, b);
        assert_eq!(mgr.ref_count(b), Some(2));
        mgr.put_device(found);
        assert!(mgr.find_child(root, |_| false).is_none());
    }

    #[test]
    fn test_get_device_on_unknown_is_noop() {
        let mgr = DeviceManager::default();
        assert_eq!(mgr.get_device(DeviceId(9)), None);
    }
}
