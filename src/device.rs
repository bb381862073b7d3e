//! Per-device node stored in the device pool.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicUsize, Ordering};

use spin::{Mutex, MutexGuard};

use crate::kref::Kref;
use crate::ops::DeviceOps;

/// Unique identifier for a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceId(pub usize);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dev#{}", self.0)
    }
}

/// Fields guarded by the node's field lock.
#[derive(Debug, Default)]
pub(crate) struct DeviceInner {
    /// Parent device. A reference is held on it while the device is added.
    pub parent: Option<DeviceId>,
    /// Children in the order they were added. Not owning.
    pub children: Vec<DeviceId>,
    /// Set between `add_device` and `del_device`.
    pub registered: bool,
    /// Set while the device sits on the power-management order list.
    pub in_dpm: bool,
}

/// A device in the pool.
///
/// Two locks: `lock` is the device lock held across driver callbacks,
/// `inner` guards the hierarchy fields and is only held briefly.
pub(crate) struct DeviceNode {
    id: DeviceId,
    name: String,
    kref: Kref,
    ops: Arc<dyn DeviceOps>,
    lock: Mutex<()>,
    inner: Mutex<DeviceInner>,
    /// Runtime-PM usage references taken through links.
    rpm_usage: AtomicUsize,
    /// Number of runtime-PM links with this device as the consumer.
    rpm_links: AtomicUsize,
}

impl DeviceNode {
    pub fn new(
        id: DeviceId,
        name: String,
        parent: Option<DeviceId>,
        ops: Arc<dyn DeviceOps>,
    ) -> Self {
        Self {
            id,
            name,
            kref: Kref::new(),
            ops,
            lock: Mutex::new(()),
            inner: Mutex::new(DeviceInner {
                parent,
                ..Default::default()
            }),
            rpm_usage: AtomicUsize::new(0),
            rpm_links: AtomicUsize::new(0),
        }
    }

    #[inline]
    pub fn id(&self) -> DeviceId {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn kref(&self) -> &Kref {
        &self.kref
    }

    #[inline]
    pub fn ops(&self) -> &Arc<dyn DeviceOps> {
        &self.ops
    }

    /// Takes the device lock.
    #[inline]
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock()
    }

    /// Takes the field lock.
    #[inline]
    pub fn inner(&self) -> MutexGuard<'_, DeviceInner> {
        self.inner.lock()
    }

    pub fn parent(&self) -> Option<DeviceId> {
        self.inner.lock().parent
    }

    pub fn children(&self) -> Vec<DeviceId> {
        self.inner.lock().children.clone()
    }

    pub fn is_registered(&self) -> bool {
        self.inner.lock().registered
    }

    pub fn in_dpm(&self) -> bool {
        self.inner.lock().in_dpm
    }

    pub fn rpm_get(&self) {
        self.rpm_usage.fetch_add(1, Ordering::AcqRel);
    }

    pub fn rpm_put(&self) {
        let _ = self
            .rpm_usage
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    pub fn rpm_usage(&self) -> usize {
        self.rpm_usage.load(Ordering::Acquire)
    }

    pub fn rpm_new_link(&self) {
        self.rpm_links.fetch_add(1, Ordering::AcqRel);
    }

    pub fn rpm_drop_link(&self) {
        let _ = self
            .rpm_links
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    pub fn rpm_links(&self) -> usize {
        self.rpm_links.load(Ordering::Acquire)
    }
}

impl fmt::Debug for DeviceNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceNode")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kref", &self.kref)
            .field("inner", &*self.inner.lock())
            .finish()
    }
}
