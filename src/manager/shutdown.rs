//! Orderly shutdown of every added device.

use crate::device::DeviceNode;
use crate::link::DevLinkStatus;
use crate::ops::ShutdownCaps;

use super::DeviceManager;

impl DeviceManager {
    /// Shuts every added device down, last registered first.
    ///
    /// Blocks new probes for good, then waits for running ones. Each device
    /// leaves the registry order before its hooks run, with its own and its
    /// parent's device lock held. Hooks may delete other devices; those
    /// simply drop out of the walk.
    pub fn shutdown(&self) {
        self.probe.block();
        self.probe.wait_idle();
        info!("device: shutting down");

        loop {
            let Some(dev) = self.kset.lock().pop_last() else {
                break;
            };
            let Some(node) = self.node(dev) else {
                continue;
            };
            if !node.kref().get_unless_zero() {
                continue;
            }
            let parent = node.parent().and_then(|p| self.get_device(p));
            let parent_node = parent.and_then(|p| self.node(p));

            {
                let _parent_guard = parent_node.as_ref().map(|p| p.lock());
                let _guard = node.lock();
                self.shutdown_one(&node);
            }

            if let Some(parent) = parent {
                self.put_device(parent);
            }
            self.put_device(dev);
        }
        info!("device: shutdown complete");
    }

    fn shutdown_one(&self, node: &DeviceNode) {
        let dev = node.id();
        let ops = node.ops();
        let caps = ops.shutdown_caps();

        if caps.contains(ShutdownCaps::CLASS_SHUTDOWN_PRE) {
            debug!("{}: shutdown_pre", node.name());
            ops.class_shutdown_pre(dev);
        }
        if caps.contains(ShutdownCaps::BUS_SHUTDOWN) {
            debug!("{}: shutdown", node.name());
            ops.bus_shutdown(dev);
        } else if caps.contains(ShutdownCaps::DRIVER_SHUTDOWN)
            && self.device_status(dev) == DevLinkStatus::DriverBound
        {
            debug!("{}: shutdown", node.name());
            ops.driver_shutdown(dev);
        }
    }
}
