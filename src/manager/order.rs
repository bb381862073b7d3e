//! Keeping the registry and power-management orders dependency-safe.

use alloc::collections::BTreeSet;
use alloc::vec::Vec;

use crate::device::DeviceId;
use crate::error::DevResult;
use crate::link::LinkTable;
use crate::registry::DeviceList;

use super::DeviceManager;

/// How [`DeviceManager::device_move`] fixes up the orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DpmOrder {
    /// Leave both orders alone.
    #[default]
    None,
    /// Move the device right behind its new parent.
    DevAfterParent,
    /// Move the new parent right in front of the device.
    ParentBeforeDev,
    /// Move the device to the tail.
    DevLast,
}

impl DeviceManager {
    /// Depth-first walk over children and consumers, recording each device
    /// once, after everything depending on it.
    fn collect_dependents(
        &self,
        table: &LinkTable,
        dev: DeviceId,
        visited: &mut BTreeSet<DeviceId>,
        post_order: &mut Vec<DeviceId>,
    ) {
        if !visited.insert(dev) {
            return;
        }
        let Some(node) = self.node(dev) else {
            return;
        };
        for child in node.children() {
            self.collect_dependents(table, child, visited, post_order);
        }
        for link in table.consumers(dev) {
            self.collect_dependents(table, link.consumer(), visited, post_order);
        }
        post_order.push(dev);
    }

    /// Moves `dev`, all its descendants and all its consumers to the tail of
    /// the registry and power-management orders.
    ///
    /// Caller holds the graph lock and the power-management lock. Every
    /// device moves once, in reverse post-order, so each lands behind all of
    /// the moved devices it depends on.
    pub(super) fn reorder_locked(&self, table: &LinkTable, dpm: &mut DeviceList, dev: DeviceId) {
        let mut visited = BTreeSet::new();
        let mut post_order = Vec::new();
        self.collect_dependents(table, dev, &mut visited, &mut post_order);

        let mut kset = self.kset.lock();
        for &dep in post_order.iter().rev() {
            let Some(node) = self.node(dep) else {
                continue;
            };
            let (registered, in_dpm) = {
                let inner = node.inner();
                (inner.registered, inner.in_dpm)
            };
            if registered {
                kset.move_last(dep);
            }
            if in_dpm {
                dpm.move_last(dep);
            }
        }
    }

    /// Moves `dev` and everything depending on it to the tail of both orders.
    pub fn reorder_to_tail(&self, dev: DeviceId) -> DevResult {
        self.node_or_err(dev)?;
        let table = self.links.read();
        let mut dpm = self.dpm.lock();
        self.reorder_locked(&table, &mut dpm, dev);
        Ok(())
    }

    fn is_ancestor(&self, ancestor: DeviceId, dev: DeviceId) -> bool {
        let mut cur = self.parent(dev);
        let mut steps = self.device_count();
        while let Some(p) = cur {
            if p == ancestor {
                return true;
            }
            if steps == 0 {
                break;
            }
            steps -= 1;
            cur = self.parent(p);
        }
        false
    }

    /// Re-parents an added device.
    ///
    /// The reference on the old parent moves to the new one and the device
    /// moves between the children lists. `order` says how to fix up the
    /// orders; with no new parent, only `DevLast` has an effect.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument`: unknown device or parent, or the new parent is
    ///   the device itself or one of its descendants.
    /// - `NoDevice`: the device is not added.
    pub fn device_move(
        &self,
        dev: DeviceId,
        new_parent: Option<DeviceId>,
        order: DpmOrder,
    ) -> DevResult {
        let node = self.node_or_err(dev)?;
        if !node.is_registered() {
            return dev_err!(NoDevice, "device '{}' is not added", node.name());
        }
        let new_parent_node = match new_parent {
            Some(p) if p == dev || self.is_ancestor(dev, p) => {
                return dev_err!(InvalidArgument, "{} cannot be moved below itself", node.name());
            }
            Some(p) => Some(self.node_or_err(p)?),
            None => None,
        };
        if let Some(parent) = &new_parent_node {
            if !parent.kref().get_unless_zero() {
                return dev_err!(InvalidArgument, "new parent {} is gone", parent.id());
            }
        }

        let old_parent = {
            let mut dpm = self.dpm.lock();

            let old_parent = core::mem::replace(&mut node.inner().parent, new_parent);
            if let Some(old) = old_parent.and_then(|p| self.node(p)) {
                old.inner().children.retain(|&child| child != dev);
            }
            if let Some(parent) = &new_parent_node {
                parent.inner().children.push(dev);
            }

            match (order, new_parent) {
                (DpmOrder::DevAfterParent, Some(p)) => {
                    dpm.move_after(dev, p);
                    self.kset.lock().move_after(dev, p);
                }
                (DpmOrder::ParentBeforeDev, Some(p)) => {
                    dpm.move_before(p, dev);
                    self.kset.lock().move_before(p, dev);
                }
                (DpmOrder::DevLast, _) => {
                    dpm.move_last(dev);
                    self.kset.lock().move_last(dev);
                }
                _ => {}
            }
            old_parent
        };

        info!(
            "device: '{}': moved to {}",
            node.name(),
            new_parent.map_or_else(|| alloc::string::String::from("<none>"), |p| self.dev_name(p))
        );
        if let Some(old) = old_parent {
            self.put_device(old);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use alloc::sync::Arc;
    use alloc::vec;

    use super::*;
    use crate::error::DevError;
    use crate::link::LinkFlags;
    use crate::ops::NoopDeviceOps;

    #[test]
    fn test_reorder_moves_subtree() {
        let mgr = DeviceManager::default();
        let a = mgr.register("a", None, Arc::new(NoopDeviceOps)).unwrap();
        let a1 = mgr.register("a1", Some(a), Arc::new(NoopDeviceOps)).unwrap();
        let b = mgr.register("b", None, Arc::new(NoopDeviceOps)).unwrap();

        mgr.reorder_to_tail(a).unwrap();
        assert_eq!(mgr.registry_order(), vec![b, a, a1]);
        assert_eq!(mgr.pm_order(), vec![b, a, a1]);
    }

    #[test]
    fn test_link_reorders_consumer() {
        let mgr = DeviceManager::default();
        let c = mgr.register("c", None, Arc::new(NoopDeviceOps)).unwrap();
        let s = mgr.register("s", None, Arc::new(NoopDeviceOps)).unwrap();

        mgr.add_link(c, s, LinkFlags::empty()).unwrap();
        assert_eq!(mgr.pm_order(), vec![s, c]);
        assert_eq!(mgr.registry_order(), vec![s, c]);
    }

    #[test]
    fn test_device_move() {
        let mgr = DeviceManager::default();
        let p1 = mgr.register("p1", None, Arc::new(NoopDeviceOps)).unwrap();
        let dev = mgr.register("dev", Some(p1), Arc::new(NoopDeviceOps)).unwrap();
        let p2 = mgr.register("p2", None, Arc::new(NoopDeviceOps)).unwrap();

        mgr.device_move(dev, Some(p2), DpmOrder::DevAfterParent).unwrap();
        assert_eq!(mgr.parent(dev), Some(p2));
        assert!(mgr.children(p1).is_empty());
        assert_eq!(mgr.children(p2), vec![dev]);
        assert_eq!(mgr.ref_count(p1), Some(1));
        assert_eq!(mgr.ref_count(p2), Some(2));
        assert_eq!(mgr.pm_order(), vec![p1, p2, dev]);

        assert_eq!(
            mgr.device_move(p2, Some(dev), DpmOrder::None),
            Err(DevError::InvalidArgument)
        );
    }
}
